//! IDE-side command listener.
//!
//! IDEs talk to the proxy over short-lived connections: one command in, one
//! XML document out, then the connection closes. The registering client
//! sends its command without a terminator and blocks for the response, so
//! each transaction is a single bounded read rather than line framing.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use dbgp_wire::{
    command_token, failure_response, init_success_response, parse_command, stop_success_response,
    ControlCommand,
};

use super::registry::{IdeRegistration, Registry};

/// Upper bound on a control request.
const MAX_REQUEST_LEN: usize = 1024;

/// TCP listener for IDE control commands.
pub struct ControlListener {
    listener: TcpListener,
    registry: Arc<Registry>,
    /// Engine-side endpoint advertised in `proxyinit` responses.
    advertised: SocketAddr,
    shutdown: watch::Receiver<bool>,
}

impl ControlListener {
    /// Bind the command listener. `advertised` is the engine-side endpoint
    /// handed to IDEs in successful `proxyinit` responses.
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<Registry>,
        advertised: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(bind_addr = %listener.local_addr()?, "IDE command listener bound");
        Ok(Self {
            listener,
            registry,
            advertised,
            shutdown,
        })
    }

    /// The address this listener actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept command connections until shutdown.
    pub async fn run(self) -> io::Result<()> {
        let mut stop = self.shutdown.clone();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let registry = Arc::clone(&self.registry);
                        let advertised = self.advertised;
                        tokio::spawn(
                            async move {
                                if let Err(e) = handle_client(stream, peer, registry, advertised).await {
                                    debug!(peer = %peer, error = %e, "control transaction failed");
                                }
                            }
                            .instrument(tracing::info_span!("control", peer = %peer)),
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "control accept error");
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                },
                _ = async { let _ = stop.wait_for(|flag| *flag).await; } => break,
            }
        }
        Ok(())
    }
}

/// Run one command transaction: read, execute, respond, close.
async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    advertised: SocketAddr,
) -> io::Result<()> {
    let mut buf = vec![0u8; MAX_REQUEST_LEN];
    let n = stream.read(&mut buf).await?;
    // Tokens of interest are ASCII; anything else degrades to replacement
    // characters and fails command parsing with a readable message.
    let request = String::from_utf8_lossy(&buf[..n]);

    let response = match parse_command(&request) {
        Ok(ControlCommand::Init {
            port,
            ide_key,
            multi,
        }) => {
            let registration = IdeRegistration {
                key: ide_key.clone(),
                host: peer.ip(),
                port,
                multi,
            };
            let endpoint = registration.endpoint();
            if registry.add(registration).await {
                info!(key = %ide_key, ide = %endpoint, "IDE registered");
                init_success_response(&ide_key, &advertised.ip().to_string(), advertised.port())
            } else {
                warn!(key = %ide_key, "proxyinit rejected: key in use");
                failure_response("proxyinit", "IDE Key already exists")
            }
        }
        Ok(ControlCommand::Stop { ide_key }) => {
            match registry.remove(&ide_key).await {
                Some(old) => info!(key = %ide_key, ide = %old.endpoint(), "IDE deregistered"),
                None => warn!(key = %ide_key, "proxystop for unregistered key"),
            }
            stop_success_response(&ide_key)
        }
        Err(e) => {
            debug!(peer = %peer, error = %e, "rejected control command");
            failure_response(command_token(&request).unwrap_or(""), &e.to_string())
        }
    };

    stream.write_all(response.as_bytes()).await?;
    Ok(())
}
