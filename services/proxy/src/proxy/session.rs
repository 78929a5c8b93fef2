//! Per-connection session driver.
//!
//! A session owns exactly two sockets for its whole life: the accepted
//! engine connection and, once routing succeeds, the outbound connection to
//! the registered IDE. It reads one framed init packet, routes on the
//! packet's `idekey`, rewrites the packet for the IDE, and then degrades
//! into a byte-transparent splice until either side hangs up.
//!
//! Failures stay inside the session: the only global effect a session ever
//! has is evicting a registration whose endpoint no longer answers.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use dbgp_wire::{encode_packet, proxy_error_payload, read_packet, InitPacket, WireError};

use super::engine::ListenerStats;
use super::registry::Registry;

/// How long a dial to a registered IDE may take before the registration is
/// treated as stale.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Read buffer per splice direction.
const SPLICE_BUF_LEN: usize = 8192;

/// Phases of a session. `Stopped` is terminal and sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the engine's framed init packet.
    AwaitInit,
    /// Init parsed; selecting and dialing the IDE.
    Routing,
    /// Both sockets live; forwarding bytes both ways.
    Splicing,
    /// Session over; both sockets released.
    Stopped,
}

/// Why a session ended before a clean splice shutdown.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed framing or init document from the engine.
    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),

    /// The init packet carried no usable `idekey`.
    #[error("init packet has no IDE key")]
    MissingIdeKey,

    /// No IDE is registered under the requested key.
    #[error("no IDE registered for key [{0}]")]
    UnknownKey(String),

    /// The registered IDE endpoint did not answer; the registration has
    /// been evicted.
    #[error("IDE for key [{key}] unreachable at {endpoint}")]
    Dial { key: String, endpoint: SocketAddr },

    /// Socket I/O failed after routing.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The proxy is shutting down.
    #[error("cancelled by proxy shutdown")]
    Shutdown,
}

/// One engine connection being routed and spliced.
pub struct Session {
    engine: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    stats: Arc<ListenerStats>,
    shutdown: watch::Receiver<bool>,
    state: SessionState,
}

impl Session {
    pub fn new(
        engine: TcpStream,
        peer: SocketAddr,
        registry: Arc<Registry>,
        stats: Arc<ListenerStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            peer,
            registry,
            stats,
            shutdown,
            state: SessionState::AwaitInit,
        }
    }

    /// Current phase of the session.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion. Never panics outward; both sockets
    /// are closed on every exit path.
    pub async fn run(mut self) {
        let outcome = self.drive().await;
        self.state = SessionState::Stopped;
        match outcome {
            Ok(()) => debug!(peer = %self.peer, "session closed"),
            Err(SessionError::Shutdown) => debug!(peer = %self.peer, "session cancelled"),
            Err(SessionError::Transport(error)) => {
                // Resets at teardown are routine churn, not proxy failures.
                debug!(peer = %self.peer, error = %error, "session ended with transport error");
            }
            Err(error) => {
                self.stats.sessions_failed.fetch_add(1, Ordering::Relaxed);
                warn!(peer = %self.peer, error = %error, "session failed");
            }
        }
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        enum ReadOutcome {
            Packet(dbgp_wire::FramedPacket),
            Closed,
            Protocol(WireError),
            Shutdown,
        }

        let outcome = tokio::select! {
            read = read_packet(&mut self.engine) => match read {
                Ok(packet) => ReadOutcome::Packet(packet),
                // The engine connected and left without a word.
                Err(WireError::Closed) => ReadOutcome::Closed,
                Err(error) => ReadOutcome::Protocol(error),
            },
            _ = self.shutdown.wait_for(|stop| *stop) => ReadOutcome::Shutdown,
        };

        let packet = match outcome {
            ReadOutcome::Packet(packet) => packet,
            ReadOutcome::Closed => return Ok(()),
            ReadOutcome::Protocol(error) => {
                self.report_error(&format!("Invalid protocol packet: {error}"))
                    .await;
                return Err(error.into());
            }
            ReadOutcome::Shutdown => return Err(SessionError::Shutdown),
        };

        let mut init = match InitPacket::parse(&packet.payload) {
            Ok(init) => init,
            Err(error) => {
                self.report_error(&format!("Invalid init packet: {error}")).await;
                return Err(error.into());
            }
        };

        let ide_key = match init.attr("idekey").filter(|key| !key.is_empty()) {
            Some(key) => key.to_string(),
            None => {
                self.report_error("No IDE key in init packet").await;
                return Err(SessionError::MissingIdeKey);
            }
        };

        self.state = SessionState::Routing;
        debug!(peer = %self.peer, key = %ide_key, "routing session");

        let Some(registration) = self.registry.lookup(&ide_key).await else {
            self.report_error(&format!("No server with key [{ide_key}], stopping request"))
                .await;
            return Err(SessionError::UnknownKey(ide_key));
        };

        let endpoint = registration.endpoint();
        let dialed = match timeout(DIAL_TIMEOUT, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timeout",
            )),
        };
        let mut ide = match dialed {
            Ok(stream) => stream,
            Err(error) => {
                // A dead IDE must not blackhole the key forever: drop the
                // registration so the IDE can register again.
                self.registry.remove(&ide_key).await;
                warn!(
                    key = %ide_key,
                    endpoint = %endpoint,
                    error = %error,
                    "IDE unreachable, registration evicted"
                );
                self.report_error(&format!(
                    "Unable to connect to remote debugger at {endpoint}"
                ))
                .await;
                return Err(SessionError::Dial {
                    key: ide_key,
                    endpoint,
                });
            }
        };

        // Tell the IDE where the engine really lives, and that the packet
        // came through a proxy.
        if init.attr("hostname").map_or(true, str::is_empty) {
            init.set_attr("hostname", &self.peer.ip().to_string());
        }
        init.set_attr("proxied", "true");

        ide.write_all(&encode_packet(&init.to_bytes())).await?;
        if let Some(byte) = packet.carry {
            ide.write_all(&[byte]).await?;
        }

        self.state = SessionState::Splicing;
        self.stats.sessions_routed.fetch_add(1, Ordering::Relaxed);
        info!(
            peer = %self.peer,
            key = %ide_key,
            ide = %endpoint,
            "session routed"
        );

        self.splice(&mut ide).await
    }

    /// Forward bytes both ways until either socket reports EOF or an error,
    /// then let both sockets close.
    async fn splice(&mut self, ide: &mut TcpStream) -> Result<(), SessionError> {
        let stats = Arc::clone(&self.stats);
        let (mut engine_read, mut engine_write) = self.engine.split();
        let (mut ide_read, mut ide_write) = ide.split();

        let engine_to_ide = async {
            let mut buf = vec![0u8; SPLICE_BUF_LEN];
            loop {
                match engine_read.read(&mut buf).await {
                    Ok(0) => return Ok(()),
                    Ok(n) => {
                        ide_write.write_all(&buf[..n]).await?;
                        stats
                            .bytes_engine_to_ide
                            .fetch_add(n as u64, Ordering::Relaxed);
                    }
                    Err(error) => return Err(error),
                }
            }
        };

        let ide_to_engine = async {
            let mut buf = vec![0u8; SPLICE_BUF_LEN];
            loop {
                match ide_read.read(&mut buf).await {
                    Ok(0) => return Ok(()),
                    Ok(n) => {
                        engine_write.write_all(&buf[..n]).await?;
                        stats
                            .bytes_ide_to_engine
                            .fetch_add(n as u64, Ordering::Relaxed);
                    }
                    Err(error) => return Err(error),
                }
            }
        };

        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            result = engine_to_ide => result.map_err(SessionError::Transport),
            result = ide_to_engine => result.map_err(SessionError::Transport),
            _ = shutdown.wait_for(|stop| *stop) => Err(SessionError::Shutdown),
        }
    }

    /// Report a pre-routing failure to the engine as a framed `proxyerror`
    /// packet. Delivery is best-effort; the session is ending either way.
    async fn report_error(&mut self, message: &str) {
        let wire = encode_packet(&proxy_error_payload(message));
        if let Err(error) = self.engine.write_all(&wire).await {
            debug!(peer = %self.peer, error = %error, "could not deliver proxyerror");
        }
    }
}
