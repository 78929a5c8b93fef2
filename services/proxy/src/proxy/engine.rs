//! Engine-side listener.
//!
//! Accepts long-lived connections from debugger engines and spawns one
//! [`Session`] task per connection. The listener never blocks on a session;
//! a slow or hung session affects only itself.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use super::registry::Registry;
use super::session::Session;

/// How long a stopping listener waits for live sessions to wind down
/// before abandoning them.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Veto hook consulted for every accepted engine connection, before any
/// I/O happens on it. Returning `false` closes the connection silently.
pub trait AcceptPolicy: Send + Sync {
    fn allow(&self, peer: SocketAddr) -> bool;
}

/// The default policy: every engine is welcome.
#[derive(Debug, Default)]
pub struct AllowAll;

impl AcceptPolicy for AllowAll {
    fn allow(&self, _peer: SocketAddr) -> bool {
        true
    }
}

/// Counters for the engine listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Engine connections accepted.
    pub sessions_accepted: AtomicU64,
    /// Sessions currently alive.
    pub sessions_active: AtomicU64,
    /// Connections refused by the accept policy.
    pub sessions_rejected: AtomicU64,
    /// Sessions that reached the splice phase.
    pub sessions_routed: AtomicU64,
    /// Sessions that ended in a protocol or routing failure.
    pub sessions_failed: AtomicU64,
    /// Spliced bytes, engine to IDE.
    pub bytes_engine_to_ide: AtomicU64,
    /// Spliced bytes, IDE to engine.
    pub bytes_ide_to_engine: AtomicU64,
}

/// TCP listener for debugger engines.
pub struct EngineListener {
    listener: TcpListener,
    registry: Arc<Registry>,
    policy: Arc<dyn AcceptPolicy>,
    stats: Arc<ListenerStats>,
    shutdown: watch::Receiver<bool>,
}

impl EngineListener {
    /// Bind the engine listener.
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<Registry>,
        shutdown: watch::Receiver<bool>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(bind_addr = %listener.local_addr()?, "engine listener bound");
        Ok(Self {
            listener,
            registry,
            policy: Arc::new(AllowAll),
            stats: Arc::new(ListenerStats::default()),
            shutdown,
        })
    }

    /// Replace the accept policy.
    pub fn with_policy(mut self, policy: Arc<dyn AcceptPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// The address this listener actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Listener counters.
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Accept engines until shutdown, then drain live sessions for up to
    /// [`SHUTDOWN_GRACE`].
    pub async fn run(self) -> io::Result<()> {
        let mut sessions = JoinSet::new();
        let mut stop = self.shutdown.clone();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if !self.policy.allow(peer) {
                            self.stats.sessions_rejected.fetch_add(1, Ordering::Relaxed);
                            warn!(peer = %peer, "engine connection refused by policy");
                            continue;
                        }
                        self.stats.sessions_accepted.fetch_add(1, Ordering::Relaxed);
                        self.stats.sessions_active.fetch_add(1, Ordering::Relaxed);
                        debug!(peer = %peer, "engine connected");

                        let session = Session::new(
                            stream,
                            peer,
                            Arc::clone(&self.registry),
                            Arc::clone(&self.stats),
                            self.shutdown.clone(),
                        );
                        let stats = Arc::clone(&self.stats);
                        sessions.spawn(
                            async move {
                                session.run().await;
                                stats.sessions_active.fetch_sub(1, Ordering::Relaxed);
                            }
                            .instrument(tracing::info_span!("session", peer = %peer)),
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "engine accept error");
                        // Avoid a hot loop on persistent accept failures.
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                // Reap finished sessions as we go.
                Some(reaped) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = reaped {
                        if e.is_panic() {
                            error!(error = %e, "session task panicked");
                        }
                    }
                }
                _ = async { let _ = stop.wait_for(|flag| *flag).await; } => break,
            }
        }

        drop(self.listener);
        if !sessions.is_empty() {
            info!(live = sessions.len(), "engine listener stopping, draining sessions");
        }
        let drain = async {
            while sessions.join_next().await.is_some() {}
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(
                remaining = sessions.len(),
                "session drain timed out, aborting remainder"
            );
            sessions.shutdown().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    struct DenyAll;

    impl AcceptPolicy for DenyAll {
        fn allow(&self, _peer: SocketAddr) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn deny_policy_drops_connections_before_any_io() {
        let registry = Arc::new(Registry::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener = EngineListener::bind("127.0.0.1:0".parse().unwrap(), registry, shutdown_rx)
            .await
            .unwrap()
            .with_policy(Arc::new(DenyAll));
        let addr = listener.local_addr().unwrap();
        let stats = listener.stats();
        tokio::spawn(listener.run());

        let mut conn = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        // Refused connections are dropped without a byte exchanged.
        let n = conn.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
        assert_eq!(stats.sessions_rejected.load(Ordering::Relaxed), 1);
        assert_eq!(stats.sessions_accepted.load(Ordering::Relaxed), 0);
    }
}
