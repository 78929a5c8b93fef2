//! Proxy supervisor.
//!
//! Owns the registry and both listeners. Runs until a caller-supplied
//! shutdown future resolves (the signal handler in `main`, a oneshot in
//! tests), then broadcasts shutdown and gives the listeners a bounded
//! window to drain before giving up on them.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Config;

use super::command::ControlListener;
use super::engine::{EngineListener, ListenerStats, SHUTDOWN_GRACE};
use super::registry::Registry;

/// Extra slack on top of the engine listener's own session drain.
const LISTENER_STOP_TIMEOUT: Duration = Duration::from_secs(SHUTDOWN_GRACE.as_secs() + 2);

/// The assembled proxy: one registry, two listeners.
pub struct Proxy {
    registry: Arc<Registry>,
    engine: EngineListener,
    control: ControlListener,
    shutdown_tx: watch::Sender<bool>,
    engine_addr: SocketAddr,
    control_addr: SocketAddr,
}

impl Proxy {
    /// Bind both listeners. The engine listener's actual bound address is
    /// what `proxyinit` responses advertise, so a `:0` bind works for tests.
    pub async fn bind(config: &Config) -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let engine = EngineListener::bind(
            config.engine_listen,
            Arc::clone(&registry),
            shutdown_rx.clone(),
        )
        .await
        .with_context(|| format!("binding engine listener on {}", config.engine_listen))?;
        let engine_addr = engine.local_addr()?;

        let control = ControlListener::bind(
            config.ide_listen,
            Arc::clone(&registry),
            engine_addr,
            shutdown_rx,
        )
        .await
        .with_context(|| format!("binding IDE command listener on {}", config.ide_listen))?;
        let control_addr = control.local_addr()?;

        Ok(Self {
            registry,
            engine,
            control,
            shutdown_tx,
            engine_addr,
            control_addr,
        })
    }

    /// The registry shared by both listeners.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Engine-side endpoint (also advertised to IDEs).
    pub fn engine_addr(&self) -> SocketAddr {
        self.engine_addr
    }

    /// IDE command endpoint.
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// Engine listener counters.
    pub fn engine_stats(&self) -> Arc<ListenerStats> {
        self.engine.stats()
    }

    /// Run both listeners until `shutdown` resolves, then stop and drain.
    ///
    /// Returns an error if either listener dies before shutdown was asked
    /// for; an unattended proxy with a dead listener is worse than a dead
    /// proxy.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Proxy {
            engine,
            control,
            shutdown_tx,
            engine_addr,
            control_addr,
            ..
        } = self;

        info!(
            engine = %engine_addr,
            control = %control_addr,
            "proxy running"
        );

        let mut listeners = JoinSet::new();
        listeners.spawn(async move { ("engine", engine.run().await) });
        listeners.spawn(async move { ("IDE command", control.run().await) });

        tokio::pin!(shutdown);
        let mut failure = None;
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
            }
            exited = listeners.join_next() => {
                failure = Some(match exited {
                    Some(Ok((name, Err(error)))) => format!("{name} listener failed: {error}"),
                    Some(Ok((name, Ok(())))) => format!("{name} listener exited unexpectedly"),
                    Some(Err(join_error)) => format!("listener task died: {join_error}"),
                    None => "no listeners running".to_string(),
                });
            }
        }

        let _ = shutdown_tx.send(true);

        let drain = async {
            while listeners.join_next().await.is_some() {}
        };
        if tokio::time::timeout(LISTENER_STOP_TIMEOUT, drain).await.is_err() {
            warn!("listener shutdown timed out, aborting");
            listeners.shutdown().await;
        }

        match failure {
            None => {
                info!("proxy stopped");
                Ok(())
            }
            Some(message) => bail!(message),
        }
    }
}
