//! dbgp-proxy
//!
//! Rendezvous proxy for DBGP debugger sessions.
//!
//! This service:
//! - Accepts `proxyinit` / `proxystop` registrations from IDEs
//! - Accepts debugger engine connections on one stable port
//! - Routes each engine session to the IDE that registered its key
//! - Splices routed connections byte-for-byte until either side closes

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dbgp_proxy::config::{parse_listen_addr, Config, LogLevel};
use dbgp_proxy::proxy::Proxy;

#[derive(Parser)]
#[command(
    name = "dbgp-proxy",
    version,
    about = "Rendezvous proxy for DBGP debugger sessions"
)]
struct Cli {
    /// IDE command listener bind address
    #[arg(short = 'i', long = "ide", value_name = "[HOST:]PORT", default_value = "127.0.0.1:9001")]
    ide: String,

    /// Debugger engine listener bind address
    #[arg(short = 'd', long = "debug", value_name = "[HOST:]PORT", default_value = "127.0.0.1:9000")]
    engine: String,

    /// Log level (CRITICAL|ERROR|WARN|INFO|DEBUG); RUST_LOG overrides
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL", default_value = "INFO")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        Ok(Config {
            ide_listen: parse_listen_addr(&self.ide).context("invalid -i argument")?,
            engine_listen: parse_listen_addr(&self.engine).context("invalid -d argument")?,
            log_level: self
                .log_level
                .parse::<LogLevel>()
                .context("invalid -l argument")?,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version print cleanly and exit 0; real argument
            // errors exit 1.
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("dbgp-proxy: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let filter = format!(
        "dbgp_proxy={level},dbgp_wire={level}",
        level = config.log_level.as_filter()
    );
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        ide_listen = %config.ide_listen,
        engine_listen = %config.engine_listen,
        log_level = %config.log_level,
        "starting dbgp-proxy"
    );

    let proxy = match Proxy::bind(&config).await {
        Ok(proxy) => proxy,
        Err(err) => {
            error!(error = format!("{err:#}"), "failed to start");
            return ExitCode::FAILURE;
        }
    };

    match proxy.run_until(wait_for_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = format!("{err:#}"), "proxy failed");
            ExitCode::FAILURE
        }
    }
}

/// Resolve on SIGINT, SIGTERM, or ctrl-c.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = %err, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
