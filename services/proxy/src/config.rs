//! Proxy configuration.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use anyhow::{Context, Result};

/// Default bind for the IDE command listener.
pub const DEFAULT_IDE_LISTEN: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9001);

/// Default bind for the engine listener.
pub const DEFAULT_ENGINE_LISTEN: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9000);

/// Resolved proxy configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where IDEs send `proxyinit` / `proxystop`.
    pub ide_listen: SocketAddr,
    /// Where debugger engines connect; also the endpoint advertised in
    /// `proxyinit` responses.
    pub engine_listen: SocketAddr,
    /// Log verbosity floor applied when `RUST_LOG` is unset.
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ide_listen: DEFAULT_IDE_LISTEN,
            engine_listen: DEFAULT_ENGINE_LISTEN,
            log_level: LogLevel::Info,
        }
    }
}

/// Parse a `[HOST:]PORT` listener address; a bare port implies `127.0.0.1`.
pub fn parse_listen_addr(value: &str) -> Result<SocketAddr> {
    if let Ok(port) = value.parse::<u16>() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port));
    }
    value
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid listener address '{value}' (expected [HOST:]PORT)"))
}

/// Log verbosity levels accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Critical,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// The `tracing` filter directive for this level.
    ///
    /// `CRITICAL` folds into `error`: tracing has no higher rank.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Critical | LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(LogLevel::Critical),
            "ERROR" => Ok(LogLevel::Error),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            _ => anyhow::bail!(
                "unknown log level '{s}' (expected CRITICAL, ERROR, WARN, INFO, or DEBUG)"
            ),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Critical => "CRITICAL",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_implies_loopback() {
        assert_eq!(
            parse_listen_addr("9000").unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn host_port_passes_through() {
        assert_eq!(
            parse_listen_addr("0.0.0.0:9001").unwrap(),
            "0.0.0.0:9001".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_listen_addr("").is_err());
        assert!(parse_listen_addr("nine-thousand").is_err());
        assert!(parse_listen_addr("127.0.0.1:").is_err());
    }

    #[test]
    fn log_levels_parse_case_insensitively() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("CRITICAL".parse::<LogLevel>().unwrap(), LogLevel::Critical);
        assert_eq!(LogLevel::Critical.as_filter(), "error");
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
