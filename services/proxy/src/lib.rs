//! Rendezvous proxy for DBGP debugger sessions.
//!
//! Debugger engines initiate DBGP connections, which means only one process
//! can own the well-known engine port. This proxy terminates all engine
//! connections on a single stable port, reads each session's declared IDE
//! key, and splices the connection onto whichever IDE registered that key.

pub mod config;
pub mod proxy;

pub use config::{parse_listen_addr, Config, LogLevel};
pub use proxy::{
    AcceptPolicy, AllowAll, ControlListener, EngineListener, IdeRegistration, ListenerStats,
    Proxy, Registry, Session, SessionError, SessionState,
};
