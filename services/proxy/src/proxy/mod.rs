//! The session router.
//!
//! ```text
//! Engine ──> EngineListener ──> Session ──(lookup)──> Registry
//!                                  │                      ▲
//!                                  ├──(dial + rewritten init)──> IDE
//!                                  └──(splice: bytes both ways)
//!
//! IDE ──> ControlListener ──(proxyinit / proxystop)──> Registry
//! ```
//!
//! One registry instance is shared by both listeners; each session owns its
//! two sockets exclusively from accept to teardown.

mod command;
mod engine;
mod registry;
mod session;
mod supervisor;

pub use command::ControlListener;
pub use engine::{AcceptPolicy, AllowAll, EngineListener, ListenerStats, SHUTDOWN_GRACE};
pub use registry::{IdeRegistration, Registry};
pub use session::{Session, SessionError, SessionState, DIAL_TIMEOUT};
pub use supervisor::Proxy;
