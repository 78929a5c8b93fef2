//! # dbgp-wire
//!
//! Wire-level building blocks for the DBGP debugger protocol as seen by a
//! rendezvous proxy:
//!
//! - Length-prefixed packet framing (`<decimal-length>\0<payload>\0`)
//! - Attribute-level surgery on the engine's init packet
//! - The line-oriented control commands IDEs use to register themselves
//!   (`proxyinit` / `proxystop`) and their XML responses
//!
//! The crate deliberately stops at the handshake: once a session is routed,
//! traffic is an opaque byte stream and never passes through this code again.

mod command;
mod error;
mod framing;
mod xml;

pub use command::{
    command_token, failure_response, init_success_response, parse_command, stop_success_response,
    ControlCommand,
};
pub use error::{CommandError, WireError};
pub use framing::{encode_packet, read_packet, FramedPacket, MAX_PAYLOAD_LEN};
pub use xml::{proxy_error_payload, InitPacket, XML_PROLOG};
