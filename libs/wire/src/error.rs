//! Error types for the DBGP wire protocol.

use thiserror::Error;

/// Errors produced while reading or writing DBGP wire data.
#[derive(Debug, Error)]
pub enum WireError {
    /// The connection closed cleanly before the first byte of a packet.
    #[error("connection closed before a packet arrived")]
    Closed,

    /// The length prefix contained a byte that is not an ASCII digit.
    #[error("invalid byte {byte:#04x} in packet length prefix")]
    BadLengthByte { byte: u8 },

    /// The length prefix terminated without any digits.
    #[error("empty packet length prefix")]
    EmptyLength,

    /// The declared payload length exceeds the allowed maximum.
    #[error("declared payload length {len} exceeds the {max}-byte limit")]
    OversizedPayload { len: usize, max: usize },

    /// The connection closed before the full payload arrived.
    #[error("connection closed after {got} of {want} payload bytes")]
    ShortRead { got: usize, want: usize },

    /// The init payload is not a usable XML document.
    #[error("malformed init packet: {0}")]
    MalformedInit(String),

    /// I/O failure on the underlying stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors produced while parsing an IDE control command.
///
/// The `Display` text of each variant is the message placed verbatim in the
/// `<error>` element of the failure response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// A command that is neither `proxyinit` nor `proxystop`.
    #[error("Unknown command [{0}]")]
    UnknownCommand(String),

    /// The request contained no command token at all.
    #[error("No command")]
    Empty,

    /// `-k` was missing or had no value.
    #[error("No IDE key")]
    MissingIdeKey,

    /// `-p` was missing or had no value.
    #[error("No port defined for proxy")]
    MissingPort,

    /// `-p` was present but not a valid TCP port.
    #[error("Invalid proxy port [{0}]")]
    InvalidPort(String),
}
