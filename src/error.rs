//! Unified error type.

use std::fmt;
use std::io;

/// The error type surfaced by gantry's fallible operations.
///
/// Application-level errors (404, 422, etc.) are expressed as
/// [`Response`](crate::Response) values, not as `Error`s — an application that
/// wants to report a failure to the client builds an error-status response
/// and delivers it like any other. This type covers the delivery protocol
/// itself: contract breaches, transport failures, and capability gaps.
///
/// Errors are local to the request they occur on. A failed body read or a
/// peer that vanished mid-stream never takes down the hosting process.
#[derive(Debug)]
pub enum Error {
    /// The delivery contract was breached: a handler received a response
    /// variant it structurally cannot honor and no documented fallback
    /// applies, or an application completed without routing its response
    /// through the handler it was given.
    ProtocolViolation(&'static str),

    /// The peer closed or reset the connection while the request body was
    /// being read or the response was being sent or flushed.
    ///
    /// Streamed producers see this from the next `send`/`flush` call after
    /// the disconnect — never a silent partial success — so they can abort
    /// and run their own cleanup.
    ConnectionClosed,

    /// The handler does not implement this response variant and is degrading
    /// through its documented fallback path.
    UnsupportedVariant(&'static str),

    /// Transport-level I/O failure outside the classifications above.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtocolViolation(detail) => write!(f, "protocol violation: {detail}"),
            Self::ConnectionClosed => f.write_str("connection closed by peer"),
            Self::UnsupportedVariant(variant) => write!(f, "unsupported response variant: {variant}"),
            Self::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Self::ConnectionClosed,
            _ => Self::Io(e),
        }
    }
}
