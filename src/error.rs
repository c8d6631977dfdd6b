//! Error taxonomy for the gateway's component boundaries.
//!
//! Each component gets its own enum so callers can match on the kind
//! of failure (e.g. a timeout vs. a malformed reply) without
//! inspecting strings or `io::ErrorKind`.

use std::backtrace::Backtrace;

use snafu::Snafu;

/// Errors from decoding/encoding the RADIUS packet header and payload.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    /// Fewer bytes were available than the header or the declared
    /// `length` required.
    #[snafu(display("unexpected end of input"))]
    UnexpectedEof { backtrace: Backtrace },

    /// The `length` field was smaller than the 4-byte header itself.
    #[snafu(display("packet length {length} is shorter than the header"))]
    LengthUnderflow { length: u16, backtrace: Backtrace },

    /// The underlying reader returned an I/O error other than EOF.
    Io {
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

/// Errors from a single upstream UDP dispatch.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DispatchError {
    /// DNS resolution of the upstream host failed.
    #[snafu(display("failed to resolve upstream {host}:{port}: {source}"))]
    Resolve {
        host: String,
        port: u16,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// The upstream host resolved to no addresses at all.
    #[snafu(display("upstream {host}:{port} resolved to no addresses"))]
    NoAddress { host: String, port: u16 },

    /// Binding the ephemeral outbound socket failed.
    Bind {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// Sending the request datagram failed or was short.
    Send {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// No reply arrived within `radius_timeout`.
    #[snafu(display("upstream request timed out"))]
    Timeout { backtrace: Backtrace },

    /// Reading the reply datagram failed.
    Recv {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// The reply datagram did not decode as a RADIUS packet.
    #[snafu(display("malformed reply from upstream: {source}"))]
    Decode {
        source: CodecError,
        backtrace: Backtrace,
    },
}

impl DispatchError {
    /// True only for the upstream-timeout variant, which callers need
    /// to distinguish from other dispatch failures.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::Timeout { .. })
    }
}

/// Errors from the TLS accept loop's `listener.accept()` call.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AcceptError {
    Io {
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

impl AcceptError {
    /// Transient accept errors (resource exhaustion) get backed off
    /// and retried; anything else is treated as permanent and bubbles
    /// up to end the accept loop.
    pub fn is_temporary(&self) -> bool {
        match self {
            AcceptError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
            ) || source.raw_os_error().is_some_and(is_temporary_os_error),
        }
    }
}

/// `EMFILE`/`ENFILE`/`ENOBUFS`/`ENOMEM`: transient resource exhaustion
/// that a backoff-and-retry can ride out, as opposed to a
/// configuration or logic error.
fn is_temporary_os_error(errno: i32) -> bool {
    const EMFILE: i32 = 24;
    const ENFILE: i32 = 23;
    const ENOBUFS: i32 = 105;
    const ENOMEM: i32 = 12;
    matches!(errno, EMFILE | ENFILE | ENOBUFS | ENOMEM)
}
