//! Server error taxonomy.
//!
//! Five kinds, matching how failures propagate: transport errors are
//! terminal for a peer, decode errors are contained and counted,
//! policy errors become operation responses, capacity errors either
//! refuse a connection or disconnect a slow one, and internal errors
//! reach clients only as a generic InternalServerError.

use meridian_protocol::ProtocolError;

/// Error type for everything above the wire codec.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Socket-level failure; terminal for the peer it belongs to.
    #[error("transport error: {0}")]
    Transport(String),

    /// Raw I/O failure from the listener or a stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed bytes inside one command; contained, not terminal.
    #[error("decode error: {0}")]
    Decode(#[from] ProtocolError),

    /// A well-formed request that the current state forbids.
    #[error("policy violation: {0}")]
    Policy(String),

    /// Server or peer resource limit hit.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Unexpected condition; never exposed to clients verbatim.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServerResult<T> = Result<T, ServerError>;
