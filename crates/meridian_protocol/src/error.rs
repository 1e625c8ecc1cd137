//! Protocol error types.
//!
//! Every decode failure is positional: the error records the byte offset
//! (relative to the buffer being decoded) at which the codec gave up, so
//! the session layer can log it and skip the rest of the enclosing packet.

/// Errors produced by the codec, framing and envelope layers.
///
/// Decode errors are recoverable: a malformed value inside one command
/// must not take down the connection. The session layer counts them and
/// escalates to a disconnect only past its own threshold.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Input ended in the middle of a value.
    #[error("truncated input at offset {offset}: needed {needed} more byte(s)")]
    Truncated { offset: usize, needed: usize },

    /// Leading type tag is not part of the GpBinaryV16 tag set.
    #[error("unknown type tag 0x{tag:02x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    /// A declared length runs past the end of the buffer.
    #[error("declared length {length} exceeds {remaining} remaining byte(s) at offset {offset}")]
    LengthOverflow {
        length: usize,
        remaining: usize,
        offset: usize,
    },

    /// String payload is not valid UTF-8.
    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// A typed array or dictionary element carries a different tag than
    /// the container declared.
    #[error("element tag mismatch: container declared 0x{expected:02x}, element is 0x{found:02x}")]
    TagMismatch { expected: u8, found: u8 },

    /// A known custom-data variant arrived with the wrong payload length.
    #[error("custom data variant '{variant}' has invalid payload length {length}")]
    CustomLengthMismatch { variant: char, length: usize },

    /// A value too large for its length prefix was handed to the encoder.
    #[error("value of {length} exceeds the {max} limit of its length prefix")]
    EncodeOverflow { length: usize, max: usize },

    /// Outer packet signature did not match `0xFB17`.
    #[error("bad packet signature 0x{found:04x}")]
    BadSignature { found: u16 },

    /// Outer packet declared an absurd payload length.
    #[error("packet payload of {length} byte(s) exceeds the {max} byte limit")]
    OversizedPacket { length: usize, max: usize },

    /// Command record kind byte is not one of the known kinds.
    #[error("unknown command kind {kind}")]
    UnknownCommandKind { kind: u8 },

    /// An operation/response/event envelope is structurally wrong.
    #[error("malformed message envelope: {0}")]
    MalformedEnvelope(String),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
