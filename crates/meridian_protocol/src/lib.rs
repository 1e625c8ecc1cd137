//! # Meridian Wire Protocol
//!
//! Byte-level implementation of the GpBinaryV16 protocol spoken by PUN-style
//! game clients. This crate is pure data plumbing: it owns the typed value
//! model, the outer packet framing, the command record layer, and the
//! operation/response/event envelopes, but performs no I/O and knows nothing
//! about rooms or peers.
//!
//! ## Layers
//!
//! Bytes move through three layers, innermost first:
//!
//! 1. [`value`] / [`codec`] - tagged, big-endian, length-prefixed values.
//!    Every payload on the wire is a [`Value`] tree.
//! 2. [`command`] - command records (VerifyConnect, Disconnect, Ping,
//!    SendReliable, SendUnreliable) with channel, flags, timestamp and
//!    sequence numbers. A packet payload holds one or more records.
//! 3. [`frame`] - the outer packet: signature `0xFB17`, peer id, crc,
//!    length, payload. [`FrameDecoder`] reassembles packets from partial
//!    TCP reads.
//!
//! [`message`] sits on top of the value layer and gives the server typed
//! views of operation requests, operation responses and events, including
//! the byte-code/string-alias parameter lookup that existing clients rely
//! on.
//!
//! All multi-byte integers on the wire are big-endian. Decoding failures
//! are recoverable [`ProtocolError`]s carrying the byte offset at which
//! decoding stopped; the caller discards the remainder of the enclosing
//! command and keeps the connection.

pub mod codec;
pub mod command;
pub mod constants;
pub mod error;
pub mod frame;
pub mod message;
pub mod value;

pub use codec::{decode_value, encode_value, ValueReader, ValueWriter};
pub use command::{Command, CommandDecoder, CommandKind};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{encode_packet, FrameDecoder, Packet, PacketHeader, MAX_PACKET_PAYLOAD, PACKET_SIGNATURE};
pub use message::{EventMessage, Message, OperationRequest, OperationResponse, Parameters};
pub use value::{CustomData, Value};
