//! Command records.
//!
//! Inside a packet payload sits a sequence of command records. Each has a
//! four-byte header (kind, channel, flags, reserved) and a u32 timestamp;
//! send commands additionally carry a u32 sequence number and a tagged
//! value payload.

use crate::codec::{ValueReader, ValueWriter};
use crate::constants::command_kind;
use crate::error::{ProtocolError, ProtocolResult};
use crate::value::Value;

/// The five command kinds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    VerifyConnect,
    Disconnect,
    Ping,
    SendReliable,
    SendUnreliable,
}

impl CommandKind {
    pub fn code(self) -> u8 {
        match self {
            CommandKind::VerifyConnect => command_kind::VERIFY_CONNECT,
            CommandKind::Disconnect => command_kind::DISCONNECT,
            CommandKind::Ping => command_kind::PING,
            CommandKind::SendReliable => command_kind::SEND_RELIABLE,
            CommandKind::SendUnreliable => command_kind::SEND_UNRELIABLE,
        }
    }

    pub fn from_code(code: u8) -> ProtocolResult<Self> {
        Ok(match code {
            command_kind::VERIFY_CONNECT => CommandKind::VerifyConnect,
            command_kind::DISCONNECT => CommandKind::Disconnect,
            command_kind::PING => CommandKind::Ping,
            command_kind::SEND_RELIABLE => CommandKind::SendReliable,
            command_kind::SEND_UNRELIABLE => CommandKind::SendUnreliable,
            other => return Err(ProtocolError::UnknownCommandKind { kind: other }),
        })
    }

    /// Send commands carry a sequence number; control commands don't.
    pub fn has_sequence(self) -> bool {
        matches!(self, CommandKind::SendReliable | CommandKind::SendUnreliable)
    }

    /// Send commands carry a tagged value payload; control commands don't.
    pub fn has_payload(self) -> bool {
        matches!(self, CommandKind::SendReliable | CommandKind::SendUnreliable)
    }
}

/// One decoded command record.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    pub channel: u8,
    pub flags: u8,
    pub timestamp: u32,
    /// Present exactly when `kind.has_sequence()`.
    pub sequence: Option<u32>,
    /// Present exactly when `kind.has_payload()`.
    pub payload: Option<Value>,
}

impl Command {
    /// A control command (VerifyConnect, Disconnect, Ping) on channel 0.
    pub fn control(kind: CommandKind, timestamp: u32) -> Self {
        Self {
            kind,
            channel: 0,
            flags: 0,
            timestamp,
            sequence: None,
            payload: None,
        }
    }

    /// A data-bearing send command.
    pub fn send(kind: CommandKind, sequence: u32, timestamp: u32, payload: Value) -> Self {
        Self {
            kind,
            channel: 0,
            flags: 0,
            timestamp,
            sequence: Some(sequence),
            payload: Some(payload),
        }
    }

    /// Appends this record to `writer`.
    pub fn encode(&self, writer: &mut ValueWriter) -> ProtocolResult<()> {
        writer.write_u8(self.kind.code());
        writer.write_u8(self.channel);
        writer.write_u8(self.flags);
        writer.write_u8(0); // reserved
        writer.write_u32(self.timestamp);
        if self.kind.has_sequence() {
            writer.write_u32(self.sequence.unwrap_or(0));
        }
        if self.kind.has_payload() {
            match &self.payload {
                Some(value) => writer.write_value(value)?,
                None => {
                    return Err(ProtocolError::MalformedEnvelope(
                        "send command without payload".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Encodes this record alone into a fresh buffer.
    pub fn to_bytes(&self) -> ProtocolResult<Vec<u8>> {
        let mut writer = ValueWriter::new();
        self.encode(&mut writer)?;
        Ok(writer.into_bytes())
    }
}

/// Iterates the command records inside one packet payload.
///
/// A decode error abandons the remainder of the payload by contract:
/// after `next()` returns `Err`, further calls return `Ok(None)`.
pub struct CommandDecoder<'a> {
    reader: ValueReader<'a>,
    poisoned: bool,
}

impl<'a> CommandDecoder<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            reader: ValueReader::new(payload),
            poisoned: false,
        }
    }

    /// Decodes the next record, `Ok(None)` at a clean end of payload.
    pub fn next(&mut self) -> ProtocolResult<Option<Command>> {
        if self.poisoned || self.reader.remaining() == 0 {
            return Ok(None);
        }
        match self.decode_one() {
            Ok(command) => Ok(Some(command)),
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    fn decode_one(&mut self) -> ProtocolResult<Command> {
        let kind = CommandKind::from_code(self.reader.read_u8()?)?;
        let channel = self.reader.read_u8()?;
        let flags = self.reader.read_u8()?;
        let _reserved = self.reader.read_u8()?;
        let timestamp = self.reader.read_u32()?;

        let sequence = if kind.has_sequence() {
            Some(self.reader.read_u32()?)
        } else {
            None
        };
        let payload = if kind.has_payload() {
            Some(self.reader.read_value()?)
        } else {
            None
        };

        Ok(Command {
            kind,
            channel,
            flags,
            timestamp,
            sequence,
            payload,
        })
    }
}
