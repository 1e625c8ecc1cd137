//! Operation, response and event envelopes.
//!
//! Requests, responses and events all travel as a single tagged
//! hash-table inside a send command. The envelope uses reserved byte
//! keys:
//!
//! | key | meaning |
//! |---|---|
//! | 0 | message kind (1 request, 2 response, 3 event) |
//! | 1 | operation or event code |
//! | 2 | parameter table |
//! | 3 | return code (responses) |
//! | 4 | debug message (responses, optional) |
//!
//! Parameter tables map single-byte codes to values. Some client builds
//! send string keys instead (`"RoomName"`, `"roomName"`); those are
//! normalised to byte codes on decode via the alias table, and unknown
//! string keys are silently dropped.

use std::collections::BTreeMap;

use crate::constants::param;
use crate::error::{ProtocolError, ProtocolResult};
use crate::value::Value;

const KEY_KIND: u8 = 0;
const KEY_CODE: u8 = 1;
const KEY_PARAMS: u8 = 2;
const KEY_RETURN_CODE: u8 = 3;
const KEY_DEBUG_MESSAGE: u8 = 4;

const KIND_REQUEST: u8 = 1;
const KIND_RESPONSE: u8 = 2;
const KIND_EVENT: u8 = 3;

/// An operation/event parameter map keyed by byte code.
///
/// Iteration order is the byte-code order, which keeps encoded output
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    entries: BTreeMap<u8, Value>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, code: u8, value: Value) {
        self.entries.insert(code, value);
    }

    /// Builder-style insert for literal parameter maps.
    pub fn with(mut self, code: u8, value: Value) -> Self {
        self.insert(code, value);
        self
    }

    pub fn get(&self, code: u8) -> Option<&Value> {
        self.entries.get(&code)
    }

    pub fn get_str(&self, code: u8) -> Option<&str> {
        self.get(code).and_then(Value::as_str)
    }

    pub fn get_i64(&self, code: u8) -> Option<i64> {
        self.get(code).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, code: u8) -> Option<bool> {
        self.get(code).and_then(Value::as_bool)
    }

    pub fn contains(&self, code: u8) -> bool {
        self.entries.contains_key(&code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u8, &Value)> {
        self.entries.iter()
    }

    /// Builds a parameter map from a decoded table value.
    ///
    /// Byte keys are taken as-is. String keys go through the alias
    /// lookup; names the server does not know are dropped (fail-open for
    /// optional extras). Non-byte, non-string keys are dropped too.
    pub fn from_value(value: &Value) -> ProtocolResult<Self> {
        let pairs = value.as_table().ok_or_else(|| {
            ProtocolError::MalformedEnvelope(format!(
                "parameter map must be a hash-table, got tag 0x{:02x}",
                value.tag()
            ))
        })?;

        let mut params = Parameters::new();
        for (key, val) in pairs {
            match key {
                Value::Byte(code) => params.insert(*code, val.clone()),
                Value::String(name) => {
                    if let Some(code) = param::code_for_name(name) {
                        // Byte-coded entries win over alias duplicates.
                        params.entries.entry(code).or_insert_with(|| val.clone());
                    }
                }
                _ => {}
            }
        }
        Ok(params)
    }

    /// Encodes the map as a hash-table with byte keys.
    pub fn to_value(&self) -> Value {
        Value::Table(
            self.entries
                .iter()
                .map(|(code, value)| (Value::Byte(*code), value.clone()))
                .collect(),
        )
    }
}

/// A client-initiated operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub code: u8,
    pub params: Parameters,
}

/// The server's answer to one operation. Every received operation is
/// answered by exactly one of these unless the peer disconnects.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResponse {
    pub code: u8,
    pub return_code: i16,
    pub debug_message: Option<String>,
    pub params: Parameters,
}

impl OperationResponse {
    pub fn ok(code: u8, params: Parameters) -> Self {
        Self {
            code,
            return_code: crate::constants::return_code::OK,
            debug_message: None,
            params,
        }
    }

    pub fn error(code: u8, return_code: i16, debug_message: impl Into<String>) -> Self {
        Self {
            code,
            return_code,
            debug_message: Some(debug_message.into()),
            params: Parameters::new(),
        }
    }
}

/// A server-to-client notification.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub code: u8,
    pub params: Parameters,
}

impl EventMessage {
    pub fn new(code: u8, params: Parameters) -> Self {
        Self { code, params }
    }
}

/// Any of the three envelope kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(OperationRequest),
    Response(OperationResponse),
    Event(EventMessage),
}

impl Message {
    /// Encodes the envelope as the single tagged value a send command
    /// carries.
    pub fn to_value(&self) -> Value {
        let mut pairs: Vec<(Value, Value)> = Vec::with_capacity(5);
        match self {
            Message::Request(req) => {
                pairs.push((Value::Byte(KEY_KIND), Value::Byte(KIND_REQUEST)));
                pairs.push((Value::Byte(KEY_CODE), Value::Byte(req.code)));
                pairs.push((Value::Byte(KEY_PARAMS), req.params.to_value()));
            }
            Message::Response(resp) => {
                pairs.push((Value::Byte(KEY_KIND), Value::Byte(KIND_RESPONSE)));
                pairs.push((Value::Byte(KEY_CODE), Value::Byte(resp.code)));
                pairs.push((Value::Byte(KEY_PARAMS), resp.params.to_value()));
                pairs.push((Value::Byte(KEY_RETURN_CODE), Value::Short(resp.return_code)));
                if let Some(message) = &resp.debug_message {
                    pairs.push((Value::Byte(KEY_DEBUG_MESSAGE), Value::String(message.clone())));
                }
            }
            Message::Event(event) => {
                pairs.push((Value::Byte(KEY_KIND), Value::Byte(KIND_EVENT)));
                pairs.push((Value::Byte(KEY_CODE), Value::Byte(event.code)));
                pairs.push((Value::Byte(KEY_PARAMS), event.params.to_value()));
            }
        }
        Value::Table(pairs)
    }

    /// Decodes an envelope from a send command's payload value.
    pub fn from_value(value: &Value) -> ProtocolResult<Message> {
        let pairs = value.as_table().ok_or_else(|| {
            ProtocolError::MalformedEnvelope(format!(
                "envelope must be a hash-table, got tag 0x{:02x}",
                value.tag()
            ))
        })?;

        let mut kind = None;
        let mut code = None;
        let mut params_value = None;
        let mut return_code = None;
        let mut debug_message = None;

        for (key, val) in pairs {
            let Value::Byte(key) = key else { continue };
            match *key {
                KEY_KIND => kind = val.as_i64(),
                KEY_CODE => code = val.as_i64(),
                KEY_PARAMS => params_value = Some(val),
                KEY_RETURN_CODE => return_code = val.as_i64(),
                KEY_DEBUG_MESSAGE => debug_message = val.as_str().map(str::to_owned),
                _ => {}
            }
        }

        let kind = kind
            .ok_or_else(|| ProtocolError::MalformedEnvelope("missing message kind".into()))?;
        let code = code
            .ok_or_else(|| ProtocolError::MalformedEnvelope("missing message code".into()))?;
        let code = u8::try_from(code)
            .map_err(|_| ProtocolError::MalformedEnvelope(format!("code {code} out of range")))?;
        let params = match params_value {
            Some(v) => Parameters::from_value(v)?,
            None => Parameters::new(),
        };

        match kind as u8 {
            KIND_REQUEST => Ok(Message::Request(OperationRequest { code, params })),
            KIND_RESPONSE => {
                let return_code = return_code.ok_or_else(|| {
                    ProtocolError::MalformedEnvelope("response without return code".into())
                })?;
                let return_code = i16::try_from(return_code).map_err(|_| {
                    ProtocolError::MalformedEnvelope(format!("return code {return_code} out of range"))
                })?;
                Ok(Message::Response(OperationResponse {
                    code,
                    return_code,
                    debug_message,
                    params,
                }))
            }
            KIND_EVENT => Ok(Message::Event(EventMessage { code, params })),
            other => Err(ProtocolError::MalformedEnvelope(format!(
                "unknown message kind {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{operation, return_code};

    #[test]
    fn request_round_trip() {
        let params = Parameters::new()
            .with(param::ROOM_NAME, Value::from("lobby"))
            .with(param::MAX_PLAYERS, Value::integer(8));
        let msg = Message::Request(OperationRequest {
            code: operation::JOIN,
            params,
        });
        let back = Message::from_value(&msg.to_value()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn response_round_trip_with_debug_message() {
        let msg = Message::Response(OperationResponse::error(
            operation::JOIN,
            return_code::ROOM_NOT_FOUND,
            "no such room",
        ));
        let back = Message::from_value(&msg.to_value()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn event_round_trip() {
        let params = Parameters::new().with(param::ACTOR_NR, Value::integer(3));
        let msg = Message::Event(EventMessage::new(42, params));
        let back = Message::from_value(&msg.to_value()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn string_keys_are_normalised_to_codes() {
        let table = Value::Table(vec![
            (Value::String("RoomName".into()), Value::from("r1")),
            (Value::String("maxPlayers".into()), Value::Byte(4)),
            (Value::String("whoKnows".into()), Value::Byte(1)),
        ]);
        let params = Parameters::from_value(&table).unwrap();
        assert_eq!(params.get_str(param::ROOM_NAME), Some("r1"));
        assert_eq!(params.get_i64(param::MAX_PLAYERS), Some(4));
        // Unknown string key dropped, nothing else leaked in.
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn byte_key_wins_over_string_alias() {
        let table = Value::Table(vec![
            (Value::Byte(param::ROOM_NAME), Value::from("by-code")),
            (Value::String("roomName".into()), Value::from("by-alias")),
        ]);
        let params = Parameters::from_value(&table).unwrap();
        assert_eq!(params.get_str(param::ROOM_NAME), Some("by-code"));
    }

    #[test]
    fn envelope_without_kind_is_rejected() {
        let table = Value::Table(vec![(Value::Byte(KEY_CODE), Value::Byte(1))]);
        assert!(Message::from_value(&table).is_err());
    }

    #[test]
    fn response_without_return_code_is_rejected() {
        let table = Value::Table(vec![
            (Value::Byte(KEY_KIND), Value::Byte(KIND_RESPONSE)),
            (Value::Byte(KEY_CODE), Value::Byte(1)),
        ]);
        assert!(Message::from_value(&table).is_err());
    }
}
