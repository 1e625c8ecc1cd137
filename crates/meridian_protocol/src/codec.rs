//! Tag-dispatched read/write of [`Value`] trees.
//!
//! Everything on the wire is big-endian and length-prefixed. The reader
//! works over a borrowed slice with an explicit cursor so decode errors
//! can report the exact offset; the writer appends to an owned buffer.
//!
//! Length prefixes are validated against the remaining input before any
//! allocation, so a hostile length cannot make the decoder reserve
//! gigabytes for a ten-byte packet.

use crate::constants::{custom_variant, type_tag};
use crate::error::{ProtocolError, ProtocolResult};
use crate::value::{CustomData, Value};

/// Dictionary key/value tags of zero or the null tag mean "tagged inline
/// per element".
fn is_inline_tag(tag: u8) -> bool {
    tag == 0 || tag == type_tag::NULL
}

// ============================================================================
// Reader
// ============================================================================

/// Cursor-based decoder over a borrowed byte slice.
pub struct ValueReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ValueReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte offset into the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn need(&self, n: usize) -> ProtocolResult<()> {
        let remaining = self.remaining();
        if remaining < n {
            return Err(ProtocolError::Truncated {
                offset: self.pos,
                needed: n - remaining,
            });
        }
        Ok(())
    }

    /// Checks a declared element/byte count against the remaining input.
    ///
    /// `min_element_size` is the smallest possible encoding of one
    /// element, so the check rejects lengths that cannot possibly fit.
    fn check_length(&self, length: usize, min_element_size: usize) -> ProtocolResult<()> {
        let needed = length.saturating_mul(min_element_size);
        if needed > self.remaining() {
            return Err(ProtocolError::LengthOverflow {
                length,
                remaining: self.remaining(),
                offset: self.pos,
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> ProtocolResult<u8> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> ProtocolResult<u16> {
        self.need(2)?;
        let v = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> ProtocolResult<u32> {
        self.need(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_be_bytes(raw))
    }

    pub fn read_i16(&mut self) -> ProtocolResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> ProtocolResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> ProtocolResult<i64> {
        self.need(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(i64::from_be_bytes(raw))
    }

    pub fn read_f32(&mut self) -> ProtocolResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> ProtocolResult<f64> {
        self.need(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(f64::from_be_bytes(raw))
    }

    pub fn read_bytes(&mut self, n: usize) -> ProtocolResult<&'a [u8]> {
        self.need(n)?;
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_string(&mut self) -> ProtocolResult<String> {
        let len = self.read_u16()? as usize;
        self.check_length(len, 1)?;
        let offset = self.pos;
        let raw = self.read_bytes(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8 { offset })
    }

    /// Reads one tagged value.
    pub fn read_value(&mut self) -> ProtocolResult<Value> {
        let tag = self.read_u8()?;
        self.read_value_with_tag(tag)
    }

    /// Reads the payload of a value whose tag is already known (typed
    /// array elements, dictionary entries with declared tags).
    pub fn read_value_with_tag(&mut self, tag: u8) -> ProtocolResult<Value> {
        match tag {
            type_tag::NULL => Ok(Value::Null),
            type_tag::BOOL => Ok(Value::Bool(self.read_u8()? != 0)),
            type_tag::BYTE => Ok(Value::Byte(self.read_u8()?)),
            type_tag::SHORT => Ok(Value::Short(self.read_i16()?)),
            type_tag::INT => Ok(Value::Int(self.read_i32()?)),
            type_tag::LONG => Ok(Value::Long(self.read_i64()?)),
            type_tag::FLOAT => Ok(Value::Float(self.read_f32()?)),
            type_tag::DOUBLE => Ok(Value::Double(self.read_f64()?)),
            type_tag::STRING => Ok(Value::String(self.read_string()?)),
            type_tag::BYTE_ARRAY => {
                let len = self.read_u32()? as usize;
                self.check_length(len, 1)?;
                Ok(Value::ByteArray(self.read_bytes(len)?.to_vec()))
            }
            type_tag::INT_ARRAY => {
                let len = self.read_u32()? as usize;
                self.check_length(len, 4)?;
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(self.read_i32()?);
                }
                Ok(Value::IntArray(out))
            }
            type_tag::STRING_ARRAY => {
                let len = self.read_u16()? as usize;
                self.check_length(len, 2)?;
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(self.read_string()?);
                }
                Ok(Value::StringArray(out))
            }
            type_tag::TYPED_ARRAY => {
                let len = self.read_u16()? as usize;
                let element_tag = self.read_u8()?;
                self.check_length(len, 1)?;
                let mut elements = Vec::with_capacity(len);
                for _ in 0..len {
                    elements.push(self.read_value_with_tag(element_tag)?);
                }
                Ok(Value::TypedArray { element_tag, elements })
            }
            type_tag::OBJECT_ARRAY => {
                let len = self.read_u16()? as usize;
                self.check_length(len, 1)?;
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(self.read_value()?);
                }
                Ok(Value::ObjectArray(out))
            }
            type_tag::TABLE => {
                let count = self.read_u16()? as usize;
                self.check_length(count, 2)?;
                let mut pairs = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = self.read_value()?;
                    let value = self.read_value()?;
                    pairs.push((key, value));
                }
                Ok(Value::Table(pairs))
            }
            type_tag::DICTIONARY => {
                let key_tag = self.read_u8()?;
                let value_tag = self.read_u8()?;
                let count = self.read_u16()? as usize;
                self.check_length(count, 1)?;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = if is_inline_tag(key_tag) {
                        self.read_value()?
                    } else {
                        self.read_value_with_tag(key_tag)?
                    };
                    let value = if is_inline_tag(value_tag) {
                        self.read_value()?
                    } else {
                        self.read_value_with_tag(value_tag)?
                    };
                    entries.push((key, value));
                }
                Ok(Value::Dictionary { key_tag, value_tag, entries })
            }
            type_tag::CUSTOM => self.read_custom().map(Value::Custom),
            other => Err(ProtocolError::UnknownTag {
                tag: other,
                offset: self.pos - 1,
            }),
        }
    }

    fn read_custom(&mut self) -> ProtocolResult<CustomData> {
        let variant = self.read_u8()?;
        let len = self.read_u16()? as usize;
        self.check_length(len, 1)?;
        let expected = match variant {
            custom_variant::VEC2 => Some(8),
            custom_variant::VEC3 => Some(12),
            custom_variant::QUATERNION => Some(16),
            custom_variant::PLAYER => Some(4),
            _ => None,
        };
        if let Some(expected) = expected {
            if len != expected {
                return Err(ProtocolError::CustomLengthMismatch {
                    variant: variant as char,
                    length: len,
                });
            }
        }
        Ok(match variant {
            custom_variant::VEC2 => CustomData::Vec2 {
                x: self.read_f32()?,
                y: self.read_f32()?,
            },
            custom_variant::VEC3 => CustomData::Vec3 {
                x: self.read_f32()?,
                y: self.read_f32()?,
                z: self.read_f32()?,
            },
            custom_variant::QUATERNION => CustomData::Quaternion {
                w: self.read_f32()?,
                x: self.read_f32()?,
                y: self.read_f32()?,
                z: self.read_f32()?,
            },
            custom_variant::PLAYER => CustomData::Player(self.read_u32()?),
            other => CustomData::Unknown {
                variant: other,
                data: self.read_bytes(len)?.to_vec(),
            },
        })
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Append-only encoder producing big-endian wire bytes.
#[derive(Default)]
pub struct ValueWriter {
    buf: Vec<u8>,
}

impl ValueWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    fn u16_len(&self, len: usize) -> ProtocolResult<u16> {
        u16::try_from(len).map_err(|_| ProtocolError::EncodeOverflow {
            length: len,
            max: u16::MAX as usize,
        })
    }

    fn u32_len(&self, len: usize) -> ProtocolResult<u32> {
        u32::try_from(len).map_err(|_| ProtocolError::EncodeOverflow {
            length: len,
            max: u32::MAX as usize,
        })
    }

    fn write_string(&mut self, s: &str) -> ProtocolResult<()> {
        let len = self.u16_len(s.len())?;
        self.write_u16(len);
        self.write_bytes(s.as_bytes());
        Ok(())
    }

    /// Writes one tagged value.
    pub fn write_value(&mut self, v: &Value) -> ProtocolResult<()> {
        self.write_u8(v.tag());
        self.write_value_payload(v)
    }

    /// Writes a value without its leading tag (typed array elements,
    /// dictionary entries with declared tags).
    pub fn write_value_payload(&mut self, v: &Value) -> ProtocolResult<()> {
        match v {
            Value::Null => {}
            Value::Bool(b) => self.write_u8(*b as u8),
            Value::Byte(b) => self.write_u8(*b),
            Value::Short(s) => self.write_i16(*s),
            Value::Int(i) => self.write_i32(*i),
            Value::Long(l) => self.write_i64(*l),
            Value::Float(f) => self.write_f32(*f),
            Value::Double(d) => self.write_f64(*d),
            Value::String(s) => self.write_string(s)?,
            Value::ByteArray(bytes) => {
                let len = self.u32_len(bytes.len())?;
                self.write_u32(len);
                self.write_bytes(bytes);
            }
            Value::IntArray(ints) => {
                let len = self.u32_len(ints.len())?;
                self.write_u32(len);
                for i in ints {
                    self.write_i32(*i);
                }
            }
            Value::StringArray(strings) => {
                let len = self.u16_len(strings.len())?;
                self.write_u16(len);
                for s in strings {
                    self.write_string(s)?;
                }
            }
            Value::TypedArray { element_tag, elements } => {
                let len = self.u16_len(elements.len())?;
                self.write_u16(len);
                self.write_u8(*element_tag);
                for element in elements {
                    if element.tag() != *element_tag {
                        return Err(ProtocolError::TagMismatch {
                            expected: *element_tag,
                            found: element.tag(),
                        });
                    }
                    self.write_value_payload(element)?;
                }
            }
            Value::ObjectArray(elements) => {
                let len = self.u16_len(elements.len())?;
                self.write_u16(len);
                for element in elements {
                    self.write_value(element)?;
                }
            }
            Value::Table(pairs) => {
                let len = self.u16_len(pairs.len())?;
                self.write_u16(len);
                for (key, value) in pairs {
                    self.write_value(key)?;
                    self.write_value(value)?;
                }
            }
            Value::Dictionary { key_tag, value_tag, entries } => {
                self.write_u8(*key_tag);
                self.write_u8(*value_tag);
                let len = self.u16_len(entries.len())?;
                self.write_u16(len);
                for (key, value) in entries {
                    self.write_dictionary_element(*key_tag, key)?;
                    self.write_dictionary_element(*value_tag, value)?;
                }
            }
            Value::Custom(custom) => self.write_custom(custom)?,
        }
        Ok(())
    }

    fn write_dictionary_element(&mut self, declared_tag: u8, v: &Value) -> ProtocolResult<()> {
        if is_inline_tag(declared_tag) {
            self.write_value(v)
        } else {
            if v.tag() != declared_tag {
                return Err(ProtocolError::TagMismatch {
                    expected: declared_tag,
                    found: v.tag(),
                });
            }
            self.write_value_payload(v)
        }
    }

    fn write_custom(&mut self, custom: &CustomData) -> ProtocolResult<()> {
        match custom {
            CustomData::Vec2 { x, y } => {
                self.write_u8(custom_variant::VEC2);
                self.write_u16(8);
                self.write_f32(*x);
                self.write_f32(*y);
            }
            CustomData::Vec3 { x, y, z } => {
                self.write_u8(custom_variant::VEC3);
                self.write_u16(12);
                self.write_f32(*x);
                self.write_f32(*y);
                self.write_f32(*z);
            }
            CustomData::Quaternion { w, x, y, z } => {
                self.write_u8(custom_variant::QUATERNION);
                self.write_u16(16);
                self.write_f32(*w);
                self.write_f32(*x);
                self.write_f32(*y);
                self.write_f32(*z);
            }
            CustomData::Player(id) => {
                self.write_u8(custom_variant::PLAYER);
                self.write_u16(4);
                self.write_u32(*id);
            }
            CustomData::Unknown { variant, data } => {
                self.write_u8(*variant);
                let len = self.u16_len(data.len())?;
                self.write_u16(len);
                self.write_bytes(data);
            }
        }
        Ok(())
    }
}

/// Encodes a single tagged value into a fresh buffer.
pub fn encode_value(v: &Value) -> ProtocolResult<Vec<u8>> {
    let mut writer = ValueWriter::new();
    writer.write_value(v)?;
    Ok(writer.into_bytes())
}

/// Decodes exactly one tagged value from the buffer.
pub fn decode_value(buf: &[u8]) -> ProtocolResult<Value> {
    ValueReader::new(buf).read_value()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) {
        let bytes = encode_value(&v).expect("encode");
        let back = decode_value(&bytes).expect("decode");
        assert_eq!(v, back);
    }

    #[test]
    fn round_trip_scalars() {
        round_trip(Value::Null);
        round_trip(Value::Bool(true));
        round_trip(Value::Bool(false));
        round_trip(Value::Byte(0x7f));
        round_trip(Value::Short(-1234));
        round_trip(Value::Int(1_000_000));
        round_trip(Value::Long(-(1 << 40)));
        round_trip(Value::Float(1.5));
        round_trip(Value::Double(std::f64::consts::PI));
        round_trip(Value::String("hello, wörld".into()));
    }

    #[test]
    fn round_trip_arrays() {
        round_trip(Value::ByteArray(vec![0, 1, 2, 255]));
        round_trip(Value::IntArray(vec![-1, 0, i32::MAX]));
        round_trip(Value::StringArray(vec!["a".into(), "".into(), "c".into()]));
        round_trip(Value::TypedArray {
            element_tag: type_tag::INT,
            elements: vec![Value::Int(1), Value::Int(2), Value::Int(3)],
        });
        round_trip(Value::ObjectArray(vec![
            Value::Byte(1),
            Value::String("two".into()),
            Value::Null,
        ]));
    }

    #[test]
    fn round_trip_nested_containers() {
        let inner = Value::Table(vec![
            (Value::Byte(1), Value::String("one".into())),
            (Value::String("list".into()), Value::IntArray(vec![9, 8])),
        ]);
        round_trip(Value::Table(vec![
            (Value::String("nested".into()), inner),
            (Value::Byte(2), Value::ObjectArray(vec![Value::Bool(false)])),
        ]));
        round_trip(Value::Dictionary {
            key_tag: type_tag::STRING,
            value_tag: type_tag::INT,
            entries: vec![
                (Value::String("a".into()), Value::Int(1)),
                (Value::String("b".into()), Value::Int(2)),
            ],
        });
        // Tag zero means per-element inline tags.
        round_trip(Value::Dictionary {
            key_tag: 0,
            value_tag: 0,
            entries: vec![(Value::Byte(1), Value::String("x".into()))],
        });
    }

    #[test]
    fn round_trip_custom_data() {
        round_trip(Value::Custom(CustomData::Vec2 { x: 1.0, y: -2.0 }));
        round_trip(Value::Custom(CustomData::Vec3 { x: 0.0, y: 1.0, z: 2.0 }));
        round_trip(Value::Custom(CustomData::Quaternion {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }));
        round_trip(Value::Custom(CustomData::Player(42)));
        round_trip(Value::Custom(CustomData::Unknown {
            variant: b'Z',
            data: vec![1, 2, 3],
        }));
    }

    #[test]
    fn narrowed_integers_round_trip() {
        for v in [0i64, 1, 255, 256, -1, -32768, 32768, i32::MAX as i64 + 1] {
            let narrowed = Value::integer(v);
            let bytes = encode_value(&narrowed).unwrap();
            let back = decode_value(&bytes).unwrap();
            assert_eq!(back.as_i64(), Some(v), "value {v} did not survive");
        }
    }

    #[test]
    fn truncated_input_reports_offset() {
        let bytes = encode_value(&Value::Int(77)).unwrap();
        let err = decode_value(&bytes[..3]).unwrap_err();
        match err {
            ProtocolError::Truncated { offset, .. } => assert!(offset <= 3),
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = decode_value(&[0xee]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownTag { tag: 0xee, .. }));
    }

    #[test]
    fn hostile_length_is_rejected_before_allocation() {
        // byte-array claiming u32::MAX bytes with a 2-byte body
        let bytes = [type_tag::BYTE_ARRAY, 0xff, 0xff, 0xff, 0xff, 1, 2];
        let err = decode_value(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::LengthOverflow { .. }));
    }

    #[test]
    fn string_with_bad_utf8_is_rejected() {
        let bytes = [type_tag::STRING, 0x00, 0x02, 0xff, 0xfe];
        let err = decode_value(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUtf8 { .. }));
    }

    #[test]
    fn typed_array_rejects_mismatched_element() {
        let bad = Value::TypedArray {
            element_tag: type_tag::INT,
            elements: vec![Value::Int(1), Value::String("no".into())],
        };
        let err = encode_value(&bad).unwrap_err();
        assert!(matches!(err, ProtocolError::TagMismatch { .. }));
    }

    #[test]
    fn known_custom_variant_with_wrong_length_is_rejected() {
        // 'P' player id declared with 3 payload bytes instead of 4
        let bytes = [type_tag::CUSTOM, b'P', 0x00, 0x03, 1, 2, 3];
        let err = decode_value(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::CustomLengthMismatch { .. }));
    }
}
