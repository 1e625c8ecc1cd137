//! The typed value model.
//!
//! [`Value`] is the discriminated union over every type tag in the wire
//! format. Nested values form trees (tables inside tables, arrays of
//! tables, and so on); the codec never produces cycles.
//!
//! Tables and dictionaries are stored as ordered pair vectors rather than
//! hash maps: wire order is preserved, `f32`/`f64` keys don't need `Hash`,
//! and encode/decode round-trips are exact.

use crate::constants::type_tag;

/// A single wire value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    ByteArray(Vec<u8>),
    IntArray(Vec<i32>),
    StringArray(Vec<String>),
    /// Homogeneous array: one inner tag, elements encoded without tags.
    TypedArray { element_tag: u8, elements: Vec<Value> },
    /// Heterogeneous array: every element carries its own tag.
    ObjectArray(Vec<Value>),
    /// Hash table with arbitrarily typed keys and values.
    Table(Vec<(Value, Value)>),
    /// Dictionary with declared key/value tags. A tag of zero (or the
    /// null tag) means "read the tag inline per element".
    Dictionary {
        key_tag: u8,
        value_tag: u8,
        entries: Vec<(Value, Value)>,
    },
    Custom(CustomData),
}

/// Custom-data payloads (`'c'` tag).
#[derive(Debug, Clone, PartialEq)]
pub enum CustomData {
    Vec2 { x: f32, y: f32 },
    Vec3 { x: f32, y: f32, z: f32 },
    Quaternion { w: f32, x: f32, y: f32, z: f32 },
    Player(u32),
    /// Variants this server does not interpret are carried through as
    /// opaque bytes so they survive re-encoding.
    Unknown { variant: u8, data: Vec<u8> },
}

impl Value {
    /// Builds an integer value using the narrowest tag that round-trips
    /// the number: byte for 0..=255, then short, int, long.
    pub fn integer(v: i64) -> Self {
        if (0..=u8::MAX as i64).contains(&v) {
            Value::Byte(v as u8)
        } else if (i16::MIN as i64..=i16::MAX as i64).contains(&v) {
            Value::Short(v as i16)
        } else if (i32::MIN as i64..=i32::MAX as i64).contains(&v) {
            Value::Int(v as i32)
        } else {
            Value::Long(v)
        }
    }

    /// The wire tag this value encodes under.
    pub fn tag(&self) -> u8 {
        match self {
            Value::Null => type_tag::NULL,
            Value::Bool(_) => type_tag::BOOL,
            Value::Byte(_) => type_tag::BYTE,
            Value::Short(_) => type_tag::SHORT,
            Value::Int(_) => type_tag::INT,
            Value::Long(_) => type_tag::LONG,
            Value::Float(_) => type_tag::FLOAT,
            Value::Double(_) => type_tag::DOUBLE,
            Value::String(_) => type_tag::STRING,
            Value::ByteArray(_) => type_tag::BYTE_ARRAY,
            Value::IntArray(_) => type_tag::INT_ARRAY,
            Value::StringArray(_) => type_tag::STRING_ARRAY,
            Value::TypedArray { .. } => type_tag::TYPED_ARRAY,
            Value::ObjectArray(_) => type_tag::OBJECT_ARRAY,
            Value::Table(_) => type_tag::TABLE,
            Value::Dictionary { .. } => type_tag::DICTIONARY,
            Value::Custom(_) => type_tag::CUSTOM,
        }
    }

    /// Widens any of the four integer shapes to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(*v as i64),
            Value::Short(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            // Some clients send flags as 0/1 bytes.
            Value::Byte(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Table(pairs) => Some(pairs.as_slice()),
            _ => None,
        }
    }

    /// Collects an integer list out of any of the array shapes clients
    /// use for target-actor lists.
    pub fn as_int_list(&self) -> Option<Vec<i64>> {
        match self {
            Value::IntArray(xs) => Some(xs.iter().map(|v| *v as i64).collect()),
            Value::ByteArray(xs) => Some(xs.iter().map(|v| *v as i64).collect()),
            Value::TypedArray { elements, .. } | Value::ObjectArray(elements) => {
                elements.iter().map(Value::as_i64).collect()
            }
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Byte(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Short(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_narrowing_picks_smallest_tag() {
        assert_eq!(Value::integer(0), Value::Byte(0));
        assert_eq!(Value::integer(255), Value::Byte(255));
        assert_eq!(Value::integer(256), Value::Short(256));
        assert_eq!(Value::integer(-1), Value::Short(-1));
        assert_eq!(Value::integer(i16::MAX as i64 + 1), Value::Int(32768));
        assert_eq!(Value::integer(i32::MIN as i64), Value::Int(i32::MIN));
        assert_eq!(
            Value::integer(i32::MAX as i64 + 1),
            Value::Long(i32::MAX as i64 + 1)
        );
    }

    #[test]
    fn as_i64_widens_every_integer_shape() {
        assert_eq!(Value::Byte(7).as_i64(), Some(7));
        assert_eq!(Value::Short(-3).as_i64(), Some(-3));
        assert_eq!(Value::Int(100_000).as_i64(), Some(100_000));
        assert_eq!(Value::Long(1 << 40).as_i64(), Some(1 << 40));
        assert_eq!(Value::String("7".into()).as_i64(), None);
    }

    #[test]
    fn as_bool_accepts_byte_flags() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Byte(1).as_bool(), Some(true));
        assert_eq!(Value::Byte(0).as_bool(), Some(false));
        assert_eq!(Value::Null.as_bool(), None);
    }

    #[test]
    fn as_int_list_accepts_mixed_array_shapes() {
        let typed = Value::TypedArray {
            element_tag: crate::constants::type_tag::INT,
            elements: vec![Value::Int(1), Value::Int(2)],
        };
        assert_eq!(typed.as_int_list(), Some(vec![1, 2]));
        assert_eq!(Value::IntArray(vec![3, 4]).as_int_list(), Some(vec![3, 4]));
        let hetero = Value::ObjectArray(vec![Value::Byte(5), Value::String("x".into())]);
        assert_eq!(hetero.as_int_list(), None);
    }
}
