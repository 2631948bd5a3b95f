use derive_more::Display;
use num_enum::{FromPrimitive, IntoPrimitive};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

pub use datetime::{Accuracy, DateTime};
pub use message::{Field, Message};

pub mod datetime;
pub mod message;

/// Wire-level type ids, stable on the wire.
///
/// Ids 17 through 25 are byte arrays of a fixed length; they decode to the
/// same [`Value::ByteArray`] as the variable-width id 6 but carry no size
/// bytes on the wire.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    IntoPrimitive,
    FromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum WireType {
    #[display("indicator")]
    Indicator = 0,
    #[display("boolean")]
    Boolean = 1,
    #[display("byte")]
    Byte = 2,
    #[display("short")]
    Short = 3,
    #[display("int")]
    Int = 4,
    #[display("long")]
    Long = 5,
    #[display("byte[]")]
    ByteArray = 6,
    #[display("short[]")]
    ShortArray = 7,
    #[display("int[]")]
    IntArray = 8,
    #[display("long[]")]
    LongArray = 9,
    #[display("float")]
    Float = 10,
    #[display("double")]
    Double = 11,
    #[display("float[]")]
    FloatArray = 12,
    #[display("double[]")]
    DoubleArray = 13,
    #[display("string")]
    String = 14,
    #[display("message")]
    Message = 15,
    #[display("byte[4]")]
    ByteArray4 = 17,
    #[display("byte[8]")]
    ByteArray8 = 18,
    #[display("byte[16]")]
    ByteArray16 = 19,
    #[display("byte[20]")]
    ByteArray20 = 20,
    #[display("byte[32]")]
    ByteArray32 = 21,
    #[display("byte[64]")]
    ByteArray64 = 22,
    #[display("byte[128]")]
    ByteArray128 = 23,
    #[display("byte[256]")]
    ByteArray256 = 24,
    #[display("byte[512]")]
    ByteArray512 = 25,
    #[display("datetime")]
    DateTime = 28,
    #[display("type:{_0}")]
    #[num_enum(catch_all)]
    Other(u8),
}

impl WireType {
    /// The fixed-length byte-array id for `len`, if one exists.
    pub fn fixed_byte_array(len: usize) -> Option<Self> {
        Some(match len {
            4 => Self::ByteArray4,
            8 => Self::ByteArray8,
            16 => Self::ByteArray16,
            20 => Self::ByteArray20,
            32 => Self::ByteArray32,
            64 => Self::ByteArray64,
            128 => Self::ByteArray128,
            256 => Self::ByteArray256,
            512 => Self::ByteArray512,
            _ => return None,
        })
    }
}

/// A single field value, conforming to one of the dictionary types.
#[derive(Clone, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum Value {
    /// Present but carries no payload.
    Indicator,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(OrderedFloat<f32>),
    Double(OrderedFloat<f64>),
    ByteArray(Vec<u8>),
    ShortArray(Vec<i16>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    FloatArray(Vec<OrderedFloat<f32>>),
    DoubleArray(Vec<OrderedFloat<f64>>),
    String(String),
    Message(Message),
    DateTime(DateTime),
    /// Payload of a type id the dictionary doesn't know, preserved for
    /// round-tripping.
    Opaque { type_id: u8, bytes: Vec<u8> },
}

impl Value {
    /// The preferred wire type id for this value.
    pub fn wire_type(&self) -> WireType {
        match self {
            Value::Indicator => WireType::Indicator,
            Value::Boolean(_) => WireType::Boolean,
            Value::Byte(_) => WireType::Byte,
            Value::Short(_) => WireType::Short,
            Value::Int(_) => WireType::Int,
            Value::Long(_) => WireType::Long,
            Value::Float(_) => WireType::Float,
            Value::Double(_) => WireType::Double,
            Value::ByteArray(b) => {
                WireType::fixed_byte_array(b.len()).unwrap_or(WireType::ByteArray)
            }
            Value::ShortArray(_) => WireType::ShortArray,
            Value::IntArray(_) => WireType::IntArray,
            Value::LongArray(_) => WireType::LongArray,
            Value::FloatArray(_) => WireType::FloatArray,
            Value::DoubleArray(_) => WireType::DoubleArray,
            Value::String(_) => WireType::String,
            Value::Message(_) => WireType::Message,
            Value::DateTime(_) => WireType::DateTime,
            Value::Opaque { type_id, .. } => WireType::from(*type_id),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integral view, widening from any narrower integer type.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some((*v).into()),
            Value::Short(v) => Some((*v).into()),
            Value::Int(v) => Some((*v).into()),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Integral view narrowed to i32; wider values convert only when exact.
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    pub fn as_i16(&self) -> Option<i16> {
        self.as_i64().and_then(|v| i16::try_from(v).ok())
    }

    pub fn as_i8(&self) -> Option<i8> {
        self.as_i64().and_then(|v| i8::try_from(v).ok())
    }

    /// Floating view; integers and floats widen, doubles narrow by cast.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(v.0.into()),
            Value::Double(v) => Some(v.0),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(v.0),
            _ => self.as_f64().map(|v| v as f32),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::ByteArray(b) => Some(b),
            Value::Opaque { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Value::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime> {
        match self {
            Value::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn is_indicator(&self) -> bool {
        matches!(self, Value::Indicator)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
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
        Value::Float(OrderedFloat(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(OrderedFloat(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::ByteArray(v)
    }
}

impl From<Vec<i16>> for Value {
    fn from(v: Vec<i16>) -> Self {
        Value::ShortArray(v)
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Value::IntArray(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::LongArray(v)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::FloatArray(v.into_iter().map(OrderedFloat).collect())
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::DoubleArray(v.into_iter().map(OrderedFloat).collect())
    }
}

impl From<Message> for Value {
    fn from(v: Message) -> Self {
        Value::Message(v)
    }
}

impl From<DateTime> for Value {
    fn from(v: DateTime) -> Self {
        Value::DateTime(v)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn preferred_wire_types() {
        assert_eq!(Value::from(7_i32).wire_type(), WireType::Int);
        assert_eq!(Value::from("x").wire_type(), WireType::String);
        assert_eq!(Value::from(vec![0_u8; 3]).wire_type(), WireType::ByteArray);
        assert_eq!(
            Value::from(vec![0_u8; 16]).wire_type(),
            WireType::ByteArray16
        );
        assert_eq!(
            Value::from(vec![0_u8; 512]).wire_type(),
            WireType::ByteArray512
        );
        assert_eq!(WireType::from(99_u8), WireType::Other(99));
        assert_eq!(u8::from(WireType::DateTime), 28);
    }

    #[test]
    fn integer_coercion_widens_and_narrows_exactly() {
        assert_eq!(Value::Byte(7).as_i32(), Some(7));
        assert_eq!(Value::Long(300).as_i16(), Some(300));
        assert_eq!(Value::Long(70_000).as_i16(), None);
        assert_eq!(Value::Short(-1).as_i64(), Some(-1));
        assert_eq!(Value::String("7".into()).as_i64(), None);
    }

    #[test]
    fn float_coercion() {
        assert_eq!(Value::from(2.5_f32).as_f64(), Some(2.5));
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::from(1.25_f64).as_f32(), Some(1.25));
    }
}
