use crate::{
    error::Error,
    types::{DateTime, Field, Message, Value, WireType},
};
use byteordered::byteorder::{ReadBytesExt, WriteBytesExt};
use byteordered::{ByteOrdered, Endianness};
use fxhash::FxHashMap;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Envelope metadata framing one top-level message. The wire form adds a
/// big-endian `u32` size covering the whole envelope, header included.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    pub processing_directives: u8,
    pub schema_version: u8,
    pub taxonomy_id: i16,
}

impl EnvelopeHeader {
    pub const WIRE_SIZE: usize = 8;

    pub fn with_taxonomy(taxonomy_id: i16) -> Self {
        Self {
            taxonomy_id,
            ..Self::default()
        }
    }
}

const FIXED_WIDTH: u8 = 0x80;
const VAR_WIDTH_MASK: u8 = 0x60;
const VAR_WIDTH_SHIFT: u8 = 5;
const ORDINAL_PRESENT: u8 = 0x10;
const NAME_PRESENT: u8 = 0x08;

/// The packed byte that begins every field.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct FieldPrefix {
    pub fixed_width: bool,
    pub ordinal_present: bool,
    pub name_present: bool,
    /// Size-field byte count for variable-width payloads: 0, 1, 2, or 4.
    pub var_size_width: u8,
}

impl FieldPrefix {
    /// Narrowest size-field width that holds a payload of `len` bytes.
    pub fn var_width_for(len: usize) -> u8 {
        if len == 0 {
            0
        } else if len <= 0xFF {
            1
        } else if len <= 0xFFFF {
            2
        } else {
            4
        }
    }

    pub fn pack(&self) -> u8 {
        let mut b = 0;
        if self.fixed_width {
            b |= FIXED_WIDTH;
        } else {
            let code = match self.var_size_width {
                0 => 0,
                1 => 1,
                2 => 2,
                _ => 3,
            };
            b |= code << VAR_WIDTH_SHIFT;
        }
        if self.ordinal_present {
            b |= ORDINAL_PRESENT;
        }
        if self.name_present {
            b |= NAME_PRESENT;
        }
        b
    }

    pub fn unpack(b: u8) -> Self {
        let fixed_width = b & FIXED_WIDTH != 0;
        let var_size_width = if fixed_width {
            0
        } else {
            match (b & VAR_WIDTH_MASK) >> VAR_WIDTH_SHIFT {
                0 => 0,
                1 => 1,
                2 => 2,
                _ => 4,
            }
        };
        Self {
            fixed_width,
            ordinal_present: b & ORDINAL_PRESENT != 0,
            name_present: b & NAME_PRESENT != 0,
            var_size_width,
        }
    }
}

/// Registry of wire-level value codecs keyed by type id.
///
/// The built-in dictionary is closed over [`WireType`]; the only mutable
/// surface is the recovery-size table that lets callers decode unknown
/// *fixed-width* type ids they know the payload size of. Customized
/// dictionaries are built before use and shared read-only afterwards.
#[derive(Clone, Debug, Default)]
pub struct TypeDictionary {
    recovery_sizes: FxHashMap<u8, usize>,
}

impl TypeDictionary {
    pub fn standard() -> Self {
        Self::default()
    }

    /// Declare the payload size of an unknown fixed-width type id so the
    /// reader can preserve it opaquely instead of failing.
    pub fn register_recovery_size(&mut self, type_id: u8, size: usize) {
        self.recovery_sizes.insert(type_id, size);
    }

    /// Fixed payload size in bytes, or `None` for variable-width and
    /// unknown types.
    pub fn fixed_size(&self, t: WireType) -> Option<usize> {
        Some(match t {
            WireType::Indicator => 0,
            WireType::Boolean | WireType::Byte => 1,
            WireType::Short => 2,
            WireType::Int | WireType::Float => 4,
            WireType::Long | WireType::Double => 8,
            WireType::ByteArray4 => 4,
            WireType::ByteArray8 => 8,
            WireType::ByteArray16 => 16,
            WireType::ByteArray20 => 20,
            WireType::ByteArray32 => 32,
            WireType::ByteArray64 => 64,
            WireType::ByteArray128 => 128,
            WireType::ByteArray256 => 256,
            WireType::ByteArray512 => 512,
            WireType::DateTime => 14,
            WireType::Other(id) => return self.recovery_sizes.get(&id).copied(),
            WireType::ByteArray
            | WireType::ShortArray
            | WireType::IntArray
            | WireType::LongArray
            | WireType::FloatArray
            | WireType::DoubleArray
            | WireType::String
            | WireType::Message => return None,
        })
    }

    pub fn is_known(&self, t: WireType) -> bool {
        !matches!(t, WireType::Other(_))
    }

    /// Decode a field payload of `size` bytes. Sub-messages are framed by
    /// the stream reader and never reach this codec.
    pub fn decode_payload<R: ReadBytesExt>(
        &self,
        t: WireType,
        size: usize,
        r: &mut ByteOrdered<R, Endianness>,
    ) -> Result<Value, Error> {
        Ok(match t {
            WireType::Indicator => Value::Indicator,
            WireType::Boolean => Value::Boolean(r.read_u8()? != 0),
            WireType::Byte => Value::Byte(r.read_i8()?),
            WireType::Short => Value::Short(r.read_i16()?),
            WireType::Int => Value::Int(r.read_i32()?),
            WireType::Long => Value::Long(r.read_i64()?),
            WireType::Float => Value::Float(OrderedFloat(r.read_f32()?)),
            WireType::Double => Value::Double(OrderedFloat(r.read_f64()?)),
            WireType::ByteArray
            | WireType::ByteArray4
            | WireType::ByteArray8
            | WireType::ByteArray16
            | WireType::ByteArray20
            | WireType::ByteArray32
            | WireType::ByteArray64
            | WireType::ByteArray128
            | WireType::ByteArray256
            | WireType::ByteArray512 => Value::ByteArray(read_exact(r, size)?),
            WireType::ShortArray => {
                Value::ShortArray(read_array(r, size, 2, |r| r.read_i16())?)
            }
            WireType::IntArray => Value::IntArray(read_array(r, size, 4, |r| r.read_i32())?),
            WireType::LongArray => Value::LongArray(read_array(r, size, 8, |r| r.read_i64())?),
            WireType::FloatArray => Value::FloatArray(read_array(r, size, 4, |r| {
                r.read_f32().map(OrderedFloat)
            })?),
            WireType::DoubleArray => Value::DoubleArray(read_array(r, size, 8, |r| {
                r.read_f64().map(OrderedFloat)
            })?),
            WireType::String => {
                let bytes = read_exact(r, size)?;
                Value::String(String::from_utf8(bytes).map_err(|_| Error::InvalidStringPayload)?)
            }
            WireType::DateTime => {
                let options = r.read_u8()?;
                let offset = r.read_i8()?;
                let seconds = r.read_i64()?;
                let nanos = r.read_u32()?;
                Value::DateTime(DateTime::from_wire_parts(options, offset, seconds, nanos))
            }
            WireType::Message => return Err(Error::UnexpectedEvent(
                crate::stream::StreamEvent::SubmessageFieldStart,
            )),
            WireType::Other(type_id) => Value::Opaque {
                type_id,
                bytes: read_exact(r, size)?,
            },
        })
    }

    /// Encode a non-message field payload.
    pub fn encode_payload<W: WriteBytesExt>(
        &self,
        value: &Value,
        w: &mut ByteOrdered<W, Endianness>,
    ) -> Result<(), Error> {
        match value {
            Value::Indicator => {}
            Value::Boolean(b) => w.write_u8(u8::from(*b))?,
            Value::Byte(v) => w.write_i8(*v)?,
            Value::Short(v) => w.write_i16(*v)?,
            Value::Int(v) => w.write_i32(*v)?,
            Value::Long(v) => w.write_i64(*v)?,
            Value::Float(v) => w.write_f32(v.0)?,
            Value::Double(v) => w.write_f64(v.0)?,
            Value::ByteArray(b) => w.write_all(b)?,
            Value::ShortArray(vs) => {
                for v in vs {
                    w.write_i16(*v)?;
                }
            }
            Value::IntArray(vs) => {
                for v in vs {
                    w.write_i32(*v)?;
                }
            }
            Value::LongArray(vs) => {
                for v in vs {
                    w.write_i64(*v)?;
                }
            }
            Value::FloatArray(vs) => {
                for v in vs {
                    w.write_f32(v.0)?;
                }
            }
            Value::DoubleArray(vs) => {
                for v in vs {
                    w.write_f64(v.0)?;
                }
            }
            Value::String(s) => w.write_all(s.as_bytes())?,
            Value::DateTime(dt) => {
                let (options, offset, seconds, nanos) = dt.wire_parts();
                w.write_u8(options)?;
                w.write_i8(offset)?;
                w.write_i64(seconds)?;
                w.write_u32(nanos)?;
            }
            Value::Opaque { bytes, .. } => w.write_all(bytes)?,
            Value::Message(_) => {
                return Err(Error::UnexpectedEvent(
                    crate::stream::StreamEvent::SubmessageFieldStart,
                ))
            }
        }
        Ok(())
    }

    /// Payload byte count for a non-message value.
    pub fn payload_size(&self, value: &Value) -> usize {
        match value {
            Value::Indicator => 0,
            Value::Boolean(_) | Value::Byte(_) => 1,
            Value::Short(_) => 2,
            Value::Int(_) | Value::Float(_) => 4,
            Value::Long(_) | Value::Double(_) => 8,
            Value::ByteArray(b) => b.len(),
            Value::ShortArray(v) => v.len() * 2,
            Value::IntArray(v) => v.len() * 4,
            Value::LongArray(v) => v.len() * 8,
            Value::FloatArray(v) => v.len() * 4,
            Value::DoubleArray(v) => v.len() * 8,
            Value::String(s) => s.len(),
            Value::DateTime(_) => 14,
            Value::Opaque { bytes, .. } => bytes.len(),
            Value::Message(m) => self.encoded_message_size(m),
        }
    }

    /// Encoded byte count of a message's fields, as the streaming writer
    /// produces them (sub-messages framed with a 4-byte size).
    pub fn encoded_message_size(&self, msg: &Message) -> usize {
        msg.fields().map(|f| self.encoded_field_size(f)).sum()
    }

    fn encoded_field_size(&self, field: &Field) -> usize {
        let mut n = 2; // prefix + type id
        if field.ordinal.is_some() {
            n += 2;
        }
        if let Some(name) = field.name.as_deref() {
            n += 1 + name.len();
        }
        match &field.value {
            Value::Message(m) => n + 4 + self.encoded_message_size(m),
            value => {
                let payload = self.payload_size(value);
                if self.fixed_size(value.wire_type()).is_none() {
                    n += usize::from(FieldPrefix::var_width_for(payload));
                }
                n + payload
            }
        }
    }
}

fn read_exact<R: ReadBytesExt>(
    r: &mut ByteOrdered<R, Endianness>,
    size: usize,
) -> Result<Vec<u8>, Error> {
    let mut bytes = vec![0_u8; size];
    r.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_array<R, T, F>(
    r: &mut ByteOrdered<R, Endianness>,
    size: usize,
    elem: usize,
    mut read: F,
) -> Result<Vec<T>, Error>
where
    R: ReadBytesExt,
    F: FnMut(&mut ByteOrdered<R, Endianness>) -> std::io::Result<T>,
{
    if size % elem != 0 {
        return Err(Error::ArrayPayloadSize { size, elem });
    }
    let mut out = Vec::with_capacity(size / elem);
    for _ in 0..size / elem {
        out.push(read(r)?);
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn prefix_bit_layout() {
        let p = FieldPrefix {
            fixed_width: true,
            ordinal_present: true,
            name_present: true,
            var_size_width: 0,
        };
        assert_eq!(p.pack(), 0x80 | 0x10 | 0x08);

        let p = FieldPrefix {
            fixed_width: false,
            ordinal_present: false,
            name_present: true,
            var_size_width: 4,
        };
        assert_eq!(p.pack(), (3 << 5) | 0x08);
        assert_eq!(FieldPrefix::unpack(p.pack()), p);
    }

    #[test]
    fn prefix_round_trip_all_widths() {
        for &w in &[0_u8, 1, 2, 4] {
            for &(ord, name) in &[(false, false), (true, false), (false, true), (true, true)] {
                let p = FieldPrefix {
                    fixed_width: false,
                    ordinal_present: ord,
                    name_present: name,
                    var_size_width: w,
                };
                assert_eq!(FieldPrefix::unpack(p.pack()), p);
            }
        }
    }

    #[test]
    fn narrowest_var_width() {
        assert_eq!(FieldPrefix::var_width_for(0), 0);
        assert_eq!(FieldPrefix::var_width_for(1), 1);
        assert_eq!(FieldPrefix::var_width_for(255), 1);
        assert_eq!(FieldPrefix::var_width_for(256), 2);
        assert_eq!(FieldPrefix::var_width_for(65_535), 2);
        assert_eq!(FieldPrefix::var_width_for(65_536), 4);
        assert_eq!(FieldPrefix::var_width_for((i32::MAX as usize) - 1), 4);
    }

    #[test]
    fn payload_round_trip() {
        let dict = TypeDictionary::standard();
        let values = [
            Value::Indicator,
            Value::Boolean(true),
            Value::Byte(-5),
            Value::Short(-1234),
            Value::Int(1_000_000),
            Value::Long(-9_000_000_000),
            Value::from(2.5_f32),
            Value::from(-0.125_f64),
            Value::from(vec![1_u8, 2, 3]),
            Value::from(vec![1_i16, -2]),
            Value::from(vec![1_i32, 2, 4]),
            Value::from(vec![i64::MIN, i64::MAX]),
            Value::from(vec![0.5_f32, -0.5]),
            Value::from(vec![0.25_f64]),
            Value::from("fred"),
            Value::Opaque {
                type_id: 99,
                bytes: vec![0xAA, 0xBB],
            },
        ];
        for value in values {
            let mut buf = Vec::new();
            {
                let mut w = ByteOrdered::runtime(&mut buf, Endianness::Big);
                dict.encode_payload(&value, &mut w).unwrap();
            }
            assert_eq!(buf.len(), dict.payload_size(&value));
            let mut r = ByteOrdered::runtime(buf.as_slice(), Endianness::Big);
            let decoded = dict
                .decode_payload(value.wire_type(), buf.len(), &mut r)
                .unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn big_endian_int_encoding() {
        let dict = TypeDictionary::standard();
        let mut buf = Vec::new();
        let mut w = ByteOrdered::runtime(&mut buf, Endianness::Big);
        dict.encode_payload(&Value::Int(0x0102_0304), &mut w).unwrap();
        assert_eq!(buf, [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn recovery_size_for_unknown_fixed_type() {
        let mut dict = TypeDictionary::standard();
        assert_eq!(dict.fixed_size(WireType::Other(40)), None);
        dict.register_recovery_size(40, 6);
        assert_eq!(dict.fixed_size(WireType::Other(40)), Some(6));
    }

    #[test]
    fn datetime_payload_layout() {
        let dict = TypeDictionary::standard();
        let dt = DateTime::from_civil_utc(1930, 1, 5, 12, 35, 17, 456_000_000).unwrap();
        let mut buf = Vec::new();
        {
            let mut w = ByteOrdered::runtime(&mut buf, Endianness::Big);
            dict.encode_payload(&Value::DateTime(dt), &mut w).unwrap();
        }
        assert_eq!(buf.len(), 14);
        assert_eq!(buf[0], 0x20);
        assert_eq!(buf[1], 0);
        assert_eq!(
            i64::from_be_bytes(buf[2..10].try_into().unwrap()),
            -1_261_913_083
        );
        assert_eq!(
            u32::from_be_bytes(buf[10..14].try_into().unwrap()),
            456_000_000
        );
    }
}
