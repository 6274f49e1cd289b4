//! The subset of MessagePack used by features, legends and primary keys.
//!
//! Writing goes through `rmp::encode`, which already picks the smallest
//! representation for integers, strings and byte strings. Reading is done
//! directly on the byte slice with [rmp::Marker] so that decoding never
//! allocates more than the values it returns and reports exactly which
//! structure was wrong.

use rmp::Marker;

use super::MalformedError;
use crate::geometry::Geometry;
use crate::value::Value;

/// MessagePack extension type carrying geometry bytes (`'G'`).
pub const GEOMETRY_EXT: i8 = 71;

pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn array_len(&mut self, len: usize) {
        rmp::encode::write_array_len(&mut self.buf, len as u32)
            .expect("writing to a Vec cannot fail");
    }

    pub fn str(&mut self, s: &str) {
        rmp::encode::write_str(&mut self.buf, s).expect("writing to a Vec cannot fail");
    }

    /// Writes a value. `float32` selects the single precision encoding for
    /// floats; it has no effect on other values.
    pub fn value(&mut self, value: &Value, float32: bool) {
        let buf = &mut self.buf;
        match value {
            Value::Null => {
                rmp::encode::write_nil(buf).expect("writing to a Vec cannot fail");
            }
            Value::Bool(b) => {
                rmp::encode::write_bool(buf, *b).expect("writing to a Vec cannot fail");
            }
            Value::Int(i) => {
                rmp::encode::write_sint(buf, *i).expect("writing to a Vec cannot fail");
            }
            Value::Float(x) if float32 => {
                rmp::encode::write_f32(buf, *x as f32).expect("writing to a Vec cannot fail");
            }
            Value::Float(x) => {
                rmp::encode::write_f64(buf, *x).expect("writing to a Vec cannot fail");
            }
            Value::Text(s) => {
                rmp::encode::write_str(buf, s).expect("writing to a Vec cannot fail");
            }
            Value::Bytes(b) => {
                rmp::encode::write_bin(buf, b).expect("writing to a Vec cannot fail");
            }
            Value::Geometry(g) => {
                let bytes = g.as_bytes();
                rmp::encode::write_ext_meta(buf, bytes.len() as u32, GEOMETRY_EXT)
                    .expect("writing to a Vec cannot fail");
                buf.extend_from_slice(bytes);
            }
        }
    }
}

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf }
    }

    pub fn finish(self) -> Result<(), MalformedError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(MalformedError::TrailingBytes(self.buf.len()))
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], MalformedError> {
        if self.buf.len() < len {
            return Err(MalformedError::Truncated);
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], MalformedError> {
        let bytes = self.take(N)?;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn marker(&mut self) -> Result<(Marker, u8), MalformedError> {
        let [byte] = self.take_array::<1>()?;
        Ok((Marker::from_u8(byte), byte))
    }

    fn len8(&mut self) -> Result<usize, MalformedError> {
        Ok(u8::from_be_bytes(self.take_array()?) as usize)
    }

    fn len16(&mut self) -> Result<usize, MalformedError> {
        Ok(u16::from_be_bytes(self.take_array()?) as usize)
    }

    fn len32(&mut self) -> Result<usize, MalformedError> {
        Ok(u32::from_be_bytes(self.take_array()?) as usize)
    }

    pub fn array_len(&mut self) -> Result<usize, MalformedError> {
        match self.marker()? {
            (Marker::FixArray(n), _) => Ok(n as usize),
            (Marker::Array16, _) => self.len16(),
            (Marker::Array32, _) => self.len32(),
            (_, byte) => Err(MalformedError::UnexpectedMarker {
                expected: "array",
                marker: byte,
            }),
        }
    }

    pub fn str(&mut self) -> Result<&'a str, MalformedError> {
        let (marker, byte) = self.marker()?;
        self.str_body(marker, byte)
    }

    fn str_body(&mut self, marker: Marker, byte: u8) -> Result<&'a str, MalformedError> {
        let len = match marker {
            Marker::FixStr(n) => n as usize,
            Marker::Str8 => self.len8()?,
            Marker::Str16 => self.len16()?,
            Marker::Str32 => self.len32()?,
            _ => {
                return Err(MalformedError::UnexpectedMarker {
                    expected: "string",
                    marker: byte,
                })
            }
        };
        std::str::from_utf8(self.take(len)?).map_err(|_| MalformedError::InvalidUtf8)
    }

    pub fn value(&mut self) -> Result<Value, MalformedError> {
        let (marker, byte) = self.marker()?;
        let value = match marker {
            Marker::Null => Value::Null,
            Marker::True => Value::Bool(true),
            Marker::False => Value::Bool(false),
            Marker::FixPos(n) => Value::Int(n.into()),
            Marker::FixNeg(n) => Value::Int(n.into()),
            Marker::U8 => Value::Int(u8::from_be_bytes(self.take_array()?).into()),
            Marker::U16 => Value::Int(u16::from_be_bytes(self.take_array()?).into()),
            Marker::U32 => Value::Int(u32::from_be_bytes(self.take_array()?).into()),
            Marker::U64 => {
                let n = u64::from_be_bytes(self.take_array()?);
                Value::Int(i64::try_from(n).map_err(|_| MalformedError::IntegerOverflow)?)
            }
            Marker::I8 => Value::Int(i8::from_be_bytes(self.take_array()?).into()),
            Marker::I16 => Value::Int(i16::from_be_bytes(self.take_array()?).into()),
            Marker::I32 => Value::Int(i32::from_be_bytes(self.take_array()?).into()),
            Marker::I64 => Value::Int(i64::from_be_bytes(self.take_array()?)),
            Marker::F32 => Value::Float(f32::from_be_bytes(self.take_array()?).into()),
            Marker::F64 => Value::Float(f64::from_be_bytes(self.take_array()?)),
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                Value::Text(self.str_body(marker, byte)?.to_owned())
            }
            Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => {
                let len = match marker {
                    Marker::Bin8 => self.len8()?,
                    Marker::Bin16 => self.len16()?,
                    _ => self.len32()?,
                };
                Value::Bytes(self.take(len)?.to_vec())
            }
            Marker::FixExt1
            | Marker::FixExt2
            | Marker::FixExt4
            | Marker::FixExt8
            | Marker::FixExt16
            | Marker::Ext8
            | Marker::Ext16
            | Marker::Ext32 => {
                let len = match marker {
                    Marker::FixExt1 => 1,
                    Marker::FixExt2 => 2,
                    Marker::FixExt4 => 4,
                    Marker::FixExt8 => 8,
                    Marker::FixExt16 => 16,
                    Marker::Ext8 => self.len8()?,
                    Marker::Ext16 => self.len16()?,
                    _ => self.len32()?,
                };
                let [ext] = self.take_array::<1>()?;
                let ext = ext as i8;
                if ext != GEOMETRY_EXT {
                    return Err(MalformedError::UnknownExtension(ext));
                }
                let bytes = self.take(len)?.to_vec();
                Value::Geometry(Geometry::from_stored(bytes).map_err(MalformedError::Geometry)?)
            }
            _ => {
                return Err(MalformedError::UnexpectedMarker {
                    expected: "value",
                    marker: byte,
                })
            }
        };
        Ok(value)
    }
}
