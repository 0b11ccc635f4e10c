//! Characteristic value encoding.
//!
//! Values travel as raw byte buffers. A [`DataFormat`] tag chosen by the
//! caller says how to interpret them: little-endian fixed-width integers, a
//! single-byte boolean, or a NUL-padded UTF-8 string.

use std::fmt;

use crate::error::{Error, Result};

/// How a characteristic's bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataFormat {
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 8-bit integer.
    UInt8,
    /// Signed 16-bit little-endian integer.
    Int16,
    /// Unsigned 16-bit little-endian integer.
    UInt16,
    /// Signed 32-bit little-endian integer.
    Int32,
    /// Unsigned 32-bit little-endian integer.
    UInt32,
    /// Boolean stored as one byte, non-zero meaning true.
    Bool,
    /// UTF-8 string, NUL bytes trimmed from both ends when decoding.
    String,
}

impl DataFormat {
    /// Encoded width in bytes, or `None` for variable-length strings.
    pub fn width(&self) -> Option<usize> {
        match self {
            Self::Int8 | Self::UInt8 | Self::Bool => Some(1),
            Self::Int16 | Self::UInt16 => Some(2),
            Self::Int32 | Self::UInt32 => Some(4),
            Self::String => None,
        }
    }

    /// Encode a value into the bytes for this format.
    ///
    /// Integer and boolean values are accepted for any numeric format as long
    /// as they fit its range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] when the value does not fit the
    /// format.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        if let Self::String = self {
            return match value {
                Value::String(s) => Ok(s.as_bytes().to_vec()),
                other => Err(self.mismatch(other)),
            };
        }

        let number = value.as_i64().ok_or_else(|| self.mismatch(value))?;
        let out_of_range = || self.mismatch(value);

        let bytes = match self {
            Self::Int8 => i8::try_from(number).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
            Self::UInt8 => u8::try_from(number).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
            Self::Int16 => i16::try_from(number).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
            Self::UInt16 => u16::try_from(number).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
            Self::Int32 => i32::try_from(number).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
            Self::UInt32 => u32::try_from(number).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
            Self::Bool => vec![u8::from(number != 0)],
            Self::String => unreachable!("handled above"),
        };

        Ok(bytes)
    }

    /// Decode bytes according to this format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] when the buffer length does not match
    /// the format width or a string is not valid UTF-8.
    pub fn decode(&self, data: &[u8]) -> Result<Value> {
        if let Some(width) = self.width() {
            if data.len() != width {
                return Err(Error::InvalidData {
                    context: format!(
                        "{} expects {} byte(s), got {}: {:02X?}",
                        self,
                        width,
                        data.len(),
                        data
                    ),
                });
            }
        }

        let value = match self {
            Self::Int8 => Value::Int8(i8::from_le_bytes([data[0]])),
            Self::UInt8 => Value::UInt8(data[0]),
            Self::Int16 => Value::Int16(i16::from_le_bytes([data[0], data[1]])),
            Self::UInt16 => Value::UInt16(u16::from_le_bytes([data[0], data[1]])),
            Self::Int32 => Value::Int32(i32::from_le_bytes([data[0], data[1], data[2], data[3]])),
            Self::UInt32 => Value::UInt32(u32::from_le_bytes([data[0], data[1], data[2], data[3]])),
            Self::Bool => Value::Bool(data[0] != 0),
            Self::String => {
                let text = std::str::from_utf8(data).map_err(|_| Error::InvalidData {
                    context: format!("Invalid UTF-8 in string value: {:02X?}", data),
                })?;
                Value::String(text.trim_matches('\0').to_string())
            }
        };

        Ok(value)
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::InvalidParameter {
            name: format!("{} value", self),
            value: format!("{:?}", value),
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int8 => write!(f, "int8"),
            Self::UInt8 => write!(f, "uint8"),
            Self::Int16 => write!(f, "int16"),
            Self::UInt16 => write!(f, "uint16"),
            Self::Int32 => write!(f, "int32"),
            Self::UInt32 => write!(f, "uint32"),
            Self::Bool => write!(f, "bool"),
            Self::String => write!(f, "string"),
        }
    }
}

/// A decoded characteristic value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Signed 8-bit integer.
    Int8(i8),
    /// Unsigned 8-bit integer.
    UInt8(u8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Boolean.
    Bool(bool),
    /// String.
    String(String),
}

impl Value {
    /// Get any numeric or boolean value widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int8(v) => Some(v.into()),
            Self::UInt8(v) => Some(v.into()),
            Self::Int16(v) => Some(v.into()),
            Self::UInt16(v) => Some(v.into()),
            Self::Int32(v) => Some(v.into()),
            Self::UInt32(v) => Some(v.into()),
            Self::Bool(v) => Some(v.into()),
            Self::String(_) => None,
        }
    }

    /// Get the value as a boolean, treating non-zero numbers as true.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            other => other.as_i64().map(|n| n != 0),
        }
    }

    /// Get the value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

impl_value_from! {
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    bool => Bool,
    String => String,
    &str => String,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Bool(b) => write!(f, "{}", b),
            other => write!(f, "{}", other.as_i64().unwrap_or_default()),
        }
    }
}
