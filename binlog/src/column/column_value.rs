use std::fmt;

use serde::Serialize;

use common::err::{UltError, UltResult};

use crate::column::column_type::{ColumnDef, FieldType};
use crate::column::decimal::parse_decimal;
use crate::utils::take_bytes;

/// row image 中的一个列值
#[derive(Debug, Serialize, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    SignedInt(i64),
    UnsignedInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Decimal(String),
    /// 时间类列的原始打包值 (datetime2/timestamp2 等是大端打包格式)
    DateTime(u64),
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => write!(f, "NULL"),
            ColumnValue::SignedInt(value) => write!(f, "{}", value),
            ColumnValue::UnsignedInt(value) => write!(f, "{}", value),
            ColumnValue::Float(value) => write!(f, "{}", value),
            ColumnValue::String(value) => write!(f, "{}", value),
            ColumnValue::Bytes(value) => write!(f, "0x{}", hex::encode(value)),
            ColumnValue::Decimal(value) => write!(f, "{}", value),
            ColumnValue::DateTime(value) => write!(f, "{}", value),
        }
    }
}

fn read_int_le(buffer: &[u8], pos: &mut usize, size: usize, is_unsigned: bool) -> UltResult<ColumnValue> {
    let bytes = take_bytes(buffer, pos, size)?;

    let mut value = 0u64;
    for (i, byte) in bytes.iter().enumerate() {
        value |= (*byte as u64) << (8 * i);
    }

    if is_unsigned {
        return Ok(ColumnValue::UnsignedInt(value));
    }

    // 符号扩展
    let shift = 64 - size * 8;
    Ok(ColumnValue::SignedInt(((value << shift) as i64) >> shift))
}

fn read_be_uint(buffer: &[u8], pos: &mut usize, size: usize) -> UltResult<u64> {
    let bytes = take_bytes(buffer, pos, size)?;
    let mut value = 0u64;
    for byte in bytes {
        value = (value << 8) | (*byte as u64);
    }
    Ok(value)
}

fn read_length_prefixed(buffer: &[u8], pos: &mut usize, prefix_bytes: usize) -> UltResult<Vec<u8>> {
    let mut length = 0usize;
    let bytes = take_bytes(buffer, pos, prefix_bytes)?;
    for (i, byte) in bytes.iter().enumerate() {
        length |= (*byte as usize) << (8 * i);
    }

    Ok(take_bytes(buffer, pos, length)?.to_vec())
}

fn bytes_to_value(raw: Vec<u8>) -> ColumnValue {
    match String::from_utf8(raw) {
        Ok(text) => ColumnValue::String(text),
        Err(err) => ColumnValue::Bytes(err.into_bytes()),
    }
}

impl ColumnValue {
    /// 按列描述从 row image 中解出一个值
    pub fn parse(buffer: &[u8], pos: &mut usize, def: &ColumnDef) -> UltResult<ColumnValue> {
        match def.field_type {
            FieldType::Bool
            | FieldType::Tiny
            | FieldType::Short
            | FieldType::Int24
            | FieldType::Long
            | FieldType::LongLong => read_int_le(buffer, pos, def.length as usize, def.is_unsigned),

            // YEAR 存储为 year - 1900
            FieldType::Year => {
                let raw = take_bytes(buffer, pos, 1)?[0] as u64;
                Ok(ColumnValue::UnsignedInt(if raw == 0 { 0 } else { raw + 1900 }))
            }

            FieldType::Enum | FieldType::Set => read_int_le(buffer, pos, def.length as usize, true),

            FieldType::Float => {
                if def.length == 8 {
                    let bytes = take_bytes(buffer, pos, 8)?;
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(bytes);
                    Ok(ColumnValue::Float(f64::from_le_bytes(raw)))
                } else {
                    let bytes = take_bytes(buffer, pos, 4)?;
                    let mut raw = [0u8; 4];
                    raw.copy_from_slice(bytes);
                    Ok(ColumnValue::Float(f32::from_le_bytes(raw) as f64))
                }
            }
            FieldType::Double => {
                if def.length == 4 {
                    let bytes = take_bytes(buffer, pos, 4)?;
                    let mut raw = [0u8; 4];
                    raw.copy_from_slice(bytes);
                    Ok(ColumnValue::Float(f32::from_le_bytes(raw) as f64))
                } else {
                    let bytes = take_bytes(buffer, pos, 8)?;
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(bytes);
                    Ok(ColumnValue::Float(f64::from_le_bytes(raw)))
                }
            }

            FieldType::NewDecimal => {
                let value = parse_decimal(buffer, pos, def.metadata)?;
                Ok(ColumnValue::Decimal(value))
            }

            FieldType::VarChar | FieldType::VarString | FieldType::Decimal => {
                let raw = read_length_prefixed(buffer, pos, (-def.length) as usize)?;
                Ok(bytes_to_value(raw))
            }

            FieldType::String => {
                // CHAR(n): 长度前缀由声明长度决定
                let prefix = if def.length <= 255 { 1 } else { 2 };
                let raw = read_length_prefixed(buffer, pos, prefix)?;
                Ok(bytes_to_value(raw))
            }

            FieldType::TinyBlob
            | FieldType::MediumBlob
            | FieldType::LongBlob
            | FieldType::Blob
            | FieldType::Geometry
            | FieldType::Json => {
                let raw = read_length_prefixed(buffer, pos, (-def.length) as usize)?;
                Ok(ColumnValue::Bytes(raw))
            }

            FieldType::Bit => {
                let raw = take_bytes(buffer, pos, def.length as usize)?.to_vec();
                Ok(ColumnValue::Bytes(raw))
            }

            // 时间类: 原始打包值。
            // date/time 是 3 字节小端, *2 变体是大端打包 + fsp 小数部分
            FieldType::Date | FieldType::Time | FieldType::NewDate => {
                let mut value = 0u64;
                let bytes = take_bytes(buffer, pos, 3)?;
                for (i, byte) in bytes.iter().enumerate() {
                    value |= (*byte as u64) << (8 * i);
                }
                Ok(ColumnValue::DateTime(value))
            }
            FieldType::DateTime => {
                let mut pos2 = *pos;
                let value = read_be_uint(buffer, &mut pos2, 8)?;
                *pos = pos2;
                Ok(ColumnValue::DateTime(value))
            }
            FieldType::Timestamp => {
                let mut value = 0u64;
                let bytes = take_bytes(buffer, pos, 4)?;
                for (i, byte) in bytes.iter().enumerate() {
                    value |= (*byte as u64) << (8 * i);
                }
                Ok(ColumnValue::DateTime(value))
            }
            FieldType::Time2 | FieldType::DateTime2 | FieldType::Timestamp2 => {
                let value = read_be_uint(buffer, pos, def.length as usize)?;
                Ok(ColumnValue::DateTime(value))
            }

            other => Err(UltError::Decode(format!(
                "unsupported field type in row image: {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::column::column_type::{ColumnDef, FieldType, LogicalType};

    use super::ColumnValue;

    fn int_def(length: i32, is_unsigned: bool) -> ColumnDef {
        ColumnDef::new(LogicalType::Integer, length, FieldType::Long, 0, is_unsigned)
    }

    #[test]
    fn test_signed_int() {
        let buffer = [0xFF, 0xFF, 0xFF, 0xFF];
        let mut pos = 0;

        let def = ColumnDef::new(LogicalType::Integer, 4, FieldType::Long, 0, false);
        let value = ColumnValue::parse(&buffer, &mut pos, &def).unwrap();
        assert_eq!(value, ColumnValue::SignedInt(-1));
    }

    #[test]
    fn test_unsigned_int() {
        let buffer = [0xFF, 0xFF, 0xFF, 0xFF];
        let mut pos = 0;

        let value = ColumnValue::parse(&buffer, &mut pos, &int_def(4, true)).unwrap();
        assert_eq!(value, ColumnValue::UnsignedInt(0xFFFF_FFFF));
    }

    #[test]
    fn test_varchar() {
        let buffer = [0x05, b'a', b'l', b'i', b'c', b'e'];
        let mut pos = 0;

        let def = ColumnDef::new(LogicalType::String, -1, FieldType::VarChar, 5, false);
        let value = ColumnValue::parse(&buffer, &mut pos, &def).unwrap();
        assert_eq!(value, ColumnValue::String("alice".to_string()));
        assert_eq!(pos, 6);
    }

    #[test]
    fn test_double() {
        let buffer = 1.5f64.to_le_bytes();
        let mut pos = 0;

        let def = ColumnDef::new(LogicalType::Float, 8, FieldType::Double, 8, false);
        let value = ColumnValue::parse(&buffer, &mut pos, &def).unwrap();
        assert_eq!(value, ColumnValue::Float(1.5));
    }
}
