use serde::Serialize;
use tracing::warn;

use common::err::{UltError, UltResult};

use crate::column::column_type::{ColumnDef, FieldType, LogicalType};
use crate::events::format_description_event::FormatDescriptionEvent;
use crate::utils::{read_lenenc_int, read_u16_le, read_u48_le, read_u8, take_bytes};

/// optional metadata TLV types (8.0)
const OPT_META_SIGNEDNESS: u8 = 1;
const OPT_META_COLUMN_NAME: u8 = 4;

/// TABLE_MAP_EVENT
///
/// +--------------------------------------+
/// | table_id          0 : 6              |
/// | flags             6 : 2              |
/// +--------------------------------------+
/// | db_len : 1 | db | 0x00               |
/// | table_len : 1 | table | 0x00         |
/// | column_count (lenenc)                |
/// | column_types : column_count          |
/// | metadata_len (lenenc) | metadata     |
/// | null_bits : (column_count + 7) / 8   |
/// | optional metadata (TLV...)           |
/// +--------------------------------------+
///
/// 没有 column name metadata 的 table map 对本系统无效
/// (需要 binlog_row_metadata=FULL)。
#[derive(Debug, Serialize, Clone)]
pub struct TableMapEvent {
    pub table_id: u64,
    pub database: String,
    pub table: String,

    pub columns: Vec<ColumnDef>,
    pub column_names: Vec<String>,

    pub timestamp: u64,
}

impl TableMapEvent {
    pub fn parse(body: &[u8], fde: &FormatDescriptionEvent, timestamp: u64) -> UltResult<TableMapEvent> {
        let post_header_len = fde.get_post_header_len(super::EventType::TableMap as u8) as usize;

        let mut pos = 0;
        let table_id = if post_header_len == 6 {
            let bytes = take_bytes(body, &mut pos, 4)?;
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64
        } else {
            read_u48_le(body, &mut pos)?
        };
        let _flags = read_u16_le(body, &mut pos)?;

        let db_len = read_u8(body, &mut pos)? as usize;
        let database = String::from_utf8_lossy(take_bytes(body, &mut pos, db_len)?).into_owned();
        let _ = read_u8(body, &mut pos)?; // NUL

        let table_len = read_u8(body, &mut pos)? as usize;
        let table = String::from_utf8_lossy(take_bytes(body, &mut pos, table_len)?).into_owned();
        let _ = read_u8(body, &mut pos)?; // NUL

        let column_count = read_lenenc_int(body, &mut pos)? as usize;
        if column_count == 0 {
            return Err(UltError::Decode(String::from("table map event has zero columns")));
        }

        let column_types = take_bytes(body, &mut pos, column_count)?.to_vec();

        let metadata_len = read_lenenc_int(body, &mut pos)? as usize;
        let metadata = take_bytes(body, &mut pos, metadata_len)?.to_vec();

        let _null_bits = take_bytes(body, &mut pos, (column_count + 7) / 8)?;

        let (signedness_bits, column_names) = Self::parse_optional_metadata(&body[pos..])?;

        if column_names.len() != column_count {
            return Err(UltError::Decode(format!(
                "column names missing in table map event (got {}, expected {})",
                column_names.len(),
                column_count
            )));
        }

        let columns = Self::build_column_defs(&column_types, &metadata, &signedness_bits)?;

        Ok(TableMapEvent {
            table_id,
            database,
            table,
            columns,
            column_names,
            timestamp,
        })
    }

    /// TLV: type (1) | length (lenenc) | value
    fn parse_optional_metadata(buffer: &[u8]) -> UltResult<(Vec<bool>, Vec<String>)> {
        let mut signedness = vec![];
        let mut column_names = vec![];

        let mut pos = 0;
        while pos < buffer.len() {
            let field_type = read_u8(buffer, &mut pos)?;
            let length = read_lenenc_int(buffer, &mut pos)? as usize;
            let value = take_bytes(buffer, &mut pos, length)?;

            match field_type {
                OPT_META_SIGNEDNESS => {
                    // numeric 列的符号位图, 高位在前
                    for byte in value {
                        for bit in 0..8 {
                            signedness.push((byte & (0x80 >> bit)) != 0);
                        }
                    }
                }
                OPT_META_COLUMN_NAME => {
                    let mut name_pos = 0;
                    while name_pos < value.len() {
                        let name_len = read_lenenc_int(value, &mut name_pos)? as usize;
                        let raw = take_bytes(value, &mut name_pos, name_len)?;
                        column_names.push(String::from_utf8_lossy(raw).into_owned());
                    }
                }
                _ => {
                    // charset, primary key 等对本系统没有意义
                }
            }
        }

        Ok((signedness, column_names))
    }

    fn build_column_defs(
        column_types: &[u8],
        metadata: &[u8],
        signedness_bits: &[bool],
    ) -> UltResult<Vec<ColumnDef>> {
        let mut defs = Vec::with_capacity(column_types.len());
        let mut metadata_pos = 0usize;
        let mut numeric_index = 0usize;

        let read_meta_u8 = |pos: &mut usize| -> UltResult<u16> {
            Ok(take_bytes(metadata, pos, 1)?[0] as u16)
        };
        let read_meta_be2 = |pos: &mut usize| -> UltResult<u16> {
            let bytes = take_bytes(metadata, pos, 2)?;
            Ok(((bytes[0] as u16) << 8) | bytes[1] as u16)
        };
        let read_meta_le2 = |pos: &mut usize| -> UltResult<u16> {
            let bytes = take_bytes(metadata, pos, 2)?;
            Ok((bytes[0] as u16) | ((bytes[1] as u16) << 8))
        };

        for raw_type in column_types {
            let field_type = FieldType::try_from(*raw_type)
                .map_err(|_| UltError::Decode(format!("unknown field type: {}", raw_type)))?;

            let is_unsigned = if field_type.is_numeric() {
                let flag = signedness_bits.get(numeric_index).copied().unwrap_or(false);
                numeric_index += 1;
                flag
            } else {
                false
            };

            let (logical_type, length, field_metadata) = match field_type {
                FieldType::Bool | FieldType::Tiny => (LogicalType::Integer, 1, 0),
                FieldType::Short => (LogicalType::Integer, 2, 0),
                FieldType::Int24 => (LogicalType::Integer, 3, 0),
                FieldType::Long => (LogicalType::Integer, 4, 0),
                FieldType::LongLong => (LogicalType::Integer, 8, 0),
                FieldType::Year => (LogicalType::Integer, 1, 0),

                FieldType::Float => {
                    let meta = read_meta_u8(&mut metadata_pos)?;
                    (LogicalType::Float, if meta == 8 { 8 } else { 4 }, meta)
                }
                FieldType::Double => {
                    let meta = read_meta_u8(&mut metadata_pos)?;
                    (LogicalType::Float, if meta == 4 { 4 } else { 8 }, meta)
                }

                FieldType::NewDecimal => {
                    let meta = read_meta_be2(&mut metadata_pos)?;
                    (LogicalType::Decimal, meta as i32, meta)
                }
                // 5.0 以前的 DECIMAL 按字符串存储
                FieldType::Decimal => (LogicalType::String, -1, 0),

                FieldType::VarChar | FieldType::VarString => {
                    let meta = read_meta_le2(&mut metadata_pos)?;
                    let len_bytes = if meta <= u8::MAX as u16 { 1 } else { 2 };
                    (LogicalType::String, -len_bytes, meta)
                }

                FieldType::String => {
                    let meta = read_meta_be2(&mut metadata_pos)?;
                    let byte0 = (meta >> 8) as u8;
                    let byte1 = (meta & 0xFF) as u8;

                    if byte0 == FieldType::Enum as u8 || byte0 == FieldType::Set as u8 {
                        let real_type = if byte0 == FieldType::Enum as u8 {
                            FieldType::Enum
                        } else {
                            FieldType::Set
                        };
                        let length = if byte1 == 0 { 1 } else { byte1 as i32 };
                        defs.push(ColumnDef::new(LogicalType::Integer, length, real_type, meta, is_unsigned));
                        continue;
                    }

                    let len = ((((byte0 & 0x30) ^ 0x30) as u16) << 4) | byte1 as u16;
                    (LogicalType::String, len as i32, meta)
                }

                FieldType::Bit => {
                    let meta = read_meta_le2(&mut metadata_pos)?;
                    let bits = (meta & 0xFF) as u16;
                    let bytes = (meta >> 8) & 0xFF;
                    let total_bits = bytes * 8 + bits;
                    (LogicalType::String, ((total_bits + 7) / 8) as i32, meta)
                }

                FieldType::TinyBlob
                | FieldType::Blob
                | FieldType::MediumBlob
                | FieldType::LongBlob
                | FieldType::Geometry
                | FieldType::Json => {
                    let meta = read_meta_u8(&mut metadata_pos)?;
                    if meta == 0 || meta > 4 {
                        warn!("invalid blob length bytes: {}", meta);
                        return Err(UltError::Decode(format!("invalid blob length bytes: {}", meta)));
                    }
                    (LogicalType::String, -(meta as i32), meta)
                }

                FieldType::Date | FieldType::Time | FieldType::NewDate => (LogicalType::DateTime, 3, 0),
                FieldType::DateTime => (LogicalType::DateTime, 8, 0),
                FieldType::Timestamp => (LogicalType::DateTime, 4, 0),
                FieldType::Time2 => {
                    let fsp = read_meta_u8(&mut metadata_pos)?;
                    (LogicalType::DateTime, 3 + ((fsp as i32 + 1) / 2), fsp)
                }
                FieldType::DateTime2 => {
                    let fsp = read_meta_u8(&mut metadata_pos)?;
                    (LogicalType::DateTime, 5 + ((fsp as i32 + 1) / 2), fsp)
                }
                FieldType::Timestamp2 => {
                    let fsp = read_meta_u8(&mut metadata_pos)?;
                    (LogicalType::DateTime, 4 + ((fsp as i32 + 1) / 2), fsp)
                }

                FieldType::Enum | FieldType::Set => {
                    let meta = read_meta_be2(&mut metadata_pos)?;
                    let pack_len = (meta & 0xFF) as i32;
                    (LogicalType::Integer, if pack_len == 0 { 1 } else { pack_len }, meta)
                }

                other => {
                    warn!("unsupported field type {:?} in table map event", other);
                    return Err(UltError::Decode(format!(
                        "unsupported field type in table map event: {:?}",
                        other
                    )));
                }
            };

            defs.push(ColumnDef::new(logical_type, length, field_type, field_metadata, is_unsigned));
        }

        Ok(defs)
    }

    /// `db.table` 小写形式
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database.to_ascii_lowercase(), self.table.to_ascii_lowercase())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use crate::column::column_type::{FieldType, LogicalType};
    use crate::events::format_description_event::FormatDescriptionEvent;

    use super::TableMapEvent;

    /// (field_type, metadata bytes, signedness 参与与否由类型决定)
    pub(crate) fn build_table_map_body(
        database: &str,
        table: &str,
        table_id: u64,
        columns: &[(u8, Vec<u8>)],
        column_names: &[&str],
        signedness: &[bool],
    ) -> Vec<u8> {
        let mut body = vec![];
        body.extend_from_slice(&table_id.to_le_bytes()[..6]);
        body.extend_from_slice(&1u16.to_le_bytes()); // flags

        body.push(database.len() as u8);
        body.extend_from_slice(database.as_bytes());
        body.push(0);
        body.push(table.len() as u8);
        body.extend_from_slice(table.as_bytes());
        body.push(0);

        body.push(columns.len() as u8); // lenenc (< 0xfb)
        for (field_type, _) in columns {
            body.push(*field_type);
        }

        let metadata: Vec<u8> = columns.iter().flat_map(|(_, meta)| meta.clone()).collect();
        body.push(metadata.len() as u8);
        body.extend_from_slice(&metadata);

        body.extend(std::iter::repeat(0u8).take((columns.len() + 7) / 8)); // null bits

        // optional metadata: SIGNEDNESS
        if !signedness.is_empty() {
            let mut bitmap = vec![0u8; (signedness.len() + 7) / 8];
            for (i, bit) in signedness.iter().enumerate() {
                if *bit {
                    bitmap[i / 8] |= 0x80 >> (i % 8);
                }
            }
            body.push(super::OPT_META_SIGNEDNESS);
            body.push(bitmap.len() as u8);
            body.extend_from_slice(&bitmap);
        }

        // optional metadata: COLUMN_NAME
        let mut names = vec![];
        for name in column_names {
            names.push(name.len() as u8);
            names.extend_from_slice(name.as_bytes());
        }
        body.push(super::OPT_META_COLUMN_NAME);
        body.push(names.len() as u8);
        body.extend_from_slice(&names);

        body
    }

    #[test]
    fn test_parse() {
        let fde = FormatDescriptionEvent::default();
        let body = build_table_map_body(
            "shop",
            "users",
            42,
            &[(FieldType::Long as u8, vec![]), (FieldType::VarChar as u8, vec![0xFF, 0x00])],
            &["id", "name"],
            &[true],
        );

        let event = TableMapEvent::parse(&body, &fde, 7).unwrap();
        assert_eq!(event.table_id, 42);
        assert_eq!(event.qualified_name(), "shop.users");
        assert_eq!(event.column_names, vec!["id", "name"]);

        assert_eq!(event.columns[0].logical_type, LogicalType::Integer);
        assert_eq!(event.columns[0].length, 4);
        assert!(event.columns[0].is_unsigned);

        assert_eq!(event.columns[1].logical_type, LogicalType::String);
        assert_eq!(event.columns[1].length, -1);
        assert!(!event.columns[1].is_unsigned);
    }

    #[test]
    fn test_missing_column_names_rejected() {
        let fde = FormatDescriptionEvent::default();
        let mut body = build_table_map_body(
            "shop",
            "users",
            42,
            &[(FieldType::Long as u8, vec![])],
            &["id"],
            &[false],
        );

        // COLUMN_NAME TLV 去掉后应当判定无效
        let truncate_at = body.len() - 5;
        body.truncate(truncate_at);

        assert!(TableMapEvent::parse(&body, &fde, 7).is_err());
    }
}
