use serde::Serialize;
use tracing::warn;

use common::err::{UltError, UltResult};

use crate::column::column_value::ColumnValue;
use crate::events::format_description_event::FormatDescriptionEvent;
use crate::events::table_map_event::TableMapEvent;
use crate::events::EventType;
use crate::utils::{count_bits, is_bit_set, read_lenenc_int, read_u16_le, read_u48_le, take_bytes};

pub const ROWS_HEADER_LEN_V1: usize = 8;
pub const ROWS_HEADER_LEN_V2: usize = 10;

/// STMT_END_F: rows event 是语句的最后一个分片
pub const ROWS_FLAG_STMT_END: u16 = 0x01;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum RowEventType {
    Insert,
    Update,
    Delete,
}

/// 一行的变更镜像。INSERT 只有 after, DELETE 只有 before。
#[derive(Debug, Clone)]
pub struct RowChange {
    pub before: Option<Vec<ColumnValue>>,
    pub after: Option<Vec<ColumnValue>>,
}

/// WRITE/UPDATE/DELETE_ROWS (V1/V2)
///
/// +--------------------------------------+
/// | table_id          0 : 6              |
/// | flags             6 : 2              |
/// | (V2) extra_len    8 : 2  + extra     |
/// +--------------------------------------+
/// | width (lenenc)                       |
/// | columns_before : (width + 7) / 8     |
/// | (UPDATE) columns_after               |
/// | row images ...                       |
/// +--------------------------------------+
#[derive(Debug, Serialize, Clone)]
pub struct RowEvent {
    pub row_event_type: RowEventType,
    pub table_id: u64,
    pub width: usize,

    pub columns_before: Vec<u8>,
    pub columns_after: Vec<u8>,

    pub row_data: Vec<u8>,
    pub flags: u16,
    pub timestamp: u64,
}

impl RowEvent {
    pub fn parse(
        body: &[u8],
        event_type: EventType,
        fde: &FormatDescriptionEvent,
        timestamp: u64,
    ) -> UltResult<RowEvent> {
        let post_header_len = fde.get_post_header_len(event_type as u8) as usize;

        let mut pos = 0;
        let table_id = read_u48_le(body, &mut pos)?;
        let flags = read_u16_le(body, &mut pos)?;

        if post_header_len == ROWS_HEADER_LEN_V2 {
            // V2: 2-byte extra length (包含自身)
            let extra_len = read_u16_le(body, &mut pos)? as usize;
            if extra_len < 2 {
                return Err(UltError::Decode(String::from("rows event extra header length invalid")));
            }
            let _ = take_bytes(body, &mut pos, extra_len - 2)?;
        } else if post_header_len > ROWS_HEADER_LEN_V1 {
            let _ = take_bytes(body, &mut pos, post_header_len - ROWS_HEADER_LEN_V1)?;
        }

        let width = read_lenenc_int(body, &mut pos)? as usize;
        if width == 0 {
            return Err(UltError::Decode(String::from("rows event has zero width")));
        }

        let bitmap_size = (width + 7) / 8;
        let columns_before = take_bytes(body, &mut pos, bitmap_size)?.to_vec();

        let row_event_type = match event_type {
            EventType::WriteRowsV1 | EventType::WriteRows => RowEventType::Insert,
            EventType::DeleteRowsV1 | EventType::DeleteRows => RowEventType::Delete,
            EventType::UpdateRowsV1 | EventType::UpdateRows => RowEventType::Update,
            other => {
                return Err(UltError::Decode(format!("not a rows event: {:?}", other)));
            }
        };

        let columns_after = if row_event_type == RowEventType::Update {
            take_bytes(body, &mut pos, bitmap_size)?.to_vec()
        } else {
            columns_before.clone()
        };

        let row_data = body[pos..].to_vec();
        if row_data.is_empty() {
            warn!("rows event has no row data");
            return Err(UltError::Decode(String::from("rows event has no row data")));
        }

        Ok(RowEvent {
            row_event_type,
            table_id,
            width,
            columns_before,
            columns_after,
            row_data,
            flags,
            timestamp,
        })
    }

    /// table map 套用后解出行镜像序列
    pub fn rows(&self, table_map: &TableMapEvent) -> UltResult<Vec<RowChange>> {
        if table_map.columns.len() < self.width {
            return Err(UltError::Decode(format!(
                "table map has {} columns but rows event width is {}",
                table_map.columns.len(),
                self.width
            )));
        }

        let mut changes = vec![];
        let mut pos = 0;

        while pos < self.row_data.len() {
            let change = match self.row_event_type {
                RowEventType::Insert => RowChange {
                    before: None,
                    after: Some(self.parse_image(&mut pos, &self.columns_before, table_map)?),
                },
                RowEventType::Delete => RowChange {
                    before: Some(self.parse_image(&mut pos, &self.columns_before, table_map)?),
                    after: None,
                },
                RowEventType::Update => {
                    let before = self.parse_image(&mut pos, &self.columns_before, table_map)?;
                    let after = self.parse_image(&mut pos, &self.columns_after, table_map)?;
                    RowChange {
                        before: Some(before),
                        after: Some(after),
                    }
                }
            };

            changes.push(change);
        }

        Ok(changes)
    }

    /// 一个 row image: null bitmap + 各 present 列的值。
    /// 不在 present bitmap 中的列以 Null 占位, 保持下标与列名对齐。
    fn parse_image(
        &self,
        pos: &mut usize,
        present: &[u8],
        table_map: &TableMapEvent,
    ) -> UltResult<Vec<ColumnValue>> {
        let present_count = count_bits(present, self.width);
        let null_bitmap = take_bytes(&self.row_data, pos, (present_count + 7) / 8)?.to_vec();

        let mut image = Vec::with_capacity(self.width);
        let mut present_index = 0usize;

        for column_index in 0..self.width {
            if !is_bit_set(present, column_index) {
                image.push(ColumnValue::Null);
                continue;
            }

            if is_bit_set(&null_bitmap, present_index) {
                image.push(ColumnValue::Null);
            } else {
                let def = &table_map.columns[column_index];
                image.push(ColumnValue::parse(&self.row_data, pos, def)?);
            }

            present_index += 1;
        }

        Ok(image)
    }

    pub fn is_statement_end(&self) -> bool {
        (self.flags & ROWS_FLAG_STMT_END) != 0
    }
}

#[cfg(test)]
mod test {
    use crate::column::column_type::FieldType;
    use crate::column::column_value::ColumnValue;
    use crate::events::format_description_event::FormatDescriptionEvent;
    use crate::events::table_map_event::test::build_table_map_body;
    use crate::events::table_map_event::TableMapEvent;
    use crate::events::EventType;

    use super::{RowEvent, RowEventType};

    fn users_table_map() -> TableMapEvent {
        let fde = FormatDescriptionEvent::default();
        let body = build_table_map_body(
            "shop",
            "users",
            42,
            &[(FieldType::Long as u8, vec![]), (FieldType::VarChar as u8, vec![0xFF, 0x00])],
            &["id", "name"],
            &[false],
        );
        TableMapEvent::parse(&body, &fde, 0).unwrap()
    }

    fn build_write_rows_body(rows: &[(u32, &str)]) -> Vec<u8> {
        let mut body = vec![];
        body.extend_from_slice(&42u64.to_le_bytes()[..6]);
        body.extend_from_slice(&1u16.to_le_bytes()); // flags: STMT_END
        body.extend_from_slice(&2u16.to_le_bytes()); // V2 extra_len (只有自身)
        body.push(2); // width
        body.push(0b0000_0011); // both columns present

        for (id, name) in rows {
            body.push(0); // null bitmap
            body.extend_from_slice(&id.to_le_bytes());
            body.push(name.len() as u8);
            body.extend_from_slice(name.as_bytes());
        }

        body
    }

    #[test]
    fn test_parse_write_rows() {
        let fde = FormatDescriptionEvent::default();
        let body = build_write_rows_body(&[(1, "alice"), (2, "bob")]);

        let event = RowEvent::parse(&body, EventType::WriteRows, &fde, 0).unwrap();
        assert_eq!(event.row_event_type, RowEventType::Insert);
        assert_eq!(event.table_id, 42);
        assert_eq!(event.width, 2);
        assert!(event.is_statement_end());
        assert_eq!(event.columns_before, event.columns_after);

        let rows = event.rows(&users_table_map()).unwrap();
        assert_eq!(rows.len(), 2);

        let first = rows[0].after.as_ref().unwrap();
        assert_eq!(first[0], ColumnValue::SignedInt(1));
        assert_eq!(first[1], ColumnValue::String("alice".to_string()));
        assert!(rows[0].before.is_none());
    }

    #[test]
    fn test_parse_update_rows() {
        let fde = FormatDescriptionEvent::default();

        let mut body = vec![];
        body.extend_from_slice(&42u64.to_le_bytes()[..6]);
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&2u16.to_le_bytes());
        body.push(2); // width
        body.push(0b0000_0011); // before image columns
        body.push(0b0000_0011); // after image columns

        // before: (1, "alice") / after: (1, "bob")
        body.push(0);
        body.extend_from_slice(&1u32.to_le_bytes());
        body.push(5);
        body.extend_from_slice(b"alice");
        body.push(0);
        body.extend_from_slice(&1u32.to_le_bytes());
        body.push(3);
        body.extend_from_slice(b"bob");

        let event = RowEvent::parse(&body, EventType::UpdateRows, &fde, 0).unwrap();
        assert_eq!(event.row_event_type, RowEventType::Update);

        let rows = event.rows(&users_table_map()).unwrap();
        assert_eq!(rows.len(), 1);

        let before = rows[0].before.as_ref().unwrap();
        let after = rows[0].after.as_ref().unwrap();
        assert_eq!(before[1], ColumnValue::String("alice".to_string()));
        assert_eq!(after[1], ColumnValue::String("bob".to_string()));
    }
}
