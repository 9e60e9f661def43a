use serde::Serialize;

use common::err::{UltError, UltResult};

use crate::events::format_description_event::FormatDescriptionEvent;
use crate::utils::{read_u16_le, read_u32_le, read_u8, take_bytes};

/// QUERY_EVENT
///
/// post-header:
/// +---------------------------+
/// | thread_id         0 : 4   |
/// | exec_time         4 : 4   |
/// | schema_length     8 : 1   |
/// | error_code        9 : 2   |
/// | status_vars_len  11 : 2   |
/// +---------------------------+
/// payload: status_vars, schema, 0x00, statement
#[derive(Debug, Serialize, Clone)]
pub struct QueryEvent {
    pub schema: String,
    pub statement: String,
    pub timestamp: u64,
}

impl QueryEvent {
    pub fn new(schema: String, statement: String, timestamp: u64) -> Self {
        QueryEvent {
            schema,
            statement,
            timestamp,
        }
    }

    pub fn parse(body: &[u8], fde: &FormatDescriptionEvent, timestamp: u64) -> UltResult<QueryEvent> {
        let post_header_len = fde.get_post_header_len(super::EventType::Query as u8) as usize;
        if post_header_len < 13 || body.len() < post_header_len {
            return Err(UltError::Decode(String::from("query event shorter than post header")));
        }

        let mut pos = 0;
        let _thread_id = read_u32_le(body, &mut pos)?;
        let _exec_time = read_u32_le(body, &mut pos)?;
        let schema_length = read_u8(body, &mut pos)? as usize;
        let _error_code = read_u16_le(body, &mut pos)?;
        let status_vars_len = read_u16_le(body, &mut pos)? as usize;

        // post-header 可能比13字节长, 跳过多出的部分
        pos = post_header_len;

        let _status_vars = take_bytes(body, &mut pos, status_vars_len)?;
        let schema = String::from_utf8_lossy(take_bytes(body, &mut pos, schema_length)?).into_owned();
        let _ = read_u8(body, &mut pos)?; // NUL

        let statement = String::from_utf8_lossy(&body[pos..]).into_owned();

        Ok(QueryEvent {
            schema,
            statement,
            timestamp,
        })
    }
}

#[cfg(test)]
mod test {
    use crate::events::format_description_event::FormatDescriptionEvent;

    use super::QueryEvent;

    pub(crate) fn build_query_body(schema: &str, statement: &str) -> Vec<u8> {
        let mut body = vec![];
        body.extend_from_slice(&7u32.to_le_bytes()); // thread_id
        body.extend_from_slice(&0u32.to_le_bytes()); // exec_time
        body.push(schema.len() as u8);
        body.extend_from_slice(&0u16.to_le_bytes()); // error_code
        body.extend_from_slice(&0u16.to_le_bytes()); // status_vars_len
        body.extend_from_slice(schema.as_bytes());
        body.push(0);
        body.extend_from_slice(statement.as_bytes());
        body
    }

    #[test]
    fn test_parse() {
        let fde = FormatDescriptionEvent::default();
        let body = build_query_body("shop", "BEGIN");

        let event = QueryEvent::parse(&body, &fde, 1234).unwrap();
        assert_eq!(event.schema, "shop");
        assert_eq!(event.statement, "BEGIN");
        assert_eq!(event.timestamp, 1234);
    }
}
