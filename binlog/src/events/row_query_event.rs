use serde::Serialize;

use common::err::{UltError, UltResult};

/// ROWS_QUERY_LOG_EVENT — 产生后续 rows event 的原始 DML 文本。
/// body 第一个字节是(截断过的)长度, 实际文本一直延伸到事件末尾。
#[derive(Debug, Serialize, Clone)]
pub struct RowQueryEvent {
    pub statement: String,
    pub timestamp: u64,
}

impl RowQueryEvent {
    pub fn parse(body: &[u8], timestamp: u64) -> UltResult<RowQueryEvent> {
        if body.is_empty() {
            return Err(UltError::Decode(String::from("rows query event is empty")));
        }

        let statement = String::from_utf8_lossy(&body[1..]).into_owned();

        Ok(RowQueryEvent {
            statement,
            timestamp,
        })
    }
}

#[cfg(test)]
mod test {
    use super::RowQueryEvent;

    #[test]
    fn test_parse() {
        let statement = "UPDATE users SET name = 'bob' WHERE id = 1";
        let mut body = vec![statement.len() as u8];
        body.extend_from_slice(statement.as_bytes());

        let event = RowQueryEvent::parse(&body, 9).unwrap();
        assert_eq!(event.statement, statement);
        assert_eq!(event.timestamp, 9);
    }
}
