use serde::Serialize;

use common::err::{UltError, UltResult};

use crate::utils::read_u64_le;

/// XID_EVENT — 事务提交标记。
/// xid 是服务端分配的事务标识, 与本系统的 GID 无关。
#[derive(Debug, Serialize, Clone)]
pub struct TransactionIdEvent {
    pub xid: u64,
    pub timestamp: u64,
}

impl TransactionIdEvent {
    pub fn new(xid: u64, timestamp: u64) -> Self {
        TransactionIdEvent { xid, timestamp }
    }

    pub fn parse(body: &[u8], timestamp: u64) -> UltResult<TransactionIdEvent> {
        if body.len() < 8 {
            return Err(UltError::Decode(String::from("xid event shorter than 8 bytes")));
        }

        let mut pos = 0;
        let xid = read_u64_le(body, &mut pos)?;

        Ok(TransactionIdEvent { xid, timestamp })
    }
}

#[cfg(test)]
mod test {
    use super::TransactionIdEvent;

    #[test]
    fn test_parse() {
        let body = 77u64.to_le_bytes();
        let event = TransactionIdEvent::parse(&body, 1).unwrap();
        assert_eq!(event.xid, 77);
    }
}
