use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};

use common::err::{UltError, UltResult};

use crate::query::Query;
use crate::Gid;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TransactionFlags: u8 {
        /// 由记录到的 CALL 合成的事务
        const IS_PROCEDURE_CALL = 0b0000_0001;
    }
}

/// state log 的定长事务头。
///
/// `next_pos` 是序列化 body 之后的精确文件偏移;
/// reader 以 `next_pos - 当前位置` 读出 body。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionHeader {
    pub timestamp: u64,
    pub gid: Gid,
    pub xid: u64,
    pub is_successful: bool,
    pub flags: u8,
    pub next_pos: u64,
}

pub const TRANSACTION_HEADER_SIZE: usize = 8 + 8 + 8 + 1 + 1 + 8;

impl TransactionHeader {
    pub fn to_bytes(&self) -> [u8; TRANSACTION_HEADER_SIZE] {
        let mut buffer = [0u8; TRANSACTION_HEADER_SIZE];
        LittleEndian::write_u64(&mut buffer[0..8], self.timestamp);
        LittleEndian::write_u64(&mut buffer[8..16], self.gid);
        LittleEndian::write_u64(&mut buffer[16..24], self.xid);
        buffer[24] = self.is_successful as u8;
        buffer[25] = self.flags;
        LittleEndian::write_u64(&mut buffer[26..34], self.next_pos);
        buffer
    }

    pub fn from_bytes(buffer: &[u8]) -> UltResult<TransactionHeader> {
        if buffer.len() < TRANSACTION_HEADER_SIZE {
            return Err(UltError::Decode(String::from("transaction header truncated")));
        }

        Ok(TransactionHeader {
            timestamp: LittleEndian::read_u64(&buffer[0..8]),
            gid: LittleEndian::read_u64(&buffer[8..16]),
            xid: LittleEndian::read_u64(&buffer[16..24]),
            is_successful: buffer[24] != 0,
            flags: buffer[25],
            next_pos: LittleEndian::read_u64(&buffer[26..34]),
        })
    }
}

/// 两个 commit 标记之间的事件组。写入 state log 后不再变更。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    pub gid: Gid,
    pub xid: u64,
    pub timestamp: u64,
    pub flags: TransactionFlags,

    queries: Vec<Query>,
}

impl Transaction {
    pub fn new() -> Self {
        Transaction::default()
    }

    pub fn push(&mut self, query: Query) {
        self.queries.push(query);
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    pub fn queries_mut(&mut self) -> &mut Vec<Query> {
        &mut self.queries
    }

    pub fn is_procedure_call(&self) -> bool {
        self.flags.contains(TransactionFlags::IS_PROCEDURE_CALL)
    }

    pub fn make_header(&self, is_successful: bool, next_pos: u64) -> TransactionHeader {
        TransactionHeader {
            timestamp: self.timestamp,
            gid: self.gid,
            xid: self.xid,
            is_successful,
            flags: self.flags.bits(),
            next_pos,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = TransactionHeader {
            timestamp: 1666000000,
            gid: 42,
            xid: 77,
            is_successful: true,
            flags: TransactionFlags::IS_PROCEDURE_CALL.bits(),
            next_pos: 123456,
        };

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), TRANSACTION_HEADER_SIZE);

        let decoded = TransactionHeader::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_truncated() {
        let header = TransactionHeader::default();
        let bytes = header.to_bytes();
        assert!(TransactionHeader::from_bytes(&bytes[..20]).is_err());
    }

    #[test]
    fn test_transaction_queries_are_ordered() {
        let mut transaction = Transaction::new();
        for i in 0..3 {
            let mut query = Query::new();
            query.statement = format!("INSERT INTO t VALUES ({})", i);
            transaction.push(query);
        }

        let statements: Vec<&str> = transaction.queries().iter().map(|q| q.statement.as_str()).collect();
        assert_eq!(
            statements,
            vec![
                "INSERT INTO t VALUES (0)",
                "INSERT INTO t VALUES (1)",
                "INSERT INTO t VALUES (2)"
            ]
        );
    }
}
