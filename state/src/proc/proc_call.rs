use byteorder::{ByteOrder, LittleEndian};

use common::err::{UltError, UltResult};

use crate::data::StateData;

pub const PROC_CALL_HEADER_SIZE: usize = 8 + 8 + 8;

/// procedure log 里的定长记录头
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcCallHeader {
    pub call_id: u64,
    pub timestamp: u64,
    pub next_pos: u64,
}

impl ProcCallHeader {
    pub fn to_bytes(&self) -> [u8; PROC_CALL_HEADER_SIZE] {
        let mut buffer = [0u8; PROC_CALL_HEADER_SIZE];
        LittleEndian::write_u64(&mut buffer[0..8], self.call_id);
        LittleEndian::write_u64(&mut buffer[8..16], self.timestamp);
        LittleEndian::write_u64(&mut buffer[16..24], self.next_pos);
        buffer
    }

    pub fn from_bytes(buffer: &[u8]) -> UltResult<ProcCallHeader> {
        if buffer.len() < PROC_CALL_HEADER_SIZE {
            return Err(UltError::Decode(String::from("proc call header truncated")));
        }

        Ok(ProcCallHeader {
            call_id: LittleEndian::read_u64(&buffer[0..8]),
            timestamp: LittleEndian::read_u64(&buffer[8..16]),
            next_pos: LittleEndian::read_u64(&buffer[16..24]),
        })
    }
}

/// 记录到的一次 procedure 调用
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcCall {
    pub call_id: u64,
    pub proc_name: String,

    /// statements[0] 是合成的 `CALL name(args...)`
    pub statements: Vec<String>,
    pub parameters: Vec<StateData>,
}

impl ProcCall {
    pub fn new(call_id: u64, proc_name: &str) -> Self {
        ProcCall {
            call_id,
            proc_name: proc_name.to_string(),
            statements: vec![],
            parameters: vec![],
        }
    }
}
