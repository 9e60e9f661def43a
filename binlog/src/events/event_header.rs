use nom::bytes::complete::tag;
use nom::number::complete::{le_u16, le_u32, le_u8};
use nom::IResult;
use serde::Serialize;

/// 每个 event 都有一个19个字节的 Binlog Event Header
///
/// binlog 采用小端序列。
///
/// ```text
///                      [startPos : Len]
/// +=====================================+
/// | event  | timestamp         0 : 4    |
/// | header +----------------------------+
/// |        | event_type        4 : 1    |
/// |        +----------------------------+
/// |        | server_id         5 : 4    |
/// |        +----------------------------+
/// |        | event_length      9 : 4    |
/// |        +----------------------------+
/// |        | next_position    13 : 4    |
/// |        +----------------------------+
/// |        | flags            17 : 2    |
/// +=====================================+
/// ```
pub const HEADER_LEN: usize = 19;

pub const EVENT_TYPE_OFFSET: usize = 4;
pub const EVENT_LEN_OFFSET: usize = 9;
pub const LOG_POS_OFFSET: usize = 13;

pub const BINLOG_CHECKSUM_LEN: usize = 4;

#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct EventHeader {
    /// Provides creation time in seconds from Unix.
    pub when: u32,

    pub event_type: u8,

    /// 该id表明binlog的源server是哪个, 用来防止循环复制
    pub server_id: u32,

    /// Gets event length (header + event + checksum).
    pub event_length: u32,

    /// Gets file position of next event.
    pub log_pos: u32,

    pub flags: u16,
}

impl EventHeader {
    /// binlog文件以一个值为 0xfe62696e 的魔数开头, 对应 0xfe 'b' 'i' 'n'
    pub fn check_start(i: &[u8]) -> IResult<&[u8], &[u8]> {
        tag([254, 98, 105, 110])(i)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], EventHeader> {
        let (i, when) = le_u32(input)?;
        let (i, event_type) = le_u8(i)?;
        let (i, server_id) = le_u32(i)?;
        let (i, event_length) = le_u32(i)?;
        let (i, log_pos) = le_u32(i)?;
        let (i, flags) = le_u16(i)?;

        Ok((
            i,
            EventHeader {
                when,
                event_type,
                server_id,
                event_length,
                log_pos,
                flags,
            },
        ))
    }
}
