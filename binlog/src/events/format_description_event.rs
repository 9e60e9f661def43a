use num_enum::TryFromPrimitive;
use serde::Serialize;

use common::err::{UltError, UltResult};

use crate::events::event_header::{BINLOG_CHECKSUM_LEN, HEADER_LEN};
use crate::utils::{read_u16_le, read_u32_le, read_u8, take_bytes};

pub const ST_SERVER_VER_LEN: usize = 50;

/// binlog_version + server_version + create_timestamp + common_header_len
pub const ST_COMMON_PAYLOAD_LEN: usize = 2 + ST_SERVER_VER_LEN + 4 + 1;

/// Checksum type used in a binlog file.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ChecksumAlg {
    /// Checksum is disabled.
    Off = 0,

    /// CRC32 checksum.
    Crc32 = 1,

    Undef = 255,
}

/// FORMAT_DESCRIPTION_EVENT
///
/// 描述之后所有 event 的公共头长度、各类型 post-header 长度以及 checksum 算法。
/// 没有读到有效 FDE 之前, 使用当前版本的缺省描述。
#[derive(Debug, Serialize, Clone)]
pub struct FormatDescriptionEvent {
    pub binlog_version: u16,

    pub server_version: String,

    pub create_timestamp: u32,

    /// 之后所有event的公共头长度, 一般是19
    pub common_header_len: u8,

    /// The list of post-headers' lengths, indexed by (event_type - 1)
    pub post_header_len: Vec<u8>,

    pub checksum_alg: ChecksumAlg,
}

/// 缺省 post-header 长度表 (MySQL 8.x, FORMAT_DESCRIPTION_HEADER_LEN 之前的常见类型)
fn default_post_header_len() -> Vec<u8> {
    let mut lens = vec![0u8; 42];
    lens[2 - 1] = 13; // QUERY_HEADER_LEN
    lens[4 - 1] = 8; // ROTATE
    lens[15 - 1] = (2 + ST_SERVER_VER_LEN + 4 + 1 + 41) as u8; // FORMAT_DESCRIPTION
    lens[19 - 1] = 8; // TABLE_MAP
    lens[23 - 1] = 8; // WRITE_ROWS_V1
    lens[24 - 1] = 8;
    lens[25 - 1] = 8;
    lens[30 - 1] = 10; // WRITE_ROWS_V2
    lens[31 - 1] = 10;
    lens[32 - 1] = 10;
    lens
}

impl Default for FormatDescriptionEvent {
    fn default() -> Self {
        FormatDescriptionEvent {
            binlog_version: 4,
            server_version: String::from("8.0.0"),
            create_timestamp: 0,
            common_header_len: HEADER_LEN as u8,
            post_header_len: default_post_header_len(),
            checksum_alg: ChecksumAlg::Undef,
        }
    }
}

/// "8.0.33-log" → (8, 0, 33)
fn split_server_version(version: &str) -> (u32, u32, u32) {
    let mut parts = [0u32; 3];

    for (i, part) in version.split('.').take(3).enumerate() {
        let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
        parts[i] = digits.parse().unwrap_or(0);
    }

    (parts[0], parts[1], parts[2])
}

/// checksum 信息是 5.6.1 引入的
fn version_has_checksum(version: &str) -> bool {
    split_server_version(version) >= (5, 6, 1)
}

impl FormatDescriptionEvent {
    pub fn get_post_header_len(&self, event_type: u8) -> u8 {
        let index = (event_type as usize).saturating_sub(1);
        if index >= self.post_header_len.len() {
            return 0;
        }
        self.post_header_len[index]
    }

    /// 从完整 event buffer (含19字节公共头) 解析
    pub fn parse(buffer: &[u8]) -> UltResult<FormatDescriptionEvent> {
        if buffer.len() < HEADER_LEN + ST_COMMON_PAYLOAD_LEN {
            return Err(UltError::Decode(String::from(
                "format description event shorter than fixed payload",
            )));
        }

        let mut pos = 0;
        let _ = read_u32_le(buffer, &mut pos)?; // timestamp
        let _ = read_u8(buffer, &mut pos)?; // event_type
        let _ = read_u32_le(buffer, &mut pos)?; // server_id
        let _ = read_u32_le(buffer, &mut pos)?; // event_length
        let _ = read_u32_le(buffer, &mut pos)?; // log_pos
        let _ = read_u16_le(buffer, &mut pos)?; // flags

        let binlog_version = read_u16_le(buffer, &mut pos)?;
        if binlog_version != 4 {
            return Err(UltError::Decode(format!(
                "unsupported binlog version: {}",
                binlog_version
            )));
        }

        let raw_version = take_bytes(buffer, &mut pos, ST_SERVER_VER_LEN)?;
        let end = raw_version.iter().position(|b| *b == 0).unwrap_or(ST_SERVER_VER_LEN);
        let server_version = String::from_utf8_lossy(&raw_version[..end]).into_owned();

        let create_timestamp = read_u32_le(buffer, &mut pos)?;
        let common_header_len = read_u8(buffer, &mut pos)?;

        if common_header_len as usize != HEADER_LEN {
            return Err(UltError::Decode(format!(
                "unexpected common header length: {}",
                common_header_len
            )));
        }

        let mut rest = &buffer[pos..];
        let checksum_alg = if version_has_checksum(&server_version) {
            // 末尾: checksum_alg (1 byte) + crc32 (4 bytes)
            if rest.len() < 1 + BINLOG_CHECKSUM_LEN {
                return Err(UltError::Decode(String::from(
                    "format description event missing checksum footer",
                )));
            }
            let alg_byte = rest[rest.len() - 1 - BINLOG_CHECKSUM_LEN];
            rest = &rest[..rest.len() - 1 - BINLOG_CHECKSUM_LEN];

            ChecksumAlg::try_from(alg_byte)
                .map_err(|_| UltError::Decode(format!("unknown checksum algorithm: {}", alg_byte)))?
        } else {
            ChecksumAlg::Off
        };

        if rest.is_empty() {
            return Err(UltError::Decode(String::from(
                "format description event has empty post-header table",
            )));
        }

        Ok(FormatDescriptionEvent {
            binlog_version,
            server_version,
            create_timestamp,
            common_header_len,
            post_header_len: rest.to_vec(),
            checksum_alg,
        })
    }

    /// 测试与缺省路径共用的构造器
    pub fn with_checksum(checksum_alg: ChecksumAlg) -> Self {
        FormatDescriptionEvent {
            checksum_alg,
            ..Default::default()
        }
    }
}
