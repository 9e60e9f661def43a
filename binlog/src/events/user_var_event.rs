use num_enum::TryFromPrimitive;
use serde::Serialize;

use common::err::{UltError, UltResult};

use crate::utils::{read_u32_le, read_u8, take_bytes};

/// Item_result 的取值
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum UserVarType {
    String = 0,
    Real = 1,
    Int = 2,
    /// ROW_RESULT, binlog 中不会出现
    Row = 3,
    Decimal = 4,
}

const UNSIGNED_F: u8 = 0x01;

/// USER_VAR_EVENT
///
/// +----------------------------------+
/// | name_length        0 : 4         |
/// | name               4 : name_len  |
/// | is_null                : 1       |
/// +----------------------------------+
/// is_null == 0 时继续:
/// | type : 1 | charset : 4 | value_length : 4 | value | flags : 1 |
#[derive(Debug, Serialize, Clone)]
pub struct UserVarEvent {
    pub name: String,
    pub value_type: UserVarType,
    pub is_null: bool,
    pub is_unsigned: bool,
    pub charset: u32,
    /// 原始字节。REAL/INT 是8字节小端, DECIMAL 是 packed decimal
    pub value: Vec<u8>,
    pub timestamp: u64,
}

impl UserVarEvent {
    pub fn parse(body: &[u8], timestamp: u64) -> UltResult<UserVarEvent> {
        let mut pos = 0;

        let name_length = read_u32_le(body, &mut pos)? as usize;
        let name = String::from_utf8_lossy(take_bytes(body, &mut pos, name_length)?).into_owned();
        let is_null = read_u8(body, &mut pos)? != 0;

        if is_null {
            return Ok(UserVarEvent {
                name,
                value_type: UserVarType::String,
                is_null,
                is_unsigned: false,
                charset: 0,
                value: vec![],
                timestamp,
            });
        }

        let raw_type = read_u8(body, &mut pos)?;
        let value_type = UserVarType::try_from(raw_type)
            .map_err(|_| UltError::Decode(format!("unknown user var type: {}", raw_type)))?;

        let charset = read_u32_le(body, &mut pos)?;
        let value_length = read_u32_le(body, &mut pos)? as usize;
        let value = take_bytes(body, &mut pos, value_length)?.to_vec();

        // 5.6.4 之后追加的 flags 字节
        let is_unsigned = if pos < body.len() {
            (read_u8(body, &mut pos)? & UNSIGNED_F) != 0
        } else {
            false
        };

        Ok(UserVarEvent {
            name,
            value_type,
            is_null,
            is_unsigned,
            charset,
            value,
            timestamp,
        })
    }
}

#[cfg(test)]
mod test {
    use super::{UserVarEvent, UserVarType};

    pub(crate) fn build_user_var_body(name: &str, value: &[u8], value_type: u8, flags: u8) -> Vec<u8> {
        let mut body = vec![];
        body.extend_from_slice(&(name.len() as u32).to_le_bytes());
        body.extend_from_slice(name.as_bytes());
        body.push(0); // is_null = false
        body.push(value_type);
        body.extend_from_slice(&33u32.to_le_bytes()); // charset
        body.extend_from_slice(&(value.len() as u32).to_le_bytes());
        body.extend_from_slice(value);
        body.push(flags);
        body
    }

    #[test]
    fn test_parse_int() {
        let body = build_user_var_body("uid", &42u64.to_le_bytes(), 2, 1);
        let event = UserVarEvent::parse(&body, 1).unwrap();

        assert_eq!(event.name, "uid");
        assert_eq!(event.value_type, UserVarType::Int);
        assert!(event.is_unsigned);
        assert!(!event.is_null);
        assert_eq!(event.value, 42u64.to_le_bytes());
    }

    #[test]
    fn test_parse_null() {
        let mut body = vec![];
        body.extend_from_slice(&3u32.to_le_bytes());
        body.extend_from_slice(b"foo");
        body.push(1);

        let event = UserVarEvent::parse(&body, 1).unwrap();
        assert!(event.is_null);
        assert!(event.value.is_empty());
    }
}
