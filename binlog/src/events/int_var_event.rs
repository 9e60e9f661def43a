use num_enum::TryFromPrimitive;
use serde::Serialize;

use common::err::{UltError, UltResult};

use crate::utils::{read_u64_le, read_u8};

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum IntVarType {
    Invalid = 0,
    LastInsertId = 1,
    InsertId = 2,
}

/// INTVAR_EVENT — LAST_INSERT_ID / INSERT_ID 的侧信道值,
/// 作用于紧随其后的语句。
#[derive(Debug, Serialize, Clone)]
pub struct IntVarEvent {
    pub int_var_type: IntVarType,
    pub value: u64,
    pub timestamp: u64,
}

impl IntVarEvent {
    pub fn parse(body: &[u8], timestamp: u64) -> UltResult<IntVarEvent> {
        if body.len() < 9 {
            return Err(UltError::Decode(String::from("intvar event shorter than 9 bytes")));
        }

        let mut pos = 0;
        let raw_type = read_u8(body, &mut pos)?;
        let value = read_u64_le(body, &mut pos)?;

        let int_var_type = IntVarType::try_from(raw_type).unwrap_or(IntVarType::Invalid);

        Ok(IntVarEvent {
            int_var_type,
            value,
            timestamp,
        })
    }
}

#[cfg(test)]
mod test {
    use super::{IntVarEvent, IntVarType};

    #[test]
    fn test_parse() {
        let mut body = vec![2u8];
        body.extend_from_slice(&99u64.to_le_bytes());

        let event = IntVarEvent::parse(&body, 1).unwrap();
        assert_eq!(event.int_var_type, IntVarType::InsertId);
        assert_eq!(event.value, 99);
    }

    #[test]
    fn test_unknown_type_maps_to_invalid() {
        let mut body = vec![9u8];
        body.extend_from_slice(&1u64.to_le_bytes());

        let event = IntVarEvent::parse(&body, 1).unwrap();
        assert_eq!(event.int_var_type, IntVarType::Invalid);
    }
}
