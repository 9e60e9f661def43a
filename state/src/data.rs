use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

/// 谓词里的字面量标量。
/// alias map 以它为 key, range 以它为端点, 因此需要全序与可哈希。
#[derive(Debug, Clone, Serialize)]
pub enum StateData {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Default for StateData {
    fn default() -> Self {
        StateData::Null
    }
}

impl StateData {
    fn kind_rank(&self) -> u8 {
        match self {
            StateData::Null => 0,
            StateData::Bool(_) | StateData::Int(_) | StateData::UInt(_) | StateData::Double(_) => 1,
            StateData::String(_) => 2,
            StateData::Bytes(_) => 3,
        }
    }

    fn as_integral(&self) -> Option<i128> {
        match self {
            StateData::Bool(value) => Some(*value as i128),
            StateData::Int(value) => Some(*value as i128),
            StateData::UInt(value) => Some(*value as i128),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            StateData::Bool(value) => Some(*value as u8 as f64),
            StateData::Int(value) => Some(*value as f64),
            StateData::UInt(value) => Some(*value as f64),
            StateData::Double(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_int(&self) -> Option<i64> {
        match self {
            StateData::Bool(value) => Some(*value as i64),
            StateData::Int(value) => Some(*value),
            StateData::UInt(value) if *value <= i64::MAX as u64 => Some(*value as i64),
            _ => None,
        }
    }

    pub fn get_uint(&self) -> Option<u64> {
        match self {
            StateData::Bool(value) => Some(*value as u64),
            StateData::Int(value) if *value >= 0 => Some(*value as u64),
            StateData::UInt(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_string(&self) -> Option<&str> {
        match self {
            StateData::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StateData::Null)
    }

    /// alias coercion 用: 非空且全为十进制数字
    pub fn is_decimal_digit_string(&self) -> bool {
        match self {
            StateData::String(value) => !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()),
            _ => false,
        }
    }
}

impl PartialEq for StateData {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for StateData {}

impl PartialOrd for StateData {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StateData {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.kind_rank().cmp(&other.kind_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (StateData::Null, StateData::Null) => Ordering::Equal,
            (StateData::String(a), StateData::String(b)) => a.cmp(b),
            (StateData::Bytes(a), StateData::Bytes(b)) => a.cmp(b),
            (a, b) => {
                // numeric: 整数域内精确比较, double 参与时退到 f64
                if let (Some(a), Some(b)) = (a.as_integral(), b.as_integral()) {
                    return a.cmp(&b);
                }

                let a = a.as_f64().unwrap_or(f64::NAN);
                let b = b.as_f64().unwrap_or(f64::NAN);
                a.total_cmp(&b)
            }
        }
    }
}

impl Hash for StateData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            StateData::Null => {
                0u8.hash(state);
            }
            StateData::Bool(_) | StateData::Int(_) | StateData::UInt(_) => {
                1u8.hash(state);
                self.as_integral().unwrap().hash(state);
            }
            StateData::Double(value) => {
                // 整数值的 double 与同值整数哈希一致 (Eq 一致性)
                if value.fract() == 0.0 && *value >= i128::MIN as f64 && *value <= i128::MAX as f64 {
                    1u8.hash(state);
                    (*value as i128).hash(state);
                } else {
                    2u8.hash(state);
                    value.to_bits().hash(state);
                }
            }
            StateData::String(value) => {
                3u8.hash(state);
                value.hash(state);
            }
            StateData::Bytes(value) => {
                4u8.hash(state);
                value.hash(state);
            }
        }
    }
}

impl fmt::Display for StateData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateData::Null => write!(f, "NULL"),
            StateData::Bool(value) => write!(f, "{}", *value as u8),
            StateData::Int(value) => write!(f, "{}", value),
            StateData::UInt(value) => write!(f, "{}", value),
            StateData::Double(value) => write!(f, "{}", value),
            StateData::String(value) => write!(f, "'{}'", value.replace('\'', "''")),
            StateData::Bytes(value) => write!(f, "0x{}", hex::encode(value)),
        }
    }
}

impl From<i64> for StateData {
    fn from(value: i64) -> Self {
        StateData::Int(value)
    }
}

impl From<u64> for StateData {
    fn from(value: u64) -> Self {
        StateData::UInt(value)
    }
}

impl From<f64> for StateData {
    fn from(value: f64) -> Self {
        StateData::Double(value)
    }
}

impl From<&str> for StateData {
    fn from(value: &str) -> Self {
        StateData::String(value.to_string())
    }
}

impl From<String> for StateData {
    fn from(value: String) -> Self {
        StateData::String(value)
    }
}
