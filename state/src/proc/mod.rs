pub mod log_reader;
pub mod matcher;
pub mod proc_call;

pub use log_reader::ProcLogReader;
pub use matcher::ProcMatcher;
pub use proc_call::{ProcCall, ProcCallHeader};

use common::err::{UltError, UltResult};

use crate::data::StateData;

/// 数据库侧通过这条 INSERT 把 procedure call 信息带进 binlog
pub const PROCEDURE_HINT_PREFIX: &str = "INSERT INTO __ULTRAVERSE_PROCEDURE_HINT";

pub fn is_procedure_hint(statement: &str) -> bool {
    statement.starts_with(PROCEDURE_HINT_PREFIX)
}

/// hint payload: JSON 数组 `[call_id, proc_name, args...]`
pub fn parse_procedure_hint(json_str: &str) -> UltResult<ProcCall> {
    let value: serde_json::Value = serde_json::from_str(json_str)?;
    let array = value
        .as_array()
        .ok_or_else(|| UltError::Parse(String::from("procedure hint is not a JSON array")))?;

    if array.len() < 2 {
        return Err(UltError::Parse(String::from("procedure hint is missing call id / name")));
    }

    let call_id = array[0]
        .as_u64()
        .ok_or_else(|| UltError::Parse(String::from("procedure hint call id is not an integer")))?;
    let proc_name = array[1]
        .as_str()
        .ok_or_else(|| UltError::Parse(String::from("procedure hint name is not a string")))?
        .to_string();

    let mut args = vec![];
    let mut parameters = vec![];

    for element in &array[2..] {
        match element {
            serde_json::Value::String(text) => {
                args.push(format!("'{}'", text));
                parameters.push(StateData::String(text.clone()));
            }
            serde_json::Value::Number(number) => {
                if let Some(value) = number.as_i64() {
                    args.push(value.to_string());
                    parameters.push(StateData::Int(value));
                } else if let Some(value) = number.as_u64() {
                    args.push(value.to_string());
                    parameters.push(StateData::UInt(value));
                } else {
                    let value = number.as_f64().unwrap_or(0.0);
                    args.push(value.to_string());
                    parameters.push(StateData::Double(value));
                }
            }
            serde_json::Value::Null => {
                args.push(String::from("NULL"));
                parameters.push(StateData::Null);
            }
            other => {
                return Err(UltError::Parse(format!(
                    "unsupported type in procedure hint: {}",
                    other
                )));
            }
        }
    }

    let mut proc_call = ProcCall::new(call_id, &proc_name);
    proc_call.statements.push(format!("CALL {}({})", proc_name, args.join(", ")));
    proc_call.parameters = parameters;

    Ok(proc_call)
}
