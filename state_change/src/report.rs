use std::fs;

use serde::{Deserialize, Serialize};

use common::err::{UltError, UltResult};
use state::Gid;

/// 一次 state change 运行的 JSON 报告
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateChangeReport {
    pub action: String,

    pub intermediate_db_name: String,

    /// 备份导入耗时 (秒)
    pub sql_load_time: f64,
    /// 主阶段耗时 (秒)
    pub execution_time: f64,

    pub replayed_queries: u64,
    pub replayed_transactions: u64,
    pub failed_transactions: u64,

    pub rollback_gids: Vec<Gid>,
    pub affected_gids: Vec<Gid>,
}

impl StateChangeReport {
    pub fn new(action: &str) -> Self {
        StateChangeReport {
            action: action.to_string(),
            ..Default::default()
        }
    }

    pub fn write_to_json(&self, path: &str) -> UltResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| UltError::String(format!("failed to write report {}: {}", path, e)))
    }
}
