use std::collections::BTreeMap;
use std::env;
use std::fs;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::err::{UltError, UltResult};

pub const DEFAULT_DB_PORT: u16 = 3306;
pub const DEFAULT_BINLOG_PATH: &str = "/var/lib/mysql";
pub const DEFAULT_BINLOG_INDEX: &str = "mysql-bin.index";

/// 配置文件 (JSON)。缺省字段由环境变量补充:
/// `BINLOG_PATH` / `DB_HOST` / `DB_PORT` / `DB_USER` / `DB_PASS`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UltraverseConfig {
    pub state_log: StateLogConfig,

    pub key_columns: Vec<String>,

    pub database: DatabaseConfig,

    #[serde(default)]
    pub binlog: BinlogConfig,

    #[serde(default)]
    pub column_aliases: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub statelogd: StatelogdConfig,

    #[serde(default)]
    pub state_change: StateChangeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateLogConfig {
    #[serde(default = "default_state_log_path")]
    pub path: String,

    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: Option<u16>,

    pub name: String,

    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinlogConfig {
    /// binlog 文件所在目录
    pub path: Option<String>,

    #[serde(default = "default_binlog_index")]
    pub index_name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatelogdConfig {
    #[serde(default)]
    pub thread_count: u32,

    #[serde(default)]
    pub oneshot_mode: bool,

    pub procedure_log_path: Option<String>,

    #[serde(default)]
    pub development_flags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangeConfig {
    #[serde(default)]
    pub thread_count: u32,

    pub backup_file: Option<String>,

    #[serde(default)]
    pub keep_intermediate_database: bool,

    #[serde(default = "default_range_comparison_method")]
    pub range_comparison_method: String,
}

fn default_state_log_path() -> String {
    String::from(".")
}

fn default_binlog_index() -> String {
    String::from(DEFAULT_BINLOG_INDEX)
}

fn default_range_comparison_method() -> String {
    String::from("eqonly")
}

impl Default for StateChangeConfig {
    fn default() -> Self {
        StateChangeConfig {
            thread_count: 0,
            backup_file: None,
            keep_intermediate_database: false,
            range_comparison_method: default_range_comparison_method(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

impl UltraverseConfig {
    pub fn load_from_file(path: &str) -> UltResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| UltError::Config(format!("failed to open config file {}: {}", path, e)))?;

        Self::load_from_str(&content)
    }

    pub fn load_from_str(json_str: &str) -> UltResult<Self> {
        let mut config: UltraverseConfig = serde_json::from_str(json_str)
            .map_err(|e| UltError::Config(format!("failed to parse config JSON: {}", e)))?;

        config.apply_env_fallbacks()?;
        config.validate()?;

        Ok(config)
    }

    /// 仅当 JSON 字段缺省时才读取环境变量
    fn apply_env_fallbacks(&mut self) -> UltResult<()> {
        if self.binlog.path.is_none() {
            self.binlog.path = env_string("BINLOG_PATH");
        }

        if self.database.host.is_none() {
            self.database.host = env_string("DB_HOST");
        }
        if self.database.port.is_none() {
            if let Some(port) = env_string("DB_PORT") {
                let parsed = port
                    .parse::<u16>()
                    .map_err(|_| UltError::Config(String::from("DB_PORT must be an integer")))?;
                self.database.port = Some(parsed);
            }
        }
        if self.database.username.is_none() {
            self.database.username = env_string("DB_USER");
        }
        if self.database.password.is_none() {
            self.database.password = env_string("DB_PASS");
        }

        Ok(())
    }

    fn validate(&self) -> UltResult<()> {
        if self.state_log.name.is_empty() {
            return Err(UltError::Config(String::from("missing required field: stateLog.name")));
        }

        if self.key_columns.is_empty() {
            return Err(UltError::Config(String::from(
                "keyColumns must contain at least one entry",
            )));
        }

        if self.database.name.is_empty() {
            return Err(UltError::Config(String::from("missing required field: database.name")));
        }

        match self.state_change.range_comparison_method.as_str() {
            "intersect" | "eqonly" => {}
            other => {
                return Err(UltError::Config(format!(
                    "stateChange.rangeComparisonMethod must be 'intersect' or 'eqonly', got '{}'",
                    other
                )));
            }
        }

        if let Some(password) = self.database.password.as_ref() {
            if !password.is_empty() {
                warn!("database.password is stored in plain text in config JSON");
            }
        }

        Ok(())
    }

    pub fn db_host(&self) -> &str {
        self.database.host.as_deref().unwrap_or("")
    }

    pub fn db_port(&self) -> u16 {
        self.database.port.unwrap_or(DEFAULT_DB_PORT)
    }

    pub fn db_username(&self) -> &str {
        self.database.username.as_deref().unwrap_or("")
    }

    pub fn db_password(&self) -> &str {
        self.database.password.as_deref().unwrap_or("")
    }

    pub fn binlog_path(&self) -> &str {
        self.binlog.path.as_deref().unwrap_or(DEFAULT_BINLOG_PATH)
    }
}
