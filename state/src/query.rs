use std::collections::{BTreeSet, HashMap};

use bitflags::bitflags;
use num_enum::TryFromPrimitive;

use common::utils::replace_all;

use crate::hash::StateHash;
use crate::item::StateItem;

/// `table.column` 全名集合
pub type ColumnSet = BTreeSet<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum QueryType {
    Unknown = 0,

    Create = 1,
    Drop = 2,
    Alter = 3,
    Truncate = 4,
    Rename = 5,

    Select = 6,
    Insert = 7,
    Update = 8,
    Delete = 9,
}

impl Default for QueryType {
    fn default() -> Self {
        QueryType::Unknown
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QueryFlags: u8 {
        const IS_IGNORABLE                 = 0b0000_0001;
        const IS_DDL                       = 0b0000_0010;

        const IS_PROCCALL_RECOVERED_QUERY  = 0b0000_1000;
        const IS_PROCCALL_QUERY            = 0b0001_0000;

        /// multi-row event 的后续分片
        const IS_CONTINUOUS                = 0b1000_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum UserVarValueType {
    String = 0,
    Real = 1,
    Int = 2,
    Decimal = 3,
}

impl Default for UserVarValueType {
    fn default() -> Self {
        UserVarValueType::String
    }
}

/// binlog USER_VAR_EVENT 捕获的用户变量
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserVar {
    pub name: String,
    pub value_type: UserVarValueType,
    pub is_null: bool,
    pub is_unsigned: bool,
    pub charset: u32,
    /// 原始字节 (REAL/INT 为 8 字节小端, DECIMAL 为 packed decimal)
    pub value: Vec<u8>,
}

/// 语句重放前需要恢复的侧信道状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementContext {
    pub has_last_insert_id: bool,
    pub last_insert_id: u64,

    pub has_insert_id: bool,
    pub insert_id: u64,

    pub has_rand_seed: bool,
    pub rand_seed1: u64,
    pub rand_seed2: u64,

    pub user_vars: Vec<UserVar>,
}

impl StatementContext {
    pub fn is_empty(&self) -> bool {
        !self.has_last_insert_id && !self.has_insert_id && !self.has_rand_seed && self.user_vars.is_empty()
    }

    pub fn clear(&mut self) {
        *self = StatementContext::default();
    }
}

/// state log 中的单条 SQL 语句记录
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub query_type: QueryType,
    pub timestamp: u64,

    pub database: String,
    pub statement: String,

    pub flags: QueryFlags,
    pub affected_rows: u32,

    /// 表名 → 修改前的内容哈希 (仅行级数据可用时)
    pub before_hash: HashMap<String, StateHash>,
    pub after_hash: HashMap<String, StateHash>,

    pub read_set: Vec<StateItem>,
    pub write_set: Vec<StateItem>,
    /// row event 捕获的占位变量绑定
    pub var_map: Vec<StateItem>,

    pub read_columns: ColumnSet,
    pub write_columns: ColumnSet,

    pub statement_context: StatementContext,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn is_ddl(&self) -> bool {
        self.flags.contains(QueryFlags::IS_DDL)
    }

    pub fn is_proc_call_query(&self) -> bool {
        self.flags.contains(QueryFlags::IS_PROCCALL_QUERY)
    }

    pub fn has_statement_context(&self) -> bool {
        !self.statement_context.is_empty()
    }

    pub fn is_after_hash_present(&self, table_name: &str) -> bool {
        self.after_hash.contains_key(table_name)
    }

    /// 把变量绑定代回语句文本 (诊断输出用)
    pub fn var_mapped_statement(&self, variable_set: &[StateItem]) -> String {
        let mut statement = self.statement.clone();

        for var in variable_set.iter().chain(self.var_map.iter()) {
            let value = match var.data_list.first() {
                Some(value) => value.to_string(),
                None => continue,
            };
            statement = replace_all(&statement, &var.name, &value);
        }

        statement
    }
}
