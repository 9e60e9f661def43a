use std::collections::{HashMap, HashSet};

use crate::cluster::naming_history::NamingHistory;

/// 解析后的外键: 两端都是当前表名 (小写)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub from_table: String,
    pub from_column: String,

    pub to_table: String,
    pub to_column: String,
}

impl ForeignKey {
    pub fn new(from_table: &str, from_column: &str, to_table: &str, to_column: &str) -> Self {
        ForeignKey {
            from_table: from_table.to_string(),
            from_column: from_column.to_string(),
            to_table: to_table.to_string(),
            to_column: to_column.to_string(),
        }
    }
}

pub type TableId = usize;

/// state change 过程中的共享上下文。
/// 调用方 (StateChanger) 用单把互斥锁保护整个结构。
///
/// 表命名历史放在以 TableId 为下标的 arena 里, 不做共享所有权。
#[derive(Debug, Default)]
pub struct StateChangeContext {
    tables: Vec<NamingHistory>,

    pub primary_keys: HashSet<String>,
    pub foreign_keys: Vec<ForeignKey>,

    pub auto_increments: HashMap<String, i64>,
}

impl StateChangeContext {
    pub fn new() -> Self {
        StateChangeContext::default()
    }

    /// `when` 时刻叫 `table_name` 的表。没有命中时登记一个新表。
    pub fn find_table(&mut self, table_name: &str, when: u64) -> TableId {
        if let Some(index) = self
            .tables
            .iter()
            .position(|history| history.matches(table_name, when))
        {
            return index;
        }

        self.tables.push(NamingHistory::new(table_name));
        self.tables.len() - 1
    }

    pub fn table(&self, id: TableId) -> &NamingHistory {
        &self.tables[id]
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut NamingHistory {
        &mut self.tables[id]
    }

    pub fn tables(&self) -> &[NamingHistory] {
        &self.tables
    }
}

#[cfg(test)]
mod test {
    use super::StateChangeContext;

    #[test]
    fn test_find_table_registers_once() {
        let mut context = StateChangeContext::new();

        let users = context.find_table("users", 0);
        assert_eq!(context.find_table("users", 100), users);
        assert_eq!(context.tables().len(), 1);

        let orders = context.find_table("orders", 0);
        assert_ne!(users, orders);
        assert_eq!(context.tables().len(), 2);
    }

    #[test]
    fn test_find_table_honors_rename_history() {
        let mut context = StateChangeContext::new();

        let id = context.find_table("users", 0);
        context.table_mut(id).add_rename_history("members", 100);

        // rename 之前的名字在旧时间点仍然命中同一个表
        assert_eq!(context.find_table("users", 50), id);
        assert_eq!(context.find_table("members", 150), id);

        // rename 之后旧名字是另一张表
        let stale = context.find_table("users", 150);
        assert_ne!(stale, id);
    }
}
