//! commit 标记之间的事件折叠: row event → Query, XID → Transaction。

use std::collections::HashMap;

use tracing::warn;

use binlog::column::ColumnValue;
use binlog::events::{
    IntVarEvent, IntVarType, QueryEvent, RandEvent, RowChange, RowEvent, RowEventType, RowQueryEvent,
    TableMapEvent, TransactionIdEvent, UserVarEvent, UserVarType,
};
use common::err::UltResult;
use common::utils::to_lower;
use state::data::StateData;
use state::hash::StateHash;
use state::item::StateItem;
use state::parse::{parse_ddl_fallback, parse_query};
use state::proc::{is_procedure_hint, ProcCall, ProcMatcher};
use state::query::{Query, QueryFlags, QueryType, StatementContext, UserVar, UserVarValueType};
use state::transaction::{Transaction, TransactionFlags};
use state::Gid;

pub const PROCEDURE_HINT_TABLE: &str = "__ULTRAVERSE_PROCEDURE_HINT";

/// 累积中的 statement context。
/// INTVAR/RAND/USER_VAR 作用于紧随其后的那一条语句。
#[derive(Debug, Default)]
pub struct PendingStatementContext {
    context: StatementContext,
}

impl PendingStatementContext {
    pub fn apply_int_var(&mut self, event: &IntVarEvent) {
        match event.int_var_type {
            IntVarType::LastInsertId => {
                self.context.has_last_insert_id = true;
                self.context.last_insert_id = event.value;
            }
            IntVarType::InsertId => {
                self.context.has_insert_id = true;
                self.context.insert_id = event.value;
            }
            IntVarType::Invalid => {}
        }
    }

    pub fn apply_rand(&mut self, event: &RandEvent) {
        self.context.has_rand_seed = true;
        self.context.rand_seed1 = event.seed1;
        self.context.rand_seed2 = event.seed2;
    }

    pub fn apply_user_var(&mut self, event: &UserVarEvent) {
        let value_type = match event.value_type {
            UserVarType::String => UserVarValueType::String,
            UserVarType::Real => UserVarValueType::Real,
            UserVarType::Int => UserVarValueType::Int,
            UserVarType::Decimal => UserVarValueType::Decimal,
            UserVarType::Row => UserVarValueType::String,
        };

        self.context.user_vars.push(UserVar {
            name: event.name.clone(),
            value_type,
            is_null: event.is_null,
            is_unsigned: event.is_unsigned,
            charset: event.charset,
            value: event.value.clone(),
        });
    }

    /// 取走并清空
    pub fn take(&mut self) -> StatementContext {
        std::mem::take(&mut self.context)
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }
}

/// 两个 commit 标记之间累积的内容
pub struct PendingTransaction {
    queries: Vec<Query>,
    table_maps: HashMap<u64, TableMapEvent>,
    proc_call: Option<ProcCall>,
    tid_event: Option<TransactionIdEvent>,
    statement_context: PendingStatementContext,
}

impl PendingTransaction {
    pub fn new() -> Self {
        PendingTransaction {
            queries: vec![],
            table_maps: HashMap::new(),
            proc_call: None,
            tid_event: None,
            statement_context: PendingStatementContext::default(),
        }
    }

    pub fn push_query(&mut self, mut query: Query) {
        if !self.statement_context.is_empty() {
            query.statement_context = self.statement_context.take();
        }
        self.queries.push(query);
    }

    /// 同名表重新 map 时旧的 table id 作废
    pub fn register_table_map(&mut self, event: TableMapEvent) {
        self.table_maps
            .retain(|_, existing| !(existing.database == event.database && existing.table == event.table));
        self.table_maps.insert(event.table_id, event);
    }

    pub fn table_map(&self, table_id: u64) -> Option<&TableMapEvent> {
        self.table_maps.get(&table_id)
    }

    pub fn set_proc_call(&mut self, proc_call: ProcCall) {
        if self.proc_call.is_some() {
            warn!("multiple procedure hints in one transaction, keeping the first");
            return;
        }
        self.proc_call = Some(proc_call);
    }

    pub fn proc_call(&self) -> Option<&ProcCall> {
        self.proc_call.as_ref()
    }

    pub fn set_tid_event(&mut self, event: TransactionIdEvent) {
        self.tid_event = Some(event);
    }

    pub fn statement_context_mut(&mut self) -> &mut PendingStatementContext {
        &mut self.statement_context
    }

    fn into_parts(self) -> (Vec<Query>, Option<TransactionIdEvent>) {
        (self.queries, self.tid_event)
    }
}

impl Default for PendingTransaction {
    fn default() -> Self {
        PendingTransaction::new()
    }
}

fn column_value_to_data(value: &ColumnValue) -> StateData {
    match value {
        ColumnValue::Null => StateData::Null,
        ColumnValue::SignedInt(v) => StateData::Int(*v),
        ColumnValue::UnsignedInt(v) => StateData::UInt(*v),
        ColumnValue::Float(v) => StateData::Double(*v),
        ColumnValue::String(v) => StateData::String(v.clone()),
        ColumnValue::Bytes(v) => StateData::Bytes(v.clone()),
        ColumnValue::Decimal(v) => StateData::String(v.clone()),
        ColumnValue::DateTime(v) => StateData::UInt(*v),
    }
}

/// row image → `table|v1|v2|...` (StateHash 的记录串)
fn image_record(table: &str, image: &[ColumnValue]) -> Vec<u8> {
    let mut record = table.as_bytes().to_vec();
    for value in image {
        record.push(b'|');
        record.extend_from_slice(value.to_string().as_bytes());
    }
    record
}

/// row event → Query 的折叠器。表内容哈希跨事务累积。
pub struct RowEventFolder {
    state_hashes: HashMap<String, StateHash>,
}

impl RowEventFolder {
    pub fn new() -> Self {
        RowEventFolder {
            state_hashes: HashMap::new(),
        }
    }

    /// DDL 等以 query event 形式到达的语句
    pub fn process_query_event(&mut self, event: &QueryEvent) -> Query {
        let mut query = Query::new();
        query.timestamp = event.timestamp;
        query.database = event.schema.clone();
        query.statement = event.statement.clone();

        let parsed = match parse_query(&event.statement) {
            Ok(parsed) => parsed,
            Err(e) => {
                // HACK: 至少把 write set 捞出来
                warn!("cannot parse statement, using ddl fallback: {}", e);
                parse_ddl_fallback(&event.statement)
            }
        };

        query.query_type = parsed.query_type;
        if parsed.is_ddl {
            query.flags |= QueryFlags::IS_DDL;
        }
        query.read_set = parsed.read_set;
        query.write_set = parsed.write_set;
        query.read_columns = parsed.read_columns;
        query.write_columns = parsed.write_columns;

        query
    }

    /// row event 折叠成 Query 并追加到事务。
    /// 返回值: 命中 procedure hint 时是 hint 的 JSON payload。
    pub fn process_row_event(
        &mut self,
        transaction: &mut PendingTransaction,
        event: &RowEvent,
        row_query: Option<&RowQueryEvent>,
        table_map: &TableMapEvent,
    ) -> UltResult<Option<String>> {
        let rows = event.rows(table_map)?;
        let table = to_lower(&table_map.table);

        let mut query = Query::new();
        query.timestamp = event.timestamp;
        query.database = table_map.database.clone();
        query.affected_rows = rows.len() as u32;
        query.query_type = match event.row_event_type {
            RowEventType::Insert => QueryType::Insert,
            RowEventType::Update => QueryType::Update,
            RowEventType::Delete => QueryType::Delete,
        };

        if !event.is_statement_end() {
            query.flags |= QueryFlags::IS_CONTINUOUS;
        }

        if let Some(row_query) = row_query {
            query.statement = row_query.statement.clone();

            let parsed = match parse_query(&row_query.statement) {
                Ok(parsed) => parsed,
                Err(_) => parse_ddl_fallback(&row_query.statement),
            };
            query.read_set = parsed.read_set;
            query.write_set = parsed.write_set;
            query.read_columns = parsed.read_columns;
            query.write_columns = parsed.write_columns;
        }

        self.fold_row_images(&mut query, &table, table_map, &rows);
        self.update_hashes(&mut query, &table, event.row_event_type, &rows);

        // procedure hint: 载荷在插入行的第一列
        let hint_payload = if table_map.table == PROCEDURE_HINT_TABLE || is_procedure_hint(&query.statement) {
            rows.first()
                .and_then(|row| row.after.as_ref())
                .and_then(|image| image.first())
                .and_then(|value| match value {
                    ColumnValue::String(text) => Some(text.clone()),
                    _ => None,
                })
        } else {
            None
        };

        transaction.push_query(query);

        Ok(hint_payload)
    }

    /// row image → read/write item + 列集合 + var map
    fn fold_row_images(&self, query: &mut Query, table: &str, table_map: &TableMapEvent, rows: &[RowChange]) {
        let column_name = |index: usize| -> String {
            format!("{}.{}", table, to_lower(&table_map.column_names[index]))
        };

        // 列值跨行聚成 IN item
        let mut write_values: HashMap<usize, Vec<StateData>> = HashMap::new();
        let mut read_values: HashMap<usize, Vec<StateData>> = HashMap::new();

        for row in rows {
            if let Some(after) = row.after.as_ref() {
                for (index, value) in after.iter().enumerate() {
                    write_values.entry(index).or_default().push(column_value_to_data(value));
                }
            }
            if let Some(before) = row.before.as_ref() {
                for (index, value) in before.iter().enumerate() {
                    read_values.entry(index).or_default().push(column_value_to_data(value));
                }
            }
        }

        for (index, values) in &write_values {
            let name = column_name(*index);
            query.write_columns.insert(name.clone());
            query.write_set.push(StateItem::in_item(&name, values.iter().cloned()));
        }

        for (index, values) in &read_values {
            let name = column_name(*index);
            query.read_columns.insert(name.clone());
            query.read_set.push(StateItem::in_item(&name, values.iter().cloned()));
        }

        // 首行的绑定值 (原语句里的占位量)
        if let Some(first) = rows.first() {
            let image = first.after.as_ref().or(first.before.as_ref());
            if let Some(image) = image {
                for (index, value) in image.iter().enumerate() {
                    query
                        .var_map
                        .push(StateItem::eq_item(&column_name(index), column_value_to_data(value)));
                }
            }
        }

    }

    /// 表内容哈希: before 镜像做删除, after 镜像做插入。
    /// 同一表的 before_hash 等于上一次记录的 after_hash (跨事务链式)。
    fn update_hashes(&mut self, query: &mut Query, table: &str, row_type: RowEventType, rows: &[RowChange]) {
        let hash = self.state_hashes.entry(table.to_string()).or_default();

        if !hash.is_initialized() {
            if let Err(e) = hash.init() {
                warn!("cannot initialize state hash for {}: {}", table, e);
                return;
            }
        }

        query.before_hash.insert(table.to_string(), hash.clone());

        for row in rows {
            let result = match row_type {
                RowEventType::Insert => row
                    .after
                    .as_ref()
                    .map(|image| hash.insert_record(&image_record(table, image))),
                RowEventType::Delete => row
                    .before
                    .as_ref()
                    .map(|image| hash.delete_record(&image_record(table, image))),
                RowEventType::Update => {
                    let deleted = row
                        .before
                        .as_ref()
                        .map(|image| hash.delete_record(&image_record(table, image)));
                    match deleted {
                        Some(Err(e)) => Some(Err(e)),
                        _ => row
                            .after
                            .as_ref()
                            .map(|image| hash.insert_record(&image_record(table, image))),
                    }
                }
            };

            if let Some(Err(e)) = result {
                warn!("state hash update failed for {}: {}", table, e);
            }
        }

        query.after_hash.insert(table.to_string(), hash.clone());
    }
}

pub fn finalize_plain_transaction(pending: PendingTransaction, gid: Gid) -> Transaction {
    let (queries, tid_event) = pending.into_parts();

    let mut transaction = Transaction::new();
    transaction.gid = gid;

    if let Some(tid_event) = tid_event {
        transaction.xid = tid_event.xid;
        transaction.timestamp = tid_event.timestamp;
    }

    for query in queries {
        transaction.push(query);
    }

    transaction
}

/// procedure 事务收尾: 捕获语句对齐过程体,
/// 缺口处补恢复语句, 末尾追加合成的 CALL。
pub fn finalize_procedure_transaction(
    pending: PendingTransaction,
    proc_call: &ProcCall,
    matcher: &ProcMatcher,
    key_columns: &[Vec<String>],
    gid: Gid,
) -> Transaction {
    let (queries, tid_event) = pending.into_parts();

    let mut transaction = Transaction::new();
    transaction.gid = gid;

    if let Some(tid_event) = tid_event.as_ref() {
        transaction.xid = tid_event.xid;
        transaction.timestamp = tid_event.timestamp;
    }

    let mut prev_index = 0usize;
    let mut first_database = String::new();
    let mut first_timestamp = 0u64;

    for query in queries {
        let hint_column_prefix = format!("{}.", to_lower(PROCEDURE_HINT_TABLE));
        if is_procedure_hint(&query.statement)
            || query
                .write_columns
                .iter()
                .any(|column| column.starts_with(&hint_column_prefix))
        {
            continue;
        }

        if first_database.is_empty() {
            first_database = query.database.clone();
            first_timestamp = query.timestamp;
        }

        match matcher.match_forward(&query.statement, prev_index) {
            Some(index) => {
                // 捕获语句之间缺失的 (通常是 SELECT) 从定义恢复
                for missing in prev_index..index {
                    for mut recovered in matcher.as_query(missing, proc_call, key_columns) {
                        recovered.database = query.database.clone();
                        recovered.timestamp = query.timestamp;
                        recovered.flags = QueryFlags::IS_PROCCALL_RECOVERED_QUERY;
                        transaction.push(recovered);
                    }
                }
                prev_index = index + 1;
            }
            None => {
                warn!("query not matched: {} at index {}", query.statement, prev_index);
            }
        }

        transaction.push(query);
    }

    let mut call_query = Query::new();
    call_query.statement = proc_call.statements.first().cloned().unwrap_or_default();
    call_query.database = first_database;
    call_query.timestamp = first_timestamp;
    call_query.flags = QueryFlags::IS_PROCCALL_QUERY;
    transaction.push(call_query);

    transaction.flags |= TransactionFlags::IS_PROCEDURE_CALL;

    transaction
}

#[cfg(test)]
mod test {
    use binlog::events::{IntVarEvent, IntVarType, RandEvent};
    use state::data::StateData;
    use state::proc::{parse_procedure_hint, ProcMatcher};
    use state::query::{Query, QueryFlags};

    use super::{finalize_procedure_transaction, PendingTransaction};

    const PROCDEF: &str = r#"
    CREATE PROCEDURE place_order(IN uid INT, IN pid INT)
    BEGIN
        INSERT INTO orders (user_id, product_id) VALUES (uid, pid);
        UPDATE products SET stock = stock - 1 WHERE id = pid;
        SELECT stock FROM products WHERE id = pid;
        UPDATE users SET order_count = order_count + 1 WHERE id = uid;
    END
    "#;

    fn captured(statement: &str) -> Query {
        let mut query = Query::new();
        query.database = String::from("shop");
        query.timestamp = 1666000000;
        query.statement = statement.to_string();
        query
    }

    #[test]
    fn test_statement_context_accumulation() {
        let mut pending = PendingTransaction::new();

        pending.statement_context_mut().apply_int_var(&IntVarEvent {
            int_var_type: IntVarType::InsertId,
            value: 42,
            timestamp: 0,
        });
        pending.statement_context_mut().apply_rand(&RandEvent {
            seed1: 1,
            seed2: 2,
            timestamp: 0,
        });

        pending.push_query(captured("INSERT INTO t VALUES (NULL)"));
        // context 只作用于下一条语句
        pending.push_query(captured("INSERT INTO t VALUES (NULL)"));

        let transaction = super::finalize_plain_transaction(pending, 0);
        let queries = transaction.queries();

        assert!(queries[0].statement_context.has_insert_id);
        assert_eq!(queries[0].statement_context.insert_id, 42);
        assert!(queries[0].statement_context.has_rand_seed);
        assert!(!queries[1].has_statement_context());
    }

    /// 过程重建: 捕获到 1,2,4 (SELECT 缺失), 恢复出第 3 条,
    /// 末尾是合成 CALL, 事务带 IS_PROCEDURE_CALL。
    #[test]
    fn test_procedure_reconstruction() {
        let matcher = ProcMatcher::new(PROCDEF);
        let proc_call = parse_procedure_hint(r#"[1, "place_order", 42, 7]"#).unwrap();

        let mut pending = PendingTransaction::new();
        pending.push_query(captured("INSERT INTO orders (user_id, product_id) VALUES (42, 7)"));
        pending.push_query(captured("UPDATE products SET stock = stock - 1 WHERE id = 7"));
        pending.push_query(captured(
            "UPDATE users SET order_count = order_count + 1 WHERE id = 42",
        ));

        let transaction = finalize_procedure_transaction(pending, &proc_call, &matcher, &[], 9);

        assert!(transaction.is_procedure_call());
        assert_eq!(transaction.gid, 9);

        let queries = transaction.queries();
        assert_eq!(queries.len(), 5);

        // 顺序: 1, 2, (恢复的 SELECT), 4, CALL
        assert!(queries[0].statement.starts_with("INSERT INTO orders"));
        assert!(queries[1].statement.starts_with("UPDATE products"));

        assert!(queries[2].flags.contains(QueryFlags::IS_PROCCALL_RECOVERED_QUERY));
        assert!(queries[2].statement.to_ascii_uppercase().starts_with("SELECT"));
        // 形参已经代入
        assert!(queries[2].statement.contains('7'));

        assert!(queries[3].statement.starts_with("UPDATE users"));

        assert!(queries[4].flags.contains(QueryFlags::IS_PROCCALL_QUERY));
        assert_eq!(queries[4].statement, "CALL place_order(42, 7)");
        assert_eq!(queries[4].database, "shop");
    }

    #[test]
    fn test_procedure_hint_roundtrip() {
        let proc_call = parse_procedure_hint(r#"[3, "noop", "x"]"#).unwrap();
        assert_eq!(proc_call.call_id, 3);
        assert_eq!(proc_call.parameters, vec![StateData::from("x")]);
    }
}
