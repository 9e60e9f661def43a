use std::collections::HashSet;
use std::fs;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{error, info, warn};

use common::err::{UltError, UltResult};

use state::query::QueryFlags;
use state::transaction::Transaction;
use state::Gid;

use crate::db::DbHandle;
use crate::report::StateChangeReport;

use super::{OperationMode, StateChanger};

impl StateChanger {
    /// 全量重放: 中间库 ← (备份) + state log 的全部非 rollback 事务
    pub fn full_replay(&mut self) -> UltResult<()> {
        self.mode = OperationMode::FullReplay;

        let mut report = StateChangeReport::new("full-replay");
        report.intermediate_db_name = self.intermediate_db_name.clone();
        report.rollback_gids = self.plan.rollback_gids().clone();

        self.create_intermediate_db()?;

        if !self.plan.db_dump_path().is_empty() {
            let load_start = Instant::now();
            self.load_backup(&self.intermediate_db_name.clone(), &self.plan.db_dump_path().clone())?;

            {
                let mut lease = self.pool.take()?;
                self.update_primary_keys(lease.as_mut(), 0)?;
                self.update_foreign_keys(lease.as_mut(), 0)?;
            }

            let elapsed = load_start.elapsed().as_secs_f64();
            info!("LOAD BACKUP END: {}s elapsed", elapsed);
            report.sql_load_time = elapsed;
        } else {
            warn!("database dump file is not specified!");
            warn!("- this may lead to unexpected result");
        }

        let rollback: HashSet<Gid> = self.plan.rollback_gids().iter().copied().collect();

        let main_start = Instant::now();
        self.replay_state_log(&rollback, &mut report)?;
        report.execution_time = main_start.elapsed().as_secs_f64();

        info!("== FULL REPLAY FINISHED ==");
        info!(
            "NEXT STEP:\n    - RENAME DATABASE: {} to {}",
            self.intermediate_db_name,
            self.plan.db_name()
        );
        info!("total {} queries replayed", report.replayed_queries);
        info!("main phase {}s", report.execution_time);

        if !self.plan.report_path().is_empty() {
            report.write_to_json(self.plan.report_path())?;
        }

        if *self.plan.drop_intermediate_db() {
            self.drop_intermediate_db()?;
        }

        Ok(())
    }

    /// prepare() 写出的 plan 文件驱动的重放
    pub fn replay(&mut self) -> UltResult<()> {
        self.mode = OperationMode::Replay;

        let plan_file = self.read_plan_file()?;

        let mut report = StateChangeReport::new("replay");
        report.intermediate_db_name = self.intermediate_db_name.clone();
        report.rollback_gids = plan_file.rollback_gids.clone();
        report.affected_gids = plan_file.affected_gids.clone();

        self.create_intermediate_db()?;

        if !self.plan.db_dump_path().is_empty() {
            let load_start = Instant::now();
            self.load_backup(&self.intermediate_db_name.clone(), &self.plan.db_dump_path().clone())?;

            {
                let mut lease = self.pool.take()?;
                self.update_primary_keys(lease.as_mut(), 0)?;
                self.update_foreign_keys(lease.as_mut(), 0)?;
            }

            report.sql_load_time = load_start.elapsed().as_secs_f64();
        }

        let mut rollback: HashSet<Gid> = self.plan.rollback_gids().iter().copied().collect();
        rollback.extend(plan_file.rollback_gids.iter().copied());

        let main_start = Instant::now();
        self.replay_state_log(&rollback, &mut report)?;
        report.execution_time = main_start.elapsed().as_secs_f64();

        info!("total {} queries replayed", report.replayed_queries);

        if !self.plan.report_path().is_empty() {
            report.write_to_json(self.plan.report_path())?;
        }

        if *self.plan.drop_intermediate_db() {
            self.drop_intermediate_db()?;
        }

        Ok(())
    }

    /// 主循环: GID 顺序迭代 state log, 窗口/skip/rollback 过滤,
    /// prepend 的用户 SQL 在对应 gid 之前执行。
    pub(crate) fn replay_state_log(
        &mut self,
        rollback_gids: &HashSet<Gid>,
        report: &mut StateChangeReport,
    ) -> UltResult<()> {
        info!("opening state log");
        self.reader.open()?;

        if let Some(replay_from) = *self.plan.replay_from_gid() {
            self.reader.seek_gid(replay_from)?;
        }

        while self.reader.next_header() {
            let header = *self.reader.txn_header().unwrap();
            let gid = header.gid;

            if !self.reader.next_transaction() {
                // body 解析失败时告警后继续下一条
                continue;
            }
            let transaction = self.reader.take_txn_body().unwrap();

            if !self.plan.is_in_gid_window(gid) {
                continue;
            }
            if self.plan.is_skip_gid(gid) {
                continue;
            }

            if let Some(sql_file) = self.plan.user_queries().get(&gid).cloned() {
                self.execute_user_sql(&sql_file)?;
            }

            if rollback_gids.contains(&gid) {
                info!("skipping rollback transaction #{}", gid);
                continue;
            }

            if self.replay_transaction(&transaction) {
                report.replayed_transactions += 1;
            } else {
                report.failed_transactions += 1;
            }
        }

        self.reader.close();
        report.replayed_queries = self.replayed_queries.load(Ordering::Relaxed);

        Ok(())
    }

    /// 单事务: BEGIN → 逐语句 (语句上下文 + 语句) → COMMIT。
    /// 语句失败 ROLLBACK 本事务, 返回 false, 整体继续。
    fn replay_transaction(&self, transaction: &Transaction) -> bool {
        let mut lease = match self.pool.take() {
            Ok(lease) => lease,
            Err(e) => {
                error!("cannot lease database handle: {}", e);
                return false;
            }
        };
        let handle = lease.as_mut();

        if self.exec_checked(handle, &format!("USE {}", self.intermediate_db_name)).is_err() {
            return false;
        }
        if self.exec_checked(handle, "START TRANSACTION").is_err() {
            return false;
        }

        let is_procedure_call = transaction.is_procedure_call();

        for query in transaction.queries() {
            let is_proc_call_query = query.flags.contains(QueryFlags::IS_PROCCALL_QUERY);

            // procedure 事务只重放合成的 CALL; 恢复出来的 SELECT 等兄弟语句跳过
            if is_procedure_call && !is_proc_call_query {
                continue;
            }

            if let Err(e) = self.apply_statement_context(handle, query) {
                error!("cannot apply statement context: {}", e);
                let _ = self.exec_checked(handle, "ROLLBACK");
                return false;
            }

            let statement = query.statement.as_str();
            if !*self.plan.execute_replace_query() && statement.trim_start().to_ascii_uppercase().starts_with("REPLACE") {
                info!("replace query (manual run required): {}", statement);
                continue;
            }

            if let Err(e) = self.exec(handle, statement) {
                error!("query execution failed: {}", e);
                let _ = self.exec_checked(handle, "ROLLBACK");
                return false;
            }

            // CALL 返回的 result 不消费会让连接失去同步
            if handle.consume_results().is_err() {
                let _ = self.exec_checked(handle, "ROLLBACK");
                return false;
            }

            self.replayed_queries.fetch_add(1, Ordering::Relaxed);
        }

        self.exec_checked(handle, "COMMIT").is_ok()
    }

    fn exec_checked(&self, handle: &mut dyn DbHandle, query: &str) -> UltResult<()> {
        if let Err(e) = self.exec(handle, query) {
            error!("query execution failed: {}", e);
            return Err(e);
        }
        Ok(())
    }

    /// prepend 的用户 SQL 文件: 按 ';' 粗切, 自成一个事务
    fn execute_user_sql(&self, sql_file: &str) -> UltResult<()> {
        info!("executing user queries from {}", sql_file);

        let content = fs::read_to_string(sql_file)
            .map_err(|e| UltError::String(format!("cannot open user sql file {}: {}", sql_file, e)))?;

        let mut lease = self.pool.take()?;
        let handle = lease.as_mut();

        self.exec_checked(handle, &format!("USE {}", self.intermediate_db_name))?;
        self.exec_checked(handle, "START TRANSACTION")?;

        for statement in content.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }

            if let Err(e) = self.exec(handle, statement) {
                error!("user query failed, rolling back: {}", e);
                let _ = self.exec_checked(handle, "ROLLBACK");
                return Err(e);
            }

            self.replayed_queries.fetch_add(1, Ordering::Relaxed);
        }

        self.exec_checked(handle, "COMMIT")
    }
}

#[cfg(test)]
mod test {
    use state::data::StateData;
    use state::item::StateItem;
    use state::query::{Query, QueryFlags};
    use state::statelog::StateLogWriter;
    use state::transaction::{Transaction, TransactionFlags};

    use crate::changer::test::recording_pool;
    use crate::changer::StateChanger;
    use crate::plan::StateChangePlan;
    use crate::report::StateChangeReport;

    fn temp_dir(tag: &str) -> String {
        let dir = std::env::temp_dir().join(format!("ult_replay_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.to_str().unwrap().to_string()
    }

    fn dml_transaction(gid: u64, statement: &str) -> Transaction {
        let mut transaction = Transaction::new();
        transaction.gid = gid;
        transaction.timestamp = 1666000000;

        let mut query = Query::new();
        query.statement = statement.to_string();
        query.write_set.push(StateItem::eq_item("t.id", StateData::Int(gid as i64)));
        transaction.push(query);

        transaction
    }

    fn write_log(dir: &str, transactions: &[Transaction]) {
        let mut writer = StateLogWriter::new(dir, "shop");
        writer.open(false).unwrap();
        for transaction in transactions {
            writer.write_transaction(transaction).unwrap();
        }
        writer.close().unwrap();
    }

    fn make_changer(dir: &str) -> (StateChanger, std::sync::Arc<std::sync::Mutex<Vec<String>>>) {
        let (pool, statements) = recording_pool();

        let mut plan = StateChangePlan::new();
        plan.set_state_log_path(dir.to_string());
        plan.set_state_log_name(String::from("shop"));
        plan.set_db_name(String::from("shop"));

        (StateChanger::new(pool, plan), statements)
    }

    #[test]
    fn test_replay_skips_rollback_gids() {
        let dir = temp_dir("rollback");
        write_log(
            &dir,
            &[
                dml_transaction(0, "INSERT INTO t VALUES (0)"),
                dml_transaction(1, "INSERT INTO t VALUES (1)"),
                dml_transaction(2, "INSERT INTO t VALUES (2)"),
            ],
        );

        let (mut changer, statements) = make_changer(&dir);

        let rollback = [1u64].into_iter().collect();
        let mut report = StateChangeReport::new("test");
        changer.replay_state_log(&rollback, &mut report).unwrap();

        let recorded = statements.lock().unwrap().clone();
        assert!(recorded.iter().any(|s| s == "INSERT INTO t VALUES (0)"));
        assert!(!recorded.iter().any(|s| s == "INSERT INTO t VALUES (1)"));
        assert!(recorded.iter().any(|s| s == "INSERT INTO t VALUES (2)"));

        assert_eq!(report.replayed_transactions, 2);
        assert_eq!(report.replayed_queries, 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_replay_procedure_call_transaction() {
        let dir = temp_dir("proc");

        let mut transaction = Transaction::new();
        transaction.gid = 0;
        transaction.flags = TransactionFlags::IS_PROCEDURE_CALL;

        let mut recorded_query = Query::new();
        recorded_query.statement = String::from("INSERT INTO orders VALUES (1)");
        transaction.push(recorded_query);

        let mut recovered = Query::new();
        recovered.statement = String::from("SELECT stock FROM products");
        recovered.flags |= QueryFlags::IS_PROCCALL_RECOVERED_QUERY;
        transaction.push(recovered);

        let mut call = Query::new();
        call.statement = String::from("CALL place_order(42)");
        call.flags |= QueryFlags::IS_PROCCALL_QUERY;
        transaction.push(call);

        write_log(&dir, &[transaction]);

        let (mut changer, statements) = make_changer(&dir);
        let mut report = StateChangeReport::new("test");
        changer.replay_state_log(&Default::default(), &mut report).unwrap();

        let recorded = statements.lock().unwrap().clone();
        // procedure 事务: 只有 CALL 会被执行
        assert!(recorded.iter().any(|s| s == "CALL place_order(42)"));
        assert!(!recorded.iter().any(|s| s.contains("INSERT INTO orders")));
        assert!(!recorded.iter().any(|s| s.contains("SELECT stock")));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_replay_honors_gid_window_and_skip() {
        let dir = temp_dir("window");
        write_log(
            &dir,
            &[
                dml_transaction(0, "INSERT INTO t VALUES (0)"),
                dml_transaction(1, "INSERT INTO t VALUES (1)"),
                dml_transaction(2, "INSERT INTO t VALUES (2)"),
                dml_transaction(3, "INSERT INTO t VALUES (3)"),
            ],
        );

        let (mut changer, statements) = make_changer(&dir);
        changer.plan.set_start_gid(Some(1));
        changer.plan.set_end_gid(Some(2));
        changer.plan.skip_gids_mut().push(2);

        let mut report = StateChangeReport::new("test");
        changer.replay_state_log(&Default::default(), &mut report).unwrap();

        let recorded = statements.lock().unwrap().clone();
        assert!(!recorded.iter().any(|s| s.contains("VALUES (0)")));
        assert!(recorded.iter().any(|s| s.contains("VALUES (1)")));
        assert!(!recorded.iter().any(|s| s.contains("VALUES (2)")));
        assert!(!recorded.iter().any(|s| s.contains("VALUES (3)")));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_replay_prepends_user_sql() {
        let dir = temp_dir("prepend");
        write_log(
            &dir,
            &[
                dml_transaction(0, "INSERT INTO t VALUES (0)"),
                dml_transaction(1, "INSERT INTO t VALUES (1)"),
            ],
        );

        let sql_path = format!("{}/prepend.sql", dir);
        std::fs::write(&sql_path, "UPDATE t SET v = 99 WHERE id = 0;\n").unwrap();

        let (mut changer, statements) = make_changer(&dir);
        changer.plan.user_queries_mut().insert(1, sql_path);

        let mut report = StateChangeReport::new("test");
        changer.replay_state_log(&Default::default(), &mut report).unwrap();

        let recorded = statements.lock().unwrap().clone();
        let prepend_pos = recorded.iter().position(|s| s.contains("SET v = 99")).unwrap();
        let second_pos = recorded.iter().position(|s| s.contains("VALUES (1)")).unwrap();
        assert!(prepend_pos < second_pos);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
