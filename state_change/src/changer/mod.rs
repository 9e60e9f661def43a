pub mod cluster_build;
pub mod prepare;
pub mod replay;

use std::process::{Command, Stdio};
use std::sync::atomic::AtomicU64;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info};

use common::err::{UltError, UltResult};
use common::utils::to_lower;

use state::context::{ForeignKey, StateChangeContext};
use state::query::{Query, UserVar, UserVarValueType};
use state::statelog::{StateClusterStore, StateLogReader};

use crate::db::{DbHandle, DbHandlePool};
use crate::plan::StateChangePlan;

pub const QUERY_TAG_STATECHANGE: &str = "/* STATECHANGE_QUERY */ ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationMode {
    Normal,
    FullReplay,
    Replay,
    MakeCluster,
    Prepare,
}

/// 编排器: 构建 cluster、计算重放计划、驱动中间库。
pub struct StateChanger {
    plan: StateChangePlan,
    pool: DbHandlePool,

    mode: OperationMode,
    intermediate_db_name: String,

    reader: StateLogReader,
    cluster_store: StateClusterStore,

    context: Mutex<StateChangeContext>,
    replayed_queries: AtomicU64,
}

fn hex_encode_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

fn quote_user_var_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('`');
    for ch in name.chars() {
        if ch == '`' {
            out.push('`');
        }
        out.push(ch);
    }
    out.push('`');
    out
}

fn read_u64_le_padded(data: &[u8]) -> u64 {
    let mut value = 0u64;
    for (index, byte) in data.iter().take(8).enumerate() {
        value |= (*byte as u64) << (8 * index);
    }
    value
}

const REAL_SIGNIFICANT_DIGITS: usize = 17;

/// REAL 用户变量: 8 字节小端按 IEEE-754 binary64 解释。
/// 输出 17 位有效数字 (printf `%.17g` 语义):
/// 十进制指数在 [-4, 17) 内用定点表示, 否则用科学计数法, 都去掉尾随零。
fn format_real_value(value: f64) -> String {
    if value == 0.0 {
        return String::from("0");
    }
    if !value.is_finite() {
        return value.to_string();
    }

    // 小数点后 16 位的科学计数法正好是 17 位有效数字, 舍入交给 formatter
    let scientific = format!("{:.*e}", REAL_SIGNIFICANT_DIGITS - 1, value);
    let (mantissa, exponent) = scientific
        .split_once('e')
        .expect("scientific notation always carries an exponent");
    let exponent: i32 = exponent.parse().expect("exponent is numeric");

    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(|ch| ch.is_ascii_digit()).collect();

    let mut out = String::new();
    if negative {
        out.push('-');
    }

    if (-4..REAL_SIGNIFICANT_DIGITS as i32).contains(&exponent) {
        if exponent < 0 {
            out.push_str("0.");
            for _ in 0..(-exponent - 1) {
                out.push('0');
            }
            out.push_str(digits.trim_end_matches('0'));
        } else {
            let point = (exponent + 1) as usize;
            out.push_str(&digits[..point]);

            let fraction = digits[point..].trim_end_matches('0');
            if !fraction.is_empty() {
                out.push('.');
                out.push_str(fraction);
            }
        }
    } else {
        let fraction = digits[1..].trim_end_matches('0');
        out.push_str(&digits[..1]);
        if !fraction.is_empty() {
            out.push('.');
            out.push_str(fraction);
        }

        out.push('e');
        out.push(if exponent >= 0 { '+' } else { '-' });
        out.push_str(&format!("{:02}", exponent.unsigned_abs()));
    }

    out
}

/// DECIMAL 用户变量: (precision, scale, packed bytes)。
/// 首字节符号位取反, 字节流按 ((precision - scale) + 1) / 2 切成整数/小数两半,
/// 小数半边补零到 scale 位。
fn decode_decimal_user_var(data: &[u8]) -> String {
    if data.len() < 2 {
        return String::from("0");
    }

    let precision = data[0] as usize;
    let scale = data[1] as usize;
    let raw = &data[2..];

    let mut size = (precision + 1) / 2;
    if size > raw.len() {
        size = raw.len();
    }

    let mut sign = true;
    let mut high = 0u64;
    let mut low = 0u64;

    let split = (precision.saturating_sub(scale) + 1) / 2;

    for index in 0..size {
        let mut value = raw[index];
        if index == 0 {
            sign = (value & 0x80) != 0;
            value ^= 0x80;
        }

        if index < split {
            high = (high << 8) + value as u64;
        } else {
            low = (low << 8) + value as u64;
        }
    }

    let mut out = String::new();
    if !sign {
        out.push('-');
    }
    out.push_str(&high.to_string());
    if scale > 0 {
        out.push('.');
        out.push_str(&format!("{:0width$}", low, width = scale));
    }
    out
}

pub fn format_user_var_value(user_var: &UserVar) -> String {
    if user_var.is_null {
        return String::from("NULL");
    }

    match user_var.value_type {
        UserVarValueType::String => {
            // TODO: charset / collation mapping
            format!("_binary 0x{}", hex_encode_upper(&user_var.value))
        }
        UserVarValueType::Real => {
            let bits = read_u64_le_padded(&user_var.value);
            format_real_value(f64::from_bits(bits))
        }
        UserVarValueType::Int => {
            let raw = read_u64_le_padded(&user_var.value);
            if user_var.is_unsigned {
                raw.to_string()
            } else {
                (raw as i64).to_string()
            }
        }
        UserVarValueType::Decimal => decode_decimal_user_var(&user_var.value),
    }
}

impl StateChanger {
    pub fn new(pool: DbHandlePool, plan: StateChangePlan) -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or(0);
        let intermediate_db_name = format!("ult_intermediate_{}_{}", epoch, std::process::id());

        let reader = StateLogReader::new(plan.state_log_path(), plan.state_log_name());
        let cluster_store = StateClusterStore::new(plan.state_log_path(), plan.state_log_name());

        StateChanger {
            plan,
            pool,
            mode: OperationMode::Normal,
            intermediate_db_name,
            reader,
            cluster_store,
            context: Mutex::new(StateChangeContext::new()),
            replayed_queries: AtomicU64::new(0),
        }
    }

    pub fn intermediate_db_name(&self) -> &str {
        &self.intermediate_db_name
    }

    pub fn plan(&self) -> &StateChangePlan {
        &self.plan
    }

    fn exec(&self, handle: &mut dyn DbHandle, query: &str) -> UltResult<()> {
        if *self.plan.dry_run() {
            info!("[dry-run] {}", query);
            return Ok(());
        }

        handle.execute(query)
    }

    pub(crate) fn create_intermediate_db(&self) -> UltResult<()> {
        info!("creating intermediate database: {}", self.intermediate_db_name);

        let query = format!(
            "{}CREATE DATABASE IF NOT EXISTS {} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
            QUERY_TAG_STATECHANGE, self.intermediate_db_name
        );

        let mut lease = self.pool.take()?;
        if let Err(e) = self.exec(lease.as_mut(), &query) {
            error!("cannot create intermediate database: {}", e);
            return Err(e);
        }
        self.exec(lease.as_mut(), "COMMIT")?;

        Ok(())
    }

    pub(crate) fn drop_intermediate_db(&self) -> UltResult<()> {
        info!("dropping intermediate database: {}", self.intermediate_db_name);

        let query = format!(
            "{}DROP DATABASE IF EXISTS {}",
            QUERY_TAG_STATECHANGE, self.intermediate_db_name
        );

        let mut lease = self.pool.take()?;
        if let Err(e) = self.exec(lease.as_mut(), &query) {
            error!("cannot drop intermediate database: {}", e);
            return Err(e);
        }
        self.exec(lease.as_mut(), "COMMIT")?;

        Ok(())
    }

    /// 备份恢复交给外部 mysql 客户端进程
    pub(crate) fn load_backup(&self, database: &str, dump_path: &str) -> UltResult<()> {
        info!("loading backup {} into {}", dump_path, database);

        if *self.plan.dry_run() {
            return Ok(());
        }

        let dump_file = std::fs::File::open(dump_path)
            .map_err(|e| UltError::String(format!("cannot open dump file {}: {}", dump_path, e)))?;

        let mut command = Command::new("mysql");
        command
            .arg(format!("-h{}", self.plan.db_host()))
            .arg(format!("-P{}", self.plan.db_port()))
            .arg(format!("-u{}", self.plan.db_username()));
        if !self.plan.db_password().is_empty() {
            command.arg(format!("-p{}", self.plan.db_password()));
        }
        command.arg(database);
        command.stdin(Stdio::from(dump_file));

        let status = command
            .status()
            .map_err(|e| UltError::String(format!("failed to run mysql client: {}", e)))?;

        if !status.success() {
            return Err(UltError::Db(format!("backup load failed with status {}", status)));
        }

        Ok(())
    }

    /// 语句重放前恢复侧信道状态
    pub fn apply_statement_context(&self, handle: &mut dyn DbHandle, query: &Query) -> UltResult<()> {
        let context = &query.statement_context;

        if query.timestamp > 0 {
            self.exec(handle, &format!("SET TIMESTAMP={}", query.timestamp))?;
        }

        if context.has_last_insert_id {
            self.exec(handle, &format!("SET LAST_INSERT_ID={}", context.last_insert_id))?;
        }
        if context.has_insert_id {
            self.exec(handle, &format!("SET INSERT_ID={}", context.insert_id))?;
        }
        if context.has_rand_seed {
            self.exec(
                handle,
                &format!(
                    "SET @@RAND_SEED1={}, @@RAND_SEED2={}",
                    context.rand_seed1, context.rand_seed2
                ),
            )?;
        }

        for user_var in &context.user_vars {
            let name = quote_user_var_name(&user_var.name);
            let value = format_user_var_value(user_var);
            self.exec(handle, &format!("SET @{} := {}", name, value))?;
        }

        Ok(())
    }

    pub(crate) fn update_primary_keys(&self, handle: &mut dyn DbHandle, _timestamp: u64) -> UltResult<()> {
        let mut context = self.context.lock().unwrap();

        let query = format!(
            "{}SELECT TABLE_NAME, COLUMN_NAME FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = '{}' AND CONSTRAINT_NAME = 'PRIMARY'",
            QUERY_TAG_STATECHANGE, self.intermediate_db_name
        );

        let rows = handle.query_rows(&query).map_err(|e| {
            error!("cannot fetch primary key information: {}", e);
            e
        })?;

        context.primary_keys.clear();
        for row in rows {
            if row.len() < 2 {
                continue;
            }

            let table = to_lower(&row[0]);
            let column = to_lower(&row[1]);
            context.primary_keys.insert(format!("{}.{}", table, column));
        }

        Ok(())
    }

    pub(crate) fn update_foreign_keys(&self, handle: &mut dyn DbHandle, timestamp: u64) -> UltResult<()> {
        let mut context = self.context.lock().unwrap();

        let query = format!(
            "{}SELECT TABLE_NAME, COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME \
             FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = '{}' AND REFERENCED_TABLE_NAME IS NOT NULL",
            QUERY_TAG_STATECHANGE, self.intermediate_db_name
        );

        let rows = handle.query_rows(&query).map_err(|e| {
            error!("cannot fetch foreign key information: {}", e);
            e
        })?;

        let mut foreign_keys = vec![];
        for row in rows {
            if row.len() < 4 {
                continue;
            }

            let from_table = to_lower(&row[0]);
            let from_column = to_lower(&row[1]);
            let to_table = to_lower(&row[2]);
            let to_column = to_lower(&row[3]);

            debug!(
                "updateForeignKeys(): adding foreign key: {}.{} -> {}.{}",
                from_table, from_column, to_table, to_column
            );

            let from_id = context.find_table(&from_table, timestamp);
            let to_id = context.find_table(&to_table, timestamp);

            foreign_keys.push(ForeignKey::new(
                context.table(from_id).get_current_name(),
                &from_column,
                context.table(to_id).get_current_name(),
                &to_column,
            ));
        }

        context.foreign_keys = foreign_keys;

        Ok(())
    }

    pub(crate) fn foreign_keys(&self) -> Vec<ForeignKey> {
        self.context.lock().unwrap().foreign_keys.clone()
    }

    /// AUTO_INCREMENT 水位; 表不存在或为空时 -1
    pub fn get_auto_increment(&self, handle: &mut dyn DbHandle, table: &str) -> UltResult<i64> {
        let query = format!(
            "{}SELECT AUTO_INCREMENT FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}'",
            QUERY_TAG_STATECHANGE, self.intermediate_db_name, table
        );

        let rows = handle.query_rows(&query)?;
        let value = match rows.first().and_then(|row| row.first()) {
            Some(value) if !value.is_empty() => value.parse::<i64>().unwrap_or(-1),
            _ => -1,
        };

        Ok(value)
    }

    pub fn set_auto_increment(&self, handle: &mut dyn DbHandle, table: &str, value: i64) -> UltResult<()> {
        if value == -1 {
            return Ok(());
        }

        let query = format!(
            "{}ALTER TABLE {} AUTO_INCREMENT = {}",
            QUERY_TAG_STATECHANGE, table, value
        );

        self.exec_on(handle, &query)
    }

    fn exec_on(&self, handle: &mut dyn DbHandle, query: &str) -> UltResult<()> {
        if let Err(e) = self.exec(handle, query) {
            error!("query execution failed: {}", e);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::{Arc, Mutex};

    use common::err::UltResult;

    use state::query::{Query, StatementContext, UserVar, UserVarValueType};

    use crate::db::{DbHandle, DbHandlePool};
    use crate::plan::StateChangePlan;

    use super::{decode_decimal_user_var, format_real_value, format_user_var_value, StateChanger};

    /// 记录收到的语句, 供断言
    pub(crate) struct RecordingHandle {
        pub statements: Arc<Mutex<Vec<String>>>,
    }

    impl DbHandle for RecordingHandle {
        fn execute(&mut self, query: &str) -> UltResult<()> {
            self.statements.lock().unwrap().push(query.to_string());
            Ok(())
        }

        fn query_rows(&mut self, query: &str) -> UltResult<Vec<Vec<String>>> {
            self.statements.lock().unwrap().push(query.to_string());
            Ok(vec![])
        }

        fn consume_results(&mut self) -> UltResult<()> {
            Ok(())
        }

        fn set_autocommit(&mut self, _enabled: bool) -> UltResult<()> {
            Ok(())
        }
    }

    pub(crate) fn recording_pool() -> (DbHandlePool, Arc<Mutex<Vec<String>>>) {
        let statements = Arc::new(Mutex::new(vec![]));
        let shared = Arc::clone(&statements);

        let pool = DbHandlePool::new(4, move || {
            Ok(Box::new(RecordingHandle {
                statements: Arc::clone(&shared),
            }) as Box<dyn DbHandle>)
        });

        (pool, statements)
    }

    fn int_var(value: u64, is_unsigned: bool) -> UserVar {
        UserVar {
            name: String::from("v"),
            value_type: UserVarValueType::Int,
            is_null: false,
            is_unsigned,
            charset: 33,
            value: value.to_le_bytes().to_vec(),
        }
    }

    #[test]
    fn test_format_string_user_var() {
        let user_var = UserVar {
            name: String::from("s"),
            value_type: UserVarValueType::String,
            is_null: false,
            is_unsigned: false,
            charset: 33,
            value: b"abc".to_vec(),
        };

        assert_eq!(format_user_var_value(&user_var), "_binary 0x616263");
    }

    #[test]
    fn test_format_int_user_var() {
        assert_eq!(format_user_var_value(&int_var(42, true)), "42");
        assert_eq!(format_user_var_value(&int_var(u64::MAX, true)), u64::MAX.to_string());
        // 同样的位模式按有符号解释
        assert_eq!(format_user_var_value(&int_var(u64::MAX, false)), "-1");
    }

    fn real_var(value: f64) -> UserVar {
        UserVar {
            name: String::from("r"),
            value_type: UserVarValueType::Real,
            is_null: false,
            is_unsigned: false,
            charset: 33,
            value: value.to_bits().to_le_bytes().to_vec(),
        }
    }

    #[test]
    fn test_format_real_user_var() {
        assert_eq!(format_user_var_value(&real_var(1.5)), "1.5");
        assert_eq!(format_user_var_value(&real_var(0.0)), "0");
        // 整数部分多位时有效数字仍然从首位数字起算
        assert_eq!(format_user_var_value(&real_var(123456.789)), "123456.789");
    }

    #[test]
    fn test_format_real_17_significant_digits() {
        // 17 位是有效数字, 不是小数点后的位数。
        // 123456.789 的最近 double 是 123456.7890000000043...;
        // 按小数点后 17 位截取会把二进制噪声位一并带出来
        assert_eq!(format_real_value(123456.789), "123456.789");

        assert_eq!(format_real_value(1.0 / 3.0), "0.33333333333333331");
        assert_eq!(format_real_value(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_real_value(-(0.1 + 0.2)), "-0.30000000000000004");

        // 定点 / 科学计数法的分界: 指数 16 还是定点, 17 起转科学计数法
        assert_eq!(format_real_value(1e16), "10000000000000000");
        assert_eq!(format_real_value(1e17), "1e+17");

        // 小量级: 精确可表示的 2^-20, 尾随零去掉
        assert_eq!(format_real_value(2f64.powi(-20)), "9.5367431640625e-07");
    }

    #[test]
    fn test_format_null_user_var() {
        let user_var = UserVar {
            name: String::from("n"),
            value_type: UserVarValueType::Int,
            is_null: true,
            is_unsigned: false,
            charset: 0,
            value: vec![],
        };

        assert_eq!(format_user_var_value(&user_var), "NULL");
    }

    #[test]
    fn test_decode_decimal_user_var() {
        // DECIMAL(4,2) = 12.34: high = 12, low = 34
        let data = vec![4u8, 2u8, 0x80 | 12, 34];
        assert_eq!(decode_decimal_user_var(&data), "12.34");

        // 负数: 符号位为 0
        let data = vec![4u8, 2u8, 12, 34];
        assert_eq!(decode_decimal_user_var(&data), "-12.34");

        // scale = 0
        let data = vec![2u8, 0u8, 0x80 | 7];
        assert_eq!(decode_decimal_user_var(&data), "7");
    }

    #[test]
    fn test_apply_statement_context() {
        let (pool, statements) = recording_pool();

        let mut plan = StateChangePlan::new();
        plan.set_state_log_path(String::from("."));
        plan.set_state_log_name(String::from("test"));
        let changer = StateChanger::new(pool.clone(), plan);

        let mut query = Query::new();
        query.timestamp = 1666000000;
        query.statement_context = StatementContext {
            has_last_insert_id: true,
            last_insert_id: 41,
            has_insert_id: true,
            insert_id: 42,
            has_rand_seed: true,
            rand_seed1: 1,
            rand_seed2: 2,
            user_vars: vec![UserVar {
                name: String::from("wei`rd"),
                value_type: UserVarValueType::Int,
                is_null: false,
                is_unsigned: false,
                charset: 33,
                value: 7u64.to_le_bytes().to_vec(),
            }],
        };

        let mut lease = pool.take().unwrap();
        changer.apply_statement_context(lease.as_mut(), &query).unwrap();
        drop(lease);

        let recorded = statements.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![
                "SET TIMESTAMP=1666000000",
                "SET LAST_INSERT_ID=41",
                "SET INSERT_ID=42",
                "SET @@RAND_SEED1=1, @@RAND_SEED2=2",
                "SET @`wei``rd` := 7",
            ]
        );
    }

    #[test]
    fn test_auto_increment_watermark() {
        let (pool, statements) = recording_pool();
        let changer = StateChanger::new(pool.clone(), StateChangePlan::new());

        let mut lease = pool.take().unwrap();
        // RecordingHandle 返回空结果 → 没有水位
        assert_eq!(changer.get_auto_increment(lease.as_mut(), "users").unwrap(), -1);
        // -1 是 no-op
        changer.set_auto_increment(lease.as_mut(), "users", -1).unwrap();
        changer.set_auto_increment(lease.as_mut(), "users", 42).unwrap();
        drop(lease);

        let recorded = statements.lock().unwrap().clone();
        assert!(recorded
            .iter()
            .any(|s| s.contains("ALTER TABLE users AUTO_INCREMENT = 42")));
        assert!(!recorded.iter().any(|s| s.contains("AUTO_INCREMENT = -1")));
    }

    #[test]
    fn test_intermediate_db_name_shape() {
        let (pool, _) = recording_pool();
        let changer = StateChanger::new(pool, StateChangePlan::new());

        assert!(changer.intermediate_db_name().starts_with("ult_intermediate_"));
    }
}
