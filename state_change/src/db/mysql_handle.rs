use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, Value};

use common::err::{UltError, UltResult};

use crate::db::handle::DbHandle;

fn db_err(error: mysql::Error) -> UltError {
    UltError::Db(error.to_string())
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::NULL => String::new(),
        Value::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Value::Int(value) => value.to_string(),
        Value::UInt(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Double(value) => value.to_string(),
        other => format!("{:?}", other),
    }
}

/// `mysql` crate 之上的阻塞式 DbHandle 实现
pub struct MySqlHandle {
    conn: Conn,
}

impl MySqlHandle {
    pub fn connect(host: &str, port: u16, username: &str, password: &str) -> UltResult<Self> {
        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(host.to_string()))
            .tcp_port(port)
            .user(Some(username.to_string()))
            .pass(Some(password.to_string()))
            .into();

        let conn = Conn::new(opts).map_err(db_err)?;

        Ok(MySqlHandle { conn })
    }
}

impl DbHandle for MySqlHandle {
    fn execute(&mut self, query: &str) -> UltResult<()> {
        // query_iter 走完所有 result set (CALL 会返回多个)
        let mut result = self.conn.query_iter(query).map_err(db_err)?;
        while let Some(set) = result.iter() {
            for row in set {
                let _ = row.map_err(db_err)?;
            }
        }

        Ok(())
    }

    fn query_rows(&mut self, query: &str) -> UltResult<Vec<Vec<String>>> {
        let mut rows = vec![];

        let mut result = self.conn.query_iter(query).map_err(db_err)?;
        while let Some(set) = result.iter() {
            for row in set {
                let row = row.map_err(db_err)?;
                rows.push(row.unwrap().into_iter().map(value_to_string).collect());
            }
        }

        Ok(rows)
    }

    fn consume_results(&mut self) -> UltResult<()> {
        // query_iter 在 execute 内已经走完全部 result set
        Ok(())
    }

    fn set_autocommit(&mut self, enabled: bool) -> UltResult<()> {
        let value = if enabled { 1 } else { 0 };
        self.conn
            .query_drop(format!("SET autocommit={}", value))
            .map_err(db_err)
    }
}
