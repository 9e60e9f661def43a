//! statelogd - state-logging daemon
//!
//! 跟随 binlog.index 读取事件, 以 commit 为界归组成 Transaction,
//! 顺序 append 到 state log。

mod pending;

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn, Level};

use binlog::events::BinlogEvent;
use binlog::sequential_reader::SequentialBinlogReader;
use common::err::{UltError, UltResult};
use common::executor::TaskExecutor;
use common::log::{TracingFactory, TracingFactoryOptions};
use common::utils::parse_key_column_groups_expr;
use state::proc::{ProcLogReader, ProcMatcher};
use state::statelog::{Checkpoint, StateLogWriter};
use state::transaction::Transaction;
use state::Gid;

use crate::pending::{finalize_plain_transaction, finalize_procedure_transaction, PendingTransaction, RowEventFolder};

/// 写线程 backpressure 上限与轮询间隔
const PENDING_QUEUE_LIMIT: usize = 128;
const WRITER_POLL_INTERVAL: Duration = Duration::from_millis(1000 / 16);

#[derive(Parser, Debug)]
#[command(name = "statelogd")]
#[command(about = "statelogd - state-logging daemon")]
struct Args {
    /// specify MariaDB-variant binlog.index file
    #[arg(short = 'b', value_name = "file")]
    binlog_index: String,

    /// specify log output name
    #[arg(short = 'o', value_name = "file")]
    output: String,

    /// use procedure log to append additional queries (SELECT ...)
    #[arg(short = 'p', value_name = "file")]
    procedure_log: Option<String>,

    /// key columns (eg. user.id,article.id)
    #[arg(short = 'k', value_name = "columns")]
    key_columns: String,

    /// concurrent processing (default = available_parallelism + 1)
    #[arg(short = 'c', value_name = "threadnum")]
    thread_count: Option<usize>,

    /// restore state and resume from given .ultchkpoint file
    #[arg(short = 'r', value_name = "file")]
    checkpoint: Option<String>,

    /// force discard previous log and start over
    #[arg(short = 'd')]
    discard: bool,

    /// print processed transactions with GIDs
    #[arg(short = 'G')]
    print_transactions: bool,

    /// print query statements for processed transactions
    #[arg(short = 'Q')]
    print_queries: bool,

    /// do not read binlog.index continuously (quit after reaching EOF)
    #[arg(short = 'n')]
    oneshot: bool,

    /// set logger level to DEBUG
    #[arg(short = 'v')]
    debug_log: bool,

    /// set logger level to TRACE
    #[arg(short = 'V')]
    trace_log: bool,
}

struct StateLogWriterApp {
    args: Args,

    key_columns: Vec<Vec<String>>,

    executor: TaskExecutor,
    pending_transactions: Arc<Mutex<VecDeque<Receiver<Option<Transaction>>>>>,

    procedure_definitions: Mutex<HashMap<String, Arc<ProcMatcher>>>,
    proc_log_reader: Option<ProcLogReader>,

    terminate: Arc<AtomicBool>,
}

impl StateLogWriterApp {
    fn new(args: Args) -> Self {
        let thread_count = args.thread_count.unwrap_or_else(|| {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1) + 1
        });

        let key_columns = parse_key_column_groups_expr(&args.key_columns);

        StateLogWriterApp {
            args,
            key_columns,
            executor: TaskExecutor::new(thread_count),
            pending_transactions: Arc::new(Mutex::new(VecDeque::new())),
            procedure_definitions: Mutex::new(HashMap::new()),
            proc_log_reader: None,
            terminate: Arc::new(AtomicBool::new(false)),
        }
    }

    fn run(&mut self) -> UltResult<()> {
        let index_path = Path::new(&self.args.binlog_index);
        let base_path = index_path
            .parent()
            .map(|parent| parent.to_string_lossy().into_owned())
            .filter(|parent| !parent.is_empty())
            .unwrap_or_else(|| String::from("."));
        let index_file = index_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| UltError::Config(String::from("binlog.index file must be specified (-b)")))?;

        let mut binlog_reader = SequentialBinlogReader::new(&base_path, &index_file)?;
        binlog_reader.set_poll_disabled(self.args.oneshot);

        if let Some(procedure_log) = self.args.procedure_log.clone() {
            let mut reader = ProcLogReader::new();
            reader.open(".", &procedure_log)?;
            info!("procedure log opened: {}", procedure_log);
            self.proc_log_reader = Some(reader);
        }

        {
            let flag = binlog_reader.terminate_handle();
            let terminate = Arc::clone(&self.terminate);
            ctrlc::set_handler(move || {
                terminate.store(true, Ordering::Release);
                flag.store(true, Ordering::Release);
            })
            .map_err(|e| UltError::String(format!("cannot install SIGINT handler: {}", e)))?;
        }

        let mut state_log_writer = StateLogWriter::new(".", &self.args.output);
        let mut next_gid: Gid = 0;

        // checkpoint resume 续写, 否则重新开始
        if let Some(checkpoint_path) = self.args.checkpoint.clone() {
            if self.args.discard {
                return Err(UltError::Config(String::from("-r and -d are mutually exclusive")));
            }

            let checkpoint = Checkpoint::load_from(&checkpoint_path)?;
            info!("ultraverse state loaded: {}", checkpoint_path);
            info!("gid: {}", checkpoint.next_gid);

            next_gid = checkpoint.next_gid;

            let mut segment_index = checkpoint.segment_index as usize;
            if segment_index >= binlog_reader.log_file_list_size() {
                segment_index = binlog_reader.log_file_list_size().saturating_sub(1);
            }
            binlog_reader.seek(segment_index, checkpoint.position)?;

            state_log_writer.open(true)?;
        } else {
            state_log_writer.open(false)?;
        }

        let writer_thread = self.spawn_writer_thread(state_log_writer);

        let mut folder = RowEventFolder::new();
        let mut current = PendingTransaction::new();
        let mut pending_row_query = None;

        loop {
            match binlog_reader.next() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    error!("binlog read error: {}", e);
                    break;
                }
            }

            let event = match binlog_reader.take_current_event() {
                Some(event) => event,
                None => continue,
            };

            match event {
                BinlogEvent::Query(query_event) => {
                    if query_event.statement == "COMMIT" {
                        current = PendingTransaction::new();
                    } else if query_event.statement != "BEGIN" {
                        // DDL 这类语句以 query event 形式到达
                        current.push_query(folder.process_query_event(&query_event));
                    }
                }
                BinlogEvent::IntVar(int_var) => current.statement_context_mut().apply_int_var(&int_var),
                BinlogEvent::Rand(rand_event) => current.statement_context_mut().apply_rand(&rand_event),
                BinlogEvent::UserVar(user_var) => current.statement_context_mut().apply_user_var(&user_var),
                BinlogEvent::TableMap(table_map) => current.register_table_map(table_map),
                BinlogEvent::RowQuery(row_query) => pending_row_query = Some(row_query),
                BinlogEvent::Row(row_event) => {
                    match current.table_map(row_event.table_id) {
                        Some(table_map) => {
                            let table_map = table_map.clone();
                            match folder.process_row_event(&mut current, &row_event, pending_row_query.as_ref(), &table_map) {
                                Ok(Some(json)) => {
                                    match state::proc::parse_procedure_hint(&json) {
                                        Ok(proc_call) => current.set_proc_call(proc_call),
                                        Err(e) => warn!("invalid procedure hint: {}", e),
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => warn!("failed to process row event: {}", e),
                            }
                        }
                        None => warn!("row event for unmapped table id {}", row_event.table_id),
                    }
                }
                BinlogEvent::TransactionId(tid_event) => {
                    current.set_tid_event(tid_event);

                    let gid = next_gid;
                    next_gid += 1;

                    self.submit_transaction(current, gid);
                    current = PendingTransaction::new();
                    pending_row_query = None;
                }
            }

            if self.terminate.load(Ordering::Acquire) {
                break;
            }
        }

        self.terminate.store(true, Ordering::Release);

        if writer_thread.join().is_err() {
            error!("writer thread panicked");
        }

        // 退出前保存状态 (供 -r resume)
        let checkpoint = Checkpoint {
            next_gid,
            segment_index: binlog_reader.current_segment_index() as u64,
            position: binlog_reader.pos(),
        };
        checkpoint.save(".", &self.args.output)?;
        info!("ultraverse state saved: {}.ultchkpoint", self.args.output);

        Ok(())
    }

    /// 事务收尾放到 worker pool, receiver 以提交顺序进队 —
    /// 写线程按出队顺序落盘, 所以 GID 顺序就是落盘顺序。
    fn submit_transaction(&mut self, pending: PendingTransaction, gid: Gid) {
        if let Some(proc_call) = pending.proc_call() {
            // -p 提供的 procedure log 做一次 call id 校验
            if let Some(reader) = self.proc_log_reader.as_mut() {
                if !reader.match_forward(proc_call.call_id) {
                    warn!("call id {} is not present in the procedure log", proc_call.call_id);
                }
            }
        }

        let matcher = pending
            .proc_call()
            .map(|proc_call| proc_call.proc_name.clone())
            .and_then(|name| self.procedure_definition(&name));

        let key_columns = self.key_columns.clone();
        let print_transactions = self.args.print_transactions;

        let receiver = self.executor.post(move || {
            let transaction = match pending.proc_call().cloned() {
                Some(proc_call) => match matcher {
                    Some(matcher) => {
                        finalize_procedure_transaction(pending, &proc_call, matcher.as_ref(), &key_columns, gid)
                    }
                    None => {
                        error!("procedure definition for {} is not available!", proc_call.proc_name);
                        finalize_plain_transaction(pending, gid)
                    }
                },
                None => finalize_plain_transaction(pending, gid),
            };

            if print_transactions {
                match transaction.xid {
                    0 => info!("processed transaction gid {}", gid),
                    xid => info!("processed transaction gid {} (xid {})", gid, xid),
                }
            }

            Some(transaction)
        });

        {
            let mut queue = self.pending_transactions.lock().unwrap();
            queue.push_back(receiver);
        }

        // backpressure: 写线程追不上时阻塞 producer
        while self.pending_transactions.lock().unwrap().len() > PENDING_QUEUE_LIMIT {
            thread::sleep(WRITER_POLL_INTERVAL);
        }
    }

    fn spawn_writer_thread(&self, mut writer: StateLogWriter) -> thread::JoinHandle<()> {
        let queue = Arc::clone(&self.pending_transactions);
        let terminate = Arc::clone(&self.terminate);
        let print_transactions = self.args.print_transactions;
        let print_queries = self.args.print_queries;

        thread::spawn(move || {
            loop {
                let receiver = {
                    let mut queue = queue.lock().unwrap();
                    queue.pop_front()
                };

                let receiver = match receiver {
                    Some(receiver) => receiver,
                    None => {
                        if terminate.load(Ordering::Acquire) {
                            break;
                        }
                        thread::sleep(WRITER_POLL_INTERVAL);
                        continue;
                    }
                };

                let transaction = match receiver.recv() {
                    Ok(Some(transaction)) => transaction,
                    _ => continue,
                };

                if print_transactions {
                    info!(
                        "writing transaction gid {} (queries: {})",
                        transaction.gid,
                        transaction.queries().len()
                    );
                }
                if print_queries {
                    for (index, query) in transaction.queries().iter().enumerate() {
                        info!("gid {} query[{}]: {}", transaction.gid, index, query.statement);
                    }
                }

                if let Err(e) = writer.write_transaction(&transaction) {
                    error!("failed to write transaction gid {}: {}", transaction.gid, e);
                }
            }

            let _ = writer.close();
        })
    }

    /// 从 `procdef/{name}.sql` 读取并缓存 procedure 定义
    fn procedure_definition(&self, name: &str) -> Option<Arc<ProcMatcher>> {
        let mut definitions = self.procedure_definitions.lock().unwrap();

        if let Some(matcher) = definitions.get(name) {
            return Some(Arc::clone(matcher));
        }

        info!("definitions for {} not found. loading from procdef/{}.sql", name, name);

        let path = format!("procdef/{}.sql", name);
        let procdef = match std::fs::read_to_string(&path) {
            Ok(procdef) => procdef,
            Err(_) => {
                error!("{} not found", path);
                return None;
            }
        };

        let matcher = Arc::new(ProcMatcher::new(&procdef));
        definitions.insert(name.to_string(), Arc::clone(&matcher));

        Some(matcher)
    }
}

fn main() {
    let args = Args::parse();

    let level = if args.trace_log {
        Level::TRACE
    } else if args.debug_log {
        Level::DEBUG
    } else {
        Level::INFO
    };
    TracingFactory::init_log_with_options(TracingFactoryOptions::default().with_level(level));

    if args.key_columns.is_empty() {
        error!("key column(s) must be specified");
        std::process::exit(1);
    }

    let mut app = StateLogWriterApp::new(args);
    if let Err(e) = app.run() {
        error!("FATAL: {}", e);
        std::process::exit(1);
    }
}
