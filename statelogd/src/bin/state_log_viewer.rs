//! state_log_viewer - state log 浏览工具

use clap::Parser;
use tracing::{info, Level};

use common::log::{TracingFactory, TracingFactoryOptions};
use state::item::{ConditionType, StateItem};
use state::statelog::StateLogReader;

#[derive(Parser, Debug)]
#[command(name = "state_log_viewer")]
#[command(about = "state_log_viewer - state log viewer")]
struct Args {
    /// specify state log
    #[arg(short = 'i', value_name = "statelog")]
    state_log: String,

    /// start gid
    #[arg(short = 's', value_name = "startgid", default_value_t = 0)]
    start_gid: u64,

    /// end gid
    #[arg(short = 'e', value_name = "endgid", default_value_t = u64::MAX)]
    end_gid: u64,

    /// print additional info (prints itemset, whereset)
    #[arg(short = 'v')]
    verbose: bool,

    /// print more additional info (prints beforehash, afterhash)
    #[arg(short = 'V')]
    more_verbose: bool,
}

fn join_item_set(items: &[StateItem], separator: &str) -> String {
    if items.is_empty() {
        return String::new();
    }

    items
        .iter()
        .map(|item| {
            if item.condition_type != ConditionType::None {
                let inner_separator = if item.condition_type == ConditionType::And {
                    " AND "
                } else {
                    " OR "
                };
                format!("({})", join_item_set(&item.arg_list, inner_separator))
            } else {
                item.make_range2().make_where_query(&item.name)
            }
        })
        .collect::<Vec<_>>()
        .join(separator)
}

fn main() {
    let args = Args::parse();

    let level = if args.more_verbose { Level::TRACE } else { Level::INFO };
    TracingFactory::init_log_with_options(TracingFactoryOptions::default().with_level(level));

    let mut reader = StateLogReader::new(".", &args.state_log);
    if let Err(e) = reader.open() {
        eprintln!("cannot open state log: {}", e);
        std::process::exit(1);
    }

    while reader.next_header() {
        let header = *reader.txn_header().unwrap();

        if header.gid > args.end_gid {
            break;
        }
        if header.gid < args.start_gid {
            let _ = reader.skip_transaction();
            continue;
        }

        if !reader.next_transaction() {
            continue;
        }
        let transaction = reader.take_txn_body().unwrap();

        info!(
            "Transaction #{} (xid {}, {} queries)",
            transaction.gid,
            transaction.xid,
            transaction.queries().len()
        );

        for (index, query) in transaction.queries().iter().enumerate() {
            info!("  [{}] {}", index, query.statement);

            if args.verbose || args.more_verbose {
                let read_where = join_item_set(&query.read_set, " AND ");
                let write_where = join_item_set(&query.write_set, " AND ");

                if !read_where.is_empty() {
                    info!("      read:  {}", read_where);
                }
                if !write_where.is_empty() {
                    info!("      write: {}", write_where);
                }
            }

            if args.more_verbose {
                for (table, hash) in &query.before_hash {
                    info!("      before[{}]: {}", table, hash.stringify());
                }
                for (table, hash) in &query.after_hash {
                    info!("      after[{}]:  {}", table, hash.stringify());
                }
            }
        }
    }
}
