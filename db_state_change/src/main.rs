//! db_state_change - database state change tool

use std::io::{self, BufRead, Write};

use clap::Parser;
use tracing::{error, info, warn, Level};

use common::config::UltraverseConfig;
use common::err::{UltError, UltResult};
use common::log::{TracingFactory, TracingFactoryOptions};
use common::utils::parse_key_column_groups;
use state::Gid;
use state_change::changer::StateChanger;
use state_change::db::{DbHandle, DbHandlePool, MySqlHandle};
use state_change::plan::{RangeComparisonMethod, StateChangePlan};

#[derive(Parser, Debug)]
#[command(name = "db_state_change")]
#[command(about = "db_state_change - database state change tool")]
#[command(after_help = "Actions:
    make_cluster               Create cluster files
    rollback=gid1,gid2,...     Rollback specified GIDs
    auto-rollback=ratio        Auto-select rollback targets by ratio
    prepend=gid,sqlfile        Prepend SQL file before GID
    full-replay                Full replay
    replay                     Replay from plan file

Environment:
    ULTRAVERSE_REPORT_NAME     Report file name (optional)")]
struct Args {
    /// GID range to process
    #[arg(long = "gid-range", value_name = "START...END")]
    gid_range: Option<String>,

    /// GIDs to skip
    #[arg(long = "skip-gids", value_name = "GID1,GID2,...")]
    skip_gids: Option<String>,

    /// Replay all transactions from GID before executing replay plan
    #[arg(long = "replay-from", value_name = "GID")]
    replay_from: Option<Gid>,

    /// Do not execute replace queries; print them for manual run
    #[arg(long = "no-exec-replace-query")]
    no_exec_replace_query: bool,

    /// Dry run mode
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// set logger level to DEBUG
    #[arg(short = 'v')]
    debug_log: bool,

    /// set logger level to TRACE
    #[arg(short = 'V')]
    trace_log: bool,

    /// configuration JSON file
    #[arg(value_name = "CONFIG_JSON")]
    config_json: String,

    /// ACTION := action(":" action)*
    #[arg(value_name = "ACTION")]
    action: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Action {
    MakeCluster,
    Rollback(Gid),
    AutoRollback(f64),
    Prepend(Gid, String),
    FullReplay,
    Replay,
}

fn split_list(input: &str, separator: char) -> Vec<String> {
    input
        .split(separator)
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn parse_actions(expression: &str) -> UltResult<Vec<Action>> {
    let mut actions = vec![];

    for action_expr in expression.split(':') {
        let (action, args) = match action_expr.split_once('=') {
            Some((action, args)) => (action, args),
            None => (action_expr, ""),
        };

        match action {
            "make_cluster" => actions.push(Action::MakeCluster),
            "rollback" => {
                let args = if args == "-" {
                    // gid 列表从 stdin 读入
                    let mut line = String::new();
                    io::stdin()
                        .lock()
                        .read_line(&mut line)
                        .map_err(|e| UltError::Config(format!("cannot read gid list: {}", e)))?;
                    line
                } else {
                    args.to_string()
                };

                for gid in split_list(&args, ',') {
                    let gid: Gid = gid
                        .parse()
                        .map_err(|_| UltError::Config(format!("invalid gid: {}", gid)))?;
                    actions.push(Action::Rollback(gid));
                }
            }
            "auto-rollback" => {
                let ratio: f64 = args
                    .parse()
                    .map_err(|_| UltError::Config(format!("invalid ratio: {}", args)))?;
                actions.push(Action::AutoRollback(ratio));
            }
            "prepend" => {
                let parts = split_list(args, ',');
                if parts.len() != 2 {
                    return Err(UltError::Config(String::from("invalid arguments")));
                }

                let gid: Gid = parts[0]
                    .parse()
                    .map_err(|_| UltError::Config(format!("invalid gid: {}", parts[0])))?;
                actions.push(Action::Prepend(gid, parts[1].clone()));
            }
            "full-replay" => actions.push(Action::FullReplay),
            "replay" => actions.push(Action::Replay),
            other => {
                return Err(UltError::Config(format!("invalid action: {}", other)));
            }
        }
    }

    Ok(actions)
}

fn parse_gid_range(expression: &str) -> UltResult<(Gid, Gid)> {
    let (start, end) = expression
        .split_once("...")
        .ok_or_else(|| UltError::Config(String::from("invalid --gid-range format, expected START...END")))?;

    if end.contains("...") {
        return Err(UltError::Config(String::from(
            "invalid --gid-range format, expected START...END",
        )));
    }

    let start: Gid = start
        .trim()
        .parse()
        .map_err(|_| UltError::Config(String::from("invalid --gid-range value, expected numeric START...END")))?;
    let end: Gid = end
        .trim()
        .parse()
        .map_err(|_| UltError::Config(String::from("invalid --gid-range value, expected numeric START...END")))?;

    if start > end {
        return Err(UltError::Config(String::from(
            "invalid --gid-range value, START must be <= END",
        )));
    }

    Ok((start, end))
}

fn describe_actions(actions: &[Action]) {
    info!("== SUMMARY ==");

    let mut index = 1;
    for action in actions {
        match action {
            Action::Rollback(gid) => {
                info!("[#{}] rollback GID #{}", index, gid);
                index += 1;
            }
            Action::Prepend(gid, sql_file) => {
                info!("[#{}] prepend {} to GID #{}", index, sql_file, gid);
                index += 1;
            }
            _ => {}
        }
    }
}

fn confirm(message: &str) -> bool {
    eprint!("{} (Y/n) > ", message);
    let _ = io::stderr().flush();

    let mut input = String::new();
    if io::stdin().lock().read_line(&mut input).is_err() {
        return false;
    }

    input.trim() == "Y"
}

fn run(args: Args) -> UltResult<i32> {
    let config = UltraverseConfig::load_from_file(&args.config_json)?;

    if config.db_host().is_empty() || config.db_username().is_empty() || config.database.password.is_none() {
        error!("Database credential not provided - check config JSON or DB_* environment variables");
        return Ok(1);
    }

    let actions = parse_actions(&args.action)?;
    if actions.is_empty() {
        error!("no action specified");
        return Ok(1);
    }

    let make_cluster = actions.contains(&Action::MakeCluster);
    let full_replay = actions.contains(&Action::FullReplay);
    let replay = actions.contains(&Action::Replay);
    let auto_rollback = actions.iter().any(|action| matches!(action, Action::AutoRollback(_)));

    if make_cluster && actions.len() > 1 {
        error!("make_cluster cannot be executed with other actions.");
        return Ok(1);
    }

    let thread_num = if config.state_change.thread_count > 0 {
        config.state_change.thread_count as usize
    } else {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) * 2
    };

    let mut plan = StateChangePlan::new();

    match config.state_change.backup_file.as_ref() {
        Some(backup_file) if !backup_file.is_empty() => {
            plan.set_db_dump_path(backup_file.clone());
        }
        _ => {
            warn!("database dump file is not specified!");
            warn!("- this may leads to unexpected result");
            warn!("- all queries will be executed until gid reaches rollback target");
        }
    }

    plan.set_state_log_path(config.state_log.path.clone());
    plan.set_state_log_name(config.state_log.name.clone());
    plan.set_db_name(config.database.name.clone());
    plan.set_key_column_groups(parse_key_column_groups(&config.key_columns));

    for (column, aliases) in &config.column_aliases {
        for alias in aliases {
            plan.column_aliases_mut().push((column.clone(), alias.clone()));
        }
    }

    plan.set_binlog_path(config.binlog_path().to_string());
    plan.set_thread_num(thread_num);
    plan.set_drop_intermediate_db(!config.state_change.keep_intermediate_database);
    plan.set_range_comparison_method(RangeComparisonMethod::from_config(
        &config.state_change.range_comparison_method,
    ));
    plan.set_execute_replace_query(!args.no_exec_replace_query);

    plan.set_db_host(config.db_host().to_string());
    plan.set_db_port(config.db_port());
    plan.set_db_username(config.db_username().to_string());
    plan.set_db_password(config.db_password().to_string());
    plan.set_dry_run(args.dry_run);

    if let Some(gid_range) = args.gid_range.as_ref() {
        let (start_gid, end_gid) = parse_gid_range(gid_range)?;
        plan.set_start_gid(Some(start_gid));
        plan.set_end_gid(Some(end_gid));
    }
    if let Some(skip_gids) = args.skip_gids.as_ref() {
        for gid in split_list(skip_gids, ',') {
            let gid: Gid = gid
                .parse()
                .map_err(|_| UltError::Config(format!("invalid gid: {}", gid)))?;
            info!("gid {} will be skipped", gid);
            plan.skip_gids_mut().push(gid);
        }
    }
    if let Some(replay_from) = args.replay_from {
        plan.set_replay_from_gid(Some(replay_from));
    }

    match std::env::var("ULTRAVERSE_REPORT_NAME") {
        Ok(report_name) if !report_name.is_empty() => {
            plan.set_report_path(report_name);
        }
        _ => {
            let now = chrono::Local::now();
            plan.set_report_path(format!(
                "statechange_{}_{}",
                args.action,
                now.format("%Y%m%d_%H%M%S")
            ));
        }
    }

    for action in &actions {
        match action {
            Action::Rollback(gid) => plan.rollback_gids_mut().push(*gid),
            Action::Prepend(gid, sql_file) => {
                plan.user_queries_mut().insert(*gid, sql_file.clone());
            }
            Action::FullReplay => {
                plan.set_full_replay(true);
            }
            Action::AutoRollback(ratio) => {
                plan.set_auto_rollback_ratio(Some(*ratio));
            }
            _ => {}
        }
    }

    plan.normalize_rollback_gids();

    let host = plan.db_host().clone();
    let port = *plan.db_port();
    let username = plan.db_username().clone();
    let password = plan.db_password().clone();

    let pool = DbHandlePool::new(thread_num, move || {
        Ok(Box::new(MySqlHandle::connect(&host, port, &username, &password)?) as Box<dyn DbHandle>)
    });

    let mut state_changer = StateChanger::new(pool, plan);

    if make_cluster {
        state_changer.make_cluster()?;
    } else if full_replay {
        state_changer.full_replay()?;
    } else if replay {
        state_changer.replay()?;
    } else if auto_rollback {
        state_changer.bench_prepare_rollback()?;
    } else {
        describe_actions(&actions);

        if !args.dry_run && !confirm("Proceed?") {
            return Ok(2);
        }

        state_changer.prepare()?;
        info!("plan written; run the 'replay' action to execute it");
    }

    Ok(0)
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

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod test {
    use super::{parse_actions, parse_gid_range, Action};

    #[test]
    fn test_parse_actions() {
        let actions = parse_actions("rollback=3,5:prepend=7,fix.sql:replay").unwrap();
        assert_eq!(
            actions,
            vec![
                Action::Rollback(3),
                Action::Rollback(5),
                Action::Prepend(7, String::from("fix.sql")),
                Action::Replay,
            ]
        );

        assert_eq!(parse_actions("make_cluster").unwrap(), vec![Action::MakeCluster]);
        assert_eq!(parse_actions("full-replay").unwrap(), vec![Action::FullReplay]);

        let actions = parse_actions("auto-rollback=0.25").unwrap();
        assert!(matches!(actions[0], Action::AutoRollback(ratio) if ratio == 0.25));

        assert!(parse_actions("explode").is_err());
        assert!(parse_actions("prepend=1").is_err());
        assert!(parse_actions("rollback=abc").is_err());
    }

    #[test]
    fn test_parse_gid_range() {
        assert_eq!(parse_gid_range("10...20").unwrap(), (10, 20));
        assert_eq!(parse_gid_range(" 1 ... 2 ").unwrap(), (1, 2));

        assert!(parse_gid_range("10..20").is_err());
        assert!(parse_gid_range("20...10").is_err());
        assert!(parse_gid_range("1...2...3").is_err());
        assert!(parse_gid_range("a...b").is_err());
    }
}
