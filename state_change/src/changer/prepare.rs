use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Instant;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use common::err::{UltError, UltResult};

use state::graph::column_graph::hash_column_set;
use state::query::ColumnSet;
use state::Gid;

use crate::report::StateChangeReport;

use super::{OperationMode, StateChanger};

pub const PLAN_FILE_SUFFIX: &str = ".ultplan";

/// prepare() 的产物, replay 动作的输入
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayPlanFile {
    pub rollback_gids: Vec<Gid>,
    /// rollback 目标经 cluster / dependency graph 可达的事务
    pub affected_gids: Vec<Gid>,
}

impl StateChanger {
    fn plan_file_path(&self) -> String {
        format!(
            "{}/{}{}",
            self.plan.state_log_path(),
            self.plan.state_log_name(),
            PLAN_FILE_SUFFIX
        )
    }

    pub(crate) fn read_plan_file(&self) -> UltResult<ReplayPlanFile> {
        let path = self.plan_file_path();
        let content = fs::read_to_string(&path)
            .map_err(|e| UltError::String(format!("cannot open plan file {} (run prepare first): {}", path, e)))?;

        Ok(serde_json::from_str(&content)?)
    }

    /// rollback 目标的影响闭包 → plan 文件。
    /// 数据面: row cluster 的 gid 归属; 控制面: column graph 的写集相关性。
    pub fn prepare(&mut self) -> UltResult<ReplayPlanFile> {
        self.mode = OperationMode::Prepare;

        self.plan.normalize_rollback_gids();
        let rollback_gids = self.plan.rollback_gids().clone();

        if rollback_gids.is_empty() {
            warn!("prepare() called without rollback targets");
        }

        let cluster = self.cluster_store.read_row_cluster().map_err(|e| {
            UltError::String(format!("cannot load cluster files (run make_cluster first): {}", e))
        })?;
        let column_graph = self.cluster_store.read_column_graph()?;

        let mut affected: HashSet<Gid> = rollback_gids.iter().copied().collect();

        // row cluster 闭包: 同一 cluster entry 的 gid 全部牵连。
        // entry 之间可能经多个 key 间接相连, 迭代到不动点。
        loop {
            let mut changed = false;

            for entries in cluster.key_map().values() {
                for (_, gid_list) in entries {
                    if gid_list.iter().any(|gid| affected.contains(gid)) {
                        for gid in gid_list {
                            changed |= affected.insert(*gid);
                        }
                    }
                }
            }

            for entries in cluster.composite_key_map().values() {
                for (_, gid_list) in entries {
                    if gid_list.iter().any(|gid| affected.contains(gid)) {
                        for gid in gid_list {
                            changed |= affected.insert(*gid);
                        }
                    }
                }
            }

            if !changed {
                break;
            }
        }

        // column graph: rollback 事务的写列集与相关的后续事务
        let write_sets = self.scan_write_column_sets()?;
        let rollback_hashes: Vec<u64> = rollback_gids
            .iter()
            .filter_map(|gid| write_sets.get(gid))
            .map(hash_column_set)
            .collect();

        let min_rollback = rollback_gids.first().copied().unwrap_or(0);
        for (gid, columns) in &write_sets {
            if *gid < min_rollback || affected.contains(gid) {
                continue;
            }

            let hash = hash_column_set(columns);
            if rollback_hashes
                .iter()
                .any(|rollback_hash| column_graph.is_related_hash(*rollback_hash, hash))
            {
                affected.insert(*gid);
            }
        }

        let mut affected_gids: Vec<Gid> = affected.into_iter().collect();
        affected_gids.sort_unstable();

        let plan_file = ReplayPlanFile {
            rollback_gids,
            affected_gids,
        };

        let path = self.plan_file_path();
        fs::write(&path, serde_json::to_string_pretty(&plan_file)?)
            .map_err(|e| UltError::String(format!("failed to write plan file {}: {}", path, e)))?;

        info!(
            "plan written to {}: {} rollback targets, {} affected transactions",
            path,
            plan_file.rollback_gids.len(),
            plan_file.affected_gids.len()
        );

        Ok(plan_file)
    }

    /// auto-rollback: 按比例抽取 rollback 目标后走 prepare 的计算
    pub fn bench_prepare_rollback(&mut self) -> UltResult<ReplayPlanFile> {
        let ratio = match *self.plan.auto_rollback_ratio() {
            Some(ratio) if ratio > 0.0 => ratio.min(1.0),
            _ => {
                return Err(UltError::Config(String::from("auto rollback ratio is not set")));
            }
        };

        let write_sets = self.scan_write_column_sets()?;
        let mut gids: Vec<Gid> = write_sets.keys().copied().collect();
        gids.sort_unstable();

        let sample_count = ((gids.len() as f64) * ratio).floor() as usize;
        let mut rng = rand::thread_rng();
        let mut sampled: Vec<Gid> = gids.choose_multiple(&mut rng, sample_count.max(1)).copied().collect();
        sampled.sort_unstable();

        info!("auto-rollback sampled {} of {} transactions", sampled.len(), gids.len());

        self.plan.rollback_gids_mut().clear();
        self.plan.rollback_gids_mut().extend(sampled);

        let prepare_start = Instant::now();
        let plan_file = self.prepare()?;
        let elapsed = prepare_start.elapsed().as_secs_f64();

        info!("prepare finished in {}s", elapsed);

        if !self.plan.report_path().is_empty() {
            let mut report = StateChangeReport::new("auto-rollback");
            report.execution_time = elapsed;
            report.rollback_gids = plan_file.rollback_gids.clone();
            report.affected_gids = plan_file.affected_gids.clone();
            report.write_to_json(self.plan.report_path())?;
        }

        Ok(plan_file)
    }

    /// gid → 事务写列集
    fn scan_write_column_sets(&mut self) -> UltResult<HashMap<Gid, ColumnSet>> {
        let mut write_sets = HashMap::new();

        self.reader.open()?;
        while self.reader.next_header() {
            let gid = self.reader.txn_header().unwrap().gid;

            if !self.reader.next_transaction() {
                continue;
            }
            let transaction = self.reader.take_txn_body().unwrap();

            let mut columns = ColumnSet::new();
            for query in transaction.queries() {
                columns.extend(query.write_columns.iter().cloned());
            }

            write_sets.insert(gid, columns);
        }
        self.reader.close();

        Ok(write_sets)
    }
}

#[cfg(test)]
mod test {
    use state::data::StateData;
    use state::item::StateItem;
    use state::query::Query;
    use state::statelog::StateLogWriter;
    use state::transaction::Transaction;

    use crate::changer::test::recording_pool;
    use crate::changer::StateChanger;
    use crate::plan::StateChangePlan;

    fn temp_dir(tag: &str) -> String {
        let dir = std::env::temp_dir().join(format!("ult_prepare_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.to_str().unwrap().to_string()
    }

    fn keyed_transaction(gid: u64, key_value: i64) -> Transaction {
        let mut transaction = Transaction::new();
        transaction.gid = gid;
        transaction.timestamp = 1666000000;

        let mut query = Query::new();
        query.statement = format!("UPDATE users SET v = 1 WHERE id = {}", key_value);
        query
            .write_set
            .push(StateItem::eq_item("users.id", StateData::Int(key_value)));
        query.write_columns.insert(String::from("users.id"));
        transaction.push(query);

        transaction
    }

    fn build_changer(dir: &str, rollback: Vec<u64>) -> StateChanger {
        let (pool, _) = recording_pool();

        let mut plan = StateChangePlan::new();
        plan.set_state_log_path(dir.to_string());
        plan.set_state_log_name(String::from("shop"));
        plan.set_key_column_groups(vec![vec![String::from("users.id")]]);
        plan.rollback_gids_mut().extend(rollback);

        StateChanger::new(pool, plan)
    }

    #[test]
    fn test_prepare_computes_cluster_closure() {
        let dir = temp_dir("closure");

        {
            let mut writer = StateLogWriter::new(&dir, "shop");
            writer.open(false).unwrap();
            // gid 0,1 触同一行; gid 2 触另一行
            writer.write_transaction(&keyed_transaction(0, 1)).unwrap();
            writer.write_transaction(&keyed_transaction(1, 1)).unwrap();
            writer.write_transaction(&keyed_transaction(2, 500)).unwrap();
            writer.close().unwrap();
        }

        // cluster 先行
        let mut builder = build_changer(&dir, vec![]);
        builder.make_cluster().unwrap();

        let mut changer = build_changer(&dir, vec![0]);
        let plan_file = changer.prepare().unwrap();

        assert_eq!(plan_file.rollback_gids, vec![0]);
        assert!(plan_file.affected_gids.contains(&0));
        assert!(plan_file.affected_gids.contains(&1));

        // plan 文件落盘并可被 replay 读回
        let read_back = changer.read_plan_file().unwrap();
        assert_eq!(read_back.rollback_gids, plan_file.rollback_gids);
        assert_eq!(read_back.affected_gids, plan_file.affected_gids);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_prepare_without_cluster_fails() {
        let dir = temp_dir("nocluster");

        {
            let mut writer = StateLogWriter::new(&dir, "shop");
            writer.open(false).unwrap();
            writer.write_transaction(&keyed_transaction(0, 1)).unwrap();
            writer.close().unwrap();
        }

        let mut changer = build_changer(&dir, vec![0]);
        assert!(changer.prepare().is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bench_prepare_rollback_samples() {
        let dir = temp_dir("bench");

        {
            let mut writer = StateLogWriter::new(&dir, "shop");
            writer.open(false).unwrap();
            for gid in 0..10 {
                writer.write_transaction(&keyed_transaction(gid, gid as i64 * 100)).unwrap();
            }
            writer.close().unwrap();
        }

        let mut builder = build_changer(&dir, vec![]);
        builder.make_cluster().unwrap();

        let mut changer = build_changer(&dir, vec![]);
        changer.plan.set_auto_rollback_ratio(Some(0.3));

        let plan_file = changer.bench_prepare_rollback().unwrap();
        assert_eq!(plan_file.rollback_gids.len(), 3);

        // rollback_gids 升序且不重复
        let mut sorted = plan_file.rollback_gids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted, plan_file.rollback_gids);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
