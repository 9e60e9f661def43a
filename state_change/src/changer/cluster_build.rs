use tracing::info;

use common::err::UltResult;
use common::utils::split_table_name;

use state::cluster::row_cluster::resolve_foreign_key;
use state::cluster::{CompositeRange, RowCluster};
use state::context::ForeignKey;
use state::graph::{ColumnAccessType, ColumnDependencyGraph, TableDependencyGraph};
use state::item::StateItem;
use state::query::Query;
use state::range::StateRange;

use super::StateChanger;

/// query 在 key column 上触到的范围。
/// 返回 (range, 是否整表通配)。
fn query_key_state(
    query: &Query,
    key_column: &str,
    foreign_keys: &[ForeignKey],
) -> (Option<StateRange>, bool) {
    let (key_table, _) = split_table_name(key_column);
    let table_wildcard = format!("{}.*", key_table);

    let mut range: Option<StateRange> = None;
    let mut wildcard = false;

    let mut visit = |item: &StateItem| -> bool {
        let resolved = resolve_foreign_key(&item.name, foreign_keys, None);

        if resolved == key_column {
            let item_range = item.make_range2().clone();
            match range.as_mut() {
                Some(range) => {
                    range.or_fast(&item_range);
                }
                None => range = Some(item_range),
            }
        } else if resolved == table_wildcard {
            wildcard = true;
        }

        false
    };

    for item in query.read_set.iter().chain(query.write_set.iter()) {
        item.visit_leaves(&mut visit);
    }

    if let Some(range) = range.as_mut() {
        range.arrange_self();
    }

    (range, wildcard)
}

/// 同一条 query 里 alias 列与 real 列同时出现字面量时登记 alias 映射
fn collect_aliases(cluster: &mut RowCluster, query: &Query, column_aliases: &[(String, String)]) {
    for (real_column, alias_column) in column_aliases {
        let mut alias_item: Option<StateItem> = None;
        let mut real_item: Option<StateItem> = None;

        let mut visit = |item: &StateItem| -> bool {
            if item.data_list.is_empty() {
                return false;
            }
            if item.name == *alias_column {
                alias_item = Some(item.clone());
            } else if item.name == *real_column {
                real_item = Some(item.clone());
            }
            false
        };

        for item in query.read_set.iter().chain(query.write_set.iter()) {
            item.visit_leaves(&mut visit);
        }

        if let (Some(alias), Some(real)) = (alias_item, real_item) {
            cluster.add_alias(alias, real);
        }
    }
}

impl StateChanger {
    /// state log 全量扫描 → column graph / table graph / row cluster 三个辅助文件。
    /// 不触数据库。
    pub fn make_cluster(&mut self) -> UltResult<()> {
        self.mode = super::OperationMode::MakeCluster;

        info!("building cluster files from state log");

        let mut column_graph = ColumnDependencyGraph::new();
        let mut table_graph = TableDependencyGraph::new();
        let mut cluster = RowCluster::new();

        let key_column_groups = self.plan.key_column_groups().clone();
        let column_aliases = self.plan.column_aliases().clone();
        let foreign_keys = self.foreign_keys();

        for group in &key_column_groups {
            if group.len() == 1 {
                cluster.add_key(&group[0]);
            } else {
                cluster.add_composite_key(group);
            }
        }

        self.reader.open()?;

        let mut transaction_count = 0u64;
        while self.reader.next_header() {
            if !self.reader.next_transaction() {
                // body 坏掉: 位置已经在 next_pos, 继续
                continue;
            }

            let transaction = self.reader.take_txn_body().unwrap();
            let gid = transaction.gid;
            transaction_count += 1;

            for query in transaction.queries() {
                column_graph.add(query.write_columns.clone(), ColumnAccessType::Write, &foreign_keys);
                if !query.read_columns.is_empty() {
                    column_graph.add(query.read_columns.clone(), ColumnAccessType::Read, &foreign_keys);
                }

                table_graph.add_relationship_sets(&query.read_columns, &query.write_columns);

                collect_aliases(&mut cluster, query, &column_aliases);

                for group in &key_column_groups {
                    if group.len() == 1 {
                        let key_column = &group[0];
                        let (range, wildcard) = query_key_state(query, key_column, &foreign_keys);

                        if wildcard {
                            cluster.set_wildcard(key_column, true);
                            cluster.add_key_range(key_column, StateRange::wildcard(), gid);
                        } else if let Some(range) = range {
                            if !range.is_empty() {
                                cluster.add_key_range(key_column, range, gid);
                            }
                        }
                    } else {
                        let mut ranges = vec![];
                        for key_column in group {
                            match query_key_state(query, key_column, &foreign_keys) {
                                (_, true) => ranges.push(StateRange::wildcard()),
                                (Some(range), false) if !range.is_empty() => ranges.push(range),
                                _ => {
                                    ranges.clear();
                                    break;
                                }
                            }
                        }

                        // 所有分量都有范围才构成复合 key 条目
                        if ranges.len() == group.len() {
                            cluster.add_composite_key_range(group, CompositeRange { ranges }, gid);
                        }
                    }
                }
            }
        }

        self.reader.close();

        for group in &key_column_groups {
            if group.len() == 1 {
                cluster.merge_cluster(&group[0]);
            } else {
                cluster.merge_composite_cluster(group);
            }
        }

        self.cluster_store.write_row_cluster(&cluster)?;
        self.cluster_store.write_table_graph(&table_graph)?;
        self.cluster_store.write_column_graph(&column_graph)?;

        info!(
            "cluster files written ({} transactions, {} cluster keys)",
            transaction_count,
            cluster.key_map().len()
        );

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use state::cluster::RowCluster;
    use state::data::StateData;
    use state::item::StateItem;
    use state::query::Query;
    use state::range::StateRange;
    use state::statelog::{StateClusterStore, StateLogWriter};
    use state::transaction::Transaction;

    use crate::changer::test::recording_pool;
    use crate::changer::StateChanger;
    use crate::plan::StateChangePlan;

    use super::query_key_state;

    fn temp_dir(tag: &str) -> String {
        let dir = std::env::temp_dir().join(format!("ult_makecluster_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.to_str().unwrap().to_string()
    }

    fn write_transaction(writer: &mut StateLogWriter, gid: u64, read_name: &str, value: i64) {
        let mut transaction = Transaction::new();
        transaction.gid = gid;
        transaction.timestamp = 1666000000 + gid;

        let mut query = Query::new();
        query.statement = format!("UPDATE t SET v = 1 WHERE {} = {}", read_name, value);
        query.write_set.push(StateItem::eq_item(read_name, StateData::Int(value)));
        query.write_columns.insert(read_name.to_string());
        transaction.push(query);

        writer.write_transaction(&transaction).unwrap();
    }

    #[test]
    fn test_query_key_state() {
        let mut query = Query::new();
        query.read_set.push(StateItem::eq_item("users.id", StateData::Int(1)));
        query.read_set.push(StateItem::eq_item("users.id", StateData::Int(5)));

        let (range, wildcard) = query_key_state(&query, "users.id", &[]);
        assert!(!wildcard);
        let range = range.unwrap();
        assert!(StateRange::is_intersects(&range, &StateRange::from(1)));
        assert!(StateRange::is_intersects(&range, &StateRange::from(5)));
        assert!(!StateRange::is_intersects(&range, &StateRange::from(3)));

        let mut ddl = Query::new();
        ddl.write_set.push(StateItem::wildcard_item("users.*"));
        let (_, wildcard) = query_key_state(&ddl, "users.id", &[]);
        assert!(wildcard);
    }

    #[test]
    fn test_make_cluster_end_to_end() {
        let dir = temp_dir("e2e");

        {
            let mut writer = StateLogWriter::new(&dir, "shop");
            writer.open(false).unwrap();
            write_transaction(&mut writer, 0, "users.id", 1);
            write_transaction(&mut writer, 1, "users.id", 1);
            write_transaction(&mut writer, 2, "users.id", 50);
            writer.close().unwrap();
        }

        let (pool, _) = recording_pool();
        let mut plan = StateChangePlan::new();
        plan.set_state_log_path(dir.clone());
        plan.set_state_log_name(String::from("shop"));
        plan.set_key_column_groups(vec![vec![String::from("users.id")]]);

        let mut changer = StateChanger::new(pool, plan);
        changer.make_cluster().unwrap();

        let store = StateClusterStore::new(&dir, "shop");
        let cluster: RowCluster = store.read_row_cluster().unwrap();

        let entries = &cluster.key_map()["users.id"];
        assert_eq!(entries.len(), 2);

        // gid 0/1 共享同一个点, gid 2 独立
        let mut sizes: Vec<usize> = entries.iter().map(|(_, gids)| gids.len()).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 2]);

        let table_graph = store.read_table_graph().unwrap();
        assert!(table_graph.is_related("users", "users"));

        let column_graph = store.read_column_graph().unwrap();
        assert_eq!(column_graph.nodes().len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
