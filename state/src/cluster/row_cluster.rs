use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::trace;

use common::executor::TaskExecutor;
use common::utils::{split_table_name, to_lower};

use crate::context::ForeignKey;
use crate::data::StateData;
use crate::item::StateItem;
use crate::query::Query;
use crate::range::StateRange;
use crate::transaction::Transaction;
use crate::Gid;

/// helper graph 重建阶段的工作线程数
const MERGE_WORKERS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct RowAlias {
    pub alias: StateItem,
    pub real: StateItem,
}

/// column → (字面量 → alias 映射)
pub type AliasMap = HashMap<String, HashMap<StateData, RowAlias>>;

pub type GidList = Vec<Gid>;

/// 复合 key 的分量 range 组, 下标与 (排序后的) 列名对齐
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositeRange {
    pub ranges: Vec<StateRange>,
}

/// 非 wildcard 合并用的 helper graph。顶点负载是 (cluster 下标, visited)。
#[derive(Debug, Default, Clone)]
struct ClusterGraph {
    vertices: Vec<(usize, bool)>,
    adjacency: Vec<Vec<usize>>,
}

impl ClusterGraph {
    fn add_vertex(&mut self, cluster_index: usize) {
        self.vertices.push((cluster_index, false));
        self.adjacency.push(vec![]);
    }

    fn clear(&mut self) {
        self.vertices.clear();
        self.adjacency.clear();
    }
}

/// key column → 合并后的 (range, 拥有者 GID 列表) 序列。
///
/// 外加 alias 解析 (含十进制字符串 coercion)、外键/隐式外键追踪、
/// 复合 key 与 wildcard 合并。
#[derive(Debug, Default)]
pub struct RowCluster {
    pub(crate) cluster_map: HashMap<String, Vec<(StateRange, GidList)>>,
    cluster_graph: HashMap<String, ClusterGraph>,
    pub(crate) wildcard_map: HashMap<String, bool>,

    pub(crate) aliases: AliasMap,
    pub(crate) composite_cluster_map: HashMap<String, Vec<(CompositeRange, GidList)>>,
}

/// `table.column` 经外键追到引用端。
/// 没有显式外键且列名形如 `xxx_id` 时, 按 `{base, base+"s", base+"es"}`
/// 探测 implicit_tables, 命中则归到 `<table>.id`。
pub fn resolve_foreign_key(
    expr_name: &str,
    foreign_keys: &[ForeignKey],
    implicit_tables: Option<&HashSet<String>>,
) -> String {
    let mut current = to_lower(expr_name);

    // 外键无环时 ≤ |fks| 步内收敛
    for _ in 0..=foreign_keys.len() {
        let (table_name, column_name) = split_table_name(&current);

        let matched = foreign_keys
            .iter()
            .find(|fk| fk.from_table == table_name && fk.from_column == column_name);

        match matched {
            Some(fk) => {
                current = to_lower(&format!("{}.{}", fk.to_table, fk.to_column));
            }
            None => {
                if let Some(implicit_tables) = implicit_tables {
                    if let Some(base) = column_name.strip_suffix("_id") {
                        if !base.is_empty() {
                            for candidate in [base.to_string(), format!("{}s", base), format!("{}es", base)] {
                                if implicit_tables.contains(&candidate) {
                                    return format!("{}.id", candidate);
                                }
                            }
                        }
                    }
                }
                return current;
            }
        }
    }

    current
}

impl PartialEq for RowCluster {
    fn eq(&self, other: &Self) -> bool {
        // helper graph 是合并期间的暂态, 不参与等价判定
        self.cluster_map == other.cluster_map
            && self.wildcard_map == other.wildcard_map
            && self.aliases == other.aliases
            && self.composite_cluster_map == other.composite_cluster_map
    }
}

impl RowCluster {
    pub fn new() -> Self {
        RowCluster::default()
    }

    pub fn has_key(&self, column_name: &str) -> bool {
        self.cluster_map.contains_key(column_name)
    }

    pub fn add_key(&mut self, column_name: &str) {
        if self.has_key(column_name) {
            return;
        }

        self.cluster_map.insert(column_name.to_string(), vec![]);
    }

    pub fn add_key_range(&mut self, column_name: &str, range: StateRange, gid: Gid) {
        let cluster = self.cluster_map.entry(column_name.to_string()).or_default();
        let graph = self.cluster_graph.entry(column_name.to_string()).or_default();

        cluster.push((range, vec![gid]));
        graph.add_vertex(cluster.len() - 1);
    }

    pub fn set_wildcard(&mut self, column_name: &str, wildcard: bool) {
        self.wildcard_map.insert(column_name.to_string(), wildcard);
    }

    pub fn is_wildcard(&self, column_name: &str) -> bool {
        self.wildcard_map.get(column_name).copied().unwrap_or(false)
    }

    pub fn key_map(&self) -> &HashMap<String, Vec<(StateRange, GidList)>> {
        &self.cluster_map
    }

    pub fn composite_key_map(&self) -> &HashMap<String, Vec<(CompositeRange, GidList)>> {
        &self.composite_cluster_map
    }

    pub fn alias_map(&self) -> &AliasMap {
        &self.aliases
    }

    //////////////////////
    // aliases
    //////////////////////

    pub fn add_alias(&mut self, alias: StateItem, real: StateItem) {
        let key = match alias.data_list.first() {
            Some(value) => value.clone(),
            None => return,
        };

        self.aliases
            .entry(alias.name.clone())
            .or_default()
            .insert(key, RowAlias { alias, real });
    }

    pub fn resolve_alias<'a>(alias: &'a StateItem, alias_map: &'a AliasMap) -> &'a StateItem {
        let container = match alias_map.get(&alias.name) {
            Some(container) => container,
            None => return alias,
        };

        let key = match alias.data_list.first() {
            Some(key) => key,
            None => return alias,
        };

        match container.get(key) {
            Some(row_alias) => &row_alias.real,
            None => alias,
        }
    }

    pub fn resolve_alias_name(alias_map: &AliasMap, alias: &str) -> String {
        match alias_map.get(alias).and_then(|container| container.values().next()) {
            Some(row_alias) => row_alias.real.name.clone(),
            None => alias.to_string(),
        }
    }

    /// 直查失败后尝试 coercion:
    /// 样本 real 值是整数、alias 值全是十进制数字串时, 整串转换后再查。
    /// 任一值转换失败则整体放弃。
    fn resolve_alias_with_coercion(
        resolved_name: &str,
        item: &StateItem,
        alias_map: &AliasMap,
    ) -> Option<StateItem> {
        let container = alias_map.get(resolved_name)?;
        if container.is_empty() {
            return None;
        }

        if let Some(key) = item.data_list.first() {
            if let Some(row_alias) = container.get(key) {
                return Some(row_alias.real.clone());
            }
        }

        let sample = container.values().next()?;
        let sample_value = sample.real.data_list.first()?;
        sample_value.get_int().or(sample_value.get_uint().map(|v| v as i64))?;

        let mut converted = Vec::with_capacity(item.data_list.len());
        for data in &item.data_list {
            if !data.is_decimal_digit_string() {
                return None;
            }

            let parsed: i64 = data.get_string()?.parse().ok()?;
            converted.push(StateData::Int(parsed));
        }

        Some(StateItem {
            condition_type: item.condition_type,
            function_type: item.function_type,
            name: sample.real.name.clone(),
            data_list: converted,
            arg_list: item.arg_list.clone(),
            sub_query_list: item.sub_query_list.clone(),
            ..Default::default()
        })
    }

    //////////////////////
    // merge
    //////////////////////

    pub fn merge_cluster(&mut self, column_name: &str) {
        if self.is_wildcard(column_name) {
            self.merge_cluster_all(column_name);
        } else {
            self.merge_cluster_using_graph(column_name);
        }
    }

    fn merge_cluster_all(&mut self, column_name: &str) {
        let cluster = match self.cluster_map.get_mut(column_name) {
            Some(cluster) => cluster,
            None => return,
        };

        if cluster.len() < 2 {
            return;
        }

        let mut merged = cluster.remove(0);
        for (range, gids) in cluster.drain(..) {
            merged.0.or_fast(&range);
            merged.1.extend(gids);
        }
        merged.0.arrange_self();

        cluster.push(merged);

        if let Some(graph) = self.cluster_graph.get_mut(column_name) {
            graph.clear();
        }
    }

    fn merge_cluster_using_graph(&mut self, column_name: &str) {
        let cluster = match self.cluster_map.get_mut(column_name) {
            Some(cluster) => cluster,
            None => return,
        };
        let graph = self.cluster_graph.entry(column_name.to_string()).or_default();

        // phase A: 连通分量内 OR 融合, gid 列表拼接
        let mut new_cluster: Vec<(StateRange, GidList)> = vec![];

        for start in 0..graph.vertices.len() {
            if graph.vertices[start].1 {
                continue;
            }

            let mut range = StateRange::new();
            let mut gid_list: GidList = vec![];

            // 显式栈展开, 深分量不会打爆调用栈
            let mut stack = vec![start];
            while let Some(vertex) = stack.pop() {
                if graph.vertices[vertex].1 {
                    continue;
                }
                graph.vertices[vertex].1 = true;
                trace!("visiting node {}", graph.vertices[vertex].0);

                let cluster_index = graph.vertices[vertex].0;
                range.or_fast(&cluster[cluster_index].0);
                gid_list.extend(cluster[cluster_index].1.iter().copied());

                for adjacent in &graph.adjacency[vertex] {
                    if !graph.vertices[*adjacent].1 {
                        stack.push(*adjacent);
                    }
                }
            }

            range.arrange_self();
            new_cluster.push((range, gid_list));
        }

        graph.clear();

        // phase B: 新 cluster 上重建 helper graph (并行 intersect 扫描)
        let entry_count = new_cluster.len();
        let entries = Arc::new(new_cluster);
        let shared = Arc::new(Mutex::new((vec![Vec::<usize>::new(); entry_count], false)));

        {
            let executor = TaskExecutor::new(MERGE_WORKERS);
            let mut receivers = vec![];

            for i in 0..entry_count {
                let entries = Arc::clone(&entries);
                let shared = Arc::clone(&shared);

                receivers.push(executor.post(move || {
                    trace!("reconstructing graph.. {} / {}", i, entries.len());

                    for j in 0..entries.len() {
                        if i == j {
                            continue;
                        }

                        if StateRange::is_intersects(&entries[i].0, &entries[j].0) {
                            let mut guard = shared.lock().unwrap();
                            guard.1 = true;
                            guard.0[j].push(i);
                            guard.0[i].push(j);
                            break;
                        }
                    }

                    0
                }));
            }

            for receiver in receivers {
                let _ = receiver.recv();
            }
        }

        let entries = Arc::try_unwrap(entries).expect("merge workers have exited");
        let (adjacency, rerun) = Arc::try_unwrap(shared)
            .expect("merge workers have exited")
            .into_inner()
            .unwrap();

        *self.cluster_map.get_mut(column_name).unwrap() = entries;

        let graph = self.cluster_graph.get_mut(column_name).unwrap();
        graph.vertices = (0..entry_count).map(|index| (index, false)).collect();
        graph.adjacency = adjacency;

        // 仍有相交对 → 从 phase A 重跑。每轮分量数严格减少, 必然终止。
        if rerun {
            self.merge_cluster_using_graph(column_name);
        }
    }

    //////////////////////
    // composite keys
    //////////////////////

    fn normalize_composite_key_id(columns: &[String]) -> String {
        if columns.is_empty() {
            return String::new();
        }

        let mut normalized: Vec<String> = columns.iter().map(|column| to_lower(column)).collect();
        normalized.sort();
        normalized.join("|")
    }

    fn normalize_composite_input(columns: &[String], ranges: &CompositeRange) -> Option<(String, CompositeRange)> {
        if columns.len() != ranges.ranges.len() || columns.is_empty() {
            return None;
        }

        let mut pairs: Vec<(String, StateRange)> = columns
            .iter()
            .map(|column| to_lower(column))
            .zip(ranges.ranges.iter().cloned())
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        let key_id = pairs.iter().map(|(column, _)| column.clone()).collect::<Vec<_>>().join("|");
        let normalized = CompositeRange {
            ranges: pairs.into_iter().map(|(_, range)| range).collect(),
        };

        Some((key_id, normalized))
    }

    pub fn add_composite_key(&mut self, columns: &[String]) {
        let key_id = Self::normalize_composite_key_id(columns);
        if key_id.is_empty() {
            return;
        }

        self.composite_cluster_map.entry(key_id).or_default();
    }

    pub fn add_composite_key_range(&mut self, columns: &[String], ranges: CompositeRange, gid: Gid) {
        let (key_id, normalized) = match Self::normalize_composite_input(columns, &ranges) {
            Some(normalized) => normalized,
            None => return,
        };

        self.composite_cluster_map
            .entry(key_id)
            .or_default()
            .push((normalized, vec![gid]));
    }

    fn composite_intersects(lhs: &CompositeRange, rhs: &CompositeRange) -> bool {
        if lhs.ranges.len() != rhs.ranges.len() || lhs.ranges.is_empty() {
            return false;
        }

        lhs.ranges
            .iter()
            .zip(rhs.ranges.iter())
            .all(|(a, b)| StateRange::is_intersects(a, b))
    }

    fn composite_merge(dst: &mut CompositeRange, src: &CompositeRange) {
        if dst.ranges.len() != src.ranges.len() {
            return;
        }

        for (dst_range, src_range) in dst.ranges.iter_mut().zip(src.ranges.iter()) {
            dst_range.or_fast(src_range);
            dst_range.arrange_self();
        }
    }

    /// 两两相交检查的平方级合并, 无相交对时终止
    pub fn merge_composite_cluster(&mut self, columns: &[String]) {
        let key_id = Self::normalize_composite_key_id(columns);
        if key_id.is_empty() {
            return;
        }

        let cluster = match self.composite_cluster_map.get_mut(&key_id) {
            Some(cluster) => cluster,
            None => return,
        };

        if cluster.len() < 2 {
            return;
        }

        let mut merged = true;
        while merged {
            merged = false;

            'outer: for i in 0..cluster.len() {
                for j in (i + 1)..cluster.len() {
                    if !Self::composite_intersects(&cluster[i].0, &cluster[j].0) {
                        continue;
                    }

                    let (src_range, src_gids) = cluster.remove(j);
                    Self::composite_merge(&mut cluster[i].0, &src_range);
                    cluster[i].1.extend(src_gids);

                    merged = true;
                    break 'outer;
                }
            }
        }
    }

    //////////////////////
    // relevance
    //////////////////////

    fn is_expr_related(
        key_column: &str,
        key_range: &StateRange,
        expr: &StateItem,
        foreign_keys: &[ForeignKey],
        aliases: &AliasMap,
        implicit_tables: Option<&HashSet<String>>,
    ) -> bool {
        if !expr.name.is_empty() {
            let resolved_name = resolve_foreign_key(&expr.name, foreign_keys, implicit_tables);

            if let Some(resolved) = Self::resolve_alias_with_coercion(&resolved_name, expr, aliases) {
                return Self::is_expr_related(key_column, key_range, &resolved, foreign_keys, aliases, implicit_tables);
            }

            if key_column == resolved_name && StateRange::is_intersects(expr.make_range2(), key_range) {
                return true;
            }
        }

        expr.arg_list
            .iter()
            .chain(expr.sub_query_list.iter())
            .any(|sub_expr| {
                Self::is_expr_related(key_column, key_range, sub_expr, foreign_keys, aliases, implicit_tables)
            })
    }

    pub fn is_query_related(
        key_column: &str,
        key_range: &StateRange,
        query: &Query,
        foreign_keys: &[ForeignKey],
        aliases: &AliasMap,
        implicit_tables: Option<&HashSet<String>>,
    ) -> bool {
        query
            .read_set
            .iter()
            .chain(query.write_set.iter())
            .any(|expr| Self::is_expr_related(key_column, key_range, expr, foreign_keys, aliases, implicit_tables))
    }

    /// 复合 key: 所有分量都相关才算相关
    pub fn is_query_related_composite(
        key_columns: &[String],
        key_ranges: &CompositeRange,
        query: &Query,
        foreign_keys: &[ForeignKey],
        aliases: &AliasMap,
        implicit_tables: Option<&HashSet<String>>,
    ) -> bool {
        if key_columns.len() != key_ranges.ranges.len() {
            return false;
        }

        key_columns.iter().zip(key_ranges.ranges.iter()).all(|(column, range)| {
            Self::is_query_related(column, range, query, foreign_keys, aliases, implicit_tables)
        })
    }

    pub fn is_transaction_related(gid: Gid, gid_list: &[Gid]) -> bool {
        gid_list.contains(&gid)
    }

    pub fn get_key_range_of(
        &self,
        transaction: &Transaction,
        key_column: &str,
        foreign_keys: &[ForeignKey],
    ) -> Vec<(StateRange, GidList)> {
        let mut key_ranges = vec![];

        let cluster = match self.cluster_map.get(key_column) {
            Some(cluster) => cluster,
            None => return key_ranges,
        };

        for query in transaction.queries() {
            for (range, gid_list) in cluster {
                if Self::is_query_related(key_column, range, query, foreign_keys, &self.aliases, None) {
                    key_ranges.push((range.clone(), gid_list.clone()));
                }
            }
        }

        key_ranges
    }

    /// gid 归属判定版本: cluster entry 已拥有该事务 gid 即相关
    pub fn get_key_range_of2(
        &self,
        transaction: &Transaction,
        key_column: &str,
        _foreign_keys: &[ForeignKey],
    ) -> Vec<(StateRange, GidList)> {
        let mut key_ranges = vec![];

        if let Some(cluster) = self.cluster_map.get(key_column) {
            for (range, gid_list) in cluster {
                if Self::is_transaction_related(transaction.gid, gid_list) {
                    key_ranges.push((range.clone(), gid_list.clone()));
                }
            }
        }

        key_ranges
    }
}
