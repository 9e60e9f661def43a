use std::collections::HashMap;
use std::hash::Hasher;

use fnv::FnvHasher;
use tracing::trace;

use common::utils::split_table_name;

use crate::cluster::row_cluster::resolve_foreign_key;
use crate::context::ForeignKey;
use crate::query::ColumnSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnAccessType {
    Read = 0,
    Write = 1,
}

/// 一次访问涉及的列集合
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDependencyNode {
    pub column_set: ColumnSet,
    pub access_type: ColumnAccessType,
    pub hash: u64,
}

/// 列集合的 64-bit 指纹, 顶点去重用
pub fn hash_column_set(column_set: &ColumnSet) -> u64 {
    let mut hasher = FnvHasher::default();
    for column in column_set {
        hasher.write(column.as_bytes());
        hasher.write_u8(0);
    }
    hasher.finish()
}

/// 写访问列集合的无向依赖图。
///
/// 新顶点只与既有 WRITE 顶点连边 (R-R, R-W 忽略);
/// 列匹配要先做外键追踪, 表通配 `T.*` 经由外键耦合也算匹配。
#[derive(Debug, Default)]
pub struct ColumnDependencyGraph {
    pub(crate) nodes: Vec<ColumnDependencyNode>,
    pub(crate) adjacency: Vec<Vec<usize>>,
    pub(crate) node_map: HashMap<u64, usize>,
}

fn dump_column_set(column_set: &ColumnSet) -> String {
    let mut out = String::new();
    for column in column_set {
        out.push_str(column);
        out.push(',');
    }
    out
}

fn columns_match(column1: &str, column2: &str, foreign_keys: &[ForeignKey]) -> bool {
    let (table1, col1) = split_table_name(&resolve_foreign_key(column1, foreign_keys, None));
    let (table2, col2) = split_table_name(&resolve_foreign_key(column2, foreign_keys, None));

    if col1 == "*" || col2 == "*" {
        let coupled = foreign_keys.iter().any(|fk| {
            ((fk.from_table == table1 && fk.to_table == table2)
                || (fk.from_table == table2 && fk.to_table == table1))
                && (fk.from_column == col1
                    || fk.from_column == col2
                    || fk.to_column == col1
                    || fk.to_column == col2)
        });

        if coupled {
            return true;
        }
    }

    table1 == table2 && (col1 == col2 || col1 == "*" || col2 == "*")
}

impl ColumnDependencyGraph {
    pub fn new() -> Self {
        ColumnDependencyGraph::default()
    }

    /// 同一列集合 (同 hash) 只进图一次; 返回图是否变化。
    pub fn add(
        &mut self,
        column_set: ColumnSet,
        access_type: ColumnAccessType,
        foreign_keys: &[ForeignKey],
    ) -> bool {
        let hash = hash_column_set(&column_set);
        if self.node_map.contains_key(&hash) {
            return false;
        }

        trace!("adding columnset: {}", dump_column_set(&column_set));

        let node_index = self.nodes.len();
        self.nodes.push(ColumnDependencyNode {
            column_set,
            access_type,
            hash,
        });
        self.adjacency.push(vec![]);
        self.node_map.insert(hash, node_index);

        for index in 0..node_index {
            if self.nodes[index].access_type == ColumnAccessType::Read {
                continue;
            }

            let is_related = self.nodes[index].column_set.iter().any(|column| {
                self.nodes[node_index]
                    .column_set
                    .iter()
                    .any(|target| columns_match(column, target, foreign_keys))
            });

            if is_related {
                trace!(
                    "creating relationship: ({}) <=> ({})",
                    dump_column_set(&self.nodes[index].column_set),
                    dump_column_set(&self.nodes[node_index].column_set)
                );
                self.adjacency[index].push(node_index);
                self.adjacency[node_index].push(index);
            }
        }

        true
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.adjacency.clear();
        self.node_map.clear();
    }

    pub fn is_related(&self, a: &ColumnSet, b: &ColumnSet) -> bool {
        self.is_related_hash(hash_column_set(a), hash_column_set(b))
    }

    pub fn is_related_hash(&self, hash_a: u64, hash_b: u64) -> bool {
        let index_a = match self.node_map.get(&hash_a) {
            Some(index) => *index,
            None => return false,
        };
        let index_b = match self.node_map.get(&hash_b) {
            Some(index) => *index,
            None => return false,
        };

        self.adjacency[index_a].contains(&index_b)
    }

    pub fn nodes(&self) -> &[ColumnDependencyNode] {
        &self.nodes
    }
}

impl PartialEq for ColumnDependencyGraph {
    fn eq(&self, other: &Self) -> bool {
        if self.nodes.len() != other.nodes.len() {
            return false;
        }

        self.nodes.iter().enumerate().all(|(index, node)| {
            let other_index = match other.node_map.get(&node.hash) {
                Some(other_index) => *other_index,
                None => return false,
            };

            if other.nodes[other_index] != *node {
                return false;
            }

            let mut lhs: Vec<u64> = self.adjacency[index]
                .iter()
                .map(|adjacent| self.nodes[*adjacent].hash)
                .collect();
            let mut rhs: Vec<u64> = other.adjacency[other_index]
                .iter()
                .map(|adjacent| other.nodes[*adjacent].hash)
                .collect();
            lhs.sort_unstable();
            rhs.sort_unstable();

            lhs == rhs
        })
    }
}
