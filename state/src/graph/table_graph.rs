use std::collections::HashMap;

use tracing::debug;

use common::utils::split_table_name;

use crate::context::ForeignKey;
use crate::query::ColumnSet;

/// 表级依赖有向图。顶点是小写表名, 边是 "读表 → 受影响的写表"。
///
/// 顶点放在 index arena 里, 边存顶点下标。
#[derive(Debug, Default)]
pub struct TableDependencyGraph {
    pub(crate) nodes: Vec<String>,
    pub(crate) node_map: HashMap<String, usize>,
    pub(crate) out_edges: Vec<Vec<usize>>,
    pub(crate) in_edges: Vec<Vec<usize>>,
}

impl TableDependencyGraph {
    pub fn new() -> Self {
        TableDependencyGraph::default()
    }

    pub fn add_table(&mut self, table_name: &str) -> bool {
        if self.node_map.contains_key(table_name) {
            return false;
        }

        let index = self.nodes.len();
        self.nodes.push(table_name.to_string());
        self.out_edges.push(vec![]);
        self.in_edges.push(vec![]);
        self.node_map.insert(table_name.to_string(), index);

        true
    }

    pub fn add_relationship(&mut self, from_table: &str, to_table: &str) -> bool {
        self.add_table(from_table);
        self.add_table(to_table);

        if self.is_related(from_table, to_table) {
            return false;
        }

        debug!("adding relation: {} =[W]=> {}", from_table, to_table);

        let from = self.node_map[from_table];
        let to = self.node_map[to_table];
        self.out_edges[from].push(to);
        self.in_edges[to].push(from);

        true
    }

    /// read set 为空时以 write set 代替, DROP/TRUNCATE/INSERT-VALUES
    /// 这类只写语句仍然会在目标表之间留下边。
    pub fn add_relationship_sets(&mut self, read_set: &ColumnSet, write_set: &ColumnSet) -> bool {
        let mut read_tables: Vec<String> = read_set
            .iter()
            .map(|column| split_table_name(column).0.to_ascii_lowercase())
            .collect();
        read_tables.sort();
        read_tables.dedup();

        let mut write_tables: Vec<String> = write_set
            .iter()
            .map(|column| split_table_name(column).0.to_ascii_lowercase())
            .collect();
        write_tables.sort();
        write_tables.dedup();

        if write_tables.is_empty() {
            return false;
        }

        if read_tables.is_empty() {
            read_tables = write_tables.clone();
        }

        let mut is_graph_changed = false;
        for from_table in &read_tables {
            for to_table in &write_tables {
                is_graph_changed |= self.add_relationship(from_table, to_table);
            }
        }

        is_graph_changed
    }

    pub fn add_foreign_keys(&mut self, foreign_keys: &[ForeignKey]) -> bool {
        let mut is_graph_changed = false;

        for foreign_key in foreign_keys {
            is_graph_changed |= self.add_relationship(&foreign_key.from_table, &foreign_key.to_table);
        }

        is_graph_changed
    }

    /// 直接出边的目标表。传递可达性由调用方自行遍历。
    pub fn get_dependencies(&self, table_name: &str) -> Vec<String> {
        let index = match self.node_map.get(table_name) {
            Some(index) => *index,
            None => return vec![],
        };

        self.out_edges[index]
            .iter()
            .map(|target| self.nodes[*target].clone())
            .collect()
    }

    pub fn has_peer_dependencies(&self, table_name: &str) -> bool {
        match self.node_map.get(table_name) {
            Some(index) => !self.in_edges[*index].is_empty(),
            None => false,
        }
    }

    pub fn is_related(&self, from_table: &str, to_table: &str) -> bool {
        let from = match self.node_map.get(from_table) {
            Some(index) => *index,
            None => return false,
        };
        let to = match self.node_map.get(to_table) {
            Some(index) => *index,
            None => return false,
        };

        self.in_edges[to].contains(&from)
    }

    pub fn tables(&self) -> &[String] {
        &self.nodes
    }
}

impl PartialEq for TableDependencyGraph {
    fn eq(&self, other: &Self) -> bool {
        if self.nodes.len() != other.nodes.len() {
            return false;
        }

        self.nodes.iter().enumerate().all(|(index, table)| {
            let mut lhs = self.out_edges[index]
                .iter()
                .map(|target| self.nodes[*target].as_str())
                .collect::<Vec<_>>();
            lhs.sort();

            match other.node_map.get(table) {
                Some(other_index) => {
                    let mut rhs = other.out_edges[*other_index]
                        .iter()
                        .map(|target| other.nodes[*target].as_str())
                        .collect::<Vec<_>>();
                    rhs.sort();
                    lhs == rhs
                }
                None => false,
            }
        })
    }
}

#[cfg(test)]
mod test {
    use crate::query::ColumnSet;

    use super::TableDependencyGraph;

    fn column_set(columns: &[&str]) -> ColumnSet {
        columns.iter().map(|column| column.to_string()).collect()
    }

    #[test]
    fn test_add_relationship() {
        let mut graph = TableDependencyGraph::new();

        assert!(graph.add_relationship("orders", "users"));
        // 重复添加不改变图
        assert!(!graph.add_relationship("orders", "users"));

        assert!(graph.is_related("orders", "users"));
        assert!(!graph.is_related("users", "orders"));
    }

    #[test]
    fn test_sets_cartesian_product() {
        let mut graph = TableDependencyGraph::new();

        let read = column_set(&["orders.user_id", "products.id"]);
        let write = column_set(&["shipments.id"]);

        assert!(graph.add_relationship_sets(&read, &write));
        assert!(graph.is_related("orders", "shipments"));
        assert!(graph.is_related("products", "shipments"));
        assert!(!graph.is_related("shipments", "orders"));
    }

    #[test]
    fn test_empty_write_set_is_noop() {
        let mut graph = TableDependencyGraph::new();
        assert!(!graph.add_relationship_sets(&column_set(&["users.id"]), &ColumnSet::new()));
        assert!(graph.tables().is_empty());
    }

    #[test]
    fn test_empty_read_set_uses_write_set() {
        let mut graph = TableDependencyGraph::new();

        // 等价于 add_relationship_sets(write, write)
        assert!(graph.add_relationship_sets(&ColumnSet::new(), &column_set(&["users.id", "orders.id"])));

        let mut equivalent = TableDependencyGraph::new();
        equivalent.add_relationship_sets(
            &column_set(&["users.id", "orders.id"]),
            &column_set(&["users.id", "orders.id"]),
        );

        assert_eq!(graph, equivalent);
        assert!(graph.is_related("users", "orders"));
        assert!(graph.is_related("orders", "users"));
        assert!(graph.is_related("users", "users"));
    }

    #[test]
    fn test_dependencies_and_peers() {
        let mut graph = TableDependencyGraph::new();
        graph.add_relationship("a", "b");
        graph.add_relationship("a", "c");

        let mut deps = graph.get_dependencies("a");
        deps.sort();
        assert_eq!(deps, vec!["b", "c"]);

        assert!(graph.has_peer_dependencies("b"));
        assert!(!graph.has_peer_dependencies("a"));
        assert!(!graph.has_peer_dependencies("unknown"));
    }

    #[test]
    fn test_lowercases_table_names() {
        let mut graph = TableDependencyGraph::new();
        graph.add_relationship_sets(
            &column_set(&["Users.ID"]),
            &column_set(&["Orders.total"]),
        );

        assert!(graph.is_related("users", "orders"));
    }
}
