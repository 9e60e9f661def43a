use std::fs;

use common::err::{UltError, UltResult};

use crate::cluster::RowCluster;
use crate::codec::WireMessage;
use crate::graph::{ColumnDependencyGraph, TableDependencyGraph};
use crate::statelog::{CLUSTER_SUFFIX, COLUMNS_SUFFIX, TABLES_SUFFIX};

/// state log 同目录下 cluster / graph 辅助文件的读写。
pub struct StateClusterStore {
    log_path: String,
    log_name: String,
}

impl StateClusterStore {
    pub fn new(log_path: &str, log_name: &str) -> Self {
        StateClusterStore {
            log_path: log_path.to_string(),
            log_name: log_name.to_string(),
        }
    }

    fn path(&self, suffix: &str) -> String {
        format!("{}/{}{}", self.log_path, self.log_name, suffix)
    }

    fn write_file(&self, suffix: &str, content: &[u8]) -> UltResult<()> {
        let path = self.path(suffix);
        fs::write(&path, content).map_err(|e| UltError::String(format!("failed to write {}: {}", path, e)))
    }

    fn read_file(&self, suffix: &str) -> UltResult<Vec<u8>> {
        let path = self.path(suffix);
        fs::read(&path).map_err(|e| UltError::String(format!("failed to read {}: {}", path, e)))
    }

    pub fn write_row_cluster(&self, cluster: &RowCluster) -> UltResult<()> {
        self.write_file(CLUSTER_SUFFIX, &cluster.to_encoded())
    }

    pub fn read_row_cluster(&self) -> UltResult<RowCluster> {
        RowCluster::from_encoded(&self.read_file(CLUSTER_SUFFIX)?)
    }

    pub fn write_table_graph(&self, graph: &TableDependencyGraph) -> UltResult<()> {
        self.write_file(TABLES_SUFFIX, &graph.to_encoded())
    }

    pub fn read_table_graph(&self) -> UltResult<TableDependencyGraph> {
        TableDependencyGraph::from_encoded(&self.read_file(TABLES_SUFFIX)?)
    }

    pub fn write_column_graph(&self, graph: &ColumnDependencyGraph) -> UltResult<()> {
        self.write_file(COLUMNS_SUFFIX, &graph.to_encoded())
    }

    pub fn read_column_graph(&self) -> UltResult<ColumnDependencyGraph> {
        ColumnDependencyGraph::from_encoded(&self.read_file(COLUMNS_SUFFIX)?)
    }
}
