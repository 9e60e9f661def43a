pub mod column_graph;
pub mod table_graph;

pub use column_graph::{ColumnAccessType, ColumnDependencyGraph, ColumnDependencyNode};
pub use table_graph::TableDependencyGraph;
