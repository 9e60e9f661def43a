pub mod naming_history;
pub mod row_cluster;

pub use naming_history::NamingHistory;
pub use row_cluster::{resolve_foreign_key, AliasMap, CompositeRange, RowAlias, RowCluster};
