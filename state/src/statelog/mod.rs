pub mod checkpoint;
pub mod cluster_store;
pub mod gid_index;
pub mod reader;
pub mod writer;

pub use checkpoint::Checkpoint;
pub use cluster_store::StateClusterStore;
pub use gid_index::{GidIndexReader, GidIndexWriter};
pub use reader::StateLogReader;
pub use writer::StateLogWriter;

/// state log 主文件
pub const STATE_LOG_SUFFIX: &str = ".ultstatelog";
/// GID → 文件偏移 的定长索引
pub const GID_INDEX_SUFFIX: &str = ".ultindex";
/// 序列化的 RowCluster
pub const CLUSTER_SUFFIX: &str = ".ultcluster";
/// 序列化的 TableDependencyGraph
pub const TABLES_SUFFIX: &str = ".ulttables";
/// 序列化的 ColumnDependencyGraph
pub const COLUMNS_SUFFIX: &str = ".ultcolumns";
/// writer checkpoint
pub const CHECKPOINT_SUFFIX: &str = ".ultchkpoint";
