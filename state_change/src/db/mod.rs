pub mod handle;
pub mod mysql_handle;
pub mod pool;

pub use handle::DbHandle;
pub use mysql_handle::MySqlHandle;
pub use pool::{DbHandleLease, DbHandlePool};
