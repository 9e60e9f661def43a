pub mod column_type;
pub mod column_value;
pub mod decimal;

pub use column_type::{ColumnDef, FieldType, LogicalType};
pub use column_value::ColumnValue;
