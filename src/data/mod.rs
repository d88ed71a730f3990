pub mod table;
pub mod value;

pub use table::{ColumnDef, Row, RowKey, Table, TableError, TableSchema, TableStats, WriteMode};
pub use value::{DataType, Value};
