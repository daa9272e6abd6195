pub mod error;
pub mod naming;
pub mod tenant;
pub mod types;
pub mod value;

pub use error::{EngineError, ErrorKind, Result};
pub use tenant::{Account, AccountInfo, ApiKey, Project, ProjectSettings, Session};
pub use types::{
    ColumnInfo, ColumnType, ConsistencyReport, FieldConstraints, FieldDefinition, FieldType,
    LogicalTable, Record, RecordPage, SortDirection, validate_field_list,
};
pub use value::Value;
