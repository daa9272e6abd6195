//! Storage seam.
//!
//! Every engine operation runs inside one [`StorageTx`] opened by
//! [`Storage::begin`]. Metadata writes, DDL and DML issued through the same
//! transaction commit or roll back together, and a transaction that is dropped
//! without [`StorageTx::commit`] leaves no trace.

pub mod memory;
pub mod postgres;
pub mod sql;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;

use crate::core::{
    Account, ApiKey, ColumnInfo, ColumnType, LogicalTable, Project, Record, Result, Session,
    SortDirection, Value,
};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

/// Subject of record-level storage errors. Physical table names never reach
/// callers; the gateway swaps in the logical table name where one applies.
pub const RECORD_SUBJECT: &str = "record";

/// Current time at the precision the storage engine keeps (microseconds).
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// One declared column of a physical table (system columns excluded).
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub not_null: bool,
}

/// Everything needed to emit `CREATE TABLE` plus its supporting index.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalTableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

/// A bound value together with the column it targets. The column type lets
/// backends emit correctly typed NULLs.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValue {
    pub column: String,
    pub column_type: ColumnType,
    pub value: Value,
}

/// Page request against one physical table. `sort_column` must already be
/// checked against the table's declared columns.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub sort_column: String,
    pub direction: SortDirection,
    pub limit: u32,
    pub offset: u64,
}

/// Entry point of a backend.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StorageTx>>;

    fn backend_name(&self) -> &'static str;
}

/// Logical-table metadata.
#[async_trait]
pub trait CatalogTx: Send {
    /// Fails with `NameConflict` when the project already has a table with the
    /// same name, compared case-insensitively.
    async fn insert_table(&mut self, table: &LogicalTable) -> Result<()>;
    async fn update_table(&mut self, table: &LogicalTable) -> Result<()>;
    async fn delete_table(&mut self, table_id: Uuid) -> Result<bool>;
    async fn get_table(&mut self, project_id: Uuid, table_id: Uuid)
    -> Result<Option<LogicalTable>>;
    async fn find_table_by_name(
        &mut self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Option<LogicalTable>>;
    async fn list_tables(&mut self, project_id: Uuid) -> Result<Vec<LogicalTable>>;
    async fn count_tables(&mut self, project_id: Uuid) -> Result<u64>;
}

/// Physical DDL and catalog introspection.
#[async_trait]
pub trait DdlTx: Send {
    async fn create_table(&mut self, spec: &PhysicalTableSpec) -> Result<()>;
    /// Succeeds when the table is already absent.
    async fn drop_table(&mut self, table: &str) -> Result<()>;
    async fn add_column(&mut self, table: &str, column: &ColumnSpec) -> Result<()>;
    /// Succeeds when the column is already absent.
    async fn drop_column(&mut self, table: &str, column: &str) -> Result<()>;
    async fn table_exists(&mut self, table: &str) -> Result<bool>;
    async fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>>;
}

/// DML on tenant tables. Records come back keyed by column name.
#[async_trait]
pub trait RecordTx: Send {
    async fn insert_record(&mut self, table: &str, values: &[ColumnValue]) -> Result<Record>;
    async fn update_record(
        &mut self,
        table: &str,
        id: Uuid,
        values: &[ColumnValue],
    ) -> Result<Option<Record>>;
    async fn delete_record(&mut self, table: &str, id: Uuid) -> Result<bool>;
    async fn get_record(&mut self, table: &str, id: Uuid) -> Result<Option<Record>>;
    async fn list_records(&mut self, table: &str, query: &RecordQuery)
    -> Result<(Vec<Record>, u64)>;
}

/// Accounts, sessions, projects and API keys.
#[async_trait]
pub trait CredentialTx: Send {
    async fn insert_account(&mut self, account: &Account) -> Result<()>;
    async fn get_account(&mut self, id: Uuid) -> Result<Option<Account>>;
    async fn find_account_by_email(&mut self, email: &str) -> Result<Option<Account>>;

    async fn insert_session(&mut self, session: &Session) -> Result<()>;
    async fn find_session(&mut self, token: &str) -> Result<Option<Session>>;
    async fn delete_session(&mut self, token: &str) -> Result<bool>;

    async fn insert_project(&mut self, project: &Project) -> Result<()>;
    async fn update_project(&mut self, project: &Project) -> Result<()>;
    /// Removes the project together with its table metadata and API keys.
    async fn delete_project(&mut self, id: Uuid) -> Result<bool>;
    async fn get_project(&mut self, id: Uuid) -> Result<Option<Project>>;
    async fn find_project_by_key(&mut self, key: &str) -> Result<Option<Project>>;
    async fn list_projects(&mut self, owner_id: Uuid) -> Result<Vec<Project>>;

    async fn insert_api_key(&mut self, key: &ApiKey) -> Result<()>;
    async fn update_api_key(&mut self, key: &ApiKey) -> Result<()>;
    async fn delete_api_key(&mut self, project_id: Uuid, id: Uuid) -> Result<bool>;
    async fn get_api_key(&mut self, project_id: Uuid, id: Uuid) -> Result<Option<ApiKey>>;
    async fn find_api_key(&mut self, key: &str) -> Result<Option<ApiKey>>;
    async fn list_api_keys(&mut self, project_id: Uuid) -> Result<Vec<ApiKey>>;
    /// Increments the usage counter and stamps `last_used_at` in one statement.
    async fn record_key_usage(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

/// One unit of work against a backend.
#[async_trait]
pub trait StorageTx: CatalogTx + DdlTx + RecordTx + CredentialTx + Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}
