//! In-process backend.
//!
//! The whole database is one [`MemoryState`] built from `im` persistent maps.
//! A transaction holds the writer lock, mutates an O(1) clone of the state and
//! swaps it back on commit; dropping the transaction discards the clone.

use super::{
    CatalogTx, ColumnSpec, ColumnValue, CredentialTx, DdlTx, PhysicalTableSpec, RecordQuery,
    RECORD_SUBJECT, RecordTx, Storage, StorageTx, now,
};
use crate::core::{
    Account, ApiKey, ColumnInfo, ColumnType, EngineError, LogicalTable, Project, Record, Result,
    Session, SortDirection, Value,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use im::{OrdMap, Vector};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
struct MemoryColumn {
    name: String,
    column_type: ColumnType,
    nullable: bool,
}

#[derive(Debug, Clone)]
struct StoredRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    values: HashMap<String, Value>,
}

static NULL: Value = Value::Null;

impl StoredRow {
    fn value(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&NULL)
    }
}

/// Physical table: declared columns plus rows in insertion order.
#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vector<MemoryColumn>,
    rows: OrdMap<u64, StoredRow>,
    by_id: OrdMap<Uuid, u64>,
    next_seq: u64,
}

impl MemoryTable {
    fn column(&self, name: &str) -> Option<&MemoryColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn check_columns(&self, values: &[ColumnValue]) -> Result<()> {
        for value in values {
            if self.column(&value.column).is_none() {
                return Err(EngineError::Internal(format!(
                    "column \"{}\" does not exist",
                    value.column
                )));
            }
        }
        Ok(())
    }

    fn check_not_null(&self, row: &StoredRow) -> Result<()> {
        for column in self.columns.iter().filter(|c| !c.nullable) {
            if row.value(&column.name).is_null() {
                return Err(EngineError::MissingRequiredField(column.name.clone()));
            }
        }
        Ok(())
    }

    fn to_record(&self, row: &StoredRow) -> Record {
        let fields = self
            .columns
            .iter()
            .map(|c| (c.name.clone(), row.value(&c.name).to_json()))
            .collect();
        Record {
            id: row.id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            fields,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: OrdMap<Uuid, LogicalTable>,
    physical: OrdMap<String, MemoryTable>,
    accounts: OrdMap<Uuid, Account>,
    sessions: OrdMap<String, Session>,
    projects: OrdMap<Uuid, Project>,
    api_keys: OrdMap<Uuid, ApiKey>,
}

/// Shared handle to an in-process database. Clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl MemoryTx {
    fn physical(&self, table: &str) -> Result<&MemoryTable> {
        self.working
            .physical
            .get(table)
            .ok_or_else(|| EngineError::TableNotFound(RECORD_SUBJECT.into()))
    }

    fn physical_mut(&mut self, table: &str) -> Result<&mut MemoryTable> {
        self.working
            .physical
            .get_mut(table)
            .ok_or_else(|| EngineError::TableNotFound(RECORD_SUBJECT.into()))
    }
}

fn sorted_by_creation<T: Clone>(
    items: impl Iterator<Item = T>,
    key: impl Fn(&T) -> (DateTime<Utc>, String),
) -> Vec<T> {
    let mut items: Vec<T> = items.collect();
    items.sort_by_key(|item| key(item));
    items
}

#[async_trait]
impl CatalogTx for MemoryTx {
    async fn insert_table(&mut self, table: &LogicalTable) -> Result<()> {
        let duplicate = self.working.tables.values().any(|t| {
            t.project_id == table.project_id && t.name.eq_ignore_ascii_case(&table.name)
        });
        if duplicate {
            return Err(EngineError::NameConflict(format!("Table '{}'", table.name)));
        }
        self.working.tables.insert(table.id, table.clone());
        Ok(())
    }

    async fn update_table(&mut self, table: &LogicalTable) -> Result<()> {
        if !self.working.tables.contains_key(&table.id) {
            return Err(EngineError::TableNotFound(table.name.clone()));
        }
        self.working.tables.insert(table.id, table.clone());
        Ok(())
    }

    async fn delete_table(&mut self, table_id: Uuid) -> Result<bool> {
        Ok(self.working.tables.remove(&table_id).is_some())
    }

    async fn get_table(
        &mut self,
        project_id: Uuid,
        table_id: Uuid,
    ) -> Result<Option<LogicalTable>> {
        Ok(self
            .working
            .tables
            .get(&table_id)
            .filter(|t| t.project_id == project_id)
            .cloned())
    }

    async fn find_table_by_name(
        &mut self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Option<LogicalTable>> {
        Ok(self
            .working
            .tables
            .values()
            .find(|t| t.project_id == project_id && t.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn list_tables(&mut self, project_id: Uuid) -> Result<Vec<LogicalTable>> {
        Ok(sorted_by_creation(
            self.working
                .tables
                .values()
                .filter(|t| t.project_id == project_id)
                .cloned(),
            |t| (t.created_at, t.name.to_ascii_lowercase()),
        ))
    }

    async fn count_tables(&mut self, project_id: Uuid) -> Result<u64> {
        Ok(self
            .working
            .tables
            .values()
            .filter(|t| t.project_id == project_id)
            .count() as u64)
    }
}

#[async_trait]
impl DdlTx for MemoryTx {
    async fn create_table(&mut self, spec: &PhysicalTableSpec) -> Result<()> {
        if self.working.physical.contains_key(&spec.name) {
            return Err(EngineError::Ddl("table storage already exists".into()));
        }
        let table = MemoryTable {
            columns: spec
                .columns
                .iter()
                .map(|c| MemoryColumn {
                    name: c.name.clone(),
                    column_type: c.column_type,
                    nullable: !c.not_null,
                })
                .collect(),
            ..MemoryTable::default()
        };
        self.working.physical.insert(spec.name.clone(), table);
        Ok(())
    }

    async fn drop_table(&mut self, table: &str) -> Result<()> {
        self.working.physical.remove(table);
        Ok(())
    }

    async fn add_column(&mut self, table: &str, column: &ColumnSpec) -> Result<()> {
        let physical = self
            .working
            .physical
            .get_mut(table)
            .ok_or_else(|| EngineError::Ddl("table storage does not exist".into()))?;
        if physical.column(&column.name).is_some() {
            return Err(EngineError::Ddl(format!(
                "column \"{}\" already exists",
                column.name
            )));
        }
        if column.not_null && !physical.rows.is_empty() {
            return Err(EngineError::Ddl(format!(
                "column \"{}\" contains null values",
                column.name
            )));
        }
        physical.columns.push_back(MemoryColumn {
            name: column.name.clone(),
            column_type: column.column_type,
            nullable: !column.not_null,
        });
        Ok(())
    }

    async fn drop_column(&mut self, table: &str, column: &str) -> Result<()> {
        let physical = self
            .working
            .physical
            .get_mut(table)
            .ok_or_else(|| EngineError::Ddl("table storage does not exist".into()))?;
        if physical.column(column).is_none() {
            return Ok(());
        }
        physical.columns.retain(|c| c.name != column);
        let seqs: Vec<u64> = physical.rows.keys().copied().collect();
        for seq in seqs {
            if let Some(row) = physical.rows.get_mut(&seq) {
                row.values.remove(column);
            }
        }
        Ok(())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        Ok(self.working.physical.contains_key(table))
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        let Some(physical) = self.working.physical.get(table) else {
            return Ok(Vec::new());
        };
        let mut columns = vec![
            ColumnInfo {
                name: "id".into(),
                column_type: ColumnType::Uuid,
                nullable: false,
            },
            ColumnInfo {
                name: "created_at".into(),
                column_type: ColumnType::TimestampTz,
                nullable: false,
            },
            ColumnInfo {
                name: "updated_at".into(),
                column_type: ColumnType::TimestampTz,
                nullable: false,
            },
        ];
        columns.extend(physical.columns.iter().map(|c| ColumnInfo {
            name: c.name.clone(),
            column_type: c.column_type,
            nullable: c.nullable,
        }));
        Ok(columns)
    }
}

#[async_trait]
impl RecordTx for MemoryTx {
    async fn insert_record(&mut self, table: &str, values: &[ColumnValue]) -> Result<Record> {
        let physical = self.physical_mut(table)?;
        physical.check_columns(values)?;

        let at = now();
        let row = StoredRow {
            id: Uuid::new_v4(),
            created_at: at,
            updated_at: at,
            values: values
                .iter()
                .map(|v| (v.column.clone(), v.value.clone()))
                .collect(),
        };
        physical.check_not_null(&row)?;

        let seq = physical.next_seq;
        physical.next_seq += 1;
        physical.by_id.insert(row.id, seq);
        let record = physical.to_record(&row);
        physical.rows.insert(seq, row);
        Ok(record)
    }

    async fn update_record(
        &mut self,
        table: &str,
        id: Uuid,
        values: &[ColumnValue],
    ) -> Result<Option<Record>> {
        let physical = self.physical_mut(table)?;
        physical.check_columns(values)?;

        let Some(seq) = physical.by_id.get(&id).copied() else {
            return Ok(None);
        };
        let Some(mut row) = physical.rows.get(&seq).cloned() else {
            return Ok(None);
        };
        for value in values {
            row.values.insert(value.column.clone(), value.value.clone());
        }
        row.updated_at = now();
        physical.check_not_null(&row)?;

        let record = physical.to_record(&row);
        physical.rows.insert(seq, row);
        Ok(Some(record))
    }

    async fn delete_record(&mut self, table: &str, id: Uuid) -> Result<bool> {
        let physical = self.physical_mut(table)?;
        match physical.by_id.remove(&id) {
            Some(seq) => Ok(physical.rows.remove(&seq).is_some()),
            None => Ok(false),
        }
    }

    async fn get_record(&mut self, table: &str, id: Uuid) -> Result<Option<Record>> {
        let physical = self.physical(table)?;
        Ok(physical
            .by_id
            .get(&id)
            .and_then(|seq| physical.rows.get(seq))
            .map(|row| physical.to_record(row)))
    }

    async fn list_records(
        &mut self,
        table: &str,
        query: &RecordQuery,
    ) -> Result<(Vec<Record>, u64)> {
        let physical = self.physical(table)?;
        if !["id", "created_at", "updated_at"].contains(&query.sort_column.as_str())
            && physical.column(&query.sort_column).is_none()
        {
            return Err(EngineError::Internal(format!(
                "column \"{}\" does not exist",
                query.sort_column
            )));
        }

        let mut rows: Vec<&StoredRow> = physical.rows.values().collect();
        rows.sort_by(|a, b| {
            let ordering = match query.sort_column.as_str() {
                "id" => a.id.cmp(&b.id),
                "created_at" => a.created_at.cmp(&b.created_at),
                "updated_at" => a.updated_at.cmp(&b.updated_at),
                column => a.value(column).compare(b.value(column)),
            };
            let ordering = match query.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            ordering.then_with(|| a.id.cmp(&b.id))
        });

        let total = rows.len() as u64;
        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let records = rows
            .into_iter()
            .skip(offset)
            .take(query.limit as usize)
            .map(|row| physical.to_record(row))
            .collect();
        Ok((records, total))
    }
}

#[async_trait]
impl CredentialTx for MemoryTx {
    async fn insert_account(&mut self, account: &Account) -> Result<()> {
        let duplicate = self
            .working
            .accounts
            .values()
            .any(|a| a.email.eq_ignore_ascii_case(&account.email));
        if duplicate {
            return Err(EngineError::NameConflict(format!(
                "Account '{}'",
                account.email
            )));
        }
        self.working.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&mut self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.working.accounts.get(&id).cloned())
    }

    async fn find_account_by_email(&mut self, email: &str) -> Result<Option<Account>> {
        Ok(self
            .working
            .accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn insert_session(&mut self, session: &Session) -> Result<()> {
        self.working
            .sessions
            .insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&mut self, token: &str) -> Result<Option<Session>> {
        Ok(self.working.sessions.get(token).cloned())
    }

    async fn delete_session(&mut self, token: &str) -> Result<bool> {
        Ok(self.working.sessions.remove(token).is_some())
    }

    async fn insert_project(&mut self, project: &Project) -> Result<()> {
        if self.working.projects.contains_key(&project.id) {
            return Err(EngineError::NameConflict(format!("Project '{}'", project.id)));
        }
        self.working.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn update_project(&mut self, project: &Project) -> Result<()> {
        if !self.working.projects.contains_key(&project.id) {
            return Err(EngineError::NotFound("Project".into()));
        }
        self.working.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn delete_project(&mut self, id: Uuid) -> Result<bool> {
        if self.working.projects.remove(&id).is_none() {
            return Ok(false);
        }
        let tables: Vec<Uuid> = self
            .working
            .tables
            .values()
            .filter(|t| t.project_id == id)
            .map(|t| t.id)
            .collect();
        for table_id in tables {
            self.working.tables.remove(&table_id);
        }
        let keys: Vec<Uuid> = self
            .working
            .api_keys
            .values()
            .filter(|k| k.project_id == id)
            .map(|k| k.id)
            .collect();
        for key_id in keys {
            self.working.api_keys.remove(&key_id);
        }
        Ok(true)
    }

    async fn get_project(&mut self, id: Uuid) -> Result<Option<Project>> {
        Ok(self.working.projects.get(&id).cloned())
    }

    async fn find_project_by_key(&mut self, key: &str) -> Result<Option<Project>> {
        Ok(self
            .working
            .projects
            .values()
            .find(|p| p.project_key == key)
            .cloned())
    }

    async fn list_projects(&mut self, owner_id: Uuid) -> Result<Vec<Project>> {
        Ok(sorted_by_creation(
            self.working
                .projects
                .values()
                .filter(|p| p.owner_id == owner_id)
                .cloned(),
            |p| (p.created_at, p.name.clone()),
        ))
    }

    async fn insert_api_key(&mut self, key: &ApiKey) -> Result<()> {
        if self.working.api_keys.values().any(|k| k.key == key.key) {
            return Err(EngineError::NameConflict("API key".into()));
        }
        self.working.api_keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn update_api_key(&mut self, key: &ApiKey) -> Result<()> {
        if !self.working.api_keys.contains_key(&key.id) {
            return Err(EngineError::NotFound("API key".into()));
        }
        self.working.api_keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn delete_api_key(&mut self, project_id: Uuid, id: Uuid) -> Result<bool> {
        let owned = self
            .working
            .api_keys
            .get(&id)
            .is_some_and(|k| k.project_id == project_id);
        if owned {
            self.working.api_keys.remove(&id);
        }
        Ok(owned)
    }

    async fn get_api_key(&mut self, project_id: Uuid, id: Uuid) -> Result<Option<ApiKey>> {
        Ok(self
            .working
            .api_keys
            .get(&id)
            .filter(|k| k.project_id == project_id)
            .cloned())
    }

    async fn find_api_key(&mut self, key: &str) -> Result<Option<ApiKey>> {
        Ok(self
            .working
            .api_keys
            .values()
            .find(|k| k.key == key)
            .cloned())
    }

    async fn list_api_keys(&mut self, project_id: Uuid) -> Result<Vec<ApiKey>> {
        Ok(sorted_by_creation(
            self.working
                .api_keys
                .values()
                .filter(|k| k.project_id == project_id)
                .cloned(),
            |k| (k.created_at, k.name.clone()),
        ))
    }

    async fn record_key_usage(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(key) = self.working.api_keys.get_mut(&id) {
            key.usage_count += 1;
            key.last_used_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageTx for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
