//! PostgreSQL backend built on `sqlx`.
//!
//! Metadata lives in the tables created by `migrations/`; tenant tables are
//! created on demand. DDL is transactional in PostgreSQL, so schema changes
//! share the transaction of the metadata write that requested them.

use super::{
    CatalogTx, ColumnSpec, ColumnValue, CredentialTx, DdlTx, PhysicalTableSpec, RECORD_SUBJECT,
    RecordQuery, RecordTx, Storage, StorageTx, now, sql,
};
use crate::auth::PermissionSet;
use crate::core::naming::SYSTEM_COLUMNS;
use crate::core::{
    Account, ApiKey, ColumnInfo, ColumnType, EngineError, FieldDefinition, LogicalTable, Project,
    ProjectSettings, Record, Result, Session,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgDatabaseError, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Executor, FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|err| {
                error!(error = %err, "failed to connect to PostgreSQL");
                EngineError::Internal(format!("database connection failed: {err}"))
            })?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the embedded metadata migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| {
                error!(error = %err, "metadata migration failed");
                EngineError::Internal(format!("migration failed: {err}"))
            })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|err| db_error(err, "transaction"))?;
        Ok(Box::new(PostgresTx { tx }))
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTx {
    /// Runs one DDL statement. Any failure becomes `Ddl`; the driver text is
    /// logged and kept out of the returned message.
    async fn execute_ddl(&mut self, statement: String, action: &str) -> Result<()> {
        debug!(sql = %statement, "executing ddl");
        match (&mut *self.tx).execute(statement.as_str()).await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(error = %err, sql = %statement, "ddl statement failed");
                Err(EngineError::Ddl(format!("could not {action}")))
            }
        }
    }
}

/// Maps a driver error onto the engine taxonomy. `subject` names what the
/// statement was about and is the only caller-visible part of the message.
fn db_error(err: sqlx::Error, subject: &str) -> EngineError {
    if let sqlx::Error::Database(db) = &err {
        let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
        match code.as_str() {
            "23505" => return EngineError::NameConflict(subject.to_string()),
            "42P01" => return EngineError::TableNotFound(subject.to_string()),
            "23502" => {
                let column = db
                    .try_downcast_ref::<PgDatabaseError>()
                    .and_then(|pg| pg.column())
                    .unwrap_or(subject)
                    .to_string();
                return EngineError::MissingRequiredField(column);
            }
            c if c.starts_with("22") => {
                warn!(error = %err, code = %c, "value rejected by database");
                return EngineError::Validation(format!("Value rejected for {subject}"));
            }
            _ => {}
        }
    }
    error!(error = %err, subject = %subject, "database operation failed");
    EngineError::Internal(err.to_string())
}

fn record_from_row(row: &PgRow) -> Result<Record> {
    let decode = |err| db_error(err, RECORD_SUBJECT);
    let id: Uuid = row.try_get("id").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(decode)?;
    let doc: serde_json::Value = row.try_get("doc").map_err(decode)?;

    let mut fields = match doc {
        serde_json::Value::Object(map) => map,
        other => {
            error!(record_id = %id, doc = %other, "record row did not decode to an object");
            return Err(EngineError::Internal(format!(
                "record {id} decoded to a non-object document"
            )));
        }
    };
    for column in SYSTEM_COLUMNS {
        fields.remove(column);
    }
    Ok(Record {
        id,
        created_at,
        updated_at,
        fields,
    })
}

#[derive(FromRow)]
struct TableRow {
    id: Uuid,
    project_id: Uuid,
    name: String,
    fields: Json<Vec<FieldDefinition>>,
    physical_table: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TableRow> for LogicalTable {
    fn from(row: TableRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            fields: row.fields.0,
            physical_table: row.physical_table,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct CatalogColumn {
    column_name: String,
    data_type: String,
    char_max_length: Option<i32>,
    numeric_precision: Option<i32>,
    numeric_scale: Option<i32>,
    nullable: bool,
}

#[derive(FromRow)]
struct AccountRow {
    id: Uuid,
    email: String,
    password_hash: String,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct SessionRow {
    token: String,
    account_id: Uuid,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            token: row.token,
            account_id: row.account_id,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ProjectRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    project_key: String,
    settings: Json<ProjectSettings>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            project_key: row.project_key,
            settings: row.settings.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct ApiKeyRow {
    id: Uuid,
    project_id: Uuid,
    key: String,
    name: String,
    permissions: Json<PermissionSet>,
    active: bool,
    usage_count: i64,
    rate_limit: Option<i32>,
    expires_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ApiKeyRow> for ApiKey {
    fn from(row: ApiKeyRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            key: row.key,
            name: row.name,
            permissions: row.permissions.0,
            active: row.active,
            usage_count: u64::try_from(row.usage_count).unwrap_or(0),
            rate_limit: row.rate_limit.and_then(|limit| u32::try_from(limit).ok()),
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const TABLE_COLUMNS: &str =
    "id, project_id, name, fields, physical_table, created_at, updated_at";
const PROJECT_COLUMNS: &str = "id, owner_id, name, project_key, settings, created_at, updated_at";
const API_KEY_COLUMNS: &str = "id, project_id, key, name, permissions, active, usage_count, \
     rate_limit, expires_at, last_used_at, created_at, updated_at";

fn to_i32(value: Option<u32>) -> Option<i32> {
    value.map(|v| i32::try_from(v).unwrap_or(i32::MAX))
}

#[async_trait]
impl CatalogTx for PostgresTx {
    async fn insert_table(&mut self, table: &LogicalTable) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO logical_tables (id, project_id, name, fields, physical_table, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(table.id)
        .bind(table.project_id)
        .bind(&table.name)
        .bind(Json(&table.fields))
        .bind(&table.physical_table)
        .bind(table.created_at)
        .bind(table.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, &format!("Table '{}'", table.name)))?;
        Ok(())
    }

    async fn update_table(&mut self, table: &LogicalTable) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE logical_tables
            SET name = $2, fields = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(table.id)
        .bind(&table.name)
        .bind(Json(&table.fields))
        .bind(table.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, &format!("Table '{}'", table.name)))?;

        if result.rows_affected() == 0 {
            return Err(EngineError::TableNotFound(table.name.clone()));
        }
        Ok(())
    }

    async fn delete_table(&mut self, table_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM logical_tables WHERE id = $1")
            .bind(table_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| db_error(err, "table"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_table(
        &mut self,
        project_id: Uuid,
        table_id: Uuid,
    ) -> Result<Option<LogicalTable>> {
        let row = sqlx::query_as::<_, TableRow>(&format!(
            "SELECT {TABLE_COLUMNS} FROM logical_tables WHERE project_id = $1 AND id = $2"
        ))
        .bind(project_id)
        .bind(table_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "table"))?;
        Ok(row.map(LogicalTable::from))
    }

    async fn find_table_by_name(
        &mut self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Option<LogicalTable>> {
        let row = sqlx::query_as::<_, TableRow>(&format!(
            "SELECT {TABLE_COLUMNS} FROM logical_tables \
             WHERE project_id = $1 AND lower(name) = lower($2)"
        ))
        .bind(project_id)
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "table"))?;
        Ok(row.map(LogicalTable::from))
    }

    async fn list_tables(&mut self, project_id: Uuid) -> Result<Vec<LogicalTable>> {
        let rows = sqlx::query_as::<_, TableRow>(&format!(
            "SELECT {TABLE_COLUMNS} FROM logical_tables \
             WHERE project_id = $1 ORDER BY created_at, lower(name)"
        ))
        .bind(project_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "tables"))?;
        Ok(rows.into_iter().map(LogicalTable::from).collect())
    }

    async fn count_tables(&mut self, project_id: Uuid) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM logical_tables WHERE project_id = $1")
                .bind(project_id)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(|err| db_error(err, "tables"))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl DdlTx for PostgresTx {
    async fn create_table(&mut self, spec: &PhysicalTableSpec) -> Result<()> {
        self.execute_ddl(sql::create_table(spec), "create table storage")
            .await?;
        self.execute_ddl(
            sql::create_created_at_index(&spec.name),
            "create table index",
        )
        .await
    }

    async fn drop_table(&mut self, table: &str) -> Result<()> {
        self.execute_ddl(sql::drop_table(table), "drop table storage")
            .await
    }

    async fn add_column(&mut self, table: &str, column: &ColumnSpec) -> Result<()> {
        self.execute_ddl(
            sql::add_column(table, column),
            &format!("add column '{}'", column.name),
        )
        .await
    }

    async fn drop_column(&mut self, table: &str, column: &str) -> Result<()> {
        self.execute_ddl(
            sql::drop_column(table, column),
            &format!("drop column '{column}'"),
        )
        .await
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(sql::TABLE_EXISTS)
            .bind(table)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|err| db_error(err, "catalog"))
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query_as::<_, CatalogColumn>(sql::TABLE_COLUMNS)
            .bind(table)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|err| db_error(err, "catalog"))?;

        rows.into_iter()
            .map(|row| {
                let column_type = ColumnType::from_catalog(
                    &row.data_type,
                    row.char_max_length,
                    row.numeric_precision,
                    row.numeric_scale,
                )
                .ok_or_else(|| {
                    EngineError::Internal(format!(
                        "column '{}' has unsupported type '{}'",
                        row.column_name, row.data_type
                    ))
                })?;
                Ok(ColumnInfo {
                    name: row.column_name,
                    column_type,
                    nullable: row.nullable,
                })
            })
            .collect()
    }
}

#[async_trait]
impl RecordTx for PostgresTx {
    async fn insert_record(&mut self, table: &str, values: &[ColumnValue]) -> Result<Record> {
        let mut builder = sql::insert_record(table, Uuid::new_v4(), now(), values);
        debug!(sql = %builder.sql(), "insert record");
        let row = builder
            .build()
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|err| db_error(err, RECORD_SUBJECT))?;
        record_from_row(&row)
    }

    async fn update_record(
        &mut self,
        table: &str,
        id: Uuid,
        values: &[ColumnValue],
    ) -> Result<Option<Record>> {
        let mut builder = sql::update_record(table, id, now(), values);
        debug!(sql = %builder.sql(), "update record");
        let row = builder
            .build()
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|err| db_error(err, RECORD_SUBJECT))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn delete_record(&mut self, table: &str, id: Uuid) -> Result<bool> {
        let result = sql::delete_record(table, id)
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|err| db_error(err, RECORD_SUBJECT))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_record(&mut self, table: &str, id: Uuid) -> Result<Option<Record>> {
        let row = sql::select_record(table, id)
            .build()
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|err| db_error(err, RECORD_SUBJECT))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_records(
        &mut self,
        table: &str,
        query: &RecordQuery,
    ) -> Result<(Vec<Record>, u64)> {
        let total: i64 = sql::count_records(table)
            .build_query_scalar()
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|err| db_error(err, RECORD_SUBJECT))?;

        let mut builder = sql::select_page(table, query);
        debug!(sql = %builder.sql(), "list records");
        let rows = builder
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|err| db_error(err, RECORD_SUBJECT))?;

        let records = rows.iter().map(record_from_row).collect::<Result<Vec<_>>>()?;
        Ok((records, u64::try_from(total).unwrap_or(0)))
    }
}

#[async_trait]
impl CredentialTx for PostgresTx {
    async fn insert_account(&mut self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, email, password_hash, active, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.active)
        .bind(account.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, &format!("Account '{}'", account.email)))?;
        Ok(())
    }

    async fn get_account(&mut self, id: Uuid) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, email, password_hash, active, created_at FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "account"))?;
        Ok(row.map(Account::from))
    }

    async fn find_account_by_email(&mut self, email: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, email, password_hash, active, created_at FROM accounts \
             WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "account"))?;
        Ok(row.map(Account::from))
    }

    async fn insert_session(&mut self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (token, account_id, expires_at, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&session.token)
        .bind(session.account_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "session"))?;
        Ok(())
    }

    async fn find_session(&mut self, token: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT token, account_id, expires_at, created_at FROM sessions WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "session"))?;
        Ok(row.map(Session::from))
    }

    async fn delete_session(&mut self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| db_error(err, "session"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_project(&mut self, project: &Project) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, owner_id, name, project_key, settings, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(project.id)
        .bind(project.owner_id)
        .bind(&project.name)
        .bind(&project.project_key)
        .bind(Json(&project.settings))
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, &format!("Project '{}'", project.name)))?;
        Ok(())
    }

    async fn update_project(&mut self, project: &Project) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET name = $2, project_key = $3, settings = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(project.id)
        .bind(&project.name)
        .bind(&project.project_key)
        .bind(Json(&project.settings))
        .bind(project.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "project"))?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound("Project".into()));
        }
        Ok(())
    }

    async fn delete_project(&mut self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| db_error(err, "project"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_project(&mut self, id: Uuid) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "project"))?;
        Ok(row.map(Project::from))
    }

    async fn find_project_by_key(&mut self, key: &str) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE project_key = $1"
        ))
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "project"))?;
        Ok(row.map(Project::from))
    }

    async fn list_projects(&mut self, owner_id: Uuid) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE owner_id = $1 ORDER BY created_at, name"
        ))
        .bind(owner_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "projects"))?;
        Ok(rows.into_iter().map(Project::from).collect())
    }

    async fn insert_api_key(&mut self, key: &ApiKey) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO api_keys ({API_KEY_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(key.id)
        .bind(key.project_id)
        .bind(&key.key)
        .bind(&key.name)
        .bind(Json(&key.permissions))
        .bind(key.active)
        .bind(i64::try_from(key.usage_count).unwrap_or(i64::MAX))
        .bind(to_i32(key.rate_limit))
        .bind(key.expires_at)
        .bind(key.last_used_at)
        .bind(key.created_at)
        .bind(key.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "API key"))?;
        Ok(())
    }

    async fn update_api_key(&mut self, key: &ApiKey) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE api_keys
            SET name = $2, permissions = $3, active = $4, rate_limit = $5,
                expires_at = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(key.id)
        .bind(&key.name)
        .bind(Json(&key.permissions))
        .bind(key.active)
        .bind(to_i32(key.rate_limit))
        .bind(key.expires_at)
        .bind(key.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "API key"))?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound("API key".into()));
        }
        Ok(())
    }

    async fn delete_api_key(&mut self, project_id: Uuid, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE project_id = $1 AND id = $2")
            .bind(project_id)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| db_error(err, "API key"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_api_key(&mut self, project_id: Uuid, id: Uuid) -> Result<Option<ApiKey>> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE project_id = $1 AND id = $2"
        ))
        .bind(project_id)
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "API key"))?;
        Ok(row.map(ApiKey::from))
    }

    async fn find_api_key(&mut self, key: &str) -> Result<Option<ApiKey>> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key = $1"
        ))
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "API key"))?;
        Ok(row.map(ApiKey::from))
    }

    async fn list_api_keys(&mut self, project_id: Uuid) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE project_id = $1 ORDER BY created_at, name"
        ))
        .bind(project_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "API keys"))?;
        Ok(rows.into_iter().map(ApiKey::from).collect())
    }

    async fn record_key_usage(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE api_keys SET usage_count = usage_count + 1, last_used_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| db_error(err, "API key"))?;
        Ok(())
    }
}

#[async_trait]
impl StorageTx for PostgresTx {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|err| db_error(err, "transaction"))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|err| db_error(err, "transaction"))
    }
}
