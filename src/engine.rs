//! The engine facade: one method per externally visible operation.
//!
//! Every method follows the same shape: open a unit of work, authorize the
//! caller against the project, run the component operations, commit. The whole
//! sequence runs under the configured request deadline; if it expires the
//! future is dropped, the uncommitted transaction with it, and nothing is
//! applied.

use crate::auth::{
    AccessContext, AccountManager, AuthorizationGate, Caller, Credentials, KeyManager, NewApiKey,
    Permission, RateLimiter,
};
use crate::config::EngineConfig;
use crate::core::{
    AccountInfo, ApiKey, ColumnInfo, ConsistencyReport, EngineError, FieldDefinition,
    LogicalTable, Project, ProjectSettings, Record, RecordPage, Result, Session,
};
use crate::gateway::{DataAccessGateway, ListQuery};
use crate::projects::{NewProject, ProjectService};
use crate::schema::{PhysicalTableManager, SchemaRegistry};
use crate::storage::{MemoryStorage, Storage, StorageTx};
use serde::Deserialize;
use serde_json::Map;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Request to define a logical table.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTable {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl NewTable {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }
}

pub struct Engine {
    storage: Arc<dyn Storage>,
    config: EngineConfig,
    registry: SchemaRegistry,
    gateway: DataAccessGateway,
    gate: AuthorizationGate,
    accounts: AccountManager,
    keys: KeyManager,
    projects: ProjectService,
}

impl Engine {
    pub fn new(storage: Arc<dyn Storage>, config: EngineConfig) -> Result<Self> {
        config.validate().map_err(EngineError::Validation)?;
        let session_ttl = chrono::Duration::from_std(config.session_ttl)
            .map_err(|e| EngineError::Validation(format!("session_ttl: {e}")))?;

        Ok(Self {
            registry: SchemaRegistry::new(PhysicalTableManager::new()),
            gateway: DataAccessGateway::new(config.default_page_size, config.max_page_size),
            gate: AuthorizationGate::new(RateLimiter::new()),
            accounts: AccountManager::new(config.bcrypt_cost, session_ttl),
            keys: KeyManager::new(),
            projects: ProjectService::new(config.default_project_settings()),
            storage,
            config,
        })
    }

    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        Self::new(Arc::new(MemoryStorage::new()), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.storage.backend_name()
    }

    async fn run<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.request_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.config.request_timeout.as_millis() as u64,
                    "request deadline exceeded, work rolled back"
                );
                Err(EngineError::Timeout)
            }
        }
    }

    /// Opens a unit of work and selects `project_id` for `caller`.
    async fn open(
        &self,
        caller: &Caller,
        project_id: Uuid,
    ) -> Result<(Box<dyn StorageTx>, AccessContext)> {
        let mut tx = self.storage.begin().await?;
        let access = self.gate.authorize(tx.as_mut(), caller, project_id).await?;
        Ok((tx, access))
    }

    // ---- identity ----

    /// Resolves request credentials. Key usage is committed here, before the
    /// operation itself runs.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Caller> {
        self.run("authenticate", async {
            let mut tx = self.storage.begin().await?;
            let caller = self.gate.authenticate(tx.as_mut(), credentials).await?;
            tx.commit().await?;
            Ok(caller)
        })
        .await
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<AccountInfo> {
        if !self.config.allow_registration {
            return Err(EngineError::PermissionDenied(
                "Registration is disabled".into(),
            ));
        }
        self.run("register", async {
            let mut tx = self.storage.begin().await?;
            let account = self.accounts.register(tx.as_mut(), email, password).await?;
            tx.commit().await?;
            Ok(account)
        })
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        self.run("login", async {
            let mut tx = self.storage.begin().await?;
            let session = self.accounts.login(tx.as_mut(), email, password).await?;
            tx.commit().await?;
            Ok(session)
        })
        .await
    }

    pub async fn logout(&self, caller: &Caller) -> Result<()> {
        let session = caller.require_owner()?;
        self.run("logout", async {
            let mut tx = self.storage.begin().await?;
            self.accounts.logout(tx.as_mut(), &session.token).await?;
            tx.commit().await
        })
        .await
    }

    pub async fn bootstrap_admin(&self, email: &str, password: &str) -> Result<AccountInfo> {
        self.run("bootstrap_admin", async {
            let mut tx = self.storage.begin().await?;
            let account = self
                .accounts
                .bootstrap_admin(tx.as_mut(), email, password)
                .await?;
            tx.commit().await?;
            Ok(account)
        })
        .await
    }

    // ---- projects ----

    pub async fn list_projects(&self, caller: &Caller) -> Result<Vec<Project>> {
        let owner = caller.require_owner()?;
        self.run("list_projects", async {
            let mut tx = self.storage.begin().await?;
            let projects = self.projects.list(tx.as_mut(), owner.account.id).await?;
            tx.commit().await?;
            Ok(projects)
        })
        .await
    }

    pub async fn create_project(&self, caller: &Caller, request: NewProject) -> Result<Project> {
        let owner = caller.require_owner()?;
        self.run("create_project", async {
            let mut tx = self.storage.begin().await?;
            let project = self
                .projects
                .create(tx.as_mut(), owner.account.id, request)
                .await?;
            tx.commit().await?;
            Ok(project)
        })
        .await
    }

    pub async fn get_project(&self, caller: &Caller, project_id: Uuid) -> Result<Project> {
        caller.require_owner()?;
        self.run("get_project", async {
            let (tx, access) = self.open(caller, project_id).await?;
            tx.commit().await?;
            Ok(access.project)
        })
        .await
    }

    pub async fn update_project_settings(
        &self,
        caller: &Caller,
        project_id: Uuid,
        settings: ProjectSettings,
    ) -> Result<Project> {
        caller.require_owner()?;
        self.run("update_project_settings", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            let mut project = access.project;
            self.projects
                .update_settings(tx.as_mut(), &mut project, settings)
                .await?;
            tx.commit().await?;
            Ok(project)
        })
        .await
    }

    pub async fn rotate_project_key(&self, caller: &Caller, project_id: Uuid) -> Result<Project> {
        caller.require_owner()?;
        self.run("rotate_project_key", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            let mut project = access.project;
            self.projects.rotate_key(tx.as_mut(), &mut project).await?;
            tx.commit().await?;
            Ok(project)
        })
        .await
    }

    pub async fn delete_project(&self, caller: &Caller, project_id: Uuid) -> Result<()> {
        caller.require_owner()?;
        self.run("delete_project", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            self.projects
                .delete(tx.as_mut(), self.registry.physical(), &access.project)
                .await?;
            tx.commit().await
        })
        .await
    }

    // ---- API keys ----

    pub async fn list_keys(&self, caller: &Caller, project_id: Uuid) -> Result<Vec<ApiKey>> {
        caller.require_owner()?;
        self.run("list_keys", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            let keys = self.keys.list_keys(tx.as_mut(), access.project_id()).await?;
            tx.commit().await?;
            Ok(keys)
        })
        .await
    }

    pub async fn create_key(
        &self,
        caller: &Caller,
        project_id: Uuid,
        request: NewApiKey,
    ) -> Result<ApiKey> {
        caller.require_owner()?;
        self.run("create_key", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            let key = self
                .keys
                .create_key(tx.as_mut(), &access.project, request)
                .await?;
            tx.commit().await?;
            Ok(key)
        })
        .await
    }

    pub async fn deactivate_key(
        &self,
        caller: &Caller,
        project_id: Uuid,
        key_id: Uuid,
    ) -> Result<ApiKey> {
        caller.require_owner()?;
        self.run("deactivate_key", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            let key = self
                .keys
                .deactivate_key(tx.as_mut(), access.project_id(), key_id)
                .await?;
            tx.commit().await?;
            Ok(key)
        })
        .await
    }

    pub async fn delete_key(&self, caller: &Caller, project_id: Uuid, key_id: Uuid) -> Result<()> {
        caller.require_owner()?;
        self.run("delete_key", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            self.keys
                .delete_key(tx.as_mut(), access.project_id(), key_id)
                .await?;
            tx.commit().await
        })
        .await
    }

    // ---- schema ----

    pub async fn list_tables(&self, caller: &Caller, project_id: Uuid) -> Result<Vec<LogicalTable>> {
        self.run("list_tables", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_permission(Permission::Read)?;
            let tables = self
                .registry
                .list_tables(tx.as_mut(), access.project_id())
                .await?;
            tx.commit().await?;
            Ok(tables)
        })
        .await
    }

    pub async fn get_table(
        &self,
        caller: &Caller,
        project_id: Uuid,
        table: &str,
    ) -> Result<LogicalTable> {
        self.run("get_table", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_permission(Permission::Read)?;
            let table = self.registry.get_table(tx.as_mut(), project_id, table).await?;
            tx.commit().await?;
            Ok(table)
        })
        .await
    }

    /// Whether the physical table backing `name` exists.
    pub async fn table_exists(&self, caller: &Caller, project_id: Uuid, name: &str) -> Result<bool> {
        self.run("table_exists", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_permission(Permission::Read)?;
            let exists = self
                .registry
                .physical()
                .table_exists(tx.as_mut(), project_id, name)
                .await?;
            tx.commit().await?;
            Ok(exists)
        })
        .await
    }

    /// Introspected physical columns of a table.
    pub async fn table_columns(
        &self,
        caller: &Caller,
        project_id: Uuid,
        table: &str,
    ) -> Result<Vec<ColumnInfo>> {
        self.run("table_columns", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_permission(Permission::Read)?;
            let table = self.registry.get_table(tx.as_mut(), project_id, table).await?;
            let columns = self
                .registry
                .physical()
                .get_columns(tx.as_mut(), project_id, &table.name)
                .await?;
            tx.commit().await?;
            Ok(columns)
        })
        .await
    }

    pub async fn verify_table(
        &self,
        caller: &Caller,
        project_id: Uuid,
        table: &str,
    ) -> Result<ConsistencyReport> {
        self.run("verify_table", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_permission(Permission::Read)?;
            let table = self.registry.get_table(tx.as_mut(), project_id, table).await?;
            let report = self.registry.verify_table(tx.as_mut(), &table).await?;
            tx.commit().await?;
            Ok(report)
        })
        .await
    }

    pub async fn define_table(
        &self,
        caller: &Caller,
        project_id: Uuid,
        request: NewTable,
    ) -> Result<LogicalTable> {
        self.run("define_table", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_owner()?;
            let table = self
                .registry
                .define_table(tx.as_mut(), &access.project, &request.name, request.fields)
                .await?;
            tx.commit().await?;
            Ok(table)
        })
        .await
    }

    pub async fn add_field(
        &self,
        caller: &Caller,
        project_id: Uuid,
        table: &str,
        field: FieldDefinition,
    ) -> Result<LogicalTable> {
        self.run("add_field", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_owner()?;
            let mut table = self.registry.get_table(tx.as_mut(), project_id, table).await?;
            self.registry.add_field(tx.as_mut(), &mut table, field).await?;
            tx.commit().await?;
            Ok(table)
        })
        .await
    }

    pub async fn remove_field(
        &self,
        caller: &Caller,
        project_id: Uuid,
        table: &str,
        field_name: &str,
    ) -> Result<LogicalTable> {
        self.run("remove_field", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_owner()?;
            let mut table = self.registry.get_table(tx.as_mut(), project_id, table).await?;
            self.registry
                .remove_field(tx.as_mut(), &mut table, field_name)
                .await?;
            tx.commit().await?;
            Ok(table)
        })
        .await
    }

    pub async fn replace_fields(
        &self,
        caller: &Caller,
        project_id: Uuid,
        table: &str,
        fields: Vec<FieldDefinition>,
    ) -> Result<LogicalTable> {
        self.run("replace_fields", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_owner()?;
            let mut table = self.registry.get_table(tx.as_mut(), project_id, table).await?;
            self.registry
                .replace_fields(tx.as_mut(), &mut table, fields)
                .await?;
            tx.commit().await?;
            Ok(table)
        })
        .await
    }

    pub async fn delete_table(
        &self,
        caller: &Caller,
        project_id: Uuid,
        table: &str,
    ) -> Result<LogicalTable> {
        self.run("delete_table", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_owner()?;
            let table = self.registry.get_table(tx.as_mut(), project_id, table).await?;
            let removed = self.registry.remove_table(tx.as_mut(), table).await?;
            tx.commit().await?;
            Ok(removed)
        })
        .await
    }

    // ---- records ----

    pub async fn list_records(
        &self,
        caller: &Caller,
        project_id: Uuid,
        table: &str,
        query: &ListQuery,
    ) -> Result<RecordPage> {
        self.run("list_records", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_permission(Permission::Read)?;
            let table = self.registry.get_table(tx.as_mut(), project_id, table).await?;
            let page = self.gateway.list(tx.as_mut(), &table, query).await?;
            tx.commit().await?;
            Ok(page)
        })
        .await
    }

    pub async fn get_record(
        &self,
        caller: &Caller,
        project_id: Uuid,
        table: &str,
        record_id: Uuid,
    ) -> Result<Record> {
        self.run("get_record", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_permission(Permission::Read)?;
            let table = self.registry.get_table(tx.as_mut(), project_id, table).await?;
            let record = self.gateway.get(tx.as_mut(), &table, record_id).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await
    }

    pub async fn create_record(
        &self,
        caller: &Caller,
        project_id: Uuid,
        table: &str,
        payload: &Map<String, serde_json::Value>,
    ) -> Result<Record> {
        self.run("create_record", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_permission(Permission::Write)?;
            let table = self.registry.get_table(tx.as_mut(), project_id, table).await?;
            let record = self.gateway.create(tx.as_mut(), &table, payload).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await
    }

    pub async fn update_record(
        &self,
        caller: &Caller,
        project_id: Uuid,
        table: &str,
        record_id: Uuid,
        payload: &Map<String, serde_json::Value>,
    ) -> Result<Record> {
        self.run("update_record", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_permission(Permission::Write)?;
            let table = self.registry.get_table(tx.as_mut(), project_id, table).await?;
            let record = self
                .gateway
                .update(tx.as_mut(), &table, record_id, payload)
                .await?;
            tx.commit().await?;
            Ok(record)
        })
        .await
    }

    pub async fn delete_record(
        &self,
        caller: &Caller,
        project_id: Uuid,
        table: &str,
        record_id: Uuid,
    ) -> Result<Uuid> {
        self.run("delete_record", async {
            let (mut tx, access) = self.open(caller, project_id).await?;
            access.require_permission(Permission::Write)?;
            access.require_permission(Permission::Delete)?;
            let table = self.registry.get_table(tx.as_mut(), project_id, table).await?;
            let id = self.gateway.delete(tx.as_mut(), &table, record_id).await?;
            tx.commit().await?;
            Ok(id)
        })
        .await
    }
}
