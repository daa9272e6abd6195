use super::PermissionSet;
use crate::core::tenant::FEATURE_API_KEYS;
use crate::core::{ApiKey, EngineError, Project, Result};
use crate::storage::{self, CredentialTx, StorageTx};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

const MAX_KEY_NAME_LEN: usize = 100;

/// Request to mint a named key.
#[derive(Debug, Clone, Deserialize)]
pub struct NewApiKey {
    pub name: String,
    pub permissions: PermissionSet,
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewApiKey {
    pub fn new(name: impl Into<String>, permissions: PermissionSet) -> Self {
        Self {
            name: name.into(),
            permissions,
            rate_limit: None,
            expires_at: None,
        }
    }

    pub fn rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit = Some(per_minute);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// Named API keys of a project.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyManager;

impl KeyManager {
    pub fn new() -> Self {
        Self
    }

    pub async fn create_key(
        &self,
        tx: &mut dyn StorageTx,
        project: &Project,
        request: NewApiKey,
    ) -> Result<ApiKey> {
        if !project.settings.feature_enabled(FEATURE_API_KEYS) {
            return Err(EngineError::Validation(
                "API keys are disabled for this project".into(),
            ));
        }
        let name = request.name.trim();
        if name.is_empty() || name.len() > MAX_KEY_NAME_LEN {
            return Err(EngineError::Validation(format!(
                "Key name must be 1 to {MAX_KEY_NAME_LEN} characters"
            )));
        }
        if request.permissions.is_empty() {
            return Err(EngineError::Validation(
                "Key must carry at least one permission".into(),
            ));
        }

        let mut key = ApiKey::new(project.id, name, request.permissions);
        key.rate_limit = request.rate_limit;
        key.expires_at = request.expires_at;
        tx.insert_api_key(&key).await?;

        info!(project_id = %project.id, key_id = %key.id, name = %key.name, "API key created");
        Ok(key)
    }

    pub async fn list_keys(&self, tx: &mut dyn StorageTx, project_id: Uuid) -> Result<Vec<ApiKey>> {
        tx.list_api_keys(project_id).await
    }

    pub async fn deactivate_key(
        &self,
        tx: &mut dyn StorageTx,
        project_id: Uuid,
        key_id: Uuid,
    ) -> Result<ApiKey> {
        let mut key = tx
            .get_api_key(project_id, key_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("API key '{key_id}'")))?;
        key.active = false;
        key.updated_at = storage::now();
        tx.update_api_key(&key).await?;

        info!(%project_id, %key_id, "API key deactivated");
        Ok(key)
    }

    pub async fn delete_key(
        &self,
        tx: &mut dyn StorageTx,
        project_id: Uuid,
        key_id: Uuid,
    ) -> Result<()> {
        if !tx.delete_api_key(project_id, key_id).await? {
            return Err(EngineError::NotFound(format!("API key '{key_id}'")));
        }
        info!(%project_id, %key_id, "API key deleted");
        Ok(())
    }
}
