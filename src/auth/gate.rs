use super::identity::{AccessContext, Caller, Credentials, OwnerSession, ScopedKey};
use super::{PermissionSet, RateLimiter};
use crate::core::tenant::FEATURE_API_KEYS;
use crate::core::{AccountInfo, EngineError, Result};
use crate::storage::{self, CredentialTx, StorageTx};
use tracing::{debug, warn};
use uuid::Uuid;

/// Resolves credentials to a [`Caller`] and callers to per-project access.
///
/// Both steps run strictly before any schema or record work. Authentication
/// has a side effect (key usage accounting), so the engine commits it on its
/// own.
#[derive(Debug, Default)]
pub struct AuthorizationGate {
    limiter: RateLimiter,
}

impl AuthorizationGate {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }

    /// A bearer token wins when both headers are present.
    pub async fn authenticate(
        &self,
        tx: &mut dyn StorageTx,
        credentials: &Credentials,
    ) -> Result<Caller> {
        if let Some(token) = credentials.bearer.as_deref() {
            return self.authenticate_session(tx, token).await;
        }
        if let Some(key) = credentials.api_key.as_deref() {
            return self.authenticate_key(tx, key).await;
        }
        Err(EngineError::MissingCredentials)
    }

    async fn authenticate_session(&self, tx: &mut dyn StorageTx, token: &str) -> Result<Caller> {
        let now = storage::now();
        let session = match tx.find_session(token).await? {
            Some(session) if !session.is_expired(now) => session,
            Some(_) => {
                warn!("rejected expired session");
                return Err(EngineError::SessionInvalid);
            }
            None => {
                warn!("rejected unknown session token");
                return Err(EngineError::SessionInvalid);
            }
        };

        let account = tx
            .get_account(session.account_id)
            .await?
            .ok_or(EngineError::SessionInvalid)?;
        if !account.active {
            warn!(account_id = %account.id, "rejected session of inactive account");
            return Err(EngineError::AccountInactive);
        }

        debug!(account_id = %account.id, "owner session authenticated");
        Ok(Caller::Owner(OwnerSession {
            account: AccountInfo::from(&account),
            token: token.to_string(),
        }))
    }

    async fn authenticate_key(&self, tx: &mut dyn StorageTx, key: &str) -> Result<Caller> {
        if let Some(project) = tx.find_project_by_key(key).await? {
            self.limiter
                .check(&project.project_key, project.settings.rate_limit_per_minute)
                .inspect_err(|_| warn!(project_id = %project.id, "primary key rate limited"))?;
            debug!(project_id = %project.id, "primary project key authenticated");
            return Ok(Caller::Key(ScopedKey {
                project_id: project.id,
                key_id: None,
                name: "primary".to_string(),
                permissions: PermissionSet::full(),
            }));
        }

        let api_key = match tx.find_api_key(key).await? {
            Some(api_key) if api_key.active => api_key,
            _ => {
                warn!("rejected unknown or inactive API key");
                return Err(EngineError::KeyInvalid);
            }
        };
        let now = storage::now();
        if api_key.is_expired(now) {
            warn!(key_id = %api_key.id, "rejected expired API key");
            return Err(EngineError::KeyExpired);
        }

        let project = tx
            .get_project(api_key.project_id)
            .await?
            .ok_or(EngineError::KeyInvalid)?;
        if !project.settings.feature_enabled(FEATURE_API_KEYS) {
            warn!(project_id = %project.id, "API keys are disabled for project");
            return Err(EngineError::KeyInvalid);
        }

        let limit = api_key
            .rate_limit
            .unwrap_or(project.settings.rate_limit_per_minute);
        self.limiter
            .check(&api_key.key, limit)
            .inspect_err(|_| warn!(key_id = %api_key.id, "API key rate limited"))?;

        tx.record_key_usage(api_key.id, now).await?;
        debug!(key_id = %api_key.id, project_id = %project.id, "API key authenticated");
        Ok(Caller::Key(ScopedKey {
            project_id: project.id,
            key_id: Some(api_key.id),
            name: api_key.name,
            permissions: api_key.permissions,
        }))
    }

    /// Selects `project_id` for `caller`.
    ///
    /// An owner who does not own the project gets `NotFound`, so project ids
    /// are not disclosed; a key presented against another project's path gets
    /// `PermissionDenied`.
    pub async fn authorize(
        &self,
        tx: &mut dyn StorageTx,
        caller: &Caller,
        project_id: Uuid,
    ) -> Result<AccessContext> {
        let not_found = || EngineError::NotFound(format!("Project '{project_id}'"));
        match caller {
            Caller::Owner(session) => {
                let project = tx
                    .get_project(project_id)
                    .await?
                    .filter(|p| p.owner_id == session.account.id)
                    .ok_or_else(not_found)?;
                Ok(AccessContext {
                    project,
                    permissions: PermissionSet::full(),
                    is_owner: true,
                })
            }
            Caller::Key(key) => {
                if key.project_id != project_id {
                    warn!(key = %key.name, %project_id, "key used against another project");
                    return Err(EngineError::PermissionDenied(
                        "API key is not valid for this project".into(),
                    ));
                }
                let project = tx.get_project(project_id).await?.ok_or_else(not_found)?;
                Ok(AccessContext {
                    project,
                    permissions: key.permissions.clone(),
                    is_owner: false,
                })
            }
        }
    }
}
