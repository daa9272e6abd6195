use crate::auth::PermissionSet;
use chrono::{DateTime, Utc};
use rand::distributions::{Alphanumeric, DistString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Feature flag gating named API keys for a project.
pub const FEATURE_API_KEYS: &str = "api_keys";

const KEY_LENGTH: usize = 40;
const SESSION_TOKEN_LENGTH: usize = 48;

fn random_token(prefix: &str, len: usize) -> String {
    format!(
        "{prefix}{}",
        Alphanumeric.sample_string(&mut rand::thread_rng(), len)
    )
}

pub fn generate_project_key() -> String {
    random_token("pk_", KEY_LENGTH)
}

pub fn generate_api_key() -> String {
    random_token("sk_", KEY_LENGTH)
}

pub fn generate_session_token() -> String {
    random_token("", SESSION_TOKEN_LENGTH)
}

/// Per-project configuration value object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub max_tables: u32,
    pub rate_limit_per_minute: u32,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
}

impl ProjectSettings {
    pub fn new(max_tables: u32, rate_limit_per_minute: u32) -> Self {
        Self {
            max_tables,
            rate_limit_per_minute,
            features: BTreeMap::new(),
        }
    }

    /// Flags default to enabled unless explicitly switched off.
    pub fn feature_enabled(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(true)
    }
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self::new(50, 600)
    }
}

/// Tenant boundary owning tables, keys and data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub project_key: String,
    pub settings: ProjectSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(owner_id: Uuid, name: impl Into<String>, settings: ProjectSettings) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: name.into(),
            project_key: generate_project_key(),
            settings,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Secondary credential scoped to one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub project_id: Uuid,
    pub key: String,
    pub name: String,
    pub permissions: PermissionSet,
    pub active: bool,
    pub usage_count: u64,
    pub rate_limit: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn new(project_id: Uuid, name: impl Into<String>, permissions: PermissionSet) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            key: generate_api_key(),
            name: name.into(),
            permissions,
            active: true,
            usage_count: 0,
            rate_limit: None,
            expires_at: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

/// Owner account backing session credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Public view of an [`Account`]; never carries the hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountInfo {
    pub id: Uuid,
    pub email: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountInfo {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
            active: account.active,
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub token: String,
    pub account_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
