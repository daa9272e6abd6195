use super::{Permission, PermissionSet};
use crate::core::{AccountInfo, EngineError, Project, Result};
use uuid::Uuid;

/// Raw credentials as presented by a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub bearer: Option<String>,
    pub api_key: Option<String>,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer: Some(token.into()),
            api_key: None,
        }
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            bearer: None,
            api_key: Some(key.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bearer.is_none() && self.api_key.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OwnerSession {
    pub account: AccountInfo,
    pub token: String,
}

/// A key bound to one project. `key_id` is `None` for the project's primary
/// key, which carries the full permission set.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedKey {
    pub project_id: Uuid,
    pub key_id: Option<Uuid>,
    pub name: String,
    pub permissions: PermissionSet,
}

impl ScopedKey {
    pub fn is_primary(&self) -> bool {
        self.key_id.is_none()
    }
}

/// Authenticated identity, before any project has been selected.
#[derive(Debug, Clone, PartialEq)]
pub enum Caller {
    Owner(OwnerSession),
    Key(ScopedKey),
}

impl Caller {
    pub fn is_owner(&self) -> bool {
        matches!(self, Self::Owner(_))
    }

    /// The owning account, for operations that only an owner session may run.
    pub fn require_owner(&self) -> Result<&OwnerSession> {
        match self {
            Self::Owner(session) => Ok(session),
            Self::Key(_) => Err(EngineError::PermissionDenied(
                "This operation requires an owner session".into(),
            )),
        }
    }
}

/// What a caller may do inside one project.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessContext {
    pub project: Project,
    pub permissions: PermissionSet,
    pub is_owner: bool,
}

impl AccessContext {
    pub fn project_id(&self) -> Uuid {
        self.project.id
    }

    pub fn require_permission(&self, permission: Permission) -> Result<()> {
        if self.permissions.allows(permission) {
            Ok(())
        } else {
            Err(EngineError::InsufficientPermission(permission))
        }
    }

    pub fn require_owner(&self) -> Result<()> {
        if self.is_owner {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied(
                "This operation requires an owner session".into(),
            ))
        }
    }
}
