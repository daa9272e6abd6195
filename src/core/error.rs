use crate::auth::Permission;
use thiserror::Error;

/// Coarse error categories exposed to callers.
///
/// Every [`EngineError`] belongs to exactly one kind; the kind decides the
/// HTTP status, the variant decides the machine-readable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    NameConflict,
    Validation,
    PermissionDenied,
    Authentication,
    Ddl,
    LimitExceeded,
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Record '{0}' not found")]
    RecordNotFound(String),

    #[error("{0} already exists")]
    NameConflict(String),

    #[error("Missing required field '{0}'")]
    MissingRequiredField(String),

    #[error("Payload does not contain any known field")]
    NoValidFields,

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("{0}")]
    Validation(String),

    #[error("Authentication required")]
    MissingCredentials,

    #[error("Invalid API key")]
    KeyInvalid,

    #[error("API key expired")]
    KeyExpired,

    #[error("Invalid or expired session")]
    SessionInvalid,

    #[error("Invalid email or password")]
    InvalidLogin,

    #[error("Account is inactive")]
    AccountInactive,

    #[error("Missing permission '{0}'")]
    InsufficientPermission(Permission),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("Schema change failed: {0}")]
    Ddl(String),

    #[error("{0}")]
    LimitExceeded(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Request deadline exceeded")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFieldValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::TableNotFound(_) | Self::RecordNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::NameConflict(_) => ErrorKind::NameConflict,
            Self::MissingRequiredField(_)
            | Self::NoValidFields
            | Self::InvalidFieldValue { .. }
            | Self::Validation(_) => ErrorKind::Validation,
            Self::MissingCredentials
            | Self::KeyInvalid
            | Self::KeyExpired
            | Self::SessionInvalid
            | Self::InvalidLogin
            | Self::AccountInactive => ErrorKind::Authentication,
            Self::InsufficientPermission(_) | Self::PermissionDenied(_) => {
                ErrorKind::PermissionDenied
            }
            Self::Ddl(_) => ErrorKind::Ddl,
            Self::LimitExceeded(_) | Self::RateLimited => ErrorKind::LimitExceeded,
            Self::Timeout | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code carried in error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::TableNotFound(_) => "TABLE_NOT_FOUND",
            Self::RecordNotFound(_) => "RECORD_NOT_FOUND",
            Self::NameConflict(_) => "NAME_CONFLICT",
            Self::MissingRequiredField(_) => "MISSING_REQUIRED_FIELD",
            Self::NoValidFields => "NO_VALID_FIELDS",
            Self::InvalidFieldValue { .. } => "INVALID_FIELD_VALUE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::MissingCredentials => "AUTHENTICATION_REQUIRED",
            Self::KeyInvalid => "KEY_INVALID",
            Self::KeyExpired => "KEY_EXPIRED",
            Self::SessionInvalid => "SESSION_INVALID",
            Self::InvalidLogin => "INVALID_LOGIN",
            Self::AccountInactive => "ACCOUNT_INACTIVE",
            Self::InsufficientPermission(_) => "INSUFFICIENT_PERMISSION",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::Ddl(_) => "DDL_ERROR",
            Self::LimitExceeded(_) => "LIMIT_EXCEEDED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Timeout => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message that is safe to hand to an untrusted caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl<T> From<std::sync::PoisonError<T>> for EngineError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {err}"))
    }
}
