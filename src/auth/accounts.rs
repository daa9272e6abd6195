use crate::core::tenant::generate_session_token;
use crate::core::{Account, AccountInfo, EngineError, Result, Session};
use crate::storage::{self, CredentialTx, StorageTx};
use chrono::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 8;
const MAX_EMAIL_LEN: usize = 254;

/// Owner accounts and their sessions.
///
/// Passwords are stored as bcrypt hashes; sessions are opaque random tokens
/// with a fixed time to live.
#[derive(Debug, Clone)]
pub struct AccountManager {
    bcrypt_cost: u32,
    session_ttl: Duration,
}

impl AccountManager {
    pub fn new(bcrypt_cost: u32, session_ttl: Duration) -> Self {
        Self {
            bcrypt_cost,
            session_ttl,
        }
    }

    fn hash_password(&self, password: &str) -> Result<String> {
        bcrypt::hash(password, self.bcrypt_cost)
            .map_err(|e| EngineError::Internal(format!("password hashing failed: {e}")))
    }

    fn verify_password(password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or(false)
    }

    fn normalize_email(email: &str) -> String {
        email.trim().to_ascii_lowercase()
    }

    fn validate_email(email: &str) -> Result<()> {
        if email.is_empty() {
            return Err(EngineError::Validation("Email cannot be empty".into()));
        }
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::Validation("Email is too long".into()));
        }
        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && !domain.is_empty() && !domain.contains('@')
            }
            None => false,
        };
        if !valid || email.chars().any(char::is_whitespace) {
            return Err(EngineError::Validation(format!("Invalid email '{email}'")));
        }
        Ok(())
    }

    fn validate_password(password: &str) -> Result<()> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(EngineError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(())
    }

    pub async fn register(
        &self,
        tx: &mut dyn StorageTx,
        email: &str,
        password: &str,
    ) -> Result<AccountInfo> {
        let email = Self::normalize_email(email);
        Self::validate_email(&email)?;
        Self::validate_password(password)?;

        if tx.find_account_by_email(&email).await?.is_some() {
            return Err(EngineError::NameConflict(format!("Account '{email}'")));
        }

        let account = Account {
            id: Uuid::new_v4(),
            email,
            password_hash: self.hash_password(password)?,
            active: true,
            created_at: storage::now(),
        };
        tx.insert_account(&account).await?;

        info!(account_id = %account.id, "account registered");
        Ok(AccountInfo::from(&account))
    }

    /// Verifies the password and opens a session.
    pub async fn login(
        &self,
        tx: &mut dyn StorageTx,
        email: &str,
        password: &str,
    ) -> Result<Session> {
        let email = Self::normalize_email(email);
        let account = match tx.find_account_by_email(&email).await? {
            Some(account) if Self::verify_password(password, &account.password_hash) => account,
            _ => {
                warn!("rejected login");
                return Err(EngineError::InvalidLogin);
            }
        };
        if !account.active {
            return Err(EngineError::AccountInactive);
        }

        let now = storage::now();
        let session = Session {
            token: generate_session_token(),
            account_id: account.id,
            expires_at: now + self.session_ttl,
            created_at: now,
        };
        tx.insert_session(&session).await?;

        info!(account_id = %account.id, "session opened");
        Ok(session)
    }

    pub async fn logout(&self, tx: &mut dyn StorageTx, token: &str) -> Result<()> {
        if !tx.delete_session(token).await? {
            return Err(EngineError::SessionInvalid);
        }
        Ok(())
    }

    pub async fn get_account(&self, tx: &mut dyn StorageTx, id: Uuid) -> Result<AccountInfo> {
        tx.get_account(id)
            .await?
            .map(|account| AccountInfo::from(&account))
            .ok_or_else(|| EngineError::NotFound(format!("Account '{id}'")))
    }

    /// Creates the configured admin account unless an account with that email
    /// already exists. Returns the account either way.
    pub async fn bootstrap_admin(
        &self,
        tx: &mut dyn StorageTx,
        email: &str,
        password: &str,
    ) -> Result<AccountInfo> {
        let normalized = Self::normalize_email(email);
        if let Some(existing) = tx.find_account_by_email(&normalized).await? {
            return Ok(AccountInfo::from(&existing));
        }
        let account = self.register(tx, email, password).await?;
        info!(account_id = %account.id, "admin account bootstrapped");
        Ok(account)
    }
}
