use crate::core::ProjectSettings;
use anyhow::{Context, bail};
use std::env;
use std::time::Duration;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,

    /// Table quota for projects created without explicit settings.
    pub default_max_tables: u32,

    /// Primary-key rate limit for projects created without explicit settings.
    pub default_rate_limit_per_minute: u32,

    pub session_ttl: Duration,

    /// Single deadline applied to every engine operation.
    pub request_timeout: Duration,

    pub allow_registration: bool,

    pub bcrypt_cost: u32,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
            default_max_tables: 50,
            default_rate_limit_per_minute: 600,
            session_ttl: Duration::from_secs(24 * 60 * 60),
            request_timeout: Duration::from_secs(30),
            allow_registration: true,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }

    pub fn page_sizes(mut self, default: u32, max: u32) -> Self {
        self.default_page_size = default;
        self.max_page_size = max;
        self
    }

    pub fn default_max_tables(mut self, max: u32) -> Self {
        self.default_max_tables = max;
        self
    }

    pub fn default_rate_limit(mut self, per_minute: u32) -> Self {
        self.default_rate_limit_per_minute = per_minute;
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn allow_registration(mut self, allow: bool) -> Self {
        self.allow_registration = allow;
        self
    }

    pub fn bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// Settings given to a project created without explicit ones.
    pub fn default_project_settings(&self) -> ProjectSettings {
        ProjectSettings::new(self.default_max_tables, self.default_rate_limit_per_minute)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.default_page_size == 0 {
            return Err("default_page_size must be > 0".to_string());
        }
        if self.max_page_size == 0 {
            return Err("max_page_size must be > 0".to_string());
        }
        if self.default_page_size > self.max_page_size {
            return Err("default_page_size cannot exceed max_page_size".to_string());
        }
        if self.session_ttl.is_zero() {
            return Err("session_ttl must be > 0".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("request_timeout must be > 0".to_string());
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err("bcrypt_cost must be between 4 and 31".to_string());
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-level settings for the server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `postgres://...` or `memory`.
    pub database_url: String,
    pub db_max_connections: u32,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub engine: EngineConfig,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    /// Reads `TENANTDB_*` variables (and `DATABASE_URL`), loading `.env` first.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = EngineConfig::new();
        let engine = EngineConfig {
            default_page_size: env_or("TENANTDB_DEFAULT_PAGE_SIZE", defaults.default_page_size)?,
            max_page_size: env_or("TENANTDB_MAX_PAGE_SIZE", defaults.max_page_size)?,
            default_max_tables: env_or("TENANTDB_MAX_TABLES", defaults.default_max_tables)?,
            default_rate_limit_per_minute: env_or(
                "TENANTDB_RATE_LIMIT_PER_MINUTE",
                defaults.default_rate_limit_per_minute,
            )?,
            session_ttl: Duration::from_secs(env_or(
                "TENANTDB_SESSION_TTL_SECS",
                defaults.session_ttl.as_secs(),
            )?),
            request_timeout: Duration::from_millis(env_or(
                "TENANTDB_REQUEST_TIMEOUT_MS",
                defaults.request_timeout.as_millis() as u64,
            )?),
            allow_registration: env_or("TENANTDB_ALLOW_REGISTRATION", defaults.allow_registration)?,
            bcrypt_cost: env_or("TENANTDB_BCRYPT_COST", defaults.bcrypt_cost)?,
        };

        let config = Self {
            host: env::var("TENANTDB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("TENANTDB_PORT", 8080)?,
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "memory".to_string()),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10)?,
            admin_email: env::var("TENANTDB_ADMIN_EMAIL").ok(),
            admin_password: env::var("TENANTDB_ADMIN_PASSWORD").ok(),
            engine,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Err(message) = self.engine.validate() {
            bail!("invalid engine configuration: {message}");
        }
        if self.db_max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be > 0");
        }
        if self.admin_email.is_some() != self.admin_password.is_some() {
            bail!("TENANTDB_ADMIN_EMAIL and TENANTDB_ADMIN_PASSWORD must be set together");
        }
        Ok(())
    }

    pub fn uses_postgres(&self) -> bool {
        self.database_url.starts_with("postgres://")
            || self.database_url.starts_with("postgresql://")
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
