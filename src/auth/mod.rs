//! Identity resolution and access policy.
//!
//! A request presents either an owner session (`Authorization: Bearer`) or a
//! project-scoped key (`X-API-Key`). [`AuthorizationGate`] resolves it to a
//! [`Caller`] and then, per project, to an [`AccessContext`] that the engine
//! checks before touching any schema or record.

pub mod accounts;
pub mod gate;
pub mod identity;
pub mod keys;
pub mod permission;
pub mod rate_limit;

pub use accounts::AccountManager;
pub use gate::AuthorizationGate;
pub use identity::{AccessContext, Caller, Credentials, OwnerSession, ScopedKey};
pub use keys::{KeyManager, NewApiKey};
pub use permission::{Permission, PermissionSet};
pub use rate_limit::RateLimiter;
