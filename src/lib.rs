// ============================================================================
// tenantdb
// ============================================================================
//
// Runtime-defined tenant tables, materialized as real relational tables and
// served through validated CRUD.
//
//   web  ->  engine  ->  auth (gate)  ->  schema (registry, physical)
//                                     ->  gateway (records)
//                    ->  storage (postgres | memory)

pub mod auth;
pub mod config;
pub mod core;
pub mod engine;
pub mod gateway;
pub mod projects;
pub mod schema;
pub mod storage;
pub mod web;

pub use auth::{Caller, Credentials, NewApiKey, Permission, PermissionSet};
pub use config::{EngineConfig, ServerConfig};
pub use core::{
    EngineError, ErrorKind, FieldDefinition, FieldType, LogicalTable, Project, ProjectSettings,
    Record, RecordPage, Result, SortDirection,
};
pub use engine::{Engine, NewTable};
pub use gateway::ListQuery;
pub use projects::NewProject;
pub use storage::{MemoryStorage, PostgresStorage, Storage};
pub use web::{AppState, build_router};
