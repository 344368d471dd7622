//! Storage backends for busgate
//!
//! - Postgres: durable storage for credentials, grant relations, and
//!   registry records
//! - Memory: Redis-like in-process keyspace for tests and development

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresStore};

use crate::auth::{Access, GrantTokenRel};
use crate::registry::{BusConfig, Client, User};
pub use async_trait::async_trait;
use thiserror::Error;

/// Storage errors
///
/// These propagate distinctly from domain errors; a store failure is never
/// folded into an authorization decision.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Namespaced key for a bus config record
pub(crate) fn bus_key(bus_name: &str) -> String {
    format!("bus:{}", bus_name)
}

/// Namespaced key for a user record
pub(crate) fn user_key(user: &str) -> String {
    format!("user:{}", user)
}

/// Namespaced key for a client record
pub(crate) fn client_key(client_id: &str) -> String {
    format!("client:{}", client_id)
}

/// Persistence interface for credentials, grant relations, and registry
/// records
///
/// Deletes return whether a record was actually removed; callers use this as
/// a compare-and-delete primitive (single-use code consumption relies on it).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn put_access(&self, access: &Access) -> Result<(), StorageError>;
    async fn get_access(&self, id: &str) -> Result<Option<Access>, StorageError>;
    async fn delete_access(&self, id: &str) -> Result<bool, StorageError>;

    async fn put_grant_rel(&self, rel: &GrantTokenRel) -> Result<(), StorageError>;
    async fn grant_rels_by_auth(&self, auth_id: &str) -> Result<Vec<GrantTokenRel>, StorageError>;
    async fn delete_grant_rel(&self, id: &str) -> Result<bool, StorageError>;

    async fn put_bus_config(&self, config: &BusConfig) -> Result<(), StorageError>;
    async fn get_bus_config(&self, bus_name: &str) -> Result<Option<BusConfig>, StorageError>;
    async fn delete_bus_config(&self, bus_name: &str) -> Result<bool, StorageError>;
    async fn list_bus_configs(&self) -> Result<Vec<BusConfig>, StorageError>;

    async fn put_user(&self, user: &User) -> Result<(), StorageError>;
    async fn get_user(&self, name: &str) -> Result<Option<User>, StorageError>;
    async fn delete_user(&self, name: &str) -> Result<bool, StorageError>;
    async fn list_users(&self) -> Result<Vec<User>, StorageError>;

    async fn put_client(&self, client: &Client) -> Result<(), StorageError>;
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, StorageError>;
    async fn delete_client(&self, client_id: &str) -> Result<bool, StorageError>;
    async fn list_clients(&self) -> Result<Vec<Client>, StorageError>;
}
