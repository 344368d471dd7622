//! Provisioned account records: users, clients, and bus configurations

use serde::{Deserialize, Serialize};

/// An admin or bus-owner account
///
/// `pwd_hash` is a `crypto::hash_secret` value, never a plaintext secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user: String,
    pub pwd_hash: String,
}

impl User {
    pub fn new(user: impl Into<String>, pwd_hash: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pwd_hash: pwd_hash.into(),
        }
    }
}

/// A provisioned OAuth client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    pub pwd_hash: String,
    pub source_url: String,
    pub redirect_uri: String,
}

impl Client {
    pub fn new(
        client_id: impl Into<String>,
        pwd_hash: impl Into<String>,
        source_url: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            pwd_hash: pwd_hash.into(),
            source_url: source_url.into(),
            redirect_uri: redirect_uri.into(),
        }
    }
}

/// Per-bus configuration: owner and retention policy
///
/// Retention is validated and stored here; enforcement belongs to the
/// delivery subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub bus_name: String,
    pub owner: String,
    pub retention_time_seconds: u64,
    pub retention_sticky_time_seconds: u64,
}

impl BusConfig {
    pub fn new(
        bus_name: impl Into<String>,
        owner: impl Into<String>,
        retention_time_seconds: u64,
        retention_sticky_time_seconds: u64,
    ) -> Self {
        Self {
            bus_name: bus_name.into(),
            owner: owner.into(),
            retention_time_seconds,
            retention_sticky_time_seconds,
        }
    }
}
