//! Bulk admin provisioning of users, clients, buses, and grants
//!
//! Every operation authenticates an admin credential pair before touching
//! anything; a failed check rejects the whole batch with zero mutations.
//! Within an authenticated batch, items succeed or fail independently and
//! the result is an itemized map.

use crate::auth::{GrantError, GrantManager};
use crate::crypto;
use crate::registry::{BusConfig, Client, User};
use crate::storage::{CredentialStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Itemized result for a successful update or delete
pub const UPDATE_SUCCESS: &str = "BACKPLANE_UPDATE_SUCCESS";

/// Itemized result for a missing delete/list target
pub const ENTRY_NOT_FOUND: &str = "BACKPLANE_ENTRY_NOT_FOUND";

/// Itemized result for a successful grant add/revoke
pub const GRANT_UPDATE_SUCCESS: &str = "GRANT_UPDATE_SUCCESS";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Wire shape of a user entry: `{"USER": ..., "PWDHASH": ...}`
///
/// `PWDHASH` is a `crypto::hash_secret` value produced by the caller (the
/// `busgate admin` command prints one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(rename = "USER")]
    pub user: String,
    #[serde(rename = "PWDHASH")]
    pub pwd_hash: String,
}

impl From<User> for UserConfig {
    fn from(user: User) -> Self {
        Self {
            user: user.user,
            pwd_hash: user.pwd_hash,
        }
    }
}

/// Wire shape of a client entry
///
/// Unlike users, `PWDHASH` here is the client's plaintext secret; it is
/// hashed before storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(rename = "USER")]
    pub client_id: String,
    #[serde(rename = "PWDHASH")]
    pub secret: String,
    #[serde(rename = "SOURCE_URL", default)]
    pub source_url: String,
    #[serde(rename = "REDIRECT_URI", default)]
    pub redirect_uri: String,
}

/// Wire shape of a bus entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfigEntry {
    #[serde(rename = "BUS_NAME")]
    pub bus_name: String,
    #[serde(rename = "OWNER")]
    pub owner: String,
    #[serde(rename = "RETENTION_TIME_SECONDS")]
    pub retention_time_seconds: u64,
    #[serde(rename = "RETENTION_STICKY_TIME_SECONDS")]
    pub retention_sticky_time_seconds: u64,
}

impl From<BusConfig> for BusConfigEntry {
    fn from(config: BusConfig) -> Self {
        Self {
            bus_name: config.bus_name,
            owner: config.owner,
            retention_time_seconds: config.retention_time_seconds,
            retention_sticky_time_seconds: config.retention_sticky_time_seconds,
        }
    }
}

/// Itemized results keyed by entity
pub type ItemResults = BTreeMap<String, String>;

/// Admin CRUD over the registry and grant set
pub struct Provisioner {
    store: Arc<dyn CredentialStore>,
    grants: GrantManager,
}

impl Provisioner {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            grants: GrantManager::new(store.clone()),
            store,
        }
    }

    /// Check the admin credential pair; all provisioning goes through this
    async fn authenticate(&self, admin: &str, secret: &str) -> Result<(), ProvisionError> {
        let user = self
            .store
            .get_user(admin)
            .await?
            .ok_or(ProvisionError::AuthenticationFailed)?;

        if !crypto::verify_secret(secret, &user.pwd_hash) {
            warn!(admin = %admin, "admin authentication failed");
            return Err(ProvisionError::AuthenticationFailed);
        }
        Ok(())
    }

    pub async fn user_update(
        &self,
        admin: &str,
        secret: &str,
        configs: &[UserConfig],
    ) -> Result<ItemResults, ProvisionError> {
        self.authenticate(admin, secret).await?;

        let mut results = ItemResults::new();
        for config in configs {
            let user = User::new(config.user.clone(), config.pwd_hash.clone());
            self.store.put_user(&user).await?;
            info!(user = %config.user, "provisioned user");
            results.insert(config.user.clone(), UPDATE_SUCCESS.to_string());
        }
        Ok(results)
    }

    pub async fn user_list(
        &self,
        admin: &str,
        secret: &str,
        entities: &[String],
    ) -> Result<BTreeMap<String, serde_json::Value>, ProvisionError> {
        self.authenticate(admin, secret).await?;

        let mut results = BTreeMap::new();
        if entities.is_empty() {
            for user in self.store.list_users().await? {
                results.insert(user.user.clone(), to_json(UserConfig::from(user)));
            }
        } else {
            for name in entities {
                match self.store.get_user(name).await? {
                    Some(user) => {
                        results.insert(name.clone(), to_json(UserConfig::from(user)));
                    }
                    None => {
                        results.insert(name.clone(), serde_json::json!(ENTRY_NOT_FOUND));
                    }
                }
            }
        }
        Ok(results)
    }

    pub async fn user_delete(
        &self,
        admin: &str,
        secret: &str,
        entities: &[String],
    ) -> Result<ItemResults, ProvisionError> {
        self.authenticate(admin, secret).await?;

        let mut results = ItemResults::new();
        for name in entities {
            let deleted = self.store.delete_user(name).await?;
            results.insert(name.clone(), delete_result(deleted));
        }
        Ok(results)
    }

    pub async fn client_update(
        &self,
        admin: &str,
        secret: &str,
        configs: &[ClientConfig],
    ) -> Result<ItemResults, ProvisionError> {
        self.authenticate(admin, secret).await?;

        let mut results = ItemResults::new();
        for config in configs {
            let client = Client::new(
                config.client_id.clone(),
                crypto::hash_secret(&config.secret),
                config.source_url.clone(),
                config.redirect_uri.clone(),
            );
            self.store.put_client(&client).await?;
            info!(client_id = %config.client_id, "provisioned client");
            results.insert(config.client_id.clone(), UPDATE_SUCCESS.to_string());
        }
        Ok(results)
    }

    pub async fn client_list(
        &self,
        admin: &str,
        secret: &str,
        entities: &[String],
    ) -> Result<BTreeMap<String, serde_json::Value>, ProvisionError> {
        self.authenticate(admin, secret).await?;

        let mut results = BTreeMap::new();
        if entities.is_empty() {
            for client in self.store.list_clients().await? {
                results.insert(client.client_id.clone(), client_json(client));
            }
        } else {
            for id in entities {
                match self.store.get_client(id).await? {
                    Some(client) => {
                        results.insert(id.clone(), client_json(client));
                    }
                    None => {
                        results.insert(id.clone(), serde_json::json!(ENTRY_NOT_FOUND));
                    }
                }
            }
        }
        Ok(results)
    }

    pub async fn client_delete(
        &self,
        admin: &str,
        secret: &str,
        entities: &[String],
    ) -> Result<ItemResults, ProvisionError> {
        self.authenticate(admin, secret).await?;

        let mut results = ItemResults::new();
        for id in entities {
            let deleted = self.store.delete_client(id).await?;
            results.insert(id.clone(), delete_result(deleted));
        }
        Ok(results)
    }

    pub async fn bus_update(
        &self,
        admin: &str,
        secret: &str,
        configs: &[BusConfigEntry],
    ) -> Result<ItemResults, ProvisionError> {
        self.authenticate(admin, secret).await?;

        let mut results = ItemResults::new();
        for config in configs {
            // The owner must already be provisioned
            if self.store.get_user(&config.owner).await?.is_none() {
                results.insert(
                    config.bus_name.clone(),
                    format!("Invalid bus owner: {}", config.owner),
                );
                continue;
            }

            let bus = BusConfig::new(
                config.bus_name.clone(),
                config.owner.clone(),
                config.retention_time_seconds,
                config.retention_sticky_time_seconds,
            );
            self.store.put_bus_config(&bus).await?;
            info!(bus = %config.bus_name, owner = %config.owner, "provisioned bus");
            results.insert(config.bus_name.clone(), UPDATE_SUCCESS.to_string());
        }
        Ok(results)
    }

    pub async fn bus_list(
        &self,
        admin: &str,
        secret: &str,
        entities: &[String],
    ) -> Result<BTreeMap<String, serde_json::Value>, ProvisionError> {
        self.authenticate(admin, secret).await?;

        let mut results = BTreeMap::new();
        if entities.is_empty() {
            for bus in self.store.list_bus_configs().await? {
                results.insert(bus.bus_name.clone(), to_json(BusConfigEntry::from(bus)));
            }
        } else {
            for name in entities {
                match self.store.get_bus_config(name).await? {
                    Some(bus) => {
                        results.insert(name.clone(), to_json(BusConfigEntry::from(bus)));
                    }
                    None => {
                        results.insert(name.clone(), serde_json::json!(ENTRY_NOT_FOUND));
                    }
                }
            }
        }
        Ok(results)
    }

    pub async fn bus_delete(
        &self,
        admin: &str,
        secret: &str,
        entities: &[String],
    ) -> Result<ItemResults, ProvisionError> {
        self.authenticate(admin, secret).await?;

        let mut results = ItemResults::new();
        for name in entities {
            let deleted = self.store.delete_bus_config(name).await?;
            results.insert(name.clone(), delete_result(deleted));
        }
        Ok(results)
    }

    /// Add grants: `{client_id: "bus1 bus2"}` per entry
    pub async fn grant_add(
        &self,
        admin: &str,
        secret: &str,
        grants: &BTreeMap<String, String>,
    ) -> Result<ItemResults, ProvisionError> {
        self.authenticate(admin, secret).await?;

        let mut results = ItemResults::new();
        for (client_id, buses) in grants {
            let buses = split_buses(buses);
            match self.grants.add_grants(client_id, &buses).await {
                Ok(()) => {
                    results.insert(client_id.clone(), GRANT_UPDATE_SUCCESS.to_string());
                }
                Err(err) => {
                    results.insert(client_id.clone(), item_error(err)?);
                }
            }
        }
        Ok(results)
    }

    /// Revoke grants: `{client_id: "bus1 bus2"}` per entry
    pub async fn grant_revoke(
        &self,
        admin: &str,
        secret: &str,
        grants: &BTreeMap<String, String>,
    ) -> Result<ItemResults, ProvisionError> {
        self.authenticate(admin, secret).await?;

        let mut results = ItemResults::new();
        for (client_id, buses) in grants {
            let buses = split_buses(buses);
            match self.grants.revoke_grants(client_id, &buses).await {
                Ok(()) => {
                    results.insert(client_id.clone(), GRANT_UPDATE_SUCCESS.to_string());
                }
                Err(err) => {
                    results.insert(client_id.clone(), item_error(err)?);
                }
            }
        }
        Ok(results)
    }

    /// Grants per client, keyed by grant record id
    pub async fn grant_list(
        &self,
        admin: &str,
        secret: &str,
        entities: &[String],
    ) -> Result<BTreeMap<String, BTreeMap<String, String>>, ProvisionError> {
        self.authenticate(admin, secret).await?;

        self.grants
            .list_grants(entities)
            .await
            .map_err(grant_storage_error)
    }
}

fn delete_result(deleted: bool) -> String {
    if deleted {
        UPDATE_SUCCESS.to_string()
    } else {
        ENTRY_NOT_FOUND.to_string()
    }
}

fn split_buses(buses: &str) -> Vec<String> {
    buses.split_whitespace().map(str::to_string).collect()
}

fn to_json<T: Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn client_json(client: Client) -> serde_json::Value {
    serde_json::json!({
        "USER": client.client_id,
        "PWDHASH": client.pwd_hash,
        "SOURCE_URL": client.source_url,
        "REDIRECT_URI": client.redirect_uri,
    })
}

/// Domain failures become itemized messages; store failures abort the batch
fn item_error(err: GrantError) -> Result<String, ProvisionError> {
    match err {
        GrantError::Storage(e) => Err(e.into()),
        other => Ok(other.to_string()),
    }
}

fn grant_storage_error(err: GrantError) -> ProvisionError {
    match err {
        GrantError::Storage(e) => e.into(),
        other => ProvisionError::Storage(StorageError::Database(other.to_string())),
    }
}
