//! Grant relations between clients and buses
//!
//! A `GrantTokenRel` records that a credential was issued under a client's
//! authorization. The client's effective bus grant set is the union of the
//! buses on its active (non-expired) credentials; durable grants are held as
//! privileged records with no expiry.

use crate::auth::access::{now_epoch_secs, Access, AccessKind, TOKEN_ID_LENGTH};
use crate::crypto;
use crate::scope::Scope;
use crate::storage::{CredentialStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("Invalid bus: {0}")]
    InvalidBus(String),

    #[error("Invalid client: {0}")]
    InvalidClient(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Links an issued credential back to the authorization act that produced it
///
/// Never mutated; deleted when the grant is revoked or the credential dies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantTokenRel {
    id: String,
    auth_id: String,
    token_id: String,
}

impl GrantTokenRel {
    pub fn new(auth_id: impl Into<String>, token_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            auth_id: auth_id.into(),
            token_id: token_id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn auth_id(&self) -> &str {
        &self.auth_id
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }
}

/// Owns grant creation, revocation, and listing
pub struct GrantManager {
    store: Arc<dyn CredentialStore>,
}

impl GrantManager {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Grant a client access to a set of buses (idempotent union)
    ///
    /// Every bus must have a config record; the first unknown bus fails the
    /// operation with `InvalidBus`. Buses the client already holds durably
    /// are skipped.
    pub async fn add_grants(&self, client_id: &str, buses: &[String]) -> Result<(), GrantError> {
        if self.store.get_client(client_id).await?.is_none() {
            return Err(GrantError::InvalidClient(client_id.to_string()));
        }

        for bus in buses {
            if self.store.get_bus_config(bus).await?.is_none() {
                return Err(GrantError::InvalidBus(bus.clone()));
            }
        }

        let durable = self.durable_buses(client_id).await?;
        let mut new_buses: Vec<String> = Vec::new();
        for bus in buses {
            if !durable.contains(bus) && !new_buses.contains(bus) {
                new_buses.push(bus.clone());
            }
        }

        if new_buses.is_empty() {
            return Ok(());
        }

        let scope = Scope::encode_buses(new_buses.iter().map(String::as_str));
        let access = Access::privileged_token(
            crypto::random_string(TOKEN_ID_LENGTH),
            new_buses,
            scope,
            None,
        );
        self.store.put_access(&access).await?;

        let rel = GrantTokenRel::new(client_id, access.id());
        self.store.put_grant_rel(&rel).await?;

        debug!(client_id = %client_id, buses = %access.encoded_buses(), "added grant");
        Ok(())
    }

    /// Revoke a set of buses from a client (set difference)
    ///
    /// Revoking a bus the client does not hold is a no-op. A durable grant
    /// record that still covers other buses is replaced by one carrying the
    /// remainder; an issued token or code touching any revoked bus is
    /// deleted outright.
    pub async fn revoke_grants(&self, client_id: &str, buses: &[String]) -> Result<(), GrantError> {
        for (rel, access) in self.active_grant_records(client_id).await? {
            let kept: Vec<String> = access
                .buses()
                .iter()
                .filter(|b| !buses.contains(*b))
                .cloned()
                .collect();

            if kept.len() == access.buses().len() {
                continue;
            }

            self.store.delete_access(access.id()).await?;
            self.store.delete_grant_rel(rel.id()).await?;

            if !kept.is_empty() && access.kind() == AccessKind::PrivilegedToken {
                let scope = Scope::encode_buses(kept.iter().map(String::as_str));
                let replacement = Access::privileged_token(
                    crypto::random_string(TOKEN_ID_LENGTH),
                    kept,
                    scope,
                    None,
                );
                self.store.put_access(&replacement).await?;
                self.store
                    .put_grant_rel(&GrantTokenRel::new(client_id, replacement.id()))
                    .await?;
            }
        }

        debug!(client_id = %client_id, revoked = ?buses, "revoked grants");
        Ok(())
    }

    /// Grants per client, keyed by relation id, bus names sorted
    ///
    /// Clients with no active grants yield no entry. Output ordering is
    /// deterministic across calls.
    pub async fn list_grants(
        &self,
        client_ids: &[String],
    ) -> Result<BTreeMap<String, BTreeMap<String, String>>, GrantError> {
        let mut result = BTreeMap::new();

        for client_id in client_ids {
            let mut per_rel = BTreeMap::new();
            for (rel, access) in self.active_grant_records(client_id).await? {
                let mut names: Vec<&str> = access.buses().iter().map(String::as_str).collect();
                names.sort_unstable();
                per_rel.insert(rel.id().to_string(), names.join(" "));
            }
            if !per_rel.is_empty() {
                result.insert(client_id.clone(), per_rel);
            }
        }

        Ok(result)
    }

    /// Sorted union of all buses the client currently holds
    pub async fn granted_buses(&self, client_id: &str) -> Result<Vec<String>, GrantError> {
        let mut buses: Vec<String> = Vec::new();
        for (_, access) in self.active_grant_records(client_id).await? {
            for bus in access.buses() {
                if !buses.contains(bus) {
                    buses.push(bus.clone());
                }
            }
        }
        buses.sort_unstable();
        Ok(buses)
    }

    /// Record provenance for a freshly issued credential
    pub async fn record_issuance(
        &self,
        auth_id: &str,
        token_id: &str,
    ) -> Result<GrantTokenRel, GrantError> {
        let rel = GrantTokenRel::new(auth_id, token_id);
        self.store.put_grant_rel(&rel).await?;
        Ok(rel)
    }

    /// Active (relation, credential) pairs for a client
    ///
    /// Relations pointing at missing or expired credentials are cleaned up
    /// as they are observed.
    async fn active_grant_records(
        &self,
        client_id: &str,
    ) -> Result<Vec<(GrantTokenRel, Access)>, GrantError> {
        let now = now_epoch_secs();
        let mut records = Vec::new();

        for rel in self.store.grant_rels_by_auth(client_id).await? {
            match self.store.get_access(rel.token_id()).await? {
                Some(access) if !access.is_expired(now) => records.push((rel, access)),
                Some(expired) => {
                    self.store.delete_access(expired.id()).await?;
                    self.store.delete_grant_rel(rel.id()).await?;
                }
                None => {
                    self.store.delete_grant_rel(rel.id()).await?;
                }
            }
        }

        Ok(records)
    }

    /// Buses held through durable (never-expiring) grant records
    async fn durable_buses(&self, client_id: &str) -> Result<Vec<String>, GrantError> {
        let mut buses = Vec::new();
        for (_, access) in self.active_grant_records(client_id).await? {
            if access.kind() == AccessKind::PrivilegedToken && access.expires().is_none() {
                for bus in access.buses() {
                    if !buses.contains(bus) {
                        buses.push(bus.clone());
                    }
                }
            }
        }
        Ok(buses)
    }
}
