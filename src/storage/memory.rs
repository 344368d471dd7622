//! In-memory storage backend
//!
//! A single flat keyspace of JSON blobs behind namespaced keys, the same
//! shape a Redis-backed fast store would have. Used by tests and `--dev`
//! style setups; deletes are atomic map removals, which gives the
//! compare-and-delete guarantee the issuance flow relies on.

use crate::auth::{Access, GrantTokenRel};
use crate::registry::{BusConfig, Client, User};
use crate::storage::{bus_key, client_key, user_key, CredentialStore, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

fn access_key(id: &str) -> String {
    format!("access:{}", id)
}

fn rel_key(id: &str) -> String {
    format!("rel:{}", id)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// In-memory credential store
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put<T: Serialize>(&self, key: String, value: &T) -> Result<(), StorageError> {
        self.records.insert(key, encode(value)?);
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.records.get(key) {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> bool {
        self.records.remove(key).is_some()
    }

    /// Decode every record under a key prefix
    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StorageError> {
        let mut out = Vec::new();
        for entry in self.records.iter() {
            if entry.key().starts_with(prefix) {
                out.push(decode(entry.value())?);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn put_access(&self, access: &Access) -> Result<(), StorageError> {
        self.put(access_key(access.id()), access)
    }

    async fn get_access(&self, id: &str) -> Result<Option<Access>, StorageError> {
        self.get(&access_key(id))
    }

    async fn delete_access(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.delete(&access_key(id)))
    }

    async fn put_grant_rel(&self, rel: &GrantTokenRel) -> Result<(), StorageError> {
        self.put(rel_key(rel.id()), rel)
    }

    async fn grant_rels_by_auth(&self, auth_id: &str) -> Result<Vec<GrantTokenRel>, StorageError> {
        let mut rels: Vec<GrantTokenRel> = self
            .scan::<GrantTokenRel>("rel:")?
            .into_iter()
            .filter(|rel| rel.auth_id() == auth_id)
            .collect();
        rels.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(rels)
    }

    async fn delete_grant_rel(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.delete(&rel_key(id)))
    }

    async fn put_bus_config(&self, config: &BusConfig) -> Result<(), StorageError> {
        self.put(bus_key(&config.bus_name), config)
    }

    async fn get_bus_config(&self, bus_name: &str) -> Result<Option<BusConfig>, StorageError> {
        self.get(&bus_key(bus_name))
    }

    async fn delete_bus_config(&self, bus_name: &str) -> Result<bool, StorageError> {
        Ok(self.delete(&bus_key(bus_name)))
    }

    async fn list_bus_configs(&self) -> Result<Vec<BusConfig>, StorageError> {
        let mut configs = self.scan::<BusConfig>("bus:")?;
        configs.sort_by(|a, b| a.bus_name.cmp(&b.bus_name));
        Ok(configs)
    }

    async fn put_user(&self, user: &User) -> Result<(), StorageError> {
        self.put(user_key(&user.user), user)
    }

    async fn get_user(&self, name: &str) -> Result<Option<User>, StorageError> {
        self.get(&user_key(name))
    }

    async fn delete_user(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.delete(&user_key(name)))
    }

    async fn list_users(&self) -> Result<Vec<User>, StorageError> {
        let mut users = self.scan::<User>("user:")?;
        users.sort_by(|a, b| a.user.cmp(&b.user));
        Ok(users)
    }

    async fn put_client(&self, client: &Client) -> Result<(), StorageError> {
        self.put(client_key(&client.client_id), client)
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, StorageError> {
        self.get(&client_key(client_id))
    }

    async fn delete_client(&self, client_id: &str) -> Result<bool, StorageError> {
        Ok(self.delete(&client_key(client_id)))
    }

    async fn list_clients(&self) -> Result<Vec<Client>, StorageError> {
        let mut clients = self.scan::<Client>("client:")?;
        clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        Ok(clients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Access, AccessKind};

    #[tokio::test]
    async fn test_access_roundtrip() {
        let store = MemoryStore::new();
        let access = Access::new(
            "tok-1".to_string(),
            AccessKind::RegularToken,
            vec!["a.com".to_string()],
            String::new(),
            Some(100),
            false,
        )
        .unwrap();

        store.put_access(&access).await.unwrap();
        let loaded = store.get_access("tok-1").await.unwrap().unwrap();
        assert_eq!(loaded.id(), "tok-1");
        assert_eq!(loaded.buses(), ["a.com"]);

        assert!(store.get_access("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_is_compare_and_delete() {
        let store = MemoryStore::new();
        let access = Access::new(
            "code-1".to_string(),
            AccessKind::Code,
            vec![],
            String::new(),
            Some(100),
            false,
        )
        .unwrap();
        store.put_access(&access).await.unwrap();

        assert!(store.delete_access("code-1").await.unwrap());
        // Second delete observes the record is already gone
        assert!(!store.delete_access("code-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_rel_query_by_auth() {
        let store = MemoryStore::new();
        store
            .put_grant_rel(&GrantTokenRel::new("client-a", "tok-1"))
            .await
            .unwrap();
        store
            .put_grant_rel(&GrantTokenRel::new("client-a", "tok-2"))
            .await
            .unwrap();
        store
            .put_grant_rel(&GrantTokenRel::new("client-b", "tok-3"))
            .await
            .unwrap();

        let rels = store.grant_rels_by_auth("client-a").await.unwrap();
        assert_eq!(rels.len(), 2);
        assert!(rels.iter().all(|r| r.auth_id() == "client-a"));
    }

    #[tokio::test]
    async fn test_namespaces_do_not_collide() {
        let store = MemoryStore::new();
        store
            .put_user(&User::new("same-name", "hash"))
            .await
            .unwrap();
        store
            .put_bus_config(&BusConfig::new("same-name", "owner", 60, 0))
            .await
            .unwrap();

        assert!(store.get_user("same-name").await.unwrap().is_some());
        assert!(store.get_bus_config("same-name").await.unwrap().is_some());
        assert!(store.delete_user("same-name").await.unwrap());
        assert!(store.get_bus_config("same-name").await.unwrap().is_some());
    }
}
