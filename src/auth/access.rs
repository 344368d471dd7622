//! Access records: tokens and authorization codes
//!
//! An `Access` is the stored form of every credential the bus issues. The
//! kind decides the expiry rules; the scope string carries bus and channel
//! authorization in the `scope` grammar.

use crate::crypto;
use crate::scope::{Scope, KEY_CHANNEL};
use crate::storage::{CredentialStore, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// Length of a generated channel identifier
pub const CHANNEL_NAME_LENGTH: usize = 32;

/// Length of a generated token or code id
pub const TOKEN_ID_LENGTH: usize = 20;

/// Lifetime of an issued regular token
pub const TOKEN_EXPIRES_SECONDS: u64 = 3600;

/// Lifetime of an authorization code
pub const CODE_EXPIRES_SECONDS: u64 = 600;

/// Current wall-clock time as unix epoch seconds
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("{0} requires an expiration time")]
    MissingExpiry(AccessKind),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Credential kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    RegularToken,
    PrivilegedToken,
    Code,
}

impl AccessKind {
    /// Regular tokens and codes must expire; privileged tokens may not
    pub fn requires_expiry(&self) -> bool {
        matches!(self, AccessKind::RegularToken | AccessKind::Code)
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::RegularToken => write!(f, "regular_token"),
            AccessKind::PrivilegedToken => write!(f, "privileged_token"),
            AccessKind::Code => write!(f, "code"),
        }
    }
}

/// A stored credential: token or code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Access {
    id: String,
    kind: AccessKind,
    /// Authorized buses, set at creation and immutable thereafter
    buses: Vec<String>,
    scope: String,
    /// Unix epoch seconds; `None` never expires
    expires: Option<u64>,
    /// Set only when the credential was created with channel binding
    channel: Option<String>,
}

impl Access {
    /// Create a credential record of a runtime-chosen kind
    ///
    /// Fails when `kind` requires an expiry and none is given. The per-kind
    /// constructors below encode that requirement in their signatures
    /// instead. With `bind_channel`, a fresh random channel id is generated
    /// and a matching `channel:<id>` entry appended to the scope.
    pub fn new(
        id: String,
        kind: AccessKind,
        buses: Vec<String>,
        scope: String,
        expires: Option<u64>,
        bind_channel: bool,
    ) -> Result<Self, AccessError> {
        if kind.requires_expiry() && expires.is_none() {
            return Err(AccessError::MissingExpiry(kind));
        }
        Ok(Self::assemble(id, kind, buses, scope, expires, bind_channel))
    }

    /// An expiring bearer token
    pub fn regular_token(
        id: String,
        buses: Vec<String>,
        scope: String,
        expires: u64,
        bind_channel: bool,
    ) -> Self {
        Self::assemble(
            id,
            AccessKind::RegularToken,
            buses,
            scope,
            Some(expires),
            bind_channel,
        )
    }

    /// A long-lived token; expiry is optional
    pub fn privileged_token(
        id: String,
        buses: Vec<String>,
        scope: String,
        expires: Option<u64>,
    ) -> Self {
        Self::assemble(id, AccessKind::PrivilegedToken, buses, scope, expires, false)
    }

    /// A single-use authorization code
    pub fn code(id: String, buses: Vec<String>, scope: String, expires: u64) -> Self {
        Self::assemble(id, AccessKind::Code, buses, scope, Some(expires), false)
    }

    fn assemble(
        id: String,
        kind: AccessKind,
        buses: Vec<String>,
        scope: String,
        expires: Option<u64>,
        bind_channel: bool,
    ) -> Self {
        let mut scope = scope;
        let channel = if bind_channel {
            let channel = crypto::random_string(CHANNEL_NAME_LENGTH);
            if scope.is_empty() {
                scope = format!("{}:{}", KEY_CHANNEL, channel);
            } else {
                scope = format!("{} {}:{}", scope, KEY_CHANNEL, channel);
            }
            Some(channel)
        } else {
            None
        };

        Self {
            id,
            kind,
            buses,
            scope,
            expires,
            channel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> AccessKind {
        self.kind
    }

    pub fn buses(&self) -> &[String] {
        &self.buses
    }

    pub fn scope_string(&self) -> &str {
        &self.scope
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn expires(&self) -> Option<u64> {
        self.expires
    }

    /// True iff an expiry is set and `now` is strictly past it
    ///
    /// `now == expires` is not expired.
    pub fn is_expired(&self, now: u64) -> bool {
        match self.expires {
            Some(expires) => now > expires,
            None => false,
        }
    }

    pub fn is_allowed_bus(&self, bus: &str) -> bool {
        self.buses.iter().any(|b| b == bus)
    }

    pub fn is_allowed_buses<S: AsRef<str>>(&self, buses: &[S]) -> bool {
        buses.iter().all(|b| self.is_allowed_bus(b.as_ref()))
    }

    /// Authorized buses as `"bus:thisbus.com bus:andthatbus.com"`
    pub fn encoded_buses(&self) -> String {
        Scope::encode_buses(self.buses.iter().map(String::as_str))
    }

    /// Replace the scope wholesale (trimmed, not merged)
    ///
    /// Callers must have validated the new scope with [`Scope::parse`]
    /// beforehand; no re-validation happens here.
    pub fn set_scope(&mut self, scope: &str) {
        let scope = scope.trim();
        debug!(access_id = %self.id, scope = %scope, "replacing scope");
        self.scope = scope.to_string();
    }
}

/// Owns the credential lifecycle against an injected store
pub struct AccessManager {
    store: Arc<dyn CredentialStore>,
}

impl AccessManager {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Create and persist a credential with a generated id
    pub async fn create(
        &self,
        kind: AccessKind,
        buses: Vec<String>,
        scope: String,
        expires: Option<u64>,
        bind_channel: bool,
    ) -> Result<Access, AccessError> {
        let id = crypto::random_string(TOKEN_ID_LENGTH);
        let access = Access::new(id, kind, buses, scope, expires, bind_channel)?;
        self.store.put_access(&access).await?;
        debug!(access_id = %access.id, kind = %access.kind, "created access record");
        Ok(access)
    }

    /// Load a credential, treating an expired record as absent
    pub async fn get_active(&self, id: &str) -> Result<Option<Access>, AccessError> {
        match self.store.get_access(id).await? {
            Some(access) if access.is_expired(now_epoch_secs()) => {
                debug!(access_id = %id, "access record expired");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Persist a scope replacement
    pub async fn set_scope(&self, access: &mut Access, scope: &str) -> Result<(), AccessError> {
        access.set_scope(scope);
        self.store.put_access(access).await?;
        Ok(())
    }

    /// Delete a credential; returns whether a record was removed
    pub async fn revoke(&self, id: &str) -> Result<bool, AccessError> {
        Ok(self.store.delete_access(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buses(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_regular_token_requires_expiry() {
        let result = Access::new(
            "t1".to_string(),
            AccessKind::RegularToken,
            vec![],
            String::new(),
            None,
            false,
        );
        assert!(matches!(
            result,
            Err(AccessError::MissingExpiry(AccessKind::RegularToken))
        ));
    }

    #[test]
    fn test_code_requires_expiry() {
        let result = Access::new(
            "c1".to_string(),
            AccessKind::Code,
            vec![],
            String::new(),
            None,
            false,
        );
        assert!(matches!(result, Err(AccessError::MissingExpiry(_))));
    }

    #[test]
    fn test_privileged_token_may_omit_expiry() {
        let access = Access::new(
            "p1".to_string(),
            AccessKind::PrivilegedToken,
            vec![],
            String::new(),
            None,
            false,
        )
        .unwrap();
        assert!(!access.is_expired(u64::MAX));
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let access = Access::new(
            "t1".to_string(),
            AccessKind::RegularToken,
            vec![],
            String::new(),
            Some(1000),
            false,
        )
        .unwrap();

        assert!(!access.is_expired(999));
        assert!(!access.is_expired(1000));
        assert!(access.is_expired(1001));
    }

    #[test]
    fn test_channel_binding_appends_scope_entry() {
        let access = Access::new(
            "t1".to_string(),
            AccessKind::RegularToken,
            vec![],
            "bus:a.com".to_string(),
            Some(1000),
            true,
        )
        .unwrap();

        let channel = access.channel().unwrap().to_string();
        assert_eq!(channel.len(), CHANNEL_NAME_LENGTH);
        assert_eq!(
            access.scope_string(),
            format!("bus:a.com channel:{}", channel)
        );
    }

    #[test]
    fn test_channel_binding_creates_scope_when_empty() {
        let access = Access::new(
            "t1".to_string(),
            AccessKind::RegularToken,
            vec![],
            String::new(),
            Some(1000),
            true,
        )
        .unwrap();

        let channel = access.channel().unwrap();
        assert_eq!(access.scope_string(), format!("channel:{}", channel));
    }

    #[test]
    fn test_bus_membership() {
        let access = Access::new(
            "t1".to_string(),
            AccessKind::RegularToken,
            buses(&["a.com", "b.com"]),
            String::new(),
            Some(1000),
            false,
        )
        .unwrap();

        assert!(access.is_allowed_bus("a.com"));
        assert!(!access.is_allowed_bus("c.com"));
        assert!(access.is_allowed_buses(&["a.com", "b.com"]));
        assert!(access.is_allowed_buses(&["b.com"]));
        assert!(!access.is_allowed_buses(&["a.com", "c.com"]));
    }

    #[test]
    fn test_encoded_buses() {
        let access = Access::new(
            "t1".to_string(),
            AccessKind::RegularToken,
            buses(&["thisbus.com", "andthatbus.com"]),
            String::new(),
            Some(1000),
            false,
        )
        .unwrap();

        assert_eq!(
            access.encoded_buses(),
            "bus:thisbus.com bus:andthatbus.com"
        );
    }

    #[test]
    fn test_set_scope_trims_and_replaces() {
        let mut access = Access::new(
            "t1".to_string(),
            AccessKind::RegularToken,
            vec![],
            "bus:old.com".to_string(),
            Some(1000),
            false,
        )
        .unwrap();

        access.set_scope("  bus:new.com channel:xyz  ");
        assert_eq!(access.scope_string(), "bus:new.com channel:xyz");
    }

    #[tokio::test]
    async fn test_manager_lazy_expiration() {
        use crate::storage::MemoryStore;

        let store = Arc::new(MemoryStore::new());
        let manager = AccessManager::new(store.clone());

        let live = manager
            .create(
                AccessKind::RegularToken,
                vec![],
                String::new(),
                Some(now_epoch_secs() + 60),
                false,
            )
            .await
            .unwrap();
        let dead = manager
            .create(
                AccessKind::RegularToken,
                vec![],
                String::new(),
                Some(now_epoch_secs() - 60),
                false,
            )
            .await
            .unwrap();

        assert!(manager.get_active(live.id()).await.unwrap().is_some());
        assert!(manager.get_active(dead.id()).await.unwrap().is_none());
        // The raw record is still in the store; only reads treat it as absent
        assert!(store.get_access(dead.id()).await.unwrap().is_some());
    }
}
