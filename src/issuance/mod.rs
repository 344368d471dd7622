//! Token issuance flows
//!
//! Two OAuth2-style grant types produce access tokens:
//! - `client_credentials`: direct issuance, anonymous or secret-checked
//! - `code`: exchange of a single-use authorization code
//!
//! Codes themselves are minted by [`TokenIssuer::grant_code`] under a
//! client's bus grant set.

use crate::auth::{
    now_epoch_secs, Access, AccessError, AccessKind, AccessManager, GrantError, GrantManager,
    CODE_EXPIRES_SECONDS, TOKEN_EXPIRES_SECONDS,
};
use crate::crypto;
use crate::scope::Scope;
use crate::storage::{CredentialStore, StorageError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// The well-known anonymous client id
pub const ANONYMOUS_CLIENT: &str = "anonymous";

pub const GRANT_TYPE_CLIENT_CREDENTIALS: &str = "client_credentials";
pub const GRANT_TYPE_CODE: &str = "code";

const TOKEN_TYPE_BEARER: &str = "Bearer";

/// OAuth2-style error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceErrorKind {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnsupportedGrantType,
    InvalidScope,
    /// Backing-store failure; never folded into an authorization decision
    Storage,
}

impl IssuanceErrorKind {
    /// Wire error code
    pub fn code(&self) -> &'static str {
        match self {
            IssuanceErrorKind::InvalidRequest => "invalid_request",
            IssuanceErrorKind::InvalidClient => "invalid_client",
            IssuanceErrorKind::InvalidGrant => "invalid_grant",
            IssuanceErrorKind::UnsupportedGrantType => "unsupported_grant_type",
            IssuanceErrorKind::InvalidScope => "invalid_scope",
            IssuanceErrorKind::Storage => "storage_error",
        }
    }
}

/// A single structured issuance error: kind, detail, and the optional
/// redirect context of the failing request, captured once at the point of
/// failure
#[derive(Debug, Error)]
#[error("{}: {}", .kind.code(), .detail)]
pub struct IssuanceError {
    pub kind: IssuanceErrorKind,
    pub detail: String,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
}

impl IssuanceError {
    fn new(kind: IssuanceErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            redirect_uri: None,
            state: None,
        }
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(IssuanceErrorKind::InvalidRequest, detail)
    }

    pub fn invalid_client(detail: impl Into<String>) -> Self {
        Self::new(IssuanceErrorKind::InvalidClient, detail)
    }

    pub fn invalid_grant(detail: impl Into<String>) -> Self {
        Self::new(IssuanceErrorKind::InvalidGrant, detail)
    }

    pub fn unsupported_grant_type(detail: impl Into<String>) -> Self {
        Self::new(IssuanceErrorKind::UnsupportedGrantType, detail)
    }

    pub fn invalid_scope(detail: impl Into<String>) -> Self {
        Self::new(IssuanceErrorKind::InvalidScope, detail)
    }

    /// Attach the request's redirect context
    pub fn with_redirect(mut self, redirect_uri: Option<&str>, state: Option<&str>) -> Self {
        self.redirect_uri = redirect_uri.map(str::to_string);
        self.state = state.map(str::to_string);
        self
    }
}

impl From<StorageError> for IssuanceError {
    fn from(err: StorageError) -> Self {
        Self::new(IssuanceErrorKind::Storage, err.to_string())
    }
}

impl From<AccessError> for IssuanceError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Storage(e) => e.into(),
            other => Self::invalid_request(other.to_string()),
        }
    }
}

impl From<GrantError> for IssuanceError {
    fn from(err: GrantError) -> Self {
        match err {
            GrantError::InvalidClient(id) => Self::invalid_client(format!("Invalid client: {}", id)),
            GrantError::InvalidBus(bus) => Self::invalid_scope(format!("Invalid bus: {}", bus)),
            GrantError::Storage(e) => e.into(),
        }
    }
}

/// A parsed `/token` request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub client_id: Option<String>,
    pub grant_type: Option<String>,
    pub client_secret: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
}

/// A successful `/token` response
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl TokenResponse {
    fn from_access(access: &Access) -> Self {
        Self {
            access_token: access.id().to_string(),
            token_type: TOKEN_TYPE_BEARER.to_string(),
            expires_in: TOKEN_EXPIRES_SECONDS,
            scope: Some(access.scope_string().to_string()),
            channel: access.channel().map(str::to_string),
        }
    }
}

/// Implements the issuance protocols against the injected store
pub struct TokenIssuer {
    store: Arc<dyn CredentialStore>,
    access: AccessManager,
    grants: GrantManager,
}

impl TokenIssuer {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            access: AccessManager::new(store.clone()),
            grants: GrantManager::new(store.clone()),
            store,
        }
    }

    /// Handle a `/token` request
    ///
    /// Required-field checks happen before any store access; errors from the
    /// code path carry the request's redirect context.
    pub async fn token(&self, request: &TokenRequest) -> Result<TokenResponse, IssuanceError> {
        let attach = |err: IssuanceError| {
            err.with_redirect(request.redirect_uri.as_deref(), request.state.as_deref())
        };

        let client_id = non_empty(&request.client_id)
            .ok_or_else(|| attach(IssuanceError::invalid_request("missing client_id parameter")))?;
        let grant_type = non_empty(&request.grant_type)
            .ok_or_else(|| attach(IssuanceError::invalid_request("missing grant_type parameter")))?;

        match grant_type {
            GRANT_TYPE_CLIENT_CREDENTIALS => {
                // The parameter must be present, though it may be empty
                let secret = request.client_secret.as_deref().ok_or_else(|| {
                    attach(IssuanceError::invalid_request(
                        "missing client_secret parameter",
                    ))
                })?;
                self.client_credentials(client_id, secret, request.scope.as_deref())
                    .await
                    .map_err(attach)
            }
            GRANT_TYPE_CODE => {
                let code = non_empty(&request.code).ok_or_else(|| {
                    attach(IssuanceError::invalid_request("missing code parameter"))
                })?;
                let redirect_uri = non_empty(&request.redirect_uri).ok_or_else(|| {
                    attach(IssuanceError::invalid_request(
                        "missing redirect_uri parameter",
                    ))
                })?;
                let secret = request.client_secret.as_deref().unwrap_or("");
                self.exchange_code(code, client_id, secret, redirect_uri)
                    .await
                    .map_err(attach)
            }
            other => Err(attach(IssuanceError::unsupported_grant_type(format!(
                "unsupported grant_type: {}",
                other
            )))),
        }
    }

    /// Direct issuance: `grant_type=client_credentials`
    async fn client_credentials(
        &self,
        client_id: &str,
        secret: &str,
        scope: Option<&str>,
    ) -> Result<TokenResponse, IssuanceError> {
        if client_id == ANONYMOUS_CLIENT {
            if !secret.is_empty() {
                return Err(IssuanceError::invalid_client(
                    "the anonymous client must present an empty secret",
                ));
            }
        } else {
            let client = self
                .store
                .get_client(client_id)
                .await?
                .ok_or_else(|| IssuanceError::invalid_client("unknown client"))?;
            if !crypto::verify_secret(secret, &client.pwd_hash) {
                return Err(IssuanceError::invalid_client("client secret mismatch"));
            }
        }

        let supplied = scope.unwrap_or("").trim();
        let parsed = Scope::parse(supplied)
            .map_err(|e| IssuanceError::invalid_scope(e.to_string()))?;
        if parsed.has_bus() || parsed.has_payload() {
            return Err(IssuanceError::invalid_scope(
                "bus and payload scope entries are not allowed on client_credentials tokens",
            ));
        }

        let token = self
            .access
            .create(
                AccessKind::RegularToken,
                Vec::new(),
                parsed.to_string(),
                Some(now_epoch_secs() + TOKEN_EXPIRES_SECONDS),
                true,
            )
            .await?;

        info!(client_id = %client_id, token_id = %token.id(), "issued client_credentials token");
        Ok(TokenResponse::from_access(&token))
    }

    /// Code exchange: `grant_type=code`
    ///
    /// An absent, expired, wrong-kind, or concurrently consumed code all
    /// fail identically, so callers cannot probe for code existence.
    async fn exchange_code(
        &self,
        code_id: &str,
        client_id: &str,
        secret: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, IssuanceError> {
        let invalid_code = || IssuanceError::invalid_grant("invalid code");

        let code = self
            .store
            .get_access(code_id)
            .await?
            .filter(|c| c.kind() == AccessKind::Code)
            .filter(|c| !c.is_expired(now_epoch_secs()))
            .ok_or_else(invalid_code)?;

        let client = self
            .store
            .get_client(client_id)
            .await?
            .ok_or_else(|| IssuanceError::invalid_client("unknown client"))?;
        if !crypto::verify_secret(secret, &client.pwd_hash) {
            return Err(IssuanceError::invalid_client("client secret mismatch"));
        }

        if client.redirect_uri.is_empty() || client.redirect_uri != redirect_uri {
            return Err(IssuanceError::invalid_grant("redirect_uri mismatch"));
        }

        // Consume the code. The delete is the atomicity point: of two
        // concurrent exchanges exactly one observes the deleted row.
        if !self.store.delete_access(code_id).await? {
            debug!(code_id = %code_id, "code already consumed");
            return Err(invalid_code());
        }

        let token = self
            .access
            .create(
                AccessKind::RegularToken,
                code.buses().to_vec(),
                code.encoded_buses(),
                Some(now_epoch_secs() + TOKEN_EXPIRES_SECONDS),
                true,
            )
            .await?;

        self.grants.record_issuance(client_id, token.id()).await?;

        info!(
            client_id = %client_id,
            token_id = %token.id(),
            buses = %token.encoded_buses(),
            "exchanged code for token"
        );
        Ok(TokenResponse::from_access(&token))
    }

    /// Mint a single-use authorization code for a client, scoped to buses
    /// the client's grant set already covers
    pub async fn grant_code(
        &self,
        client_id: &str,
        buses: &[String],
    ) -> Result<Access, IssuanceError> {
        if self.store.get_client(client_id).await?.is_none() {
            return Err(IssuanceError::invalid_client("unknown client"));
        }

        let granted = self.grants.granted_buses(client_id).await?;
        for bus in buses {
            if !granted.contains(bus) {
                return Err(IssuanceError::invalid_scope(format!(
                    "bus not in the client's authorized set: {}",
                    bus
                )));
            }
        }

        let code = self
            .access
            .create(
                AccessKind::Code,
                buses.to_vec(),
                Scope::encode_buses(buses.iter().map(String::as_str)),
                Some(now_epoch_secs() + CODE_EXPIRES_SECONDS),
                false,
            )
            .await?;

        self.grants.record_issuance(client_id, code.id()).await?;

        info!(client_id = %client_id, code_id = %code.id(), "issued authorization code");
        Ok(code)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}
