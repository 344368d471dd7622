//! Integration tests for the token issuance flows
//!
//! These run the issuer end-to-end against the in-memory store, including
//! the single-use guarantee under concurrent exchange attempts.

use busgate::auth::{now_epoch_secs, Access, AccessKind, GrantManager};
use busgate::crypto;
use busgate::issuance::{IssuanceErrorKind, TokenIssuer, TokenRequest, ANONYMOUS_CLIENT};
use busgate::registry::{BusConfig, Client, User};
use busgate::storage::{CredentialStore, MemoryStore};
use std::sync::Arc;

const CLIENT_ID: &str = "app1";
const CLIENT_SECRET: &str = "app1-secret";
const REDIRECT_URI: &str = "http://redirect.com";

async fn setup_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());

    store
        .put_user(&User::new("busowner1", crypto::hash_secret("owner-pw")))
        .await
        .unwrap();
    for bus in ["customer1.com", "customer2.com"] {
        store
            .put_bus_config(&BusConfig::new(bus, "busowner1", 600, 28800))
            .await
            .unwrap();
    }
    store
        .put_client(&Client::new(
            CLIENT_ID,
            crypto::hash_secret(CLIENT_SECRET),
            "http://source.com",
            REDIRECT_URI,
        ))
        .await
        .unwrap();

    store
}

fn client_credentials_request(client_id: &str, secret: &str) -> TokenRequest {
    TokenRequest {
        client_id: Some(client_id.to_string()),
        grant_type: Some("client_credentials".to_string()),
        client_secret: Some(secret.to_string()),
        ..Default::default()
    }
}

fn code_request(code: &str, secret: &str, redirect_uri: &str) -> TokenRequest {
    TokenRequest {
        client_id: Some(CLIENT_ID.to_string()),
        grant_type: Some("code".to_string()),
        client_secret: Some(secret.to_string()),
        code: Some(code.to_string()),
        redirect_uri: Some(redirect_uri.to_string()),
        ..Default::default()
    }
}

/// Grant the test client a bus and mint a code for it
async fn granted_code(store: &Arc<MemoryStore>, issuer: &TokenIssuer, buses: &[&str]) -> Access {
    let grants = GrantManager::new(store.clone() as Arc<dyn CredentialStore>);
    let buses: Vec<String> = buses.iter().map(|s| s.to_string()).collect();
    grants.add_grants(CLIENT_ID, &buses).await.unwrap();
    issuer.grant_code(CLIENT_ID, &buses).await.unwrap()
}

#[tokio::test]
async fn test_anonymous_token_shape() {
    let store = setup_store().await;
    let issuer = TokenIssuer::new(store);

    let response = issuer
        .token(&client_credentials_request(ANONYMOUS_CLIENT, ""))
        .await
        .unwrap();

    assert!(response.access_token.len() >= 20);
    assert_eq!(response.token_type, "Bearer");
    assert_eq!(response.expires_in, 3600);

    let channel = response.channel.expect("anonymous tokens are channel-bound");
    assert_eq!(channel.len(), 32);
    assert_eq!(
        response.scope.as_deref(),
        Some(format!("channel:{}", channel).as_str())
    );
}

#[tokio::test]
async fn test_anonymous_with_secret_rejected() {
    let store = setup_store().await;
    let issuer = TokenIssuer::new(store);

    let err = issuer
        .token(&client_credentials_request(ANONYMOUS_CLIENT, "sneaky"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidClient);
}

#[tokio::test]
async fn test_provisioned_client_credentials() {
    let store = setup_store().await;
    let issuer = TokenIssuer::new(store.clone());

    let response = issuer
        .token(&client_credentials_request(CLIENT_ID, CLIENT_SECRET))
        .await
        .unwrap();

    // The token is persisted, channel-bound, with no bus authorization
    let token = store
        .get_access(&response.access_token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(token.kind(), AccessKind::RegularToken);
    assert!(token.buses().is_empty());
    assert!(token.channel().is_some());
}

#[tokio::test]
async fn test_client_secret_mismatch() {
    let store = setup_store().await;
    let issuer = TokenIssuer::new(store);

    let err = issuer
        .token(&client_credentials_request(CLIENT_ID, "wrong"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidClient);
}

#[tokio::test]
async fn test_unknown_client_rejected() {
    let store = setup_store().await;
    let issuer = TokenIssuer::new(store);

    let err = issuer
        .token(&client_credentials_request("ghost", "whatever"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidClient);
}

#[tokio::test]
async fn test_missing_required_fields_fail_fast() {
    let store = setup_store().await;
    let issuer = TokenIssuer::new(store);

    // No client_id
    let err = issuer
        .token(&TokenRequest {
            grant_type: Some("client_credentials".to_string()),
            client_secret: Some(String::new()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidRequest);

    // No grant_type
    let err = issuer
        .token(&TokenRequest {
            client_id: Some(ANONYMOUS_CLIENT.to_string()),
            client_secret: Some(String::new()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidRequest);

    // client_credentials without the client_secret parameter at all
    let err = issuer
        .token(&TokenRequest {
            client_id: Some(ANONYMOUS_CLIENT.to_string()),
            grant_type: Some("client_credentials".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidRequest);

    // code grant without code or redirect_uri
    let mut request = code_request("", CLIENT_SECRET, REDIRECT_URI);
    request.code = None;
    let err = issuer.token(&request).await.unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidRequest);

    let mut request = code_request("some-code", CLIENT_SECRET, "");
    request.redirect_uri = None;
    let err = issuer.token(&request).await.unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_unknown_grant_type() {
    let store = setup_store().await;
    let issuer = TokenIssuer::new(store);

    let err = issuer
        .token(&TokenRequest {
            client_id: Some(ANONYMOUS_CLIENT.to_string()),
            grant_type: Some("password".to_string()),
            client_secret: Some(String::new()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::UnsupportedGrantType);
}

#[tokio::test]
async fn test_client_supplied_scope_restrictions() {
    let store = setup_store().await;
    let issuer = TokenIssuer::new(store);

    let with_scope = |scope: &str| TokenRequest {
        scope: Some(scope.to_string()),
        ..client_credentials_request(ANONYMOUS_CLIENT, "")
    };

    // Malformed grammar
    let err = issuer
        .token(&with_scope("bus;mybus.com bus:yourbus.com"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidScope);

    // Bus entries are not client-grantable
    let err = issuer
        .token(&with_scope("bus:customer1.com"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidScope);

    // Payload entries are reserved for privileged tokens
    let err = issuer
        .token(&with_scope("payload.sticky:true"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidScope);

    // Unreserved entries are carried into the token alongside the channel
    let response = issuer.token(&with_scope("session:abc")).await.unwrap();
    let scope = response.scope.unwrap();
    assert!(scope.starts_with("session:abc channel:"));
}

#[tokio::test]
async fn test_code_exchange() {
    let store = setup_store().await;
    let issuer = TokenIssuer::new(store.clone());

    let code = granted_code(&store, &issuer, &["customer1.com"]).await;

    let response = issuer
        .token(&code_request(code.id(), CLIENT_SECRET, REDIRECT_URI))
        .await
        .unwrap();

    assert_eq!(response.expires_in, 3600);
    let channel = response.channel.expect("exchanged tokens are channel-bound");
    assert_eq!(channel.len(), 32);

    // The token carries the code's bus authorization
    let token = store
        .get_access(&response.access_token)
        .await
        .unwrap()
        .unwrap();
    assert!(token.is_allowed_bus("customer1.com"));
    assert!(!token.is_allowed_bus("customer2.com"));
    assert_eq!(
        response.scope.unwrap(),
        format!("bus:customer1.com channel:{}", channel)
    );
}

#[tokio::test]
async fn test_code_is_single_use() {
    let store = setup_store().await;
    let issuer = TokenIssuer::new(store.clone());

    let code = granted_code(&store, &issuer, &["customer1.com"]).await;
    let request = code_request(code.id(), CLIENT_SECRET, REDIRECT_URI);

    assert!(issuer.token(&request).await.is_ok());

    let err = issuer.token(&request).await.unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidGrant);
}

#[tokio::test]
async fn test_concurrent_exchange_single_winner() {
    let store = setup_store().await;
    let issuer = Arc::new(TokenIssuer::new(store.clone()));

    let code = granted_code(&store, &issuer, &["customer1.com"]).await;
    let request = code_request(code.id(), CLIENT_SECRET, REDIRECT_URI);

    let mut handles = vec![];
    for _ in 0..2 {
        let issuer = issuer.clone();
        let request = request.clone();
        handles.push(tokio::spawn(async move { issuer.token(&request).await }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(err) => assert_eq!(err.kind, IssuanceErrorKind::InvalidGrant),
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn test_redirect_uri_mismatch() {
    let store = setup_store().await;
    let issuer = TokenIssuer::new(store.clone());

    let code = granted_code(&store, &issuer, &["customer1.com"]).await;

    let err = issuer
        .token(&code_request(code.id(), CLIENT_SECRET, "http://evil.com"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidGrant);

    // The failed attempt did not consume the code
    assert!(issuer
        .token(&code_request(code.id(), CLIENT_SECRET, REDIRECT_URI))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_expired_code_indistinguishable_from_missing() {
    let store = setup_store().await;
    let issuer = TokenIssuer::new(store.clone());

    let expired = Access::code(
        "expired-code-000000".to_string(),
        vec!["customer1.com".to_string()],
        String::new(),
        now_epoch_secs() - 10,
    );
    store.put_access(&expired).await.unwrap();

    let expired_err = issuer
        .token(&code_request(expired.id(), CLIENT_SECRET, REDIRECT_URI))
        .await
        .unwrap_err();
    let missing_err = issuer
        .token(&code_request("never-existed", CLIENT_SECRET, REDIRECT_URI))
        .await
        .unwrap_err();

    assert_eq!(expired_err.kind, IssuanceErrorKind::InvalidGrant);
    assert_eq!(missing_err.kind, IssuanceErrorKind::InvalidGrant);
    assert_eq!(expired_err.detail, missing_err.detail);
}

#[tokio::test]
async fn test_code_requires_granted_bus() {
    let store = setup_store().await;
    let issuer = TokenIssuer::new(store.clone());

    let grants = GrantManager::new(store.clone() as Arc<dyn CredentialStore>);
    grants
        .add_grants(CLIENT_ID, &["customer1.com".to_string()])
        .await
        .unwrap();

    let err = issuer
        .grant_code(CLIENT_ID, &["customer2.com".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidScope);
}

#[tokio::test]
async fn test_errors_carry_redirect_context() {
    let store = setup_store().await;
    let issuer = TokenIssuer::new(store);

    let request = TokenRequest {
        client_id: Some(CLIENT_ID.to_string()),
        grant_type: Some("code".to_string()),
        redirect_uri: Some(REDIRECT_URI.to_string()),
        state: Some("xyzzy".to_string()),
        ..Default::default()
    };

    // Missing code parameter; the error keeps the request's redirect context
    let err = issuer.token(&request).await.unwrap_err();
    assert_eq!(err.kind, IssuanceErrorKind::InvalidRequest);
    assert_eq!(err.redirect_uri.as_deref(), Some(REDIRECT_URI));
    assert_eq!(err.state.as_deref(), Some("xyzzy"));
}
