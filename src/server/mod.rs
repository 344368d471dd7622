//! HTTP surface
//!
//! Thin wire layer over the issuance and provisioning engines: the token
//! endpoint takes form-encoded OAuth parameters, the provisioning endpoints
//! take the JSON batch bodies, and all error rendering lives here.

use crate::issuance::{IssuanceError, IssuanceErrorKind, TokenIssuer, TokenRequest};
use crate::provision::{BusConfigEntry, ClientConfig, ProvisionError, Provisioner, UserConfig};
use crate::storage::CredentialStore;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<TokenIssuer>,
    pub provisioner: Arc<Provisioner>,
}

impl AppState {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            issuer: Arc::new(TokenIssuer::new(store.clone())),
            provisioner: Arc::new(Provisioner::new(store)),
        }
    }
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/token", post(token_handler))
        .route("/provision/user/update", post(user_update))
        .route("/provision/user/list", post(user_list))
        .route("/provision/user/delete", post(user_delete))
        .route("/provision/client/update", post(client_update))
        .route("/provision/client/list", post(client_list))
        .route("/provision/client/delete", post(client_delete))
        .route("/provision/bus/update", post(bus_update))
        .route("/provision/bus/list", post(bus_list))
        .route("/provision/bus/delete", post(bus_delete))
        .route("/provision/grant/add", post(grant_add))
        .route("/provision/grant/revoke", post(grant_revoke))
        .route("/provision/grant/list", post(grant_list))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(bind_addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "busgate server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn token_handler(
    State(state): State<AppState>,
    Form(request): Form<TokenRequest>,
) -> Response {
    match state.issuer.token(&request).await {
        Ok(token) => (StatusCode::OK, Json(token)).into_response(),
        Err(err) => issuance_error_response(err),
    }
}

/// OAuth-style error payload with the appropriate 4xx/5xx status
fn issuance_error_response(err: IssuanceError) -> Response {
    let status = match err.kind {
        IssuanceErrorKind::InvalidClient => StatusCode::UNAUTHORIZED,
        IssuanceErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };

    debug!(error = %err, "token request rejected");

    #[derive(Serialize)]
    struct ErrorBody {
        error: &'static str,
        error_description: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<String>,
    }

    (
        status,
        Json(ErrorBody {
            error: err.kind.code(),
            error_description: err.detail,
            state: err.state,
        }),
    )
        .into_response()
}

// - Provisioning bodies

#[derive(Deserialize)]
struct ConfigsBody<T> {
    admin: String,
    secret: String,
    #[serde(default = "Vec::new")]
    configs: Vec<T>,
}

#[derive(Deserialize)]
struct EntitiesBody {
    admin: String,
    secret: String,
    #[serde(default)]
    entities: Vec<String>,
}

#[derive(Deserialize)]
struct GrantsBody {
    admin: String,
    secret: String,
    #[serde(default)]
    grants: BTreeMap<String, String>,
}

fn provision_response<T: Serialize>(result: Result<T, ProvisionError>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(ProvisionError::AuthenticationFailed) => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "authentication failed" })),
        )
            .into_response(),
        Err(ProvisionError::Storage(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn user_update(
    State(state): State<AppState>,
    Json(body): Json<ConfigsBody<UserConfig>>,
) -> Response {
    provision_response(
        state
            .provisioner
            .user_update(&body.admin, &body.secret, &body.configs)
            .await,
    )
}

async fn user_list(State(state): State<AppState>, Json(body): Json<EntitiesBody>) -> Response {
    provision_response(
        state
            .provisioner
            .user_list(&body.admin, &body.secret, &body.entities)
            .await,
    )
}

async fn user_delete(State(state): State<AppState>, Json(body): Json<EntitiesBody>) -> Response {
    provision_response(
        state
            .provisioner
            .user_delete(&body.admin, &body.secret, &body.entities)
            .await,
    )
}

async fn client_update(
    State(state): State<AppState>,
    Json(body): Json<ConfigsBody<ClientConfig>>,
) -> Response {
    provision_response(
        state
            .provisioner
            .client_update(&body.admin, &body.secret, &body.configs)
            .await,
    )
}

async fn client_list(State(state): State<AppState>, Json(body): Json<EntitiesBody>) -> Response {
    provision_response(
        state
            .provisioner
            .client_list(&body.admin, &body.secret, &body.entities)
            .await,
    )
}

async fn client_delete(State(state): State<AppState>, Json(body): Json<EntitiesBody>) -> Response {
    provision_response(
        state
            .provisioner
            .client_delete(&body.admin, &body.secret, &body.entities)
            .await,
    )
}

async fn bus_update(
    State(state): State<AppState>,
    Json(body): Json<ConfigsBody<BusConfigEntry>>,
) -> Response {
    provision_response(
        state
            .provisioner
            .bus_update(&body.admin, &body.secret, &body.configs)
            .await,
    )
}

async fn bus_list(State(state): State<AppState>, Json(body): Json<EntitiesBody>) -> Response {
    provision_response(
        state
            .provisioner
            .bus_list(&body.admin, &body.secret, &body.entities)
            .await,
    )
}

async fn bus_delete(State(state): State<AppState>, Json(body): Json<EntitiesBody>) -> Response {
    provision_response(
        state
            .provisioner
            .bus_delete(&body.admin, &body.secret, &body.entities)
            .await,
    )
}

async fn grant_add(State(state): State<AppState>, Json(body): Json<GrantsBody>) -> Response {
    provision_response(
        state
            .provisioner
            .grant_add(&body.admin, &body.secret, &body.grants)
            .await,
    )
}

async fn grant_revoke(State(state): State<AppState>, Json(body): Json<GrantsBody>) -> Response {
    provision_response(
        state
            .provisioner
            .grant_revoke(&body.admin, &body.secret, &body.grants)
            .await,
    )
}

async fn grant_list(State(state): State<AppState>, Json(body): Json<EntitiesBody>) -> Response {
    provision_response(
        state
            .provisioner
            .grant_list(&body.admin, &body.secret, &body.entities)
            .await,
    )
}
