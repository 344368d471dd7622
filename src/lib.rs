//! busgate - authorization core for a cross-domain publish/subscribe bus
//!
//! Issues, validates, and revokes the credentials (authorization codes,
//! access tokens, and client-to-bus grants) that gate who may publish or
//! subscribe on a named bus, and stores per-bus retention policy.

pub mod auth;
pub mod crypto;
pub mod issuance;
pub mod provision;
pub mod registry;
pub mod scope;
pub mod server;
pub mod storage;

pub use auth::{Access, AccessKind, AccessManager, GrantManager, GrantTokenRel};
pub use issuance::{TokenIssuer, TokenRequest, TokenResponse};
pub use provision::Provisioner;
pub use scope::Scope;
pub use server::AppState;
