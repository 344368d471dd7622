//! Credential model and grant bookkeeping
//!
//! Credential kinds:
//! - `regular_token`: expiring bearer token for publish/subscribe
//! - `privileged_token`: long-lived token, may omit expiry
//! - `code`: short-lived single-use credential, exchanged for a token
//!
//! Grant relations (`GrantTokenRel`) record which authorization act issued
//! which credential; the union of a client's active relations is its
//! client-to-bus grant set.

mod access;
mod grants;

pub use access::{
    now_epoch_secs, Access, AccessError, AccessKind, AccessManager, CHANNEL_NAME_LENGTH,
    CODE_EXPIRES_SECONDS, TOKEN_EXPIRES_SECONDS, TOKEN_ID_LENGTH,
};
pub use grants::{GrantError, GrantManager, GrantTokenRel};
