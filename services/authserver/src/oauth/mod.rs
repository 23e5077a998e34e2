//! OAuth 2.1 / OpenID Connect endpoints.
//!
//! # Purpose
//! The authorization endpoint and consent pipeline, the token endpoint with
//! its three grants, introspection, revocation, userinfo, discovery and
//! JWKS. Errors on these routes use the RFC 6749 JSON shape
//! ([`OAuthError`]), never the admin `ApiError` shape, except where the
//! tenant itself cannot be resolved.
pub mod authorize;
pub mod client_auth;
pub mod discovery;
pub mod error;
pub mod grants;
pub mod introspect;
pub mod tokens;
pub mod userinfo;

pub use error::OAuthError;
pub use grants::{Grant, rotate_refresh};
pub use introspect::{Introspection, revoke_refresh};
pub use tokens::{TokenResponse, UserGrant, issue_user_tokens};
