//! Token and key primitives for the hellojohn authorization server.
//!
//! # Purpose
//! Owns the per-tenant signing-key model (generation, rotation with a grace
//! window, resolution by `kid`, JWKS export), issuer resolution, and the
//! EdDSA token codec used for access and ID tokens. Role-to-permission
//! expansion for the RBAC claim also lives here.
//!
//! # How it fits
//! The service keeps key sets in its replicated control-plane store and
//! exposes them through a [`TenantKeyStore`] implementation. [`TokenIssuer`]
//! and [`TokenVerifier`] sit on top of that trait and never touch storage.
//!
//! # Key invariants
//! - Tokens are EdDSA/Ed25519 only; any other `alg` is rejected before key
//!   lookup.
//! - At most one key per tenant is `active`; `retiring` keys verify but never
//!   sign, and lapse deterministically at their retirement timestamp.
//! - `iss` is recomputed from the token's `tid` and the tenant's settings on
//!   every verification.
//!
//! # Examples
//! ```rust
//! use hellojohn_authz::{IssuerMode, IssuerSettings, resolve_issuer};
//!
//! let settings = IssuerSettings { mode: IssuerMode::Path, issuer_override: None };
//! assert_eq!(
//!     resolve_issuer("https://auth.example.com", &settings, "acme"),
//!     "https://auth.example.com/t/acme"
//! );
//! ```
mod cache;
mod casbin_model;
mod claims;
mod errors;
mod issuer;
mod jwks;
mod keys;
mod rbac;
mod token;
mod types;

pub use cache::{KEY_CACHE_TTL, KeyMaterialCache, MAX_KEY_CACHE_TTL};
pub use casbin_model::{casbin_model, casbin_model_string};
pub use claims::{
    ACR_LOA_1, ACR_LOA_2, ADMIN_CLAIM, SYS_CLAIM, TokenClaims, TokenUse, acr_for_amr,
    now_epoch_seconds,
};
pub use errors::{AuthzError, AuthzResult};
pub use issuer::{IssuerMode, IssuerSettings, resolve_issuer};
pub use jwks::{Jwk, Jwks, KeyUse};
pub use keys::{
    KeyStatus, SigningKeyRecord, TenantKeySet, generate_signing_key, signing_material,
    verification_material,
};
pub use rbac::{RolePermission, effective_permissions};
pub use token::{
    TenantKeyStore, TenantSigningKey, TenantVerificationKey, TokenIssuer, TokenVerifier,
    peek_tenant,
};
pub use types::TenantId;
