//! HTTP API request/response types.
//!
//! # Purpose
//! Payload shapes for the session, admin and system endpoints and the
//! OpenAPI document. OAuth endpoints keep their own RFC-defined shapes in
//! `crate::oauth`.
use crate::data::{ConsentRecord, User};
use crate::model::{Client, ClientType, TenantSettings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RaftIndexes {
    pub commit_index: u64,
    pub last_log_index: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ClusterReadiness {
    pub role: String,
    pub leader_id: Option<u64>,
    pub raft: RaftIndexes,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ReadyStatus {
    pub cluster: ClusterReadiness,
    pub fs_degraded: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ClusterStatusResponse {
    pub node_id: u64,
    pub cluster: ClusterReadiness,
    pub term: u64,
    pub last_applied: u64,
    pub members: BTreeMap<u64, String>,
    pub fs_degraded: bool,
}

// Password login family.

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct LoginRequest {
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub client_id: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RefreshRequest {
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub client_id: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SessionLoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SessionLoginResponse {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct CsrfResponse {
    pub csrf_token: String,
}

// Admin authentication.

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct AdminLoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct AdminRefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct AdminTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
}

// Tenants.

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct TenantCreateRequest {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub settings: Option<TenantSettings>,
    /// Plain DSN for the tenant user store; sealed before it is replicated.
    #[serde(default)]
    pub user_store: Option<UserStoreRequest>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct TenantUpdateRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub settings: Option<TenantSettings>,
    #[serde(default)]
    pub user_store: Option<UserStoreRequest>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserStoreRequest {
    pub driver: String,
    pub dsn: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct TenantListResponse {
    pub items: Vec<crate::model::Tenant>,
}

// Clients, scopes and claims.

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ClientUpsertRequest {
    pub name: String,
    pub client_type: ClientType,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// New secret for a confidential client. Generated when omitted on create.
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub access_ttl_seconds: Option<i64>,
    #[serde(default)]
    pub refresh_ttl_seconds: Option<i64>,
    #[serde(default)]
    pub id_ttl_seconds: Option<i64>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// A client as the admin API renders it. `client_secret` appears only in
/// the response that set it.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ClientResponse {
    #[serde(flatten)]
    pub client: Client,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ClientListResponse {
    pub items: Vec<Client>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ScopeListResponse {
    pub items: Vec<crate::model::Scope>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ClaimListResponse {
    pub items: Vec<crate::model::ClaimDefinition>,
}

// RBAC.

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RolePermissionsRequest {
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct RoleEntry {
    pub role: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleListResponse {
    pub items: Vec<RoleEntry>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserRolesRequest {
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserRolesResponse {
    pub user_id: Uuid,
    pub roles: Vec<String>,
}

// Keys.

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct KeyInfo {
    pub kid: String,
    pub alg: String,
    pub status: String,
    pub created_at: i64,
    pub activated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retired_at: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct KeyListResponse {
    pub items: Vec<KeyInfo>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RotateKeyResponse {
    pub kid: String,
    pub grace_seconds: i64,
}

// Tenant data.

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ConsentListResponse {
    pub items: Vec<ConsentRecord>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserCreateRequest {
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub custom_fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserListResponse {
    pub items: Vec<User>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct DisableUserRequest {
    /// `null` re-enables the user.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Default)]
pub struct RevokeTokensRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RevokeSessionsRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct RevokedCount {
    pub revoked: usize,
}

