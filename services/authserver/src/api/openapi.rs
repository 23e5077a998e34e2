//! OpenAPI schema aggregation.
//!
//! # Purpose
//! Collects the first-party, admin, discovery and system routes with their
//! payload types into one document served at `/v2/openapi.json`.
use crate::api::admin::{clients, keys, rbac, scopes, session, tenants, users};
use crate::api::{
    auth, system,
    types::{
        AdminLoginRequest, AdminRefreshRequest, AdminTokenResponse, ClaimListResponse,
        ClientListResponse, ClientResponse, ClientUpsertRequest, ClusterReadiness,
        ClusterStatusResponse, ConsentListResponse, CsrfResponse, DisableUserRequest,
        ErrorResponse, HealthStatus, KeyInfo, KeyListResponse, LoginRequest, LogoutRequest,
        RaftIndexes, ReadyStatus, RefreshRequest, RevokeSessionsRequest, RevokeTokensRequest,
        RevokedCount, RoleEntry, RoleListResponse, RolePermissionsRequest, RotateKeyResponse,
        ScopeListResponse, SessionLoginRequest, SessionLoginResponse, TenantCreateRequest,
        TenantListResponse, TenantUpdateRequest, UserCreateRequest, UserListResponse,
        UserRolesRequest, UserRolesResponse, UserStoreRequest,
    },
};
use crate::data::{ConsentRecord, User};
use crate::model::{
    ClaimDefinition, ClaimSource, ClaimType, Client, ClientType, Scope, Tenant, TenantSettings,
    UserFieldDefinition, UserStoreSettings,
};
use crate::oauth::TokenResponse;
use crate::oauth::discovery::{self, ProviderMetadata};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "hellojohn",
        version = "v2",
        description = "Multi-tenant OAuth 2.1 / OpenID Connect server"
    ),
    paths(
        system::healthz,
        system::readyz,
        system::cluster_status,
        discovery::global_discovery,
        discovery::tenant_discovery,
        auth::login,
        auth::refresh,
        auth::logout,
        auth::csrf,
        auth::session_login,
        auth::session_logout,
        session::admin_login,
        session::admin_refresh,
        tenants::list_tenants,
        tenants::create_tenant,
        tenants::get_tenant,
        tenants::put_tenant,
        tenants::delete_tenant,
        clients::list_clients,
        clients::get_client,
        clients::put_client,
        clients::delete_client,
        scopes::list_scopes,
        scopes::get_scope,
        scopes::put_scope,
        scopes::delete_scope,
        scopes::list_claims,
        scopes::get_claim,
        scopes::put_claim,
        scopes::delete_claim,
        rbac::list_roles,
        rbac::put_role,
        rbac::delete_role,
        rbac::get_user_roles,
        rbac::put_user_roles,
        keys::list_keys,
        keys::rotate_keys,
        keys::revoke_key,
        users::list_consents,
        users::revoke_consent,
        users::list_users,
        users::create_user,
        users::get_user,
        users::delete_user,
        users::disable_user,
        users::revoke_tokens,
        users::revoke_sessions
    ),
    components(schemas(
        ErrorResponse,
        HealthStatus,
        RaftIndexes,
        ClusterReadiness,
        ReadyStatus,
        ClusterStatusResponse,
        ProviderMetadata,
        TokenResponse,
        LoginRequest,
        RefreshRequest,
        LogoutRequest,
        CsrfResponse,
        SessionLoginRequest,
        SessionLoginResponse,
        AdminLoginRequest,
        AdminRefreshRequest,
        AdminTokenResponse,
        Tenant,
        TenantSettings,
        UserStoreSettings,
        UserFieldDefinition,
        TenantCreateRequest,
        TenantUpdateRequest,
        UserStoreRequest,
        TenantListResponse,
        Client,
        ClientType,
        ClientUpsertRequest,
        ClientResponse,
        ClientListResponse,
        Scope,
        ScopeListResponse,
        ClaimDefinition,
        ClaimSource,
        ClaimType,
        ClaimListResponse,
        RoleEntry,
        RoleListResponse,
        RolePermissionsRequest,
        UserRolesRequest,
        UserRolesResponse,
        KeyInfo,
        KeyListResponse,
        RotateKeyResponse,
        ConsentRecord,
        ConsentListResponse,
        User,
        UserCreateRequest,
        UserListResponse,
        DisableUserRequest,
        RevokeTokensRequest,
        RevokeSessionsRequest,
        RevokedCount
    )),
    tags(
        (name = "system", description = "Health, readiness and cluster status"),
        (name = "oidc", description = "OpenID Connect discovery"),
        (name = "auth", description = "First-party login, sessions and CSRF"),
        (name = "admin", description = "Tenant administration")
    )
)]
pub struct ApiDoc;
