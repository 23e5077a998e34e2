use super::tokens::user_claims;
use crate::api::error::{ApiError, api_unauthorized};
use crate::app::AppState;
use crate::middleware::{RequireAuth, tenant_db};
use axum::Json;
use axum::extract::State;
use axum::http::header::CACHE_CONTROL;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use uuid::Uuid;

/// `GET /userinfo`: claims for the bearer's subject, filtered by the token's
/// scopes.
pub async fn userinfo(
    State(state): State<AppState>,
    RequireAuth(claims): RequireAuth,
) -> Result<Response, ApiError> {
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| api_unauthorized("token subject is not a user"))?;
    let db = tenant_db(&state, &claims.tid).await?;
    let user = db
        .users()
        .get(user_id)
        .await
        .map_err(|_| api_unauthorized("token subject no longer exists"))?;

    let scopes: Vec<String> = claims.scopes().map(str::to_string).collect();
    let mut body = Map::new();
    body.insert("sub".to_string(), Value::String(user.id.to_string()));
    body.extend(user_claims(&state, &claims.tid, &user, &scopes));
    Ok(([(CACHE_CONTROL, "no-store")], Json(Value::Object(body))).into_response())
}
