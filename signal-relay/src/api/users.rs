use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::{AuthUser, UserResponse};
use super::error::ApiJson;
use super::AppState;
use crate::Result;

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordRequest {
    #[serde(default)]
    current_password: String,
    #[serde(default)]
    new_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeysRequest {
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    api_secret: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenOrdersQuery {
    symbol: Option<String>,
}

pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<ProfileRequest>,
) -> Result<Json<Value>> {
    let user = state.accounts.update_profile(user_id, &req.name).await?;
    Ok(Json(json!({
        "message": "Profile updated successfully",
        "user": UserResponse::from(user),
    })))
}

pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<PasswordRequest>,
) -> Result<Json<Value>> {
    state
        .accounts
        .change_password(user_id, &req.current_password, &req.new_password)
        .await?;
    Ok(Json(json!({ "message": "Password changed successfully" })))
}

pub async fn set_api_keys(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<ApiKeysRequest>,
) -> Result<Json<Value>> {
    state
        .accounts
        .set_api_keys(user_id, &req.api_key, &req.api_secret)
        .await?;
    Ok(Json(json!({ "message": "API keys saved successfully" })))
}

pub async fn api_keys_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>> {
    let has_keys = state.accounts.has_api_keys(user_id).await?;
    Ok(Json(json!({ "hasKeys": has_keys })))
}

pub async fn balance(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>> {
    let balances = state.accounts.balances(user_id).await?;
    Ok(Json(json!({ "balances": balances })))
}

pub async fn open_orders(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<OpenOrdersQuery>,
) -> Result<Json<Value>> {
    let symbol = query.symbol.as_deref().filter(|s| !s.trim().is_empty());
    let orders = state.accounts.open_orders(user_id, symbol).await?;
    Ok(Json(json!({ "orders": orders })))
}

fn connection_body(result: std::result::Result<crate::execution::ConnectionCheck, String>) -> Value {
    match result {
        Ok(check) => json!({ "success": true, "canTrade": check.can_trade }),
        Err(error) => json!({ "success": false, "error": error }),
    }
}

/// Test the stored key pair
pub async fn test_stored_connection(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>> {
    let result = state.accounts.test_connection(user_id, None).await?;
    Ok(Json(connection_body(result)))
}

/// Test a candidate key pair before saving it
pub async fn test_candidate_connection(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<ApiKeysRequest>,
) -> Result<Json<Value>> {
    if req.api_key.trim().is_empty() || req.api_secret.trim().is_empty() {
        return Err(crate::Error::validation("\"apiKey\" and \"apiSecret\" are required"));
    }

    let candidate = (req.api_key.trim().to_string(), req.api_secret.trim().to_string());
    let result = state.accounts.test_connection(user_id, Some(candidate)).await?;
    Ok(Json(connection_body(result)))
}
