use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::error::ApiJson;
use super::AppState;
use crate::accounts::{Registration, Session};
use crate::models::User;
use crate::{Error, Result};

/// Caller identity taken from a verified `Authorization: Bearer` token
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Err(Error::Unauthorized(
                "No authentication token provided".to_string(),
            ));
        };

        let token = header
            .to_str()
            .ok()
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Unauthorized("Authentication failed".to_string()))?;

        let claims = state
            .accounts
            .tokens()
            .verify(token)
            .map_err(|_| Error::Unauthorized("Authentication failed".to_string()))?;

        Ok(AuthUser(claims.sub))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

fn session_body(message: &str, session: Session) -> Value {
    json!({
        "message": message,
        "user": UserResponse::from(session.user),
        "token": session.token,
    })
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let session = state
        .accounts
        .register(Registration {
            email: req.email,
            password: req.password,
            name: req.name,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(session_body("User created successfully", session)),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<Value>> {
    let mut errors = Vec::new();
    if req.email.trim().is_empty() {
        errors.push("\"email\" is not allowed to be empty".to_string());
    }
    if req.password.is_empty() {
        errors.push("\"password\" is not allowed to be empty".to_string());
    }
    if !errors.is_empty() {
        return Err(Error::Validation(errors));
    }

    let session = state.accounts.login(&req.email, &req.password).await?;
    Ok(Json(session_body("Login successful", session)))
}

pub async fn profile(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> Result<Json<Value>> {
    let user = state.accounts.profile(user_id).await?;
    Ok(Json(json!({ "user": UserResponse::from(user) })))
}
