use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::auth::AuthUser;
use super::error::ApiJson;
use super::{parse_id, AppState};
use crate::bots::NewBot;
use crate::models::{Bot, BotStats, BotStatus, BotUpdate};
use crate::Result;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotResponse {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub pairs: Vec<String>,
    pub uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub status: BotStatus,
    pub stats: BotStats,
    pub webhook_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BotResponse {
    /// Render a bot; the secret is only included when `with_secret` is set.
    pub fn new(bot: Bot, public_base_url: &str, with_secret: bool) -> Self {
        Self {
            webhook_url: webhook_url(public_base_url, bot.webhook_uuid),
            secret: with_secret.then_some(bot.secret),
            id: bot.id,
            name: bot.name,
            description: bot.description,
            pairs: bot.pairs,
            uuid: bot.webhook_uuid,
            status: bot.status,
            stats: bot.stats,
            created_at: bot.created_at,
            updated_at: bot.updated_at,
        }
    }
}

pub fn webhook_url(public_base_url: &str, webhook_uuid: Uuid) -> String {
    format!(
        "{}/api/webhook/{}",
        public_base_url.trim_end_matches('/'),
        webhook_uuid
    )
}

#[derive(Debug, Deserialize)]
pub struct CreateBotRequest {
    #[serde(default)]
    name: String,
    description: Option<String>,
    #[serde(default)]
    pairs: Vec<String>,
}

pub async fn create_bot(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<CreateBotRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let bot = state
        .bots
        .create(
            user_id,
            NewBot {
                name: req.name,
                description: req.description,
                pairs: req.pairs,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Bot created successfully",
            "bot": BotResponse::new(bot, &state.public_base_url, true),
        })),
    ))
}

pub async fn list_bots(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>> {
    let bots: Vec<BotResponse> = state
        .bots
        .list(user_id)
        .await?
        .into_iter()
        .map(|bot| BotResponse::new(bot, &state.public_base_url, false))
        .collect();

    Ok(Json(json!({ "bots": bots })))
}

pub async fn get_bot(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let bot = state.bots.get(parse_id(&id)?, user_id).await?;
    Ok(Json(json!({
        "bot": BotResponse::new(bot, &state.public_base_url, true),
    })))
}

pub async fn update_bot(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<BotUpdate>,
) -> Result<Json<Value>> {
    let bot = state.bots.update(parse_id(&id)?, user_id, update).await?;
    Ok(Json(json!({
        "message": "Bot updated successfully",
        "bot": BotResponse::new(bot, &state.public_base_url, false),
    })))
}

pub async fn delete_bot(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    state.bots.delete(parse_id(&id)?, user_id).await?;
    Ok(Json(json!({ "message": "Bot deleted successfully" })))
}

pub async fn regenerate_secret(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let bot = state.bots.regenerate_secret(parse_id(&id)?, user_id).await?;
    Ok(Json(json!({
        "message": "Bot secret regenerated successfully",
        "secret": bot.secret,
    })))
}
