use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::auth::AuthUser;
use super::error::ApiJson;
use super::{parse_id, AppState};
use crate::execution::{OrderSide, OrderType};
use crate::models::{Page, Paginated, Signal, SignalAction, SignalStatus, Trade};
use crate::pipeline::Acceptance;
use crate::storage::{SignalQuery, TradeQuery};
use crate::{Error, Result};

/// Raw list parameters. Unparsable numbers fall back to defaults.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    page: Option<String>,
    limit: Option<String>,
    status: Option<String>,
    #[serde(rename = "botId")]
    bot_id: Option<String>,
}

impl ListParams {
    fn page(&self) -> Page {
        let number = |v: &Option<String>| v.as_deref().and_then(|s| s.trim().parse::<u32>().ok());
        Page::new(number(&self.page), number(&self.limit))
    }

    fn status(&self) -> Result<Option<SignalStatus>> {
        self.status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<SignalStatus>)
            .transpose()
    }

    fn bot_id(&self) -> Result<Option<Uuid>> {
        self.bot_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| Uuid::parse_str(s).map_err(|_| Error::validation("\"botId\" must be a valid id")))
            .transpose()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalResponse {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub action: SignalAction,
    pub symbol: String,
    pub exchange: String,
    pub price: Option<f64>,
    pub status: SignalStatus,
    pub execution_details: Value,
    pub raw_payload: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Signal> for SignalResponse {
    fn from(signal: Signal) -> Self {
        Self {
            id: signal.id,
            bot_id: signal.bot_id,
            action: signal.action,
            symbol: signal.symbol,
            exchange: signal.exchange,
            price: signal.price,
            status: signal.status,
            execution_details: signal.execution_details,
            raw_payload: signal.raw_payload,
            created_at: signal.created_at,
            updated_at: signal.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeResponse {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub signal_id: Uuid,
    pub order_id: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: Option<f64>,
    pub status: String,
    pub execution_details: Value,
    pub created_at: DateTime<Utc>,
}

impl From<Trade> for TradeResponse {
    fn from(trade: Trade) -> Self {
        Self {
            id: trade.id,
            bot_id: trade.bot_id,
            signal_id: trade.signal_id,
            order_id: trade.order_id,
            symbol: trade.symbol,
            order_type: trade.order_type,
            side: trade.side,
            quantity: trade.quantity,
            price: trade.price,
            status: trade.status,
            execution_details: trade.execution_details,
            created_at: trade.created_at,
        }
    }
}

fn signals_body(page: Paginated<Signal>) -> Value {
    let page = page.map(SignalResponse::from);
    json!({ "signals": page.items, "pagination": page.pagination })
}

/// Alert delivery from the charting platform
pub async fn receive(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
    ApiJson(payload): ApiJson<Value>,
) -> Result<Json<Value>> {
    match state.pipeline.accept(&webhook_id, payload).await? {
        Acceptance::Recorded { signal_id, outcome } => {
            tracing::info!(signal_id = %signal_id, status = %outcome.status(), "Webhook processed");
            Ok(Json(json!({ "message": "Webhook received and processed" })))
        }
        // logged by the pipeline
        Acceptance::Unrecorded { .. } => Ok(Json(json!({ "message": "Webhook received" }))),
    }
}

pub async fn bot_signals(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>> {
    let page = state
        .pipeline
        .bot_signals(parse_id(&id)?, user_id, params.page())
        .await?;
    Ok(Json(signals_body(page)))
}

pub async fn list_signals(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>> {
    let query = SignalQuery {
        user_id: Some(user_id),
        bot_id: params.bot_id()?,
        status: params.status()?,
        page: params.page(),
    };
    let page = state.recorder.list(query).await?;
    Ok(Json(signals_body(page)))
}

pub async fn list_trades(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>> {
    let query = TradeQuery {
        user_id: Some(user_id),
        bot_id: params.bot_id()?,
        page: params.page(),
    };
    let page = state.ledger.list(query).await?.map(TradeResponse::from);
    Ok(Json(json!({ "trades": page.items, "pagination": page.pagination })))
}
