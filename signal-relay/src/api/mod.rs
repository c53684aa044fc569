//! HTTP surface: REST API for accounts and bots, plus the public webhook.

pub mod auth;
pub mod bots;
pub mod error;
pub mod rate_limit;
pub mod users;
pub mod webhook;

use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::TokenIssuer;
use crate::config::Config;
use crate::crypto::CredentialCipher;
use crate::execution::{ExchangeGateway, FixedQuantity};
use crate::signals::SignalFeed;
use crate::storage::Store;
use crate::{
    Accounts, BotRegistry, Error, Result, SignalRecorder, TradeLedger, WebhookPipeline,
};

/// Shared handles for request handlers
#[derive(Clone)]
pub struct AppState {
    pub accounts: Accounts,
    pub bots: BotRegistry,
    pub pipeline: WebhookPipeline,
    pub recorder: SignalRecorder,
    pub ledger: TradeLedger,
    pub public_base_url: Arc<str>,
}

impl AppState {
    /// Wire the services over one store and one exchange gateway
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        cipher: Arc<CredentialCipher>,
        gateway: Arc<dyn ExchangeGateway>,
        feed: Option<SignalFeed>,
    ) -> Self {
        let recorder = SignalRecorder::new(store.clone(), feed);
        let ledger = TradeLedger::new(store.clone());
        let tokens = TokenIssuer::new(&config.jwt_secret, config.jwt_expires_in);

        Self {
            accounts: Accounts::new(store.clone(), cipher, tokens, gateway.clone()),
            bots: BotRegistry::new(store.clone()),
            pipeline: WebhookPipeline::new(
                store,
                recorder.clone(),
                ledger.clone(),
                gateway,
                Arc::new(FixedQuantity(config.order_quantity)),
            ),
            recorder,
            ledger,
            public_base_url: Arc::from(config.public_base_url.as_str()),
        }
    }
}

/// Path ids that are not UUIDs cannot name an existing bot
pub(crate) fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| Error::NotFound("Bot not found".to_string()))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    if origin == "*" {
        return Ok(cors.allow_origin(Any));
    }

    let origin = origin
        .parse::<HeaderValue>()
        .map_err(|e| Error::Config(format!("Invalid CORS_ORIGIN: {}", e)))?;
    Ok(cors.allow_origin(origin))
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Accounts
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/profile", get(auth::profile))
        .route("/users/profile", put(users::update_profile))
        .route("/users/password", put(users::change_password))
        .route("/users/api-keys", post(users::set_api_keys))
        .route("/users/api-keys/status", get(users::api_keys_status))
        .route("/users/balance", get(users::balance))
        .route("/users/open-orders", get(users::open_orders))
        .route(
            "/users/test-api-connection",
            get(users::test_stored_connection).post(users::test_candidate_connection),
        )
        // Bots
        .route("/bots", get(bots::list_bots).post(bots::create_bot))
        .route(
            "/bots/:id",
            get(bots::get_bot).put(bots::update_bot).delete(bots::delete_bot),
        )
        .route("/bots/:id/regenerate-secret", post(bots::regenerate_secret))
        // Signals and trades
        .route("/webhook/:uuid", post(webhook::receive))
        .route("/webhook/bot/:id/signals", get(webhook::bot_signals))
        .route("/signals", get(webhook::list_signals))
        .route("/trades", get(webhook::list_trades))
}

/// Build the application router with CORS, rate limiting and request tracing
pub fn router(state: AppState, config: &Config) -> Result<Router> {
    let limiter = rate_limit::create_rate_limiter(config.rate_limit_per_minute)?;

    Ok(Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes())
        .with_state(state)
        .layer(middleware::from_fn_with_state(
            limiter,
            rate_limit::rate_limit_middleware,
        ))
        .layer(cors_layer(&config.cors_origin)?)
        .layer(TraceLayer::new_for_http()))
}
