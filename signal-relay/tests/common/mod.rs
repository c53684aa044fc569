//! Shared harness: the full router over an in-memory store and a scripted exchange.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use signal_relay::api::{self, AppState};
use signal_relay::execution::{
    Balance, ConnectionCheck, ExchangeGateway, GatewayError, GatewayResult, OrderFill, OrderSide,
};
use signal_relay::models::{Bot, BotStats, Paginated, Signal, Trade, User};
use signal_relay::storage::{SignalQuery, TradeQuery};
use signal_relay::{Config, CredentialCipher, Error, MemoryStore, Store};
use uuid::Uuid;

/// Exchange stand-in that records orders and fails on demand
#[derive(Default)]
pub struct ScriptedGateway {
    pub reject_orders: AtomicBool,
    next_order_id: AtomicU64,
    pub orders: Mutex<Vec<(String, OrderSide, f64)>>,
}

#[async_trait]
impl ExchangeGateway for ScriptedGateway {
    async fn execute_market_order(
        &self,
        _user: &User,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> GatewayResult<OrderFill> {
        self.orders
            .lock()
            .unwrap()
            .push((symbol.to_string(), side, quantity));

        if self.reject_orders.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: reqwest::StatusCode::BAD_REQUEST,
                message: "Account has insufficient balance for requested action.".to_string(),
            });
        }

        let order_id = 1000 + self.next_order_id.fetch_add(1, Ordering::SeqCst);
        Ok(OrderFill {
            order_id: order_id.to_string(),
            executed_quantity: quantity,
            average_price: Some(50012.5),
            status: "FILLED".to_string(),
            details: json!({ "orderId": order_id, "status": "FILLED" }),
        })
    }

    async fn account_info(&self, _user: &User) -> GatewayResult<Vec<Balance>> {
        Ok(vec![Balance {
            asset: "USDT".to_string(),
            free: 1000.0,
            locked: 0.0,
        }])
    }

    async fn open_orders(&self, _user: &User, _symbol: Option<&str>) -> GatewayResult<Vec<Value>> {
        Ok(vec![])
    }

    async fn test_connection(&self, api_key: &str, _api_secret: &str) -> GatewayResult<ConnectionCheck> {
        if api_key == "valid-key" {
            Ok(ConnectionCheck { can_trade: true })
        } else {
            Err(GatewayError::Rejected {
                status: reqwest::StatusCode::UNAUTHORIZED,
                message: "API-key format invalid.".to_string(),
            })
        }
    }
}

/// `MemoryStore` whose signal inserts can be switched off
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub fail_signal_inserts: AtomicBool,
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_user(&self, user: &User) -> signal_relay::Result<()> {
        self.inner.insert_user(user).await
    }

    async fn find_user(&self, id: Uuid) -> signal_relay::Result<Option<User>> {
        self.inner.find_user(id).await
    }

    async fn find_user_by_email(&self, email: &str) -> signal_relay::Result<Option<User>> {
        self.inner.find_user_by_email(email).await
    }

    async fn update_user(&self, user: &User) -> signal_relay::Result<()> {
        self.inner.update_user(user).await
    }

    async fn insert_bot(&self, bot: &Bot) -> signal_relay::Result<()> {
        self.inner.insert_bot(bot).await
    }

    async fn list_bots(&self, user_id: Uuid) -> signal_relay::Result<Vec<Bot>> {
        self.inner.list_bots(user_id).await
    }

    async fn find_bot(&self, id: Uuid, user_id: Uuid) -> signal_relay::Result<Option<Bot>> {
        self.inner.find_bot(id, user_id).await
    }

    async fn find_bot_by_webhook(&self, webhook_uuid: Uuid) -> signal_relay::Result<Option<Bot>> {
        self.inner.find_bot_by_webhook(webhook_uuid).await
    }

    async fn update_bot(&self, bot: &Bot) -> signal_relay::Result<bool> {
        self.inner.update_bot(bot).await
    }

    async fn rotate_secret(&self, id: Uuid, user_id: Uuid, secret: &str) -> signal_relay::Result<bool> {
        self.inner.rotate_secret(id, user_id, secret).await
    }

    async fn delete_bot(&self, id: Uuid, user_id: Uuid) -> signal_relay::Result<bool> {
        self.inner.delete_bot(id, user_id).await
    }

    async fn increment_bot_stats(&self, id: Uuid, delta: BotStats) -> signal_relay::Result<()> {
        self.inner.increment_bot_stats(id, delta).await
    }

    async fn insert_signal(&self, signal: &Signal) -> signal_relay::Result<()> {
        if self.fail_signal_inserts.load(Ordering::SeqCst) {
            return Err(Error::Internal("disk full".to_string()));
        }
        self.inner.insert_signal(signal).await
    }

    async fn update_signal(&self, signal: &Signal) -> signal_relay::Result<()> {
        self.inner.update_signal(signal).await
    }

    async fn list_signals(&self, query: &SignalQuery) -> signal_relay::Result<Paginated<Signal>> {
        self.inner.list_signals(query).await
    }

    async fn insert_trade(&self, trade: &Trade) -> signal_relay::Result<()> {
        self.inner.insert_trade(trade).await
    }

    async fn list_trades(&self, query: &TradeQuery) -> signal_relay::Result<Paginated<Trade>> {
        self.inner.list_trades(query).await
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<FlakyStore>,
    pub gateway: Arc<ScriptedGateway>,
}

pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("DATABASE_URL", "memory"),
        ("JWT_SECRET", "integration-jwt-secret"),
        ("CRYPTO_SECRET_KEY", "integration-crypto-key"),
        ("RATE_LIMIT_PER_MINUTE", "100000"),
        ("PUBLIC_BASE_URL", "https://relay.test"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

pub fn spawn_app_with(config: Config) -> TestApp {
    let store = Arc::new(FlakyStore::default());
    let gateway = Arc::new(ScriptedGateway::default());
    let cipher = Arc::new(CredentialCipher::from_passphrase(&config.crypto_secret_key).unwrap());

    let state = AppState::new(&config, store.clone(), cipher, gateway.clone(), None);
    let router = api::router(state, &config).unwrap();

    TestApp {
        router,
        store,
        gateway,
    }
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(test_config(&[]))
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(token), Some(body)).await
    }

    /// Register a user and return their token
    pub async fn register(&self, email: &str) -> String {
        let (status, body) = self
            .post(
                "/api/auth/register",
                None,
                json!({ "email": email, "password": "password123", "name": "Trader" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["token"].as_str().unwrap().to_string()
    }

    /// Create a bot and return its JSON representation (including secret)
    pub async fn create_bot(&self, token: &str) -> Value {
        let (status, body) = self
            .post(
                "/api/bots",
                Some(token),
                json!({ "name": "Breakout", "pairs": ["BTCUSDT"] }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["bot"].clone()
    }

    pub async fn set_api_keys(&self, token: &str) {
        let (status, _) = self
            .post(
                "/api/users/api-keys",
                Some(token),
                json!({ "apiKey": "valid-key", "apiSecret": "valid-secret" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    pub async fn fire_webhook(&self, bot: &Value, body: Value) -> (StatusCode, Value) {
        let uri = format!("/api/webhook/{}", bot["uuid"].as_str().unwrap());
        self.post(&uri, None, body).await
    }

    pub async fn bot_stats(&self, token: &str, bot: &Value) -> Value {
        let (status, body) = self
            .get(&format!("/api/bots/{}", bot["id"].as_str().unwrap()), token)
            .await;
        assert_eq!(status, StatusCode::OK);
        body["bot"]["stats"].clone()
    }

    pub async fn bot_signals(&self, token: &str, bot: &Value, query: &str) -> (StatusCode, Value) {
        let uri = format!(
            "/api/webhook/bot/{}/signals{}",
            bot["id"].as_str().unwrap(),
            query
        );
        self.get(&uri, token).await
    }
}

pub fn alert(secret: &str) -> Value {
    json!({
        "secret": secret,
        "action": "buy",
        "tv_instrument": "BINANCE:BTCUSDT",
        "trigger_price": "50000"
    })
}
