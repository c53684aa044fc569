use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use url::form_urlencoded;

use crate::crypto::CredentialCipher;
use crate::models::{Signal, User};
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(Error::Internal(format!("Unknown order side: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            other => Err(Error::Internal(format!("Unknown order type: {}", other))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("No API keys configured")]
    MissingCredentials,

    #[error("Could not decrypt API keys: {0}")]
    Credentials(#[from] Error),

    #[error("Exchange request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Exchange rejected request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Unexpected exchange response: {0}")]
    Decode(String),
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// A placed order as reported by the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub order_id: String,
    pub executed_quantity: f64,
    pub average_price: Option<f64>,
    pub status: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Balance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCheck {
    pub can_trade: bool,
}

/// Boundary to the exchange's order and account API.
///
/// Every call reports failure through `GatewayError` instead of panicking or
/// leaking transport types to callers.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn execute_market_order(
        &self,
        user: &User,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> GatewayResult<OrderFill>;

    async fn account_info(&self, user: &User) -> GatewayResult<Vec<Balance>>;

    async fn open_orders(
        &self,
        user: &User,
        symbol: Option<&str>,
    ) -> GatewayResult<Vec<serde_json::Value>>;

    /// Check a candidate key pair directly, not the stored one.
    async fn test_connection(&self, api_key: &str, api_secret: &str)
        -> GatewayResult<ConnectionCheck>;
}

/// Decides how much to trade for a signal
pub trait PositionSizer: Send + Sync {
    fn quantity(&self, signal: &Signal) -> f64;
}

/// Sizes every order with the same configured quantity
#[derive(Debug, Clone, Copy)]
pub struct FixedQuantity(pub f64);

impl PositionSizer for FixedQuantity {
    fn quantity(&self, _signal: &Signal) -> f64 {
        self.0
    }
}

/// Exchange symbols are plain upper-case alphanumerics
pub fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Map a charting-platform instrument to an exchange symbol:
/// `BINANCE:BTC/USDT` becomes `BTCUSDT`.
pub fn exchange_symbol(instrument: &str) -> String {
    let symbol = match instrument.split_once(':') {
        Some((_, rest)) => rest,
        None => instrument,
    };
    symbol.replace('/', "").to_ascii_uppercase()
}

struct Credentials {
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    can_trade: bool,
    #[serde(default)]
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    msg: String,
}

/// Binance spot REST client with HMAC-SHA256 signed requests
pub struct BinanceGateway {
    client: Client,
    base_url: String,
    cipher: Arc<CredentialCipher>,
}

impl BinanceGateway {
    pub fn new(base_url: &str, timeout: Duration, cipher: Arc<CredentialCipher>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cipher,
        })
    }

    fn credentials(&self, user: &User) -> GatewayResult<Credentials> {
        let api_key = self.cipher.decrypt(user.api_key.as_deref())?;
        let api_secret = self.cipher.decrypt(user.api_secret.as_deref())?;

        match (api_key, api_secret) {
            (Some(api_key), Some(api_secret)) => Ok(Credentials { api_key, api_secret }),
            _ => Err(GatewayError::MissingCredentials),
        }
    }

    async fn ping(&self) -> GatewayResult<()> {
        let response = self
            .client
            .get(format!("{}/api/v3/ping", self.base_url))
            .send()
            .await?;
        Self::read(response).await.map(|_| ())
    }

    async fn signed(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        credentials: &Credentials,
    ) -> GatewayResult<serde_json::Value> {
        let query = signed_query(params, Utc::now().timestamp_millis());
        let signature = sign(&credentials.api_secret, &query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let response = self
            .client
            .request(method, url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .send()
            .await?;

        Self::read(response).await
    }

    async fn read(response: reqwest::Response) -> GatewayResult<serde_json::Value> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|e| e.msg)
                .unwrap_or(body);
            return Err(GatewayError::Rejected { status, message });
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

/// Form-encode the request parameters followed by the receive window and
/// timestamp. The signature covers exactly this string.
fn signed_query(params: &[(&str, String)], timestamp_ms: i64) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
        .append_pair("recvWindow", &RECV_WINDOW_MS.to_string())
        .append_pair("timestamp", &timestamp_ms.to_string())
        .finish()
}

fn sign(secret: &str, payload: &str) -> GatewayResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Decode(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn parse_amount(value: Option<&str>) -> Option<f64> {
    value.and_then(|v| v.parse::<f64>().ok())
}

fn fill_from_response(details: serde_json::Value, requested: f64) -> GatewayResult<OrderFill> {
    let order: OrderResponse = serde_json::from_value(details.clone())
        .map_err(|e| GatewayError::Decode(e.to_string()))?;

    let executed_quantity = parse_amount(order.executed_qty.as_deref())
        .filter(|q| *q > 0.0)
        .unwrap_or(requested);
    let average_price = parse_amount(order.cummulative_quote_qty.as_deref())
        .filter(|quote| *quote > 0.0)
        .map(|quote| quote / executed_quantity);

    Ok(OrderFill {
        order_id: order.order_id.to_string(),
        executed_quantity,
        average_price,
        status: order.status.unwrap_or_else(|| "FILLED".to_string()),
        details,
    })
}

#[async_trait]
impl ExchangeGateway for BinanceGateway {
    async fn execute_market_order(
        &self,
        user: &User,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> GatewayResult<OrderFill> {
        if !is_valid_symbol(symbol) {
            return Err(GatewayError::InvalidSymbol(symbol.to_string()));
        }
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(GatewayError::Decode("Quantity must be positive".to_string()));
        }

        let credentials = self.credentials(user)?;
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", OrderType::Market.as_str().to_string()),
            ("quantity", quantity.to_string()),
            ("newOrderRespType", "FULL".to_string()),
        ];

        let details = self
            .signed(Method::POST, "/api/v3/order", &params, &credentials)
            .await?;
        let fill = fill_from_response(details, quantity)?;

        tracing::info!(
            symbol,
            side = side.as_str(),
            quantity,
            order_id = %fill.order_id,
            "Market order executed"
        );

        Ok(fill)
    }

    async fn account_info(&self, user: &User) -> GatewayResult<Vec<Balance>> {
        let credentials = self.credentials(user)?;
        let body = self
            .signed(Method::GET, "/api/v3/account", &[], &credentials)
            .await?;
        let account: AccountResponse =
            serde_json::from_value(body).map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(account
            .balances
            .into_iter()
            .map(|b| Balance {
                free: b.free.parse().unwrap_or(0.0),
                locked: b.locked.parse().unwrap_or(0.0),
                asset: b.asset,
            })
            .filter(|b| b.free > 0.0 || b.locked > 0.0)
            .collect())
    }

    async fn open_orders(
        &self,
        user: &User,
        symbol: Option<&str>,
    ) -> GatewayResult<Vec<serde_json::Value>> {
        let credentials = self.credentials(user)?;
        let params: Vec<(&str, String)> = symbol
            .map(|s| vec![("symbol", exchange_symbol(s))])
            .unwrap_or_default();

        match self
            .signed(Method::GET, "/api/v3/openOrders", &params, &credentials)
            .await?
        {
            serde_json::Value::Array(orders) => Ok(orders),
            other => Err(GatewayError::Decode(format!("expected array, got {}", other))),
        }
    }

    async fn test_connection(
        &self,
        api_key: &str,
        api_secret: &str,
    ) -> GatewayResult<ConnectionCheck> {
        self.ping().await?;

        let credentials = Credentials {
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        };
        let body = self
            .signed(Method::GET, "/api/v3/account", &[], &credentials)
            .await?;
        let account: AccountResponse =
            serde_json::from_value(body).map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(ConnectionCheck {
            can_trade: account.can_trade,
        })
    }
}
