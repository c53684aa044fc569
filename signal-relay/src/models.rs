use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{OrderSide, OrderType};
use crate::{Error, Result};

pub const DEFAULT_EXCHANGE: &str = "binance";
pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    /// Encrypted exchange API key
    pub api_key: Option<String>,
    /// Encrypted exchange API secret
    pub api_secret: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, password_hash: String, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            name,
            api_key: None,
            api_secret: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_api_keys(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Active,
    Inactive,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Active => "active",
            BotStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for BotStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(BotStatus::Active),
            "inactive" => Ok(BotStatus::Inactive),
            other => Err(Error::validation(format!("Invalid bot status: {}", other))),
        }
    }
}

/// Per-bot signal counters. Also used as an increment when recording outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotStats {
    pub signals: i64,
    pub executed: i64,
    pub failed: i64,
}

impl BotStats {
    pub const EXECUTED: BotStats = BotStats { signals: 1, executed: 1, failed: 0 };
    pub const FAILED: BotStats = BotStats { signals: 1, executed: 0, failed: 1 };

    pub fn add(self, delta: BotStats) -> BotStats {
        BotStats {
            signals: self.signals + delta.signals,
            executed: self.executed + delta.executed,
            failed: self.failed + delta.failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bot {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
    pub pairs: Vec<String>,
    /// Public identifier used in the webhook URL. Never changes.
    pub webhook_uuid: Uuid,
    pub secret: String,
    pub status: BotStatus,
    pub stats: BotStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial bot update; `None` leaves the field alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub pairs: Option<Vec<String>>,
    pub status: Option<BotStatus>,
}

impl Bot {
    pub fn new(
        user_id: Uuid,
        name: String,
        description: String,
        pairs: Vec<String>,
        secret: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name,
            description,
            pairs,
            webhook_uuid: Uuid::new_v4(),
            secret,
            status: BotStatus::Active,
            stats: BotStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BotStatus::Active
    }

    pub fn apply(&self, update: BotUpdate) -> Bot {
        Bot {
            name: update.name.unwrap_or_else(|| self.name.clone()),
            description: update.description.unwrap_or_else(|| self.description.clone()),
            pairs: update.pairs.unwrap_or_else(|| self.pairs.clone()),
            status: update.status.unwrap_or(self.status),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
        }
    }

    pub fn side(&self) -> OrderSide {
        match self {
            SignalAction::Buy => OrderSide::Buy,
            SignalAction::Sell => OrderSide::Sell,
        }
    }
}

impl FromStr for SignalAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(SignalAction::Buy),
            "sell" => Ok(SignalAction::Sell),
            _ => Err(Error::validation(format!("Invalid action: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Received,
    Processing,
    Executed,
    Failed,
    /// No exchange credentials; the order was never attempted
    Pending,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Received => "received",
            SignalStatus::Processing => "processing",
            SignalStatus::Executed => "executed",
            SignalStatus::Failed => "failed",
            SignalStatus::Pending => "pending",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SignalStatus::Executed | SignalStatus::Failed | SignalStatus::Pending
        )
    }

    pub fn can_transition_to(&self, next: SignalStatus) -> bool {
        use SignalStatus::*;
        matches!(
            (self, next),
            (Received, Processing)
                | (Received, Pending)
                | (Received, Failed)
                | (Processing, Executed)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "received" => Ok(SignalStatus::Received),
            "processing" => Ok(SignalStatus::Processing),
            "executed" => Ok(SignalStatus::Executed),
            "failed" => Ok(SignalStatus::Failed),
            "pending" => Ok(SignalStatus::Pending),
            other => Err(Error::validation(format!("Invalid signal status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub user_id: Uuid,
    pub action: SignalAction,
    /// Instrument exactly as the alert sent it
    pub symbol: String,
    pub exchange: String,
    pub price: Option<f64>,
    pub status: SignalStatus,
    pub execution_details: serde_json::Value,
    pub raw_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSignal {
    pub bot_id: Uuid,
    pub user_id: Uuid,
    pub action: SignalAction,
    pub symbol: String,
    pub exchange: String,
    pub price: Option<f64>,
    pub raw_payload: serde_json::Value,
}

impl Signal {
    pub fn received(new: NewSignal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            bot_id: new.bot_id,
            user_id: new.user_id,
            action: new.action,
            symbol: new.symbol,
            exchange: new.exchange,
            price: new.price,
            status: SignalStatus::Received,
            execution_details: serde_json::json!({}),
            raw_payload: new.raw_payload,
            created_at: now,
            updated_at: now,
        }
    }

    /// Produce the next state of this signal, or an error if the lifecycle forbids it.
    pub fn transition(&self, next: SignalStatus, details: serde_json::Value) -> Result<Signal> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        Ok(Signal {
            status: next,
            execution_details: details,
            updated_at: Utc::now(),
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub id: Uuid,
    pub user_id: Uuid,
    pub bot_id: Uuid,
    pub signal_id: Uuid,
    /// Exchange-assigned order id
    pub order_id: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: Option<f64>,
    pub status: String,
    pub execution_details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Page {
    /// Normalize client input: missing or zero values fall back to defaults
    /// and the limit is capped.
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.filter(|p| *p > 0).unwrap_or(DEFAULT_PAGE),
            limit: limit
                .filter(|l| *l > 0)
                .unwrap_or(DEFAULT_LIMIT)
                .min(MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

impl Pagination {
    pub fn new(page: Page, total: u64) -> Self {
        Self {
            page: page.page,
            limit: page.limit,
            total,
            pages: total.div_ceil(u64::from(page.limit)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Paginated<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signal() -> Signal {
        Signal::received(NewSignal {
            bot_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            action: SignalAction::Buy,
            symbol: "BINANCE:BTCUSDT".to_string(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            price: Some(50000.0),
            raw_payload: json!({"action": "buy"}),
        })
    }

    #[test]
    fn test_signal_lifecycle() {
        let received = signal();
        assert_eq!(received.status, SignalStatus::Received);

        let processing = received
            .transition(SignalStatus::Processing, json!({}))
            .unwrap();
        let executed = processing
            .transition(SignalStatus::Executed, json!({"orderId": "1"}))
            .unwrap();

        assert_eq!(executed.status, SignalStatus::Executed);
        assert_eq!(executed.execution_details["orderId"], "1");
        assert_eq!(executed.id, received.id);
        // the original record is untouched
        assert_eq!(received.status, SignalStatus::Received);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let pending = signal().transition(SignalStatus::Pending, json!({})).unwrap();
        assert!(pending.status.is_terminal());

        for next in [
            SignalStatus::Processing,
            SignalStatus::Executed,
            SignalStatus::Failed,
        ] {
            assert!(matches!(
                pending.transition(next, json!({})),
                Err(Error::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn test_cannot_execute_without_processing() {
        assert!(signal().transition(SignalStatus::Executed, json!({})).is_err());
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("BUY".parse::<SignalAction>().unwrap(), SignalAction::Buy);
        assert_eq!("sell".parse::<SignalAction>().unwrap(), SignalAction::Sell);
        assert!("close".parse::<SignalAction>().is_err());
        assert_eq!(SignalAction::Sell.side(), OrderSide::Sell);
    }

    #[test]
    fn test_bot_apply_partial_update() {
        let bot = Bot::new(
            Uuid::new_v4(),
            "Trend".to_string(),
            "desc".to_string(),
            vec!["BTCUSDT".to_string()],
            "secret".to_string(),
        );

        let updated = bot.apply(BotUpdate {
            status: Some(BotStatus::Inactive),
            ..Default::default()
        });

        assert_eq!(updated.name, "Trend");
        assert_eq!(updated.pairs, vec!["BTCUSDT".to_string()]);
        assert_eq!(updated.status, BotStatus::Inactive);
        assert_eq!(updated.webhook_uuid, bot.webhook_uuid);
    }

    #[test]
    fn test_pagination() {
        let page = Page::new(Some(2), Some(20));
        assert_eq!(page.offset(), 20);

        let pagination = Pagination::new(page, 45);
        assert_eq!(pagination.pages, 3);
        assert_eq!(Pagination::new(page, 0).pages, 0);
        assert_eq!(Pagination::new(page, 40).pages, 2);
    }

    #[test]
    fn test_page_defaults() {
        assert_eq!(Page::new(None, None), Page::default());
        assert_eq!(Page::new(Some(0), Some(0)), Page::default());
        assert_eq!(Page::new(None, Some(1000)).limit, MAX_LIMIT);
    }
}
