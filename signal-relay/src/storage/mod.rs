//! Persistence for users, bots, signals and trades.
//!
//! Services talk to a `Store`; `Database` is the Postgres implementation and
//! `MemoryStore` keeps everything in process (local runs and tests).

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::Database;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Bot, BotStats, Page, Paginated, Signal, SignalStatus, Trade, User};
use crate::Result;

/// Filters for signal listings. Owner scoping is applied whenever `user_id` is set.
#[derive(Debug, Clone, Default)]
pub struct SignalQuery {
    pub user_id: Option<Uuid>,
    pub bot_id: Option<Uuid>,
    pub status: Option<SignalStatus>,
    pub page: Page,
}

#[derive(Debug, Clone, Default)]
pub struct TradeQuery {
    pub user_id: Option<Uuid>,
    pub bot_id: Option<Uuid>,
    pub page: Page,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with `Error::Conflict` when the email is taken.
    async fn insert_user(&self, user: &User) -> Result<()>;
    async fn find_user(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    /// Persist name, password hash, credentials and `updated_at`.
    async fn update_user(&self, user: &User) -> Result<()>;

    async fn insert_bot(&self, bot: &Bot) -> Result<()>;
    async fn list_bots(&self, user_id: Uuid) -> Result<Vec<Bot>>;
    /// Only returns the bot when it belongs to `user_id`.
    async fn find_bot(&self, id: Uuid, user_id: Uuid) -> Result<Option<Bot>>;
    async fn find_bot_by_webhook(&self, webhook_uuid: Uuid) -> Result<Option<Bot>>;
    /// Persist the editable fields (name, description, pairs, status).
    /// Counters and the webhook secret are left alone. Returns false when no
    /// owned bot matched.
    async fn update_bot(&self, bot: &Bot) -> Result<bool>;
    /// Swap in a new webhook secret. Returns false when no owned bot matched.
    async fn rotate_secret(&self, id: Uuid, user_id: Uuid, secret: &str) -> Result<bool>;
    async fn delete_bot(&self, id: Uuid, user_id: Uuid) -> Result<bool>;
    /// Add `delta` to the bot's counters in a single atomic step.
    async fn increment_bot_stats(&self, id: Uuid, delta: BotStats) -> Result<()>;

    async fn insert_signal(&self, signal: &Signal) -> Result<()>;
    /// Persist status, execution details and `updated_at`.
    async fn update_signal(&self, signal: &Signal) -> Result<()>;
    /// Newest first.
    async fn list_signals(&self, query: &SignalQuery) -> Result<Paginated<Signal>>;

    async fn insert_trade(&self, trade: &Trade) -> Result<()>;
    /// Newest first.
    async fn list_trades(&self, query: &TradeQuery) -> Result<Paginated<Trade>>;
}
