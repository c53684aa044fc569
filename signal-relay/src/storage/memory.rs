use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{SignalQuery, Store, TradeQuery};
use crate::models::{Bot, BotStats, Page, Paginated, Pagination, Signal, Trade, User};
use crate::{Error, Result};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    bots: HashMap<Uuid, Bot>,
    signals: Vec<Signal>,
    trades: Vec<Trade>,
}

/// In-process store used for local runs (`DATABASE_URL=memory`) and tests
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Newest first; ties keep reverse insertion order.
fn paginate<T: Clone>(
    rows: &[T],
    page: Page,
    keep: impl Fn(&T) -> bool,
    created_at: impl Fn(&T) -> chrono::DateTime<chrono::Utc>,
) -> Paginated<T> {
    let mut matching: Vec<&T> = rows.iter().rev().filter(|r| keep(r)).collect();
    matching.sort_by(|a, b| created_at(b).cmp(&created_at(a)));

    let total = matching.len() as u64;
    let items = matching
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit as usize)
        .cloned()
        .collect();

    Paginated {
        items,
        pagination: Pagination::new(page, total),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut tables = self.inner.write().await;
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(Error::Conflict("User already exists".to_string()));
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.inner.read().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut tables = self.inner.write().await;
        if let Some(existing) = tables.users.get_mut(&user.id) {
            existing.name = user.name.clone();
            existing.password_hash = user.password_hash.clone();
            existing.api_key = user.api_key.clone();
            existing.api_secret = user.api_secret.clone();
            existing.updated_at = user.updated_at;
        }
        Ok(())
    }

    async fn insert_bot(&self, bot: &Bot) -> Result<()> {
        self.inner.write().await.bots.insert(bot.id, bot.clone());
        Ok(())
    }

    async fn list_bots(&self, user_id: Uuid) -> Result<Vec<Bot>> {
        let tables = self.inner.read().await;
        let mut bots: Vec<Bot> = tables
            .bots
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bots)
    }

    async fn find_bot(&self, id: Uuid, user_id: Uuid) -> Result<Option<Bot>> {
        let tables = self.inner.read().await;
        Ok(tables
            .bots
            .get(&id)
            .filter(|b| b.user_id == user_id)
            .cloned())
    }

    async fn find_bot_by_webhook(&self, webhook_uuid: Uuid) -> Result<Option<Bot>> {
        let tables = self.inner.read().await;
        Ok(tables
            .bots
            .values()
            .find(|b| b.webhook_uuid == webhook_uuid)
            .cloned())
    }

    async fn update_bot(&self, bot: &Bot) -> Result<bool> {
        let mut tables = self.inner.write().await;
        match tables.bots.get_mut(&bot.id) {
            Some(existing) if existing.user_id == bot.user_id => {
                existing.name = bot.name.clone();
                existing.description = bot.description.clone();
                existing.pairs = bot.pairs.clone();
                existing.status = bot.status;
                existing.updated_at = bot.updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rotate_secret(&self, id: Uuid, user_id: Uuid, secret: &str) -> Result<bool> {
        let mut tables = self.inner.write().await;
        match tables.bots.get_mut(&id) {
            Some(existing) if existing.user_id == user_id => {
                existing.secret = secret.to_string();
                existing.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_bot(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut tables = self.inner.write().await;
        let owned = tables.bots.get(&id).is_some_and(|b| b.user_id == user_id);
        if !owned {
            return Ok(false);
        }

        tables.bots.remove(&id);
        tables.signals.retain(|s| s.bot_id != id);
        tables.trades.retain(|t| t.bot_id != id);
        Ok(true)
    }

    async fn increment_bot_stats(&self, id: Uuid, delta: BotStats) -> Result<()> {
        let mut tables = self.inner.write().await;
        if let Some(bot) = tables.bots.get_mut(&id) {
            bot.stats = bot.stats.add(delta);
        }
        Ok(())
    }

    async fn insert_signal(&self, signal: &Signal) -> Result<()> {
        self.inner.write().await.signals.push(signal.clone());
        Ok(())
    }

    async fn update_signal(&self, signal: &Signal) -> Result<()> {
        let mut tables = self.inner.write().await;
        if let Some(existing) = tables.signals.iter_mut().find(|s| s.id == signal.id) {
            existing.status = signal.status;
            existing.execution_details = signal.execution_details.clone();
            existing.updated_at = signal.updated_at;
        }
        Ok(())
    }

    async fn list_signals(&self, query: &SignalQuery) -> Result<Paginated<Signal>> {
        let tables = self.inner.read().await;
        Ok(paginate(
            &tables.signals,
            query.page,
            |s| {
                query.user_id.map_or(true, |id| s.user_id == id)
                    && query.bot_id.map_or(true, |id| s.bot_id == id)
                    && query.status.map_or(true, |status| s.status == status)
            },
            |s| s.created_at,
        ))
    }

    async fn insert_trade(&self, trade: &Trade) -> Result<()> {
        self.inner.write().await.trades.push(trade.clone());
        Ok(())
    }

    async fn list_trades(&self, query: &TradeQuery) -> Result<Paginated<Trade>> {
        let tables = self.inner.read().await;
        Ok(paginate(
            &tables.trades,
            query.page,
            |t| {
                query.user_id.map_or(true, |id| t.user_id == id)
                    && query.bot_id.map_or(true, |id| t.bot_id == id)
            },
            |t| t.created_at,
        ))
    }
}
