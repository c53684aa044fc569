use std::sync::Arc;

use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{NewSignal, Page, Paginated, Signal, SignalStatus};
use crate::storage::{SignalQuery, Store};
use crate::Result;

const FEED_CHANNEL: &str = "trading_signals";

/// What gets published for each settled signal
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    pub signal_id: Uuid,
    pub bot_id: Uuid,
    pub action: String,
    pub symbol: String,
    pub exchange: String,
    pub price: Option<f64>,
    pub status: String,
    pub timestamp: i64,
}

impl From<&Signal> for FeedEntry {
    fn from(signal: &Signal) -> Self {
        Self {
            signal_id: signal.id,
            bot_id: signal.bot_id,
            action: signal.action.as_str().to_string(),
            symbol: signal.symbol.clone(),
            exchange: signal.exchange.clone(),
            price: signal.price,
            status: signal.status.as_str().to_string(),
            timestamp: signal.updated_at.timestamp_millis(),
        }
    }
}

/// Redis feed of settled signals: latest per bot plus a pub/sub announcement.
#[derive(Clone)]
pub struct SignalFeed {
    client: ConnectionManager,
}

impl SignalFeed {
    /// Connect to Redis
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let client = ConnectionManager::new(client).await?;

        Ok(Self { client })
    }

    pub fn key(bot_id: Uuid) -> String {
        format!("signal:{}", bot_id)
    }

    pub async fn publish(&self, signal: &Signal) -> Result<()> {
        let key = Self::key(signal.bot_id);
        let value = serde_json::to_string(&FeedEntry::from(signal))?;

        // clones share one multiplexed connection
        let mut conn = self.client.clone();
        conn.set_ex::<_, _, ()>(&key, &value, 300).await?; // expire after 5 minutes
        conn.publish::<_, _, ()>(FEED_CHANNEL, &value).await?;

        Ok(())
    }
}

/// Persists inbound alerts and moves them through their lifecycle
#[derive(Clone)]
pub struct SignalRecorder {
    store: Arc<dyn Store>,
    feed: Option<SignalFeed>,
}

impl SignalRecorder {
    pub fn new(store: Arc<dyn Store>, feed: Option<SignalFeed>) -> Self {
        Self { store, feed }
    }

    pub async fn record(&self, new: NewSignal) -> Result<Signal> {
        let signal = Signal::received(new);
        self.store.insert_signal(&signal).await?;

        tracing::info!(
            signal_id = %signal.id,
            bot_id = %signal.bot_id,
            action = signal.action.as_str(),
            symbol = %signal.symbol,
            "Signal received"
        );

        Ok(signal)
    }

    /// Move `signal` to `next` and persist it. Settled signals are also
    /// pushed to the feed when one is configured.
    pub async fn transition(
        &self,
        signal: &Signal,
        next: SignalStatus,
        details: serde_json::Value,
    ) -> Result<Signal> {
        let updated = signal.transition(next, details)?;
        self.store.update_signal(&updated).await?;

        tracing::debug!(signal_id = %updated.id, status = %updated.status, "Signal updated");

        if updated.status.is_terminal() {
            if let Some(feed) = &self.feed {
                if let Err(e) = feed.publish(&updated).await {
                    tracing::warn!(signal_id = %updated.id, error = %e, "Failed to publish signal");
                }
            }
        }

        Ok(updated)
    }

    pub async fn list_for_bot(&self, bot_id: Uuid, page: Page) -> Result<Paginated<Signal>> {
        self.list(SignalQuery {
            bot_id: Some(bot_id),
            page,
            ..Default::default()
        })
        .await
    }

    pub async fn list(&self, query: SignalQuery) -> Result<Paginated<Signal>> {
        self.store.list_signals(&query).await
    }
}
