use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::execution::{OrderFill, OrderSide, OrderType};
use crate::models::{BotStats, Paginated, Signal, Trade};
use crate::storage::{Store, TradeQuery};
use crate::Result;

/// Records filled orders and keeps bot counters in step with outcomes
#[derive(Clone)]
pub struct TradeLedger {
    store: Arc<dyn Store>,
}

impl TradeLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Store a trade for an order the exchange accepted
    pub async fn record_fill(
        &self,
        signal: &Signal,
        symbol: &str,
        side: OrderSide,
        fill: &OrderFill,
    ) -> Result<Trade> {
        let trade = Trade {
            id: Uuid::new_v4(),
            user_id: signal.user_id,
            bot_id: signal.bot_id,
            signal_id: signal.id,
            order_id: fill.order_id.clone(),
            symbol: symbol.to_string(),
            order_type: OrderType::Market,
            side,
            quantity: fill.executed_quantity,
            price: fill.average_price.or(signal.price),
            status: fill.status.clone(),
            execution_details: fill.details.clone(),
            created_at: Utc::now(),
        };
        self.store.insert_trade(&trade).await?;

        tracing::info!(
            trade_id = %trade.id,
            signal_id = %signal.id,
            order_id = %trade.order_id,
            symbol,
            quantity = trade.quantity,
            "Trade recorded"
        );

        Ok(trade)
    }

    /// Bump a bot's counters by `delta`
    pub async fn record_outcome(&self, bot_id: Uuid, delta: BotStats) -> Result<()> {
        self.store.increment_bot_stats(bot_id, delta).await
    }

    pub async fn list(&self, query: TradeQuery) -> Result<Paginated<Trade>> {
        self.store.list_trades(&query).await
    }
}
