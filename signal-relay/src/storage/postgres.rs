use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, Executor, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{SignalQuery, Store, TradeQuery};
use crate::{
    execution::{OrderSide, OrderType},
    models::{Bot, BotStats, Page, Paginated, Pagination, Signal, Trade, User},
    Error, Result,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id UUID PRIMARY KEY,
    email VARCHAR(255) NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    name VARCHAR(255) NOT NULL,
    api_key TEXT,
    api_secret TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS bots (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name VARCHAR(255) NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    pairs TEXT[] NOT NULL,
    webhook_uuid UUID NOT NULL UNIQUE,
    secret TEXT NOT NULL,
    status VARCHAR(10) NOT NULL,
    signals_count BIGINT NOT NULL DEFAULT 0,
    executed_count BIGINT NOT NULL DEFAULT 0,
    failed_count BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_bots_user_id ON bots(user_id);

CREATE TABLE IF NOT EXISTS signals (
    id UUID PRIMARY KEY,
    bot_id UUID NOT NULL REFERENCES bots(id) ON DELETE CASCADE,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    action VARCHAR(10) NOT NULL,
    symbol VARCHAR(100) NOT NULL,
    exchange VARCHAR(50) NOT NULL,
    price DOUBLE PRECISION,
    status VARCHAR(20) NOT NULL,
    execution_details JSONB NOT NULL DEFAULT '{}',
    raw_payload JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_signals_bot_created ON signals(bot_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_signals_user_created ON signals(user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_signals_status ON signals(status);

CREATE TABLE IF NOT EXISTS trades (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    bot_id UUID NOT NULL REFERENCES bots(id) ON DELETE CASCADE,
    signal_id UUID NOT NULL REFERENCES signals(id) ON DELETE CASCADE,
    order_id VARCHAR(64) NOT NULL,
    symbol VARCHAR(50) NOT NULL,
    order_type VARCHAR(10) NOT NULL,
    side VARCHAR(4) NOT NULL,
    quantity DOUBLE PRECISION NOT NULL,
    price DOUBLE PRECISION,
    status VARCHAR(20) NOT NULL,
    execution_details JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_trades_user_created ON trades(user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_trades_bot_created ON trades(bot_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_trades_signal_id ON trades(signal_id);
CREATE INDEX IF NOT EXISTS idx_trades_order_id ON trades(order_id);
"#;

const BOT_COLUMNS: &str = "id, user_id, name, description, pairs, webhook_uuid, secret, status, \
     signals_count, executed_count, failed_count, created_at, updated_at";
const SIGNAL_COLUMNS: &str = "id, bot_id, user_id, action, symbol, exchange, price, status, \
     execution_details, raw_payload, created_at, updated_at";
const TRADE_COLUMNS: &str = "id, user_id, bot_id, signal_id, order_id, symbol, order_type, side, \
     quantity, price, status, execution_details, created_at";

#[derive(Debug, sqlx::FromRow)]
struct UserRecord {
    id: Uuid,
    email: String,
    password_hash: String,
    name: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRecord> for User {
    fn from(r: UserRecord) -> Self {
        User {
            id: r.id,
            email: r.email,
            password_hash: r.password_hash,
            name: r.name,
            api_key: r.api_key,
            api_secret: r.api_secret,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BotRecord {
    id: Uuid,
    user_id: Uuid,
    name: String,
    description: String,
    pairs: Vec<String>,
    webhook_uuid: Uuid,
    secret: String,
    status: String,
    signals_count: i64,
    executed_count: i64,
    failed_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BotRecord> for Bot {
    type Error = Error;

    fn try_from(r: BotRecord) -> Result<Self> {
        Ok(Bot {
            id: r.id,
            user_id: r.user_id,
            name: r.name,
            description: r.description,
            pairs: r.pairs,
            webhook_uuid: r.webhook_uuid,
            secret: r.secret,
            status: r.status.parse().map_err(corrupt)?,
            stats: BotStats {
                signals: r.signals_count,
                executed: r.executed_count,
                failed: r.failed_count,
            },
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SignalRecord {
    id: Uuid,
    bot_id: Uuid,
    user_id: Uuid,
    action: String,
    symbol: String,
    exchange: String,
    price: Option<f64>,
    status: String,
    execution_details: serde_json::Value,
    raw_payload: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SignalRecord> for Signal {
    type Error = Error;

    fn try_from(r: SignalRecord) -> Result<Self> {
        Ok(Signal {
            id: r.id,
            bot_id: r.bot_id,
            user_id: r.user_id,
            action: r.action.parse().map_err(corrupt)?,
            symbol: r.symbol,
            exchange: r.exchange,
            price: r.price,
            status: r.status.parse().map_err(corrupt)?,
            execution_details: r.execution_details,
            raw_payload: r.raw_payload,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TradeRecord {
    id: Uuid,
    user_id: Uuid,
    bot_id: Uuid,
    signal_id: Uuid,
    order_id: String,
    symbol: String,
    order_type: String,
    side: String,
    quantity: f64,
    price: Option<f64>,
    status: String,
    execution_details: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<TradeRecord> for Trade {
    type Error = Error;

    fn try_from(r: TradeRecord) -> Result<Self> {
        Ok(Trade {
            id: r.id,
            user_id: r.user_id,
            bot_id: r.bot_id,
            signal_id: r.signal_id,
            order_id: r.order_id,
            symbol: r.symbol,
            order_type: OrderType::parse(&r.order_type)?,
            side: OrderSide::parse(&r.side)?,
            quantity: r.quantity,
            price: r.price,
            status: r.status,
            execution_details: r.execution_details,
            created_at: r.created_at,
        })
    }
}

fn corrupt(e: Error) -> Error {
    Error::Internal(format!("Corrupt row: {}", e))
}

fn push_signal_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, query: &SignalQuery) {
    builder.push(" WHERE TRUE");
    if let Some(user_id) = query.user_id {
        builder.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(bot_id) = query.bot_id {
        builder.push(" AND bot_id = ").push_bind(bot_id);
    }
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
}

fn push_trade_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, query: &TradeQuery) {
    builder.push(" WHERE TRUE");
    if let Some(user_id) = query.user_id {
        builder.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(bot_id) = query.bot_id {
        builder.push(" AND bot_id = ").push_bind(bot_id);
    }
}

/// Newest first. `id` breaks ties so pages never overlap.
fn push_page<'a>(builder: &mut QueryBuilder<'a, Postgres>, page: Page) {
    builder
        .push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(i64::from(page.limit))
        .push(" OFFSET ")
        .push_bind(page.offset() as i64);
}

pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn initialize(&self) -> Result<()> {
        self.pool.execute(SCHEMA).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for Database {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, name, api_key, api_secret, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(&user.api_key)
        .bind(&user.api_secret)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(Error::Conflict("User already exists".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record.map(User::from))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record.map(User::from))
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET name = $2, password_hash = $3, api_key = $4, api_secret = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(&user.api_key)
        .bind(&user.api_secret)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_bot(&self, bot: &Bot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bots (id, user_id, name, description, pairs, webhook_uuid, secret, status,
                              signals_count, executed_count, failed_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(bot.id)
        .bind(bot.user_id)
        .bind(&bot.name)
        .bind(&bot.description)
        .bind(&bot.pairs)
        .bind(bot.webhook_uuid)
        .bind(&bot.secret)
        .bind(bot.status.as_str())
        .bind(bot.stats.signals)
        .bind(bot.stats.executed)
        .bind(bot.stats.failed)
        .bind(bot.created_at)
        .bind(bot.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_bots(&self, user_id: Uuid) -> Result<Vec<Bot>> {
        let records = sqlx::query_as::<_, BotRecord>(&format!(
            "SELECT {} FROM bots WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
            BOT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Bot::try_from).collect()
    }

    async fn find_bot(&self, id: Uuid, user_id: Uuid) -> Result<Option<Bot>> {
        let record = sqlx::query_as::<_, BotRecord>(&format!(
            "SELECT {} FROM bots WHERE id = $1 AND user_id = $2",
            BOT_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Bot::try_from).transpose()
    }

    async fn find_bot_by_webhook(&self, webhook_uuid: Uuid) -> Result<Option<Bot>> {
        let record = sqlx::query_as::<_, BotRecord>(&format!(
            "SELECT {} FROM bots WHERE webhook_uuid = $1",
            BOT_COLUMNS
        ))
        .bind(webhook_uuid)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Bot::try_from).transpose()
    }

    async fn update_bot(&self, bot: &Bot) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bots
            SET name = $3, description = $4, pairs = $5, status = $6, updated_at = $7
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(bot.id)
        .bind(bot.user_id)
        .bind(&bot.name)
        .bind(&bot.description)
        .bind(&bot.pairs)
        .bind(bot.status.as_str())
        .bind(bot.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn rotate_secret(&self, id: Uuid, user_id: Uuid, secret: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE bots SET secret = $3, updated_at = NOW() WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .bind(secret)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_bot(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bots WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_bot_stats(&self, id: Uuid, delta: BotStats) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bots
            SET signals_count = signals_count + $2,
                executed_count = executed_count + $3,
                failed_count = failed_count + $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(delta.signals)
        .bind(delta.executed)
        .bind(delta.failed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_signal(&self, signal: &Signal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signals (id, bot_id, user_id, action, symbol, exchange, price, status,
                                 execution_details, raw_payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(signal.id)
        .bind(signal.bot_id)
        .bind(signal.user_id)
        .bind(signal.action.as_str())
        .bind(&signal.symbol)
        .bind(&signal.exchange)
        .bind(signal.price)
        .bind(signal.status.as_str())
        .bind(&signal.execution_details)
        .bind(&signal.raw_payload)
        .bind(signal.created_at)
        .bind(signal.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_signal(&self, signal: &Signal) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE signals
            SET status = $2, execution_details = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(signal.id)
        .bind(signal.status.as_str())
        .bind(&signal.execution_details)
        .bind(signal.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_signals(&self, query: &SignalQuery) -> Result<Paginated<Signal>> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM signals");
        push_signal_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {} FROM signals", SIGNAL_COLUMNS));
        push_signal_filters(&mut select, query);
        push_page(&mut select, query.page);

        let records: Vec<SignalRecord> = select.build_query_as().fetch_all(&self.pool).await?;
        let items = records
            .into_iter()
            .map(Signal::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Paginated {
            items,
            pagination: Pagination::new(query.page, total as u64),
        })
    }

    async fn insert_trade(&self, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (id, user_id, bot_id, signal_id, order_id, symbol, order_type, side,
                                quantity, price, status, execution_details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(trade.id)
        .bind(trade.user_id)
        .bind(trade.bot_id)
        .bind(trade.signal_id)
        .bind(&trade.order_id)
        .bind(&trade.symbol)
        .bind(trade.order_type.as_str())
        .bind(trade.side.as_str())
        .bind(trade.quantity)
        .bind(trade.price)
        .bind(&trade.status)
        .bind(&trade.execution_details)
        .bind(trade.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_trades(&self, query: &TradeQuery) -> Result<Paginated<Trade>> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM trades");
        push_trade_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {} FROM trades", TRADE_COLUMNS));
        push_trade_filters(&mut select, query);
        push_page(&mut select, query.page);

        let records: Vec<TradeRecord> = select.build_query_as().fetch_all(&self.pool).await?;
        let items = records
            .into_iter()
            .map(Trade::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Paginated {
            items,
            pagination: Pagination::new(query.page, total as u64),
        })
    }
}
