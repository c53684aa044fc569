pub mod accounts;
pub mod api;
pub mod auth;
pub mod bots;
pub mod config;
pub mod crypto;
pub mod execution;
pub mod ledger;
pub mod models;
pub mod pipeline;
pub mod signals;
pub mod storage;

pub use accounts::Accounts;
pub use bots::BotRegistry;
pub use config::Config;
pub use crypto::CredentialCipher;
pub use execution::{BinanceGateway, ExchangeGateway, FixedQuantity, PositionSizer};
pub use ledger::TradeLedger;
pub use pipeline::{Acceptance, ProcessingOutcome, WebhookPipeline};
pub use signals::{SignalFeed, SignalRecorder};
pub use storage::{Database, MemoryStore, Store};

use models::SignalStatus;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error")]
    Validation(Vec<String>),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Invalid signal transition from {from} to {to}")]
    InvalidTransition { from: SignalStatus, to: SignalStatus },

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(vec![message.into()])
    }
}

pub type Result<T> = std::result::Result<T, Error>;
