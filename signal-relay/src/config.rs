use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

const BINANCE_LIVE_URL: &str = "https://api.binance.com";
const BINANCE_TESTNET_URL: &str = "https://testnet.binance.vision";

/// Runtime settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expires_in: Duration,
    pub crypto_secret_key: String,
    pub binance_base_url: String,
    pub binance_test_mode: bool,
    pub binance_timeout: Duration,
    pub order_quantity: f64,
    pub cors_origin: String,
    pub rate_limit_per_minute: u32,
    pub public_base_url: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. `from_env` is the usual entry point.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let binance_test_mode = parse(&lookup, "BINANCE_TEST_MODE", false)?;
        let binance_base_url = match lookup("BINANCE_BASE_URL") {
            Some(url) => url,
            None if binance_test_mode => BINANCE_TESTNET_URL.to_string(),
            None => BINANCE_LIVE_URL.to_string(),
        };

        let order_quantity: f64 = parse(&lookup, "ORDER_QUANTITY", 0.01)?;
        if !(order_quantity.is_finite() && order_quantity > 0.0) {
            return Err(Error::Config("ORDER_QUANTITY must be positive".to_string()));
        }

        let rate_limit_per_minute = parse(&lookup, "RATE_LIMIT_PER_MINUTE", 100u32)?;
        if rate_limit_per_minute == 0 {
            return Err(Error::Config("RATE_LIMIT_PER_MINUTE must be non-zero".to_string()));
        }

        let log_format = match var("LOG_FORMAT", "pretty").to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Config {
            bind_addr: parse(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 5000)))?,
            database_url: var("DATABASE_URL", "postgres://localhost/signal_relay"),
            redis_url: lookup("REDIS_URL").filter(|url| !url.is_empty()),
            jwt_secret: var("JWT_SECRET", "your-secret-key-for-development"),
            jwt_expires_in: Duration::from_secs(parse(&lookup, "JWT_EXPIRES_IN_SECS", 7 * 24 * 3600u64)?),
            crypto_secret_key: var("CRYPTO_SECRET_KEY", "your-crypto-secret-key-for-development"),
            binance_base_url: binance_base_url.trim_end_matches('/').to_string(),
            binance_test_mode,
            binance_timeout: Duration::from_secs(parse(&lookup, "BINANCE_TIMEOUT_SECS", 10u64)?),
            order_quantity,
            cors_origin: var("CORS_ORIGIN", "*"),
            rate_limit_per_minute,
            public_base_url: var("PUBLIC_BASE_URL", "http://localhost:5000")
                .trim_end_matches('/')
                .to_string(),
            log_format,
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == "memory"
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {}: {}", key, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.bind_addr.port(), 5000);
        assert_eq!(config.binance_base_url, BINANCE_LIVE_URL);
        assert_eq!(config.order_quantity, 0.01);
        assert_eq!(config.rate_limit_per_minute, 100);
        assert_eq!(config.jwt_expires_in, Duration::from_secs(604800));
        assert!(config.redis_url.is_none());
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_test_mode_switches_to_testnet() {
        let config = config_from(&[("BINANCE_TEST_MODE", "true")]).unwrap();
        assert_eq!(config.binance_base_url, BINANCE_TESTNET_URL);

        let config = config_from(&[
            ("BINANCE_TEST_MODE", "true"),
            ("BINANCE_BASE_URL", "http://127.0.0.1:9000/"),
        ])
        .unwrap();
        assert_eq!(config.binance_base_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_rejects_bad_numbers() {
        assert!(matches!(
            config_from(&[("ORDER_QUANTITY", "abc")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config_from(&[("ORDER_QUANTITY", "-1")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config_from(&[("RATE_LIMIT_PER_MINUTE", "0")]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_memory_store_selection() {
        let config = config_from(&[("DATABASE_URL", "memory")]).unwrap();
        assert!(config.uses_memory_store());
    }
}
