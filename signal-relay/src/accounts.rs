use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::auth::{self, TokenIssuer};
use crate::crypto::CredentialCipher;
use crate::execution::{Balance, ConnectionCheck, ExchangeGateway, GatewayError};
use crate::models::User;
use crate::storage::Store;
use crate::{Error, Result};

pub const MIN_PASSWORD_LEN: usize = 8;
const NO_KEYS: &str = "No API keys configured";

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// A signed-in user and their bearer token
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub token: String,
}

/// Minimal syntactic check: `local@domain.tld`, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_password(field: &str, password: &str, errors: &mut Vec<String>) {
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(format!(
            "\"{}\" length must be at least {} characters long",
            field, MIN_PASSWORD_LEN
        ));
    }
}

fn finish(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors))
    }
}

fn exchange_error(e: GatewayError) -> Error {
    match e {
        GatewayError::MissingCredentials => Error::validation(NO_KEYS),
        other => Error::Exchange(other.to_string()),
    }
}

async fn hash(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(|e| Error::Internal(format!("Hashing task failed: {}", e)))?
}

async fn verify(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || auth::verify_password(&password, &hash))
        .await
        .map_err(|e| Error::Internal(format!("Hashing task failed: {}", e)))?
}

/// User accounts, sessions and exchange credentials
#[derive(Clone)]
pub struct Accounts {
    store: Arc<dyn Store>,
    cipher: Arc<CredentialCipher>,
    tokens: TokenIssuer,
    gateway: Arc<dyn ExchangeGateway>,
}

impl Accounts {
    pub fn new(
        store: Arc<dyn Store>,
        cipher: Arc<CredentialCipher>,
        tokens: TokenIssuer,
        gateway: Arc<dyn ExchangeGateway>,
    ) -> Self {
        Self {
            store,
            cipher,
            tokens,
            gateway,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub async fn register(&self, registration: Registration) -> Result<Session> {
        let email = normalize_email(&registration.email);
        let name = registration.name.trim().to_string();

        let mut errors = Vec::new();
        if !is_valid_email(&email) {
            errors.push("\"email\" must be a valid email".to_string());
        }
        check_password("password", &registration.password, &mut errors);
        if name.is_empty() {
            errors.push("\"name\" is not allowed to be empty".to_string());
        }
        finish(errors)?;

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(Error::Conflict("User already exists".to_string()));
        }

        let password_hash = hash(registration.password).await?;
        let user = User::new(email, password_hash, name);
        self.store.insert_user(&user).await?;

        tracing::info!(user_id = %user.id, "User registered");

        let token = self.tokens.issue(&user)?;
        Ok(Session { user, token })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let invalid = || Error::Unauthorized("Invalid credentials".to_string());

        let Some(user) = self.store.find_user_by_email(&normalize_email(email)).await? else {
            return Err(invalid());
        };
        if !verify(password.to_string(), user.password_hash.clone()).await? {
            tracing::warn!(user_id = %user.id, "Failed login attempt");
            return Err(invalid());
        }

        let token = self.tokens.issue(&user)?;
        Ok(Session { user, token })
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<User> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or_else(|| Error::NotFound("User not found".to_string()))
    }

    pub async fn update_profile(&self, user_id: Uuid, name: &str) -> Result<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("\"name\" is not allowed to be empty"));
        }

        let user = User {
            name: name.to_string(),
            updated_at: Utc::now(),
            ..self.profile(user_id).await?
        };
        self.store.update_user(&user).await?;
        Ok(user)
    }

    pub async fn change_password(&self, user_id: Uuid, current: &str, new: &str) -> Result<()> {
        let mut errors = Vec::new();
        if current.is_empty() {
            errors.push("\"currentPassword\" is not allowed to be empty".to_string());
        }
        check_password("newPassword", new, &mut errors);
        finish(errors)?;

        let user = self.profile(user_id).await?;
        if !verify(current.to_string(), user.password_hash.clone()).await? {
            return Err(Error::Unauthorized("Current password is incorrect".to_string()));
        }

        let user = User {
            password_hash: hash(new.to_string()).await?,
            updated_at: Utc::now(),
            ..user
        };
        self.store.update_user(&user).await?;

        tracing::info!(user_id = %user_id, "Password changed");
        Ok(())
    }

    /// Store an exchange key pair, encrypted
    pub async fn set_api_keys(&self, user_id: Uuid, api_key: &str, api_secret: &str) -> Result<()> {
        let mut errors = Vec::new();
        if api_key.trim().is_empty() {
            errors.push("\"apiKey\" is not allowed to be empty".to_string());
        }
        if api_secret.trim().is_empty() {
            errors.push("\"apiSecret\" is not allowed to be empty".to_string());
        }
        finish(errors)?;

        let user = User {
            api_key: self.cipher.encrypt(Some(api_key.trim()))?,
            api_secret: self.cipher.encrypt(Some(api_secret.trim()))?,
            updated_at: Utc::now(),
            ..self.profile(user_id).await?
        };
        self.store.update_user(&user).await?;

        tracing::info!(user_id = %user_id, "API keys saved");
        Ok(())
    }

    pub async fn has_api_keys(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.profile(user_id).await?.has_api_keys())
    }

    async fn with_keys(&self, user_id: Uuid) -> Result<User> {
        let user = self.profile(user_id).await?;
        if !user.has_api_keys() {
            return Err(Error::validation(NO_KEYS));
        }
        Ok(user)
    }

    pub async fn balances(&self, user_id: Uuid) -> Result<Vec<Balance>> {
        let user = self.with_keys(user_id).await?;
        self.gateway.account_info(&user).await.map_err(exchange_error)
    }

    pub async fn open_orders(
        &self,
        user_id: Uuid,
        symbol: Option<&str>,
    ) -> Result<Vec<serde_json::Value>> {
        let user = self.with_keys(user_id).await?;
        self.gateway
            .open_orders(&user, symbol)
            .await
            .map_err(exchange_error)
    }

    /// Try a key pair against the exchange. With no candidate the stored pair
    /// is used. The inner result carries the exchange's verdict.
    pub async fn test_connection(
        &self,
        user_id: Uuid,
        candidate: Option<(String, String)>,
    ) -> Result<std::result::Result<ConnectionCheck, String>> {
        let (api_key, api_secret) = match candidate {
            Some(pair) => pair,
            None => {
                let user = self.with_keys(user_id).await?;
                match (
                    self.cipher.decrypt(user.api_key.as_deref())?,
                    self.cipher.decrypt(user.api_secret.as_deref())?,
                ) {
                    (Some(key), Some(secret)) => (key, secret),
                    _ => return Err(Error::validation(NO_KEYS)),
                }
            }
        };

        Ok(self
            .gateway
            .test_connection(&api_key, &api_secret)
            .await
            .map_err(|e| e.to_string()))
    }
}
