use std::sync::Arc;

use uuid::Uuid;

use crate::crypto::generate_secret;
use crate::models::{Bot, BotUpdate};
use crate::storage::Store;
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct NewBot {
    pub name: String,
    pub description: Option<String>,
    pub pairs: Vec<String>,
}

fn check_name(name: &str, errors: &mut Vec<String>) {
    if name.trim().is_empty() {
        errors.push("\"name\" is not allowed to be empty".to_string());
    }
}

fn check_pairs(pairs: &[String], errors: &mut Vec<String>) {
    if pairs.is_empty() {
        errors.push("\"pairs\" must contain at least 1 items".to_string());
    } else if pairs.iter().any(|p| p.trim().is_empty()) {
        errors.push("\"pairs\" must not contain empty symbols".to_string());
    }
}

fn finish(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors))
    }
}

/// Owner-scoped bot management.
///
/// Every lookup takes the caller's id; a bot owned by someone else is
/// reported as `NotFound`, the same as one that does not exist.
#[derive(Clone)]
pub struct BotRegistry {
    store: Arc<dyn Store>,
}

impl BotRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, owner: Uuid, new: NewBot) -> Result<Bot> {
        let mut errors = Vec::new();
        check_name(&new.name, &mut errors);
        check_pairs(&new.pairs, &mut errors);
        finish(errors)?;

        let bot = Bot::new(
            owner,
            new.name,
            new.description.unwrap_or_default(),
            new.pairs,
            generate_secret(),
        );
        self.store.insert_bot(&bot).await?;

        tracing::info!(bot_id = %bot.id, user_id = %owner, webhook = %bot.webhook_uuid, "Bot created");
        Ok(bot)
    }

    pub async fn list(&self, owner: Uuid) -> Result<Vec<Bot>> {
        self.store.list_bots(owner).await
    }

    pub async fn get(&self, id: Uuid, owner: Uuid) -> Result<Bot> {
        self.store
            .find_bot(id, owner)
            .await?
            .ok_or_else(|| Error::NotFound("Bot not found".to_string()))
    }

    pub async fn update(&self, id: Uuid, owner: Uuid, update: BotUpdate) -> Result<Bot> {
        let mut errors = Vec::new();
        if let Some(name) = &update.name {
            check_name(name, &mut errors);
        }
        if let Some(pairs) = &update.pairs {
            check_pairs(pairs, &mut errors);
        }
        finish(errors)?;

        let updated = self.get(id, owner).await?.apply(update);
        self.save(&updated).await?;
        // re-read so a concurrent rotation is reflected
        let updated = self.get(id, owner).await?;

        tracing::info!(bot_id = %id, status = updated.status.as_str(), "Bot updated");
        Ok(updated)
    }

    pub async fn delete(&self, id: Uuid, owner: Uuid) -> Result<()> {
        if !self.store.delete_bot(id, owner).await? {
            return Err(Error::NotFound("Bot not found".to_string()));
        }

        tracing::info!(bot_id = %id, "Bot deleted");
        Ok(())
    }

    /// Replace the webhook secret. The old one stops working immediately.
    pub async fn regenerate_secret(&self, id: Uuid, owner: Uuid) -> Result<Bot> {
        if !self.store.rotate_secret(id, owner, &generate_secret()).await? {
            return Err(Error::NotFound("Bot not found".to_string()));
        }

        tracing::info!(bot_id = %id, "Bot secret regenerated");
        self.get(id, owner).await
    }

    /// Unscoped lookup by public webhook id
    pub async fn find_by_webhook(&self, webhook_uuid: Uuid) -> Result<Option<Bot>> {
        self.store.find_bot_by_webhook(webhook_uuid).await
    }

    async fn save(&self, bot: &Bot) -> Result<()> {
        if self.store.update_bot(bot).await? {
            Ok(())
        } else {
            Err(Error::NotFound("Bot not found".to_string()))
        }
    }
}
