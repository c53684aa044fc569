//! Webhook ingestion: authenticate an alert, record it, and try to turn it
//! into an exchange order.
//!
//! The caller only learns whether the alert was *accepted*. What happened to
//! the order afterwards is a [`ProcessingOutcome`] that lives on the signal
//! record and in the bot counters, never in the HTTP status.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::execution::{exchange_symbol, is_valid_symbol, ExchangeGateway, PositionSizer};
use crate::ledger::TradeLedger;
use crate::models::{
    BotStats, NewSignal, Page, Paginated, Signal, SignalAction, SignalStatus, Trade, User,
    DEFAULT_EXCHANGE,
};
use crate::signals::SignalRecorder;
use crate::storage::Store;
use crate::{Error, Result};

const SECRET_FIELD: &str = "secret";
const NO_KEYS: &str = "No API keys configured";

/// A validated alert body
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub action: SignalAction,
    pub instrument: String,
    pub exchange: String,
    pub trigger_price: Option<f64>,
    /// The original body without its secret
    pub raw: Value,
}

fn non_empty_str<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Accepts `"50000"`, `50000` and `50000.5`; anything else is treated as absent.
fn parse_price(value: Option<&Value>) -> Option<f64> {
    let price = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    price.filter(|p| p.is_finite())
}

impl Alert {
    /// The shared secret carried in the body, if any
    pub fn secret(payload: &Value) -> Option<&str> {
        payload
            .get(SECRET_FIELD)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn from_payload(payload: &Value) -> Result<Self> {
        let Some(body) = payload.as_object() else {
            return Err(Error::validation("Invalid webhook payload"));
        };

        let mut errors = Vec::new();
        let action = match non_empty_str(payload, "action") {
            Some(action) => match action.parse::<SignalAction>() {
                Ok(action) => Some(action),
                Err(_) => {
                    errors.push(format!("\"action\" must be buy or sell, got {}", action));
                    None
                }
            },
            None => {
                errors.push("\"action\" is required".to_string());
                None
            }
        };
        let instrument = non_empty_str(payload, "tv_instrument");
        if instrument.is_none() {
            errors.push("\"tv_instrument\" is required".to_string());
        }

        let (Some(action), Some(instrument)) = (action, instrument) else {
            return Err(Error::Validation(errors));
        };

        let mut raw = body.clone();
        raw.remove(SECRET_FIELD);

        Ok(Alert {
            action,
            instrument: instrument.to_string(),
            exchange: non_empty_str(payload, "tv_exchange")
                .unwrap_or(DEFAULT_EXCHANGE)
                .to_string(),
            trigger_price: parse_price(payload.get("trigger_price")),
            raw: Value::Object(raw),
        })
    }
}

/// What became of an accepted alert
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingOutcome {
    Executed { trade_id: Uuid, order_id: String },
    Failed { error: String },
    /// Owner has no exchange credentials; nothing was sent
    Pending,
}

impl ProcessingOutcome {
    pub fn status(&self) -> SignalStatus {
        match self {
            ProcessingOutcome::Executed { .. } => SignalStatus::Executed,
            ProcessingOutcome::Failed { .. } => SignalStatus::Failed,
            ProcessingOutcome::Pending => SignalStatus::Pending,
        }
    }
}

/// Result of an alert that passed authentication and validation
#[derive(Debug, Clone, PartialEq)]
pub enum Acceptance {
    Recorded {
        signal_id: Uuid,
        outcome: ProcessingOutcome,
    },
    /// The signal could not be stored, so nothing was sent to the exchange
    Unrecorded { error: String },
}

impl Acceptance {
    pub fn outcome(&self) -> Option<&ProcessingOutcome> {
        match self {
            Acceptance::Recorded { outcome, .. } => Some(outcome),
            Acceptance::Unrecorded { .. } => None,
        }
    }
}

#[derive(Clone)]
pub struct WebhookPipeline {
    store: Arc<dyn Store>,
    recorder: SignalRecorder,
    ledger: TradeLedger,
    gateway: Arc<dyn ExchangeGateway>,
    sizer: Arc<dyn PositionSizer>,
}

impl WebhookPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        recorder: SignalRecorder,
        ledger: TradeLedger,
        gateway: Arc<dyn ExchangeGateway>,
        sizer: Arc<dyn PositionSizer>,
    ) -> Self {
        Self {
            store,
            recorder,
            ledger,
            gateway,
            sizer,
        }
    }

    /// Run one webhook delivery.
    ///
    /// Errors are only returned for rejections (auth, inactive bot, bad
    /// payload). Past validation the delivery is always accepted: a signal
    /// that cannot be stored comes back as `Unrecorded`, and every later
    /// failure is folded into the returned outcome.
    pub async fn accept(&self, webhook_id: &str, payload: Value) -> Result<Acceptance> {
        let Some(secret) = Alert::secret(&payload) else {
            tracing::warn!(webhook = webhook_id, "Webhook received without secret");
            return Err(Error::Unauthorized("No secret provided".to_string()));
        };

        let bot = match Uuid::parse_str(webhook_id) {
            Ok(uuid) => self.store.find_bot_by_webhook(uuid).await?,
            Err(_) => None,
        };
        let Some(bot) = bot else {
            tracing::warn!(webhook = webhook_id, "Webhook received for unknown bot");
            return Err(Error::NotFound("Bot not found".to_string()));
        };

        if secret != bot.secret {
            tracing::warn!(bot_id = %bot.id, "Invalid webhook secret");
            return Err(Error::Unauthorized("Invalid secret".to_string()));
        }

        if !bot.is_active() {
            tracing::warn!(bot_id = %bot.id, "Webhook received for inactive bot");
            return Err(Error::Forbidden("Bot is inactive".to_string()));
        }

        let Some(owner) = self.store.find_user(bot.user_id).await? else {
            tracing::error!(bot_id = %bot.id, user_id = %bot.user_id, "Bot owner not found");
            return Err(Error::Internal("Bot owner not found".to_string()));
        };

        let alert = Alert::from_payload(&payload).map_err(|e| {
            tracing::warn!(bot_id = %bot.id, error = %e, "Invalid webhook payload");
            e
        })?;

        let recorded = self
            .recorder
            .record(NewSignal {
                bot_id: bot.id,
                user_id: owner.id,
                action: alert.action,
                symbol: alert.instrument,
                exchange: alert.exchange,
                price: alert.trigger_price,
                raw_payload: alert.raw,
            })
            .await;
        let signal = match recorded {
            Ok(signal) => signal,
            Err(e) => {
                tracing::error!(bot_id = %bot.id, error = %e, "Failed to record signal");
                return Ok(Acceptance::Unrecorded {
                    error: e.to_string(),
                });
            }
        };

        let outcome = self.process(&signal, &owner).await;

        Ok(Acceptance::Recorded {
            signal_id: signal.id,
            outcome,
        })
    }

    async fn process(&self, signal: &Signal, owner: &User) -> ProcessingOutcome {
        if !owner.has_api_keys() {
            tracing::warn!(signal_id = %signal.id, user_id = %owner.id, "{}", NO_KEYS);
            if let Err(e) = self
                .recorder
                .transition(signal, SignalStatus::Pending, json!({ "error": NO_KEYS }))
                .await
            {
                tracing::error!(signal_id = %signal.id, error = %e, "Failed to mark signal pending");
            }
            return ProcessingOutcome::Pending;
        }

        let processing = match self
            .recorder
            .transition(signal, SignalStatus::Processing, json!({}))
            .await
        {
            Ok(processing) => processing,
            Err(e) => return self.fail(signal, e.to_string()).await,
        };

        match self.execute(&processing, owner).await {
            Ok((trade, details)) => {
                if let Err(e) = self
                    .recorder
                    .transition(&processing, SignalStatus::Executed, details)
                    .await
                {
                    tracing::error!(signal_id = %signal.id, error = %e, "Failed to mark signal executed");
                }
                self.count(signal.bot_id, BotStats::EXECUTED).await;

                ProcessingOutcome::Executed {
                    trade_id: trade.id,
                    order_id: trade.order_id,
                }
            }
            Err(error) => self.fail(&processing, error).await,
        }
    }

    /// Place the order and record the trade. Returns the trade and the
    /// execution details to store on the signal.
    async fn execute(
        &self,
        signal: &Signal,
        owner: &User,
    ) -> std::result::Result<(Trade, Value), String> {
        let symbol = exchange_symbol(&signal.symbol);
        if !is_valid_symbol(&symbol) {
            return Err(format!("Invalid symbol: {:?}", symbol));
        }
        let side = signal.action.side();
        let quantity = self.sizer.quantity(signal);

        let fill = self
            .gateway
            .execute_market_order(owner, &symbol, side, quantity)
            .await
            .map_err(|e| e.to_string())?;

        let trade = self
            .ledger
            .record_fill(signal, &symbol, side, &fill)
            .await
            .map_err(|e| format!("Order {} placed but trade not recorded: {}", fill.order_id, e))?;

        let details = json!({
            "success": true,
            "orderId": fill.order_id,
            "executedQty": fill.executed_quantity,
            "tradeId": trade.id,
            "details": fill.details,
        });
        Ok((trade, details))
    }

    async fn fail(&self, signal: &Signal, error: String) -> ProcessingOutcome {
        tracing::error!(signal_id = %signal.id, bot_id = %signal.bot_id, error = %error, "Signal execution failed");

        if let Err(e) = self
            .recorder
            .transition(
                signal,
                SignalStatus::Failed,
                json!({ "success": false, "error": error }),
            )
            .await
        {
            tracing::error!(signal_id = %signal.id, error = %e, "Failed to mark signal failed");
        }
        self.count(signal.bot_id, BotStats::FAILED).await;

        ProcessingOutcome::Failed { error }
    }

    async fn count(&self, bot_id: Uuid, delta: BotStats) {
        if let Err(e) = self.ledger.record_outcome(bot_id, delta).await {
            tracing::error!(bot_id = %bot_id, error = %e, "Failed to update bot counters");
        }
    }

    /// Signals of one bot, visible only to its owner
    pub async fn bot_signals(
        &self,
        bot_id: Uuid,
        caller: Uuid,
        page: Page,
    ) -> Result<Paginated<Signal>> {
        if self.store.find_bot(bot_id, caller).await?.is_none() {
            return Err(Error::NotFound("Bot not found".to_string()));
        }
        self.recorder.list_for_bot(bot_id, page).await
    }
}
