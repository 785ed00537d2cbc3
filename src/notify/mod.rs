//! Telegram notification module
//!
//! Sends one summary message per run, counting the decisions and on-chain
//! anomalies currently stored in the warehouse.


use crate::config::{resolve_credential, TelegramConfig, TELEGRAM_CHAT_ID_ENV, TELEGRAM_TOKEN_ENV};
use crate::error::{PipelineError, Result};
use crate::rowset::{RowSet, Value};
use crate::schema::LogicalTable;
use crate::telemetry::{mask, RunContext};
use crate::warehouse::{TableId, Warehouse};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, Instrument};

/// Outbound messaging channel
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send `text` (Markdown) to `chat_id` using the bot `token`
    async fn send(&self, token: &str, chat_id: &str, text: &str) -> Result<()>;
}

/// Telegram Bot API messenger
#[derive(Clone)]
pub struct TelegramMessenger {
    http: Client,
    api_url: String,
}

#[derive(Debug, Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

impl TelegramMessenger {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, token: &str, chat_id: &str, text: &str) -> Result<()> {
        info!("Sending Telegram message to chat {} (token {})", mask(chat_id), mask(token));

        let url = format!("{}/bot{}/sendMessage", self.api_url, token);
        let msg = TelegramMessage {
            chat_id,
            text,
            parse_mode: "Markdown",
        };

        // The token is part of the URL; keep it out of transport errors
        let response = self
            .http
            .post(&url)
            .json(&msg)
            .send()
            .await
            .map_err(|e| PipelineError::Network(e.without_url()))?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Notify(format!("{}: {}", status, error_text)));
        }

        Ok(())
    }
}

/// Outcome of the notification stage
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationReport {
    pub summary: String,
    pub delivered: bool,
}

/// Count rows with any true `*anomaly*` flag. Without flag columns every
/// row counts as an incident.
pub fn count_incidents(anomalies: &RowSet) -> usize {
    let flag_columns: Vec<usize> = anomalies
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, name)| name.to_lowercase().contains("anomaly"))
        .map(|(idx, _)| idx)
        .collect();

    if flag_columns.is_empty() {
        return anomalies.len();
    }

    anomalies
        .rows()
        .iter()
        .filter(|row| flag_columns.iter().any(|&idx| row[idx] == Value::Bool(true)))
        .count()
}

/// The run summary sent to Telegram
pub fn build_summary(decisions: &RowSet, anomalies: &RowSet) -> String {
    let summary = format!(
        "📊 Scan terminé ! {} signaux, {} anomalies, {} incident(s) on-chain.",
        decisions.len(),
        anomalies.len(),
        count_incidents(anomalies)
    );
    info!("Summary built: {}", summary);
    summary
}

/// Read a table for the summary; a failed read counts as an empty table
async fn read_or_empty<W: Warehouse + ?Sized>(warehouse: &W, table: &TableId) -> RowSet {
    match warehouse.read(table).await {
        Ok(rows) => {
            info!("Fetched {} rows from {}", rows.len(), table);
            rows
        }
        Err(e) => {
            error!("Could not fetch {}: {}", table, e);
            RowSet::empty()
        }
    }
}

/// Build the summary from the current decision and anomaly tables
pub async fn collect_summary<W: Warehouse + ?Sized>(ctx: &RunContext, warehouse: &W) -> String {
    let decisions = read_or_empty(warehouse, &ctx.table(LogicalTable::MarketDecisionOutputs)).await;
    let anomalies = read_or_empty(warehouse, &ctx.table(LogicalTable::AnomalyAlertsOnchain)).await;
    build_summary(&decisions, &anomalies)
}

/// Send the run summary. Missing credentials fail the stage; a failed send
/// is only logged.
pub async fn run_notify<W: Warehouse + ?Sized>(
    ctx: &RunContext,
    warehouse: &W,
    messenger: &dyn Messenger,
    config: &TelegramConfig,
) -> Result<NotificationReport> {
    notify(ctx, warehouse, messenger, config)
        .instrument(ctx.stage_span("notify"))
        .await
}

async fn notify<W: Warehouse + ?Sized>(
    ctx: &RunContext,
    warehouse: &W,
    messenger: &dyn Messenger,
    config: &TelegramConfig,
) -> Result<NotificationReport> {
    let token = resolve_credential(config.bot_token.as_deref(), TELEGRAM_TOKEN_ENV);
    let chat_id = resolve_credential(config.chat_id.as_deref(), TELEGRAM_CHAT_ID_ENV);
    let (token, chat_id) = match (token, chat_id) {
        (Ok(token), Ok(chat_id)) => (token, chat_id),
        (Err(e), _) | (_, Err(e)) => {
            error!("Telegram credentials are required");
            return Err(e);
        }
    };

    let summary = collect_summary(ctx, warehouse).await;
    let delivered = match messenger.send(&token, &chat_id, &summary).await {
        Ok(()) => {
            info!("Telegram summary sent");
            true
        }
        Err(e) => {
            let e = match e {
                PipelineError::Notify(_) => e,
                other => PipelineError::Notify(other.to_string()),
            };
            error!("{}", e);
            false
        }
    };

    Ok(NotificationReport { summary, delivered })
}
