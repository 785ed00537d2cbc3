//! Binance 24h ticker snapshot
//!
//! One GET returns every symbol's rolling 24h statistics. There is no
//! pagination and no cursor: each run ingests a full snapshot.

use super::{check_status, Source};
use crate::config::MarketConfig;
use crate::error::Result;
use crate::rowset::{RowSet, Value};
use crate::schema::{millis_to_timestamp, LogicalTable};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const TICKER_COLUMNS: [&str; 4] = ["symbol", "priceChangePercent", "lastPrice", "closeTime"];

pub struct TickerSource {
    http: Client,
    endpoint: String,
}

impl TickerSource {
    pub fn new(config: &MarketConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl Source for TickerSource {
    type Raw = Vec<serde_json::Value>;

    fn name(&self) -> &str {
        "market_ingest"
    }

    fn table(&self) -> LogicalTable {
        LogicalTable::MarketRawMetrics
    }

    async fn fetch(&self) -> Result<Self::Raw> {
        let resp = self.http.get(&self.endpoint).send().await?;
        let tickers: Vec<serde_json::Value> = check_status("Binance", resp).await?.json().await?;
        debug!("Received {} rows", tickers.len());
        Ok(tickers)
    }

    fn normalize(&self, raw: Self::Raw) -> Result<RowSet> {
        normalize_tickers(&raw)
    }
}

/// Keep the ticker columns and turn the millisecond `closeTime` into a
/// timestamp. Prices stay strings here; coercion to float happens on ingest.
pub fn normalize_tickers(raw: &[serde_json::Value]) -> Result<RowSet> {
    let mut rows = RowSet::from_json_records(raw).project(&TICKER_COLUMNS);
    rows.map_column("closeTime", |value| match value {
        Value::Float(ms) => Value::from(millis_to_timestamp(*ms as i64)),
        Value::String(s) => Value::from(s.parse::<i64>().ok().and_then(millis_to_timestamp)),
        other => other.clone(),
    });
    Ok(rows)
}
