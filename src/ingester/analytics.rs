//! Dune analytics query results
//!
//! Fetches the latest result rows of a saved query. The API key is resolved
//! on every fetch, before any request is made.

use super::{check_status, Source};
use crate::config::{resolve_credential, AnalyticsConfig, DUNE_API_KEY_ENV};
use crate::error::Result;
use crate::rowset::RowSet;
use crate::schema::LogicalTable;
use crate::telemetry::mask;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

pub const API_KEY_HEADER: &str = "X-Dune-API-Key";

pub struct AnalyticsSource {
    http: Client,
    endpoint: String,
    query_id: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    result: Option<QueryResultBody>,
}

#[derive(Debug, Deserialize)]
struct QueryResultBody {
    #[serde(default)]
    rows: Vec<serde_json::Value>,
}

impl AnalyticsSource {
    pub fn new(config: &AnalyticsConfig, query_id: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            query_id: query_id.to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn results_url(&self) -> String {
        format!(
            "{}/{}/results",
            self.endpoint.trim_end_matches('/'),
            self.query_id
        )
    }
}

#[async_trait]
impl Source for AnalyticsSource {
    type Raw = Vec<serde_json::Value>;

    fn name(&self) -> &str {
        "onchain_query_ingest"
    }

    fn table(&self) -> LogicalTable {
        LogicalTable::OnchainQueryMetrics
    }

    async fn fetch(&self) -> Result<Self::Raw> {
        let api_key = resolve_credential(self.api_key.as_deref(), DUNE_API_KEY_ENV)?;
        info!("Fetching data from Dune query {} (key {})", self.query_id, mask(&api_key));

        let resp = self
            .http
            .get(self.results_url())
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;
        let body: QueryResponse = check_status("Dune", resp).await?.json().await?;

        let rows = body.result.map(|r| r.rows).unwrap_or_default();
        debug!("Received {} rows", rows.len());
        Ok(rows)
    }

    fn normalize(&self, raw: Self::Raw) -> Result<RowSet> {
        Ok(normalize_query_rows(&raw))
    }
}

/// Query rows carry their time as `time`; the table calls it `timestamp`
pub fn normalize_query_rows(raw: &[serde_json::Value]) -> RowSet {
    let mut rows = RowSet::from_json_records(raw);
    if !rows.has_column("timestamp") {
        rows.rename_column("time", "timestamp");
    }
    rows
}
