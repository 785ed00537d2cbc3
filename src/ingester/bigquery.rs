//! BigQuery REST query engine
//!
//! Uses the synchronous `jobs.query` call with a pre-issued bearer token.
//! Cells arrive as strings tagged by the result schema: NUMERIC values as
//! decimal strings, BYTES as base64 and TIMESTAMP as epoch seconds.

use super::check_status;
use super::public_dataset::{QueryColumn, QueryEngine, QueryResult, QueryValue};
use crate::config::{resolve_credential, PublicDatasetConfig, BIGQUERY_TOKEN_ENV};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use base64::Engine as _;
use chrono::DateTime;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub struct BigQueryEngine {
    http: Client,
    endpoint: String,
    project_id: String,
    access_token: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    max_results: u32,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableField>,
}

#[derive(Debug, Deserialize)]
struct TableField {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    v: serde_json::Value,
}

impl BigQueryEngine {
    /// `project_id` is the project billed for the query
    pub fn new(config: &PublicDatasetConfig, project_id: &str) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project_id: config
                .billing_project
                .clone()
                .unwrap_or_else(|| project_id.to_string()),
            access_token: config.access_token.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl QueryEngine for BigQueryEngine {
    async fn query(&self, sql: &str, max_rows: u32) -> Result<QueryResult> {
        let token = resolve_credential(self.access_token.as_deref(), BIGQUERY_TOKEN_ENV)?;
        let url = format!("{}/projects/{}/queries", self.endpoint, self.project_id);
        info!("Querying public dataset billed to {}", self.project_id);

        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            max_results: max_rows,
            timeout_ms: self.timeout.as_millis() as u64,
        };
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;
        let body: QueryResponse = check_status("BigQuery", resp).await?.json().await?;

        parse_response(body)
    }
}

fn parse_response(body: QueryResponse) -> Result<QueryResult> {
    if !body.job_complete {
        return Err(PipelineError::Fetch(
            "BigQuery job did not complete within the request timeout".to_string(),
        ));
    }

    let fields = body.schema.map(|s| s.fields).unwrap_or_default();
    let mut columns: Vec<QueryColumn> = fields
        .iter()
        .map(|f| QueryColumn {
            name: f.name.clone(),
            values: Vec::with_capacity(body.rows.len()),
        })
        .collect();

    for row in body.rows {
        if row.f.len() != fields.len() {
            return Err(PipelineError::Fetch(format!(
                "BigQuery row has {} cells, schema has {} fields",
                row.f.len(),
                fields.len()
            )));
        }
        for ((column, field), cell) in columns.iter_mut().zip(&fields).zip(row.f) {
            column.values.push(parse_cell(&field.field_type, cell.v)?);
        }
    }

    Ok(QueryResult { columns })
}

fn parse_cell(field_type: &str, raw: serde_json::Value) -> Result<QueryValue> {
    let text = match raw {
        serde_json::Value::Null => return Ok(QueryValue::Null),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    };
    let bad = |what: &str| PipelineError::Fetch(format!("invalid {} cell {:?}", what, text));

    let value = match field_type {
        "INTEGER" | "INT64" => QueryValue::Int(text.parse().map_err(|_| bad("INT64"))?),
        "FLOAT" | "FLOAT64" => QueryValue::Float(text.parse().map_err(|_| bad("FLOAT64"))?),
        "NUMERIC" | "BIGNUMERIC" | "DECIMAL" | "BIGDECIMAL" => QueryValue::Decimal(
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map_err(|_| bad("NUMERIC"))?,
        ),
        "BOOLEAN" | "BOOL" => QueryValue::Bool(text.eq_ignore_ascii_case("true")),
        "BYTES" => QueryValue::Bytes(
            base64::engine::general_purpose::STANDARD
                .decode(&text)
                .map_err(|_| bad("BYTES"))?,
        ),
        "TIMESTAMP" => {
            let secs: f64 = text.parse().map_err(|_| bad("TIMESTAMP"))?;
            let micros = (secs * 1_000_000.0).round() as i64;
            QueryValue::Timestamp(DateTime::from_timestamp_micros(micros).ok_or_else(|| bad("TIMESTAMP"))?)
        }
        _ => QueryValue::String(text.clone()),
    };
    Ok(value)
}
