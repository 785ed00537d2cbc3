//! Ingestion from external sources
//!
//! Collects raw metrics from:
//! - Binance 24h ticker snapshot (market data)
//! - Dune analytics query results (on-chain metrics)
//! - Public Ethereum transactions dataset through a SQL query engine
//!
//! Every source follows the same contract: fetch raw records, normalize them
//! into the target table's shape, then [`ingest`] coerces, validates and
//! appends them. Fetch failures propagate untouched; nothing is retried.

pub mod analytics;
pub mod binance;
pub mod bigquery;
pub mod public_dataset;


pub use analytics::AnalyticsSource;
pub use binance::TickerSource;
pub use bigquery::BigQueryEngine;
pub use public_dataset::{PublicDatasetSource, QueryColumn, QueryEngine, QueryResult, QueryValue};

use crate::error::{PipelineError, Result};
use crate::rowset::RowSet;
use crate::schema::{self, LogicalTable};
use crate::telemetry::RunContext;
use crate::warehouse::{provision, Warehouse, WriteMode};
use async_trait::async_trait;
use reqwest::Response;
use tracing::{info, Instrument};

/// External source of raw metrics for one table
#[async_trait]
pub trait Source: Send + Sync {
    /// Raw records as returned by the upstream API
    type Raw: Send;

    /// Source name, used as the stage name in logs
    fn name(&self) -> &str;

    /// Table the normalized rows are written to
    fn table(&self) -> LogicalTable;

    async fn fetch(&self) -> Result<Self::Raw>;

    /// Reshape raw records into the table's columns. Shape problems are left
    /// for validation to report.
    fn normalize(&self, raw: Self::Raw) -> Result<RowSet>;
}

/// Provision the target table, fetch, normalize, validate and append.
/// Returns the number of rows written.
pub async fn ingest<S, W>(ctx: &RunContext, warehouse: &W, source: &S) -> Result<usize>
where
    S: Source + ?Sized,
    W: Warehouse + ?Sized,
{
    let table = ctx.table(source.table());
    let table_schema = source.table().schema();
    provision(warehouse, &table, &table_schema).await?;

    info!("Fetching data from {}", source.name());
    let raw = source.fetch().await?;
    let mut rows = source.normalize(raw)?;
    if rows.is_empty() && rows.columns().is_empty() {
        // Nothing fetched: still a well-formed (empty) batch
        rows = RowSet::new(table_schema.names());
    }

    let rows = schema::coerce(rows, &table_schema)?;
    let rows = schema::validate(&rows, &table_schema)?;
    warehouse.write(&rows, &table, WriteMode::Append).await?;

    info!("Ingested {} rows from {} into {}", rows.len(), source.name(), table);
    Ok(rows.len())
}

/// Object-safe view of a [`Source`], so the driver can hold any of them
#[async_trait]
pub trait Ingest: Send + Sync {
    fn stage_name(&self) -> &str;

    async fn run(&self, ctx: &RunContext, warehouse: &dyn Warehouse) -> Result<usize>;
}

#[async_trait]
impl<S: Source> Ingest for S {
    fn stage_name(&self) -> &str {
        self.name()
    }

    async fn run(&self, ctx: &RunContext, warehouse: &dyn Warehouse) -> Result<usize> {
        ingest(ctx, warehouse, self)
            .instrument(ctx.stage_span(self.name()))
            .await
    }
}

/// Turn a non-success HTTP status into a fetch error carrying the body
pub(crate) async fn check_status(source: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(PipelineError::Fetch(format!(
        "{} returned {}: {}",
        source,
        status,
        truncate(&body, 200)
    )))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}
