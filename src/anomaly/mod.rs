//! On-chain anomaly detection
//!
//! Raw transactions are rolled up per UTC day (total ETH moved, mean gas
//! price), then every day is compared against a threshold computed over the
//! whole batch of days: `mean + k * stddev`, population stddev. Each metric is
//! flagged on its own. The batch is recomputed from scratch every run, so a
//! day flagged today may not be flagged tomorrow.


use crate::config::AnomalyConfig;
use crate::error::Result;
use crate::rowset::{RowSet, Value};
use crate::schema::{self, LogicalTable};
use crate::telemetry::RunContext;
use crate::warehouse::{provision, Warehouse, WriteMode};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, info, Instrument};

/// Columns of a daily aggregate row
pub const AGGREGATE_COLUMNS: [&str; 3] = ["date", "eth_transferred", "gas_price_gwei"];

/// Whole-batch outlier threshold for one metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchThreshold {
    pub mean: f64,
    pub std_dev: f64,
    pub threshold: f64,
}

impl BatchThreshold {
    /// Population mean and stddev of `values`, threshold at `mean + sigma * stddev`.
    ///
    /// `None` for an empty batch. A single value has a stddev of zero.
    pub fn compute(values: &[f64], sigma: f64) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        Some(Self {
            mean,
            std_dev,
            threshold: mean + sigma * std_dev,
        })
    }

    /// Strictly above the threshold
    pub fn flags(&self, value: f64) -> bool {
        // zero spread: nothing stands out
        self.std_dev > 0.0 && value > self.threshold
    }
}

#[derive(Debug, Default)]
struct DailyTotals {
    eth_transferred: f64,
    gas_sum: f64,
    count: usize,
}

/// Roll raw on-chain rows up per UTC day: summed `eth_transferred`, mean
/// `gas_price_gwei`. Output is sorted by date.
///
/// Every column of `onchain_raw_metrics` must be present and non-null.
pub fn aggregate_daily(raw: &RowSet) -> Result<RowSet> {
    let raw_schema = LogicalTable::OnchainRawMetrics.schema();
    let raw = schema::validate(raw, &raw_schema)?;

    let mut days: BTreeMap<NaiveDate, DailyTotals> = BTreeMap::new();
    for idx in 0..raw.len() {
        let ts = raw.get(idx, "timestamp").and_then(Value::as_timestamp);
        let eth = raw.get(idx, "eth_transferred").and_then(Value::as_f64);
        let gas = raw.get(idx, "gas_price_gwei").and_then(Value::as_f64);
        let (Some(ts), Some(eth), Some(gas)) = (ts, eth, gas) else {
            continue;
        };

        let day = days.entry(ts.date_naive()).or_default();
        day.eth_transferred += eth;
        day.gas_sum += gas;
        day.count += 1;
    }

    let mut out = RowSet::new(AGGREGATE_COLUMNS);
    for (date, totals) in days {
        out.push_row(vec![
            Value::from(date),
            Value::from(totals.eth_transferred),
            Value::from(totals.gas_sum / totals.count as f64),
        ]);
    }
    Ok(out)
}

/// Flag each daily aggregate against its metric's batch threshold
pub fn detect_anomalies(daily: &RowSet, sigma: f64) -> Result<RowSet> {
    let input = LogicalTable::AnomalyAlertsOnchain.schema().select(&AGGREGATE_COLUMNS);
    let daily = schema::validate(daily, &input)?;

    let eth: Vec<f64> = metric(&daily, "eth_transferred");
    let gas: Vec<f64> = metric(&daily, "gas_price_gwei");
    let eth_threshold = BatchThreshold::compute(&eth, sigma);
    let gas_threshold = BatchThreshold::compute(&gas, sigma);
    debug!(?eth_threshold, ?gas_threshold, "Batch thresholds");

    let mut out = RowSet::new(LogicalTable::AnomalyAlertsOnchain.schema().names());
    for (row, (eth, gas)) in daily.rows().iter().zip(eth.iter().zip(&gas)) {
        let eth_flag = eth_threshold.map(|t| t.flags(*eth)).unwrap_or(false);
        let gas_flag = gas_threshold.map(|t| t.flags(*gas)).unwrap_or(false);
        out.push_row(vec![
            row[0].clone(),
            Value::from(*eth),
            Value::from(*gas),
            Value::from(eth_flag),
            Value::from(gas_flag),
        ]);
    }
    Ok(out)
}

fn metric(rows: &RowSet, name: &str) -> Vec<f64> {
    rows.column(name)
        .map(|col| col.filter_map(Value::as_f64).collect())
        .unwrap_or_default()
}

/// Read raw on-chain rows and return their daily aggregates. Writes nothing.
pub async fn run_onchain_indicators<W: Warehouse + ?Sized>(
    ctx: &RunContext,
    warehouse: &W,
) -> Result<RowSet> {
    onchain_indicators(ctx, warehouse)
        .instrument(ctx.stage_span("onchain_indicators"))
        .await
}

async fn onchain_indicators<W: Warehouse + ?Sized>(ctx: &RunContext, warehouse: &W) -> Result<RowSet> {
    info!("Running on-chain indicator job");
    let raw = warehouse.read(&ctx.table(LogicalTable::OnchainRawMetrics)).await?;
    let daily = aggregate_daily(&raw)?;
    info!("Aggregated {} raw rows into {} days", raw.len(), daily.len());
    Ok(daily)
}

/// Aggregate raw on-chain rows, flag outlier days and append the alerts.
/// Returns rows written.
pub async fn run_anomalies<W: Warehouse + ?Sized>(
    ctx: &RunContext,
    warehouse: &W,
    config: &AnomalyConfig,
) -> Result<usize> {
    anomalies(ctx, warehouse, config)
        .instrument(ctx.stage_span("anomalies"))
        .await
}

async fn anomalies<W: Warehouse + ?Sized>(
    ctx: &RunContext,
    warehouse: &W,
    config: &AnomalyConfig,
) -> Result<usize> {
    info!("Running anomaly detection job");
    let alert_table = ctx.table(LogicalTable::AnomalyAlertsOnchain);
    let alert_schema = LogicalTable::AnomalyAlertsOnchain.schema();
    provision(warehouse, &alert_table, &alert_schema).await?;

    let raw = warehouse.read(&ctx.table(LogicalTable::OnchainRawMetrics)).await?;
    let daily = aggregate_daily(&raw)?;
    let alerts = detect_anomalies(&daily, config.sigma)?;
    let alerts = schema::validate(&alerts, &alert_schema)?;

    warehouse.write(&alerts, &alert_table, WriteMode::Append).await?;
    info!("Wrote {} anomaly alerts to {}", alerts.len(), alert_table);
    Ok(alerts.len())
}
