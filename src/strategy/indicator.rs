//! Trailing moving averages over the raw market table
//!
//! The whole table is re-read and recomputed every run. Rows are ordered by
//! close time; only rows with a complete slow window produce a signal.

use crate::config::IndicatorConfig;
use crate::error::Result;
use crate::rowset::{RowSet, Value};
use crate::schema::{self, LogicalTable, Schema};
use crate::telemetry::RunContext;
use crate::warehouse::{provision, Warehouse, WriteMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, Instrument};

/// What the trailing window rolls over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowScope {
    /// One window over the whole table in time order, regardless of symbol
    #[default]
    Global,
    /// One window per symbol
    PerSymbol,
}

/// Mean of every complete trailing window of size `window`.
///
/// Returns `values.len() - window + 1` means, or nothing when there are
/// fewer values than the window (or the window is zero).
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 {
        return Vec::new();
    }
    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

struct Observation {
    symbol: String,
    price: f64,
    close_time: DateTime<Utc>,
}

// Columns of market_raw_metrics the indicators depend on
fn input_schema() -> Schema {
    LogicalTable::MarketRawMetrics
        .schema()
        .select(&["symbol", "lastPrice", "closeTime"])
}

/// Fast/slow moving averages as `symbol, ma5, ma20` rows
pub fn compute_moving_averages(raw: &RowSet, config: &IndicatorConfig) -> Result<RowSet> {
    let input = schema::validate(raw, &input_schema())?;

    let mut observations: Vec<Observation> = input
        .rows()
        .iter()
        .filter_map(|row| {
            Some(Observation {
                symbol: row[0].as_str()?.to_string(),
                price: row[1].as_f64()?,
                close_time: row[2].as_timestamp()?,
            })
        })
        .collect();
    // Stable: equal close times keep table order
    observations.sort_by_key(|o| o.close_time);

    let mut out = RowSet::new(LogicalTable::MarketStrategySignals.schema().names());
    let emitted = match config.window_scope {
        WindowScope::Global => {
            let all: Vec<usize> = (0..observations.len()).collect();
            averages_for(&observations, &all, config)
        }
        WindowScope::PerSymbol => {
            let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
            for (idx, o) in observations.iter().enumerate() {
                groups.entry(o.symbol.as_str()).or_default().push(idx);
            }
            let mut emitted: Vec<(usize, f64, f64)> = groups
                .values()
                .flat_map(|indices| averages_for(&observations, indices, config))
                .collect();
            emitted.sort_by_key(|(idx, _, _)| *idx);
            emitted
        }
    };

    for (idx, fast, slow) in emitted {
        out.push_row(vec![
            Value::from(observations[idx].symbol.as_str()),
            Value::from(fast),
            Value::from(slow),
        ]);
    }
    Ok(out)
}

/// (observation index, fast mean, slow mean) for each position of `indices`
/// where both windows are complete
fn averages_for(
    observations: &[Observation],
    indices: &[usize],
    config: &IndicatorConfig,
) -> Vec<(usize, f64, f64)> {
    let prices: Vec<f64> = indices.iter().map(|&i| observations[i].price).collect();
    let fast = rolling_mean(&prices, config.fast_window);
    let slow = rolling_mean(&prices, config.slow_window);

    let longest = config.fast_window.max(config.slow_window);
    if longest == 0 || prices.len() < longest {
        return Vec::new();
    }

    (longest - 1..prices.len())
        .map(|pos| {
            (
                indices[pos],
                fast[pos + 1 - config.fast_window],
                slow[pos + 1 - config.slow_window],
            )
        })
        .collect()
}

/// Read raw metrics, compute indicators, append them to the signals table.
/// Returns the number of rows written.
pub async fn run_indicators<W: Warehouse + ?Sized>(
    ctx: &RunContext,
    warehouse: &W,
    config: &IndicatorConfig,
) -> Result<usize> {
    indicators(ctx, warehouse, config)
        .instrument(ctx.stage_span("indicators"))
        .await
}

async fn indicators<W: Warehouse + ?Sized>(
    ctx: &RunContext,
    warehouse: &W,
    config: &IndicatorConfig,
) -> Result<usize> {
    info!("Running indicator job");
    let raw_table = ctx.table(LogicalTable::MarketRawMetrics);
    let signal_table = ctx.table(LogicalTable::MarketStrategySignals);
    let signal_schema = LogicalTable::MarketStrategySignals.schema();
    provision(warehouse, &signal_table, &signal_schema).await?;

    let raw = warehouse.read(&raw_table).await?;
    let signals = compute_moving_averages(&raw, config)?;
    let signals = schema::validate(&signals, &signal_schema)?;

    warehouse.write(&signals, &signal_table, WriteMode::Append).await?;
    info!(
        "Wrote {} strategy signals to {} (from {} raw rows)",
        signals.len(),
        signal_table,
        raw.len()
    );
    Ok(signals.len())
}
