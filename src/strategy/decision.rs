//! Decision engine based on strategy signals

use crate::error::Result;
use crate::rowset::{RowSet, Value};
use crate::schema::{self, LogicalTable};
use crate::telemetry::RunContext;
use crate::warehouse::{provision, Warehouse, WriteMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Long,
    Short,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Long => "LONG",
            Decision::Short => "SHORT",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LONG only when the fast average is strictly above the slow one
pub fn decide(ma5: f64, ma20: f64) -> Decision {
    if ma5 > ma20 {
        Decision::Long
    } else {
        Decision::Short
    }
}

/// One decision row per signal row, all stamped with `now`
pub fn generate_decisions(signals: &RowSet, now: DateTime<Utc>) -> Result<RowSet> {
    let input = LogicalTable::MarketStrategySignals.schema();
    let signals = schema::validate(signals, &input)?;

    let mut out = RowSet::new(LogicalTable::MarketDecisionOutputs.schema().names());
    for row in signals.rows() {
        // validate() guarantees symbol/ma5/ma20 are typed and non-null
        let (symbol, ma5, ma20) = match (&row[0], &row[1], &row[2]) {
            (Value::String(s), Value::Float(fast), Value::Float(slow)) => (s, *fast, *slow),
            _ => continue,
        };
        out.push_row(vec![
            Value::from(symbol.as_str()),
            Value::from(decide(ma5, ma20).as_str()),
            Value::from(now),
        ]);
    }
    Ok(out)
}

/// Read strategy signals and append decisions. Returns rows written.
pub async fn run_decisions<W: Warehouse + ?Sized>(ctx: &RunContext, warehouse: &W) -> Result<usize> {
    decisions(ctx, warehouse)
        .instrument(ctx.stage_span("decisions"))
        .await
}

async fn decisions<W: Warehouse + ?Sized>(ctx: &RunContext, warehouse: &W) -> Result<usize> {
    let signal_table = ctx.table(LogicalTable::MarketStrategySignals);
    let output_table = ctx.table(LogicalTable::MarketDecisionOutputs);
    let output_schema = LogicalTable::MarketDecisionOutputs.schema();
    provision(warehouse, &output_table, &output_schema).await?;

    info!("Running decision job");
    let signals = warehouse.read(&signal_table).await?;
    let decisions = generate_decisions(&signals, Utc::now())?;
    let decisions = schema::validate(&decisions, &output_schema)?;

    warehouse.write(&decisions, &output_table, WriteMode::Append).await?;
    info!("Wrote {} decisions to {}", decisions.len(), output_table);
    Ok(decisions.len())
}
