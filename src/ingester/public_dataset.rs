//! Ethereum transactions from the public crypto dataset
//!
//! Runs one fixed query over the trailing day of transactions. The query
//! engine returns typed columns, including decimal and binary values the
//! warehouse schema has no type for: decimals become floats and bytes become
//! lowercase hex strings before validation.

use super::Source;
use crate::error::{PipelineError, Result};
use crate::rowset::{RowSet, Value};
use crate::schema::LogicalTable;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

/// A typed cell as returned by a SQL query engine
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryColumn {
    pub name: String,
    pub values: Vec<QueryValue>,
}

/// Columnar query result
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub columns: Vec<QueryColumn>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }
}

/// SQL interface to the public dataset
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn query(&self, sql: &str, max_rows: u32) -> Result<QueryResult>;
}

/// Trailing-day Ethereum transactions, shaped like `onchain_raw_metrics`
pub fn transactions_query(row_limit: u32) -> String {
    format!(
        r#"
    SELECT
        block_timestamp AS timestamp,
        from_address AS address,
        value / 1e18 AS eth_transferred,
        gas_price / 1e9 AS gas_price_gwei,
        "ethereum" AS source
    FROM
        `bigquery-public-data.crypto_ethereum.transactions`
    WHERE
        block_timestamp >= TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL 1 DAY)
    LIMIT {}
"#,
        row_limit
    )
}

pub struct PublicDatasetSource {
    engine: Box<dyn QueryEngine>,
    row_limit: u32,
}

impl PublicDatasetSource {
    pub fn new(engine: Box<dyn QueryEngine>, row_limit: u32) -> Self {
        Self { engine, row_limit }
    }
}

#[async_trait]
impl Source for PublicDatasetSource {
    type Raw = QueryResult;

    fn name(&self) -> &str {
        "onchain_ingest"
    }

    fn table(&self) -> LogicalTable {
        LogicalTable::OnchainRawMetrics
    }

    async fn fetch(&self) -> Result<Self::Raw> {
        let result = self
            .engine
            .query(&transactions_query(self.row_limit), self.row_limit)
            .await?;
        debug!("Received {} rows", result.row_count());
        Ok(result)
    }

    fn normalize(&self, raw: Self::Raw) -> Result<RowSet> {
        to_rowset(raw)
    }
}

/// Map a query cell onto the warehouse's semantic types
pub fn to_value(value: QueryValue) -> Value {
    match value {
        QueryValue::Null => Value::Null,
        QueryValue::Bool(b) => Value::Bool(b),
        QueryValue::Int(i) => Value::from(i as f64),
        QueryValue::Float(f) => Value::from(f),
        QueryValue::Decimal(d) => Value::from(d.to_f64()),
        QueryValue::String(s) => Value::String(s),
        QueryValue::Bytes(bytes) => Value::String(hex::encode(bytes)),
        QueryValue::Timestamp(ts) => Value::Timestamp(ts),
    }
}

/// Transpose a columnar result into rows, converting every cell
pub fn to_rowset(result: QueryResult) -> Result<RowSet> {
    let row_count = result.row_count();
    if let Some(ragged) = result.columns.iter().find(|c| c.values.len() != row_count) {
        return Err(PipelineError::Fetch(format!(
            "column {} has {} values, expected {}",
            ragged.name,
            ragged.values.len(),
            row_count
        )));
    }

    let mut rows: Vec<Vec<Value>> = (0..row_count)
        .map(|_| Vec::with_capacity(result.columns.len()))
        .collect();
    let mut names = Vec::with_capacity(result.columns.len());

    for column in result.columns {
        names.push(column.name);
        for (row, value) in rows.iter_mut().zip(column.values) {
            row.push(to_value(value));
        }
    }

    let mut set = RowSet::new(names);
    for row in rows {
        set.push_row(row);
    }
    Ok(set)
}
