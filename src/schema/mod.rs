//! Schema registry and row-set validation
//!
//! Every logical table has one static schema. Stages coerce their output
//! into the schema's semantic types, then `validate` it before writing.


use crate::error::SchemaError;
use crate::rowset::{RowSet, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Float,
    Timestamp,
    Date,
    Bool,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "STRING",
            FieldType::Float => "FLOAT",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Date => "DATE",
            FieldType::Bool => "BOOL",
        }
    }

    /// Whether a non-null value already has this type
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (FieldType::String, Value::String(_))
                | (FieldType::Float, Value::Float(_))
                | (FieldType::Timestamp, Value::Timestamp(_))
                | (FieldType::Date, Value::Date(_))
                | (FieldType::Bool, Value::Bool(_))
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
        }
    }
}

/// Ordered, uniquely named fields of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Field>", into = "Vec<Field>")]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Result<Self, SchemaError> {
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    fn from_static(fields: &[(&str, FieldType)]) -> Self {
        Self {
            fields: fields.iter().map(|(n, t)| Field::new(n, *t)).collect(),
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The named fields, in the order given. Unknown and repeated names are skipped.
    pub fn select(&self, names: &[&str]) -> Schema {
        let mut fields: Vec<Field> = Vec::new();
        for name in names {
            if let Some(field) = self.field(name) {
                if !fields.iter().any(|f| f.name == field.name) {
                    fields.push(field.clone());
                }
            }
        }
        Schema { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl TryFrom<Vec<Field>> for Schema {
    type Error = SchemaError;

    fn try_from(fields: Vec<Field>) -> Result<Self, Self::Error> {
        Schema::new(fields)
    }
}

impl From<Schema> for Vec<Field> {
    fn from(schema: Schema) -> Self {
        schema.fields
    }
}

/// The logical tables the pipeline reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalTable {
    MarketRawMetrics,
    MarketStrategySignals,
    MarketDecisionOutputs,
    OnchainQueryMetrics,
    OnchainRawMetrics,
    AnomalyAlertsOnchain,
}

impl LogicalTable {
    pub const ALL: [LogicalTable; 6] = [
        LogicalTable::MarketRawMetrics,
        LogicalTable::MarketStrategySignals,
        LogicalTable::MarketDecisionOutputs,
        LogicalTable::OnchainQueryMetrics,
        LogicalTable::OnchainRawMetrics,
        LogicalTable::AnomalyAlertsOnchain,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LogicalTable::MarketRawMetrics => "market_raw_metrics",
            LogicalTable::MarketStrategySignals => "market_strategy_signals",
            LogicalTable::MarketDecisionOutputs => "market_decision_outputs",
            LogicalTable::OnchainQueryMetrics => "onchain_query_metrics",
            LogicalTable::OnchainRawMetrics => "onchain_raw_metrics",
            LogicalTable::AnomalyAlertsOnchain => "anomaly_alerts_onchain",
        }
    }

    pub fn schema(&self) -> Schema {
        use FieldType::*;
        match self {
            LogicalTable::MarketRawMetrics => Schema::from_static(&[
                ("symbol", String),
                ("priceChangePercent", Float),
                ("lastPrice", Float),
                ("closeTime", Timestamp),
            ]),
            LogicalTable::MarketStrategySignals => {
                Schema::from_static(&[("symbol", String), ("ma5", Float), ("ma20", Float)])
            }
            LogicalTable::MarketDecisionOutputs => Schema::from_static(&[
                ("symbol", String),
                ("decision", String),
                ("timestamp", Timestamp),
            ]),
            LogicalTable::OnchainQueryMetrics => Schema::from_static(&[
                ("metric", String),
                ("value", Float),
                ("timestamp", Timestamp),
            ]),
            LogicalTable::OnchainRawMetrics => Schema::from_static(&[
                ("timestamp", Timestamp),
                ("address", String),
                ("eth_transferred", Float),
                ("gas_price_gwei", Float),
                ("source", String),
            ]),
            LogicalTable::AnomalyAlertsOnchain => Schema::from_static(&[
                ("date", Date),
                ("eth_transferred", Float),
                ("gas_price_gwei", Float),
                ("anomaly_eth_transferred", Bool),
                ("anomaly_gas_price", Bool),
            ]),
        }
    }
}

impl fmt::Display for LogicalTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Check a row-set against a schema and project it onto the schema's fields.
///
/// Fails if a declared field is missing, holds a null, or holds a value of
/// another type. Extra columns are dropped from the result.
pub fn validate(rows: &RowSet, schema: &Schema) -> Result<RowSet, SchemaError> {
    let missing: Vec<String> = schema
        .fields()
        .iter()
        .filter(|f| !rows.has_column(&f.name))
        .map(|f| f.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(SchemaError::MissingColumns(missing));
    }

    let projected = rows.project(&schema.names());
    for (row_idx, row) in projected.rows().iter().enumerate() {
        for (field, value) in schema.fields().iter().zip(row) {
            if value.is_null() {
                return Err(SchemaError::NullValue {
                    field: field.name.clone(),
                    row: row_idx,
                });
            }
            if !field.field_type.accepts(value) {
                return Err(SchemaError::TypeMismatch {
                    field: field.name.clone(),
                    expected: field.field_type.to_string(),
                });
            }
        }
    }

    Ok(projected)
}

/// Convert the declared columns of a row-set to the schema's types where the
/// conversion is lossless (numeric strings, textual timestamps and dates).
/// Columns absent from the row-set are left for `validate` to report.
pub fn coerce(mut rows: RowSet, schema: &Schema) -> Result<RowSet, SchemaError> {
    for field in schema.fields() {
        let mut failure = None;
        rows.map_column(&field.name, |value| {
            match coerce_value(value, field.field_type) {
                Some(v) => v,
                None => {
                    failure.get_or_insert_with(|| SchemaError::TypeMismatch {
                        field: field.name.clone(),
                        expected: field.field_type.to_string(),
                    });
                    value.clone()
                }
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }
    }
    Ok(rows)
}

fn coerce_value(value: &Value, target: FieldType) -> Option<Value> {
    if value.is_null() || target.accepts(value) {
        return Some(value.clone());
    }

    match (target, value) {
        (FieldType::Float, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::from),
        (FieldType::String, other) => Some(Value::String(other.to_string())),
        (FieldType::Timestamp, Value::String(s)) => parse_timestamp(s).map(Value::Timestamp),
        (FieldType::Timestamp, Value::Date(d)) => {
            d.and_hms_opt(0, 0, 0).map(|dt| Value::Timestamp(Utc.from_utc_datetime(&dt)))
        }
        (FieldType::Date, Value::String(s)) => {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok().map(Value::Date)
        }
        (FieldType::Date, Value::Timestamp(ts)) => Some(Value::Date(ts.date_naive())),
        (FieldType::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

/// Parse the textual timestamp formats returned by the upstream APIs
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }

    // Dune style: "2024-01-01 00:00:00.000 UTC"
    let naive = s.trim_end_matches(" UTC");
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

/// Convert a millisecond epoch to an absolute UTC time
pub fn millis_to_timestamp(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}
