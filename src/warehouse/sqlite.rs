//! SQLite-backed warehouse
//!
//! Each fully qualified table id is used verbatim (quoted) as the SQLite
//! table name. Two catalog tables record datasets and the schema each table
//! was created with, so reads can decode columns back to semantic types.

use super::{TableId, Warehouse, WriteMode};
use crate::error::{PipelineError, Result};
use crate::rowset::{RowSet, Value};
use crate::schema::{FieldType, Schema};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteWarehouse {
    pool: SqlitePool,
}

impl SqliteWarehouse {
    /// Open (or create) a warehouse file. `:memory:` opens a private
    /// in-memory database.
    pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str() == ":memory:" {
            return Self::in_memory().await;
        }

        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        info!("Opening warehouse {}", path.display());
        Self::open(&db_url).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::open("sqlite::memory:").await
    }

    // A single connection: runs are sequential, and an in-memory database
    // only lives as long as its connection.
    async fn open(db_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(db_url)
            .await?;

        let warehouse = Self { pool };
        warehouse.init_catalog().await?;
        Ok(warehouse)
    }

    async fn init_catalog(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _datasets (
                dataset_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _tables (
                table_id TEXT PRIMARY KEY,
                dataset_id TEXT NOT NULL,
                schema TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Schema the table was created with
    async fn table_schema(&self, table: &TableId) -> Result<Schema> {
        let row: Option<(String,)> = sqlx::query_as("SELECT schema FROM _tables WHERE table_id = ?")
            .bind(table.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let (schema_json,) = row.ok_or_else(|| PipelineError::TableNotFound(table.to_string()))?;
        Ok(serde_json::from_str(&schema_json)?)
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    async fn dataset_exists(&self, dataset_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM _datasets WHERE dataset_id = ?")
            .bind(dataset_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn create_dataset(&self, dataset_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO _datasets (dataset_id, created_at) VALUES (?, ?)")
            .bind(dataset_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn table_exists(&self, table: &TableId) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM _tables WHERE table_id = ?")
            .bind(table.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn create_table(&self, table: &TableId, schema: &Schema) -> Result<()> {
        if !self.dataset_exists(&table.dataset_id()).await? {
            return Err(PipelineError::Warehouse(format!(
                "dataset {} does not exist",
                table.dataset_id()
            )));
        }

        let columns: Vec<String> = schema
            .fields()
            .iter()
            .map(|f| format!("{} {}", quote_ident(&f.name), sql_type(f.field_type)))
            .collect();
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&table.to_string()),
            columns.join(", ")
        );

        let mut tx = self.pool.begin().await?;
        sqlx::query(&ddl).execute(&mut *tx).await?;
        sqlx::query(
            "INSERT OR IGNORE INTO _tables (table_id, dataset_id, schema, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(table.to_string())
        .bind(table.dataset_id())
        .bind(serde_json::to_string(schema)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn write(&self, rows: &RowSet, table: &TableId, mode: WriteMode) -> Result<()> {
        let schema = self.table_schema(table).await?;
        if let Some(unknown) = rows.columns().iter().find(|c| schema.field(c).is_none()) {
            return Err(PipelineError::Warehouse(format!(
                "column {} does not exist in {}",
                unknown, table
            )));
        }

        let table_name = quote_ident(&table.to_string());
        let mut tx = self.pool.begin().await?;

        if mode == WriteMode::Replace {
            sqlx::query(&format!("DELETE FROM {}", table_name))
                .execute(&mut *tx)
                .await?;
        }

        if !rows.columns().is_empty() {
            let column_list: Vec<String> = rows.columns().iter().map(|c| quote_ident(c)).collect();
            let placeholders = vec!["?"; rows.columns().len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table_name,
                column_list.join(", "),
                placeholders
            );

            for row in rows.rows() {
                let mut query = sqlx::query(&sql);
                for value in row {
                    query = bind_value(query, value);
                }
                query.execute(&mut *tx).await?;
            }
        }

        tx.commit().await?;
        debug!("Wrote {} rows to {} ({:?})", rows.len(), table, mode);
        Ok(())
    }

    async fn read(&self, table: &TableId) -> Result<RowSet> {
        let schema = self.table_schema(table).await?;
        let column_list: Vec<String> = schema.fields().iter().map(|f| quote_ident(&f.name)).collect();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            column_list.join(", "),
            quote_ident(&table.to_string())
        );

        let records = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut out = RowSet::new(schema.names());
        for record in &records {
            let row = schema
                .fields()
                .iter()
                .enumerate()
                .map(|(i, f)| decode_column(record, i, f.field_type, &f.name))
                .collect::<Result<Vec<Value>>>()?;
            out.push_row(row);
        }

        debug!("Read {} rows from {}", out.len(), table);
        Ok(out)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::String | FieldType::Timestamp | FieldType::Date => "TEXT",
        FieldType::Float => "REAL",
        FieldType::Bool => "INTEGER",
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::String(s) => query.bind(s.clone()),
        Value::Float(v) => query.bind(*v),
        Value::Bool(b) => query.bind(*b),
        // Fixed-width UTC text keeps lexical and chronological order aligned
        Value::Timestamp(ts) => query.bind(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
        Value::Date(d) => query.bind(d.format(DATE_FORMAT).to_string()),
    }
}

fn decode_column(record: &SqliteRow, idx: usize, field_type: FieldType, name: &str) -> Result<Value> {
    let bad = |detail: String| PipelineError::Warehouse(format!("column {}: {}", name, detail));

    let value = match field_type {
        FieldType::String => record.try_get::<Option<String>, _>(idx)?.map(Value::String),
        FieldType::Float => record.try_get::<Option<f64>, _>(idx)?.map(Value::Float),
        FieldType::Bool => record.try_get::<Option<bool>, _>(idx)?.map(Value::Bool),
        FieldType::Timestamp => match record.try_get::<Option<String>, _>(idx)? {
            Some(text) => Some(Value::Timestamp(
                DateTime::parse_from_rfc3339(&text)
                    .map_err(|e| bad(e.to_string()))?
                    .with_timezone(&Utc),
            )),
            None => None,
        },
        FieldType::Date => match record.try_get::<Option<String>, _>(idx)? {
            Some(text) => Some(Value::Date(
                NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|e| bad(e.to_string()))?,
            )),
            None => None,
        },
    };

    Ok(value.unwrap_or(Value::Null))
}
