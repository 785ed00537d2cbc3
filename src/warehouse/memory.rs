//! In-process warehouse
//!
//! Mirrors the SQLite behavior closely enough for stage and driver tests,
//! with switchable read/write failures for exercising error paths.

use super::{TableId, Warehouse, WriteMode};
use crate::error::{PipelineError, Result};
use crate::rowset::{RowSet, Value};
use crate::schema::Schema;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct MemoryState {
    datasets: HashSet<String>,
    tables: HashMap<String, StoredTable>,
    failing_reads: HashSet<String>,
    failing_writes: HashSet<String>,
    create_table_calls: usize,
}

#[derive(Debug, Clone)]
struct StoredTable {
    schema: Schema,
    rows: RowSet,
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    state: RwLock<MemoryState>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create dataset and table directly and fill it with `rows`
    pub fn seed(&self, table: &TableId, schema: &Schema, rows: &RowSet) {
        let mut state = self.state.write();
        state.datasets.insert(table.dataset_id());
        let stored = StoredTable {
            schema: schema.clone(),
            rows: align(rows, schema),
        };
        state.tables.insert(table.to_string(), stored);
    }

    /// Make every subsequent read of `table` fail
    pub fn fail_reads_of(&self, table: &TableId) {
        self.state.write().failing_reads.insert(table.to_string());
    }

    /// Make every subsequent write to `table` fail
    pub fn fail_writes_to(&self, table: &TableId) {
        self.state.write().failing_writes.insert(table.to_string());
    }

    /// Current rows of a table, `None` if it was never created
    pub fn rows(&self, table: &TableId) -> Option<RowSet> {
        self.state
            .read()
            .tables
            .get(&table.to_string())
            .map(|t| t.rows.clone())
    }

    /// Number of `create_table` calls that reached the store
    pub fn create_table_calls(&self) -> usize {
        self.state.read().create_table_calls
    }
}

/// Lay `rows` out in schema order, filling absent columns with nulls
fn align(rows: &RowSet, schema: &Schema) -> RowSet {
    let mut out = RowSet::new(schema.names());
    for row_idx in 0..rows.len() {
        let row = schema
            .fields()
            .iter()
            .map(|f| rows.get(row_idx, &f.name).cloned().unwrap_or(Value::Null))
            .collect();
        out.push_row(row);
    }
    out
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn dataset_exists(&self, dataset_id: &str) -> Result<bool> {
        Ok(self.state.read().datasets.contains(dataset_id))
    }

    async fn create_dataset(&self, dataset_id: &str) -> Result<()> {
        self.state.write().datasets.insert(dataset_id.to_string());
        Ok(())
    }

    async fn table_exists(&self, table: &TableId) -> Result<bool> {
        Ok(self.state.read().tables.contains_key(&table.to_string()))
    }

    async fn create_table(&self, table: &TableId, schema: &Schema) -> Result<()> {
        let mut state = self.state.write();
        if !state.datasets.contains(&table.dataset_id()) {
            return Err(PipelineError::Warehouse(format!(
                "dataset {} does not exist",
                table.dataset_id()
            )));
        }
        state.create_table_calls += 1;
        state
            .tables
            .entry(table.to_string())
            .or_insert_with(|| StoredTable {
                schema: schema.clone(),
                rows: RowSet::new(schema.names()),
            });
        Ok(())
    }

    async fn write(&self, rows: &RowSet, table: &TableId, mode: WriteMode) -> Result<()> {
        let mut state = self.state.write();
        let key = table.to_string();
        if state.failing_writes.contains(&key) {
            return Err(PipelineError::Warehouse(format!("write to {} failed", key)));
        }

        let stored = state
            .tables
            .get_mut(&key)
            .ok_or_else(|| PipelineError::TableNotFound(key.clone()))?;

        if let Some(unknown) = rows.columns().iter().find(|c| stored.schema.field(c).is_none()) {
            return Err(PipelineError::Warehouse(format!(
                "column {} does not exist in {}",
                unknown, key
            )));
        }

        if mode == WriteMode::Replace {
            stored.rows = RowSet::new(stored.schema.names());
        }
        for row in align(rows, &stored.schema).into_rows() {
            stored.rows.push_row(row);
        }
        Ok(())
    }

    async fn read(&self, table: &TableId) -> Result<RowSet> {
        let state = self.state.read();
        let key = table.to_string();
        if state.failing_reads.contains(&key) {
            return Err(PipelineError::Warehouse(format!("read of {} failed", key)));
        }
        state
            .tables
            .get(&key)
            .map(|t| t.rows.clone())
            .ok_or(PipelineError::TableNotFound(key))
    }
}
