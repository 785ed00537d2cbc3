//! Warehouse access and table provisioning
//!
//! Tables are addressed by fully qualified `<project>.<dataset>.<table>`
//! identifiers. Every run re-reads whole tables; there is no incremental
//! cursor, which keeps the pipeline stateless at the cost of bounding the
//! data volume it can handle.

mod memory;
mod sqlite;

#[cfg(test)]
mod tests;

pub use memory::MemoryWarehouse;
pub use sqlite::SqliteWarehouse;

use crate::error::{PipelineError, Result};
use crate::rowset::RowSet;
use crate::schema::{LogicalTable, Schema};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// `<project>.<dataset>.<table>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(project: &str, dataset: &str, table: &str) -> Self {
        Self {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        }
    }

    pub fn logical(project: &str, dataset: &str, table: LogicalTable) -> Self {
        Self::new(project, dataset, table.name())
    }

    /// `<project>.<dataset>`
    pub fn dataset_id(&self) -> String {
        format!("{}.{}", self.project, self.dataset)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

impl FromStr for TableId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [project, dataset, table]
                if !project.is_empty() && !dataset.is_empty() && !table.is_empty() =>
            {
                Ok(Self::new(project, dataset, table))
            }
            _ => Err(PipelineError::Config(format!(
                "invalid table id {:?}, expected <project>.<dataset>.<table>",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Add rows after the existing ones
    Append,
    /// Drop existing rows first
    Replace,
}

/// Storage for pipeline tables
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn dataset_exists(&self, dataset_id: &str) -> Result<bool>;

    /// Create a dataset. Must succeed if it already exists.
    async fn create_dataset(&self, dataset_id: &str) -> Result<()>;

    async fn table_exists(&self, table: &TableId) -> Result<bool>;

    /// Create a table. Must succeed if it already exists, whatever its shape.
    async fn create_table(&self, table: &TableId, schema: &Schema) -> Result<()>;

    async fn write(&self, rows: &RowSet, table: &TableId, mode: WriteMode) -> Result<()>;

    /// Full current content of a table
    async fn read(&self, table: &TableId) -> Result<RowSet>;
}

/// Create the dataset if it does not exist. Safe to call every run.
pub async fn ensure_dataset<W: Warehouse + ?Sized>(warehouse: &W, dataset_id: &str) -> Result<()> {
    if warehouse.dataset_exists(dataset_id).await? {
        debug!("Dataset {} already exists", dataset_id);
        return Ok(());
    }
    info!("Creating dataset {}", dataset_id);
    warehouse.create_dataset(dataset_id).await
}

/// Create the table if it does not exist. Safe to call every run.
///
/// An existing table is left untouched even if its shape differs from
/// `schema`.
pub async fn ensure_table<W: Warehouse + ?Sized>(
    warehouse: &W,
    table: &TableId,
    schema: &Schema,
) -> Result<()> {
    if warehouse.table_exists(table).await? {
        debug!("Table {} already exists", table);
        return Ok(());
    }
    info!("Creating table {}", table);
    warehouse.create_table(table, schema).await
}

/// Dataset plus table provisioning for one logical table
pub async fn provision<W: Warehouse + ?Sized>(
    warehouse: &W,
    table: &TableId,
    schema: &Schema,
) -> Result<()> {
    ensure_dataset(warehouse, &table.dataset_id()).await?;
    ensure_table(warehouse, table, schema).await
}
