//! Error types for the pipeline

use thiserror::Error;

/// Row-set does not conform to a table schema
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Missing columns: {0:?}")]
    MissingColumns(Vec<String>),

    #[error("Null value in column {field} (row {row})")]
    NullValue { field: String, row: usize },

    #[error("Column {field} cannot be read as {expected}")]
    TypeMismatch { field: String, expected: String },

    #[error("Duplicate field in schema: {0}")]
    DuplicateField(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Attach the name of the stage that produced this error
    pub fn in_stage(self, stage: &str) -> Self {
        match self {
            already @ PipelineError::Stage { .. } => already,
            other => PipelineError::Stage {
                stage: stage.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Innermost error, skipping stage wrappers
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
