//! Run-scoped logging context
//!
//! The subscriber is installed once by the binary; after that every stage
//! receives a `RunContext` and logs inside the span it hands out.

use crate::schema::LogicalTable;
use crate::warehouse::TableId;
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Install the global `tracing` subscriber. Honors `RUST_LOG`, defaults to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A second call (tests, embedding) is not an error.
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}

/// Identity of one pipeline run, shared by all its stages
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    project_id: String,
    dataset: String,
}

impl RunContext {
    pub fn new(project_id: &str, dataset: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            project_id: project_id.to_string(),
            dataset: dataset.to_string(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Fully qualified id of one of the pipeline tables
    pub fn table(&self, table: LogicalTable) -> TableId {
        TableId::logical(&self.project_id, &self.dataset, table)
    }

    /// Span wrapping everything a stage logs
    pub fn stage_span(&self, stage: &str) -> Span {
        tracing::info_span!("stage", name = stage, run_id = %self.run_id)
    }
}

/// Mask a secret for logging: first 8 characters then `...`
pub fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return "NONE".to_string();
    }
    let prefix: String = secret.chars().take(8).collect();
    format!("{}...", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask("123456789:ABCDEF"), "12345678...");
        assert_eq!(mask("abc"), "abc...");
        assert_eq!(mask(""), "NONE");
    }

    #[test]
    fn test_run_ids_are_unique() {
        let a = RunContext::new("p", "d");
        let b = RunContext::new("p", "d");
        assert_ne!(a.run_id(), b.run_id());
        assert_eq!(a.project_id(), "p");
        assert_eq!(a.dataset(), "d");
    }
}
