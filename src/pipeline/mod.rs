//! Pipeline driver
//!
//! Runs the stages in a fixed order:
//!
//! market ingest -> indicators -> decisions
//!   -> [analytics ingest -> public dataset ingest -> anomalies]
//!   -> notify
//!
//! The bracketed on-chain block is the only place a failure is tolerated:
//! it is logged, recorded in the [`RunReport`] and the run moves on to the
//! notification. Any other failure aborts the run.

#[cfg(test)]
mod tests;

use crate::anomaly::{run_anomalies, run_onchain_indicators};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::ingester::{
    AnalyticsSource, BigQueryEngine, Ingest, PublicDatasetSource, TickerSource,
};
use crate::notify::{collect_summary, run_notify, Messenger, NotificationReport, TelegramMessenger};
use crate::rowset::RowSet;
use crate::strategy::{run_decisions, run_indicators};
use crate::telemetry::RunContext;
use crate::warehouse::Warehouse;
use clap::ValueEnum;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A single runnable stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Stage {
    MarketIngest,
    Indicators,
    Decisions,
    OnchainQueryIngest,
    OnchainIngest,
    OnchainIndicators,
    Anomalies,
    Notify,
}

impl Stage {
    /// Name used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::MarketIngest => "market_ingest",
            Stage::Indicators => "indicators",
            Stage::Decisions => "decisions",
            Stage::OnchainQueryIngest => "onchain_query_ingest",
            Stage::OnchainIngest => "onchain_ingest",
            Stage::OnchainIndicators => "onchain_indicators",
            Stage::Anomalies => "anomalies",
            Stage::Notify => "notify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Written(usize),
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: String,
    pub outcome: StageOutcome,
}

/// What one run did, stage by stage
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
    pub notification: Option<NotificationReport>,
}

impl RunReport {
    fn record(&mut self, stage: &str, outcome: StageOutcome) {
        self.stages.push(StageReport {
            stage: stage.to_string(),
            outcome,
        });
    }

    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| &s.outcome)
    }

    /// True when a stage failed without aborting the run
    pub fn degraded(&self) -> bool {
        self.stages
            .iter()
            .any(|s| matches!(s.outcome, StageOutcome::Failed(_)))
    }
}

/// Result of running one stage on its own
#[derive(Debug, Clone)]
pub enum StageOutput {
    Written(usize),
    Aggregates(RowSet),
    Notified(NotificationReport),
    Skipped,
}

pub struct Pipeline {
    warehouse: Arc<dyn Warehouse>,
    market: Box<dyn Ingest>,
    analytics: Option<Box<dyn Ingest>>,
    public_dataset: Option<Box<dyn Ingest>>,
    messenger: Box<dyn Messenger>,
    config: Config,
}

impl Pipeline {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        market: Box<dyn Ingest>,
        messenger: Box<dyn Messenger>,
        config: Config,
    ) -> Self {
        Self {
            warehouse,
            market,
            analytics: None,
            public_dataset: None,
            messenger,
            config,
        }
    }

    pub fn with_analytics(mut self, source: Box<dyn Ingest>) -> Self {
        self.analytics = Some(source);
        self
    }

    pub fn with_public_dataset(mut self, source: Box<dyn Ingest>) -> Self {
        self.public_dataset = Some(source);
        self
    }

    /// Wire the production collaborators described by `config`
    pub fn from_config(config: Config, warehouse: Arc<dyn Warehouse>) -> Result<Self> {
        let market = Box::new(TickerSource::new(&config.market)?);
        let messenger = Box::new(TelegramMessenger::new(&config.telegram)?);
        let mut pipeline = Self::new(warehouse, market, messenger, config.clone());

        if let Some(query_id) = &config.analytics.query_id {
            pipeline = pipeline.with_analytics(Box::new(AnalyticsSource::new(&config.analytics, query_id)?));
        }
        if config.public_dataset.enabled {
            let engine = BigQueryEngine::new(&config.public_dataset, &config.warehouse.project_id)?;
            let source = PublicDatasetSource::new(Box::new(engine), config.public_dataset.row_limit);
            pipeline = pipeline.with_public_dataset(Box::new(source));
        }
        Ok(pipeline)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every stage in order
    pub async fn run(&self, ctx: &RunContext) -> Result<RunReport> {
        info!(
            run_id = %ctx.run_id(),
            project = ctx.project_id(),
            dataset = ctx.dataset(),
            "Starting CryptoScanner pipeline"
        );
        let warehouse = self.warehouse.as_ref();
        let mut report = RunReport::default();

        let stage = self.market.stage_name();
        let written = self.market.run(ctx, warehouse).await.map_err(|e| e.in_stage(stage))?;
        report.record(stage, StageOutcome::Written(written));

        let written = run_indicators(ctx, warehouse, &self.config.indicator)
            .await
            .map_err(|e| e.in_stage(Stage::Indicators.as_str()))?;
        report.record(Stage::Indicators.as_str(), StageOutcome::Written(written));

        let written = run_decisions(ctx, warehouse)
            .await
            .map_err(|e| e.in_stage(Stage::Decisions.as_str()))?;
        report.record(Stage::Decisions.as_str(), StageOutcome::Written(written));

        if let Err(e) = self.run_onchain(ctx, &mut report).await {
            error!("On-chain modules failed: {}", e);
            let stage = match &e {
                PipelineError::Stage { stage, .. } => stage.clone(),
                _ => "onchain".to_string(),
            };
            report.record(&stage, StageOutcome::Failed(e.root().to_string()));
        }

        let notification = run_notify(ctx, warehouse, self.messenger.as_ref(), &self.config.telegram)
            .await
            .map_err(|e| e.in_stage(Stage::Notify.as_str()))?;
        report.record(
            Stage::Notify.as_str(),
            if notification.delivered {
                StageOutcome::Written(1)
            } else {
                StageOutcome::Failed("message not delivered".to_string())
            },
        );
        report.notification = Some(notification);

        info!(run_id = %ctx.run_id(), "Pipeline finished");
        Ok(report)
    }

    async fn run_onchain(&self, ctx: &RunContext, report: &mut RunReport) -> Result<()> {
        let warehouse = self.warehouse.as_ref();

        for (stage, source) in [
            (Stage::OnchainQueryIngest, &self.analytics),
            (Stage::OnchainIngest, &self.public_dataset),
        ] {
            match source {
                Some(source) => {
                    let written = source
                        .run(ctx, warehouse)
                        .await
                        .map_err(|e| e.in_stage(source.stage_name()))?;
                    report.record(source.stage_name(), StageOutcome::Written(written));
                }
                None => {
                    warn!("{} not configured, skipping", stage);
                    report.record(stage.as_str(), StageOutcome::Skipped);
                }
            }
        }

        let written = run_anomalies(ctx, warehouse, &self.config.anomaly)
            .await
            .map_err(|e| e.in_stage(Stage::Anomalies.as_str()))?;
        report.record(Stage::Anomalies.as_str(), StageOutcome::Written(written));
        Ok(())
    }

    /// Run one stage on its own. Failures propagate whatever the stage.
    pub async fn run_stage(&self, ctx: &RunContext, stage: Stage) -> Result<StageOutput> {
        self.stage_output(ctx, stage)
            .await
            .map_err(|e| e.in_stage(stage.as_str()))
    }

    async fn stage_output(&self, ctx: &RunContext, stage: Stage) -> Result<StageOutput> {
        let warehouse = self.warehouse.as_ref();
        let output = match stage {
            Stage::MarketIngest => StageOutput::Written(self.market.run(ctx, warehouse).await?),
            Stage::Indicators => {
                StageOutput::Written(run_indicators(ctx, warehouse, &self.config.indicator).await?)
            }
            Stage::Decisions => StageOutput::Written(run_decisions(ctx, warehouse).await?),
            Stage::OnchainQueryIngest => match &self.analytics {
                Some(source) => StageOutput::Written(source.run(ctx, warehouse).await?),
                None => StageOutput::Skipped,
            },
            Stage::OnchainIngest => match &self.public_dataset {
                Some(source) => StageOutput::Written(source.run(ctx, warehouse).await?),
                None => StageOutput::Skipped,
            },
            Stage::OnchainIndicators => {
                StageOutput::Aggregates(run_onchain_indicators(ctx, warehouse).await?)
            }
            Stage::Anomalies => {
                StageOutput::Written(run_anomalies(ctx, warehouse, &self.config.anomaly).await?)
            }
            Stage::Notify => StageOutput::Notified(
                run_notify(ctx, warehouse, self.messenger.as_ref(), &self.config.telegram).await?,
            ),
        };
        Ok(output)
    }

    /// The summary the notification stage would send right now
    pub async fn summary(&self, ctx: &RunContext) -> String {
        collect_summary(ctx, self.warehouse.as_ref()).await
    }
}
