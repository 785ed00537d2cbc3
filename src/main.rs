//! CryptoScanner command line

use clap::{Parser, Subcommand};
use cryptoscanner::{
    config::Config,
    pipeline::{Pipeline, Stage, StageOutcome, StageOutput},
    schema::LogicalTable,
    telemetry::{init_tracing, RunContext},
    warehouse::SqliteWarehouse,
};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cryptoscanner")]
#[command(about = "Market and on-chain metrics pipeline with Telegram summaries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default locations are searched when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Warehouse project id
    #[arg(long)]
    project_id: Option<String>,

    /// Warehouse dataset
    #[arg(long)]
    dataset: Option<String>,

    /// SQLite file backing the warehouse
    #[arg(long)]
    warehouse: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline
    Run,
    /// Run a single stage
    Stage {
        #[arg(value_enum)]
        stage: Stage,
    },
    /// Print the summary without sending it
    Summary,
    /// Print the table schemas
    Schema,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    if let Commands::Schema = cli.command {
        print_schemas();
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    }
    .with_overrides(cli.project_id, cli.dataset, cli.warehouse)?;

    let warehouse = Arc::new(SqliteWarehouse::connect(&config.warehouse.path).await?);
    let ctx = RunContext::new(&config.warehouse.project_id, &config.warehouse.dataset);
    let pipeline = Pipeline::from_config(config, warehouse)?;

    match cli.command {
        Commands::Run => run(&pipeline, &ctx).await,
        Commands::Stage { stage } => run_stage(&pipeline, &ctx, stage).await,
        Commands::Summary => {
            println!("{}", pipeline.summary(&ctx).await);
            Ok(())
        }
        Commands::Schema => Ok(()),
    }
}

async fn run(pipeline: &Pipeline, ctx: &RunContext) -> anyhow::Result<()> {
    let report = match pipeline.run(ctx).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(run_id = %ctx.run_id(), "Pipeline aborted: {}", e);
            return Err(e.into());
        }
    };

    for stage in &report.stages {
        match &stage.outcome {
            StageOutcome::Written(n) => println!("{:<22} ok ({} rows)", stage.stage, n),
            StageOutcome::Skipped => println!("{:<22} skipped", stage.stage),
            StageOutcome::Failed(reason) => println!("{:<22} failed: {}", stage.stage, reason),
        }
    }
    if let Some(notification) = &report.notification {
        println!("\n{}", notification.summary);
    }
    Ok(())
}

async fn run_stage(pipeline: &Pipeline, ctx: &RunContext, stage: Stage) -> anyhow::Result<()> {
    match pipeline.run_stage(ctx, stage).await? {
        StageOutput::Written(n) => println!("{}: wrote {} rows", stage, n),
        StageOutput::Skipped => println!("{}: not configured, skipped", stage),
        StageOutput::Notified(report) => {
            println!("{}", report.summary);
            if !report.delivered {
                println!("(message not delivered)");
            }
        }
        StageOutput::Aggregates(rows) => {
            println!("{}", rows.columns().join("\t"));
            for row in rows.rows() {
                let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                println!("{}", cells.join("\t"));
            }
        }
    }
    Ok(())
}

fn print_schemas() {
    for table in LogicalTable::ALL {
        println!("{}", table);
        for field in table.schema().fields() {
            println!("  {:<22} {}", field.name, field.field_type);
        }
    }
}
