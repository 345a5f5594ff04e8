use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use posync_adapters::{SourceExtractor, SqlSource};
use posync_engine::{
    maybe_build_scheduler, EntityChoice, RunOptions, ServiceConfig, SyncService,
};
use posync_warehouse::{PgWarehouse, PoolConfig, Warehouse};

#[derive(Debug, Parser)]
#[command(name = "posync-cli")]
#[command(about = "Purchase-order warehouse sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the HTTP trigger surface (plus the cron scheduler when enabled).
    Serve,
    /// Run one load to completion and print the run report.
    Run {
        /// Entity selection: po, breakout or both.
        #[arg(long, default_value = "both")]
        entity: String,
        /// Explicit window start; omitting both dates selects the rolling window.
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// Load fixture rows instead of querying the legacy source.
        #[arg(long)]
        mock: bool,
        /// Append to staging only; skip merge and sweeps.
        #[arg(long)]
        no_merge: bool,
    },
    /// Create staging and final tables for both entities.
    CreateTables,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Arc::new(ServiceConfig::from_env());
    let service = build_service(config).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            if let Some(scheduler) = maybe_build_scheduler(service.clone()).await? {
                scheduler.start().await.context("starting scheduler")?;
            }
            posync_web::serve(service).await?;
        }
        Commands::Run {
            entity,
            start_date,
            end_date,
            mock,
            no_merge,
        } => {
            let entity = EntityChoice::parse(&entity)
                .with_context(|| format!("unknown entity `{entity}`; expected po, breakout or both"))?;
            let opts = RunOptions {
                entity,
                rolling: start_date.is_none() && end_date.is_none(),
                start_date,
                end_date,
                mock: mock || service.config().use_mock_source,
                use_merge: !no_merge,
            };
            let report = service.run(&opts).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::CreateTables => {
            let created = service.create_tables().await;
            for table in &created {
                println!("created or verified: {table}");
            }
        }
    }

    Ok(())
}

async fn build_service(config: Arc<ServiceConfig>) -> Result<SyncService> {
    let warehouse: Arc<dyn Warehouse> = Arc::new(
        PgWarehouse::connect(&config.database_url, PoolConfig::default())
            .await
            .context("connecting to warehouse")?,
    );
    let source: Option<Arc<dyn SourceExtractor>> = match &config.source_database_url {
        Some(url) => Some(Arc::new(
            SqlSource::connect(url)
                .await
                .context("connecting to legacy source replica")?,
        )),
        None => None,
    };
    Ok(SyncService::new(config, warehouse, source))
}
