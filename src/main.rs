use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use review_sync::config::{GcsCredentials, LedgerConfig, ObjectStoreConfig, DEFAULT_CONFIG_PATH};
use review_sync::{
    generate_summary, ConfigOverrides, GcsAuth, GcsObjectStore, JsonLedger, LedgerStore, LocalObjectStore,
    MySqlExecutor, PostgresLedger, PostgresWarehouse, Publisher, QueryTemplates, RawConfig,
    SyncConfig, SyncError, SyncOrchestrator,
};

#[derive(Parser)]
#[command(name = "review-sync")]
#[command(about = "Incremental per-course export of peer-review data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the YAML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one synchronization pass
    Sync {
        /// Classify courses and report without publishing or touching the ledger
        #[arg(long)]
        dry_run: bool,

        /// Write the markdown summary to this file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Exit with an error if any course failed to publish
        #[arg(long)]
        fail_on_course_error: bool,
    },

    /// Show the upload ledger
    Status,

    /// Validate configuration and check connectivity
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("review_sync=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration rejected");
            return Err(e);
        }
    };

    match cli.command {
        Commands::Sync {
            dry_run,
            output,
            fail_on_course_error,
        } => run_sync(&config, dry_run, output, fail_on_course_error).await?,
        Commands::Status => show_status(&config).await?,
        Commands::Check => run_check(&config).await?,
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let raw = RawConfig::load(&cli.config)?.apply(cli.overrides.clone());
    let config = raw.validate().map_err(SyncError::from)?;
    Ok(config)
}

async fn open_ledger(config: &LedgerConfig) -> Result<Box<dyn LedgerStore>> {
    let ledger: Box<dyn LedgerStore> = match config {
        LedgerConfig::Json { path } => Box::new(JsonLedger::new(path)?),
        LedgerConfig::Postgres { url, table } => {
            let ledger = PostgresLedger::new(url.expose(), table)
                .await
                .map_err(|e| SyncError::connection("ledger database", e))?;
            ledger.ensure_schema().await?;
            Box::new(ledger)
        }
    };
    Ok(ledger)
}

async fn build_publisher(config: &SyncConfig) -> Result<Publisher> {
    let mut publisher = Publisher::new();

    match &config.object_store {
        Some(ObjectStoreConfig::Gcs {
            bucket,
            credentials,
        }) => {
            let auth = match credentials {
                GcsCredentials::AccessToken(token) => GcsAuth::Bearer(token.expose().to_string()),
                GcsCredentials::ServiceAccountKey(key) => GcsAuth::service_account(key.expose())?,
            };
            publisher = publisher.with_object_store(Box::new(GcsObjectStore::new(bucket.clone(), auth)));
        }
        Some(ObjectStoreConfig::Local { directory }) => {
            publisher = publisher.with_object_store(Box::new(LocalObjectStore::new(directory)?));
        }
        None => {}
    }

    if let Some(warehouse) = &config.warehouse {
        let sink = PostgresWarehouse::new(warehouse.url.expose())
            .await
            .map_err(|e| SyncError::connection("warehouse", e))?;
        sink.ensure_table(&warehouse.table).await?;
        publisher = publisher.with_warehouse(Box::new(sink), warehouse.table.clone());
    }

    if publisher.is_empty() {
        warn!("No sink enabled; new and updated courses will only be recorded in the ledger");
    }

    Ok(publisher)
}

async fn build_orchestrator(
    config: &SyncConfig,
) -> Result<SyncOrchestrator<MySqlExecutor, Box<dyn LedgerStore>>> {
    let templates = QueryTemplates::load(&config.queries)?;
    let executor = MySqlExecutor::connect(&config.source).await?;
    let ledger = open_ledger(&config.ledger).await?;
    let publisher = build_publisher(config).await?;

    Ok(SyncOrchestrator::new(
        executor,
        templates,
        config.lookback,
        ledger,
        publisher,
    ))
}

async fn run_sync(
    config: &SyncConfig,
    dry_run: bool,
    output: Option<PathBuf>,
    fail_on_course_error: bool,
) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?.dry_run(dry_run);

    let report = match orchestrator.run().await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Sync pass aborted");
            return Err(e.into());
        }
    };

    let summary = generate_summary(&report);
    if let Some(output) = output {
        fs::write(&output, &summary)
            .with_context(|| format!("Failed to write summary: {}", output.display()))?;
        info!(output = %output.display(), "Sync summary written");
    }

    println!("{}", summary);

    if report.has_failures() && fail_on_course_error {
        anyhow::bail!("{} course(s) failed to publish", report.failed_count);
    }

    Ok(())
}

async fn show_status(config: &SyncConfig) -> Result<()> {
    let ledger = open_ledger(&config.ledger).await?;
    let entries = ledger.read().await?.unwrap_or_default();

    if entries.is_empty() {
        println!("Ledger is empty.");
        return Ok(());
    }

    println!("Uploaded courses:\n");
    for entry in entries {
        println!(
            "  {} - {}: {} records, uploaded {}",
            entry.course_id,
            entry.course_name,
            entry.record_count,
            entry.last_upload_time.to_rfc3339()
        );
    }

    Ok(())
}

async fn run_check(config: &SyncConfig) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    orchestrator.verify_connectivity().await?;

    match orchestrator.ledger().read().await {
        Ok(Some(entries)) => println!("Ledger readable ({} entries).", entries.len()),
        Ok(None) => println!("Ledger not written yet."),
        Err(e) => println!("Ledger unreadable, the next pass will treat every course as new: {:#}", e),
    }

    println!("Configuration valid, source and sinks reachable.");

    Ok(())
}
