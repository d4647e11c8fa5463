#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the dataset loader.
//!
//! `serve` reads newline-delimited extract-load requests from stdin (or a
//! file) and publishes one result per request, either to the webhook named
//! by `EXTRACT_LOAD_RESPONSE_TOPIC` or as JSON lines on stdout. `load` runs
//! a single load from flags and `migrate` applies the embedded schema.

mod health;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dataset_loader_database::{db, run_migrations};
use dataset_loader_load::{LoadOrchestrator, ResultReporter};
use dataset_loader_load_models::{ExtractLoadRequest, LoadConfig, parse_env};
use dataset_loader_queue::http::HttpTopic;
use dataset_loader_queue::jsonl::{JsonLinesSource, JsonLinesTopic};
use dataset_loader_queue::{
    DEFAULT_MAX_CONCURRENT_MESSAGES, MessageSource, QueueMessage, Topic, subscribe,
};
use dataset_loader_storage::UrlStorageClient;
use tokio::io::BufReader;

#[derive(Parser)]
#[command(name = "dataset_loader", about = "Loads zipped GeoJSON datasets into Postgres")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process extract-load requests until the input ends
    Serve {
        /// Newline-delimited request file (defaults to stdin)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Port for the `/health` endpoint; disabled when unset
        #[arg(long, env = "HEALTH_PORT")]
        health_port: Option<u16>,
    },
    /// Load a single archive
    Load {
        /// Dataset family (`osw`, `flex`, or `pathways`)
        #[arg(long, default_value = "osw")]
        data_type: String,
        /// Dataset whose rows are replaced
        #[arg(long)]
        dataset_id: String,
        /// Archive location (`file://`, bare path, `http(s)://`, or `s3://`)
        #[arg(long)]
        file: String,
        /// User recorded on every row
        #[arg(long, default_value = "")]
        user_id: String,
        /// Project group that owns the dataset
        #[arg(long, default_value = "")]
        project_group_id: String,
    },
    /// Run database migrations
    Migrate,
}

fn response_topic() -> Result<Arc<dyn Topic>, Box<dyn std::error::Error>> {
    match std::env::var("EXTRACT_LOAD_RESPONSE_TOPIC") {
        Ok(url) if !url.trim().is_empty() => {
            log::info!("Publishing results to {url}");
            Ok(Arc::new(HttpTopic::new(url)?))
        }
        _ => {
            log::info!("EXTRACT_LOAD_RESPONSE_TOPIC not set; publishing results to stdout");
            Ok(Arc::new(JsonLinesTopic::new(tokio::io::stdout())))
        }
    }
}

async fn build_orchestrator() -> Result<LoadOrchestrator, Box<dyn std::error::Error>> {
    let config = LoadConfig::from_env()?;
    log::info!(
        "Batch size {}, transaction timeout {}s",
        config.batch_size,
        config.transaction_timeout.as_secs()
    );

    log::info!("Connecting to database...");
    let pool = db::connect_from_env().await?;
    let storage = UrlStorageClient::from_env()?;

    Ok(LoadOrchestrator::new(
        Arc::new(pool),
        Arc::new(storage),
        ResultReporter::new(response_topic()?),
        config,
    ))
}

async fn drain<S: MessageSource>(
    source: S,
    orchestrator: &LoadOrchestrator,
    max_concurrent: usize,
) -> u64 {
    subscribe(source, max_concurrent, |message| async move {
        orchestrator.handle_message(message).await;
    })
    .await
}

async fn serve(
    input: Option<PathBuf>,
    health_port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let max_concurrent = parse_env("MAX_CONCURRENT_MESSAGES", DEFAULT_MAX_CONCURRENT_MESSAGES)?;
    let orchestrator = build_orchestrator().await?;
    let health_server = health_port.map(health::start).transpose()?;

    let handled = match input {
        Some(path) => {
            log::info!("Reading requests from {}", path.display());
            let file = tokio::fs::File::open(&path).await?;
            drain(
                JsonLinesSource::new(BufReader::new(file)),
                &orchestrator,
                max_concurrent,
            )
            .await
        }
        None => {
            log::info!("Reading requests from stdin");
            drain(
                JsonLinesSource::new(BufReader::new(tokio::io::stdin())),
                &orchestrator,
                max_concurrent,
            )
            .await
        }
    };
    log::info!("Handled {handled} requests");

    if let Some(server) = health_server {
        server.stop(true).await;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { input, health_port } => serve(input, health_port).await?,
        Commands::Load {
            data_type,
            dataset_id,
            file,
            user_id,
            project_group_id,
        } => {
            let orchestrator = build_orchestrator().await?;
            let message = QueueMessage::new(
                dataset_id.clone(),
                "cli",
                ExtractLoadRequest {
                    data_type,
                    tdei_dataset_id: dataset_id.clone(),
                    tdei_project_group_id: project_group_id,
                    file_upload_path: file,
                    user_id,
                },
            );

            if !orchestrator.handle(&message).await {
                return Err(format!("Load of {dataset_id} failed").into());
            }
        }
        Commands::Migrate => {
            log::info!("Running database migrations...");
            let pool = db::connect_from_env().await?;
            run_migrations(pool.database()).await?;
            log::info!("Migrations complete.");
        }
    }

    Ok(())
}
