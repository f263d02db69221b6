//! Constituent Import Worker - voter-file import backend
//!
//! This worker connects to NATS, serves the import request subjects and
//! runs queued imports in the background.

mod auth;
mod cli;
mod config;
mod db;
mod defaults;
mod error;
mod handlers;
mod services;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::{Config, StorageBackend};
use crate::db::memory::MemoryStore;
use crate::db::queries::{PgContactStore, PgJobStore};
use crate::db::{ContactStore, JobStore};
use crate::defaults::ImportSettings;
use crate::services::field_mapping::{FieldMappingSuggester, HttpMappingClassifier};
use crate::services::import_engine::{self, ImportEngine};
use crate::services::import_processor::{
    run_jetstream_worker, run_local_worker, ImportDispatcher, JetStreamDispatcher, LocalDispatcher,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs directory - use LOGS_DIR env var or default to ../logs (relative to worker)
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,constituent_import_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = Config::from_env()?;
            info!("Configuration loaded");
            serve(config).await
        }
        Command::Migrate => {
            let config = Config::from_env()?;
            let pool = connect_database(&config).await?;
            db::run_migrations(&pool).await
        }
        Command::Analyze { file } => {
            let settings = config::import_settings_from_env()?;
            let suggester = suggester(&settings, config::classifier_url_from_env().as_deref());
            let bytes = std::fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            let analysis = import_engine::build_analysis(&bytes, &suggester, &settings).await?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            Ok(())
        }
    }
}

fn suggester(settings: &ImportSettings, classifier_url: Option<&str>) -> FieldMappingSuggester {
    let suggester = FieldMappingSuggester::new(settings);
    match classifier_url {
        Some(url) => {
            info!("Mapping classifier enabled at {}", url);
            suggester.with_classifier(Arc::new(HttpMappingClassifier::new(url)))
        }
        None => suggester,
    }
}

async fn connect_database(config: &Config) -> Result<sqlx::PgPool> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for this command")?;
    let pool = db::create_pool(url).await?;
    info!("Connected to PostgreSQL");
    Ok(pool)
}

async fn connect_nats(config: &Config) -> Result<async_nats::Client> {
    // Supports optional NATS_USER/NATS_PASSWORD auth
    let client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);
    Ok(client)
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting Constituent Import Worker...");

    let nats_client = connect_nats(&config).await?;
    let suggester = suggester(&config.import, config.classifier_url.as_deref());

    let (engine, worker) = match config.storage_backend {
        StorageBackend::Postgres => {
            let pool = connect_database(&config).await?;
            db::run_migrations(&pool).await?;

            let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
            let contacts: Arc<dyn ContactStore> = Arc::new(PgContactStore::new(pool));
            let dispatcher: Arc<dyn ImportDispatcher> =
                Arc::new(JetStreamDispatcher::new(nats_client.clone()).await?);
            let engine = Arc::new(ImportEngine::new(jobs, contacts, suggester, dispatcher, config.import.clone()));

            let worker_client = nats_client.clone();
            let worker_engine = Arc::clone(&engine);
            let worker = tokio::spawn(async move {
                if let Err(e) = run_jetstream_worker(worker_client, worker_engine).await {
                    error!("JetStream import worker stopped: {:#}", e);
                }
            });
            (engine, worker)
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage; jobs and contacts are lost on restart");
            let store = Arc::new(MemoryStore::new());
            let (dispatcher, rx) = LocalDispatcher::channel();
            let engine = Arc::new(ImportEngine::new(
                store.clone(),
                store,
                suggester,
                Arc::new(dispatcher),
                config.import.clone(),
            ));
            let worker = tokio::spawn(run_local_worker(rx, Arc::clone(&engine)));
            (engine, worker)
        }
    };
    info!("Import worker started");

    tokio::select! {
        result = handlers::start_handlers(nats_client, engine, &config) => {
            if let Err(e) = result {
                error!("Handler error: {}", e);
                return Err(e);
            }
        }
        result = worker => {
            error!("Import worker finished: {:?}", result);
        }
    }

    Ok(())
}
