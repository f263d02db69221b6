//! NATS message handlers

pub mod import;
pub mod ping;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use tokio::select;
use tracing::{error, info};

use crate::config::Config;
use crate::services::import_engine::ImportEngine;

/// Start all message handlers
pub async fn start_handlers(client: Client, engine: Arc<ImportEngine>, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    let jwt_secret = Arc::new(config.jwt_secret.clone());

    // Subscribe to all subjects
    let ping_sub = client.subscribe("constituent.ping").await?;
    let upload_sub = client.subscribe("constituent.import.upload").await?;
    let analyze_sub = client.subscribe("constituent.import.analyze").await?;
    let analysis_sub = client.subscribe("constituent.import.analysis").await?;
    let confirm_sub = client.subscribe("constituent.import.confirm").await?;
    let start_sub = client.subscribe("constituent.import.start").await?;
    let get_sub = client.subscribe("constituent.import.get").await?;
    let progress_sub = client.subscribe("constituent.import.progress").await?;
    let list_sub = client.subscribe("constituent.import.list").await?;
    let errors_sub = client.subscribe("constituent.import.errors").await?;
    let delete_sub = client.subscribe("constituent.import.delete").await?;
    let strategies_sub = client.subscribe("constituent.import.strategies").await?;

    info!("Subscribed to NATS subjects");

    let ping_handle = tokio::spawn(ping::handle_ping(client.clone(), ping_sub));
    let upload_handle = tokio::spawn(import::handle_upload(
        client.clone(),
        upload_sub,
        Arc::clone(&engine),
        Arc::clone(&jwt_secret),
    ));
    let analyze_handle = tokio::spawn(import::handle_analyze(
        client.clone(),
        analyze_sub,
        Arc::clone(&engine),
        Arc::clone(&jwt_secret),
    ));
    let analysis_handle = tokio::spawn(import::handle_get_analysis(
        client.clone(),
        analysis_sub,
        Arc::clone(&engine),
        Arc::clone(&jwt_secret),
    ));
    let confirm_handle = tokio::spawn(import::handle_confirm(
        client.clone(),
        confirm_sub,
        Arc::clone(&engine),
        Arc::clone(&jwt_secret),
    ));
    let start_handle = tokio::spawn(import::handle_start(
        client.clone(),
        start_sub,
        Arc::clone(&engine),
        Arc::clone(&jwt_secret),
    ));
    let get_handle = tokio::spawn(import::handle_get(
        client.clone(),
        get_sub,
        Arc::clone(&engine),
        Arc::clone(&jwt_secret),
    ));
    let progress_handle = tokio::spawn(import::handle_progress(
        client.clone(),
        progress_sub,
        Arc::clone(&engine),
        Arc::clone(&jwt_secret),
    ));
    let list_handle = tokio::spawn(import::handle_list(
        client.clone(),
        list_sub,
        Arc::clone(&engine),
        Arc::clone(&jwt_secret),
    ));
    let errors_handle = tokio::spawn(import::handle_errors(
        client.clone(),
        errors_sub,
        Arc::clone(&engine),
        Arc::clone(&jwt_secret),
    ));
    let delete_handle = tokio::spawn(import::handle_delete(
        client.clone(),
        delete_sub,
        Arc::clone(&engine),
        Arc::clone(&jwt_secret),
    ));
    let strategies_handle = tokio::spawn(import::handle_strategies(
        client.clone(),
        strategies_sub,
        Arc::clone(&engine),
        Arc::clone(&jwt_secret),
    ));

    info!("All handlers started, waiting for messages...");

    // Wait for any handler to finish (which means an error occurred)
    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = upload_handle => {
            error!("Import upload handler finished: {:?}", result);
        }
        result = analyze_handle => {
            error!("Import analyze handler finished: {:?}", result);
        }
        result = analysis_handle => {
            error!("Import analysis handler finished: {:?}", result);
        }
        result = confirm_handle => {
            error!("Import confirm handler finished: {:?}", result);
        }
        result = start_handle => {
            error!("Import start handler finished: {:?}", result);
        }
        result = get_handle => {
            error!("Import get handler finished: {:?}", result);
        }
        result = progress_handle => {
            error!("Import progress handler finished: {:?}", result);
        }
        result = list_handle => {
            error!("Import list handler finished: {:?}", result);
        }
        result = errors_handle => {
            error!("Import errors handler finished: {:?}", result);
        }
        result = delete_handle => {
            error!("Import delete handler finished: {:?}", result);
        }
        result = strategies_handle => {
            error!("Import strategies handler finished: {:?}", result);
        }
    }

    Ok(())
}
