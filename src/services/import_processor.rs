//! Import queue
//!
//! Confirmed jobs are handed to a background worker through an
//! `ImportDispatcher`:
//! - `JetStreamDispatcher` publishes to a JetStream work queue, consumed by
//!   `run_jetstream_worker` (survives restarts, redelivers on crash)
//! - `LocalDispatcher` feeds an in-process channel drained by
//!   `run_local_worker` (memory backend and tests)
//!
//! ## Streams
//! - `CONSTITUENT_IMPORT_JOBS` - voter-file import jobs

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_nats::jetstream::{self, Context as JsContext};
use async_nats::Client;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::services::import_engine::ImportEngine;
use crate::types::QueuedImportJob;

// Stream and consumer names
const STREAM_NAME: &str = "CONSTITUENT_IMPORT_JOBS";
const CONSUMER_NAME: &str = "import_workers";
const SUBJECT: &str = "constituent.jobs.import";

/// Hands queued jobs to the background execution context
#[async_trait]
pub trait ImportDispatcher: Send + Sync {
    async fn dispatch(&self, job: &QueuedImportJob) -> Result<()>;

    fn name(&self) -> &'static str;
}

// ==========================================================================
// JetStream
// ==========================================================================

pub struct JetStreamDispatcher {
    js: JsContext,
}

impl JetStreamDispatcher {
    /// Create the dispatcher, initializing the JetStream stream
    pub async fn new(client: Client) -> Result<Self> {
        let js = jetstream::new(client);

        let stream_config = jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![SUBJECT.to_string()],
            max_messages: 10_000,
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        js.get_or_create_stream(stream_config).await?;
        info!("JetStream import stream '{}' ready", STREAM_NAME);

        Ok(Self { js })
    }
}

#[async_trait]
impl ImportDispatcher for JetStreamDispatcher {
    async fn dispatch(&self, job: &QueuedImportJob) -> Result<()> {
        let payload = serde_json::to_vec(job)?;
        self.js.publish(SUBJECT, payload.into()).await?.await?;
        info!(job_id = %job.job_id, "Import job queued on JetStream");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jetstream"
    }
}

/// Consume queued jobs from JetStream, one at a time
pub async fn run_jetstream_worker(client: Client, engine: Arc<ImportEngine>) -> Result<()> {
    let js = jetstream::new(client);
    let stream = js.get_stream(STREAM_NAME).await?;

    let consumer_config = jetstream::consumer::pull::Config {
        durable_name: Some(CONSUMER_NAME.to_string()),
        ack_policy: jetstream::consumer::AckPolicy::Explicit,
        max_deliver: 3,
        filter_subject: SUBJECT.to_string(),
        ..Default::default()
    };

    let consumer = stream.get_or_create_consumer(CONSUMER_NAME, consumer_config).await?;
    info!("JetStream import consumer '{}' ready", CONSUMER_NAME);

    let mut messages = consumer.messages().await?;

    while let Some(msg) = messages.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                error!("Error receiving import message: {}", e);
                continue;
            }
        };

        match serde_json::from_slice::<QueuedImportJob>(&msg.payload) {
            Ok(job) => run_job(&engine, &job).await,
            Err(e) => warn!("Dropping unparsable import message: {}", e),
        }

        // Job outcome lives in the job row; redelivery would find it no longer queued
        if let Err(e) = msg.ack().await {
            error!("Failed to ack import message: {:?}", e);
        }
    }

    Ok(())
}

// ==========================================================================
// In-process channel
// ==========================================================================

pub struct LocalDispatcher {
    tx: mpsc::UnboundedSender<QueuedImportJob>,
}

impl LocalDispatcher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<QueuedImportJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ImportDispatcher for LocalDispatcher {
    async fn dispatch(&self, job: &QueuedImportJob) -> Result<()> {
        self.tx
            .send(job.clone())
            .map_err(|_| anyhow::anyhow!("Local import worker has stopped"))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Drain the in-process queue until every sender is dropped
pub async fn run_local_worker(mut rx: mpsc::UnboundedReceiver<QueuedImportJob>, engine: Arc<ImportEngine>) {
    while let Some(job) = rx.recv().await {
        run_job(&engine, &job).await;
    }
    info!("Local import worker finished");
}

async fn run_job(engine: &ImportEngine, job: &QueuedImportJob) {
    let start_time = Instant::now();
    info!(job_id = %job.job_id, tenant_id = %job.tenant_id, "Processing import job");

    match engine.process_job(job).await {
        Ok(()) => info!(
            job_id = %job.job_id,
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Import job finished"
        ),
        Err(e) => error!(job_id = %job.job_id, "Import job could not be processed: {:#}", e),
    }
}
