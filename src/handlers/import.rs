//! Voter-file import message handlers
//!
//! Every subject follows the same request/reply loop: parse `Request<T>`,
//! resolve the tenant from the token, call the engine, reply with a
//! `SuccessResponse` or an `ErrorResponse` carrying the error code.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use base64::Engine as _;
use chrono::Utc;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::auth;
use crate::error::{ImportError, ImportResult};
use crate::services::import_engine::ImportEngine;
use crate::types::{
    ConfirmMappingsRequest, EmptyPayload, ErrorResponse, JobErrorsRequest, JobIdRequest,
    ListRequest, Request, SuccessResponse, TenantContext, UploadFileRequest,
};

/// Response for delete operation
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub deleted: bool,
}

/// Map an engine error onto the wire, logging by severity
fn error_response(request_id: Uuid, operation: &str, err: &ImportError) -> ErrorResponse {
    match err {
        ImportError::Storage(e) => error!("import.{} failed: {:#}", operation, e),
        other => debug!("import.{} rejected: {}", operation, other),
    }
    ErrorResponse::new(request_id, err.code(), err.to_string())
}

/// Decode the base64 file body of an upload
fn decode_upload(request: &UploadFileRequest) -> ImportResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(request.content.trim())
        .map_err(|e| ImportError::MalformedFile(format!("upload content is not valid base64: {}", e)))
}

async fn publish<T: Serialize>(client: &Client, reply: async_nats::Subject, body: &T) -> Result<()> {
    if let Err(e) = client.publish(reply, serde_json::to_vec(body)?.into()).await {
        warn!("Failed to publish reply: {}", e);
    }
    Ok(())
}

/// Authenticated request/reply loop shared by every import subject
async fn serve<T, R, F, Fut>(
    client: Client,
    mut subscriber: Subscriber,
    operation: &'static str,
    jwt_secret: Arc<String>,
    handler: F,
) -> Result<()>
where
    T: DeserializeOwned,
    R: Serialize,
    F: Fn(TenantContext, T) -> Fut,
    Fut: Future<Output = ImportResult<R>>,
{
    while let Some(msg) = subscriber.next().await {
        debug!("Received import.{} message", operation);

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<T> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse import.{} request: {}", operation, e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                publish(&client, reply, &error).await?;
                continue;
            }
        };

        let ctx = match auth::extract_auth(&request, &jwt_secret) {
            Ok(ctx) => ctx,
            Err(_) => {
                let error = ErrorResponse::new(request.id, "UNAUTHORIZED", "Authentication required");
                publish(&client, reply, &error).await?;
                continue;
            }
        };

        let request_id = request.id;
        match handler(ctx, request.payload).await {
            Ok(payload) => {
                publish(&client, reply, &SuccessResponse::new(request_id, payload)).await?;
            }
            Err(e) => {
                publish(&client, reply, &error_response(request_id, operation, &e)).await?;
            }
        }
    }

    Ok(())
}

/// Handle import.upload messages
pub async fn handle_upload(
    client: Client,
    subscriber: Subscriber,
    engine: Arc<ImportEngine>,
    jwt_secret: Arc<String>,
) -> Result<()> {
    serve(client, subscriber, "upload", jwt_secret, move |ctx, req: UploadFileRequest| {
        let engine = engine.clone();
        async move {
            let bytes = decode_upload(&req)?;
            engine.upload_file(&ctx, &req.filename, &bytes).await
        }
    })
    .await
}

/// Handle import.analyze messages
pub async fn handle_analyze(
    client: Client,
    subscriber: Subscriber,
    engine: Arc<ImportEngine>,
    jwt_secret: Arc<String>,
) -> Result<()> {
    serve(client, subscriber, "analyze", jwt_secret, move |ctx, req: JobIdRequest| {
        let engine = engine.clone();
        async move { engine.analyze_job(&ctx, req.job_id).await }
    })
    .await
}

/// Handle import.analysis messages
pub async fn handle_get_analysis(
    client: Client,
    subscriber: Subscriber,
    engine: Arc<ImportEngine>,
    jwt_secret: Arc<String>,
) -> Result<()> {
    serve(client, subscriber, "analysis", jwt_secret, move |ctx, req: JobIdRequest| {
        let engine = engine.clone();
        async move { engine.get_analysis(&ctx, req.job_id).await }
    })
    .await
}

/// Handle import.confirm messages
pub async fn handle_confirm(
    client: Client,
    subscriber: Subscriber,
    engine: Arc<ImportEngine>,
    jwt_secret: Arc<String>,
) -> Result<()> {
    serve(client, subscriber, "confirm", jwt_secret, move |ctx, req: ConfirmMappingsRequest| {
        let engine = engine.clone();
        async move { engine.confirm_mappings(&ctx, req).await }
    })
    .await
}

/// Handle import.start messages
pub async fn handle_start(
    client: Client,
    subscriber: Subscriber,
    engine: Arc<ImportEngine>,
    jwt_secret: Arc<String>,
) -> Result<()> {
    serve(client, subscriber, "start", jwt_secret, move |ctx, req: JobIdRequest| {
        let engine = engine.clone();
        async move { engine.start_import(&ctx, req.job_id).await }
    })
    .await
}

/// Handle import.get messages
pub async fn handle_get(
    client: Client,
    subscriber: Subscriber,
    engine: Arc<ImportEngine>,
    jwt_secret: Arc<String>,
) -> Result<()> {
    serve(client, subscriber, "get", jwt_secret, move |ctx, req: JobIdRequest| {
        let engine = engine.clone();
        async move { engine.get_job(&ctx, req.job_id).await }
    })
    .await
}

/// Handle import.progress messages
pub async fn handle_progress(
    client: Client,
    subscriber: Subscriber,
    engine: Arc<ImportEngine>,
    jwt_secret: Arc<String>,
) -> Result<()> {
    serve(client, subscriber, "progress", jwt_secret, move |ctx, req: JobIdRequest| {
        let engine = engine.clone();
        async move { engine.get_job_progress(&ctx, req.job_id, Utc::now()).await }
    })
    .await
}

/// Handle import.list messages
pub async fn handle_list(
    client: Client,
    subscriber: Subscriber,
    engine: Arc<ImportEngine>,
    jwt_secret: Arc<String>,
) -> Result<()> {
    serve(client, subscriber, "list", jwt_secret, move |ctx, req: ListRequest| {
        let engine = engine.clone();
        async move { engine.list_jobs(&ctx, req.limit, req.offset).await }
    })
    .await
}

/// Handle import.errors messages
pub async fn handle_errors(
    client: Client,
    subscriber: Subscriber,
    engine: Arc<ImportEngine>,
    jwt_secret: Arc<String>,
) -> Result<()> {
    serve(client, subscriber, "errors", jwt_secret, move |ctx, req: JobErrorsRequest| {
        let engine = engine.clone();
        async move { engine.list_job_errors(&ctx, req.job_id, req.limit, req.offset).await }
    })
    .await
}

/// Handle import.delete messages
pub async fn handle_delete(
    client: Client,
    subscriber: Subscriber,
    engine: Arc<ImportEngine>,
    jwt_secret: Arc<String>,
) -> Result<()> {
    serve(client, subscriber, "delete", jwt_secret, move |ctx, req: JobIdRequest| {
        let engine = engine.clone();
        async move {
            engine.delete_job(&ctx, req.job_id).await?;
            Ok(DeleteResponse { deleted: true })
        }
    })
    .await
}

/// Handle import.strategies messages
pub async fn handle_strategies(
    client: Client,
    subscriber: Subscriber,
    engine: Arc<ImportEngine>,
    jwt_secret: Arc<String>,
) -> Result<()> {
    serve(client, subscriber, "strategies", jwt_secret, move |_ctx, _req: Option<EmptyPayload>| {
        let engine = engine.clone();
        async move { Ok(engine.list_matching_strategies()) }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;

    #[test]
    fn test_decode_upload_accepts_padded_base64() {
        let request = UploadFileRequest {
            filename: "voters.csv".into(),
            content: base64::engine::general_purpose::STANDARD.encode("VoterID\nV1\n"),
        };
        assert_eq!(decode_upload(&request).unwrap(), b"VoterID\nV1\n");
    }

    #[test]
    fn test_decode_upload_rejects_garbage() {
        let request = UploadFileRequest {
            filename: "voters.csv".into(),
            content: "not base64!!".into(),
        };
        let err = decode_upload(&request).unwrap_err();
        assert_eq!(err.code(), "MALFORMED_FILE");
    }

    #[test]
    fn test_error_response_carries_code_and_message() {
        let id = Uuid::new_v4();
        let response = error_response(id, "delete", &ImportError::JobBusy(JobStatus::Processing));
        assert_eq!(response.id, id);
        assert_eq!(response.error.code, "JOB_BUSY");
        assert_eq!(response.error.message, "Import job is processing and cannot be deleted");
    }

    #[test]
    fn test_delete_request_parses_camel_case() {
        let job_id = Uuid::new_v4();
        let json = format!(
            r#"{{"id":"{}","timestamp":"2026-03-01T00:00:00Z","token":"t","payload":{{"jobId":"{}"}}}}"#,
            Uuid::nil(),
            job_id
        );
        let request: Request<JobIdRequest> = serde_json::from_str(&json).unwrap();
        assert_eq!(request.payload.job_id, job_id);
    }
}
