use axum::{Json, Router, extract::Extension, http::StatusCode, routing::post};
use std::sync::Arc;

use super::protocol::*;
use super::service::TransferService;
use super::types::TransferMeta;
use crate::error::Result;

/// Client-facing and peer-facing transfer routes. Handlers expect an
/// `Arc<TransferService>` extension.
pub fn routes() -> Router {
    Router::new()
        .route(ENDPOINT_SEND, post(handle_send))
        .route(ENDPOINT_RECV, post(handle_recv))
        .route(ENDPOINT_CHECK_STATUS_NOW, post(handle_check_status_now))
        .route(ENDPOINT_CHECK_STATUS, post(handle_check_status))
        .route(ENDPOINT_INGEST_START, post(handle_ingest_start))
        .route(ENDPOINT_INGEST_PUSH, post(handle_ingest_push))
        .route(ENDPOINT_INGEST_END, post(handle_ingest_end))
}

pub async fn handle_send(
    Extension(service): Extension<Arc<TransferService>>,
    Json(meta): Json<TransferMeta>,
) -> Json<TransferMeta> {
    Json(service.send(&meta))
}

pub async fn handle_recv(
    Extension(service): Extension<Arc<TransferService>>,
    Json(meta): Json<TransferMeta>,
) -> Json<TransferMeta> {
    Json(service.recv(&meta))
}

pub async fn handle_check_status_now(
    Extension(service): Extension<Arc<TransferService>>,
    Json(meta): Json<TransferMeta>,
) -> Result<Json<TransferMeta>> {
    Ok(Json(service.check_status_now(&meta)?))
}

pub async fn handle_check_status(
    Extension(service): Extension<Arc<TransferService>>,
    Json(meta): Json<TransferMeta>,
) -> Result<Json<TransferMeta>> {
    Ok(Json(service.check_status(&meta).await?))
}

pub async fn handle_ingest_start(
    Extension(service): Extension<Arc<TransferService>>,
    Json(meta): Json<TransferMeta>,
) -> Json<IngestResponse> {
    // A duplicate start is a sender retry, not an error.
    Json(IngestResponse {
        accepted: service.ingest_start(&meta),
    })
}

pub async fn handle_ingest_push(
    Extension(service): Extension<Arc<TransferService>>,
    Json(req): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    let received = service.ingest_push(&req.meta, req.records).await?;
    Ok(Json(PushResponse { received }))
}

pub async fn handle_ingest_end(
    Extension(service): Extension<Arc<TransferService>>,
    Json(meta): Json<TransferMeta>,
) -> Result<(StatusCode, Json<IngestResponse>)> {
    if service.ingest_end(&meta)? {
        Ok((StatusCode::OK, Json(IngestResponse { accepted: true })))
    } else {
        tracing::warn!("End of {} received before its start", meta.transfer_id());
        Ok((StatusCode::CONFLICT, Json(IngestResponse { accepted: false })))
    }
}
