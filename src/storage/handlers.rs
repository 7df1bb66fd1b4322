use axum::{
    Json, Router,
    body::{Body, BodyDataStream},
    extract::{Extension, Path},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;

use super::kv::KvService;
use super::protocol::*;
use super::shard_store::ShardStore;
use super::types::Operand;
use crate::catalog::StoreInfo;
use crate::error::{DataPlaneError, ErrorResponse, Result};

/// KV and shard routes. Handlers expect `Arc<KvService>` and `Arc<ShardStore>`
/// extensions.
pub fn routes() -> Router {
    Router::new()
        .route(ENDPOINT_KV_CREATE, post(handle_create))
        .route(ENDPOINT_KV_PUT, post(handle_put))
        .route(ENDPOINT_KV_PUT_IF_ABSENT, post(handle_put_if_absent))
        .route(ENDPOINT_KV_PUT_ALL, post(handle_put_all))
        .route(ENDPOINT_KV_DELETE, post(handle_delete))
        .route(ENDPOINT_KV_GET, post(handle_get))
        .route(ENDPOINT_KV_ITERATE, post(handle_iterate))
        .route(ENDPOINT_KV_DESTROY, post(handle_destroy))
        .route(ENDPOINT_KV_COUNT, get(handle_count))
        .route(ENDPOINT_SHARD_PUT, post(handle_shard_put))
        .route(ENDPOINT_SHARD_PUT_IF_ABSENT, post(handle_shard_put_if_absent))
        .route(ENDPOINT_SHARD_PUT_ALL, post(handle_shard_put_all))
        .route(ENDPOINT_SHARD_GET, post(handle_shard_get))
        .route(ENDPOINT_SHARD_DELETE, post(handle_shard_delete))
        .route(ENDPOINT_SHARD_PAGE, post(handle_shard_page))
        .route(ENDPOINT_SHARD_COUNT, post(handle_shard_count))
        .route(ENDPOINT_SHARD_DESTROY, post(handle_shard_destroy))
}

fn store_of(namespace: String, table: String) -> StoreInfo {
    StoreInfo::new(namespace, table)
}

// --- KV surface ---

pub async fn handle_create(
    Extension(kv): Extension<Arc<KvService>>,
    Path((namespace, table)): Path<(String, String)>,
    Json(req): Json<CreateTableRequest>,
) -> Result<Json<CreateTableResponse>> {
    let store = store_of(namespace, table);
    tracing::info!("Kv.createIfAbsent request received for {}", store);

    let (table, fragments) = kv
        .create_if_absent(&store, req.fragment_count, req.dispatcher)
        .await?;
    Ok(Json(CreateTableResponse { table, fragments }))
}

pub async fn handle_put(
    Extension(kv): Extension<Arc<KvService>>,
    Path((namespace, table)): Path<(String, String)>,
    Json(operand): Json<Operand>,
) -> Result<Json<AckResponse>> {
    let store = store_of(namespace, table);
    tracing::debug!("Kv.put request received. key: {}", operand.key);

    kv.put(&store, operand).await?;
    Ok(Json(AckResponse { success: true }))
}

pub async fn handle_put_if_absent(
    Extension(kv): Extension<Arc<KvService>>,
    Path((namespace, table)): Path<(String, String)>,
    Json(operand): Json<Operand>,
) -> Result<Json<ValueResponse>> {
    let store = store_of(namespace, table);
    tracing::debug!("Kv.putIfAbsent request received. key: {}", operand.key);

    let value = kv.put_if_absent(&store, operand).await?;
    Ok(Json(ValueResponse { value }))
}

/// Reads the body as newline-delimited JSON records and writes them as they
/// arrive, so the request size is not bounded by memory.
pub async fn handle_put_all(
    Extension(kv): Extension<Arc<KvService>>,
    Path((namespace, table)): Path<(String, String)>,
    body: Body,
) -> Result<Json<PutAllResponse>> {
    let store = store_of(namespace, table);
    tracing::info!("Kv.putAll request received for {}", store);

    let written = kv
        .put_all_streaming(&store, ndjson_operands(body.into_data_stream()))
        .await?;
    Ok(Json(PutAllResponse { written }))
}

/// Splits a body into lines and decodes each non-blank line as an [`Operand`].
fn ndjson_operands(body: BodyDataStream) -> impl Stream<Item = Result<Operand>> {
    let state = (body, Vec::<u8>::new(), VecDeque::new(), false);

    futures::stream::unfold(state, |(mut body, mut partial, mut pending, mut done)| async move {
        loop {
            if let Some(item) = pending.pop_front() {
                return Some((item, (body, partial, pending, done)));
            }
            if done {
                return None;
            }

            match body.next().await {
                Some(Ok(chunk)) => {
                    partial.extend_from_slice(&chunk);
                    if let Some(last) = partial.iter().rposition(|b| *b == b'\n') {
                        let rest = partial.split_off(last + 1);
                        pending.extend(partial.split(|b| *b == b'\n').filter_map(parse_line));
                        partial = rest;
                    }
                }
                Some(Err(e)) => {
                    pending.push_back(Err(DataPlaneError::InvalidArgument(format!(
                        "failed to read body: {}",
                        e
                    ))));
                    done = true;
                }
                None => {
                    pending.extend(parse_line(&partial));
                    partial.clear();
                    done = true;
                }
            }
        }
    })
}

fn parse_line(line: &[u8]) -> Option<Result<Operand>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_slice(line).map_err(|e| {
        DataPlaneError::InvalidArgument(format!("malformed record: {}", e))
    }))
}

pub async fn handle_delete(
    Extension(kv): Extension<Arc<KvService>>,
    Path((namespace, table)): Path<(String, String)>,
    Json(req): Json<KeyRequest>,
) -> Result<Json<ValueResponse>> {
    let store = store_of(namespace, table);
    tracing::debug!("Kv.delete request received. key: {}", req.key);

    let value = kv.delete(&store, &req.key).await?;
    Ok(Json(ValueResponse { value }))
}

pub async fn handle_get(
    Extension(kv): Extension<Arc<KvService>>,
    Path((namespace, table)): Path<(String, String)>,
    Json(req): Json<KeyRequest>,
) -> Result<Json<ValueResponse>> {
    let store = store_of(namespace, table);
    tracing::debug!("Kv.get request received. key: {}", req.key);

    let value = kv.get(&store, &req.key).await?;
    Ok(Json(ValueResponse { value }))
}

/// Streams the table as newline-delimited JSON records. A failure after the
/// stream has started is reported as a final `{"error": ...}` line.
pub async fn handle_iterate(
    Extension(kv): Extension<Arc<KvService>>,
    Path((namespace, table)): Path<(String, String)>,
    Json(req): Json<IterateRequest>,
) -> Result<Response> {
    let store = store_of(namespace, table);
    tracing::info!("Kv.iterate request received for {} (ordered: {})", store, req.ordered);

    let broker = if req.ordered {
        kv.iterate_ordered(&store, req.into_range()).await?
    } else {
        kv.iterate(&store, req.into_range()).await?
    };
    let lines = broker
        .into_stream(kv.settings().broker_wait)
        .map(|item| {
            let line = match item {
                Ok(operand) => serde_json::to_string(&operand),
                Err(e) => {
                    tracing::error!("Iterate stream failed: {}", e);
                    serde_json::to_string(&ErrorResponse {
                        error: e.to_string(),
                    })
                }
            };
            let mut line = line.unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e));
            line.push('\n');
            Ok::<_, Infallible>(line)
        });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

pub async fn handle_destroy(
    Extension(kv): Extension<Arc<KvService>>,
    Path((namespace, table)): Path<(String, String)>,
) -> Result<Json<AckResponse>> {
    let store = store_of(namespace, table);
    tracing::info!("Kv.destroy request received for {}", store);

    kv.destroy(&store).await?;
    Ok(Json(AckResponse { success: true }))
}

pub async fn handle_count(
    Extension(kv): Extension<Arc<KvService>>,
    Path((namespace, table)): Path<(String, String)>,
) -> Result<Json<CountResponse>> {
    let store = store_of(namespace, table);
    let count = kv.count(&store).await?;
    Ok(Json(CountResponse { count }))
}

// --- Internal shard service ---

fn reject_unsharded(store: &StoreInfo) -> Option<StatusCode> {
    if store.fragment.is_none() {
        tracing::error!("Shard request for {} carries no fragment", store);
        return Some(StatusCode::BAD_REQUEST);
    }
    None
}

pub async fn handle_shard_put(
    Extension(shards): Extension<Arc<ShardStore>>,
    Json(req): Json<ShardOperandRequest>,
) -> (StatusCode, Json<AckResponse>) {
    if let Some(status) = reject_unsharded(&req.store) {
        return (status, Json(AckResponse { success: false }));
    }
    shards.put(&req.store, req.operand);
    (StatusCode::OK, Json(AckResponse { success: true }))
}

pub async fn handle_shard_put_if_absent(
    Extension(shards): Extension<Arc<ShardStore>>,
    Json(req): Json<ShardOperandRequest>,
) -> (StatusCode, Json<ValueResponse>) {
    if let Some(status) = reject_unsharded(&req.store) {
        return (status, Json(ValueResponse { value: None }));
    }
    let value = shards.put_if_absent(&req.store, req.operand);
    (StatusCode::OK, Json(ValueResponse { value }))
}

pub async fn handle_shard_put_all(
    Extension(shards): Extension<Arc<ShardStore>>,
    Json(req): Json<ShardPutAllRequest>,
) -> (StatusCode, Json<PutAllResponse>) {
    if let Some(status) = reject_unsharded(&req.store) {
        return (status, Json(PutAllResponse { written: 0 }));
    }
    let written = shards.put_all(&req.store, req.operands);
    (StatusCode::OK, Json(PutAllResponse { written }))
}

pub async fn handle_shard_get(
    Extension(shards): Extension<Arc<ShardStore>>,
    Json(req): Json<ShardKeyRequest>,
) -> (StatusCode, Json<ValueResponse>) {
    if let Some(status) = reject_unsharded(&req.store) {
        return (status, Json(ValueResponse { value: None }));
    }
    let value = shards.get(&req.store, &req.key);
    (StatusCode::OK, Json(ValueResponse { value }))
}

pub async fn handle_shard_delete(
    Extension(shards): Extension<Arc<ShardStore>>,
    Json(req): Json<ShardKeyRequest>,
) -> (StatusCode, Json<ValueResponse>) {
    if let Some(status) = reject_unsharded(&req.store) {
        return (status, Json(ValueResponse { value: None }));
    }
    let value = shards.delete(&req.store, &req.key);
    (StatusCode::OK, Json(ValueResponse { value }))
}

pub async fn handle_shard_page(
    Extension(shards): Extension<Arc<ShardStore>>,
    Json(req): Json<ShardPageRequest>,
) -> (StatusCode, Json<ShardPageResponse>) {
    if let Some(status) = reject_unsharded(&req.store) {
        return (status, Json(ShardPageResponse { operands: vec![] }));
    }
    let operands = shards.page(&req.store, &req.page);
    (StatusCode::OK, Json(ShardPageResponse { operands }))
}

pub async fn handle_shard_count(
    Extension(shards): Extension<Arc<ShardStore>>,
    Json(req): Json<ShardStoreRequest>,
) -> (StatusCode, Json<CountResponse>) {
    if let Some(status) = reject_unsharded(&req.store) {
        return (status, Json(CountResponse { count: 0 }));
    }
    let count = shards.count(&req.store);
    (StatusCode::OK, Json(CountResponse { count }))
}

pub async fn handle_shard_destroy(
    Extension(shards): Extension<Arc<ShardStore>>,
    Json(req): Json<ShardStoreRequest>,
) -> (StatusCode, Json<AckResponse>) {
    if let Some(status) = reject_unsharded(&req.store) {
        return (status, Json(AckResponse { success: false }));
    }
    shards.destroy(&req.store);
    (StatusCode::OK, Json(AckResponse { success: true }))
}
