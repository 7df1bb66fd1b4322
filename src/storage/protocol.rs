//! Storage Network Protocol
//!
//! Endpoints and DTOs for the client-facing KV surface and for the internal
//! per-fragment shard service that the KV surface dispatches to.
//!
//! KV routes are table-scoped (`/kv/:namespace/:table/...`); shard requests carry
//! the fragment-narrowed [`StoreInfo`] in the body.

use super::types::{KeyRange, Operand, PageRequest};
use crate::catalog::{Dtable, Fragment, StoreInfo};

use serde::{Deserialize, Serialize};

// --- KV Endpoints ---

pub const ENDPOINT_KV_CREATE: &str = "/kv/:namespace/:table/create";
pub const ENDPOINT_KV_PUT: &str = "/kv/:namespace/:table/put";
pub const ENDPOINT_KV_PUT_IF_ABSENT: &str = "/kv/:namespace/:table/put_if_absent";
/// Bulk write. The body is newline-delimited JSON records, written in batches
/// as it arrives; each batch is grouped by fragment and written in parallel.
pub const ENDPOINT_KV_PUT_ALL: &str = "/kv/:namespace/:table/put_all";
pub const ENDPOINT_KV_DELETE: &str = "/kv/:namespace/:table/delete";
pub const ENDPOINT_KV_GET: &str = "/kv/:namespace/:table/get";
/// Streams newline-delimited JSON records, per-fragment ordered unless the
/// request asks for global key order.
pub const ENDPOINT_KV_ITERATE: &str = "/kv/:namespace/:table/iterate";
pub const ENDPOINT_KV_DESTROY: &str = "/kv/:namespace/:table/destroy";
pub const ENDPOINT_KV_COUNT: &str = "/kv/:namespace/:table/count";

// --- Internal Shard Endpoints ---

pub const ENDPOINT_SHARD_PUT: &str = "/internal/shard/put";
pub const ENDPOINT_SHARD_PUT_IF_ABSENT: &str = "/internal/shard/put_if_absent";
pub const ENDPOINT_SHARD_PUT_ALL: &str = "/internal/shard/put_all";
pub const ENDPOINT_SHARD_GET: &str = "/internal/shard/get";
pub const ENDPOINT_SHARD_DELETE: &str = "/internal/shard/delete";
pub const ENDPOINT_SHARD_PAGE: &str = "/internal/shard/page";
pub const ENDPOINT_SHARD_COUNT: &str = "/internal/shard/count";
pub const ENDPOINT_SHARD_DESTROY: &str = "/internal/shard/destroy";

// --- KV Data Transfer Objects ---

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateTableRequest {
    #[serde(default)]
    pub fragment_count: Option<u32>,
    /// Dispatch policy name; the default policy when omitted.
    #[serde(default)]
    pub dispatcher: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTableResponse {
    pub table: Dtable,
    pub fragments: Vec<Fragment>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyRequest {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutAllResponse {
    pub written: usize,
}

/// Value lookup result. `None` means the key is absent.
#[derive(Debug, Serialize, Deserialize)]
pub struct ValueResponse {
    pub value: Option<String>,
}

/// Key interval to scan; `start` inclusive, `end` exclusive.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IterateRequest {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    /// Merge fragments into one key-ordered stream.
    #[serde(default)]
    pub ordered: bool,
}

impl IterateRequest {
    pub fn into_range(self) -> KeyRange {
        KeyRange {
            start: self.start,
            end: self.end,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

// --- Shard Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct ShardOperandRequest {
    pub store: StoreInfo,
    pub operand: Operand,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShardKeyRequest {
    pub store: StoreInfo,
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShardPutAllRequest {
    pub store: StoreInfo,
    pub operands: Vec<Operand>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShardPageRequest {
    pub store: StoreInfo,
    pub page: PageRequest,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShardPageResponse {
    pub operands: Vec<Operand>,
}

/// Whole-fragment request (count, destroy).
#[derive(Debug, Serialize, Deserialize)]
pub struct ShardStoreRequest {
    pub store: StoreInfo,
}
