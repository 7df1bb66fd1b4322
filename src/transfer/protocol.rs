//! Transfer Network Protocol
//!
//! Client-facing endpoints take and return a [`TransferMeta`]. The internal
//! ingest endpoints are called by the sending party to deliver a transfer.

use super::types::TransferMeta;
use crate::storage::Operand;

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Idempotent submit on the sending side.
pub const ENDPOINT_SEND: &str = "/transfer/send";
/// Idempotent submit on the receiving side.
pub const ENDPOINT_RECV: &str = "/transfer/recv";
/// Non-blocking status read.
pub const ENDPOINT_CHECK_STATUS_NOW: &str = "/transfer/check_status_now";
/// Long-poll until the transfer is terminal or the deadline passes.
pub const ENDPOINT_CHECK_STATUS: &str = "/transfer/check_status";

/// Sender announces a transfer (marks it arrived on the receiver).
pub const ENDPOINT_INGEST_START: &str = "/internal/transfer/start";
/// Sender delivers a batch of records.
pub const ENDPOINT_INGEST_PUSH: &str = "/internal/transfer/push";
/// Sender declares the transfer complete.
pub const ENDPOINT_INGEST_END: &str = "/internal/transfer/end";

// --- Data Transfer Objects ---

/// A batch of records for an arrived transfer.
#[derive(Debug, Serialize, Deserialize)]
pub struct PushRequest {
    pub meta: TransferMeta,
    pub records: Vec<Operand>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PushResponse {
    pub received: usize,
}

/// Acknowledges `start`/`end`. `accepted` is false on a duplicate start or an
/// end without a start.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: bool,
}
