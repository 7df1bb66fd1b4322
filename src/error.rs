//! Data-plane error taxonomy.
//!
//! Collaborator plumbing (HTTP helpers, catalog backends, shard clients) speaks
//! `anyhow::Result`; everything that a caller of the transfer or KV surface can
//! observe is a [`DataPlaneError`].

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataPlaneError {
    /// Request carried a value the operation cannot interpret (e.g. transfer direction).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The table is not registered in the metadata catalog.
    #[error("storage not found: {namespace}/{table}")]
    StorageNotFound { namespace: String, table: String },

    /// A registry or broker invariant was violated.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// One or more fragment-level calls failed during a fan-out.
    #[error(
        "{context}: {n} fragment call(s) failed: [{joined}]",
        n = .causes.len(),
        joined = .causes.join("; ")
    )]
    AggregateFailure { context: String, causes: Vec<String> },

    /// The node hosting a fragment is not in the healthy set.
    #[error("node {node_id} hosting fragment {fragment} is unavailable")]
    NodeUnavailable { node_id: u64, fragment: u32 },

    #[error(transparent)]
    Remote(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DataPlaneError>;

impl DataPlaneError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DataPlaneError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            DataPlaneError::StorageNotFound { .. } => StatusCode::NOT_FOUND,
            DataPlaneError::IllegalState(_) => StatusCode::CONFLICT,
            DataPlaneError::AggregateFailure { .. } | DataPlaneError::NodeUnavailable { .. } => {
                StatusCode::BAD_GATEWAY
            }
            DataPlaneError::Remote(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for DataPlaneError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
