//! Federated Data Plane Library
//!
//! Moves intermediate data between independent parties of a joint computation,
//! and serves each party's compute layer a key-value store sharded across
//! worker nodes. The binary (`main.rs`) wires these into one node process.
//!
//! ## Architecture Modules
//!
//! - **`broker`**: bounded producer/consumer queue with finished/closable
//!   signaling. Decouples arrival of records from their consumption.
//! - **`catalog`**: tables, fragments and nodes, read through the `MetaCatalog`
//!   trait. An in-memory backend is included.
//! - **`storage`**: key dispatch to fragments, parallel fan-out over a table's
//!   fragments, the per-fragment shard service and the KV surface.
//! - **`transfer`**: idempotent send/recv submission, the receive-side task
//!   registry, the transfer worker and status long-polling.
//! - **`config`**: command line and YAML node configuration.
//! - **`error`**: the error taxonomy and its HTTP mapping.
//! - **`retry`**: the retrying HTTP POST shared by shard and peer clients.

pub mod broker;
pub mod catalog;
pub mod config;
pub mod error;
pub mod retry;
pub mod storage;
pub mod transfer;

/// Current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
