//! Federated Transfer Module
//!
//! Moves a table's records from one party to another. Both parties derive the
//! same transfer id from the transfer's composite key, so neither side needs a
//! handshake to find the other's state.
//!
//! ## Core Concepts
//! - **Send side**: `SendTasks` holds one task per id; the worker scans the
//!   source table and pushes it to the destination party's ingest path.
//! - **Receive side**: `RecvRegistry` records arrival, owns the broker the
//!   ingest path produces into, and caches the terminal result.
//! - **Worker**: task creation posts a `TransferJob` on a channel; the
//!   `TransferWorker` allocates resources and runs the job off the request path.
//! - **Status**: `check_status` waits on terminal transitions with a bounded
//!   poll fallback and a hard deadline.
//! - **Janitor**: expired results and abandoned brokers are swept periodically.

pub mod handlers;
pub mod janitor;
pub mod peer;
pub mod poller;
pub mod protocol;
pub mod registry;
pub mod send_tasks;
pub mod service;
pub mod types;
pub mod worker;

pub use peer::{HttpTransferPeer, LoopbackPeer, PeerDirectory, TransferPeer};
pub use registry::RecvRegistry;
pub use send_tasks::SendTasks;
pub use service::TransferService;
pub use types::{Party, TransferId, TransferMeta, TransferStatus, TransferType};
pub use worker::{TransferJob, TransferWorker};

use std::time::Duration;

/// Timing and sizing of the transfer path.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub broker_capacity: usize,
    /// Consumer signal wait while draining a broker.
    pub broker_wait: Duration,
    /// Records per push to the receiving party.
    pub batch_size: usize,
    /// How long a receive task waits for the sender before failing.
    pub arrival_timeout: Duration,
    pub status_poll_interval: Duration,
    pub status_deadline: Duration,
    pub finished_retention: Duration,
    pub janitor_interval: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            broker_capacity: 10_000,
            broker_wait: Duration::from_millis(1000),
            batch_size: 500,
            arrival_timeout: Duration::from_secs(300),
            status_poll_interval: Duration::from_millis(500),
            status_deadline: Duration::from_secs(300),
            finished_retention: Duration::from_secs(3600),
            janitor_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests;
