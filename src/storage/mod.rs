//! Sharded Storage Module
//!
//! Serves a key-value surface over tables split into fragments hosted on
//! worker nodes.
//!
//! ## Core Concepts
//! - **Dispatch**: `Dispatcher` maps a key to a fragment through the table's named
//!   `DispatchPolicy`, then to the healthy node hosting that fragment.
//! - **Fan-out**: whole-table operations (count, destroy, put_all, iterate) call
//!   every fragment in parallel and report all fragment failures together.
//! - **Shard service**: `ShardClient` is the per-fragment seam; `HttpShardClient`
//!   reaches a node's `/internal/shard/*` endpoints, backed there by `ShardStore`.
//! - **Access**: `KvService` is the table-level entry point used by the HTTP
//!   handlers and by transfers.

pub mod client;
pub mod dispatch;
pub mod fanout;
pub mod handlers;
pub mod kv;
pub mod protocol;
pub mod shard_store;
pub mod types;

pub use client::{HttpShardClient, LocalShardClient, ShardClient};
pub use dispatch::{DispatchPolicy, DispatchResult, Dispatcher, ModDispatchPolicy};
pub use kv::{KvService, KvSettings};
pub use shard_store::ShardStore;
pub use types::{KeyRange, Operand, PageRequest};
