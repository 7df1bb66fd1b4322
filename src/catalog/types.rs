//! Catalog Data Types
//!
//! Records describing logical tables, their shards and the worker nodes that host
//! them. The data plane reads these through [`MetaCatalog`](super::MetaCatalog) and
//! never owns their persistence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Identifies a logical table, optionally narrowed to one fragment once dispatched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StoreInfo {
    pub namespace: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<u32>,
}

impl StoreInfo {
    pub fn new(namespace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            table: table.into(),
            fragment: None,
        }
    }

    /// Copy of this store narrowed to a single fragment.
    pub fn with_fragment(&self, fragment: u32) -> Self {
        Self {
            namespace: self.namespace.clone(),
            table: self.table.clone(),
            fragment: Some(fragment),
        }
    }
}

impl fmt::Display for StoreInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fragment {
            Some(fragment) => write!(f, "{}/{}#{}", self.namespace, self.table, fragment),
            None => write!(f, "{}/{}", self.namespace, self.table),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    Normal,
    Deleted,
}

/// Catalog record of a logical table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dtable {
    pub table_id: u64,
    pub namespace: String,
    pub table_name: String,
    pub status: TableStatus,
    /// Name of the dispatcher policy used to route keys of this table.
    pub dispatcher: String,
    pub fragment_count: u32,
}

impl Dtable {
    pub fn is_normal(&self) -> bool {
        self.status == TableStatus::Normal
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FragmentStatus {
    Normal,
    Deleted,
}

/// One shard of a table, hosted on exactly one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fragment {
    pub fragment_id: u64,
    pub table_id: u64,
    /// Shard index in `0..fragment_count`; what the dispatch policy resolves to.
    pub fragment_order: u32,
    pub node_id: u64,
    pub status: FragmentStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeHealth {
    Healthy,
    Unhealthy,
}

/// A worker process hosting fragments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub node_id: u64,
    pub addr: SocketAddr,
    pub health: NodeHealth,
}

impl Node {
    pub fn new(node_id: u64, addr: SocketAddr) -> Self {
        Self {
            node_id,
            addr,
            health: NodeHealth::Healthy,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health == NodeHealth::Healthy
    }
}
