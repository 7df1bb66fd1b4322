//! Delivery of a transfer's records to the receiving party.

use super::protocol::*;
use super::registry::RecvRegistry;
use super::types::{Party, TransferMeta};
use crate::retry::{RetryPolicy, post_with_retry};
use crate::storage::Operand;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// The receiving party's ingest path, as seen from the sender.
#[async_trait]
pub trait TransferPeer: Send + Sync {
    async fn start(&self, meta: &TransferMeta) -> Result<()>;

    async fn push(&self, meta: &TransferMeta, records: Vec<Operand>) -> Result<()>;

    async fn end(&self, meta: &TransferMeta) -> Result<()>;
}

const PEER_ATTEMPTS: usize = 3;

/// Posts to another party's `/internal/transfer/*` endpoints.
pub struct HttpTransferPeer {
    addr: SocketAddr,
    http_client: reqwest::Client,
}

impl HttpTransferPeer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            http_client: reqwest::Client::new(),
        }
    }

    /// Posts to the receiver, retrying transport errors and server errors.
    /// A client error is the receiver's final answer.
    async fn post<T: Serialize>(
        &self,
        endpoint: &str,
        payload: &T,
        timeout: Duration,
    ) -> Result<()> {
        let url = format!("http://{}{}", self.addr, endpoint);
        let policy = RetryPolicy {
            attempts: PEER_ATTEMPTS,
            timeout,
        };
        let resp = post_with_retry(&self.http_client, &url, payload, policy, |status| {
            status.is_server_error()
        })
        .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            Err(anyhow::anyhow!("{} rejected by {}: {}", endpoint, self.addr, status))
        } else {
            Err(anyhow::anyhow!("{} failed on {}: {}", endpoint, self.addr, status))
        }
    }
}

#[async_trait]
impl TransferPeer for HttpTransferPeer {
    async fn start(&self, meta: &TransferMeta) -> Result<()> {
        self.post(ENDPOINT_INGEST_START, meta, Duration::from_secs(5))
            .await
    }

    async fn push(&self, meta: &TransferMeta, records: Vec<Operand>) -> Result<()> {
        let payload = PushRequest {
            meta: meta.clone(),
            records,
        };
        // Pushes may wait on the receiver's backpressure.
        self.post(ENDPOINT_INGEST_PUSH, &payload, Duration::from_secs(90))
            .await
    }

    async fn end(&self, meta: &TransferMeta) -> Result<()> {
        self.post(ENDPOINT_INGEST_END, meta, Duration::from_secs(5))
            .await
    }
}

/// Feeds the local registry directly when both sides live in this process.
pub struct LoopbackPeer {
    registry: Arc<RecvRegistry>,
}

impl LoopbackPeer {
    pub fn new(registry: Arc<RecvRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl TransferPeer for LoopbackPeer {
    async fn start(&self, meta: &TransferMeta) -> Result<()> {
        self.registry.mark_arrived(meta);
        Ok(())
    }

    async fn push(&self, meta: &TransferMeta, records: Vec<Operand>) -> Result<()> {
        self.registry.push(meta, records).await?;
        Ok(())
    }

    async fn end(&self, meta: &TransferMeta) -> Result<()> {
        if !self.registry.mark_complete(meta)? {
            anyhow::bail!("transfer {} ended before it started", meta.transfer_id());
        }
        Ok(())
    }
}

/// Picks the peer serving a destination party.
pub struct PeerDirectory {
    local_party: String,
    loopback: Arc<dyn TransferPeer>,
    remotes: HashMap<String, Arc<dyn TransferPeer>>,
}

impl PeerDirectory {
    pub fn new(local_party: impl Into<String>, loopback: Arc<dyn TransferPeer>) -> Self {
        Self {
            local_party: local_party.into(),
            loopback,
            remotes: HashMap::new(),
        }
    }

    pub fn add_remote(&mut self, party_id: impl Into<String>, peer: Arc<dyn TransferPeer>) {
        self.remotes.insert(party_id.into(), peer);
    }

    pub fn local_party(&self) -> &str {
        &self.local_party
    }

    pub fn peer_for(&self, party: &Party) -> Option<Arc<dyn TransferPeer>> {
        if party.party_id == self.local_party {
            return Some(self.loopback.clone());
        }
        self.remotes.get(&party.party_id).cloned()
    }
}
