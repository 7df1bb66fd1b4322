use super::protocol::*;
use super::shard_store::ShardStore;
use super::types::{Operand, PageRequest};
use crate::catalog::{Node, StoreInfo};
use crate::retry::{RetryPolicy, post_with_retry};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Per-fragment storage operations on the node hosting the fragment.
///
/// `store` is always narrowed to one fragment.
#[async_trait]
pub trait ShardClient: Send + Sync {
    async fn put(&self, node: &Node, store: &StoreInfo, operand: Operand) -> Result<()>;

    /// Returns the existing value when the key was already present.
    async fn put_if_absent(
        &self,
        node: &Node,
        store: &StoreInfo,
        operand: Operand,
    ) -> Result<Option<String>>;

    async fn put_all(&self, node: &Node, store: &StoreInfo, operands: Vec<Operand>) -> Result<usize>;

    async fn get(&self, node: &Node, store: &StoreInfo, key: &str) -> Result<Option<String>>;

    /// Returns the removed value, if any.
    async fn delete(&self, node: &Node, store: &StoreInfo, key: &str) -> Result<Option<String>>;

    async fn page(&self, node: &Node, store: &StoreInfo, page: PageRequest) -> Result<Vec<Operand>>;

    async fn count(&self, node: &Node, store: &StoreInfo) -> Result<u64>;

    async fn destroy(&self, node: &Node, store: &StoreInfo) -> Result<()>;
}

const SHARD_TIMEOUT: Duration = Duration::from_millis(2000);
const SHARD_ATTEMPTS: usize = 3;

/// Calls the `/internal/shard/*` endpoints of the hosting node.
pub struct HttpShardClient {
    http_client: reqwest::Client,
    timeout: Duration,
    attempts: usize,
}

impl HttpShardClient {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
            timeout: SHARD_TIMEOUT,
            attempts: SHARD_ATTEMPTS,
        }
    }

    async fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        node: &Node,
        endpoint: &str,
        payload: &Req,
    ) -> Result<Resp> {
        let url = format!("http://{}{}", node.addr, endpoint);
        let policy = RetryPolicy {
            attempts: self.attempts,
            timeout: self.timeout,
        };
        // Shard answers are final; only transport failures are retried.
        let response = post_with_retry(&self.http_client, &url, payload, policy, |_| false).await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "{} on node {} failed: {}",
                endpoint,
                node.node_id,
                response.status()
            ));
        }

        Ok(response.json().await?)
    }
}

impl Default for HttpShardClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShardClient for HttpShardClient {
    async fn put(&self, node: &Node, store: &StoreInfo, operand: Operand) -> Result<()> {
        let payload = ShardOperandRequest {
            store: store.clone(),
            operand,
        };
        let _: AckResponse = self.call(node, ENDPOINT_SHARD_PUT, &payload).await?;
        Ok(())
    }

    async fn put_if_absent(
        &self,
        node: &Node,
        store: &StoreInfo,
        operand: Operand,
    ) -> Result<Option<String>> {
        let payload = ShardOperandRequest {
            store: store.clone(),
            operand,
        };
        let resp: ValueResponse = self
            .call(node, ENDPOINT_SHARD_PUT_IF_ABSENT, &payload)
            .await?;
        Ok(resp.value)
    }

    async fn put_all(&self, node: &Node, store: &StoreInfo, operands: Vec<Operand>) -> Result<usize> {
        let payload = ShardPutAllRequest {
            store: store.clone(),
            operands,
        };
        let resp: PutAllResponse = self.call(node, ENDPOINT_SHARD_PUT_ALL, &payload).await?;
        Ok(resp.written)
    }

    async fn get(&self, node: &Node, store: &StoreInfo, key: &str) -> Result<Option<String>> {
        let payload = ShardKeyRequest {
            store: store.clone(),
            key: key.to_string(),
        };
        let resp: ValueResponse = self.call(node, ENDPOINT_SHARD_GET, &payload).await?;
        Ok(resp.value)
    }

    async fn delete(&self, node: &Node, store: &StoreInfo, key: &str) -> Result<Option<String>> {
        let payload = ShardKeyRequest {
            store: store.clone(),
            key: key.to_string(),
        };
        let resp: ValueResponse = self.call(node, ENDPOINT_SHARD_DELETE, &payload).await?;
        Ok(resp.value)
    }

    async fn page(&self, node: &Node, store: &StoreInfo, page: PageRequest) -> Result<Vec<Operand>> {
        let payload = ShardPageRequest {
            store: store.clone(),
            page,
        };
        let resp: ShardPageResponse = self.call(node, ENDPOINT_SHARD_PAGE, &payload).await?;
        Ok(resp.operands)
    }

    async fn count(&self, node: &Node, store: &StoreInfo) -> Result<u64> {
        let payload = ShardStoreRequest {
            store: store.clone(),
        };
        let resp: CountResponse = self.call(node, ENDPOINT_SHARD_COUNT, &payload).await?;
        Ok(resp.count)
    }

    async fn destroy(&self, node: &Node, store: &StoreInfo) -> Result<()> {
        let payload = ShardStoreRequest {
            store: store.clone(),
        };
        let _: AckResponse = self.call(node, ENDPOINT_SHARD_DESTROY, &payload).await?;
        Ok(())
    }
}

/// Serves every fragment from an in-process [`ShardStore`], whichever node it names.
pub struct LocalShardClient {
    store: Arc<ShardStore>,
}

impl LocalShardClient {
    pub fn new(store: Arc<ShardStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ShardStore> {
        &self.store
    }
}

#[async_trait]
impl ShardClient for LocalShardClient {
    async fn put(&self, _node: &Node, store: &StoreInfo, operand: Operand) -> Result<()> {
        self.store.put(store, operand);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        _node: &Node,
        store: &StoreInfo,
        operand: Operand,
    ) -> Result<Option<String>> {
        Ok(self.store.put_if_absent(store, operand))
    }

    async fn put_all(&self, _node: &Node, store: &StoreInfo, operands: Vec<Operand>) -> Result<usize> {
        Ok(self.store.put_all(store, operands))
    }

    async fn get(&self, _node: &Node, store: &StoreInfo, key: &str) -> Result<Option<String>> {
        Ok(self.store.get(store, key))
    }

    async fn delete(&self, _node: &Node, store: &StoreInfo, key: &str) -> Result<Option<String>> {
        Ok(self.store.delete(store, key))
    }

    async fn page(&self, _node: &Node, store: &StoreInfo, page: PageRequest) -> Result<Vec<Operand>> {
        Ok(self.store.page(store, &page))
    }

    async fn count(&self, _node: &Node, store: &StoreInfo) -> Result<u64> {
        Ok(self.store.count(store))
    }

    async fn destroy(&self, _node: &Node, store: &StoreInfo) -> Result<()> {
        self.store.destroy(store);
        Ok(())
    }
}
