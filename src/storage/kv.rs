use super::client::ShardClient;
use super::dispatch::{DEFAULT_POLICY, DispatchPolicy, DispatchResult, Dispatcher};
use super::fanout::{fan_out, fan_out_sum};
use super::types::{KeyRange, Operand, PageRequest};
use crate::broker::Broker;
use crate::catalog::{Dtable, Fragment, FragmentStatus, MetaCatalog, StoreInfo, TableStatus};
use crate::error::{DataPlaneError, Result};
use crate::now_ms;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Tunables of the KV surface.
#[derive(Debug, Clone)]
pub struct KvSettings {
    pub default_fragment_count: u32,
    pub broker_capacity: usize,
    pub broker_wait: Duration,
    /// Records fetched per shard round trip while iterating.
    pub page_size: usize,
}

impl Default for KvSettings {
    fn default() -> Self {
        Self {
            default_fragment_count: 4,
            broker_capacity: 10_000,
            broker_wait: Duration::from_millis(1000),
            page_size: 1000,
        }
    }
}

/// Table-level key-value operations over the fragments of a sharded table.
///
/// Single-key operations are routed through the [`Dispatcher`]; whole-table
/// operations fan out to every fragment.
pub struct KvService {
    dispatcher: Dispatcher,
    client: Arc<dyn ShardClient>,
    settings: KvSettings,
}

impl KvService {
    pub fn new(catalog: Arc<dyn MetaCatalog>, client: Arc<dyn ShardClient>, settings: KvSettings) -> Self {
        Self {
            dispatcher: Dispatcher::new(catalog),
            client,
            settings,
        }
    }

    /// Makes `policy` available to tables whose dispatcher names it.
    pub fn with_policy(mut self, policy: Arc<dyn DispatchPolicy>) -> Self {
        self.dispatcher.register_policy(policy);
        self
    }

    pub fn settings(&self) -> &KvSettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn catalog(&self) -> &Arc<dyn MetaCatalog> {
        self.dispatcher.catalog()
    }

    /// Returns the live table and its fragments, creating both if the name is free.
    pub async fn create_if_absent(
        &self,
        store: &StoreInfo,
        fragment_count: Option<u32>,
        dispatcher: Option<String>,
    ) -> Result<(Dtable, Vec<Fragment>)> {
        if let Some(table) = self.catalog().get_table(&store.namespace, &store.table).await?
            && table.is_normal()
        {
            let fragments = self.catalog().get_fragments_by_table_id(table.table_id).await?;
            if !fragments.is_empty() {
                return Ok((table, fragments));
            }
        }

        let template = Dtable {
            table_id: 0,
            namespace: store.namespace.clone(),
            table_name: store.table.clone(),
            status: TableStatus::Normal,
            dispatcher: dispatcher.unwrap_or_else(|| DEFAULT_POLICY.to_string()),
            fragment_count: fragment_count
                .unwrap_or(self.settings.default_fragment_count)
                .max(1),
        };

        let table = self.catalog().create_table(template).await?;
        if !table.is_normal() {
            return Err(DataPlaneError::IllegalState(format!(
                "table {} exists but is deleted",
                store
            )));
        }
        let fragments = self.catalog().create_fragments_for_table(&table).await?;

        tracing::info!(
            "Table {} ready with {} fragments (id {})",
            store,
            fragments.len(),
            table.table_id
        );
        Ok((table, fragments))
    }

    pub async fn put(&self, store: &StoreInfo, operand: Operand) -> Result<()> {
        let target = self.dispatcher.resolve(store, &operand.key).await?;
        tracing::debug!("PUT {} -> {}", operand.key, target.store);
        self.client.put(&target.node, &target.store, operand).await?;
        Ok(())
    }

    /// Writes only if the key is absent; returns the existing value otherwise.
    pub async fn put_if_absent(&self, store: &StoreInfo, operand: Operand) -> Result<Option<String>> {
        let target = self.dispatcher.resolve(store, &operand.key).await?;
        Ok(self
            .client
            .put_if_absent(&target.node, &target.store, operand)
            .await?)
    }

    /// Groups records by fragment and writes every group in parallel.
    pub async fn put_all(&self, store: &StoreInfo, operands: Vec<Operand>) -> Result<usize> {
        if operands.is_empty() {
            return Ok(0);
        }
        let table = self.dispatcher.live_table(store).await?;

        let mut groups: HashMap<u32, Vec<Operand>> = HashMap::new();
        for operand in operands {
            let shard = self.dispatcher.resolve_shard(&table, &operand.key);
            groups.entry(shard).or_default().push(operand);
        }

        let routes: Vec<_> = self
            .dispatcher
            .resolve_fragments(&table)
            .await?
            .into_iter()
            .filter(|route| groups.contains_key(&route.fragment.fragment_order))
            .collect();
        if routes.len() != groups.len() {
            return Err(DataPlaneError::IllegalState(format!(
                "{} has fewer live fragments than its dispatcher addresses",
                store
            )));
        }

        let groups = Mutex::new(groups);
        let written = fan_out(&format!("put_all {}", store), routes, |fragment, target| {
            let batch = groups
                .lock()
                .remove(&fragment.fragment_order)
                .unwrap_or_default();
            let client = self.client.clone();
            async move { client.put_all(&target.node, &target.store, batch).await }
        })
        .await?;

        Ok(written.into_iter().sum())
    }

    /// Writes a stream of records through a bounded broker, flushing each drained
    /// batch with [`KvService::put_all`]. Returns the number of records written.
    ///
    /// A stream error, or a failed flush, stops the write; batches flushed before
    /// the failure stay written.
    pub async fn put_all_streaming<S>(&self, store: &StoreInfo, operands: S) -> Result<usize>
    where
        S: Stream<Item = Result<Operand>>,
    {
        self.dispatcher.live_table(store).await?;
        let broker = Broker::new(format!("put_all {}", store), self.settings.broker_capacity);

        let produce = async {
            let mut operands = std::pin::pin!(operands);
            while let Some(next) = operands.next().await {
                match next {
                    Ok(operand) => {
                        if let Err(e) = broker.put(operand).await {
                            broker.set_error(e);
                            return;
                        }
                    }
                    Err(e) => {
                        broker.set_error(e);
                        return;
                    }
                }
            }
            broker.set_finished();
        };
        let consume = broker.consume(self.settings.broker_wait, |batch| async move {
            self.put_all(store, batch).await.map(|_| ())
        });

        let ((), written) = tokio::join!(produce, consume);
        let written = written?;
        tracing::info!("put_all {}: wrote {} streamed records", store, written);
        Ok(written)
    }

    pub async fn get(&self, store: &StoreInfo, key: &str) -> Result<Option<String>> {
        let target = self.dispatcher.resolve(store, key).await?;
        Ok(self.client.get(&target.node, &target.store, key).await?)
    }

    /// Removes a key; returns the removed value, if any.
    pub async fn delete(&self, store: &StoreInfo, key: &str) -> Result<Option<String>> {
        let target = self.dispatcher.resolve(store, key).await?;
        Ok(self.client.delete(&target.node, &target.store, key).await?)
    }

    /// Starts scanning every fragment of the table into a broker.
    ///
    /// Records of one fragment arrive in key order; fragments interleave. A fragment
    /// failure is recorded on the broker once every fragment scan has ended.
    pub async fn iterate(&self, store: &StoreInfo, range: KeyRange) -> Result<Arc<Broker<Operand>>> {
        let table = self.dispatcher.live_table(store).await?;
        let routes = self.dispatcher.resolve_fragments(&table).await?;

        let broker = Arc::new(Broker::new(
            format!("iterate {}", store),
            self.settings.broker_capacity,
        ));
        let producer = broker.clone();
        let client = self.client.clone();
        let page_size = self.settings.page_size.max(1);
        let context = format!("iterate {}", store);

        tokio::spawn(async move {
            let result = fan_out(&context, routes, |_fragment, target| {
                scan_fragment(
                    client.clone(),
                    target,
                    range.clone(),
                    page_size,
                    producer.clone(),
                )
            })
            .await;

            match result {
                Ok(counts) => {
                    tracing::debug!("{}: produced {} records", context, counts.iter().sum::<u64>());
                    producer.set_finished();
                }
                Err(e) => producer.set_error(e),
            }
        });

        Ok(broker)
    }

    /// Like [`KvService::iterate`], but merges the fragment scans into one stream
    /// in global key order. Each fragment is paged lazily, so at most one page per
    /// fragment is held besides the broker.
    pub async fn iterate_ordered(
        &self,
        store: &StoreInfo,
        range: KeyRange,
    ) -> Result<Arc<Broker<Operand>>> {
        let table = self.dispatcher.live_table(store).await?;
        let context = format!("iterate {}", store);

        let mut cursors = Vec::new();
        let mut unreachable = Vec::new();
        for route in self.dispatcher.resolve_fragments(&table).await? {
            let order = route.fragment.fragment_order;
            match route.target {
                Ok(target) => cursors.push(FragmentCursor::new(order, target)),
                Err(e) => unreachable.push(format!("fragment {}: {}", order, e)),
            }
        }
        if !unreachable.is_empty() {
            return Err(DataPlaneError::AggregateFailure {
                context,
                causes: unreachable,
            });
        }

        let broker = Arc::new(Broker::new(context.clone(), self.settings.broker_capacity));
        let producer = broker.clone();
        let client = self.client.clone();
        let page_size = self.settings.page_size.max(1);

        tokio::spawn(async move {
            match merge_fragments(client.as_ref(), cursors, &range, page_size, &producer, &context).await {
                Ok(produced) => {
                    tracing::debug!("{}: merged {} records", context, produced);
                    producer.set_finished();
                }
                Err(e) => producer.set_error(e),
            }
        });

        Ok(broker)
    }

    /// Destroys every fragment and retires the table name. A missing or already
    /// deleted table is a no-op.
    pub async fn destroy(&self, store: &StoreInfo) -> Result<()> {
        let table = match self.catalog().get_table(&store.namespace, &store.table).await? {
            Some(table) if table.is_normal() => table,
            _ => {
                tracing::info!("Destroy of {} skipped: no live table", store);
                return Ok(());
            }
        };

        let routes = self.dispatcher.resolve_fragments(&table).await?;
        let catalog = self.catalog().clone();
        fan_out(&format!("destroy {}", store), routes, |fragment, target| {
            let catalog = catalog.clone();
            let client = self.client.clone();
            async move {
                client.destroy(&target.node, &target.store).await?;
                // Only fragments whose data is gone are retired, so a retry
                // after a partial failure finishes the rest.
                let retired = Fragment {
                    status: FragmentStatus::Deleted,
                    ..fragment
                };
                catalog.update_fragment(retired).await?;
                Ok(())
            }
        })
        .await?;

        let retired = Dtable {
            status: TableStatus::Deleted,
            table_name: format!("{}-{}", table.table_name, now_ms()),
            ..table
        };
        match self.catalog().update_table(retired).await? {
            Some(retired) => {
                tracing::info!("Destroyed table {} (retired as {})", store, retired.table_name);
                Ok(())
            }
            None => Err(DataPlaneError::IllegalState(format!(
                "failed to destroy table {}",
                store
            ))),
        }
    }

    pub async fn count(&self, store: &StoreInfo) -> Result<u64> {
        let table = self.dispatcher.live_table(store).await?;
        let routes = self.dispatcher.resolve_fragments(&table).await?;
        let client = self.client.clone();

        fan_out_sum(&format!("count {}", store), routes, |_fragment, target| {
            let client = client.clone();
            async move { client.count(&target.node, &target.store).await }
        })
        .await
    }
}

async fn scan_fragment(
    client: Arc<dyn ShardClient>,
    target: DispatchResult,
    range: KeyRange,
    page_size: usize,
    broker: Arc<Broker<Operand>>,
) -> anyhow::Result<u64> {
    let mut after: Option<String> = None;
    let mut produced = 0u64;

    loop {
        let page = PageRequest {
            range: range.clone(),
            after: after.clone(),
            limit: page_size,
        };
        let operands = client.page(&target.node, &target.store, page).await?;
        let fetched = operands.len();
        after = operands.last().map(|operand| operand.key.clone());

        for operand in operands {
            broker.put(operand).await?;
        }
        produced += fetched as u64;

        if fetched < page_size {
            return Ok(produced);
        }
    }
}

/// Read position of one fragment during an ordered merge.
struct FragmentCursor {
    order: u32,
    target: DispatchResult,
    after: Option<String>,
    buffered: VecDeque<Operand>,
    exhausted: bool,
}

impl FragmentCursor {
    fn new(order: u32, target: DispatchResult) -> Self {
        Self {
            order,
            target,
            after: None,
            buffered: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Returns the next key, fetching a page when the buffer has run dry.
    async fn head(
        &mut self,
        client: &dyn ShardClient,
        range: &KeyRange,
        page_size: usize,
    ) -> anyhow::Result<Option<String>> {
        if self.buffered.is_empty() && !self.exhausted {
            let page = PageRequest {
                range: range.clone(),
                after: self.after.clone(),
                limit: page_size,
            };
            let operands = client.page(&self.target.node, &self.target.store, page).await?;
            self.exhausted = operands.len() < page_size;
            self.after = operands.last().map(|operand| operand.key.clone());
            self.buffered.extend(operands);
        }
        Ok(self.buffered.front().map(|operand| operand.key.clone()))
    }
}

/// K-way merge of key-ordered fragment scans into `broker`.
async fn merge_fragments(
    client: &dyn ShardClient,
    mut cursors: Vec<FragmentCursor>,
    range: &KeyRange,
    page_size: usize,
    broker: &Broker<Operand>,
    context: &str,
) -> Result<u64> {
    let failure = |order: u32, e: anyhow::Error| DataPlaneError::AggregateFailure {
        context: context.to_string(),
        causes: vec![format!("fragment {}: {}", order, e)],
    };

    let mut heads = BinaryHeap::new();
    for (index, cursor) in cursors.iter_mut().enumerate() {
        let order = cursor.order;
        if let Some(key) = cursor
            .head(client, range, page_size)
            .await
            .map_err(|e| failure(order, e))?
        {
            heads.push(Reverse((key, index)));
        }
    }

    let mut produced = 0u64;
    while let Some(Reverse((_, index))) = heads.pop() {
        let cursor = &mut cursors[index];
        if let Some(operand) = cursor.buffered.pop_front() {
            broker.put(operand).await?;
            produced += 1;
        }
        let order = cursor.order;
        if let Some(key) = cursor
            .head(client, range, page_size)
            .await
            .map_err(|e| failure(order, e))?
        {
            heads.push(Reverse((key, index)));
        }
    }

    Ok(produced)
}
