//! Receive-side task registry.
//!
//! Tracks, per transfer id, the meta delivered by the sender, the broker its
//! records flow through, and the terminal result once the transfer is done.

use super::types::{TransferId, TransferMeta, TransferStatus};
use super::worker::TransferJob;
use crate::broker::Broker;
use crate::error::{DataPlaneError, Result};
use crate::now_ms;
use crate::storage::Operand;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

struct BrokerEntry {
    broker: Arc<Broker<Operand>>,
    /// Bumped on arrival, every push and completion.
    last_activity: AtomicU64,
}

struct FinishedEntry {
    meta: TransferMeta,
    finished_at: u64,
}

pub struct RecvRegistry {
    /// Meta as delivered by the sender; presence means "arrived".
    passed_in: DashMap<TransferId, TransferMeta>,
    brokers: DashMap<TransferId, BrokerEntry>,
    /// One-shot wake-ups for callers blocked in `wait_for_arrival`.
    arrivals: DashMap<TransferId, Arc<Notify>>,
    finished: DashMap<TransferId, FinishedEntry>,
    /// Recv tasks already handed to the worker, with registration time.
    requested: DashMap<TransferId, u64>,
    terminal: Arc<Notify>,
    jobs: mpsc::UnboundedSender<TransferJob>,
    broker_capacity: usize,
}

impl RecvRegistry {
    pub fn new(
        broker_capacity: usize,
        jobs: mpsc::UnboundedSender<TransferJob>,
        terminal: Arc<Notify>,
    ) -> Self {
        Self {
            passed_in: DashMap::new(),
            brokers: DashMap::new(),
            arrivals: DashMap::new(),
            finished: DashMap::new(),
            requested: DashMap::new(),
            terminal,
            jobs,
            broker_capacity,
        }
    }

    /// Registers a receive task and hands it to the transfer worker, which
    /// allocates the broker. Returns `false` if the task was already registered.
    pub fn create_task(&self, meta: &TransferMeta) -> bool {
        let id = meta.transfer_id();
        match self.requested.entry(id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!("Recv task {} already registered", id);
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(now_ms());
            }
        }

        if self.jobs.send(TransferJob::Recv(meta.clone())).is_err() {
            tracing::error!("Transfer worker is gone, recv task {} will not run", id);
        }
        true
    }

    /// Records the sender's meta for `meta`'s id. True only on the first delivery.
    pub fn mark_arrived(&self, meta: &TransferMeta) -> bool {
        let id = meta.transfer_id();
        match self.passed_in.entry(id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!("Duplicate arrival of {} ignored", id);
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(meta.clone());
            }
        }

        self.create_if_absent(&id);
        self.touch(&id);

        // The meta is visible before the wake-up, so a waiter that registers
        // after this point finds it on its re-check.
        if let Some((_, signal)) = self.arrivals.remove(&id) {
            signal.notify_waiters();
        }

        tracing::info!("Transfer {} arrived", id);
        true
    }

    /// Tells the consumer no more records will come for this transfer.
    ///
    /// Returns `false` if the transfer never arrived.
    pub fn mark_complete(&self, meta: &TransferMeta) -> Result<bool> {
        let id = meta.transfer_id();
        if !self.passed_in.contains_key(&id) {
            tracing::warn!("Completion of {} before arrival", id);
            return Ok(false);
        }

        match self.brokers.get(&id) {
            Some(entry) => {
                entry.last_activity.store(now_ms(), Ordering::Relaxed);
                entry.broker.set_finished();
                tracing::info!("Transfer {} marked complete", id);
                Ok(true)
            }
            None => Err(DataPlaneError::IllegalState(format!(
                "transfer {} arrived but has no broker",
                id
            ))),
        }
    }

    /// Appends records of an arrived transfer to its broker.
    pub async fn push(&self, meta: &TransferMeta, records: Vec<Operand>) -> Result<usize> {
        let id = meta.transfer_id();
        let broker = self.get_broker(&id).ok_or_else(|| {
            DataPlaneError::IllegalState(format!("no broker for transfer {}", id))
        })?;

        let count = records.len();
        self.touch(&id);
        for record in records {
            broker.put(record).await?;
        }
        // A put can wait on a full broker; count the batch as activity once it lands.
        self.touch(&id);
        tracing::trace!("Pushed {} records into {}", count, id);
        Ok(count)
    }

    pub fn get_finished(&self, id: &TransferId) -> Option<TransferMeta> {
        self.finished.get(id).map(|entry| entry.meta.clone())
    }

    /// Caches the terminal result for `meta`. A second call for the same id is
    /// rejected and leaves the first result in place.
    pub fn set_finished(&self, meta: &TransferMeta, status: TransferStatus) -> bool {
        let id = meta.transfer_id();
        match self.finished.entry(id.clone()) {
            Entry::Occupied(existing) => {
                tracing::warn!(
                    "Transfer {} already finished as {:?}, ignoring {:?}",
                    id,
                    existing.get().meta.status,
                    status
                );
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(FinishedEntry {
                    meta: meta.with_status(status),
                    finished_at: now_ms(),
                });
                tracing::info!("Transfer {} finished with {:?}", id, status);
                self.terminal.notify_waiters();
                true
            }
        }
    }

    /// Waits up to `timeout` for the transfer to arrive. `None` means not yet.
    pub async fn wait_for_arrival(&self, id: &TransferId, timeout: Duration) -> Option<TransferMeta> {
        if let Some(meta) = self.passed_in.get(id) {
            return Some(meta.value().clone());
        }

        let signal = self
            .arrivals
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Notify::new()))
            .value()
            .clone();
        let arrived = signal.notified();
        tokio::pin!(arrived);
        arrived.as_mut().enable();

        if let Some(meta) = self.passed_in.get(id) {
            return Some(meta.value().clone());
        }

        if tokio::time::timeout(timeout, arrived).await.is_err() {
            tracing::debug!("Transfer {} did not arrive within {:?}", id, timeout);
            return None;
        }
        self.passed_in.get(id).map(|meta| meta.value().clone())
    }

    /// Returns the transfer's broker, creating it on first access.
    pub fn create_if_absent(&self, id: &TransferId) -> Arc<Broker<Operand>> {
        self.brokers
            .entry(id.clone())
            .or_insert_with(|| {
                tracing::debug!("Creating broker for {}", id);
                BrokerEntry {
                    broker: Arc::new(Broker::new(id.to_string(), self.broker_capacity)),
                    last_activity: AtomicU64::new(now_ms()),
                }
            })
            .broker
            .clone()
    }

    pub fn get_broker(&self, id: &TransferId) -> Option<Arc<Broker<Operand>>> {
        self.brokers.get(id).map(|entry| entry.broker.clone())
    }

    /// Drops the broker and arrival bookkeeping of a transfer. The finished
    /// result stays cached for status checks.
    pub fn remove(&self, id: &TransferId) {
        if id.is_blank() {
            tracing::warn!("Ignoring remove of blank transfer id");
            return;
        }
        self.brokers.remove(id);
        self.passed_in.remove(id);
        self.arrivals.remove(id);
        self.requested.remove(id);
        tracing::debug!("Removed transfer {}", id);
    }

    /// Evicts finished results older than `retention`, and brokers that either
    /// saw no activity within `retention` or belong to a transfer whose result is
    /// already cached. Returns the number of evictions.
    pub fn sweep(&self, retention: Duration) -> usize {
        let cutoff = now_ms().saturating_sub(retention.as_millis() as u64);
        let mut evicted = 0usize;

        self.finished.retain(|_, entry| {
            let keep = entry.finished_at >= cutoff;
            if !keep {
                evicted += 1;
            }
            keep
        });

        let stale: Vec<TransferId> = self
            .brokers
            .iter()
            .filter(|entry| {
                entry.value().last_activity.load(Ordering::Relaxed) < cutoff
                    || self.finished.contains_key(entry.key())
            })
            .map(|entry| entry.key().clone())
            .collect();
        for id in stale {
            if let Some((_, entry)) = self.brokers.remove(&id) {
                if !self.finished.contains_key(&id) {
                    tracing::warn!("Transfer {} idle for more than {:?}, abandoning", id, retention);
                }
                entry.broker.set_error(DataPlaneError::IllegalState(format!(
                    "transfer {} abandoned",
                    id
                )));
            }
            self.passed_in.remove(&id);
            self.arrivals.remove(&id);
            evicted += 1;
        }

        self.requested.retain(|_, registered_at| *registered_at >= cutoff);
        evicted
    }

    fn touch(&self, id: &TransferId) {
        if let Some(entry) = self.brokers.get(id) {
            entry.last_activity.store(now_ms(), Ordering::Relaxed);
        }
    }

    pub fn broker_count(&self) -> usize {
        self.brokers.len()
    }
}
