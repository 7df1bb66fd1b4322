use super::types::{TransferId, TransferMeta, TransferStatus};
use super::worker::TransferJob;
use crate::now_ms;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

struct SendEntry {
    meta: TransferMeta,
    updated_at: u64,
}

/// Send-side task table: one entry per transfer id, carrying its latest status.
pub struct SendTasks {
    tasks: DashMap<TransferId, SendEntry>,
    terminal: Arc<Notify>,
    jobs: mpsc::UnboundedSender<TransferJob>,
}

impl SendTasks {
    pub fn new(jobs: mpsc::UnboundedSender<TransferJob>, terminal: Arc<Notify>) -> Self {
        Self {
            tasks: DashMap::new(),
            terminal,
            jobs,
        }
    }

    pub fn get(&self, id: &TransferId) -> Option<TransferMeta> {
        self.tasks.get(id).map(|entry| entry.meta.clone())
    }

    /// Registers the task and queues its push. Returns the existing snapshot
    /// instead if the id is already known.
    pub fn get_or_create(&self, meta: &TransferMeta) -> Option<TransferMeta> {
        let id = meta.transfer_id();
        match self.tasks.entry(id.clone()) {
            Entry::Occupied(existing) => return Some(existing.get().meta.clone()),
            Entry::Vacant(slot) => {
                slot.insert(SendEntry {
                    meta: meta.with_status(TransferStatus::Unknown),
                    updated_at: now_ms(),
                });
            }
        }

        tracing::info!("Creating send task {}", id);
        if self.jobs.send(TransferJob::Send(meta.clone())).is_err() {
            tracing::error!("Transfer worker is gone, send task {} will not run", id);
        }
        None
    }

    /// Replaces the task's status. Terminal statuses wake status waiters.
    pub fn update_status(&self, id: &TransferId, status: TransferStatus) -> Option<TransferMeta> {
        let updated = {
            let mut entry = self.tasks.get_mut(id)?;
            entry.meta = entry.meta.with_status(status);
            entry.updated_at = now_ms();
            entry.meta.clone()
        };

        tracing::info!("Send task {} is now {:?}", id, status);
        if status.is_terminal() {
            self.terminal.notify_waiters();
        }
        Some(updated)
    }

    /// Drops terminal tasks not updated within `retention`.
    pub fn sweep(&self, retention: Duration) -> usize {
        let cutoff = now_ms().saturating_sub(retention.as_millis() as u64);
        let mut evicted = 0usize;
        self.tasks.retain(|_, entry| {
            let expired = entry.meta.status.is_terminal() && entry.updated_at < cutoff;
            if expired {
                evicted += 1;
            }
            !expired
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
