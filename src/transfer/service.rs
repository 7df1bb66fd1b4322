use super::TransferSettings;
use super::janitor;
use super::peer::{LoopbackPeer, PeerDirectory, TransferPeer};
use super::poller::{Observation, poll_until_terminal};
use super::registry::RecvRegistry;
use super::send_tasks::SendTasks;
use super::types::{TransferMeta, TransferType};
use super::worker::TransferWorker;
use crate::error::{DataPlaneError, Result};
use crate::storage::{KvService, Operand};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};

/// Client-facing transfer operations and the receiving party's ingest path.
pub struct TransferService {
    registry: Arc<RecvRegistry>,
    send_tasks: Arc<SendTasks>,
    /// Woken on every terminal transition, recv or send.
    terminal: Arc<Notify>,
    settings: TransferSettings,
}

impl TransferService {
    /// Builds the registry, send tasks and worker, and starts the worker and janitor.
    ///
    /// `remotes` maps other parties' ids to peers; transfers addressed to
    /// `local_party` are looped back into this process.
    pub fn start(
        kv: Arc<KvService>,
        local_party: &str,
        remotes: HashMap<String, Arc<dyn TransferPeer>>,
        settings: TransferSettings,
    ) -> Arc<Self> {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let terminal = Arc::new(Notify::new());

        let registry = Arc::new(RecvRegistry::new(
            settings.broker_capacity,
            jobs_tx.clone(),
            terminal.clone(),
        ));
        let send_tasks = Arc::new(SendTasks::new(jobs_tx, terminal.clone()));

        let mut peers = PeerDirectory::new(local_party, Arc::new(LoopbackPeer::new(registry.clone())));
        for (party_id, peer) in remotes {
            peers.add_remote(party_id, peer);
        }

        TransferWorker::new(
            registry.clone(),
            send_tasks.clone(),
            kv,
            peers,
            settings.clone(),
        )
        .start(jobs_rx);
        janitor::spawn(
            registry.clone(),
            send_tasks.clone(),
            settings.janitor_interval,
            settings.finished_retention,
        );

        Arc::new(Self {
            registry,
            send_tasks,
            terminal,
            settings,
        })
    }

    pub fn registry(&self) -> &Arc<RecvRegistry> {
        &self.registry
    }

    pub fn send_tasks(&self) -> &Arc<SendTasks> {
        &self.send_tasks
    }

    /// Returns the existing send task, or creates it and echoes `meta`.
    pub fn send(&self, meta: &TransferMeta) -> TransferMeta {
        let id = meta.transfer_id();
        tracing::info!("[SEND] request received for {}", id);

        self.send_tasks
            .get_or_create(meta)
            .unwrap_or_else(|| meta.clone())
    }

    /// Returns the cached terminal result, or registers the receive task and
    /// echoes `meta` as a placeholder.
    pub fn recv(&self, meta: &TransferMeta) -> TransferMeta {
        let id = meta.transfer_id();
        tracing::info!("[RECV] request received for {}", id);

        if let Some(finished) = self.registry.get_finished(&id) {
            return finished;
        }
        if self.registry.create_task(meta) {
            tracing::info!("[RECV] creating new task for {}", id);
        }
        meta.clone()
    }

    pub fn check_status_now(&self, meta: &TransferMeta) -> Result<TransferMeta> {
        let observation = self.observe(meta)?;
        tracing::debug!(
            "[CHECKSTATUSNOW] {} is {:?}",
            meta.transfer_id(),
            observation.meta.status
        );
        Ok(observation.meta)
    }

    /// Long-polls until the transfer is terminal or the status deadline passes.
    pub async fn check_status(&self, meta: &TransferMeta) -> Result<TransferMeta> {
        let id = meta.transfer_id();
        tracing::info!("[CHECKSTATUS] request received for {}", id);

        poll_until_terminal(
            &id,
            &self.terminal,
            self.settings.status_poll_interval,
            self.settings.status_deadline,
            || self.observe(meta),
        )
        .await
    }

    fn observe(&self, meta: &TransferMeta) -> Result<Observation> {
        let id = meta.transfer_id();
        match meta.transfer_type {
            TransferType::Send => Ok(match self.send_tasks.get(&id) {
                Some(task) => Observation {
                    meta: task,
                    settled: false,
                },
                // No task on this side: echo the request, nothing to wait for.
                None => Observation {
                    meta: meta.clone(),
                    settled: true,
                },
            }),
            TransferType::Recv => Ok(Observation {
                meta: self
                    .registry
                    .get_finished(&id)
                    .unwrap_or_else(|| meta.clone()),
                settled: false,
            }),
            TransferType::Unspecified => Err(DataPlaneError::InvalidArgument(format!(
                "invalid transfer type for {}",
                id
            ))),
        }
    }

    // --- Ingest path (receiving party) ---

    pub fn ingest_start(&self, meta: &TransferMeta) -> bool {
        self.registry.mark_arrived(meta)
    }

    pub async fn ingest_push(&self, meta: &TransferMeta, records: Vec<Operand>) -> Result<usize> {
        self.registry.push(meta, records).await
    }

    pub fn ingest_end(&self, meta: &TransferMeta) -> Result<bool> {
        self.registry.mark_complete(meta)
    }
}
