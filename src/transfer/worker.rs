//! Transfer Worker
//!
//! Runs the jobs posted by the registry and the send-task table. Each job runs
//! on its own task, since a receive job may wait minutes for its data.
//!
//! ## Responsibilities
//! - **Receive**: wait for the sender to arrive, drain the broker into the
//!   destination table, cache the terminal result, release the registry entry.
//! - **Send**: scan the source table and push it to the destination party,
//!   then record the outcome on the send task.

use super::TransferSettings;
use super::peer::PeerDirectory;
use super::registry::RecvRegistry;
use super::send_tasks::SendTasks;
use super::types::{TransferMeta, TransferStatus};
use crate::broker::Broker;
use crate::error::{DataPlaneError, Result};
use crate::storage::{KeyRange, KvService, Operand};

use std::sync::Arc;
use tokio::sync::mpsc;

/// Work handed to the [`TransferWorker`].
#[derive(Debug, Clone)]
pub enum TransferJob {
    Recv(TransferMeta),
    Send(TransferMeta),
}

pub struct TransferWorker {
    registry: Arc<RecvRegistry>,
    send_tasks: Arc<SendTasks>,
    kv: Arc<KvService>,
    peers: PeerDirectory,
    settings: TransferSettings,
}

impl TransferWorker {
    pub fn new(
        registry: Arc<RecvRegistry>,
        send_tasks: Arc<SendTasks>,
        kv: Arc<KvService>,
        peers: PeerDirectory,
        settings: TransferSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            send_tasks,
            kv,
            peers,
            settings,
        })
    }

    /// Spawns the dispatch loop and returns immediately.
    pub fn start(self: Arc<Self>, mut jobs: mpsc::UnboundedReceiver<TransferJob>) {
        tokio::spawn(async move {
            tracing::info!("Transfer worker started for party {}", self.peers.local_party());

            while let Some(job) = jobs.recv().await {
                let worker = self.clone();
                tokio::spawn(async move {
                    match job {
                        TransferJob::Recv(meta) => worker.run_recv(meta).await,
                        TransferJob::Send(meta) => worker.run_send(meta).await,
                    }
                });
            }

            tracing::info!("Transfer worker stopped: job channel closed");
        });
    }

    async fn run_recv(&self, meta: TransferMeta) {
        let id = meta.transfer_id();
        let broker = self.registry.create_if_absent(&id);

        let status = match self
            .registry
            .wait_for_arrival(&id, self.settings.arrival_timeout)
            .await
        {
            None => {
                tracing::warn!(
                    "No data arrived for {} within {:?}",
                    id,
                    self.settings.arrival_timeout
                );
                TransferStatus::Error
            }
            Some(_) => match self.drain_into_storage(&meta, &broker).await {
                Ok(records) => {
                    tracing::info!("Transfer {} received {} records into {}", id, records, meta.store());
                    TransferStatus::Complete
                }
                Err(e) => {
                    tracing::error!("Transfer {} failed while receiving: {}", id, e);
                    TransferStatus::Error
                }
            },
        };

        self.registry.set_finished(&meta, status);
        self.registry.remove(&id);
    }

    async fn drain_into_storage(&self, meta: &TransferMeta, broker: &Broker<Operand>) -> Result<usize> {
        let store = meta.store();
        self.kv.create_if_absent(&store, None, None).await?;

        let kv = &self.kv;
        let store = &store;
        broker
            .consume(self.settings.broker_wait, move |batch| async move {
                kv.put_all(store, batch).await.map(|_| ())
            })
            .await
    }

    async fn run_send(&self, meta: TransferMeta) {
        let id = meta.transfer_id();

        let status = match self.push_to_peer(&meta).await {
            Ok(records) => {
                tracing::info!("Transfer {} sent {} records to {}", id, records, meta.dst);
                TransferStatus::Complete
            }
            Err(e) => {
                tracing::error!("Transfer {} failed while sending: {}", id, e);
                TransferStatus::Error
            }
        };

        self.send_tasks.update_status(&id, status);
    }

    async fn push_to_peer(&self, meta: &TransferMeta) -> Result<usize> {
        let peer = self.peers.peer_for(&meta.dst).ok_or_else(|| {
            DataPlaneError::InvalidArgument(format!("no route to party {}", meta.dst))
        })?;

        let source = self.kv.iterate(&meta.store(), KeyRange::all()).await?;
        peer.start(meta).await?;

        let batch_size = self.settings.batch_size.max(1);
        let peer = &peer;
        let sent = source
            .consume(self.settings.broker_wait, move |batch| async move {
                for chunk in batch.chunks(batch_size) {
                    peer.push(meta, chunk.to_vec()).await?;
                }
                Ok(())
            })
            .await?;

        peer.end(meta).await?;
        Ok(sent)
    }
}
