use super::registry::RecvRegistry;
use super::send_tasks::SendTasks;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Periodically evicts expired finished results, abandoned brokers and
/// terminal send tasks.
pub fn spawn(
    registry: Arc<RecvRegistry>,
    send_tasks: Arc<SendTasks>,
    interval: Duration,
    retention: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let recv_evicted = registry.sweep(retention);
            let send_evicted = send_tasks.sweep(retention);
            if recv_evicted + send_evicted > 0 {
                tracing::info!(
                    "Janitor evicted {} recv entries and {} send tasks",
                    recv_evicted,
                    send_evicted
                );
            } else {
                tracing::trace!("Janitor found nothing to evict");
            }
        }
    })
}
