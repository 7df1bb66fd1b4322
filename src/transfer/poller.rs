use super::types::{TransferId, TransferMeta};
use crate::error::Result;

use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// One evaluation of a transfer's status.
pub(super) struct Observation {
    pub meta: TransferMeta,
    /// Nothing further can be learned by waiting (e.g. no such send task).
    pub settled: bool,
}

/// Re-evaluates `check` until the transfer is terminal or `deadline` has passed,
/// then returns the last observation.
///
/// Waits on `signal` between checks, so a terminal transition is seen right away;
/// `interval` bounds each wait in case a transition happens outside this process.
pub(super) async fn poll_until_terminal<F>(
    id: &TransferId,
    signal: &Notify,
    interval: Duration,
    deadline: Duration,
    mut check: F,
) -> Result<TransferMeta>
where
    F: FnMut() -> Result<Observation>,
{
    let started = Instant::now();
    let mut last_log = started;

    loop {
        let changed = signal.notified();
        tokio::pin!(changed);
        changed.as_mut().enable();

        let observation = check()?;
        let status = observation.meta.status;
        if observation.settled || status.is_terminal() {
            return Ok(observation.meta);
        }

        let elapsed = started.elapsed();
        if elapsed >= deadline {
            tracing::warn!(
                "Status check of {} gave up after {:?}, last status {:?}",
                id,
                elapsed,
                status
            );
            return Ok(observation.meta);
        }

        if last_log.elapsed() >= PROGRESS_LOG_INTERVAL {
            tracing::info!(
                "Waiting on transfer {}: status {:?}, type {:?}, {}s elapsed",
                id,
                status,
                observation.meta.transfer_type,
                elapsed.as_secs()
            );
            last_log = Instant::now();
        }

        let wait = interval.min(deadline - elapsed);
        let _ = tokio::time::timeout(wait, changed).await;
    }
}
