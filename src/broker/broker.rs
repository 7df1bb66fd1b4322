use crate::error::{DataPlaneError, Result};

use futures::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// How long a producer waits for room in a full broker before giving up.
const DEFAULT_PUT_TIMEOUT: Duration = Duration::from_secs(60);

/// Bounded single-producer/single-consumer mailbox with finished/closable signaling.
pub struct Broker<T> {
    name: String,
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    put_timeout: Duration,
    finished: AtomicBool,
    errored: AtomicBool,
    error: Mutex<Option<DataPlaneError>>,
    /// Woken on every put, finish and error. Holds one permit for the single consumer.
    data_signal: Notify,
    /// Wakes every producer waiting for room. Producers register before checking
    /// capacity, so a wake-up between the check and the wait is not lost.
    space_signal: Notify,
}

impl<T: Send> Broker<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            put_timeout: DEFAULT_PUT_TIMEOUT,
            finished: AtomicBool::new(false),
            errored: AtomicBool::new(false),
            error: Mutex::new(None),
            data_signal: Notify::new(),
            space_signal: Notify::new(),
        }
    }

    pub fn with_put_timeout(mut self, put_timeout: Duration) -> Self {
        self.put_timeout = put_timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends an item, waiting up to the put timeout for room if the broker is full.
    ///
    /// Fails with `IllegalState` once the broker is finished or has recorded an error.
    pub async fn put(&self, item: T) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.put_timeout;
        let mut item = Some(item);

        loop {
            if self.finished.load(Ordering::SeqCst) {
                return Err(DataPlaneError::IllegalState(format!(
                    "broker {} is finished, cannot put",
                    self.name
                )));
            }
            if self.errored.load(Ordering::SeqCst) {
                return Err(DataPlaneError::IllegalState(format!(
                    "broker {} has failed, cannot put",
                    self.name
                )));
            }

            let space = self.space_signal.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut queue = self.queue.lock();
                if queue.len() < self.capacity {
                    if let Some(item) = item.take() {
                        queue.push_back(item);
                    }
                    drop(queue);
                    self.data_signal.notify_one();
                    return Ok(());
                }
            }

            tracing::trace!("Broker {} full ({} items), producer waiting", self.name, self.capacity);
            if tokio::time::timeout_at(deadline, space).await.is_err() {
                return Err(DataPlaneError::IllegalState(format!(
                    "broker {} stayed full for {:?}",
                    self.name, self.put_timeout
                )));
            }
        }
    }

    /// Marks that no more items will be produced. Idempotent.
    pub fn set_finished(&self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            tracing::debug!("Broker {} finished with {} buffered items", self.name, self.len());
        }
        self.data_signal.notify_one();
    }

    /// Records an out-of-band failure; the broker becomes closable immediately.
    /// Only the first error is kept.
    pub fn set_error(&self, error: DataPlaneError) {
        {
            let mut slot = self.error.lock();
            if slot.is_none() {
                tracing::warn!("Broker {} failed: {}", self.name, error);
                *slot = Some(error);
            }
        }
        self.errored.store(true, Ordering::SeqCst);
        self.data_signal.notify_one();
        self.space_signal.notify_waiters();
    }

    /// Takes the recorded error, if any. The broker stays closable afterwards.
    pub fn take_error(&self) -> Option<DataPlaneError> {
        self.error.lock().take()
    }

    pub fn has_error(&self) -> bool {
        self.errored.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// True once the consumer may stop draining.
    pub fn is_closable(&self) -> bool {
        if self.errored.load(Ordering::SeqCst) {
            return true;
        }
        // `finished` must be read before the emptiness check: a put that happened
        // before the finish is then guaranteed to be visible in the queue.
        self.finished.load(Ordering::SeqCst) && self.queue.lock().is_empty()
    }

    /// True if at least one item is buffered.
    pub fn is_ready(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Removes every buffered item into `sink`, returning how many were moved.
    pub fn drain_to(&self, sink: &mut Vec<T>) -> usize {
        let drained = {
            let mut queue = self.queue.lock();
            let count = queue.len();
            sink.extend(queue.drain(..));
            count
        };
        if drained > 0 {
            self.space_signal.notify_waiters();
        }
        drained
    }

    /// Waits until data, finish or error is signaled, or `timeout` elapses.
    ///
    /// Returns `false` on timeout. Returns immediately if something is already
    /// buffered or the broker is closable.
    pub async fn await_signal(&self, timeout: Duration) -> bool {
        if self.is_ready() || self.is_closable() {
            return true;
        }
        tokio::time::timeout(timeout, self.data_signal.notified())
            .await
            .is_ok()
    }

    /// Runs the consumer loop: wait, drain, forward, until closable.
    ///
    /// Items buffered when the broker becomes closable are still forwarded.
    /// A recorded producer error is returned after the last forward.
    pub async fn consume<F, Fut>(&self, wait: Duration, mut forward: F) -> Result<usize>
    where
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut total = 0usize;

        loop {
            let signaled = self.await_signal(wait).await;

            let mut batch = Vec::new();
            let drained = self.drain_to(&mut batch);
            if drained > 0 {
                total += drained;
                self.forward_or_abort(&mut forward, batch).await?;
            } else if !signaled {
                tracing::debug!(
                    "Waiting on broker {}: finished={}, errored={}, queue_size=0",
                    self.name,
                    self.is_finished(),
                    self.has_error()
                );
            }

            if self.is_closable() {
                let mut rest = Vec::new();
                if self.drain_to(&mut rest) > 0 {
                    total += rest.len();
                    self.forward_or_abort(&mut forward, rest).await?;
                }
                break;
            }
        }

        if let Some(error) = self.take_error() {
            return Err(error);
        }

        tracing::debug!("Broker {} consumed {} items", self.name, total);
        Ok(total)
    }
}

impl<T: Send> Broker<T> {
    async fn forward_or_abort<F, Fut>(&self, forward: &mut F, batch: Vec<T>) -> Result<()>
    where
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if let Err(error) = forward(batch).await {
            // Unblock a producer waiting for room that will never come.
            self.errored.store(true, Ordering::SeqCst);
            self.space_signal.notify_waiters();
            return Err(error);
        }
        Ok(())
    }
}

impl<T: Clone + Send> Broker<T> {
    /// Returns a copy of the head item without removing it.
    pub fn peek(&self) -> Option<T> {
        self.queue.lock().front().cloned()
    }
}

impl<T: Send + 'static> Broker<T> {
    /// Adapts the consumer loop into a stream of items, ending once the broker is
    /// closable. A recorded producer error is yielded as the final item.
    pub fn into_stream(self: Arc<Self>, wait: Duration) -> impl Stream<Item = Result<T>> + Send {
        let state = (self, VecDeque::new(), false);

        futures::stream::unfold(state, move |(broker, mut pending, mut done)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((Ok(item), (broker, pending, done)));
                }
                if done {
                    return match broker.take_error() {
                        Some(error) => Some((Err(error), (broker, pending, true))),
                        None => None,
                    };
                }

                if broker.is_closable() {
                    let mut rest = Vec::new();
                    broker.drain_to(&mut rest);
                    pending.extend(rest);
                    done = true;
                    continue;
                }

                broker.await_signal(wait).await;
                let mut batch = Vec::new();
                broker.drain_to(&mut batch);
                pending.extend(batch);
            }
        })
    }
}
