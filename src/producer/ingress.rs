//! The bounded ingress queue (§4.A): a producer-multiple / consumer-single
//! FIFO with an explicit batched-take operation, distinguishing it from an
//! ordinary channel.
//!
//! Capacity is modeled as an [`Arc<Semaphore>`](Semaphore): sealing the
//! queue closes the semaphore, which atomically fails every pending and
//! future `add` with [`QueueError::Sealed`] — this is what gives `add` its
//! race-free "unblocks on space or on seal" semantics for free, instead of
//! a hand-rolled wakeup.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("ingress queue is sealed")]
    Sealed,
    #[error("take_batch was cancelled")]
    Cancelled,
}

#[derive(Debug)]
pub struct IngressQueue<T> {
    /// Each held item carries the capacity permit it was enqueued with, so
    /// occupancy is modeled for as long as the item sits in the queue — the
    /// permit is only dropped (returning space to `self.space`) when the
    /// item leaves via `take_up_to`/`drain`, not when `add` returns.
    items: Mutex<VecDeque<(Option<OwnedSemaphorePermit>, T)>>,
    sealed: AtomicBool,
    arrived: Notify,
    /// `None` means unbounded (`maximumMessageBuffer = -1`): `add` never blocks.
    space: Option<Arc<Semaphore>>,
}

impl<T> IngressQueue<T> {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            sealed: AtomicBool::new(false),
            arrived: Notify::new(),
            space: capacity.map(|c| Arc::new(Semaphore::new(c))),
        }
    }

    /// Enqueue `item`, suspending under backpressure until space frees up or
    /// the queue is sealed.
    pub async fn add(&self, item: T) -> Result<(), QueueError> {
        let permit = match &self.space {
            Some(space) => Some(
                Arc::clone(space)
                    .acquire_owned()
                    .await
                    .map_err(|_| QueueError::Sealed)?,
            ),
            None => None,
        };

        // A permit may have been granted just before `seal` closed the
        // semaphore; re-check so a racing seal still rejects the add.
        if self.is_sealed() {
            return Err(QueueError::Sealed);
        }

        self.items.lock().push_back((permit, item));
        self.arrived.notify_waiters();
        Ok(())
    }

    /// Returns once `max_count` items have accumulated, `max_delay` has
    /// elapsed since the first item was observed, the queue is sealed, or
    /// `cancel` trips. Nothing is removed from the queue until the decision
    /// to return is made, so a cancelled call leaves the queue untouched.
    pub async fn take_batch(
        &self,
        max_count: usize,
        max_delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, QueueError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        // Wait for at least one item, sealing, or cancellation.
        loop {
            let notified = self.arrived.notified();
            if !self.is_empty() || self.is_sealed() {
                break;
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            }
        }

        if self.len() >= max_count || self.is_sealed() {
            return Ok(self.take_up_to(max_count));
        }

        // At least one item is present: wait up to `max_delay` for more.
        let deadline = Instant::now() + max_delay;
        loop {
            let notified = self.arrived.notified();
            if self.len() >= max_count || self.is_sealed() {
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = tokio::time::sleep(remaining) => break,
            }
        }

        Ok(self.take_up_to(max_count))
    }

    /// Returns everything currently queued without waiting. Intended for
    /// post-seal cleanup by the dispatch loop.
    pub fn drain(&self) -> Vec<T> {
        self.items
            .lock()
            .drain(..)
            .map(|(_permit, item)| item)
            .collect()
    }

    /// Stops accepting new items; any subsequent `add` fails with
    /// [`QueueError::Sealed`] and in-flight `take_batch` calls return
    /// promptly with whatever they already hold.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
        if let Some(space) = &self.space {
            space.close();
        }
        self.arrived.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.is_sealed() && self.is_empty()
    }

    fn take_up_to(&self, n: usize) -> Vec<T> {
        let mut items = self.items.lock();
        let n = n.min(items.len());
        items.drain(..n).map(|(_permit, item)| item).collect()
    }
}
