//! The dispatch loop (§4.C): the single long-running task that drains the
//! ingress queue until it completes.
//!
//! ```text
//! while not queue.is_completed():
//!     batch := take_batch(batch_size, batch_delay, stop)  // may fail on cancel
//!     if queue.is_sealed() and queue.len() > 0:
//!         batch += queue.drain()
//!     if batch non-empty:
//!         produce_and_send(batch)
//! ```
//!
//! Two cancellation classes are handled differently (§4.C, §7):
//!
//! - Cancellation *during* `take_batch` is expected and benign: the loop
//!   falls through to its sealed-queue drain and sends whatever that turns
//!   up before checking whether it should exit.
//! - A panic *inside* `produce_and_send` (the "dispatch-internal" error
//!   class) is caught by running it as a spawned task and awaiting the
//!   `JoinHandle`: it is logged and swallowed, and the loop continues.

use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use super::fanout;
use super::ingress::IngressQueue;
use super::Submission;
use crate::router::Router;

pub(super) async fn run(
    queue: Arc<IngressQueue<Submission>>,
    router: Arc<dyn Router>,
    active: Arc<AtomicI64>,
    stop: CancellationToken,
    batch_size: usize,
    batch_delay: Duration,
) {
    while !queue.is_completed() {
        let mut batch = match queue.take_batch(batch_size, batch_delay, &stop).await {
            Ok(items) => items,
            Err(_) => {
                trace!("take_batch cancelled, checking for residual sealed-queue items");
                Vec::new()
            }
        };

        if queue.is_sealed() && queue.len() > 0 {
            batch.extend(queue.drain());
        }

        if batch.is_empty() {
            continue;
        }

        trace!(batch_len = batch.len(), "dispatching batch");

        let router = Arc::clone(&router);
        let active = Arc::clone(&active);
        let task = tokio::spawn(async move {
            fanout::produce_and_send(batch, router, active).await;
        });

        if let Err(join_err) = task.await {
            // dispatch-internal: every submission in the failing batch must
            // already have had its completion resolved before fan-out could
            // panic past that point, so nothing here can leave a caller
            // hanging — this is purely a logging concern.
            error!(error = %join_err, "dispatch loop: batch processing task failed unexpectedly");
        }
    }

    debug!("dispatch loop exiting: ingress queue sealed and drained");
}
