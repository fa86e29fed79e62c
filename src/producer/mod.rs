//! The producer core: the asynchronous ingress-to-broker pipeline.
//!
//! # Data Flow
//!
//! ```text
//! ---(Submission)--->|              |
//! <-(SendHandle)--o  |   Ingress    |--(batch)-->|  Dispatch  |--(batch)-->|   Fan-out &   |
//!                 ║  |    Queue     |            |    Loop    |            |   Regrouping  |
//! ---(Submission)--->|              |            +------------+            +---------------+
//! <-(SendHandle)--o  |              |                                              |
//!      ...        ║  +--------------+                                    (one request per
//!                 ║                                                       inner group)
//!                 ║                                                              |
//!                 ║         +-----------------+                                  V
//!                 o=========|  Response Demux |<----------(responses)----(Connection::send)
//!                           +-----------------+
//! ```
//!
//! # Usage
//!
//! ```no_run
//! # async fn test(router: std::sync::Arc<dyn producer_core::router::Router>,
//! #                metadata: std::sync::Arc<dyn producer_core::metadata::MetadataQueries>) {
//! use producer_core::producer::{Producer, ProducerConfigBuilder, SendOptions};
//! use producer_core::protocol::Message;
//!
//! let producer = Producer::new(
//!     router,
//!     metadata,
//!     ProducerConfigBuilder::new().with_batch_size(50).build(),
//! );
//!
//! let handle = producer
//!     .send("my_topic", vec![Message::new("hello kafka")], SendOptions::default())
//!     .await
//!     .unwrap();
//! let responses = handle.await.unwrap();
//! # let _ = responses;
//! # producer.shutdown(true, None).await.unwrap();
//! # }
//! ```

mod demux;
mod dispatch;
pub mod error;
mod fanout;
mod ingress;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use error::ProducerError;
pub use ingress::QueueError;

use crate::metadata::{MetadataError, MetadataQueries, OffsetResponse, OffsetTime, Topic};
use crate::protocol::{Acks, Codec, Message, ProduceResponse};
use crate::router::Router;

/// One caller-level [`Producer::send`] invocation, queued for batching.
///
/// `completion` is consumed by [`demux`] exactly once, whichever outer
/// group this submission ends up in.
#[derive(Debug)]
struct Submission {
    topic: String,
    messages: Vec<Message>,
    acks: Acks,
    timeout: Duration,
    codec: Codec,
    completion: oneshot::Sender<Result<Vec<ProduceResponse>, ProducerError>>,
}

/// Per-call overrides for [`Producer::send`].
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub acks: Acks,
    pub timeout: Duration,
    pub codec: Codec,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            acks: Acks::Leader,
            timeout: Duration::from_millis(1000),
            codec: Codec::None,
        }
    }
}

/// A future resolving to the per-partition responses for one [`Producer::send`]
/// call, or the error that terminated it.
///
/// This is a thin, named wrapper around a one-shot channel so callers get a
/// concrete, documented type instead of an opaque `impl Future`. It is not
/// cancellation-safe to rely on dropping it to abort the submission — per
/// §5, `send` is not cancellable post-enqueue; the messages will still be
/// attempted even if this handle is dropped.
#[derive(Debug)]
pub struct SendHandle {
    receiver: oneshot::Receiver<Result<Vec<ProduceResponse>, ProducerError>>,
}

impl Future for SendHandle {
    type Output = Result<Vec<ProduceResponse>, ProducerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The completion sender was dropped without resolving — this
            // only happens if the producer was torn down mid-flight.
            Poll::Ready(Err(_)) => Poll::Ready(Err(ProducerError::ProducerDisposed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Configuration surface (§6): everything that isn't a per-call override.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Capacity of the ingress queue. `None` means unbounded.
    pub max_message_buffer: Option<usize>,
    /// Max submissions accumulated per dispatch cycle.
    pub batch_size: usize,
    /// Max wait for a batch to fill before it's dispatched anyway.
    pub batch_delay: Duration,
    /// Default cap on how long a graceful [`Producer::shutdown`] waits.
    pub max_dispose_wait: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_message_buffer: Some(100),
            batch_size: 10,
            batch_delay: Duration::from_millis(100),
            max_dispose_wait: Duration::from_secs(30),
        }
    }
}

/// Builder for [`ProducerConfig`], following the same `with_*` consuming
/// style as the rest of this crate's builders.
#[derive(Debug)]
pub struct ProducerConfigBuilder {
    config: ProducerConfig,
}

impl ProducerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ProducerConfig::default(),
        }
    }

    pub fn with_max_message_buffer(mut self, max: Option<usize>) -> Self {
        self.config.max_message_buffer = max;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn with_batch_delay(mut self, batch_delay: Duration) -> Self {
        self.config.batch_delay = batch_delay;
        self
    }

    pub fn with_max_dispose_wait(mut self, max_dispose_wait: Duration) -> Self {
        self.config.max_dispose_wait = max_dispose_wait;
        self
    }

    pub fn build(self) -> ProducerConfig {
        self.config
    }
}

impl Default for ProducerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The producer core: accepts submissions, batches and fans them out to
/// the broker, and demultiplexes responses back to callers.
///
/// See the [module docs](self) for the end-to-end data flow.
#[derive(Debug)]
pub struct Producer {
    queue: Arc<ingress::IngressQueue<Submission>>,
    active: Arc<AtomicI64>,
    stop: CancellationToken,
    dispatch: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    max_dispose_wait: Duration,
    metadata: Arc<dyn MetadataQueries>,
}

impl Producer {
    /// Constructs the ingress queue and spawns the dispatch loop.
    pub fn new(
        router: Arc<dyn Router>,
        metadata: Arc<dyn MetadataQueries>,
        config: ProducerConfig,
    ) -> Self {
        let queue = Arc::new(ingress::IngressQueue::new(config.max_message_buffer));
        let active = Arc::new(AtomicI64::new(0));
        let stop = CancellationToken::new();

        let dispatch_handle = tokio::spawn(dispatch::run(
            Arc::clone(&queue),
            router,
            Arc::clone(&active),
            stop.clone(),
            config.batch_size,
            config.batch_delay,
        ));

        Self {
            queue,
            active,
            stop,
            dispatch: tokio::sync::Mutex::new(Some(dispatch_handle)),
            max_dispose_wait: config.max_dispose_wait,
            metadata,
        }
    }

    /// Submits `messages` under `topic` for delivery, suspending under
    /// ingress backpressure if necessary. Returns a [`SendHandle`] resolving
    /// once every co-routed response has been demultiplexed back to this
    /// submission.
    ///
    /// Fails synchronously with [`ProducerError::ProducerDisposed`] if the
    /// producer is already shutting down, or
    /// [`ProducerError::IngressSealed`] if sealing races with this call's
    /// enqueue. Any later failure is delivered through the returned handle,
    /// never synchronously.
    pub async fn send(
        &self,
        topic: impl Into<String>,
        messages: Vec<Message>,
        options: SendOptions,
    ) -> Result<SendHandle, ProducerError> {
        if self.stop.is_cancelled() {
            return Err(ProducerError::ProducerDisposed);
        }

        let (completion, receiver) = oneshot::channel();
        let message_count = messages.len() as i64;
        let submission = Submission {
            topic: topic.into(),
            messages,
            acks: options.acks,
            timeout: options.timeout,
            codec: options.codec,
            completion,
        };

        self.queue
            .add(submission)
            .await
            .map_err(|_| ProducerError::IngressSealed)?;

        self.active.fetch_add(message_count, Ordering::AcqRel);

        Ok(SendHandle { receiver })
    }

    /// Sum of `|messages|` for every submission currently between `send`
    /// and the moment its request was handed to the connection layer.
    pub fn in_flight_messages(&self) -> i64 {
        self.active.load(Ordering::Acquire)
    }

    pub async fn get_topic(&self, name: &str) -> Result<Topic, MetadataError> {
        self.metadata.get_topic(name).await
    }

    pub async fn get_topic_offsets(
        &self,
        name: &str,
        max_offsets: i32,
        time: OffsetTime,
    ) -> Result<Vec<OffsetResponse>, MetadataError> {
        self.metadata.get_topic_offsets(name, max_offsets, time).await
    }

    /// Seals the ingress queue and signals the stop token, then optionally
    /// waits for the dispatch loop to finish draining.
    ///
    /// `max_wait` defaults to [`ProducerConfig::max_dispose_wait`]. Safe to
    /// call more than once and in any order with [`Producer::force_shutdown`]
    /// or `drop`.
    pub async fn shutdown(
        &self,
        wait_for_in_flight: bool,
        max_wait: Option<Duration>,
    ) -> Result<(), ProducerError> {
        self.queue.seal();
        self.stop.cancel();

        if !wait_for_in_flight {
            return Ok(());
        }

        let handle = self.dispatch.lock().await.take();
        let Some(handle) = handle else {
            // Already awaited by a prior shutdown call.
            return Ok(());
        };

        let wait = max_wait.unwrap_or(self.max_dispose_wait);
        match tokio::time::timeout(wait, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_err)) => {
                tracing::error!(error = %join_err, "dispatch loop panicked during shutdown");
                Ok(())
            }
            Err(_) => {
                tracing::error!(?wait, "dispatch loop did not terminate within max_dispose_wait");
                Ok(())
            }
        }
    }

    /// Seals the queue and signals the stop token without waiting; aborts
    /// the dispatch task if it is still being tracked. Submissions still in
    /// flight at the moment of the abort will never resolve.
    pub fn force_shutdown(&self) {
        self.queue.seal();
        self.stop.cancel();
        if let Ok(mut guard) = self.dispatch.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        // Idempotent non-waiting stop: seal and cancel so the dispatch loop
        // drains and exits in the background even after this handle is gone.
        self.queue.seal();
        self.stop.cancel();
        debug!("producer dropped, dispatch loop left to drain in the background");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use assert_matches::assert_matches;

    use crate::connection::{Connection, ConnectionError};
    use crate::metadata::{MetadataError, MetadataQueries, OffsetResponse, OffsetTime, Topic};
    use crate::protocol::ProduceRequest;
    use crate::router::{Route, RouterError};

    /// A connection that either echoes back one response per message it was
    /// handed, or fails every call, depending on how it was built.
    #[derive(Debug)]
    struct FakeConnection {
        fail: bool,
        calls: StdMutex<Vec<ProduceRequest>>,
    }

    impl FakeConnection {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Connection for FakeConnection {
        async fn send(
            &self,
            request: ProduceRequest,
        ) -> Result<Vec<ProduceResponse>, ConnectionError> {
            if self.fail {
                return Err(ConnectionError::Network("fake connection failure".into()));
            }

            let acks = request.acks;
            let responses = request
                .payloads
                .iter()
                .flat_map(|payload| {
                    let topic = payload.topic.clone();
                    let partition = payload.partition;
                    payload.messages.iter().map(move |_| ProduceResponse {
                        topic: topic.clone(),
                        partition,
                        offset: 0,
                        error_code: 0,
                    })
                })
                .collect();

            self.calls.lock().unwrap().push(request);

            // acks == 0: fire-and-forget, the broker sends nothing back.
            if acks == 0 {
                Ok(Vec::new())
            } else {
                Ok(responses)
            }
        }
    }

    /// Routes every `(topic, key)` to a single fixed connection and partition.
    #[derive(Debug)]
    struct SingleRouter {
        connection: Arc<dyn Connection>,
    }

    #[async_trait]
    impl Router for SingleRouter {
        async fn select_route(
            &self,
            _topic: &str,
            _key: Option<&[u8]>,
        ) -> Result<Route, RouterError> {
            Ok(Route {
                broker_id: 1,
                partition_id: 0,
                connection: Arc::clone(&self.connection),
            })
        }
    }

    /// Routes by the first byte of the message key: even -> partition 0,
    /// odd -> partition 1, each with its own connection.
    #[derive(Debug)]
    struct TwoPartitionRouter {
        even: Arc<dyn Connection>,
        odd: Arc<dyn Connection>,
    }

    #[async_trait]
    impl Router for TwoPartitionRouter {
        async fn select_route(
            &self,
            _topic: &str,
            key: Option<&[u8]>,
        ) -> Result<Route, RouterError> {
            let odd = matches!(key, Some(k) if k.first().is_some_and(|b| b % 2 == 1));
            Ok(if odd {
                Route {
                    broker_id: 1,
                    partition_id: 1,
                    connection: Arc::clone(&self.odd),
                }
            } else {
                Route {
                    broker_id: 0,
                    partition_id: 0,
                    connection: Arc::clone(&self.even),
                }
            })
        }
    }

    /// Routes by topic name from a fixed table, failing for unknown topics.
    #[derive(Debug)]
    struct TopicRouter {
        routes: HashMap<String, Arc<dyn Connection>>,
    }

    #[async_trait]
    impl Router for TopicRouter {
        async fn select_route(
            &self,
            topic: &str,
            _key: Option<&[u8]>,
        ) -> Result<Route, RouterError> {
            self.routes
                .get(topic)
                .cloned()
                .map(|connection| Route {
                    broker_id: 0,
                    partition_id: 0,
                    connection,
                })
                .ok_or_else(|| RouterError::NoRoute {
                    topic: topic.to_string(),
                    reason: "not in fake routing table".to_string(),
                })
        }
    }

    #[derive(Debug)]
    struct FakeMetadata;

    #[async_trait]
    impl MetadataQueries for FakeMetadata {
        async fn get_topic(&self, name: &str) -> Result<Topic, MetadataError> {
            Ok(Topic {
                name: name.to_string(),
                partition_count: 1,
            })
        }

        async fn get_topic_offsets(
            &self,
            _name: &str,
            _max_offsets: i32,
            _time: OffsetTime,
        ) -> Result<Vec<OffsetResponse>, MetadataError> {
            Ok(Vec::new())
        }
    }

    fn fake_metadata() -> Arc<dyn MetadataQueries> {
        Arc::new(FakeMetadata)
    }

    #[tokio::test]
    async fn single_message_happy_path() {
        let connection = FakeConnection::new(false);
        let router: Arc<dyn Router> = Arc::new(SingleRouter {
            connection: Arc::clone(&connection) as Arc<dyn Connection>,
        });
        let producer = Producer::new(router, fake_metadata(), ProducerConfig::default());

        let handle = producer
            .send("orders", vec![Message::new("v1")], SendOptions::default())
            .await
            .unwrap();
        let responses = handle.await.unwrap();

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].topic, "orders");
        assert_eq!(connection.call_count(), 1);

        producer.shutdown(true, None).await.unwrap();
    }

    #[tokio::test]
    async fn fan_out_splits_across_partitions() {
        let even = FakeConnection::new(false);
        let odd = FakeConnection::new(false);
        let router: Arc<dyn Router> = Arc::new(TwoPartitionRouter {
            even: Arc::clone(&even) as Arc<dyn Connection>,
            odd: Arc::clone(&odd) as Arc<dyn Connection>,
        });
        let producer = Producer::new(router, fake_metadata(), ProducerConfig::default());

        let messages = vec![
            Message::with_key(vec![0u8], "even"),
            Message::with_key(vec![1u8], "odd"),
        ];
        let handle = producer
            .send("orders", messages, SendOptions::default())
            .await
            .unwrap();
        let responses = handle.await.unwrap();

        assert_eq!(responses.len(), 2);
        assert_eq!(even.call_count(), 1);
        assert_eq!(odd.call_count(), 1);

        producer.shutdown(true, None).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_sends_coalesce_into_one_request() {
        let connection = FakeConnection::new(false);
        let router: Arc<dyn Router> = Arc::new(SingleRouter {
            connection: Arc::clone(&connection) as Arc<dyn Connection>,
        });
        let config = ProducerConfigBuilder::new()
            .with_batch_size(10)
            .with_batch_delay(Duration::from_millis(100))
            .build();
        let producer = Arc::new(Producer::new(router, fake_metadata(), config));

        let mut handles = Vec::new();
        for i in 0..5 {
            let producer = Arc::clone(&producer);
            handles.push(tokio::spawn(async move {
                producer
                    .send("orders", vec![Message::new(format!("v{i}"))], SendOptions::default())
                    .await
                    .unwrap()
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().len(), 1);
        }

        // All five submissions shared the same route/topic/codec and the
        // same default acks/timeout, so they coalesce into one wire request.
        assert_eq!(connection.call_count(), 1);

        producer.shutdown(true, None).await.unwrap();
    }

    #[tokio::test]
    async fn acks_none_resolves_with_empty_response() {
        let connection = FakeConnection::new(false);
        let router: Arc<dyn Router> = Arc::new(SingleRouter {
            connection: Arc::clone(&connection) as Arc<dyn Connection>,
        });
        let producer = Producer::new(router, fake_metadata(), ProducerConfig::default());

        let options = SendOptions {
            acks: Acks::None,
            ..SendOptions::default()
        };
        let handle = producer
            .send("orders", vec![Message::new("v1")], options)
            .await
            .unwrap();
        let responses = handle.await.unwrap();

        assert!(responses.is_empty());

        producer.shutdown(true, None).await.unwrap();
    }

    #[tokio::test]
    async fn send_failure_is_isolated_to_its_own_outer_group() {
        let failing = FakeConnection::new(true);
        let ok = FakeConnection::new(false);
        let mut routes: HashMap<String, Arc<dyn Connection>> = HashMap::new();
        routes.insert("fails".to_string(), Arc::clone(&failing) as Arc<dyn Connection>);
        routes.insert("ok".to_string(), Arc::clone(&ok) as Arc<dyn Connection>);
        let router: Arc<dyn Router> = Arc::new(TopicRouter { routes });

        let producer = Producer::new(router, fake_metadata(), ProducerConfig::default());

        // Different acks values put these submissions in different outer
        // groups, so the failing group can't drag down the healthy one.
        let failing_handle = producer
            .send(
                "fails",
                vec![Message::new("a")],
                SendOptions {
                    acks: Acks::Leader,
                    ..SendOptions::default()
                },
            )
            .await
            .unwrap();
        let ok_handle = producer
            .send(
                "ok",
                vec![Message::new("b")],
                SendOptions {
                    acks: Acks::AllIsr,
                    ..SendOptions::default()
                },
            )
            .await
            .unwrap();

        let failing_result = failing_handle.await.unwrap_err();
        assert_matches!(failing_result, ProducerError::SendFailed { .. });

        let ok_result = ok_handle.await.unwrap();
        assert_eq!(ok_result.len(), 1);

        producer.shutdown(true, None).await.unwrap();
    }

    #[tokio::test]
    async fn graceful_shutdown_resolves_residual_submissions() {
        let connection = FakeConnection::new(false);
        let router: Arc<dyn Router> = Arc::new(SingleRouter {
            connection: Arc::clone(&connection) as Arc<dyn Connection>,
        });
        let config = ProducerConfigBuilder::new()
            .with_batch_size(10)
            .with_batch_delay(Duration::from_millis(200))
            .with_max_dispose_wait(Duration::from_secs(5))
            .build();
        let producer = Producer::new(router, fake_metadata(), config);

        let mut handles = Vec::new();
        for i in 0..7 {
            handles.push(
                producer
                    .send("orders", vec![Message::new(format!("v{i}"))], SendOptions::default())
                    .await
                    .unwrap(),
            );
        }

        // Fewer than batch_size have accumulated and batch_delay hasn't
        // elapsed, so these are still sitting in the ingress queue. A
        // graceful shutdown must still flush and resolve every one of them.
        producer.shutdown(true, None).await.unwrap();

        for handle in handles {
            assert_eq!(handle.await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn in_flight_counter_returns_to_zero_after_resolution() {
        let connection = FakeConnection::new(false);
        let router: Arc<dyn Router> = Arc::new(SingleRouter {
            connection: Arc::clone(&connection) as Arc<dyn Connection>,
        });
        let producer = Producer::new(router, fake_metadata(), ProducerConfig::default());

        let handle = producer
            .send(
                "orders",
                vec![Message::new("a"), Message::new("b")],
                SendOptions::default(),
            )
            .await
            .unwrap();
        handle.await.unwrap();

        assert_eq!(producer.in_flight_messages(), 0);

        producer.shutdown(true, None).await.unwrap();
    }

    #[tokio::test]
    async fn send_after_shutdown_is_rejected_synchronously() {
        let connection = FakeConnection::new(false);
        let router: Arc<dyn Router> = Arc::new(SingleRouter {
            connection: Arc::clone(&connection) as Arc<dyn Connection>,
        });
        let producer = Producer::new(router, fake_metadata(), ProducerConfig::default());

        producer.shutdown(true, None).await.unwrap();

        let err = producer
            .send("orders", vec![Message::new("too late")], SendOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, ProducerError::ProducerDisposed);
    }

    #[tokio::test]
    async fn zero_message_submission_resolves_with_empty_list() {
        let connection = FakeConnection::new(false);
        let router: Arc<dyn Router> = Arc::new(SingleRouter {
            connection: Arc::clone(&connection) as Arc<dyn Connection>,
        });
        let producer = Producer::new(router, fake_metadata(), ProducerConfig::default());

        let handle = producer
            .send("orders", Vec::new(), SendOptions::default())
            .await
            .unwrap();
        let responses = handle.await.unwrap();

        assert!(responses.is_empty());
        assert_eq!(connection.call_count(), 0);

        producer.shutdown(true, None).await.unwrap();
    }
}
