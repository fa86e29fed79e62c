//! Fan-out & regrouping (§4.D): the two-level grouping pipeline that turns
//! one dispatched batch of [`Submission`]s into one wire request per
//! `(route, topic, codec)` inner group.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{error, trace};

use super::demux::{self, PendingSubmission};
use super::Submission;
use crate::protocol::{Acks, Codec, Payload, ProduceRequest};
use crate::router::{Route, RouteKey, Router};

/// Accumulates the messages destined for one `(route, topic, codec)` inner
/// group while the batch is being flattened.
struct RoutedGroup {
    route: Route,
    topic: String,
    codec: Codec,
    messages: Vec<crate::protocol::Message>,
}

/// Entry point for a dispatched batch: splits it into outer `(acks,
/// timeout)` groups and processes each independently, so a failure in one
/// never affects submissions in another (§8 invariant 5).
pub(super) async fn produce_and_send(
    batch: Vec<Submission>,
    router: Arc<dyn Router>,
    active: Arc<AtomicI64>,
) {
    let mut outer_groups: HashMap<(Acks, Duration), Vec<Submission>> = HashMap::new();
    for submission in batch {
        outer_groups
            .entry((submission.acks, submission.timeout))
            .or_default()
            .push(submission);
    }

    let tasks = outer_groups.into_iter().map(|((acks, timeout), submissions)| {
        process_outer_group(acks, timeout, submissions, Arc::clone(&router), Arc::clone(&active))
    });

    join_all(tasks).await;
}

async fn process_outer_group(
    acks: Acks,
    timeout: Duration,
    submissions: Vec<Submission>,
    router: Arc<dyn Router>,
    active: Arc<AtomicI64>,
) {
    // Every submission here already had its full message count added to
    // `active` by `Producer::send`. None of that credit is released until
    // the per-route `fetch_sub` below runs, so a route-selection failure
    // that bails out early must release the whole group's share itself.
    let total_message_count: i64 = submissions.iter().map(|s| s.messages.len() as i64).sum();

    // Register every submission's completion up front, before any routing is
    // attempted: a route failure partway through must still be able to fail
    // submissions that haven't been visited yet, not just the ones already
    // seen by the loop below.
    let mut pending = Vec::with_capacity(submissions.len());
    let mut to_route = Vec::with_capacity(submissions.len());
    for submission in submissions {
        let Submission {
            topic,
            messages,
            codec,
            completion,
            ..
        } = submission;

        pending.push(PendingSubmission {
            topic: topic.clone(),
            had_messages: !messages.is_empty(),
            completion,
        });
        to_route.push((topic, codec, messages));
    }

    let mut routed: HashMap<(RouteKey, String, Codec), RoutedGroup> = HashMap::new();

    for (topic, codec, messages) in to_route {
        for message in messages {
            let route = match router.select_route(&topic, message.key.as_deref()).await {
                Ok(route) => route,
                Err(err) => {
                    trace!(topic, "route selection failed, failing outer group");
                    active.fetch_sub(total_message_count, Ordering::AcqRel);
                    demux::fail_all(pending, err.into());
                    return;
                }
            };

            routed
                .entry((route.key(), topic.clone(), codec))
                .or_insert_with(|| RoutedGroup {
                    route,
                    topic: topic.clone(),
                    codec,
                    messages: Vec::new(),
                })
                .messages
                .push(message);
        }
    }

    if routed.is_empty() {
        // Every submission in this outer group had zero messages.
        demux::complete_empty(pending);
        return;
    }

    let mut sends = Vec::with_capacity(routed.len());
    let mut route_descriptions = Vec::with_capacity(routed.len());

    for (_, group) in routed {
        let RoutedGroup {
            route,
            topic,
            codec,
            messages,
        } = group;
        let message_count = messages.len() as i64;

        let request = ProduceRequest {
            acks: acks.as_i16(),
            timeout_ms: timeout.as_millis().min(i32::MAX as u128) as i32,
            payloads: vec![Payload {
                topic: topic.clone(),
                partition: route.partition_id,
                codec,
                messages,
            }],
        };

        route_descriptions.push(format!(
            "broker {} partition {} ({})",
            route.broker_id, route.partition_id, topic
        ));

        let connection = Arc::clone(&route.connection);
        sends.push(async move { connection.send(request).await });

        // The message is now the connection's responsibility to deliver.
        active.fetch_sub(message_count, Ordering::AcqRel);
    }

    trace!(groups = sends.len(), "awaiting inner-group sends");
    let results = join_all(sends).await;

    if let Some(Err(err)) = results.iter().find(|r| r.is_err()) {
        error!(error = %err, "inner-group send failed, failing outer group");
    }

    demux::resolve(pending, results, route_descriptions);
}
