//! Response demux (§4.E): joins the responses from every inner-group send
//! in an outer group back to the submissions that originated them, keyed
//! by topic, and resolves each submission's completion exactly once.

use std::sync::Arc;

use tokio::sync::oneshot;

use super::error::ProducerError;
use crate::connection::ConnectionError;
use crate::protocol::ProduceResponse;

/// What's left of a [`super::Submission`] once its topic and messages have
/// been consumed by fan-out: just enough to join responses back to it and
/// resolve its completion.
pub(super) struct PendingSubmission {
    pub(super) topic: String,
    pub(super) had_messages: bool,
    pub(super) completion: oneshot::Sender<Result<Vec<ProduceResponse>, ProducerError>>,
}

/// Resolves every submission in the group with the same terminal error.
/// Used for outer-group-wide failures: a faulted connection send, or a
/// route that could not be resolved.
pub(super) fn fail_all(pending: Vec<PendingSubmission>, error: ProducerError) {
    for submission in pending {
        // Ignoring the send error: the caller may have dropped its
        // `SendHandle`, which is fine — there's nothing left to notify.
        let _ = submission.completion.send(Err(error.clone()));
    }
}

/// Resolves every submission in the group with an empty response list.
/// Used when every submission in the group had zero messages, so no inner
/// group — and thus no request — was ever built.
pub(super) fn complete_empty(pending: Vec<PendingSubmission>) {
    for submission in pending {
        let _ = submission.completion.send(Ok(Vec::new()));
    }
}

/// Joins the per-route send results back to their submissions.
///
/// On any faulted result, every submission in the group is resolved with
/// [`ProducerError::SendFailed`] carrying the first faulted route. On full
/// success, each submission is resolved with the responses whose `topic`
/// matches its own — a left outer join on topic, not partition, since a
/// submission declares a topic rather than a target partition. Submissions
/// that started with zero messages always resolve to an empty list,
/// regardless of what else landed in the same topic this cycle.
pub(super) fn resolve(
    pending: Vec<PendingSubmission>,
    results: Vec<Result<Vec<ProduceResponse>, ConnectionError>>,
    route_descriptions: Vec<String>,
) {
    if let Some(index) = results.iter().position(Result::is_err) {
        let err = match &results[index] {
            Err(err) => err.clone(),
            Ok(_) => unreachable!(),
        };
        let error = ProducerError::SendFailed {
            route: route_descriptions[index].clone(),
            source: Arc::new(err),
        };
        fail_all(pending, error);
        return;
    }

    let mut all_responses = Vec::new();
    for result in results {
        all_responses.extend(result.expect("checked above: no result is an error"));
    }

    for submission in pending {
        let responses = if submission.had_messages {
            all_responses
                .iter()
                .filter(|response| response.topic == submission.topic)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        let _ = submission.completion.send(Ok(responses));
    }
}
