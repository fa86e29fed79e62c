use std::sync::Arc;

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::router::RouterError;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ProducerError {
    /// Submission rejected because the producer is shutting down. Surfaced
    /// synchronously from [`Producer::send`](super::Producer::send).
    #[error("producer is shutting down, submission rejected")]
    ProducerDisposed,

    /// Rare race where sealing occurred between the disposed check and the
    /// ingress `add`. Also surfaced synchronously.
    #[error("ingress queue sealed")]
    IngressSealed,

    /// One or more connection sends faulted within an outer `(acks,
    /// timeout)` group. Every submission in that group is completed with
    /// this error; other groups in the same batch are unaffected.
    #[error("send failed on route {route}: {source}")]
    SendFailed {
        route: String,
        source: Arc<ConnectionError>,
    },

    /// The router could not resolve a route for one of the group's
    /// messages. Treated the same as a send failure: it fails the whole
    /// outer group rather than just the offending submission, since by the
    /// time a route fails the group's request shape can no longer be
    /// determined.
    #[error("router failed to select a route: {0}")]
    RouteSelection(#[from] RouterError),
}

pub type Result<T, E = ProducerError> = std::result::Result<T, E>;
