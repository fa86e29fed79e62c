//! The broker `Connection` collaborator (§6).
//!
//! Wire framing, protocol encoding, and request/response correlation all
//! live behind this trait. The producer core only ever calls
//! [`Connection::send`] and reacts to its `Result`.

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{ProduceRequest, ProduceResponse};

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("network error talking to broker: {0}")]
    Network(String),

    #[error("broker rejected request with error code {0}")]
    Broker(i16),
}

/// A connection capable of speaking to a single partition's leader broker.
#[async_trait]
pub trait Connection: std::fmt::Debug + Send + Sync {
    async fn send(&self, request: ProduceRequest) -> Result<Vec<ProduceResponse>, ConnectionError>;
}
