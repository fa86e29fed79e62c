//! The `MetadataQueries` collaborator (§6).
//!
//! Topic/offset lookups are a pass-through façade on [`Producer`](crate::producer::Producer):
//! it forwards to whatever implementation is supplied and adds no batching
//! or caching logic of its own.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub name: String,
    pub partition_count: i32,
}

/// The `time` argument of an offset lookup: either a well-known marker or a
/// specific broker timestamp (milliseconds since the epoch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetTime {
    Latest,
    Earliest,
    At(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetResponse {
    pub partition: i32,
    pub offsets: Vec<i64>,
}

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum MetadataError {
    #[error("unknown topic {0:?}")]
    UnknownTopic(String),

    #[error("metadata request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait MetadataQueries: std::fmt::Debug + Send + Sync {
    async fn get_topic(&self, name: &str) -> Result<Topic, MetadataError>;

    async fn get_topic_offsets(
        &self,
        name: &str,
        max_offsets: i32,
        time: OffsetTime,
    ) -> Result<Vec<OffsetResponse>, MetadataError>;
}
