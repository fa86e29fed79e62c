//! The broker `Router` collaborator (§6).
//!
//! Topic metadata discovery, partition selection, and connection pooling
//! all live behind this trait. The producer core only asks it to resolve a
//! `(topic, key)` pair to a [`Route`].

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::connection::Connection;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RouterError {
    #[error("no route for topic {topic:?}: {reason}")]
    NoRoute { topic: String, reason: String },
}

/// A resolved `(partition, connection)` pair for a `(topic, key)` lookup.
///
/// `broker_id` identifies the partition's leader broker; together with
/// `partition_id` it forms the [`RouteKey`] used to group messages destined
/// for the same wire request.
#[derive(Clone)]
pub struct Route {
    pub broker_id: i32,
    pub partition_id: i32,
    pub connection: Arc<dyn Connection>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("broker_id", &self.broker_id)
            .field("partition_id", &self.partition_id)
            .finish()
    }
}

impl Route {
    pub fn key(&self) -> RouteKey {
        RouteKey {
            broker_id: self.broker_id,
            partition_id: self.partition_id,
        }
    }
}

/// Grouping key distinguishing one `(route, topic, codec)` inner group from
/// another. Routes themselves aren't `Eq`/`Hash` since they carry a
/// connection handle, so the router hands out this small copyable key
/// alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub broker_id: i32,
    pub partition_id: i32,
}

#[async_trait]
pub trait Router: std::fmt::Debug + Send + Sync {
    /// Resolve the partition (and its leader connection) that a message
    /// with the given key should be sent to.
    async fn select_route(&self, topic: &str, key: Option<&[u8]>) -> Result<Route, RouterError>;
}
