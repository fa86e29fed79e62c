//! Wire-shaped data types exchanged with the broker `Connection` (§6 of the
//! design doc).
//!
//! This module only describes the *shape* of the produce request/response
//! pair; encoding these into actual broker wire bytes is the job of the
//! [`connection`](crate::connection) implementation, which lives outside
//! this crate.

use bytes::Bytes;

/// A single record: an optional key plus a value payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub key: Option<Bytes>,
    pub value: Bytes,
}

impl Message {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            key: None,
            value: value.into(),
        }
    }

    pub fn with_key(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: Some(key.into()),
            value: value.into(),
        }
    }
}

/// Broker-side durability requirement for a produce request.
///
/// Mirrors the signed 16-bit `acks` field of the wire protocol, but gives
/// the well-known values names instead of leaving callers to remember that
/// `-1` means "all in-sync replicas".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Acks {
    /// Fire-and-forget; the broker sends no response.
    None,
    /// Wait for the partition leader to append the record.
    Leader,
    /// Wait for every in-sync replica to acknowledge.
    AllIsr,
    /// Wait for a specific number of replicas (`n >= 2`).
    Replicas(u16),
}

impl Default for Acks {
    fn default() -> Self {
        Self::Leader
    }
}

impl Acks {
    pub fn as_i16(self) -> i16 {
        match self {
            Self::None => 0,
            Self::Leader => 1,
            Self::AllIsr => -1,
            Self::Replicas(n) => n as i16,
        }
    }
}

impl From<i16> for Acks {
    fn from(value: i16) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Leader,
            -1 => Self::AllIsr,
            n if n >= 2 => Self::Replicas(n as u16),
            _ => Self::Leader,
        }
    }
}

impl From<Acks> for i16 {
    fn from(value: Acks) -> Self {
        value.as_i16()
    }
}

/// Compression selector for a payload.
///
/// Selecting a codec is in scope for the producer core; actually
/// compressing/decompressing bytes for a given codec is not (see the
/// Non-goals in `SPEC_FULL.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Codec {
    #[default]
    None,
    Gzip,
    Lz4,
    Snappy,
    Zstd,
}

/// One wire request: a fixed `acks`/`timeout_ms` pair plus the payloads it
/// carries. The producer core always issues requests with exactly one
/// payload (one inner group == one request == one payload), but the shape
/// allows more since that's how the broker protocol defines it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProduceRequest {
    pub acks: i16,
    pub timeout_ms: i32,
    pub payloads: Vec<Payload>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub topic: String,
    pub partition: i32,
    pub codec: Codec,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProduceResponse {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub error_code: i16,
}
