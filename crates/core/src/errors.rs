use crate::models::ExchangeId;
use serde::{Deserialize, Serialize};

/// Errors that can occur anywhere in the ingestion path.
///
/// Only `Config` is ever surfaced to callers; the other variants are
/// handled inside the feed (retry, drop-message) and reported as
/// [`FailureRecord`]s.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Socket-level failure (connect, read, heartbeat). Retried forever
    /// with bounded exponential backoff.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected payload. The single message is dropped and
    /// the connection stays open.
    #[error("decode error: {0}")]
    Decode(String),

    /// A wire symbol with no canonical mapping. The message is dropped.
    #[error("unknown symbol {wire:?} on {exchange}")]
    UnknownSymbol { exchange: ExchangeId, wire: String },

    /// Invalid subscribe input. Rejected synchronously before any
    /// connection is opened.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl FeedError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FeedError::Transport(_) => FailureKind::Transport,
            FeedError::Decode(_) => FailureKind::Decode,
            FeedError::UnknownSymbol { .. } => FailureKind::UnknownSymbol,
            FeedError::Config(_) => FailureKind::Config,
        }
    }
}

/// Category of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Decode,
    UnknownSymbol,
    Config,
}

/// Structured record of a failure on one shard.
///
/// Every error path emits one of these (kept on the shard state, logged
/// with structured fields) instead of disappearing into ad hoc log lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    /// Shard identifier, e.g. `binance-0`.
    pub shard: String,
    /// Unix milliseconds.
    pub at: i64,
}

impl FailureRecord {
    pub fn new(kind: FailureKind, shard: impl Into<String>) -> Self {
        Self {
            kind,
            shard: shard.into(),
            at: crate::now_ms(),
        }
    }
}
