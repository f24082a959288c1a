//! Contracts for the three external collaborators of the pipeline.
//!
//! - [`ResultCache`]: ephemeral index → value map, last write wins.
//! - [`DurableLog`]: append-only history of submissions.
//! - [`EventBus`]: fire-and-forget publish/subscribe on named topics.
//!
//! [`memory`] holds in-process implementations, [`journal`] a file-backed
//! log, [`remote`] the TCP client for a running store process, and
//! [`server`] the store process itself.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{CacheValue, Index, SubmissionRecord};

pub mod journal;
pub mod memory;
pub mod remote;
pub mod server;

/// Key/value cache of computation state.
///
/// Writes are unconditional overwrites. There is no compare-and-swap: two
/// writers racing on the same index both succeed and the later one wins.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn set(&self, index: Index, value: CacheValue) -> Result<()>;

    async fn snapshot(&self) -> Result<BTreeMap<Index, CacheValue>>;
}

/// Append-only record of every accepted submission, duplicates included.
#[async_trait]
pub trait DurableLog: Send + Sync {
    async fn append(&self, record: SubmissionRecord) -> Result<()>;

    /// Every record in append order.
    async fn read_all(&self) -> Result<Vec<SubmissionRecord>>;
}

/// At-most-once notification channel.
///
/// `publish` returns how many subscribers were connected when the payload
/// went out. Zero means it was dropped; nothing is queued for later.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<usize>;

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>>;
}

/// Stream of payloads for one topic.
#[async_trait]
pub trait Subscription: Send {
    /// Next payload, or `None` once the subscription is closed.
    async fn next(&mut self) -> Option<String>;
}
