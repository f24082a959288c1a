//! In-process collaborators.
//!
//! These back the store process and the in-process tests. Nothing here
//! survives a restart; [`super::journal::JournalLog`] is the durable log.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use tracing::warn;

use super::{DurableLog, EventBus, ResultCache, Subscription};
use crate::model::{CacheValue, Index, SubmissionRecord};

/// Per-topic buffer before a slow subscriber starts losing events.
const TOPIC_CAPACITY: usize = 128;

/// Result cache held in a single map.
///
/// `BTreeMap` keeps snapshots in ascending index order, which is what the
/// query endpoint hands back to clients.
#[derive(Default)]
pub struct MemoryCache {
    data: Mutex<BTreeMap<Index, CacheValue>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, index: Index) -> Option<CacheValue> {
        self.data.lock().await.get(&index).copied()
    }

    /// Drops every entry, as when the cache is flushed independently of the log.
    pub async fn flush(&self) {
        self.data.lock().await.clear();
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn set(&self, index: Index, value: CacheValue) -> Result<()> {
        self.data.lock().await.insert(index, value);
        Ok(())
    }

    async fn snapshot(&self) -> Result<BTreeMap<Index, CacheValue>> {
        Ok(self.data.lock().await.clone())
    }
}

/// Append-only log kept in a vector. Lost on restart.
#[derive(Default)]
pub struct MemoryLog {
    records: Mutex<Vec<SubmissionRecord>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableLog for MemoryLog {
    async fn append(&self, record: SubmissionRecord) -> Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<SubmissionRecord>> {
        Ok(self.records.lock().await.clone())
    }
}

/// Topic-keyed fan-out over Tokio broadcast channels.
///
/// A topic's channel is created by its first subscriber. Publishing to a
/// topic nobody has subscribed to, or whose subscribers have all gone away,
/// drops the payload.
#[derive(Default)]
pub struct MemoryBus {
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes without boxing, for callers that need the concrete type.
    pub async fn subscribe_topic(&self, topic: &str) -> MemorySubscription {
        let mut topics = self.topics.lock().await;
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        MemorySubscription {
            topic: topic.to_string(),
            receiver: sender.subscribe(),
        }
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<usize> {
        let topics = self.topics.lock().await;
        let receivers = match topics.get(topic) {
            // `send` only fails when there are no receivers left.
            Some(sender) => sender.send(payload).unwrap_or(0),
            None => 0,
        };
        Ok(receivers)
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(self.subscribe_topic(topic).await))
    }
}

pub struct MemorySubscription {
    topic: String,
    receiver: broadcast::Receiver<String>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "subscriber lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_overwrites_and_snapshots_in_index_order() {
        let cache = MemoryCache::new();
        cache.set(10, CacheValue::Pending).await.unwrap();
        cache.set(3, CacheValue::Computed(3)).await.unwrap();
        cache.set(10, CacheValue::Computed(89)).await.unwrap();

        let snapshot = cache.snapshot().await.unwrap();
        let entries: Vec<_> = snapshot.into_iter().collect();
        assert_eq!(
            entries,
            vec![(3, CacheValue::Computed(3)), (10, CacheValue::Computed(89))]
        );

        cache.flush().await;
        assert!(cache.get(10).await.is_none());
    }

    #[tokio::test]
    async fn log_keeps_duplicates_in_append_order() {
        let log = MemoryLog::new();
        for number in [5, 2, 5] {
            log.append(SubmissionRecord::new(number)).await.unwrap();
        }

        let numbers: Vec<_> = log
            .read_all()
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.number)
            .collect();
        assert_eq!(numbers, vec![5, 2, 5]);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let bus = MemoryBus::new();
        let receivers = bus.publish("insert", "7".into()).await.unwrap();
        assert_eq!(receivers, 0);

        // A late subscriber never sees the earlier payload.
        let mut late = bus.subscribe("insert").await.unwrap();
        bus.publish("insert", "8".into()).await.unwrap();
        assert_eq!(late.next().await.as_deref(), Some("8"));
    }

    #[tokio::test]
    async fn publish_fans_out_per_topic() {
        let bus = MemoryBus::new();
        let mut first = bus.subscribe("insert").await.unwrap();
        let mut second = bus.subscribe("insert").await.unwrap();
        let _other = bus.subscribe("other").await.unwrap();

        let receivers = bus.publish("insert", "10".into()).await.unwrap();
        assert_eq!(receivers, 2);
        assert_eq!(first.next().await.as_deref(), Some("10"));
        assert_eq!(second.next().await.as_deref(), Some("10"));
    }
}
