//! Compute worker.
//!
//! Subscribes to the compute topic and, for every event, evaluates the
//! recursive Fibonacci value and overwrites the cache entry for that index.
//!
//! Events are handled strictly one after another. The recursion runs on
//! Tokio's blocking pool so the runtime can keep reading the socket, but the
//! loop awaits each result before taking the next event: one worker never
//! runs two computations at once. Scale out by starting more workers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    fib::fib,
    model::{COMPUTE_TOPIC, CacheValue, Index, parse_index},
    retry::{RetryPolicy, retry},
    store::{EventBus, ResultCache, Subscription},
};

#[derive(Clone)]
pub struct ComputeWorker {
    cache: Arc<dyn ResultCache>,
    bus: Arc<dyn EventBus>,
}

impl ComputeWorker {
    pub fn new(cache: Arc<dyn ResultCache>, bus: Arc<dyn EventBus>) -> Self {
        Self { cache, bus }
    }

    /// Subscribes to the compute topic, retrying while the bus is unreachable.
    pub async fn subscribe(&self, policy: RetryPolicy) -> Result<Box<dyn Subscription>> {
        let subscription = retry(policy, "event bus", || self.bus.subscribe(COMPUTE_TOPIC)).await?;
        info!(topic = COMPUTE_TOPIC, "worker subscribed");
        Ok(subscription)
    }

    /// Handles events until the subscription closes.
    pub async fn run(&self, mut subscription: Box<dyn Subscription>) -> Result<()> {
        while let Some(payload) = subscription.next().await {
            self.handle_event(&payload).await?;
        }
        Ok(())
    }

    /// Runs for the life of the process, resubscribing whenever the stream
    /// drops. Events published while disconnected are gone. Returns an error
    /// once a resubscription exhausts `policy`.
    pub async fn run_forever(&self, policy: RetryPolicy) -> Result<()> {
        loop {
            let subscription = self.subscribe(policy).await?;
            self.run(subscription).await?;

            let pause = policy.delay_for(1);
            warn!(topic = COMPUTE_TOPIC, ?pause, "subscription closed; resubscribing");
            tokio::time::sleep(pause).await;
        }
    }

    /// Computes and stores the value for one event payload.
    ///
    /// Returns `None` for payloads that are not an index; those are skipped.
    pub async fn handle_event(&self, payload: &str) -> Result<Option<(Index, u64)>> {
        let index = match parse_index(payload) {
            Ok(index) => index,
            Err(err) => {
                warn!(%payload, error = %err, "skipping malformed compute event");
                return Ok(None);
            }
        };

        let value = tokio::task::spawn_blocking(move || fib(index))
            .await
            .context("fibonacci computation panicked")?;

        // Unconditional overwrite: whichever computation finishes last wins.
        if let Err(err) = self.cache.set(index, CacheValue::Computed(value)).await {
            warn!(index, error = %err, "failed to store computed value");
            return Ok(None);
        }

        info!(index, value, "computed");
        Ok(Some((index, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryBus, MemoryCache};

    #[tokio::test]
    async fn event_overwrites_placeholder_with_value() -> Result<()> {
        let cache = Arc::new(MemoryCache::new());
        let worker = ComputeWorker::new(cache.clone(), Arc::new(MemoryBus::new()));
        cache.set(10, CacheValue::Pending).await?;

        let outcome = worker.handle_event("10").await?;

        assert_eq!(outcome, Some((10, 89)));
        assert_eq!(cache.get(10).await, Some(CacheValue::Computed(89)));
        Ok(())
    }

    #[tokio::test]
    async fn write_is_unconditional() -> Result<()> {
        let cache = Arc::new(MemoryCache::new());
        let worker = ComputeWorker::new(cache.clone(), Arc::new(MemoryBus::new()));

        // No placeholder present at all; the worker writes anyway.
        worker.handle_event("5").await?;
        assert_eq!(cache.get(5).await, Some(CacheValue::Computed(8)));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_payload_is_skipped() -> Result<()> {
        let cache = Arc::new(MemoryCache::new());
        let worker = ComputeWorker::new(cache.clone(), Arc::new(MemoryBus::new()));

        assert_eq!(worker.handle_event("ten").await?, None);
        assert!(cache.snapshot().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn run_processes_events_in_arrival_order() -> Result<()> {
        let cache = Arc::new(MemoryCache::new());
        let bus = MemoryBus::new();
        let worker = ComputeWorker::new(cache.clone(), Arc::new(MemoryBus::new()));

        let subscription = bus.subscribe(COMPUTE_TOPIC).await?;
        for payload in ["3", "4", "3"] {
            bus.publish(COMPUTE_TOPIC, payload.to_string()).await?;
        }
        // Closing the bus ends the subscription once buffered events drain.
        drop(bus);
        worker.run(subscription).await?;

        let snapshot = cache.snapshot().await?;
        assert_eq!(snapshot.get(&3), Some(&CacheValue::Computed(3)));
        assert_eq!(snapshot.get(&4), Some(&CacheValue::Computed(5)));
        Ok(())
    }
}
