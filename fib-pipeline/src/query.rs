use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;

use crate::{
    model::{CacheValue, Index, SubmissionRecord},
    store::{DurableLog, ResultCache},
};

/// Read-only view over the cache and the log. No pagination; both reads
/// return everything.
#[derive(Clone)]
pub struct QueryService {
    cache: Arc<dyn ResultCache>,
    log: Arc<dyn DurableLog>,
}

impl QueryService {
    pub fn new(cache: Arc<dyn ResultCache>, log: Arc<dyn DurableLog>) -> Self {
        Self { cache, log }
    }

    /// Current cache contents, placeholders included, in ascending index order.
    pub async fn current_values(&self) -> Result<BTreeMap<Index, CacheValue>> {
        self.cache.snapshot().await
    }

    /// Every submission in append order, duplicates included.
    pub async fn all_submitted(&self) -> Result<Vec<SubmissionRecord>> {
        self.log.read_all().await
    }
}
