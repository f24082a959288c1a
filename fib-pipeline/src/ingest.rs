//! Ingestion service.
//!
//! Accepts an index, seeds the result cache with the placeholder, publishes
//! a compute event and appends the submission to the durable log. The log
//! append is detached from the caller: the service answers as soon as the
//! event is out, and a failed append is only ever logged.
//!
//! Nothing here repairs lost work. If no worker is subscribed when the
//! event goes out, the placeholder stays until someone submits again.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    model::{
        COMPUTE_TOPIC, CacheValue, DEFAULT_MAX_INDEX, Index, IndexError, MAX_SAFE_INDEX,
        SubmissionRecord, parse_index,
    },
    store::{DurableLog, EventBus, ResultCache},
};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Index is too high")]
    IndexTooHigh { index: u64, max: Index },
    #[error(transparent)]
    NotAnIndex(#[from] IndexError),
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl SubmitError {
    /// True for errors caused by the request itself rather than the pipeline.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SubmitError::IndexTooHigh { .. } | SubmitError::NotAnIndex(_)
        )
    }
}

/// An accepted submission.
#[derive(Debug)]
pub struct Accepted {
    pub index: Index,
    /// Workers connected when the event was published. Zero means the event
    /// was dropped and the placeholder will not be replaced.
    pub receivers: usize,
    /// Background log append. Dropping it detaches the task.
    pub log_append: JoinHandle<()>,
}

#[derive(Clone)]
pub struct IngestionService {
    cache: Arc<dyn ResultCache>,
    bus: Arc<dyn EventBus>,
    log: Arc<dyn DurableLog>,
    max_index: Index,
}

impl IngestionService {
    pub fn new(
        cache: Arc<dyn ResultCache>,
        bus: Arc<dyn EventBus>,
        log: Arc<dyn DurableLog>,
    ) -> Self {
        Self {
            cache,
            bus,
            log,
            max_index: DEFAULT_MAX_INDEX,
        }
    }

    /// Overrides the bound, capped at [`MAX_SAFE_INDEX`].
    pub fn with_max_index(mut self, max_index: Index) -> Self {
        if max_index > MAX_SAFE_INDEX {
            warn!(max_index, cap = MAX_SAFE_INDEX, "max index would overflow; capping");
        }
        self.max_index = max_index.min(MAX_SAFE_INDEX);
        self
    }

    pub fn max_index(&self) -> Index {
        self.max_index
    }

    /// Interprets a JSON `index` field: an integer, or a string of digits as
    /// sent by HTML forms.
    pub fn validate(&self, raw: &Value) -> Result<Index, SubmitError> {
        let index = match raw {
            Value::Number(number) => {
                let wide = number
                    .as_u64()
                    .ok_or_else(|| IndexError::NotAnIndex(number.to_string()))?;
                Index::try_from(wide).map_err(|_| SubmitError::IndexTooHigh {
                    index: wide,
                    max: self.max_index,
                })?
            }
            Value::String(text) => parse_index(text)?,
            other => return Err(IndexError::NotAnIndex(other.to_string()).into()),
        };
        self.check_bound(index)?;
        Ok(index)
    }

    fn check_bound(&self, index: Index) -> Result<(), SubmitError> {
        if index > self.max_index {
            return Err(SubmitError::IndexTooHigh {
                index: u64::from(index),
                max: self.max_index,
            });
        }
        Ok(())
    }

    /// Seeds the placeholder, publishes the compute event, then detaches the
    /// log append. Nothing is written when the index is out of bounds.
    pub async fn submit(&self, index: Index) -> Result<Accepted, SubmitError> {
        self.check_bound(index)?;

        self.cache.set(index, CacheValue::Pending).await?;

        let receivers = self.bus.publish(COMPUTE_TOPIC, index.to_string()).await?;
        if receivers == 0 {
            debug!(index, "no worker subscribed; compute event dropped");
        }

        let log = Arc::clone(&self.log);
        let log_append = tokio::spawn(async move {
            if let Err(err) = log.append(SubmissionRecord::new(index)).await {
                warn!(index, error = %err, "failed to append submission to log");
            }
        });

        info!(index, receivers, "submission accepted");
        Ok(Accepted {
            index,
            receivers,
            log_append,
        })
    }
}
