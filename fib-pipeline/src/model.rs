//! Records that flow between the pipeline components.
//!
//! Everything here crosses a process boundary at some point, so each type
//! has a fixed serialized form:
//!
//! - [`SubmissionRecord`] is one row of the durable log, `{"number": n}`.
//! - [`CacheValue`] is the value half of a result cache entry, either the
//!   literal `"pending"` or the decimal digits of a computed value.
//! - A compute event is just the index rendered as a string; see
//!   [`parse_index`].

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Position in the Fibonacci sequence requested by a client.
pub type Index = u32;

/// Sentinel stored in the cache while a computation is in flight.
pub const PLACEHOLDER: &str = "pending";

/// Topic the ingestion service publishes on and workers subscribe to.
pub const COMPUTE_TOPIC: &str = "insert";

/// Largest index accepted by default. Keeps the exponential recursion tractable.
pub const DEFAULT_MAX_INDEX: Index = 40;

/// Largest index whose value fits in a `u64`; `fib(93)` overflows.
pub const MAX_SAFE_INDEX: Index = 92;

/// One accepted submission, as appended to the durable log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub number: Index,
}

impl SubmissionRecord {
    pub fn new(number: Index) -> Self {
        Self { number }
    }
}

/// Value half of a result cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum CacheValue {
    Pending,
    Computed(u64),
}

impl CacheValue {
    pub fn is_pending(&self) -> bool {
        matches!(self, CacheValue::Pending)
    }
}

impl fmt::Display for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheValue::Pending => f.write_str(PLACEHOLDER),
            CacheValue::Computed(value) => write!(f, "{value}"),
        }
    }
}

impl FromStr for CacheValue {
    type Err = CacheValueError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw == PLACEHOLDER {
            return Ok(CacheValue::Pending);
        }
        raw.parse::<u64>()
            .map(CacheValue::Computed)
            .map_err(|_| CacheValueError(raw.to_string()))
    }
}

impl From<CacheValue> for String {
    fn from(value: CacheValue) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for CacheValue {
    type Error = CacheValueError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cache value '{0}' is neither a placeholder nor a number")]
pub struct CacheValueError(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("index must be a non-negative integer, got '{0}'")]
    NotAnIndex(String),
}

/// Parses an index from its string form (cache field names, bus payloads, form input).
pub fn parse_index(raw: &str) -> Result<Index, IndexError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IndexError::NotAnIndex(raw.to_string()));
    }
    trimmed
        .parse()
        .map_err(|_| IndexError::NotAnIndex(raw.to_string()))
}
