//! Distributed Fibonacci pipeline.
//!
//! A client submits an index over HTTP; the api seeds a `"pending"`
//! placeholder in the result cache, publishes a compute event and appends the
//! index to the durable log. A worker subscribed to the event computes the
//! value and overwrites the placeholder. Clients poll for results.
//!
//! The pieces run as separate processes of the same binary (see [`cli`]):
//!
//! - [`store`] defines the collaborator traits (result cache, durable log,
//!   event bus) and hosts them behind a JSON-lines TCP protocol ([`protocol`]).
//! - [`ingest`] validates and accepts submissions.
//! - [`worker`] consumes compute events and evaluates [`fib`].
//! - [`query`] reads the cache and the log back.
//! - [`api`] exposes ingestion and queries over HTTP.
//! - [`client`] is a command-line consumer of that HTTP surface.
//! - [`retry`] blocks startup until the store is reachable.
//!
//! Delivery is at-most-once. An event published while no worker is
//! subscribed is dropped and its placeholder stays `"pending"`; nothing
//! retries it.

pub mod api;
pub mod cli;
pub mod client;
pub mod fib;
pub mod ingest;
pub mod model;
pub mod protocol;
pub mod query;
pub mod retry;
pub mod store;
pub mod worker;
