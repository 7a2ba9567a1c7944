//! Event-driven metrics aggregation agent.
//!
//! Producers publish named events onto an in-process bus. The reporter
//! folds matching measurements into an in-memory cache keyed by metric and
//! dimension set, and drains bounded batches to a publisher on a flush
//! schedule driven by time and batch-size ceilings.

pub mod app;
pub mod bus;
pub mod config;
pub mod ingest;
pub mod publish;
pub mod reporter;
