//! # appraise-rs
//!
//! Human evaluation of machine translation as annotation tasks.
//!
//! Builds quality-controlled task batches from parallel text, allocates
//! tasks to annotators under per-task capacity, tracks each annotator's
//! progress and completes tasks once their coverage threshold is met.
//! SQLite-backed, with tracing and OpenTelemetry observability.

pub mod agreement;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod import;
pub mod model;
pub mod storage;
pub mod telemetry;
