//! Metric instrument factories for appraise-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"appraise-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for appraise-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("appraise-rs")
}

/// Counter: annotators added to a task's assignee set.
/// Labels: `campaign`, `path` ("claim" | "direct").
pub fn tasks_assigned() -> Counter<u64> {
    meter()
        .u64_counter("appraise.tasks.assigned")
        .with_description("Number of annotators added to task assignee sets")
        .build()
}

/// Counter: allocation requests that yielded no task.
/// Labels: `campaign`, `reason` ("exhausted" | "capped").
pub fn allocation_denied() -> Counter<u64> {
    meter()
        .u64_counter("appraise.allocation.denied")
        .with_description("Allocation requests that yielded no task")
        .build()
}

/// Counter: submissions by outcome.
/// Labels: `campaign`, `outcome` ("recorded" | "discarded" | "duplicate").
pub fn results_recorded() -> Counter<u64> {
    meter()
        .u64_counter("appraise.results.recorded")
        .with_description("Number of submissions by outcome")
        .build()
}

/// Counter: task state transitions.
/// Labels: `from`, `to`.
pub fn task_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("appraise.task.state_transitions")
        .with_description("Number of task state transitions")
        .build()
}

/// Counter: batch descriptor entries seen during import.
/// Labels: `campaign`, `outcome` ("imported" | "skipped").
pub fn batch_entries_imported() -> Counter<u64> {
    meter()
        .u64_counter("appraise.batch.entries")
        .with_description("Batch descriptor entries seen during import")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("appraise.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
