//! Task span helpers.
//!
//! Provides span creation and state-transition recording for tasks
//! moving through the engine.

use tracing::Span;

use crate::model::{State, TaskId};

/// Start a span for work on one task.
///
/// The `task.state` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_task_span(campaign: &str, task_id: TaskId) -> Span {
    tracing::info_span!(
        "task",
        "task.campaign" = campaign,
        "task.id" = %task_id,
        "task.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the span and the transition counter.
pub fn record_state_transition(span: &Span, from: State, to: State) {
    span.record("task.state", tracing::field::display(to));
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "state_transition");
    });
    super::metrics::task_state_transitions().add(
        1,
        &[
            opentelemetry::KeyValue::new("from", from.to_string()),
            opentelemetry::KeyValue::new("to", to.to_string()),
        ],
    );
}
