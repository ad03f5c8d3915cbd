//! Structured events emitted by the engine on every state change.
//!
//! Consumers read the event stream to build dashboards or audit logs.
//! Events are the engine's voice; tracing spans are the operator's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{BatchId, ItemId, State, TaskId};

/// A structured event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    BatchImported {
        batch_id: BatchId,
        campaign: String,
        tasks: u32,
        skipped: u32,
    },
    BatchEntrySkipped {
        batch_id: BatchId,
        index: usize,
        reason: String,
    },
    TaskCreated {
        id: TaskId,
        batch_id: BatchId,
        batch_number: u32,
        target_language: String,
    },
    StateTransition {
        id: TaskId,
        from: State,
        to: State,
        by: String,
    },
    TaskAssigned {
        id: TaskId,
        user: String,
    },
    AllocationDenied {
        user: String,
        campaign: String,
        reason: String,
    },
    AnnotationRecorded {
        task_id: TaskId,
        item_id: ItemId,
        user: String,
        score: u8,
    },
    SubmissionDiscarded {
        task_id: TaskId,
        item_id: ItemId,
        user: String,
    },
    UserTrusted {
        user: String,
        campaign: String,
        completed: u32,
    },
    AgendaTaskCompleted {
        user: String,
        campaign: String,
        task_id: TaskId,
    },
    /// Stored kind this build cannot decode; the raw JSON is kept.
    Unknown {
        raw: String,
    },
}
