//! Annotations: one annotator's judgment on one item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemId, TaskId};

/// Highest score an annotator can give.
pub const MAX_SCORE: u8 = 100;

/// A stored judgment. At most one completed annotation exists per
/// (item, creator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub task_id: TaskId,
    pub item_id: ItemId,
    pub created_by: String,
    pub score: u8,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

/// A score submitted from the request layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub task_id: TaskId,
    pub item_id: ItemId,
    pub score: u8,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// What happened to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Stored as a completed annotation.
    Recorded,
    /// Not the item the tracker expects; the current item is unchanged.
    Discarded,
    /// An annotation for this (item, user) already existed.
    Duplicate,
}

impl Submission {
    pub(crate) fn validate(&self) -> crate::error::Result<()> {
        if self.score > MAX_SCORE {
            return Err(crate::error::Error::Validation(format!(
                "score {} is outside 0..={MAX_SCORE}",
                self.score
            )));
        }
        if self.end_time < self.start_time {
            return Err(crate::error::Error::Validation(
                "end timestamp precedes start timestamp".to_string(),
            ));
        }
        Ok(())
    }
}
