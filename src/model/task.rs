//! Tasks and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BatchId, uuid_id};

uuid_id!(
    /// Newtype for task IDs.
    TaskId
);

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
///
/// Persisted as three stamped booleans; see [`Task::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Imported, not yet visible to allocation.
    Pending,
    /// Visible; the allocator may assign it.
    Active,
    /// Enough coverage collected. Terminal.
    Completed,
    /// Administratively withdrawn. Terminal.
    Retired,
}

impl State {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        matches!(
            (self, to),
            (Pending, Active) | (Active, Completed) | (Pending, Retired) | (Active, Retired)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Retired)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Pending => "pending",
            State::Active => "active",
            State::Completed => "completed",
            State::Retired => "retired",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for State {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(State::Pending),
            "active" => Ok(State::Active),
            "completed" => Ok(State::Completed),
            "retired" => Ok(State::Retired),
            _ => Err(crate::error::Error::Other(format!("unknown state: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// What annotators compare a candidate translation against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Bilingual: candidates are judged against the source text.
    #[default]
    SourceBased,
    /// Monolingual: candidates are judged against a human reference.
    ReferenceBased,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::SourceBased => "source_based",
            TaskKind::ReferenceBased => "reference_based",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source_based" => Ok(TaskKind::SourceBased),
            "reference_based" => Ok(TaskKind::ReferenceBased),
            _ => Err(crate::error::Error::Other(format!("unknown task kind: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A lifecycle flag with the actor and time that last set it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub set: bool,
    pub by: Option<String>,
    pub at: Option<DateTime<Utc>>,
}

/// A fixed, ordered bundle of items requiring independent judgments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub batch_id: BatchId,
    /// Position of this task's entry in the builder output.
    pub batch_number: u32,
    pub kind: TaskKind,
    pub campaign: String,
    pub source_language: String,
    pub target_language: String,
    /// Desired number of concurrent annotators.
    pub required_annotations: u32,
    pub random_seed: u64,

    pub activated: Stamp,
    pub completed: Stamp,
    pub retired: Stamp,

    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Derive the lifecycle state from the persisted flags.
    ///
    /// Retirement wins over completion, which wins over activation.
    pub fn state(&self) -> State {
        if self.retired.set {
            State::Retired
        } else if self.completed.set {
            State::Completed
        } else if self.activated.set {
            State::Active
        } else {
            State::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task {
            id: TaskId::new(),
            batch_id: BatchId::new(),
            batch_number: 0,
            kind: TaskKind::SourceBased,
            campaign: "wmt".to_string(),
            source_language: "eng".to_string(),
            target_language: "deu".to_string(),
            required_annotations: 1,
            random_seed: 7,
            activated: Stamp::default(),
            completed: Stamp::default(),
            retired: Stamp::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for to in [State::Pending, State::Active, State::Completed, State::Retired] {
            assert!(!State::Completed.can_transition_to(to));
            assert!(!State::Retired.can_transition_to(to));
        }
    }

    #[test]
    fn pending_cannot_complete_directly() {
        assert!(!State::Pending.can_transition_to(State::Completed));
        assert!(State::Pending.can_transition_to(State::Retired));
        assert!(State::Active.can_transition_to(State::Retired));
    }

    #[test]
    fn state_is_derived_from_flags() {
        let mut t = task();
        assert_eq!(t.state(), State::Pending);
        t.activated.set = true;
        assert_eq!(t.state(), State::Active);
        t.activated.set = false;
        t.completed.set = true;
        assert_eq!(t.state(), State::Completed);
        t.retired.set = true;
        assert_eq!(t.state(), State::Retired);
    }

    #[test]
    fn kind_round_trips_through_display() {
        for kind in [TaskKind::SourceBased, TaskKind::ReferenceBased] {
            assert_eq!(kind.to_string().parse::<TaskKind>().unwrap(), kind);
        }
    }
}
