//! Precomputed per-(user, campaign) task agendas.

use serde::{Deserialize, Serialize};

use super::{TaskId, TaskKind};

/// A typed reference to a task. Resolved through an exhaustive match on
/// `kind`, never by interpreting stored strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef {
    pub kind: TaskKind,
    pub id: TaskId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgendaStatus {
    Open,
    Completed,
}

impl std::fmt::Display for AgendaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgendaStatus::Open => "open",
            AgendaStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AgendaStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(AgendaStatus::Open),
            "completed" => Ok(AgendaStatus::Completed),
            _ => Err(crate::error::Error::Other(format!(
                "unknown agenda status: {s}"
            ))),
        }
    }
}

/// One task on a user's agenda.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgendaEntry {
    pub user: String,
    pub campaign: String,
    pub task: TaskRef,
    pub position: u32,
    pub status: AgendaStatus,
}
