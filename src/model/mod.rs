//! Core data model.
//!
//! A task is a fixed bundle of 100 items, split into 10 blocks of 10, that
//! a number of annotators judge independently. Items are immutable once
//! imported; annotations record one annotator's score for one item.

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                // Short display: first 8 chars of UUID
                write!(f, "{}", &self.0.to_string()[..8])
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }
    };
}

pub(crate) use uuid_id;

pub mod agenda;
pub mod annotation;
pub mod batch;
pub mod item;
pub mod task;

pub use agenda::{AgendaEntry, AgendaStatus, TaskRef};
pub use annotation::{Annotation, Submission, SubmitOutcome};
pub use batch::{Batch, BatchId};
pub use item::{Item, ItemId, ItemType};
pub use task::{Stamp, State, Task, TaskId, TaskKind};

/// Items per task.
pub const ITEMS_PER_TASK: usize = 100;

/// Blocks per task.
pub const BLOCKS_PER_TASK: usize = 10;

/// Items per block: targets plus the three control items.
pub const ITEMS_PER_BLOCK: usize = ITEMS_PER_TASK / BLOCKS_PER_TASK;

/// Target items per block.
pub const TARGETS_PER_BLOCK: usize = 7;

/// Target items consumed by one batch.
pub const TARGETS_PER_BATCH: usize = TARGETS_PER_BLOCK * BLOCKS_PER_TASK;
