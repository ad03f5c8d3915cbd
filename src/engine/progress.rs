//! Per-(user, task) progress and lazy completion.

use tracing::debug;

use super::Engine;
use crate::error::Result;
use crate::model::{ITEMS_PER_BLOCK, Item, ItemType, State, TaskId};

/// Where a user stands within one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Next item to present, or `None` when the user has nothing left.
    pub item: Option<Item>,
    /// Items scanned before `item`, whether done or skipped.
    pub completed_items: u32,
}

impl Progress {
    /// Position within the current block, for "N of 10" displays.
    pub fn completed_in_block(&self) -> u32 {
        self.completed_items % ITEMS_PER_BLOCK as u32
    }

    pub fn is_finished(&self) -> bool {
        self.item.is_none()
    }
}

impl Engine {
    /// Resolve the next item `user` should annotate in `task_id`.
    ///
    /// Trusted users are fast-forwarded past control items. When the user
    /// has nothing left, the task's aggregate coverage is checked and an
    /// active task that reached its threshold is completed.
    pub fn next_item(&mut self, task_id: TaskId, user: &str) -> Result<Progress> {
        let task = self.storage.get_task(task_id)?;
        let trusted = self.is_trusted(user, &task.campaign)?;
        let done = self.storage.completed_items_by(task_id, user)?;

        let mut completed_items = 0;
        for item in self.storage.task_items(task_id)? {
            let eligible = !trusted || item.item_type == ItemType::Target;
            if eligible && !done.contains(&item.id) {
                return Ok(Progress {
                    item: Some(item),
                    completed_items,
                });
            }
            completed_items += 1;
        }

        if task.state() == State::Active {
            let annotated = self.storage.distinct_annotated_items(task_id)?;
            let threshold = self
                .campaigns
                .get(&task.campaign)
                .completion_threshold(task.required_annotations, trusted);
            debug!(task_id = %task_id, user, annotated, threshold, "coverage check");
            if annotated >= threshold {
                self.complete_task(&task, user)?;
            }
        }

        Ok(Progress {
            item: None,
            completed_items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_position_wraps_every_ten_items() {
        let progress = Progress {
            item: None,
            completed_items: 37,
        };
        assert_eq!(progress.completed_in_block(), 7);
        assert!(progress.is_finished());
    }
}
