//! Core engine. The public API for building up, allocating and tracking
//! annotation tasks.
//!
//! The engine owns the storage and the campaign policies. All task state
//! transitions go through here. Each request gets its own engine (one
//! connection); engines on the same database file coordinate through
//! SQLite transactions only.

mod agenda;
mod allocator;
mod import;
mod progress;
mod submit;

pub use import::{ImportReport, SkippedEntry};
pub use progress::Progress;

use std::path::Path;

use tracing::info;

use crate::config::{CampaignConfig, CampaignRegistry};
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::model::*;
use crate::storage::Storage;
use crate::telemetry::task::{record_state_transition, start_task_span};

/// The task engine. Owns all state and enforces all invariants.
pub struct Engine {
    storage: Storage,
    campaigns: CampaignRegistry,
}

impl Engine {
    /// Create an engine with in-memory storage (for testing).
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            storage: Storage::in_memory()?,
            campaigns: CampaignRegistry::empty(),
        })
    }

    /// Create an engine backed by a file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            storage: Storage::open(path)?,
            campaigns: CampaignRegistry::empty(),
        })
    }

    /// Replace the campaign policies.
    pub fn with_campaigns(mut self, campaigns: CampaignRegistry) -> Self {
        self.campaigns = campaigns;
        self
    }

    /// Policy in force for a campaign.
    pub fn campaign(&self, name: &str) -> CampaignConfig {
        self.campaigns.get(name)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Release a batch for activation. An invalid batch stays unactivatable.
    pub fn mark_batch_ready(&mut self, batch_id: BatchId) -> Result<()> {
        self.storage
            .with_transaction(|ctx| ctx.set_batch_ready(batch_id, true))?;
        info!(batch_id = %batch_id, "batch marked ready");
        Ok(())
    }

    /// Pending → Active. The owning batch must be valid and ready.
    pub fn activate_task(&mut self, task_id: TaskId, by: &str) -> Result<Task> {
        let task = self.storage.with_transaction(|ctx| {
            let task = ctx.get_task(task_id)?;
            let from = task.state();
            if !from.can_transition_to(State::Active) {
                return Err(Error::InvalidTransition {
                    from,
                    to: State::Active,
                });
            }
            let batch = ctx.get_batch(task.batch_id)?;
            if !batch.can_activate() {
                return Err(Error::BatchNotReady(batch.id));
            }
            if !ctx.set_activated(task_id, by)? {
                return Err(Error::InvalidTransition {
                    from: ctx.get_task(task_id)?.state(),
                    to: State::Active,
                });
            }
            ctx.record_event(EventKind::StateTransition {
                id: task_id,
                from,
                to: State::Active,
                by: by.to_string(),
            })?;
            ctx.get_task(task_id)
        })?;

        let span = start_task_span(&task.campaign, task.id);
        record_state_transition(&span, State::Pending, State::Active);
        Ok(task)
    }

    /// Activate every pending task of a batch. Returns the tasks that moved.
    pub fn activate_batch(&mut self, batch_id: BatchId, by: &str) -> Result<Vec<TaskId>> {
        let activated = self.storage.with_transaction(|ctx| {
            let batch = ctx.get_batch(batch_id)?;
            if !batch.can_activate() {
                return Err(Error::BatchNotReady(batch_id));
            }

            let mut activated = Vec::new();
            for task in ctx.tasks_in_batch(batch_id)? {
                if task.state() != State::Pending {
                    continue;
                }
                if ctx.set_activated(task.id, by)? {
                    ctx.record_event(EventKind::StateTransition {
                        id: task.id,
                        from: State::Pending,
                        to: State::Active,
                        by: by.to_string(),
                    })?;
                    activated.push(task.id);
                }
            }
            Ok(activated)
        })?;

        info!(batch_id = %batch_id, tasks = activated.len(), by, "batch activated");
        Ok(activated)
    }

    /// Pending|Active → Retired.
    pub fn retire_task(&mut self, task_id: TaskId, by: &str) -> Result<Task> {
        let (from, task) = self.storage.with_transaction(|ctx| {
            let from = ctx.get_task(task_id)?.state();
            if !from.can_transition_to(State::Retired) || !ctx.set_retired(task_id, by)? {
                return Err(Error::InvalidTransition {
                    from,
                    to: State::Retired,
                });
            }
            ctx.record_event(EventKind::StateTransition {
                id: task_id,
                from,
                to: State::Retired,
                by: by.to_string(),
            })?;
            Ok((from, ctx.get_task(task_id)?))
        })?;

        let span = start_task_span(&task.campaign, task.id);
        record_state_transition(&span, from, State::Retired);
        Ok(task)
    }

    /// Active → Completed. A task completed by a concurrent evaluator is a
    /// no-op; returns whether this call made the transition.
    pub(crate) fn complete_task(&mut self, task: &Task, by: &str) -> Result<bool> {
        let completed = self.storage.with_transaction(|ctx| {
            if !ctx.set_completed(task.id, by)? {
                return Ok(false);
            }
            ctx.record_event(EventKind::StateTransition {
                id: task.id,
                from: State::Active,
                to: State::Completed,
                by: by.to_string(),
            })?;
            Ok(true)
        })?;

        if completed {
            let span = start_task_span(&task.campaign, task.id);
            record_state_transition(&span, State::Active, State::Completed);
        }
        Ok(completed)
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    /// Add a user to a group, e.g. a campaign's low-trust group.
    pub fn add_user_to_group(&mut self, user: &str, group: &str) -> Result<()> {
        self.storage.add_to_group(user, group)?;
        info!(user, group, "user added to group");
        Ok(())
    }

    /// Trusted for the campaign and not in its low-trust group.
    pub fn is_trusted(&self, user: &str, campaign: &str) -> Result<bool> {
        let config = self.campaigns.get(campaign);
        Ok(self.storage.is_trusted(user, campaign)?
            && !self.storage.in_group(user, &config.low_trust_group)?)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_batch(&self, id: BatchId) -> Result<Batch> {
        self.storage.get_batch(id)
    }

    pub fn get_task(&self, id: TaskId) -> Result<Task> {
        self.storage.get_task(id)
    }

    /// Tasks in creation order, optionally for one campaign.
    pub fn list_tasks(&self, campaign: Option<&str>) -> Result<Vec<Task>> {
        self.storage.list_tasks(campaign)
    }

    /// Items of a task in stored order.
    pub fn task_items(&self, id: TaskId) -> Result<Vec<Item>> {
        self.storage.task_items(id)
    }

    pub fn assignees(&self, id: TaskId) -> Result<Vec<String>> {
        self.storage.assignees(id)
    }

    pub fn annotations(&self, id: TaskId) -> Result<Vec<Annotation>> {
        self.storage.annotations(id)
    }

    /// Distinct items of a task with a completed annotation from anyone.
    pub fn annotated_items(&self, id: TaskId) -> Result<u32> {
        self.storage.distinct_annotated_items(id)
    }

    /// Get events since a sequence number.
    pub fn get_events_since(&self, since_seq: u64) -> Result<Vec<Event>> {
        self.storage.get_events_since(since_seq)
    }
}
