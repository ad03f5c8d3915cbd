//! Precomputed agendas, consulted before the dynamic allocator.

use tracing::{debug, info};

use super::Engine;
use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::model::{AgendaEntry, AgendaStatus, State, Task, TaskKind, TaskRef};

impl Engine {
    /// Append tasks to the open agenda of (user, campaign). Tasks already on
    /// the agenda are left where they are. Returns the new entries.
    ///
    /// Every task must belong to `campaign`; otherwise nothing is added.
    pub fn assign_agenda(
        &mut self,
        user: &str,
        campaign: &str,
        tasks: &[TaskRef],
    ) -> Result<Vec<AgendaEntry>> {
        let entries = self.storage.with_transaction(|ctx| {
            let mut position = ctx.next_agenda_position(user, campaign)?;
            let mut added = Vec::new();
            for task in tasks {
                let loaded = resolve(*task, ctx.get_task(task.id)?)?;
                if loaded.campaign != campaign {
                    return Err(Error::Other(format!(
                        "task {} belongs to campaign {}, not {campaign}",
                        loaded.id, loaded.campaign
                    )));
                }
                let entry = AgendaEntry {
                    user: user.to_string(),
                    campaign: campaign.to_string(),
                    task: *task,
                    position,
                    status: AgendaStatus::Open,
                };
                if ctx.insert_agenda_entry(&entry)? {
                    position += 1;
                    added.push(entry);
                }
            }
            Ok(added)
        })?;

        info!(user, campaign, added = entries.len(), "agenda assigned");
        Ok(entries)
    }

    /// First open agenda task that still has work for `user`.
    ///
    /// Entries whose task is finished for the user, or closed for everyone,
    /// move to completed. Pending tasks stay open until activated.
    pub fn agenda_task(&mut self, user: &str, campaign: &str) -> Result<Option<Task>> {
        for entry in self.storage.open_agenda(user, campaign)? {
            let task = resolve(entry.task, self.storage.get_task(entry.task.id)?)?;

            match task.state() {
                State::Pending => continue,
                State::Active => {
                    if self.next_item(task.id, user)?.item.is_some() {
                        debug!(user, campaign, task_id = %task.id, "serving agenda task");
                        return Ok(Some(task));
                    }
                }
                State::Completed | State::Retired => {}
            }

            if self.storage.complete_agenda_entry(user, campaign, task.id)? {
                self.storage.record_event(EventKind::AgendaTaskCompleted {
                    user: user.to_string(),
                    campaign: campaign.to_string(),
                    task_id: task.id,
                })?;
                debug!(user, campaign, task_id = %task.id, "agenda entry completed");
            }
        }
        Ok(None)
    }
}

/// Check a loaded task against the kind its reference promises.
fn resolve(reference: TaskRef, task: Task) -> Result<Task> {
    match (reference.kind, task.kind) {
        (TaskKind::SourceBased, TaskKind::SourceBased)
        | (TaskKind::ReferenceBased, TaskKind::ReferenceBased) => Ok(task),
        (expected, found) => Err(Error::Other(format!(
            "agenda expects a {expected} task but {} is {found}",
            reference.id
        ))),
    }
}
