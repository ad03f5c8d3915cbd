//! Task allocation: matching annotators to tasks that still need them.

use opentelemetry::KeyValue;
use tracing::{debug, info};

use super::Engine;
use crate::config::CampaignConfig;
use crate::error::Result;
use crate::event::EventKind;
use crate::model::{Task, TaskId};
use crate::telemetry::metrics;

/// Outcome of a claim attempt inside the allocation transaction.
enum Claim {
    Assigned(Task),
    Exhausted,
    Capped,
}

/// Low-trust users stop receiving work after fully annotating
/// `max_completed_tasks_for_low_trust` tasks in the campaign.
fn cap_reached(
    config: &CampaignConfig,
    in_low_trust_group: bool,
    fully_annotated: impl FnOnce() -> Result<u32>,
) -> Result<bool> {
    if !in_low_trust_group {
        return Ok(false);
    }
    Ok(fully_annotated()? >= config.max_completed_tasks_for_low_trust)
}

impl Engine {
    /// The newest active task assigned to `user` that still has an item
    /// for them.
    pub fn assigned_task(&mut self, user: &str) -> Result<Option<Task>> {
        self.assigned_task_in(user, None)
    }

    pub(super) fn assigned_task_in(
        &mut self,
        user: &str,
        campaign: Option<&str>,
    ) -> Result<Option<Task>> {
        for task in self.storage.active_tasks_assigned_to(user)? {
            if campaign.is_some_and(|c| c != task.campaign) {
                continue;
            }
            if self.next_item(task.id, user)?.item.is_some() {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// First active task for the language and campaign with a free slot
    /// that `user` is not already on, oldest first. Does not assign.
    pub fn next_free_task(
        &self,
        language: &str,
        campaign: &str,
        user: &str,
    ) -> Result<Option<Task>> {
        let config = self.campaigns.get(campaign);
        let low_trust = self.storage.in_group(user, &config.low_trust_group)?;
        if cap_reached(&config, low_trust, || {
            self.storage.fully_annotated_tasks(user, campaign)
        })? {
            info!(user, campaign, "allocation denied: low-trust task cap reached");
            return Ok(None);
        }

        for task in self.storage.candidate_tasks(language, campaign)? {
            let assignees = self.storage.assignees(task.id)?;
            if (assignees.len() as u32) < task.required_annotations
                && !assignees.iter().any(|a| a == user)
            {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// Add `user` to the task's assignees if a slot is free.
    ///
    /// Check and insert are one guarded statement in an immediate
    /// transaction, so concurrent callers can never push the assignee set
    /// past `required_annotations`.
    pub fn assign_task(&mut self, task_id: TaskId, user: &str) -> Result<bool> {
        let assigned = self.storage.with_transaction(|ctx| {
            if !ctx.try_assign(task_id, user)? {
                return Ok(false);
            }
            ctx.record_event(EventKind::TaskAssigned {
                id: task_id,
                user: user.to_string(),
            })?;
            Ok(true)
        })?;

        if assigned {
            let task = self.storage.get_task(task_id)?;
            info!(task_id = %task_id, user, campaign = %task.campaign, "task assigned");
            metrics::tasks_assigned().add(
                1,
                &[
                    KeyValue::new("campaign", task.campaign),
                    KeyValue::new("path", "direct"),
                ],
            );
        }
        Ok(assigned)
    }

    /// Find and assign a free task in one transaction.
    ///
    /// Exhaustion and the low-trust cap both yield `None`; only logs and
    /// metrics tell them apart.
    pub fn claim_next_free_task(
        &mut self,
        language: &str,
        campaign: &str,
        user: &str,
    ) -> Result<Option<Task>> {
        let config = self.campaigns.get(campaign);

        let claim = self.storage.with_transaction(|ctx| {
            let low_trust = ctx.in_group(user, &config.low_trust_group)?;
            let claim = if cap_reached(&config, low_trust, || {
                ctx.fully_annotated_tasks(user, campaign)
            })? {
                Claim::Capped
            } else {
                let mut claim = Claim::Exhausted;
                for task in ctx.candidate_tasks(language, campaign)? {
                    if ctx.try_assign(task.id, user)? {
                        claim = Claim::Assigned(task);
                        break;
                    }
                }
                claim
            };

            match &claim {
                Claim::Assigned(task) => ctx.record_event(EventKind::TaskAssigned {
                    id: task.id,
                    user: user.to_string(),
                })?,
                Claim::Exhausted | Claim::Capped => ctx.record_event(EventKind::AllocationDenied {
                    user: user.to_string(),
                    campaign: campaign.to_string(),
                    reason: denial_reason(&claim).to_string(),
                })?,
            };
            Ok(claim)
        })?;

        match claim {
            Claim::Assigned(task) => {
                info!(task_id = %task.id, user, campaign, "task claimed");
                metrics::tasks_assigned().add(
                    1,
                    &[
                        KeyValue::new("campaign", campaign.to_string()),
                        KeyValue::new("path", "claim"),
                    ],
                );
                Ok(Some(task))
            }
            denied => {
                let reason = denial_reason(&denied);
                match denied {
                    Claim::Capped => {
                        info!(user, campaign, "allocation denied: low-trust task cap reached")
                    }
                    _ => debug!(user, campaign, language, "no free task"),
                }
                metrics::allocation_denied().add(
                    1,
                    &[
                        KeyValue::new("campaign", campaign.to_string()),
                        KeyValue::new("reason", reason),
                    ],
                );
                Ok(None)
            }
        }
    }

    /// The task `user` should work on next in `campaign`: agenda first,
    /// then an unfinished assigned task, then a freshly claimed one.
    pub fn task_for_user(
        &mut self,
        user: &str,
        campaign: &str,
        language: &str,
    ) -> Result<Option<Task>> {
        if let Some(task) = self.agenda_task(user, campaign)? {
            return Ok(Some(task));
        }
        if let Some(task) = self.assigned_task_in(user, Some(campaign))? {
            return Ok(Some(task));
        }
        self.claim_next_free_task(language, campaign, user)
    }
}

fn denial_reason(claim: &Claim) -> &'static str {
    match claim {
        Claim::Capped => "capped",
        Claim::Exhausted | Claim::Assigned(_) => "exhausted",
    }
}
