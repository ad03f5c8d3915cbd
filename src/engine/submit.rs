//! Recording annotators' scores.

use std::time::Instant;

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{debug, info};

use super::Engine;
use crate::error::Result;
use crate::event::EventKind;
use crate::model::{Annotation, State, Submission, SubmitOutcome, Task};
use crate::telemetry::metrics;
use crate::telemetry::task::start_task_span;

impl Engine {
    /// Record `user`'s score for the item the tracker currently expects.
    ///
    /// A submission for any other item, for a task the user is not working
    /// on, or for a task that is no longer active is discarded and leaves
    /// progress untouched. Recording may make the user trusted and may
    /// complete the task.
    pub fn submit(&mut self, user: &str, submission: Submission) -> Result<SubmitOutcome> {
        submission.validate()?;
        let started = Instant::now();

        let task = self.storage.get_task(submission.task_id)?;
        let span = start_task_span(&task.campaign, task.id);
        let _entered = span.enter();

        let outcome = if self.expects(&task, user, &submission)? {
            self.record(&task, user, &submission)?
        } else {
            debug!(
                task_id = %submission.task_id,
                item_id = %submission.item_id,
                user,
                "submission discarded"
            );
            self.storage.record_event(EventKind::SubmissionDiscarded {
                task_id: submission.task_id,
                item_id: submission.item_id,
                user: user.to_string(),
            })?;
            SubmitOutcome::Discarded
        };

        if outcome == SubmitOutcome::Recorded {
            // Completion is evaluated lazily, here and on every progress check.
            self.next_item(task.id, user)?;
        }

        metrics::results_recorded().add(
            1,
            &[
                KeyValue::new("campaign", task.campaign.clone()),
                KeyValue::new("outcome", outcome_label(outcome)),
            ],
        );
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "submit")],
        );
        Ok(outcome)
    }

    /// Whether the submission targets the user's current item.
    fn expects(&mut self, task: &Task, user: &str, submission: &Submission) -> Result<bool> {
        if task.state() != State::Active {
            return Ok(false);
        }

        let working_on = self.storage.assignees(task.id)?.iter().any(|a| a == user)
            || self
                .storage
                .open_agenda(user, &task.campaign)?
                .iter()
                .any(|entry| entry.task.id == task.id);
        if !working_on {
            return Ok(false);
        }

        let progress = self.next_item(task.id, user)?;
        Ok(progress
            .item
            .is_some_and(|item| item.id == submission.item_id))
    }

    fn record(&mut self, task: &Task, user: &str, submission: &Submission) -> Result<SubmitOutcome> {
        let config = self.campaigns.get(&task.campaign);
        let annotation = Annotation {
            task_id: submission.task_id,
            item_id: submission.item_id,
            created_by: user.to_string(),
            score: submission.score,
            start_time: submission.start_time,
            end_time: submission.end_time,
            completed: true,
            created_at: Utc::now(),
        };

        let (outcome, trusted_at) = self.storage.with_transaction(|ctx| {
            if !ctx.insert_annotation(&annotation)? {
                return Ok((SubmitOutcome::Duplicate, None));
            }
            ctx.record_event(EventKind::AnnotationRecorded {
                task_id: annotation.task_id,
                item_id: annotation.item_id,
                user: user.to_string(),
                score: annotation.score,
            })?;

            let mut trusted_at = None;
            if !ctx.in_group(user, &config.low_trust_group)? {
                let completed = ctx.completed_count_in_campaign(user, &task.campaign)?;
                if completed >= config.trust_threshold && ctx.grant_trust(user, &task.campaign)? {
                    ctx.record_event(EventKind::UserTrusted {
                        user: user.to_string(),
                        campaign: task.campaign.clone(),
                        completed,
                    })?;
                    trusted_at = Some(completed);
                }
            }
            Ok((SubmitOutcome::Recorded, trusted_at))
        })?;

        match outcome {
            SubmitOutcome::Recorded => debug!(
                task_id = %annotation.task_id,
                item_id = %annotation.item_id,
                user,
                score = annotation.score,
                "annotation recorded"
            ),
            _ => debug!(item_id = %annotation.item_id, user, "duplicate annotation ignored"),
        }
        if let Some(completed) = trusted_at {
            info!(user, campaign = %task.campaign, completed, "user is now trusted");
        }
        Ok(outcome)
    }
}

fn outcome_label(outcome: SubmitOutcome) -> &'static str {
    match outcome {
        SubmitOutcome::Recorded => "recorded",
        SubmitOutcome::Discarded => "discarded",
        SubmitOutcome::Duplicate => "duplicate",
    }
}
