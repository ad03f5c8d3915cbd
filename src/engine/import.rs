//! Importing batch descriptors as pending tasks.

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{info, warn};

use super::Engine;
use crate::batch::BatchDescriptor;
use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::model::*;
use crate::telemetry::metrics;

/// A batch entry that did not become a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Position of the entry in the imported sequence.
    pub index: usize,
    pub reason: String,
}

/// Result of one import.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub batch_id: BatchId,
    pub imported: Vec<TaskId>,
    pub skipped: Vec<SkippedEntry>,
}

impl ImportReport {
    /// A batch is valid once at least one of its entries became a task.
    pub fn is_valid(&self) -> bool {
        !self.imported.is_empty()
    }
}

impl Engine {
    /// Create a batch named `name` in `campaign` and one pending task per
    /// well-formed entry.
    ///
    /// Each task is written with its 100 items in its own transaction, so a
    /// rejected entry never leaves a partial task behind. Rejected entries
    /// are logged and reported; they do not fail the import.
    pub fn import_batches(
        &mut self,
        campaign: &str,
        name: &str,
        entries: Vec<serde_json::Value>,
    ) -> Result<ImportReport> {
        let config = self.campaigns.get(campaign);
        let batch = Batch {
            id: BatchId::new(),
            name: name.to_string(),
            campaign: campaign.to_string(),
            valid: false,
            ready: false,
            created_at: Utc::now(),
        };
        self.storage.with_transaction(|ctx| ctx.insert_batch(&batch))?;

        let mut report = ImportReport {
            batch_id: batch.id,
            imported: Vec::new(),
            skipped: Vec::new(),
        };

        for (index, entry) in entries.into_iter().enumerate() {
            let parsed = match parse_entry(entry, config.required_annotations) {
                Ok(parsed) => parsed,
                Err(e) => {
                    let reason = e.to_string();
                    warn!(batch = name, index, reason = %reason, "skipping batch entry");
                    self.storage.record_event(EventKind::BatchEntrySkipped {
                        batch_id: batch.id,
                        index,
                        reason: reason.clone(),
                    })?;
                    report.skipped.push(SkippedEntry { index, reason });
                    continue;
                }
            };

            let (task, items) = parsed.into_records(&batch);
            self.storage.with_transaction(|ctx| {
                ctx.insert_task(&task)?;
                for item in &items {
                    ctx.insert_item(item)?;
                }
                ctx.record_event(EventKind::TaskCreated {
                    id: task.id,
                    batch_id: batch.id,
                    batch_number: task.batch_number,
                    target_language: task.target_language.clone(),
                })?;
                Ok(())
            })?;
            report.imported.push(task.id);
        }

        let imported = report.imported.len() as u32;
        let skipped = report.skipped.len() as u32;
        self.storage.with_transaction(|ctx| {
            if imported > 0 {
                ctx.set_batch_valid(batch.id, true)?;
            }
            ctx.record_event(EventKind::BatchImported {
                batch_id: batch.id,
                campaign: campaign.to_string(),
                tasks: imported,
                skipped,
            })?;
            Ok(())
        })?;

        let counter = metrics::batch_entries_imported();
        counter.add(
            u64::from(imported),
            &[
                KeyValue::new("campaign", campaign.to_string()),
                KeyValue::new("outcome", "imported"),
            ],
        );
        counter.add(
            u64::from(skipped),
            &[
                KeyValue::new("campaign", campaign.to_string()),
                KeyValue::new("outcome", "skipped"),
            ],
        );

        info!(
            batch_id = %batch.id,
            batch = name,
            campaign,
            imported,
            skipped,
            valid = report.is_valid(),
            "batch imported"
        );
        Ok(report)
    }
}

/// A validated entry with its effective annotation requirement.
struct ParsedEntry {
    descriptor: BatchDescriptor,
    required_annotations: u32,
}

fn parse_entry(entry: serde_json::Value, default_required: u32) -> Result<ParsedEntry> {
    let descriptor: BatchDescriptor = serde_json::from_value(entry)?;
    descriptor.validate()?;

    let required_annotations = descriptor
        .task
        .required_annotations
        .unwrap_or(default_required);
    if required_annotations == 0 {
        return Err(Error::Batch(
            "requiredAnnotations must be at least 1".to_string(),
        ));
    }

    Ok(ParsedEntry {
        descriptor,
        required_annotations,
    })
}

impl ParsedEntry {
    fn into_records(self, batch: &Batch) -> (Task, Vec<Item>) {
        let meta = self.descriptor.task;
        let task = Task {
            id: TaskId::new(),
            batch_id: batch.id,
            batch_number: meta.batch_number,
            kind: meta.task_kind,
            campaign: batch.campaign.clone(),
            source_language: meta.source_language,
            target_language: meta.target_language,
            required_annotations: self.required_annotations,
            random_seed: meta.random_seed,
            activated: Stamp::default(),
            completed: Stamp::default(),
            retired: Stamp::default(),
            created_at: Utc::now(),
        };

        let items = self
            .descriptor
            .items
            .into_iter()
            .zip(0u32..)
            .map(|(item, position)| Item {
                id: ItemId::new(),
                task_id: task.id,
                position,
                block_index: item.block_index,
                item_index: item.item_index,
                segment_id: item.item_id,
                item_type: item.item_type,
                source_id: item.source_id,
                source_text: item.source_text,
                target_id: item.target_id,
                target_text: item.target_text,
            })
            .collect();

        (task, items)
    }
}
