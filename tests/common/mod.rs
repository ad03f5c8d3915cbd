//! Shared fixtures for integration tests.
#![allow(dead_code)]

use appraise_rs::engine::Engine;
use appraise_rs::model::{Submission, SubmitOutcome, TaskId};
use chrono::Utc;
use serde_json::json;

/// Item type codes of one block in stored order: 7 targets, then controls.
pub const BLOCK_LAYOUT: [&str; 10] = [
    "TGT", "TGT", "TGT", "TGT", "TGT", "TGT", "TGT", "CHK", "REF", "BAD",
];

/// A well-formed batch entry for `language`.
pub fn descriptor(batch_number: u32, language: &str, required: Option<u32>) -> serde_json::Value {
    let items: Vec<serde_json::Value> = (0..10u32)
        .flat_map(|block| {
            BLOCK_LAYOUT.iter().enumerate().map(move |(index, code)| {
                let segment = block * 10 + index as u32 + 1;
                let target_id = if *code == "TGT" { "sysA" } else { *code };
                json!({
                    "blockIndex": block,
                    "itemIndex": index,
                    "sourceID": "newstest.src",
                    "sourceText": format!("source {segment}"),
                    "targetID": target_id,
                    "targetText": format!("target {segment}"),
                    "itemID": segment,
                    "itemType": code,
                })
            })
        })
        .collect();

    let mut task = json!({
        "batchNumber": batch_number,
        "batchSize": 100,
        "sourceLanguage": "eng",
        "targetLanguage": language,
        "randomSeed": 7,
    });
    if let Some(required) = required {
        task["requiredAnnotations"] = json!(required);
    }
    json!({ "task": task, "items": items })
}

/// Import `count` tasks into `campaign`, release the batch and activate it.
pub fn active_tasks(
    engine: &mut Engine,
    campaign: &str,
    language: &str,
    count: u32,
    required: u32,
) -> Vec<TaskId> {
    let entries = (0..count)
        .map(|n| descriptor(n, language, Some(required)))
        .collect();
    let report = engine.import_batches(campaign, "fixture", entries).unwrap();
    engine.mark_batch_ready(report.batch_id).unwrap();
    engine.activate_batch(report.batch_id, "admin").unwrap();
    report.imported
}

/// Submit a score for whatever item the tracker currently expects.
pub fn submit_next(engine: &mut Engine, task: TaskId, user: &str) -> Option<SubmitOutcome> {
    let item = engine.next_item(task, user).unwrap().item?;
    let now = Utc::now();
    Some(
        engine
            .submit(
                user,
                Submission {
                    task_id: task,
                    item_id: item.id,
                    score: 50,
                    start_time: now,
                    end_time: now,
                },
            )
            .unwrap(),
    )
}

/// Submit for `user` until the tracker has nothing left. Returns how many
/// submissions were recorded.
pub fn finish(engine: &mut Engine, task: TaskId, user: &str) -> u32 {
    let mut recorded = 0;
    while let Some(outcome) = submit_next(engine, task, user) {
        assert_eq!(outcome, SubmitOutcome::Recorded);
        recorded += 1;
    }
    recorded
}
