//! Descriptor files and archives through to stored tasks.

mod common;

use std::io::Write;

use appraise_rs::engine::Engine;
use appraise_rs::event::EventKind;
use appraise_rs::import::read_entries;
use appraise_rs::model::State;
use common::descriptor;
use serde_json::json;

#[test]
fn malformed_entries_are_skipped_not_fatal() {
    let mut engine = Engine::in_memory().unwrap();

    let mut short = descriptor(1, "deu", None);
    short["items"].as_array_mut().unwrap().truncate(99);

    let entries = vec![
        descriptor(0, "deu", None),
        short,
        json!({ "task": "not an object" }),
        descriptor(3, "deu", Some(0)),
        descriptor(4, "deu", Some(2)),
    ];
    let report = engine.import_batches("wmt", "mixed", entries).unwrap();

    assert!(report.is_valid());
    assert_eq!(report.imported.len(), 2);
    let skipped: Vec<usize> = report.skipped.iter().map(|s| s.index).collect();
    assert_eq!(skipped, vec![1, 2, 3]);
    assert!(report.skipped[0].reason.contains("99"));

    let batch = engine.get_batch(report.batch_id).unwrap();
    assert!(batch.valid);
    assert!(!batch.ready);

    let first = engine.get_task(report.imported[0]).unwrap();
    assert_eq!(first.state(), State::Pending);
    assert_eq!(first.required_annotations, 1);
    assert_eq!(engine.task_items(first.id).unwrap().len(), 100);
    assert_eq!(
        engine.get_task(report.imported[1]).unwrap().required_annotations,
        2
    );

    let skip_events = engine
        .get_events_since(0)
        .unwrap()
        .into_iter()
        .filter(|e| matches!(e.kind, EventKind::BatchEntrySkipped { .. }))
        .count();
    assert_eq!(skip_events, 3);
}

#[test]
fn batch_without_any_good_entry_stays_invalid() {
    let mut engine = Engine::in_memory().unwrap();
    let report = engine
        .import_batches("wmt", "broken", vec![json!({}), json!([1, 2, 3])])
        .unwrap();

    assert!(!report.is_valid());
    assert_eq!(report.skipped.len(), 2);
    assert!(!engine.get_batch(report.batch_id).unwrap().valid);
}

#[test]
fn items_keep_stored_order_and_segment_ids() {
    let mut engine = Engine::in_memory().unwrap();
    let report = engine
        .import_batches("wmt", "one", vec![descriptor(0, "deu", None)])
        .unwrap();

    let items = engine.task_items(report.imported[0]).unwrap();
    let positions: Vec<u32> = items.iter().map(|i| i.position).collect();
    assert_eq!(positions, (0..100).collect::<Vec<_>>());
    assert_eq!(items[0].segment_id, 1);
    assert_eq!(items[99].segment_id, 100);
    assert_eq!(items[7].item_type.code(), "CHK");
}

#[test]
fn json_file_is_read_as_entry_array() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batches.json");
    let entries = json!([descriptor(0, "deu", None), descriptor(1, "deu", None)]);
    std::fs::write(&path, entries.to_string()).unwrap();

    assert_eq!(read_entries(&path).unwrap().len(), 2);
}

#[test]
fn zip_members_are_concatenated_and_bad_members_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batches.zip");

    let file = std::fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file("a.json", options).unwrap();
    zip.write_all(json!([descriptor(0, "deu", None)]).to_string().as_bytes())
        .unwrap();
    zip.start_file("b.json", options).unwrap();
    zip.write_all(
        json!([descriptor(1, "deu", None), descriptor(2, "deu", None)])
            .to_string()
            .as_bytes(),
    )
    .unwrap();
    zip.start_file("broken.json", options).unwrap();
    zip.write_all(b"{ not json").unwrap();
    zip.start_file("README.txt", options).unwrap();
    zip.write_all(b"ignored").unwrap();
    zip.finish().unwrap();

    let entries = read_entries(&path).unwrap();
    assert_eq!(entries.len(), 3);

    let mut engine = Engine::in_memory().unwrap();
    let report = engine.import_batches("wmt", "zipped", entries).unwrap();
    assert_eq!(report.imported.len(), 3);
    assert!(report.skipped.is_empty());
}

#[test]
fn unreadable_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batches.json");
    std::fs::write(&path, "{}").unwrap();

    assert!(read_entries(&path).is_err());
    assert!(read_entries(&dir.path().join("missing.json")).is_err());
}
