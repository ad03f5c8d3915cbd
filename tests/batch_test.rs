//! Batch construction from plain-text corpora.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use appraise_rs::batch::{
    BAD_TOKEN, BatchBuilder, BatchDescriptor, BatchSelection, BuildOptions, ParallelCorpus,
};
use appraise_rs::config::{CampaignConfig, CampaignRegistry, Padding};
use appraise_rs::model::{ItemType, TaskKind};

fn write_lines(dir: &Path, name: &str, lines: impl Iterator<Item = String>) -> PathBuf {
    let path = dir.join(name);
    let content: Vec<String> = lines.collect();
    std::fs::write(&path, content.join("\n") + "\n").unwrap();
    path
}

/// A corpus of `segments` lines with one output file per system. Systems
/// listed in `shared` all translate every line identically.
fn corpus(dir: &Path, segments: u32, systems: &[&str], shared: bool) -> ParallelCorpus {
    let source = write_lines(dir, "newstest.en", (1..=segments).map(|n| format!("source line {n}")));
    let reference = write_lines(
        dir,
        "newstest.de.ref",
        (1..=segments).map(|n| format!("die referenz zeile nummer {n}")),
    );
    let outputs: Vec<PathBuf> = systems
        .iter()
        .map(|name| {
            write_lines(
                dir,
                name,
                (1..=segments).map(|n| {
                    if shared {
                        format!("gemeinsame ausgabe {n}")
                    } else {
                        format!("{name} ausgabe {n}")
                    }
                }),
            )
        })
        .collect();
    ParallelCorpus::load(&source, Some(&reference), &outputs).unwrap()
}

fn build(corpus: &ParallelCorpus, options: BuildOptions) -> Vec<BatchDescriptor> {
    BatchBuilder::new(corpus, options).build().unwrap()
}

fn block(batch: &BatchDescriptor, index: u32) -> Vec<&appraise_rs::batch::BatchItem> {
    batch.items.iter().filter(|i| i.block_index == index).collect()
}

#[test]
fn same_seed_builds_identical_batches() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), 70, &["sysA", "sysB"], false);

    let a = build(&corpus, BuildOptions::new("eng", "deu").seed(11));
    let b = build(&corpus, BuildOptions::new("eng", "deu").seed(11));
    let c = build(&corpus, BuildOptions::new("eng", "deu").seed(12));

    assert_eq!(a.len(), 2);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn every_block_is_seven_targets_and_three_controls() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), 70, &["sysA"], false);
    let batches = build(&corpus, BuildOptions::new("eng", "deu").seed(3));

    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    batch.validate().unwrap();
    assert_eq!(batch.task.batch_number, 0);
    assert_eq!(batch.task.batch_size, 100);
    assert_eq!(batch.task.random_seed, 3);

    let mut targets = BTreeSet::new();
    for b in 0..10 {
        let items = block(batch, b);
        let count = |kind: ItemType| items.iter().filter(|i| i.item_type == kind).count();
        assert_eq!(count(ItemType::Target), 7);
        assert_eq!(count(ItemType::RedundantCheck), 1);
        assert_eq!(count(ItemType::Reference), 1);
        assert_eq!(count(ItemType::BadReference), 1);

        let positions: Vec<u32> = items.iter().map(|i| i.item_index).collect();
        assert_eq!(positions, (0..10).collect::<Vec<_>>());

        targets.extend(
            items
                .iter()
                .filter(|i| i.item_type == ItemType::Target)
                .map(|i| i.item_id),
        );
    }
    // 70 distinct segments, each used as a target exactly once.
    assert_eq!(targets.len(), 70);
}

#[test]
fn redundant_check_repeats_a_target_from_the_paired_block() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), 70, &["sysA"], false);
    let batch = &build(&corpus, BuildOptions::new("eng", "deu").seed(5))[0];

    for b in 0..10 {
        let check = block(batch, b)
            .into_iter()
            .find(|i| i.item_type == ItemType::RedundantCheck)
            .unwrap();
        let paired = block(batch, (b + 5) % 10);
        assert!(paired.iter().any(|i| {
            i.item_type == ItemType::Target
                && i.item_id == check.item_id
                && i.target_text == check.target_text
                && i.target_id == check.target_id
        }));
    }
}

#[test]
fn reference_controls_carry_reference_text() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), 70, &["sysA"], false);
    let batch = &build(&corpus, BuildOptions::new("eng", "deu").seed(9))[0];

    for item in &batch.items {
        let reference = format!("die referenz zeile nummer {}", item.item_id);
        match item.item_type {
            ItemType::Reference => {
                assert_eq!(item.target_id, "REF");
                assert_eq!(item.target_text, reference);
            }
            ItemType::BadReference => {
                assert_eq!(item.target_id, "BAD");
                assert_eq!(item.target_text.matches(BAD_TOKEN).count(), 2);
                assert_ne!(item.target_text, reference);
            }
            _ => assert_eq!(item.target_id, "sysA"),
        }
        assert_eq!(item.source_id, "newstest.en");
        assert_eq!(item.source_text, format!("source line {}", item.item_id));
    }
}

#[test]
fn identical_outputs_collapse_into_one_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), 70, &["sysB", "sysA"], true);
    let batches = build(&corpus, BuildOptions::new("eng", "deu"));

    // 140 outputs but only 70 distinct texts: one batch, no padding needed.
    assert_eq!(batches.len(), 1);
    for item in batches[0].items.iter().filter(|i| i.item_type == ItemType::Target) {
        assert_eq!(item.target_id, "sysA+sysB");
    }
}

#[test]
fn selection_emits_only_requested_batches() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), 70, &["sysA", "sysB", "sysC"], false);

    let all = build(&corpus, BuildOptions::new("eng", "deu").seed(21));
    assert_eq!(all.len(), 3);

    let only = build(
        &corpus,
        BuildOptions::new("eng", "deu")
            .seed(21)
            .selection(BatchSelection::Numbers(BTreeSet::from([1]))),
    );
    assert_eq!(only.len(), 1);
    assert_eq!(only[0], all[1]);
}

#[test]
fn reference_based_tasks_show_the_reference_as_source() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), 70, &["sysA"], false);
    let batch = &build(
        &corpus,
        BuildOptions::new("deu", "deu")
            .kind(TaskKind::ReferenceBased)
            .required_annotations(3),
    )[0];

    assert_eq!(batch.task.task_kind, TaskKind::ReferenceBased);
    assert_eq!(batch.task.required_annotations, Some(3));
    for item in &batch.items {
        assert_eq!(item.source_id, "newstest.de.ref");
        assert_eq!(
            item.source_text,
            format!("die referenz zeile nummer {}", item.item_id)
        );
    }
}

#[test]
fn building_without_reference_fails() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_lines(dir.path(), "src", (1..=70).map(|n| format!("line {n}")));
    let system = write_lines(dir.path(), "sysA", (1..=70).map(|n| format!("zeile {n}")));
    let corpus = ParallelCorpus::load(&source, None, &[system]).unwrap();

    assert!(BatchBuilder::new(&corpus, BuildOptions::new("eng", "deu")).build().is_err());
}

#[test]
fn output_round_trips_through_import_shape() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), 70, &["sysA"], false);
    let batches = build(&corpus, BuildOptions::new("eng", "deu").seed(1));

    let json = appraise_rs::batch::to_json(&batches).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let first = &value[0];
    assert_eq!(first["task"]["batchNumber"], 0);
    assert_eq!(first["task"]["targetLanguage"], "deu");
    assert!(first["items"][0]["itemID"].is_u64());
    assert!(first["items"][0]["targetID"].is_string());
}

#[test]
fn campaign_policy_sets_padding_and_requirement() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = corpus(dir.path(), 75, &["sysA"], false);

    let mut registry = CampaignRegistry::empty();
    registry.insert(
        CampaignRegistry::parse(
            "[campaign]\nname = \"strict\"\npadding = \"none\"\nrequired_annotations = 3\n",
        )
        .unwrap(),
    );

    let strict = build(
        &corpus,
        BuildOptions::for_campaign(&registry.get("strict"), "eng", "deu"),
    );
    assert_eq!(strict.len(), 1);
    assert_eq!(strict[0].task.required_annotations, Some(3));

    // Unknown campaigns fall back to cyclic padding.
    let padded = build(
        &corpus,
        BuildOptions::for_campaign(&registry.get("adhoc"), "eng", "deu"),
    );
    assert_eq!(padded.len(), 2);
    assert_eq!(padded[1].task.required_annotations, Some(1));

    // An explicit option still overrides the campaign.
    let config = CampaignConfig {
        padding: Padding::None,
        ..CampaignConfig::named("x")
    };
    let forced = build(
        &corpus,
        BuildOptions::for_campaign(&config, "eng", "deu").padding(Padding::Cyclic),
    );
    assert_eq!(forced.len(), 2);
}
