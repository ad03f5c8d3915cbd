//! Batch construction: raw parallel text to quality-controlled task batches.
//!
//! Every batch holds 10 blocks. A block is 7 distinct targets plus three
//! controls (a repeat of a target from the paired block, the reference and
//! a degraded reference), shuffled so position gives nothing away.
//!
//! The whole construction draws from one RNG seeded by the caller, so the
//! same corpus and seed always produce byte-identical output.

pub mod control;
pub mod input;

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::seq::{SliceRandom, index};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::{CampaignConfig, Padding};
use crate::error::{Error, Result};
use crate::model::{
    BLOCKS_PER_TASK, ITEMS_PER_BLOCK, ITEMS_PER_TASK, ItemType, TARGETS_PER_BATCH,
    TARGETS_PER_BLOCK, TaskKind,
};

pub use control::{BAD_TOKEN, degrade_reference};
pub use input::{ParallelCorpus, Segments, SystemOutput};

/// `targetID` of reference controls.
pub const REFERENCE_ID: &str = "REF";

/// `targetID` of bad-reference controls.
pub const BAD_REFERENCE_ID: &str = "BAD";

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Task metadata of one batch entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMeta {
    pub batch_number: u32,
    pub batch_size: u32,
    pub source_language: String,
    pub target_language: String,
    /// `None` defers to the campaign default at import.
    #[serde(default)]
    pub required_annotations: Option<u32>,
    #[serde(default)]
    pub random_seed: u64,
    #[serde(default)]
    pub task_kind: TaskKind,
}

/// One item of a batch entry, in presentation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub block_index: u32,
    pub item_index: u32,
    #[serde(rename = "sourceID")]
    pub source_id: String,
    pub source_text: String,
    #[serde(rename = "targetID")]
    pub target_id: String,
    pub target_text: String,
    #[serde(rename = "itemID")]
    pub item_id: u32,
    pub item_type: ItemType,
}

/// One batch entry: becomes exactly one task on import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDescriptor {
    pub task: TaskMeta,
    pub items: Vec<BatchItem>,
}

impl BatchDescriptor {
    /// Check the 100-item, 10-blocks-of-10 shape.
    pub fn validate(&self) -> Result<()> {
        if self.items.len() != ITEMS_PER_TASK {
            return Err(Error::Batch(format!(
                "expected {ITEMS_PER_TASK} items, found {}",
                self.items.len()
            )));
        }

        let mut per_block = [0usize; BLOCKS_PER_TASK];
        for item in &self.items {
            let slot = per_block
                .get_mut(item.block_index as usize)
                .ok_or_else(|| Error::Batch(format!("block index {} out of range", item.block_index)))?;
            *slot += 1;
        }
        if let Some(block) = per_block.iter().position(|n| *n != ITEMS_PER_BLOCK) {
            return Err(Error::Batch(format!(
                "block {block} holds {} items, expected {ITEMS_PER_BLOCK}",
                per_block[block]
            )));
        }
        Ok(())
    }
}

/// Serialise batches the way the import boundary reads them.
pub fn to_json(batches: &[BatchDescriptor]) -> Result<String> {
    Ok(serde_json::to_string_pretty(batches)?)
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Which batch numbers to emit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BatchSelection {
    #[default]
    All,
    Numbers(BTreeSet<u32>),
}

impl BatchSelection {
    fn includes(&self, number: u32) -> bool {
        match self {
            BatchSelection::All => true,
            BatchSelection::Numbers(numbers) => numbers.contains(&number),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub source_language: String,
    pub target_language: String,
    pub kind: TaskKind,
    pub required_annotations: u32,
    pub seed: u64,
    pub selection: BatchSelection,
    pub padding: Padding,
}

impl BuildOptions {
    pub fn new(source_language: impl Into<String>, target_language: impl Into<String>) -> Self {
        Self {
            source_language: source_language.into(),
            target_language: target_language.into(),
            kind: TaskKind::SourceBased,
            required_annotations: 1,
            seed: 0,
            selection: BatchSelection::All,
            padding: Padding::Cyclic,
        }
    }

    /// Options carrying a campaign's padding mode and default annotation
    /// requirement.
    pub fn for_campaign(
        campaign: &CampaignConfig,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self::new(source_language, target_language)
            .required_annotations(campaign.required_annotations)
            .padding(campaign.padding)
    }

    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn required_annotations(mut self, n: u32) -> Self {
        self.required_annotations = n;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn selection(mut self, selection: BatchSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// A deduplicated system translation of one segment.
#[derive(Debug, Clone)]
struct Candidate {
    segment_id: u32,
    /// Contributing systems, sorted.
    systems: Vec<String>,
    text: String,
    bad_reference: Option<String>,
}

impl Candidate {
    fn target_id(&self) -> String {
        self.systems.join("+")
    }
}

/// An item before its final position inside the block is known.
struct Draft {
    segment_id: u32,
    target_id: String,
    target_text: String,
    item_type: ItemType,
}

pub struct BatchBuilder<'a> {
    corpus: &'a ParallelCorpus,
    options: BuildOptions,
}

impl<'a> BatchBuilder<'a> {
    pub fn new(corpus: &'a ParallelCorpus, options: BuildOptions) -> Self {
        Self { corpus, options }
    }

    /// Build the selected batches.
    pub fn build(&self) -> Result<Vec<BatchDescriptor>> {
        let reference = self.corpus.reference.as_ref().ok_or_else(|| {
            Error::Batch("a reference collection is required to build control items".to_string())
        })?;

        let mut rng = StdRng::seed_from_u64(self.options.seed);

        let mut systems: Vec<&SystemOutput> = self.corpus.systems.iter().collect();
        systems.sort_by(|a, b| a.name.cmp(&b.name));
        systems.shuffle(&mut rng);

        let mut candidates = self.deduplicate(&systems);
        if candidates.is_empty() {
            return Err(Error::Batch("no system output to batch".to_string()));
        }
        candidates.shuffle(&mut rng);

        let distinct = candidates.len();
        let candidates = pad(candidates, self.options.padding);
        if candidates.is_empty() {
            return Err(Error::Batch(format!(
                "{distinct} distinct items do not fill one batch of {TARGETS_PER_BATCH}"
            )));
        }

        let mut batches = Vec::new();
        for (number, targets) in candidates.chunks(TARGETS_PER_BATCH).enumerate() {
            let number = u32::try_from(number)
                .map_err(|_| Error::Batch("too many batches".to_string()))?;
            // Assemble every batch so RNG use is independent of the selection.
            let items = self.assemble(targets, reference, &mut rng)?;
            if self.options.selection.includes(number) {
                batches.push(BatchDescriptor {
                    task: self.task_meta(number),
                    items,
                });
            }
        }

        info!(
            systems = systems.len(),
            distinct,
            padded = candidates.len().saturating_sub(distinct),
            emitted = batches.len(),
            seed = self.options.seed,
            "built batches"
        );

        Ok(batches)
    }

    /// Collapse identical system outputs per segment into one candidate.
    fn deduplicate(&self, systems: &[&SystemOutput]) -> Vec<Candidate> {
        let mut index: BTreeMap<(u32, String), Candidate> = BTreeMap::new();

        for &segment_id in self.corpus.source.keys() {
            for system in systems {
                let Some(text) = system.segments.get(&segment_id) else {
                    continue;
                };
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }

                let key = (segment_id, content_hash_hex(text));
                let candidate = index.entry(key).or_insert_with(|| Candidate {
                    segment_id,
                    systems: Vec::new(),
                    text: text.to_string(),
                    bad_reference: system.bad_references.get(&segment_id).cloned(),
                });
                candidate.systems.push(system.name.clone());
            }
        }

        let candidates: Vec<Candidate> = index
            .into_values()
            .map(|mut c| {
                c.systems.sort();
                c
            })
            .collect();

        debug!(
            candidates = candidates.len(),
            merged = candidates.iter().filter(|c| c.systems.len() > 1).count(),
            "deduplicated system outputs"
        );

        candidates
    }

    /// Turn 70 targets into 100 items: 10 blocks of 7 targets + 3 controls.
    fn assemble(
        &self,
        targets: &[Candidate],
        reference: &Segments,
        rng: &mut StdRng,
    ) -> Result<Vec<BatchItem>> {
        let blocks: Vec<&[Candidate]> = targets.chunks(TARGETS_PER_BLOCK).collect();
        let mut items = Vec::with_capacity(ITEMS_PER_TASK);

        for (block_index, block) in blocks.iter().enumerate() {
            let mut drafts: Vec<Draft> = block
                .iter()
                .map(|c| Draft {
                    segment_id: c.segment_id,
                    target_id: c.target_id(),
                    target_text: c.text.clone(),
                    item_type: ItemType::Target,
                })
                .collect();

            let paired = blocks[(block_index + BLOCKS_PER_TASK / 2) % BLOCKS_PER_TASK];
            let check = &paired[rng.gen_range(0..paired.len())];
            drafts.push(Draft {
                segment_id: check.segment_id,
                target_id: check.target_id(),
                target_text: check.text.clone(),
                item_type: ItemType::RedundantCheck,
            });

            let picks = index::sample(rng, block.len(), 2);
            let for_reference = &block[picks.index(0)];
            drafts.push(Draft {
                segment_id: for_reference.segment_id,
                target_id: REFERENCE_ID.to_string(),
                target_text: reference_text(reference, for_reference.segment_id)?.to_string(),
                item_type: ItemType::Reference,
            });

            let for_bad = &block[picks.index(1)];
            let bad_text = match &for_bad.bad_reference {
                Some(text) => text.clone(),
                None => degrade_reference(reference_text(reference, for_bad.segment_id)?, rng),
            };
            drafts.push(Draft {
                segment_id: for_bad.segment_id,
                target_id: BAD_REFERENCE_ID.to_string(),
                target_text: bad_text,
                item_type: ItemType::BadReference,
            });

            drafts.shuffle(rng);

            for (item_index, draft) in drafts.into_iter().enumerate() {
                items.push(BatchItem {
                    block_index: block_index as u32,
                    item_index: item_index as u32,
                    source_id: self.source_id(),
                    source_text: self.source_text(reference, draft.segment_id)?,
                    target_id: draft.target_id,
                    target_text: draft.target_text,
                    item_id: draft.segment_id,
                    item_type: draft.item_type,
                });
            }
        }

        Ok(items)
    }

    fn task_meta(&self, batch_number: u32) -> TaskMeta {
        TaskMeta {
            batch_number,
            batch_size: ITEMS_PER_TASK as u32,
            source_language: self.options.source_language.clone(),
            target_language: self.options.target_language.clone(),
            required_annotations: Some(self.options.required_annotations),
            random_seed: self.options.seed,
            task_kind: self.options.kind,
        }
    }

    fn source_id(&self) -> String {
        match self.options.kind {
            TaskKind::SourceBased => self.corpus.source_id.clone(),
            TaskKind::ReferenceBased => self
                .corpus
                .reference_id
                .clone()
                .unwrap_or_else(|| self.corpus.source_id.clone()),
        }
    }

    /// What annotators compare the candidate against.
    fn source_text(&self, reference: &Segments, segment_id: u32) -> Result<String> {
        match self.options.kind {
            TaskKind::SourceBased => self
                .corpus
                .source
                .get(&segment_id)
                .cloned()
                .ok_or_else(|| Error::Batch(format!("source has no segment {segment_id}"))),
            TaskKind::ReferenceBased => reference_text(reference, segment_id).map(str::to_string),
        }
    }
}

fn reference_text(reference: &Segments, segment_id: u32) -> Result<&str> {
    reference
        .get(&segment_id)
        .map(|s| s.trim())
        .ok_or_else(|| Error::Batch(format!("reference has no segment {segment_id}")))
}

/// Fill or drop the trailing partial batch.
fn pad(mut candidates: Vec<Candidate>, padding: Padding) -> Vec<Candidate> {
    let remainder = candidates.len() % TARGETS_PER_BATCH;
    if remainder == 0 {
        return candidates;
    }

    match padding {
        Padding::Cyclic => {
            let distinct = candidates.len();
            for i in 0..TARGETS_PER_BATCH - remainder {
                let again = candidates[i % distinct].clone();
                candidates.push(again);
            }
        }
        Padding::None => {
            let keep = candidates.len() - remainder;
            candidates.truncate(keep);
        }
    }
    candidates
}

fn content_hash_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(segment_id: u32) -> Candidate {
        Candidate {
            segment_id,
            systems: vec!["sys".to_string()],
            text: format!("text {segment_id}"),
            bad_reference: None,
        }
    }

    #[test]
    fn cyclic_padding_reappends_leading_items() {
        let padded = pad((1..=75).map(candidate).collect(), Padding::Cyclic);
        assert_eq!(padded.len(), 140);
        assert_eq!(padded[75].segment_id, 1);
        assert_eq!(padded[139].segment_id, 65);
    }

    #[test]
    fn cyclic_padding_wraps_short_input() {
        let padded = pad((1..=3).map(candidate).collect(), Padding::Cyclic);
        assert_eq!(padded.len(), 70);
        assert_eq!(padded[3].segment_id, 1);
        assert_eq!(padded[69].segment_id, 1);
    }

    #[test]
    fn no_padding_drops_partial_batch() {
        assert_eq!(pad((1..=75).map(candidate).collect(), Padding::None).len(), 70);
        assert!(pad((1..=69).map(candidate).collect(), Padding::None).is_empty());
    }

    #[test]
    fn exact_multiple_is_untouched() {
        assert_eq!(pad((1..=140).map(candidate).collect(), Padding::Cyclic).len(), 140);
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        assert_eq!(content_hash_hex("abc"), content_hash_hex("abc"));
        assert_ne!(content_hash_hex("abc"), content_hash_hex("abd"));
    }
}
