//! Inter-annotator agreement over pairwise-comparison judgments.
//!
//! Input is the exported triple format, one judgment per line:
//! `annotator<TAB>item<TAB>label` where the label is `<`, `=` or `>`.
//! Coefficients follow the multi-coder definitions of Artstein & Poesio
//! (2008). Any coefficient whose chance term degenerates is `None`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Label {
    Worse,
    Same,
    Better,
}

impl Label {
    pub const ALL: [Label; 3] = [Label::Worse, Label::Same, Label::Better];
}

impl std::str::FromStr for Label {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "<" => Ok(Label::Worse),
            "=" => Ok(Label::Same),
            ">" => Ok(Label::Better),
            _ => Err(Error::Validation(format!("unknown comparison label: {s}"))),
        }
    }
}

/// One annotator's label for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgment {
    pub annotator: String,
    pub item: String,
    pub label: Label,
}

/// Agreement coefficients; `None` means unavailable for this data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Agreement {
    pub observed: Option<f64>,
    pub bennett_s: Option<f64>,
    pub scott_pi: Option<f64>,
    pub cohen_kappa: Option<f64>,
    pub krippendorff_alpha: Option<f64>,
}

/// Parse tab-separated judgment triples. Blank lines are ignored.
pub fn parse_judgments(text: &str) -> Result<Vec<Judgment>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            let [annotator, item, label] = fields.as_slice() else {
                return Err(Error::Validation(format!(
                    "line {}: expected 3 tab-separated fields, found {}",
                    n + 1,
                    fields.len()
                )));
            };
            Ok(Judgment {
                annotator: annotator.to_string(),
                item: item.to_string(),
                label: label
                    .parse()
                    .map_err(|e| Error::Validation(format!("line {}: {e}", n + 1)))?,
            })
        })
        .collect()
}

/// Compute every coefficient. A repeated (annotator, item) keeps the last label.
pub fn compute(judgments: &[Judgment]) -> Agreement {
    let mut by_item: BTreeMap<&str, BTreeMap<&str, Label>> = BTreeMap::new();
    for j in judgments {
        by_item
            .entry(j.item.as_str())
            .or_default()
            .insert(j.annotator.as_str(), j.label);
    }

    let coders: BTreeSet<&str> = by_item.values().flat_map(|m| m.keys().copied()).collect();
    let coders: Vec<&str> = coders.into_iter().collect();

    // Per-coder label distributions, for the kappa chance term.
    let mut distributions: BTreeMap<&str, BTreeMap<Label, f64>> = BTreeMap::new();
    for labels in by_item.values() {
        for (coder, label) in labels {
            *distributions.entry(*coder).or_default().entry(*label).or_default() += 1.0;
        }
    }
    for distribution in distributions.values_mut() {
        let total: f64 = distribution.values().sum();
        distribution.values_mut().for_each(|v| *v /= total);
    }

    let mut pair_agreement = Vec::new();
    let mut pair_chance = Vec::new();
    for (i, a) in coders.iter().enumerate() {
        for b in &coders[i + 1..] {
            let mut common = 0usize;
            let mut agreed = 0usize;
            for labels in by_item.values() {
                if let (Some(la), Some(lb)) = (labels.get(a), labels.get(b)) {
                    common += 1;
                    agreed += usize::from(la == lb);
                }
            }
            if common == 0 {
                continue;
            }
            pair_agreement.push(agreed as f64 / common as f64);
            pair_chance.push(
                Label::ALL
                    .iter()
                    .map(|k| share(&distributions, a, *k) * share(&distributions, b, *k))
                    .sum::<f64>(),
            );
        }
    }

    let Some(observed) = mean(&pair_agreement) else {
        return Agreement::default();
    };

    let uniform = 1.0 / Label::ALL.len() as f64;
    // Chance agreement uses the same pairable items as the observed term.
    let totals = label_totals(
        by_item
            .values()
            .filter(|m| m.len() >= 2)
            .flat_map(|m| m.values().copied()),
    );
    let n: f64 = totals.values().sum();
    let pi_chance: f64 = totals.values().map(|c| (c / n).powi(2)).sum();

    Agreement {
        observed: Some(observed),
        bennett_s: chance_corrected(observed, uniform),
        scott_pi: chance_corrected(observed, pi_chance),
        cohen_kappa: mean(&pair_chance).and_then(|ae| chance_corrected(observed, ae)),
        krippendorff_alpha: krippendorff_alpha(&by_item),
    }
}

/// Nominal alpha over pairable values (items judged at least twice).
fn krippendorff_alpha(by_item: &BTreeMap<&str, BTreeMap<&str, Label>>) -> Option<f64> {
    let units: Vec<Vec<Label>> = by_item
        .values()
        .filter(|m| m.len() >= 2)
        .map(|m| m.values().copied().collect())
        .collect();

    let totals = label_totals(units.iter().flatten().copied());
    let n: f64 = totals.values().sum();
    if n < 2.0 {
        return None;
    }

    let mut disagreement = 0.0;
    for unit in &units {
        let mismatched = unit
            .iter()
            .flat_map(|x| unit.iter().map(move |y| x != y))
            .filter(|d| *d)
            .count();
        disagreement += mismatched as f64 / (unit.len() - 1) as f64;
    }
    let observed = disagreement / n;

    let same: f64 = totals.values().map(|c| c * c).sum();
    let expected = (n * n - same) / (n * (n - 1.0));
    if expected <= f64::EPSILON {
        return None;
    }
    Some(1.0 - observed / expected)
}

fn label_totals(labels: impl Iterator<Item = Label>) -> BTreeMap<Label, f64> {
    let mut totals = BTreeMap::new();
    for label in labels {
        *totals.entry(label).or_insert(0.0) += 1.0;
    }
    totals
}

fn share(distributions: &BTreeMap<&str, BTreeMap<Label, f64>>, coder: &str, label: Label) -> f64 {
    distributions
        .get(coder)
        .and_then(|d| d.get(&label))
        .copied()
        .unwrap_or(0.0)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn chance_corrected(observed: f64, expected: f64) -> Option<f64> {
    let denominator = 1.0 - expected;
    if denominator.abs() <= f64::EPSILON {
        None
    } else {
        Some((observed - expected) / denominator)
    }
}
