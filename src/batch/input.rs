//! Plain-text parallel input: one segment per line.
//!
//! A system output file `newstest.sysA` may carry two siblings:
//! `newstest.sysA.bad` with pre-built bad references (line-aligned with the
//! output) and `newstest.sysA.ids` mapping each output line to a source
//! segment ID. Without an ID file, line `n` is segment `n` (1-based).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Segments keyed by their sequential ID.
pub type Segments = BTreeMap<u32, String>;

/// One MT system's output for the source collection.
#[derive(Debug, Clone, Default)]
pub struct SystemOutput {
    pub name: String,
    pub segments: Segments,
    /// Companion bad references, keyed like `segments`.
    pub bad_references: Segments,
}

/// Source, reference and system outputs for one language pair.
#[derive(Debug, Clone, Default)]
pub struct ParallelCorpus {
    pub source_id: String,
    pub source: Segments,
    pub reference_id: Option<String>,
    pub reference: Option<Segments>,
    pub systems: Vec<SystemOutput>,
}

impl ParallelCorpus {
    /// Read the corpus from disk. System names are the file names.
    pub fn load(source: &Path, reference: Option<&Path>, systems: &[PathBuf]) -> Result<Self> {
        let reference_segments = reference.map(read_segments).transpose()?;

        let mut outputs = Vec::with_capacity(systems.len());
        for path in systems {
            outputs.push(load_system(path)?);
        }

        debug!(
            source = %source.display(),
            systems = outputs.len(),
            has_reference = reference_segments.is_some(),
            "loaded parallel corpus"
        );

        Ok(Self {
            source_id: file_name(source),
            source: read_segments(source)?,
            reference_id: reference.map(file_name),
            reference: reference_segments,
            systems: outputs,
        })
    }
}

fn load_system(path: &Path) -> Result<SystemOutput> {
    let lines = read_lines(path)?;

    let ids_path = sibling(path, "ids");
    let ids: Vec<u32> = if ids_path.exists() {
        let ids = read_lines(&ids_path)?
            .iter()
            .map(|line| {
                line.trim().parse::<u32>().map_err(|e| {
                    Error::Batch(format!("bad segment id {line:?} in {}: {e}", ids_path.display()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if ids.len() != lines.len() {
            return Err(Error::Batch(format!(
                "{} has {} ids for {} segments",
                ids_path.display(),
                ids.len(),
                lines.len()
            )));
        }
        ids
    } else {
        (1..=line_count(&lines)?).collect()
    };

    let bad_path = sibling(path, "bad");
    let bad_references = if bad_path.exists() {
        let bad = read_lines(&bad_path)?;
        if bad.len() != lines.len() {
            return Err(Error::Batch(format!(
                "{} has {} lines for {} segments",
                bad_path.display(),
                bad.len(),
                lines.len()
            )));
        }
        ids.iter().copied().zip(bad).collect()
    } else {
        Segments::new()
    };

    Ok(SystemOutput {
        name: file_name(path),
        segments: ids.into_iter().zip(lines).collect(),
        bad_references,
    })
}

fn read_segments(path: &Path) -> Result<Segments> {
    let lines = read_lines(path)?;
    Ok((1..=line_count(&lines)?).zip(lines).collect())
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Batch(format!("cannot read {}: {e}", path.display())))?;
    Ok(content.lines().map(str::to_string).collect())
}

fn line_count(lines: &[String]) -> Result<u32> {
    u32::try_from(lines.len()).map_err(|_| Error::Batch("too many segments".to_string()))
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_file_remaps_system_lines() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let sys = dir.path().join("sysA");
        std::fs::write(&src, "one\ntwo\nthree\n").unwrap();
        std::fs::write(&sys, "drei\neins\n").unwrap();
        std::fs::write(sibling(&sys, "ids"), "3\n1\n").unwrap();
        std::fs::write(sibling(&sys, "bad"), "drei BAD\neins BAD\n").unwrap();

        let corpus = ParallelCorpus::load(&src, None, &[sys]).unwrap();
        let system = &corpus.systems[0];
        assert_eq!(system.name, "sysA");
        assert_eq!(system.segments[&3], "drei");
        assert_eq!(system.segments[&1], "eins");
        assert_eq!(system.bad_references[&1], "eins BAD");
        assert_eq!(corpus.source[&2], "two");
        assert!(corpus.reference.is_none());
    }

    #[test]
    fn mismatched_id_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let sys = dir.path().join("sysA");
        std::fs::write(&src, "one\ntwo\n").unwrap();
        std::fs::write(&sys, "eins\nzwei\n").unwrap();
        std::fs::write(sibling(&sys, "ids"), "1\n").unwrap();

        assert!(ParallelCorpus::load(&src, None, &[sys]).is_err());
    }
}
