//! Reading batch descriptor files.
//!
//! A descriptor file is a JSON array of batch entries. A `.zip` archive
//! bundles several such files; their arrays are concatenated in archive
//! order. Entries are returned as raw JSON so that one malformed entry can
//! be skipped at import without losing the rest.

use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::Result;

/// Load every batch entry from a `.json` file or a `.zip` of them.
pub fn read_entries(path: &Path) -> Result<Vec<serde_json::Value>> {
    let is_zip = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));

    if is_zip {
        return read_archive(path);
    }

    let content = std::fs::read_to_string(path)?;
    let entries: Vec<serde_json::Value> = serde_json::from_str(&content)?;
    debug!(path = %path.display(), entries = entries.len(), "read batch file");
    Ok(entries)
}

fn read_archive(path: &Path) -> Result<Vec<serde_json::Value>> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut entries = Vec::new();

    for index in 0..archive.len() {
        let mut member = archive.by_index(index)?;
        let name = member.name().to_string();
        if member.is_dir() || !name.to_ascii_lowercase().ends_with(".json") {
            continue;
        }

        let mut content = String::new();
        member.read_to_string(&mut content)?;

        match serde_json::from_str::<Vec<serde_json::Value>>(&content) {
            Ok(batch) => {
                debug!(archive = %path.display(), member = %name, entries = batch.len(), "read archive member");
                entries.extend(batch);
            }
            Err(e) => {
                warn!(archive = %path.display(), member = %name, error = %e, "skipping unparsable archive member");
            }
        }
    }

    Ok(entries)
}
