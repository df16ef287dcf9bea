// Durable run state: the resume checkpoint and the output files

pub mod output;
pub mod progress;

use crate::error::{EnrichError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Write `value` as pretty JSON through a temp file and rename, so readers see
/// either the old file or the new one.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| persist_err(path, e))?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| persist_err(path, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| persist_err(path, e))?;
    fs::rename(&tmp, path).map_err(|e| persist_err(path, e))?;
    Ok(())
}

fn persist_err(path: &Path, err: impl std::fmt::Display) -> EnrichError {
    EnrichError::Persistence(format!("{}: {}", path.display(), err))
}

/// Read a JSON file, or `None` when it does not exist yet.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&content)?))
}
