//! Flat JSON-file persistence for the ledger stores.
//!
//! Each collection lives in one pretty-printed JSON file that is rewritten
//! whole on every mutation. Reads degrade: a missing file is an empty
//! collection, and an unreadable or corrupt file is logged and read as empty
//! so the next agent tick stays available.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub(crate) fn load_rows<F, T>(path: &Path, extract: impl FnOnce(F) -> Vec<T>) -> Vec<T>
where
    F: for<'de> Deserialize<'de>,
{
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(error) => {
            warn!(path = %path.display(), %error, "ledger file unreadable, treating as empty");
            return Vec::new();
        }
    };
    match serde_json::from_str::<F>(&raw) {
        Ok(file) => extract(file),
        Err(error) => {
            warn!(path = %path.display(), %error, "ledger file corrupt, treating as empty");
            Vec::new()
        }
    }
}

pub(crate) fn save_rows<F: Serialize>(path: &Path, file: &F) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|error| format!("{}: {error}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(file).map_err(|error| error.to_string())?;
    std::fs::write(path, raw).map_err(|error| format!("{}: {error}", path.display()))
}
