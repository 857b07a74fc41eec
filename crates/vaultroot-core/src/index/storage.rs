//! Index persistence
//!
//! The snapshot is written as a JSON envelope `{version, checksum, payload}` where
//! `checksum` is the SHA-256 of the payload string. Each write goes to its own
//! uniquely named temporary file in the target directory that is then renamed over
//! the target, so neither a crash nor two concurrent writers leave a torn file.

use super::IndexSnapshot;
use crate::client::hash_content;
use crate::error::{Result, VaultRootError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Bumped whenever the payload layout changes
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    checksum: String,
    payload: String,
}

/// Persist a snapshot atomically
pub fn save(path: &Path, snapshot: &IndexSnapshot) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let payload = serde_json::to_string(snapshot)?;
    let envelope = Envelope {
        version: FORMAT_VERSION,
        checksum: hash_content(&payload),
        payload,
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, &envelope)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;

    tracing::debug!(
        "Persisted index generation {} to {}",
        snapshot.generation,
        path.display()
    );
    Ok(())
}

/// Load a persisted snapshot.
///
/// Returns `Ok(None)` when there is no file or the snapshot is older than `ttl`.
/// Anything that cannot be trusted is `IndexCorruption`.
pub fn load(path: &Path, ttl: Duration) -> Result<Option<IndexSnapshot>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let corrupt =
        |what: String| VaultRootError::IndexCorruption(format!("{}: {}", path.display(), what));

    let envelope: Envelope =
        serde_json::from_slice(&bytes).map_err(|e| corrupt(format!("bad envelope ({})", e)))?;
    if envelope.version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "unsupported version {} (expected {})",
            envelope.version, FORMAT_VERSION
        )));
    }
    if hash_content(&envelope.payload) != envelope.checksum {
        return Err(corrupt("checksum mismatch".to_string()));
    }

    let mut snapshot: IndexSnapshot = serde_json::from_str(&envelope.payload)
        .map_err(|e| corrupt(format!("bad payload ({})", e)))?;

    let age = Utc::now().signed_duration_since(snapshot.built_at);
    if age.to_std().map(|age| age > ttl).unwrap_or(false) {
        tracing::info!(
            "Ignoring persisted index at {}: older than {:?}",
            path.display(),
            ttl
        );
        return Ok(None);
    }

    snapshot.rebuild_trie();
    Ok(Some(snapshot))
}
