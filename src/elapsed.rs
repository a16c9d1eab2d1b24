//! Accumulated processing time across interrupted runs.
//!
//! The file holds a single counter, `{"elapsed_time": <seconds>}`. It is
//! read when a mode starts, rewritten when a run is interrupted, and
//! removed when a run completes. It carries no resumption position.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct ElapsedFile {
    elapsed_time: f64,
}

/// Seconds accumulated by earlier interrupted runs; 0 when there is no file.
pub fn load(path: &Path) -> f64 {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return 0.0,
    };
    match serde_json::from_str::<ElapsedFile>(&content) {
        Ok(file) => file.elapsed_time.max(0.0),
        Err(e) => {
            log::warn!("Ignoring unreadable elapsed-time file {}: {}", path.display(), e);
            0.0
        }
    }
}

pub fn save(path: &Path, elapsed_secs: f64) -> Result<()> {
    let body = serde_json::to_string(&ElapsedFile {
        elapsed_time: elapsed_secs,
    })?;
    std::fs::write(path, body)
        .with_context(|| format!("Failed to write elapsed-time file: {}", path.display()))
}

pub fn clear(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e)
            .with_context(|| format!("Failed to remove elapsed-time file: {}", path.display())),
    }
}
