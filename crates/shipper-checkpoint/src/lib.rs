//! Atomic checkpoint file storage.
//!
//! The checkpoint file records, per tailed path, the byte offset up to
//! which its contents have been delivered successfully. It is a single
//! JSON object (`{"<path>": <offset>, ...}`), written with permission bits
//! `0700` via a temp-file-then-rename so a reader never observes a
//! partially written file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Persistent store for tail offsets, keyed by the tailed file's path
/// (rendered as its display string, matching the original progress file's
/// string-keyed JSON object).
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the checkpoint file. A missing file is not an error — it means
    /// no checkpoint has been written yet — and yields an empty map.
    pub fn load(&self) -> Result<BTreeMap<String, u64>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("parsing checkpoint file {}", self.path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => {
                Err(err).with_context(|| format!("reading checkpoint file {}", self.path.display()))
            }
        }
    }

    /// Write the full checkpoint snapshot atomically: serialize, write to a
    /// `.tmp` sibling, set `0700` permissions, then rename over the target
    /// path.
    pub fn save(&self, offsets: &BTreeMap<String, u64>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating checkpoint dir {}", parent.display()))?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        let json = serde_json::to_string(offsets).context("serializing checkpoint")?;

        fs::write(&tmp_path, json)
            .with_context(|| format!("writing checkpoint tmp file {}", tmp_path.display()))?;

        set_owner_only(&tmp_path)
            .with_context(|| format!("setting permissions on {}", tmp_path.display()))?;

        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming checkpoint file to {}", self.path.display()))?;

        Ok(())
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> Result<()> {
    Ok(())
}
