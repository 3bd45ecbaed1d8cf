//! File-backed redundant fallback store.
//!
//! Each key lives in its own `posa_<key>.json` file inside one directory, so
//! reads are plain synchronous file reads that work before (or without) the
//! durable store being open.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::traits::{namespaced, FallbackStore, FALLBACK_PREFIX};
use crate::error::{OfflineError, Result};

pub struct FileFallback {
  dir: PathBuf,
}

impl FileFallback {
  /// Create a fallback store rooted at `dir`, creating the directory.
  pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
    let dir = dir.into();
    fs::create_dir_all(&dir).map_err(|e| {
      OfflineError::Storage(format!(
        "failed to create fallback directory {}: {}",
        dir.display(),
        e
      ))
    })?;
    Ok(Self { dir })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn file_for(&self, key: &str) -> PathBuf {
    self.dir.join(format!("{}.json", namespaced(key)))
  }
}

impl FallbackStore for FileFallback {
  fn get(&self, key: &str) -> Option<String> {
    fs::read_to_string(self.file_for(key)).ok()
  }

  fn set(&self, key: &str, raw: &str) -> Result<()> {
    let target = self.file_for(key);
    let tmp = target.with_extension("json.tmp");

    // Write then rename so a crash never leaves a half-written value
    fs::write(&tmp, raw)
      .and_then(|_| fs::rename(&tmp, &target))
      .map_err(|e| OfflineError::Storage(format!("failed to write {}: {}", target.display(), e)))
  }

  fn remove(&self, key: &str) {
    let path = self.file_for(key);
    if path.exists() {
      if let Err(e) = fs::remove_file(&path) {
        warn!(path = %path.display(), error = %e, "failed to remove fallback entry");
      }
    }
  }

  fn clear_namespace(&self) -> Result<()> {
    let entries = fs::read_dir(&self.dir).map_err(|e| {
      OfflineError::Storage(format!("failed to list {}: {}", self.dir.display(), e))
    })?;

    for entry in entries.flatten() {
      let name = entry.file_name();
      if name.to_string_lossy().starts_with(FALLBACK_PREFIX) {
        fs::remove_file(entry.path()).map_err(|e| {
          OfflineError::Storage(format!("failed to remove {}: {}", entry.path().display(), e))
        })?;
      }
    }
    Ok(())
  }

  fn entries(&self) -> Vec<(String, String)> {
    let Ok(dir) = fs::read_dir(&self.dir) else {
      return Vec::new();
    };

    dir
      .flatten()
      .filter_map(|entry| {
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = name.strip_suffix(".json")?;
        if !key.starts_with(FALLBACK_PREFIX) {
          return None;
        }
        let raw = fs::read_to_string(entry.path()).ok()?;
        Some((key.to_string(), raw))
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_set_get_remove() {
    let dir = tempfile::tempdir().unwrap();
    let fallback = FileFallback::open(dir.path()).unwrap();

    fallback.set("manual_offline", "true").unwrap();
    assert_eq!(fallback.get("manual_offline").as_deref(), Some("true"));
    assert!(dir.path().join("posa_manual_offline.json").exists());

    fallback.remove("manual_offline");
    assert_eq!(fallback.get("manual_offline"), None);
  }

  #[test]
  fn test_clear_namespace_keeps_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    let fallback = FileFallback::open(dir.path()).unwrap();
    fallback.set("offers_cache", "[]").unwrap();
    fallback.set("uom_cache", "{}").unwrap();
    fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

    fallback.clear_namespace().unwrap();

    assert!(fallback.entries().is_empty());
    assert!(dir.path().join("notes.txt").exists());
  }

  #[test]
  fn test_entries_report_prefixed_keys() {
    let dir = tempfile::tempdir().unwrap();
    let fallback = FileFallback::open(dir.path()).unwrap();
    fallback.set("cache_version", "1").unwrap();

    let entries = fallback.entries();
    assert_eq!(entries, vec![("posa_cache_version".to_string(), "1".to_string())]);
  }
}
