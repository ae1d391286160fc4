// volboot-common/src/manifest.rs
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{BootError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallMethod {
    Archive,
    GitClone,
    Download,
}

/// Record of one successful install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub method: InstallMethod,
    pub path: PathBuf,
    pub installed_at: DateTime<Utc>,
}

/// Name -> install record, stored beside the plugin and model trees.
///
/// Directory and file presence remain the source of truth for "installed";
/// this is bookkeeping for `status` and for auditing what a forced refresh
/// replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallManifest {
    #[serde(default)]
    entries: BTreeMap<String, InstallRecord>,
    #[serde(skip)]
    dirty: bool,
}

impl InstallManifest {
    pub fn plugin_key(local_name: &str) -> String {
        format!("plugin:{local_name}")
    }

    pub fn model_key(subdir: &str, filename: &str) -> String {
        format!("model:{subdir}/{filename}")
    }

    /// Loads the manifest, treating a missing or unreadable file as empty.
    pub fn load(path: &Path) -> Self {
        match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<InstallManifest>(&bytes) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(
                        "Install manifest {} is corrupt ({}); starting from empty",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!("Could not read install manifest {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&InstallRecord> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &InstallRecord)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn record(&mut self, key: String, record: InstallRecord) {
        self.entries.insert(key, record);
        self.dirty = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<InstallRecord> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Writes the manifest via a temp file in the same directory, only if
    /// something changed since it was loaded.
    pub fn save_if_dirty(&mut self, path: &Path) -> Result<()> {
        if !self.dirty {
            debug!("Install manifest unchanged; not rewriting {}", path.display());
            return Ok(());
        }
        let dir = path.parent().ok_or_else(|| {
            BootError::IoError(format!(
                "Cannot get parent directory for {}",
                path.display()
            ))
        })?;
        fs::create_dir_all(dir)?;

        let content = serde_json::to_vec_pretty(self)?;
        let mut temp_file = NamedTempFile::new_in(dir)?;
        temp_file.write_all(&content)?;
        temp_file.flush()?;
        temp_file.as_file().sync_all()?;
        temp_file
            .persist(path)
            .map_err(|e| BootError::Io(Arc::new(e.error)))?;

        debug!(
            "Wrote install manifest with {} entries to {}",
            self.entries.len(),
            path.display()
        );
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str) -> InstallRecord {
        InstallRecord {
            source: "org/repo".into(),
            reference: Some("main".into()),
            method: InstallMethod::Archive,
            path: PathBuf::from(path),
            installed_at: Utc::now(),
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = InstallManifest::load(&dir.path().join("nope.json"));
        assert!(manifest.is_empty());
        assert!(!manifest.is_dirty());
    }

    #[test]
    fn saves_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("installed.json");
        let mut manifest = InstallManifest::default();
        manifest.record(InstallManifest::plugin_key("repo"), record("/x/repo"));
        manifest.save_if_dirty(&path).unwrap();
        assert!(!manifest.is_dirty());

        let loaded = InstallManifest::load(&path);
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded.get("plugin:repo").map(|r| r.method),
            Some(InstallMethod::Archive)
        );
    }

    #[test]
    fn clean_manifest_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installed.json");
        let mut manifest = InstallManifest::default();
        manifest.save_if_dirty(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installed.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(InstallManifest::load(&path).is_empty());
    }
}
