// volboot-common/src/model/asset.rs
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Anything smaller is a truncated or empty download.
pub const DEFAULT_MIN_MODEL_SIZE: u64 = 1024 * 1024;

/// One `[[models]]` entry. Identity is `(subdir, filename)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelSpec {
    /// Category directory under the models tree, e.g. `checkpoints`.
    pub subdir: String,
    pub filename: String,
    /// Repository id on the model registry, e.g. `org/model`.
    pub registry_id: String,
    #[serde(default)]
    pub subfolder: Option<String>,
    #[serde(default)]
    pub min_size: Option<u64>,
    /// Optional hex SHA-256 checked before the file is moved into place.
    #[serde(default)]
    pub sha256: Option<String>,
}

impl ModelSpec {
    pub fn new(
        subdir: impl Into<String>,
        filename: impl Into<String>,
        registry_id: impl Into<String>,
    ) -> Self {
        Self {
            subdir: subdir.into(),
            filename: filename.into(),
            registry_id: registry_id.into(),
            subfolder: None,
            min_size: None,
            sha256: None,
        }
    }

    pub fn min_valid_size(&self) -> u64 {
        self.min_size.unwrap_or(DEFAULT_MIN_MODEL_SIZE)
    }

    pub fn display_id(&self) -> String {
        format!("{}/{}", self.subdir, self.filename)
    }
}

/// A plain URL download into the models tree (upscaler weights and the like).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawDownload {
    pub url: String,
    /// Destination relative to the models tree.
    pub dest: PathBuf,
    #[serde(default)]
    pub min_size: Option<u64>,
    #[serde(default)]
    pub sha256: Option<String>,
}

impl RawDownload {
    pub fn min_valid_size(&self) -> u64 {
        self.min_size.unwrap_or(DEFAULT_MIN_MODEL_SIZE)
    }
}

/// A tool that insists on reading its models from a fixed path.
///
/// The pack is unpacked to `<volume>/<volume_subdir>/<name>` and `alias` is
/// pointed at `<volume>/<volume_subdir>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCache {
    pub name: String,
    /// Release archive holding the tool's model pack.
    pub url: String,
    /// Relative to the volume root.
    pub volume_subdir: PathBuf,
    /// The hard-coded location the tool reads from. `~/` expands to home.
    pub alias: PathBuf,
    /// Top-level directory prefix inside the archive. `None` means the
    /// archive contents sit at its root.
    #[serde(default)]
    pub archive_prefix: Option<String>,
}
