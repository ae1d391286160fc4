// volboot-core/src/check/status.rs
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use volboot_aio::file_size;
use volboot_common::config::Config;
use volboot_common::lock::{LockHolder, VolumeLock};
use volboot_common::manifest::InstallManifest;

use crate::install::model::download_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetState {
    Present,
    /// On disk but below its minimum size; will be fetched again.
    Undersized,
    Missing,
}

impl AssetState {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetState::Present => "present",
            AssetState::Undersized => "undersized",
            AssetState::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Symlink,
    /// A real directory, e.g. the result of the copy fallback.
    Directory,
    Missing,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Symlink => "symlink",
            LinkState::Directory => "directory",
            LinkState::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub id: String,
    pub path: PathBuf,
    pub state: String,
}

/// Snapshot of what is on the volume compared with the declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeStatus {
    pub volume: PathBuf,
    pub seeded: bool,
    pub plugins: Vec<StatusReport>,
    pub models: Vec<StatusReport>,
    pub links: Vec<StatusReport>,
    pub lock: Option<LockHolder>,
    pub recorded_installs: usize,
}

impl VolumeStatus {
    /// Reads the volume without modifying it.
    pub fn collect(config: &Config) -> Self {
        let plugins = config
            .ordered_plugins()
            .into_iter()
            .map(|spec| {
                let path = config.plugin_path(spec.local_name());
                let state = if path.is_dir() {
                    AssetState::Present
                } else {
                    AssetState::Missing
                };
                report(spec.local_name().to_string(), path, state.as_str())
            })
            .collect();

        let mut models: Vec<StatusReport> = config
            .models
            .iter()
            .map(|spec| {
                let path = config.model_path(&spec.subdir, &spec.filename);
                let state = asset_state(file_size(&path), spec.min_valid_size());
                report(spec.display_id(), path, state.as_str())
            })
            .collect();
        for download in &config.downloads {
            if let Ok(path) = download_path(download, config) {
                let state = asset_state(file_size(&path), download.min_valid_size());
                models.push(report(
                    download.dest.display().to_string(),
                    path,
                    state.as_str(),
                ));
            }
        }

        let links = config
            .tool_caches
            .iter()
            .map(|cache| {
                let alias = config.expand_home(&cache.alias);
                let state = link_state(&alias).as_str();
                report(cache.name.clone(), alias, state)
            })
            .collect();

        Self {
            volume: config.volume_root().to_path_buf(),
            seeded: config.marker_path().is_file(),
            plugins,
            models,
            links,
            lock: VolumeLock::read_holder(&config.lock_path()),
            recorded_installs: InstallManifest::load(&config.install_manifest_path()).len(),
        }
    }

    pub fn missing_count(&self) -> usize {
        self.plugins
            .iter()
            .chain(&self.models)
            .chain(&self.links)
            .filter(|r| r.state == "missing" || r.state == "undersized")
            .count()
    }
}

fn report(id: String, path: PathBuf, state: &str) -> StatusReport {
    StatusReport {
        id,
        path,
        state: state.to_string(),
    }
}

pub fn asset_state(size: Option<u64>, min_size: u64) -> AssetState {
    match size {
        Some(size) if size >= min_size => AssetState::Present,
        Some(_) => AssetState::Undersized,
        None => AssetState::Missing,
    }
}

pub fn link_state(alias: &Path) -> LinkState {
    match fs::symlink_metadata(alias) {
        Ok(meta) if meta.file_type().is_symlink() => LinkState::Symlink,
        Ok(meta) if meta.is_dir() => LinkState::Directory,
        _ => LinkState::Missing,
    }
}
