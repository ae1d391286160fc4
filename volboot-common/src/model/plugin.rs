// volboot-common/src/model/plugin.rs
use serde::{Deserialize, Serialize};

use crate::error::{BootError, Result};

pub const DEFAULT_BRANCH: &str = "main";

/// One `[[plugins]]` entry of the provisioning manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginSpec {
    /// `owner/repo` on the git host.
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Directory name under the plugins tree. Defaults to the repo name.
    #[serde(default)]
    pub name: Option<String>,
    /// Clone with submodules instead of fetching a source archive.
    #[serde(default)]
    pub recursive: bool,
    #[serde(default = "default_true")]
    pub install_requirements: bool,
    /// Manager plugins are installed before every other entry.
    #[serde(default)]
    pub manager: bool,
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_true() -> bool {
    true
}

impl PluginSpec {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            branch: default_branch(),
            name: None,
            recursive: false,
            install_requirements: true,
            manager: false,
        }
    }

    /// Splits `repo` into `(owner, repo)`.
    pub fn owner_and_repo(&self) -> Result<(&str, &str)> {
        match self.repo.trim_matches('/').split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok((owner, repo))
            }
            _ => Err(BootError::Config(format!(
                "Plugin source '{}' is not of the form owner/repo",
                self.repo
            ))),
        }
    }

    /// The directory name the plugin occupies under the plugins tree.
    pub fn local_name(&self) -> &str {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name;
        }
        self.repo
            .trim_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(self.repo.as_str())
    }

    /// Prefix of the single top-level directory inside the source archive.
    pub fn archive_prefix(&self) -> Result<&str> {
        self.owner_and_repo().map(|(_, repo)| repo)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Skip anything already present on the volume.
    #[default]
    KeepExisting,
    /// Replace present plugins with freshly fetched contents.
    ForceRefresh,
}

impl UpdatePolicy {
    pub fn from_force(force: bool) -> Self {
        if force {
            UpdatePolicy::ForceRefresh
        } else {
            UpdatePolicy::KeepExisting
        }
    }

    pub fn is_forced(self) -> bool {
        self == UpdatePolicy::ForceRefresh
    }
}
