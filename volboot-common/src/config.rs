// volboot-common/src/config.rs
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::UserDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BootError, Result};
use crate::model::{ModelSpec, PluginSpec, RawDownload, ToolCache};

const DEFAULT_VOLUME_ROOT: &str = "/data";
const DEFAULT_APP_SOURCE: &str = "/root/comfy/ComfyUI";
const DEFAULT_APP_DIR_NAME: &str = "ComfyUI";
const DEFAULT_MARKER_FILENAME: &str = "main.py";
const STATE_DIR_NAME: &str = ".volboot";

pub const DEFAULT_CONFIG_PATH: &str = "volboot.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VolumeSettings {
    pub root: PathBuf,
    /// Baked-in application tree copied onto an empty volume.
    pub default_app: PathBuf,
    pub app_dir_name: String,
    /// File inside the application tree whose presence means "seeded".
    pub marker: String,
    /// Fast-forward the application tree and manager plugins on every boot.
    pub update_app: bool,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_VOLUME_ROOT),
            default_app: PathBuf::from(DEFAULT_APP_SOURCE),
            app_dir_name: DEFAULT_APP_DIR_NAME.to_string(),
            marker: DEFAULT_MARKER_FILENAME.to_string(),
            update_app: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Registries {
    /// Git host serving `/{owner}/{repo}/archive/refs/heads/{branch}.zip`.
    pub git_base: String,
    /// Model host serving `/{id}/resolve/main/{path}`.
    pub model_base: String,
    pub model_token: Option<String>,
}

impl Default for Registries {
    fn default() -> Self {
        Self {
            git_base: "https://github.com".to_string(),
            model_base: "https://huggingface.co".to_string(),
            model_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FetchSettings {
    pub retries: u32,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Backoff before attempt `n + 1` is `n * backoff_base_ms`.
    pub backoff_base_ms: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            retries: 5,
            timeout_secs: 60,
            connect_timeout_secs: 30,
            backoff_base_ms: 2000,
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(u64::from(attempt)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    pub program: String,
    /// Argument vector. `{host}`, `{port}`, `{output_dir}` and `{temp_dir}`
    /// are substituted at launch.
    pub args: Vec<String>,
    pub host: String,
    pub port: u16,
    pub status_path: String,
    pub health_attempts: u32,
    pub health_interval_ms: u64,
    pub max_restarts: u32,
    /// Interpreter used for dependency manifests.
    pub python: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: [
                "main.py",
                "--listen",
                "{host}",
                "--port",
                "{port}",
                "--output-directory",
                "{output_dir}",
                "--temp-directory",
                "{temp_dir}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            host: "0.0.0.0".to_string(),
            port: 8188,
            status_path: "/system_stats".to_string(),
            health_attempts: 60,
            health_interval_ms: 1000,
            max_restarts: 3,
            python: "python3".to_string(),
        }
    }
}

impl ServerSettings {
    /// Base URL used to talk to the server from inside the container.
    pub fn local_base_url(&self) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" | "::" | "" => "127.0.0.1",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FrontendSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// JSON job graph with `{{prompt}}`-style placeholders.
    pub workflow_template: Option<PathBuf>,
    pub job_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for FrontendSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "0.0.0.0".to_string(),
            port: 8000,
            workflow_template: None,
            job_timeout_secs: 180,
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockSettings {
    /// humantime duration, e.g. `15m`.
    pub stale_after: String,
    pub wait: String,
    pub poll_interval_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            stale_after: "15m".to_string(),
            wait: "5m".to_string(),
            poll_interval_ms: 2000,
        }
    }
}

impl LockSettings {
    pub fn stale_after(&self) -> Result<Duration> {
        parse_duration("lock.stale_after", &self.stale_after)
    }

    pub fn wait(&self) -> Result<Duration> {
        parse_duration("lock.wait", &self.wait)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| BootError::Config(format!("Invalid duration for {key} ('{value}'): {e}")))
}

/// Ordered package and command list handed to the container image builder.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImageSpec {
    pub packages: Vec<String>,
    pub commands: Vec<String>,
}

/// On-disk shape of `volboot.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct ManifestFile {
    volume: VolumeSettings,
    registries: Registries,
    fetch: FetchSettings,
    server: ServerSettings,
    frontend: FrontendSettings,
    lock: LockSettings,
    image: ImageSpec,
    plugins: Vec<PluginSpec>,
    models: Vec<ModelSpec>,
    downloads: Vec<RawDownload>,
    tool_caches: Vec<ToolCache>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub volume: VolumeSettings,
    pub registries: Registries,
    pub fetch: FetchSettings,
    pub server: ServerSettings,
    pub frontend: FrontendSettings,
    pub lock: LockSettings,
    pub image: ImageSpec,
    pub plugins: Vec<PluginSpec>,
    pub models: Vec<ModelSpec>,
    pub downloads: Vec<RawDownload>,
    pub tool_caches: Vec<ToolCache>,
    pub gpu_class: Option<String>,
    pub force_update: bool,
    pub output_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
}

impl Config {
    /// Reads the manifest (when present) and applies `VOLBOOT_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        debug!("Loading volboot configuration");
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var("VOLBOOT_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.is_file() {
            debug!("Reading provisioning manifest {}", path.display());
            let raw = fs::read_to_string(&path).map_err(|e| {
                BootError::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            Self::from_toml(&raw)?
        } else {
            debug!(
                "No manifest at {}, using built-in defaults",
                path.display()
            );
            Self::from_toml("")?
        };

        config.apply_env(|key| env::var(key).ok());
        config.validate()?;
        debug!(
            "Configuration loaded: volume={}, {} plugins, {} models",
            config.volume.root.display(),
            config.plugins.len(),
            config.models.len()
        );
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let file: ManifestFile = toml::from_str(raw)?;
        Ok(Self::from_manifest(file))
    }

    fn from_manifest(file: ManifestFile) -> Self {
        Self {
            volume: file.volume,
            registries: file.registries,
            fetch: file.fetch,
            server: file.server,
            frontend: file.frontend,
            lock: file.lock,
            image: file.image,
            plugins: file.plugins,
            models: file.models,
            downloads: file.downloads,
            tool_caches: file.tool_caches,
            gpu_class: None,
            force_update: false,
            output_dir: None,
            temp_dir: None,
        }
    }

    /// Defaults rooted at `root`, mostly for tests and one-off tooling.
    pub fn for_volume(root: impl Into<PathBuf>) -> Self {
        let mut config = Self::from_manifest(ManifestFile::default());
        config.volume.root = root.into();
        config
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(root) = non_empty("VOLBOOT_ROOT") {
            self.volume.root = PathBuf::from(root);
        }
        if let Some(gpu) = non_empty("VOLBOOT_GPU") {
            self.gpu_class = Some(gpu);
        }
        if let Some(force) = non_empty("VOLBOOT_FORCE_UPDATE") {
            self.force_update = matches!(
                force.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
        if let Some(dir) = non_empty("VOLBOOT_OUTPUT_DIR") {
            self.output_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = non_empty("VOLBOOT_TEMP_DIR") {
            self.temp_dir = Some(PathBuf::from(dir));
        }
        if let Some(token) = non_empty("HF_TOKEN") {
            self.registries.model_token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        single_component("volume.app_dir_name", &self.volume.app_dir_name)?;
        if self.server.health_attempts == 0 {
            return Err(BootError::Config(
                "server.health_attempts must be at least 1".to_string(),
            ));
        }
        for plugin in &self.plugins {
            plugin.owner_and_repo()?;
            single_component("plugins.name", plugin.local_name())?;
        }
        for model in &self.models {
            single_component("models.subdir", &model.subdir)?;
            single_component("models.filename", &model.filename)?;
        }
        self.lock.stale_after()?;
        self.lock.wait()?;
        Ok(())
    }

    pub fn volume_root(&self) -> &Path {
        &self.volume.root
    }

    pub fn app_dir(&self) -> PathBuf {
        self.volume.root.join(&self.volume.app_dir_name)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.app_dir().join(&self.volume.marker)
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.app_dir().join("custom_nodes")
    }

    pub fn plugin_path(&self, local_name: &str) -> PathBuf {
        self.plugins_dir().join(local_name)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.app_dir().join("models")
    }

    pub fn model_path(&self, subdir: &str, filename: &str) -> PathBuf {
        self.models_dir().join(subdir).join(filename)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.volume.root.join("output"))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.volume.root.join("temp"))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.volume.root.join(STATE_DIR_NAME)
    }

    /// Scratch space for downloads and extraction. Lives on the volume so
    /// the final move into place is a rename.
    pub fn staging_dir(&self) -> PathBuf {
        self.state_dir().join("staging")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }

    pub fn install_manifest_path(&self) -> PathBuf {
        self.state_dir().join("installed.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join("provision.lock")
    }

    pub fn tool_cache_dir(&self, cache: &ToolCache) -> PathBuf {
        self.volume.root.join(&cache.volume_subdir)
    }

    /// Resolves a `~/`-prefixed alias against the current user's home.
    pub fn expand_home(&self, path: &Path) -> PathBuf {
        match path.strip_prefix("~") {
            Ok(rest) => self.home_dir().join(rest),
            Err(_) => path.to_path_buf(),
        }
    }

    pub fn home_dir(&self) -> PathBuf {
        UserDirs::new().map_or_else(|| PathBuf::from("/root"), |ud| ud.home_dir().to_path_buf())
    }

    /// Plugins in install order: managers first, declaration order otherwise.
    pub fn ordered_plugins(&self) -> Vec<&PluginSpec> {
        let (managers, others): (Vec<&PluginSpec>, Vec<&PluginSpec>) =
            self.plugins.iter().partition(|p| p.manager);
        managers.into_iter().chain(others).collect()
    }
}

/// Names joined onto volume paths must not climb out of or alias their parent.
fn single_component(key: &str, value: &str) -> Result<()> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(BootError::Config(format!(
            "{key} '{value}' must be a single path component"
        )));
    }
    Ok(())
}
