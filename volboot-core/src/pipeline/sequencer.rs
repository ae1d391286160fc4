// volboot-core/src/pipeline/sequencer.rs
use tracing::{error, info, instrument, warn};
use volboot_common::config::Config;
use volboot_common::error::Result;
use volboot_common::lock::VolumeLock;
use volboot_common::manifest::InstallManifest;
use volboot_common::model::UpdatePolicy;
use volboot_common::pipeline::{BootStage, ItemKind, ItemOutcome, ProvisionReport};
use volboot_net::Fetcher;

use super::lock::{acquire_volume_lock, LockAttempt};
use crate::install::{ensure_download, ensure_model, ensure_plugin, ensure_tool_cache};
use crate::launch::Supervisor;
use crate::link::{link_or_copy, LinkMode};
use crate::seed::seed_app_tree;
use crate::update::update_components;

/// Every stage between an empty volume and launching, in order.
pub const PROVISION_STAGES: [BootStage; 5] = [
    BootStage::Seeding,
    BootStage::Updating,
    BootStage::InstallingPlugins,
    BootStage::FetchingModels,
    BootStage::LinkingAssets,
];

/// Drives the boot sequence for one container.
///
/// Only a missing default application tree and a server that never becomes
/// healthy end the sequence with an error. Every other failure is recorded
/// per item in the [`ProvisionReport`] and the sequence carries on.
pub struct Bootstrap<'a> {
    config: &'a Config,
    fetcher: Fetcher,
    policy: UpdatePolicy,
    stage: BootStage,
    lock: Option<VolumeLock>,
}

impl<'a> Bootstrap<'a> {
    pub fn new(config: &'a Config) -> Result<Self> {
        Ok(Self {
            config,
            fetcher: Fetcher::new(config)?,
            policy: UpdatePolicy::from_force(config.force_update),
            stage: BootStage::Uninitialized,
            lock: None,
        })
    }

    pub fn with_policy(mut self, policy: UpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn stage(&self) -> BootStage {
        self.stage
    }

    fn enter(&mut self, stage: BootStage) {
        info!("Boot stage: {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    /// Seeds, updates, installs, fetches and links, then returns what it did.
    pub async fn provision(&mut self) -> Result<ProvisionReport> {
        self.provision_stages(&PROVISION_STAGES).await
    }

    /// Runs the listed stages (in boot order) under the volume lock.
    #[instrument(skip_all, fields(volume = %self.config.volume_root().display()))]
    pub async fn provision_stages(&mut self, stages: &[BootStage]) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::default();
        if let Some(gpu) = &self.config.gpu_class {
            info!("GPU class: {}", gpu);
        }

        self.lock = match acquire_volume_lock(self.config).await {
            LockAttempt::Held(lock) => Some(lock),
            LockAttempt::Unavailable => None,
            LockAttempt::Busy => {
                warn!("Volume still locked by another instance; using it as is");
                report.lock_skipped = true;
                return Ok(report);
            }
        };

        let manifest_path = self.config.install_manifest_path();
        let mut manifest = InstallManifest::load(&manifest_path);
        let result = self.run_stages(stages, &mut report, &mut manifest).await;
        if let Err(e) = manifest.save_if_dirty(&manifest_path) {
            warn!("Could not write install manifest: {}", e);
        }
        self.lock = None;
        result?;

        log_summary(&report);
        Ok(report)
    }

    async fn run_stages(
        &mut self,
        stages: &[BootStage],
        report: &mut ProvisionReport,
        manifest: &mut InstallManifest,
    ) -> Result<()> {
        for stage in PROVISION_STAGES.into_iter().filter(|s| stages.contains(s)) {
            self.renew_lock();
            self.enter(stage);
            match stage {
                BootStage::Seeding => match seed_app_tree(self.config).await {
                    Ok(seeded) => report.seeded = seeded,
                    Err(e) => {
                        error!("Cannot seed the application tree: {}", e);
                        self.enter(BootStage::Aborted);
                        return Err(e);
                    }
                },
                BootStage::Updating => {
                    for (name, result) in update_components(self.config).await {
                        report.record_result(ItemKind::AppTree, name, &result);
                    }
                }
                BootStage::InstallingPlugins => self.install_plugins(report, manifest).await,
                BootStage::FetchingModels => self.fetch_models(report, manifest).await,
                BootStage::LinkingAssets => self.link_assets(report, manifest).await,
                _ => {}
            }
        }
        Ok(())
    }

    /// Refreshes the lease between items. Losing it is logged, not fatal:
    /// the remaining items are idempotent.
    fn renew_lock(&mut self) {
        if let Some(lock) = self.lock.as_mut() {
            if let Err(e) = lock.heartbeat() {
                warn!("{}", e);
                self.lock = None;
            }
        }
    }

    async fn install_plugins(&mut self, report: &mut ProvisionReport, manifest: &mut InstallManifest) {
        let config = self.config;
        for spec in config.ordered_plugins() {
            self.renew_lock();
            let result = ensure_plugin(spec, self.policy, config, &self.fetcher, manifest).await;
            if let Err(e) = &result {
                warn!("Plugin {} unavailable: {}", spec.local_name(), e);
            }
            report.record_result(ItemKind::Plugin, spec.local_name(), &result);
        }
    }

    async fn fetch_models(&mut self, report: &mut ProvisionReport, manifest: &mut InstallManifest) {
        let config = self.config;
        for spec in &config.models {
            self.renew_lock();
            let result = ensure_model(spec, config, &self.fetcher, manifest).await;
            if let Err(e) = &result {
                warn!("Model {} unavailable: {}", spec.display_id(), e);
            }
            report.record_result(ItemKind::Model, spec.display_id(), &result);
        }
        for download in &config.downloads {
            self.renew_lock();
            let id = download.dest.display().to_string();
            let result = ensure_download(download, config, &self.fetcher, manifest).await;
            if let Err(e) = &result {
                warn!("Download {} unavailable: {}", id, e);
            }
            report.record_result(ItemKind::Download, id, &result);
        }
    }

    async fn link_assets(&mut self, report: &mut ProvisionReport, manifest: &mut InstallManifest) {
        let config = self.config;
        for cache in &config.tool_caches {
            self.renew_lock();
            let result = ensure_tool_cache(cache, config, &self.fetcher, manifest).await;
            if let Err(e) = &result {
                warn!("Tool cache {} unavailable: {}", cache.name, e);
            }
            report.record_result(ItemKind::ToolCache, &cache.name, &result);

            // Linked even when the fetch failed so a later run fills it in place.
            let source = config.tool_cache_dir(cache);
            let alias = config.expand_home(&cache.alias);
            let linked = link_or_copy(&source, &alias).map(|mode| match mode {
                LinkMode::AlreadyLinked => ItemOutcome::Skipped,
                LinkMode::Linked | LinkMode::Copied => ItemOutcome::Installed,
            });
            if let Err(e) = &linked {
                warn!("Could not expose {} at {}: {}", cache.name, alias.display(), e);
            }
            report.record_result(ItemKind::Link, alias.display().to_string(), &linked);
        }
    }

    /// Starts the server and waits for it to become healthy. The stage ends
    /// as `Serving`, or `Degraded` when provisioning had failures.
    pub async fn launch(&mut self, report: &ProvisionReport) -> Result<Supervisor> {
        self.enter(BootStage::Launching);
        match Supervisor::start(self.config).await {
            Ok(supervisor) => {
                if report.is_degraded() {
                    self.enter(BootStage::Degraded);
                } else {
                    self.enter(BootStage::Serving);
                }
                Ok(supervisor)
            }
            Err(e) => {
                error!("Server failed to start: {}", e);
                self.enter(BootStage::Aborted);
                Err(e)
            }
        }
    }

    /// The whole sequence. The returned supervisor owns the running server.
    pub async fn run(&mut self) -> Result<(ProvisionReport, Supervisor)> {
        let report = self.provision().await?;
        let supervisor = self.launch(&report).await?;
        Ok((report, supervisor))
    }
}

fn log_summary(report: &ProvisionReport) {
    let installed = report
        .items
        .iter()
        .filter(|i| i.outcome == ItemOutcome::Installed)
        .count();
    let skipped = report
        .items
        .iter()
        .filter(|i| i.outcome == ItemOutcome::Skipped)
        .count();
    let failed = report.failures().count();
    info!(
        "Provisioning finished: {} installed, {} already present, {} failed",
        installed, skipped, failed
    );
    for item in report.failures() {
        if let ItemOutcome::Failed(reason) = &item.outcome {
            warn!("  {:?} {}: {}", item.kind, item.id, reason);
        }
    }
}
