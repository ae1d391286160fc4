// volboot-core/src/update.rs
use std::path::PathBuf;

use tracing::{debug, info, warn};
use volboot_aio::{update_repo_async, UpdateOutcome};
use volboot_common::config::Config;
use volboot_common::error::Result;
use volboot_common::pipeline::ItemOutcome;

/// Fast-forwards the application tree and any manager plugins that are git
/// checkouts. Each entry is `(name, result)`; failures are for logging only
/// and never stop the boot.
pub async fn update_components(config: &Config) -> Vec<(String, Result<ItemOutcome>)> {
    if !config.volume.update_app {
        debug!("Application updates disabled");
        return Vec::new();
    }

    let mut targets: Vec<(String, PathBuf)> =
        vec![(config.volume.app_dir_name.clone(), config.app_dir())];
    for plugin in config.plugins.iter().filter(|p| p.manager) {
        targets.push((
            plugin.local_name().to_string(),
            config.plugin_path(plugin.local_name()),
        ));
    }

    let mut results = Vec::new();
    for (name, path) in targets {
        if !path.join(".git").exists() {
            debug!("{} is not a git checkout; skipping update", path.display());
            continue;
        }
        let result = update_repo_async(path.clone()).await.map(|outcome| match outcome {
            UpdateOutcome::UpToDate => ItemOutcome::Skipped,
            UpdateOutcome::FastForwarded { from, to } => {
                info!("Updated {} ({} -> {})", name, short(from), short(to));
                ItemOutcome::Installed
            }
            UpdateOutcome::Diverged => ItemOutcome::Skipped,
        });
        if let Err(e) = &result {
            warn!("Update of {} failed, keeping current revision: {}", name, e);
        }
        results.push((name, result));
    }
    results
}

fn short(oid: impl ToString) -> String {
    oid.to_string().chars().take(8).collect()
}
