// volboot-core/src/install/plugin.rs
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};
use volboot_aio::{
    check_symlink_exists, clone_recursive_async, create_dir_all, move_dir,
    place_archive_async, remove_path, run_checked,
};
use volboot_common::config::Config;
use volboot_common::error::Result;
use volboot_common::manifest::{InstallManifest, InstallMethod, InstallRecord};
use volboot_common::model::{PluginSpec, UpdatePolicy};
use volboot_common::pipeline::ItemOutcome;
use volboot_net::{git_archive_url, git_clone_url, Fetcher};

use super::fetch_archive_staged;

const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Makes sure the plugin directory exists.
///
/// A present directory is left alone (no network I/O) unless `policy`
/// forces a refresh. Otherwise the plugin is fetched and placed, replacing
/// any previous contents. On failure no partially placed directory is left
/// behind. Installing its Python requirements is best effort.
pub async fn ensure_plugin(
    spec: &PluginSpec,
    policy: UpdatePolicy,
    config: &Config,
    fetcher: &Fetcher,
    manifest: &mut InstallManifest,
) -> Result<ItemOutcome> {
    let name = spec.local_name();
    let dest = config.plugin_path(name);
    let key = InstallManifest::plugin_key(name);
    let existed = check_symlink_exists(&dest);

    if existed && !policy.is_forced() {
        debug!("Plugin {} present at {}; skipping", name, dest.display());
        return Ok(ItemOutcome::Skipped);
    }

    info!(
        "{} plugin {} from {}@{}",
        if existed { "Refreshing" } else { "Installing" },
        name,
        spec.repo,
        spec.branch
    );

    let placed = if spec.recursive {
        clone_into_place(spec, config, &dest).await
    } else {
        fetch_into_place(spec, config, fetcher, &dest).await
    };

    let method = match placed {
        Ok(method) => method,
        Err(e) => {
            if !existed && check_symlink_exists(&dest) {
                debug!("Cleaning up partial plugin directory {}", dest.display());
                if let Err(cleanup) = remove_path(&dest) {
                    warn!("Failed to clean up {}: {}", dest.display(), cleanup);
                }
            }
            if !check_symlink_exists(&dest) {
                manifest.remove(&key);
            }
            return Err(e);
        }
    };

    if spec.install_requirements {
        install_requirements(&dest, config).await;
    }

    manifest.record(
        key,
        InstallRecord {
            source: spec.repo.clone(),
            reference: Some(spec.branch.clone()),
            method,
            path: dest.clone(),
            installed_at: Utc::now(),
        },
    );
    info!("Plugin {} ready at {}", name, dest.display());
    Ok(ItemOutcome::Installed)
}

async fn fetch_into_place(
    spec: &PluginSpec,
    config: &Config,
    fetcher: &Fetcher,
    dest: &Path,
) -> Result<InstallMethod> {
    let (owner, repo) = spec.owner_and_repo()?;
    let url = git_archive_url(&config.registries.git_base, owner, repo, &spec.branch);
    let staging = config.staging_dir();
    let archive_name = format!("{}-{}.zip", repo, spec.branch.replace('/', "-"));

    let (_scratch, archive) = fetch_archive_staged(fetcher, &url, &staging, &archive_name).await?;
    place_archive_async(
        archive,
        Some(spec.archive_prefix()?.to_string()),
        dest.to_path_buf(),
        staging,
    )
    .await?;
    Ok(InstallMethod::Archive)
}

async fn clone_into_place(spec: &PluginSpec, config: &Config, dest: &Path) -> Result<InstallMethod> {
    let (owner, repo) = spec.owner_and_repo()?;
    let url = git_clone_url(&config.registries.git_base, owner, repo);
    let staging = config.staging_dir();
    create_dir_all(&staging)?;
    let scratch = tempfile::Builder::new()
        .prefix(".clone-")
        .tempdir_in(&staging)?;
    let checkout: PathBuf = scratch.path().join(repo);

    clone_recursive_async(url, spec.branch.clone(), checkout.clone()).await?;

    if let Some(parent) = dest.parent() {
        create_dir_all(parent)?;
    }
    remove_path(dest)?;
    move_dir(&checkout, dest)?;
    Ok(InstallMethod::GitClone)
}

async fn install_requirements(plugin_dir: &Path, config: &Config) {
    let requirements = plugin_dir.join(REQUIREMENTS_FILE);
    if !requirements.is_file() {
        return;
    }
    let args = vec![
        "-m".to_string(),
        "pip".to_string(),
        "install".to_string(),
        "-r".to_string(),
        requirements.to_string_lossy().to_string(),
    ];
    debug!("Installing requirements from {}", requirements.display());
    match run_checked(
        &config.server.python,
        &args,
        Some(plugin_dir.to_path_buf()),
        None,
    )
    .await
    {
        Ok(_) => debug!("Requirements installed for {}", plugin_dir.display()),
        Err(e) => warn!(
            "Requirements install failed for {}: {}",
            plugin_dir.display(),
            e
        ),
    }
}
