// volboot-core/src/install/model.rs
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};
use volboot_aio::{file_size, move_file};
use volboot_common::config::Config;
use volboot_common::error::{BootError, Result};
use volboot_common::manifest::{InstallManifest, InstallMethod, InstallRecord};
use volboot_common::model::{ModelSpec, RawDownload};
use volboot_common::pipeline::ItemOutcome;
use volboot_net::{model_file_url, verify_checksum, Fetcher};

use super::fetch_staged;

/// Makes sure a model weight file is present and at least its minimum size.
/// Smaller files (empty or truncated downloads) are fetched again. The new
/// file is staged on the volume and renamed into place.
pub async fn ensure_model(
    spec: &ModelSpec,
    config: &Config,
    fetcher: &Fetcher,
    manifest: &mut InstallManifest,
) -> Result<ItemOutcome> {
    let dest = config.model_path(&spec.subdir, &spec.filename);
    if is_present(&dest, spec.min_valid_size()) {
        debug!("Model {} present; skipping", spec.display_id());
        return Ok(ItemOutcome::Skipped);
    }

    let url = model_file_url(
        &config.registries.model_base,
        &spec.registry_id,
        spec.subfolder.as_deref(),
        &spec.filename,
    );
    info!("Fetching model {} from {}", spec.display_id(), url);
    stage_and_place(
        fetcher,
        &url,
        &dest,
        spec.min_valid_size(),
        spec.sha256.as_deref(),
        config,
    )
    .await?;

    manifest.record(
        InstallManifest::model_key(&spec.subdir, &spec.filename),
        InstallRecord {
            source: spec.registry_id.clone(),
            reference: spec.subfolder.clone(),
            method: InstallMethod::Download,
            path: dest,
            installed_at: Utc::now(),
        },
    );
    Ok(ItemOutcome::Installed)
}

/// Same gate and placement as [`ensure_model`] for a plain URL.
pub async fn ensure_download(
    download: &RawDownload,
    config: &Config,
    fetcher: &Fetcher,
    manifest: &mut InstallManifest,
) -> Result<ItemOutcome> {
    let dest = download_path(download, config)?;
    if is_present(&dest, download.min_valid_size()) {
        debug!("Download {} present; skipping", dest.display());
        return Ok(ItemOutcome::Skipped);
    }

    info!("Fetching {} into {}", download.url, dest.display());
    stage_and_place(
        fetcher,
        &download.url,
        &dest,
        download.min_valid_size(),
        download.sha256.as_deref(),
        config,
    )
    .await?;

    manifest.record(
        format!("download:{}", download.dest.display()),
        InstallRecord {
            source: download.url.clone(),
            reference: None,
            method: InstallMethod::Download,
            path: dest,
            installed_at: Utc::now(),
        },
    );
    Ok(ItemOutcome::Installed)
}

/// Destination of a raw download. Must stay inside the models tree.
pub fn download_path(download: &RawDownload, config: &Config) -> Result<PathBuf> {
    let escapes = download
        .dest
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || download.dest.as_os_str().is_empty() {
        return Err(BootError::Config(format!(
            "download destination '{}' must be a relative path inside the models tree",
            download.dest.display()
        )));
    }
    Ok(config.models_dir().join(&download.dest))
}

fn is_present(dest: &Path, min_size: u64) -> bool {
    match file_size(dest) {
        Some(size) if size >= min_size => true,
        Some(size) => {
            warn!(
                "{} is {} bytes (minimum {}); treating as missing",
                dest.display(),
                size,
                min_size
            );
            false
        }
        None => false,
    }
}

async fn stage_and_place(
    fetcher: &Fetcher,
    url: &str,
    dest: &Path,
    min_size: u64,
    sha256: Option<&str>,
    config: &Config,
) -> Result<()> {
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    let (_scratch, staged) = fetch_staged(fetcher, url, &config.staging_dir(), &file_name).await?;

    let size = file_size(&staged).unwrap_or(0);
    if size < min_size {
        return Err(BootError::CorruptArtifact(
            file_name,
            format!("downloaded {size} bytes, expected at least {min_size}"),
        ));
    }
    if let Some(expected) = sha256 {
        verify_checksum(&staged, expected)?;
    }
    move_file(&staged, dest)?;
    debug!("Placed {} ({} bytes)", dest.display(), size);
    Ok(())
}
