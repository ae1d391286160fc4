// volboot-core/src/seed.rs
use std::path::Path;

use tracing::{debug, info};
use volboot_aio::{copy_dir_recursive, create_dir_all, move_dir, move_file};
use volboot_common::config::Config;
use volboot_common::error::{BootError, Result};

/// Copies the baked-in application tree onto the volume unless the marker
/// file is already there. Returns `true` when a copy happened.
///
/// The copy is staged on the volume first and only moved into place once it
/// is complete, with the marker written last, so an interrupted seed is
/// retried on the next start instead of being mistaken for a finished one.
///
/// A missing default tree is a broken image and fails with
/// [`BootError::SeedError`].
pub async fn seed_app_tree(config: &Config) -> Result<bool> {
    let marker = config.marker_path();
    if marker.is_file() {
        debug!("Application marker {} present; not seeding", marker.display());
        return Ok(false);
    }

    let source = config.volume.default_app.clone();
    let dest = config.app_dir();
    if !source.is_dir() {
        return Err(BootError::SeedError(format!(
            "default application tree {} does not exist",
            source.display()
        )));
    }

    info!(
        "Seeding volume: copying {} to {}",
        source.display(),
        dest.display()
    );
    let staging = config.staging_dir();
    let marker_name = config.volume.marker.clone();
    let (src, dst) = (source.clone(), dest.clone());
    let copied = tokio::task::spawn_blocking(move || {
        stage_and_place(&src, &dst, &staging, &marker_name)
    })
    .await
    .map_err(|e| BootError::Generic(format!("JoinError while seeding: {e}")))?
    .map_err(|e| match e {
        BootError::SeedError(_) => e,
        other => BootError::SeedError(other.to_string()),
    })?;

    info!("Seeded {} files into {}", copied, dest.display());
    Ok(true)
}

fn stage_and_place(source: &Path, dest: &Path, staging: &Path, marker_name: &str) -> Result<u64> {
    create_dir_all(staging)?;
    let scratch = tempfile::Builder::new()
        .prefix(".seed-")
        .tempdir_in(staging)?;
    let tree = scratch.path().join("tree");
    let copied = copy_dir_recursive(source, &tree).map_err(|e| {
        BootError::SeedError(format!("copy from {} failed: {e}", source.display()))
    })?;

    let staged_marker = tree.join(marker_name);
    if !staged_marker.is_file() {
        return Err(BootError::SeedError(format!(
            "default application tree {} has no {}",
            source.display(),
            marker_name
        )));
    }

    if !dest.exists() {
        if let Some(parent) = dest.parent() {
            create_dir_all(parent)?;
        }
        move_dir(&tree, dest)?;
        return Ok(copied);
    }

    // Leftovers from an earlier run (plugins, models) are kept; the tree is
    // laid over them and the marker goes in last.
    debug!("Merging seed into existing {}", dest.display());
    let held_marker = scratch.path().join(marker_name);
    move_file(&staged_marker, &held_marker)?;
    copy_dir_recursive(&tree, dest)?;
    move_file(&held_marker, &dest.join(marker_name))?;
    Ok(copied)
}
