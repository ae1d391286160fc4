// volboot-aio/src/extract.rs
// Archive extraction and placement of the extracted tree.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, error, warn};
use volboot_common::error::{BootError, Result};
use zip::ZipArchive;

use crate::fs::{create_dir_all, list_subdirectories, move_dir, remove_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    Tar,
}

impl ArchiveKind {
    /// Infers the archive type from the file name.
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".zip") {
            Ok(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(ArchiveKind::TarGz)
        } else if name.ends_with(".tar") {
            Ok(ArchiveKind::Tar)
        } else {
            Err(BootError::ExtractError(format!(
                "Unsupported archive type for '{}'",
                path.display()
            )))
        }
    }

    /// Extension as reported by content sniffing.
    pub fn sniffed_extension(self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::TarGz => "gz",
            ArchiveKind::Tar => "tar",
        }
    }
}

/// Extracts `archive_path` into `target_dir`.
pub fn extract_archive(archive_path: &Path, target_dir: &Path) -> Result<()> {
    let kind = ArchiveKind::from_path(archive_path)?;
    debug!(
        "Extracting archive '{}' ({:?}) to '{}'",
        archive_path.display(),
        kind,
        target_dir.display()
    );
    create_dir_all(target_dir)?;
    let file = File::open(archive_path).map_err(|e| {
        BootError::ExtractError(format!(
            "Failed to open archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;

    match kind {
        ArchiveKind::Zip => extract_zip(file, target_dir, archive_path),
        ArchiveKind::TarGz => extract_tar(GzDecoder::new(file), target_dir, archive_path),
        ArchiveKind::Tar => extract_tar(file, target_dir, archive_path),
    }
}

fn extract_tar<R: Read>(reader: R, target_dir: &Path, archive_path: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.unpack(target_dir).map_err(|e| {
        BootError::ExtractError(format!(
            "Failed to unpack TAR {}: {}",
            archive_path.display(),
            e
        ))
    })
}

fn extract_zip(file: File, target_dir: &Path, archive_path: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(file).map_err(|e| {
        BootError::ExtractError(format!(
            "Failed to open ZIP {}: {}",
            archive_path.display(),
            e
        ))
    })?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| {
            BootError::ExtractError(format!(
                "Failed to access ZIP entry {} in {}: {}",
                i,
                archive_path.display(),
                e
            ))
        })?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            error!(
                "Unsafe path '{}' in ZIP {}",
                entry.name(),
                archive_path.display()
            );
            BootError::ExtractError(format!("Unsafe ZIP entry path '{}'", entry.name()))
        })?;
        let outpath = safe_join(target_dir, &relative)?;

        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        io::copy(&mut entry, &mut outfile).map_err(|e| {
            BootError::ExtractError(format!(
                "Failed to write ZIP entry {}: {}",
                outpath.display(),
                e
            ))
        })?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&outpath, fs::Permissions::from_mode(mode)) {
                warn!("Failed set permissions on {}: {}", outpath.display(), e);
            }
        }
    }
    Ok(())
}

fn safe_join(root: &Path, relative: &Path) -> Result<PathBuf> {
    let mut out = root.to_path_buf();
    for comp in relative.components() {
        match comp {
            Component::Normal(p) => out.push(p),
            Component::CurDir => {}
            _ => {
                return Err(BootError::ExtractError(format!(
                    "Unsafe path component in {}",
                    relative.display()
                )))
            }
        }
    }
    Ok(out)
}

/// Extracts `archive_path` into a scratch directory under `scratch_root`
/// and moves the result to `dest`, replacing whatever was there.
///
/// With `prefix = Some(p)` the archive must hold exactly one top-level
/// directory whose name starts with `p`; that directory becomes `dest`.
/// With `None` the archive's root contents become `dest`.
///
/// The scratch directory is always removed. On error `dest` is untouched
/// unless the failure happened after it was cleared.
pub fn place_archive(
    archive_path: &Path,
    prefix: Option<&str>,
    dest: &Path,
    scratch_root: &Path,
) -> Result<PathBuf> {
    create_dir_all(scratch_root)?;
    let scratch = tempfile::Builder::new()
        .prefix(".unpack-")
        .tempdir_in(scratch_root)?;
    let unpack_root = scratch.path().join("root");
    extract_archive(archive_path, &unpack_root)?;

    let source = match prefix {
        Some(prefix) => find_prefixed_dir(&unpack_root, prefix, archive_path)?,
        None => unpack_root,
    };

    if let Some(parent) = dest.parent() {
        create_dir_all(parent)?;
    }
    remove_path(dest)?;
    move_dir(&source, dest)?;
    debug!("Placed {} at {}", archive_path.display(), dest.display());
    // `scratch` drops here and takes any leftovers with it.
    Ok(dest.to_path_buf())
}

fn find_prefixed_dir(root: &Path, prefix: &str, archive_path: &Path) -> Result<PathBuf> {
    let mut matches: Vec<PathBuf> = list_subdirectories(root)?
        .into_iter()
        .filter(|(name, _)| name.starts_with(prefix))
        .map(|(_, path)| path)
        .collect();
    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(BootError::CorruptArtifact(
            archive_path.display().to_string(),
            format!("no top-level directory starting with '{prefix}'"),
        )),
        n => Err(BootError::CorruptArtifact(
            archive_path.display().to_string(),
            format!("{n} top-level directories start with '{prefix}'"),
        )),
    }
}

/// Runs [`place_archive`] on the blocking pool.
pub async fn place_archive_async(
    archive_path: PathBuf,
    prefix: Option<String>,
    dest: PathBuf,
    scratch_root: PathBuf,
) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || {
        place_archive(&archive_path, prefix.as_deref(), &dest, &scratch_root)
    })
    .await
    .map_err(|e| BootError::Generic(format!("JoinError in archive placement: {e}")))?
}
