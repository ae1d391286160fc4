/*
File: volboot-aio/src/fs.rs
Purpose: Primitive synchronous filesystem operations.
*/
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};
use volboot_common::error::{BootError, Result};
use walkdir::WalkDir;

/// Checks if a path exists without following symlinks.
pub fn check_symlink_exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// True for a directory with at least one entry (following symlinks).
pub fn is_nonempty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Creates a directory and all its parent components if they are missing.
pub fn create_dir_all(path: &Path) -> Result<()> {
    debug!("Creating directory recursively: {}", path.display());
    fs::create_dir_all(path).map_err(|e| {
        error!("Failed create dir {}: {}", path.display(), e);
        BootError::from(e)
    })
}

/// Removes whatever sits at `path`: a symlink (not its target), a file, or
/// a directory tree. A missing path is not an error.
pub fn remove_path(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    debug!("Removing existing path: {}", path.display());
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => {
            error!("Failed to remove {}: {}", path.display(), e);
            Err(e.into())
        }
    }
}

/// Creates a symbolic link at `link` pointing to `target`.
#[cfg(unix)]
pub fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    debug!("Creating symlink {} -> {}", link.display(), target.display());
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
pub fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    warn!(
        "Symlink creation not supported on this platform: {} -> {}",
        link.display(),
        target.display()
    );
    Err(io::Error::new(
        ErrorKind::Unsupported,
        "symlinks not supported on this platform",
    ))
}

/// Recursively copies `src` into `dst`, overwriting files that already
/// exist. Symlinks inside `src` are followed.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<u64> {
    debug!("Copying {} -> {}", src.display(), dst.display());
    let mut copied = 0u64;
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| {
            BootError::IoError(format!("Failed walking {}: {}", src.display(), e))
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| BootError::Generic(format!("Path outside copy root: {e}")))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            if fs::symlink_metadata(&target).is_ok_and(|m| m.is_dir()) {
                fs::remove_dir_all(&target)?;
            }
            fs::copy(entry.path(), &target).map_err(|e| {
                BootError::IoError(format!(
                    "Failed to copy {} to {}: {}",
                    entry.path().display(),
                    target.display(),
                    e
                ))
            })?;
            copied += 1;
        }
    }
    debug!("Copied {} files into {}", copied, dst.display());
    Ok(copied)
}

/// Moves a directory. Falls back to copy + delete when a rename is not
/// possible (e.g. across filesystems).
pub fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => {
            debug!("Renamed {} -> {}", src.display(), dst.display());
            Ok(())
        }
        Err(e) => {
            warn!(
                "Rename {} -> {} failed ({}); copying instead",
                src.display(),
                dst.display(),
                e
            );
            if let Err(copy_err) = copy_dir_recursive(src, dst) {
                let _ = remove_path(dst);
                return Err(copy_err);
            }
            remove_path(src)
        }
    }
}

/// Moves a single file into place, replacing anything already there.
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        create_dir_all(parent)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(
                "Rename {} -> {} failed ({}); copying instead",
                src.display(),
                dst.display(),
                e
            );
            // Copy beside the destination so the final step is still a rename.
            let sibling = dst.with_file_name(format!(
                ".{}.partial",
                dst.file_name().unwrap_or_default().to_string_lossy()
            ));
            fs::copy(src, &sibling)?;
            fs::rename(&sibling, dst)?;
            fs::remove_file(src)?;
            Ok(())
        }
    }
}

/// Number of regular files and their total size under `path`.
pub fn tree_stats(path: &Path) -> Result<(u64, u64)> {
    let mut files = 0u64;
    let mut bytes = 0u64;
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry.map_err(|e| {
            BootError::IoError(format!("Failed walking {}: {}", path.display(), e))
        })?;
        if entry.file_type().is_file() {
            files += 1;
            bytes += entry
                .metadata()
                .map_err(|e| BootError::IoError(e.to_string()))?
                .len();
        }
    }
    Ok((files, bytes))
}

/// File size, or `None` when the path is missing or not a regular file.
pub fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}

/// Lists immediate subdirectories of `dir`. Unreadable entries are skipped.
pub fn list_subdirectories(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                if path.is_dir() {
                    dirs.push((entry.file_name().to_string_lossy().to_string(), path));
                }
            }
            Err(e) => warn!("Error reading entry in {}: {}", dir.display(), e),
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_and_stats_match() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested/deeper")).unwrap();
        fs::write(src.join("a.txt"), b"hello").unwrap();
        fs::write(src.join("nested/deeper/b.bin"), vec![1u8; 4096]).unwrap();

        let dst = dir.path().join("dst");
        let copied = copy_dir_recursive(&src, &dst).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(tree_stats(&src).unwrap(), tree_stats(&dst).unwrap());
        assert_eq!(tree_stats(&dst).unwrap(), (2, 4101));
    }

    #[test]
    fn remove_path_handles_every_kind() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        let tree = dir.path().join("t");
        fs::create_dir_all(tree.join("x")).unwrap();

        remove_path(&file).unwrap();
        remove_path(&tree).unwrap();
        remove_path(&dir.path().join("missing")).unwrap();
        assert!(!file.exists());
        assert!(!tree.exists());
    }

    #[cfg(unix)]
    #[test]
    fn remove_path_on_symlink_keeps_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("keep"), b"1").unwrap();
        let link = dir.path().join("link");
        create_symlink(&target, &link).unwrap();

        remove_path(&link).unwrap();
        assert!(!check_symlink_exists(&link));
        assert!(target.join("keep").exists());
    }

    #[test]
    fn move_file_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("staging.bin");
        let dst = dir.path().join("models").join("final.bin");
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::write(&dst, b"old").unwrap();
        fs::write(&src, b"new").unwrap();

        move_file(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"new");
        assert!(!src.exists());
    }
}
