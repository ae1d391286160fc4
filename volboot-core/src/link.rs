// volboot-core/src/link.rs
//! Makes a fixed path that a third-party tool hard-codes resolve to a
//! directory on the volume.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};
use volboot_aio::{
    check_symlink_exists, copy_dir_recursive, create_dir_all, create_symlink, remove_path,
};
use volboot_common::error::{BootError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// The alias was already a link to the source; nothing was touched.
    AlreadyLinked,
    Linked,
    /// Symlinking failed and the source was copied instead.
    Copied,
}

/// Points `alias` at `source` with a symlink, or copies `source` to `alias`
/// when links are not available. Safe to call on every start.
pub fn link_or_copy(source: &Path, alias: &Path) -> Result<LinkMode> {
    link_or_copy_with(source, alias, create_symlink)
}

/// [`link_or_copy`] with the link primitive supplied by the caller.
pub fn link_or_copy_with<F>(source: &Path, alias: &Path, make_link: F) -> Result<LinkMode>
where
    F: Fn(&Path, &Path) -> io::Result<()>,
{
    create_dir_all(source)?;
    if let Some(parent) = alias.parent() {
        create_dir_all(parent)?;
    }

    if is_link_to(alias, source) {
        debug!("{} already links to {}", alias.display(), source.display());
        return Ok(LinkMode::AlreadyLinked);
    }

    if check_symlink_exists(alias) {
        debug!("Removing stale alias {}", alias.display());
        remove_path(alias)?;
    }

    match make_link(source, alias) {
        Ok(()) => {
            debug!("Linked {} -> {}", alias.display(), source.display());
            Ok(LinkMode::Linked)
        }
        Err(e) => {
            warn!(
                "Could not link {} -> {} ({}); copying instead",
                alias.display(),
                source.display(),
                e
            );
            // A failed link attempt may leave something behind.
            remove_path(alias)?;
            copy_dir_recursive(source, alias).map_err(|copy_err| {
                BootError::LinkError(format!(
                    "Symlink failed ({e}) and copy of {} to {} failed: {copy_err}",
                    source.display(),
                    alias.display()
                ))
            })?;
            Ok(LinkMode::Copied)
        }
    }
}

fn is_link_to(alias: &Path, source: &Path) -> bool {
    let Ok(meta) = fs::symlink_metadata(alias) else {
        return false;
    };
    if !meta.file_type().is_symlink() {
        return false;
    }
    match (fs::canonicalize(alias), fs::canonicalize(source)) {
        (Ok(a), Ok(s)) => a == s,
        _ => false,
    }
}
