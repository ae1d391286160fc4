// volboot-core/src/install/mod.rs
// Per-item "ensure installed" operations. Each returns Installed or Skipped
// on success; errors are per-item and the caller records them.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;
use volboot_aio::{create_dir_all, ArchiveKind};
use volboot_common::error::Result;
use volboot_net::{verify_content_type, Fetcher};

pub mod model;
pub mod plugin;
pub mod tool_cache;

pub use model::{ensure_download, ensure_model};
pub use plugin::ensure_plugin;
pub use tool_cache::ensure_tool_cache;

/// Downloads `url` into a fresh scratch directory under `staging_root`.
/// The scratch directory is removed when the returned guard drops.
pub(crate) async fn fetch_staged(
    fetcher: &Fetcher,
    url: &str,
    staging_root: &Path,
    file_name: &str,
) -> Result<(TempDir, PathBuf)> {
    create_dir_all(staging_root)?;
    let scratch = tempfile::Builder::new()
        .prefix(".fetch-")
        .tempdir_in(staging_root)?;
    let target = scratch.path().join(file_name);
    let bytes = fetcher.fetch_to_file(url, &target).await?;
    debug!("Staged {} ({} bytes) at {}", url, bytes, target.display());
    Ok((scratch, target))
}

/// [`fetch_staged`] for archives: the downloaded bytes must sniff as the
/// format the file name promises, so an HTML error page never reaches the
/// unpacker.
pub(crate) async fn fetch_archive_staged(
    fetcher: &Fetcher,
    url: &str,
    staging_root: &Path,
    file_name: &str,
) -> Result<(TempDir, PathBuf)> {
    let kind = ArchiveKind::from_path(Path::new(file_name))?;
    let (scratch, target) = fetch_staged(fetcher, url, staging_root, file_name).await?;
    verify_content_type(&target, kind.sniffed_extension())?;
    Ok((scratch, target))
}

/// Last path segment of a URL, without query or fragment.
pub(crate) fn url_file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("download")
}
