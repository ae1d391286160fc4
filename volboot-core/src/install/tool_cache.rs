// volboot-core/src/install/tool_cache.rs
use chrono::Utc;
use tracing::{debug, info};
use volboot_aio::{is_nonempty_dir, place_archive_async};
use volboot_common::config::Config;
use volboot_common::error::Result;
use volboot_common::manifest::{InstallManifest, InstallMethod, InstallRecord};
use volboot_common::model::ToolCache;
use volboot_common::pipeline::ItemOutcome;
use volboot_net::Fetcher;

use super::{fetch_archive_staged, url_file_name};

/// Unpacks a tool's model pack into `<volume>/<volume_subdir>/<name>` unless
/// that directory already has contents. Linking the alias is separate.
pub async fn ensure_tool_cache(
    cache: &ToolCache,
    config: &Config,
    fetcher: &Fetcher,
    manifest: &mut InstallManifest,
) -> Result<ItemOutcome> {
    let pack_dir = config.tool_cache_dir(cache).join(&cache.name);
    if is_nonempty_dir(&pack_dir) {
        debug!("Tool cache {} present at {}", cache.name, pack_dir.display());
        return Ok(ItemOutcome::Skipped);
    }

    info!("Fetching tool cache {} from {}", cache.name, cache.url);
    let staging = config.staging_dir();
    let (_scratch, archive) =
        fetch_archive_staged(fetcher, &cache.url, &staging, url_file_name(&cache.url)).await?;
    place_archive_async(
        archive,
        cache.archive_prefix.clone(),
        pack_dir.clone(),
        staging,
    )
    .await?;

    manifest.record(
        format!("cache:{}", cache.name),
        InstallRecord {
            source: cache.url.clone(),
            reference: None,
            method: InstallMethod::Archive,
            path: pack_dir,
            installed_at: Utc::now(),
        },
    );
    Ok(ItemOutcome::Installed)
}
