// volboot-net/src/validation.rs
use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use url::Url;
use volboot_common::error::{BootError, Result};

pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    tracing::debug!("Verifying checksum for: {}", path.display());
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let bytes_copied = io::copy(&mut file, &mut hasher)?;
    let actual = hex::encode(hasher.finalize());
    tracing::debug!(
        "Calculated SHA256: {} ({} bytes read)",
        actual,
        bytes_copied
    );
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(BootError::CorruptArtifact(
            path.display().to_string(),
            format!("checksum mismatch: expected {expected}, got {actual}"),
        ))
    }
}

/// Verifies that the sniffed content type of `path` matches `expected_ext`.
/// Catches error pages served with a 200 status.
pub fn verify_content_type(path: &Path, expected_ext: &str) -> Result<()> {
    let kind_opt = infer::get_from_path(path)?;
    match kind_opt {
        Some(kind) if kind.extension().eq_ignore_ascii_case(expected_ext) => {
            tracing::debug!(
                "Content type verified: {} matches expected {}",
                kind.extension(),
                expected_ext
            );
            Ok(())
        }
        Some(kind) => Err(BootError::CorruptArtifact(
            path.display().to_string(),
            format!(
                "expected a {} archive, detected '{}'",
                expected_ext,
                kind.extension()
            ),
        )),
        None => Err(BootError::CorruptArtifact(
            path.display().to_string(),
            format!("content is not a recognisable {expected_ext} archive"),
        )),
    }
}

/// Accepts absolute http(s) URLs with a host.
pub fn validate_url(url_str: &str) -> Result<()> {
    let url = Url::parse(url_str)
        .map_err(|e| BootError::ValidationError(format!("Failed to parse URL '{url_str}': {e}")))?;
    match url.scheme() {
        "https" | "http" if url.host_str().is_some() => Ok(()),
        "https" | "http" => Err(BootError::ValidationError(format!(
            "URL '{url_str}' has no host"
        ))),
        other => Err(BootError::ValidationError(format!(
            "Invalid URL scheme for '{url_str}': must be http or https, but got '{other}'"
        ))),
    }
}
