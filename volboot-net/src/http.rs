// volboot-net/src/http.rs
use std::fs;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::fs::File as TokioFile;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};
use url::Url;
use volboot_common::config::{Config, FetchSettings};
use volboot_common::error::{BootError, Result};

use crate::validation::validate_url;

const USER_AGENT_STRING: &str = "volboot provisioner (Rust)";
/// Write buffer in front of the destination file.
const WRITE_BUFFER_BYTES: usize = 256 * 1024;

/// Streams remote resources to disk with retry and backoff.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    settings: FetchSettings,
    /// Bearer token sent only to the registry's origin.
    registry_auth: Option<(Url, String)>,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let mut fetcher = Self::with_settings(config.fetch.clone())?;
        if let Some(token) = config.registries.model_token.clone() {
            let base = Url::parse(&config.registries.model_base).map_err(|e| {
                BootError::Config(format!(
                    "registries.model_base '{}' is not a URL: {}",
                    config.registries.model_base, e
                ))
            })?;
            fetcher.registry_auth = Some((base, token));
        }
        Ok(fetcher)
    }

    pub fn with_settings(settings: FetchSettings) -> Result<Self> {
        Ok(Self {
            client: build_http_client(&settings)?,
            settings,
            registry_auth: None,
        })
    }

    /// Token for `url` when it shares scheme, host and port with the
    /// registry base.
    fn bearer_for(&self, url: &str) -> Option<&str> {
        let (base, token) = self.registry_auth.as_ref()?;
        let target = Url::parse(url).ok()?;
        let same_origin = target.scheme() == base.scheme()
            && target.host_str() == base.host_str()
            && target.port_or_known_default() == base.port_or_known_default();
        same_origin.then_some(token.as_str())
    }

    /// Downloads `url` into `dest`, creating parent directories.
    ///
    /// Non-2xx responses, connection errors and stalls are retried up to
    /// `retries` times with `attempt * backoff_base` between attempts. When
    /// every attempt fails the destination is removed and the last error is
    /// returned; callers treat that as "resource unavailable".
    pub async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        validate_url(url)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BootError::IoError(format!(
                    "Failed to create download directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let attempts = self.settings.retries.max(1);
        let mut last_error: Option<BootError> = None;

        for attempt in 1..=attempts {
            debug!(
                "Download attempt {}/{} for {} -> {}",
                attempt,
                attempts,
                url,
                dest.display()
            );
            match self.attempt(url, dest).await {
                Ok(bytes) => {
                    debug!("Downloaded {} bytes from {}", bytes, url);
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!("Download attempt {}/{} failed for {}: {}", attempt, attempts, url, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        let delay = self.settings.backoff(attempt);
                        debug!("Retrying {} in {:?}", url, delay);
                        sleep(delay).await;
                    }
                }
            }
        }

        if let Err(e) = fs::remove_file(dest) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Could not remove incomplete download {}: {}", dest.display(), e);
            }
        }
        error!("Giving up on {} after {} attempts", url, attempts);
        Err(last_error.unwrap_or_else(|| {
            BootError::DownloadError(
                file_label(dest),
                url.to_string(),
                "All download attempts failed.".to_string(),
            )
        }))
    }

    async fn attempt(&self, url: &str, dest: &Path) -> Result<u64> {
        let per_attempt = self.settings.timeout();
        let mut request = self.client.get(url);
        if let Some(token) = self.bearer_for(url) {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = timeout(per_attempt, request.send())
            .await
            .map_err(|_| stalled(dest, url, per_attempt))?
            .map_err(|e| {
                debug!("HTTP request failed for {url}: {e}");
                BootError::DownloadError(file_label(dest), url.to_string(), e.to_string())
            })?;

        let status = response.status();
        debug!("Received HTTP status: {} for {}", status, url);
        if !status.is_success() {
            let reason = match status {
                StatusCode::NOT_FOUND => "Resource not found (404)".to_string(),
                StatusCode::FORBIDDEN => "Access forbidden (403)".to_string(),
                StatusCode::UNAUTHORIZED => "Authentication required (401)".to_string(),
                StatusCode::TOO_MANY_REQUESTS => "Rate limited (429)".to_string(),
                other => format!("HTTP error {other}"),
            };
            return Err(BootError::DownloadError(
                file_label(dest),
                url.to_string(),
                reason,
            ));
        }

        let file = TokioFile::create(dest).await.map_err(|e| {
            BootError::IoError(format!("Failed to create {}: {}", dest.display(), e))
        })?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        // The timeout applies per chunk so large files are bounded by
        // stalls rather than total duration.
        loop {
            let next = timeout(per_attempt, stream.next())
                .await
                .map_err(|_| stalled(dest, url, per_attempt))?;
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| {
                BootError::DownloadError(
                    file_label(dest),
                    url.to_string(),
                    format!("Body read failed after {written} bytes: {e}"),
                )
            })?;
            writer.write_all(&chunk).await.map_err(|e| {
                BootError::IoError(format!("Failed to write to {}: {}", dest.display(), e))
            })?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        Ok(written)
    }
}

fn stalled(dest: &Path, url: &str, after: Duration) -> BootError {
    BootError::DownloadError(
        file_label(dest),
        url.to_string(),
        format!("No progress within {after:?}"),
    )
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn build_http_client(settings: &FetchSettings) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .connect_timeout(settings.connect_timeout())
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| BootError::Generic(format!("Failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use httpmock::Method::GET;
    use httpmock::MockServer;

    use super::*;

    fn fast_settings(retries: u32) -> FetchSettings {
        FetchSettings {
            retries,
            timeout_secs: 5,
            connect_timeout_secs: 5,
            backoff_base_ms: 1,
        }
    }

    #[tokio::test]
    async fn streams_body_into_new_directories() {
        let server = MockServer::start_async().await;
        let body = vec![7u8; 300_000];
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/files/blob.bin");
                then.status(200).body(body.clone());
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a").join("b").join("blob.bin");
        let fetcher = Fetcher::with_settings(fast_settings(3)).unwrap();
        let bytes = fetcher
            .fetch_to_file(&server.url("/files/blob.bin"), &dest)
            .await
            .unwrap();

        assert_eq!(bytes, 300_000);
        assert_eq!(fs::read(&dest).unwrap(), body);
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test]
    async fn retries_then_gives_up_on_404() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/missing.zip");
                then.status(404);
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.zip");
        let fetcher = Fetcher::with_settings(fast_settings(3)).unwrap();
        let err = fetcher
            .fetch_to_file(&server.url("/missing.zip"), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, BootError::DownloadError(..)));
        assert!(err.to_string().contains("404"));
        assert_eq!(mock.hits_async().await, 3);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn rejects_non_http_urls_without_requesting() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::with_settings(fast_settings(2)).unwrap();
        let err = fetcher
            .fetch_to_file("ftp://example.com/x.zip", &dir.path().join("x.zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, BootError::ValidationError(_)));
    }

    #[tokio::test]
    async fn sends_bearer_token_to_model_registry() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/org/model/resolve/main/w.bin")
                    .header("authorization", "Bearer secret");
                then.status(200).body("ok");
            })
            .await;

        let mut config = Config::for_volume("/unused");
        config.fetch = fast_settings(1);
        config.registries.model_base = server.base_url();
        config.registries.model_token = Some("secret".into());

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(&config).unwrap();
        fetcher
            .fetch_to_file(
                &server.url("/org/model/resolve/main/w.bin"),
                &dir.path().join("w.bin"),
            )
            .await
            .unwrap();
        assert_eq!(mock.hits_async().await, 1);
    }

    #[test]
    fn token_stays_on_the_registry_host() {
        let mut config = Config::for_volume("/unused");
        config.registries.model_base = "https://huggingface.co".into();
        config.registries.model_token = Some("secret".into());
        let fetcher = Fetcher::new(&config).unwrap();

        assert_eq!(
            fetcher.bearer_for("https://huggingface.co/org/m/resolve/main/w.bin"),
            Some("secret")
        );
        assert_eq!(
            fetcher.bearer_for("https://huggingface.co:443/org/m"),
            Some("secret")
        );
        for url in [
            "https://huggingface.co.attacker.example/org/m",
            "https://huggingface.com/org/m",
            "http://huggingface.co/org/m",
            "https://huggingface.co:8443/org/m",
            "https://user@attacker.example/huggingface.co",
        ] {
            assert_eq!(fetcher.bearer_for(url), None, "{url}");
        }
    }
}
