//! Remote list fetching with a disk cache.
//!
//! Every remote source is mirrored under `<cache-dir>/hosts/<slug>`, where
//! the slug is the URL with runs of non-word characters collapsed to `-`.
//! A mirror younger than the configured lifetime is served without touching
//! the network; a stale mirror is replaced on the next successful download
//! and kept as a fallback when the download fails.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use reqwest::Client;
use tokio::fs;

/// Default timeout for HTTP requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User-Agent header value for HTTP requests.
const USER_AGENT: &str = concat!("trackwall/", env!("CARGO_PKG_VERSION"));

/// Error type for remote list fetching.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP request failed with a non-success status code.
    #[error("HTTP request failed for {url}: status {status}")]
    HttpStatus {
        /// URL that was requested.
        url: String,
        /// HTTP status code returned.
        status: u16,
    },

    /// Network error during the HTTP request.
    #[error("network error fetching {url}: {source}")]
    Network {
        /// URL that was requested.
        url: String,
        /// Underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// Timeout fetching the remote URL.
    #[error("timeout fetching {url}")]
    Timeout {
        /// URL that timed out.
        url: String,
    },

    /// I/O error on the cache mirror.
    #[error("cache I/O error for {path:?}: {source}")]
    CacheIo {
        /// Path to the cache file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create the HTTP client.
    #[error("failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// The cache file name for a URL: runs of non-word characters become `-`.
#[must_use]
pub fn slug(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    let mut last_dash = false;
    for c in url.chars() {
        if c.is_alphanumeric() || c == '_' {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out
}

/// Fetches remote lists through the disk mirror.
pub struct CachedFetcher {
    client: Client,
    dir: PathBuf,
    max_age: Duration,
}

impl CachedFetcher {
    /// Create a fetcher mirroring into `dir` with the given mirror lifetime.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(dir: PathBuf, max_age: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(FetchError::ClientBuild)?;

        Ok(Self {
            client,
            dir,
            max_age,
        })
    }

    /// Fetch a URL, preferring a fresh mirror over the network.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] when the download fails and no mirror
    /// exists to fall back on.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let path = self.dir.join(slug(url));

        if let Some(content) = self.read_fresh(&path).await {
            tracing::debug!(url = %url, path = ?path, "using mirrored list");
            return Ok(content);
        }

        match self.download(url).await {
            Ok(content) => {
                if let Err(err) = self.save(&path, &content).await {
                    tracing::warn!(path = ?path, error = ?err, "failed to mirror list");
                }
                Ok(content)
            }
            Err(err) => match fs::read_to_string(&path).await {
                Ok(stale) => {
                    tracing::warn!(
                        url = %url,
                        error = ?err,
                        "download failed, using stale mirror"
                    );
                    Ok(stale)
                }
                Err(_) => Err(err),
            },
        }
    }

    /// Read the mirror when its mtime is within the lifetime.
    async fn read_fresh(&self, path: &Path) -> Option<String> {
        let metadata = fs::metadata(path).await.ok()?;
        let modified = metadata.modified().ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if age > self.max_age {
            return None;
        }
        fs::read_to_string(path).await.ok()
    }

    async fn download(&self, url: &str) -> Result<String, FetchError> {
        tracing::info!(url = %url, "downloading list");

        let response = self.client.get(url).send().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Network {
                    url: url.to_string(),
                    source: err,
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.text().await.map_err(|err| FetchError::Network {
            url: url.to_string(),
            source: err,
        })
    }

    async fn save(&self, path: &Path, content: &str) -> Result<(), FetchError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| FetchError::CacheIo {
                path: self.dir.clone(),
                source: err,
            })?;
        fs::write(path, content)
            .await
            .map_err(|err| FetchError::CacheIo {
                path: path.to_path_buf(),
                source: err,
            })
    }
}
