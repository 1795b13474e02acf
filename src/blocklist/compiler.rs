//! The list compiler.
//!
//! Populates the Store at daemon start and again on every reload request.
//! The result of a full pass is written to `<cache-dir>/compiled`, one
//! canonical host per line; a later start within the list cache lifetime
//! loads that snapshot instead of re-fetching every source.

use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use regex::Regex;
use tokio::fs;

use super::remote::{CachedFetcher, FetchError};
use super::{parser_for_format, ParseError};
use crate::config::{Config, Source};
use crate::store::Store;

/// File name of the compiled snapshot inside the cache directory.
const SNAPSHOT_FILE: &str = "compiled";

/// A surrogate matching more hosts than this is probably misconfigured.
const SURROGATE_MATCH_WARNING: usize = 50;

/// Error type for compiler operations.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// Failed to fetch a remote source.
    #[error("fetch failed")]
    Fetch(#[from] FetchError),

    /// Failed to parse source content.
    #[error("parse failed")]
    Parse(#[from] ParseError),

    /// I/O error on a local source or the snapshot.
    #[error("I/O error for {path:?}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Task join error from a parsing task.
    #[error("task join error")]
    Join(#[from] tokio::task::JoinError),
}

/// Ingests the configured sources into a Store.
pub struct ListCompiler {
    config: Arc<Config>,
    fetcher: Option<CachedFetcher>,
    cache_dir: PathBuf,
    max_age: Duration,
}

impl ListCompiler {
    /// Create a compiler for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when a remote source is configured and the HTTP
    /// client cannot be created.
    pub fn new(config: Arc<Config>) -> Result<Self, FetchError> {
        let cache_dir = config.cache_dir.clone();
        let max_age = Duration::from_secs(config.cache_hosts);

        let has_remote = [
            &config.hostlists,
            &config.unhostlists,
            &config.regexplists,
            &config.unregexplists,
        ]
        .into_iter()
        .flatten()
        .any(|source| !source.location.starts_with("file://"));

        let fetcher = if has_remote {
            Some(CachedFetcher::new(cache_dir.join("hosts"), max_age)?)
        } else {
            None
        };

        Ok(Self {
            config,
            fetcher,
            cache_dir,
            max_age,
        })
    }

    /// Populate the store at daemon start.
    ///
    /// A fresh compiled snapshot short-circuits source fetching entirely;
    /// surrogates are compiled in either case.
    pub async fn bootstrap(&self, store: &Store) -> Result<(), CompileError> {
        if let Some(hosts) = self.load_snapshot().await {
            tracing::info!(count = hosts.len(), "using the compiled host list");
            for host in hosts {
                store.hosts.add(&host);
            }
            self.compile_surrogates(store);
            return Ok(());
        }

        self.refresh(store).await
    }

    /// Run a full pass over every source and rewrite the snapshot.
    ///
    /// Individual source failures are logged and skipped; only snapshot
    /// write failures surface as errors.
    pub async fn refresh(&self, store: &Store) -> Result<(), CompileError> {
        for source in &self.config.hostlists {
            self.apply_source(source, |entry| store.hosts.add(entry))
                .await;
        }
        for source in &self.config.unhostlists {
            self.apply_source(source, |entry| store.hosts.remove(entry))
                .await;
        }
        for source in &self.config.regexplists {
            self.apply_source(source, |entry| add_regexp(store, entry))
                .await;
        }
        for source in &self.config.unregexplists {
            self.apply_source(source, |entry| store.regexps.remove(entry))
                .await;
        }

        for host in &self.config.hosts {
            store.hosts.add(host);
        }
        for host in &self.config.unhosts {
            store.hosts.remove(host);
        }
        for pattern in &self.config.regexps {
            add_regexp(store, pattern);
        }
        for pattern in &self.config.unregexps {
            store.regexps.remove(pattern);
        }

        self.compile_surrogates(store);

        tracing::info!(
            hosts = store.hosts.len(),
            regexps = store.regexps.len(),
            "compiled block lists"
        );

        self.write_snapshot(store).await
    }

    /// Load one source and feed every entry to `apply`; failures are warned
    /// about and skipped so a single bad source never taints the pass.
    async fn apply_source<F>(&self, source: &Source, apply: F)
    where
        F: Fn(&str),
    {
        match self.load_source(source).await {
            Ok(entries) => {
                tracing::info!(
                    location = %source.location,
                    count = entries.len(),
                    "loaded list source"
                );
                for entry in &entries {
                    apply(entry);
                }
            }
            Err(err) => {
                tracing::warn!(
                    location = %source.location,
                    error = ?err,
                    "skipping unusable list source"
                );
            }
        }
    }

    async fn load_source(&self, source: &Source) -> Result<Vec<String>, CompileError> {
        let content = if let Some(path) = source.location.strip_prefix("file://") {
            let path = PathBuf::from(path);
            fs::read_to_string(&path)
                .await
                .map_err(|err| CompileError::Io { path, source: err })?
        } else {
            let fetcher = self
                .fetcher
                .as_ref()
                .expect("fetcher exists when remote sources are configured");
            fetcher.fetch(&source.location).await?
        };

        // Parse in a blocking task; some lists run to a million lines.
        let format = source.format;
        let entries = tokio::task::spawn_blocking(move || {
            let parser = parser_for_format(format);
            parser.parse(&mut BufReader::new(content.as_bytes()))
        })
        .await??;

        Ok(entries)
    }

    /// Compile the configured surrogates into the store.
    fn compile_surrogates(&self, store: &Store) {
        for (pattern, script) in &self.config.surrogates {
            let script = script.replace("@@", "function(){}");

            let compiled = match Regex::new(pattern) {
                Ok(compiled) => compiled,
                Err(err) => {
                    tracing::warn!(pattern = %pattern, error = %err, "invalid surrogate pattern");
                    continue;
                }
            };

            let found = store.hosts.set_surrogate_matching(&compiled, &script);
            if found > SURROGATE_MATCH_WARNING {
                tracing::warn!(
                    pattern = %pattern,
                    hosts = found,
                    "surrogate matches suspiciously many hosts"
                );
            }

            store.surrogates.add(compiled, script);
        }
    }

    /// Load the compiled snapshot when it exists and is fresh.
    async fn load_snapshot(&self) -> Option<Vec<String>> {
        let path = self.cache_dir.join(SNAPSHOT_FILE);
        let metadata = fs::metadata(&path).await.ok()?;
        let modified = metadata.modified().ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();

        if age > self.max_age {
            tracing::warn!(path = ?path, "the compiled host list has expired, not using it");
            return None;
        }

        let content = fs::read_to_string(&path).await.ok()?;
        Some(
            content
                .lines()
                .filter(|line| !line.is_empty())
                .map(ToString::to_string)
                .collect(),
        )
    }

    /// Serialize the current host set to the snapshot file.
    pub async fn write_snapshot(&self, store: &Store) -> Result<(), CompileError> {
        fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|err| CompileError::Io {
                path: self.cache_dir.clone(),
                source: err,
            })?;

        let path = self.cache_dir.join(SNAPSHOT_FILE);
        let mut content = store.hosts.snapshot().join("\n");
        if !content.is_empty() {
            content.push('\n');
        }

        fs::write(&path, content)
            .await
            .map_err(|err| CompileError::Io { path, source: err })
    }
}

fn add_regexp(store: &Store, pattern: &str) {
    if let Err(err) = store.regexps.add(pattern) {
        tracing::warn!(pattern = %pattern, error = %err, "skipping invalid block pattern");
    }
}
