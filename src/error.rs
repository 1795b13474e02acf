//! Error types for the trackwall daemon.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for trackwall operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("DNS protocol error: {0}")]
    Protocol(#[from] hickory_proto::error::ProtoError),

    #[error("certificate mint error: {0}")]
    Mint(#[from] crate::tls::MintError),

    #[error("list fetch error: {0}")]
    Fetch(#[from] crate::blocklist::remote::FetchError),

    #[error("list compile error: {0}")]
    Compile(#[from] crate::blocklist::CompileError),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("resolver error: {0}")]
    Resolver(String),

    #[error("HTTP connection error: {0}")]
    Http(String),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("no usable upstream resolver found in {0:?}")]
    NoUpstream(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("line {line}: unknown key {key:?}")]
    UnknownKey { line: usize, key: String },

    #[error("line {line}: {key} expects {expected}")]
    MissingValue {
        line: usize,
        key: String,
        expected: &'static str,
    },

    #[error("invalid listen address: {0:?}")]
    InvalidAddr(String),

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("invalid boolean: {0:?}")]
    InvalidBool(String),

    #[error("unknown list format: {0:?}")]
    UnknownFormat(String),

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
