//! Blocklist ingestion.
//!
//! This module turns heterogeneous list sources into Store entries:
//!
//! - [`hosts`]: parser for the standard UNIX hosts file format
//! - [`plain`]: parser for one-entry-per-line lists
//! - [`remote`]: URL fetching with an mtime-based disk cache
//! - [`compiler`]: the bootstrap/reload pass and the compiled snapshot
//!
//! # Example
//!
//! ```
//! use trackwall::blocklist::{parser_for_format, BlocklistParser};
//! use trackwall::config::ListFormat;
//! use std::io::BufReader;
//!
//! let content = "0.0.0.0 ads.example.com # tracker";
//! let parser = parser_for_format(ListFormat::Hosts);
//! let names = parser.parse(&mut BufReader::new(content.as_bytes())).unwrap();
//! assert_eq!(names, vec!["ads.example.com"]);
//! ```

pub mod compiler;
mod hosts;
mod plain;
pub mod remote;

use std::io::BufRead;

pub use compiler::{CompileError, ListCompiler};
pub use hosts::HostsFileParser;
pub use plain::PlainListParser;
pub use remote::CachedFetcher;

use crate::config::ListFormat;

/// Error type for blocklist parsing operations.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// I/O error during reading.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// Trait for blocklist parsers.
///
/// Each parser handles one source format and extracts raw entries;
/// canonicalization happens later when entries reach the Store.
pub trait BlocklistParser: Send + Sync {
    /// Parse list content and return its entries.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if reading fails.
    fn parse(&self, reader: &mut dyn BufRead) -> Result<Vec<String>, ParseError>;
}

/// Returns a boxed parser for the given list format.
#[must_use]
pub fn parser_for_format(format: ListFormat) -> Box<dyn BlocklistParser> {
    match format {
        ListFormat::Hosts => Box::new(HostsFileParser),
        ListFormat::Plain => Box::new(PlainListParser),
    }
}
