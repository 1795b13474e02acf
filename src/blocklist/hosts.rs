//! Hosts file format parser.
//!
//! Parses standard `/etc/hosts` format files as published by the common
//! blocklist projects.

use std::io::BufRead;

use super::{BlocklistParser, ParseError};

/// Parser for the hosts file format.
///
/// # Format
///
/// - `<ip> <name...>` per line; the leading address token is discarded
/// - Comments start with `#`, inline or on their own line
/// - Empty lines are ignored
///
/// Some published lists include the system entries of a real hosts file;
/// those names are dropped rather than blocked.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostsFileParser;

/// System entries that must never end up in the blocked set.
const IGNORED_NAMES: &[&str] = &["localhost", "localhost.localdomain", "broadcasthost", "local"];

impl BlocklistParser for HostsFileParser {
    fn parse(&self, reader: &mut dyn BufRead) -> Result<Vec<String>, ParseError> {
        let mut names = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let without_comment = trimmed.split('#').next().unwrap_or(trimmed).trim();

            // Drop the address token, keep the rest as the entry.
            let mut tokens = without_comment.split_whitespace();
            let _address = tokens.next();
            let name = tokens.collect::<Vec<_>>().join(" ");

            if name.is_empty() || IGNORED_NAMES.contains(&name.as_str()) {
                continue;
            }

            names.push(name);
        }

        Ok(names)
    }
}
