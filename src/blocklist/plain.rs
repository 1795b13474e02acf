//! Plain list format parser: one entry per line.
//!
//! Used both for hostname lists and regexp lists, so entries are passed
//! through untouched apart from whitespace trimming.

use std::io::BufRead;

use super::{BlocklistParser, ParseError};

/// Parser for plain one-entry-per-line lists.
///
/// Empty lines and `#` comment lines are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainListParser;

impl BlocklistParser for PlainListParser {
    fn parse(&self, reader: &mut dyn BufRead) -> Result<Vec<String>, ParseError> {
        let mut entries = Vec::new();
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

            entries.push(trimmed.to_string());
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    fn parse(content: &str) -> Vec<String> {
        PlainListParser
            .parse(&mut BufReader::new(content.as_bytes()))
            .unwrap()
    }

    #[test]
    fn should_collect_one_entry_per_line() {
        let entries = parse("ads.example.com\ntracking.example.com");
        assert_eq!(entries, vec!["ads.example.com", "tracking.example.com"]);
    }

    #[test]
    fn should_skip_blank_and_comment_lines() {
        let entries = parse("# header\n\nads.example.com\n\n# footer\n");
        assert_eq!(entries, vec!["ads.example.com"]);
    }

    #[test]
    fn should_trim_whitespace() {
        let entries = parse("  ads.example.com  \n\ttracking.example.com\t");
        assert_eq!(entries, vec!["ads.example.com", "tracking.example.com"]);
    }

    #[test]
    fn should_pass_regexp_entries_through() {
        let entries = parse("^ads[0-9]+\\.\n.*\\.doubleclick\\.");
        assert_eq!(entries, vec!["^ads[0-9]+\\.", ".*\\.doubleclick\\."]);
    }
}
