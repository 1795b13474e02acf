//! The blocked-name pattern list.

use parking_lot::RwLock;
use regex::Regex;

/// An ordered list of compiled block patterns. Patterns are identified for
/// removal by their original source string; the first match wins.
#[derive(Debug, Default)]
pub struct Regexps {
    inner: RwLock<Vec<Regex>>,
}

impl Regexps {
    /// Compile and append a pattern. An invalid pattern is reported to the
    /// caller and leaves the list untouched.
    pub fn add(&self, pattern: &str) -> Result<(), regex::Error> {
        let compiled = Regex::new(pattern)?;
        self.inner.write().push(compiled);
        Ok(())
    }

    /// Remove the pattern whose source string equals `pattern`.
    pub fn remove(&self, pattern: &str) {
        self.inner.write().retain(|r| r.as_str() != pattern);
    }

    /// Check whether any pattern matches `name`.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.inner.read().iter().any(|r| r.is_match(name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// The source strings of all patterns, in order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.inner.read().iter().map(|r| r.as_str().to_string()).collect()
    }
}
