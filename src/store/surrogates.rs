//! Compiled surrogate records.
//!
//! A surrogate pairs a hostname pattern with a JavaScript body that stands
//! in for a blocked tracker script. Most lookups are answered straight from
//! the host set (the compiler writes the body onto matching hosts); this
//! list covers hosts added after compilation.

use parking_lot::RwLock;
use regex::Regex;

/// One compiled surrogate.
#[derive(Debug, Clone)]
pub struct Surrogate {
    pub pattern: Regex,
    pub script: String,
}

/// The ordered surrogate list; the first matching pattern wins.
#[derive(Debug, Default)]
pub struct Surrogates {
    inner: RwLock<Vec<Surrogate>>,
}

impl Surrogates {
    /// Append a compiled surrogate.
    pub fn add(&self, pattern: Regex, script: String) {
        self.inner.write().push(Surrogate { pattern, script });
    }

    /// Scan the patterns for a match against `host`.
    #[must_use]
    pub fn matching(&self, host: &str) -> Option<String> {
        self.inner
            .read()
            .iter()
            .find(|s| s.pattern.is_match(host))
            .map(|s| s.script.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
