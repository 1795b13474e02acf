//! The blocked-host set.
//!
//! Hosts are stored in canonical form and optionally carry a surrogate
//! script body. The set never contains two names where one is a
//! label-boundary suffix of the other; redundant entries are dropped or
//! evicted as they are added, which keeps lookups a single hash probe.

use std::collections::HashMap;

use parking_lot::RwLock;
use regex::Regex;

/// Canonicalize a hostname: lowercase, strip one leading `www.` and any
/// trailing dot. Returns `None` when nothing is left.
#[must_use]
pub fn canonical(name: &str) -> Option<String> {
    let name = name.trim().to_lowercase();
    let name = name.strip_prefix("www.").unwrap_or(&name);
    let name = name.trim_end_matches('.');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// The shared blocked-host set.
#[derive(Debug, Default)]
pub struct Hosts {
    inner: RwLock<HashMap<String, Option<String>>>,
}

/// Proper suffixes of `name` at label boundaries.
fn label_suffixes(name: &str) -> impl Iterator<Item = &str> {
    name.char_indices()
        .filter_map(|(i, c)| (c == '.').then(|| &name[i + 1..]))
}

/// True when `suffix` trails `name` at a label boundary.
fn ends_with_label(name: &str, suffix: &str) -> bool {
    name.len() > suffix.len()
        && name.ends_with(suffix)
        && name.as_bytes()[name.len() - suffix.len() - 1] == b'.'
}

impl Hosts {
    /// Add a host in canonical form.
    ///
    /// Idempotent. A name already covered by a shorter entry is dropped;
    /// a new shorter name evicts the longer entries it covers.
    pub fn add(&self, name: &str) {
        let Some(name) = canonical(name) else {
            return;
        };

        let mut inner = self.inner.write();
        if inner.contains_key(&name) {
            return;
        }
        if label_suffixes(&name).any(|suffix| inner.contains_key(suffix)) {
            return;
        }
        inner.retain(|existing, _| !ends_with_label(existing, &name));
        inner.insert(name, None);
    }

    /// Remove a host.
    pub fn remove(&self, name: &str) {
        if let Some(name) = canonical(name) {
            self.inner.write().remove(&name);
        }
    }

    /// Check whether a name is blocked.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        canonical(name).is_some_and(|name| self.inner.read().contains_key(&name))
    }

    /// Surrogate script for a name, if one was compiled in.
    #[must_use]
    pub fn surrogate(&self, name: &str) -> Option<String> {
        let name = canonical(name)?;
        self.inner.read().get(&name)?.clone()
    }

    /// Attach `script` to every host matching `pattern`; returns how many
    /// hosts were touched.
    pub fn set_surrogate_matching(&self, pattern: &Regex, script: &str) -> usize {
        let mut inner = self.inner.write();
        let mut found = 0;
        for (name, body) in inner.iter_mut() {
            if pattern.is_match(name) {
                *body = Some(script.to_string());
                found += 1;
            }
        }
        found
    }

    /// Number of blocked hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// A sorted copy of the host names, for snapshots and dumps.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().keys().cloned().collect();
        names.sort();
        names
    }
}
