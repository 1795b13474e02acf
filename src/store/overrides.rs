//! Timed whitelist overrides.
//!
//! The HTTP `$@_allow` endpoint and the control channel grant a host a
//! deadline during which the DNS server answers as if it were not blocked.
//! Expiry is lazy: an entry past its deadline simply stops matching and
//! stays in the map until replaced.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct Overrides {
    inner: RwLock<HashMap<String, Instant>>,
}

impl Overrides {
    /// Allow `host` to resolve upstream for the next `secs` seconds.
    pub fn allow(&self, host: &str, secs: u64) {
        let deadline = Instant::now() + Duration::from_secs(secs);
        self.inner.write().insert(host.to_string(), deadline);
    }

    /// True while the host's deadline lies in the future.
    #[must_use]
    pub fn is_allowed(&self, host: &str) -> bool {
        self.inner
            .read()
            .get(host)
            .is_some_and(|deadline| *deadline > Instant::now())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Hosts with their remaining allowance, for dumps. Expired entries
    /// report zero.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Duration)> {
        let now = Instant::now();
        let mut entries: Vec<(String, Duration)> = self
            .inner
            .read()
            .iter()
            .map(|(host, deadline)| (host.clone(), deadline.saturating_duration_since(now)))
            .collect();
        entries.sort();
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_allow_until_deadline() {
        let overrides = Overrides::default();
        overrides.allow("tracker.example", 60);

        assert!(overrides.is_allowed("tracker.example"));
        assert!(!overrides.is_allowed("other.example"));
    }

    #[test]
    fn should_expire_lazily() {
        let overrides = Overrides::default();
        overrides.allow("tracker.example", 0);

        assert!(!overrides.is_allowed("tracker.example"));
        // The entry stays in the map, it just no longer matches.
        assert_eq!(overrides.len(), 1);
    }

    #[test]
    fn should_replace_existing_deadline() {
        let overrides = Overrides::default();
        overrides.allow("tracker.example", 0);
        overrides.allow("tracker.example", 60);

        assert!(overrides.is_allowed("tracker.example"));
        assert_eq!(overrides.len(), 1);
    }
}
