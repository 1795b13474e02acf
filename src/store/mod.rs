//! Process-wide shared state.
//!
//! A [`Store`] owns everything the DNS, HTTP and control tasks share: the
//! blocked-host set, the regexp list, compiled surrogates, timed overrides
//! and the DNS answer cache. Each sub-store is guarded independently so the
//! hot paths take short shared locks and never wait on unrelated writers.
//! No store operation performs I/O.

pub mod hosts;
mod overrides;
mod regexps;
mod surrogates;

use std::time::Duration;

pub use hosts::{canonical, Hosts};
pub use overrides::Overrides;
pub use regexps::Regexps;
pub use surrogates::{Surrogate, Surrogates};

use crate::cache::AnswerCache;

/// The shared state of one daemon instance.
pub struct Store {
    pub hosts: Hosts,
    pub regexps: Regexps,
    pub surrogates: Surrogates,
    pub overrides: Overrides,
    pub answers: AnswerCache,
}

impl Store {
    /// Create an empty store whose answer cache clamps TTLs to `max_dns_ttl`.
    #[must_use]
    pub fn new(max_dns_ttl: Duration) -> Self {
        Self {
            hosts: Hosts::default(),
            regexps: Regexps::default(),
            surrogates: Surrogates::default(),
            overrides: Overrides::default(),
            answers: AnswerCache::new(max_dns_ttl),
        }
    }

    /// Look up the surrogate for a host: the O(1) per-host body first, then
    /// the compiled pattern list.
    #[must_use]
    pub fn find_surrogate(&self, host: &str) -> Option<String> {
        if let Some(script) = self.hosts.surrogate(host) {
            return Some(script);
        }
        let host = canonical(host)?;
        self.surrogates.matching(&host)
    }
}
