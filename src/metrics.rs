//! Metric names emitted by the daemon.
//!
//! Only the `metrics` facade is used; the counters are no-ops unless an
//! embedder installs a recorder. Names live here so the decision path and
//! any future dashboards agree on them.

/// Counter of handled DNS queries, labeled by [`OUTCOME`].
pub const DNS_QUERIES: &str = "dns.queries";

/// Label naming what the pipeline did with a query.
pub const OUTCOME: &str = "outcome";

/// Values of the [`OUTCOME`] label.
pub mod outcome {
    /// Answered with a spoofed address from the block set.
    pub const BLOCKED: &str = "blocked";
    /// Served from the answer cache.
    pub const CACHE_HIT: &str = "cache_hit";
    /// Relayed to the upstream resolver.
    pub const FORWARDED: &str = "forwarded";
    /// Upstream failed or timed out; answered SERVFAIL.
    pub const FAILED: &str = "failed";
}
