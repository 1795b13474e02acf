//! Trackwall - a local DNS and HTTP(S) tracker filter.
//!
//! Trackwall runs as the system's recursive resolver and answers queries
//! for known tracking and advertising domains with its own loopback HTTP
//! listeners. When a browser then connects there, trackwall terminates the
//! connection locally, minting a TLS certificate on the fly for HTTPS, and
//! serves either a short block notice with timed unblock links or a
//! JavaScript surrogate that keeps the hosting page working.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`]: line-oriented configuration parsing and validation
//! - [`store`]: shared state (hosts, regexps, surrogates, overrides)
//! - [`cache`]: the DNS answer cache with per-entry TTLs
//! - [`blocklist`]: list parsers, cached fetching and the compile pass
//! - [`dns`]: the decision pipeline and the UDP/TCP listeners
//! - [`http`]: block/surrogate/control responses over HTTP and HTTPS
//! - [`tls`]: per-hostname certificate minting against the local root CA
//! - [`control`]: the line-oriented TCP control channel
//! - [`daemon`]: assembly and signal handling
//! - [`metrics`]: counter names emitted on the DNS path
//! - [`error`]: error types
//!
//! # Testing
//!
//! Components are built against small traits and plain structs so they can
//! be exercised without network access:
//!
//! ```rust
//! use std::time::Duration;
//! use trackwall::store::Store;
//!
//! let store = Store::new(Duration::from_secs(300));
//! store.hosts.add("ads.example.com");
//! assert!(store.hosts.contains("www.ads.example.com"));
//! ```

pub mod blocklist;
pub mod cache;
pub mod config;
pub mod control;
pub mod daemon;
pub mod dns;
pub mod error;
pub mod http;
pub mod metrics;
pub mod store;
pub mod tls;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
