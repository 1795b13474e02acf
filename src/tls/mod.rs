//! Per-hostname certificate minting against the local root CA.

mod mint;

pub use mint::{CertStore, MintError, MintedCert};
