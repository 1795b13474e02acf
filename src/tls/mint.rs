//! The certificate mint.
//!
//! The HTTPS listener answers for whatever blocked hostname the browser
//! asked for, so each TLS handshake needs a leaf certificate for that
//! exact name, signed by the user's root CA. Keys, CSRs and certificates
//! are minted on first use and memoized under `<cache-dir>/certs/`; the
//! files are the cache, so deleting them rotates the material. Every step
//! is idempotent, which makes concurrent mints for one name safe.

use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, Write};
use std::net::IpAddr;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber, PKCS_RSA_SHA256,
};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use time::{Duration, OffsetDateTime};

/// Organization written into every minted leaf certificate.
const ORGANIZATION: &str = "trackwall";

/// RSA key size for minted leaf keys.
const KEY_BITS: usize = 2048;

/// Error type for certificate minting.
#[derive(Debug, thiserror::Error)]
pub enum MintError {
    #[error("empty server name")]
    EmptyName,

    #[error("invalid server name: {0:?}")]
    InvalidName(String),

    #[error("I/O error for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("RSA key generation failed: {0}")]
    KeyGen(#[source] rsa::Error),

    #[error("key encoding failed: {0}")]
    KeyEncoding(String),

    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("root CA at {path:?} unusable: {reason}")]
    RootCa { path: PathBuf, reason: String },

    #[error("minted artifacts for {name:?} failed to load: {reason}")]
    Load { name: String, reason: String },
}

/// A minted leaf certificate ready for rustls.
pub struct MintedCert {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Clone for MintedCert {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

/// Mints and caches per-hostname certificates.
pub struct CertStore {
    dir: PathBuf,
    root_cert: PathBuf,
    root_key: PathBuf,
    memo: RwLock<HashMap<String, MintedCert>>,
}

impl CertStore {
    /// Create a mint storing artifacts under `cache_dir/certs`.
    #[must_use]
    pub fn new(cache_dir: &Path, root_cert: PathBuf, root_key: PathBuf) -> Self {
        Self {
            dir: cache_dir.join("certs"),
            root_cert,
            root_key,
            memo: RwLock::new(HashMap::new()),
        }
    }

    /// Return the certificate for `server_name`, minting any missing
    /// artifacts.
    ///
    /// # Errors
    ///
    /// Returns a [`MintError`] for unusable names, I/O failures, or an
    /// unusable root CA.
    pub fn certificate(&self, server_name: &str) -> Result<MintedCert, MintError> {
        if server_name.is_empty() {
            return Err(MintError::EmptyName);
        }
        // The name becomes a file name; anything path-like is hostile.
        if server_name.contains(['/', '\\']) || server_name.contains("..") {
            return Err(MintError::InvalidName(server_name.to_string()));
        }

        if let Some(hit) = self.memo.read().get(server_name) {
            return Ok(hit.clone());
        }

        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&self.dir)
            .map_err(|err| MintError::Io {
                path: self.dir.clone(),
                source: err,
            })?;

        let key_path = self.dir.join(format!("{server_name}.key"));
        let csr_path = self.dir.join(format!("{server_name}.csr"));
        let cert_path = self.dir.join(format!("{server_name}.crt"));

        if !key_path.exists() {
            tracing::info!(name = %server_name, "minting a key");
            self.write_key(&key_path)?;
        }
        if !csr_path.exists() {
            tracing::info!(name = %server_name, "minting a csr");
            self.write_csr(server_name, &key_path, &csr_path)?;
        }
        if !cert_path.exists() {
            tracing::info!(name = %server_name, "minting a certificate");
            self.write_cert(server_name, &key_path, &cert_path)?;
        }

        let minted = load_minted(server_name, &cert_path, &key_path)?;
        self.memo
            .write()
            .insert(server_name.to_string(), minted.clone());
        Ok(minted)
    }

    fn write_key(&self, path: &Path) -> Result<(), MintError> {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS).map_err(MintError::KeyGen)?;
        let pem = key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|err| MintError::KeyEncoding(err.to_string()))?;
        write_private(path, pem.as_bytes())
    }

    fn write_csr(&self, name: &str, key_path: &Path, csr_path: &Path) -> Result<(), MintError> {
        let key_pair = load_key_pair(key_path)?;
        let params = name_params(name)?;
        let csr = params.serialize_request(&key_pair)?;
        write_private(csr_path, csr.pem()?.as_bytes())
    }

    fn write_cert(&self, name: &str, key_path: &Path, cert_path: &Path) -> Result<(), MintError> {
        let ca_pem = read_text(&self.root_cert)?;
        let ca_key_pem = read_text(&self.root_key)?;

        let ca_key = key_pair_from_pem(&ca_key_pem).map_err(|err| MintError::RootCa {
            path: self.root_key.clone(),
            reason: err.to_string(),
        })?;
        let ca_params =
            CertificateParams::from_ca_cert_pem(&ca_pem).map_err(|err| MintError::RootCa {
                path: self.root_cert.clone(),
                reason: err.to_string(),
            })?;
        let ca_cert = ca_params
            .self_signed(&ca_key)
            .map_err(|err| MintError::RootCa {
                path: self.root_cert.clone(),
                reason: err.to_string(),
            })?;

        let mut params = name_params(name)?;
        let serial: [u8; 16] = rand::random();
        params.serial_number = Some(SerialNumber::from_slice(&serial));
        params.distinguished_name = {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::OrganizationName, ORGANIZATION);
            dn
        };
        params.not_before = OffsetDateTime::now_utc() - Duration::hours(24);
        params.not_after = OffsetDateTime::now_utc() + Duration::days(365 * 10);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.is_ca = IsCa::ExplicitNoCa;

        let key_pair = load_key_pair(key_path)?;
        let cert = params.signed_by(&key_pair, &ca_cert, &ca_key)?;
        write_private(cert_path, cert.pem().as_bytes())
    }
}

/// Certificate parameters carrying only the SAN for `name`: an IP SAN when
/// the name parses as an address, a DNS SAN otherwise.
fn name_params(name: &str) -> Result<CertificateParams, MintError> {
    let mut params = CertificateParams::default();
    match name.parse::<IpAddr>() {
        Ok(ip) => params.subject_alt_names.push(SanType::IpAddress(ip)),
        Err(_) => params.subject_alt_names.push(SanType::DnsName(
            name.try_into()
                .map_err(|_| MintError::InvalidName(name.to_string()))?,
        )),
    }
    Ok(params)
}

/// Build an rcgen key pair from a PEM private key.
///
/// PKCS#1 RSA keys (the format the mint writes, and the usual format for an
/// OpenSSL-generated root key) are converted through PKCS#8; anything else
/// is handed to rcgen directly.
fn key_pair_from_pem(pem: &str) -> Result<KeyPair, MintError> {
    if pem.contains("RSA PRIVATE KEY") {
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|err| MintError::KeyEncoding(err.to_string()))?;
        let pkcs8 = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|err| MintError::KeyEncoding(err.to_string()))?;
        Ok(KeyPair::from_pkcs8_pem_and_sign_algo(
            &pkcs8,
            &PKCS_RSA_SHA256,
        )?)
    } else {
        Ok(KeyPair::from_pem(pem)?)
    }
}

fn load_key_pair(path: &Path) -> Result<KeyPair, MintError> {
    key_pair_from_pem(&read_text(path)?)
}

fn read_text(path: &Path) -> Result<String, MintError> {
    fs::read_to_string(path).map_err(|err| MintError::Io {
        path: path.to_path_buf(),
        source: err,
    })
}

/// Write a PEM artifact readable only by the daemon user.
fn write_private(path: &Path, bytes: &[u8]) -> Result<(), MintError> {
    let io_err = |err| MintError::Io {
        path: path.to_path_buf(),
        source: err,
    };

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)
}

/// Load the minted PEM files into rustls types.
fn load_minted(
    name: &str,
    cert_path: &Path,
    key_path: &Path,
) -> Result<MintedCert, MintError> {
    let load_err = |reason: String| MintError::Load {
        name: name.to_string(),
        reason,
    };

    let cert_file = fs::File::open(cert_path).map_err(|err| load_err(err.to_string()))?;
    let chain: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(cert_file))
            .collect::<Result<_, _>>()
            .map_err(|err| load_err(err.to_string()))?;
    if chain.is_empty() {
        return Err(load_err("no certificate in PEM".into()));
    }

    let key_file = fs::File::open(key_path).map_err(|err| load_err(err.to_string()))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|err| load_err(err.to_string()))?
        .ok_or_else(|| load_err("no private key in PEM".into()))?;

    Ok(MintedCert { chain, key })
}
