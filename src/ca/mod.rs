//! Certificate authority and domain certificate cache for TLS interception.
//!
//! This module owns the root of trust for the gateway:
//! - A persistent root CA (certificate + private key as PEM under the
//!   configured certificate directory)
//! - On-demand issuance of per-domain leaf certificates, cached on disk as
//!   `{domain}.crt` / `{domain}.key` and in memory by domain
//! - Bootstrap validation that regenerates missing or invalid material
//!
//! # Renewal
//!
//! A cached leaf is only reused while it verifies against the active CA *and*
//! its expiry lies beyond a renewal grace window. Verification runs at
//! `now + grace`, so a certificate about to expire fails the check and is
//! reissued before clients ever see it expire.
//!
//! # Concurrency
//!
//! Issuance is synchronous crypto work. A per-domain single-flight lock
//! ensures two concurrent first contacts with a brand-new domain produce
//! exactly one certificate.
//!
//! # Example
//!
//! ```ignore
//! use modelgate::ca::CertificateAuthority;
//! use std::path::Path;
//!
//! let ca = CertificateAuthority::check_and_ensure_certificates(
//!     Path::new("/var/lib/modelgate/certs"),
//!     "localhost",
//! )?;
//!
//! let leaf = ca.get_domain_certificate("api.example.com")?;
//! println!("cert at {:?}", leaf.cert_path);
//! ```

mod error;

pub use error::CaError;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyUsagePurpose, SanType,
};
use rustls_pki_types::{CertificateDer, UnixTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

/// CA certificate validity (days).
const CA_VALIDITY_DAYS: i64 = 365;

/// Leaf certificate validity (days).
const LEAF_VALIDITY_DAYS: i64 = 7;

/// Renewal grace window: a leaf expiring within this window is reissued.
const RENEWAL_GRACE_DAYS: i64 = 2;

/// File names for the CA material under the certificate directory.
const CA_CERT_FILE: &str = "ca.crt";
const CA_KEY_FILE: &str = "ca.key";
const CA_META_FILE: &str = "ca-meta.json";

/// Certificate issued for a specific domain.
///
/// Holds the on-disk paths of the PEM files plus the creation time of the
/// in-memory cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainCertPaths {
    /// PEM certificate path (`{domain}.crt`).
    pub cert_path: PathBuf,
    /// PEM private key path (`{domain}.key`).
    pub key_path: PathBuf,
    /// When this entry was created or last validated.
    pub created_at: SystemTime,
}

/// Validity window persisted next to the CA so it can be checked on reload
/// without reparsing the certificate.
#[derive(Debug, Serialize, Deserialize)]
struct CaMeta {
    not_before_unix: i64,
    not_after_unix: i64,
}

/// Root certificate authority plus the per-domain leaf cache.
///
/// Constructed once by the composition root and shared by reference; there is
/// no ambient global instance.
pub struct CertificateAuthority {
    /// Directory holding all PEM material.
    cert_dir: PathBuf,
    /// CA signing key.
    ca_key_pair: rcgen::KeyPair,
    /// CA certificate parameters (used to build the signing [`Issuer`]).
    ca_params: CertificateParams,
    /// PEM-encoded CA certificate.
    ca_cert_pem: String,
    /// DER-encoded CA certificate (trust anchor for leaf verification).
    ca_cert_der: CertificateDer<'static>,
    /// CA expiry.
    not_after: OffsetDateTime,
    /// Validated leaves by lowercase domain.
    leaves: Mutex<HashMap<String, DomainCertPaths>>,
    /// Per-domain issuance locks (single-flight).
    issue_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CertificateAuthority {
    /// Generate a fresh CA under `cert_dir`, overwriting any existing one.
    ///
    /// Creates the directory with 0700 permissions, writes `ca.crt`,
    /// `ca.key` (0600) and the validity metadata file.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation, key generation, certificate
    /// generation, or any file write fails. Disk I/O errors are fatal to this
    /// operation.
    pub fn generate(cert_dir: &Path) -> Result<Self, CaError> {
        info!("Generating gateway CA certificate under {:?}", cert_dir);

        ensure_secure_dir(cert_dir)?;

        let ca_key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384)
            .map_err(|e| CaError::KeyGeneration(e.to_string()))?;

        let now = OffsetDateTime::now_utc();
        let not_after = now + Duration::days(CA_VALIDITY_DAYS);
        let ca_params = ca_params(now, not_after);

        let ca_cert = ca_params
            .clone()
            .self_signed(&ca_key_pair)
            .map_err(|e| CaError::CertGeneration(e.to_string()))?;

        let ca_cert_pem = ca_cert.pem();
        let ca_key_pem = ca_key_pair.serialize_pem();

        let cert_path = cert_dir.join(CA_CERT_FILE);
        fs::write(&cert_path, &ca_cert_pem).map_err(|e| CaError::WriteFile {
            path: cert_path.clone(),
            source: e,
        })?;

        write_restricted_file(&cert_dir.join(CA_KEY_FILE), &ca_key_pem)?;

        let meta = CaMeta {
            not_before_unix: now.unix_timestamp(),
            not_after_unix: not_after.unix_timestamp(),
        };
        let meta_path = cert_dir.join(CA_META_FILE);
        let meta_json = serde_json::to_string(&meta)
            .map_err(|e| CaError::CertGeneration(format!("meta serialization: {e}")))?;
        fs::write(&meta_path, meta_json).map_err(|e| CaError::WriteFile {
            path: meta_path,
            source: e,
        })?;

        let ca_cert_der = pem_to_der(&ca_cert_pem, &cert_path)?;

        debug!("Gateway CA generated, valid until {}", not_after);

        Ok(Self {
            cert_dir: cert_dir.to_path_buf(),
            ca_key_pair,
            ca_params,
            ca_cert_pem,
            ca_cert_der,
            not_after,
            leaves: Mutex::new(HashMap::new()),
            issue_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Load an existing CA from `cert_dir`.
    ///
    /// The loaded key and certificate are cross-checked by signing a probe
    /// leaf and verifying it against the stored certificate, so a key that no
    /// longer matches the certificate is rejected here instead of producing
    /// unverifiable leaves later.
    ///
    /// # Errors
    ///
    /// Returns an error if any file is missing, malformed, expired, or the
    /// key/certificate pair is inconsistent.
    pub fn load(cert_dir: &Path) -> Result<Self, CaError> {
        let cert_path = cert_dir.join(CA_CERT_FILE);
        let key_path = cert_dir.join(CA_KEY_FILE);
        let meta_path = cert_dir.join(CA_META_FILE);

        if !cert_path.exists() || !key_path.exists() || !meta_path.exists() {
            return Err(CaError::MissingCa(cert_dir.to_path_buf()));
        }

        let ca_cert_pem = fs::read_to_string(&cert_path).map_err(|e| CaError::ReadFile {
            path: cert_path.clone(),
            source: e,
        })?;
        let ca_key_pem = fs::read_to_string(&key_path).map_err(|e| CaError::ReadFile {
            path: key_path.clone(),
            source: e,
        })?;
        let meta_json = fs::read_to_string(&meta_path).map_err(|e| CaError::ReadFile {
            path: meta_path.clone(),
            source: e,
        })?;

        let meta: CaMeta = serde_json::from_str(&meta_json).map_err(|e| CaError::MalformedPem {
            path: meta_path,
            message: e.to_string(),
        })?;

        let not_before = OffsetDateTime::from_unix_timestamp(meta.not_before_unix)
            .map_err(|e| CaError::CertGeneration(format!("invalid CA metadata: {e}")))?;
        let not_after = OffsetDateTime::from_unix_timestamp(meta.not_after_unix)
            .map_err(|e| CaError::CertGeneration(format!("invalid CA metadata: {e}")))?;

        // An expiring CA cannot sign leaves that outlive the grace window.
        let horizon = OffsetDateTime::now_utc()
            + Duration::days(LEAF_VALIDITY_DAYS)
            + Duration::days(RENEWAL_GRACE_DAYS);
        if not_after < horizon {
            return Err(CaError::Verification {
                domain: "<ca>".to_string(),
                message: format!("CA expires {not_after}, within the renewal horizon"),
            });
        }

        let ca_key_pair = rcgen::KeyPair::from_pem(&ca_key_pem).map_err(|e| {
            CaError::MalformedPem {
                path: key_path,
                message: e.to_string(),
            }
        })?;

        let ca_cert_der = pem_to_der(&ca_cert_pem, &cert_path)?;
        let ca_params = ca_params(not_before, not_after);

        let ca = Self {
            cert_dir: cert_dir.to_path_buf(),
            ca_key_pair,
            ca_params,
            ca_cert_pem,
            ca_cert_der,
            not_after,
            leaves: Mutex::new(HashMap::new()),
            issue_locks: Mutex::new(HashMap::new()),
        };

        // Probe: sign a throwaway leaf and verify it against the stored
        // certificate. Fails when ca.key and ca.crt have diverged.
        let (probe_pem, _) = ca.issue_leaf_pem("probe.invalid")?;
        let probe_der = pem_to_der(&probe_pem, Path::new("<probe>"))?;
        ca.verify_leaf_der(&probe_der, "probe.invalid", SystemTime::now())?;

        debug!("Loaded gateway CA from {:?}, valid until {}", cert_dir, not_after);

        Ok(ca)
    }

    /// Idempotent bootstrap of the CA and the gateway's own server
    /// certificate.
    ///
    /// - Missing or invalid CA: regenerate the CA and cascade a fresh server
    ///   certificate for `gateway_domain`.
    /// - Valid CA but missing/invalid server certificate: regenerate only the
    ///   server certificate.
    /// - Everything valid: no writes.
    ///
    /// Existing leaf certificates in the directory are revalidated against
    /// the active CA; failures are excluded from the cache (and reissued
    /// lazily), not trusted.
    pub fn check_and_ensure_certificates(
        cert_dir: &Path,
        gateway_domain: &str,
    ) -> Result<Self, CaError> {
        let ca = match Self::load(cert_dir) {
            Ok(ca) => ca,
            Err(e) => {
                info!("CA invalid or missing ({e}); regenerating");
                let ca = Self::generate(cert_dir)?;
                // Cascade: the server certificate must chain to the new CA.
                ca.issue_and_store(gateway_domain)?;
                ca.load_existing_certificates();
                return Ok(ca);
            }
        };

        ca.load_existing_certificates();

        if !ca.leaf_file_is_valid(gateway_domain) {
            info!("Server certificate for '{gateway_domain}' invalid; regenerating");
            ca.issue_and_store(gateway_domain)?;
        }

        Ok(ca)
    }

    /// Get (or issue) the certificate for `domain`.
    ///
    /// Returns the cached paths when the stored certificate still verifies
    /// against the current CA beyond the renewal grace window; otherwise a
    /// new leaf is synthesized, persisted and cached.
    ///
    /// # Errors
    ///
    /// Disk I/O failures and issuance failures abort the calling operation.
    pub fn get_domain_certificate(&self, domain: &str) -> Result<DomainCertPaths, CaError> {
        let domain = normalize_domain(domain)?;

        if let Some(paths) = self.leaves.lock().unwrap().get(&domain).cloned() {
            return Ok(paths);
        }

        // Single-flight per domain: concurrent first contacts must not issue
        // twice.
        let domain_lock = {
            let mut locks = self.issue_locks.lock().unwrap();
            locks
                .entry(domain.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = domain_lock.lock().unwrap();

        // Re-check under the domain lock: another task may have finished.
        if let Some(paths) = self.leaves.lock().unwrap().get(&domain).cloned() {
            return Ok(paths);
        }

        if self.leaf_file_is_valid(&domain) {
            let paths = self.leaf_paths(&domain);
            self.leaves.lock().unwrap().insert(domain, paths.clone());
            return Ok(paths);
        }

        debug!("Issuing certificate for {domain}");
        let paths = self.issue_and_store(&domain)?;
        Ok(paths)
    }

    /// Revalidate every `*.crt` in the certificate directory against the
    /// active CA and warm the in-memory cache with the survivors.
    ///
    /// A certificate that fails signature verification or lies within the
    /// renewal grace window is skipped (not trusted) and will be regenerated
    /// lazily on next use. Returns the number of certificates loaded.
    pub fn load_existing_certificates(&self) -> usize {
        let entries = match fs::read_dir(&self.cert_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read certificate directory {:?}: {e}", self.cert_dir);
                return 0;
            }
        };

        let mut loaded = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("crt") || stem == "ca" {
                continue;
            }
            if !self.leaf_paths(stem).key_path.exists() {
                continue;
            }
            if self.leaf_file_is_valid(stem) {
                self.leaves
                    .lock()
                    .unwrap()
                    .insert(stem.to_string(), self.leaf_paths(stem));
                loaded += 1;
            } else {
                debug!("Skipping stale certificate for {stem}");
            }
        }

        debug!("Loaded {loaded} domain certificates from {:?}", self.cert_dir);
        loaded
    }

    /// CA certificate as PEM (for client trust-store installation).
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// CA expiry.
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    /// Certificate directory.
    pub fn cert_dir(&self) -> &Path {
        &self.cert_dir
    }

    /// Number of cached (validated) domain certificates.
    pub fn cached_leaf_count(&self) -> usize {
        self.leaves.lock().unwrap().len()
    }

    /// On-disk paths for a domain's PEM files.
    fn leaf_paths(&self, domain: &str) -> DomainCertPaths {
        DomainCertPaths {
            cert_path: self.cert_dir.join(format!("{domain}.crt")),
            key_path: self.cert_dir.join(format!("{domain}.key")),
            created_at: SystemTime::now(),
        }
    }

    /// Generate a leaf for `domain` signed by this CA; returns (cert, key)
    /// PEM without touching disk.
    fn issue_leaf_pem(&self, domain: &str) -> Result<(String, String), CaError> {
        // Leaves use a smaller curve than the CA.
        let leaf_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| CaError::KeyGeneration(e.to_string()))?;

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(domain.to_string()));
        params.distinguished_name = dn;

        params.subject_alt_names = vec![SanType::DnsName(
            domain
                .try_into()
                .map_err(|_| CaError::InvalidDomain(domain.to_string()))?,
        )];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(LEAF_VALIDITY_DAYS);

        let issuer = Issuer::from_params(&self.ca_params, &self.ca_key_pair);

        let cert = params
            .signed_by(&leaf_key, &issuer)
            .map_err(|e| CaError::Signing(e.to_string()))?;

        Ok((cert.pem(), leaf_key.serialize_pem()))
    }

    /// Issue, persist and cache a leaf for `domain`.
    fn issue_and_store(&self, domain: &str) -> Result<DomainCertPaths, CaError> {
        let (cert_pem, key_pem) = self.issue_leaf_pem(domain)?;
        let paths = self.leaf_paths(domain);

        fs::write(&paths.cert_path, &cert_pem).map_err(|e| CaError::WriteFile {
            path: paths.cert_path.clone(),
            source: e,
        })?;
        write_restricted_file(&paths.key_path, &key_pem)?;

        self.leaves
            .lock()
            .unwrap()
            .insert(domain.to_string(), paths.clone());

        info!("Issued certificate for {domain}");
        Ok(paths)
    }

    /// True when the stored leaf for `domain` verifies against the active CA
    /// at `now + grace`.
    fn leaf_file_is_valid(&self, domain: &str) -> bool {
        let paths = self.leaf_paths(domain);
        if !paths.cert_path.exists() || !paths.key_path.exists() {
            return false;
        }

        let pem = match fs::read_to_string(&paths.cert_path) {
            Ok(pem) => pem,
            Err(_) => return false,
        };
        let der = match pem_to_der(&pem, &paths.cert_path) {
            Ok(der) => der,
            Err(_) => return false,
        };

        let grace_horizon = SystemTime::now()
            + std::time::Duration::from_secs(60 * 60 * 24 * RENEWAL_GRACE_DAYS as u64);
        self.verify_leaf_der(&der, domain, grace_horizon).is_ok()
    }

    /// Verify a leaf DER against this CA at the given point in time.
    fn verify_leaf_der(
        &self,
        leaf: &CertificateDer<'_>,
        domain: &str,
        at: SystemTime,
    ) -> Result<(), CaError> {
        let anchor = webpki::anchor_from_trusted_cert(&self.ca_cert_der).map_err(|e| {
            CaError::Verification {
                domain: domain.to_string(),
                message: format!("CA is not a valid trust anchor: {e}"),
            }
        })?;

        let cert = webpki::EndEntityCert::try_from(leaf).map_err(|e| CaError::Verification {
            domain: domain.to_string(),
            message: format!("unparseable leaf: {e}"),
        })?;

        let unix = at
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();

        cert.verify_for_usage(
            webpki::ALL_VERIFICATION_ALGS,
            &[anchor],
            &[],
            UnixTime::since_unix_epoch(unix),
            webpki::KeyUsage::server_auth(),
            None,
            None,
        )
        .map(|_| ())
        .map_err(|e| CaError::Verification {
            domain: domain.to_string(),
            message: e.to_string(),
        })
    }
}

/// CA certificate parameters (shared by generation and reload so the issuer
/// DN stays stable across restarts).
fn ca_params(not_before: OffsetDateTime, not_after: OffsetDateTime) -> CertificateParams {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String("modelgate CA".to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String("modelgate".to_string()),
    );
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.not_before = not_before;
    params.not_after = not_after;

    params
}

/// Parse the first certificate out of a PEM string.
fn pem_to_der(pem: &str, path: &Path) -> Result<CertificateDer<'static>, CaError> {
    rustls_pemfile::certs(&mut pem.as_bytes())
        .next()
        .ok_or_else(|| CaError::MalformedPem {
            path: path.to_path_buf(),
            message: "no certificate block".to_string(),
        })?
        .map_err(|e| CaError::MalformedPem {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Lowercase and sanity-check a domain before it becomes a file name.
fn normalize_domain(domain: &str) -> Result<String, CaError> {
    let domain = domain.trim().to_lowercase();
    if domain.is_empty()
        || !domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(CaError::InvalidDomain(domain));
    }
    Ok(domain)
}

/// Create a directory with 0700 permissions.
fn ensure_secure_dir(dir: &Path) -> Result<(), CaError> {
    fs::create_dir_all(dir).map_err(|e| CaError::CreateDir {
        path: dir.to_path_buf(),
        source: e,
    })?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(CaError::Permissions)
}

/// Write a file with restricted permissions (0600).
fn write_restricted_file(path: &Path, content: &str) -> Result<(), CaError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| CaError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;

    file.write_all(content.as_bytes())
        .map_err(|e| CaError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ca_generation() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::generate(dir.path()).unwrap();

        assert!(dir.path().join(CA_CERT_FILE).exists());
        assert!(dir.path().join(CA_KEY_FILE).exists());
        assert!(ca.ca_cert_pem().contains("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn test_key_file_permissions() {
        let dir = tempfile::tempdir().unwrap();
        CertificateAuthority::generate(dir.path()).unwrap();

        let mode = fs::metadata(dir.path().join(CA_KEY_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_domain_cert_verifies_against_ca() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::generate(dir.path()).unwrap();

        let paths = ca.get_domain_certificate("api.example.com").unwrap();
        let pem = fs::read_to_string(&paths.cert_path).unwrap();
        let der = pem_to_der(&pem, &paths.cert_path).unwrap();

        ca.verify_leaf_der(&der, "api.example.com", SystemTime::now())
            .unwrap();
    }

    #[test]
    fn test_domain_cert_cached_paths_are_stable() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::generate(dir.path()).unwrap();

        let first = ca.get_domain_certificate("example.com").unwrap();
        let second = ca.get_domain_certificate("example.com").unwrap();

        assert_eq!(first.cert_path, second.cert_path);
        assert_eq!(first.key_path, second.key_path);
        assert_eq!(ca.cached_leaf_count(), 1);
    }

    #[test]
    fn test_foreign_cert_is_reissued() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let ca_a = CertificateAuthority::generate(dir_a.path()).unwrap();
        let ca_b = CertificateAuthority::generate(dir_b.path()).unwrap();

        // A leaf signed by a different CA lands in ca_b's directory.
        let foreign = ca_a.get_domain_certificate("example.com").unwrap();
        fs::copy(&foreign.cert_path, dir_b.path().join("example.com.crt")).unwrap();
        fs::copy(&foreign.key_path, dir_b.path().join("example.com.key")).unwrap();

        // The foreign cert must not be trusted; a fresh one is issued.
        let reissued = ca_b.get_domain_certificate("example.com").unwrap();
        let pem = fs::read_to_string(&reissued.cert_path).unwrap();
        let der = pem_to_der(&pem, &reissued.cert_path).unwrap();
        ca_b.verify_leaf_der(&der, "example.com", SystemTime::now())
            .unwrap();
    }

    #[test]
    fn test_load_existing_skips_foreign_certs() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let ca_a = CertificateAuthority::generate(dir_a.path()).unwrap();
        let ca_b = CertificateAuthority::generate(dir_b.path()).unwrap();

        ca_b.get_domain_certificate("good.example.com").unwrap();
        let foreign = ca_a.get_domain_certificate("bad.example.com").unwrap();
        fs::copy(&foreign.cert_path, dir_b.path().join("bad.example.com.crt")).unwrap();
        fs::copy(&foreign.key_path, dir_b.path().join("bad.example.com.key")).unwrap();

        // Fresh instance over the same directory.
        let reloaded = CertificateAuthority::load(dir_b.path()).unwrap();
        let loaded = reloaded.load_existing_certificates();

        assert_eq!(loaded, 1);
        assert_eq!(reloaded.cached_leaf_count(), 1);
    }

    #[test]
    fn test_check_and_ensure_bootstraps_from_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ca =
            CertificateAuthority::check_and_ensure_certificates(dir.path(), "localhost").unwrap();

        assert!(dir.path().join(CA_CERT_FILE).exists());
        assert!(dir.path().join("localhost.crt").exists());
        assert!(ca.cached_leaf_count() >= 1);
    }

    #[test]
    fn test_check_and_ensure_regenerates_corrupt_ca() {
        let dir = tempfile::tempdir().unwrap();
        CertificateAuthority::check_and_ensure_certificates(dir.path(), "localhost").unwrap();

        let old_pem = fs::read_to_string(dir.path().join(CA_CERT_FILE)).unwrap();
        fs::write(dir.path().join(CA_KEY_FILE), "not a key").unwrap();

        let ca =
            CertificateAuthority::check_and_ensure_certificates(dir.path(), "localhost").unwrap();
        let new_pem = fs::read_to_string(dir.path().join(CA_CERT_FILE)).unwrap();

        assert_ne!(old_pem, new_pem);
        // Cascaded server certificate chains to the regenerated CA.
        let paths = ca.get_domain_certificate("localhost").unwrap();
        let pem = fs::read_to_string(&paths.cert_path).unwrap();
        let der = pem_to_der(&pem, &paths.cert_path).unwrap();
        ca.verify_leaf_der(&der, "localhost", SystemTime::now())
            .unwrap();
    }

    #[test]
    fn test_check_and_ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        CertificateAuthority::check_and_ensure_certificates(dir.path(), "localhost").unwrap();
        let first = fs::read_to_string(dir.path().join("localhost.crt")).unwrap();

        CertificateAuthority::check_and_ensure_certificates(dir.path(), "localhost").unwrap();
        let second = fs::read_to_string(dir.path().join("localhost.crt")).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_concurrent_issuance_single_flight() {
        let dir = tempfile::tempdir().unwrap();
        let ca = Arc::new(CertificateAuthority::generate(dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ca = ca.clone();
                std::thread::spawn(move || ca.get_domain_certificate("race.example.com").unwrap())
            })
            .collect();

        let paths: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(paths.windows(2).all(|w| w[0].cert_path == w[1].cert_path));
        assert_eq!(ca.cached_leaf_count(), 1);
    }

    #[test]
    fn test_invalid_domain_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::generate(dir.path()).unwrap();

        assert!(matches!(
            ca.get_domain_certificate("../escape"),
            Err(CaError::InvalidDomain(_))
        ));
        assert!(matches!(
            ca.get_domain_certificate(""),
            Err(CaError::InvalidDomain(_))
        ));
    }
}
