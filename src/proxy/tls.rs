//! TLS plumbing for interception.
//!
//! - A cache of rustls [`CertifiedKey`]s built from the certificate
//!   authority's PEM files, so the handshake path never touches disk twice
//!   for the same domain
//! - A certificate resolver that issues on demand from the SNI (with the
//!   CONNECT host as fallback for SNI-less clients)
//! - Acceptor/connector builders for the two TLS legs
//!
//! # ALPN
//!
//! The acceptor forces HTTP/1.1. Allowing H2 negotiation would break the
//! inner request re-parse: the decrypted stream is handled by an HTTP/1.1
//! server, and H2's multiplexed binary framing is a different protocol.

use super::error::ProxyError;
use crate::ca::CertificateAuthority;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, error, trace};

/// How long a parsed [`CertifiedKey`] is served before the CA's on-disk state
/// is consulted again (which is where grace-window renewal happens).
const KEY_CACHE_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 12);

/// Cache of parsed signing keys per domain, backed by the CA's leaf store.
pub struct CertifiedKeyCache {
    cache: RwLock<HashMap<String, (Arc<CertifiedKey>, Instant)>>,
    ca: Arc<CertificateAuthority>,
}

impl CertifiedKeyCache {
    /// Create a cache over the given CA.
    pub fn new(ca: Arc<CertificateAuthority>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ca,
        }
    }

    /// Get or build the signing key for `domain`.
    ///
    /// Entries are refreshed from the CA after [`KEY_CACHE_MAX_AGE`], so a
    /// leaf renewed under the grace window is picked up without a restart.
    pub fn get_or_issue(&self, domain: &str) -> Result<Arc<CertifiedKey>, ProxyError> {
        let domain_lower = domain.to_lowercase();

        {
            let cache = self.cache.read().unwrap();
            if let Some((key, built_at)) = cache.get(&domain_lower) {
                if built_at.elapsed() < KEY_CACHE_MAX_AGE {
                    trace!("Certified key cache hit for {domain}");
                    return Ok(key.clone());
                }
            }
        }

        debug!("Building certified key for {domain}");
        let paths = self.ca.get_domain_certificate(&domain_lower)?;

        let cert_pem = fs::read_to_string(&paths.cert_path)?;
        let key_pem = fs::read_to_string(&paths.key_path)?;

        let cert_chain: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut cert_pem.as_bytes())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ProxyError::Tls(format!("Failed to parse certificate PEM: {e}")))?;
        if cert_chain.is_empty() {
            return Err(ProxyError::Tls("No certificates found in PEM".into()));
        }

        let private_key: PrivateKeyDer<'static> =
            rustls_pemfile::private_key(&mut key_pem.as_bytes())
                .map_err(|e| ProxyError::Tls(format!("Failed to parse private key PEM: {e}")))?
                .ok_or_else(|| ProxyError::Tls("No private key found in PEM".into()))?;

        let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&private_key)
            .map_err(|e| ProxyError::Tls(format!("Failed to create signing key: {e}")))?;

        let certified = Arc::new(CertifiedKey::new(cert_chain, signing_key));

        self.cache
            .write()
            .unwrap()
            .insert(domain_lower, (certified.clone(), Instant::now()));

        Ok(certified)
    }

    /// Drop all cached keys (after CA rotation).
    pub fn clear(&self) {
        self.cache.write().unwrap().clear();
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.cache.read().unwrap().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.read().unwrap().is_empty()
    }
}

/// Resolves server certificates from the SNI in the ClientHello, falling back
/// to the CONNECT host for clients that send none.
pub struct SniCertResolver {
    cache: Arc<CertifiedKeyCache>,
    connect_host: Option<String>,
}

impl SniCertResolver {
    /// Resolver using SNI only.
    pub fn new(cache: Arc<CertifiedKeyCache>) -> Self {
        Self {
            cache,
            connect_host: None,
        }
    }

    /// Resolver with the CONNECT host as fallback for SNI-less clients.
    pub fn with_connect_host(cache: Arc<CertifiedKeyCache>, host: String) -> Self {
        Self {
            cache,
            connect_host: Some(host),
        }
    }
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let domain = client_hello
            .server_name()
            .map(|s| s.to_string())
            .or_else(|| self.connect_host.clone())?;

        match self.cache.get_or_issue(&domain) {
            Ok(key) => Some(key),
            Err(e) => {
                error!("Cannot issue certificate for {domain}: {e}");
                None
            }
        }
    }
}

impl std::fmt::Debug for SniCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniCertResolver")
            .field("connect_host", &self.connect_host)
            .field("cached", &self.cache.len())
            .finish()
    }
}

/// TLS acceptor for the client leg, with on-demand certificates.
///
/// ALPN is pinned to http/1.1 (see the module docs).
pub fn tls_acceptor(
    cache: Arc<CertifiedKeyCache>,
    connect_host: Option<String>,
) -> TlsAcceptor {
    let resolver: Arc<dyn ResolvesServerCert> = match connect_host {
        Some(host) => Arc::new(SniCertResolver::with_connect_host(cache, host)),
        None => Arc::new(SniCertResolver::new(cache)),
    };

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    TlsAcceptor::from(Arc::new(config))
}

/// TLS connector for the upstream leg, trusting the system roots.
pub fn tls_connector() -> Result<TlsConnector, ProxyError> {
    let mut root_store = rustls::RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for err in native.errors {
        debug!("Skipping unloadable native cert: {err}");
    }
    for cert in native.certs {
        if let Err(e) = root_store.add(cert) {
            debug!("Skipping unaddable cert: {e}");
        }
    }

    if root_store.is_empty() {
        return Err(ProxyError::Tls("No system root certificates found".into()));
    }

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Convert a domain string to a rustls ServerName.
pub fn server_name(domain: &str) -> Result<ServerName<'static>, ProxyError> {
    ServerName::try_from(domain.to_string())
        .map_err(|_| ProxyError::Tls(format!("Invalid server name: {domain}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> Arc<CertifiedKeyCache> {
        let dir = tempfile::tempdir().unwrap();
        let ca = Arc::new(CertificateAuthority::generate(dir.path()).unwrap());
        // Leak the tempdir so the CA files survive the test body.
        std::mem::forget(dir);
        Arc::new(CertifiedKeyCache::new(ca))
    }

    #[test]
    fn test_key_cache_issues_and_caches() {
        let cache = cache();
        assert!(cache.is_empty());

        let first = cache.get_or_issue("example.com").unwrap();
        let second = cache.get_or_issue("EXAMPLE.COM").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_key_cache_clear() {
        let cache = cache();
        cache.get_or_issue("a.example.com").unwrap();
        cache.get_or_issue("b.example.com").unwrap();
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_acceptor_builds() {
        let cache = cache();
        let _with_hint = tls_acceptor(cache.clone(), Some("example.com".into()));
        let _without = tls_acceptor(cache, None);
    }

    #[test]
    fn test_server_name_conversion() {
        assert!(server_name("api.example.com").is_ok());
        assert!(server_name("").is_err());
    }
}
