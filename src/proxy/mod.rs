//! The intercepting proxy engine.
//!
//! A byte-level forward proxy that transparently decrypts HTTPS by acting as
//! a TLS server under dynamically issued certificates:
//!
//! - [`server`]: accept loop, per-connection tasks, request dispatch
//! - [`connect`]: CONNECT handshake and client-leg TLS upgrade
//! - [`forward`]: inspection (pipeline + muxing) and upstream forwarding
//! - [`routes`]: path→target resolution and header allow/deny rules
//! - [`tls`]: certificate resolution and the two TLS legs
//! - [`client`]: low-level upstream HTTP client
//!
//! Connection lifecycle: header parsing and dispatch are hyper's HTTP/1.1
//! machinery; `CONNECT` upgrades into a TLS-intercepted tunnel whose
//! decrypted bytes are re-parsed as inner requests; everything else relays
//! through the configured path table, either inspected (`/v1/mux/...`) or
//! pass-through.

pub mod client;
pub mod connect;
mod error;
pub mod forward;
pub mod routes;
pub mod server;
pub mod tls;

pub use error::{ProxyError, ProxyResult};
pub use routes::{RouteEntry, RouteTable};
pub use server::GatewayServer;
pub use tls::CertifiedKeyCache;

use crate::collab::{AuditStore, ProviderRegistry};
use crate::mux::MuxRouter;
use crate::pipeline::select::PipelineSelector;
use crate::secrets::SessionStore;
use crate::telemetry::AuditLogger;
use std::sync::Arc;

/// Shared gateway components, assembled once by the composition root and
/// handed to every connection task.
pub struct GatewayState {
    /// Certified-key cache over the certificate authority.
    pub key_cache: Arc<CertifiedKeyCache>,
    /// Secrets session store.
    pub sessions: Arc<SessionStore>,
    /// Pipeline selection by request kind.
    pub selector: Arc<PipelineSelector>,
    /// Muxing rule matcher/router.
    pub router: Arc<MuxRouter<dyn ProviderRegistry>>,
    /// Provider catalog and executor.
    pub providers: Arc<dyn ProviderRegistry>,
    /// Path→target table for non-CONNECT relay.
    pub routes: Arc<RouteTable>,
    /// Request/alert persistence collaborator.
    pub audit_store: Arc<dyn AuditStore>,
    /// Syslog audit trail.
    pub audit: Arc<AuditLogger>,
    /// Inbound body cap in bytes.
    pub max_body_bytes: usize,
}
