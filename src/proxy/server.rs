//! The gateway's TCP server.
//!
//! Listens on the configured address, spawns one task per client connection,
//! and serves HTTP/1.1 with upgrade support (needed for CONNECT). A watch
//! channel delivers the shutdown signal; a background task sweeps expired
//! secrets sessions.
//!
//! Request dispatch:
//! - `CONNECT` → TLS interception ([`super::connect`])
//! - `/v1/mux/...` → inspected mux endpoint (no client-leg TLS termination)
//! - everything else → pass-through relay via the path table
//!
//! # Example
//!
//! ```ignore
//! use modelgate::proxy::{GatewayServer, GatewayState};
//! use std::sync::Arc;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let server = GatewayServer::new("127.0.0.1:8989".parse()?, state, shutdown_rx);
//! server.run().await?;
//!
//! // Elsewhere:
//! shutdown_tx.send(true)?;
//! ```

use super::error::{ProxyError, ProxyResult};
use super::{connect, forward, GatewayState};
use crate::telemetry::AuditEvent;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How often expired secrets sessions are swept.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// The gateway server.
pub struct GatewayServer {
    listen: SocketAddr,
    state: Arc<GatewayState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    /// Create a server over shared gateway state.
    pub fn new(
        listen: SocketAddr,
        state: Arc<GatewayState>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listen,
            state,
            shutdown_rx,
        }
    }

    /// Run until the shutdown signal flips to `true`.
    pub async fn run(self) -> ProxyResult<()> {
        let listener = TcpListener::bind(self.listen).await?;
        info!("Gateway listening on {}", self.listen);

        let sweeper = self.spawn_session_sweeper();

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("Accepted connection from {peer}");
                            self.spawn_connection_handler(stream);
                        }
                        Err(e) => warn!("Accept failed: {e}"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        sweeper.abort();
        Ok(())
    }

    /// One task per client connection.
    fn spawn_connection_handler(&self, stream: TcpStream) {
        let state = self.state.clone();

        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, state).await {
                // Resets and broken pipes are routine client behavior.
                let text = e.to_string();
                if text.contains("connection reset") || text.contains("broken pipe") {
                    debug!("Connection ended: {e}");
                } else {
                    warn!("Connection error: {e}");
                }
            }
        });
    }

    /// Periodically wipe secrets sessions whose key lifetime elapsed.
    fn spawn_session_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let sessions = self.state.sessions.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let swept = sessions.sweep_expired();
                        if swept > 0 {
                            debug!("Swept {swept} expired secrets session(s)");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// Serve one client connection with upgrade support.
async fn serve_connection(stream: TcpStream, state: Arc<GatewayState>) -> ProxyResult<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(dispatch(req, state).await) }
    });

    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(io, service)
        .with_upgrades()
        .await
        .map_err(ProxyError::from)
}

/// Route a request to the CONNECT, mux-endpoint, or pass-through path and
/// turn errors into their mapped status codes.
async fn dispatch(
    req: Request<Incoming>,
    state: Arc<GatewayState>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let result = if req.method() == Method::CONNECT {
        connect::handle_connect(req, state.clone()).await
    } else if req.uri().path().starts_with(forward::MUX_PATH_PREFIX) {
        forward::handle_mux_endpoint(req, state.clone()).await
    } else {
        forward::handle_passthrough(req, state.clone()).await
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            let status = e.status();
            if status == StatusCode::BAD_GATEWAY {
                state.audit.log(AuditEvent::UpstreamError {
                    message: e.to_string(),
                });
            }
            debug!("Request failed with {status}: {e}");
            forward::error_response(status, &e.to_string())
        }
    }
}
