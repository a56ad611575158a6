//! HTTP CONNECT handling and TLS upgrade.
//!
//! Flow for `CONNECT host:port`:
//!
//! 1. Reply `200 Connection Established` and take over the upgraded socket
//! 2. Accept TLS from the client using a certificate issued for the CONNECT
//!    host (SNI wins when present)
//! 3. Re-parse the decrypted bytes as inner HTTP/1.1 requests
//! 4. Run each inner request through the inspection path
//!    ([`super::forward::handle_intercepted`]), which opens its own TLS leg
//!    to the true upstream
//!
//! A TLS handshake failure on either leg closes the connection; the inner
//! server answers per-request errors with their mapped status codes before
//! closing.

use super::error::{ProxyError, ProxyResult};
use super::forward;
use super::tls::tls_acceptor;
use super::GatewayState;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle a CONNECT request: reply 200 and intercept the tunnel.
pub async fn handle_connect(
    req: Request<Incoming>,
    state: Arc<GatewayState>,
) -> ProxyResult<Response<BoxBody<Bytes, hyper::Error>>> {
    let authority = req
        .uri()
        .authority()
        .ok_or_else(|| ProxyError::MalformedRequest("CONNECT without authority".into()))?
        .to_string();

    let (host, port) = parse_host_port(&authority)?;
    debug!("CONNECT to {host}:{port}");

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = intercept_tunnel(upgraded, &host, port, state).await {
                    // Resets are routine here; real failures were already
                    // answered on the inner leg where possible.
                    debug!("Tunnel for {host}:{port} ended: {e}");
                }
            }
            Err(e) => warn!("HTTP upgrade failed for {host}:{port}: {e}"),
        }
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .body(forward::empty_body())
        .unwrap_or_else(|_| forward::error_response(StatusCode::OK, "")))
}

/// Terminate the client's TLS under an issued certificate and serve the
/// decrypted bytes as inner HTTP/1.1 requests.
async fn intercept_tunnel(
    upgraded: Upgraded,
    host: &str,
    port: u16,
    state: Arc<GatewayState>,
) -> ProxyResult<()> {
    let acceptor = tls_acceptor(state.key_cache.clone(), Some(host.to_string()));

    let client_tls = acceptor
        .accept(TokioIo::new(upgraded))
        .await
        .map_err(|e| ProxyError::Tls(format!("Client TLS handshake failed: {e}")))?;

    debug!("TLS established with client for {host}:{port}");

    let origin_host = host.to_string();
    let service = service_fn(move |req: Request<Incoming>| {
        let state = state.clone();
        let origin_host = origin_host.clone();

        async move {
            match forward::handle_intercepted(req, &origin_host, port, state).await {
                Ok(response) => Ok::<_, Infallible>(response),
                Err(e) => {
                    warn!("Intercepted request to {origin_host} failed: {e}");
                    Ok(forward::error_response(e.status(), &e.to_string()))
                }
            }
        }
    });

    hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(client_tls), service)
        .await
        .map_err(ProxyError::from)
}

/// Parse a CONNECT authority into host and port (443 when omitted).
fn parse_host_port(authority: &str) -> ProxyResult<(String, u16)> {
    if let Some((host, port_str)) = authority.rsplit_once(':') {
        // IPv6 authorities look like [::1]:443.
        if host.starts_with('[') && host.ends_with(']') {
            let port = port_str.parse::<u16>().map_err(|_| {
                ProxyError::MalformedRequest(format!("invalid port '{port_str}'"))
            })?;
            return Ok((host[1..host.len() - 1].to_string(), port));
        }

        let port = port_str
            .parse::<u16>()
            .map_err(|_| ProxyError::MalformedRequest(format!("invalid port '{port_str}'")))?;
        Ok((host.to_string(), port))
    } else {
        Ok((authority.to_string(), 443))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port_with_port() {
        assert_eq!(
            parse_host_port("api.example.com:443").unwrap(),
            ("api.example.com".to_string(), 443)
        );
        assert_eq!(
            parse_host_port("api.example.com:8443").unwrap(),
            ("api.example.com".to_string(), 8443)
        );
    }

    #[test]
    fn test_parse_host_port_default() {
        assert_eq!(
            parse_host_port("api.example.com").unwrap(),
            ("api.example.com".to_string(), 443)
        );
    }

    #[test]
    fn test_parse_host_port_ipv6() {
        assert_eq!(parse_host_port("[::1]:443").unwrap(), ("::1".to_string(), 443));
    }

    #[test]
    fn test_parse_host_port_invalid() {
        assert!(parse_host_port("api.example.com:nope").is_err());
    }
}
