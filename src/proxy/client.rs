//! Low-level upstream HTTP client.
//!
//! One connection per forwarded request, driven by hyper's http1 client
//! machinery over either a plain TCP stream or a rustls-wrapped one. The
//! upstream connect happens first so an unreachable host fails fast with a
//! 502 before any client-side work is wasted.

use super::error::ProxyError;
use super::routes::filter_headers;
use super::tls::{server_name, tls_connector};
use crate::mux::ModelRoute;
use crate::pipeline::GatewayRequest;
use bytes::Bytes;
use http::{HeaderValue, Request, Response, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// A parsed upstream base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    /// Upstream host.
    pub host: String,
    /// Upstream port.
    pub port: u16,
    /// Whether the upstream leg uses TLS.
    pub tls: bool,
    /// Base path prefix (may be empty).
    pub base_path: String,
}

impl UpstreamTarget {
    /// Parse a base URL like `https://api.example.com/v1`.
    ///
    /// # Errors
    ///
    /// Fails on unparseable URLs, missing hosts, or schemes other than
    /// http/https.
    pub fn parse(url: &str) -> Result<Self, ProxyError> {
        let uri: Uri = url
            .parse()
            .map_err(|_| ProxyError::MalformedRequest(format!("bad upstream URL '{url}'")))?;

        let tls = match uri.scheme_str() {
            Some("https") | None => true,
            Some("http") => false,
            Some(other) => {
                return Err(ProxyError::MalformedRequest(format!(
                    "unsupported scheme '{other}' in '{url}'"
                )))
            }
        };

        let host = uri
            .host()
            .ok_or_else(|| ProxyError::MalformedRequest(format!("no host in '{url}'")))?
            .to_string();
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        let base_path = match uri.path() {
            "/" => String::new(),
            path => path.trim_end_matches('/').to_string(),
        };

        Ok(Self {
            host,
            port,
            tls,
            base_path,
        })
    }

    /// `host` or `host:port` for the Host header.
    pub fn host_header(&self) -> String {
        let default = if self.tls { 443 } else { 80 };
        if self.port == default {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Send one request to an upstream, connecting first (fail fast).
pub async fn send_request(
    target: &UpstreamTarget,
    req: Request<Full<Bytes>>,
) -> Result<Response<Incoming>, ProxyError> {
    let addr = format!("{}:{}", target.host, target.port);
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| ProxyError::UpstreamConnect {
            addr: addr.clone(),
            message: e.to_string(),
        })?;

    trace!("Connected to upstream {addr} (tls={})", target.tls);

    if target.tls {
        let connector = tls_connector()?;
        let name = server_name(&target.host)?;
        let tls_stream = connector
            .connect(name, stream)
            .await
            .map_err(|e| ProxyError::Tls(format!("Upstream TLS handshake failed: {e}")))?;
        http1_send(tls_stream, req).await
    } else {
        http1_send(stream, req).await
    }
}

/// Drive one request over an established stream.
async fn http1_send<S>(stream: S, req: Request<Full<Bytes>>) -> Result<Response<Incoming>, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Upstream connection ended: {e}");
        }
    });

    sender
        .send_request(req)
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))
}

/// Execute a muxed request against its resolved provider route.
///
/// The payload's `model` field is rewritten to the route's model and auth
/// material is injected from the route's environment variable. No vendor
/// API-format translation happens here.
pub async fn execute_route(
    route: &ModelRoute,
    request: GatewayRequest,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, ProxyError> {
    let target = UpstreamTarget::parse(&route.base_url)?;

    let body = rewrite_model(&request.body, &route.model);
    let uri = format!("{}{}", target.base_path, request.path);

    let mut builder = Request::builder()
        .method(request.method.clone())
        .uri(uri.as_str())
        .header(http::header::HOST, target.host_header());

    if let Some(headers) = builder.headers_mut() {
        let mut filtered = filter_headers(&request.headers, &[]);
        // Route auth wins over whatever the client sent.
        if let Some(env_name) = &route.api_key_env {
            filtered.remove(http::header::AUTHORIZATION);
            if let Ok(key) = std::env::var(env_name) {
                if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", key.trim())) {
                    filtered.insert(http::header::AUTHORIZATION, value);
                }
            } else {
                debug!("API key env var '{env_name}' is not set");
            }
        }
        headers.extend(filtered);
    }

    let req = builder
        .body(Full::new(Bytes::from(body)))
        .map_err(|e| ProxyError::MalformedRequest(e.to_string()))?;

    debug!(
        "Forwarding muxed request to {}/{} at {}",
        route.provider, route.model, uri
    );

    let response = send_request(&target, req).await?;
    Ok(response.map(|b| b.boxed()))
}

/// Set the payload's `model` to the routed model; non-object payloads pass
/// through unchanged.
fn rewrite_model(body: &str, model: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(mut map)) => {
            map.insert("model".to_string(), Value::String(model.to_string()));
            Value::Object(map).to_string()
        }
        _ => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_https_default_port() {
        let target = UpstreamTarget::parse("https://api.openai.com/v1").unwrap();
        assert_eq!(target.host, "api.openai.com");
        assert_eq!(target.port, 443);
        assert!(target.tls);
        assert_eq!(target.base_path, "/v1");
        assert_eq!(target.host_header(), "api.openai.com");
    }

    #[test]
    fn test_parse_http_custom_port() {
        let target = UpstreamTarget::parse("http://localhost:11434").unwrap();
        assert_eq!(target.host, "localhost");
        assert_eq!(target.port, 11434);
        assert!(!target.tls);
        assert_eq!(target.base_path, "");
        assert_eq!(target.host_header(), "localhost:11434");
    }

    #[test]
    fn test_parse_rejects_bad_urls() {
        assert!(UpstreamTarget::parse("ftp://example.com").is_err());
        assert!(UpstreamTarget::parse("/no-host").is_err());
    }

    #[test]
    fn test_rewrite_model() {
        let body = r#"{"model":"client-chosen","messages":[]}"#;
        let rewritten = rewrite_model(body, "routed-model");

        let parsed: Value = serde_json::from_str(&rewritten).unwrap();
        assert_eq!(parsed["model"], "routed-model");
        assert!(parsed["messages"].is_array());
    }

    #[test]
    fn test_rewrite_model_non_json_passthrough() {
        assert_eq!(rewrite_model("plain", "m"), "plain");
    }
}
