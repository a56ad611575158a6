//! Request inspection and upstream forwarding.
//!
//! This is where the proxy, pipeline, secrets engine and router meet:
//!
//! 1. Collect the (capped) request body and classify the request
//! 2. Create a secrets session and run the input pipeline
//! 3. Resolve a destination: muxing rules first, then the original host for
//!    intercepted traffic
//! 4. Stream the upstream response back through the output pipeline
//!
//! The response-consuming task owns a [`SessionGuard`], so the secrets
//! session is wiped on every exit path — completion, upstream error, or the
//! client going away mid-stream.

use super::client::{self, UpstreamTarget};
use super::error::{ProxyError, ProxyResult};
use super::routes::filter_headers;
use super::GatewayState;
use crate::collab::{extractor_for, AuditStore, ProviderRegistry, RequestRecord, SnippetExtractor};
use crate::mux::{RequestProfile, RouteResolution};
use crate::pipeline::select::classify;
use crate::pipeline::{
    Chunk, DirectResponse, GatewayRequest, InputOutcome, OutputPipeline, OutputPipelineContext,
    PipelineContext,
};
use crate::secrets::SessionGuard;
use crate::telemetry::AuditEvent;
use bytes::Bytes;
use chrono::Utc;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};
use http::{Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, Limited, StreamBody};
use hyper::body::{Frame, Incoming};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outbound writes are chunked to bound memory.
const MAX_WRITE_CHUNK: usize = 64 * 1024;

/// Path prefix for the non-intercepting mux endpoint.
pub const MUX_PATH_PREFIX: &str = "/v1/mux";

/// Inspect an intercepted (decrypted) request and forward it.
///
/// `origin` is the CONNECT target; it is the fallback destination when no
/// muxing rule matches.
pub async fn handle_intercepted(
    req: Request<Incoming>,
    origin_host: &str,
    origin_port: u16,
    state: Arc<GatewayState>,
) -> ProxyResult<Response<BoxBody<Bytes, hyper::Error>>> {
    handle_api(req, Some((origin_host.to_string(), origin_port)), state).await
}

/// Inspect a request sent directly to the mux endpoint (no TLS interception
/// on the client leg).
pub async fn handle_mux_endpoint(
    req: Request<Incoming>,
    state: Arc<GatewayState>,
) -> ProxyResult<Response<BoxBody<Bytes, hyper::Error>>> {
    handle_api(req, None, state).await
}

/// Shared inspection path for intercepted and mux-endpoint requests.
async fn handle_api(
    req: Request<Incoming>,
    origin: Option<(String, u16)>,
    state: Arc<GatewayState>,
) -> ProxyResult<Response<BoxBody<Bytes, hyper::Error>>> {
    let (parts, body) = req.into_parts();

    let mut path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| "/".to_string());
    if origin.is_none() {
        // The mux endpoint prefix is gateway-local, not part of the provider
        // path.
        path = path
            .strip_prefix(MUX_PATH_PREFIX)
            .filter(|rest| !rest.is_empty())
            .unwrap_or("/")
            .to_string();
    }

    let body_bytes = collect_capped(body, state.max_body_bytes).await?;
    let body_text = String::from_utf8_lossy(&body_bytes).into_owned();

    let (kind, client_kind) = classify(&path, &parts.headers, &body_text);
    state.audit.log(AuditEvent::RequestIntercepted {
        path: path.clone(),
        kind: format!("{kind:?}"),
        client: format!("{client_kind:?}"),
    });

    let session = state.sessions.create_session();
    let mut ctx = PipelineContext::new(session);

    let extractor = extractor_for(client_kind);
    ctx.snippets = extractor.snippets(&body_text);

    let request = GatewayRequest {
        method: parts.method.clone(),
        path: path.clone(),
        headers: parts.headers.clone(),
        body: body_text,
        kind,
        client: client_kind,
    };

    let pipeline = state.selector.input_for(kind);
    let outcome = match pipeline.run(request, &mut ctx).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // An input-step error aborts the whole request; nothing was
            // forwarded, so wipe the session here.
            state.sessions.end_session(session);
            return Err(e.into());
        }
    };

    let forwarded = match outcome {
        InputOutcome::Direct(direct) => {
            if let Some(command) = ctx.metadata.get("command") {
                state.audit.log(AuditEvent::CommandIntercepted {
                    command: command.clone(),
                });
            }
            record_request(&state, &path, kind, client_kind, &ctx);
            state.sessions.end_session(session);
            return Ok(direct_response(direct));
        }
        InputOutcome::Forward(request) => request,
    };

    log_redactions(&state, &ctx);

    // Route selection: first matching rule wins; intercepted traffic falls
    // back to its original host.
    let profile = RequestProfile {
        kind,
        filenames: extractor.filenames(&forwarded.body),
    };

    let upstream = match state.router.resolve(&profile) {
        Ok(RouteResolution::Route(route)) => {
            state.audit.log(AuditEvent::RouteSelected {
                workspace: state.router.registry().active_workspace(),
                provider: route.provider.clone(),
                model: route.model.clone(),
            });
            state
                .providers
                .execute(&route, forwarded)
                .await
                .map_err(ProxyError::from)
        }
        Ok(RouteResolution::NoRoute) => match &origin {
            Some((host, port)) => relay_to_origin(host, *port, &forwarded).await,
            None => {
                state.audit.log(AuditEvent::RouteMiss {
                    workspace: state.router.registry().active_workspace(),
                });
                record_request(&state, &path, kind, client_kind, &ctx);
                state.sessions.end_session(session);
                return Ok(no_route_response());
            }
        },
        Err(e) => {
            state.sessions.end_session(session);
            return Err(e.into());
        }
    };

    let upstream = match upstream {
        Ok(response) => response,
        Err(e) => {
            state.sessions.end_session(session);
            return Err(e);
        }
    };

    let (mut resp_parts, resp_body) = upstream.into_parts();
    // The body is re-chunked by the output pipeline.
    resp_parts.headers.remove(CONTENT_LENGTH);
    resp_parts.headers.remove(TRANSFER_ENCODING);

    let guard = SessionGuard::new(state.sessions.clone(), session);
    let output_pipeline = state.selector.output_for(kind);
    let processed = stream_through_pipeline(
        resp_body,
        output_pipeline,
        ctx,
        guard,
        state.clone(),
        StreamMeta {
            path,
            kind,
            client: client_kind,
        },
    );

    Ok(Response::from_parts(resp_parts, processed))
}

/// Pass-through relay for API calls that do not require MITM inspection.
///
/// Reuses the same path-resolution table and header rules as the
/// intercepting path; the body is still capped.
pub async fn handle_passthrough(
    req: Request<Incoming>,
    state: Arc<GatewayState>,
) -> ProxyResult<Response<BoxBody<Bytes, hyper::Error>>> {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();

    let resolved = state
        .routes
        .resolve(&path)
        .ok_or_else(|| ProxyError::UnmatchedPath(path.clone()))?;

    let target = UpstreamTarget::parse(&resolved.url)?;
    let body_bytes = collect_capped(body, state.max_body_bytes).await?;

    let mut request_target = target_uri(&target, &resolved.url);
    if let Some(query) = parts.uri.query() {
        request_target = format!("{request_target}?{query}");
    }

    let mut builder = Request::builder()
        .method(parts.method.clone())
        .uri(request_target)
        .header(HOST, target.host_header());
    if let Some(headers) = builder.headers_mut() {
        headers.extend(filter_headers(&parts.headers, &resolved.extra_headers));
    }

    let upstream_req = builder
        .body(Full::new(body_bytes))
        .map_err(|e| ProxyError::MalformedRequest(e.to_string()))?;

    debug!("Pass-through relay for '{path}' to {}", resolved.url);

    let response = client::send_request(&target, upstream_req).await?;
    Ok(response.map(|b| b.boxed()))
}

/// Origin-form URI (path + query) for a resolved absolute target URL.
fn target_uri(target: &UpstreamTarget, full_url: &str) -> String {
    // The resolved URL is base + rest; everything after the authority is the
    // request target.
    full_url
        .find(&target.host)
        .map(|i| &full_url[i + target.host.len()..])
        .map(|after| after.trim_start_matches(|c: char| c == ':' || c.is_ascii_digit()))
        .filter(|p| p.starts_with('/'))
        .unwrap_or("/")
        .to_string()
}

/// Relay a redacted request to the host the client originally asked for.
async fn relay_to_origin(
    host: &str,
    port: u16,
    request: &GatewayRequest,
) -> ProxyResult<Response<BoxBody<Bytes, hyper::Error>>> {
    let target = UpstreamTarget {
        host: host.to_string(),
        port,
        tls: true,
        base_path: String::new(),
    };

    let mut builder = Request::builder()
        .method(request.method.clone())
        .uri(request.path.as_str())
        .header(HOST, target.host_header());
    if let Some(headers) = builder.headers_mut() {
        headers.extend(filter_headers(&request.headers, &[]));
    }

    let upstream_req = builder
        .body(Full::new(Bytes::from(request.body.clone())))
        .map_err(|e| ProxyError::MalformedRequest(e.to_string()))?;

    let response = client::send_request(&target, upstream_req).await?;
    Ok(response.map(|b| b.boxed()))
}

/// Metadata carried into the stream-consumer task for the audit record.
struct StreamMeta {
    path: String,
    kind: crate::pipeline::RequestKind,
    client: crate::pipeline::ClientKind,
}

/// Spawn the stream-consumer task: upstream frames in, pipeline-processed
/// frames out. The task owns the session guard and the context; the audit
/// record is written when the stream finishes, and the session is wiped on
/// every exit path.
fn stream_through_pipeline(
    mut body: BoxBody<Bytes, hyper::Error>,
    pipeline: Arc<OutputPipeline>,
    mut ctx: PipelineContext,
    guard: SessionGuard,
    state: Arc<GatewayState>,
    meta: StreamMeta,
) -> BoxBody<Bytes, hyper::Error> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Frame<Bytes>, hyper::Error>>(16);

    tokio::spawn(async move {
        // Wiped when this task exits, whatever the reason.
        let _guard = guard;
        let mut out = OutputPipelineContext::new();

        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    let Ok(data) = frame.into_data() else {
                        // Trailers are dropped; the re-chunked body has none.
                        continue;
                    };
                    let text = String::from_utf8_lossy(&data).into_owned();
                    let chunks = pipeline.process_chunk(Chunk::new(text), &mut ctx, &mut out).await;
                    if send_chunks(&tx, chunks).await.is_err() {
                        // Client went away mid-stream; the guard still wipes
                        // the session.
                        debug!("Client disconnected mid-stream");
                        record_request(&state, &meta.path, meta.kind, meta.client, &ctx);
                        return;
                    }
                }
                Some(Err(e)) => {
                    warn!("Upstream stream error: {e}");
                    state.audit.log(AuditEvent::UpstreamError {
                        message: e.to_string(),
                    });
                    break;
                }
                None => break,
            }
        }

        let finale = pipeline.finish(&mut ctx, &mut out).await;
        let _ = send_chunks(&tx, finale).await;
        record_request(&state, &meta.path, meta.kind, meta.client, &ctx);
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    StreamBody::new(stream).boxed()
}

/// Send processed chunks as data frames, split at the write-chunk bound.
async fn send_chunks(
    tx: &tokio::sync::mpsc::Sender<Result<Frame<Bytes>, hyper::Error>>,
    chunks: Vec<Chunk>,
) -> Result<(), ()> {
    for chunk in chunks {
        let bytes = chunk.content.into_bytes();
        for window in bytes.chunks(MAX_WRITE_CHUNK) {
            let frame = Frame::data(Bytes::copy_from_slice(window));
            if tx.send(Ok(frame)).await.is_err() {
                return Err(());
            }
        }
    }
    Ok(())
}

/// Collect a request body, aborting with 413 once it exceeds `cap`.
async fn collect_capped(body: Incoming, cap: usize) -> ProxyResult<Bytes> {
    match Limited::new(body, cap).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) => {
            if e.downcast_ref::<http_body_util::LengthLimitError>().is_some() {
                Err(ProxyError::BodyTooLarge { limit: cap })
            } else {
                Err(ProxyError::MalformedRequest(e.to_string()))
            }
        }
    }
}

/// Persist the request record via the audit-store collaborator.
fn record_request(
    state: &GatewayState,
    path: &str,
    kind: crate::pipeline::RequestKind,
    client: crate::pipeline::ClientKind,
    ctx: &PipelineContext,
) {
    state.audit_store.record_request(RequestRecord {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        path: path.to_string(),
        kind,
        client,
        redacted_body: ctx.recorded_input.clone().unwrap_or_default(),
        alerts: ctx.alerts.clone(),
        output: ctx.recorded_output.clone(),
    });
}

/// Log redaction counts to the audit trail.
fn log_redactions(state: &GatewayState, ctx: &PipelineContext) {
    let secrets: usize = ctx
        .metadata
        .get("secrets_redacted")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let pii: usize = ctx
        .metadata
        .get("pii_redacted")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if secrets + pii > 0 {
        state.audit.log(AuditEvent::RedactionApplied { secrets, pii });
    }
}

/// Build a response from a step's direct answer.
pub fn direct_response(direct: DirectResponse) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut builder = Response::builder().status(direct.status);
    if let Ok(value) = http::HeaderValue::from_str(&direct.content_type) {
        builder = builder.header(CONTENT_TYPE, value);
    }
    builder
        .body(full_body(direct.body))
        .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "response build"))
}

/// Explicit "no matching mux rule" answer for the mux endpoint.
fn no_route_response() -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(CONTENT_TYPE, "application/json")
        .body(full_body(
            "{\"error\":\"no matching mux rule for this request\"}".to_string(),
        ))
        .unwrap_or_else(|_| error_response(StatusCode::NOT_FOUND, "no route"))
}

/// Plain-text error response.
pub fn error_response(
    status: StatusCode,
    message: &str,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full_body(message.to_string()));
    *response.status_mut() = status;
    response
}

/// An empty response body.
pub fn empty_body() -> BoxBody<Bytes, hyper::Error> {
    http_body_util::Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// A response body with content.
pub fn full_body(content: String) -> BoxBody<Bytes, hyper::Error> {
    Full::new(Bytes::from(content))
        .map_err(|never| match never {})
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_uri_extraction() {
        let target = UpstreamTarget::parse("https://api.openai.com/v1").unwrap();
        assert_eq!(
            target_uri(&target, "https://api.openai.com/v1/chat/completions"),
            "/v1/chat/completions"
        );

        let with_port = UpstreamTarget::parse("http://localhost:11434").unwrap();
        assert_eq!(
            target_uri(&with_port, "http://localhost:11434/api/generate"),
            "/api/generate"
        );
    }

    #[test]
    fn test_direct_response_shape() {
        let resp = direct_response(DirectResponse::json("{\"ok\":true}".to_string()));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_error_response_status() {
        let resp = error_response(StatusCode::PAYLOAD_TOO_LARGE, "too big");
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
