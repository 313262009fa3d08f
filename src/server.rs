//! HTTP Servers
//!
//! - Health: `/healthz`, `/livez`, `/readyz`
//! - Metrics: `/metrics` (Prometheus text), `/exemplars`, `/slo/status`, `/slo/alerts`
//! - API: a small instrumented service whose endpoints feed the default SLOs
//!
//! All three share one accept loop that stops when the shutdown token is
//! cancelled. In-flight connections are left to finish on their own.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::domain::ports::CacheBackend;
use crate::instrument::{time_outbound, InboundRequest, RequestInstrumentation, TracedCache};
use crate::metrics::{exposition, MetricsRecorder};
use crate::slo::StatusHandle;
use crate::tracer::in_request_scope;

pub type Body = Full<Bytes>;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

// =============================================================================
// Accept Loop
// =============================================================================

pub async fn bind(name: &str, addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind {} server on {}: {}", name, addr, e)))
}

/// Serve `handler` on `listener` until `shutdown` is cancelled.
pub async fn serve<F, Fut>(
    name: &'static str,
    listener: TcpListener,
    shutdown: CancellationToken,
    handler: F,
) -> Result<()>
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Body>> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| Error::Internal(format!("{} server has no local address: {}", name, e)))?;
    info!(server = name, %addr, "Server listening");

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("{} server accept error: {}", name, e)))?,
        };

        let io = TokioIo::new(stream);
        let handler = handler.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let response = handler(req);
                async move { Ok::<_, Infallible>(response.await) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(server = name, %peer, error = %e, "Connection error");
            }
        });
    }

    info!(server = name, "Server stopped");
    Ok(())
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Body> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn respond_json<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, JSON, body),
        Err(e) => {
            error!(error = %e, "Failed to encode response");
            respond(StatusCode::INTERNAL_SERVER_ERROR, TEXT, "encoding error")
        }
    }
}

fn not_found() -> Response<Body> {
    respond(StatusCode::NOT_FOUND, TEXT, "not found")
}

// =============================================================================
// Health Server
// =============================================================================

pub fn handle_health<B>(req: &Request<B>) -> Response<Body> {
    match req.uri().path() {
        "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, TEXT, "ok"),
        _ => not_found(),
    }
}

pub async fn run_health_server(addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = bind("health", addr).await?;
    serve("health", listener, shutdown, |req| async move {
        handle_health(&req)
    })
    .await
}

// =============================================================================
// Metrics Server
// =============================================================================

#[derive(Debug, Clone)]
pub struct MetricsState {
    pub recorder: Arc<MetricsRecorder>,
    pub status: StatusHandle,
}

pub fn handle_metrics<B>(state: &MetricsState, req: &Request<B>) -> Response<Body> {
    if req.method() != Method::GET {
        return respond(StatusCode::METHOD_NOT_ALLOWED, TEXT, "method not allowed");
    }

    match req.uri().path() {
        "/metrics" => match exposition::encode_text(&state.recorder) {
            Ok((content_type, body)) => {
                let mut response = respond(StatusCode::OK, TEXT, body);
                if let Ok(value) = HeaderValue::from_str(&content_type) {
                    response.headers_mut().insert(CONTENT_TYPE, value);
                }
                response
            }
            Err(e) => {
                error!(error = %e, "Metrics exposition failed");
                respond(StatusCode::INTERNAL_SERVER_ERROR, TEXT, e.to_string())
            }
        },
        "/exemplars" => match exposition::encode_exemplars(&state.recorder) {
            Ok(body) => respond(StatusCode::OK, JSON, body),
            Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, TEXT, e.to_string()),
        },
        "/slo/status" => match state.status.latest() {
            Some(report) => respond_json(StatusCode::OK, &report),
            None => respond(
                StatusCode::SERVICE_UNAVAILABLE,
                TEXT,
                "no SLO evaluation has completed yet",
            ),
        },
        "/slo/alerts" => respond_json(StatusCode::OK, &state.status.alerts()),
        _ => not_found(),
    }
}

pub async fn run_metrics_server(
    addr: SocketAddr,
    state: MetricsState,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = bind("metrics", addr).await?;
    serve("metrics", listener, shutdown, move |req| {
        let response = handle_metrics(&state, &req);
        async move { response }
    })
    .await
}

// =============================================================================
// API Server
// =============================================================================

const EXTERNAL_DATA_KEY: &str = "external_data";
const EXTERNAL_DATA_TTL: Duration = Duration::from_secs(60);

/// Shared state of the instrumented API.
#[derive(Debug, Clone)]
pub struct ApiState {
    instrumentation: RequestInstrumentation,
    cache: Arc<TracedCache<Arc<dyn CacheBackend>>>,
}

impl ApiState {
    pub fn new(
        instrumentation: RequestInstrumentation,
        cache: Arc<dyn CacheBackend>,
        recorder: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            instrumentation,
            cache: Arc::new(TracedCache::new(cache, recorder)),
        }
    }

    pub fn cache(&self) -> &TracedCache<Arc<dyn CacheBackend>> {
        &self.cache
    }
}

/// Operation name used for span naming and SLO matching.
fn endpoint_for(path: &str) -> &'static str {
    match path {
        "/" => "read_root",
        "/health" => "health_check",
        "/external-data" => "get_external_data",
        _ => "not_found",
    }
}

pub async fn handle_api<B>(state: &ApiState, req: &Request<B>) -> Response<Body> {
    let path = req.uri().path();
    let endpoint = endpoint_for(path);
    let request = state
        .instrumentation
        .begin(req.method().as_str(), endpoint, path, req.headers());

    let (status, body) = in_request_scope(request.scope(), route(state, &request)).await;

    let mut response = respond_json(status, &body);
    request.finish(status.as_u16(), response.headers_mut());
    response
}

async fn route(state: &ApiState, request: &InboundRequest) -> (StatusCode, serde_json::Value) {
    let trace_id = request.span().trace_id().to_hex();
    let correlation_id = request.correlation_id().as_str();

    match request.endpoint() {
        "read_root" => (
            StatusCode::OK,
            json!({
                "message": "tracewarden instrumented API",
                "trace_id": trace_id,
                "correlation_id": correlation_id,
            }),
        ),
        "health_check" => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "timestamp": Utc::now(),
                "trace_id": trace_id,
                "correlation_id": correlation_id,
            }),
        ),
        "get_external_data" => external_data(state, request).await,
        _ => (StatusCode::NOT_FOUND, json!({ "detail": "Not Found" })),
    }
}

/// Cache-aside lookup of a simulated upstream call.
async fn external_data(state: &ApiState, request: &InboundRequest) -> (StatusCode, serde_json::Value) {
    let span = request.span();

    match state.cache.get(span, EXTERNAL_DATA_KEY).await {
        Ok(Some(cached)) => {
            let data = serde_json::from_str::<serde_json::Value>(&cached)
                .unwrap_or(serde_json::Value::String(cached));
            return (StatusCode::OK, json!({ "source": "cache", "data": data }));
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Cache lookup failed, calling upstream"),
    }

    let tracer = state.instrumentation.tracer();
    let fetched = time_outbound(tracer, span, "fetch_external_data", |client| {
        let mut outbound = HeaderMap::new();
        request.inject_outbound(client, &mut outbound);
        debug!(headers = outbound.len(), "Propagating context to upstream");
        let traceparent = outbound
            .get("traceparent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let propagated = outbound
            .keys()
            .map(|k| k.as_str().to_string())
            .collect::<Vec<_>>();
        async move {
            Ok::<_, Infallible>(json!({
                "items": ["alpha", "beta", "gamma"],
                "fetched_at": Utc::now(),
                "traceparent": traceparent,
                "propagated_headers": propagated,
            }))
        }
    })
    .await;

    let data = match fetched {
        Ok(data) => data,
        Err(never) => match never {},
    };
    if let Err(e) = state
        .cache
        .set(span, EXTERNAL_DATA_KEY, data.to_string(), Some(EXTERNAL_DATA_TTL))
        .await
    {
        warn!(error = %e, "Failed to cache upstream response");
    }

    (StatusCode::OK, json!({ "source": "upstream", "data": data }))
}

pub async fn run_api_server(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = bind("api", addr).await?;
    serve("api", listener, shutdown, move |req: Request<Incoming>| {
        let state = state.clone();
        // Handlers never read the body.
        let (parts, _) = req.into_parts();
        let req = Request::from_parts(parts, ());
        async move { handle_api(&state, &req).await }
    })
    .await
}
