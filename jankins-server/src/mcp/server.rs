// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! HTTP and SSE transport.
//!
//! JSON-RPC requests arrive as `POST /mcp`. Probes live under `/_` and are
//! never rate limited. Origin enforcement applies to `/mcp` and `/sse`.

use crate::cache::ResponseCache;
use crate::mcp::protocol::{JsonRpcError, JsonRpcId, JsonRpcResponse};
use crate::mcp::registry::McpServer;
use crate::mcp::transport::{decode_line, Frame};
use crate::rate_limit::{client_identifier, RateLimitResult, RateLimiter};
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(30);

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Shared state of the HTTP transport.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<McpServer>,
    pub limiter: Option<Arc<RateLimiter>>,
    pub cache: Option<Arc<ResponseCache>>,
    /// Required `Origin` value; `None` disables the check
    pub expected_origin: Option<String>,
}

impl AppState {
    pub fn new(server: Arc<McpServer>) -> Self {
        Self {
            server,
            limiter: None,
            cache: None,
            expected_origin: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_expected_origin(mut self, origin: impl Into<String>) -> Self {
        self.expected_origin = Some(origin.into());
        self
    }
}

/// Build the router; `sse` adds the `/sse` stream.
pub fn router(state: AppState, sse: bool) -> Router {
    let mut mcp = Router::new().route("/mcp", post(handle_mcp));
    if sse {
        mcp = mcp.route("/sse", get(handle_sse));
    }
    let mcp = mcp.route_layer(middleware::from_fn_with_state(state.clone(), enforce_origin));

    Router::new()
        .merge(mcp)
        .route("/_health", get(health))
        .route("/_ready", get(ready))
        .route("/_metrics", get(metrics))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the listener fails.
pub async fn serve_http(state: AppState, addr: SocketAddr, sse: bool) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        addr = %addr,
        transport = if sse { "sse" } else { "http" },
        "Listening for MCP requests"
    );
    axum::serve(
        listener,
        router(state, sse).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

fn rpc_error(status: StatusCode, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcResponse::error(JsonRpcId::Null, error))).into_response()
}

async fn handle_mcp(State(state): State<AppState>, body: Bytes) -> Response {
    let text = String::from_utf8_lossy(&body);
    let request = match decode_line(text.trim()) {
        Frame::Request(request) => request,
        Frame::Rejected(response) => {
            let parse_failure = response
                .error
                .as_ref()
                .map_or(false, |e| e.code == crate::error::PARSE_ERROR);
            let status = if parse_failure {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::OK
            };
            return (status, Json(response)).into_response();
        }
    };

    debug!(method = %request.method, "HTTP request");
    match state.server.handle(request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn handle_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("SSE client connected");
    let connected = Event::default().event("connected").data(
        json!({
            "server": state.server.name(),
            "version": state.server.version(),
        })
        .to_string(),
    );

    let stream = stream::once(async move { Ok(connected) }).chain(stream::pending());
    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ready() -> Json<Value> {
    Json(json!({ "status": "ready" }))
}

async fn metrics(State(state): State<AppState>) -> Json<Value> {
    let mut body = json!(state.server.metrics().snapshot());
    if let Some(cache) = &state.cache {
        body["cache"] = json!(cache.stats());
    }
    if let Some(limiter) = &state.limiter {
        body["rate_limit"] = json!(limiter.stats());
    }
    Json(body)
}

async fn enforce_origin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.expected_origin.as_deref() else {
        return next.run(request).await;
    };

    let received = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if received == expected {
        return next.run(request).await;
    }

    warn!(expected, received, "Rejected request from unexpected origin");
    rpc_error(
        StatusCode::FORBIDDEN,
        JsonRpcError::server_error(
            "Origin not allowed",
            json!({ "expected": expected, "received": received }),
        ),
    )
}

fn peer_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

fn set_header(headers: &mut HeaderMap, name: &HeaderName, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name.clone(), value);
    }
}

async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(limiter) = state.limiter.as_ref() else {
        return next.run(request).await;
    };
    if request.uri().path().starts_with("/_") {
        return next.run(request).await;
    }

    let identifier = client_identifier(request.headers(), peer_addr(&request));
    let limit = limiter.requests_per_minute();

    match limiter.check(&identifier) {
        RateLimitResult::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            set_header(headers, &X_RATELIMIT_LIMIT, limit);
            set_header(headers, &X_RATELIMIT_REMAINING, remaining);
            response
        }
        RateLimitResult::RateLimited { retry_after } => {
            let seconds = retry_after.as_secs_f64();
            let mut response = rpc_error(
                StatusCode::TOO_MANY_REQUESTS,
                JsonRpcError::server_error(
                    "Rate limit exceeded",
                    json!({
                        "retry_after": (seconds * 100.0).round() / 100.0,
                        "limit": limit,
                        "identifier": identifier,
                    }),
                ),
            );
            let headers = response.headers_mut();
            set_header(headers, &header::RETRY_AFTER, retry_after.as_secs() + 1);
            set_header(headers, &X_RATELIMIT_LIMIT, limit);
            set_header(headers, &X_RATELIMIT_REMAINING, 0);
            response
        }
    }
}
