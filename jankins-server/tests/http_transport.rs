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

//! HTTP transport behaviour through the full router.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use jankins_server::config::ServerConfig;
use jankins_server::jenkins::JenkinsClient;
use jankins_server::mcp::router;
use jankins_server::{build_server, http_state};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.jenkins.url = "http://127.0.0.1:9".to_string();
    config
}

fn app_with(config: ServerConfig) -> Router {
    let client = JenkinsClient::new(&config.jenkins, false).unwrap();
    let app = build_server(&config, Arc::new(client));
    router(http_state(&config, &app), true)
}

fn app() -> Router {
    let mut config = config();
    config.rate_limit.enabled = false;
    app_with(config)
}

fn rpc(body: Value) -> Request<Body> {
    Request::post("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn malformed_json_is_a_parse_error() {
    let request = Request::post("/mcp").body(Body::from("{not json")).unwrap();
    let response = app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["id"], Value::Null);
}

#[tokio::test]
async fn tools_list_over_http() {
    let response = app()
        .oneshot(rpc(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], 1);
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"triage_failure"));
    assert!(names.contains(&"tail_log_live"));
    assert!(names.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn unknown_method_keeps_request_id() {
    let response = app()
        .oneshot(rpc(json!({"jsonrpc": "2.0", "id": "abc", "method": "nope"})))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["id"], "abc");
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn burst_exhaustion_returns_429() {
    let mut config = config();
    config.rate_limit.enabled = true;
    config.rate_limit.per_minute = 60;
    config.rate_limit.burst = 2;
    let app = app_with(config);

    let ping = || {
        Request::post("/mcp")
            .header("X-Forwarded-For", "10.1.2.3")
            .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#))
            .unwrap()
    };

    for remaining in ["1", "0"] {
        let response = app.clone().oneshot(ping()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "60");
        assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
    }

    let response = app.clone().oneshot(ping()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["error"]["data"]["identifier"], "ip:10.1.2.3");

    // Probes bypass the limiter
    let response = app
        .oneshot(Request::get("/_health").header("X-Forwarded-For", "10.1.2.3").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn origin_mismatch_is_forbidden() {
    let mut config = config();
    config.rate_limit.enabled = false;
    config.transport.origin_enforce = true;
    config.transport.origin_expected = Some("https://ide.example".to_string());
    let app = app_with(config);

    let request = Request::post("/mcp")
        .header("Origin", "https://evil.example")
        .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["message"], "Origin not allowed");
    assert_eq!(body["error"]["data"]["received"], "https://evil.example");

    let request = Request::post("/mcp")
        .header("Origin", "https://ide.example")
        .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/_ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_include_limiter_stats() {
    let mut config = config();
    config.rate_limit.enabled = true;
    let app = app_with(config);

    app.clone()
        .oneshot(rpc(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})))
        .await
        .unwrap();
    let response = app
        .oneshot(Request::get("/_metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["requests_total"], 1);
    assert_eq!(body["rate_limit"]["burst_size"], 10);
}
