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

//! End-to-end tool calls against a mocked Jenkins.

use jankins_server::config::ServerConfig;
use jankins_server::jenkins::{JenkinsApi, JenkinsClient, ProgressiveLogClient};
use jankins_server::{build_server, App};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Serves a fixed console log through the progressive-text contract.
struct ProgressiveLog(String);

impl Respond for ProgressiveLog {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let start = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "start")
            .and_then(|(_, v)| v.parse::<usize>().ok())
            .unwrap_or(0)
            .min(self.0.len());
        ResponseTemplate::new(200)
            .insert_header("X-Text-Size", self.0.len().to_string().as_str())
            .set_body_bytes(self.0.as_bytes()[start..].to_vec())
    }
}

fn client(server: &MockServer) -> Arc<dyn JenkinsApi> {
    let mut config = ServerConfig::default();
    config.jenkins.url = server.uri();
    Arc::new(JenkinsClient::new(&config.jenkins, true).unwrap())
}

fn app(server: &MockServer) -> App {
    let mut config = ServerConfig::default();
    config.jenkins.url = server.uri();
    build_server(&config, client(server))
}

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

async fn mount_json(server: &MockServer, at: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_log(server: &MockServer, at: &str, log: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ProgressiveLog(log.to_string()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn triage_resolves_last_build_of_folder_job() {
    let server = MockServer::start().await;
    mount_json(&server, "/job/infra/job/build/api/json", json!({"lastBuild": {"number": 57}})).await;
    mount_json(
        &server,
        "/job/infra/job/build/57/api/json",
        json!({"number": 57, "result": "FAILURE", "changeSet": {"items": []}}),
    )
    .await;
    mount_log(
        &server,
        "/job/infra/job/build/57/logText/progressiveText",
        "[Pipeline] stage\nStage \"Deploy\" failed\nERROR: Read timed out after 60s\nFinished: FAILURE\n",
    )
    .await;

    let result = app(&server)
        .server
        .call_tool("triage_failure", args(json!({"name": "infra/build", "number": "last"})))
        .await
        .unwrap();

    assert_eq!(result["build_number"], 57);
    assert_eq!(result["result"], "FAILURE");
    assert_eq!(result["hypotheses"][0], "Timeout: Operation exceeded time limit");
    assert!(!result["next_steps"].as_array().unwrap().is_empty());
    assert_eq!(result["_meta"]["format"], "summary");
}

#[tokio::test]
async fn progressive_fetch_continues_without_gap() {
    let server = MockServer::start().await;
    let log: String = (0..1000).map(|i| format!("line {:04}\n", i)).collect();
    assert_eq!(log.len(), 10_000);
    mount_log(&server, "/job/app/1/logText/progressiveText", &log).await;

    let logs = ProgressiveLogClient::new(client(&server));

    let first = logs.get_chunk("app", 1, 0, Some(4096)).await.unwrap();
    assert_eq!(first.text.len(), 4096);
    assert!(first.has_more);
    assert_eq!(first.end, 4096);

    let second = logs.get_chunk("app", 1, first.end, Some(4096)).await.unwrap();
    let third = logs.get_chunk("app", 1, second.end, Some(4096)).await.unwrap();
    assert!(!third.has_more);
    assert_eq!(third.end, 10_000);

    let joined = format!("{}{}{}", first.text, second.text, third.text);
    assert_eq!(joined, log);
}

#[tokio::test]
async fn search_reports_line_and_window() {
    let server = MockServer::start().await;
    let log: String = (1..=100)
        .map(|i| {
            if i == 42 {
                "java.lang.OutOfMemoryError: Java heap space\n".to_string()
            } else {
                format!("step {}\n", i)
            }
        })
        .collect();
    mount_log(&server, "/job/app/9/logText/progressiveText", &log).await;

    let result = app(&server)
        .server
        .call_tool(
            "search_log",
            args(json!({"name": "app", "number": 9, "pattern": "OutOfMemory", "window_lines": 2})),
        )
        .await
        .unwrap();

    assert_eq!(result["matches_count"], 1);
    assert_eq!(result["matches"][0]["line_number"], 42);
    assert_eq!(
        result["matches"][0]["context"],
        "step 40\nstep 41\njava.lang.OutOfMemoryError: Java heap space\nstep 43\nstep 44"
    );
}

#[tokio::test]
async fn missing_job_is_not_found() {
    let server = MockServer::start().await;

    let err = app(&server)
        .server
        .call_tool("get_job", args(json!({"name": "ghost"})))
        .await
        .unwrap_err();

    assert_eq!(err.code(), -32003);
    assert_eq!(err.message, "Job 'ghost' not found");
    assert!(err.correlation_id.is_some());
}

#[tokio::test]
async fn trigger_build_posts_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/job/deploy/buildWithParameters"))
        .respond_with(
            ResponseTemplate::new(201).insert_header("Location", format!("{}/queue/item/314/", server.uri()).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = app(&server)
        .server
        .call_tool(
            "trigger_build",
            args(json!({"name": "deploy", "parameters": {"ENV": "staging"}})),
        )
        .await
        .unwrap();

    assert_eq!(result["queue_id"], 314);
    assert_eq!(result["status"], "queued");
}

#[tokio::test]
async fn list_jobs_flattens_folders() {
    let server = MockServer::start().await;
    mount_json(
        &server,
        "/api/json",
        json!({"jobs": [
            {"name": "infra", "url": "http://j/job/infra/", "jobs": [
                {"name": "build", "url": "http://j/job/infra/job/build/", "color": "red"},
            ]},
            {"name": "app", "url": "http://j/job/app/", "color": "blue"},
        ]}),
    )
    .await;

    let result = app(&server)
        .server
        .call_tool("list_jobs", args(json!({"prefix": "infra/", "format": "ids"})))
        .await
        .unwrap();

    assert_eq!(result["total"], 1);
    assert_eq!(result["jobs"][0]["name"], "infra/build");
}
