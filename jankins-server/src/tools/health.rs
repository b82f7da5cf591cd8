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

//! Identity, server status and queue tools.

use super::ToolDeps;
use crate::formatters::{truncate_chars, Payload};
use crate::jenkins::JenkinsApi;
use crate::mcp::registry::{RequestContext, Tool, ToolError, ToolHandler};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const QUEUE_ITEMS_CAP: usize = 20;
const QUEUE_REASON_CHARS: usize = 100;

pub fn tools(deps: &ToolDeps) -> Vec<Tool> {
    vec![
        Tool::new("whoami", "Get current authenticated user information").handler(Arc::new(
            WhoAmI {
                api: deps.api.clone(),
            },
        )),
        Tool::new("get_status", "Get Jenkins server status and queue depth").handler(Arc::new(
            GetStatus {
                api: deps.api.clone(),
                server_name: deps.server_name.clone(),
                server_version: deps.server_version.clone(),
            },
        )),
        Tool::new("summarize_queue", "Get compact summary of Jenkins build queue").handler(
            Arc::new(SummarizeQueue {
                api: deps.api.clone(),
            }),
        ),
    ]
}

pub struct WhoAmI {
    api: Arc<dyn JenkinsApi>,
}

#[async_trait]
impl ToolHandler for WhoAmI {
    async fn handle(
        &self,
        _args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let me = self.api.get_whoami().await?;
        let field = |key: &str| me.get(key).cloned().unwrap_or(Value::Null);
        Ok(Payload::raw(json!({
            "id": field("id"),
            "fullName": field("fullName"),
            "description": field("description"),
            "authorities": me.get("authorities").cloned().unwrap_or_else(|| json!([])),
        })))
    }
}

pub struct GetStatus {
    api: Arc<dyn JenkinsApi>,
    server_name: String,
    server_version: String,
}

#[async_trait]
impl ToolHandler for GetStatus {
    async fn handle(
        &self,
        _args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let version = self.api.get_version().await?;
        let queue = self.api.get_queue_info().await?;
        Ok(Payload::raw(json!({
            "jenkins_version": version,
            "queue_length": queue.len(),
            "status": "operational",
            "mcp_server": {
                "name": self.server_name,
                "version": self.server_version,
            },
        })))
    }
}

pub struct SummarizeQueue {
    api: Arc<dyn JenkinsApi>,
}

fn flag(item: &Value, key: &str) -> bool {
    item.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[async_trait]
impl ToolHandler for SummarizeQueue {
    async fn handle(
        &self,
        _args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let queue = self.api.get_queue_info().await?;

        let items: Vec<Value> = queue
            .iter()
            .take(QUEUE_ITEMS_CAP)
            .map(|item| {
                let why = item.get("why").and_then(Value::as_str).unwrap_or("");
                json!({
                    "id": item.get("id").cloned().unwrap_or(Value::Null),
                    "job": item.get("task").and_then(|t| t.get("name")).cloned().unwrap_or(Value::Null),
                    "why": truncate_chars(why, QUEUE_REASON_CHARS),
                    "blocked": flag(item, "blocked"),
                    "stuck": flag(item, "stuck"),
                })
            })
            .collect();

        Ok(Payload::raw(json!({
            "total_queued": queue.len(),
            "shown": items.len(),
            "blocked_count": queue.iter().filter(|i| flag(i, "blocked")).count(),
            "stuck_count": queue.iter().filter(|i| flag(i, "stuck")).count(),
            "items": items,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLimitsConfig;
    use crate::formatters::OutputFormat;
    use crate::tools::testing::FakeJenkins;

    #[tokio::test]
    async fn test_status_reports_version_and_queue() {
        let mut api = FakeJenkins::default().with(
            "queue/api/json",
            json!({"items": [{"id": 1}, {"id": 2}]}),
        );
        api.headers.push(("X-Jenkins", "2.440.1"));
        let deps = ToolDeps::new(Arc::new(api), LogLimitsConfig::default(), "jankins", "0.2.1");
        let handler = tools(&deps)
            .into_iter()
            .find(|t| t.name == "get_status")
            .and_then(|t| t.handler)
            .unwrap();

        let payload = handler
            .handle(&Map::new(), &RequestContext::new(OutputFormat::Summary))
            .await
            .unwrap();
        assert_eq!(payload.body["jenkins_version"], "2.440.1");
        assert_eq!(payload.body["queue_length"], 2);
        assert_eq!(payload.body["mcp_server"]["version"], "0.2.1");
    }

    #[tokio::test]
    async fn test_queue_summary_counts_all_items() {
        let items: Vec<Value> = (0..25)
            .map(|i| {
                json!({
                    "id": i,
                    "task": {"name": format!("job-{}", i)},
                    "why": "w".repeat(150),
                    "blocked": i % 5 == 0,
                    "stuck": i == 24,
                })
            })
            .collect();
        let api = FakeJenkins::default().with("queue/api/json", json!({ "items": items }));
        let handler = SummarizeQueue { api: Arc::new(api) };

        let payload = handler
            .handle(&Map::new(), &RequestContext::new(OutputFormat::Summary))
            .await
            .unwrap();
        assert_eq!(payload.body["total_queued"], 25);
        assert_eq!(payload.body["shown"], 20);
        assert_eq!(payload.body["blocked_count"], 5);
        assert_eq!(payload.body["stuck_count"], 1);
        assert_eq!(payload.body["items"][0]["why"].as_str().unwrap().len(), 100);
        assert_eq!(payload.body["items"][3]["job"], "job-3");
    }
}
