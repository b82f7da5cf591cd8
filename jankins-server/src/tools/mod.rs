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

//! Jenkins tool handlers
//!
//! Each submodule exposes `tools(&ToolDeps)`, the [`Tool`] definitions it
//! contributes. [`register_all`] collects them and, when a cache is given,
//! wraps the read-mostly tools in a [`CachingHandler`].

pub mod advanced;
pub mod builds;
pub mod health;
pub mod jobs;
pub mod logs;
pub mod scm;
pub mod test_results;

use crate::cache::{CachingHandler, ResponseCache};
use crate::config::LogLimitsConfig;
use crate::error::{JankinsError, Result};
use crate::jenkins::{BlueOceanClient, JenkinsApi, ProgressiveLogClient, TestResultParser};
use crate::mcp::registry::{McpServer, Tool};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Tools whose results are memoized when caching is enabled.
pub const CACHED_TOOLS: &[&str] = &[
    "get_job",
    "get_build",
    "get_job_scm",
    "get_build_scm",
    "get_status",
    "whoami",
];

/// Dependencies injected into every handler.
#[derive(Clone)]
pub struct ToolDeps {
    pub api: Arc<dyn JenkinsApi>,
    pub logs: ProgressiveLogClient,
    pub blue_ocean: BlueOceanClient,
    pub tests: TestResultParser,
    pub limits: LogLimitsConfig,
    pub server_name: String,
    pub server_version: String,
}

impl ToolDeps {
    pub fn new(
        api: Arc<dyn JenkinsApi>,
        limits: LogLimitsConfig,
        server_name: impl Into<String>,
        server_version: impl Into<String>,
    ) -> Self {
        Self {
            logs: ProgressiveLogClient::new(api.clone()),
            blue_ocean: BlueOceanClient::new(api.clone()),
            tests: TestResultParser::new(api.clone()),
            api,
            limits,
            server_name: server_name.into(),
            server_version: server_version.into(),
        }
    }
}

/// Every tool definition, in registration order.
pub fn all_tools(deps: &ToolDeps) -> Vec<Tool> {
    let mut tools = Vec::new();
    tools.extend(jobs::tools(deps));
    tools.extend(builds::tools(deps));
    tools.extend(logs::tools(deps));
    tools.extend(scm::tools(deps));
    tools.extend(health::tools(deps));
    tools.extend(advanced::tools(deps));
    tools.extend(test_results::tools(deps));
    tools
}

/// Register every tool on `server`.
pub fn register_all(server: &mut McpServer, deps: &ToolDeps, cache: Option<Arc<ResponseCache>>) {
    for mut tool in all_tools(deps) {
        if let (Some(cache), Some(inner)) = (&cache, tool.handler.clone()) {
            if CACHED_TOOLS.contains(&tool.name.as_str()) {
                debug!(tool = %tool.name, "Caching enabled for tool");
                tool.handler = Some(Arc::new(CachingHandler::new(
                    tool.name.clone(),
                    inner,
                    cache.clone(),
                )));
            }
        }
        server.register_tool(tool);
    }
}

// Argument accessors. Missing keys fall back to defaults; present keys of
// the wrong type are InvalidParams.

fn wrong_type(key: &str, expected: &str, got: &Value) -> JankinsError {
    JankinsError::invalid_params(format!(
        "Parameter '{}' must be {}, got {}",
        key, expected, got
    ))
}

fn present<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    args.get(key).filter(|v| !v.is_null())
}

pub(crate) fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    match present(args, key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(wrong_type(key, "a string", other)),
        None => Err(JankinsError::invalid_params(format!(
            "Missing required parameters: {}",
            key
        ))),
    }
}

pub(crate) fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match present(args, key) {
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(wrong_type(key, "a string", other)),
        None => Ok(None),
    }
}

/// Whole non-negative number; `4096.0` and numeric strings are accepted.
pub(crate) fn u64_or(args: &Map<String, Value>, key: &str, default: u64) -> Result<u64> {
    match present(args, key) {
        None => Ok(default),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            })
            .ok_or_else(|| wrong_type(key, "a non-negative integer", &Value::Number(n.clone()))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| wrong_type(key, "a non-negative integer", &Value::String(s.clone()))),
        Some(other) => Err(wrong_type(key, "a non-negative integer", other)),
    }
}

pub(crate) fn bool_or(args: &Map<String, Value>, key: &str, default: bool) -> Result<bool> {
    match present(args, key) {
        None => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
        Some(other) => Err(wrong_type(key, "a boolean", other)),
    }
}

pub(crate) fn object_or_empty(args: &Map<String, Value>, key: &str) -> Result<Map<String, Value>> {
    match present(args, key) {
        None => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(wrong_type(key, "an object", other)),
    }
}

/// Number of the job's most recent build.
pub(crate) async fn last_build_number(api: &dyn JenkinsApi, job: &str) -> Result<u64> {
    let info = api.get_job_info(job).await?;
    info.get("lastBuild")
        .and_then(|b| b.get("number"))
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            JankinsError::invalid_params(format!("Job '{}' has no builds", job))
                .with_hint("Trigger a build first")
        })
}

/// Resolve a build reference: a number, a numeric string, or `"last"`.
/// An absent value means `"last"`.
pub(crate) async fn resolve_build_number(
    api: &dyn JenkinsApi,
    job: &str,
    value: Option<&Value>,
) -> Result<u64> {
    let invalid = |shown: &dyn std::fmt::Display| {
        JankinsError::invalid_params(format!("Invalid build number: {}", shown))
            .with_hint("Provide a number or 'last'")
    };

    match value.filter(|v| !v.is_null()) {
        None => last_build_number(api, job).await,
        Some(Value::String(s)) if s.trim() == "last" => last_build_number(api, job).await,
        Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid(s)),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| invalid(n)),
        Some(other) => Err(invalid(other)),
    }
}
