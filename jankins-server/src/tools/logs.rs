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

//! Console log tools: summary/chunked reads, search, and live tailing.

use super::{bool_or, optional_str, required_str, resolve_build_number, u64_or, ToolDeps};
use crate::formatters::{truncate_chars, ObjectKind, OutputFormat, Payload};
use crate::jenkins::progressive::{compile_pattern, filter_log};
use crate::jenkins::{JenkinsApi, LogFilter, ProgressiveLogClient};
use crate::mcp::registry::{RequestContext, Tool, ToolError, ToolHandler, ToolParameter};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const SEARCH_MATCHES_CAP: usize = 20;
const SEARCH_CONTEXT_CHARS: usize = 500;

pub fn tools(deps: &ToolDeps) -> Vec<Tool> {
    let max_bytes_default = deps.limits.max_bytes_default;
    vec![
        Tool::new(
            "get_build_log",
            "Get build log with smart truncation and filtering. Returns summary by default, full text on request.",
        )
        .param(ToolParameter::string("name", "Full job name").required())
        .param(ToolParameter::string("number", "Build number or 'last'").with_default(json!("last")))
        .param(ToolParameter::number("start", "Starting byte offset").with_default(json!(0)))
        .param(ToolParameter::number("max_bytes", "Maximum bytes to retrieve"))
        .param(ToolParameter::string("filter_regex", "Regex pattern to filter log lines"))
        .param(
            ToolParameter::boolean("redact", "Remove ANSI codes and secret masks")
                .with_default(json!(true)),
        )
        .param(ToolParameter::format(OutputFormat::Summary).one_of(&["summary", "full"]))
        .handler(Arc::new(GetBuildLog {
            api: deps.api.clone(),
            logs: deps.logs.clone(),
            max_bytes_default,
        })),
        Tool::new(
            "search_log",
            "Search build log for pattern and return matching lines with context",
        )
        .param(ToolParameter::string("name", "Full job name").required())
        .param(ToolParameter::string("number", "Build number or 'last'").with_default(json!("last")))
        .param(ToolParameter::string("pattern", "Regex pattern to search for").required())
        .param(
            ToolParameter::number("window_lines", "Lines of context before/after match")
                .with_default(json!(5)),
        )
        .param(ToolParameter::number("max_bytes", "Maximum bytes to search"))
        .handler(Arc::new(SearchLog {
            api: deps.api.clone(),
            logs: deps.logs.clone(),
            max_bytes_default,
        })),
        Tool::new(
            "tail_log_live",
            "Get log chunk for live tailing (poll repeatedly with next_byte for streaming effect)",
        )
        .param(ToolParameter::string("name", "Full job name").required())
        .param(ToolParameter::number("build_number", "Build number").required())
        .param(ToolParameter::number("start_byte", "Starting byte offset").with_default(json!(0)))
        .param(ToolParameter::number("max_bytes", "Maximum bytes per chunk"))
        .default_format(OutputFormat::Full)
        .handler(Arc::new(TailLogLive {
            api: deps.api.clone(),
            logs: deps.logs.clone(),
            max_bytes_default,
        })),
    ]
}

pub struct GetBuildLog {
    api: Arc<dyn JenkinsApi>,
    logs: ProgressiveLogClient,
    max_bytes_default: usize,
}

#[async_trait]
impl ToolHandler for GetBuildLog {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let name = required_str(args, "name")?;
        let start = u64_or(args, "start", 0)?;
        let max_bytes = u64_or(args, "max_bytes", self.max_bytes_default as u64)? as usize;
        let pattern = optional_str(args, "filter_regex")?
            .map(compile_pattern)
            .transpose()?;
        let redact = bool_or(args, "redact", true)?;
        let number = resolve_build_number(self.api.as_ref(), name, args.get("number")).await?;

        let summary = self.logs.summarize(name, number, max_bytes).await?;
        let mut body = json!({
            "build_number": number,
            "job_name": name,
            "summary": summary,
        });

        if ctx.format == OutputFormat::Full {
            let chunk = self.logs.get_chunk(name, number, start, Some(max_bytes)).await?;
            let text = if pattern.is_some() || redact {
                filter_log(
                    &chunk.text,
                    &LogFilter {
                        pattern: pattern.as_ref(),
                        levels: &[],
                        redact,
                    },
                )
            } else {
                chunk.text
            };
            body["chunks"] = json!([{
                "text": text,
                "start": chunk.start,
                "end": chunk.end,
                "has_more": chunk.has_more,
            }]);
        }

        Ok(Payload::new(ObjectKind::LogResponse, body))
    }
}

pub struct SearchLog {
    api: Arc<dyn JenkinsApi>,
    logs: ProgressiveLogClient,
    max_bytes_default: usize,
}

#[async_trait]
impl ToolHandler for SearchLog {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let name = required_str(args, "name")?;
        let raw_pattern = required_str(args, "pattern")?;
        let pattern = compile_pattern(raw_pattern)?;
        let window_lines = usize::try_from(u64_or(args, "window_lines", 5)?).unwrap_or(usize::MAX);
        let max_bytes = u64_or(args, "max_bytes", self.max_bytes_default as u64)? as usize;
        let number = resolve_build_number(self.api.as_ref(), name, args.get("number")).await?;

        let matches = self
            .logs
            .search(name, number, &pattern, window_lines, max_bytes)
            .await?;

        let shown: Vec<Value> = matches
            .iter()
            .take(SEARCH_MATCHES_CAP)
            .map(|m| {
                json!({
                    "line_number": m.line_number,
                    "context": truncate_chars(&m.context, SEARCH_CONTEXT_CHARS),
                })
            })
            .collect();

        Ok(Payload::raw(json!({
            "build_number": number,
            "job_name": name,
            "pattern": raw_pattern,
            "matches_count": matches.len(),
            "matches": shown,
        })))
    }
}

pub struct TailLogLive {
    api: Arc<dyn JenkinsApi>,
    logs: ProgressiveLogClient,
    max_bytes_default: usize,
}

#[async_trait]
impl ToolHandler for TailLogLive {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let name = required_str(args, "name")?;
        let number = resolve_build_number(self.api.as_ref(), name, args.get("build_number")).await?;
        let start_byte = u64_or(args, "start_byte", 0)?;
        let max_bytes = u64_or(args, "max_bytes", self.max_bytes_default as u64)? as usize;

        let chunk = self
            .logs
            .get_chunk(name, number, start_byte, Some(max_bytes))
            .await?;
        let line_count = if chunk.text.is_empty() {
            0
        } else {
            chunk.text.split('\n').count()
        };

        Ok(Payload::raw(json!({
            "build_number": number,
            "job_name": name,
            "start_byte": start_byte,
            "next_byte": chunk.end,
            "has_more": chunk.has_more,
            "log_content": chunk.text,
            "line_count": line_count,
        })))
    }
}
