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

//! Prompt templates for common Jenkins workflows.
//!
//! Each prompt renders one user message that walks the model through the
//! tool calls for the task.

use crate::mcp::protocol::PromptMessage;
use crate::mcp::registry::{McpServer, Prompt, PromptHandler, ToolError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

type Render = fn(&Map<String, Value>) -> String;

/// A prompt whose single message is produced by a plain render function.
pub struct TemplatePrompt {
    render: Render,
}

#[async_trait]
impl PromptHandler for TemplatePrompt {
    async fn render(&self, args: &Map<String, Value>) -> Result<Vec<PromptMessage>, ToolError> {
        Ok(vec![PromptMessage::user_text((self.render)(args))])
    }
}

fn template(render: Render) -> Arc<dyn PromptHandler> {
    Arc::new(TemplatePrompt { render })
}

/// Argument as text; prompt arguments are strings but numbers are tolerated.
fn arg(args: &Map<String, Value>, key: &str, default: &str) -> String {
    match args.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}

fn investigate_failure(args: &Map<String, Value>) -> String {
    format!(
        "I need to investigate a failing Jenkins build.

Job: {job}
Build: #{build}

Please help me:
1. Get the build status and basic information
2. Retrieve a summary of the build log focusing on errors
3. Perform failure triage to identify root causes
4. Provide recommended next steps for fixing the issue

Use the following tools:
- get_build to get build information
- get_build_log with format=summary to get error summary
- triage_failure to analyze the failure
- get_build_changes to see recent commits that may have caused the failure
",
        job = arg(args, "job", ""),
        build = arg(args, "build", "last"),
    )
}

fn tail_errors(args: &Map<String, Value>) -> String {
    format!(
        "Show me only the warnings and errors from a build.

Job: {job}
Build: #{build}

Please use get_build_log with:
- filter_regex to match lines containing ERROR or WARN
- redact=true to clean up ANSI codes
- format=summary for a compact view

Focus on the most recent errors at the end of the log.
",
        job = arg(args, "job", ""),
        build = arg(args, "build", "last"),
    )
}

fn compare_builds(args: &Map<String, Value>) -> String {
    format!(
        "Compare two builds to understand what changed.

Job: {job}
Base build: #{base}
Head build: #{head}

Please use:
- compare_runs to see differences in duration and results
- get_build_changes for both builds to see commit differences
- If results differ, use triage_failure on the failing build

Summarize key differences and potential causes of any new failures.
",
        job = arg(args, "job", ""),
        base = arg(args, "base", ""),
        head = arg(args, "head", ""),
    )
}

fn check_job_health(args: &Map<String, Value>) -> String {
    format!(
        "Check the overall health of a Jenkins job.

Job: {job}

Please:
1. Get job information including health reports and build history
2. Check the last successful build and last failed build
3. If there are recent failures, investigate the most recent one
4. Provide a summary of job health and stability

Use:
- get_job to get job details and health reports
- get_build for last successful and last failed builds
- triage_failure if recent builds are failing
",
        job = arg(args, "job", ""),
    )
}

fn trigger_with_params(args: &Map<String, Value>) -> String {
    format!(
        "Trigger a new build for a Jenkins job.

Job: {job}
Parameters: {parameters}

Please:
1. Get job information to understand what parameters are available
2. Trigger the build with the specified parameters
3. Monitor the queue to confirm the build is scheduled

Use:
- get_job to see job configuration and parameters
- trigger_build with appropriate parameters
- summarize_queue to check build was queued
",
        job = arg(args, "job", ""),
        parameters = arg(args, "parameters", "default parameters"),
    )
}

fn search_logs(args: &Map<String, Value>) -> String {
    format!(
        "Search build logs for a specific pattern.

Job: {job}
Build: #{build}
Pattern: {pattern}

Please use search_log to find all occurrences of the pattern with context.
Show the matching lines and their context to help understand where and why
the pattern appears in the build log.
",
        job = arg(args, "job", ""),
        build = arg(args, "build", "last"),
        pattern = arg(args, "pattern", ""),
    )
}

pub fn all_prompts() -> Vec<Prompt> {
    vec![
        Prompt::new(
            "investigate_failure",
            "Investigate a failing pipeline step with root cause analysis",
        )
        .argument("job", "Job name", true)
        .argument("build", "Build number or 'last'", false)
        .handler(template(investigate_failure)),
        Prompt::new("tail_errors", "Tail only warnings and errors for the last run")
            .argument("job", "Job name", true)
            .argument("build", "Build number or 'last'", false)
            .handler(template(tail_errors)),
        Prompt::new("compare_builds", "Compare two builds to identify differences")
            .argument("job", "Job name", true)
            .argument("base", "Base build number", true)
            .argument("head", "Head build number", true)
            .handler(template(compare_builds)),
        Prompt::new("check_job_health", "Check overall health and stability of a job")
            .argument("job", "Job name", true)
            .handler(template(check_job_health)),
        Prompt::new("trigger_with_params", "Trigger a parameterized build with guidance")
            .argument("job", "Job name", true)
            .argument("parameters", "Description of parameters to use", false)
            .handler(template(trigger_with_params)),
        Prompt::new("search_logs", "Search build logs for a specific pattern or error")
            .argument("job", "Job name", true)
            .argument("pattern", "Pattern to search for (regex)", true)
            .argument("build", "Build number or 'last'", false)
            .handler(template(search_logs)),
    ]
}

pub fn register_all(server: &mut McpServer) {
    for prompt in all_prompts() {
        server.register_prompt(prompt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::PromptContent;
    use crate::metrics::Metrics;
    use serde_json::json;

    fn text_of(messages: &[PromptMessage]) -> &str {
        match &messages[0].content {
            PromptContent::Text { text } => text,
        }
    }

    fn server() -> McpServer {
        let mut server = McpServer::new("jankins", "test", Arc::new(Metrics::new()));
        register_all(&mut server);
        server
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_all_prompts_listed() {
        let names: Vec<String> = server().list_prompts().into_iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec![
                "check_job_health",
                "compare_builds",
                "investigate_failure",
                "search_logs",
                "tail_errors",
                "trigger_with_params",
            ]
        );
    }

    #[tokio::test]
    async fn test_build_defaults_to_last() {
        let messages = server()
            .get_prompt("investigate_failure", args(json!({"job": "infra/build"})))
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        let text = text_of(&messages);
        assert!(text.contains("Job: infra/build"));
        assert!(text.contains("Build: #last"));
        assert!(text.contains("triage_failure"));
    }

    #[tokio::test]
    async fn test_search_logs_includes_pattern_and_numeric_build() {
        let messages = server()
            .get_prompt(
                "search_logs",
                args(json!({"job": "app", "pattern": "OutOfMemory", "build": 42})),
            )
            .await
            .unwrap();
        let text = text_of(&messages);
        assert!(text.contains("Pattern: OutOfMemory"));
        assert!(text.contains("Build: #42"));
    }

    #[tokio::test]
    async fn test_missing_arguments_are_all_reported() {
        let err = server()
            .get_prompt("compare_builds", args(json!({"job": "app"})))
            .await
            .unwrap_err();
        assert_eq!(err.message, "Missing required arguments: base, head");
    }

    #[test]
    fn test_trigger_parameters_default() {
        let text = trigger_with_params(&args(json!({"job": "deploy"})));
        assert!(text.contains("Parameters: default parameters"));
    }
}
