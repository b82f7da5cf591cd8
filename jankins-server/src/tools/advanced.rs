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

//! Analysis tools built on top of the basic Jenkins reads: failure triage,
//! run comparison, pipeline graphs and flaky-build retries.

use super::builds::change_items;
use super::{object_or_empty, required_str, resolve_build_number, u64_or, ToolDeps};
use crate::formatters::{compact_change, ObjectKind, OutputFormat, Payload};
use crate::jenkins::{BlueOceanClient, JenkinsApi, Lookup, ProgressiveLogClient};
use crate::mcp::registry::{RequestContext, Tool, ToolError, ToolHandler, ToolParameter};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const HYPOTHESES_CAP: usize = 5;
const NEXT_STEPS_CAP: usize = 7;
const SUSPECT_CHANGES_CAP: usize = 5;

pub fn tools(deps: &ToolDeps) -> Vec<Tool> {
    let name = || ToolParameter::string("name", "Full job name").required();
    let number =
        || ToolParameter::string("number", "Build number or 'last'").with_default(json!("last"));
    let summary_or_full =
        || ToolParameter::format(OutputFormat::Summary).one_of(&["summary", "full"]);

    vec![
        Tool::new(
            "triage_failure",
            "Analyze a failed build and provide root cause hypotheses and next steps",
        )
        .param(name())
        .param(number())
        .param(ToolParameter::number("max_bytes", "Maximum log bytes to analyze"))
        .param(summary_or_full())
        .handler(Arc::new(TriageFailure {
            api: deps.api.clone(),
            logs: deps.logs.clone(),
            max_bytes_default: deps.limits.max_bytes_default,
        })),
        Tool::new(
            "compare_runs",
            "Compare two builds to identify differences in duration, stages, and results",
        )
        .param(name())
        .param(ToolParameter::string("base", "Base build number").required())
        .param(ToolParameter::string("head", "Head build number to compare").required())
        .param(ToolParameter::format(OutputFormat::Diff).one_of(&["summary", "full", "diff"]))
        .handler(Arc::new(CompareRuns {
            api: deps.api.clone(),
            blue_ocean: deps.blue_ocean.clone(),
        })),
        Tool::new(
            "get_pipeline_graph",
            "Get pipeline execution graph with stages, parallel branches, and timing (requires Blue Ocean plugin)",
        )
        .param(name())
        .param(number())
        .param(summary_or_full())
        .handler(Arc::new(GetPipelineGraph {
            api: deps.api.clone(),
            blue_ocean: deps.blue_ocean.clone(),
        })),
        Tool::new(
            "retry_flaky_build",
            "Retry a flaky build multiple times until it succeeds or max retries reached",
        )
        .param(name())
        .param(ToolParameter::number("max_retries", "Maximum retry attempts").with_default(json!(3)))
        .param(
            ToolParameter::number("delay_seconds", "Delay between retries in seconds")
                .with_default(json!(5)),
        )
        .param(ToolParameter::object("parameters", "Build parameters"))
        .param(summary_or_full())
        .handler(Arc::new(RetryFlakyBuild {
            api: deps.api.clone(),
        })),
    ]
}

/// Root-cause guesses from keywords in the error lines.
pub fn generate_hypotheses(error_lines: &[String]) -> Vec<String> {
    let text = error_lines.join(" ").to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    let rules = [
        (
            any(&["timeout", "timed out"]),
            "Timeout: Operation exceeded time limit",
        ),
        (
            any(&["out of memory", "oom"]),
            "Out of Memory: Insufficient heap or memory allocation",
        ),
        (
            any(&["connection refused", "connection reset"]),
            "Network Issue: Connection to external service failed",
        ),
        (
            any(&["permission denied", "forbidden"]),
            "Permission Issue: Insufficient access rights",
        ),
        (
            any(&["no such file", "not found"]),
            "Missing Resource: Required file or dependency not found",
        ),
        (
            any(&["compilation error", "syntax error"]),
            "Code Error: Compilation or syntax issue in source",
        ),
        (
            text.contains("test") && any(&["fail", "error"]),
            "Test Failure: One or more tests did not pass",
        ),
        (
            any(&["npm", "yarn", "package"]),
            "Dependency Issue: Package installation or resolution failed",
        ),
    ];

    let mut hypotheses: Vec<String> = rules
        .iter()
        .filter(|(matched, _)| *matched)
        .map(|(_, hypothesis)| hypothesis.to_string())
        .take(HYPOTHESES_CAP)
        .collect();
    if hypotheses.is_empty() {
        hypotheses.push("Unknown: Review error logs for specific failure patterns".to_string());
    }
    hypotheses
}

/// Investigation steps, most specific first.
pub fn generate_next_steps(
    failing_stages: &[String],
    error_lines: &[String],
    has_changes: bool,
) -> Vec<String> {
    let mut steps = Vec::new();

    if !failing_stages.is_empty() {
        let shown: Vec<&str> = failing_stages.iter().take(3).map(String::as_str).collect();
        steps.push(format!("Review failing stage(s): {}", shown.join(", ")));
    }
    if !error_lines.is_empty() {
        steps.push("Examine error messages in build log for root cause".to_string());
    }
    if has_changes {
        steps.push("Review recent commits for potentially breaking changes".to_string());
    }
    steps.push("Check if issue reproduces locally with same configuration".to_string());
    steps.push("Compare with last successful build for environmental differences".to_string());

    let text = error_lines.join(" ").to_lowercase();
    if text.contains("test") {
        steps.push("Run failing tests locally to debug".to_string());
    }
    if text.contains("timeout") {
        steps.push("Increase timeout limits or optimize slow operations".to_string());
    }
    if text.contains("memory") {
        steps.push("Increase memory allocation or check for memory leaks".to_string());
    }

    steps.truncate(NEXT_STEPS_CAP);
    steps
}

pub struct TriageFailure {
    api: Arc<dyn JenkinsApi>,
    logs: ProgressiveLogClient,
    max_bytes_default: usize,
}

#[async_trait]
impl ToolHandler for TriageFailure {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let name = required_str(args, "name")?;
        let max_bytes = u64_or(args, "max_bytes", self.max_bytes_default as u64)? as usize;
        let number = resolve_build_number(self.api.as_ref(), name, args.get("number")).await?;

        let build = self.api.get_build_info(name, number).await?;
        let summary = self.logs.summarize(name, number, max_bytes).await?;

        let result = build.get("result").cloned().unwrap_or(Value::Null);
        if result.as_str() != Some("FAILURE") {
            let shown = result.as_str().map_or_else(|| "None".to_string(), str::to_string);
            return Ok(Payload::new(
                ObjectKind::Triage,
                json!({
                    "build_number": number,
                    "result": result,
                    "message": format!("Build is not a failure (result: {})", shown),
                    "hypotheses": [],
                    "top_errors": [],
                    "failing_stages": [],
                    "next_steps": [],
                }),
            ));
        }

        let changes = change_items(&build);
        let suspect_changes: Vec<Value> = changes
            .iter()
            .take(SUSPECT_CHANGES_CAP)
            .map(compact_change)
            .collect();
        let hypotheses = generate_hypotheses(&summary.last_error_lines);
        let next_steps = generate_next_steps(
            &summary.failing_stages,
            &summary.last_error_lines,
            !changes.is_empty(),
        );

        info!(
            job = name,
            build = number,
            hypotheses = hypotheses.len(),
            "Triaged failed build"
        );

        Ok(Payload::new(
            ObjectKind::Triage,
            json!({
                "build_number": number,
                "job_name": name,
                "result": result,
                "hypotheses": hypotheses,
                "top_errors": summary.last_error_lines,
                "failing_stages": summary.failing_stages,
                "suspect_changes": suspect_changes,
                "next_steps": next_steps,
            }),
        ))
    }
}

pub struct CompareRuns {
    api: Arc<dyn JenkinsApi>,
    blue_ocean: BlueOceanClient,
}

fn run_overview(build: &Value, number: u64) -> Value {
    json!({
        "number": build.get("number").cloned().unwrap_or_else(|| json!(number)),
        "result": build.get("result").cloned().unwrap_or(Value::Null),
        "duration": build.get("duration").and_then(Value::as_i64).unwrap_or(0),
    })
}

#[async_trait]
impl ToolHandler for CompareRuns {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let name = required_str(args, "name")?;
        let api = self.api.as_ref();
        let base = resolve_build_number(api, name, args.get("base")).await?;
        let head = resolve_build_number(api, name, args.get("head")).await?;

        let base_build = run_overview(&api.get_build_info(name, base).await?, base);
        let head_build = run_overview(&api.get_build_info(name, head).await?, head);
        let duration_delta = head_build["duration"].as_i64().unwrap_or(0)
            - base_build["duration"].as_i64().unwrap_or(0);

        let stages = self.blue_ocean.compare_pipeline_runs(name, base, head).await;

        Ok(Payload::new(
            ObjectKind::Comparison,
            json!({
                "job_name": name,
                "base_build": base_build,
                "head_build": head_build,
                "duration_delta": duration_delta,
                "stage_diffs": stages.stage_diffs,
            }),
        ))
    }
}

pub struct GetPipelineGraph {
    api: Arc<dyn JenkinsApi>,
    blue_ocean: BlueOceanClient,
}

#[async_trait]
impl ToolHandler for GetPipelineGraph {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let name = required_str(args, "name")?;
        let number = resolve_build_number(self.api.as_ref(), name, args.get("number")).await?;

        let graph = match self.blue_ocean.get_pipeline_graph(name, number).await {
            Lookup::Found(graph) => graph,
            _ => {
                return Ok(Payload::new(
                    ObjectKind::PipelineGraph,
                    json!({
                        "build_number": number,
                        "job_name": name,
                        "error": "Blue Ocean API not available for this build",
                        "stages": [],
                        "available": false,
                    }),
                ))
            }
        };
        let failing = self
            .blue_ocean
            .get_failing_stages_detailed(name, number)
            .await
            .unwrap_or_default();

        Ok(Payload::new(
            ObjectKind::PipelineGraph,
            json!({
                "build_number": number,
                "job_name": name,
                "available": true,
                "stages": graph.stages,
                "parallel_stages": graph.parallel_stages,
                "total_duration_ms": graph.total_duration_ms,
                "node_count": graph.node_count,
                "failing_stages": failing,
            }),
        ))
    }
}

pub struct RetryFlakyBuild {
    api: Arc<dyn JenkinsApi>,
}

impl RetryFlakyBuild {
    /// Queue one build, wait, then read the job's latest build result.
    async fn attempt(
        &self,
        name: &str,
        parameters: &Map<String, Value>,
        delay: Duration,
    ) -> crate::error::Result<Option<(u64, String, Option<u64>)>> {
        let queue_id = self.api.build_job(name, parameters).await?;
        tokio::time::sleep(delay).await;

        let job = self.api.get_job_info(name).await?;
        let Some(number) = job
            .get("lastBuild")
            .and_then(|b| b.get("number"))
            .and_then(Value::as_u64)
        else {
            return Ok(None);
        };
        let build = self.api.get_build_info(name, number).await?;
        let result = build
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        Ok(Some((number, result, queue_id)))
    }
}

#[async_trait]
impl ToolHandler for RetryFlakyBuild {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let name = required_str(args, "name")?;
        let max_retries = u64_or(args, "max_retries", 3)?;
        let delay = Duration::from_secs(u64_or(args, "delay_seconds", 5)?);
        let parameters = object_or_empty(args, "parameters")?;

        let mut retries = Vec::new();
        let mut success = false;

        for attempt in 1..=max_retries {
            info!(job = name, attempt, max_retries, "Retrying build");

            match self.attempt(name, &parameters, delay).await {
                Ok(Some((build_number, result, queue_id))) => {
                    let passed = result == "SUCCESS";
                    retries.push(json!({
                        "attempt": attempt,
                        "build_number": build_number,
                        "result": result,
                        "queue_id": queue_id,
                    }));
                    if passed {
                        success = true;
                        break;
                    }
                }
                Ok(None) => warn!(job = name, attempt, "No build found after trigger"),
                Err(e) => {
                    error!(job = name, attempt, error = %e, "Retry attempt failed");
                    retries.push(json!({
                        "attempt": attempt,
                        "error": e.to_string(),
                    }));
                }
            }

            if attempt < max_retries {
                tokio::time::sleep(delay).await;
            }
        }

        let outcome = if success { "succeeded" } else { "failed" };
        Ok(Payload::raw(json!({
            "job_name": name,
            "success": success,
            "attempts": retries.len(),
            "max_retries": max_retries,
            "message": format!("Build {} after {} attempt(s)", outcome, retries.len()),
            "retries": retries,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLimitsConfig;
    use crate::formatters::shape;
    use crate::tools::testing::FakeJenkins;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn handler(api: FakeJenkins, name: &str) -> Arc<dyn ToolHandler> {
        let deps = ToolDeps::new(Arc::new(api), LogLimitsConfig::default(), "jankins", "test");
        tools(&deps)
            .into_iter()
            .find(|t| t.name == name)
            .and_then(|t| t.handler)
            .unwrap()
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn failed_build() -> FakeJenkins {
        FakeJenkins::default()
            .with("job/infra/job/build/api/json", json!({"lastBuild": {"number": 57}}))
            .with(
                "job/infra/job/build/57/api/json",
                json!({
                    "number": 57,
                    "result": "FAILURE",
                    "changeSet": {"items": [
                        {"commitId": "0123456789abcdef", "author": {"fullName": "Dana"}, "msg": "Bump client"},
                    ]},
                }),
            )
            .with_log(
                "Started\nStage \"Integration\" failed\nERROR: Connection refused to db:5432\nERROR: test suite failed\nFinished: FAILURE\n",
            )
    }

    #[test]
    fn test_hypotheses_follow_keyword_rules() {
        let hypotheses = generate_hypotheses(&strings(&["FATAL: Out of memory while linking"]));
        assert_eq!(hypotheses, vec!["Out of Memory: Insufficient heap or memory allocation"]);

        let hypotheses = generate_hypotheses(&strings(&["Build step timed out", "npm ERR! test failed"]));
        assert_eq!(
            hypotheses,
            vec![
                "Timeout: Operation exceeded time limit",
                "Test Failure: One or more tests did not pass",
                "Dependency Issue: Package installation or resolution failed",
            ]
        );
    }

    #[test]
    fn test_hypotheses_cap_and_fallback() {
        let noisy = strings(&[
            "timeout oom connection refused permission denied not found syntax error test fail npm",
        ]);
        assert_eq!(generate_hypotheses(&noisy).len(), 5);
        assert_eq!(
            generate_hypotheses(&strings(&["something odd"])),
            vec!["Unknown: Review error logs for specific failure patterns"]
        );
    }

    #[test]
    fn test_next_steps_order_and_cap() {
        let steps = generate_next_steps(
            &strings(&["Build", "Test", "Deploy", "Publish"]),
            &strings(&["test timeout: out of memory"]),
            true,
        );
        assert_eq!(steps.len(), 7);
        assert_eq!(steps[0], "Review failing stage(s): Build, Test, Deploy");
        assert_eq!(steps[5], "Run failing tests locally to debug");
        assert_eq!(steps[6], "Increase timeout limits or optimize slow operations");

        let minimal = generate_next_steps(&[], &[], false);
        assert_eq!(
            minimal,
            vec![
                "Check if issue reproduces locally with same configuration",
                "Compare with last successful build for environmental differences",
            ]
        );
    }

    #[tokio::test]
    async fn test_triage_resolves_last_failed_build() {
        let payload = handler(failed_build(), "triage_failure")
            .handle(&args(json!({"name": "infra/build", "number": "last"})), &RequestContext::new(OutputFormat::Full))
            .await
            .unwrap();

        let body = &payload.body;
        assert_eq!(body["build_number"], 57);
        assert_eq!(body["result"], "FAILURE");
        assert_eq!(body["failing_stages"], json!(["Integration"]));
        assert_eq!(body["hypotheses"][0], "Network Issue: Connection to external service failed");
        assert_eq!(body["suspect_changes"][0]["commit"], "01234567");
        assert_eq!(body["suspect_changes"][0]["author"], "Dana");
        assert_eq!(body["next_steps"][0], "Review failing stage(s): Integration");
        assert!(body["next_steps"].as_array().unwrap().len() >= 1);
    }

    #[tokio::test]
    async fn test_triage_of_passing_build_is_a_message() {
        let api = FakeJenkins::default()
            .with("job/app/3/api/json", json!({"number": 3, "result": "SUCCESS"}))
            .with_log("all good\n");
        let payload = handler(api, "triage_failure")
            .handle(&args(json!({"name": "app", "number": 3})), &RequestContext::new(OutputFormat::Summary))
            .await
            .unwrap();

        assert_eq!(payload.body["message"], "Build is not a failure (result: SUCCESS)");
        let shaped = shape(payload.kind, OutputFormat::Summary, payload.body.clone());
        assert_eq!(shaped, payload.body);
        assert_eq!(shaped["hypotheses"], json!([]));
    }

    #[tokio::test]
    async fn test_compare_runs_without_blue_ocean() {
        let api = FakeJenkins::default()
            .with("job/app/10/api/json", json!({"number": 10, "result": "SUCCESS", "duration": 60000}))
            .with("job/app/11/api/json", json!({"number": 11, "result": "FAILURE", "duration": 45000}));
        let payload = handler(api, "compare_runs")
            .handle(&args(json!({"name": "app", "base": "10", "head": "11"})), &RequestContext::new(OutputFormat::Diff))
            .await
            .unwrap();

        assert_eq!(payload.body["duration_delta"], -15000);
        assert_eq!(payload.body["stage_diffs"], json!([]));

        let diff = shape(payload.kind, OutputFormat::Diff, payload.body);
        assert_eq!(diff["duration_change"], "faster");
        assert_eq!(diff["result_changed"], true);
        assert_eq!(diff["base_result"], "SUCCESS");
        assert_eq!(diff["head_result"], "FAILURE");
    }

    #[tokio::test]
    async fn test_pipeline_graph_unavailable() {
        let api = FakeJenkins::default();
        let payload = handler(api, "get_pipeline_graph")
            .handle(&args(json!({"name": "app", "number": 4})), &RequestContext::new(OutputFormat::Summary))
            .await
            .unwrap();
        assert_eq!(payload.body["available"], false);
        assert_eq!(payload.body["error"], "Blue Ocean API not available for this build");
    }

    #[tokio::test]
    async fn test_pipeline_graph_with_failing_stage() {
        let nodes = json!([
            {"id": "1", "displayName": "Build", "result": "SUCCESS", "durationInMillis": 1000, "type": "STAGE"},
            {"id": "2", "displayName": "Test", "result": "FAILURE", "durationInMillis": 3000, "type": "STAGE"},
        ]);
        let api = FakeJenkins::default()
            .with("blue/rest/organizations/jenkins/pipelines/app/runs/4/nodes", nodes)
            .with(
                "blue/rest/organizations/jenkins/pipelines/app/runs/4/nodes/2/steps",
                json!([{"displayName": "sh", "result": "FAILURE"}, {"displayName": "echo", "result": "SUCCESS"}]),
            );
        let payload = handler(api, "get_pipeline_graph")
            .handle(&args(json!({"name": "app", "number": 4})), &RequestContext::new(OutputFormat::Full))
            .await
            .unwrap();

        assert_eq!(payload.body["node_count"], 2);
        assert_eq!(payload.body["total_duration_ms"], 4000);
        assert_eq!(payload.body["failing_stages"][0]["name"], "Test");
        assert_eq!(payload.body["failing_stages"][0]["failing_steps"][0]["name"], "sh");
    }

    #[tokio::test]
    async fn test_retry_stops_at_first_success() {
        let api = FakeJenkins::default()
            .with("job/app/api/json", json!({"lastBuild": {"number": 21}}))
            .with("job/app/21/api/json", json!({"number": 21, "result": "SUCCESS"}));
        let payload = handler(api, "retry_flaky_build")
            .handle(
                &args(json!({"name": "app", "max_retries": 3, "delay_seconds": 0})),
                &RequestContext::new(OutputFormat::Summary),
            )
            .await
            .unwrap();

        assert_eq!(payload.body["success"], true);
        assert_eq!(payload.body["attempts"], 1);
        assert_eq!(payload.body["retries"][0]["queue_id"], 77);
        assert_eq!(payload.body["message"], "Build succeeded after 1 attempt(s)");
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let api = FakeJenkins::default()
            .with("job/app/api/json", json!({"lastBuild": {"number": 21}}))
            .with("job/app/21/api/json", json!({"number": 21, "result": "FAILURE"}));
        let payload = handler(api, "retry_flaky_build")
            .handle(
                &args(json!({"name": "app", "max_retries": 2, "delay_seconds": 0})),
                &RequestContext::new(OutputFormat::Summary),
            )
            .await
            .unwrap();

        assert_eq!(payload.body["success"], false);
        assert_eq!(payload.body["attempts"], 2);
        assert_eq!(payload.body["message"], "Build failed after 2 attempt(s)");
    }
}
