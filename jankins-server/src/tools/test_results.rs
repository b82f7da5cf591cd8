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

//! Test report tools.

use super::{bool_or, required_str, resolve_build_number, u64_or, ToolDeps};
use crate::formatters::{ObjectKind, OutputFormat, Payload};
use crate::jenkins::testresults::round2;
use crate::jenkins::{JenkinsApi, Lookup, TestResultParser};
use crate::mcp::registry::{RequestContext, Tool, ToolError, ToolHandler, ToolParameter};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const FLAKY_TESTS_CAP: usize = 20;

pub fn tools(deps: &ToolDeps) -> Vec<Tool> {
    let reader = || TestTools {
        api: deps.api.clone(),
        parser: deps.tests.clone(),
    };
    let name = || ToolParameter::string("name", "Full job name").required();
    let number =
        || ToolParameter::string("number", "Build number or 'last'").with_default(json!("last"));

    vec![
        Tool::new(
            "get_test_report",
            "Get test results summary from a build (JUnit, pytest, etc.)",
        )
        .param(name())
        .param(number())
        .param(
            ToolParameter::boolean("detailed", "Include detailed test suites")
                .with_default(json!(false)),
        )
        .param(ToolParameter::format(OutputFormat::Summary).one_of(&["summary", "full"]))
        .handler(Arc::new(GetTestReport(reader()))),
        Tool::new(
            "get_failed_tests",
            "Get list of failed tests from a build with error details",
        )
        .param(name())
        .param(number())
        .param(
            ToolParameter::number("limit", "Maximum number of failed tests to return")
                .with_default(json!(10)),
        )
        .param(ToolParameter::format(OutputFormat::Summary).one_of(&["summary", "full"]))
        .handler(Arc::new(GetFailedTests(reader()))),
        Tool::new(
            "compare_test_results",
            "Compare test results between two builds to identify new failures and regressions",
        )
        .param(name())
        .param(ToolParameter::string("base", "Base build number").required())
        .param(ToolParameter::string("head", "Head build number to compare").required())
        .param(ToolParameter::format(OutputFormat::Diff).one_of(&["summary", "full", "diff"]))
        .handler(Arc::new(CompareTestResults(reader()))),
        Tool::new(
            "detect_flaky_tests",
            "Detect flaky tests by analyzing test results across multiple builds",
        )
        .param(name())
        .param(
            ToolParameter::number("build_count", "Number of recent builds to analyze")
                .with_default(json!(10)),
        )
        .param(ToolParameter::format(OutputFormat::Summary).one_of(&["summary", "full"]))
        .handler(Arc::new(DetectFlakyTests(reader()))),
    ]
}

/// Shared state of the test tools.
pub struct TestTools {
    api: Arc<dyn JenkinsApi>,
    parser: TestResultParser,
}

impl TestTools {
    async fn target(&self, args: &Map<String, Value>) -> crate::error::Result<(String, u64)> {
        let name = required_str(args, "name")?;
        let number = resolve_build_number(self.api.as_ref(), name, args.get("number")).await?;
        Ok((name.to_string(), number))
    }
}

pub struct GetTestReport(TestTools);

#[async_trait]
impl ToolHandler for GetTestReport {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let detailed = bool_or(args, "detailed", false)?;
        let (name, number) = self.0.target(args).await?;

        let report = if detailed {
            self.0.parser.get_detailed_test_report(&name, number).await
        } else {
            self.0.parser.get_test_report(&name, number).await
        };

        let Lookup::Found(report) = report else {
            return Ok(Payload::new(
                ObjectKind::TestReport,
                json!({
                    "build_number": number,
                    "job_name": name,
                    "available": false,
                    "message": "No test results available for this build",
                }),
            ));
        };

        let mut body = json!({
            "build_number": number,
            "job_name": name,
            "available": true,
            "total_tests": report.total_tests,
            "passed": report.passed,
            "failed": report.failed,
            "skipped": report.skipped,
            "errors": report.errors,
            "pass_rate": round2(report.pass_rate()),
            "duration": round2(report.duration),
        });
        if detailed && !report.suites.is_empty() {
            let suites: Vec<Value> = report
                .suites
                .iter()
                .map(|s| {
                    json!({
                        "name": s.name,
                        "tests": s.tests,
                        "failures": s.failures,
                        "errors": s.errors,
                        "skipped": s.skipped,
                        "duration": round2(s.duration),
                    })
                })
                .collect();
            body["suites"] = json!(suites);
        }

        Ok(Payload::new(ObjectKind::TestReport, body))
    }
}

pub struct GetFailedTests(TestTools);

#[async_trait]
impl ToolHandler for GetFailedTests {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let limit = u64_or(args, "limit", 10)? as usize;
        let (name, number) = self.0.target(args).await?;

        let failed: Vec<Value> = self
            .0
            .parser
            .get_failed_tests(&name, number, limit)
            .await
            .into_iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "class": t.class_name,
                    "duration": round2(t.duration),
                    "status": t.status,
                    "error_message": t.error_message,
                    "stacktrace": t.error_stacktrace,
                })
            })
            .collect();

        Ok(Payload::new(
            ObjectKind::FailedTests,
            json!({
                "build_number": number,
                "job_name": name,
                "failed_count": failed.len(),
                "failed_tests": failed,
            }),
        ))
    }
}

pub struct CompareTestResults(TestTools);

#[async_trait]
impl ToolHandler for CompareTestResults {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let name = required_str(args, "name")?;
        let api = self.0.api.as_ref();
        let base = resolve_build_number(api, name, args.get("base")).await?;
        let head = resolve_build_number(api, name, args.get("head")).await?;

        let mut comparison = self.0.parser.compare_test_results(name, base, head).await;
        comparison["job_name"] = json!(name);
        Ok(Payload::new(ObjectKind::TestComparison, comparison))
    }
}

pub struct DetectFlakyTests(TestTools);

#[async_trait]
impl ToolHandler for DetectFlakyTests {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let name = required_str(args, "name")?;
        let build_count = u64_or(args, "build_count", 10)? as usize;

        let job = self.0.api.get_job_info(name).await?;
        let builds: Vec<u64> = job
            .get("builds")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .take(build_count)
            .filter_map(|b| b.get("number").and_then(Value::as_u64))
            .collect();

        let (Some(newest), Some(oldest)) = (builds.first(), builds.last()) else {
            return Ok(Payload::new(
                ObjectKind::FlakyTests,
                json!({
                    "job_name": name,
                    "builds_analyzed": 0,
                    "flaky_tests": [],
                }),
            ));
        };

        let flaky = self.0.parser.get_flaky_tests(name, &builds).await;
        let shown: Vec<_> = flaky.iter().take(FLAKY_TESTS_CAP).collect();

        Ok(Payload::new(
            ObjectKind::FlakyTests,
            json!({
                "job_name": name,
                "builds_analyzed": builds.len(),
                "build_range": format!("{}-{}", oldest, newest),
                "flaky_count": flaky.len(),
                "flaky_tests": shown,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLimitsConfig;
    use crate::formatters::shape;
    use crate::tools::testing::FakeJenkins;

    fn report(statuses: &[(&str, &str)]) -> Value {
        let cases: Vec<Value> = statuses
            .iter()
            .map(|(name, status)| {
                json!({"name": name, "className": "app.Tests", "status": status,
                       "errorDetails": if *status == "FAILED" { json!("expected true") } else { Value::Null }})
            })
            .collect();
        json!({"suites": [{"name": "app.Tests", "duration": 2.0, "cases": cases}]})
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

    #[tokio::test]
    async fn test_report_from_build_action() {
        let api = FakeJenkins::default().with(
            "job/app/5/api/json",
            json!({"actions": [
                {},
                {"_class": "hudson.tasks.junit.TestResultAction", "totalCount": 50, "failCount": 2, "skipCount": 3},
            ]}),
        );
        let payload = handler(api, "get_test_report")
            .handle(&args(json!({"name": "app", "number": "5"})), &RequestContext::new(OutputFormat::Summary))
            .await
            .unwrap();

        assert_eq!(payload.body["available"], true);
        assert_eq!(payload.body["passed"], 45);
        assert_eq!(payload.body["pass_rate"], 90.0);
    }

    #[tokio::test]
    async fn test_report_unavailable_message() {
        let api = FakeJenkins::default().with("job/app/5/api/json", json!({"actions": []}));
        let payload = handler(api, "get_test_report")
            .handle(&args(json!({"name": "app", "number": 5})), &RequestContext::new(OutputFormat::Summary))
            .await
            .unwrap();
        assert_eq!(payload.body["available"], false);
        assert_eq!(payload.body["message"], "No test results available for this build");
    }

    #[tokio::test]
    async fn test_detailed_report_suites_only_in_full() {
        let api = FakeJenkins::default().with(
            "job/app/5/testReport/api/json",
            report(&[("a", "PASSED"), ("b", "FAILED")]),
        );
        let payload = handler(api, "get_test_report")
            .handle(
                &args(json!({"name": "app", "number": 5, "detailed": true})),
                &RequestContext::new(OutputFormat::Full),
            )
            .await
            .unwrap();

        assert_eq!(payload.body["suites"][0]["failures"], 1);
        let summary = shape(payload.kind, OutputFormat::Summary, payload.body);
        assert!(summary.get("suites").is_none());
        assert_eq!(summary["failed"], 1);
    }

    #[tokio::test]
    async fn test_failed_tests_limit() {
        let api = FakeJenkins::default().with(
            "job/app/5/testReport/api/json",
            report(&[("a", "FAILED"), ("b", "PASSED"), ("c", "FAILED"), ("d", "FAILED")]),
        );
        let payload = handler(api, "get_failed_tests")
            .handle(&args(json!({"name": "app", "number": 5, "limit": 2})), &RequestContext::new(OutputFormat::Summary))
            .await
            .unwrap();

        assert_eq!(payload.body["failed_count"], 2);
        assert_eq!(payload.body["failed_tests"][1]["name"], "c");
        assert_eq!(payload.body["failed_tests"][0]["class"], "app.Tests");
    }

    #[tokio::test]
    async fn test_compare_flags_regression() {
        let action = |fail: u64| {
            json!({"actions": [{"_class": "hudson.tasks.junit.TestResultAction",
                                "totalCount": 10, "failCount": fail, "skipCount": 0}]})
        };
        let api = FakeJenkins::default()
            .with("job/app/1/api/json", action(0))
            .with("job/app/2/api/json", action(3));
        let payload = handler(api, "compare_test_results")
            .handle(&args(json!({"name": "app", "base": "1", "head": "2"})), &RequestContext::new(OutputFormat::Diff))
            .await
            .unwrap();

        assert_eq!(payload.body["regression"], true);
        assert_eq!(payload.body["deltas"]["failed"], 3);
        assert_eq!(payload.body["deltas"]["pass_rate"], -30.0);
        assert_eq!(payload.body["job_name"], "app");
    }

    #[tokio::test]
    async fn test_compare_without_reports() {
        let api = FakeJenkins::default();
        let payload = handler(api, "compare_test_results")
            .handle(&args(json!({"name": "app", "base": 1, "head": 2})), &RequestContext::new(OutputFormat::Diff))
            .await
            .unwrap();
        assert_eq!(payload.body["available"], false);
        assert_eq!(payload.body["error"], "Test results not available for comparison");
    }

    #[tokio::test]
    async fn test_flaky_detection_over_recent_builds() {
        let api = FakeJenkins::default()
            .with("job/app/api/json", json!({"builds": [{"number": 12}, {"number": 11}, {"number": 10}]}))
            .with("job/app/12/testReport/api/json", report(&[("t", "PASSED"), ("u", "PASSED")]))
            .with("job/app/11/testReport/api/json", report(&[("t", "FAILED"), ("u", "PASSED")]))
            .with("job/app/10/testReport/api/json", report(&[("t", "PASSED"), ("u", "PASSED")]));

        let payload = handler(api, "detect_flaky_tests")
            .handle(&args(json!({"name": "app"})), &RequestContext::new(OutputFormat::Summary))
            .await
            .unwrap();

        assert_eq!(payload.body["builds_analyzed"], 3);
        assert_eq!(payload.body["build_range"], "10-12");
        assert_eq!(payload.body["flaky_count"], 1);
        assert_eq!(payload.body["flaky_tests"][0]["test"], "app.Tests.t");
        assert_eq!(payload.body["flaky_tests"][0]["failure_rate"], 33.33);
    }

    #[tokio::test]
    async fn test_flaky_detection_without_builds() {
        let api = FakeJenkins::default().with("job/app/api/json", json!({"builds": []}));
        let payload = handler(api, "detect_flaky_tests")
            .handle(&args(json!({"name": "app"})), &RequestContext::new(OutputFormat::Summary))
            .await
            .unwrap();
        assert_eq!(payload.body["builds_analyzed"], 0);
        assert_eq!(payload.body["flaky_tests"], json!([]));
    }
}
