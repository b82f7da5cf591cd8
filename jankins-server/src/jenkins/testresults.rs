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

//! JUnit-style test report parsing.

use crate::jenkins::blueocean::Lookup;
use crate::jenkins::client::JenkinsApi;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const TEST_ACTION_CLASSES: &[&str] = &[
    "hudson.tasks.junit.TestResultAction",
    "hudson.tasks.test.AggregatedTestResultAction",
];

const DETAILED_TREE: &str =
    "suites[name,duration,cases[name,className,duration,status,errorDetails,errorStackTrace]]";

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestCase {
    pub name: String,
    pub class_name: String,
    pub duration: f64,
    /// PASSED, FAILED, SKIPPED, or anything else counted as an error
    pub status: String,
    pub error_message: Option<String>,
    pub error_stacktrace: Option<String>,
}

impl TestCase {
    fn from_json(case: &Value) -> Self {
        let text = |key: &str| case.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            name: text("name").unwrap_or_default(),
            class_name: text("className").unwrap_or_default(),
            duration: case.get("duration").and_then(Value::as_f64).unwrap_or(0.0),
            status: text("status").unwrap_or_else(|| "UNKNOWN".to_string()),
            error_message: text("errorDetails"),
            error_stacktrace: text("errorStackTrace"),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status.as_str(), "FAILED" | "ERROR")
    }

    /// `class.name`, the identity used across builds.
    pub fn key(&self) -> String {
        format!("{}.{}", self.class_name, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSuite {
    pub name: String,
    pub tests: u64,
    pub failures: u64,
    pub errors: u64,
    pub skipped: u64,
    pub duration: f64,
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestReport {
    pub total_tests: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub duration: f64,
    pub suites: Vec<TestSuite>,
}

impl TestReport {
    /// Percentage of passing tests; zero for an empty report.
    pub fn pass_rate(&self) -> f64 {
        if self.total_tests == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total_tests as f64 * 100.0
    }

    /// Counts from a build's test result action.
    pub fn from_action(action: &Value) -> Self {
        let count = |key: &str| action.get(key).and_then(Value::as_u64).unwrap_or(0);
        let total = count("totalCount");
        let failed = count("failCount");
        let skipped = count("skipCount");
        Self {
            total_tests: total,
            passed: total.saturating_sub(failed + skipped),
            failed,
            skipped,
            ..Default::default()
        }
    }

    /// Full suite/case breakdown from `testReport/api/json`.
    pub fn from_detailed(data: &Value) -> Self {
        let mut report = TestReport::default();

        for suite_data in data.get("suites").and_then(Value::as_array).into_iter().flatten() {
            let cases: Vec<TestCase> = suite_data
                .get("cases")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .map(TestCase::from_json)
                .collect();

            let mut suite = TestSuite {
                name: suite_data
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown")
                    .to_string(),
                tests: cases.len() as u64,
                failures: 0,
                errors: 0,
                skipped: 0,
                duration: suite_data.get("duration").and_then(Value::as_f64).unwrap_or(0.0),
                test_cases: Vec::new(),
            };
            for case in &cases {
                match case.status.as_str() {
                    "FAILED" => suite.failures += 1,
                    "SKIPPED" => suite.skipped += 1,
                    "PASSED" => {}
                    _ => suite.errors += 1,
                }
            }
            suite.test_cases = cases;

            report.total_tests += suite.tests;
            report.failed += suite.failures;
            report.errors += suite.errors;
            report.skipped += suite.skipped;
            report.duration += suite.duration;
            report.suites.push(suite);
        }

        report.passed = report
            .total_tests
            .saturating_sub(report.failed + report.errors + report.skipped);
        report
    }

    fn stats(&self) -> Value {
        json!({
            "total": self.total_tests,
            "passed": self.passed,
            "failed": self.failed,
            "skipped": self.skipped,
            "pass_rate": round2(self.pass_rate()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlakyTest {
    pub test: String,
    pub failure_count: usize,
    pub total_runs: usize,
    pub failure_rate: f64,
    pub statuses: Vec<String>,
}

/// Tests seen both passing and failing, highest failure rate first.
pub fn find_flaky(reports: &[TestReport]) -> Vec<FlakyTest> {
    let mut order: Vec<String> = Vec::new();
    let mut history: HashMap<String, Vec<String>> = HashMap::new();

    for report in reports {
        for case in report.suites.iter().flat_map(|s| &s.test_cases) {
            let key = case.key();
            if !history.contains_key(&key) {
                order.push(key.clone());
            }
            history.entry(key).or_default().push(case.status.clone());
        }
    }

    let mut flaky: Vec<FlakyTest> = order
        .into_iter()
        .filter_map(|test| {
            let statuses = history.remove(&test)?;
            let failures = statuses.iter().filter(|s| *s == "FAILED").count();
            let passed = statuses.iter().any(|s| s == "PASSED");
            if failures == 0 || !passed {
                return None;
            }
            Some(FlakyTest {
                failure_count: failures,
                total_runs: statuses.len(),
                failure_rate: round2(failures as f64 / statuses.len() as f64 * 100.0),
                statuses,
                test,
            })
        })
        .collect();

    flaky.sort_by(|a, b| b.failure_rate.total_cmp(&a.failure_rate));
    flaky
}

/// Test report access for one Jenkins server.
#[derive(Clone)]
pub struct TestResultParser {
    api: Arc<dyn JenkinsApi>,
}

impl TestResultParser {
    pub fn new(api: Arc<dyn JenkinsApi>) -> Self {
        Self { api }
    }

    /// Counts from the build's test result action.
    pub async fn get_test_report(&self, job: &str, build: u64) -> Lookup<TestReport> {
        let info = match self.api.get_build_info(job, build).await {
            Ok(info) => info,
            Err(e) => {
                warn!(job, build, error = %e, "Failed to get test report");
                return Lookup::Unavailable(e);
            }
        };

        let action = info
            .get("actions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|a| {
                a.get("_class")
                    .and_then(Value::as_str)
                    .map_or(false, |c| TEST_ACTION_CLASSES.contains(&c))
            });

        match action {
            Some(action) => Lookup::Found(TestReport::from_action(action)),
            None => {
                debug!(job, build, "No test results found");
                Lookup::Empty
            }
        }
    }

    /// Suite and case breakdown.
    pub async fn get_detailed_test_report(&self, job: &str, build: u64) -> Lookup<TestReport> {
        match self.api.get_test_report(job, build, DETAILED_TREE).await {
            Ok(data) => Lookup::Found(TestReport::from_detailed(&data)),
            Err(e) => {
                warn!(job, build, error = %e, "Failed to get detailed test report");
                Lookup::Unavailable(e)
            }
        }
    }

    /// First `limit` failed or errored cases.
    pub async fn get_failed_tests(&self, job: &str, build: u64, limit: usize) -> Vec<TestCase> {
        let report = self.get_detailed_test_report(job, build).await.unwrap_or_default();
        report
            .suites
            .into_iter()
            .flat_map(|s| s.test_cases)
            .filter(TestCase::is_failure)
            .take(limit)
            .collect()
    }

    /// Count deltas between two builds.
    pub async fn compare_test_results(&self, job: &str, base: u64, head: u64) -> Value {
        let base_report = self.get_test_report(job, base).await;
        let head_report = self.get_test_report(job, head).await;

        let (Lookup::Found(base_report), Lookup::Found(head_report)) = (base_report, head_report)
        else {
            return json!({
                "available": false,
                "error": "Test results not available for comparison",
            });
        };

        let failed_delta = head_report.failed as i64 - base_report.failed as i64;
        json!({
            "available": true,
            "base_build": base,
            "head_build": head,
            "base_stats": base_report.stats(),
            "head_stats": head_report.stats(),
            "deltas": {
                "tests": head_report.total_tests as i64 - base_report.total_tests as i64,
                "failed": failed_delta,
                "pass_rate": round2(head_report.pass_rate() - base_report.pass_rate()),
            },
            "regression": failed_delta > 0,
            "improvement": failed_delta < 0,
        })
    }

    /// Flaky tests across `builds`; builds without reports are skipped.
    pub async fn get_flaky_tests(&self, job: &str, builds: &[u64]) -> Vec<FlakyTest> {
        let mut reports = Vec::with_capacity(builds.len());
        for build in builds {
            if let Lookup::Found(report) = self.get_detailed_test_report(job, *build).await {
                reports.push(report);
            }
        }
        find_flaky(&reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detailed(cases: &[(&str, &str)]) -> TestReport {
        let cases: Vec<Value> = cases
            .iter()
            .map(|(name, status)| json!({"name": name, "className": "pkg.Suite", "status": status}))
            .collect();
        TestReport::from_detailed(&json!({
            "suites": [{"name": "pkg.Suite", "duration": 1.5, "cases": cases}]
        }))
    }

    #[test]
    fn test_detailed_counts() {
        let report = detailed(&[
            ("a", "PASSED"),
            ("b", "FAILED"),
            ("c", "SKIPPED"),
            ("d", "REGRESSION"),
        ]);
        assert_eq!(report.total_tests, 4);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.errors, 1);
        assert_eq!(report.duration, 1.5);
        assert_eq!(report.pass_rate(), 25.0);
    }

    #[test]
    fn test_action_counts() {
        let report = TestReport::from_action(&json!({
            "_class": "hudson.tasks.junit.TestResultAction",
            "totalCount": 120, "failCount": 3, "skipCount": 2
        }));
        assert_eq!(report.passed, 115);
        assert_eq!(round2(report.pass_rate()), 95.83);
        assert_eq!(TestReport::default().pass_rate(), 0.0);
    }

    #[test]
    fn test_flaky_requires_pass_and_fail() {
        let reports = vec![
            detailed(&[("flaky", "PASSED"), ("broken", "FAILED"), ("often", "FAILED")]),
            detailed(&[("flaky", "FAILED"), ("broken", "FAILED"), ("often", "FAILED")]),
            detailed(&[("flaky", "PASSED"), ("broken", "FAILED"), ("often", "PASSED")]),
        ];

        let flaky = find_flaky(&reports);
        assert_eq!(flaky.len(), 2);
        assert_eq!(flaky[0].test, "pkg.Suite.often");
        assert_eq!(flaky[0].failure_rate, 66.67);
        assert_eq!(flaky[1].test, "pkg.Suite.flaky");
        assert_eq!(flaky[1].statuses, vec!["PASSED", "FAILED", "PASSED"]);
    }
}
