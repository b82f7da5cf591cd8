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

//! The `(kind, mode)` shaping table.
//!
//! Every projection rule lives here. Modes a kind has no dedicated rule for
//! fall back to its summary projection; `full` always returns the body as
//! produced by the handler.

use super::{format_duration, format_timestamp, truncate_chars, ObjectKind, OutputFormat};
use serde_json::{json, Map, Value};

const HEALTH_REPORT_CAP: usize = 3;
const CHANGES_CAP: usize = 10;
const LAST_ERRORS_CAP: usize = 3;
const HYPOTHESES_CAP: usize = 5;
const TOP_ERRORS_CAP: usize = 5;
const NEXT_STEPS_CAP: usize = 5;
const TEST_ERROR_CHARS: usize = 200;
const STACKTRACE_MAX_CHARS: usize = 2000;

/// Project `body` of the given kind for `mode`.
pub fn shape(kind: ObjectKind, mode: OutputFormat, body: Value) -> Value {
    use ObjectKind::*;
    use OutputFormat::*;

    match (kind, mode) {
        (Raw, _) => body,

        (JobList, Ids) => job_list(body, |job| {
            json!({ "name": job["fullname"], "url": job["url"] })
        }),
        (JobList, Full) => job_list(body, Value::clone),
        (JobList, _) => job_list(body, |job| {
            json!({
                "name": job["fullname"],
                "color": job.get("color").cloned().unwrap_or_else(|| json!("unknown")),
                "url": job["url"],
            })
        }),

        (Job, Ids) => json!({
            "name": body["name"],
            "fullname": body["fullName"],
            "url": body["url"],
        }),
        (Job, Full) => body,
        (Job, _) => job_summary(&body),

        (Build, Ids) => json!({
            "number": body["number"],
            "url": body["url"],
            "result": body["result"],
        }),
        (Build, Full) => body,
        (Build, _) => build_summary(&body),

        (BuildChanges, Full) => {
            let items = array(&body, "items").to_vec();
            json!({
                "build_number": body["build_number"],
                "changes_count": items.len(),
                "changes": items,
            })
        }
        (BuildChanges, _) => {
            let items = array(&body, "items");
            json!({
                "build_number": body["build_number"],
                "changes_count": items.len(),
                "changes": items.iter().take(CHANGES_CAP).map(compact_change).collect::<Vec<_>>(),
            })
        }

        (BuildArtifacts, Full) => {
            let artifacts = array(&body, "artifacts").to_vec();
            json!({
                "build_number": body["build_number"],
                "artifacts_count": artifacts.len(),
                "artifacts": artifacts,
                "base_url": body["url"],
            })
        }
        (BuildArtifacts, _) => {
            let artifacts = array(&body, "artifacts");
            json!({
                "build_number": body["build_number"],
                "artifacts_count": artifacts.len(),
                "artifacts": artifacts.iter().map(|a| json!({
                    "filename": a["fileName"],
                    "size": a.get("fileSize").cloned().unwrap_or_else(|| json!(0)),
                    "path": a["relativePath"],
                })).collect::<Vec<_>>(),
            })
        }

        (JobScm, Full) => body,
        (JobScm, _) => {
            let scm = &body["scm"];
            let branches: Vec<Value> = array(scm, "branches")
                .iter()
                .map(|b| b["name"].clone())
                .collect();
            json!({
                "job_name": body["job_name"],
                "scm_class": scm.get("_class").cloned().unwrap_or_else(|| json!("unknown")),
                "url": array(scm, "userRemoteConfigs").first().map(|c| c["url"].clone()),
                "branches": branches,
            })
        }

        (LogResponse, Full) => log_response(body, true),
        (LogResponse, _) => log_response(body, false),

        (Triage, _) if body.get("message").is_some() => body,
        (Triage, Full) => body,
        (Triage, _) => json!({
            "build_number": body["build_number"],
            "job_name": body["job_name"],
            "result": body["result"],
            "hypotheses": capped(&body, "hypotheses", HYPOTHESES_CAP),
            "top_errors": capped(&body, "top_errors", TOP_ERRORS_CAP),
            "failing_stages": body.get("failing_stages").cloned().unwrap_or_else(|| json!([])),
            "next_steps": capped(&body, "next_steps", NEXT_STEPS_CAP),
        }),

        (Comparison, Full) => body,
        (Comparison, Ids) => json!({
            "job_name": body["job_name"],
            "builds": comparison_builds(&body),
        }),
        (Comparison, Diff) => comparison_diff(&body),
        (Comparison, _) => comparison_summary(&body),

        (PipelineGraph, Full) => body,
        (PipelineGraph, _) => pipeline_summary(body),

        (TestReport, Full) => body,
        (TestReport, _) => without_keys(body, &["suites"]),

        (FailedTests, Full) => failed_tests(body, true),
        (FailedTests, _) => failed_tests(body, false),

        (TestComparison, Diff) => without_keys(body, &["base_stats", "head_stats"]),
        (TestComparison, _) => body,

        (FlakyTests, Full) => body,
        (FlakyTests, _) => {
            let mut body = body;
            if let Some(tests) = body.get_mut("flaky_tests").and_then(Value::as_array_mut) {
                for test in tests.iter_mut() {
                    if let Some(obj) = test.as_object_mut() {
                        obj.remove("statuses");
                    }
                }
            }
            body
        }
    }
}

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn capped(value: &Value, key: &str, cap: usize) -> Vec<Value> {
    array(value, key).iter().take(cap).cloned().collect()
}

fn str_of<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

/// `lastBuild`-style pointer to its build number, or null.
fn build_pointer(value: &Value, key: &str) -> Value {
    value
        .get(key)
        .and_then(|b| b.get("number"))
        .cloned()
        .unwrap_or(Value::Null)
}

fn without_keys(mut body: Value, keys: &[&str]) -> Value {
    if let Some(obj) = body.as_object_mut() {
        for key in keys {
            obj.remove(*key);
        }
    }
    body
}

fn job_list(body: Value, project: impl Fn(&Value) -> Value) -> Value {
    let jobs: Vec<Value> = array(&body, "jobs").iter().map(project).collect();
    json!({
        "shown": jobs.len(),
        "jobs": jobs,
        "total": body["total"],
        "page": body["page"],
        "page_size": body["page_size"],
        "total_pages": body["total_pages"],
    })
}

fn job_summary(job: &Value) -> Value {
    let health: Vec<Value> = array(job, "healthReport")
        .iter()
        .take(HEALTH_REPORT_CAP)
        .map(|h| json!({ "description": h["description"], "score": h["score"] }))
        .collect();

    json!({
        "name": job["name"],
        "fullname": job["fullName"],
        "url": job["url"],
        "buildable": job.get("buildable").cloned().unwrap_or(Value::Bool(false)),
        "color": job.get("color").cloned().unwrap_or_else(|| json!("unknown")),
        "last_build": build_pointer(job, "lastBuild"),
        "last_successful_build": build_pointer(job, "lastSuccessfulBuild"),
        "last_failed_build": build_pointer(job, "lastFailedBuild"),
        "health_report": health,
    })
}

fn build_summary(build: &Value) -> Value {
    let duration = build.get("duration").and_then(Value::as_i64).unwrap_or(0);
    let timestamp = build.get("timestamp").and_then(Value::as_i64).unwrap_or(0);

    json!({
        "number": build["number"],
        "result": build["result"],
        "duration": format_duration(duration),
        "timestamp": format_timestamp(timestamp),
        "building": build.get("building").cloned().unwrap_or(Value::Bool(false)),
        "url": build["url"],
        "changes_count": array(&build["changeSet"], "items").len(),
        "artifacts_count": array(build, "artifacts").len(),
    })
}

/// Commit id prefix, author and first line budget of a change-set item.
pub(crate) fn compact_change(item: &Value) -> Value {
    let author = item
        .get("author")
        .and_then(|a| a.get("fullName"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown");
    json!({
        "commit": truncate_chars(str_of(item, "commitId"), 8),
        "author": author,
        "message": truncate_chars(str_of(item, "msg"), 100),
    })
}

fn log_response(body: Value, full: bool) -> Value {
    let summary = &body["summary"];
    let chunks = array(&body, "chunks");

    let mut out = json!({
        "build_number": body["build_number"],
        "job_name": body["job_name"],
        "summary": {
            "total_bytes": summary["total_bytes"],
            "total_lines": summary["total_lines"],
            "error_count": summary["error_count"],
            "warning_count": summary["warning_count"],
            "is_complete": summary["is_complete"],
        },
        "failing_stages": summary.get("failing_stages").cloned().unwrap_or_else(|| json!([])),
    });

    if full {
        out["last_error_lines"] = json!(array(summary, "last_error_lines"));
        if !chunks.is_empty() {
            out["chunks"] = json!(chunks);
        }
    } else {
        out["last_error_lines"] = json!(capped(summary, "last_error_lines", LAST_ERRORS_CAP));
        if !chunks.is_empty() {
            out["available_chunks"] = json!(chunks.len());
        }
    }
    out
}

fn comparison_builds(body: &Value) -> Value {
    json!({
        "base": body["base_build"]["number"],
        "head": body["head_build"]["number"],
    })
}

fn duration_delta(body: &Value) -> i64 {
    body.get("duration_delta").and_then(Value::as_i64).unwrap_or(0)
}

fn duration_change(delta: i64) -> &'static str {
    match delta {
        d if d < 0 => "faster",
        d if d > 0 => "slower",
        _ => "unchanged",
    }
}

fn comparison_summary(body: &Value) -> Value {
    let delta = duration_delta(body);
    let mut out = json!({
        "job_name": body["job_name"],
        "builds": comparison_builds(body),
        "duration_delta": format_duration(delta.abs()),
        "duration_change": duration_change(delta),
        "result_changed": body["base_build"]["result"] != body["head_build"]["result"],
    });

    let stage_diffs = array(body, "stage_diffs");
    if !stage_diffs.is_empty() {
        out["stage_changes"] = json!(stage_diffs.len());
    }
    if let Some(tests) = body.get("test_diffs").filter(|t| !t.is_null()) {
        out["test_diffs"] = json!({
            "new_failures": tests.get("new_failures").cloned().unwrap_or_else(|| json!(0)),
            "new_passes": tests.get("new_passes").cloned().unwrap_or_else(|| json!(0)),
        });
    }
    out
}

fn comparison_diff(body: &Value) -> Value {
    let mut out = Map::new();
    out.insert("job_name".into(), body["job_name"].clone());
    out.insert("builds".into(), comparison_builds(body));

    let delta = duration_delta(body);
    if delta != 0 {
        out.insert("duration_delta".into(), json!(format_duration(delta.abs())));
        out.insert("duration_change".into(), json!(duration_change(delta)));
    }

    let base_result = &body["base_build"]["result"];
    let head_result = &body["head_build"]["result"];
    let result_changed = base_result != head_result;
    out.insert("result_changed".into(), json!(result_changed));
    if result_changed {
        out.insert("base_result".into(), base_result.clone());
        out.insert("head_result".into(), head_result.clone());
    }

    let stage_diffs = array(body, "stage_diffs");
    if !stage_diffs.is_empty() {
        out.insert("stage_changes".into(), json!(stage_diffs));
    }
    Value::Object(out)
}

fn pipeline_summary(mut body: Value) -> Value {
    if body.get("available") == Some(&Value::Bool(false)) {
        return body;
    }

    let stages: Vec<Value> = array(&body, "stages")
        .iter()
        .map(|s| json!({ "name": s["name"], "result": s["result"], "duration_ms": s["duration_ms"] }))
        .collect();
    let parallel: Vec<Value> = array(&body, "parallel_stages")
        .iter()
        .map(|group| {
            let members: Vec<Value> = group
                .as_array()
                .map(Vec::as_slice)
                .unwrap_or(&[])
                .iter()
                .map(|s| json!({ "name": s["name"], "result": s["result"] }))
                .collect();
            Value::Array(members)
        })
        .collect();

    body["stages"] = Value::Array(stages);
    body["parallel_stages"] = Value::Array(parallel);
    body
}

fn failed_tests(mut body: Value, full: bool) -> Value {
    if let Some(tests) = body.get_mut("failed_tests").and_then(Value::as_array_mut) {
        for test in tests.iter_mut() {
            let Some(obj) = test.as_object_mut() else {
                continue;
            };
            let message = obj.remove("error_message").filter(|m| !m.is_null());
            let stacktrace = obj.remove("stacktrace").filter(|s| !s.is_null());

            if full {
                if let Some(message) = message {
                    obj.insert("error_message".into(), message);
                }
                if let Some(trace) = stacktrace {
                    let short = trace
                        .as_str()
                        .map(|t| t.chars().count() < STACKTRACE_MAX_CHARS)
                        .unwrap_or(false);
                    if short {
                        obj.insert("stacktrace".into(), trace);
                    }
                }
            } else if let Some(message) = message.as_ref().and_then(Value::as_str) {
                obj.insert("error".into(), json!(truncate_chars(message, TEST_ERROR_CHARS)));
            }
        }
    }
    body
}
