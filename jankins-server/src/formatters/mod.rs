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

//! Token-aware response formatting
//!
//! Handlers return a [`Payload`]: the raw domain object tagged with its
//! [`ObjectKind`]. The [`ResponseFormatter`] projects it through the
//! `(kind, mode)` table in [`shape`] and then wraps the shaped value in the
//! `_meta` envelope, so the token estimate always describes what is sent.

mod shape;
mod tokens;

pub use shape::shape;
pub(crate) use shape::compact_change;
pub use tokens::{TokenEstimator, WordCountEstimator};

use crate::error::JankinsError;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Output projection requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Curated, diagnostically relevant subset
    #[default]
    Summary,
    /// Complete underlying object
    Full,
    /// Differences only (comparisons)
    Diff,
    /// Identifiers and URLs only
    Ids,
    /// Compact tabular rendering; shaped like summary
    Table,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Summary => "summary",
            OutputFormat::Full => "full",
            OutputFormat::Diff => "diff",
            OutputFormat::Ids => "ids",
            OutputFormat::Table => "table",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = JankinsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "diff" => Ok(OutputFormat::Diff),
            "ids" => Ok(OutputFormat::Ids),
            "table" => Ok(OutputFormat::Table),
            other => Err(JankinsError::invalid_params(format!(
                "Invalid format: {}",
                other
            ))
            .with_hint("Use one of: summary, full, diff, ids, table")),
        }
    }
}

/// Domain object families known to the shaping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    JobList,
    Job,
    Build,
    BuildChanges,
    BuildArtifacts,
    JobScm,
    LogResponse,
    Triage,
    Comparison,
    PipelineGraph,
    TestReport,
    FailedTests,
    TestComparison,
    FlakyTests,
    /// Already compact; every mode passes it through
    Raw,
}

/// Unshaped handler output.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub kind: ObjectKind,
    pub body: Value,
}

impl Payload {
    pub fn new(kind: ObjectKind, body: Value) -> Self {
        Self { kind, body }
    }

    pub fn raw(body: Value) -> Self {
        Self::new(ObjectKind::Raw, body)
    }

    /// Result objects carrying an `error` key are never cached.
    pub fn is_error(&self) -> bool {
        self.body.get("error").is_some()
    }
}

/// Shapes payloads and attaches request metadata.
#[derive(Clone)]
pub struct ResponseFormatter {
    estimator: Arc<dyn TokenEstimator>,
}

impl Default for ResponseFormatter {
    fn default() -> Self {
        Self::new(Arc::new(WordCountEstimator))
    }
}

impl ResponseFormatter {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { estimator }
    }

    /// Shape `payload` for `mode` and wrap it with the metadata envelope.
    pub fn render(
        &self,
        payload: Payload,
        mode: OutputFormat,
        correlation_id: &str,
        took_ms: u64,
    ) -> Value {
        let shaped = shape(payload.kind, mode, payload.body);
        self.add_metadata(shaped, correlation_id, took_ms, mode)
    }

    pub fn add_metadata(
        &self,
        data: Value,
        correlation_id: &str,
        took_ms: u64,
        format_used: OutputFormat,
    ) -> Value {
        let serialized = serde_json::to_string_pretty(&data).unwrap_or_default();
        let token_estimate = self.estimator.estimate(&serialized);

        let mut data = match data {
            Value::Object(map) => Value::Object(map),
            other => json!({ "result": other }),
        };
        data["_meta"] = json!({
            "correlation_id": correlation_id,
            "took_ms": took_ms,
            "format": format_used.as_str(),
            "token_estimate": token_estimate,
        });
        data
    }
}

/// Human-readable duration: `850ms`, `12.5s`, `3m 7s`, `2h 15m`.
pub fn format_duration(milliseconds: i64) -> String {
    let ms = milliseconds.max(0);
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else if ms < 3_600_000 {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000)
    } else {
        format!("{}h {}m", ms / 3_600_000, (ms % 3_600_000) / 60_000)
    }
}

/// Unix milliseconds to an ISO-8601 UTC timestamp.
pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_default()
}

/// First `max_chars` characters of `s`.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(850), "850ms");
        assert_eq!(format_duration(12_500), "12.5s");
        assert_eq!(format_duration(187_000), "3m 7s");
        assert_eq!(format_duration(8_100_000), "2h 15m");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00");
        assert_eq!(format_timestamp(1_700_000_000_000), "2023-11-14T22:13:20");
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("ids".parse::<OutputFormat>().unwrap(), OutputFormat::Ids);
        let err = "verbose".parse::<OutputFormat>().unwrap_err();
        assert_eq!(err.code(), -32602);
    }

    #[test]
    fn test_metadata_envelope() {
        let formatter = ResponseFormatter::default();
        let out = formatter.add_metadata(json!({"a": "one two"}), "cid", 12, OutputFormat::Full);

        assert_eq!(out["a"], "one two");
        assert_eq!(out["_meta"]["correlation_id"], "cid");
        assert_eq!(out["_meta"]["took_ms"], 12);
        assert_eq!(out["_meta"]["format"], "full");
        // pretty-printed: `{`, `"a":`, `"one`, `two"`, `}` is five words
        assert_eq!(out["_meta"]["token_estimate"], 4);
    }

    #[test]
    fn test_truncate_chars_respects_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }
}
