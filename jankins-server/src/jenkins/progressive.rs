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

//! Progressive console log retrieval.
//!
//! Jenkins serves `logText/progressiveText?start=N` with two headers:
//!
//! - `X-Text-Size`: byte offset to request next (the log size so far)
//! - `X-More-Data`: `true` while the build is still writing
//!
//! Any offset query reports the total size, so the tail of a log is found
//! with one cheap probe instead of downloading everything.

use crate::error::{JankinsError, Result};
use crate::jenkins::client::JenkinsApi;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("valid ANSI pattern")
});

/// Jenkins masks credentials as `****`.
static SECRET_MASK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*{4,}").expect("valid mask pattern"));

static STAGE_FAILED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"Stage "([^"]+)" (failed|FAILED)"#).expect("valid stage pattern"));

const REDACTED: &str = "[REDACTED]";
const LAST_ERROR_LINES: usize = 5;

/// A byte range of a console log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogChunk {
    pub text: String,
    pub start: u64,
    /// Offset to continue from
    pub end: u64,
    pub has_more: bool,
}

/// Compact statistics over the analysed part of a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogSummary {
    pub total_bytes: u64,
    pub total_lines: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub last_error_lines: Vec<String>,
    pub failing_stages: Vec<String>,
    pub is_complete: bool,
}

/// One search hit with its surrounding lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchMatch {
    /// 1-indexed
    pub line_number: usize,
    pub context: String,
}

/// Line filter options for [`filter_log`].
#[derive(Debug, Default, Clone)]
pub struct LogFilter<'a> {
    pub pattern: Option<&'a Regex>,
    pub levels: &'a [String],
    pub redact: bool,
}

/// Compile a caller-supplied pattern.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        JankinsError::invalid_params(format!("Invalid regex pattern '{}': {}", pattern, e))
            .with_hint("Provide a valid regular expression")
    })
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

/// Number of UTF-8 continuation bytes at the front of `bytes`; a read that
/// starts inside a character begins with these.
pub fn leading_continuation_len(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| is_continuation(**b)).count()
}

/// Length of the longest prefix of `bytes` that fits in `max_bytes` without
/// splitting a character.
pub fn utf8_prefix_len(bytes: &[u8], max_bytes: usize) -> usize {
    if bytes.len() <= max_bytes {
        return bytes.len();
    }
    let mut end = max_bytes;
    while end > 0 && is_continuation(bytes[end]) {
        end -= 1;
    }
    end
}

/// Strip ANSI escapes and collapse secret masks.
pub fn redact_line(line: &str) -> String {
    let stripped = ANSI_ESCAPE.replace_all(line, "");
    SECRET_MASK.replace_all(&stripped, REDACTED).into_owned()
}

/// Keep lines matching every active filter, redacting survivors on request.
///
/// Filters apply per line in the order level, regex, redaction. Dropped lines
/// are removed, not blanked.
pub fn filter_log(text: &str, filter: &LogFilter<'_>) -> String {
    text.split('\n')
        .filter(|line| {
            filter.levels.is_empty() || filter.levels.iter().any(|lvl| line.contains(lvl.as_str()))
        })
        .filter(|line| filter.pattern.map_or(true, |re| re.is_match(line)))
        .map(|line| {
            if filter.redact {
                redact_line(line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Statistics for one chunk of log text.
pub fn summarize_chunk(chunk: &LogChunk) -> LogSummary {
    let lines: Vec<&str> = chunk.text.split('\n').collect();

    let mut error_lines = Vec::new();
    let mut warning_count = 0;
    let mut failing_stages: Vec<String> = Vec::new();

    for line in &lines {
        let upper = line.to_uppercase();
        if upper.contains("ERROR") {
            error_lines.push(*line);
        }
        if upper.contains("WARN") {
            warning_count += 1;
        }
        if let Some(caps) = STAGE_FAILED.captures(line) {
            let stage = &caps[1];
            if !failing_stages.iter().any(|s| s == stage) {
                failing_stages.push(stage.to_string());
            }
        }
    }

    let skip = error_lines.len().saturating_sub(LAST_ERROR_LINES);
    LogSummary {
        total_bytes: chunk.end,
        total_lines: lines.len(),
        error_count: error_lines.len(),
        warning_count,
        last_error_lines: error_lines[skip..].iter().map(|l| l.to_string()).collect(),
        failing_stages,
        is_complete: !chunk.has_more,
    }
}

/// Every line matching `pattern`, with `window_lines` of context each side.
///
/// Overlapping windows are kept as they are.
pub fn search_text(text: &str, pattern: &Regex, window_lines: usize) -> Vec<SearchMatch> {
    let lines: Vec<&str> = text.split('\n').collect();

    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| pattern.is_match(line))
        .map(|(i, _)| {
            let from = i.saturating_sub(window_lines);
            let to = i
                .saturating_add(window_lines)
                .saturating_add(1)
                .min(lines.len());
            SearchMatch {
                line_number: i + 1,
                context: lines[from..to].join("\n"),
            }
        })
        .collect()
}

/// Offset-addressed log reader.
#[derive(Clone)]
pub struct ProgressiveLogClient {
    api: Arc<dyn JenkinsApi>,
}

impl ProgressiveLogClient {
    pub fn new(api: Arc<dyn JenkinsApi>) -> Self {
        Self { api }
    }

    async fn fetch_raw(&self, job: &str, build: u64, start: u64) -> Result<(Bytes, u64, bool)> {
        let response = self.api.get_progressive_text(job, build, start).await?;

        let next = response
            .header("X-Text-Size")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(start + response.body.len() as u64);
        let has_more = response
            .header("X-More-Data")
            .map_or(false, |v| v.eq_ignore_ascii_case("true"));

        debug!(job, build, start, next, has_more, "Fetched progressive log");
        Ok((response.body, next, has_more))
    }

    /// One upstream read from `start`: `(text, next_offset, has_more)`.
    pub async fn fetch_from(&self, job: &str, build: u64, start: u64) -> Result<(String, u64, bool)> {
        let (body, next, has_more) = self.fetch_raw(job, build, start).await?;
        Ok((String::from_utf8_lossy(&body).into_owned(), next, has_more))
    }

    /// Read from `start`, truncating to `max_bytes` when given.
    ///
    /// Offsets are byte positions in the upstream log. A `start` inside a
    /// character moves forward to the next character, and a truncated chunk
    /// ends on a character boundary, so `end` is always a valid `start`.
    pub async fn get_chunk(
        &self,
        job: &str,
        build: u64,
        start: u64,
        max_bytes: Option<usize>,
    ) -> Result<LogChunk> {
        let (body, mut end, mut has_more) = self.fetch_raw(job, build, start).await?;

        let skipped = leading_continuation_len(&body);
        let start = start + skipped as u64;
        let mut bytes = &body[skipped..];

        if let Some(limit) = max_bytes.filter(|m| *m > 0) {
            if bytes.len() > limit {
                let keep = utf8_prefix_len(bytes, limit);
                bytes = &bytes[..keep];
                end = start + keep as u64;
                has_more = true;
            }
        }

        Ok(LogChunk {
            text: String::from_utf8_lossy(bytes).into_owned(),
            start,
            end: end.max(start),
            has_more,
        })
    }

    /// The last `max_bytes` of the log.
    pub async fn get_tail(&self, job: &str, build: u64, max_bytes: usize) -> Result<LogChunk> {
        let (_, total_size, _) = self.fetch_raw(job, build, 0).await?;
        let start = total_size.saturating_sub(max_bytes as u64);
        self.get_chunk(job, build, start, Some(max_bytes)).await
    }

    /// Statistics over the tail of the log.
    pub async fn summarize(&self, job: &str, build: u64, max_bytes: usize) -> Result<LogSummary> {
        let chunk = self.get_tail(job, build, max_bytes).await?;
        Ok(summarize_chunk(&chunk))
    }

    /// Search the first `max_bytes` of the log.
    pub async fn search(
        &self,
        job: &str,
        build: u64,
        pattern: &Regex,
        window_lines: usize,
        max_bytes: usize,
    ) -> Result<Vec<SearchMatch>> {
        let chunk = self.get_chunk(job, build, 0, Some(max_bytes)).await?;
        Ok(search_text(&chunk.text, pattern, window_lines))
    }
}
