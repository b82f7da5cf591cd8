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

//! Error taxonomy
//!
//! Every failure that reaches a caller is a [`JankinsError`]: a kind (which
//! fixes the JSON-RPC code), a message, a remediation hint, suggested next
//! actions and the correlation id of the request that produced it.

use crate::mcp::protocol::JsonRpcError;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Troubleshooting page linked from every error payload.
pub const DEFAULT_DOCS_URL: &str = "https://github.com/jankins/jankins-server#troubleshooting";

// =============================================================================
// JSON-RPC error codes
// =============================================================================

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Generic server error used by transport-level rejections (origin, rate limit).
pub const SERVER_ERROR: i32 = -32000;

pub const UNAUTHORIZED: i32 = -32001;
pub const FORBIDDEN: i32 = -32002;
pub const NOT_FOUND: i32 = -32003;
pub const CONFLICT: i32 = -32004;
pub const RATE_LIMITED: i32 = -32005;
pub const UPSTREAM_ERROR: i32 = -32006;
pub const TIMEOUT: i32 = -32007;

/// Machine-checkable error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParams,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    RateLimited,
    Upstream,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::InvalidParams => INVALID_PARAMS,
            ErrorKind::Unauthorized => UNAUTHORIZED,
            ErrorKind::Forbidden => FORBIDDEN,
            ErrorKind::NotFound => NOT_FOUND,
            ErrorKind::Conflict => CONFLICT,
            ErrorKind::RateLimited => RATE_LIMITED,
            ErrorKind::Upstream => UPSTREAM_ERROR,
            ErrorKind::Timeout => TIMEOUT,
            ErrorKind::Internal => INTERNAL_ERROR,
        }
    }

    fn default_hint(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "Check that JENKINS_USER and JENKINS_API_TOKEN are correct",
            ErrorKind::Forbidden => "User lacks permissions for this operation",
            ErrorKind::NotFound => "Resource does not exist or path is incorrect",
            ErrorKind::Conflict => "Resource is locked or operation conflicts with current state",
            ErrorKind::RateLimited => "Too many requests, wait before retrying",
            ErrorKind::Upstream => "Jenkins server returned an error",
            ErrorKind::Timeout => "Request to Jenkins timed out",
            ErrorKind::InvalidParams => "One or more parameters are invalid",
            ErrorKind::Internal => "An unexpected error occurred",
        }
    }

    fn default_next_actions(self) -> Vec<String> {
        let actions: &[&str] = match self {
            ErrorKind::Unauthorized => &[
                "Verify JENKINS_USER is correct",
                "Regenerate JENKINS_API_TOKEN from Jenkins user settings",
                "Check Jenkins server is accessible",
            ],
            ErrorKind::Forbidden => &[
                "Check user has required Jenkins permissions",
                "Contact Jenkins administrator for access",
            ],
            ErrorKind::Timeout => &[
                "Check Jenkins server is responsive",
                "Increase JENKINS_TIMEOUT setting",
                "Check network connectivity",
            ],
            _ => &[],
        };
        actions.iter().map(|a| a.to_string()).collect()
    }
}

/// Domain error surfaced to MCP clients.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct JankinsError {
    pub kind: ErrorKind,
    pub message: String,
    pub hint: String,
    pub next_actions: Vec<String>,
    pub correlation_id: Option<String>,
    pub docs_url: String,
    pub retry_after: Option<Duration>,
    /// Original failure text for wrapped unexpected errors.
    pub detail: Option<String>,
}

pub type Result<T> = std::result::Result<T, JankinsError>;

impl JankinsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: kind.default_hint().to_string(),
            next_actions: kind.default_next_actions(),
            correlation_id: None,
            docs_url: DEFAULT_DOCS_URL.to_string(),
            retry_after: None,
            detail: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Caller exceeded its admission budget.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let mut err = Self::new(ErrorKind::RateLimited, message);
        if let Some(wait) = retry_after {
            err.hint = format!("Wait {}ms before retrying", wait.as_millis());
            err.retry_after = Some(wait);
        }
        err
    }

    /// Map an upstream HTTP status to the matching error kind.
    pub fn from_status(status: u16, message: &str) -> Self {
        match status {
            401 => Self::unauthorized(message),
            403 => Self::forbidden(message),
            404 => Self::not_found(message),
            409 => Self::conflict(message),
            429 => Self::rate_limited(message, None),
            _ => Self::upstream(format!("Jenkins returned {}: {}", status, message)),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    pub fn with_next_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next_actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Stamp the request correlation id unless one is already attached.
    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        if self.correlation_id.is_none() {
            self.correlation_id = Some(correlation_id.to_string());
        }
        self
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    /// Render as a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let mut data = json!({
            "correlation_id": self.correlation_id,
            "hint": self.hint,
            "next_actions": self.next_actions,
            "docs_url": self.docs_url,
        });
        if let Some(wait) = self.retry_after {
            data["retry_after_ms"] = json!(wait.as_millis() as u64);
        }
        if let Some(detail) = &self.detail {
            data["detail"] = json!(detail);
        }

        JsonRpcError {
            code: self.code(),
            message: self.message.clone(),
            data: Some(data),
        }
    }
}

impl From<reqwest::Error> for JankinsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return JankinsError::timeout(format!("Request to Jenkins timed out: {}", err));
        }
        if let Some(status) = err.status() {
            return JankinsError::from_status(status.as_u16(), &err.to_string());
        }
        JankinsError::upstream(format!("Request to Jenkins failed: {}", err))
    }
}

impl From<serde_json::Error> for JankinsError {
    fn from(err: serde_json::Error) -> Self {
        JankinsError::upstream(format!("Jenkins returned malformed JSON: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(JankinsError::from_status(401, "x").kind, ErrorKind::Unauthorized);
        assert_eq!(JankinsError::from_status(403, "x").kind, ErrorKind::Forbidden);
        assert_eq!(JankinsError::from_status(404, "x").kind, ErrorKind::NotFound);
        assert_eq!(JankinsError::from_status(409, "x").kind, ErrorKind::Conflict);
        assert_eq!(JankinsError::from_status(429, "x").kind, ErrorKind::RateLimited);

        let err = JankinsError::from_status(502, "bad gateway");
        assert_eq!(err.kind, ErrorKind::Upstream);
        assert_eq!(err.message, "Jenkins returned 502: bad gateway");
        assert_eq!(err.code(), -32006);
    }

    #[test]
    fn test_default_hints_and_actions() {
        let err = JankinsError::unauthorized("denied");
        assert_eq!(err.hint, "Check that JENKINS_USER and JENKINS_API_TOKEN are correct");
        assert_eq!(err.next_actions.len(), 3);

        let err = JankinsError::not_found("gone");
        assert!(err.next_actions.is_empty());
        assert_eq!(err.code(), -32003);

        let err = JankinsError::internal("boom");
        assert_eq!(err.hint, "An unexpected error occurred");
        assert_eq!(err.code(), -32603);
    }

    #[test]
    fn test_rpc_error_payload() {
        let err = JankinsError::rate_limited("slow down", Some(Duration::from_millis(1500)))
            .with_correlation_id("abc");
        let rpc = err.to_rpc_error();

        assert_eq!(rpc.code, -32005);
        let data = rpc.data.unwrap();
        assert_eq!(data["correlation_id"], "abc");
        assert_eq!(data["hint"], "Wait 1500ms before retrying");
        assert_eq!(data["retry_after_ms"], 1500);
        assert_eq!(data["docs_url"], DEFAULT_DOCS_URL);
        assert!(data["next_actions"].is_array());
    }

    #[test]
    fn test_correlation_id_not_overwritten() {
        let err = JankinsError::timeout("slow")
            .with_correlation_id("first")
            .with_correlation_id("second");
        assert_eq!(err.correlation_id.as_deref(), Some("first"));
    }
}
