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

//! Tool and prompt registry plus JSON-RPC dispatch.
//!
//! `handle_request` answers the cheap methods synchronously and hands
//! `tools/call` / `prompts/get` back as a [`Dispatch::Deferred`] so the
//! transport decides how to await them. [`McpServer::handle`] does both
//! steps for callers that don't care.

use crate::error::JankinsError;
use crate::formatters::{OutputFormat, Payload, ResponseFormatter};
use crate::mcp::protocol::{
    CallToolParams, GetPromptParams, GetPromptResult, InitializeResult, JsonRpcError, JsonRpcId,
    JsonRpcRequest, JsonRpcResponse, PromptArgument, PromptMessage, PromptSchema,
    PromptsCapability, ServerCapabilities, ServerInfo, ToolSchema, ToolsCapability,
    MCP_PROTOCOL_VERSION,
};
use crate::metrics::Metrics;
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

/// JSON type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

/// Tool parameter definition
#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
    pub allowed: Option<Vec<String>>,
}

impl ToolParameter {
    fn new(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: false,
            default: None,
            allowed: None,
        }
    }

    pub fn string(name: &str, description: &str) -> Self {
        Self::new(name, ParamType::String, description)
    }

    pub fn number(name: &str, description: &str) -> Self {
        Self::new(name, ParamType::Number, description)
    }

    pub fn boolean(name: &str, description: &str) -> Self {
        Self::new(name, ParamType::Boolean, description)
    }

    pub fn array(name: &str, description: &str) -> Self {
        Self::new(name, ParamType::Array, description)
    }

    pub fn object(name: &str, description: &str) -> Self {
        Self::new(name, ParamType::Object, description)
    }

    /// The standard `format` selector with the given default.
    pub fn format(default: OutputFormat) -> Self {
        Self::string("format", "Output format")
            .one_of(&["summary", "full", "diff", "ids", "table"])
            .with_default(json!(default.as_str()))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    fn schema(&self) -> Value {
        let mut prop = json!({
            "type": self.param_type,
            "description": self.description,
        });
        if let Some(default) = &self.default {
            prop["default"] = default.clone();
        }
        if let Some(allowed) = &self.allowed {
            prop["enum"] = json!(allowed);
        }
        prop
    }
}

/// Per-invocation context handed to tool handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: String,
    pub started: Instant,
    pub format: OutputFormat,
}

impl RequestContext {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            started: Instant::now(),
            format,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Failure raised by a tool or prompt handler.
///
/// `Domain` errors reach the client untouched; anything else is logged and
/// reported as an internal error.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    Domain(#[from] JankinsError),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Trait for tool implementations.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<Payload, ToolError>;
}

/// A registered tool.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    pub handler: Option<Arc<dyn ToolHandler>>,
    pub default_format: OutputFormat,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            handler: None,
            default_format: OutputFormat::Summary,
        }
    }

    pub fn param(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn default_format(mut self, format: OutputFormat) -> Self {
        self.default_format = format;
        self
    }

    pub fn required_params(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }

    fn parameter(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.schema()))
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": self.required_params(),
        })
    }

    pub fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema(),
        }
    }

    /// Effective output format for one call.
    ///
    /// Only tools that declare a `format` parameter honor the caller's
    /// choice; the rest always render in their fixed default.
    fn resolve_format(&self, args: &Map<String, Value>) -> Result<OutputFormat, JankinsError> {
        let Some(param) = self.parameter("format") else {
            return Ok(self.default_format);
        };

        let requested = args
            .get("format")
            .filter(|v| !v.is_null())
            .or(param.default.as_ref());

        let allowed = param.allowed.as_deref().unwrap_or(&[]);
        let invalid = |shown: &dyn std::fmt::Display| {
            let choices = if allowed.is_empty() {
                "summary, full, diff, ids, table".to_string()
            } else {
                allowed.join(", ")
            };
            JankinsError::invalid_params(format!("Invalid format: {}", shown))
                .with_hint(format!("Use one of: {}", choices))
        };

        match requested {
            Some(Value::String(s)) if allowed.is_empty() || allowed.contains(s) => {
                s.parse().map_err(|_| invalid(s))
            }
            Some(Value::String(s)) => Err(invalid(s)),
            Some(other) => Err(invalid(other)),
            None => Ok(self.default_format),
        }
    }
}

/// Trait for prompt implementations.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn render(&self, args: &Map<String, Value>) -> Result<Vec<PromptMessage>, ToolError>;
}

/// A registered prompt template.
#[derive(Clone)]
pub struct Prompt {
    pub name: String,
    pub description: String,
    pub arguments: Vec<PromptArgument>,
    pub handler: Option<Arc<dyn PromptHandler>>,
}

impl Prompt {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            arguments: Vec::new(),
            handler: None,
        }
    }

    pub fn argument(mut self, name: &str, description: &str, required: bool) -> Self {
        self.arguments.push(PromptArgument {
            name: name.to_string(),
            description: description.to_string(),
            required,
        });
        self
    }

    pub fn handler(mut self, handler: Arc<dyn PromptHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn to_schema(&self) -> PromptSchema {
        PromptSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

/// A call that must be awaited before it can be answered.
#[derive(Debug, Clone)]
pub struct DeferredCall {
    pub method: String,
    pub params: Value,
    pub id: JsonRpcId,
}

/// Outcome of the synchronous dispatch step.
#[derive(Debug)]
pub enum Dispatch {
    Immediate(JsonRpcResponse),
    Deferred(DeferredCall),
    /// Notification; nothing is sent back.
    Ignored,
}

/// Protocol core: registry, dispatch and response rendering.
pub struct McpServer {
    name: String,
    version: String,
    tools: HashMap<String, Tool>,
    prompts: HashMap<String, Prompt>,
    formatter: ResponseFormatter,
    metrics: Arc<Metrics>,
}

impl McpServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tools: HashMap::new(),
            prompts: HashMap::new(),
            formatter: ResponseFormatter::default(),
            metrics,
        }
    }

    pub fn with_formatter(mut self, formatter: ResponseFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Register a tool, replacing any previous tool of the same name.
    pub fn register_tool(&mut self, tool: Tool) {
        debug!(tool = %tool.name, "Registered tool");
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn register_prompt(&mut self, prompt: Prompt) {
        debug!(prompt = %prompt.name, "Registered prompt");
        self.prompts.insert(prompt.name.clone(), prompt);
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_tools(&self) -> Vec<ToolSchema> {
        let mut tools: Vec<ToolSchema> = self.tools.values().map(Tool::to_schema).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn list_prompts(&self) -> Vec<PromptSchema> {
        let mut prompts: Vec<PromptSchema> =
            self.prompts.values().map(Prompt::to_schema).collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }

    /// Fixed protocol metadata. Tool and prompt lists never change at runtime.
    pub fn get_capabilities(&self) -> InitializeResult {
        InitializeResult {
            capabilities: ServerCapabilities {
                prompts: Some(PromptsCapability { list_changed: false }),
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: ServerInfo {
                name: self.name.clone(),
                version: self.version.clone(),
            },
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Invoke a tool and render its shaped result with `_meta`.
    pub async fn call_tool(
        &self,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<Value, JankinsError> {
        let started = Instant::now();
        let correlation_id = Uuid::new_v4().to_string();

        let result = self.run_tool(name, &args, &correlation_id).await;
        let took_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_tool_call(name, took_ms, result.is_ok());

        result.map_err(|e| e.with_correlation_id(&correlation_id))
    }

    async fn run_tool(
        &self,
        name: &str,
        args: &Map<String, Value>,
        correlation_id: &str,
    ) -> Result<Value, JankinsError> {
        let tool = self.tools.get(name).ok_or_else(|| {
            JankinsError::invalid_params(format!("Tool '{}' not found", name)).with_hint(format!(
                "Available tools: {}",
                self.tool_names().join(", ")
            ))
        })?;

        let handler = tool.handler.as_ref().ok_or_else(|| {
            JankinsError::internal(format!("Tool '{}' has no handler registered", name))
                .with_hint("This is a server configuration error")
        })?;

        let required = tool.required_params();
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|p| args.get(*p).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(JankinsError::invalid_params(format!(
                "Missing required parameters: {}",
                missing.join(", ")
            ))
            .with_hint(format!("Tool '{}' requires: {}", name, required.join(", "))));
        }

        let format = tool.resolve_format(args)?;
        let ctx = RequestContext {
            correlation_id: correlation_id.to_string(),
            started: Instant::now(),
            format,
        };

        let span = info_span!("tool_call", tool = %name, correlation_id = %correlation_id, format = %format);
        let outcome = AssertUnwindSafe(handler.handle(args, &ctx))
            .catch_unwind()
            .instrument(span)
            .await;

        let payload = match outcome {
            Ok(Ok(payload)) => payload,
            Ok(Err(ToolError::Domain(err))) => {
                debug!(tool = %name, correlation_id = %correlation_id, error = %err, "Tool returned error");
                return Err(err);
            }
            Ok(Err(ToolError::Unexpected(err))) => {
                return Err(unexpected("Tool", name, correlation_id, &format!("{:#}", err)));
            }
            Err(panic) => {
                return Err(unexpected("Tool", name, correlation_id, &panic_message(&*panic)));
            }
        };

        Ok(self
            .formatter
            .render(payload, format, correlation_id, ctx.elapsed_ms()))
    }

    /// Render a prompt's messages.
    pub async fn get_prompt(
        &self,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<Vec<PromptMessage>, JankinsError> {
        let correlation_id = Uuid::new_v4().to_string();
        self.run_prompt(name, &args, &correlation_id)
            .await
            .map_err(|e| e.with_correlation_id(&correlation_id))
    }

    async fn run_prompt(
        &self,
        name: &str,
        args: &Map<String, Value>,
        correlation_id: &str,
    ) -> Result<Vec<PromptMessage>, JankinsError> {
        let prompt = self.prompts.get(name).ok_or_else(|| {
            let mut names: Vec<&str> = self.prompts.keys().map(String::as_str).collect();
            names.sort_unstable();
            JankinsError::invalid_params(format!("Prompt '{}' not found", name))
                .with_hint(format!("Available prompts: {}", names.join(", ")))
        })?;

        let handler = prompt.handler.as_ref().ok_or_else(|| {
            JankinsError::internal(format!("Prompt '{}' has no handler registered", name))
                .with_hint("This is a server configuration error")
        })?;

        let missing: Vec<&str> = prompt
            .arguments
            .iter()
            .filter(|a| a.required && args.get(&a.name).map_or(true, Value::is_null))
            .map(|a| a.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(JankinsError::invalid_params(format!(
                "Missing required arguments: {}",
                missing.join(", ")
            ))
            .with_hint(format!("Prompt '{}' requires: {}", name, missing.join(", "))));
        }

        let outcome = AssertUnwindSafe(handler.render(args))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(messages)) => Ok(messages),
            Ok(Err(ToolError::Domain(err))) => Err(err),
            Ok(Err(ToolError::Unexpected(err))) => {
                Err(unexpected("Prompt", name, correlation_id, &format!("{:#}", err)))
            }
            Err(panic) => Err(unexpected("Prompt", name, correlation_id, &panic_message(&*panic))),
        }
    }

    /// Synchronous dispatch step.
    pub fn handle_request(&self, request: &JsonRpcRequest) -> Dispatch {
        if request.is_notification() {
            debug!(method = %request.method, "Ignoring notification");
            return Dispatch::Ignored;
        }

        let id = request.response_id();
        match request.method.as_str() {
            "initialize" => Dispatch::Immediate(to_response(id, &self.get_capabilities())),
            "tools/list" => Dispatch::Immediate(JsonRpcResponse::success(
                id,
                json!({ "tools": self.list_tools() }),
            )),
            "prompts/list" => Dispatch::Immediate(JsonRpcResponse::success(
                id,
                json!({ "prompts": self.list_prompts() }),
            )),
            "tools/call" | "prompts/get" => Dispatch::Deferred(DeferredCall {
                method: request.method.clone(),
                params: request.params.clone().unwrap_or_else(|| json!({})),
                id,
            }),
            other => {
                warn!(method = %other, "Unknown MCP method");
                Dispatch::Immediate(JsonRpcResponse::error(
                    id,
                    JsonRpcError::method_not_found(other),
                ))
            }
        }
    }

    /// Await a deferred call and build its response.
    pub async fn complete(&self, call: DeferredCall) -> JsonRpcResponse {
        let DeferredCall { method, params, id } = call;

        let result = match method.as_str() {
            "tools/call" => match serde_json::from_value::<CallToolParams>(params) {
                Ok(p) => self.call_tool(&p.name, p.arguments).await,
                Err(e) => Err(invalid_call_params(e)),
            },
            "prompts/get" => match serde_json::from_value::<GetPromptParams>(params) {
                Ok(p) => self
                    .get_prompt(&p.name, p.arguments)
                    .await
                    .map(|messages| json!(GetPromptResult { messages })),
                Err(e) => Err(invalid_call_params(e)),
            },
            other => return JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => JsonRpcResponse::error(id, err.to_rpc_error()),
        }
    }

    /// Full dispatch: `None` for notifications.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        self.metrics.record_request();

        let response = match self.handle_request(&request) {
            Dispatch::Immediate(response) => response,
            Dispatch::Deferred(call) => self.complete(call).await,
            Dispatch::Ignored => return None,
        };

        if response.is_error() {
            self.metrics.record_error();
        }
        Some(response)
    }
}

fn to_response<T: Serialize>(id: JsonRpcId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, JsonRpcError::internal_error(e.to_string())),
    }
}

fn invalid_call_params(err: serde_json::Error) -> JankinsError {
    JankinsError::invalid_params(format!("Invalid params: {}", err))
        .with_hint("Expected an object with 'name' and optional 'arguments'")
}

fn unexpected(what: &str, name: &str, correlation_id: &str, detail: &str) -> JankinsError {
    error!(
        target: "jankins_server::mcp",
        kind = what,
        name = %name,
        correlation_id = %correlation_id,
        error = %detail,
        "Unexpected handler failure"
    );
    JankinsError::internal(format!("{} execution failed: {}", what, detail))
        .with_hint("Check server logs for details")
        .with_detail(detail)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
