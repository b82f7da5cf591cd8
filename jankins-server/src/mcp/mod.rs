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

//! Model Context Protocol surface
//!
//! JSON-RPC 2.0 wire types, the tool/prompt registry with its dispatcher,
//! and the two transports that feed it: newline-delimited stdio and
//! HTTP POST with an optional SSE keep-alive stream.

pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;

pub use protocol::*;
pub use registry::{
    Dispatch, McpServer, ParamType, Prompt, PromptHandler, RequestContext, Tool, ToolError,
    ToolHandler, ToolParameter,
};
pub use server::{router, serve_http, AppState};
pub use transport::{serve, LineTransport, McpTransport, StdioTransport, TransportError};
