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

//! MCP stdio transport: one JSON-RPC object per line.
//!
//! Logging never touches this stream; the subscriber writes to stderr.

use crate::mcp::protocol::{JsonRpcError, JsonRpcId, JsonRpcRequest, JsonRpcResponse};
use crate::mcp::registry::McpServer;
use serde_json::Value;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One decoded inbound line.
#[derive(Debug)]
pub enum Frame {
    Request(JsonRpcRequest),
    /// The line could not be used; answer with this response.
    Rejected(JsonRpcResponse),
}

/// Transport abstraction for MCP JSON-RPC messages.
#[async_trait::async_trait]
pub trait McpTransport: Send {
    /// Next inbound frame, or `None` at end of stream.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;
    /// Send one response and flush it.
    async fn send(&mut self, response: &JsonRpcResponse) -> Result<(), TransportError>;
}

/// Newline-delimited JSON over any async reader/writer pair.
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
    line: String,
}

/// The process's own stdin/stdout.
pub type StdioTransport = LineTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout>;

impl StdioTransport {
    pub fn stdio() -> Self {
        LineTransport::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            line: String::new(),
        }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

/// Decode a single non-blank line.
pub fn decode_line(line: &str) -> Frame {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Invalid JSON on input");
            return Frame::Rejected(JsonRpcResponse::error(
                JsonRpcId::Null,
                JsonRpcError::parse_error("Parse error: Invalid JSON"),
            ));
        }
    };

    let id = value
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<JsonRpcId>(id).ok())
        .unwrap_or(JsonRpcId::Null);

    match serde_json::from_value::<JsonRpcRequest>(value) {
        Ok(request) => Frame::Request(request),
        Err(e) => Frame::Rejected(JsonRpcResponse::error(
            id,
            JsonRpcError::invalid_request(format!("Invalid Request: {}", e)),
        )),
    }
}

#[async_trait::async_trait]
impl<R, W> McpTransport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(decode_line(trimmed)));
        }
    }

    async fn send(&mut self, response: &JsonRpcResponse) -> Result<(), TransportError> {
        let mut payload = serde_json::to_vec(response)?;
        payload.push(b'\n');
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Serve requests from `transport` until end of input.
pub async fn serve<T: McpTransport>(
    server: &McpServer,
    transport: &mut T,
) -> Result<(), TransportError> {
    info!(
        tools = server.list_tools().len(),
        prompts = server.list_prompts().len(),
        "Starting MCP server in stdio mode"
    );

    while let Some(frame) = transport.recv().await? {
        let response = match frame {
            Frame::Request(request) => {
                debug!(method = %request.method, "Received request");
                server.handle(request).await
            }
            Frame::Rejected(response) => Some(response),
        };

        if let Some(response) = response {
            transport.send(&response).await?;
        }
    }

    info!("Stdin closed, shutting down");
    Ok(())
}
