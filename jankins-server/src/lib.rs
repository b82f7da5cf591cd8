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

//! Jankins: an MCP server that gives language models token-efficient access
//! to Jenkins jobs, builds, logs and test reports.

pub mod cache;
pub mod config;
pub mod error;
pub mod formatters;
pub mod jenkins;
pub mod mcp;
pub mod metrics;
pub mod prompts;
pub mod rate_limit;
pub mod tools;

use anyhow::Result;
use cache::ResponseCache;
use config::{LoggingConfig, ServerConfig, TransportMode};
use jenkins::{JenkinsApi, JenkinsClient};
use mcp::{serve, serve_http, AppState, McpServer, StdioTransport, SERVER_NAME};
use metrics::Metrics;
use rate_limit::RateLimiter;
use std::sync::Arc;
use tools::ToolDeps;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the global subscriber. Output goes to stderr; stdout carries
/// the stdio protocol stream.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "jankins_server={},tower_http=info",
            logging.level.to_lowercase()
        ))
    });
    let registry = tracing_subscriber::registry().with(filter);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = if logging.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
}

/// A fully wired server.
pub struct App {
    pub server: Arc<McpServer>,
    pub cache: Option<Arc<ResponseCache>>,
}

/// Composition root: every tool and prompt registered against `api`.
pub fn build_server(config: &ServerConfig, api: Arc<dyn JenkinsApi>) -> App {
    let cache = config
        .cache
        .enabled
        .then(|| Arc::new(ResponseCache::new(config.cache_config())));

    let mut server = McpServer::new(SERVER_NAME, VERSION, Arc::new(Metrics::new()));
    let deps = ToolDeps::new(api, config.logs.clone(), SERVER_NAME, VERSION);
    tools::register_all(&mut server, &deps, cache.clone());
    prompts::register_all(&mut server);

    App {
        server: Arc::new(server),
        cache,
    }
}

/// HTTP transport state for `app` under `config`.
pub fn http_state(config: &ServerConfig, app: &App) -> AppState {
    let mut state = AppState::new(app.server.clone());

    if config.rate_limit.enabled {
        state = state.with_rate_limiter(Arc::new(RateLimiter::new(config.rate_limit_config())));
    }
    if let Some(cache) = &app.cache {
        state = state.with_cache(cache.clone());
    }
    if config.transport.origin_enforce {
        match &config.transport.origin_expected {
            Some(origin) => state = state.with_expected_origin(origin.clone()),
            None => warn!("ORIGIN_ENFORCE is set without ORIGIN_EXPECTED; origin check disabled"),
        }
    }
    state
}

/// Run the configured transport until it ends.
pub async fn run(config: ServerConfig) -> Result<()> {
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = VERSION,
        transport = ?config.transport.mode,
        jenkins = %config.jenkins.url,
        "Starting jankins server"
    );

    let client = JenkinsClient::new(&config.jenkins, config.logging.debug_http)?;
    let app = build_server(&config, Arc::new(client));

    match config.transport.mode {
        TransportMode::Stdio => {
            let mut transport = StdioTransport::stdio();
            serve(&app.server, &mut transport).await?;
        }
        mode @ (TransportMode::Http | TransportMode::Sse) => {
            let addr = config.socket_addr()?;
            let state = http_state(&config, &app);
            serve_http(state, addr, mode == TransportMode::Sse).await?;
        }
    }

    Ok(())
}
