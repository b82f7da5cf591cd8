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

use anyhow::Result;
use clap::Parser;
use jankins_server::config::{ServerConfig, TransportMode};
use jankins_server::run;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, env = "JANKINS_CONFIG")]
    config: Option<PathBuf>,

    /// Jenkins base URL (overrides config file and JENKINS_URL)
    #[arg(long)]
    jenkins_url: Option<String>,

    /// Jenkins user name
    #[arg(long)]
    jenkins_user: Option<String>,

    /// Transport to serve
    #[arg(long, value_enum)]
    transport: Option<TransportMode>,

    /// Listen address for http/sse
    #[arg(long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Log every Jenkins request
    #[arg(long)]
    debug_http: bool,

    /// Require this Origin header on /mcp and /sse
    #[arg(long)]
    origin_expected: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::load(args.config.as_deref())?;

    if let Some(url) = args.jenkins_url {
        config.jenkins.url = url;
    }
    if let Some(user) = args.jenkins_user {
        config.jenkins.user = user;
    }
    if let Some(mode) = args.transport {
        config.transport.mode = mode;
    }
    if let Some(bind) = args.bind {
        config.transport.bind = bind;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.log_json {
        config.logging.json = true;
    }
    if args.debug_http {
        config.logging.debug_http = true;
    }
    if let Some(origin) = args.origin_expected {
        config.transport.origin_enforce = true;
        config.transport.origin_expected = Some(origin);
    }

    run(config).await
}
