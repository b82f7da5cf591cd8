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

use jankins_server::config::{ConfigError, ServerConfig, TransportMode};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn partial_file_keeps_section_defaults() {
    let file = write_config(
        r#"
[jenkins]
url = "https://ci.example.com"
user = "bot"
api_token = "s3cret"

[transport]
mode = "http"
bind = "0.0.0.0:9090"

[cache]
enabled = true
"#,
    );

    let config = ServerConfig::from_file(file.path()).unwrap();

    assert_eq!(config.jenkins.url, "https://ci.example.com");
    assert_eq!(config.jenkins.timeout_secs, 30);
    assert_eq!(config.transport.mode, TransportMode::Http);
    assert_eq!(config.socket_addr().unwrap().port(), 9090);
    assert!(config.cache.enabled);
    assert_eq!(config.cache.ttl_secs, 300);
    assert_eq!(config.rate_limit.burst, 10);
    assert!(config.validate().is_ok());

    // The API token never reaches debug output
    let shown = format!("{:?}", config);
    assert!(!shown.contains("s3cret"));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let file = write_config("[jenkins\nurl = ");
    let err = ServerConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn unknown_transport_is_rejected() {
    let file = write_config("[transport]\nmode = \"carrier-pigeon\"\n");
    assert!(ServerConfig::from_file(file.path()).is_err());
}

#[test]
fn file_values_feed_runtime_settings() {
    let file = write_config(
        r#"
[jenkins]
url = "https://ci.example.com"
timeout_secs = 12

[rate_limit]
per_minute = 120
burst = 4

[cache]
enabled = true
ttl_secs = 60
max_entries = 50
"#,
    );

    let config = ServerConfig::from_file(file.path()).unwrap();

    assert_eq!(config.request_timeout().as_secs(), 12);
    let limits = config.rate_limit_config();
    assert_eq!(limits.requests_per_minute, 120);
    assert_eq!(limits.burst, 4);
    let cache = config.cache_config();
    assert_eq!(cache.max_entries, 50);
    assert_eq!(cache.ttl.as_secs(), 60);
}
