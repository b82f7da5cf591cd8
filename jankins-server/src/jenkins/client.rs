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

//! Jenkins REST API access.
//!
//! [`JenkinsApi`] needs only raw `get`/`post`; the typed operations are
//! provided methods on top of them, so a test double implements two calls.

use crate::config::JenkinsConfig;
use crate::error::{ErrorKind, JankinsError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, LOCATION};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Folder recursion used by `list_jobs`.
pub const DEFAULT_FOLDER_DEPTH: usize = 10;

/// Status, headers and body of one upstream response.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Path segments of a job, `a/b` becoming `job/a/job/b`.
pub fn job_path(name: &str) -> Vec<String> {
    name.split('/')
        .filter(|part| !part.is_empty())
        .flat_map(|part| ["job".to_string(), part.to_string()])
        .collect()
}

pub fn build_path(name: &str, number: u64) -> Vec<String> {
    let mut path = job_path(name);
    path.push(number.to_string());
    path
}

/// Owned path segments from literals.
pub fn segments(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn with_suffix(mut path: Vec<String>, suffix: &[&str]) -> Vec<String> {
    path.extend(suffix.iter().map(|s| s.to_string()));
    path
}

/// `tree` selector for nested folders down to `depth`.
fn jobs_tree(depth: usize) -> String {
    let mut tree = "jobs[name,url,color]".to_string();
    for _ in 0..depth {
        tree = format!("jobs[name,url,color,{}]", tree);
    }
    tree
}

/// Flatten a nested `jobs` listing, computing `fullname` for every entry.
fn flatten_jobs(jobs: &[Value], prefix: &str, out: &mut Vec<Value>) {
    for job in jobs {
        let Some(obj) = job.as_object() else {
            continue;
        };
        let name = obj.get("name").and_then(Value::as_str).unwrap_or_default();
        let fullname = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };

        let mut entry: Map<String, Value> = obj
            .iter()
            .filter(|(k, _)| k.as_str() != "jobs")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entry.insert("fullname".into(), Value::String(fullname.clone()));
        out.push(Value::Object(entry));

        if let Some(children) = obj.get("jobs").and_then(Value::as_array) {
            flatten_jobs(children, &fullname, out);
        }
    }
}

/// Queue item id from a `Location: .../queue/item/<id>/` header.
pub fn queue_id_from_location(location: &str) -> Option<u64> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|id| id.parse().ok())
}

/// Replace a NotFound error with a resource-specific message.
fn not_found_as(err: JankinsError, message: impl FnOnce() -> String) -> JankinsError {
    if err.kind == ErrorKind::NotFound {
        JankinsError::not_found(message())
    } else {
        err
    }
}

/// Upstream CI server operations.
#[async_trait]
pub trait JenkinsApi: Send + Sync {
    async fn get(&self, path: &[String], query: &[(&str, String)]) -> Result<RawResponse>;

    async fn post(&self, path: &[String], form: &[(String, String)]) -> Result<RawResponse>;

    async fn get_json(&self, path: &[String], query: &[(&str, String)]) -> Result<Value> {
        self.get(path, query).await?.json()
    }

    /// Every job down to `folder_depth` folders, each with a `fullname`.
    async fn get_all_jobs(&self, folder_depth: usize) -> Result<Vec<Value>> {
        let root = self
            .get_json(&segments(&["api", "json"]), &[("tree", jobs_tree(folder_depth))])
            .await?;
        let mut jobs = Vec::new();
        if let Some(top) = root.get("jobs").and_then(Value::as_array) {
            flatten_jobs(top, "", &mut jobs);
        }
        Ok(jobs)
    }

    async fn get_job_info(&self, name: &str) -> Result<Value> {
        self.get_json(
            &with_suffix(job_path(name), &["api", "json"]),
            &[("depth", "0".to_string())],
        )
        .await
        .map_err(|e| not_found_as(e, || format!("Job '{}' not found", name)))
    }

    async fn get_build_info(&self, name: &str, number: u64) -> Result<Value> {
        self.get_json(
            &with_suffix(build_path(name, number), &["api", "json"]),
            &[("depth", "0".to_string())],
        )
        .await
        .map_err(|e| {
            not_found_as(e, || format!("Build #{} for job '{}' not found", number, name))
        })
    }

    /// Queue a build; returns the queue item id when Jenkins reports one.
    async fn build_job(&self, name: &str, parameters: &Map<String, Value>) -> Result<Option<u64>> {
        let endpoint = if parameters.is_empty() {
            "build"
        } else {
            "buildWithParameters"
        };
        let form: Vec<(String, String)> = parameters
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect();

        let response = self
            .post(&with_suffix(job_path(name), &[endpoint]), &form)
            .await
            .map_err(|e| not_found_as(e, || format!("Job '{}' not found", name)))?;
        Ok(response
            .header(LOCATION.as_str())
            .and_then(queue_id_from_location))
    }

    async fn enable_job(&self, name: &str) -> Result<()> {
        self.post(&with_suffix(job_path(name), &["enable"]), &[])
            .await
            .map_err(|e| not_found_as(e, || format!("Job '{}' not found", name)))?;
        Ok(())
    }

    async fn disable_job(&self, name: &str) -> Result<()> {
        self.post(&with_suffix(job_path(name), &["disable"]), &[])
            .await
            .map_err(|e| not_found_as(e, || format!("Job '{}' not found", name)))?;
        Ok(())
    }

    async fn get_queue_info(&self) -> Result<Vec<Value>> {
        let queue = self
            .get_json(
                &segments(&["queue", "api", "json"]),
                &[("depth", "0".to_string())],
            )
            .await?;
        Ok(queue
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_whoami(&self) -> Result<Value> {
        self.get_json(
            &segments(&["me", "api", "json"]),
            &[("depth", "0".to_string())],
        )
        .await
    }

    /// Server version from the `X-Jenkins` header.
    async fn get_version(&self) -> Result<String> {
        let response = self.get(&[], &[]).await?;
        response
            .header("X-Jenkins")
            .map(str::to_string)
            .ok_or_else(|| JankinsError::upstream("Jenkins did not report a version"))
    }

    /// One progressive-text request starting at byte `start`.
    async fn get_progressive_text(&self, name: &str, number: u64, start: u64) -> Result<RawResponse> {
        self.get(
            &with_suffix(build_path(name, number), &["logText", "progressiveText"]),
            &[("start", start.to_string())],
        )
        .await
        .map_err(|e| {
            not_found_as(e, || format!("Build #{} for job '{}' not found", number, name))
        })
    }

    async fn get_test_report(&self, name: &str, number: u64, tree: &str) -> Result<Value> {
        self.get_json(
            &with_suffix(build_path(name, number), &["testReport", "api", "json"]),
            &[("tree", tree.to_string())],
        )
        .await
    }
}

/// reqwest-backed [`JenkinsApi`].
pub struct JenkinsClient {
    http: reqwest::Client,
    base: Url,
    user: String,
    token: String,
    debug_http: bool,
}

impl JenkinsClient {
    pub fn new(config: &JenkinsConfig, debug_http: bool) -> Result<Self> {
        let base = Url::parse(&config.url).map_err(|e| {
            JankinsError::invalid_params(format!("Invalid Jenkins URL '{}': {}", config.url, e))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| JankinsError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base,
            user: config.user.clone(),
            token: config.api_token.clone(),
            debug_http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &[String]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                JankinsError::internal(format!("Jenkins URL '{}' cannot be a base", self.base))
            })?;
            segments.pop_if_empty();
            for segment in path {
                segments.push(segment);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.user.is_empty() {
            request
        } else {
            request.basic_auth(&self.user, Some(&self.token))
        }
    }

    async fn send(&self, method: &str, url: Url, request: reqwest::RequestBuilder) -> Result<RawResponse> {
        if self.debug_http {
            debug!(method, url = %url, "Jenkins request");
        }

        let response = self.authorize(request).send().await?;
        let status = response.status();

        if self.debug_http {
            debug!(method, url = %url, status = status.as_u16(), "Jenkins response");
        }

        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("error");
            return Err(JankinsError::from_status(
                status.as_u16(),
                &format!("{} {} ({})", method, url.path(), reason),
            ));
        }

        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(RawResponse { headers, body })
    }

    /// CSRF crumb header, when the server issues one.
    async fn crumb(&self) -> Result<Option<(String, String)>> {
        match self.get_json(&segments(&["crumbIssuer", "api", "json"]), &[]).await {
            Ok(crumb) => {
                let field = crumb.get("crumbRequestField").and_then(Value::as_str);
                let value = crumb.get("crumb").and_then(Value::as_str);
                Ok(field.zip(value).map(|(f, v)| (f.to_string(), v.to_string())))
            }
            Err(e) if e.kind == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl JenkinsApi for JenkinsClient {
    async fn get(&self, path: &[String], query: &[(&str, String)]) -> Result<RawResponse> {
        let url = self.url(path)?;
        let request = self.http.get(url.clone()).query(query);
        self.send("GET", url, request).await
    }

    async fn post(&self, path: &[String], form: &[(String, String)]) -> Result<RawResponse> {
        let url = self.url(path)?;
        let mut request = self.http.post(url.clone()).form(form);
        if let Some((field, value)) = self.crumb().await? {
            request = request.header(field, value);
        }
        self.send("POST", url, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_path_nests_folders() {
        assert_eq!(job_path("infra/build"), vec!["job", "infra", "job", "build"]);
        assert_eq!(build_path("app", 57), vec!["job", "app", "57"]);
    }

    #[test]
    fn test_url_encodes_segments() {
        let client = JenkinsClient::new(
            &JenkinsConfig {
                url: "https://ci.example.com/jenkins".into(),
                ..Default::default()
            },
            false,
        )
        .unwrap();

        let url = client.url(&build_path("infra/my job", 3)).unwrap();
        assert_eq!(
            url.as_str(),
            "https://ci.example.com/jenkins/job/infra/job/my%20job/3"
        );

        let pipeline = client
            .url(&segments(&["blue", "pipelines", "infra/build"]))
            .unwrap();
        assert!(pipeline.as_str().ends_with("/blue/pipelines/infra%2Fbuild"));
    }

    #[test]
    fn test_flatten_jobs_builds_fullnames() {
        let tree = json!([
            {"name": "infra", "url": "u1", "jobs": [
                {"name": "build", "url": "u2", "color": "red"}
            ]},
            {"name": "app", "url": "u3", "color": "blue"}
        ]);
        let mut out = Vec::new();
        flatten_jobs(tree.as_array().unwrap(), "", &mut out);

        let names: Vec<&str> = out.iter().map(|j| j["fullname"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["infra", "infra/build", "app"]);
        assert!(out[0].get("jobs").is_none());
    }

    #[test]
    fn test_jobs_tree_depth() {
        assert_eq!(jobs_tree(0), "jobs[name,url,color]");
        assert_eq!(jobs_tree(1), "jobs[name,url,color,jobs[name,url,color]]");
    }

    #[test]
    fn test_queue_id_from_location() {
        assert_eq!(
            queue_id_from_location("https://ci.example.com/queue/item/42/"),
            Some(42)
        );
        assert_eq!(queue_id_from_location("https://ci.example.com/"), None);
    }
}
