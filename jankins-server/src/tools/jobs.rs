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

//! Job tools: listing, lookup, triggering and enable/disable.

use super::{object_or_empty, optional_str, required_str, u64_or, ToolDeps};
use crate::error::JankinsError;
use crate::formatters::{ObjectKind, OutputFormat, Payload};
use crate::jenkins::client::DEFAULT_FOLDER_DEPTH;
use crate::jenkins::JenkinsApi;
use crate::mcp::registry::{RequestContext, Tool, ToolError, ToolHandler, ToolParameter};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

pub fn tools(deps: &ToolDeps) -> Vec<Tool> {
    let api = deps.api.clone();
    vec![
        Tool::new(
            "list_jobs",
            "List Jenkins jobs with optional prefix filtering and pagination",
        )
        .param(ToolParameter::string("prefix", "Job name prefix filter"))
        .param(ToolParameter::number("page", "Page number (1-indexed)").with_default(json!(1)))
        .param(ToolParameter::number("page_size", "Items per page").with_default(json!(50)))
        .param(ToolParameter::format(OutputFormat::Summary).one_of(&["summary", "full", "ids"]))
        .handler(Arc::new(ListJobs { api: api.clone() })),
        Tool::new("get_job", "Get detailed information about a specific Jenkins job")
            .param(
                ToolParameter::string("name", "Full job name (e.g., 'folder/subfolder/job')")
                    .required(),
            )
            .param(ToolParameter::format(OutputFormat::Summary).one_of(&["summary", "full", "ids"]))
            .handler(Arc::new(GetJob { api: api.clone() })),
        Tool::new(
            "trigger_build",
            "Trigger a new build for a Jenkins job with optional parameters",
        )
        .param(ToolParameter::string("name", "Full job name").required())
        .param(
            ToolParameter::object("parameters", "Build parameters as key-value pairs")
                .with_default(json!({})),
        )
        .handler(Arc::new(TriggerBuild { api: api.clone() })),
        Tool::new("enable_job", "Enable a Jenkins job to allow builds")
            .param(ToolParameter::string("name", "Full job name").required())
            .handler(Arc::new(SetJobEnabled {
                api: api.clone(),
                enabled: true,
            })),
        Tool::new("disable_job", "Disable a Jenkins job to prevent builds")
            .param(ToolParameter::string("name", "Full job name").required())
            .handler(Arc::new(SetJobEnabled {
                api,
                enabled: false,
            })),
    ]
}

pub struct ListJobs {
    api: Arc<dyn JenkinsApi>,
}

#[async_trait]
impl ToolHandler for ListJobs {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let prefix = optional_str(args, "prefix")?.unwrap_or("");
        let page = u64_or(args, "page", 1)?.max(1) as usize;
        let page_size = u64_or(args, "page_size", 50)? as usize;
        if page_size == 0 {
            return Err(JankinsError::invalid_params("page_size must be at least 1").into());
        }

        let matching: Vec<Value> = self
            .api
            .get_all_jobs(DEFAULT_FOLDER_DEPTH)
            .await?
            .into_iter()
            .filter(|job| {
                job.get("fullname")
                    .and_then(Value::as_str)
                    .map_or(false, |name| name.starts_with(prefix))
            })
            .collect();

        let total = matching.len();
        let jobs: Vec<Value> = matching
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok(Payload::new(
            ObjectKind::JobList,
            json!({
                "jobs": jobs,
                "total": total,
                "page": page,
                "page_size": page_size,
                "total_pages": total.div_ceil(page_size),
            }),
        ))
    }
}

pub struct GetJob {
    api: Arc<dyn JenkinsApi>,
}

#[async_trait]
impl ToolHandler for GetJob {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let name = required_str(args, "name")?;
        let job = self.api.get_job_info(name).await?;
        Ok(Payload::new(ObjectKind::Job, job))
    }
}

pub struct TriggerBuild {
    api: Arc<dyn JenkinsApi>,
}

#[async_trait]
impl ToolHandler for TriggerBuild {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let name = required_str(args, "name")?;
        let parameters = object_or_empty(args, "parameters")?;

        let queue_id = self.api.build_job(name, &parameters).await?;
        info!(
            job = %name,
            queue_id = ?queue_id,
            correlation_id = %ctx.correlation_id,
            "Build queued"
        );

        Ok(Payload::raw(json!({
            "queue_id": queue_id,
            "job_name": name,
            "parameters": parameters,
            "status": "queued",
            "message": format!("Build queued for {}", name),
        })))
    }
}

/// `enable_job` and `disable_job`.
pub struct SetJobEnabled {
    api: Arc<dyn JenkinsApi>,
    enabled: bool,
}

#[async_trait]
impl ToolHandler for SetJobEnabled {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let name = required_str(args, "name")?;
        let status = if self.enabled {
            self.api.enable_job(name).await?;
            "enabled"
        } else {
            self.api.disable_job(name).await?;
            "disabled"
        };

        Ok(Payload::raw(json!({
            "job_name": name,
            "status": status,
            "message": format!("Job {} has been {}", name, status),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLimitsConfig;
    use crate::tools::testing::FakeJenkins;

    fn handler_args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn jobs_api() -> Arc<FakeJenkins> {
        let jobs: Vec<Value> = (1..=5)
            .map(|i| json!({"name": format!("svc-{}", i), "url": format!("http://j/job/svc-{}/", i)}))
            .chain(std::iter::once(json!({"name": "other", "url": "http://j/job/other/"})))
            .collect();
        Arc::new(FakeJenkins::default().with("api/json", json!({ "jobs": jobs })))
    }

    #[tokio::test]
    async fn test_list_jobs_filters_and_pages() {
        let handler = ListJobs { api: jobs_api() };
        let ctx = RequestContext::new(OutputFormat::Summary);

        let payload = handler
            .handle(
                &handler_args(json!({"prefix": "svc", "page": 2, "page_size": 2})),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(payload.kind, ObjectKind::JobList);
        assert_eq!(payload.body["total"], 5);
        assert_eq!(payload.body["total_pages"], 3);
        let names: Vec<&str> = payload.body["jobs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|j| j["fullname"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["svc-3", "svc-4"]);
    }

    #[tokio::test]
    async fn test_list_jobs_rejects_zero_page_size() {
        let handler = ListJobs { api: jobs_api() };
        let ctx = RequestContext::new(OutputFormat::Summary);
        let err = handler
            .handle(&handler_args(json!({"page_size": 0})), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Domain(e) if e.code() == -32602));
    }

    #[tokio::test]
    async fn test_trigger_build_reports_queue_id() {
        let api = Arc::new(FakeJenkins::default());
        let deps = ToolDeps::new(api.clone(), LogLimitsConfig::default(), "jankins", "test");
        let tool = tools(&deps)
            .into_iter()
            .find(|t| t.name == "trigger_build")
            .unwrap();
        let ctx = RequestContext::new(OutputFormat::Summary);

        let payload = tool
            .handler
            .unwrap()
            .handle(
                &handler_args(json!({"name": "infra/deploy", "parameters": {"ENV": "staging"}})),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(payload.body["queue_id"], 77);
        assert_eq!(payload.body["status"], "queued");
        assert_eq!(
            api.posts.lock().as_slice(),
            ["job/infra/job/deploy/buildWithParameters"]
        );
    }

    #[tokio::test]
    async fn test_disable_job_message() {
        let api = Arc::new(FakeJenkins::default());
        let handler = SetJobEnabled {
            api: api.clone(),
            enabled: false,
        };
        let ctx = RequestContext::new(OutputFormat::Summary);
        let payload = handler
            .handle(&handler_args(json!({"name": "app"})), &ctx)
            .await
            .unwrap();
        assert_eq!(payload.body["message"], "Job app has been disabled");
        assert_eq!(api.posts.lock().as_slice(), ["job/app/disable"]);
    }
}
