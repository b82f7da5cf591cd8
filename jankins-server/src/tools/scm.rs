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

//! SCM tools.

use super::{required_str, resolve_build_number, ToolDeps};
use crate::formatters::{ObjectKind, OutputFormat, Payload};
use crate::jenkins::JenkinsApi;
use crate::mcp::registry::{RequestContext, Tool, ToolError, ToolHandler, ToolParameter};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub fn tools(deps: &ToolDeps) -> Vec<Tool> {
    vec![
        Tool::new("get_job_scm", "Get SCM configuration for a job")
            .param(ToolParameter::string("name", "Full job name").required())
            .param(ToolParameter::format(OutputFormat::Summary).one_of(&["summary", "full"]))
            .handler(Arc::new(GetJobScm {
                api: deps.api.clone(),
            })),
        Tool::new(
            "get_build_scm",
            "Get SCM information (git commit, branch, etc.) for a build",
        )
        .param(ToolParameter::string("name", "Full job name").required())
        .param(ToolParameter::string("number", "Build number or 'last'").with_default(json!("last")))
        .handler(Arc::new(GetBuildScm {
            api: deps.api.clone(),
        })),
    ]
}

/// Build actions that describe a checkout.
fn is_scm_action(action: &Value) -> bool {
    let class = action.get("_class").and_then(Value::as_str).unwrap_or("");
    class.ends_with("GitSCM") || class.ends_with("SubversionSCM") || action.get("lastBuiltRevision").is_some()
}

pub struct GetJobScm {
    api: Arc<dyn JenkinsApi>,
}

#[async_trait]
impl ToolHandler for GetJobScm {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let name = required_str(args, "name")?;
        let job = self.api.get_job_info(name).await?;
        Ok(Payload::new(
            ObjectKind::JobScm,
            json!({
                "job_name": name,
                "scm": job.get("scm").cloned().unwrap_or_else(|| json!({})),
            }),
        ))
    }
}

pub struct GetBuildScm {
    api: Arc<dyn JenkinsApi>,
}

#[async_trait]
impl ToolHandler for GetBuildScm {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let name = required_str(args, "name")?;
        let number = resolve_build_number(self.api.as_ref(), name, args.get("number")).await?;
        let build = self.api.get_build_info(name, number).await?;

        let scm_info: Vec<Value> = build
            .get("actions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|a| is_scm_action(a))
            .cloned()
            .collect();

        Ok(Payload::raw(json!({
            "build_number": number,
            "job_name": name,
            "scm_info": scm_info,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatters::shape;
    use crate::tools::testing::FakeJenkins;

    #[tokio::test]
    async fn test_build_scm_keeps_checkout_actions() {
        let api = FakeJenkins::default().with(
            "job/app/4/api/json",
            json!({"actions": [
                {"_class": "hudson.model.CauseAction"},
                {"_class": "hudson.plugins.git.util.BuildData", "lastBuiltRevision": {"SHA1": "abc"}},
                {},
                {"_class": "hudson.scm.SubversionSCM"},
            ]}),
        );
        let handler = GetBuildScm { api: Arc::new(api) };
        let args = json!({"name": "app", "number": 4}).as_object().cloned().unwrap();

        let payload = handler
            .handle(&args, &RequestContext::new(OutputFormat::Summary))
            .await
            .unwrap();
        let actions = payload.body["scm_info"].as_array().unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0]["lastBuiltRevision"]["SHA1"], "abc");
    }

    #[tokio::test]
    async fn test_job_scm_summary() {
        let api = FakeJenkins::default().with(
            "job/app/api/json",
            json!({"scm": {
                "_class": "hudson.plugins.git.GitSCM",
                "userRemoteConfigs": [{"url": "git@example.com:app.git"}],
                "branches": [{"name": "*/main"}],
            }}),
        );
        let handler = GetJobScm { api: Arc::new(api) };
        let args = json!({"name": "app"}).as_object().cloned().unwrap();

        let payload = handler
            .handle(&args, &RequestContext::new(OutputFormat::Summary))
            .await
            .unwrap();
        let out = shape(payload.kind, OutputFormat::Summary, payload.body);
        assert_eq!(out["scm_class"], "hudson.plugins.git.GitSCM");
        assert_eq!(out["url"], "git@example.com:app.git");
        assert_eq!(out["branches"], json!(["*/main"]));
    }
}
