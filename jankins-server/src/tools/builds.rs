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

//! Build tools: build info, change sets and artifacts.

use super::{required_str, resolve_build_number, ToolDeps};
use crate::formatters::{ObjectKind, OutputFormat, Payload};
use crate::jenkins::JenkinsApi;
use crate::mcp::registry::{RequestContext, Tool, ToolError, ToolHandler, ToolParameter};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn job_and_number(tool: Tool) -> Tool {
    tool.param(ToolParameter::string("name", "Full job name").required())
        .param(ToolParameter::string("number", "Build number or 'last'").with_default(json!("last")))
}

pub fn tools(deps: &ToolDeps) -> Vec<Tool> {
    let api = deps.api.clone();
    vec![
        job_and_number(Tool::new(
            "get_build",
            "Get information about a specific build or the last build",
        ))
        .param(ToolParameter::format(OutputFormat::Summary).one_of(&["summary", "full", "ids"]))
        .handler(Arc::new(GetBuild { api: api.clone() })),
        job_and_number(Tool::new("get_build_changes", "Get SCM changes (commits) for a build"))
            .param(ToolParameter::format(OutputFormat::Summary).one_of(&["summary", "full"]))
            .handler(Arc::new(GetBuildChanges { api: api.clone() })),
        job_and_number(Tool::new("get_build_artifacts", "Get artifacts produced by a build"))
            .param(ToolParameter::format(OutputFormat::Summary).one_of(&["summary", "full"]))
            .handler(Arc::new(GetBuildArtifacts { api })),
    ]
}

/// Change-set entries of a build.
///
/// Freestyle builds report one `changeSet`; pipeline builds report a
/// `changeSets` list, one per checkout.
pub(crate) fn change_items(build: &Value) -> Vec<Value> {
    if let Some(items) = build
        .get("changeSet")
        .and_then(|c| c.get("items"))
        .and_then(Value::as_array)
    {
        return items.clone();
    }
    build
        .get("changeSets")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|set| set.get("items").and_then(Value::as_array))
        .flatten()
        .cloned()
        .collect()
}

async fn load_build(
    api: &dyn JenkinsApi,
    args: &Map<String, Value>,
) -> crate::error::Result<(u64, Value)> {
    let name = required_str(args, "name")?;
    let number = resolve_build_number(api, name, args.get("number")).await?;
    let build = api.get_build_info(name, number).await?;
    Ok((number, build))
}

pub struct GetBuild {
    api: Arc<dyn JenkinsApi>,
}

#[async_trait]
impl ToolHandler for GetBuild {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let (_, build) = load_build(self.api.as_ref(), args).await?;
        Ok(Payload::new(ObjectKind::Build, build))
    }
}

pub struct GetBuildChanges {
    api: Arc<dyn JenkinsApi>,
}

#[async_trait]
impl ToolHandler for GetBuildChanges {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let (number, build) = load_build(self.api.as_ref(), args).await?;
        Ok(Payload::new(
            ObjectKind::BuildChanges,
            json!({
                "build_number": number,
                "items": change_items(&build),
            }),
        ))
    }
}

pub struct GetBuildArtifacts {
    api: Arc<dyn JenkinsApi>,
}

#[async_trait]
impl ToolHandler for GetBuildArtifacts {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let (number, build) = load_build(self.api.as_ref(), args).await?;
        Ok(Payload::new(
            ObjectKind::BuildArtifacts,
            json!({
                "build_number": number,
                "artifacts": build.get("artifacts").cloned().unwrap_or_else(|| json!([])),
                "url": build.get("url").cloned().unwrap_or(Value::Null),
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::FakeJenkins;

    fn api() -> Arc<FakeJenkins> {
        Arc::new(
            FakeJenkins::default()
                .with("job/app/api/json", json!({"lastBuild": {"number": 8}}))
                .with(
                    "job/app/8/api/json",
                    json!({
                        "number": 8,
                        "url": "http://j/job/app/8/",
                        "changeSets": [
                            {"items": [{"commitId": "a1"}]},
                            {"items": [{"commitId": "b2"}, {"commitId": "c3"}]},
                        ],
                        "artifacts": [{"fileName": "app.tar.gz", "relativePath": "dist/app.tar.gz"}],
                    }),
                ),
        )
    }

    #[tokio::test]
    async fn test_changes_merge_pipeline_change_sets() {
        let handler = GetBuildChanges { api: api() };
        let args = json!({"name": "app"}).as_object().cloned().unwrap();
        let payload = handler
            .handle(&args, &RequestContext::new(OutputFormat::Summary))
            .await
            .unwrap();

        assert_eq!(payload.body["build_number"], 8);
        assert_eq!(payload.body["items"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_artifacts_carry_build_url() {
        let handler = GetBuildArtifacts { api: api() };
        let args = json!({"name": "app", "number": "8"}).as_object().cloned().unwrap();
        let payload = handler
            .handle(&args, &RequestContext::new(OutputFormat::Full))
            .await
            .unwrap();

        assert_eq!(payload.kind, ObjectKind::BuildArtifacts);
        assert_eq!(payload.body["url"], "http://j/job/app/8/");
        assert_eq!(payload.body["artifacts"][0]["fileName"], "app.tar.gz");
    }

    #[test]
    fn test_freestyle_change_set() {
        let build = json!({"changeSet": {"items": [{"commitId": "x"}]}});
        assert_eq!(change_items(&build).len(), 1);
        assert!(change_items(&json!({})).is_empty());
    }
}
