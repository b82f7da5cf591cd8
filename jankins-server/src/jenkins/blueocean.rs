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

//! Blue Ocean pipeline graph access.
//!
//! The plugin is optional on real servers, so every call here reports a
//! [`Lookup`] rather than failing the parent request.

use crate::error::JankinsError;
use crate::jenkins::client::{segments, JenkinsApi};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

const FAILING_RESULTS: &[&str] = &["FAILURE", "ABORTED", "UNSTABLE"];
const FAILING_STEP_RESULTS: &[&str] = &["FAILURE", "ABORTED"];
const FAILING_STEPS_CAP: usize = 5;

/// Outcome of a best-effort upstream call.
#[derive(Debug)]
pub enum Lookup<T> {
    Found(T),
    /// The collaborator answered with nothing
    Empty,
    /// The collaborator could not be reached or errored
    Unavailable(JankinsError),
}

impl<T> Lookup<T> {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Lookup::Unavailable(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(v) => Lookup::Found(f(v)),
            Lookup::Empty => Lookup::Empty,
            Lookup::Unavailable(e) => Lookup::Unavailable(e),
        }
    }
}

impl<T: Default> Lookup<T> {
    /// Found value, or the default for both empty and unavailable.
    pub fn unwrap_or_default(self) -> T {
        match self {
            Lookup::Found(v) => v,
            _ => T::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageInfo {
    pub id: String,
    pub name: String,
    pub result: String,
    pub state: String,
    pub duration_ms: i64,
    pub start_time: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

impl StageInfo {
    fn from_node(node: &Value) -> Self {
        let text = |key: &str, default: &str| {
            node.get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        Self {
            id: text("id", ""),
            name: text("displayName", "Unknown"),
            result: text("result", "UNKNOWN"),
            state: text("state", "UNKNOWN"),
            duration_ms: node.get("durationInMillis").and_then(Value::as_i64).unwrap_or(0),
            start_time: text("startTime", ""),
            node_type: text("type", "STAGE"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineGraph {
    pub stages: Vec<StageInfo>,
    pub parallel_stages: Vec<Vec<StageInfo>>,
    pub total_duration_ms: i64,
    pub node_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub name: String,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailingStage {
    pub name: String,
    pub result: String,
    pub duration_ms: i64,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failing_steps: Option<Vec<StepSummary>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageDiff {
    pub stage: String,
    pub base_duration_ms: i64,
    pub head_duration_ms: i64,
    pub delta_ms: i64,
    pub base_result: String,
    pub head_result: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageComparison {
    pub stage_diffs: Vec<StageDiff>,
    pub duration_delta_ms: i64,
    pub new_stages: Vec<String>,
    pub removed_stages: Vec<String>,
    pub available: bool,
}

/// Group nodes into sequential stages and parallel branches.
///
/// Branch nodes (`type: PARALLEL`) are grouped under their `firstParent`;
/// every other node is a sequential stage.
pub fn build_graph(nodes: &[Value]) -> PipelineGraph {
    let mut stages = Vec::new();
    let mut groups: BTreeMap<String, Vec<StageInfo>> = BTreeMap::new();
    let mut total_duration_ms = 0;

    for node in nodes {
        let stage = StageInfo::from_node(node);
        total_duration_ms += stage.duration_ms;

        if stage.node_type == "PARALLEL" {
            let parent = node
                .get("firstParent")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            groups.entry(parent).or_default().push(stage);
        } else {
            stages.push(stage);
        }
    }

    PipelineGraph {
        stages,
        parallel_stages: groups.into_values().collect(),
        total_duration_ms,
        node_count: nodes.len(),
    }
}

/// Stages present in both runs whose duration moved by more than a second
/// or more than 10%.
pub fn diff_stages(base: &PipelineGraph, head: &PipelineGraph) -> StageComparison {
    let base_by_name: HashMap<&str, &StageInfo> =
        base.stages.iter().map(|s| (s.name.as_str(), s)).collect();
    let head_names: Vec<&str> = head.stages.iter().map(|s| s.name.as_str()).collect();

    let mut stage_diffs = Vec::new();
    let mut new_stages = Vec::new();

    for head_stage in &head.stages {
        let Some(base_stage) = base_by_name.get(head_stage.name.as_str()) else {
            new_stages.push(head_stage.name.clone());
            continue;
        };

        let delta = head_stage.duration_ms - base_stage.duration_ms;
        let relative = base_stage.duration_ms > 0
            && (delta as f64 / base_stage.duration_ms as f64).abs() > 0.1;
        if delta.abs() > 1000 || relative {
            stage_diffs.push(StageDiff {
                stage: head_stage.name.clone(),
                base_duration_ms: base_stage.duration_ms,
                head_duration_ms: head_stage.duration_ms,
                delta_ms: delta,
                base_result: base_stage.result.clone(),
                head_result: head_stage.result.clone(),
            });
        }
    }

    let removed_stages = base
        .stages
        .iter()
        .filter(|s| !head_names.contains(&s.name.as_str()))
        .map(|s| s.name.clone())
        .collect();

    StageComparison {
        stage_diffs,
        duration_delta_ms: head.total_duration_ms - base.total_duration_ms,
        new_stages,
        removed_stages,
        available: true,
    }
}

/// Client for `/blue/rest/organizations/jenkins/...`.
#[derive(Clone)]
pub struct BlueOceanClient {
    api: Arc<dyn JenkinsApi>,
}

impl BlueOceanClient {
    pub fn new(api: Arc<dyn JenkinsApi>) -> Self {
        Self { api }
    }

    /// The job name is one segment, folders encoded as `%2F`.
    fn run_path(job: &str, build: u64, suffix: &[&str]) -> Vec<String> {
        let mut path = segments(&["blue", "rest", "organizations", "jenkins", "pipelines"]);
        path.push(job.to_string());
        path.push("runs".into());
        path.push(build.to_string());
        path.extend(suffix.iter().map(|s| s.to_string()));
        path
    }

    async fn list(&self, path: Vec<String>, what: &str) -> Lookup<Vec<Value>> {
        match self.api.get_json(&path, &[]).await {
            Ok(Value::Array(items)) if !items.is_empty() => Lookup::Found(items),
            Ok(_) => Lookup::Empty,
            Err(e) => {
                warn!(error = %e, "Blue Ocean {} not available", what);
                Lookup::Unavailable(e)
            }
        }
    }

    pub async fn get_pipeline_nodes(&self, job: &str, build: u64) -> Lookup<Vec<Value>> {
        self.list(Self::run_path(job, build, &["nodes"]), "nodes").await
    }

    pub async fn get_node_steps(&self, job: &str, build: u64, node_id: &str) -> Lookup<Vec<Value>> {
        self.list(Self::run_path(job, build, &["nodes", node_id, "steps"]), "steps")
            .await
    }

    pub async fn get_pipeline_graph(&self, job: &str, build: u64) -> Lookup<PipelineGraph> {
        self.get_pipeline_nodes(job, build)
            .await
            .map(|nodes| build_graph(&nodes))
    }

    /// Failing, aborted and unstable stages with up to five failing steps each.
    pub async fn get_failing_stages_detailed(&self, job: &str, build: u64) -> Lookup<Vec<FailingStage>> {
        let nodes = match self.get_pipeline_nodes(job, build).await {
            Lookup::Found(nodes) => nodes,
            Lookup::Empty => return Lookup::Empty,
            Lookup::Unavailable(e) => return Lookup::Unavailable(e),
        };

        let mut failing = Vec::new();
        for node in &nodes {
            let result = node.get("result").and_then(Value::as_str).unwrap_or_default();
            if !FAILING_RESULTS.contains(&result) {
                continue;
            }

            let node_id = node.get("id").and_then(Value::as_str).unwrap_or_default();
            let steps: Vec<StepSummary> = self
                .get_node_steps(job, build, node_id)
                .await
                .unwrap_or_default()
                .iter()
                .filter(|s| {
                    let r = s.get("result").and_then(Value::as_str).unwrap_or_default();
                    FAILING_STEP_RESULTS.contains(&r)
                })
                .take(FAILING_STEPS_CAP)
                .map(|s| StepSummary {
                    name: s
                        .get("displayName")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown")
                        .to_string(),
                    result: s
                        .get("result")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect();

            failing.push(FailingStage {
                name: node
                    .get("displayName")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown")
                    .to_string(),
                result: result.to_string(),
                duration_ms: node.get("durationInMillis").and_then(Value::as_i64).unwrap_or(0),
                error: node
                    .get("causeOfBlockage")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                failing_steps: (!steps.is_empty()).then_some(steps),
            });
        }
        Lookup::Found(failing)
    }

    /// Stage-level comparison; `available: false` when either run has no
    /// Blue Ocean data source.
    pub async fn compare_pipeline_runs(&self, job: &str, base: u64, head: u64) -> StageComparison {
        let base_graph = self.get_pipeline_graph(job, base).await;
        let head_graph = self.get_pipeline_graph(job, head).await;

        if base_graph.is_unavailable() || head_graph.is_unavailable() {
            return StageComparison::default();
        }
        diff_stages(&base_graph.unwrap_or_default(), &head_graph.unwrap_or_default())
    }
}
