//! Pipeline domain model and task sequencing

use crate::core::{
    error::CompileError,
    params::{Param, ParamSpec},
    state::PipelineRunStatus,
    task::{PipelineTask, ResolvedTask},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

/// Debug value that turns on the entrypoint's breakpoint-on-failure mode
pub const BREAKPOINT_ON_FAILURE: &str = "onFailure";

/// A sequence of tasks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamSpec>,

    #[serde(default)]
    pub tasks: Vec<PipelineTask>,
}

impl PipelineSpec {
    /// Check task names and reject features a single pod cannot express
    pub fn validate(&self) -> Result<(), CompileError> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !is_dns1123_label(&task.name) {
                return Err(CompileError::InvalidName {
                    kind: "task",
                    name: task.name.clone(),
                });
            }
            if !seen.insert(task.name.as_str()) {
                return Err(CompileError::DuplicateTask(task.name.clone()));
            }
            if task.retries > 0 {
                return Err(unsupported(task, "retries"));
            }
            if !task.when.is_empty() {
                return Err(unsupported(task, "when expressions"));
            }
            if task
                .task_ref
                .as_ref()
                .map(|r| r.api_version.is_some())
                .unwrap_or(false)
            {
                return Err(unsupported(task, "custom tasks"));
            }
        }
        Ok(())
    }
}

fn unsupported(task: &PipelineTask, feature: &str) -> CompileError {
    CompileError::UnsupportedFeature {
        task: task.name.clone(),
        feature: feature.to_string(),
    }
}

/// Lowercase alphanumerics and '-', at most 63 chars, alphanumeric at both ends
pub fn is_dns1123_label(name: &str) -> bool {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    let re = LABEL.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("static regex is valid")
    });
    name.len() <= 63 && re.is_match(name)
}

/// Reference to a named pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRef {
    pub name: String,
}

/// Debug switches for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugConfig {
    #[serde(default)]
    pub breakpoint: Vec<String>,
}

/// The desired state of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_ref: Option<PipelineRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_spec: Option<PipelineSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugConfig>,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// A colocated pipeline run: one execution of a pipeline inside one pod
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub spec: PipelineRunSpec,

    #[serde(default)]
    pub status: PipelineRunStatus,
}

impl PipelineRun {
    /// Load a run from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read run file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse a run from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let run: PipelineRun = serde_yaml::from_str(yaml).context("failed to parse pipeline run")?;
        if run.name.is_empty() {
            anyhow::bail!("pipeline run has no name");
        }
        Ok(run)
    }

    /// The run's own timeout, falling back to `default`
    pub fn pipeline_timeout(&self, default: Duration) -> Duration {
        self.spec.timeout.unwrap_or(default)
    }

    /// Whether the run has been going for longer than its timeout.
    /// A zero timeout never expires.
    pub fn has_timed_out(&self, default: Duration, now: DateTime<Utc>) -> bool {
        let timeout = self.pipeline_timeout(default);
        if timeout.is_zero() {
            return false;
        }
        let Some(start) = self.status.start_time else {
            return false;
        };
        match (now - start).to_std() {
            Ok(elapsed) => elapsed >= timeout,
            Err(_) => false,
        }
    }

    pub fn breakpoint_on_failure(&self) -> bool {
        self.spec
            .debug
            .as_ref()
            .map(|d| d.breakpoint.iter().any(|b| b == BREAKPOINT_ON_FAILURE))
            .unwrap_or(false)
    }
}

/// Anything with a name and at most one predecessor
pub trait Sequenced {
    fn name(&self) -> &str;
    fn run_after(&self) -> &[String];
}

impl Sequenced for PipelineTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_after(&self) -> &[String] {
        &self.run_after
    }
}

impl Sequenced for ResolvedTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_after(&self) -> &[String] {
        &self.run_after
    }
}

/// Order tasks into a single chain, returning indices into `tasks`.
///
/// Exactly one task may lack a predecessor, no task may have more than one,
/// and every task must be reachable from the root.
pub fn sequence_tasks<T: Sequenced>(tasks: &[T]) -> Result<Vec<usize>, CompileError> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());
    for (i, task) in tasks.iter().enumerate() {
        if index.insert(task.name(), i).is_some() {
            return Err(CompileError::DuplicateTask(task.name().to_string()));
        }
    }

    let mut next: Vec<Option<usize>> = vec![None; tasks.len()];
    let mut root: Option<usize> = None;

    for (i, task) in tasks.iter().enumerate() {
        match task.run_after() {
            [] => {
                if let Some(first) = root {
                    return Err(CompileError::UnsupportedParallelRoots {
                        first: tasks[first].name().to_string(),
                        second: task.name().to_string(),
                    });
                }
                root = Some(i);
            }
            [predecessor] => {
                let Some(&before) = index.get(predecessor.as_str()) else {
                    return Err(CompileError::DanglingPredecessor {
                        task: task.name().to_string(),
                        predecessor: predecessor.clone(),
                    });
                };
                // two tasks after the same predecessor leave one unreachable
                next[before] = Some(i);
            }
            many => {
                return Err(CompileError::UnsupportedFanIn {
                    task: task.name().to_string(),
                    count: many.len(),
                });
            }
        }
    }

    let mut cursor = root.ok_or(CompileError::NoRoot)?;
    let mut order = Vec::with_capacity(tasks.len());
    loop {
        order.push(cursor);
        match next[cursor] {
            Some(n) if order.len() < tasks.len() => cursor = n,
            _ => break,
        }
    }

    if order.len() < tasks.len() {
        return Err(CompileError::DisconnectedGraph {
            after: tasks[cursor].name().to_string(),
        });
    }
    Ok(order)
}
