//! Resolution of referenced tasks and pipelines

use crate::core::{
    error::CompileError,
    params::{missing_params, Param, Replacements},
    pipeline::{PipelineRun, PipelineSpec},
    task::{ResolvedTask, TaskSpec},
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Looks up task and pipeline definitions by reference name
pub trait SpecProvider {
    fn task(&self, name: &str) -> Result<TaskSpec, CompileError>;
    fn pipeline(&self, name: &str) -> Result<PipelineSpec, CompileError>;
}

/// Named tasks and pipelines loaded from YAML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskSpec>,

    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineSpec>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(yaml).context("failed to parse catalog")
    }

    pub fn with_task(mut self, name: impl Into<String>, spec: TaskSpec) -> Self {
        self.tasks.insert(name.into(), spec);
        self
    }

    pub fn with_pipeline(mut self, name: impl Into<String>, spec: PipelineSpec) -> Self {
        self.pipelines.insert(name.into(), spec);
        self
    }
}

impl SpecProvider for Catalog {
    fn task(&self, name: &str) -> Result<TaskSpec, CompileError> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::TaskResolution {
                task: name.to_string(),
                reason: format!("task {} not found", name),
            })
    }

    fn pipeline(&self, name: &str) -> Result<PipelineSpec, CompileError> {
        self.pipelines
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::PipelineResolution(format!("pipeline {} not found", name)))
    }
}

/// The run's embedded pipeline spec, or the one it references
pub fn resolve_pipeline<P: SpecProvider + ?Sized>(
    run: &PipelineRun,
    provider: &P,
) -> Result<PipelineSpec, CompileError> {
    if let Some(spec) = &run.spec.pipeline_spec {
        return Ok(spec.clone());
    }
    match &run.spec.pipeline_ref {
        Some(reference) => provider.pipeline(&reference.name),
        None => Err(CompileError::PipelineResolution(format!(
            "run {} has neither pipelineRef nor pipelineSpec",
            run.name
        ))),
    }
}

/// Validate the pipeline, apply params at both levels and resolve each
/// pipeline task into its final spec. Declaration order is kept.
pub fn resolve_tasks<P: SpecProvider + ?Sized>(
    run: &PipelineRun,
    pipeline: &PipelineSpec,
    provider: &P,
) -> Result<Vec<ResolvedTask>, CompileError> {
    pipeline.validate()?;

    let missing = missing_params(&pipeline.params, &run.spec.params);
    if !missing.is_empty() {
        return Err(CompileError::MissingParams(missing));
    }
    let pipeline_params = Replacements::from_params(&pipeline.params, &run.spec.params);

    let mut resolved = Vec::with_capacity(pipeline.tasks.len());
    for task in &pipeline.tasks {
        let spec = match (&task.task_spec, &task.task_ref) {
            (Some(spec), _) => spec.clone(),
            (None, Some(reference)) => provider.task(&reference.name).map_err(|e| match e {
                CompileError::TaskResolution { reason, .. } => CompileError::TaskResolution {
                    task: task.name.clone(),
                    reason,
                },
                other => other,
            })?,
            (None, None) => {
                return Err(CompileError::TaskResolution {
                    task: task.name.clone(),
                    reason: "neither taskRef nor taskSpec given".to_string(),
                })
            }
        };

        let params: Vec<_> = task
            .params
            .iter()
            .map(|p| Param {
                name: p.name.clone(),
                value: pipeline_params.apply_value(&p.value),
            })
            .collect();
        let task_params = Replacements::from_params(&spec.params, &params);
        debug!(task = %task.name, params = params.len(), "resolved task spec");

        resolved.push(ResolvedTask {
            name: task.name.clone(),
            run_after: task.run_after.clone(),
            spec: spec.substitute(&task_params),
        });
    }
    Ok(resolved)
}
