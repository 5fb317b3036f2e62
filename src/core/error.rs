//! Compile-time error types

use thiserror::Error;

/// Errors raised while resolving, sequencing or compiling a pipeline.
///
/// Every variant describes a malformed or unsupported pipeline, so none of
/// them are worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("fan in not yet supported but {task} has {count} runAfter entries")]
    UnsupportedFanIn { task: String, count: usize },

    #[error("parallel tasks not yet supported but {second} and {first} are trying to run in parallel")]
    UnsupportedParallelRoots { first: String, second: String },

    #[error("invalid sequence, there was no starting task (probably a loop?)")]
    NoRoot,

    #[error("task {task} trying to run after task {predecessor} which is not present")]
    DanglingPredecessor { task: String, predecessor: String },

    #[error("sequence was not completely connected, gap after {after}")]
    DisconnectedGraph { after: String },

    #[error("no steps specified for task {task}")]
    NoStepsSpecified { task: String },

    #[error("step {step} of task {task} has neither a command nor a script")]
    MissingCommand { task: String, step: usize },

    #[error("step {step} of task {task} is not a windows script but another script in the pipeline requires windows")]
    MixedScriptPlatforms { task: String, step: usize },

    #[error("task {task} uses {feature}, which is not supported in a colocated pipeline")]
    UnsupportedFeature { task: String, feature: String },

    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("task {task} has more than one container named {name}")]
    DuplicateStep { task: String, name: String },

    #[error("invalid {kind} name '{name}': must be a lowercase RFC 1123 label")]
    InvalidName { kind: &'static str, name: String },

    #[error("pipeline run is missing required params: {}", .0.join(", "))]
    MissingParams(Vec<String>),

    #[error("couldn't resolve task for pipeline task {task}: {reason}")]
    TaskResolution { task: String, reason: String },

    #[error("couldn't resolve pipeline: {0}")]
    PipelineResolution(String),
}

impl CompileError {
    /// Compile errors always indicate a malformed spec.
    pub fn is_permanent(&self) -> bool {
        true
    }

    /// Condition reason recorded on a run that failed with this error
    pub fn reason(&self) -> &'static str {
        match self {
            CompileError::PipelineResolution(_) => "CouldntGetPipeline",
            CompileError::TaskResolution { .. } => "CouldntGetTask",
            CompileError::MissingParams(_) => "ParameterMissing",
            CompileError::InvalidName { .. }
            | CompileError::DuplicateTask(_)
            | CompileError::DuplicateStep { .. } => "RunFailedValidation",
            _ => "PodCreationFailed",
        }
    }
}
