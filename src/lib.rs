//! colocated-pipeline - runs every task of a pipeline inside a single pod

pub mod cli;
pub mod compiler;
pub mod controller;
pub mod core;
pub mod status;

// Re-export commonly used types
pub use compiler::{CompiledPod, NameGenerator, PodCompiler, RandomNames, SequentialNames};
pub use controller::{ClientError, InMemoryPodClient, PodClient, ReconcileError, Reconciler};
pub use core::{
    Catalog, CompileError, CompilerConfig, PipelineRun, PipelineRunStatus, ResolvedTask, SpecProvider,
};
pub use status::{make_pipeline_run_status, StatusErrors, TerminationError};
