//! CLI command definitions

use clap::Args;

/// Compile a pipeline run into a pod
#[derive(Debug, Args, Clone)]
pub struct CompileCommand {
    /// Path to the pipeline run YAML file
    #[arg(short, long)]
    pub run: String,

    /// Catalog of referenced tasks and pipelines
    #[arg(long)]
    pub catalog: Option<String>,

    /// Compiler configuration (images, default timeout)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Resolve and sequence a pipeline run
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the pipeline run YAML file
    #[arg(short, long)]
    pub run: String,

    /// Catalog of referenced tasks and pipelines
    #[arg(long)]
    pub catalog: Option<String>,
}

/// Aggregate an observed pod into a run status
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Path to the pipeline run YAML file
    #[arg(short, long)]
    pub run: String,

    /// Observed pod, as JSON or YAML
    #[arg(short, long)]
    pub pod: String,

    /// Catalog of referenced tasks and pipelines
    #[arg(long)]
    pub catalog: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
