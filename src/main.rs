use anyhow::{Context, Result};
use colocated_pipeline::cli::commands::{CompileCommand, StatusCommand, ValidateCommand};
use colocated_pipeline::cli::output::*;
use colocated_pipeline::cli::{Cli, Command};
use colocated_pipeline::core::{
    catalog::{resolve_pipeline, resolve_tasks, Catalog},
    config::CompilerConfig,
    pipeline::{sequence_tasks, PipelineRun},
    task::ResolvedTask,
};
use colocated_pipeline::compiler::{PodCompiler, RandomNames};
use colocated_pipeline::status::{init_child_statuses, make_pipeline_run_status};
use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use tracing::{debug, error, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Compile(cmd) => compile_run(cmd)?,
        Command::Validate(cmd) => validate_run(cmd)?,
        Command::Status(cmd) => show_status(cmd)?,
    }

    Ok(())
}

fn load_catalog(path: Option<&str>) -> Result<Catalog> {
    match path {
        Some(path) => Catalog::from_file(path).context("Failed to load catalog"),
        None => Ok(Catalog::new()),
    }
}

fn load_config(path: Option<&str>) -> Result<CompilerConfig> {
    match path {
        Some(path) => CompilerConfig::from_file(path).context("Failed to load compiler config"),
        None => Ok(CompilerConfig::default()),
    }
}

/// Load a run and resolve its tasks; compile errors exit with status 1
fn load_tasks(run_path: &str, catalog: Option<&str>) -> Result<(PipelineRun, Vec<ResolvedTask>)> {
    let run = PipelineRun::from_file(run_path).context("Failed to load pipeline run")?;
    let catalog = load_catalog(catalog)?;

    let resolved = resolve_pipeline(&run, &catalog).and_then(|pipeline| resolve_tasks(&run, &pipeline, &catalog));
    match resolved {
        Ok(tasks) => Ok((run, tasks)),
        Err(e) => {
            println!("{} {} cannot be compiled:", CROSS, style(&run.name).bold());
            println!("  {} {}", style(e.reason()).red(), e);
            std::process::exit(1);
        }
    }
}

fn print_document<T: Serialize>(value: &T, json: bool) -> Result<()> {
    let rendered = if json {
        serde_json::to_string_pretty(value)?
    } else {
        serde_yaml::to_string(value)?
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

fn compile_run(cmd: &CompileCommand) -> Result<()> {
    let config = load_config(cmd.config.as_deref())?;
    let (run, tasks) = load_tasks(&cmd.run, cmd.catalog.as_deref())?;

    match PodCompiler::new(&config, &RandomNames).compile(&run, &tasks) {
        Ok(compiled) => {
            let containers = compiled.pod.spec.as_ref().map(|s| s.containers.len()).unwrap_or(0);
            debug!(run = %run.name, containers, "compiled pod");
            eprintln!(
                "{} Compiled {} into {} containers",
                ROCKET,
                style(&run.name).bold(),
                style(containers).cyan()
            );
            print_document(&compiled.pod, cmd.json)
        }
        Err(e) => {
            error!("{}", e);
            println!("{} {} {}", CROSS, style(&run.name).bold(), style("failed to compile").red());
            std::process::exit(1);
        }
    }
}

fn validate_run(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline run...", INFO);
    let (run, tasks) = load_tasks(&cmd.run, cmd.catalog.as_deref())?;

    match sequence_tasks(&tasks) {
        Ok(order) => {
            println!("{} Pipeline run is valid!", CHECK);
            println!("  Name: {}", style(&run.name).bold());
            println!("  Namespace: {}", style(&run.namespace).cyan());
            println!("  Tasks:");
            for (position, &i) in order.iter().enumerate() {
                let task = &tasks[i];
                println!(
                    "    {}. {} ({} steps, {} sidecars)",
                    position + 1,
                    style(&task.name).cyan(),
                    task.spec.steps.len(),
                    task.spec.sidecars.len()
                );
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

fn show_status(cmd: &StatusCommand) -> Result<()> {
    let (mut run, tasks) = load_tasks(&cmd.run, cmd.catalog.as_deref())?;
    let contents = std::fs::read_to_string(&cmd.pod)
        .with_context(|| format!("Failed to read pod file: {}", cmd.pod))?;
    let pod: Pod = serde_yaml::from_str(&contents).context("Failed to parse pod")?;

    init_child_statuses(&mut run.status, &tasks);
    if let Err(errors) = make_pipeline_run_status(&mut run.status, &pod, &tasks) {
        for e in &errors.0 {
            eprintln!("{} {}", WARN, style(e).yellow());
        }
    }

    if cmd.json {
        return print_document(&run.status, true);
    }

    println!("{}", format_run_status(&run.name, &run.status));
    for child in &run.status.child_statuses {
        println!("{}", format_child_status(child));
    }
    Ok(())
}
