//! Entrypoint wrapping: every step runs through the injected entrypoint
//! binary, which waits on the previous step's post file before starting.

use crate::compiler::scripts::TaskContainers;
use crate::core::error::CompileError;
use k8s_openapi::api::core::v1::{
    Container, DownwardAPIVolumeFile, DownwardAPIVolumeSource, EmptyDirVolumeSource,
    ObjectFieldSelector, Volume, VolumeMount,
};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub const BIN_VOLUME_NAME: &str = "tekton-internal-bin";
pub const BIN_DIR: &str = "/tekton/bin";
pub const ENTRYPOINT_BINARY: &str = "/tekton/bin/entrypoint";

pub const RUN_VOLUME_NAME: &str = "tekton-internal-run";
pub const RUN_DIR: &str = "/tekton/run";

pub const DOWNWARD_VOLUME_NAME: &str = "tekton-internal-downward";
pub const DOWNWARD_MOUNT_POINT: &str = "/tekton/downward";
pub const DOWNWARD_READY_FILE: &str = "ready";

pub const TERMINATION_PATH: &str = "/tekton/termination";
pub const STEP_METADATA_DIR: &str = "/tekton/steps";

/// Annotation the downward volume projects into the ready file
pub const READY_ANNOTATION: &str = "tekton.dev/ready";
pub const READY_ANNOTATION_VALUE: &str = "READY";

pub fn bin_mount(read_only: bool) -> VolumeMount {
    VolumeMount {
        name: BIN_VOLUME_NAME.to_string(),
        mount_path: BIN_DIR.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

pub fn downward_mount() -> VolumeMount {
    VolumeMount {
        name: DOWNWARD_VOLUME_NAME.to_string(),
        mount_path: DOWNWARD_MOUNT_POINT.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

/// Projects the ready annotation into `/tekton/downward/ready`
pub fn downward_volume() -> Volume {
    Volume {
        name: DOWNWARD_VOLUME_NAME.to_string(),
        downward_api: Some(DownwardAPIVolumeSource {
            items: Some(vec![DownwardAPIVolumeFile {
                path: DOWNWARD_READY_FILE.to_string(),
                field_ref: Some(ObjectFieldSelector {
                    field_path: format!("metadata.annotations['{}']", READY_ANNOTATION),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn ready_file() -> String {
    format!("{}/{}", DOWNWARD_MOUNT_POINT, DOWNWARD_READY_FILE)
}

fn run_volume_name(task: &str, step: usize) -> String {
    format!("{}-{}-{}", RUN_VOLUME_NAME, task, step)
}

fn run_dir(task: &str, step: usize) -> String {
    format!("{}/{}/{}", RUN_DIR, task, step)
}

/// File the entrypoint writes once step `step` of `task` has finished
pub fn post_file(task: &str, step: usize) -> String {
    format!("{}/out", run_dir(task, step))
}

fn run_mount(task: &str, step: usize, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: run_volume_name(task, step),
        mount_path: run_dir(task, step),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

fn run_volume(task: &str, step: usize) -> Volume {
    Volume {
        name: run_volume_name(task, step),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

/// JSON patch that flips the ready annotation and releases the first step
pub fn ready_patch() -> serde_json::Value {
    json!([{
        "op": "replace",
        "path": format!("/metadata/annotations/{}", READY_ANNOTATION.replace('/', "~1")),
        "value": READY_ANNOTATION_VALUE,
    }])
}

/// Render a duration the way the entrypoint parses it: `1h2m3s`, `1m0s`, `500ms`
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000_000_000 {
        let (scale, unit) = if nanos < 1_000 {
            (1, "ns")
        } else if nanos < 1_000_000 {
            (1_000, "µs")
        } else {
            (1_000_000, "ms")
        };
        return format!("{}{}", fraction(nanos, scale), unit);
    }

    let secs = d.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    let seconds = u128::from(seconds) * 1_000_000_000 + u128::from(d.subsec_nanos());
    out.push_str(&format!("{}s", fraction(seconds, 1_000_000_000)));
    out
}

/// `value / scale` with trailing zeros trimmed from the fractional part
fn fraction(value: u128, scale: u128) -> String {
    let whole = value / scale;
    let rem = value % scale;
    if rem == 0 {
        return whole.to_string();
    }
    let width = scale.to_string().len() - 1;
    let digits = format!("{:0width$}", rem, width = width);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Run-wide switches that change entrypoint flags
#[derive(Debug, Clone, Copy, Default)]
pub struct EntrypointOptions {
    pub breakpoint_on_failure: bool,
}

/// Step containers wrapped by the entrypoint, plus their run volumes
#[derive(Debug, Clone, Default)]
pub struct WrappedSteps {
    pub containers: Vec<Container>,
    pub volumes: Vec<Volume>,
}

/// Wrap every step of the sequenced tasks. The first task is the root and
/// its first step waits on the ready file; every later step waits on the
/// post file of the step before it.
pub fn wrap_steps(
    tasks: &[TaskContainers<'_>],
    options: &EntrypointOptions,
) -> Result<WrappedSteps, CompileError> {
    let mut wrapped = WrappedSteps::default();

    for (position, current) in tasks.iter().enumerate() {
        let task = current.task;
        if current.steps.is_empty() {
            return Err(CompileError::NoStepsSpecified {
                task: task.name.clone(),
            });
        }

        let predecessor = match task.predecessor() {
            None => None,
            Some(name) => {
                let found = tasks[..position]
                    .iter()
                    .find(|t| t.task.name == name)
                    .ok_or_else(|| CompileError::DanglingPredecessor {
                        task: task.name.clone(),
                        predecessor: name.to_string(),
                    })?;
                Some((name, found.steps.len()))
            }
        };
        let is_root = position == 0 && predecessor.is_none();
        let results = task.spec.result_names().join(",");

        for (i, container) in current.steps.iter().enumerate() {
            let step = &task.spec.steps[i];
            let mut container = container.clone();

            let wait_file = match (i, predecessor) {
                (0, None) => ready_file(),
                (0, Some((before, count))) => post_file(before, count - 1),
                _ => post_file(&task.name, i - 1),
            };

            let mut args = vec![
                "-wait_file".to_string(),
                wait_file,
                "-post_file".to_string(),
                post_file(&task.name, i),
                "-termination_path".to_string(),
                TERMINATION_PATH.to_string(),
                "-step_metadata_dir".to_string(),
                step_metadata_dir(&container.name),
            ];
            if i == 0 && is_root {
                args.push("-wait_file_content".to_string());
            }
            if let Some(timeout) = step.timeout {
                args.push("-timeout".to_string());
                args.push(format_duration(timeout));
            }
            if let Some(on_error) = step.on_error {
                args.push("-on_error".to_string());
                args.push(on_error.as_str().to_string());
            }
            if !results.is_empty() {
                args.push("-results".to_string());
                args.push(results.clone());
            }
            if options.breakpoint_on_failure {
                args.push("-breakpoint_on_failure".to_string());
            }

            let mut command = container.command.take().unwrap_or_default().into_iter();
            if let Some(entrypoint) = command.next() {
                args.push("-entrypoint".to_string());
                args.push(entrypoint);
            }
            args.push("--".to_string());
            args.extend(command);
            args.extend(container.args.take().unwrap_or_default());

            container.command = Some(vec![ENTRYPOINT_BINARY.to_string()]);
            container.args = Some(args);
            container.termination_message_path = Some(TERMINATION_PATH.to_string());

            let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
            if i == 0 && is_root {
                mounts.push(downward_mount());
            }
            for j in 0..current.steps.len() {
                mounts.push(run_mount(&task.name, j, j != i));
            }
            if let Some((before, count)) = predecessor {
                mounts.push(run_mount(before, count - 1, true));
            }

            wrapped.containers.push(container);
            wrapped.volumes.push(run_volume(&task.name, i));
        }
        debug!(task = %task.name, steps = current.steps.len(), "wrapped task steps");
    }
    Ok(wrapped)
}

fn step_metadata_dir(container_name: &str) -> String {
    if container_name.is_empty() {
        STEP_METADATA_DIR.to_string()
    } else {
        format!("{}/{}", STEP_METADATA_DIR, container_name)
    }
}
