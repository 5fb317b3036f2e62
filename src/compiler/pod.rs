//! Pod assembly: one pod per run, with every task's steps chained inside it

use crate::compiler::{
    entrypoint::{bin_mount, downward_volume, wrap_steps, EntrypointOptions, BIN_VOLUME_NAME, ENTRYPOINT_BINARY,
        READY_ANNOTATION},
    names::{child_name, container_names, sidecar_container_name, step_container_name, ContainerNames, NameGenerator},
    scripts::{lower_scripts, TaskContainers, SCRIPTS_VOLUME_NAME},
};
use crate::core::{
    config::CompilerConfig,
    error::CompileError,
    pipeline::{sequence_tasks, PipelineRun},
    task::ResolvedTask,
};
use k8s_openapi::api::core::v1::{Container, EmptyDirVolumeSource, Pod, PodSpec, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Label tying a pod back to the run that owns it
pub const RUN_LABEL: &str = "tekton.dev/colocatedPipelineRun";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "tekton-pipelines";
pub const MEMBER_OF_LABEL: &str = "tekton.dev/memberOf";
pub const MEMBER_OF_VALUE: &str = "pipelines";

pub const OWNER_API_VERSION: &str = "tekton.dev/v1alpha1";
pub const OWNER_KIND: &str = "Run";

pub const PLACE_TOOLS_CONTAINER: &str = "place-tools";
const ENTRYPOINT_SOURCE: &str = "/ko-app/entrypoint";
const DEFAULT_ACTIVE_DEADLINE_SECONDS: i64 = 60 * 60;
const POD_NAME_SUFFIX: &str = "-pod";

/// Mounts every step gets unless it already mounts something at that path
const IMPLICIT_MOUNTS: [(&str, &str); 4] = [
    ("tekton-internal-workspace", "/workspace"),
    ("tekton-internal-home", "/tekton/home"),
    ("tekton-internal-results", "/tekton/results"),
    ("tekton-internal-steps", "/tekton/steps"),
];

/// Name of the pod compiled for run `run_name`
pub fn pod_name(run_name: &str) -> String {
    child_name(run_name, POD_NAME_SUFFIX)
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

/// A compiled pod and the step-to-container mapping for each task
#[derive(Debug, Clone)]
pub struct CompiledPod {
    pub pod: Pod,
    pub container_names: ContainerNames,
}

/// Compiles resolved task lists into pods
pub struct PodCompiler<'a, N: ?Sized> {
    config: &'a CompilerConfig,
    names: &'a N,
}

impl<'a, N: NameGenerator + ?Sized> PodCompiler<'a, N> {
    pub fn new(config: &'a CompilerConfig, names: &'a N) -> Self {
        Self { config, names }
    }

    /// Build the pod for `run` from its resolved tasks
    pub fn compile(&self, run: &PipelineRun, tasks: &[ResolvedTask]) -> Result<CompiledPod, CompileError> {
        info!(run = %run.name, tasks = tasks.len(), "compiling pod");
        check_steps(tasks)?;

        let order = sequence_tasks(tasks)?;
        let ordered: Vec<&ResolvedTask> = order.iter().map(|&i| &tasks[i]).collect();

        let mut lowered = lower_scripts(&self.config.images, &ordered, self.names)?;
        for current in lowered.tasks.iter_mut() {
            let task = current.task;
            for (i, container) in current.steps.iter_mut().enumerate() {
                container.name = step_container_name(&task.name, &task.spec.steps[i].name, i);
            }
            for (i, sidecar) in current.sidecars.iter_mut().enumerate() {
                sidecar.name = sidecar_container_name(&task.name, &task.spec.sidecars[i].name, i);
            }
        }

        check_unique_containers(&lowered.tasks)?;

        let options = EntrypointOptions {
            breakpoint_on_failure: run.breakpoint_on_failure(),
        };
        let wrapped = wrap_steps(&lowered.tasks, &options)?;

        let mut containers: Vec<Container> = wrapped
            .containers
            .into_iter()
            .map(with_implicit_mounts)
            .collect();
        containers.extend(lowered.tasks.iter().flat_map(|t| t.sidecars.iter().cloned()));

        let mut init_containers = vec![self.place_tools_container()];
        let mut volumes: Vec<Volume> = IMPLICIT_MOUNTS.iter().map(|(name, _)| empty_dir(name)).collect();
        if let Some(place_scripts) = lowered.init_container.take() {
            init_containers.push(place_scripts);
            volumes.push(empty_dir(SCRIPTS_VOLUME_NAME));
        }
        volumes.push(empty_dir(BIN_VOLUME_NAME));
        volumes.push(downward_volume());
        volumes.extend(wrapped.volumes);

        debug!(
            run = %run.name,
            containers = containers.len(),
            init_containers = init_containers.len(),
            windows = lowered.windows,
            "assembled pod"
        );

        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(pod_name(&run.name)),
                namespace: Some(run.namespace.clone()),
                labels: Some(pod_labels(run)),
                annotations: Some(pod_annotations(run)),
                owner_references: Some(vec![owner_reference(run)]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                service_account_name: run.spec.service_account_name.clone(),
                active_deadline_seconds: active_deadline_seconds(run),
                init_containers: Some(init_containers),
                containers,
                volumes: Some(volumes),
                ..Default::default()
            }),
            status: None,
        };

        Ok(CompiledPod {
            pod,
            container_names: container_names(tasks),
        })
    }

    fn place_tools_container(&self) -> Container {
        Container {
            name: PLACE_TOOLS_CONTAINER.to_string(),
            image: Some(self.config.images.entrypoint_image.clone()),
            working_dir: Some("/".to_string()),
            command: Some(vec![
                ENTRYPOINT_SOURCE.to_string(),
                "cp".to_string(),
                ENTRYPOINT_SOURCE.to_string(),
                ENTRYPOINT_BINARY.to_string(),
            ]),
            volume_mounts: Some(vec![bin_mount(false)]),
            ..Default::default()
        }
    }
}

/// Every task needs uniquely named steps, and every step a command or script
fn check_steps(tasks: &[ResolvedTask]) -> Result<(), CompileError> {
    for task in tasks {
        if task.spec.steps.is_empty() {
            return Err(CompileError::NoStepsSpecified {
                task: task.name.clone(),
            });
        }
        let mut names = HashSet::new();
        for (i, step) in task.spec.steps.iter().enumerate() {
            if !names.insert(step.status_name(i)) {
                return Err(CompileError::DuplicateStep {
                    task: task.name.clone(),
                    name: step.status_name(i),
                });
            }
            if step.command.is_empty() && step.script_body().is_none() {
                return Err(CompileError::MissingCommand {
                    task: task.name.clone(),
                    step: i,
                });
            }
        }
    }
    Ok(())
}

/// Container names must not repeat anywhere in the pod
fn check_unique_containers(tasks: &[TaskContainers<'_>]) -> Result<(), CompileError> {
    let mut seen = HashSet::new();
    for current in tasks {
        for container in current.steps.iter().chain(current.sidecars.iter()) {
            if !seen.insert(container.name.as_str()) {
                return Err(CompileError::DuplicateStep {
                    task: current.task.name.clone(),
                    name: container.name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn with_implicit_mounts(mut container: Container) -> Container {
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    let mut implicit = vec![bin_mount(true)];
    implicit.extend(IMPLICIT_MOUNTS.iter().map(|(name, path)| VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }));

    let requested: Vec<String> = mounts.iter().map(|m| clean_path(&m.mount_path)).collect();
    for mount in implicit {
        if !requested.contains(&clean_path(&mount.mount_path)) {
            mounts.push(mount);
        }
    }
    container
}

fn clean_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn pod_labels(run: &PipelineRun) -> BTreeMap<String, String> {
    let mut labels = run.labels.clone();
    labels.insert(RUN_LABEL.to_string(), run.name.clone());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(MEMBER_OF_LABEL.to_string(), MEMBER_OF_VALUE.to_string());
    labels
}

fn pod_annotations(run: &PipelineRun) -> BTreeMap<String, String> {
    let mut annotations = run.annotations.clone();
    annotations.insert(READY_ANNOTATION.to_string(), String::new());
    annotations
}

fn owner_reference(run: &PipelineRun) -> OwnerReference {
    OwnerReference {
        api_version: OWNER_API_VERSION.to_string(),
        kind: OWNER_KIND.to_string(),
        name: run.name.clone(),
        uid: run.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Twice the run timeout, an hour when unset; a zero timeout means no deadline
fn active_deadline_seconds(run: &PipelineRun) -> Option<i64> {
    match run.spec.timeout {
        None => Some(DEFAULT_ACTIVE_DEADLINE_SECONDS),
        Some(timeout) if timeout.is_zero() => None,
        Some(timeout) => Some(i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX / 2).saturating_mul(2)),
    }
}
