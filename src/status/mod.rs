//! Status aggregation
//!
//! Folds the observed state of a pod back into the run status: a coarse
//! condition from the pod phase, then per-task conditions from each step's
//! container state, then the pipeline rollup.

pub mod termination;

pub use termination::{StatusErrors, TerminationError};

use crate::compiler::names::is_step_container;
use crate::core::{
    state::{ChildStatus, ConditionStatus, PipelineRunStatus, StepState},
    task::ResolvedTask,
};
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::HashMap;
use tracing::{error, info, warn};

pub const REASON_RUNNING: &str = "Running";
pub const REASON_SUCCEEDED: &str = "Succeeded";
pub const REASON_FAILED: &str = "Failed";
pub const REASON_PENDING: &str = "Pending";
pub const REASON_POD_PENDING: &str = "PodPending";
pub const REASON_EXCEEDED_NODE_RESOURCES: &str = "ExceededNodeResources";
pub const REASON_CREATE_CONTAINER_CONFIG_ERROR: &str = "CreateContainerConfigError";

const OOM_KILLED: &str = "OOMKilled";

/// Container statuses in the order their containers are declared; statuses
/// for undeclared containers follow in their original order
pub fn sort_container_statuses(statuses: &[ContainerStatus], containers: &[Container]) -> Vec<ContainerStatus> {
    let by_name: HashMap<&str, &ContainerStatus> = statuses.iter().map(|s| (s.name.as_str(), s)).collect();
    let mut sorted: Vec<ContainerStatus> = containers
        .iter()
        .filter_map(|c| by_name.get(c.name.as_str()).map(|s| (*s).clone()))
        .collect();
    sorted.extend(
        statuses
            .iter()
            .filter(|s| !containers.iter().any(|c| c.name == s.name))
            .cloned(),
    );
    sorted
}

/// Create one child status per task, each step keyed by its status name.
/// Existing child statuses are left alone.
pub fn init_child_statuses(status: &mut PipelineRunStatus, tasks: &[ResolvedTask]) -> bool {
    if !status.child_statuses.is_empty() {
        return false;
    }
    let names = crate::compiler::names::container_names(tasks);
    status.child_statuses = tasks
        .iter()
        .map(|task| ChildStatus {
            pipeline_task_name: task.name.clone(),
            condition: None,
            step_statuses: names
                .get(&task.name)
                .map(|steps| {
                    steps
                        .iter()
                        .map(|(step, container)| StepState {
                            name: step.clone(),
                            container_name: Some(container.clone()),
                            ..Default::default()
                        })
                        .collect()
                })
                .unwrap_or_default(),
            task_results: Vec::new(),
        })
        .collect();
    true
}

/// Whether every non-step container is running and ready, or has terminated
pub fn sidecars_ready(pod: &Pod) -> bool {
    let Some(status) = &pod.status else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .container_statuses
        .iter()
        .flatten()
        .filter(|s| !is_step_container(&s.name))
        .all(|s| {
            let state = s.state.as_ref();
            let running = state.map(|st| st.running.is_some()).unwrap_or(false);
            let terminated = state.map(|st| st.terminated.is_some()).unwrap_or(false);
            (running && s.ready) || terminated
        })
}

/// Fold `pod` into `status`. Termination payload errors are collected and
/// returned together after every task has been processed.
pub fn make_pipeline_run_status(
    status: &mut PipelineRunStatus,
    pod: &Pod,
    tasks: &[ResolvedTask],
) -> Result<(), StatusErrors> {
    let pod_name = pod.metadata.name.clone().unwrap_or_default();
    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("");
    info!(pod = %pod_name, phase, "aggregating pod status");

    status.mark_running(REASON_RUNNING, "Not all Tasks in the Pipeline have finished executing");
    status.pod_name = Some(pod_name);

    let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or(&[]);
    let container_statuses = sort_container_statuses(
        pod.status
            .as_ref()
            .and_then(|s| s.container_statuses.as_deref())
            .unwrap_or(&[]),
        containers,
    );

    match phase {
        "Succeeded" => {
            status.mark_succeeded(REASON_SUCCEEDED, "All Tasks have completed executing");
        }
        "Failed" => {
            status.mark_failed(REASON_FAILED, &failure_message(pod, &container_statuses));
        }
        "Running" => {
            status.mark_running(REASON_POD_PENDING, "pod pending");
        }
        "Pending" => {
            if exceeds_node_resources(pod) {
                status.mark_running(REASON_EXCEEDED_NODE_RESOURCES, "TaskRun Pod exceeded available resources");
            } else if hit_config_error(&container_statuses) {
                status.mark_running(
                    REASON_CREATE_CONTAINER_CONFIG_ERROR,
                    "Failed to create pod due to config error",
                );
            } else {
                let message = waiting_message(pod, &container_statuses);
                info!(detail = %message, "pod pending");
                status.mark_running(REASON_PENDING, &message);
            }
        }
        _ => {}
    }

    let by_name: HashMap<&str, &ContainerStatus> =
        container_statuses.iter().map(|s| (s.name.as_str(), s)).collect();
    let mut errors = Vec::new();
    for child in status.child_statuses.iter_mut() {
        let declared: Vec<&str> = tasks
            .iter()
            .find(|t| t.name == child.pipeline_task_name)
            .map(|t| t.spec.result_names())
            .unwrap_or_default();
        update_child_status(child, &by_name, &declared, &mut errors);
    }

    rollup(status, phase);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(StatusErrors(errors))
    }
}

fn update_child_status(
    child: &mut ChildStatus,
    statuses: &HashMap<&str, &ContainerStatus>,
    declared: &[&str],
    errors: &mut Vec<TerminationError>,
) {
    let mut results = Vec::new();
    for step in child.step_statuses.iter_mut() {
        let Some(observed) = step.container_name.as_deref().and_then(|n| statuses.get(n)) else {
            continue;
        };
        let mut state = observed.state.clone().unwrap_or_default();

        if let Some(terminated) = state.terminated.as_mut() {
            let message = terminated.message.clone().unwrap_or_default();
            if !message.is_empty() {
                match termination::parse_message(&message) {
                    Err(e) => {
                        error!(task = %child.pipeline_task_name, step = %step.name, error = %e, "unreadable termination message");
                        errors.push(e);
                    }
                    Ok(entries) => {
                        match termination::started_at(&entries) {
                            Ok(Some(at)) => terminated.started_at = Some(Time(at)),
                            Ok(None) => {}
                            Err(e) => {
                                error!(task = %child.pipeline_task_name, step = %step.name, error = %e, "bad start time");
                                errors.push(e);
                            }
                        }
                        match termination::exit_code(&entries) {
                            Ok(Some(code)) => terminated.exit_code = code,
                            Ok(None) => {}
                            Err(e) => {
                                error!(task = %child.pipeline_task_name, step = %step.name, error = %e, "bad exit code");
                                errors.push(e);
                            }
                        }

                        let (task_results, kept) = termination::split_entries(entries);
                        results.extend(task_results.into_iter().filter(|r| declared.contains(&r.name.as_str())));
                        match termination::encode_message(&kept) {
                            Ok(encoded) => terminated.message = Some(encoded),
                            Err(e) => errors.push(e),
                        }
                    }
                }
            }
        }

        step.state = Some(state);
        step.image_id = Some(observed.image_id.clone());
    }

    let mut all_results = std::mem::take(&mut child.task_results);
    all_results.extend(results);
    child.task_results = termination::dedup_results(all_results);

    let (status, reason, message) = task_condition(&child.step_statuses);
    child.set_condition(status, reason, &message);
}

/// Condition of a task derived from its step states
pub fn task_condition(steps: &[StepState]) -> (ConditionStatus, &'static str, String) {
    let pending: Vec<&str> = steps
        .iter()
        .filter(|s| !s.is_terminated())
        .map(|s| s.name.as_str())
        .collect();
    if !pending.is_empty() {
        return (ConditionStatus::Unknown, REASON_PENDING, format!("pending: {}", pending.join(", ")));
    }

    let failed: Vec<&str> = steps
        .iter()
        .filter(|s| s.has_failed())
        .map(|s| s.name.as_str())
        .collect();
    if !failed.is_empty() {
        return (ConditionStatus::False, REASON_FAILED, format!("failed: {}", failed.join(", ")));
    }

    (ConditionStatus::True, REASON_SUCCEEDED, "All Steps have completed executing".to_string())
}

/// Roll task conditions up into the run condition. While the pod is still
/// Pending the phase-derived reason is kept, it says more than "Pending".
fn rollup(status: &mut PipelineRunStatus, phase: &str) {
    if status.child_statuses.is_empty() {
        warn!("no task statuses to roll up");
        return;
    }
    let conditions: Vec<ConditionStatus> = status
        .child_statuses
        .iter()
        .map(|c| c.condition.as_ref().map(|c| c.status).unwrap_or(ConditionStatus::Unknown))
        .collect();

    if conditions.contains(&ConditionStatus::Unknown) {
        info!("not all tasks have completed");
        if phase != "Pending" {
            status.mark_running(REASON_PENDING, "Pending");
        }
    } else if conditions.iter().all(|c| *c == ConditionStatus::True) {
        info!("all tasks have completed");
        status.mark_succeeded(REASON_SUCCEEDED, "All Tasks have completed executing");
    } else {
        info!("at least one task has failed");
        status.mark_failed(REASON_FAILED, "At least one Task has failed");
    }
}

/// Most specific explanation for a failed pod
pub fn failure_message(pod: &Pod, statuses: &[ContainerStatus]) -> String {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or("");
    let pod_name = pod.metadata.name.as_deref().unwrap_or("");
    let terminated = || {
        statuses
            .iter()
            .filter_map(|s| s.state.as_ref()?.terminated.as_ref().map(|t| (s, t)))
    };

    for (status, state) in terminated() {
        let timed_out = state
            .message
            .as_deref()
            .and_then(|m| termination::parse_message(m).ok())
            .map(|entries| termination::timed_out(&entries))
            .unwrap_or(false);
        if timed_out {
            return format!(
                "{:?} exited because the step exceeded the specified timeout limit; for logs run: kubectl -n {} logs {} -c {}\n",
                status.name, namespace, pod_name, status.name
            );
        }
    }

    for (status, state) in terminated() {
        if state.exit_code != 0 {
            return format!(
                "{:?} exited with code {} (image: {:?}); for logs run: kubectl -n {} logs {} -c {}\n",
                status.name, state.exit_code, status.image_id, namespace, pod_name, status.name
            );
        }
    }

    let pod_status = pod.status.as_ref();
    if let Some(message) = pod_status.and_then(|s| s.message.as_deref()).filter(|m| !m.is_empty()) {
        return message.to_string();
    }
    if terminated().any(|(_, t)| t.reason.as_deref() == Some(OOM_KILLED)) {
        return OOM_KILLED.to_string();
    }
    "build failed for unspecified reasons.".to_string()
}

fn exceeds_node_resources(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.reason.as_deref() == Some("Unschedulable")
                    && c.message.as_deref().map(|m| m.contains("Insufficient")).unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

fn hit_config_error(statuses: &[ContainerStatus]) -> bool {
    statuses.iter().any(|s| {
        s.state
            .as_ref()
            .and_then(|st| st.waiting.as_ref())
            .and_then(|w| w.reason.as_deref())
            == Some(REASON_CREATE_CONTAINER_CONFIG_ERROR)
    })
}

/// Best available explanation for why a pod is still pending
pub fn waiting_message(pod: &Pod, statuses: &[ContainerStatus]) -> String {
    for status in statuses {
        let message = status
            .state
            .as_ref()
            .and_then(|st| st.waiting.as_ref())
            .and_then(|w| w.message.as_deref())
            .filter(|m| !m.is_empty());
        if let Some(message) = message {
            return format!("build step {:?} is pending with reason {:?}", status.name, message);
        }
    }

    let pod_status = pod.status.as_ref();
    let pending_condition = pod_status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.status != "True"));
    if let Some(condition) = pending_condition {
        return format!(
            "pod status {:?}:{:?}; message: {:?}",
            condition.type_,
            condition.status,
            condition.message.as_deref().unwrap_or("")
        );
    }

    if let Some(message) = pod_status.and_then(|s| s.message.as_deref()).filter(|m| !m.is_empty()) {
        return message.to_string();
    }
    REASON_PENDING.to_string()
}
