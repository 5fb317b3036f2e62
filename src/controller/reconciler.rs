//! Single reconciliation pass for a colocated pipeline run

use crate::compiler::{
    entrypoint::{format_duration, ready_patch},
    names::NameGenerator,
    pod::PodCompiler,
};
use crate::controller::client::{is_ready, ClientError, PodClient};
use crate::core::{
    catalog::{resolve_pipeline, resolve_tasks, SpecProvider},
    config::CompilerConfig,
    error::CompileError,
    pipeline::PipelineRun,
    state::StepState,
    task::ResolvedTask,
};
use crate::status::{init_child_statuses, make_pipeline_run_status, sidecars_ready, task_condition, StatusErrors};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ContainerState, ContainerStateTerminated, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Reason recorded when a run outlives its timeout
pub const REASON_TIMED_OUT: &str = "PipelineRunTimeout";

/// Errors from one reconciliation pass
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("pipeline could not be compiled: {0}")]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Status(#[from] StatusErrors),
}

impl ReconcileError {
    /// Permanent errors will not go away by running the pass again
    pub fn is_permanent(&self) -> bool {
        match self {
            ReconcileError::Compile(e) => e.is_permanent(),
            ReconcileError::Client(_) | ReconcileError::Status(_) => false,
        }
    }
}

/// Drives a run one step closer to its desired state
pub struct Reconciler<C, P, N> {
    client: C,
    provider: P,
    config: CompilerConfig,
    names: N,
}

impl<C, P, N> Reconciler<C, P, N>
where
    C: PodClient,
    P: SpecProvider + Send + Sync,
    N: NameGenerator + Send + Sync,
{
    pub fn new(client: C, provider: P, config: CompilerConfig, names: N) -> Self {
        Self {
            client,
            provider,
            config,
            names,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Run one pass over `run`, updating its status in place
    pub async fn reconcile(&self, run: &mut PipelineRun) -> Result<(), ReconcileError> {
        if run.status.is_done() {
            debug!(run = %run.name, "run already finished");
            return Ok(());
        }
        if run.uid.is_none() {
            run.uid = Some(Uuid::new_v4().to_string());
        }
        if run.status.start_time.is_none() {
            run.status.start_time = Some(Utc::now());
        }

        if run.has_timed_out(self.config.default_timeout, Utc::now()) {
            return self.fail_timed_out(run).await;
        }

        let tasks = match self.resolve(run) {
            Ok(tasks) => tasks,
            Err(e) => return Err(fail_permanently(run, e)),
        };
        if init_child_statuses(&mut run.status, &tasks) {
            debug!(run = %run.name, tasks = tasks.len(), "initialised task statuses");
        }

        let existing = self.client.find_pod(&run.namespace, &run.name).await?;
        let mut pod = match existing {
            Some(pod) => pod,
            None => self.create_pod(run, &tasks).await?,
        };

        if sidecars_ready(&pod) && !is_ready(&pod) {
            let name = pod.metadata.name.clone().unwrap_or_default();
            pod = self.client.patch_ready(&run.namespace, &name, &ready_patch()).await?;
            info!(run = %run.name, pod = %name, "marked pod ready");
        }

        make_pipeline_run_status(&mut run.status, &pod, &tasks)?;
        Ok(())
    }

    fn resolve(&self, run: &PipelineRun) -> Result<Vec<ResolvedTask>, CompileError> {
        let pipeline = resolve_pipeline(run, &self.provider)?;
        resolve_tasks(run, &pipeline, &self.provider)
    }

    async fn create_pod(&self, run: &mut PipelineRun, tasks: &[ResolvedTask]) -> Result<Pod, ReconcileError> {
        let compiled = match PodCompiler::new(&self.config, &self.names).compile(run, tasks) {
            Ok(compiled) => compiled,
            Err(e) => return Err(fail_permanently(run, e)),
        };
        info!(
            run = %run.name,
            pod = %compiled.pod.metadata.name.as_deref().unwrap_or(""),
            "creating pod"
        );
        Ok(self.client.create_pod(compiled.pod).await?)
    }

    async fn fail_timed_out(&self, run: &mut PipelineRun) -> Result<(), ReconcileError> {
        let timeout: Duration = run.pipeline_timeout(self.config.default_timeout);
        let message = format!(
            "PipelineRun {:?} failed to finish within {:?}",
            run.name,
            format_duration(timeout)
        );
        warn!(run = %run.name, "{}", message);

        if let Some(pod) = self.client.find_pod(&run.namespace, &run.name).await? {
            if let Some(name) = pod.metadata.name.as_deref() {
                match self.client.delete_pod(&run.namespace, name).await {
                    Ok(()) | Err(ClientError::NotFound { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        run.status.mark_failed(REASON_TIMED_OUT, &message);
        let finished = run.status.completion_time.unwrap_or_else(Utc::now);
        for child in run.status.child_statuses.iter_mut() {
            for step in child.step_statuses.iter_mut() {
                terminate_step(step, finished);
            }
            let (status, reason, message) = task_condition(&child.step_statuses);
            child.set_condition(status, reason, &message);
        }
        Ok(())
    }
}

fn fail_permanently(run: &mut PipelineRun, err: CompileError) -> ReconcileError {
    error!(run = %run.name, error = %err, "run failed permanently");
    run.status.mark_failed(err.reason(), &err.to_string());
    ReconcileError::Compile(err)
}

/// Mark a step that never finished as terminated with exit code 1
fn terminate_step(step: &mut StepState, finished: DateTime<Utc>) {
    if step.is_terminated() {
        return;
    }
    let started_at = step
        .state
        .as_ref()
        .and_then(|s| s.running.as_ref())
        .and_then(|r| r.started_at.clone());
    step.state = Some(ContainerState {
        terminated: Some(ContainerStateTerminated {
            exit_code: 1,
            reason: Some(REASON_TIMED_OUT.to_string()),
            started_at,
            finished_at: Some(Time(finished)),
            ..Default::default()
        }),
        ..Default::default()
    });
}
