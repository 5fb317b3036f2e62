//! Shared fixtures for the integration tests

#![allow(dead_code)]

use colocated_pipeline::compiler::{CompiledPod, PodCompiler, SequentialNames};
use colocated_pipeline::core::{
    catalog::{resolve_pipeline, resolve_tasks, Catalog},
    config::CompilerConfig,
    pipeline::PipelineRun,
    task::ResolvedTask,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting,
    ContainerStatus, Pod, PodStatus,
};

/// Two tasks, `build` (script step + command step, one result, a sidecar)
/// then `test`, with a greeting parameter
pub const NIGHTLY_RUN: &str = r#"
name: nightly
namespace: ci
labels:
  team: platform
spec:
  serviceAccountName: builder
  timeout: 1h
  params:
    - name: greeting
      value: hi
  pipelineSpec:
    params:
      - name: greeting
      - name: target
        default: all
    tasks:
      - name: build
        params:
          - name: message
            value: "$(params.greeting) from build"
          - name: target
            value: "$(params.target)"
        taskSpec:
          params:
            - name: message
            - name: target
          results:
            - name: digest
          steps:
            - name: fetch
              image: alpine
              script: |
                echo "$(params.message)"
            - name: compile
              image: golang
              command: ["make"]
              args: ["$(params.target)"]
              timeout: 90s
          sidecars:
            - name: redis
              image: redis
      - name: test
        runAfter: [build]
        taskSpec:
          steps:
            - name: unit
              image: golang
              command: ["go", "test", "./..."]
              onError: continue
"#;

pub fn run(yaml: &str) -> PipelineRun {
    PipelineRun::from_yaml(yaml).unwrap()
}

pub fn resolve(run: &PipelineRun, catalog: &Catalog) -> Vec<ResolvedTask> {
    let pipeline = resolve_pipeline(run, catalog).unwrap();
    resolve_tasks(run, &pipeline, catalog).unwrap()
}

pub fn compile(run: &PipelineRun, tasks: &[ResolvedTask]) -> CompiledPod {
    let config = CompilerConfig::default();
    let names = SequentialNames::new();
    PodCompiler::new(&config, &names).compile(run, tasks).unwrap()
}

pub fn container<'a>(pod: &'a Pod, name: &str) -> &'a Container {
    pod.spec
        .as_ref()
        .unwrap()
        .containers
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("no container named {}", name))
}

pub fn container_names(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .unwrap()
        .containers
        .iter()
        .map(|c| c.name.clone())
        .collect()
}

pub fn args(container: &Container) -> Vec<&str> {
    container.args.iter().flatten().map(String::as_str).collect()
}

/// The value following `flag` in `args`
pub fn flag<'a>(args: &[&'a str], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| *a == flag)
        .and_then(|i| args.get(i + 1).copied())
}

pub fn terminated(name: &str, exit_code: i32, message: Option<&str>) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        image_id: format!("docker-pullable://{}@sha256:0", name),
        state: Some(ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code,
                message: message.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn running(name: &str, ready: bool) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        ready,
        state: Some(ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn waiting(name: &str, reason: &str, message: &str) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        state: Some(ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                message: Some(message.to_string()),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pod_status(phase: &str, statuses: Vec<ContainerStatus>) -> PodStatus {
    PodStatus {
        phase: Some(phase.to_string()),
        container_statuses: Some(statuses),
        ..Default::default()
    }
}

/// `pod` with `status` attached
pub fn observed(mut pod: Pod, status: PodStatus) -> Pod {
    pod.status = Some(status);
    pod
}
