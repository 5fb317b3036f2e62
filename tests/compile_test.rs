//! End-to-end compilation: YAML run in, pod out

mod helpers;

use colocated_pipeline::compiler::{PodCompiler, SequentialNames, READY_ANNOTATION, RUN_LABEL};
use colocated_pipeline::core::{
    catalog::{resolve_pipeline, resolve_tasks, Catalog},
    config::CompilerConfig,
    error::CompileError,
};
use helpers::*;

#[test]
fn test_nightly_pod_layout() {
    let run = run(NIGHTLY_RUN);
    let tasks = resolve(&run, &Catalog::new());
    let compiled = compile(&run, &tasks);
    let pod = &compiled.pod;

    assert_eq!(pod.metadata.name.as_deref(), Some("nightly-pod"));
    assert_eq!(pod.metadata.namespace.as_deref(), Some("ci"));

    let labels = pod.metadata.labels.as_ref().unwrap();
    assert_eq!(labels.get(RUN_LABEL).map(String::as_str), Some("nightly"));
    assert_eq!(labels.get("team").map(String::as_str), Some("platform"));
    let annotations = pod.metadata.annotations.as_ref().unwrap();
    assert_eq!(annotations.get(READY_ANNOTATION).map(String::as_str), Some(""));

    assert_eq!(
        container_names(pod),
        vec![
            "task-build-step-fetch",
            "task-build-step-compile",
            "task-test-step-unit",
            "sidecar-build-redis",
        ]
    );

    let spec = pod.spec.as_ref().unwrap();
    assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
    assert_eq!(spec.service_account_name.as_deref(), Some("builder"));
    assert_eq!(spec.active_deadline_seconds, Some(7200));
    let init: Vec<&str> = spec
        .init_containers
        .iter()
        .flatten()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(init, vec!["place-tools", "place-scripts"]);

    let steps = compiled.container_names.get("build").unwrap();
    assert_eq!(
        steps[1],
        ("compile".to_string(), "task-build-step-compile".to_string())
    );
}

#[test]
fn test_wait_chain_crosses_tasks() {
    let run = run(NIGHTLY_RUN);
    let tasks = resolve(&run, &Catalog::new());
    let compiled = compile(&run, &tasks);

    let fetch = args(container(&compiled.pod, "task-build-step-fetch"));
    assert_eq!(flag(&fetch, "-wait_file"), Some("/tekton/downward/ready"));
    assert_eq!(flag(&fetch, "-post_file"), Some("/tekton/run/build/0/out"));
    assert!(fetch.contains(&"-wait_file_content"));
    assert!(flag(&fetch, "-entrypoint").unwrap().starts_with("/tekton/scripts/script-0-"));

    let compile_step = args(container(&compiled.pod, "task-build-step-compile"));
    assert_eq!(flag(&compile_step, "-wait_file"), Some("/tekton/run/build/0/out"));
    assert_eq!(flag(&compile_step, "-timeout"), Some("1m30s"));
    assert_eq!(flag(&compile_step, "-results"), Some("digest"));
    assert!(!compile_step.contains(&"-wait_file_content"));
    assert_eq!(&compile_step[compile_step.len() - 3..], &["make", "--", "all"]);

    let unit = args(container(&compiled.pod, "task-test-step-unit"));
    assert_eq!(flag(&unit, "-wait_file"), Some("/tekton/run/build/1/out"));
    assert_eq!(flag(&unit, "-post_file"), Some("/tekton/run/test/0/out"));
    assert_eq!(flag(&unit, "-on_error"), Some("continue"));
    assert_eq!(flag(&unit, "-results"), None);
    assert_eq!(&unit[unit.len() - 3..], &["--", "test", "./..."]);
}

#[test]
fn test_sidecars_are_not_wrapped() {
    let run = run(NIGHTLY_RUN);
    let tasks = resolve(&run, &Catalog::new());
    let compiled = compile(&run, &tasks);

    let redis = container(&compiled.pod, "sidecar-build-redis");
    assert_eq!(redis.image.as_deref(), Some("redis"));
    assert!(redis.args.is_none());
}

#[test]
fn test_script_receives_substituted_params() {
    let run = run(NIGHTLY_RUN);
    let tasks = resolve(&run, &Catalog::new());

    let build = tasks.iter().find(|t| t.name == "build").unwrap();
    assert_eq!(
        build.spec.steps[0].script.as_deref(),
        Some("echo \"hi from build\"\n")
    );
    assert_eq!(build.spec.steps[1].args, vec!["all"]);
}

#[test]
fn test_compilation_is_repeatable() {
    let run = run(NIGHTLY_RUN);
    let tasks = resolve(&run, &Catalog::new());

    let first = compile(&run, &tasks);
    let second = compile(&run, &tasks);
    for (a, b) in first
        .pod
        .spec
        .as_ref()
        .unwrap()
        .containers
        .iter()
        .zip(second.pod.spec.as_ref().unwrap().containers.iter())
    {
        assert_eq!(a.args, b.args);
    }
}

#[test]
fn test_breakpoint_on_failure_flag() {
    let yaml = r#"
name: debug-me
spec:
  debug:
    breakpoint: [onFailure]
  pipelineSpec:
    tasks:
      - name: only
        taskSpec:
          steps:
            - image: busybox
              command: ["false"]
"#;
    let run = run(yaml);
    let tasks = resolve(&run, &Catalog::new());
    let compiled = compile(&run, &tasks);

    let step = args(container(&compiled.pod, "task-only-step-unnamed-0"));
    assert!(step.contains(&"-breakpoint_on_failure"));
}

#[test]
fn test_references_resolve_through_catalog() {
    let catalog = Catalog::from_yaml(
        r#"
tasks:
  echo:
    params:
      - name: word
        default: hello
    steps:
      - name: say
        image: busybox
        command: ["echo", "$(params.word)"]
pipelines:
  greet:
    tasks:
      - name: first
        taskRef:
          name: echo
      - name: second
        runAfter: [first]
        taskRef:
          name: echo
        params:
          - name: word
            value: bye
"#,
    )
    .unwrap();
    let run = run("name: greeting\nspec:\n  pipelineRef:\n    name: greet\n");
    let tasks = resolve(&run, &catalog);
    let compiled = compile(&run, &tasks);

    let first = args(container(&compiled.pod, "task-first-step-say"));
    let second = args(container(&compiled.pod, "task-second-step-say"));
    assert_eq!(&first[first.len() - 2..], &["--", "hello"]);
    assert_eq!(&second[second.len() - 2..], &["--", "bye"]);
    assert_eq!(flag(&second, "-wait_file"), Some("/tekton/run/first/0/out"));
}

#[test]
fn test_fan_in_is_rejected() {
    let yaml = r#"
name: diamond
spec:
  pipelineSpec:
    tasks:
      - name: a
        taskSpec:
          steps: [{image: busybox, command: ["true"]}]
      - name: b
        runAfter: [a]
        taskSpec:
          steps: [{image: busybox, command: ["true"]}]
      - name: c
        runAfter: [a, b]
        taskSpec:
          steps: [{image: busybox, command: ["true"]}]
"#;
    let run = run(yaml);
    let tasks = resolve(&run, &Catalog::new());
    let config = CompilerConfig::default();
    let names = SequentialNames::new();

    let err = PodCompiler::new(&config, &names).compile(&run, &tasks).unwrap_err();
    assert_eq!(
        err,
        CompileError::UnsupportedFanIn {
            task: "c".to_string(),
            count: 2
        }
    );
    assert!(err.is_permanent());
}

#[test]
fn test_unsupported_features_are_rejected() {
    let yaml = r#"
name: retrying
spec:
  pipelineSpec:
    tasks:
      - name: flaky
        retries: 3
        taskSpec:
          steps: [{image: busybox, command: ["true"]}]
"#;
    let run = run(yaml);
    let pipeline = resolve_pipeline(&run, &Catalog::new()).unwrap();
    let err = resolve_tasks(&run, &pipeline, &Catalog::new()).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedFeature { ref task, .. } if task == "flaky"));
}

#[test]
fn test_missing_run_params() {
    let yaml = r#"
name: needs-input
spec:
  pipelineSpec:
    params:
      - name: revision
      - name: repo
    tasks:
      - name: only
        taskSpec:
          steps: [{image: busybox, command: ["true"]}]
"#;
    let run = run(yaml);
    let pipeline = resolve_pipeline(&run, &Catalog::new()).unwrap();
    let err = resolve_tasks(&run, &pipeline, &Catalog::new()).unwrap_err();
    assert_eq!(err.reason(), "ParameterMissing");
    assert!(matches!(err, CompileError::MissingParams(ref names) if names.len() == 2));
}
