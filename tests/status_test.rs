//! Status aggregation over compiled pods

mod helpers;

use colocated_pipeline::core::{catalog::Catalog, state::ConditionStatus};
use colocated_pipeline::status::{init_child_statuses, make_pipeline_run_status};
use helpers::*;

const DIGEST: &str = r#"[{"key":"digest","value":"sha256:abc","type":1},{"key":"undeclared","value":"x","type":1}]"#;
const STARTED: &str = r#"[{"key":"StartedAt","value":"2022-02-03T04:05:06.789+00:00","type":3}]"#;

#[test]
fn test_succeeded_pod_with_results() {
    let mut run = run(NIGHTLY_RUN);
    let tasks = resolve(&run, &Catalog::new());
    let compiled = compile(&run, &tasks);
    assert!(init_child_statuses(&mut run.status, &tasks));

    let pod = observed(
        compiled.pod,
        pod_status(
            "Succeeded",
            vec![
                terminated("sidecar-build-redis", 0, None),
                terminated("task-test-step-unit", 0, None),
                terminated("task-build-step-compile", 0, Some(DIGEST)),
                terminated("task-build-step-fetch", 0, Some(STARTED)),
            ],
        ),
    );

    make_pipeline_run_status(&mut run.status, &pod, &tasks).unwrap();

    let condition = run.status.condition.clone().unwrap();
    assert!(condition.is_true());
    assert_eq!(condition.reason, "Succeeded");
    assert_eq!(run.status.pod_name.as_deref(), Some("nightly-pod"));
    let completed = run.status.completion_time.unwrap();

    let build = run.status.child("build").unwrap();
    assert!(build.condition.as_ref().unwrap().is_true());
    assert_eq!(build.task_results.len(), 1);
    assert_eq!(build.task_results[0].name, "digest");
    assert_eq!(build.task_results[0].value, "sha256:abc");

    let fetch = build.step("fetch").unwrap();
    let fetch_state = fetch.state.as_ref().unwrap().terminated.as_ref().unwrap();
    assert_eq!(
        fetch_state.started_at.as_ref().unwrap().0.to_rfc3339(),
        "2022-02-03T04:05:06.789+00:00"
    );
    assert_eq!(fetch_state.message.as_deref(), Some(""));
    assert_eq!(
        fetch.image_id.as_deref(),
        Some("docker-pullable://task-build-step-fetch@sha256:0")
    );

    // a second pass over the same pod changes nothing
    make_pipeline_run_status(&mut run.status, &pod, &tasks).unwrap();
    assert_eq!(run.status.completion_time, Some(completed));
    assert_eq!(run.status.child("build").unwrap().task_results.len(), 1);
}

#[test]
fn test_failed_pod_reports_failing_step() {
    let mut run = run(NIGHTLY_RUN);
    let tasks = resolve(&run, &Catalog::new());
    let compiled = compile(&run, &tasks);
    init_child_statuses(&mut run.status, &tasks);

    let pod = observed(
        compiled.pod,
        pod_status(
            "Failed",
            vec![
                terminated("task-build-step-fetch", 0, None),
                terminated("task-build-step-compile", 0, None),
                terminated("task-test-step-unit", 1, None),
            ],
        ),
    );
    make_pipeline_run_status(&mut run.status, &pod, &tasks).unwrap();

    let condition = run.status.condition.as_ref().unwrap();
    assert!(condition.is_false());
    assert_eq!(condition.reason, "Failed");
    assert!(condition
        .message
        .starts_with("\"task-test-step-unit\" exited with code 1"));
    assert!(condition.message.contains("kubectl -n ci logs nightly-pod -c task-test-step-unit"));

    let build = run.status.child("build").unwrap().condition.as_ref().unwrap();
    let test = run.status.child("test").unwrap().condition.as_ref().unwrap();
    assert!(build.is_true());
    assert!(test.is_false());
    assert_eq!(test.message, "failed: unit");
}

#[test]
fn test_unfinished_task_keeps_run_unknown() {
    let mut run = run(NIGHTLY_RUN);
    let tasks = resolve(&run, &Catalog::new());
    let compiled = compile(&run, &tasks);
    init_child_statuses(&mut run.status, &tasks);

    let exit_three = r#"[{"key":"ExitCode","value":"3","type":3}]"#;
    let pod = observed(
        compiled.pod,
        pod_status(
            "Running",
            vec![
                terminated("task-build-step-fetch", 0, Some(exit_three)),
                terminated("task-build-step-compile", 0, None),
                running("task-test-step-unit", true),
            ],
        ),
    );
    make_pipeline_run_status(&mut run.status, &pod, &tasks).unwrap();

    let build = run.status.child("build").unwrap();
    let fetch = build.step("fetch").unwrap();
    assert_eq!(fetch.state.as_ref().unwrap().terminated.as_ref().unwrap().exit_code, 3);
    assert!(build.condition.as_ref().unwrap().is_false());

    let test = run.status.child("test").unwrap().condition.as_ref().unwrap();
    assert_eq!(test.status, ConditionStatus::Unknown);
    assert_eq!(test.message, "pending: unit");

    let condition = run.status.condition.as_ref().unwrap();
    assert!(condition.is_unknown());
    assert!(run.status.completion_time.is_none());
}

#[test]
fn test_unreadable_payload_is_collected() {
    let mut run = run(NIGHTLY_RUN);
    let tasks = resolve(&run, &Catalog::new());
    let compiled = compile(&run, &tasks);
    init_child_statuses(&mut run.status, &tasks);

    let pod = observed(
        compiled.pod,
        pod_status(
            "Succeeded",
            vec![
                terminated("task-build-step-fetch", 0, Some("not json")),
                terminated("task-build-step-compile", 0, Some(r#"[{"key":"ExitCode","value":"zero","type":3}]"#)),
                terminated("task-test-step-unit", 0, None),
            ],
        ),
    );

    let errors = make_pipeline_run_status(&mut run.status, &pod, &tasks).unwrap_err();
    assert_eq!(errors.0.len(), 2);
    assert!(run.status.condition.as_ref().unwrap().is_true());
    assert!(run
        .status
        .child_statuses
        .iter()
        .all(|c| c.condition.as_ref().unwrap().is_true()));
}

#[test]
fn test_pending_pod_explains_itself() {
    let mut run = run(NIGHTLY_RUN);
    let tasks = resolve(&run, &Catalog::new());
    let compiled = compile(&run, &tasks);
    init_child_statuses(&mut run.status, &tasks);

    let pod = observed(
        compiled.pod.clone(),
        pod_status(
            "Pending",
            vec![waiting("task-build-step-fetch", "ImagePullBackOff", "Back-off pulling image")],
        ),
    );
    make_pipeline_run_status(&mut run.status, &pod, &tasks).unwrap();

    let condition = run.status.condition.as_ref().unwrap();
    assert!(condition.is_unknown());
    assert_eq!(condition.reason, "Pending");
    assert_eq!(
        condition.message,
        "build step \"task-build-step-fetch\" is pending with reason \"Back-off pulling image\""
    );

    let pod = observed(
        compiled.pod,
        pod_status(
            "Pending",
            vec![waiting("task-build-step-fetch", "CreateContainerConfigError", "secret missing")],
        ),
    );
    make_pipeline_run_status(&mut run.status, &pod, &tasks).unwrap();
    let condition = run.status.condition.as_ref().unwrap();
    assert!(condition.is_unknown());
    assert_eq!(condition.reason, "CreateContainerConfigError");
}
