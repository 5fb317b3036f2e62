//! Run status models

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ContainerState;
use serde::{Deserialize, Serialize};

/// Type of the single condition tracked on runs and tasks
pub const CONDITION_SUCCEEDED: &str = "Succeeded";

/// Tri-state condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

/// The `Succeeded` condition of a run or task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(status: ConditionStatus, reason: &str, message: &str) -> Self {
        Self {
            condition_type: CONDITION_SUCCEEDED.to_string(),
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }

    pub fn is_unknown(&self) -> bool {
        self.status == ConditionStatus::Unknown
    }

    /// True and False are final
    pub fn is_terminal(&self) -> bool {
        !self.is_unknown()
    }
}

/// Write `status/reason/message` into `slot`, keeping the transition time
/// when the status itself does not change
fn write_condition(slot: &mut Option<Condition>, status: ConditionStatus, reason: &str, message: &str) {
    match slot {
        Some(existing) if existing.status == status => {
            existing.reason = reason.to_string();
            existing.message = message.to_string();
        }
        _ => *slot = Some(Condition::new(status, reason, message)),
    }
}

/// Observed state of one step container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    /// Step name as declared, `unnamed-<i>` when empty
    pub name: String,

    /// Container the step was compiled into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ContainerState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

impl StepState {
    pub fn is_terminated(&self) -> bool {
        self.state
            .as_ref()
            .map(|s| s.terminated.is_some())
            .unwrap_or(false)
    }

    /// Terminated with a non-zero code or killed for memory
    pub fn has_failed(&self) -> bool {
        let Some(terminated) = self.state.as_ref().and_then(|s| s.terminated.as_ref()) else {
            return false;
        };
        terminated.exit_code != 0 || terminated.reason.as_deref() == Some("OOMKilled")
    }
}

/// A named task result value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub name: String,
    pub value: String,
}

/// Status of one pipeline task inside the run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildStatus {
    pub pipeline_task_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,

    #[serde(default)]
    pub step_statuses: Vec<StepState>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_results: Vec<RunResult>,
}

impl ChildStatus {
    pub fn set_condition(&mut self, status: ConditionStatus, reason: &str, message: &str) {
        write_condition(&mut self.condition, status, reason, message);
    }

    pub fn step(&self, name: &str) -> Option<&StepState> {
        self.step_statuses.iter().find(|s| s.name == name)
    }
}

/// Status of a colocated pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_statuses: Vec<ChildStatus>,
}

impl PipelineRunStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.condition
            .as_ref()
            .map(Condition::is_terminal)
            .unwrap_or(false)
    }

    /// Update the run condition. A terminal condition is never replaced;
    /// returns whether the update was applied.
    pub fn set_condition(&mut self, status: ConditionStatus, reason: &str, message: &str) -> bool {
        if self.is_done() {
            return false;
        }
        write_condition(&mut self.condition, status, reason, message);
        if status != ConditionStatus::Unknown && self.completion_time.is_none() {
            self.completion_time = Some(Utc::now());
        }
        true
    }

    pub fn mark_running(&mut self, reason: &str, message: &str) -> bool {
        self.set_condition(ConditionStatus::Unknown, reason, message)
    }

    pub fn mark_succeeded(&mut self, reason: &str, message: &str) -> bool {
        self.set_condition(ConditionStatus::True, reason, message)
    }

    pub fn mark_failed(&mut self, reason: &str, message: &str) -> bool {
        self.set_condition(ConditionStatus::False, reason, message)
    }

    pub fn reason(&self) -> Option<&str> {
        self.condition.as_ref().map(|c| c.reason.as_str())
    }

    pub fn child(&self, task: &str) -> Option<&ChildStatus> {
        self.child_statuses
            .iter()
            .find(|c| c.pipeline_task_name == task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerStateRunning, ContainerStateTerminated};

    fn terminated(exit_code: i32, reason: Option<&str>) -> StepState {
        StepState {
            name: "s".to_string(),
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    reason: reason.map(str::to_string),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_terminal_condition_is_sticky() {
        let mut status = PipelineRunStatus::new();
        assert!(status.mark_running("Running", "working"));
        assert!(status.mark_failed("Failed", "step blew up"));

        assert!(!status.mark_succeeded("Succeeded", "done"));
        assert!(!status.mark_running("Pending", "Pending"));

        let condition = status.condition.as_ref().unwrap();
        assert!(condition.is_false());
        assert_eq!(condition.message, "step blew up");
    }

    #[test]
    fn test_completion_time_only_set_once() {
        let mut status = PipelineRunStatus::new();
        let earlier = Utc::now() - chrono::Duration::hours(1);
        status.completion_time = Some(earlier);

        status.mark_succeeded("Succeeded", "done");
        assert_eq!(status.completion_time, Some(earlier));
    }

    #[test]
    fn test_transition_time_kept_for_same_status() {
        let mut status = PipelineRunStatus::new();
        status.mark_running("Running", "a");
        let first = status.condition.as_ref().unwrap().last_transition_time;

        status.mark_running("Pending", "b");
        let condition = status.condition.as_ref().unwrap();
        assert_eq!(condition.last_transition_time, first);
        assert_eq!(condition.reason, "Pending");
    }

    #[test]
    fn test_step_failure_detection() {
        assert!(!terminated(0, None).has_failed());
        assert!(terminated(2, None).has_failed());
        assert!(terminated(0, Some("OOMKilled")).has_failed());

        let running = StepState {
            state: Some(ContainerState {
                running: Some(ContainerStateRunning::default()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!running.is_terminated());
        assert!(!running.has_failed());
    }

    #[test]
    fn test_condition_status_serializes_as_words() {
        let json = serde_json::to_string(&ConditionStatus::Unknown).unwrap();
        assert_eq!(json, "\"Unknown\"");
    }
}
