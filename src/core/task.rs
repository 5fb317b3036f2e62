//! Task and step domain model

use crate::core::params::{Param, ParamSpec, Replacements};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scripts starting with this prefix must run on a Windows node
pub const WINDOWS_SHEBANG: &str = "#!win";

/// What the entrypoint does when a step exits non-zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnError {
    /// Record the failure and keep running later steps
    Continue,
    /// Fail the step and stop the sequence
    StopAndFail,
}

impl OnError {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnError::Continue => "continue",
            OnError::StopAndFail => "stopAndFail",
        }
    }
}

/// A plain `name=value` environment variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// A single container step of a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Step name, may be empty
    #[serde(default)]
    pub name: String,

    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Inline script; replaces `command` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
}

impl Step {
    /// Script body when one is set and not blank
    pub fn script_body(&self) -> Option<&str> {
        self.script.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn is_windows_script(&self) -> bool {
        self.script_body()
            .map(|s| s.trim_start().starts_with(WINDOWS_SHEBANG))
            .unwrap_or(false)
    }

    /// Name used for this step in run status, `unnamed-<i>` when empty
    pub fn status_name(&self, index: usize) -> String {
        if self.name.is_empty() {
            format!("unnamed-{}", index)
        } else {
            self.name.clone()
        }
    }

    fn substitute(&self, r: &Replacements) -> Step {
        Step {
            name: self.name.clone(),
            image: r.apply(&self.image),
            command: r.apply_list(&self.command),
            args: r.apply_list(&self.args),
            script: self.script.as_deref().map(|s| r.apply(s)),
            working_dir: self.working_dir.as_deref().map(|s| r.apply(s)),
            env: self
                .env
                .iter()
                .map(|e| EnvVar {
                    name: e.name.clone(),
                    value: r.apply(&e.value),
                })
                .collect(),
            timeout: self.timeout,
            on_error: self.on_error,
        }
    }
}

/// Sidecars share the step shape but are not wrapped by the entrypoint
pub type Sidecar = Step;

/// A result a task promises to produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The body of a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamSpec>,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sidecars: Vec<Sidecar>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<TaskResult>,
}

impl TaskSpec {
    /// Copy of this spec with params substituted into steps and sidecars
    pub fn substitute(&self, r: &Replacements) -> TaskSpec {
        TaskSpec {
            description: self.description.clone(),
            params: self.params.clone(),
            steps: self.steps.iter().map(|s| s.substitute(r)).collect(),
            sidecars: self.sidecars.iter().map(|s| s.substitute(r)).collect(),
            results: self.results.clone(),
        }
    }

    pub fn result_names(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.name.as_str()).collect()
    }
}

/// Reference to a task defined elsewhere
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Set only for custom tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// Guard expression on a pipeline task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhenExpression {
    pub input: String,
    pub operator: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// A task as placed in a pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTask {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_after: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ref: Option<TaskRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_spec: Option<TaskSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,

    #[serde(default)]
    pub retries: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<WhenExpression>,
}

/// A pipeline task with its spec resolved and params applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTask {
    pub name: String,
    pub run_after: Vec<String>,
    pub spec: TaskSpec,
}

impl ResolvedTask {
    pub fn new(name: impl Into<String>, spec: TaskSpec) -> Self {
        Self {
            name: name.into(),
            run_after: Vec::new(),
            spec,
        }
    }

    pub fn after(mut self, predecessor: impl Into<String>) -> Self {
        self.run_after.push(predecessor.into());
        self
    }

    /// Predecessor once the task list has been sequenced
    pub fn predecessor(&self) -> Option<&str> {
        self.run_after.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::ParamValue;

    #[test]
    fn test_step_from_yaml() {
        let yaml = r#"
name: build
image: golang:1.22
script: |
  go build ./...
timeout: 90s
onError: continue
env:
  - name: GOFLAGS
    value: -mod=vendor
"#;
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.name, "build");
        assert_eq!(step.timeout, Some(Duration::from_secs(90)));
        assert_eq!(step.on_error, Some(OnError::Continue));
        assert_eq!(step.script_body(), Some("go build ./...\n"));
        assert!(!step.is_windows_script());
    }

    #[test]
    fn test_blank_script_is_ignored() {
        let step = Step {
            image: "busybox".to_string(),
            script: Some("  \n".to_string()),
            ..Default::default()
        };
        assert_eq!(step.script_body(), None);
    }

    #[test]
    fn test_windows_script_detection_trims_leading_space() {
        let step = Step {
            image: "mcr.microsoft.com/powershell".to_string(),
            script: Some("\n  #!win pwsh -File\nWrite-Host hi".to_string()),
            ..Default::default()
        };
        assert!(step.is_windows_script());
    }

    #[test]
    fn test_status_name_for_unnamed_step() {
        let step = Step::default();
        assert_eq!(step.status_name(2), "unnamed-2");
    }

    #[test]
    fn test_substitute_touches_every_field() {
        let mut r = Replacements::new();
        r.set("v", &ParamValue::from("1.2"));
        r.set(
            "extra",
            &ParamValue::Array(vec!["-a".to_string(), "-b".to_string()]),
        );

        let spec = TaskSpec {
            steps: vec![Step {
                name: "s".to_string(),
                image: "img:$(params.v)".to_string(),
                command: vec!["run".to_string()],
                args: vec!["$(params.extra)".to_string()],
                script: None,
                working_dir: Some("/src/$(params.v)".to_string()),
                env: vec![EnvVar {
                    name: "V".to_string(),
                    value: "$(params['v'])".to_string(),
                }],
                timeout: None,
                on_error: None,
            }],
            ..Default::default()
        };

        let step = &spec.substitute(&r).steps[0];
        assert_eq!(step.image, "img:1.2");
        assert_eq!(step.args, vec!["-a".to_string(), "-b".to_string()]);
        assert_eq!(step.working_dir.as_deref(), Some("/src/1.2"));
        assert_eq!(step.env[0].value, "1.2");
    }
}
