//! Name generation for containers, script files and pods

use crate::core::task::ResolvedTask;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Longest name Kubernetes accepts for labels and containers
pub const MAX_NAME_LENGTH: usize = 63;
const RANDOM_SUFFIX_LENGTH: usize = 5;
const MAX_GENERATED_NAME_LENGTH: usize = MAX_NAME_LENGTH - RANDOM_SUFFIX_LENGTH - 1;

/// Prefix shared by every step container
pub const STEP_CONTAINER_PREFIX: &str = "task-";
/// Prefix shared by every sidecar container
pub const SIDECAR_CONTAINER_PREFIX: &str = "sidecar-";

/// Source of the random suffixes appended to generated names
pub trait NameGenerator {
    /// Lowercase alphanumeric suffix of five characters
    fn random_suffix(&self) -> String;

    /// `base-xxxxx`, with `base` cut so the result fits in 63 chars
    fn restrict_length_with_random_suffix(&self, base: &str) -> String {
        let base = truncate(base, MAX_GENERATED_NAME_LENGTH);
        format!("{}-{}", base, self.random_suffix())
    }
}

/// Suffixes drawn from random uuids
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomNames;

impl NameGenerator for RandomNames {
    fn random_suffix(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()[..RANDOM_SUFFIX_LENGTH].to_string()
    }
}

/// Deterministic suffixes `00000`, `00001`, ... for reproducible output
#[derive(Debug, Default)]
pub struct SequentialNames {
    next: AtomicUsize,
}

impl SequentialNames {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NameGenerator for SequentialNames {
    fn random_suffix(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{:05x}", n % 0x10_0000)
    }
}

fn truncate(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Fit `name` into 63 chars. Longer names are cut and end in `-` plus a
/// short hash of the full name, so distinct names stay distinct.
pub fn restrict_length(name: &str) -> String {
    const HASH_LENGTH: usize = 8;
    if name.len() <= MAX_NAME_LENGTH {
        return name.to_string();
    }
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    let head = truncate(name, MAX_NAME_LENGTH - HASH_LENGTH - 1).trim_end_matches('-');
    format!("{}-{}", head, &digest[..HASH_LENGTH])
}

/// `parent + suffix`, replacing the tail of `parent` with a hash when the
/// result would be longer than 63 chars
pub fn child_name(parent: &str, suffix: &str) -> String {
    const HASH_LENGTH: usize = 32;
    if parent.len() + suffix.len() <= MAX_NAME_LENGTH {
        return format!("{}{}", parent, suffix);
    }
    let digest = hex::encode(Sha256::digest(parent.as_bytes()));
    let keep = MAX_NAME_LENGTH.saturating_sub(HASH_LENGTH + suffix.len());
    format!("{}{}{}", truncate(parent, keep), &digest[..HASH_LENGTH], suffix)
}

/// `step-<name>`, or `step-unnamed-<i>` for an anonymous step
pub fn step_name(name: &str, index: usize) -> String {
    if name.is_empty() {
        format!("step-unnamed-{}", index)
    } else {
        format!("step-{}", name)
    }
}

/// Container name for step `index` of `task`
pub fn step_container_name(task: &str, name: &str, index: usize) -> String {
    restrict_length(&format!(
        "{}{}-{}",
        STEP_CONTAINER_PREFIX,
        task,
        step_name(name, index)
    ))
}

/// Container name for sidecar `index` of `task`
pub fn sidecar_container_name(task: &str, name: &str, index: usize) -> String {
    let name = if name.is_empty() {
        format!("unnamed-{}", index)
    } else {
        name.to_string()
    };
    restrict_length(&format!("{}{}-{}", SIDECAR_CONTAINER_PREFIX, task, name))
}

pub fn is_step_container(name: &str) -> bool {
    name.starts_with(STEP_CONTAINER_PREFIX)
}

/// Step status name to container name, per task
pub type ContainerNames = BTreeMap<String, Vec<(String, String)>>;

/// Container names every task's steps compile into
pub fn container_names(tasks: &[ResolvedTask]) -> ContainerNames {
    tasks
        .iter()
        .map(|task| {
            let steps = task
                .spec
                .steps
                .iter()
                .enumerate()
                .map(|(i, step)| {
                    (
                        step.status_name(i),
                        step_container_name(&task.name, &step.name, i),
                    )
                })
                .collect();
            (task.name.clone(), steps)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::{Step, TaskSpec};

    #[test]
    fn test_step_container_names() {
        assert_eq!(step_container_name("build", "compile", 0), "task-build-step-compile");
        assert_eq!(step_container_name("build", "", 3), "task-build-step-unnamed-3");
        assert_eq!(sidecar_container_name("build", "db", 0), "sidecar-build-db");
    }

    #[test]
    fn test_restrict_length_hashes_long_names() {
        let short = "task-build-step-compile";
        assert_eq!(restrict_length(short), short);

        let long = format!("{}-{}", "a".repeat(60), "tail");
        let restricted = restrict_length(&long);
        assert_eq!(restricted.len(), MAX_NAME_LENGTH);
        assert!(restricted.starts_with(&format!("{}-", "a".repeat(54))));
        assert_eq!(restricted, restrict_length(&long));

        // the cut lands on a '-' which is not doubled
        let dashed = format!("{}-{}", "b".repeat(53), "c".repeat(20));
        let restricted = restrict_length(&dashed);
        assert!(restricted.starts_with(&format!("{}-", "b".repeat(53))));
        assert!(!restricted.contains("--"));
    }

    #[test]
    fn test_long_task_names_keep_step_containers_distinct() {
        let task = "a".repeat(50);
        let amd = step_container_name(&task, "build-linux-amd64", 0);
        let arm = step_container_name(&task, "build-linux-arm64", 1);
        assert_ne!(amd, arm);
        assert!(amd.len() <= MAX_NAME_LENGTH);
        assert!(arm.len() <= MAX_NAME_LENGTH);
        assert!(is_step_container(&amd));

        let redis = sidecar_container_name(&task, "redis-primary-with-a-long-name", 0);
        let cache = sidecar_container_name(&task, "redis-primary-with-a-long-name-2", 1);
        assert_ne!(redis, cache);
    }

    #[test]
    fn test_random_suffix_respects_length() {
        let names = RandomNames;
        let name = names.restrict_length_with_random_suffix(&"x".repeat(80));
        assert_eq!(name.len(), MAX_NAME_LENGTH);
        assert!(name.starts_with(&"x".repeat(57)));

        let short = names.restrict_length_with_random_suffix("script-0");
        assert_eq!(short.len(), "script-0".len() + 6);
    }

    #[test]
    fn test_sequential_names_are_deterministic() {
        let names = SequentialNames::new();
        assert_eq!(names.restrict_length_with_random_suffix("script-0"), "script-0-00000");
        assert_eq!(names.restrict_length_with_random_suffix("script-1"), "script-1-00001");
    }

    #[test]
    fn test_child_name_hashes_long_parents() {
        assert_eq!(child_name("nightly", "-pod"), "nightly-pod");

        let parent = "p".repeat(70);
        let name = child_name(&parent, "-pod");
        assert_eq!(name.len(), MAX_NAME_LENGTH);
        assert!(name.ends_with("-pod"));
        assert_eq!(name, child_name(&parent, "-pod"));
    }

    #[test]
    fn test_container_names_per_task() {
        let tasks = vec![ResolvedTask::new(
            "unit",
            TaskSpec {
                steps: vec![
                    Step {
                        name: "lint".to_string(),
                        ..Default::default()
                    },
                    Step::default(),
                ],
                ..Default::default()
            },
        )];

        let names = container_names(&tasks);
        assert_eq!(
            names["unit"],
            vec![
                ("lint".to_string(), "task-unit-step-lint".to_string()),
                ("unnamed-1".to_string(), "task-unit-step-unnamed-1".to_string()),
            ]
        );
        assert!(is_step_container(&names["unit"][0].1));
    }
}
