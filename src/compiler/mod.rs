//! Pod compiler
//!
//! Turns a resolved, sequenced task list into a single pod: scripts are
//! placed by an init container, and every step is wrapped by the entrypoint
//! so it waits for the step before it.

pub mod entrypoint;
pub mod names;
pub mod pod;
pub mod scripts;

pub use entrypoint::{format_duration, ready_patch, EntrypointOptions, READY_ANNOTATION, READY_ANNOTATION_VALUE};
pub use names::{container_names, ContainerNames, NameGenerator, RandomNames, SequentialNames};
pub use pod::{pod_name, CompiledPod, PodCompiler, RUN_LABEL};
