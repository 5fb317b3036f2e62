//! Controller layer: the runtime client seam and the reconciler that uses it

pub mod client;
pub mod reconciler;

pub use client::{is_ready, ClientError, InMemoryPodClient, PodClient};
pub use reconciler::{ReconcileError, Reconciler, REASON_TIMED_OUT};
