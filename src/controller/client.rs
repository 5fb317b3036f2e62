//! Seam to the container runtime that hosts compiled pods

use crate::compiler::entrypoint::{READY_ANNOTATION, READY_ANNOTATION_VALUE};
use crate::compiler::pod::RUN_LABEL;
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors talking to the runtime. All of them are worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("pod {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("pod {namespace}/{name} already exists")]
    AlreadyExists { namespace: String, name: String },

    #[error("pod has no {0}")]
    Invalid(&'static str),

    #[error("runtime API error: {0}")]
    Api(String),
}

/// Pod operations the reconciler needs
#[async_trait::async_trait]
pub trait PodClient: Send + Sync {
    /// The pod labelled for `run`, if one exists
    async fn find_pod(&self, namespace: &str, run: &str) -> Result<Option<Pod>, ClientError>;

    async fn create_pod(&self, pod: Pod) -> Result<Pod, ClientError>;

    /// Apply the ready JSON patch to the pod
    async fn patch_ready(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Pod, ClientError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClientError>;
}

/// In-memory pods (for testing or local dry runs)
pub struct InMemoryPodClient {
    pods: RwLock<HashMap<(String, String), Pod>>,
}

impl InMemoryPodClient {
    pub fn new() -> Self {
        Self {
            pods: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Option<Pod> {
        let pods = self.pods.read().await;
        pods.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Replace a pod's status, as the kubelet would
    pub async fn set_status(&self, namespace: &str, name: &str, status: PodStatus) -> Result<(), ClientError> {
        let mut pods = self.pods.write().await;
        let pod = pods
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| not_found(namespace, name))?;
        pod.status = Some(status);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.pods.read().await.len()
    }
}

impl Default for InMemoryPodClient {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(namespace: &str, name: &str) -> ClientError {
    ClientError::NotFound {
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn pod_key(pod: &Pod) -> Result<(String, String), ClientError> {
    let namespace = pod.metadata.namespace.clone().ok_or(ClientError::Invalid("namespace"))?;
    let name = pod.metadata.name.clone().ok_or(ClientError::Invalid("name"))?;
    Ok((namespace, name))
}

/// Only the ready-annotation replace patch is understood
fn apply_ready_patch(pod: &mut Pod, patch: &serde_json::Value) -> Result<(), ClientError> {
    let expected = format!("/metadata/annotations/{}", READY_ANNOTATION.replace('/', "~1"));
    let ops = patch
        .as_array()
        .ok_or_else(|| ClientError::Api("patch must be a JSON array".to_string()))?;
    for op in ops {
        let path = op.get("path").and_then(|p| p.as_str());
        let value = op.get("value").and_then(|v| v.as_str());
        match (op.get("op").and_then(|o| o.as_str()), path, value) {
            (Some("replace"), Some(p), Some(v)) if p == expected => {
                pod.metadata
                    .annotations
                    .get_or_insert_with(Default::default)
                    .insert(READY_ANNOTATION.to_string(), v.to_string());
            }
            _ => return Err(ClientError::Api(format!("unsupported patch operation: {}", op))),
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl PodClient for InMemoryPodClient {
    async fn find_pod(&self, namespace: &str, run: &str) -> Result<Option<Pod>, ClientError> {
        let pods = self.pods.read().await;
        Ok(pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, pod)| pod)
            .find(|pod| {
                pod.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(RUN_LABEL))
                    .map(|r| r == run)
                    .unwrap_or(false)
            })
            .cloned())
    }

    async fn create_pod(&self, pod: Pod) -> Result<Pod, ClientError> {
        let key = pod_key(&pod)?;
        let mut pods = self.pods.write().await;
        if pods.contains_key(&key) {
            return Err(ClientError::AlreadyExists {
                namespace: key.0,
                name: key.1,
            });
        }
        pods.insert(key, pod.clone());
        Ok(pod)
    }

    async fn patch_ready(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Pod, ClientError> {
        let mut pods = self.pods.write().await;
        let pod = pods
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| not_found(namespace, name))?;
        apply_ready_patch(pod, patch)?;
        Ok(pod.clone())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        let mut pods = self.pods.write().await;
        pods.remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(namespace, name))
    }
}

/// Whether the ready annotation has been flipped
pub fn is_ready(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(READY_ANNOTATION))
        .map(|v| v == READY_ANNOTATION_VALUE)
        .unwrap_or(false)
}
