//! Termination message payloads written by the entrypoint

use crate::core::state::RunResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Internal key carrying the step's real exit code
pub const EXIT_CODE_KEY: &str = "ExitCode";
/// Internal key carrying the step's real start time
pub const STARTED_AT_KEY: &str = "StartedAt";
/// Internal key carrying a failure reason
pub const REASON_KEY: &str = "Reason";
/// Value of [`REASON_KEY`] when a step ran past its timeout
pub const TIMEOUT_EXCEEDED: &str = "TimeoutExceeded";

/// Layout of [`STARTED_AT_KEY`] values
pub const STARTED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

/// Errors reading a single step's termination payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminationError {
    #[error("termination message could not be parsed as JSON: {0}")]
    Parse(String),

    #[error("could not parse int value {value:?} in {key} field")]
    ExitCode { key: String, value: String },

    #[error("could not parse time value {value:?} in {key} field")]
    StartedAt { key: String, value: String },

    #[error("could not encode termination message: {0}")]
    Encode(String),
}

/// Every termination error from one aggregation pass.
///
/// The run status has still been updated as far as possible when this is
/// returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} step(s) reported unreadable termination messages: {}", .0.len(), join(.0))]
pub struct StatusErrors(pub Vec<TerminationError>);

fn join(errors: &[TerminationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Kind of a termination entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ResultType {
    TaskRun,
    PipelineResource,
    Internal,
    #[default]
    Unknown,
}

impl From<u8> for ResultType {
    fn from(value: u8) -> Self {
        match value {
            1 => ResultType::TaskRun,
            2 => ResultType::PipelineResource,
            3 => ResultType::Internal,
            _ => ResultType::Unknown,
        }
    }
}

impl From<ResultType> for u8 {
    fn from(value: ResultType) -> Self {
        match value {
            ResultType::TaskRun => 1,
            ResultType::PipelineResource => 2,
            ResultType::Internal => 3,
            ResultType::Unknown => 10,
        }
    }
}

/// One `{key, value, resourceName?, type}` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationEntry {
    #[serde(default)]
    pub key: String,

    #[serde(default)]
    pub value: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_name: String,

    #[serde(default, rename = "type")]
    pub result_type: ResultType,
}

impl TerminationEntry {
    pub fn new(key: &str, value: &str, result_type: ResultType) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            resource_name: String::new(),
            result_type,
        }
    }

    fn is_empty(&self) -> bool {
        self.key.is_empty() && self.value.is_empty() && self.resource_name.is_empty()
    }

    fn is_internal(&self, key: &str) -> bool {
        self.result_type == ResultType::Internal && self.key == key
    }
}

/// Parse a payload: empty entries dropped, the last value for a key kept,
/// entries sorted by key
pub fn parse_message(message: &str) -> Result<Vec<TerminationEntry>, TerminationError> {
    if message.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<TerminationEntry> =
        serde_json::from_str(message).map_err(|e| TerminationError::Parse(e.to_string()))?;

    let mut by_key: BTreeMap<String, TerminationEntry> = BTreeMap::new();
    for entry in entries.into_iter().filter(|e| !e.is_empty()) {
        by_key.insert(entry.key.clone(), entry);
    }
    Ok(by_key.into_values().collect())
}

/// Render entries back into a payload; no entries means an empty message
pub fn encode_message(entries: &[TerminationEntry]) -> Result<String, TerminationError> {
    if entries.is_empty() {
        return Ok(String::new());
    }
    serde_json::to_string(entries).map_err(|e| TerminationError::Encode(e.to_string()))
}

/// Internal `ExitCode`, if present
pub fn exit_code(entries: &[TerminationEntry]) -> Result<Option<i32>, TerminationError> {
    entries
        .iter()
        .find(|e| e.is_internal(EXIT_CODE_KEY))
        .map(|e| {
            e.value.trim().parse::<i32>().map_err(|_| TerminationError::ExitCode {
                key: e.key.clone(),
                value: e.value.clone(),
            })
        })
        .transpose()
}

/// Internal `StartedAt`, if present
pub fn started_at(entries: &[TerminationEntry]) -> Result<Option<DateTime<Utc>>, TerminationError> {
    entries
        .iter()
        .find(|e| e.is_internal(STARTED_AT_KEY))
        .map(|e| {
            DateTime::parse_from_str(&e.value, STARTED_AT_FORMAT)
                .or_else(|_| DateTime::parse_from_rfc3339(&e.value))
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| TerminationError::StartedAt {
                    key: e.key.clone(),
                    value: e.value.clone(),
                })
        })
        .transpose()
}

/// Whether the payload marks the step as timed out
pub fn timed_out(entries: &[TerminationEntry]) -> bool {
    entries
        .iter()
        .any(|e| e.is_internal(REASON_KEY) && e.value == TIMEOUT_EXCEEDED)
}

/// Split entries into task results and the entries to keep on the step
pub fn split_entries(entries: Vec<TerminationEntry>) -> (Vec<RunResult>, Vec<TerminationEntry>) {
    let mut results = Vec::new();
    let mut kept = Vec::new();
    for entry in entries {
        match entry.result_type {
            ResultType::Internal => {}
            ResultType::TaskRun => {
                results.push(RunResult {
                    name: entry.key.clone(),
                    value: entry.value.clone(),
                });
                kept.push(entry);
            }
            _ => kept.push(entry),
        }
    }
    (results, kept)
}

/// Collapse duplicate result names: first-seen order, last value wins
pub fn dedup_results(results: Vec<RunResult>) -> Vec<RunResult> {
    let mut out: Vec<RunResult> = Vec::with_capacity(results.len());
    for result in results {
        match out.iter_mut().find(|r| r.name == result.name) {
            Some(existing) => existing.value = result.value,
            None => out.push(result),
        }
    }
    out
}
