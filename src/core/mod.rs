//! Core domain models for colocated pipelines
//!
//! This module defines the runs, pipelines, tasks and steps the compiler
//! consumes, plus the status types the aggregator writes back.

pub mod catalog;
pub mod config;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod state;
pub mod task;

pub use catalog::*;
pub use config::*;
pub use error::*;
pub use params::*;
pub use pipeline::*;
pub use state::*;
pub use task::*;
