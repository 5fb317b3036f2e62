//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{CompileCommand, StatusCommand, ValidateCommand};
use std::ffi::OsString;

/// Compile pipelines into a single pod and aggregate their status
#[derive(Debug, Parser, Clone)]
#[command(name = "colocated")]
#[command(author = "Colocated Pipeline Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Runs every task of a pipeline inside one pod", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Compile a pipeline run into a pod
    Compile(CompileCommand),

    /// Resolve and sequence a pipeline run without compiling it
    Validate(ValidateCommand),

    /// Fold an observed pod into a pipeline run's status
    Status(StatusCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
