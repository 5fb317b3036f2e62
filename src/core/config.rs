//! Compiler configuration from YAML

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Images the compiler injects into every pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Images {
    /// Image carrying the entrypoint binary at `/ko-app/entrypoint`
    pub entrypoint_image: String,

    /// POSIX shell image used to place scripts
    pub shell_image: String,

    /// PowerShell image used to place Windows scripts
    pub shell_image_win: String,
}

impl Default for Images {
    fn default() -> Self {
        Self {
            entrypoint_image: "gcr.io/tekton-releases/github.com/tektoncd/pipeline/cmd/entrypoint:v0.30.0"
                .to_string(),
            shell_image: "busybox".to_string(),
            shell_image_win: "mcr.microsoft.com/powershell:nanoserver".to_string(),
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

/// Top-level compiler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerConfig {
    #[serde(default)]
    pub images: Images,

    /// Applied to runs that set no timeout of their own
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub default_timeout: Duration,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            images: Images::default(),
            default_timeout: default_timeout(),
        }
    }
}

impl CompilerConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: CompilerConfig =
            serde_yaml::from_str(yaml).context("failed to parse compiler config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.images.entrypoint_image.trim().is_empty() {
            anyhow::bail!("entrypointImage must not be empty");
        }
        if self.images.shell_image.trim().is_empty() {
            anyhow::bail!("shellImage must not be empty");
        }
        if self.images.shell_image_win.trim().is_empty() {
            anyhow::bail!("shellImageWin must not be empty");
        }
        Ok(())
    }
}
