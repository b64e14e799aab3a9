use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use lumen::{Globals, RuntimeConfig, SourceDescriptor};
use serde::Deserialize;

const DEFAULT_FRAME_MS: u64 = 16;

fn default_frame_ms() -> u64 {
    DEFAULT_FRAME_MS
}

/// Host configuration file.
///
/// ```yaml
/// runtime:
///   debounce_ms: 250
/// script:
///   kind: file-path
///   location: app/index.js
///   watch: true
///   dev_server:
///     base_url: http://localhost:3000
///     entry: /index.js
/// preload:
///   - app/polyfills.js
/// globals:
///   theme: dark
/// ```
#[derive(Debug, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    pub script: SourceDescriptor,
    #[serde(default)]
    pub preload: Vec<PathBuf>,
    #[serde(default)]
    pub globals: Globals,
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,
}

impl HostConfig {
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read host config {path}"))?;
        serde_yaml::from_str(&raw).with_context(|| format!("invalid host config {path}"))
    }

    pub fn frame(&self) -> Duration {
        Duration::from_millis(self.frame_ms.max(1))
    }
}
