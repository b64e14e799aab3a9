use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::{Error, Result},
    fetch::FetchConfig,
};

pub const DEFAULT_ENGINE: &str = "quickjs";
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_DEV_SERVER_POLL_MS: u64 = 1_000;
pub const DEFAULT_MAX_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Runtime-wide settings shared by every generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Name of the engine backend looked up in the [`EngineRegistry`](crate::engine::EngineRegistry).
    pub engine: String,
    /// Master switch for file watching. Descriptors still opt in individually.
    pub watch: bool,
    /// Quiet period applied to bursts of change notifications.
    pub debounce_ms: u64,
    pub dev_server_poll_ms: u64,
    pub max_stack_size: usize,
    /// `None` leaves the engine without a memory cap.
    pub memory_limit: Option<usize>,
    /// JSON file backing `localStorage`. `None` keeps storage in memory.
    pub storage_path: Option<PathBuf>,
    /// Root directory for `named-resource` sources.
    pub resources_dir: Option<PathBuf>,
    /// Extra polyfill files executed after the bundled ones.
    pub polyfills: Vec<PathBuf>,
    /// Proxy for dev-server and `url` fetches.
    pub proxy: Option<String>,
    /// `None` keeps the client default.
    pub fetch_timeout_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: DEFAULT_ENGINE.to_string(),
            watch: true,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            dev_server_poll_ms: DEFAULT_DEV_SERVER_POLL_MS,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
            memory_limit: None,
            storage_path: None,
            resources_dir: None,
            polyfills: Vec::new(),
            proxy: None,
            fetch_timeout_ms: None,
        }
    }
}

impl RuntimeConfig {
    /// # Errors
    /// Returns an error if the document is not valid YAML for this type.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub const fn dev_server_poll(&self) -> Duration {
        Duration::from_millis(self.dev_server_poll_ms)
    }

    /// HTTP client settings for the default fetcher.
    pub fn fetch(&self) -> FetchConfig {
        let mut fetch = FetchConfig::default();
        if let Some(proxy) = &self.proxy {
            fetch = fetch.with_proxy(proxy.clone());
        }
        if let Some(ms) = self.fetch_timeout_ms {
            fetch = fetch.with_timeout(Duration::from_millis(ms));
        }
        fetch
    }

    /// Applies `LUMEN_*` environment overrides. Invalid values are logged and ignored.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(engine) = lookup("LUMEN_ENGINE").filter(|v| !v.trim().is_empty()) {
            self.engine = engine;
        }
        if let Some(raw) = lookup("LUMEN_WATCH") {
            match raw.trim() {
                "1" | "true" | "on" => self.watch = true,
                "0" | "false" | "off" => self.watch = false,
                _ => warn!(%raw, "Invalid LUMEN_WATCH; keeping configured value"),
            }
        }
        if let Some(raw) = lookup("LUMEN_DEBOUNCE_MS") {
            match raw.parse::<u64>() {
                Ok(parsed) => self.debounce_ms = parsed,
                Err(err) => warn!(%raw, ?err, "Invalid LUMEN_DEBOUNCE_MS; keeping configured value"),
            }
        }
        if let Some(raw) = lookup("LUMEN_PROXY") {
            self.proxy = Some(raw).filter(|v| !v.trim().is_empty());
        }
        if let Some(raw) = lookup("LUMEN_STORAGE_PATH") {
            self.storage_path = if raw.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(raw))
            };
        }
        self
    }
}
