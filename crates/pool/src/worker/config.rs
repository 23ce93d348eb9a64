//! Worker startup configuration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ConfigSignature;

/// Browser viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 600,
        }
    }
}

/// Everything that determines how a worker is launched
///
/// Two requests with equal configs share workers in the pool.
///
/// # Example
///
/// ```
/// use crawlfleet_pool::worker::WorkerConfig;
///
/// let config = WorkerConfig::default()
///     .with_user_agent("crawler/1.0")
///     .with_arg("--disable-gpu");
///
/// assert_eq!(config.signature(), config.clone().signature());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Browser engine (e.g. "chromium", "firefox")
    pub browser_type: String,

    pub headless: bool,

    pub user_agent: Option<String>,

    pub viewport: Viewport,

    /// Upstream proxy URL
    pub proxy: Option<String>,

    /// Extra command-line flags passed to the browser
    pub extra_args: Vec<String>,

    /// Environment variables for the worker process
    pub env: BTreeMap<String, String>,

    /// Free-form settings that still affect identity
    pub extra: serde_json::Map<String, Value>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            browser_type: "chromium".to_string(),
            headless: true,
            user_agent: None,
            viewport: Viewport::default(),
            proxy: None,
            extra_args: vec![],
            env: BTreeMap::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl WorkerConfig {
    /// Create a default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the browser type
    pub fn with_browser_type(mut self, browser_type: impl Into<String>) -> Self {
        self.browser_type = browser_type.into();
        self
    }

    /// Set headless mode
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the viewport
    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Viewport { width, height };
        self
    }

    /// Set the proxy
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Append a browser flag
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Set an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set a free-form setting
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Compute this config's pool signature
    pub fn signature(&self) -> ConfigSignature {
        ConfigSignature::compute(self)
    }
}
