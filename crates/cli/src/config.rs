//! Configuration loading from conduit.toml.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use protocol::{MAX_FRAME_SIZE, ProcessConfig, ProfileDescription, RouterConfig};
use runtime::RuntimeConfig;
use serde::Deserialize;
use serde_json::Value;
use tools::EngineConfig;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Id of the profile selected at startup.
    pub selected_profile: Option<String>,
    pub profiles: Vec<ProfileEntry>,
    pub router: RouterSection,
    pub tools: ToolsSection,
    /// The IDE-side execution backend.
    pub ide: Option<IdeSection>,
    pub log: LogSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    pub request_timeout_ms: u64,
    pub close_on_unknown_message: bool,
    pub max_frame_bytes: usize,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            request_timeout_ms: 15_000,
            close_on_unknown_message: true,
            max_frame_bytes: MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub execute_timeout_ms: u64,
    /// Overall limit per tool call. Unset means no limit.
    pub call_timeout_ms: Option<u64>,
    pub cancel_grace_ms: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            execute_timeout_ms: 120_000,
            call_timeout_ms: None,
            cancel_grace_ms: 2_000,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IdeSection {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileEntry {
    pub id: String,
    pub title: String,
    pub org_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            router: RouterConfig {
                request_timeout: Duration::from_millis(self.router.request_timeout_ms),
                close_on_unknown_message: self.router.close_on_unknown_message,
            },
            engine: EngineConfig {
                call_timeout: self.tools.call_timeout_ms.map(Duration::from_millis),
                cancel_grace: Duration::from_millis(self.tools.cancel_grace_ms),
            },
            execute_timeout: Duration::from_millis(self.tools.execute_timeout_ms),
            profiles: self.profiles.iter().map(ProfileEntry::description).collect(),
            selected_profile: self.selected_profile.clone(),
        }
    }

    pub fn ide_process(&self) -> Option<ProcessConfig> {
        self.ide.as_ref().map(|ide| ProcessConfig {
            command: ide.command.clone(),
            args: ide.args.clone(),
            env: ide.env.clone(),
        })
    }
}

impl ProfileEntry {
    fn description(&self) -> ProfileDescription {
        let mut description = ProfileDescription::new(&self.id, &self.title);
        if let Some(org_id) = &self.org_id {
            description
                .metadata
                .insert("orgId".to_string(), Value::String(org_id.clone()));
        }
        description
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),
}
