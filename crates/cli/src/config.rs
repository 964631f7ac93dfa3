//! Configuration loading from coxswain.toml.

use guardrail::{Guardrail, Rules};
use mcp::ServerConfig;
use runtime::credentials::API_KEY_VAR;
use runtime::model::types::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use runtime::{DatasetContext, ModelConfig, SecretStore, Skill, SystemPrompt};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub tool_server: ToolServerConfig,
    pub prompt: PromptConfig,
    /// Overrides for the guardrail rule lists.
    pub guardrail: Rules,
    pub pending: PendingConfig,
}

/// Model backend configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub model: String,
    pub max_tokens: u32,

    /// Standard Anthropic API key. Takes precedence over the
    /// `ANTHROPIC_API_KEY` environment variable.
    pub api_key: Option<String>,

    /// Alternative API host, e.g. a proxy.
    pub base_url: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            api_key: None,
            base_url: None,
        }
    }
}

/// The tool server launched for each tool operation.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ToolServerConfig {
    pub enabled: bool,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout_secs: u64,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            timeout_secs: mcp::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl ToolServerConfig {
    /// Launch settings, or `None` when disabled or no command is set.
    pub fn server_config(&self) -> Option<ServerConfig> {
        let command = self.command.as_deref().filter(|c| !c.trim().is_empty())?;
        if !self.enabled {
            return None;
        }
        let mut config = ServerConfig::new(command, self.args.clone())
            .with_timeout(Duration::from_secs(self.timeout_secs.max(1)));
        config.env = self.env.clone();
        Some(config)
    }
}

/// System prompt content.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Replaces the built-in assistant instructions.
    pub instructions: Option<String>,
    pub context: Option<String>,
    pub dataset: Option<DatasetContext>,
    pub skills: Vec<Skill>,
}

impl PromptConfig {
    pub fn system_prompt(&self) -> SystemPrompt {
        let mut prompt = match &self.instructions {
            Some(instructions) => SystemPrompt::new(instructions.clone()),
            None => SystemPrompt::default(),
        };
        if let Some(dataset) = &self.dataset {
            prompt = prompt.with_dataset(dataset.clone());
        }
        if let Some(context) = &self.context {
            prompt = prompt.with_context(context.clone());
        }
        for skill in &self.skills {
            prompt = prompt.with_skill(skill.clone());
        }
        prompt
    }
}

/// Pending-operation retention.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PendingConfig {
    /// Seconds a suspended call stays redeemable. `0` keeps it forever.
    pub ttl_secs: u64,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

impl PendingConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn guardrail(&self) -> Guardrail {
        Guardrail::new(self.guardrail.clone())
    }

    pub fn model(&self) -> ModelConfig {
        ModelConfig {
            model: self.backend.model.clone(),
            max_tokens: self.backend.max_tokens,
        }
    }
}

impl SecretStore for Config {
    fn secret(&self, name: &str) -> Option<String> {
        (name == API_KEY_VAR)
            .then(|| self.backend.api_key.clone())
            .flatten()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),
}
