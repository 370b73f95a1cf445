//! Configuration for the orchestrator.
//!
//! # Security
//!
//! - Config file permission validation on Unix systems
//! - Rejects world-readable files containing API keys
//! - Warns about API keys stored in config files

use std::collections::BTreeMap;
use std::time::Duration;

use railmind_agents::{AgentName, AgentSettings, CrowdConfidencePolicy};
use railmind_common::{Channel, RailmindError, Result};
use railmind_knowledge::KnowledgeConfig;
use railmind_llm::LlmConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Upper bound on planning rounds per execution.
pub const MAX_ITERATIONS_CAP: u32 = 5;

/// Main orchestrator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Reasoning provider
    #[serde(default)]
    pub llm: LlmConfig,

    /// Corpus sources and retrieval tuning
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    #[serde(default)]
    pub graph: GraphConfig,

    /// Per-agent overrides, keyed by agent name
    #[serde(default)]
    pub agents: BTreeMap<String, AgentOverrides>,

    #[serde(default)]
    pub crowd: CrowdConfidencePolicy,

    #[serde(default)]
    pub alert: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Time budget for one agent invocation, unless the agent overrides it
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,

    /// Planning rounds per execution. 1 is a single pass.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_agent_timeout() -> u64 {
    30
}

fn default_max_iterations() -> u32 {
    1
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            agent_timeout_secs: default_agent_timeout(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl GraphConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_timeout_secs == 0 {
            return Err(RailmindError::Config(
                "graph.agent_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if !(1..=MAX_ITERATIONS_CAP).contains(&self.max_iterations) {
            return Err(RailmindError::Config(format!(
                "graph.max_iterations must be between 1 and {MAX_ITERATIONS_CAP}, got {}",
                self.max_iterations
            )));
        }
        Ok(())
    }
}

/// Partial [`AgentSettings`]; unset fields keep the agent's defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl AgentOverrides {
    pub fn apply(&self, mut settings: AgentSettings) -> AgentSettings {
        if let Some(ref prompt) = self.system_prompt {
            settings.system_prompt = Some(prompt.clone());
        }
        if let Some(temperature) = self.temperature {
            settings.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens {
            settings.max_tokens = max_tokens;
        }
        if let Some(timeout) = self.timeout_secs {
            settings.timeout_secs = Some(timeout);
        }
        settings
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Channels used when neither the request nor the model picks any
    #[serde(default = "default_channels")]
    pub default_channels: Vec<Channel>,

    /// Recipient used when the request names none and no train is known
    #[serde(default = "default_recipient")]
    pub default_recipient: String,

    /// Bound on a single gateway call during delivery
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
}

impl AlertConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

fn default_channels() -> Vec<Channel> {
    vec![Channel::Sms, Channel::Push]
}

fn default_recipient() -> String {
    "operations-desk".to_string()
}

fn default_delivery_timeout() -> u64 {
    10
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            default_channels: default_channels(),
            default_recipient: default_recipient(),
            delivery_timeout_secs: default_delivery_timeout(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from a TOML file.
    ///
    /// On Unix systems, this validates that:
    /// - The file is a regular file (not a symlink)
    /// - The file is not world-writable
    /// - The file is not world-readable if it contains an API key
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let config = Self::from_file_unchecked(path)?;

        if config.llm.api_key.is_some() {
            warn!(
                "API key found in config file '{}'. For better security, \
                 use environment variables instead (GROQ_API_KEY, OPENAI_API_KEY).",
                path.display()
            );
        }

        Ok(config)
    }

    /// Load configuration from a TOML file without permission checks.
    pub fn from_file_unchecked(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.graph.validate()?;
        if self.alert.delivery_timeout_secs == 0 {
            return Err(RailmindError::Config(
                "alert.delivery_timeout_secs must be greater than zero".to_string(),
            ));
        }
        for name in self.agents.keys() {
            name.parse::<AgentName>().map_err(|unknown| {
                RailmindError::Config(format!("[agents.{unknown}] does not name a known agent"))
            })?;
        }
        Ok(())
    }

    /// Defaults for `agent` with any configured overrides applied.
    pub fn settings_for(&self, agent: AgentName) -> AgentSettings {
        self.agents
            .iter()
            .filter(|(key, _)| key.parse::<AgentName>().ok() == Some(agent))
            .fold(AgentSettings::for_agent(agent), |settings, (_, overrides)| {
                overrides.apply(settings)
            })
    }
}

/// Validate config file permissions on Unix systems.
///
/// Requirements:
/// - File must be a regular file (not symlink, directory, etc.)
/// - File must not be world-writable (mode & 0o002 == 0)
/// - If file contains API key patterns, must not be world-readable
#[cfg(unix)]
fn validate_config_file_permissions(path: &std::path::Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::symlink_metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!(
            "Config path '{}' is not a regular file. Symlinks and directories are not allowed.",
            path.display()
        );
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    let content = std::fs::read_to_string(path).unwrap_or_default();
    let has_api_key = content.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("api_key") && line.contains('=')
    });

    if has_api_key && permission_bits & 0o004 != 0 {
        anyhow::bail!(
            "Config file '{}' contains an API key but is world-readable (mode {:04o}). \
             Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if has_api_key && permission_bits & 0o040 != 0 {
        warn!(
            "Config file '{}' contains an API key and is group-readable (mode {:04o}). \
             Consider restricting access with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[llm]
provider = "ollama"
model = "llama3.2"

[knowledge]
default_top_k = 3

[knowledge.sources]
refund-rules = "data/refund_rules.json"

[graph]
agent_timeout_secs = 10
max_iterations = 2

[agents.operations]
temperature = 0.1

[agents.alert_agent]
timeout_secs = 5

[crowd]
full_confidence_samples = 200

[alert]
default_channels = ["email"]
delivery_timeout_secs = 3
"#;

    #[test]
    fn parses_full_config() {
        let config: CoordinatorConfig = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.graph.agent_timeout(), Duration::from_secs(10));
        assert_eq!(config.graph.max_iterations, 2);
        assert_eq!(config.knowledge.default_top_k, 3);
        assert_eq!(config.knowledge.sources.len(), 1);
        assert_eq!(config.crowd.full_confidence_samples, 200);
        assert_eq!(config.crowd.stale_after_minutes, 120);
        assert_eq!(config.alert.default_channels, vec![Channel::Email]);
        assert_eq!(config.alert.default_recipient, "operations-desk");
        assert_eq!(config.alert.delivery_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn overrides_apply_over_agent_defaults() {
        let config: CoordinatorConfig = toml::from_str(SAMPLE).unwrap();
        let ops = config.settings_for(AgentName::Operations);
        assert_eq!(ops.temperature, 0.1);
        assert_eq!(ops.max_tokens, 1500);
        let alert = config.settings_for(AgentName::Alert);
        assert_eq!(alert.timeout_secs, Some(5));
        assert_eq!(alert.temperature, 0.2);
        assert_eq!(config.settings_for(AgentName::Planner).temperature, 0.7);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: CoordinatorConfig = toml::from_str("").unwrap();
        assert_eq!(config.graph.agent_timeout_secs, 30);
        assert_eq!(config.graph.max_iterations, 1);
        assert_eq!(config.alert.delivery_timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_delivery_timeout() {
        let mut config = CoordinatorConfig::default();
        config.alert.delivery_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(RailmindError::Config(_))));
    }

    #[test]
    fn rejects_out_of_range_iterations() {
        let mut config = CoordinatorConfig::default();
        config.graph.max_iterations = 0;
        assert!(config.validate().is_err());
        config.graph.max_iterations = MAX_ITERATIONS_CAP + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_agent_section() {
        let config: CoordinatorConfig = toml::from_str("[agents.weather]\ntemperature = 0.5").unwrap();
        assert!(matches!(config.validate(), Err(RailmindError::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_world_readable_file_with_api_key() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[llm]\napi_key = \"gsk-test\"").unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(CoordinatorConfig::from_file(file.path()).is_err());

        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600)).unwrap();
        let config = CoordinatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("gsk-test"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_world_writable_file() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[graph]\nmax_iterations = 1").unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o666)).unwrap();
        assert!(CoordinatorConfig::from_file(file.path()).is_err());
    }
}
