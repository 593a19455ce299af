//! Configuration schema with defaults.

use anyhow::Result;
use engine::schemas::ResourceBudgets;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".aegis")
}

/// Paths of the three persisted stores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub db_path: PathBuf,
    pub secrets_db_path: PathBuf,
    pub audit_db_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let dir = state_dir();
        Self {
            db_path: dir.join("aegis_engine.db"),
            secrets_db_path: dir.join("secrets.db"),
            audit_db_path: dir.join("aegis_audit.db"),
        }
    }
}

/// Which LLM provider backs the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    /// Deterministic in-process mock (offline runs and tests)
    Mock,
    /// Any OpenAI-style `/chat/completions` endpoint
    OpenAiCompatible,
}

/// LLM provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: LlmProviderKind,
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::Mock,
            endpoint: "http://localhost:11434/v1".to_string(),
            model: "default".to_string(),
            api_key_env: "LLM_API_KEY".to_string(),
        }
    }
}

/// Workflow limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub max_active_tasks: usize,
    pub max_active_thoughts: usize,
    /// Ponder/recursion cap before auto-defer
    pub max_rounds: i32,
    pub max_thought_depth: i32,
    pub batch_size: usize,
    /// Total processing rounds; `None` runs until shutdown
    pub num_rounds: Option<u32>,
    /// Uniform inter-round delay override; `None` keeps the per-state
    /// defaults (WORK 3 s, SOLITUDE 10 s, DREAM 5 s, else 1 s)
    pub round_delay_secs: Option<f64>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_active_tasks: 10,
            max_active_thoughts: 50,
            max_rounds: 7,
            max_thought_depth: 7,
            batch_size: 5,
            num_rounds: None,
            round_delay_secs: None,
        }
    }
}

/// Channel wiring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub home_channel_id: String,
    pub deferral_channel_id: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            home_channel_id: "cli".to_string(),
            deferral_channel_id: "cli-deferral".to_string(),
        }
    }
}

/// Wise-authority settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WiseAuthorityConfig {
    /// User id whose deferral-channel messages carry authority
    pub user_id: Option<String>,
}

/// Audit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { retention_days: 90 }
    }
}

/// The full application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent_id: String,
    pub database: DatabaseConfig,
    pub llm: LlmSettings,
    pub workflow: WorkflowConfig,
    pub channels: ChannelConfig,
    pub wise_authority: WiseAuthorityConfig,
    pub resources: ResourceBudgets,
    pub audit: AuditConfig,
    pub log_level: String,
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent_id: "aegis".to_string(),
            database: DatabaseConfig::default(),
            llm: LlmSettings::default(),
            workflow: WorkflowConfig::default(),
            channels: ChannelConfig::default(),
            wise_authority: WiseAuthorityConfig::default(),
            resources: ResourceBudgets::default(),
            audit: AuditConfig::default(),
            log_level: "info".to_string(),
            debug: false,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        tooling::validation::require_non_empty("agent_id", &self.agent_id)?;
        tooling::validation::require_non_empty(
            "channels.home_channel_id",
            &self.channels.home_channel_id,
        )?;
        tooling::validation::require_non_empty(
            "channels.deferral_channel_id",
            &self.channels.deferral_channel_id,
        )?;
        tooling::validation::require_in_range(
            "workflow.max_thought_depth",
            self.workflow.max_thought_depth,
            1,
            64,
        )?;
        tooling::validation::require_in_range("workflow.max_rounds", self.workflow.max_rounds, 1, 64)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn test_default_db_paths_are_distinct() {
        let db = DatabaseConfig::default();
        assert_ne!(db.db_path, db.secrets_db_path);
        assert_ne!(db.db_path, db.audit_db_path);
        assert!(db.db_path.to_string_lossy().contains("aegis_engine.db"));
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: AppConfig = serde_yaml::from_str("agent_id: custom").unwrap();
        assert_eq!(config.agent_id, "custom");
        assert_eq!(config.workflow.max_active_tasks, 10);
    }

    #[test]
    fn test_invalid_depth_rejected() {
        let mut config = AppConfig::default();
        config.workflow.max_thought_depth = 0;
        assert!(config.validate().is_err());
    }
}
