//! Layered configuration: CLI overrides > environment > YAML file >
//! schema defaults.
//!
//! The environment layer reads through an [`EnvLoader`], so a `.env` file
//! participates without the process environment ever being mutated;
//! process env always wins over `.env` values.

mod schema;

pub use schema::{
    AppConfig, AuditConfig, ChannelConfig, DatabaseConfig, LlmProviderKind, LlmSettings,
    WiseAuthorityConfig, WorkflowConfig,
};

use anyhow::{Context, Result};
use std::path::Path;
use tooling::config::EnvLoader;
use tracing::{debug, info};

/// Load configuration from all layers except CLI overrides
///
/// CLI overrides are applied by the binary after parsing arguments.
pub fn load_config(config_path: Option<&Path>, env: &EnvLoader) -> Result<AppConfig> {
    let mut config = match config_path {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "Loading configuration file");
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            serde_yaml::from_str(&contents)
                .with_context(|| format!("invalid YAML in {}", path.display()))?
        }
        Some(path) => {
            anyhow::bail!("config file {} does not exist", path.display());
        }
        None => AppConfig::default(),
    };

    apply_env_overrides(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

fn apply_env_overrides(config: &mut AppConfig, env: &EnvLoader) -> Result<()> {
    if let Some(path) = env.get("AEGIS_DB_PATH") {
        config.database.db_path = path.into();
    }
    if let Some(path) = env.get("AEGIS_SECRETS_DB_PATH") {
        config.database.secrets_db_path = path.into();
    }
    if let Some(path) = env.get("AEGIS_AUDIT_DB_PATH") {
        config.database.audit_db_path = path.into();
    }

    if let Some(endpoint) = env.get("LLM_ENDPOINT") {
        config.llm.endpoint = endpoint;
        config.llm.provider = LlmProviderKind::OpenAiCompatible;
    }
    if let Some(model) = env.get("LLM_MODEL") {
        config.llm.model = model;
    }

    if let Some(days) = env
        .get_parse::<u32>("AUDIT_RETENTION_DAYS")
        .map_err(anyhow::Error::from)?
    {
        config.audit.retention_days = days;
    }
    if let Some(max) = env
        .get_parse::<usize>("MAX_ACTIVE_TASKS")
        .map_err(anyhow::Error::from)?
    {
        config.workflow.max_active_tasks = max;
    }
    if let Some(depth) = env
        .get_parse::<i32>("MAX_THOUGHT_DEPTH")
        .map_err(anyhow::Error::from)?
    {
        config.workflow.max_thought_depth = depth;
    }

    if let Some(level) = env.get("LOG_LEVEL") {
        config.log_level = level;
    }
    if let Some(debug_mode) = env.get_bool("DEBUG_MODE").map_err(anyhow::Error::from)? {
        config.debug = debug_mode;
    }

    if let Some(channel) = env.get("HOME_CHANNEL_ID") {
        config.channels.home_channel_id = channel;
    }
    if let Some(channel) = env.get("DEFERRAL_CHANNEL_ID") {
        config.channels.deferral_channel_id = channel;
    }
    if let Some(user) = env.get("WA_USER_ID") {
        config.wise_authority.user_id = Some(user);
    }

    debug!("Environment overrides applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = load_config(None, &EnvLoader::new()).unwrap();
        assert_eq!(config.workflow.max_rounds, 7);
        assert_eq!(config.workflow.max_thought_depth, 7);
        assert_eq!(config.channels.home_channel_id, "cli");
    }

    #[test]
    fn test_yaml_layer_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "workflow:\n  max_active_tasks: 3\nchannels:\n  home_channel_id: lobby"
        )
        .unwrap();

        let config = load_config(Some(file.path()), &EnvLoader::new()).unwrap();
        assert_eq!(config.workflow.max_active_tasks, 3);
        assert_eq!(config.channels.home_channel_id, "lobby");
        // Untouched fields keep their defaults
        assert_eq!(config.workflow.max_rounds, 7);
    }

    // Process-env cases share one test so parallel tests never race on
    // the same variable.
    #[test]
    fn test_env_layer_overrides_and_rejects_bad_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workflow:\n  max_active_tasks: 3").unwrap();

        std::env::set_var("MAX_ACTIVE_TASKS", "42");
        let config = load_config(Some(file.path()), &EnvLoader::new()).unwrap();
        assert_eq!(config.workflow.max_active_tasks, 42);

        std::env::set_var("MAX_ACTIVE_TASKS", "many");
        let result = load_config(None, &EnvLoader::new());
        assert!(result.is_err());

        std::env::remove_var("MAX_ACTIVE_TASKS");
    }

    #[test]
    fn test_dotenv_layer_participates() {
        // Skip when the host environment already defines LOG_LEVEL; the
        // process env legitimately wins in that case.
        if std::env::var("LOG_LEVEL").is_ok() {
            return;
        }

        let mut env_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(env_file, "LOG_LEVEL=trace").unwrap();

        let env = EnvLoader::from_file(env_file.path());
        let config = load_config(None, &env).unwrap();
        assert_eq!(config.log_level, "trace");
        // The process environment was never touched
        assert!(std::env::var("LOG_LEVEL").is_err());
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let result = load_config(Some(Path::new("/nonexistent/aegis.yaml")), &EnvLoader::new());
        assert!(result.is_err());
    }
}
