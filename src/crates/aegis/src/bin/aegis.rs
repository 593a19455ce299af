//! Aegis CLI entry point.

use aegis::adapters::{Adapter, CliAdapter};
use aegis::config::{load_config, AppConfig, LlmProviderKind};
use aegis::runtime::AegisRuntime;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tooling::config::EnvLoader;

#[derive(Parser, Debug)]
#[command(name = "aegis", version, about = "Autonomous agent runtime with an ethically constrained decision pipeline")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a .env file (loaded without modifying the process env)
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Total processing rounds before a graceful shutdown
    #[arg(long)]
    rounds: Option<u32>,

    /// Override the engine database path
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Override the home channel id
    #[arg(long)]
    channel: Option<String>,

    /// Use the deterministic mock LLM provider
    #[arg(long)]
    mock_llm: bool,

    /// Do not read stdin (service mode)
    #[arg(long)]
    non_interactive: bool,

    /// Override the log level
    #[arg(long)]
    log_level: Option<String>,
}

fn apply_cli_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(path) = &cli.db_path {
        config.database.db_path = path.clone();
    }
    if let Some(channel) = &cli.channel {
        config.channels.home_channel_id = channel.clone();
    }
    if let Some(rounds) = cli.rounds {
        config.workflow.num_rounds = Some(rounds);
    }
    if cli.mock_llm {
        config.llm.provider = LlmProviderKind::Mock;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env = EnvLoader::from_file(&cli.env_file);
    let mut config = load_config(cli.config.as_deref(), &env)?;
    apply_cli_overrides(&mut config, &cli);

    tooling::logging::init_logging(&config.log_level);

    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let adapter: Arc<dyn Adapter> = Arc::new(CliAdapter::new(
        config.channels.home_channel_id.clone(),
        config.channels.deferral_channel_id.clone(),
        inbound_tx,
        !cli.non_interactive,
    ));

    let num_rounds = config.workflow.num_rounds;
    let mut runtime = AegisRuntime::new(config, env, vec![adapter], Some(inbound_rx));

    runtime.run(num_rounds).await?;
    Ok(())
}
