mod config;
mod error;
mod routes;
mod state;
mod ws;

use crate::config::{Config, Provider};
use crate::state::AppState;
use anyhow::{Context, Result};
use clap::Parser;
use roleplay_core::prompt_loader::load_catalog;
use roleplay_core::{
    OpenAiChatClient, RoleScenarioCatalog, SessionRegistry, SharedAnalysisRequester,
    SharedTurnGenerator, SimulatedClient, SpeechClient, spawn_idle_sweeper,
};
use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;

/// Role-play sales training server.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Address to listen on; overrides BIND_ADDRESS
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Directory of prompt files replacing the built-in texts; overrides PROMPTS_DIR
    #[arg(long)]
    prompts_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load application configuration")?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(dir) = args.prompts_dir {
        config.prompts_dir = Some(dir);
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting role-play service...");

    // --- 3. Load Prompts ---
    let catalog = match &config.prompts_dir {
        Some(dir) => load_catalog(dir).context("Failed to load role-play prompts")?,
        None => RoleScenarioCatalog::builtin().context("Built-in prompt set is incomplete")?,
    };

    // --- 4. Initialize API Clients ---
    let (generator, requester) = model_clients(&config)?;
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(catalog),
        generator,
        requester,
        config.llm_timeout,
    ));
    spawn_idle_sweeper(&registry, config.session_idle_ttl);
    let speech = SpeechClient::new(
        config.openai_api_key.clone().map(SecretString::from),
        &config.tts_server_url,
    )
    .with_base_url(&config.openai_base_url);

    // --- 5. Serve ---
    let app = routes::router(AppState::new(registry, speech));
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    tracing::info!("Listening on {}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}

fn model_clients(config: &Config) -> Result<(SharedTurnGenerator, SharedAnalysisRequester)> {
    match config.provider {
        Provider::OpenAI => {
            let api_key = config
                .openai_api_key
                .clone()
                .context("OPENAI_API_KEY must be set for 'openai' provider")?;
            tracing::info!("Using OpenAI chat model {}", config.chat_model);
            let client = Arc::new(
                OpenAiChatClient::new(SecretString::from(api_key), config.chat_model.clone())
                    .with_base_url(&config.openai_base_url),
            );
            let generator: SharedTurnGenerator = client.clone();
            let requester: SharedAnalysisRequester = client;
            Ok((generator, requester))
        }
        Provider::Simulated => {
            tracing::warn!("Using the simulated provider; replies are canned");
            let client = Arc::new(SimulatedClient);
            let generator: SharedTurnGenerator = client.clone();
            let requester: SharedAnalysisRequester = client;
            Ok((generator, requester))
        }
    }
}
