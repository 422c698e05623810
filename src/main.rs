//! forest - "You are in a Forest ~ Get Out"
//!
//! Serves the text-adventure relay: commands posted by the game page are
//! narrated by a chat-completion model and streamed back over SSE.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use forest::chat::{CompletionClient, OpenAiProvider, prompt};
use forest::config::{self, Args, FileConfig, ForestConfig};
use forest::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    config::load_dotenv();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("forest=info,tower_http=info"));
    fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let file = FileConfig::load(args.config.as_deref())?;
    let config = ForestConfig::resolve(args, file)?;

    info!("Starting forest relay");
    info!("Turn policy: {:?}", config.relay.policy);

    let system_prompt = prompt::load_system_prompt(config.completion.system_prompt_file.as_deref())?;
    let provider = OpenAiProvider::new(&config.provider)?;
    info!("Model: {} via {}", config.provider.model, provider.endpoint());
    let completion = CompletionClient::new(Arc::new(provider), system_prompt)
        .with_limits(config.completion.max_tokens, config.completion.temperature);

    let state = AppState::new(completion, &config);
    server::run(state, &config.server.bind_address()).await?;

    Ok(())
}
