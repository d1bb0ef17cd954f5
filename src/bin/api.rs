use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use workspace_agent_orchestrator::{
    api::{start_server, ApiState},
    AppConfig, GeminiClient,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    if config.gemini_api_key.is_empty() {
        warn!("GEMINI_API_KEY not set; every model call will fail until it is configured");
    }

    info!("Workspace Agent Orchestrator - API Server");
    info!(port = config.api_port, model = %config.gemini_model, "Configuration loaded");

    let model = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
    ));
    let state = ApiState::from_config(&config, model).await;

    info!("Orchestrator initialized, starting API server");

    start_server(state, config.api_port).await?;

    Ok(())
}
