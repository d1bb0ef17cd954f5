use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use workspace_agent_orchestrator::{
    tools::create_default_registry, AgentRequest, AppConfig, EventLog, GeminiClient,
    Orchestrator, SessionSettings,
};

const USAGE: &str = "usage: orchestrator <instruction> [--file <path>]...";

/// One-shot run: `orchestrator "Upload this receipt" --file receipt.pdf`
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let request = parse_args(std::env::args().skip(1))?;
    let config = AppConfig::from_env()?;

    let model = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
    ));
    let registry = Arc::new(create_default_registry(&config, model.clone()));
    let orchestrator = Orchestrator::new(model, registry)
        .with_event_log(Arc::new(EventLog::open(config.events_file())));

    let session = SessionSettings::new(&config.log_dir, config.session_log_console)
        .start()
        .await;

    info!(session_id = session.session_id(), "Running request");

    let result = orchestrator.handle(&request, &session).await;
    session.end().await;

    if let Some(category) = result.category {
        println!("Category: {}", category);
    }
    println!("{}", result.answer);
    if let Some(path) = session.readable_path() {
        println!("\nSession log: {}", path.display());
    }

    Ok(())
}

fn parse_args(
    mut args: impl Iterator<Item = String>,
) -> Result<AgentRequest, Box<dyn std::error::Error>> {
    let mut words = Vec::new();
    let mut files = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--file" | "-f" => match args.next() {
                Some(path) => files.push(path),
                None => return Err(format!("--file needs a path\n{}", USAGE).into()),
            },
            "--help" | "-h" => return Err(USAGE.into()),
            _ => words.push(arg),
        }
    }

    if words.is_empty() {
        return Err(USAGE.into());
    }

    Ok(AgentRequest::new(words.join(" ")).with_files(files))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> impl Iterator<Item = String> {
        raw.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_args_with_files() {
        let request =
            parse_args(args(&["Upload", "this", "receipt", "--file", "a.pdf", "-f", "b.png"])).unwrap();
        assert_eq!(request.instruction, "Upload this receipt");
        assert_eq!(request.files, vec!["a.pdf", "b.png"]);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["hi", "--file"])).is_err());
        assert!(parse_args(args(&["--help"])).is_err());
    }
}
