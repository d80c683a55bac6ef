pub mod cli;
pub mod config;
pub mod handshake;
pub mod llm;
pub mod models;
pub mod server;

use cli::Args;
use config::prompt::PromptTemplate;
use llm::chat::new_client;
use llm::LlmConfig;
use log::{ info, warn };
use server::api::AppState;
use server::Server;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr());
    info!("Ollama Host: {}", args.ollama_host);
    info!("Ollama Model: {}", args.ollama_model);
    info!("Max Input Length: {}", args.max_input_length);
    info!("Static Directory: {}", args.static_dir.display());
    match &args.prompt_path {
        Some(path) => info!("System Prompt: {}", path.display()),
        None => info!("System Prompt: built-in"),
    }
    info!("Debug: {}", args.debug);
    info!("-------------------------");

    let config = LlmConfig {
        base_url: args.ollama_host.clone(),
        completion_model: args.ollama_model.clone(),
    };
    let client = new_client(&config)?;

    if args.handshake {
        let report = handshake::run_checks(client.as_ref()).await;
        if !report.all_passed() {
            return Err(
                format!(
                    "Handshake failed: {}/{} checks passed",
                    report.passed(),
                    report.checks.len()
                ).into()
            );
        }
        return Ok(());
    }

    let status = client.check_health().await;
    if status.healthy {
        info!("Ollama: {}", status.message);
    } else {
        warn!("WARNING: {}", status.message);
    }

    let prompt = match &args.prompt_path {
        Some(path) => PromptTemplate::load(path)?,
        None => PromptTemplate::default(),
    };

    let state = AppState {
        client,
        prompt: Arc::new(prompt),
        max_input_length: args.max_input_length,
    };

    let static_dir = if args.static_dir.is_dir() {
        Some(args.static_dir.clone())
    } else {
        warn!("Static directory '{}' not found; chat UI disabled", args.static_dir.display());
        None
    };

    let addr = args
        .server_addr()
        .parse::<SocketAddr>()
        .map_err(|e| format!("Invalid server address '{}': {}", args.server_addr(), e))?;
    info!("Starting Test Case Generator on http://{}", addr);
    Server::new(addr, state, static_dir).run().await
}
