use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Interface the HTTP server binds to.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port the HTTP server listens on.
    #[arg(long, env = "PORT", default_value = "5000")]
    pub port: u16,

    /// Directory holding index.html and the front-end assets.
    #[arg(long, env = "STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    /// Maximum accepted input length, in characters, after trimming.
    #[arg(long, env = "MAX_INPUT_LENGTH", default_value = "5000")]
    pub max_input_length: usize,

    // --- Ollama Args ---
    /// Base URL of the Ollama server (e.g., http://localhost:11434)
    #[arg(long, env = "OLLAMA_HOST", default_value = "http://localhost:11434")]
    pub ollama_host: String,

    /// Model used for generation. Tag suffixes such as `:latest` are matched by prefix.
    #[arg(long, env = "OLLAMA_MODEL", default_value = "llama3.2")]
    pub ollama_model: String,

    /// Optional text file replacing the built-in system prompt.
    #[arg(long, env = "PROMPT_PATH")]
    pub prompt_path: Option<PathBuf>,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Verify the link to Ollama (server, model, reply) and exit.
    #[arg(long, default_value = "false")]
    pub handshake: bool,
}

impl Args {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
