//! Link verification against the inference server.
//!
//! Runs three checks in order (server reachable, model installed, model
//! answers) and logs a PASS/FAIL line for each.

use log::{ error, info };

use crate::llm::chat::ChatClient;
use crate::models::chat::ChatMessage;

pub const HANDSHAKE_PROMPT: &str = "Respond with exactly: HANDSHAKE_OK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct HandshakeReport {
    pub checks: Vec<CheckOutcome>,
}

impl HandshakeReport {
    pub fn passed(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn all_passed(&self) -> bool {
        !self.checks.is_empty() && self.checks.iter().all(|c| c.passed)
    }

    fn record(&mut self, name: &'static str, result: Result<String, String>) {
        let index = self.checks.len() + 1;
        let (passed, detail) = match result {
            Ok(detail) => {
                info!("[PASS] Check {}: {} - {}", index, name, detail);
                (true, detail)
            }
            Err(detail) => {
                error!("[FAIL] Check {}: {} - {}", index, name, detail);
                (false, detail)
            }
        };
        self.checks.push(CheckOutcome { name, passed, detail });
    }
}

pub async fn run_checks(client: &dyn ChatClient) -> HandshakeReport {
    let mut report = HandshakeReport::default();
    let model = client.get_model();

    let listed = client.list_models().await;
    report.record(
        "Ollama server is running",
        listed
            .as_ref()
            .map(|models| format!("available models: {:?}", models))
            .map_err(|e| format!("cannot connect to Ollama: {}", e.reason()))
    );

    let available = match &listed {
        Ok(models) if models.iter().any(|name| name.starts_with(&model)) =>
            Ok(format!("model '{}' is available", model)),
        Ok(models) => Err(format!("model '{}' not found. Available: {:?}", model, models)),
        Err(e) => Err(format!("error checking model: {}", e.reason())),
    };
    report.record("Model is available", available);

    info!("Sending test prompt to '{}'... (this may take a moment)", model);
    let reply = client
        .generate(&[ChatMessage::user(HANDSHAKE_PROMPT)]).await
        .map(|content| {
            let preview: String = content.chars().take(100).collect();
            format!("response: {}", preview)
        })
        .map_err(|e| format!("model did not respond: {}", e));
    report.record("Model responds", reply);

    if report.all_passed() {
        info!("ALL CHECKS PASSED ({}/{}) - link is ready", report.passed(), report.checks.len());
    } else {
        error!("SOME CHECKS FAILED ({}/{}) - link is broken", report.passed(), report.checks.len());
    }
    report
}
