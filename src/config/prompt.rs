use std::fs;
use std::path::Path;
use log::info;
use thiserror::Error;

use crate::models::chat::ChatMessage;

/// Built-in system instruction for test case generation.
pub const SYSTEM_PROMPT: &str = "You are a professional QA Engineer and Test Case Generator. Your job is to generate comprehensive, well-structured test cases based on the user's input.

When the user provides a requirement, user story, or feature description, generate test cases using the following format for EACH test case:

**Test Case ID:** TC_XXX
**Title:** [Clear, descriptive title]
**Description:** [What is being tested]
**Preconditions:** [Any setup required before testing]
**Test Steps:**
1. [Step 1]
2. [Step 2]
3. [Step 3]
**Expected Result:** [What should happen]
**Priority:** [High / Medium / Low]
**Test Type:** [Functional / UI / Negative / Boundary / Integration]

---

Rules:
1. Generate at least 5 test cases per requirement
2. Include a mix of positive, negative, and edge case scenarios
3. Be specific and actionable in test steps
4. Prioritize test cases based on business impact
5. Include boundary value test cases where applicable
6. Each test case must be independent and self-contained
7. Use clear, professional language
8. Start with the most critical test cases first

Begin generating test cases for the user's input below.";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Prompt file IO error for '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Prompt file '{0}' is empty")]
    Empty(String),
}

/// System instruction wrapped around every user request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    system: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self { system: SYSTEM_PROMPT.to_string() }
    }
}

impl PromptTemplate {
    /// Reads a replacement system instruction from a UTF-8 text file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PromptError> {
        let display = path.as_ref().display().to_string();
        let text = fs::read_to_string(&path).map_err(|source| PromptError::Io {
            path: display.clone(),
            source,
        })?;
        if text.trim().is_empty() {
            return Err(PromptError::Empty(display));
        }
        info!("Loaded system prompt from '{}' ({} chars)", display, text.chars().count());
        Ok(Self { system: text })
    }

    /// Returns the system instruction followed by the user input, verbatim.
    pub fn build_messages(&self, user_input: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::system(self.system.as_str()), ChatMessage::user(user_input)]
    }
}

pub fn build_messages(user_input: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_input)]
}
