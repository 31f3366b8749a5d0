//! Script generation capability.
//!
//! The capability is an untrusted text generator: it receives segment texts
//! and returns candidate turns, which the dialogue synthesizer validates.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{CandidateTurn, GeneratorError, SpeakerRole, Style};

const PROMPT_VERSION: &str = "dialogue-prompt-v1";

/// Input for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub style: Style,
    pub segments: Vec<String>,
    /// Speaker expected to open this batch.
    pub opening_speaker: SpeakerRole,
    /// Zero-based attempt number for this batch.
    pub attempt: u32,
}

/// A text generator that turns article segments into candidate turns.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    /// Identifies model and prompt; part of the script cache key.
    fn version(&self) -> String;

    /// Maximum combined segment characters accepted in one request.
    fn max_input_chars(&self) -> usize;

    /// Produce candidate turns for a batch of segments.
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<CandidateTurn>, GeneratorError>;
}

/// Settings for the HTTP script generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_input_chars: usize,
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            timeout_secs: 180,
            max_input_chars: 6000,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct WireTurn {
    speaker: String,
    text: String,
    #[serde(default)]
    continuation: bool,
}

/// Script generator backed by an Ollama-compatible chat endpoint.
pub struct HttpScriptGenerator {
    config: GeneratorConfig,
    client: Client,
}

impl HttpScriptGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, GeneratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GeneratorError::RequestFailed(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn system_prompt() -> String {
        [
            "You write the script of a two-host podcast that discusses an article.",
            "Hosts are HostA and HostB. They alternate; a host may only speak twice",
            "in a row if the second line sets \"continuation\": true.",
            "Cover every passage you are given. Do not add facts that are not in it.",
            "Reply with one JSON object per line and nothing else:",
            "{\"speaker\": \"HostA\", \"text\": \"...\", \"continuation\": false}",
        ]
        .join(" ")
    }

    fn user_prompt(request: &GenerationRequest) -> String {
        let mut prompt = format!(
            "{} opens this part of the conversation.\n\nPassages:\n",
            match request.opening_speaker {
                SpeakerRole::HostB => "HostB",
                _ => "HostA",
            }
        );
        for (i, segment) in request.segments.iter().enumerate() {
            prompt.push_str(&format!("[{}] {}\n", i + 1, segment));
        }
        prompt
    }
}

#[async_trait]
impl ScriptGenerator for HttpScriptGenerator {
    fn version(&self) -> String {
        format!("{}+{}", self.config.model, PROMPT_VERSION)
    }

    fn max_input_chars(&self) -> usize {
        self.config.max_input_chars
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<CandidateTurn>, GeneratorError> {
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Self::system_prompt(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::user_prompt(request),
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                GeneratorError::Unavailable(e.to_string())
            } else {
                GeneratorError::RequestFailed(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(GeneratorError::RequestFailed(format!(
                "Status: {}",
                response.status()
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::InvalidResponse(e.to_string()))?;

        debug!(
            attempt = request.attempt,
            chars = chat.message.content.len(),
            "generator replied"
        );
        parse_turns(&chat.message.content)
    }
}

/// Parse generator output leniently: code fences are ignored, the body may
/// be a JSON array or one JSON object per line, and unusable lines are
/// dropped. Validation happens later.
pub fn parse_turns(content: &str) -> Result<Vec<CandidateTurn>, GeneratorError> {
    let body: String = content
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");

    let wire: Vec<WireTurn> = match serde_json::from_str::<Vec<WireTurn>>(body.trim()) {
        Ok(turns) => turns,
        Err(_) => body
            .lines()
            .filter_map(|line| {
                let line = line.trim().trim_end_matches(',');
                serde_json::from_str::<WireTurn>(line).ok()
            })
            .collect(),
    };

    if wire.is_empty() {
        return Err(GeneratorError::InvalidResponse(
            "no turns found in generator output".to_string(),
        ));
    }

    Ok(wire
        .into_iter()
        .filter_map(|turn| {
            SpeakerRole::parse(&turn.speaker).map(|speaker| CandidateTurn {
                speaker,
                text: turn.text.trim().to_string(),
                continuation: turn.continuation,
            })
        })
        .collect())
}
