//! OpenAI-compatible provider adapters.
//!
//! Chat completions go through `async-openai`; embeddings are posted to the
//! `/embeddings` endpoint directly. Retries for transient API failures live here,
//! not in the debate engine.

use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::error::ShowError;
use crate::provider::{Embedder, GenerationRequest, TextGenerator};

const MAX_RETRIES: u32 = 3;

/// Connection settings for an OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    /// OpenAI-compatible API base URL.
    pub api_base: String,
    /// API key for authentication.
    pub api_key: String,
    pub model: String,
    pub embedding_model: String,
    /// Completion length limit.
    pub max_tokens: u32,
}

impl OpenAiSettings {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: &ModelConfig,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.name.clone(),
            embedding_model: model.embedding_model.clone(),
            max_tokens: model.max_tokens,
        }
    }
}

fn http_client() -> Result<reqwest::Client, ShowError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| ShowError::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

/// Text generation through the chat completions API.
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
}

impl OpenAiGenerator {
    pub fn new(settings: &OpenAiSettings) -> Result<Self, ShowError> {
        let config = OpenAIConfig::new()
            .with_api_key(&settings.api_key)
            .with_api_base(&settings.api_base);

        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client()?),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        })
    }

    fn chat_request(
        &self,
        request: &GenerationRequest,
    ) -> Result<CreateChatCompletionRequest, ShowError> {
        let system_prompt = match request.schema {
            Some(schema) => format!(
                "{}\n\nRespond ONLY with a JSON object of this shape, with no other text:\n{}",
                request.instructions, schema
            ),
            None => request.instructions.clone(),
        };

        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: system_prompt.into(),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: request.input.clone().into(),
                name: None,
            }),
        ];

        Ok(CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(self.max_tokens)
            .messages(messages)
            .build()?)
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ShowError> {
        let chat_request = self.chat_request(request)?;

        // Retry logic with exponential backoff
        let mut last_error = None;
        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // 2s, 4s
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }

            match self.client.chat().create(chat_request.clone()).await {
                Ok(response) => {
                    let content = response
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default();
                    debug!(label = request.label, chars = content.len(), "completion received");
                    return Ok(match request.schema {
                        Some(_) => content,
                        None => sanitize_response(&content),
                    });
                }
                Err(e) => {
                    warn!(
                        label = request.label,
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        error = %e,
                        "completion failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.map(ShowError::from).unwrap_or_else(|| {
            ShowError::ProviderUnavailable("Unknown API error after retries".to_string())
        }))
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<BoxStream<'static, Result<String, ShowError>>, ShowError> {
        let chat_request = self.chat_request(request)?;
        let stream = self.client.chat().create_stream(chat_request).await?;

        Ok(stream
            .filter_map(|chunk| {
                future::ready(match chunk {
                    Ok(response) => response
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                        .map(Ok),
                    Err(e) => Some(Err(ShowError::from(e))),
                })
            })
            .boxed())
    }
}

/// Embeddings through the `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(settings: &OpenAiSettings) -> Result<Self, ShowError> {
        Ok(Self {
            http: http_client()?,
            url: format!("{}/embeddings", settings.api_base.trim_end_matches('/')),
            api_key: settings.api_key.clone(),
            model: settings.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ShowError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| ShowError::ProviderUnavailable("empty embeddings response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ShowError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShowError::ProviderUnavailable(format!(
                "embeddings request failed\n\nStatus: {}\nBody: {}",
                status, body
            )));
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|d| d.index);
        debug!(inputs = texts.len(), "embeddings received");
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Sanitize AI response by stripping reasoning tokens and XML-like tags.
///
/// Removes patterns like <thinking>...</thinking>, <reflection>...</reflection>, etc.
fn sanitize_response(response: &str) -> String {
    // List of known reasoning/internal tags to strip with their content
    let tags_to_strip = [
        "thinking",
        "think",
        "reflection",
        "reasoning",
        "thought",
        "scratchpad",
        "analysis",
    ];

    let mut result = response.to_string();

    for tag in &tags_to_strip {
        let pattern = format!(r"(?is)<{tag}[^>]*>.*?</{tag}>", tag = tag);
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re.replace_all(&result, "").to_string();
        }
    }

    // Orphaned opening/closing tags
    if let Ok(orphan_re) = regex::Regex::new(r"</?[\w]+[^>]*>") {
        result = orphan_re.replace_all(&result, "").to_string();
    }

    // Stage directions such as "(leans forward)" at the start of the reply
    if let Ok(stage_re) = regex::Regex::new(r"^\s*\([^)]*\)\s*") {
        result = stage_re.replace(&result, "").to_string();
    }

    result = result.replace("*", "");

    if let Ok(ws_re) = regex::Regex::new(r"\s+") {
        result = ws_re.replace_all(&result, " ").to_string();
    }

    result.trim().to_string()
}
