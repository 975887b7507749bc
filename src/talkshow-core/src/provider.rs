//! Capabilities the show consumes: text generation, embeddings and token counting.
//!
//! The core only depends on these traits. Concrete OpenAI-backed adapters live in
//! [`crate::openai`]; tests plug in scripted fakes.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;

use crate::error::ShowError;

/// A single request to the text generation provider.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// What the call is for (e.g. "host_turn"). Used for logging and schema errors.
    pub label: &'static str,
    /// The user-side input.
    pub input: String,
    /// System-side instructions.
    pub instructions: String,
    /// JSON shape the response must follow, if the call is structured.
    pub schema: Option<&'static str>,
}

impl GenerationRequest {
    pub fn new(
        label: &'static str,
        input: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            label,
            input: input.into(),
            instructions: instructions.into(),
            schema: None,
        }
    }

    /// Ask for a structured response following `schema`.
    pub fn with_schema(mut self, schema: &'static str) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// Produces text for a request, either in one piece or incrementally.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a complete response.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ShowError>;

    /// Generate a response as a stream of text deltas.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<BoxStream<'static, Result<String, ShowError>>, ShowError>;
}

/// Turns text into a fixed-length vector for similarity search.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ShowError>;

    /// Embed several texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ShowError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Counts tokens to keep prompts inside the context window.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

/// Rough estimate of about four characters per token.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// Generate a response and parse it into `T`.
///
/// Any mismatch between the response and `T` is a [`ShowError::SchemaViolation`];
/// it is not retried.
pub async fn generate_structured<T: DeserializeOwned>(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
) -> Result<T, ShowError> {
    let raw = generator.generate(request).await?;
    parse_structured(request.label, &raw)
}

/// Parse a structured response, tolerating a surrounding Markdown code fence.
pub fn parse_structured<T: DeserializeOwned>(what: &str, raw: &str) -> Result<T, ShowError> {
    serde_json::from_str(strip_code_fence(raw)).map_err(|e| ShowError::schema(what, e))
}

/// Remove a leading ```` ```json ```` fence and its closing fence, if present.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
