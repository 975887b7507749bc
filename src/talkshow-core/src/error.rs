//! Error types for the talk show.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShowError {
    #[error("Response for '{what}' does not match its schema: {reason}")]
    SchemaViolation { what: String, reason: String },

    #[error("No guest matches the speaker name '{0}'")]
    SpeakerNotFound(String),

    #[error("A guest named '{0}' is already on the panel")]
    DuplicateGuest(String),

    #[error("Streamed response is not yet complete structured data")]
    StreamParseIncomplete,

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Name embeddings are out of date; call update_embeddings after changing the guest list")]
    StaleEmbeddingIndex,

    #[error("Cycle {cycle} failed on step '{step}': {source}")]
    CycleFailed {
        cycle: usize,
        step: String,
        #[source]
        source: Box<ShowError>,
    },

    #[error("Cycle did not finish within {secs}s")]
    CycleTimeout { secs: u64 },

    #[error("Worker task failed: {0}")]
    TaskFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ShowError {
    pub(crate) fn schema(what: impl Into<String>, reason: impl ToString) -> Self {
        ShowError::SchemaViolation {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the debate can carry on after this error by retrying or skipping the step.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ShowError::CycleFailed { source, .. } => source.is_recoverable(),
            ShowError::SpeakerNotFound(_)
            | ShowError::SchemaViolation { .. }
            | ShowError::StreamParseIncomplete
            | ShowError::CycleTimeout { .. } => true,
            _ => false,
        }
    }
}
