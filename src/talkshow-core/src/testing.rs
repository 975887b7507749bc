//! Scripted stand-ins for the provider capabilities, used by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::ShowError;
use crate::provider::{Embedder, GenerationRequest, TextGenerator};

type Responder = Box<dyn Fn(&GenerationRequest) -> Result<String, ShowError> + Send + Sync>;

/// Answers each request through a closure, usually routed on `request.label`.
pub(crate) struct ScriptedGenerator {
    respond: Responder,
    chunks: Vec<String>,
    delays: Vec<(&'static str, Duration)>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub(crate) fn new(
        respond: impl Fn(&GenerationRequest) -> Result<String, ShowError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            chunks: Vec::new(),
            delays: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Stream these deltas from `generate_stream`.
    pub(crate) fn with_stream(mut self, chunks: &[&str]) -> Self {
        self.chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Sleep before answering requests with this label. Can be given per label.
    pub(crate) fn with_delay(mut self, label: &'static str, delay: Duration) -> Self {
        self.delays.push((label, delay));
        self
    }

    pub(crate) fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, label: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.label == label)
            .count()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ShowError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some((_, delay)) = self.delays.iter().find(|(label, _)| *label == request.label) {
            tokio::time::sleep(*delay).await;
        }
        (self.respond)(request)
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<BoxStream<'static, Result<String, ShowError>>, ShowError> {
        self.calls.lock().unwrap().push(request.clone());
        Ok(stream::iter(self.chunks.clone().into_iter().map(Ok)).boxed())
    }
}

/// Looks vectors up in a fixed table and counts every call.
pub(crate) struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl TableEmbedder {
    pub(crate) fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(name, vector)| (name.to_string(), vector.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ShowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| ShowError::ProviderUnavailable(format!("no vector for '{}'", text)))
    }
}
