//! Maps a free-text speaker name back to a registered guest.

use tracing::debug;

use crate::error::ShowError;
use crate::guest::{Guest, GuestRegistry};
use crate::provider::Embedder;

/// Default minimum cosine similarity for a fuzzy name match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

/// Resolves speaker names against a [`GuestRegistry`].
#[derive(Debug, Clone, Copy)]
pub struct SpeakerResolver {
    threshold: f32,
}

impl Default for SpeakerResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl SpeakerResolver {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Find the guest `query` refers to.
    ///
    /// An exact name match wins without consulting the embedder. Otherwise the
    /// closest indexed name is accepted only if its similarity exceeds the
    /// threshold; `Ok(None)` means no guest is close enough.
    pub async fn resolve<'r>(
        &self,
        registry: &'r GuestRegistry,
        embedder: &dyn Embedder,
        query: &str,
    ) -> Result<Option<&'r Guest>, ShowError> {
        if let Some(guest) = registry.get(query) {
            return Ok(Some(guest));
        }

        let index = registry.name_index()?;
        if index.names.is_empty() {
            return Ok(None);
        }

        let query_vector = embedder.embed(query).await?;
        let best = index
            .vectors
            .iter()
            .map(|v| cosine_similarity(&query_vector, v))
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b));

        let Some((position, similarity)) = best else {
            return Ok(None);
        };
        let candidate = &index.names[position];
        debug!(query, candidate = %candidate, similarity, "fuzzy speaker match");

        if similarity > self.threshold {
            Ok(registry.get(candidate))
        } else {
            Ok(None)
        }
    }

    /// Like [`SpeakerResolver::resolve`], but a missing match is a
    /// [`ShowError::SpeakerNotFound`].
    pub async fn require<'r>(
        &self,
        registry: &'r GuestRegistry,
        embedder: &dyn Embedder,
        query: &str,
    ) -> Result<&'r Guest, ShowError> {
        self.resolve(registry, embedder, query)
            .await?
            .ok_or_else(|| ShowError::SpeakerNotFound(query.to_string()))
    }
}

/// Compute cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
