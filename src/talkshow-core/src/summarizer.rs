//! Post-show summaries.
//!
//! The transcript is cut into host-led segments, each segment is summarized
//! concurrently, and the numbered segment summaries are condensed into one overall
//! summary.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::{PromptsConfig, render_template};
use crate::conversation::DebateTurn;
use crate::error::ShowError;
use crate::provider::{GenerationRequest, TextGenerator};

/// Split a chronological transcript into segments that each start at a host turn
/// and run up to the next one.
pub fn partition_segments(chronological: &[DebateTurn]) -> Vec<Vec<DebateTurn>> {
    let mut segments: Vec<Vec<DebateTurn>> = Vec::new();
    for turn in chronological {
        match segments.last_mut() {
            Some(segment) if !turn.is_host() => segment.push(turn.clone()),
            _ => segments.push(vec![turn.clone()]),
        }
    }
    segments
}

fn segment_request(
    prompts: &PromptsConfig,
    topic: &str,
    segment: &[DebateTurn],
) -> GenerationRequest {
    let section = segment
        .iter()
        .map(|turn| format!("{}: {}", turn.speaker_label, turn.message))
        .collect::<Vec<_>>()
        .join("\n");
    let instructions = render_template(
        &prompts.summarize_step,
        &[("topic", topic), ("section", &section)],
    );
    GenerationRequest::new("summarize_step", "Summary:", instructions)
}

/// Summarize every segment of a newest-first transcript, concurrently.
///
/// Returns the summaries numbered in chronological order. The first failing
/// segment fails the whole call and cancels the others.
pub async fn summarize_steps(
    generator: Arc<dyn TextGenerator>,
    prompts: &PromptsConfig,
    transcript: &[DebateTurn],
    topic: &str,
) -> Result<String, ShowError> {
    let chronological: Vec<DebateTurn> = transcript.iter().rev().cloned().collect();
    let segments = partition_segments(&chronological);
    let mut summaries = vec![String::new(); segments.len()];

    let mut tasks = JoinSet::new();
    for (position, segment) in segments.iter().enumerate() {
        let generator = generator.clone();
        let request = segment_request(prompts, topic, segment);
        tasks.spawn(async move { (position, generator.generate(&request).await) });
    }

    while let Some(joined) = tasks.join_next().await {
        let (position, summary) = joined.map_err(|e| ShowError::TaskFailed(e.to_string()))?;
        debug!(segment = position + 1, "segment summarized");
        summaries[position] = summary?.trim().to_string();
    }

    Ok(summaries
        .iter()
        .enumerate()
        .map(|(i, summary)| format!("{}. {}", i + 1, summary))
        .collect::<Vec<_>>()
        .join("\n\n"))
}

/// Summarize the whole debate from a newest-first transcript.
pub async fn summarize(
    generator: Arc<dyn TextGenerator>,
    prompts: &PromptsConfig,
    transcript: &[DebateTurn],
    topic: &str,
) -> Result<String, ShowError> {
    if transcript.is_empty() {
        debug!("nothing to summarize");
        return Ok(String::new());
    }
    let sections = summarize_steps(generator.clone(), prompts, transcript, topic).await?;
    let instructions = render_template(
        &prompts.summarize_debate,
        &[("topic", topic), ("sections", &sections)],
    );
    let request = GenerationRequest::new("summarize_debate", "Summary:", instructions);
    let summary = generator.generate(&request).await?;
    info!("debate summarized");
    Ok(summary.trim().to_string())
}
