//! Planning the order of discussion steps.

use std::collections::VecDeque;

use serde::Deserialize;
use tracing::info;

use crate::config::{PromptsConfig, render_template};
use crate::error::ShowError;
use crate::guest::GuestRegistry;
use crate::provider::{GenerationRequest, TextGenerator, generate_structured};

pub const PLAN_SCHEMA: &str = r#"{"steps": [string]}"#;

/// Shown to the reflection step when the current step is the last one.
pub const NO_MORE_STEPS: &str = "(none, this is the final part of the debate)";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanResponse {
    steps: Vec<String>,
}

/// The discussion steps still ahead, current step first.
///
/// The debate ends when the plan runs out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebatePlan {
    steps: VecDeque<String>,
}

impl DebatePlan {
    pub fn new(steps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }

    /// The step being discussed.
    pub fn current(&self) -> Option<&str> {
        self.steps.front().map(String::as_str)
    }

    /// The step after the current one.
    pub fn upcoming(&self) -> Option<&str> {
        self.steps.get(1).map(String::as_str)
    }

    /// Drop the current step. Returns the step now in progress, if any.
    pub fn advance(&mut self) -> Option<&str> {
        self.steps.pop_front();
        self.current()
    }

    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Ask the provider for `step_count` ordered discussion steps.
///
/// A response that does not match the plan schema is an error; it is not retried.
pub async fn plan(
    generator: &dyn TextGenerator,
    prompts: &PromptsConfig,
    topic: &str,
    guests: &GuestRegistry,
    step_count: usize,
) -> Result<DebatePlan, ShowError> {
    let instructions = render_template(
        &prompts.plan,
        &[
            ("topic", topic),
            ("guests", &guests.roster()),
            ("step_count", &step_count.to_string()),
        ],
    );
    let request = GenerationRequest::new("plan", "Plan the debate.", instructions)
        .with_schema(PLAN_SCHEMA);

    let response: PlanResponse = generate_structured(generator, &request).await?;
    if let Some(blank) = response.steps.iter().position(|s| s.trim().is_empty()) {
        return Err(ShowError::schema(
            "plan",
            format!("step {} is empty", blank + 1),
        ));
    }

    info!(steps = response.steps.len(), "debate planned");
    Ok(DebatePlan::new(response.steps))
}
