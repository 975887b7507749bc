//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::ShowError;
use crate::speaker::DEFAULT_SIMILARITY_THRESHOLD;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub debate: DebateSettings,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

/// How the debate is run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebateSettings {
    /// Number of guests to invite.
    pub guest_count: usize,
    /// Number of steps to ask the planner for.
    pub plan_steps: usize,
    /// Token budget for conversation history inside prompts.
    pub context_tokens: usize,
    /// Minimum cosine similarity for fuzzy speaker matches.
    pub similarity_threshold: f32,
    /// Hard ceiling on cycles, in case no step is ever reported complete.
    pub max_cycles: Option<usize>,
    /// Per-cycle deadline.
    pub cycle_timeout_secs: Option<u64>,
    /// Have the host introduce each guest after the welcome.
    pub introduce_guests: bool,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            guest_count: 4,
            plan_steps: 5,
            context_tokens: 3000,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_cycles: Some(24),
            cycle_timeout_secs: Some(300),
            introduce_guests: false,
        }
    }
}

/// Model selection for the OpenAI-compatible provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub embedding_model: String,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            max_tokens: 800,
        }
    }
}

/// Prompt templates. Placeholders look like `{topic}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub welcome: String,
    pub invite: String,
    pub plan: String,
    pub host_turn: String,
    pub guest_turn: String,
    pub reflect: String,
    pub summarize_step: String,
    pub summarize_debate: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            welcome: DEFAULT_WELCOME.to_string(),
            invite: DEFAULT_INVITE.to_string(),
            plan: DEFAULT_PLAN.to_string(),
            host_turn: DEFAULT_HOST_TURN.to_string(),
            guest_turn: DEFAULT_GUEST_TURN.to_string(),
            reflect: DEFAULT_REFLECT.to_string(),
            summarize_step: DEFAULT_SUMMARIZE_STEP.to_string(),
            summarize_debate: DEFAULT_SUMMARIZE_DEBATE.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ShowError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ShowError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, ShowError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| ShowError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ShowError> {
        let threshold = self.debate.similarity_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(ShowError::ConfigError(format!(
                "similarity_threshold must be within [-1, 1], got {}",
                threshold
            )));
        }
        if self.debate.guest_count == 0 {
            return Err(ShowError::ConfigError(
                "guest_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config::default()
}

/// Replace every `{key}` in `template` with its value.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |text, (key, value)| {
            text.replace(&format!("{{{}}}", key), value)
        })
}

const DEFAULT_WELCOME: &str =
    "Good evening and welcome to the show! Tonight's topic: {topic}. Joining me are {guest_names}.";

const DEFAULT_INVITE: &str = r#"You are the host of a lively talk show. Tonight's topic is:

{topic}

Invite {guest_count} guests who will make for an insightful, balanced and lively debate.
Choose people with clearly different perspectives and relevant expertise.
For each guest give a name, an age, pronouns written as "subject/object" (for example "she/her"),
an occupation and a short background that explains their stance on the topic.
"#;

const DEFAULT_PLAN: &str = r#"You are preparing a talk show debate on the topic:

{topic}

These guests are on the panel:
{guests}

Plan the debate as {step_count} ordered discussion steps. Each step is one short sentence
describing the sub-topic or objective the panel should cover before moving on.
"#;

const DEFAULT_HOST_TURN: &str = r#"You are the host of a talk show debating: {topic}

Guests on the panel:
{guests}

The current part of the debate is: {step}

Conversation so far:
{conversation}

Decide which guest should speak next and what you say to them. Keep the debate moving, give
quieter guests the floor and challenge weak arguments. The speaker must be one of the guest names
above, spelled exactly.
"#;

const DEFAULT_GUEST_TURN: &str = r#"You are {name}, a {age}-year-old {occupation} (pronouns {pronouns}), appearing as a guest on a talk show about: {topic}

Your background: {background}

Conversation so far:
{conversation}

The host just said to you: {host_message}

Answer in character, in a few sentences of natural speech. Output only your spoken words.
"#;

const DEFAULT_REFLECT: &str = r#"You are the producer of a talk show debating: {topic}

The current part of the debate is: {step}
The part after it is: {next_step}

Conversation so far:
{conversation}

Has the current part been covered well enough to move on?
"#;

const DEFAULT_SUMMARIZE_STEP: &str = r#"Summarize this section of a talk show debate about "{topic}" in two or three sentences.
Name who argued what.

{section}
"#;

const DEFAULT_SUMMARIZE_DEBATE: &str = r#"These are summaries of each section of a talk show debate about "{topic}":

{sections}

Write an overall summary of the debate: the main positions, where the guests agreed and where
they did not.
"#;
