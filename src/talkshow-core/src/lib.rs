//! Talk show core library
//!
//! Invites a panel of guests for a topic, plans the debate, runs it one
//! host/guest exchange at a time and summarizes the result. Text generation,
//! embeddings and token counting come in through the traits in [`provider`].

pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod guest;
pub mod invitation;
pub mod openai;
pub mod planner;
pub mod provider;
pub mod speaker;
pub mod summarizer;

#[cfg(test)]
mod testing;

pub use config::{Config, DebateSettings, ModelConfig, PromptsConfig, default_config};
pub use conversation::{ConversationEntry, ConversationLog, DebateTurn, EntryKind, HOST_LABEL};
pub use engine::{DebateRun, DebateSession, Providers};
pub use error::ShowError;
pub use guest::{Guest, GuestRegistry, GuestTemplate, Pronouns};
pub use invitation::GuestInvitations;
pub use openai::{OpenAiEmbedder, OpenAiGenerator, OpenAiSettings};
pub use planner::DebatePlan;
pub use provider::{Embedder, GenerationRequest, HeuristicTokenCounter, TextGenerator, TokenCounter};
pub use speaker::SpeakerResolver;
