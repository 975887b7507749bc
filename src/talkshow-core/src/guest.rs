//! Guest records and the registry of invited guests.
//!
//! The registry keeps a name-embedding index for fuzzy speaker lookup. The index is
//! never refreshed implicitly: after any change to the guest list, call
//! [`GuestRegistry::update_embeddings`] before resolving speakers by embedding.

use std::fmt;

use serde::Deserialize;
use tracing::debug;

use crate::error::ShowError;
use crate::provider::Embedder;

/// Subject and object pronouns of a guest (e.g. "she" / "her").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pronouns {
    pub subject: String,
    pub object: String,
}

impl Pronouns {
    pub fn new(subject: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
        }
    }

    /// Parse the "subject/object" form used in provider responses.
    pub fn parse(text: &str) -> Result<Self, ShowError> {
        match text.split('/').map(str::trim).collect::<Vec<_>>().as_slice() {
            [subject, object] if !subject.is_empty() && !object.is_empty() => {
                Ok(Self::new(*subject, *object))
            }
            _ => Err(ShowError::schema(
                "guest",
                format!("pronouns must look like 'subject/object', got '{}'", text),
            )),
        }
    }
}

impl fmt::Display for Pronouns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subject, self.object)
    }
}

/// A guest on the show.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Guest {
    /// Unique within a registry.
    pub name: String,
    pub age: u32,
    pub pronouns: Pronouns,
    pub occupation: String,
    pub background: String,
}

impl Guest {
    pub fn new(
        name: impl Into<String>,
        age: u32,
        pronouns: Pronouns,
        occupation: impl Into<String>,
        background: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            age,
            pronouns,
            occupation: occupation.into(),
            background: background.into(),
        }
    }

    /// The line the host uses to introduce this guest.
    pub fn introduction(&self) -> String {
        format!(
            "Please welcome {}, a {}-year-old {}. {} has the following background: {}",
            self.name,
            self.age,
            self.occupation,
            capitalize(&self.pronouns.subject),
            self.background
        )
    }

    /// One-line profile used inside prompts.
    pub fn roster_line(&self) -> String {
        format!(
            "- {} ({}, {}, {}): {}",
            self.name, self.age, self.pronouns, self.occupation, self.background
        )
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A guest exactly as the provider describes it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuestTemplate {
    pub name: String,
    pub age: u32,
    pub pronouns: String,
    pub occupation: String,
    pub background: String,
}

impl TryFrom<GuestTemplate> for Guest {
    type Error = ShowError;

    fn try_from(template: GuestTemplate) -> Result<Self, Self::Error> {
        if template.name.trim().is_empty() {
            return Err(ShowError::schema("guest", "name must not be empty"));
        }
        if template.age == 0 {
            return Err(ShowError::schema(
                "guest",
                format!("age of '{}' must be positive", template.name),
            ));
        }
        Ok(Guest {
            pronouns: Pronouns::parse(&template.pronouns)?,
            name: template.name.trim().to_string(),
            age: template.age,
            occupation: template.occupation,
            background: template.background,
        })
    }
}

/// Guest names alongside their embedding vectors, in the same order.
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    pub names: Vec<String>,
    pub vectors: Vec<Vec<f32>>,
}

/// The invited guests, keyed by name, in invitation order.
#[derive(Debug, Clone, Default)]
pub struct GuestRegistry {
    guests: Vec<Guest>,
    index: NameIndex,
    index_stale: bool,
}

impl GuestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a guest. Returns `false` without changing anything if a guest with the
    /// same name is already registered.
    pub fn add(&mut self, guest: Guest) -> bool {
        if let Some(existing) = self.get(&guest.name) {
            if *existing != guest {
                debug!(name = %guest.name, "a different guest already holds this name");
            }
            return false;
        }
        self.guests.push(guest);
        self.index_stale = true;
        true
    }

    /// Remove the guest with this guest's name. Returns whether anything was removed.
    pub fn remove(&mut self, guest: &Guest) -> bool {
        self.remove_by_name(&guest.name).is_some()
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<Guest> {
        let position = self.guests.iter().position(|g| g.name == name)?;
        self.index_stale = true;
        Some(self.guests.remove(position))
    }

    /// Replace every guest at once, dropping later duplicates by name.
    pub fn replace_all(&mut self, guests: impl IntoIterator<Item = Guest>) {
        self.guests.clear();
        self.index_stale = true;
        for guest in guests {
            self.add(guest);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Guest> {
        self.guests.iter().find(|g| g.name == name)
    }

    pub fn guests(&self) -> &[Guest] {
        &self.guests
    }

    pub fn len(&self) -> usize {
        self.guests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guests.is_empty()
    }

    /// Recompute the name-embedding index from the current guests.
    pub async fn update_embeddings(&mut self, embedder: &dyn Embedder) -> Result<(), ShowError> {
        let names: Vec<String> = self.guests.iter().map(|g| g.name.clone()).collect();
        let vectors = if names.is_empty() {
            Vec::new()
        } else {
            embedder.embed_batch(&names).await?
        };
        if vectors.len() != names.len() {
            return Err(ShowError::ProviderUnavailable(format!(
                "embedder returned {} vectors for {} names",
                vectors.len(),
                names.len()
            )));
        }
        debug!(guests = names.len(), "name embeddings updated");
        self.index = NameIndex { names, vectors };
        self.index_stale = false;
        Ok(())
    }

    /// The embedding index, or an error if the guest list changed since it was built.
    pub fn name_index(&self) -> Result<&NameIndex, ShowError> {
        if self.index_stale {
            return Err(ShowError::StaleEmbeddingIndex);
        }
        Ok(&self.index)
    }

    /// Prompt-ready listing of every guest.
    pub fn roster(&self) -> String {
        self.guests
            .iter()
            .map(Guest::roster_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
