//! Inviting the panel of guests.
//!
//! Guests can be invited in one blocking call, or incrementally while the provider
//! streams its answer, so each guest shows up as soon as their record is complete.

use std::collections::VecDeque;

use futures::stream::{BoxStream, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{PromptsConfig, render_template};
use crate::error::ShowError;
use crate::guest::{Guest, GuestRegistry, GuestTemplate};
use crate::provider::{Embedder, GenerationRequest, TextGenerator, generate_structured};

pub const INVITE_SCHEMA: &str = concat!(
    r#"{"guests": [{"name": string, "age": positive integer, "pronouns": "subject/object", "#,
    r#""occupation": string, "background": string}]}"#
);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InviteResponse {
    guests: Vec<GuestTemplate>,
}

fn invite_request(prompts: &PromptsConfig, topic: &str, guest_count: usize) -> GenerationRequest {
    let instructions = render_template(
        &prompts.invite,
        &[("topic", topic), ("guest_count", &guest_count.to_string())],
    );
    GenerationRequest::new("invite", "Invite the guests for tonight's show.", instructions)
        .with_schema(INVITE_SCHEMA)
}

/// Invite every guest in one call and replace the registry's guests with them.
///
/// The name-embedding index is left stale; the caller refreshes it.
pub async fn invite_all(
    generator: &dyn TextGenerator,
    prompts: &PromptsConfig,
    topic: &str,
    guest_count: usize,
    registry: &mut GuestRegistry,
) -> Result<Vec<Guest>, ShowError> {
    let request = invite_request(prompts, topic, guest_count);
    let response: InviteResponse = generate_structured(generator, &request).await?;
    let guests = response
        .guests
        .into_iter()
        .map(Guest::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    registry.replace_all(guests);
    info!(guests = registry.len(), "guests invited");
    Ok(registry.guests().to_vec())
}

/// Start inviting guests one at a time as the provider streams its answer.
pub async fn invite_incrementally<'a>(
    generator: &dyn TextGenerator,
    embedder: &'a dyn Embedder,
    prompts: &PromptsConfig,
    topic: &str,
    guest_count: usize,
    registry: &'a mut GuestRegistry,
) -> Result<GuestInvitations<'a>, ShowError> {
    let request = invite_request(prompts, topic, guest_count);
    let deltas = generator.generate_stream(&request).await?;
    Ok(GuestInvitations {
        deltas,
        buffer: String::new(),
        seen: 0,
        ready: VecDeque::new(),
        registry,
        embedder,
        finished: false,
    })
}

/// Guests arriving from a streamed invitation. Each guest is added to the registry
/// and the name-embedding index refreshed as it is handed out, so dropping the
/// sequence early leaves a registry that holds exactly the guests received.
pub struct GuestInvitations<'a> {
    deltas: BoxStream<'static, Result<String, ShowError>>,
    buffer: String,
    /// Guest records already taken from the partial list.
    seen: usize,
    /// Parsed guests not yet handed out or registered.
    ready: VecDeque<Result<Guest, ShowError>>,
    registry: &'a mut GuestRegistry,
    embedder: &'a dyn Embedder,
    finished: bool,
}

impl GuestInvitations<'_> {
    /// The next newly invited guest, or `None` once the invitation is complete.
    ///
    /// A complete guest record that fails validation comes out as an error without
    /// ending the sequence. A provider failure ends it.
    pub async fn next(&mut self) -> Option<Result<Guest, ShowError>> {
        loop {
            match self.ready.pop_front() {
                Some(Ok(guest)) => {
                    if !self.registry.add(guest.clone()) {
                        debug!(name = %guest.name, "skipping already invited guest");
                        continue;
                    }
                    debug!(name = %guest.name, "guest invited");
                    if let Err(e) = self.registry.update_embeddings(self.embedder).await {
                        return Some(Err(e));
                    }
                    return Some(Ok(guest));
                }
                Some(Err(e)) => return Some(Err(e)),
                None => {}
            }
            if self.finished {
                return None;
            }
            match self.deltas.next().await {
                Some(Ok(delta)) => self.absorb(&delta),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    info!(guests = self.registry.len(), "guest invitations complete");
                }
            }
        }
    }

    fn absorb(&mut self, delta: &str) {
        for ch in delta.chars() {
            self.buffer.push(ch);
            // A new guest can only become complete when its object closes.
            if ch != '}' {
                continue;
            }
            let templates = match parse_partial_guests(&self.buffer) {
                Ok(templates) => templates,
                Err(_) => continue,
            };
            for template in templates.into_iter().skip(self.seen) {
                self.seen += 1;
                match Guest::try_from(template) {
                    Ok(guest) => self.ready.push_back(Ok(guest)),
                    Err(e) => {
                        warn!(error = %e, "invalid guest in invitation stream");
                        self.ready.push_back(Err(e));
                    }
                }
            }
        }
    }
}

/// Parse the guests list out of a truncated `{"guests": [...` response by closing
/// the list and object. Anything not yet parseable is [`ShowError::StreamParseIncomplete`].
pub(crate) fn parse_partial_guests(buffer: &str) -> Result<Vec<GuestTemplate>, ShowError> {
    let start = buffer.find('{').ok_or(ShowError::StreamParseIncomplete)?;
    let candidate = format!("{}]}}", &buffer[start..]);
    serde_json::from_str::<InviteResponse>(&candidate)
        .map(|response| response.guests)
        .map_err(|_| ShowError::StreamParseIncomplete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedGenerator, TableEmbedder};

    const ALICE: &str = concat!(
        r#"{"name": "Alice", "age": 41, "pronouns": "she/her", "#,
        r#""occupation": "climatologist", "background": "Studies {ice} cores."}"#
    );
    const BOB: &str = concat!(
        r#"{"name": "Bob", "age": 57, "pronouns": "he/him", "#,
        r#""occupation": "engineer", "background": "Builds dams."}"#
    );

    fn full_response() -> String {
        format!(r#"{{"guests": [{}, {}]}}"#, ALICE, BOB)
    }

    fn embedder() -> TableEmbedder {
        TableEmbedder::new(&[("Alice", vec![1.0, 0.0]), ("Bob", vec![0.0, 1.0])])
    }

    #[test]
    fn test_parse_partial_guests() {
        assert!(parse_partial_guests("").is_err());
        assert!(parse_partial_guests(r#"{"gue"#).is_err());
        assert_eq!(parse_partial_guests(r#"{"guests": ["#).unwrap().len(), 0);
        let one = format!(r#"{{"guests": [{}"#, ALICE);
        assert_eq!(parse_partial_guests(&one).unwrap()[0].name, "Alice");
        let trailing_comma = format!(r#"{{"guests": [{},"#, ALICE);
        assert!(parse_partial_guests(&trailing_comma).is_err());
        // The finished document no longer parses once closed twice.
        assert!(parse_partial_guests(&full_response()).is_err());
    }

    #[test]
    fn test_parse_partial_guests_ignores_code_fence() {
        let fenced = format!("```json\n{{\"guests\": [{}", BOB);
        assert_eq!(parse_partial_guests(&fenced).unwrap()[0].name, "Bob");
    }

    #[tokio::test]
    async fn test_invite_all_replaces_registry() {
        let response = full_response();
        let generator = ScriptedGenerator::new(move |_| Ok(response.clone()));
        let mut registry = GuestRegistry::new();
        registry.add(Guest::new(
            "Old",
            30,
            crate::guest::Pronouns::new("he", "him"),
            "x",
            "y",
        ));

        let guests = invite_all(
            &generator,
            &PromptsConfig::default(),
            "Dams",
            2,
            &mut registry,
        )
        .await
        .unwrap();

        assert_eq!(guests.len(), 2);
        assert!(registry.get("Old").is_none());
        assert_eq!(registry.get("Bob").unwrap().age, 57);
        let calls = generator.calls();
        assert_eq!(calls[0].schema, Some(INVITE_SCHEMA));
        assert!(calls[0].instructions.contains("Dams"));
    }

    #[tokio::test]
    async fn test_invite_all_schema_violation() {
        let generator =
            ScriptedGenerator::new(|_| Ok(r#"{"guests": [{"name": "Alice"}]}"#.to_string()));
        let mut registry = GuestRegistry::new();
        let err = invite_all(&generator, &PromptsConfig::default(), "t", 1, &mut registry)
            .await
            .unwrap_err();
        assert!(matches!(err, ShowError::SchemaViolation { .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_invite_incrementally_yields_each_guest_once() {
        let response = full_response();
        let (head, tail) = response.split_at(37);
        let (middle, rest) = tail.split_at(90);
        // Trailing whitespace after the closing brace must not duplicate a guest.
        let chunks = [head, middle, rest, "\n\n"];
        let generator = ScriptedGenerator::new(|_| unreachable!()).with_stream(&chunks);
        let embedder = embedder();
        let mut registry = GuestRegistry::new();

        let mut invitations = invite_incrementally(
            &generator,
            &embedder,
            &PromptsConfig::default(),
            "Dams",
            2,
            &mut registry,
        )
        .await
        .unwrap();

        let mut names = Vec::new();
        while let Some(guest) = invitations.next().await {
            names.push(guest.unwrap().name);
        }
        assert!(invitations.next().await.is_none());
        drop(invitations);

        assert_eq!(names, vec!["Alice", "Bob"]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.name_index().unwrap().names.len(), 2);
    }

    #[tokio::test]
    async fn test_invite_incrementally_reports_invalid_guest_and_continues() {
        let bad = concat!(
            r#"{"name": "Zero", "age": 0, "pronouns": "they/them", "#,
            r#""occupation": "o", "background": "b"}"#
        );
        let response = format!(r#"{{"guests": [{}, {}]}}"#, bad, BOB);
        let generator =
            ScriptedGenerator::new(|_| unreachable!()).with_stream(&[response.as_str()]);
        let embedder = embedder();
        let mut registry = GuestRegistry::new();

        let mut invitations = invite_incrementally(
            &generator,
            &embedder,
            &PromptsConfig::default(),
            "Dams",
            2,
            &mut registry,
        )
        .await
        .unwrap();

        assert!(matches!(
            invitations.next().await,
            Some(Err(ShowError::SchemaViolation { .. }))
        ));
        assert_eq!(invitations.next().await.unwrap().unwrap().name, "Bob");
        assert!(invitations.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_invitations_keeps_only_received_guests() {
        let response = full_response();
        let generator =
            ScriptedGenerator::new(|_| unreachable!()).with_stream(&[response.as_str()]);
        let embedder = embedder();
        let mut registry = GuestRegistry::new();

        let mut invitations = invite_incrementally(
            &generator,
            &embedder,
            &PromptsConfig::default(),
            "Dams",
            2,
            &mut registry,
        )
        .await
        .unwrap();
        assert_eq!(invitations.next().await.unwrap().unwrap().name, "Alice");
        drop(invitations);

        assert_eq!(registry.len(), 1);
        assert!(registry.get("Bob").is_none());
        assert_eq!(registry.name_index().unwrap().names, vec!["Alice".to_string()]);
    }
}
