//! Debate session and cycle engine.
//!
//! A [`DebateSession`] owns the guests, the transcript and the plan for one topic.
//! [`DebateSession::run_debate`] drives the show as a pull-based sequence of turns:
//!
//! ```text
//! welcome ─► cycle 1 ─► cycle 2 ─► ... ─► plan empty
//!             ├─ turn task:       host turn, then the addressed guest's reply
//!             └─ reflection task: is the current step complete?
//! ```
//!
//! Both tasks of a cycle run concurrently on snapshots of the log and guest list.
//! Only the run itself writes to the log and plan, when a cycle is joined. Delivery
//! trails generation by one cycle: cycle N+1 is already running while the caller
//! pulls the turns of cycle N.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use serde::Deserialize;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::{Config, DebateSettings, PromptsConfig, render_template};
use crate::conversation::{ConversationLog, DebateTurn, HOST_LABEL};
use crate::error::ShowError;
use crate::guest::{Guest, GuestRegistry};
use crate::invitation::{self, GuestInvitations};
use crate::planner::{self, DebatePlan, NO_MORE_STEPS};
use crate::provider::{
    Embedder, GenerationRequest, TextGenerator, TokenCounter, generate_structured,
};
use crate::speaker::SpeakerResolver;
use crate::summarizer;

pub const HOST_TURN_SCHEMA: &str =
    r#"{"speaker": string (exact name of the guest you address), "message": string}"#;
pub const REFLECTION_SCHEMA: &str = r#"{"done": boolean}"#;

/// The capabilities a session talks to.
#[derive(Clone)]
pub struct Providers {
    pub generator: Arc<dyn TextGenerator>,
    pub embedder: Arc<dyn Embedder>,
    pub counter: Arc<dyn TokenCounter>,
}

/// Everything belonging to one show on one topic.
pub struct DebateSession {
    topic: String,
    settings: DebateSettings,
    prompts: Arc<PromptsConfig>,
    providers: Providers,
    registry: GuestRegistry,
    log: ConversationLog,
    plan: DebatePlan,
}

impl DebateSession {
    pub fn new(topic: impl Into<String>, config: &Config, providers: Providers) -> Self {
        Self {
            topic: topic.into(),
            settings: config.debate.clone(),
            prompts: Arc::new(config.prompts.clone()),
            providers,
            registry: GuestRegistry::new(),
            log: ConversationLog::new(),
            plan: DebatePlan::default(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn settings(&self) -> &DebateSettings {
        &self.settings
    }

    pub fn registry(&self) -> &GuestRegistry {
        &self.registry
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn plan(&self) -> &DebatePlan {
        &self.plan
    }

    pub fn set_plan(&mut self, plan: DebatePlan) {
        self.plan = plan;
    }

    /// Add a guest by hand. Call [`DebateSession::update_embeddings`] before the
    /// debate starts.
    pub fn add_guest(&mut self, guest: Guest) -> bool {
        self.registry.add(guest)
    }

    pub async fn update_embeddings(&mut self) -> Result<(), ShowError> {
        self.registry
            .update_embeddings(self.providers.embedder.as_ref())
            .await
    }

    /// Invite the whole panel in one call, replacing any current guests.
    pub async fn invite_all(&mut self) -> Result<&[Guest], ShowError> {
        invitation::invite_all(
            self.providers.generator.as_ref(),
            &self.prompts,
            &self.topic,
            self.settings.guest_count,
            &mut self.registry,
        )
        .await?;
        self.update_embeddings().await?;
        Ok(self.registry.guests())
    }

    /// Invite guests one by one as the provider streams them.
    pub async fn invite_incrementally(&mut self) -> Result<GuestInvitations<'_>, ShowError> {
        invitation::invite_incrementally(
            self.providers.generator.as_ref(),
            self.providers.embedder.as_ref(),
            &self.prompts,
            &self.topic,
            self.settings.guest_count,
            &mut self.registry,
        )
        .await
    }

    /// Replace the guest called `old_name` with an edited profile and re-index names.
    pub async fn edit_guest(&mut self, old_name: &str, edited: Guest) -> Result<(), ShowError> {
        let original = self
            .registry
            .remove_by_name(old_name)
            .ok_or_else(|| ShowError::SpeakerNotFound(old_name.to_string()))?;
        if !self.registry.add(edited.clone()) {
            self.registry.add(original);
            self.update_embeddings().await?;
            return Err(ShowError::DuplicateGuest(edited.name));
        }
        info!(old = old_name, new = %edited.name, "guest profile edited");
        self.update_embeddings().await
    }

    /// Ask the provider for a plan sized by the `plan_steps` setting.
    pub async fn plan_debate(&mut self) -> Result<&DebatePlan, ShowError> {
        self.plan = planner::plan(
            self.providers.generator.as_ref(),
            &self.prompts,
            &self.topic,
            &self.registry,
            self.settings.plan_steps,
        )
        .await?;
        Ok(&self.plan)
    }

    /// Start the debate. Turns come out of the returned run one at a time.
    pub fn run_debate(&mut self) -> DebateRun<'_> {
        DebateRun {
            session: self,
            outbox: VecDeque::new(),
            in_flight: None,
            cycles_started: 0,
            started: false,
        }
    }

    /// Summarize the transcript so far.
    pub async fn summarize(&self) -> Result<String, ShowError> {
        summarizer::summarize(
            self.providers.generator.clone(),
            &self.prompts,
            &self.log.transcript(),
            &self.topic,
        )
        .await
    }

    fn welcome(&self) -> DebateTurn {
        let names: Vec<&str> = self.registry.guests().iter().map(|g| g.name.as_str()).collect();
        let guest_names = match names.as_slice() {
            [] => "no one yet".to_string(),
            [only] => only.to_string(),
            [rest @ .., last] => format!("{} and {}", rest.join(", "), last),
        };
        DebateTurn::host(render_template(
            &self.prompts.welcome,
            &[("topic", &self.topic), ("guest_names", &guest_names)],
        ))
    }
}

/// A cycle's host turn and guest reply.
#[derive(Debug)]
struct CycleTurns {
    host: DebateTurn,
    guest: DebateTurn,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HostTurnResponse {
    speaker: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReflectionResponse {
    done: bool,
}

/// What the worker tasks of one cycle see.
struct CycleContext {
    topic: String,
    step: String,
    next_step: String,
    conversation: String,
    guests: GuestRegistry,
    resolver: SpeakerResolver,
    prompts: Arc<PromptsConfig>,
    generator: Arc<dyn TextGenerator>,
    embedder: Arc<dyn Embedder>,
}

/// Worker tasks of the cycle being generated. Dropping it cancels them.
struct InFlightCycle {
    number: usize,
    step: String,
    turns: JoinHandle<Result<CycleTurns, ShowError>>,
    reflection: JoinHandle<Result<bool, ShowError>>,
}

impl Drop for InFlightCycle {
    fn drop(&mut self) {
        self.turns.abort();
        self.reflection.abort();
    }
}

/// A debate in progress. Pull turns with [`DebateRun::next_turn`].
///
/// A failed cycle comes out as an error and the step is attempted again on the next
/// pull, unless the caller skips it with [`DebateRun::skip_step`] or stops pulling.
pub struct DebateRun<'s> {
    session: &'s mut DebateSession,
    outbox: VecDeque<DebateTurn>,
    in_flight: Option<InFlightCycle>,
    cycles_started: usize,
    started: bool,
}

impl<'s> DebateRun<'s> {
    /// The next turn of the show, or `None` once the plan is exhausted.
    pub async fn next_turn(&mut self) -> Option<Result<DebateTurn, ShowError>> {
        if !self.started {
            self.started = true;
            self.open_show();
            self.launch_cycle();
        }
        loop {
            if let Some(turn) = self.outbox.pop_front() {
                return Some(Ok(turn));
            }
            let cycle = self.in_flight.take()?;
            if let Err(e) = self.finish_cycle(cycle).await {
                warn!(error = %e, "debate cycle failed");
                self.launch_cycle();
                return Some(Err(e));
            }
        }
    }

    /// Give up on the current step and move on to the next one.
    pub fn skip_step(&mut self) {
        self.in_flight = None;
        if let Some(step) = self.session.plan.current() {
            warn!(step, "skipping step");
        }
        self.session.plan.advance();
        if self.started {
            self.launch_cycle();
        }
    }

    /// Whether the show is over and every turn has been delivered.
    pub fn is_finished(&self) -> bool {
        self.started && self.outbox.is_empty() && self.in_flight.is_none()
    }

    /// The run as a [`Stream`] of turns.
    pub fn into_stream(self) -> impl Stream<Item = Result<DebateTurn, ShowError>> + 's {
        stream::unfold(self, |mut run| async move {
            let item = run.next_turn().await?;
            Some((item, run))
        })
    }

    fn open_show(&mut self) {
        let welcome = self.session.welcome();
        let session = &mut *self.session;
        let counter = session.providers.counter.clone();

        session.log.push(&welcome, counter.as_ref());
        self.outbox.push_back(welcome);

        if session.settings.introduce_guests {
            for guest in session.registry.guests() {
                let introduction = DebateTurn::host(guest.introduction());
                session.log.push_introduction(&introduction, counter.as_ref());
                self.outbox.push_back(introduction);
            }
        }
    }

    /// Spawn the worker tasks for the plan's current step, if the show goes on.
    fn launch_cycle(&mut self) {
        let session = &*self.session;
        let Some(step) = session.plan.current() else {
            info!(cycles = self.cycles_started, "debate plan complete");
            return;
        };
        if let Some(max) = session.settings.max_cycles {
            if self.cycles_started >= max {
                warn!(max, remaining = session.plan.len(), "cycle ceiling reached, ending debate");
                return;
            }
        }

        self.cycles_started += 1;
        let number = self.cycles_started;
        debug!(cycle = number, step, "launching cycle");

        let context = Arc::new(CycleContext {
            topic: session.topic.clone(),
            step: step.to_string(),
            next_step: session.plan.upcoming().unwrap_or(NO_MORE_STEPS).to_string(),
            conversation: session.log.render(session.settings.context_tokens),
            guests: session.registry.clone(),
            resolver: SpeakerResolver::new(session.settings.similarity_threshold),
            prompts: session.prompts.clone(),
            generator: session.providers.generator.clone(),
            embedder: session.providers.embedder.clone(),
        });

        self.in_flight = Some(InFlightCycle {
            number,
            step: step.to_string(),
            turns: tokio::spawn(produce_turns(context.clone())),
            reflection: tokio::spawn(reflect(context)),
        });
    }

    /// Wait for a cycle, record its turns, and start the next one.
    async fn finish_cycle(&mut self, mut cycle: InFlightCycle) -> Result<(), ShowError> {
        let joined = join_cycle(&mut cycle, self.session.settings.cycle_timeout_secs).await;
        let (turns, done) = joined.map_err(|source| ShowError::CycleFailed {
            cycle: cycle.number,
            step: cycle.step.clone(),
            source: Box::new(source),
        })?;

        let session = &mut *self.session;
        let counter = session.providers.counter.clone();
        for turn in [turns.host, turns.guest] {
            session.log.push(&turn, counter.as_ref());
            self.outbox.push_back(turn);
        }

        if done {
            info!(cycle = cycle.number, step = %cycle.step, "step complete");
            session.plan.advance();
        } else {
            debug!(cycle = cycle.number, step = %cycle.step, "step continues");
        }

        self.launch_cycle();
        Ok(())
    }
}

async fn join_cycle(
    cycle: &mut InFlightCycle,
    timeout_secs: Option<u64>,
) -> Result<(CycleTurns, bool), ShowError> {
    let both = async {
        let (turns, reflection) = tokio::join!(&mut cycle.turns, &mut cycle.reflection);
        Ok::<_, ShowError>((
            turns.map_err(task_failed)??,
            reflection.map_err(task_failed)??,
        ))
    };
    match timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), both)
            .await
            .map_err(|_| ShowError::CycleTimeout { secs })?,
        None => both.await,
    }
}

fn task_failed(e: JoinError) -> ShowError {
    ShowError::TaskFailed(e.to_string())
}

/// Host turn, then the reply of the guest the host addressed.
async fn produce_turns(ctx: Arc<CycleContext>) -> Result<CycleTurns, ShowError> {
    let instructions = render_template(
        &ctx.prompts.host_turn,
        &[
            ("topic", &ctx.topic),
            ("guests", &ctx.guests.roster()),
            ("step", &ctx.step),
            ("conversation", &ctx.conversation),
        ],
    );
    let request = GenerationRequest::new(
        "host_turn",
        "Who speaks next, and what do you say?",
        instructions,
    )
    .with_schema(HOST_TURN_SCHEMA);
    let host: HostTurnResponse = generate_structured(ctx.generator.as_ref(), &request).await?;

    let guest = ctx
        .resolver
        .require(&ctx.guests, ctx.embedder.as_ref(), &host.speaker)
        .await?;
    debug!(addressed = %host.speaker, speaker = %guest.name, "host addressed guest");

    let conversation = format!("{}\n{}: {}", ctx.conversation, HOST_LABEL, host.message);
    let instructions = render_template(
        &ctx.prompts.guest_turn,
        &[
            ("name", &guest.name),
            ("age", &guest.age.to_string()),
            ("pronouns", &guest.pronouns.to_string()),
            ("occupation", &guest.occupation),
            ("background", &guest.background),
            ("topic", &ctx.topic),
            ("conversation", &conversation),
            ("host_message", &host.message),
        ],
    );
    let request = GenerationRequest::new("guest_turn", format!("{}:", guest.name), instructions);
    let reply = ctx.generator.generate(&request).await?;
    if reply.trim().is_empty() {
        return Err(ShowError::schema("guest_turn", format!("{} gave an empty reply", guest.name)));
    }

    Ok(CycleTurns {
        host: DebateTurn::host(host.message),
        guest: DebateTurn::new(reply.trim(), guest.name.clone()),
    })
}

/// Whether the current step has been covered.
async fn reflect(ctx: Arc<CycleContext>) -> Result<bool, ShowError> {
    let instructions = render_template(
        &ctx.prompts.reflect,
        &[
            ("topic", &ctx.topic),
            ("step", &ctx.step),
            ("next_step", &ctx.next_step),
            ("conversation", &ctx.conversation),
        ],
    );
    let request =
        GenerationRequest::new("reflection", "Is the current part complete?", instructions)
            .with_schema(REFLECTION_SCHEMA);
    let verdict: ReflectionResponse = generate_structured(ctx.generator.as_ref(), &request).await?;
    Ok(verdict.done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::Pronouns;
    use crate::provider::HeuristicTokenCounter;
    use crate::testing::{ScriptedGenerator, TableEmbedder};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn guest(name: &str, occupation: &str) -> Guest {
        Guest::new(name, 45, Pronouns::new("they", "them"), occupation, "Has opinions.")
    }

    fn embedder() -> TableEmbedder {
        TableEmbedder::new(&[
            ("Alice", vec![1.0, 0.0]),
            ("Bob", vec![0.0, 1.0]),
            ("Alicia", vec![0.9, 0.1]),
            ("Zelda", vec![-1.0, -1.0]),
        ])
    }

    /// Host alternates between Alice and Bob; reflections answer from `verdicts`,
    /// then `true` once those run out.
    fn scripted(verdicts: Vec<bool>) -> ScriptedGenerator {
        let hosts = AtomicUsize::new(0);
        let reflections = AtomicUsize::new(0);
        ScriptedGenerator::new(move |request| match request.label {
            "host_turn" => {
                let n = hosts.fetch_add(1, Ordering::SeqCst);
                let name = if n % 2 == 0 { "Alice" } else { "Bob" };
                Ok(format!(
                    r#"{{"speaker": "{}", "message": "{}, question {}?"}}"#,
                    name,
                    name,
                    n + 1
                ))
            }
            "guest_turn" => Ok(format!("  Answer from {}  ", request.input.trim_end_matches(':'))),
            "reflection" => {
                let n = reflections.fetch_add(1, Ordering::SeqCst);
                let done = verdicts.get(n).copied().unwrap_or(true);
                Ok(format!(r#"{{"done": {}}}"#, done))
            }
            "summarize_step" => Ok("Segment.".to_string()),
            "summarize_debate" => Ok("The panel disagreed.".to_string()),
            other => panic!("unexpected call {}", other),
        })
    }

    async fn session(
        generator: Arc<ScriptedGenerator>,
        config: Config,
        steps: &[&str],
    ) -> DebateSession {
        let providers = Providers {
            generator,
            embedder: Arc::new(embedder()),
            counter: Arc::new(HeuristicTokenCounter),
        };
        let mut session = DebateSession::new("Should we build more dams?", &config, providers);
        session.add_guest(guest("Alice", "hydrologist"));
        session.add_guest(guest("Bob", "farmer"));
        session.update_embeddings().await.unwrap();
        session.set_plan(DebatePlan::new(steps.iter().copied()));
        session
    }

    async fn collect(run: &mut DebateRun<'_>) -> Vec<DebateTurn> {
        let mut turns = Vec::new();
        while let Some(turn) = run.next_turn().await {
            turns.push(turn.unwrap());
        }
        turns
    }

    #[tokio::test]
    async fn test_plan_of_two_steps_yields_five_turns() {
        let generator = Arc::new(scripted(vec![]));
        let mut session = session(
            generator.clone(),
            Config::default(),
            &["Opening statements", "Rebuttals"],
        )
        .await;

        let mut run = session.run_debate();
        let turns = collect(&mut run).await;
        assert!(run.is_finished());
        assert!(run.next_turn().await.is_none());
        drop(run);

        assert_eq!(turns.len(), 5);
        assert!(turns[0].is_host());
        assert!(turns[0].message.contains("Alice and Bob"));
        assert_eq!(turns[1], DebateTurn::host("Alice, question 1?"));
        assert_eq!(turns[2], DebateTurn::new("Answer from Alice", "Alice"));
        assert_eq!(turns[3], DebateTurn::host("Bob, question 2?"));
        assert_eq!(turns[4], DebateTurn::new("Answer from Bob", "Bob"));

        assert_eq!(generator.count("reflection"), 2);
        assert_eq!(generator.count("host_turn"), 2);
        assert!(session.plan().is_empty());

        let newest_first: Vec<DebateTurn> = session.log().transcript();
        assert_eq!(newest_first.len(), 5);
        assert_eq!(newest_first[0], turns[4]);
        assert_eq!(newest_first[4], turns[0]);
    }

    #[tokio::test]
    async fn test_turn_count_matches_plan_length() {
        for steps in 0..4 {
            let generator = Arc::new(scripted(vec![]));
            let names: Vec<String> = (0..steps).map(|i| format!("Step {}", i + 1)).collect();
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let mut session = session(generator.clone(), Config::default(), &names).await;
            let turns = collect(&mut session.run_debate()).await;
            assert_eq!(turns.len(), 2 * steps + 1);
            assert_eq!(generator.count("reflection"), steps);
        }
    }

    #[tokio::test]
    async fn test_incomplete_step_is_repeated() {
        let generator = Arc::new(scripted(vec![false]));
        let mut session =
            session(generator.clone(), Config::default(), &["Opening statements"]).await;

        let turns = collect(&mut session.run_debate()).await;
        assert_eq!(turns.len(), 5);
        assert_eq!(generator.count("reflection"), 2);

        let calls = generator.calls();
        let reflections: Vec<&GenerationRequest> =
            calls.iter().filter(|r| r.label == "reflection").collect();
        assert!(reflections.iter().all(|r| r.instructions.contains("Opening statements")));
        assert!(reflections[0].instructions.contains(NO_MORE_STEPS));
    }

    #[tokio::test]
    async fn test_reflection_sees_next_step() {
        let generator = Arc::new(scripted(vec![]));
        let mut session =
            session(generator.clone(), Config::default(), &["Openers", "Closers"]).await;
        collect(&mut session.run_debate()).await;

        let calls = generator.calls();
        let first = calls.iter().find(|r| r.label == "reflection").unwrap();
        assert!(first.instructions.contains("The part after it is: Closers"));
    }

    #[tokio::test]
    async fn test_cycle_ceiling_stops_endless_step() {
        let generator = Arc::new(scripted(vec![false; 100]));
        let mut config = Config::default();
        config.debate.max_cycles = Some(3);
        let mut session = session(generator.clone(), config, &["Forever"]).await;

        let turns = collect(&mut session.run_debate()).await;
        assert_eq!(turns.len(), 7);
        assert_eq!(generator.count("host_turn"), 3);
        assert_eq!(session.plan().len(), 1);
    }

    #[tokio::test]
    async fn test_introductions_are_shown_but_not_prompted() {
        let generator = Arc::new(scripted(vec![]));
        let mut config = Config::default();
        config.debate.introduce_guests = true;
        let mut session = session(generator.clone(), config, &["Opening statements"]).await;

        let turns = collect(&mut session.run_debate()).await;
        assert_eq!(turns.len(), 5);
        assert!(turns[1].message.starts_with("Please welcome Alice"));
        assert!(turns[2].message.starts_with("Please welcome Bob"));

        let calls = generator.calls();
        let host = calls.iter().find(|r| r.label == "host_turn").unwrap();
        assert!(host.instructions.contains("welcome to the show"));
        assert!(!host.instructions.contains("Please welcome"));

        assert_eq!(session.log().len(), 5);
        assert_eq!(session.log().transcript().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_speaker_is_surfaced() {
        let generator = Arc::new(ScriptedGenerator::new(|request| match request.label {
            "host_turn" => Ok(r#"{"speaker": "Zelda", "message": "Zelda?"}"#.to_string()),
            "reflection" => Ok(r#"{"done": true}"#.to_string()),
            other => panic!("unexpected call {}", other),
        }));
        let mut session =
            session(generator.clone(), Config::default(), &["Opening statements"]).await;

        let mut run = session.run_debate();
        assert!(run.next_turn().await.unwrap().is_ok());

        let err = run.next_turn().await.unwrap().unwrap_err();
        assert!(err.is_recoverable());
        match err {
            ShowError::CycleFailed { cycle, step, source } => {
                assert_eq!(cycle, 1);
                assert_eq!(step, "Opening statements");
                assert!(matches!(*source, ShowError::SpeakerNotFound(ref name) if name == "Zelda"));
            }
            other => panic!("unexpected error {}", other),
        }

        run.skip_step();
        assert!(run.next_turn().await.is_none());
        drop(run);
        assert_eq!(session.log().len(), 1);
        assert_eq!(generator.count("guest_turn"), 0);
    }

    #[tokio::test]
    async fn test_failed_cycle_is_retried() {
        let attempts = AtomicUsize::new(0);
        let generator = Arc::new(ScriptedGenerator::new(move |request| match request.label {
            "host_turn" if attempts.fetch_add(1, Ordering::SeqCst) == 0 => {
                Ok("not json".to_string())
            }
            "host_turn" => Ok(r#"{"speaker": "Bob", "message": "Bob?"}"#.to_string()),
            "guest_turn" => Ok("Yes.".to_string()),
            "reflection" => Ok(r#"{"done": true}"#.to_string()),
            other => panic!("unexpected call {}", other),
        }));
        let mut session =
            session(generator.clone(), Config::default(), &["Opening statements"]).await;

        let mut run = session.run_debate();
        assert!(run.next_turn().await.unwrap().is_ok());
        let err = run.next_turn().await.unwrap().unwrap_err();
        assert!(matches!(err, ShowError::CycleFailed { ref source, .. }
            if matches!(**source, ShowError::SchemaViolation { .. })));

        let rest = collect(&mut run).await;
        assert_eq!(rest, vec![DebateTurn::host("Bob?"), DebateTurn::new("Yes.", "Bob")]);
    }

    #[tokio::test]
    async fn test_fuzzy_speaker_name_resolves() {
        let generator = Arc::new(ScriptedGenerator::new(|request| match request.label {
            "host_turn" => Ok(r#"{"speaker": "Alicia", "message": "Alice?"}"#.to_string()),
            "guest_turn" => Ok("Here.".to_string()),
            "reflection" => Ok(r#"{"done": true}"#.to_string()),
            other => panic!("unexpected call {}", other),
        }));
        let mut session = session(generator, Config::default(), &["Opening statements"]).await;

        let turns = collect(&mut session.run_debate()).await;
        assert_eq!(turns[2].speaker_label, "Alice");
    }

    #[tokio::test]
    async fn test_debate_after_partial_invitation() {
        let alice = concat!(
            r#"{"name": "Alice", "age": 41, "pronouns": "she/her", "#,
            r#""occupation": "hydrologist", "background": "Maps rivers."}"#
        );
        let bob = concat!(
            r#"{"name": "Bob", "age": 57, "pronouns": "he/him", "#,
            r#""occupation": "farmer", "background": "Irrigates."}"#
        );
        let response = format!(r#"{{"guests": [{}, {}]}}"#, alice, bob);
        let generator = Arc::new(
            ScriptedGenerator::new(|request| match request.label {
                "host_turn" => Ok(r#"{"speaker": "Alicia", "message": "Alice?"}"#.to_string()),
                "guest_turn" => Ok("Here.".to_string()),
                "reflection" => Ok(r#"{"done": true}"#.to_string()),
                other => panic!("unexpected call {}", other),
            })
            .with_stream(&[response.as_str()]),
        );
        let providers = Providers {
            generator,
            embedder: Arc::new(embedder()),
            counter: Arc::new(HeuristicTokenCounter),
        };
        let mut session =
            DebateSession::new("Should we build more dams?", &Config::default(), providers);

        let mut invitations = session.invite_incrementally().await.unwrap();
        assert_eq!(invitations.next().await.unwrap().unwrap().name, "Alice");
        drop(invitations);
        assert_eq!(session.registry().len(), 1);

        session.set_plan(DebatePlan::new(["One"]));
        let turns = collect(&mut session.run_debate()).await;
        assert_eq!(turns.len(), 3);
        assert!(turns[0].message.contains("Joining me are Alice."));
        assert_eq!(turns[2], DebateTurn::new("Here.", "Alice"));
    }

    #[tokio::test]
    async fn test_turns_are_pipelined_one_cycle_behind() {
        let generator = Arc::new(scripted(vec![]));
        let mut session = session(generator.clone(), Config::default(), &["One", "Two"]).await;

        let mut run = session.run_debate();
        run.next_turn().await.unwrap().unwrap();
        run.next_turn().await.unwrap().unwrap();
        // Cycle 2 starts as soon as cycle 1 is joined, before its turns are all delivered.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(generator.count("host_turn"), 2);
        assert_eq!(generator.count("reflection"), 2);
        assert_eq!(run.session.log().len(), 3);
    }

    #[tokio::test]
    async fn test_turn_and_reflection_run_concurrently() {
        let delay = Duration::from_millis(500);
        let generator = Arc::new(
            scripted(vec![])
                .with_delay("host_turn", delay)
                .with_delay("reflection", delay),
        );
        let mut session =
            session(generator.clone(), Config::default(), &["Opening statements"]).await;

        let started = std::time::Instant::now();
        let turns = collect(&mut session.run_debate()).await;
        let elapsed = started.elapsed();

        assert_eq!(turns.len(), 3);
        // Host turn then reflection, one after another, would take both delays.
        assert!(elapsed < delay * 2 - Duration::from_millis(200), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_cycle_timeout() {
        let generator =
            Arc::new(scripted(vec![]).with_delay("reflection", Duration::from_secs(30)));
        let mut config = Config::default();
        config.debate.cycle_timeout_secs = Some(1);
        let mut session = session(generator, config, &["Opening statements"]).await;

        let mut run = session.run_debate();
        run.next_turn().await.unwrap().unwrap();
        let err = run.next_turn().await.unwrap().unwrap_err();
        assert!(matches!(err, ShowError::CycleFailed { ref source, .. }
            if matches!(**source, ShowError::CycleTimeout { secs: 1 })));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let generator = Arc::new(scripted(vec![]));
        let mut session = session(generator, Config::default(), &["One", "Two", "Three"]).await;

        let turns: Vec<Result<DebateTurn, ShowError>> =
            session.run_debate().into_stream().collect().await;
        assert_eq!(turns.len(), 7);
        assert!(turns.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn test_abandoned_run_releases_session() {
        let generator =
            Arc::new(scripted(vec![]).with_delay("reflection", Duration::from_secs(30)));
        let mut session = session(generator, Config::default(), &["One"]).await;
        {
            let mut run = session.run_debate();
            run.next_turn().await.unwrap().unwrap();
        }
        assert_eq!(session.log().len(), 1);
        assert_eq!(session.plan().len(), 1);
    }

    #[tokio::test]
    async fn test_edit_guest_reindexes() {
        let generator = Arc::new(scripted(vec![]));
        let mut session = session(generator, Config::default(), &[]).await;

        session
            .edit_guest("Alice", guest("Alicia", "hydrologist"))
            .await
            .unwrap();
        assert!(session.registry().get("Alice").is_none());
        let index = session.registry().name_index().unwrap();
        assert!(index.names.contains(&"Alicia".to_string()));

        let err = session
            .edit_guest("Alicia", guest("Bob", "impostor"))
            .await
            .unwrap_err();
        assert!(matches!(err, ShowError::DuplicateGuest(ref name) if name == "Bob"));
        assert!(session.registry().get("Alicia").is_some());
        assert_eq!(session.registry().get("Bob").unwrap().occupation, "farmer");

        assert!(matches!(
            session.edit_guest("Nobody", guest("X", "y")).await,
            Err(ShowError::SpeakerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_summarize_after_debate() {
        let generator = Arc::new(scripted(vec![]));
        let mut session = session(generator.clone(), Config::default(), &["One", "Two"]).await;
        collect(&mut session.run_debate()).await;

        let summary = session.summarize().await.unwrap();
        assert_eq!(summary, "The panel disagreed.");
        // Welcome plus one segment per cycle.
        assert_eq!(generator.count("summarize_step"), 3);
    }
}
