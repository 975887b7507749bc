//! Talk show CLI
//!
//! Invites a panel for a topic, plans the debate and prints it turn by turn.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use talkshow_core::{
    Config, DebateSession, DebateTurn, Guest, HeuristicTokenCounter, OpenAiEmbedder,
    OpenAiGenerator, OpenAiSettings, Providers, ShowError, default_config,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Failed cycles in a row before the current step is skipped.
const MAX_CONSECUTIVE_FAILURES: usize = 3;

const WRAP_WIDTH: usize = 66;

#[derive(Parser)]
#[command(
    name = "talkshow",
    version,
    about = "Talk show debate - watch an AI host run a panel on any topic",
    long_about = "A CLI tool where an AI host invites a panel of AI guests and moderates a debate, using OpenAI-compatible APIs."
)]
struct Cli {
    /// The topic of tonight's show
    #[arg(value_name = "TOPIC")]
    topic: String,

    /// Path to a TOML config file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Chat model to use for the host and the guests
    #[arg(short, long, value_name = "MODEL")]
    model: Option<String>,

    /// Number of debate steps to plan
    #[arg(short, long, value_name = "STEPS")]
    steps: Option<usize>,

    /// Number of guests to invite
    #[arg(short, long, value_name = "GUESTS")]
    guests: Option<usize>,

    /// Upper bound on host/guest exchanges
    #[arg(long, value_name = "CYCLES")]
    max_cycles: Option<usize>,

    /// Have the host introduce each guest after the welcome
    #[arg(long)]
    introduce: bool,

    /// Invite the whole panel in one request instead of streaming guests in
    #[arg(long)]
    all_at_once: bool,

    /// Skip the summary at the end
    #[arg(long)]
    no_summary: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let api_base = env::var("OPENAI_API_BASE")
        .or_else(|_| env::var("OPENAI_BASE_URL"))
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

    let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        eprintln!(
            "{}",
            "Warning: OPENAI_API_KEY not set. API calls may fail.".yellow()
        );
        String::new()
    });

    let config = load_config(&cli)?;

    let settings = OpenAiSettings::new(api_base, api_key, &config.model);
    let providers = Providers {
        generator: Arc::new(OpenAiGenerator::new(&settings)?),
        embedder: Arc::new(OpenAiEmbedder::new(&settings)?),
        counter: Arc::new(HeuristicTokenCounter),
    };
    let mut session = DebateSession::new(&cli.topic, &config, providers);

    // Print header
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  Tonight's Talk Show".bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Topic:".bold(), cli.topic.bright_white());
    println!("{} {}", "Model:".bold(), config.model.name.dimmed());
    println!();
    println!("{}", "Guests:".bold());

    if cli.all_at_once {
        for (i, guest) in session.invite_all().await?.iter().enumerate() {
            print_guest(i + 1, guest);
        }
    } else {
        let mut invitations = session.invite_incrementally().await?;
        let mut invited = 0;
        while let Some(result) = invitations.next().await {
            match result {
                Ok(guest) => {
                    invited += 1;
                    print_guest(invited, &guest);
                }
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "skipping invalid guest record");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    if session.registry().is_empty() {
        eprintln!("{} No guests accepted the invitation.", "Error:".red().bold());
        std::process::exit(1);
    }

    println!();
    println!("{}", "Plan:".bold());
    for (i, step) in session.plan_debate().await?.steps().enumerate() {
        println!("  {}. {}", i + 1, step);
    }
    println!();
    println!("{}", "─".repeat(70).dimmed());
    println!();

    run_show(&mut session).await?;

    if !cli.no_summary {
        println!("{}", "═".repeat(70).bright_magenta());
        println!("{}", "  Summary".bright_magenta().bold());
        println!("{}", "═".repeat(70).bright_magenta());
        println!();
        let summary = session.summarize().await?;
        for line in summary.lines() {
            println!("  {}", textwrap(line, WRAP_WIDTH).replace('\n', "\n  "));
        }
        println!();
    }

    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  That's all for tonight.".bright_green().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();

    Ok(())
}

/// Read the config file if one was given and apply command line overrides.
fn load_config(cli: &Cli) -> Result<Config, ShowError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };

    if let Some(model) = &cli.model {
        config.model.name = model.clone();
    }
    if let Some(steps) = cli.steps {
        config.debate.plan_steps = steps;
    }
    if let Some(guests) = cli.guests {
        if guests == 0 {
            return Err(ShowError::ConfigError(
                "--guests must be at least 1".to_string(),
            ));
        }
        config.debate.guest_count = guests;
    }
    if cli.max_cycles.is_some() {
        config.debate.max_cycles = cli.max_cycles;
    }
    if cli.introduce {
        config.debate.introduce_guests = true;
    }

    Ok(config)
}

/// Pull turns until the show ends, skipping a step that keeps failing.
async fn run_show(session: &mut DebateSession) -> Result<(), ShowError> {
    let mut run = session.run_debate();
    let mut failures = 0;

    while let Some(result) = run.next_turn().await {
        match result {
            Ok(turn) => {
                failures = 0;
                print_turn(&turn);
            }
            Err(e) if e.is_recoverable() => {
                failures += 1;
                warn!(error = %e, attempt = failures, "cycle failed");
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    warn!(failures, "giving up on this part of the debate");
                    run.skip_step();
                    failures = 0;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

fn print_guest(number: usize, guest: &Guest) {
    println!(
        "  {}. {} ({}, {}) - {}",
        number,
        guest.name.bright_cyan(),
        guest.age,
        guest.pronouns.to_string().dimmed(),
        guest.occupation.yellow()
    );
}

fn print_turn(turn: &DebateTurn) {
    let label = if turn.is_host() {
        turn.speaker_label.bright_magenta().bold()
    } else {
        turn.speaker_label.bright_cyan().bold()
    };
    println!("{} {}", "▶".bright_cyan(), label);
    let wrapped = textwrap(&turn.message, WRAP_WIDTH);
    for line in wrapped.lines() {
        println!("  {}", line);
    }
    println!();
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        if current_line_len + word.len() + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word.len();
    }

    result
}
