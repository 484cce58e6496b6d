//! Handlecheck: username availability poller.
//!
//! `handlecheck run` reads the single candidate list from the input
//! directory, checks each handle against the reservation service and then
//! the signup service, and keeps the result file up to date after every
//! pass. Ctrl-C stops after the current candidate and still saves.
//!
//! `handlecheck shuffle` deduplicates and shuffles the result file for
//! handing it out.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use handlecheck::clock::{Clock, TokioClock};
use handlecheck::config::{self, Overrides, Settings};
use handlecheck::engine::{EngineError, PollingEngine};
use handlecheck::pacing::RateLimiter;
use handlecheck::probe::{self, AvailabilityProbe, ReservationProbe, SignupProbe};
use handlecheck::random::{RandomSource, ThreadRandom};
use handlecheck::source;
use handlecheck::store::ResultStore;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML config file.
    #[arg(long, global = true, env = "HANDLECHECK_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines and print the run report as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the candidate list (default).
    Run(RunArgs),
    /// Deduplicate and shuffle the result file.
    Shuffle {
        #[arg(long)]
        output: Option<PathBuf>,
        /// Fixed seed for a reproducible order.
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Directory holding exactly one *.txt candidate list.
    #[arg(long)]
    input_dir: Option<PathBuf>,
    /// Result file.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Keep looping until this many handles are stored.
    #[arg(long)]
    target: Option<usize>,
    /// Give up after this many passes.
    #[arg(long)]
    max_passes: Option<u32>,
    /// Make one pass over the list and stop.
    #[arg(long)]
    single_pass: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env may carry the config path as well as the token.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => {
            let overrides = Overrides {
                config_path: cli.config,
                input_dir: args.input_dir,
                output_file: args.output,
                target: args.target,
                max_passes: args.max_passes,
                single_pass: args.single_pass,
            };
            run(overrides, cli.json).await
        }
        Command::Shuffle { output, seed } => {
            let overrides = Overrides {
                config_path: cli.config,
                output_file: output,
                ..Default::default()
            };
            shuffle(overrides, seed)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "handlecheck=info".into());
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

async fn run(overrides: Overrides, json: bool) -> Result<()> {
    info!("🔎 Handlecheck v{}", env!("CARGO_PKG_VERSION"));

    // ── Configuration (fails before any request) ────────────────────
    let settings = Settings::load(&overrides).context("Invalid configuration")?;
    let candidates =
        source::load_candidates(&settings.input_dir).context("Failed to load candidates")?;

    info!(
        input = %settings.input_dir.display(),
        output = %settings.output_file.display(),
        timeout_secs = settings.timeout.as_secs(),
        require_signup = settings.require_signup,
        "Configuration loaded"
    );

    // ── Collaborators ───────────────────────────────────────────────
    let rng: Arc<dyn RandomSource> = Arc::new(ThreadRandom::new());
    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let client = probe::build_client(settings.timeout).context("Failed to build HTTP client")?;

    let primary: Arc<dyn AvailabilityProbe> = Arc::new(ReservationProbe::new(
        client.clone(),
        settings.reservation_base_url.clone(),
    ));
    let secondary: Option<Arc<dyn AvailabilityProbe>> = if settings.require_signup {
        Some(Arc::new(SignupProbe::new(client, &settings, Arc::clone(&rng))))
    } else {
        None
    };

    let limiter = Arc::new(RateLimiter::from_settings(&settings, clock, rng));
    let store = Arc::new(ResultStore::new(settings.output_file.clone()));
    let engine = PollingEngine::new(primary, secondary, limiter, store, settings.loop_policy);

    // ── Stop on Ctrl-C, exit on the second ──────────────────────────
    let stop = engine.stop_signal();
    tokio::spawn(async move {
        if stop.follow_interrupts(tokio::signal::ctrl_c).await {
            warn!("Second interrupt, exiting without saving the current pass");
            std::process::exit(130);
        }
    });

    match engine.run(&candidates).await {
        Ok(report) => {
            info!(
                run_id = %report.run_id,
                stored = report.stored_total,
                file = %settings.output_file.display(),
                "Done"
            );
            if json {
                println!("{}", serde_json::to_string(&report)?);
            }
            Ok(())
        }
        Err(EngineError::Persist { source, unsaved }) => {
            error!(
                file = %settings.output_file.display(),
                unsaved = unsaved.len(),
                "Could not write results, printing them to stdout"
            );
            for candidate in &unsaved {
                println!("{}", candidate);
            }
            Err(source).context("Failed to persist results")
        }
        Err(e) => Err(e.into()),
    }
}

fn shuffle(overrides: Overrides, seed: Option<u64>) -> Result<()> {
    let path = config::resolve_output_file(&overrides).context("Invalid configuration")?;
    let rng = match seed {
        Some(seed) => ThreadRandom::seeded(seed),
        None => ThreadRandom::new(),
    };
    let store = ResultStore::new(path);
    let summary = store
        .dedupe_and_shuffle(&rng)
        .with_context(|| format!("Failed to shuffle {}", store.path().display()))?;
    info!(
        total = summary.total,
        duplicates_removed = summary.duplicates_removed,
        "Result file ready for review"
    );
    Ok(())
}
