//! Crisis CLI - Command-line interface for Crisis Flux
//!
//! Commands:
//! - replay: Run an NDJSON event script through the engine on a virtual clock
//! - classify: Classify a single behavior record
//! - profile: Print the adaptation profile for a level and fog score
//! - config: Print or validate engine configuration
//! - doctor: Diagnose engine health and configuration

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crisis_flux::classifier::CrisisClassifier;
use crisis_flux::fog::FogEstimator;
use crisis_flux::profile::ProfileSelector;
use crisis_flux::recorder::JsonlFileSink;
use crisis_flux::schema::{self, EventKind};
use crisis_flux::types::{AdaptationUpdate, BehaviorRecord, CrisisLevel, FogBand};
use crisis_flux::{
    Clock, CrisisEngine, EngineConfig, EngineError, ManualClock, FLUX_VERSION, PRODUCER_NAME,
    SCHEMA_VERSION,
};

/// Crisis - On-device crisis detection and adaptive-interface engine
#[derive(Parser)]
#[command(name = "crisis")]
#[command(author = "Synheart AI Inc")]
#[command(version = FLUX_VERSION)]
#[command(about = "Detect behavioral crisis signals and select interface adaptations", long_about = None)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an NDJSON event script on a virtual clock
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Engine configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,

        /// Virtual clock start (RFC 3339); defaults to now
        #[arg(long)]
        start: Option<String>,

        /// Append closed crisis sessions to this JSONL file
        #[arg(long)]
        sessions_out: Option<PathBuf>,

        /// Save the recorder's session history to this file on exit
        #[arg(long)]
        history_out: Option<PathBuf>,

        /// Print the final engine snapshot after the updates
        #[arg(long)]
        snapshot: bool,
    },

    /// Classify a single behavior record
    Classify {
        /// Rapid clicks in the current burst
        #[arg(long, default_value = "0")]
        clicks: u32,

        /// Navigation reversals
        #[arg(long, default_value = "0")]
        reversals: u32,

        /// Runtime errors
        #[arg(long, default_value = "0")]
        errors: u32,

        /// Session duration in seconds
        #[arg(long, default_value = "0")]
        session_secs: u64,

        /// Manual self-report (1-10)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
        self_report: Option<u8>,

        /// Engine configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the adaptation profile for a level and fog score
    Profile {
        /// Crisis level (none, mild, moderate, severe, emergency)
        #[arg(long)]
        level: CrisisLevel,

        /// Fog score in [0, 1]
        #[arg(long, default_value = "0.0")]
        fog: f64,

        /// Engine configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the default configuration, or validate a configuration file
    Config {
        /// Configuration file to validate
        #[arg(long)]
        validate: Option<PathBuf>,
    },

    /// Diagnose engine health and configuration
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), CrisisCliError> {
    match cli.command {
        Commands::Replay {
            input,
            config,
            start,
            sessions_out,
            history_out,
            snapshot,
        } => cmd_replay(
            &input,
            config.as_deref(),
            start.as_deref(),
            sessions_out,
            history_out.as_deref(),
            snapshot,
        ),

        Commands::Classify {
            clicks,
            reversals,
            errors,
            session_secs,
            self_report,
            config,
        } => {
            let mut record = BehaviorRecord::empty(Utc::now());
            record.rapid_click_count = clicks;
            record.navigation_reversal_count = reversals;
            record.error_event_count = errors;
            record.session_duration_seconds = session_secs;
            record.manual_self_report = self_report;
            cmd_classify(&record, config.as_deref())
        }

        Commands::Profile { level, fog, config } => cmd_profile(level, fog, config.as_deref()),

        Commands::Config { validate } => cmd_config(validate.as_deref()),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn cmd_replay(
    input: &Path,
    config_path: Option<&Path>,
    start: Option<&str>,
    sessions_out: Option<PathBuf>,
    history_out: Option<&Path>,
    print_snapshot: bool,
) -> Result<(), CrisisCliError> {
    let config = load_config(config_path)?;
    let envelopes = schema::parse_script(&read_input(input)?)?;
    if envelopes.is_empty() {
        return Err(CrisisCliError::NoEvents);
    }

    let start = match start {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map_err(|e| CrisisCliError::ParseError(format!("Invalid --start timestamp: {}", e)))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let tick_step = Duration::milliseconds(config.tick_interval_ms as i64);
    let clock = ManualClock::new(start);

    let mut engine = CrisisEngine::with_clock(config, clock.clone())?;
    if let Some(path) = sessions_out {
        engine = engine.with_sink(Box::new(JsonlFileSink::new(path)));
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();

    for (index, envelope) in envelopes.iter().enumerate() {
        let mut emitted: Vec<AdaptationUpdate> = Vec::new();

        match envelope.kind {
            EventKind::Click
            | EventKind::NavigationBack
            | EventKind::RuntimeError
            | EventKind::ManualRating => match envelope.behavior_event() {
                Some(event) => {
                    let at = envelope.timestamp.unwrap_or_else(|| clock.now());
                    engine.record_event_at(event, at)
                }
                None => tracing::debug!(index, "skipping manual_rating without a numeric value"),
            },
            EventKind::Tick => {
                for _ in 0..envelope.count.unwrap_or(1) {
                    clock.advance(tick_step);
                    emitted.extend(engine.tick());
                }
            }
            EventKind::Deactivate => emitted.extend(engine.deactivate()),
            EventKind::Reset => emitted.extend(engine.reset()),
            EventKind::Outcome => {
                let outcome = envelope.outcome.ok_or_else(|| {
                    CrisisCliError::ParseError(format!("Entry {} has no outcome", index + 1))
                })?;
                if !engine.report_outcome(outcome) {
                    tracing::debug!(index, "outcome reported with no active session");
                }
            }
            EventKind::Effectiveness => {
                let rating = envelope.rating.ok_or_else(|| {
                    CrisisCliError::ParseError(format!("Entry {} has no rating", index + 1))
                })?;
                if !engine.report_effectiveness(rating, envelope.note.clone()) {
                    tracing::debug!(index, rating, "effectiveness report not recorded");
                }
            }
        }

        for update in &emitted {
            writeln!(out, "{}", serde_json::to_string(update)?)?;
        }
    }

    let final_snapshot = engine.snapshot();
    engine.shutdown();

    if print_snapshot {
        writeln!(out, "{}", serde_json::to_string(&final_snapshot)?)?;
    }
    out.flush()?;

    if let Some(path) = history_out {
        fs::write(path, engine.recorder().save_history()?)?;
    }

    Ok(())
}

fn cmd_classify(record: &BehaviorRecord, config_path: Option<&Path>) -> Result<(), CrisisCliError> {
    let config = load_config(config_path)?;
    let classifier = CrisisClassifier::new(config.classifier.clone());
    let fog = FogEstimator::new(config.fog.clone());

    let fog_score = fog.estimate(record);
    let report = ClassifyReport {
        level: classifier.classify(record),
        signal_level: classifier.classify_signals(record),
        fog_score,
        fog_band: fog.band(fog_score),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_profile(level: CrisisLevel, fog: f64, config_path: Option<&Path>) -> Result<(), CrisisCliError> {
    let config = load_config(config_path)?;
    let selector = ProfileSelector::new(config.profile.clone(), config.fog.clone());
    println!("{}", serde_json::to_string_pretty(&selector.select(level, fog))?);
    Ok(())
}

fn cmd_config(validate: Option<&Path>) -> Result<(), CrisisCliError> {
    match validate {
        Some(path) => {
            let config = load_config(Some(path))?;
            println!("{}", config.to_json_pretty()?);
        }
        None => println!("{}", EngineConfig::default().to_json_pretty()?),
    }
    Ok(())
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), CrisisCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "flux_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Crisis Flux version {}", FLUX_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Event schema: {}", SCHEMA_VERSION),
    });

    let config = match config_path {
        Some(path) if !path.exists() => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist; using defaults".to_string(),
            });
            EngineConfig::default()
        }
        Some(path) => match load_config(Some(path)) {
            Ok(config) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: "Config file valid".to_string(),
                });
                config
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: CliError::from(e).message,
                });
                EngineConfig::default()
            }
        },
        None => EngineConfig::default(),
    };

    // Smoke-test the pipeline on a virtual clock
    let engine_check = match smoke_test(config) {
        Ok(level) if level == CrisisLevel::Emergency => DoctorCheck {
            name: "engine".to_string(),
            status: CheckStatus::Ok,
            message: "Self-report of 10 escalates to emergency within one tick".to_string(),
        },
        Ok(level) => DoctorCheck {
            name: "engine".to_string(),
            status: CheckStatus::Warning,
            message: format!("Self-report of 10 produced level {}", level),
        },
        Err(e) => DoctorCheck {
            name: "engine".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    };
    checks.push(engine_check);

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay with --input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Crisis Doctor Report");
        println!("====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(CrisisCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn smoke_test(config: EngineConfig) -> Result<CrisisLevel, EngineError> {
    let clock = ManualClock::new(Utc::now());
    let mut engine = CrisisEngine::with_clock(config, clock.clone())?;
    engine.record_event(crisis_flux::BehaviorEvent::ManualRating(10));
    clock.advance_secs(1);
    engine.tick();
    let level = engine.level();
    engine.shutdown();
    Ok(level)
}

// Helper functions

fn read_input(input: &Path) -> Result<String, CrisisCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, CrisisCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(EngineConfig::default()),
    }
}

// Error types

#[derive(Debug)]
enum CrisisCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoEvents,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for CrisisCliError {
    fn from(e: io::Error) -> Self {
        CrisisCliError::Io(e)
    }
}

impl From<EngineError> for CrisisCliError {
    fn from(e: EngineError) -> Self {
        CrisisCliError::Engine(e)
    }
}

impl From<serde_json::Error> for CrisisCliError {
    fn from(e: serde_json::Error) -> Self {
        CrisisCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CrisisCliError> for CliError {
    fn from(e: CrisisCliError) -> Self {
        match e {
            CrisisCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CrisisCliError::Engine(EngineError::InvalidConfig(msg)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: msg,
                hint: Some("Run 'crisis config' to see the defaults".to_string()),
            },
            CrisisCliError::Engine(EngineError::ParseError(msg)) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some(format!("Ensure input matches the {} schema", SCHEMA_VERSION)),
            },
            CrisisCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            CrisisCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CrisisCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            CrisisCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            CrisisCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ClassifyReport {
    /// Final level including the self-report floor
    level: CrisisLevel,
    /// Level from behavioral signals alone
    signal_level: CrisisLevel,
    fog_score: f64,
    fog_band: FogBand,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
