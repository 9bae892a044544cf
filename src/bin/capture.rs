//! Capture CLI - Developer tooling for Synheart Capture
//!
//! Commands:
//! - validate: Check a step definition and list the health types it requests
//! - simulate: Run a step against simulated data sources and print its result
//! - doctor: Diagnose clock and output directory setup

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use synheart_capture::recorder::DataSources;
use synheart_capture::simulated::{SimulatedHealthStore, SimulatedMotionSource};
use synheart_capture::timestamp::{Clock, ReferenceFrame, SystemClock};
use synheart_capture::{
    ActiveStep, ConfigError, RecordingSession, SessionConfig, SessionError, CAPTURE_VERSION,
    PRODUCER_NAME,
};

/// Capture - On-device capture engine for task-step recordings
#[derive(Parser)]
#[command(name = "capture")]
#[command(author = "Synheart AI Inc")]
#[command(version = CAPTURE_VERSION)]
#[command(about = "Record sensor data scoped to active task steps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a step definition
    Validate {
        /// Step definition JSON (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a step against simulated data sources
    Simulate {
        /// Step definition JSON (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Session configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,

        /// Session output directory (overrides the configuration file)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Step duration in ms when the definition has none
        #[arg(long, default_value = "1000")]
        duration_ms: u64,

        /// Cancel the step after this many ms
        #[arg(long)]
        cancel_after_ms: Option<u64>,

        /// Simulate a health store that denies authorization
        #[arg(long)]
        deny_health: bool,
    },

    /// Diagnose clock and output directory setup
    Doctor {
        /// Output directory to check for writability
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CaptureCliError> {
    match cli.command {
        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Simulate {
            input,
            config,
            output_dir,
            duration_ms,
            cancel_after_ms,
            deny_health,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(cmd_simulate(
                &input,
                config.as_deref(),
                output_dir,
                duration_ms,
                cancel_after_ms,
                deny_health,
            ))
        }

        Commands::Doctor { output_dir, json } => cmd_doctor(output_dir.as_deref(), json),
    }
}

fn read_input(input: &Path) -> Result<String, CaptureCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), CaptureCliError> {
    let step = ActiveStep::from_json(&read_input(input)?)?;

    let report = ValidationReport {
        step_identifier: step.identifier.clone(),
        step_duration_ms: step.step_duration_ms,
        recorders: step
            .recorder_configurations
            .iter()
            .map(|c| RecorderSummary {
                identifier: c.identifier().to_string(),
                kind: c.kind().as_str().to_string(),
                output_directory: c.output_directory().map(Path::to_path_buf),
            })
            .collect(),
        requested_health_types: step.requested_health_types(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Step Definition");
        println!("===============");
        println!("Step:      {}", report.step_identifier);
        match report.step_duration_ms {
            Some(ms) => println!("Duration:  {} ms", ms),
            None => println!("Duration:  open-ended"),
        }
        println!("\nRecorders:");
        for recorder in &report.recorders {
            println!(
                "  - {} ({}){}",
                recorder.identifier,
                recorder.kind,
                recorder
                    .output_directory
                    .as_ref()
                    .map(|d| format!(" -> {}", d.display()))
                    .unwrap_or_default()
            );
        }
        if !report.requested_health_types.is_empty() {
            println!("\nHealth read access: {}", report.requested_health_types.join(", "));
        }
    }

    Ok(())
}

async fn cmd_simulate(
    input: &Path,
    config: Option<&Path>,
    output_dir: Option<PathBuf>,
    duration_ms: u64,
    cancel_after_ms: Option<u64>,
    deny_health: bool,
) -> Result<(), CaptureCliError> {
    let mut step = ActiveStep::from_json(&read_input(input)?)?;
    if step.step_duration_ms.is_none() {
        step.step_duration_ms = Some(duration_ms);
    }

    let mut session_config = match config {
        Some(path) => SessionConfig::from_json(&fs::read_to_string(path)?)?,
        None => SessionConfig::default(),
    };
    if let Some(directory) = output_dir {
        session_config = session_config.with_output_directory(directory);
    }

    let health = if deny_health {
        SimulatedHealthStore::new().deny_authorization()
    } else {
        SimulatedHealthStore::new()
    };
    let sources = DataSources::new()
        .with_motion(Arc::new(SimulatedMotionSource::new()))
        .with_health(Arc::new(health));

    let session = RecordingSession::new(step, Arc::new(sources), session_config)?;

    if let Some(ms) = cancel_after_ms {
        let token = session.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            token.cancel();
        });
    }

    let result = session.run().await?;
    println!("{}", result.to_json()?);
    Ok(())
}

fn cmd_doctor(output_dir: Option<&Path>, json: bool) -> Result<(), CaptureCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "capture_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Capture version {}", CAPTURE_VERSION),
    });

    // Uptime source
    let uptime_check = if Path::new("/proc/uptime").exists() {
        DoctorCheck {
            name: "uptime".to_string(),
            status: CheckStatus::Ok,
            message: "Reading device uptime from /proc/uptime".to_string(),
        }
    } else {
        DoctorCheck {
            name: "uptime".to_string(),
            status: CheckStatus::Warning,
            message: "No /proc/uptime; uptime measured from process start".to_string(),
        }
    };
    checks.push(uptime_check);

    let clock = SystemClock::new();
    let frame = ReferenceFrame::capture(&clock);
    checks.push(DoctorCheck {
        name: "boot_time".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "Device booted at {} (uptime {:.0}s)",
            frame.boot_time().to_rfc3339(),
            clock.uptime().as_secs_f64()
        ),
    });

    if let Some(directory) = output_dir {
        let probe = directory.join(".capture-doctor");
        let result = fs::create_dir_all(directory)
            .and_then(|_| fs::write(&probe, b"ok"))
            .and_then(|_| fs::remove_file(&probe));
        checks.push(match result {
            Ok(()) => DoctorCheck {
                name: "output_directory".to_string(),
                status: CheckStatus::Ok,
                message: format!("{} is writable", directory.display()),
            },
            Err(e) => DoctorCheck {
                name: "output_directory".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot write to {}: {}", directory.display(), e),
            },
        });
    }

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
            message: "stdin is a pipe (step definitions can be piped with -i -)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: CAPTURE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Capture Doctor Report");
        println!("=====================");
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
        Err(CaptureCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum CaptureCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Config(ConfigError),
    Session(SessionError),
    DoctorFailed,
}

impl From<io::Error> for CaptureCliError {
    fn from(e: io::Error) -> Self {
        CaptureCliError::Io(e)
    }
}

impl From<serde_json::Error> for CaptureCliError {
    fn from(e: serde_json::Error) -> Self {
        CaptureCliError::Json(e)
    }
}

impl From<ConfigError> for CaptureCliError {
    fn from(e: ConfigError) -> Self {
        CaptureCliError::Config(e)
    }
}

impl From<SessionError> for CaptureCliError {
    fn from(e: SessionError) -> Self {
        CaptureCliError::Session(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CaptureCliError> for CliError {
    fn from(e: CaptureCliError) -> Self {
        match e {
            CaptureCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CaptureCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CaptureCliError::Config(e) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Timeouts are in milliseconds and must be positive".to_string()),
            },
            CaptureCliError::Session(e @ SessionError::InvalidStep(_)) => CliError {
                code: "INVALID_STEP".to_string(),
                message: e.to_string(),
                hint: Some("Run 'capture validate' for details".to_string()),
            },
            CaptureCliError::Session(e) => CliError {
                code: "SESSION_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            CaptureCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    step_identifier: String,
    step_duration_ms: Option<u64>,
    recorders: Vec<RecorderSummary>,
    requested_health_types: Vec<String>,
}

#[derive(serde::Serialize)]
struct RecorderSummary {
    identifier: String,
    kind: String,
    output_directory: Option<PathBuf>,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}
