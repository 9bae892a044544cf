//! Synheart Capture - On-device capture engine for task-step recordings
//!
//! Capture runs the recorders attached to one active task step as a single
//! scoped session: recorders are built from immutable configurations, started
//! together, stopped together and their outcomes aggregated into one
//! [`StepResult`] with exactly one entry per configured recorder.
//!
//! ## Modules
//!
//! - **Session**: `Idle → Active → Finalizing → Closed` lifecycle over a step's recorders
//! - **Recorders**: motion, clinical-record and health-quantity recorders behind the [`Recorder`] trait
//! - **Timestamps**: uptime-relative sample times mapped onto wall-clock time
//! - **Data logger**: rolling NDJSON files for file-producing recorders

pub mod aggregator;
pub mod cancel;
pub mod config;
pub mod error;
pub mod logger;
pub mod recorder;
pub mod resolver;
pub mod session;
pub mod simulated;
pub mod timestamp;
pub mod types;

pub use cancel::CancellationToken;
pub use config::SessionConfig;
pub use error::{ConfigError, RecorderError, RecorderErrorKind, SessionError};
pub use recorder::{DataSources, Recorder, RecorderFactory, StepContext};
pub use session::{RecordingSession, StartReport};
pub use timestamp::{to_absolute, Clock, ReferenceFrame, SystemClock};

// Data model exports
pub use types::{
    ActiveStep, FailureReason, FinalizedOutput, QuantitySample, RecorderConfiguration,
    RecorderKind, RecorderOutcome, SessionState, StepResult,
};

/// Capture version embedded in CLI output
pub const CAPTURE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for CLI output
pub const PRODUCER_NAME: &str = "synheart-capture";
