//! Core types for Synheart Capture
//!
//! Recorder configurations and step definitions (created at task-definition
//! time), the samples recorders produce, and the per-recorder outcomes a
//! session hands back when its step ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{RecorderError, RecorderErrorKind, SessionError};

/// Kind-specific recorder parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecorderKind {
    /// Three-axis motion sampling
    Motion {
        /// Sampling frequency in Hz
        frequency_hz: f64,
    },
    /// Clinical record query against the health store
    HealthClinical {
        /// Clinical type identifier, e.g. `allergy_record`
        clinical_type: String,
        /// FHIR resource type the records are expected to carry
        #[serde(default)]
        fhir_resource_type: Option<String>,
    },
    /// Live quantity samples from the health store, e.g. heart rate
    HealthQuantity {
        /// Quantity type identifier, e.g. `heart_rate`
        quantity_type: String,
        /// Unit values are reported in, e.g. `count/min`
        unit: String,
    },
}

impl RecorderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecorderKind::Motion { .. } => "motion",
            RecorderKind::HealthClinical { .. } => "health_clinical",
            RecorderKind::HealthQuantity { .. } => "health_quantity",
        }
    }
}

/// Immutable description of one recorder attached to a step.
///
/// The identifier is the only link between a recorder and its entry in the
/// step result, so it must be unique within the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfiguration {
    identifier: String,
    #[serde(default)]
    output_directory: Option<PathBuf>,
    /// Roll data files over at this many bytes (0 = single file)
    #[serde(default)]
    rolling_file_size_threshold: u64,
    #[serde(flatten)]
    kind: RecorderKind,
}

impl RecorderConfiguration {
    pub fn new(identifier: impl Into<String>, kind: RecorderKind) -> Self {
        Self {
            identifier: identifier.into(),
            output_directory: None,
            rolling_file_size_threshold: 0,
            kind,
        }
    }

    /// Motion recorder sampling at `frequency_hz`
    pub fn motion(identifier: impl Into<String>, frequency_hz: f64) -> Self {
        Self::new(identifier, RecorderKind::Motion { frequency_hz })
    }

    /// Clinical record recorder for `clinical_type`
    pub fn health_clinical(
        identifier: impl Into<String>,
        clinical_type: impl Into<String>,
        fhir_resource_type: Option<String>,
    ) -> Self {
        Self::new(
            identifier,
            RecorderKind::HealthClinical {
                clinical_type: clinical_type.into(),
                fhir_resource_type,
            },
        )
    }

    /// Health quantity recorder for `quantity_type`, reported in `unit`
    pub fn health_quantity(
        identifier: impl Into<String>,
        quantity_type: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self::new(
            identifier,
            RecorderKind::HealthQuantity {
                quantity_type: quantity_type.into(),
                unit: unit.into(),
            },
        )
    }

    pub fn with_output_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.output_directory = Some(directory.into());
        self
    }

    pub fn with_rolling_file_size_threshold(mut self, bytes: u64) -> Self {
        self.rolling_file_size_threshold = bytes;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Directory stored with the configuration (lowest precedence)
    pub fn output_directory(&self) -> Option<&Path> {
        self.output_directory.as_deref()
    }

    pub fn rolling_file_size_threshold(&self) -> u64 {
        self.rolling_file_size_threshold
    }

    pub fn kind(&self) -> &RecorderKind {
        &self.kind
    }

    /// Health data types this recorder needs read access to
    pub fn requested_health_types(&self) -> Vec<String> {
        match &self.kind {
            RecorderKind::Motion { .. } => Vec::new(),
            RecorderKind::HealthClinical { clinical_type, .. } => vec![clinical_type.clone()],
            RecorderKind::HealthQuantity { quantity_type, .. } => vec![quantity_type.clone()],
        }
    }
}

/// A timed task step with its recorder configurations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveStep {
    pub identifier: String,
    /// How long the step records before ending on its own
    #[serde(default)]
    pub step_duration_ms: Option<u64>,
    #[serde(default)]
    pub recorder_configurations: Vec<RecorderConfiguration>,
}

impl ActiveStep {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            step_duration_ms: None,
            recorder_configurations: Vec::new(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.step_duration_ms = Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_recorder(mut self, configuration: RecorderConfiguration) -> Self {
        self.recorder_configurations.push(configuration);
        self
    }

    pub fn step_duration(&self) -> Option<Duration> {
        self.step_duration_ms.map(Duration::from_millis)
    }

    /// Parse a step definition from JSON
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let step: ActiveStep = serde_json::from_str(json).map_err(crate::error::ConfigError::from)?;
        step.validate()?;
        Ok(step)
    }

    /// Check identifiers are present and unique within the step
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.identifier.is_empty() {
            return Err(SessionError::InvalidStep("step identifier is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for configuration in &self.recorder_configurations {
            if configuration.identifier().is_empty() {
                return Err(SessionError::InvalidStep(format!(
                    "step '{}' has a recorder with an empty identifier",
                    self.identifier
                )));
            }
            if !seen.insert(configuration.identifier()) {
                return Err(SessionError::InvalidStep(format!(
                    "duplicate recorder identifier '{}' in step '{}'",
                    configuration.identifier(),
                    self.identifier
                )));
            }
        }

        Ok(())
    }

    /// Health read types requested by all recorders, deduplicated and sorted
    pub fn requested_health_types(&self) -> Vec<String> {
        self.recorder_configurations
            .iter()
            .flat_map(RecorderConfiguration::requested_health_types)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// One raw motion observation as delivered by a motion source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    /// Time since boot
    pub uptime: Duration,
    /// Acceleration along each axis (g)
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Kind-specific sample payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SamplePayload {
    Acceleration { x: f64, y: f64, z: f64 },
}

/// Sample with both its uptime stamp and the derived wall-clock time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedSample {
    /// Seconds since boot
    pub uptime_sec: f64,
    /// Wall-clock time (UTC)
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: SamplePayload,
}

/// A clinical record returned by the health store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalRecord {
    pub identifier: String,
    pub clinical_type: String,
    #[serde(default)]
    pub fhir_resource_type: Option<String>,
    pub display_name: String,
    /// Raw FHIR resource
    #[serde(default)]
    pub fhir_data: serde_json::Value,
}

/// A health store quantity measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantitySample {
    pub quantity_type: String,
    pub unit: String,
    pub value: f64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Artifact a recorder hands over when it stops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FinalizedOutput {
    /// Data written to rolled log files, oldest first
    Files {
        files: Vec<PathBuf>,
        content_type: String,
        sample_count: usize,
    },
    /// Samples kept in memory (no output directory)
    Samples { samples: Vec<TimestampedSample> },
    /// Query results kept in memory (no output directory)
    Records { records: Vec<ClinicalRecord> },
    /// Health quantity samples kept in memory (no output directory)
    Quantities { samples: Vec<QuantitySample> },
}

/// Why a recorder produced no measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: RecorderErrorKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: RecorderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&RecorderError> for FailureReason {
    fn from(err: &RecorderError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<RecorderError> for FailureReason {
    fn from(err: RecorderError) -> Self {
        Self::from(&err)
    }
}

/// Per-recorder outcome recorded in the step result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RecorderOutcome {
    Success(FinalizedOutput),
    Failure(FailureReason),
}

impl RecorderOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RecorderOutcome::Success(_))
    }

    pub fn failure_kind(&self) -> Option<RecorderErrorKind> {
        match self {
            RecorderOutcome::Success(_) => None,
            RecorderOutcome::Failure(reason) => Some(reason.kind),
        }
    }
}

/// Lifecycle of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Active,
    Finalizing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Active => "active",
            SessionState::Finalizing => "finalizing",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable result of one step: exactly one outcome per recorder identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_identifier: String,
    pub session_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Step ended through cancellation rather than normal completion
    pub cancelled: bool,
    outcomes: BTreeMap<String, RecorderOutcome>,
}

impl StepResult {
    pub(crate) fn from_parts(
        step_identifier: String,
        session_id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        cancelled: bool,
        outcomes: BTreeMap<String, RecorderOutcome>,
    ) -> Self {
        Self {
            step_identifier,
            session_id,
            start_date,
            end_date,
            cancelled,
            outcomes,
        }
    }

    /// Outcome for a recorder, `None` if no such recorder was configured
    pub fn outcome(&self, identifier: &str) -> Option<&RecorderOutcome> {
        self.outcomes.get(identifier)
    }

    pub fn outcomes(&self) -> &BTreeMap<String, RecorderOutcome> {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Whether the identifier has no entry at all (as opposed to a failed one)
    pub fn is_absent(&self, identifier: &str) -> bool {
        !self.outcomes.contains_key(identifier)
    }

    /// Identifiers of recorders that produced output
    pub fn succeeded(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_success())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Failed recorders with their reasons
    pub fn failed(&self) -> Vec<(&str, &FailureReason)> {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| match outcome {
                RecorderOutcome::Failure(reason) => Some((id.as_str(), reason)),
                RecorderOutcome::Success(_) => None,
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
