//! Recorders
//!
//! A recorder turns one data source into timestamped samples or files for the
//! lifetime of a step. Recorders are built from immutable
//! [`RecorderConfiguration`]s by a [`RecorderFactory`] and driven by the
//! recording session through the [`Recorder`] trait.

mod health;
mod motion;
mod quantity;

pub use health::HealthClinicalRecorder;
pub use motion::MotionRecorder;
pub use quantity::HealthQuantityRecorder;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cancel::CancellationToken;
use crate::error::RecorderError;
use crate::resolver::resolve_chain;
use crate::timestamp::ReferenceFrame;
use crate::types::{
    ActiveStep, ClinicalRecord, FinalizedOutput, MotionSample, QuantitySample,
    RecorderConfiguration, RecorderKind,
};

/// Content type of rolled NDJSON data files
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Everything a recorder needs from the step that is starting it
#[derive(Debug, Clone)]
pub struct StepContext {
    pub step_identifier: String,
    /// Uptime/wall-clock pair captured when the session started
    pub reference: ReferenceFrame,
    /// Fires when the step is cancelled
    pub cancel: CancellationToken,
}

/// A unit producing samples or files from one data source during a step
#[async_trait]
pub trait Recorder: Send {
    /// Identifier copied from the configuration
    fn identifier(&self) -> &str;

    /// Directory file artifacts are written to, if any
    fn output_directory(&self) -> Option<&Path>;

    /// Begin recording. A second call fails with [`RecorderError::AlreadyStarted`].
    async fn start(&mut self, ctx: &StepContext) -> Result<(), RecorderError>;

    /// Flush, release the data source and hand over the artifact.
    ///
    /// Fails with [`RecorderError::NotStarted`] if the recorder was never
    /// started, its start failed, or it was already stopped.
    async fn stop(&mut self) -> Result<FinalizedOutput, RecorderError>;

    /// Whether the recorder already holds its final artifact before `stop`
    fn has_final_output(&self) -> bool {
        false
    }
}

/// Builds recorder instances from configurations
pub trait RecorderFactory: Send + Sync {
    fn make_recorder(
        &self,
        configuration: &RecorderConfiguration,
        step: &ActiveStep,
        output_directory: Option<PathBuf>,
    ) -> Box<dyn Recorder>;
}

/// Handle on a live sample stream
#[derive(Debug)]
pub struct Subscription<T> {
    pub id: u64,
    pub receiver: mpsc::Receiver<T>,
}

/// Platform motion sensor
#[async_trait]
pub trait MotionSource: Send + Sync {
    /// Start delivering samples at roughly `frequency_hz`
    async fn subscribe(&self, frequency_hz: f64) -> Result<Subscription<MotionSample>, RecorderError>;

    /// Stop delivering samples for a subscription
    async fn unsubscribe(&self, subscription_id: u64);
}

/// Platform health data store
#[async_trait]
pub trait HealthStore: Send + Sync {
    /// Ask for read access to the given types
    async fn request_authorization(&self, read_types: &[String]) -> Result<(), RecorderError>;

    /// Fetch clinical records of one type
    async fn query_clinical_records(
        &self,
        clinical_type: &str,
        fhir_resource_type: Option<&str>,
    ) -> Result<Vec<ClinicalRecord>, RecorderError>;

    /// Start delivering new quantity samples of one type, converted to `unit`
    async fn subscribe_quantity_samples(
        &self,
        quantity_type: &str,
        unit: &str,
    ) -> Result<Subscription<QuantitySample>, RecorderError>;

    /// Stop delivering samples for a quantity subscription
    async fn unsubscribe_quantity_samples(&self, subscription_id: u64);
}

/// Data sources available on the host; the stock [`RecorderFactory`].
///
/// A missing source does not prevent building the recorder; the recorder
/// fails its start with `ResourceUnavailable` instead.
#[derive(Clone, Default)]
pub struct DataSources {
    pub motion: Option<Arc<dyn MotionSource>>,
    pub health: Option<Arc<dyn HealthStore>>,
}

impl DataSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_motion(mut self, source: Arc<dyn MotionSource>) -> Self {
        self.motion = Some(source);
        self
    }

    pub fn with_health(mut self, store: Arc<dyn HealthStore>) -> Self {
        self.health = Some(store);
        self
    }
}

impl RecorderFactory for DataSources {
    fn make_recorder(
        &self,
        configuration: &RecorderConfiguration,
        _step: &ActiveStep,
        output_directory: Option<PathBuf>,
    ) -> Box<dyn Recorder> {
        match configuration.kind() {
            RecorderKind::Motion { frequency_hz } => Box::new(MotionRecorder::new(
                configuration.identifier(),
                *frequency_hz,
                output_directory,
                configuration.rolling_file_size_threshold(),
                self.motion.clone(),
            )),
            RecorderKind::HealthClinical {
                clinical_type,
                fhir_resource_type,
            } => Box::new(HealthClinicalRecorder::new(
                configuration.identifier(),
                clinical_type,
                fhir_resource_type.clone(),
                output_directory,
                configuration.rolling_file_size_threshold(),
                self.health.clone(),
            )),
            RecorderKind::HealthQuantity {
                quantity_type,
                unit,
            } => Box::new(HealthQuantityRecorder::new(
                configuration.identifier(),
                quantity_type,
                unit,
                output_directory,
                configuration.rolling_file_size_threshold(),
                self.health.clone(),
            )),
        }
    }
}

impl RecorderConfiguration {
    /// Build a recorder for `step`.
    ///
    /// `output_directory` overrides the configuration's stored directory for
    /// this call only; `None` falls back to the stored one.
    pub fn recorder(
        &self,
        step: &ActiveStep,
        output_directory: Option<&Path>,
        factory: &dyn RecorderFactory,
    ) -> Box<dyn Recorder> {
        let directory = resolve_chain(output_directory, None, self.output_directory());
        factory.make_recorder(self, step, directory)
    }
}

/// Derive a data logger name from a recorder identifier.
///
/// ASCII alphanumerics pass through; every other byte (`_` included) becomes
/// `_` plus two hex digits, so distinct identifiers never share a log file.
pub(crate) fn log_name_for(identifier: &str) -> String {
    let mut name = String::with_capacity(identifier.len());
    for byte in identifier.bytes() {
        if byte.is_ascii_alphanumeric() {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("_{:02x}", byte));
        }
    }
    name
}
