//! Health clinical record recorder
//!
//! Requests read access for one clinical type, runs the query in the
//! background while the step is active and hands the records over at stop.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{log_name_for, HealthStore, Recorder, StepContext, NDJSON_CONTENT_TYPE};
use crate::error::RecorderError;
use crate::logger::DataLogger;
use crate::types::{ClinicalRecord, FinalizedOutput};

type QueryHandle = JoinHandle<Result<Vec<ClinicalRecord>, RecorderError>>;

/// Queries clinical records of one type during a step
pub struct HealthClinicalRecorder {
    identifier: String,
    clinical_type: String,
    fhir_resource_type: Option<String>,
    output_directory: Option<PathBuf>,
    rolling_file_size_threshold: u64,
    store: Option<Arc<dyn HealthStore>>,
    state: State,
}

enum State {
    Idle,
    Running(QueryHandle),
    Stopped,
}

impl HealthClinicalRecorder {
    pub fn new(
        identifier: impl Into<String>,
        clinical_type: impl Into<String>,
        fhir_resource_type: Option<String>,
        output_directory: Option<PathBuf>,
        rolling_file_size_threshold: u64,
        store: Option<Arc<dyn HealthStore>>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            clinical_type: clinical_type.into(),
            fhir_resource_type,
            output_directory,
            rolling_file_size_threshold,
            store,
            state: State::Idle,
        }
    }

    pub fn clinical_type(&self) -> &str {
        &self.clinical_type
    }

    pub fn fhir_resource_type(&self) -> Option<&str> {
        self.fhir_resource_type.as_deref()
    }

    fn write_records(&self, records: Vec<ClinicalRecord>) -> Result<FinalizedOutput, RecorderError> {
        let Some(directory) = &self.output_directory else {
            return Ok(FinalizedOutput::Records { records });
        };

        let mut logger = DataLogger::new(
            directory,
            &log_name_for(&self.identifier),
            self.rolling_file_size_threshold,
        )?;
        for record in &records {
            logger.append(record)?;
        }
        let sample_count = logger.items_written();
        Ok(FinalizedOutput::Files {
            files: logger.finish()?,
            content_type: NDJSON_CONTENT_TYPE.to_string(),
            sample_count,
        })
    }
}

#[async_trait]
impl Recorder for HealthClinicalRecorder {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn output_directory(&self) -> Option<&Path> {
        self.output_directory.as_deref()
    }

    async fn start(&mut self, ctx: &StepContext) -> Result<(), RecorderError> {
        if !matches!(self.state, State::Idle) {
            return Err(RecorderError::AlreadyStarted);
        }

        let store = self.store.clone().ok_or_else(|| {
            RecorderError::ResourceUnavailable("no health store available".to_string())
        })?;

        store
            .request_authorization(std::slice::from_ref(&self.clinical_type))
            .await?;

        let clinical_type = self.clinical_type.clone();
        let fhir_resource_type = self.fhir_resource_type.clone();
        let cancel = ctx.cancel.clone();
        let query = tokio::spawn(async move {
            tokio::select! {
                records = store.query_clinical_records(&clinical_type, fhir_resource_type.as_deref()) => records,
                _ = cancel.cancelled() => Err(RecorderError::Cancelled),
            }
        });

        debug!(
            recorder = %self.identifier,
            clinical_type = %self.clinical_type,
            step = %ctx.step_identifier,
            "clinical record query started"
        );
        self.state = State::Running(query);
        Ok(())
    }

    async fn stop(&mut self) -> Result<FinalizedOutput, RecorderError> {
        let State::Running(query) = &mut self.state else {
            return Err(RecorderError::NotStarted);
        };

        let joined = query.await;
        self.state = State::Stopped;

        let records = joined.map_err(|e| {
            RecorderError::ResourceUnavailable(format!("clinical query failed: {}", e))
        })??;
        debug!(
            recorder = %self.identifier,
            records = records.len(),
            "clinical record query finished"
        );
        self.write_records(records)
    }

    fn has_final_output(&self) -> bool {
        matches!(&self.state, State::Running(query) if query.is_finished())
    }
}

impl Drop for HealthClinicalRecorder {
    fn drop(&mut self) {
        if let State::Running(query) = &self.state {
            query.abort();
        }
    }
}
