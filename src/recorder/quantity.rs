//! Health quantity recorder
//!
//! Subscribes to live quantity samples (heart rate and similar) from the
//! health store for the duration of a step. The most recent sample is
//! observable while the step runs.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{log_name_for, HealthStore, Recorder, StepContext, NDJSON_CONTENT_TYPE};
use crate::cancel::CancellationToken;
use crate::error::RecorderError;
use crate::logger::DataLogger;
use crate::types::{FinalizedOutput, QuantitySample};

/// Records health store quantity samples of one type during a step
pub struct HealthQuantityRecorder {
    identifier: String,
    quantity_type: String,
    unit: String,
    output_directory: Option<PathBuf>,
    rolling_file_size_threshold: u64,
    store: Option<Arc<dyn HealthStore>>,
    latest: Arc<watch::Sender<Option<QuantitySample>>>,
    state: State,
}

enum State {
    Idle,
    Running {
        subscription_id: u64,
        stop_tx: Option<oneshot::Sender<()>>,
        pump: JoinHandle<Result<FinalizedOutput, RecorderError>>,
    },
    Stopped,
}

impl HealthQuantityRecorder {
    pub fn new(
        identifier: impl Into<String>,
        quantity_type: impl Into<String>,
        unit: impl Into<String>,
        output_directory: Option<PathBuf>,
        rolling_file_size_threshold: u64,
        store: Option<Arc<dyn HealthStore>>,
    ) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            identifier: identifier.into(),
            quantity_type: quantity_type.into(),
            unit: unit.into(),
            output_directory,
            rolling_file_size_threshold,
            store,
            latest: Arc::new(latest),
            state: State::Idle,
        }
    }

    pub fn quantity_type(&self) -> &str {
        &self.quantity_type
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Most recent sample received this step
    pub fn last_sample(&self) -> Option<QuantitySample> {
        self.latest.borrow().clone()
    }

    /// Observe each new sample as it arrives
    pub fn subscribe_latest(&self) -> watch::Receiver<Option<QuantitySample>> {
        self.latest.subscribe()
    }
}

#[async_trait]
impl Recorder for HealthQuantityRecorder {
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
            .request_authorization(std::slice::from_ref(&self.quantity_type))
            .await?;

        let sink = match &self.output_directory {
            Some(directory) => QuantitySink::File(DataLogger::new(
                directory,
                &log_name_for(&self.identifier),
                self.rolling_file_size_threshold,
            )?),
            None => QuantitySink::Memory(Vec::new()),
        };

        let subscription = store
            .subscribe_quantity_samples(&self.quantity_type, &self.unit)
            .await?;
        let (stop_tx, stop_rx) = oneshot::channel();

        let pump = tokio::spawn(pump_quantities(
            subscription.receiver,
            stop_rx,
            ctx.cancel.clone(),
            self.latest.clone(),
            sink,
        ));

        debug!(
            recorder = %self.identifier,
            quantity_type = %self.quantity_type,
            unit = %self.unit,
            step = %ctx.step_identifier,
            "health quantity recorder started"
        );

        self.state = State::Running {
            subscription_id: subscription.id,
            stop_tx: Some(stop_tx),
            pump,
        };
        Ok(())
    }

    async fn stop(&mut self) -> Result<FinalizedOutput, RecorderError> {
        let State::Running {
            subscription_id,
            stop_tx,
            pump,
        } = &mut self.state
        else {
            return Err(RecorderError::NotStarted);
        };

        if let Some(store) = &self.store {
            store.unsubscribe_quantity_samples(*subscription_id).await;
        }
        if let Some(tx) = stop_tx.take() {
            let _ = tx.send(());
        }

        let joined = pump.await;
        self.state = State::Stopped;

        let output = joined.map_err(|e| {
            RecorderError::ResourceUnavailable(format!("quantity pump failed: {}", e))
        })??;
        debug!(recorder = %self.identifier, "health quantity recorder stopped");
        Ok(output)
    }
}

impl Drop for HealthQuantityRecorder {
    fn drop(&mut self) {
        if let State::Running {
            subscription_id,
            pump,
            ..
        } = &self.state
        {
            pump.abort();
            if let (Some(store), Ok(runtime)) =
                (self.store.clone(), tokio::runtime::Handle::try_current())
            {
                let id = *subscription_id;
                runtime.spawn(async move { store.unsubscribe_quantity_samples(id).await });
            }
        }
    }
}

enum QuantitySink {
    File(DataLogger),
    Memory(Vec<QuantitySample>),
}

impl QuantitySink {
    fn push(&mut self, sample: QuantitySample) -> Result<(), RecorderError> {
        match self {
            QuantitySink::File(logger) => logger.append(&sample),
            QuantitySink::Memory(samples) => {
                samples.push(sample);
                Ok(())
            }
        }
    }

    fn finish(self) -> Result<FinalizedOutput, RecorderError> {
        match self {
            QuantitySink::File(logger) => {
                let sample_count = logger.items_written();
                let files = logger.finish()?;
                Ok(FinalizedOutput::Files {
                    files,
                    content_type: NDJSON_CONTENT_TYPE.to_string(),
                    sample_count,
                })
            }
            QuantitySink::Memory(samples) => Ok(FinalizedOutput::Quantities { samples }),
        }
    }
}

async fn pump_quantities(
    mut receiver: mpsc::Receiver<QuantitySample>,
    mut stop_rx: oneshot::Receiver<()>,
    cancel: CancellationToken,
    latest: Arc<watch::Sender<Option<QuantitySample>>>,
    mut sink: QuantitySink,
) -> Result<FinalizedOutput, RecorderError> {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = cancel.cancelled() => break,
            next = receiver.recv() => match next {
                Some(sample) => {
                    latest.send_replace(Some(sample.clone()));
                    sink.push(sample)?;
                }
                None => break,
            },
        }
    }

    while let Ok(sample) = receiver.try_recv() {
        latest.send_replace(Some(sample.clone()));
        sink.push(sample)?;
    }

    sink.finish()
}
