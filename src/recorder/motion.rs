//! Motion recorder
//!
//! Subscribes to a [`MotionSource`] and pumps its samples on a background task.
//! Samples are stamped with wall-clock time through the session's reference
//! frame, then written to rolling NDJSON files under the output directory (or
//! kept in memory when there is none).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{log_name_for, MotionSource, Recorder, StepContext, NDJSON_CONTENT_TYPE};
use crate::cancel::CancellationToken;
use crate::error::RecorderError;
use crate::logger::DataLogger;
use crate::timestamp::ReferenceFrame;
use crate::types::{FinalizedOutput, MotionSample, SamplePayload, TimestampedSample};

/// Records three-axis motion samples for one step
pub struct MotionRecorder {
    identifier: String,
    frequency_hz: f64,
    output_directory: Option<PathBuf>,
    rolling_file_size_threshold: u64,
    source: Option<Arc<dyn MotionSource>>,
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

impl MotionRecorder {
    pub fn new(
        identifier: impl Into<String>,
        frequency_hz: f64,
        output_directory: Option<PathBuf>,
        rolling_file_size_threshold: u64,
        source: Option<Arc<dyn MotionSource>>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            frequency_hz,
            output_directory,
            rolling_file_size_threshold,
            source,
            state: State::Idle,
        }
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }
}

#[async_trait]
impl Recorder for MotionRecorder {
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

        let source = self.source.clone().ok_or_else(|| {
            RecorderError::ResourceUnavailable("no motion source available".to_string())
        })?;

        if !self.frequency_hz.is_finite() || self.frequency_hz <= 0.0 {
            return Err(RecorderError::ResourceUnavailable(format!(
                "unsupported motion frequency {} Hz",
                self.frequency_hz
            )));
        }

        let sink = match &self.output_directory {
            Some(directory) => SampleSink::File(DataLogger::new(
                directory,
                &log_name_for(&self.identifier),
                self.rolling_file_size_threshold,
            )?),
            None => SampleSink::Memory(Vec::new()),
        };

        let subscription = source.subscribe(self.frequency_hz).await?;
        let (stop_tx, stop_rx) = oneshot::channel();

        let pump = tokio::spawn(pump_samples(
            self.identifier.clone(),
            subscription.receiver,
            stop_rx,
            ctx.cancel.clone(),
            ctx.reference,
            sink,
        ));

        debug!(
            recorder = %self.identifier,
            frequency_hz = self.frequency_hz,
            subscription = subscription.id,
            "motion recorder started"
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

        if let Some(source) = &self.source {
            source.unsubscribe(*subscription_id).await;
        }
        if let Some(tx) = stop_tx.take() {
            let _ = tx.send(());
        }

        let joined = pump.await;
        self.state = State::Stopped;

        let output = joined.map_err(|e| {
            RecorderError::ResourceUnavailable(format!("motion pump failed: {}", e))
        })??;
        debug!(recorder = %self.identifier, "motion recorder stopped");
        Ok(output)
    }
}

impl Drop for MotionRecorder {
    fn drop(&mut self) {
        if let State::Running {
            subscription_id,
            pump,
            ..
        } = &self.state
        {
            pump.abort();
            // Dropped mid-stop (stop timeout) or without stop: the source still holds the subscription
            if let (Some(source), Ok(runtime)) =
                (self.source.clone(), tokio::runtime::Handle::try_current())
            {
                let id = *subscription_id;
                runtime.spawn(async move { source.unsubscribe(id).await });
            }
        }
    }
}

enum SampleSink {
    File(DataLogger),
    Memory(Vec<TimestampedSample>),
}

impl SampleSink {
    fn push(&mut self, sample: TimestampedSample) -> Result<(), RecorderError> {
        match self {
            SampleSink::File(logger) => logger.append(&sample),
            SampleSink::Memory(samples) => {
                samples.push(sample);
                Ok(())
            }
        }
    }

    fn finish(self) -> Result<FinalizedOutput, RecorderError> {
        match self {
            SampleSink::File(logger) => {
                let sample_count = logger.items_written();
                let files = logger.finish()?;
                Ok(FinalizedOutput::Files {
                    files,
                    content_type: NDJSON_CONTENT_TYPE.to_string(),
                    sample_count,
                })
            }
            SampleSink::Memory(samples) => Ok(FinalizedOutput::Samples { samples }),
        }
    }
}

/// Keeps a recorder's stream non-decreasing in uptime
struct SampleStamper {
    reference: ReferenceFrame,
    last_uptime: Option<Duration>,
    dropped: usize,
}

impl SampleStamper {
    fn new(reference: ReferenceFrame) -> Self {
        Self {
            reference,
            last_uptime: None,
            dropped: 0,
        }
    }

    fn stamp(&mut self, sample: MotionSample) -> Option<TimestampedSample> {
        if let Some(last) = self.last_uptime {
            if sample.uptime < last {
                self.dropped += 1;
                return None;
            }
        }
        self.last_uptime = Some(sample.uptime);

        Some(TimestampedSample {
            uptime_sec: sample.uptime.as_secs_f64(),
            timestamp: self.reference.to_absolute(sample.uptime),
            payload: SamplePayload::Acceleration {
                x: sample.x,
                y: sample.y,
                z: sample.z,
            },
        })
    }
}

async fn pump_samples(
    identifier: String,
    mut receiver: mpsc::Receiver<MotionSample>,
    mut stop_rx: oneshot::Receiver<()>,
    cancel: CancellationToken,
    reference: ReferenceFrame,
    mut sink: SampleSink,
) -> Result<FinalizedOutput, RecorderError> {
    let mut stamper = SampleStamper::new(reference);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = cancel.cancelled() => break,
            next = receiver.recv() => match next {
                Some(sample) => {
                    if let Some(stamped) = stamper.stamp(sample) {
                        sink.push(stamped)?;
                    }
                }
                None => break,
            },
        }
    }

    // Anything already delivered belongs to this step
    while let Ok(sample) = receiver.try_recv() {
        if let Some(stamped) = stamper.stamp(sample) {
            sink.push(stamped)?;
        }
    }

    if stamper.dropped > 0 {
        warn!(
            recorder = %identifier,
            dropped = stamper.dropped,
            "dropped out-of-order motion samples"
        );
    }

    sink.finish()
}
