//! Recording session
//!
//! Owns the recorders of one active step and drives them through
//! `Idle → Active → Finalizing → Closed`.
//!
//! - `start` instantiates every configured recorder and starts them
//!   concurrently. A failed start is recorded for that recorder only.
//! - `finish` / `cancel` stop every instantiated recorder concurrently, each
//!   bounded by the stop timeout, wait for all of them, and aggregate one
//!   outcome per configured identifier.
//!
//! Transitions are serialized through one async mutex, so concurrent callers
//! cannot double-start or double-finalize a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregator::{aggregate, OutcomeCounts, StepSummary};
use crate::cancel::CancellationToken;
use crate::config::SessionConfig;
use crate::error::{RecorderError, SessionError};
use crate::recorder::{Recorder, RecorderFactory, StepContext};
use crate::resolver::resolve_chain;
use crate::timestamp::{Clock, ReferenceFrame, SystemClock};
use crate::types::{ActiveStep, FailureReason, RecorderOutcome, SessionState, StepResult};

/// Per-recorder start results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartReport {
    /// Recorders that started, in configuration order
    pub started: Vec<String>,
    pub failed: BTreeMap<String, FailureReason>,
}

impl StartReport {
    pub fn all_started(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default)]
struct SessionInner {
    recorders: Vec<Box<dyn Recorder>>,
    start_failures: HashMap<String, FailureReason>,
    started_at: Option<DateTime<Utc>>,
}

/// Recording session scoped to one active step
pub struct RecordingSession {
    id: Uuid,
    step: ActiveStep,
    config: SessionConfig,
    factory: Arc<dyn RecorderFactory>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    end: CancellationToken,
    state_tx: watch::Sender<SessionState>,
    inner: Mutex<SessionInner>,
}

impl RecordingSession {
    /// Create an idle session for `step`.
    ///
    /// Fails if the step has duplicate or empty recorder identifiers, or the
    /// configuration is invalid.
    pub fn new(
        step: ActiveStep,
        factory: Arc<dyn RecorderFactory>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        step.validate()?;
        config.validate()?;

        let (state_tx, _) = watch::channel(SessionState::Idle);
        Ok(Self {
            id: Uuid::new_v4(),
            step,
            config,
            factory,
            clock: Arc::new(SystemClock::new()),
            cancel: CancellationToken::new(),
            end: CancellationToken::new(),
            state_tx,
            inner: Mutex::new(SessionInner::default()),
        })
    }

    /// Use a different clock for the session's reference frame
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn step(&self) -> &ActiveStep {
        &self.step
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Token that cancels the step when triggered (observed by [`run`](Self::run))
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Token that ends the step normally when triggered (observed by [`run`](Self::run))
    pub fn end_token(&self) -> CancellationToken {
        self.end.clone()
    }

    fn expect_state(&self, expected: SessionState, action: &str) -> Result<(), SessionError> {
        let current = self.state();
        if current != expected {
            return Err(SessionError::InvalidTransition {
                from: current.to_string(),
                action: action.to_string(),
            });
        }
        Ok(())
    }

    /// Instantiate and start every configured recorder (`Idle → Active`)
    pub async fn start(&self) -> Result<StartReport, SessionError> {
        let mut inner = self.inner.lock().await;
        self.expect_state(SessionState::Idle, "start")?;

        let reference = ReferenceFrame::capture(self.clock.as_ref());
        inner.started_at = Some(reference.wall_clock);
        let ctx = StepContext {
            step_identifier: self.step.identifier.clone(),
            reference,
            cancel: self.cancel.clone(),
        };

        let start_timeout = self.config.start_timeout();
        let mut pending = Vec::with_capacity(self.step.recorder_configurations.len());
        for configuration in &self.step.recorder_configurations {
            let directory = resolve_chain(
                None,
                self.config.output_directory(),
                configuration.output_directory(),
            );
            let mut recorder = self.factory.make_recorder(configuration, &self.step, directory);
            let ctx = ctx.clone();
            let handle = tokio::spawn(async move {
                let result = tokio::time::timeout(start_timeout, recorder.start(&ctx)).await;
                (recorder, result)
            });
            pending.push((configuration.identifier().to_string(), handle));
        }

        let mut report = StartReport::default();
        for (identifier, handle) in pending {
            let failure = match handle.await {
                Ok((recorder, Ok(Ok(())))) => {
                    inner.recorders.push(recorder);
                    None
                }
                Ok((recorder, Ok(Err(err)))) => {
                    // Kept so stop can release anything the failed start acquired
                    inner.recorders.push(recorder);
                    Some(FailureReason::from(&err))
                }
                Ok((recorder, Err(_))) => {
                    inner.recorders.push(recorder);
                    Some(FailureReason::from(RecorderError::Timeout(
                        self.config.start_timeout_ms,
                    )))
                }
                Err(e) => Some(FailureReason::from(RecorderError::ResourceUnavailable(
                    format!("recorder start task failed: {}", e),
                ))),
            };

            match failure {
                None => report.started.push(identifier),
                Some(reason) => {
                    warn!(
                        session_id = %self.id,
                        recorder = %identifier,
                        kind = reason.kind.as_str(),
                        "recorder failed to start: {}",
                        reason.message
                    );
                    inner.start_failures.insert(identifier.clone(), reason.clone());
                    report.failed.insert(identifier, reason);
                }
            }
        }

        self.state_tx.send_replace(SessionState::Active);
        info!(
            session_id = %self.id,
            step = %self.step.identifier,
            started = report.started.len(),
            failed = report.failed.len(),
            "recording session active"
        );
        Ok(report)
    }

    /// End the step normally (`Active → Finalizing → Closed`)
    pub async fn finish(&self) -> Result<StepResult, SessionError> {
        self.finalize(false).await
    }

    /// Cancel the step. Recorders without a final artifact report `Cancelled`.
    pub async fn cancel(&self) -> Result<StepResult, SessionError> {
        self.finalize(true).await
    }

    /// Start, wait for the step to end, then finalize.
    ///
    /// The step ends when its duration elapses or the end token fires; it is
    /// cancelled when the cancellation token fires. Steps without a duration
    /// wait for one of the tokens.
    pub async fn run(&self) -> Result<StepResult, SessionError> {
        self.start().await?;

        let cancelled = match self.step.step_duration() {
            Some(duration) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => true,
                _ = self.end.cancelled() => false,
                _ = tokio::time::sleep(duration) => false,
            },
            None => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => true,
                _ = self.end.cancelled() => false,
            },
        };

        self.finalize(cancelled).await
    }

    async fn finalize(&self, cancelled: bool) -> Result<StepResult, SessionError> {
        let action = if cancelled { "cancel" } else { "finish" };
        let mut inner = self.inner.lock().await;
        self.expect_state(SessionState::Active, action)?;
        self.state_tx.send_replace(SessionState::Finalizing);

        let recorders = std::mem::take(&mut inner.recorders);
        let finished_early: HashSet<String> = recorders
            .iter()
            .filter(|recorder| recorder.has_final_output())
            .map(|recorder| recorder.identifier().to_string())
            .collect();

        if cancelled {
            self.cancel.cancel();
        }

        let stop_timeout = self.config.stop_timeout();
        let mut pending = Vec::with_capacity(recorders.len());
        for mut recorder in recorders {
            let identifier = recorder.identifier().to_string();
            let handle = tokio::spawn(async move {
                let result = tokio::time::timeout(stop_timeout, recorder.stop()).await;
                drop(recorder);
                result
            });
            pending.push((identifier, handle));
        }

        let mut stopped: HashMap<String, RecorderOutcome> = HashMap::with_capacity(pending.len());
        for (identifier, handle) in pending {
            let outcome = match handle.await {
                Ok(Ok(Ok(output))) => RecorderOutcome::Success(output),
                Ok(Ok(Err(err))) => RecorderOutcome::Failure(FailureReason::from(&err)),
                Ok(Err(_)) => {
                    warn!(
                        session_id = %self.id,
                        recorder = %identifier,
                        timeout_ms = self.config.stop_timeout_ms,
                        "recorder stop timed out"
                    );
                    RecorderOutcome::Failure(FailureReason::from(RecorderError::Timeout(
                        self.config.stop_timeout_ms,
                    )))
                }
                Err(e) => RecorderOutcome::Failure(FailureReason::from(
                    RecorderError::ResourceUnavailable(format!("recorder stop task failed: {}", e)),
                )),
            };
            stopped.insert(identifier, outcome);
        }

        let mut outcomes = Vec::with_capacity(self.step.recorder_configurations.len());
        for configuration in &self.step.recorder_configurations {
            let identifier = configuration.identifier();
            let stop_outcome = stopped.remove(identifier);

            let outcome = if let Some(reason) = inner.start_failures.get(identifier) {
                if let Some(RecorderOutcome::Failure(stop_reason)) = &stop_outcome {
                    debug!(
                        recorder = %identifier,
                        kind = stop_reason.kind.as_str(),
                        "stop after failed start"
                    );
                }
                RecorderOutcome::Failure(reason.clone())
            } else if cancelled && !finished_early.contains(identifier) {
                if stop_outcome.as_ref().is_some_and(RecorderOutcome::is_success) {
                    debug!(recorder = %identifier, "discarding partial output of cancelled recorder");
                }
                RecorderOutcome::Failure(FailureReason::from(RecorderError::Cancelled))
            } else {
                stop_outcome.unwrap_or_else(|| {
                    RecorderOutcome::Failure(FailureReason::from(
                        RecorderError::ResourceUnavailable("recorder was never instantiated".to_string()),
                    ))
                })
            };
            outcomes.push((identifier.to_string(), outcome));
        }

        let end_date = self.clock.now();
        let result = aggregate(
            StepSummary {
                step_identifier: self.step.identifier.clone(),
                session_id: self.id,
                start_date: inner.started_at.unwrap_or(end_date),
                end_date,
                cancelled,
            },
            outcomes,
        );
        inner.start_failures.clear();

        self.state_tx.send_replace(SessionState::Closed);

        let counts = OutcomeCounts::of(&result);
        info!(
            session_id = %self.id,
            step = %self.step.identifier,
            cancelled,
            succeeded = counts.succeeded,
            failed = counts.failed,
            "recording session closed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecorderErrorKind;
    use crate::recorder::DataSources;
    use crate::simulated::{SimulatedHealthStore, SimulatedMotionSource};
    use crate::types::{FinalizedOutput, RecorderConfiguration};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Behavior {
        start_error: Option<RecorderErrorKind>,
        start_delay: Option<Duration>,
        stop_delay: Option<Duration>,
        finished_early: bool,
    }

    struct FakeRecorder {
        identifier: String,
        output_directory: Option<PathBuf>,
        behavior: Behavior,
        started: bool,
        stop_calls: Arc<AtomicUsize>,
    }

    fn error_of(kind: RecorderErrorKind) -> RecorderError {
        match kind {
            RecorderErrorKind::PermissionDenied => RecorderError::PermissionDenied("fake".to_string()),
            RecorderErrorKind::AlreadyStarted => RecorderError::AlreadyStarted,
            RecorderErrorKind::NotStarted => RecorderError::NotStarted,
            RecorderErrorKind::Cancelled => RecorderError::Cancelled,
            RecorderErrorKind::Timeout => RecorderError::Timeout(0),
            RecorderErrorKind::ResourceUnavailable => {
                RecorderError::ResourceUnavailable("fake".to_string())
            }
        }
    }

    #[async_trait]
    impl Recorder for FakeRecorder {
        fn identifier(&self) -> &str {
            &self.identifier
        }

        fn output_directory(&self) -> Option<&Path> {
            self.output_directory.as_deref()
        }

        async fn start(&mut self, _ctx: &StepContext) -> Result<(), RecorderError> {
            if self.started {
                return Err(RecorderError::AlreadyStarted);
            }
            if let Some(delay) = self.behavior.start_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(kind) = self.behavior.start_error {
                return Err(error_of(kind));
            }
            self.started = true;
            Ok(())
        }

        async fn stop(&mut self) -> Result<FinalizedOutput, RecorderError> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            if !self.started {
                return Err(RecorderError::NotStarted);
            }
            if let Some(delay) = self.behavior.stop_delay {
                tokio::time::sleep(delay).await;
            }
            self.started = false;
            Ok(FinalizedOutput::Samples { samples: Vec::new() })
        }

        fn has_final_output(&self) -> bool {
            self.started && self.behavior.finished_early
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        behaviors: HashMap<String, Behavior>,
        stop_calls: Arc<AtomicUsize>,
        directories: std::sync::Mutex<HashMap<String, Option<PathBuf>>>,
    }

    impl FakeFactory {
        fn with(mut self, identifier: &str, behavior: Behavior) -> Self {
            self.behaviors.insert(identifier.to_string(), behavior);
            self
        }
    }

    impl RecorderFactory for FakeFactory {
        fn make_recorder(
            &self,
            configuration: &RecorderConfiguration,
            _step: &ActiveStep,
            output_directory: Option<PathBuf>,
        ) -> Box<dyn Recorder> {
            self.directories
                .lock()
                .unwrap()
                .insert(configuration.identifier().to_string(), output_directory.clone());
            Box::new(FakeRecorder {
                identifier: configuration.identifier().to_string(),
                output_directory,
                behavior: self
                    .behaviors
                    .get(configuration.identifier())
                    .cloned()
                    .unwrap_or_default(),
                started: false,
                stop_calls: self.stop_calls.clone(),
            })
        }
    }

    fn three_recorder_step() -> ActiveStep {
        ActiveStep::new("walk")
            .with_recorder(RecorderConfiguration::motion("one", 10.0))
            .with_recorder(RecorderConfiguration::motion("two", 10.0))
            .with_recorder(RecorderConfiguration::motion("three", 10.0))
    }

    #[tokio::test]
    async fn test_partial_start_failure() {
        let factory = Arc::new(FakeFactory::default().with(
            "two",
            Behavior {
                start_error: Some(RecorderErrorKind::PermissionDenied),
                ..Default::default()
            },
        ));
        let session =
            RecordingSession::new(three_recorder_step(), factory.clone(), SessionConfig::default())
                .unwrap();

        let report = session.start().await.unwrap();
        assert_eq!(report.started, vec!["one".to_string(), "three".to_string()]);
        assert_eq!(report.failed["two"].kind, RecorderErrorKind::PermissionDenied);
        assert_eq!(session.state(), SessionState::Active);

        let result = session.finish().await.unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.outcome("one").unwrap().is_success());
        assert!(result.outcome("three").unwrap().is_success());
        assert_eq!(
            result.outcome("two").unwrap().failure_kind(),
            Some(RecorderErrorKind::PermissionDenied)
        );

        // Stop attempted on every instantiated recorder
        assert_eq!(factory.stop_calls.load(Ordering::SeqCst), 3);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_stop_times_out() {
        let factory = Arc::new(FakeFactory::default().with(
            "three",
            Behavior {
                stop_delay: Some(Duration::from_secs(3600)),
                ..Default::default()
            },
        ));
        let config = SessionConfig::default().with_stop_timeout(Duration::from_millis(50));
        let session = RecordingSession::new(three_recorder_step(), factory, config).unwrap();

        session.start().await.unwrap();
        let result = session.finish().await.unwrap();

        assert_eq!(
            result.outcome("three").unwrap().failure_kind(),
            Some(RecorderErrorKind::Timeout)
        );
        assert_eq!(result.succeeded(), vec!["one", "two"]);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_start_times_out() {
        let factory = Arc::new(FakeFactory::default().with(
            "two",
            Behavior {
                start_delay: Some(Duration::from_secs(3600)),
                ..Default::default()
            },
        ));
        let config = SessionConfig::default().with_start_timeout(Duration::from_millis(50));
        let session =
            RecordingSession::new(three_recorder_step(), factory.clone(), config).unwrap();

        let report = session.start().await.unwrap();
        assert_eq!(report.started, vec!["one".to_string(), "three".to_string()]);
        assert_eq!(report.failed["two"].kind, RecorderErrorKind::Timeout);
        assert_eq!(session.state(), SessionState::Active);

        let result = session.finish().await.unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(
            result.outcome("two").unwrap().failure_kind(),
            Some(RecorderErrorKind::Timeout)
        );
        assert_eq!(result.succeeded(), vec!["one", "three"]);

        // The timed-out recorder is still stopped
        assert_eq!(factory.stop_calls.load(Ordering::SeqCst), 3);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_similar_identifiers_write_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let step = ActiveStep::new("walk")
            .with_duration(Duration::from_millis(200))
            .with_recorder(RecorderConfiguration::motion("hand-accel", 100.0))
            .with_recorder(RecorderConfiguration::motion("hand.accel", 100.0));
        let sources = DataSources::new().with_motion(Arc::new(SimulatedMotionSource::new()));
        let session = RecordingSession::new(
            step,
            Arc::new(sources),
            SessionConfig::default().with_output_directory(dir.path()),
        )
        .unwrap();

        let result = session.run().await.unwrap();

        let mut all_files = Vec::new();
        for identifier in ["hand-accel", "hand.accel"] {
            match result.outcome(identifier).unwrap() {
                RecorderOutcome::Success(FinalizedOutput::Files { files, sample_count, .. }) => {
                    let lines: usize = files
                        .iter()
                        .map(|f| std::fs::read_to_string(f).unwrap().lines().count())
                        .sum();
                    assert_eq!(lines, *sample_count, "{} shares its files", identifier);
                    all_files.extend(files.iter().cloned());
                }
                other => panic!("unexpected outcome for {}: {:?}", identifier, other),
            }
        }

        let distinct: HashSet<&PathBuf> = all_files.iter().collect();
        assert_eq!(distinct.len(), all_files.len());
        assert!(all_files.len() >= 2);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let session = RecordingSession::new(
            three_recorder_step(),
            Arc::new(FakeFactory::default()),
            SessionConfig::default(),
        )
        .unwrap();

        assert!(matches!(
            session.finish().await,
            Err(SessionError::InvalidTransition { .. })
        ));

        session.start().await.unwrap();
        assert!(matches!(
            session.start().await,
            Err(SessionError::InvalidTransition { .. })
        ));

        session.finish().await.unwrap();
        let err = session.cancel().await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot cancel a session in state closed");
        assert!(session.finish().await.is_err());
        assert!(session.start().await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_finish_runs_once() {
        let session = Arc::new(
            RecordingSession::new(
                three_recorder_step(),
                Arc::new(FakeFactory::default()),
                SessionConfig::default(),
            )
            .unwrap(),
        );
        session.start().await.unwrap();

        let a = tokio::spawn({
            let session = session.clone();
            async move { session.finish().await }
        });
        let b = tokio::spawn({
            let session = session.clone();
            async move { session.finish().await }
        });

        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_keeps_finished_recorders() {
        let factory = Arc::new(FakeFactory::default().with(
            "one",
            Behavior {
                finished_early: true,
                ..Default::default()
            },
        ));
        let session =
            RecordingSession::new(three_recorder_step(), factory, SessionConfig::default()).unwrap();
        let token = session.cancellation_token();

        session.start().await.unwrap();
        let result = session.cancel().await.unwrap();

        assert!(result.cancelled);
        assert!(token.is_cancelled());
        assert!(result.outcome("one").unwrap().is_success());
        assert_eq!(
            result.outcome("two").unwrap().failure_kind(),
            Some(RecorderErrorKind::Cancelled)
        );
        assert_eq!(
            result.outcome("three").unwrap().failure_kind(),
            Some(RecorderErrorKind::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_duplicate_identifiers_rejected() {
        let step = ActiveStep::new("walk")
            .with_recorder(RecorderConfiguration::motion("accel", 10.0))
            .with_recorder(RecorderConfiguration::motion("accel", 20.0));
        let result = RecordingSession::new(step, Arc::new(FakeFactory::default()), SessionConfig::default());
        assert!(matches!(result, Err(SessionError::InvalidStep(_))));
    }

    #[tokio::test]
    async fn test_session_default_directory_precedence() {
        let step = ActiveStep::new("walk")
            .with_recorder(RecorderConfiguration::motion("stored", 10.0).with_output_directory("/config"))
            .with_recorder(RecorderConfiguration::motion("plain", 10.0));
        let factory = Arc::new(FakeFactory::default());

        let with_default = RecordingSession::new(
            step.clone(),
            factory.clone(),
            SessionConfig::default().with_output_directory("/session"),
        )
        .unwrap();
        with_default.start().await.unwrap();
        {
            let directories = factory.directories.lock().unwrap();
            assert_eq!(directories["stored"], Some(PathBuf::from("/session")));
            assert_eq!(directories["plain"], Some(PathBuf::from("/session")));
        }

        let without_default =
            RecordingSession::new(step, factory.clone(), SessionConfig::default()).unwrap();
        without_default.start().await.unwrap();
        let directories = factory.directories.lock().unwrap();
        assert_eq!(directories["stored"], Some(PathBuf::from("/config")));
        assert_eq!(directories["plain"], None);
    }

    #[tokio::test]
    async fn test_state_transitions_are_observable() {
        let session = RecordingSession::new(
            three_recorder_step(),
            Arc::new(FakeFactory::default()),
            SessionConfig::default(),
        )
        .unwrap();
        let mut states = session.subscribe_state();
        assert_eq!(*states.borrow_and_update(), SessionState::Idle);

        session.start().await.unwrap();
        assert_eq!(*states.borrow_and_update(), SessionState::Active);

        session.finish().await.unwrap();
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_run_with_simulated_sources() {
        let dir = tempfile::tempdir().unwrap();
        let step = ActiveStep::new("tapping")
            .with_duration(Duration::from_millis(100))
            .with_recorder(RecorderConfiguration::motion("accel", 100.0))
            .with_recorder(RecorderConfiguration::health_clinical(
                "allergies",
                "allergy_record",
                Some("AllergyIntolerance".to_string()),
            ));
        let sources = DataSources::new()
            .with_motion(Arc::new(SimulatedMotionSource::new()))
            .with_health(Arc::new(SimulatedHealthStore::new().deny_authorization()));
        let session = RecordingSession::new(
            step,
            Arc::new(sources),
            SessionConfig::default().with_output_directory(dir.path()),
        )
        .unwrap();

        let result = session.run().await.unwrap();

        assert!(!result.cancelled);
        assert_eq!(result.len(), 2);
        assert_eq!(
            result.outcome("allergies").unwrap().failure_kind(),
            Some(RecorderErrorKind::PermissionDenied)
        );
        match result.outcome("accel").unwrap() {
            RecorderOutcome::Success(FinalizedOutput::Files { files, sample_count, .. }) => {
                assert!(*sample_count > 0);
                assert!(files.iter().all(|f| f.starts_with(dir.path())));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(result.end_date >= result.start_date);
    }

    #[tokio::test]
    async fn test_run_cancelled_by_token() {
        let step = ActiveStep::new("open_ended")
            .with_recorder(RecorderConfiguration::motion("accel", 50.0));
        let sources = DataSources::new().with_motion(Arc::new(SimulatedMotionSource::new()));
        let session = Arc::new(
            RecordingSession::new(step, Arc::new(sources), SessionConfig::default()).unwrap(),
        );

        let runner = tokio::spawn({
            let session = session.clone();
            async move { session.run().await }
        });

        let mut states = session.subscribe_state();
        states
            .wait_for(|state| *state == SessionState::Active)
            .await
            .unwrap();
        session.cancellation_token().cancel();

        let result = runner.await.unwrap().unwrap();
        assert!(result.cancelled);
        assert_eq!(
            result.outcome("accel").unwrap().failure_kind(),
            Some(RecorderErrorKind::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_run_ended_by_end_token() {
        let step = ActiveStep::new("open_ended")
            .with_recorder(RecorderConfiguration::motion("accel", 50.0));
        let sources = DataSources::new().with_motion(Arc::new(SimulatedMotionSource::new()));
        let session = Arc::new(
            RecordingSession::new(step, Arc::new(sources), SessionConfig::default()).unwrap(),
        );

        let runner = tokio::spawn({
            let session = session.clone();
            async move { session.run().await }
        });

        let mut states = session.subscribe_state();
        states
            .wait_for(|state| *state == SessionState::Active)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.end_token().cancel();

        let result = runner.await.unwrap().unwrap();
        assert!(!result.cancelled);
        assert!(result.outcome("accel").unwrap().is_success());
    }

    #[tokio::test]
    async fn test_missing_source_does_not_abort_session() {
        let step = ActiveStep::new("walk")
            .with_recorder(RecorderConfiguration::motion("accel", 50.0))
            .with_recorder(RecorderConfiguration::health_clinical("labs", "lab_result_record", None))
            .with_recorder(RecorderConfiguration::health_quantity("pulse", "heart_rate", "count/min"));
        let sources = DataSources::new().with_health(Arc::new(SimulatedHealthStore::new()));
        let session =
            RecordingSession::new(step, Arc::new(sources), SessionConfig::default()).unwrap();

        session.start().await.unwrap();
        let result = session.finish().await.unwrap();

        assert_eq!(
            result.outcome("accel").unwrap().failure_kind(),
            Some(RecorderErrorKind::ResourceUnavailable)
        );
        assert!(matches!(
            result.outcome("labs"),
            Some(RecorderOutcome::Success(FinalizedOutput::Records { .. }))
        ));
        assert!(matches!(
            result.outcome("pulse"),
            Some(RecorderOutcome::Success(FinalizedOutput::Quantities { .. }))
        ));
    }
}
