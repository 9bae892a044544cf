//! Simulated data sources
//!
//! Stand-ins for the platform motion sensor and health store, used by the
//! `capture simulate` command and the test suite.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::RecorderError;
use crate::recorder::{HealthStore, MotionSource, Subscription};
use crate::timestamp::{Clock, SystemClock};
use crate::types::{ClinicalRecord, MotionSample, QuantitySample};

/// Channel capacity for simulated sample streams
const SAMPLE_BUFFER: usize = 256;

/// Default spacing of simulated quantity samples
const DEFAULT_QUANTITY_INTERVAL: Duration = Duration::from_secs(1);

/// Motion source emitting a synthetic gravity-plus-tremor signal
pub struct SimulatedMotionSource {
    clock: SystemClock,
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<u64, CancellationToken>>,
}

impl Default for SimulatedMotionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMotionSource {
    pub fn new() -> Self {
        Self {
            clock: SystemClock::new(),
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Number of subscriptions still delivering samples
    pub async fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().await.len()
    }
}

#[async_trait]
impl MotionSource for SimulatedMotionSource {
    async fn subscribe(&self, frequency_hz: f64) -> Result<Subscription<MotionSample>, RecorderError> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return Err(RecorderError::ResourceUnavailable(format!(
                "unsupported frequency {} Hz",
                frequency_hz
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.subscriptions.lock().await.insert(id, token.clone());

        let (tx, receiver) = mpsc::channel(SAMPLE_BUFFER);
        let period = Duration::from_secs_f64(1.0 / frequency_hz);
        let start_uptime = self.clock.uptime();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut uptime = start_uptime;
            let mut n: u64 = 0;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let phase = n as f64 * 0.1;
                        let sample = MotionSample {
                            uptime,
                            x: 0.02 * phase.sin(),
                            y: 0.02 * phase.cos(),
                            z: -1.0 + 0.01 * (phase * 3.0).sin(),
                        };
                        if tx.send(sample).await.is_err() {
                            break;
                        }
                        uptime += period;
                        n += 1;
                    }
                }
            }
            debug!(subscription = id, samples = n, "simulated motion stream ended");
        });

        Ok(Subscription { id, receiver })
    }

    async fn unsubscribe(&self, subscription_id: u64) {
        if let Some(token) = self.subscriptions.lock().await.remove(&subscription_id) {
            token.cancel();
        }
    }
}

/// Health store returning canned clinical records and a synthetic pulse
#[derive(Debug, Clone)]
pub struct SimulatedHealthStore {
    deny: bool,
    query_delay: Duration,
    records: Option<Vec<ClinicalRecord>>,
    quantity_interval: Duration,
    next_id: Arc<AtomicU64>,
    quantity_subscriptions: Arc<Mutex<HashMap<u64, CancellationToken>>>,
}

impl Default for SimulatedHealthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHealthStore {
    pub fn new() -> Self {
        Self {
            deny: false,
            query_delay: Duration::ZERO,
            records: None,
            quantity_interval: DEFAULT_QUANTITY_INTERVAL,
            next_id: Arc::new(AtomicU64::new(1)),
            quantity_subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Refuse every authorization request
    pub fn deny_authorization(mut self) -> Self {
        self.deny = true;
        self
    }

    /// Delay each query, to simulate a slow store
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    /// Emit quantity samples this often
    pub fn with_quantity_interval(mut self, interval: Duration) -> Self {
        self.quantity_interval = interval;
        self
    }

    /// Number of quantity subscriptions still delivering samples
    pub async fn active_quantity_subscriptions(&self) -> usize {
        self.quantity_subscriptions.lock().await.len()
    }

    /// Serve these records instead of the generated ones
    pub fn with_records(mut self, records: Vec<ClinicalRecord>) -> Self {
        self.records = Some(records);
        self
    }

    fn generated_records(clinical_type: &str, fhir_resource_type: Option<&str>) -> Vec<ClinicalRecord> {
        ["Penicillin", "Peanuts"]
            .iter()
            .enumerate()
            .map(|(i, substance)| ClinicalRecord {
                identifier: format!("{}-{}", clinical_type, i + 1),
                clinical_type: clinical_type.to_string(),
                fhir_resource_type: fhir_resource_type.map(str::to_string),
                display_name: substance.to_string(),
                fhir_data: json!({
                    "resourceType": fhir_resource_type.unwrap_or("Resource"),
                    "code": { "text": substance },
                }),
            })
            .collect()
    }
}

#[async_trait]
impl HealthStore for SimulatedHealthStore {
    async fn request_authorization(&self, read_types: &[String]) -> Result<(), RecorderError> {
        if self.deny {
            return Err(RecorderError::PermissionDenied(read_types.join(", ")));
        }
        Ok(())
    }

    async fn query_clinical_records(
        &self,
        clinical_type: &str,
        fhir_resource_type: Option<&str>,
    ) -> Result<Vec<ClinicalRecord>, RecorderError> {
        if !self.query_delay.is_zero() {
            tokio::time::sleep(self.query_delay).await;
        }

        let records = match &self.records {
            Some(records) => records
                .iter()
                .filter(|r| r.clinical_type == clinical_type)
                .cloned()
                .collect(),
            None => Self::generated_records(clinical_type, fhir_resource_type),
        };
        Ok(records)
    }

    async fn subscribe_quantity_samples(
        &self,
        quantity_type: &str,
        unit: &str,
    ) -> Result<Subscription<QuantitySample>, RecorderError> {
        if self.quantity_interval.is_zero() {
            return Err(RecorderError::ResourceUnavailable(
                "quantity interval must be positive".to_string(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.quantity_subscriptions.lock().await.insert(id, token.clone());

        let (tx, receiver) = mpsc::channel(SAMPLE_BUFFER);
        let interval = self.quantity_interval;
        let quantity_type = quantity_type.to_string();
        let unit = unit.to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut n: u64 = 0;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        let sample = QuantitySample {
                            quantity_type: quantity_type.clone(),
                            unit: unit.clone(),
                            value: 72.0 + 6.0 * (n as f64 * 0.3).sin(),
                            start_date: now,
                            end_date: now,
                        };
                        if tx.send(sample).await.is_err() {
                            break;
                        }
                        n += 1;
                    }
                }
            }
            debug!(subscription = id, samples = n, "simulated quantity stream ended");
        });

        Ok(Subscription { id, receiver })
    }

    async fn unsubscribe_quantity_samples(&self, subscription_id: u64) {
        if let Some(token) = self.quantity_subscriptions.lock().await.remove(&subscription_id) {
            token.cancel();
        }
    }
}
