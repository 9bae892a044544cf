//! Timestamp normalization
//!
//! Sensor samples are stamped with device uptime (monotonic seconds since the
//! last boot). This module maps those stamps onto wall-clock time using a
//! reference `(wall clock, uptime)` pair.
//!
//! The mapping is `boot = now - reference_uptime; absolute = boot + uptime`.
//! A fresh reference must be captured for every session: after a reboot the
//! uptime-to-wall-clock offset changes.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Source of wall-clock time and device uptime
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;

    /// Elapsed time since the device last booted
    fn uptime(&self) -> Duration;
}

/// Clock backed by the operating system.
///
/// On Linux uptime is read from `/proc/uptime`. Elsewhere (or if that file is
/// unreadable) it falls back to the time elapsed since the clock was created,
/// which keeps the affine mapping consistent within a session.
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    fn proc_uptime() -> Option<Duration> {
        let raw = std::fs::read_to_string("/proc/uptime").ok()?;
        let secs: f64 = raw.split_whitespace().next()?.parse().ok()?;
        if secs.is_finite() && secs >= 0.0 {
            Some(Duration::from_secs_f64(secs))
        } else {
            None
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn uptime(&self) -> Duration {
        Self::proc_uptime().unwrap_or_else(|| self.anchor.elapsed())
    }
}

/// Clock frozen at a given instant, for tests and replays
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    pub now: DateTime<Utc>,
    pub uptime: Duration,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, uptime: Duration) -> Self {
        Self { now, uptime }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn uptime(&self) -> Duration {
        self.uptime
    }
}

/// Convert an uptime-relative timestamp to wall-clock time.
///
/// # Arguments
/// * `uptime_timestamp` - Sample timestamp, as elapsed time since boot
/// * `reference_uptime` - Uptime observed at `now`. Must be a duration; when
///   deriving it from two wall-clock instants use [`uptime_between`] so the
///   value is never negative.
/// * `now` - Wall-clock time at which `reference_uptime` was observed
pub fn to_absolute(
    uptime_timestamp: Duration,
    reference_uptime: Duration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let boot = now
        .checked_sub_signed(to_delta(reference_uptime))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    boot.checked_add_signed(to_delta(uptime_timestamp))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Convert an uptime-relative timestamp using the clock's current readings
pub fn to_absolute_now(uptime_timestamp: Duration, clock: &dyn Clock) -> DateTime<Utc> {
    to_absolute(uptime_timestamp, clock.uptime(), clock.now())
}

/// Absolute elapsed time between two wall-clock instants
pub fn uptime_between(past: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - past).abs().to_std().unwrap_or(Duration::MAX)
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Reference pair captured once per recording session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFrame {
    /// Wall-clock time at capture
    pub wall_clock: DateTime<Utc>,
    /// Device uptime at capture
    pub uptime: Duration,
}

impl ReferenceFrame {
    /// Capture the current wall clock and uptime
    pub fn capture(clock: &dyn Clock) -> Self {
        Self {
            wall_clock: clock.now(),
            uptime: clock.uptime(),
        }
    }

    /// Map a sample's uptime onto wall-clock time
    pub fn to_absolute(&self, uptime_timestamp: Duration) -> DateTime<Utc> {
        to_absolute(uptime_timestamp, self.uptime, self.wall_clock)
    }

    /// Estimated wall-clock time of the last boot
    pub fn boot_time(&self) -> DateTime<Utc> {
        self.to_absolute(Duration::ZERO)
    }
}
