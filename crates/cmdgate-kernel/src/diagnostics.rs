//! Timeout diagnostics – liveness monitor for command sources and the output.
//!
//! Every monitored entity owns a [`TimeoutDiag`] that remembers when the
//! entity last produced data.  Each cycle the gate refreshes the timestamps in
//! the [`DiagnosticAggregator`] and calls [`DiagnosticAggregator::report`] to
//! obtain one [`DiagnosticRecord`] per entity:
//!
//! ```text
//! elapsed ≤ warn            → OK
//! warn < elapsed ≤ error    → WARN
//! elapsed > error / never   → STALE
//! ```
//!
//! Levels are recomputed from scratch each cycle.  Diagnostics never change
//! which source is active.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use cmdgate_types::{DiagnosticRecord, GateError, HealthLevel};

// ────────────────────────────────────────────────────────────────────────────
// Thresholds
// ────────────────────────────────────────────────────────────────────────────

/// Warn / error thresholds shared by all timeout diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutParams {
    pub warn_duration: Duration,
    pub error_duration: Duration,
}

impl TimeoutParams {
    /// # Errors
    ///
    /// [`GateError::Config`] unless `0 < warn_duration <= error_duration`.
    pub fn new(warn_duration: Duration, error_duration: Duration) -> Result<Self, GateError> {
        if warn_duration.is_zero() || warn_duration > error_duration {
            return Err(GateError::Config(format!(
                "diagnostic thresholds must satisfy 0 < warn ({warn_duration:?}) <= error ({error_duration:?})"
            )));
        }
        Ok(Self {
            warn_duration,
            error_duration,
        })
    }

    /// Build from seconds as found in the configuration file.
    pub fn from_secs_f64(warn: f64, error: f64) -> Result<Self, GateError> {
        let warn = Duration::try_from_secs_f64(warn)
            .map_err(|e| GateError::Config(format!("invalid warn duration {warn}: {e}")))?;
        let error = Duration::try_from_secs_f64(error)
            .map_err(|e| GateError::Config(format!("invalid error duration {error}: {e}")))?;
        Self::new(warn, error)
    }

    /// Classify an elapsed time.  `None` (never updated) is stale.
    pub fn classify(&self, elapsed: Option<Duration>) -> HealthLevel {
        match elapsed {
            Some(e) if e <= self.warn_duration => HealthLevel::Ok,
            Some(e) if e <= self.error_duration => HealthLevel::Warn,
            _ => HealthLevel::Stale,
        }
    }
}

impl Default for TimeoutParams {
    fn default() -> Self {
        Self {
            warn_duration: Duration::from_secs(1),
            error_duration: Duration::from_secs(2),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TimeoutDiag
// ────────────────────────────────────────────────────────────────────────────

/// Liveness monitor for a single entity.
#[derive(Debug, Clone)]
pub struct TimeoutDiag {
    name: String,
    params: TimeoutParams,
    last_update: Option<Instant>,
}

impl TimeoutDiag {
    /// A monitor that has not seen any update yet (and is therefore stale).
    pub fn new(name: impl Into<String>, params: TimeoutParams) -> Self {
        Self {
            name: name.into(),
            params,
            last_update: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the last-update instant.
    pub fn set_last_update(&mut self, last_update: Option<Instant>) {
        self.last_update = last_update;
    }

    /// Evaluate the monitor at `now`.
    pub fn evaluate(&self, now: Instant) -> DiagnosticRecord {
        let elapsed = self
            .last_update
            .map(|last| now.saturating_duration_since(last));
        let level = self.params.classify(elapsed);
        let message = match (level, elapsed) {
            (_, None) => "no data received".to_string(),
            (HealthLevel::Ok, Some(_)) => "ok".to_string(),
            (HealthLevel::Warn, Some(e)) => format!("no update for {:.3}s", e.as_secs_f64()),
            (HealthLevel::Stale, Some(e)) => format!("timeout ({:.3}s)", e.as_secs_f64()),
        };
        DiagnosticRecord {
            name: self.name.clone(),
            level,
            elapsed,
            message,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DiagnosticAggregator
// ────────────────────────────────────────────────────────────────────────────

/// Registry of every [`TimeoutDiag`] in the gate, keyed by entity name.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use cmdgate_kernel::{DiagnosticAggregator, TimeoutDiag, TimeoutParams};
/// use cmdgate_types::HealthLevel;
///
/// let mut diag = DiagnosticAggregator::new();
/// diag.register(TimeoutDiag::new("source/planner", TimeoutParams::default()));
///
/// let t0 = Instant::now();
/// diag.update("source/planner", Some(t0));
/// assert_eq!(diag.health("source/planner", t0), Some(HealthLevel::Ok));
/// assert_eq!(
///     diag.health("source/planner", t0 + Duration::from_secs(5)),
///     Some(HealthLevel::Stale)
/// );
/// ```
#[derive(Default)]
pub struct DiagnosticAggregator {
    tasks: HashMap<String, TimeoutDiag>,
}

impl DiagnosticAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a monitor.  Re-registering a name replaces the old monitor.
    pub fn register(&mut self, task: TimeoutDiag) {
        self.tasks.insert(task.name().to_string(), task);
    }

    /// Set the last-update instant of `name`.  No-op for unknown names.
    pub fn update(&mut self, name: &str, last_update: Option<Instant>) {
        if let Some(task) = self.tasks.get_mut(name) {
            task.set_last_update(last_update);
        }
    }

    /// Health of `name` at `now`, or `None` if it was never registered.
    pub fn health(&self, name: &str, now: Instant) -> Option<HealthLevel> {
        self.tasks.get(name).map(|task| task.evaluate(now).level)
    }

    /// One record per registered entity, sorted by name.
    pub fn report(&self, now: Instant) -> Vec<DiagnosticRecord> {
        let mut records: Vec<DiagnosticRecord> =
            self.tasks.values().map(|task| task.evaluate(now)).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
