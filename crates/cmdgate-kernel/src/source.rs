//! Command sources – the inputs the gate can choose from.
//!
//! Every source implements [`CommandSource`].  Two implementations exist:
//!
//! - [`EmergencySource`] – the built-in source with the reserved id
//!   [`SourceId::BUILTIN`].  Always alive; it commands a stop while holding
//!   the last emitted steering so that the filter ramps the vehicle down
//!   smoothly.
//! - [`SubscribedSource`] – fed by an external channel through a cloneable
//!   [`SourceHandle`].  Its latest command is whatever arrived last.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use cmdgate_types::{Command, SourceId};

use crate::diagnostics::{TimeoutDiag, TimeoutParams};

/// Default deceleration commanded by the emergency source [m/s²].
pub const DEFAULT_EMERGENCY_ACCELERATION: f64 = -1.5;

/// A provider of the latest command from one input channel.
pub trait CommandSource: Send {
    fn id(&self) -> SourceId;

    /// Human-readable name, e.g. `"planner"`.
    fn name(&self) -> &str;

    /// The command this source currently asks for.
    ///
    /// `prev_control` is the last command the gate emitted; sources that
    /// synthesize their output may derive it from there.
    fn latest_command(&self, prev_control: Option<&Command>) -> Option<Command>;

    /// When the source last produced data, as seen at `now`.
    fn last_update(&self, now: Instant) -> Option<Instant>;

    /// `true` only for the built-in emergency source.
    fn is_builtin(&self) -> bool {
        false
    }

    /// Name under which this source is reported to the diagnostics.
    fn diagnostic_name(&self) -> String {
        format!("source/{}", self.name())
    }

    /// A fresh liveness monitor for this source.
    fn diagnostic_task(&self, params: TimeoutParams) -> TimeoutDiag {
        TimeoutDiag::new(self.diagnostic_name(), params)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// EmergencySource
// ────────────────────────────────────────────────────────────────────────────

/// The built-in stop source.
#[derive(Debug, Clone)]
pub struct EmergencySource {
    acceleration: f64,
}

impl EmergencySource {
    /// `acceleration` is the (negative) deceleration to request.
    pub fn new(acceleration: f64) -> Self {
        Self { acceleration }
    }
}

impl Default for EmergencySource {
    fn default() -> Self {
        Self::new(DEFAULT_EMERGENCY_ACCELERATION)
    }
}

impl CommandSource for EmergencySource {
    fn id(&self) -> SourceId {
        SourceId::BUILTIN
    }

    fn name(&self) -> &str {
        "builtin"
    }

    fn latest_command(&self, prev_control: Option<&Command>) -> Option<Command> {
        Some(Command {
            stamp: Utc::now(),
            velocity: 0.0,
            acceleration: self.acceleration,
            jerk: 0.0,
            steering_angle: prev_control.map_or(0.0, |p| p.steering_angle),
            steering_rate: 0.0,
        })
    }

    fn last_update(&self, now: Instant) -> Option<Instant> {
        Some(now)
    }

    fn is_builtin(&self) -> bool {
        true
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SubscribedSource
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Slot {
    command: Option<Command>,
    received_at: Option<Instant>,
}

/// Write side of a [`SubscribedSource`].
///
/// Clone it into whatever task receives commands for this input.  The command
/// and its receipt time are replaced together under one lock, so a reader
/// never sees one without the other.
#[derive(Debug, Clone, Default)]
pub struct SourceHandle {
    slot: Arc<Mutex<Slot>>,
}

impl SourceHandle {
    /// Store `command`, received now.
    pub fn receive(&self, command: Command) {
        self.receive_at(command, Instant::now());
    }

    /// Store `command`, received at `at`.
    pub fn receive_at(&self, command: Command, at: Instant) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.command = Some(command);
        slot.received_at = Some(at);
    }

    /// The latest command and its receipt time.
    pub fn snapshot(&self) -> (Option<Command>, Option<Instant>) {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        (slot.command, slot.received_at)
    }
}

/// A source fed by an external input channel.
#[derive(Debug, Clone)]
pub struct SubscribedSource {
    id: SourceId,
    name: String,
    handle: SourceHandle,
}

impl SubscribedSource {
    pub fn new(id: SourceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            handle: SourceHandle::default(),
        }
    }

    /// A handle that feeds this source.
    pub fn handle(&self) -> SourceHandle {
        self.handle.clone()
    }
}

impl CommandSource for SubscribedSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn latest_command(&self, _prev_control: Option<&Command>) -> Option<Command> {
        self.handle.snapshot().0
    }

    fn last_update(&self, _now: Instant) -> Option<Instant> {
        self.handle.snapshot().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdgate_types::HealthLevel;
    use std::time::Duration;

    #[test]
    fn emergency_source_stops_and_holds_steering() {
        let source = EmergencySource::default();
        assert_eq!(source.id(), SourceId::BUILTIN);
        assert!(source.is_builtin());

        let prev = Command {
            velocity: 8.0,
            steering_angle: 0.2,
            steering_rate: 0.1,
            ..Command::default()
        };
        let cmd = source.latest_command(Some(&prev)).unwrap();
        assert_eq!(cmd.velocity, 0.0);
        assert_eq!(cmd.acceleration, DEFAULT_EMERGENCY_ACCELERATION);
        assert_eq!(cmd.steering_angle, 0.2);
        assert_eq!(cmd.steering_rate, 0.0);
    }

    #[test]
    fn emergency_source_without_anchor_steers_straight() {
        let cmd = EmergencySource::new(-2.0).latest_command(None).unwrap();
        assert_eq!(cmd.steering_angle, 0.0);
        assert_eq!(cmd.acceleration, -2.0);
    }

    #[test]
    fn emergency_source_is_always_alive() {
        let source = EmergencySource::default();
        let now = Instant::now();
        assert_eq!(source.last_update(now), Some(now));

        let mut diag = source.diagnostic_task(TimeoutParams::default());
        diag.set_last_update(source.last_update(now));
        assert_eq!(diag.evaluate(now).level, HealthLevel::Ok);
        assert_eq!(diag.name(), "source/builtin");
    }

    #[test]
    fn subscribed_source_starts_empty() {
        let source = SubscribedSource::new(SourceId(1), "planner");
        assert!(!source.is_builtin());
        assert_eq!(source.latest_command(None), None);
        assert_eq!(source.last_update(Instant::now()), None);
    }

    #[test]
    fn latest_received_command_wins() {
        let source = SubscribedSource::new(SourceId(1), "planner");
        let handle = source.handle();
        let t0 = Instant::now();

        handle.receive_at(
            Command {
                velocity: 1.0,
                ..Command::default()
            },
            t0,
        );
        handle.receive_at(
            Command {
                velocity: 2.0,
                ..Command::default()
            },
            t0 + Duration::from_millis(10),
        );

        assert_eq!(source.latest_command(None).unwrap().velocity, 2.0);
        assert_eq!(
            source.last_update(t0),
            Some(t0 + Duration::from_millis(10))
        );
    }

    #[test]
    fn handle_can_be_fed_from_another_thread() {
        let source = SubscribedSource::new(SourceId(2), "operator");
        let handle = source.handle();
        std::thread::spawn(move || {
            handle.receive(Command {
                steering_angle: 0.3,
                ..Command::default()
            })
        })
        .join()
        .unwrap();
        assert_eq!(source.latest_command(None).unwrap().steering_angle, 0.3);
    }
}
