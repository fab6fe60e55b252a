//! [`Compatibility`] – adapts commands to the output shape and owns the
//! update of the continuity anchor.
//!
//! [`Compatibility::publish`] runs the whole output pipeline for one cycle:
//!
//! ```text
//! candidate ─► stop hold ─► CommandFilter ─► ActuationCommand ─► CommandPublisher
//!                                 ▲                                    │
//!                                 └──── prev_control ◄──── on success ─┘
//! ```
//!
//! The stop hold runs before the filter, so the braking it requests is
//! reached through the jerk and acceleration limits.
//!
//! The anchor (`prev_control`) is owned by the caller and passed in by
//! reference, so the filter, the emergency source and this stage all read
//! the same value.  It only advances when the publisher succeeded.

use std::time::Instant;

use chrono::Utc;
use cmdgate_types::{ActuationCommand, Command, GateError, VehicleState};

use crate::filter::{CommandFilter, FilterActivation};
use crate::publisher::CommandPublisher;

/// Default acceleration requested while standing still [m/s²].
pub const DEFAULT_STOP_HOLD_ACCELERATION: f64 = -1.5;
/// Default speed below which the vehicle counts as stopped [m/s].
pub const DEFAULT_STOP_CHECK_SPEED: f64 = 0.01;

/// What one pipeline run emitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Published {
    /// The command stored as the new continuity anchor.
    pub command: Command,
    pub output: ActuationCommand,
    pub activation: FilterActivation,
}

/// Output adapter and continuity owner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compatibility {
    stop_hold_acceleration: f64,
    stop_check_speed: f64,
}

impl Default for Compatibility {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_HOLD_ACCELERATION, DEFAULT_STOP_CHECK_SPEED)
    }
}

impl Compatibility {
    pub fn new(stop_hold_acceleration: f64, stop_check_speed: f64) -> Self {
        Self {
            stop_hold_acceleration,
            stop_check_speed,
        }
    }

    /// Apply the stop hold: a stopped vehicle asked to stay stopped keeps
    /// braking with at least `stop_hold_acceleration`.
    pub fn adapt(&self, command: &Command, vehicle: &VehicleState) -> Command {
        let stopped = vehicle.speed.abs() < self.stop_check_speed;
        if stopped && command.velocity.abs() < f64::EPSILON {
            Command {
                acceleration: command.acceleration.min(self.stop_hold_acceleration),
                ..*command
            }
        } else {
            *command
        }
    }

    /// Adapt `candidate`, filter it, hand it to `publisher` and advance
    /// `prev_control` on success.
    ///
    /// # Errors
    ///
    /// Whatever the publisher's sink returns.  `prev_control` is left
    /// unchanged in that case.
    pub fn publish(
        &self,
        candidate: &Command,
        filter: &mut CommandFilter,
        publisher: &mut CommandPublisher,
        prev_control: &mut Option<Command>,
        vehicle: &VehicleState,
        now: Instant,
    ) -> Result<Published, GateError> {
        let adapted = self.adapt(candidate, vehicle);
        let filtered = filter.filter(&adapted, prev_control.as_ref(), vehicle, now);
        let command = filtered.command.restamped(Utc::now());
        let output = ActuationCommand::from(&command);
        publisher.publish(&output, now)?;
        *prev_control = Some(command);
        Ok(Published {
            command,
            output,
            activation: filtered.activation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterParams;
    use crate::limit_table::LimitTable;
    use crate::publisher::CommandSink;
    use std::time::Duration;

    struct NullSink {
        fail: bool,
    }

    impl CommandSink for NullSink {
        fn send(&mut self, _command: &ActuationCommand) -> Result<(), GateError> {
            if self.fail {
                Err(GateError::Output("sink closed".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn params() -> FilterParams {
        FilterParams {
            vel_lim: 20.0,
            steer_lim: LimitTable::constant(1.0).unwrap(),
            steer_rate_lim: LimitTable::constant(0.5).unwrap(),
            lon_acc_lim: LimitTable::constant(2.0).unwrap(),
            lon_jerk_lim: LimitTable::constant(100.0).unwrap(),
            lat_acc_lim: LimitTable::constant(100.0).unwrap(),
            lat_jerk_lim: LimitTable::constant(100.0).unwrap(),
            actual_steer_diff_lim: LimitTable::constant(10.0).unwrap(),
            wheel_base: 2.5,
        }
    }

    #[test]
    fn stop_hold_applies_only_when_stopped_and_commanded_to_stop() {
        let compat = Compatibility::default();
        let stop = Command {
            acceleration: -0.2,
            ..Command::default()
        };
        let stopped = VehicleState::default();
        assert_eq!(compat.adapt(&stop, &stopped).acceleration, -1.5);

        let rolling = VehicleState {
            speed: 3.0,
            steering_angle: None,
        };
        assert_eq!(compat.adapt(&stop, &rolling).acceleration, -0.2);

        let go = Command {
            velocity: 1.0,
            acceleration: 0.5,
            ..Command::default()
        };
        assert_eq!(compat.adapt(&go, &stopped).acceleration, 0.5);
    }

    #[test]
    fn stop_hold_keeps_stronger_braking() {
        let compat = Compatibility::default();
        let hard = Command {
            acceleration: -3.0,
            ..Command::default()
        };
        assert_eq!(compat.adapt(&hard, &VehicleState::default()).acceleration, -3.0);
    }

    #[test]
    fn publish_advances_anchor_and_rate_limits_against_it() {
        let compat = Compatibility::default();
        let mut filter = CommandFilter::new(params(), params());
        let mut publisher = CommandPublisher::new(Box::new(NullSink { fail: false }));
        let mut prev = None;
        let vehicle = VehicleState {
            speed: 5.0,
            steering_angle: None,
        };
        let t0 = Instant::now();

        let candidate = Command {
            velocity: 5.0,
            steering_angle: 0.8,
            ..Command::default()
        };
        let first = compat
            .publish(&candidate, &mut filter, &mut publisher, &mut prev, &vehicle, t0)
            .unwrap();
        assert_eq!(prev, Some(first.command));
        assert_eq!(first.output.lateral.steering_tire_angle, 0.8);

        let jump = Command {
            velocity: 15.0,
            steering_angle: -0.8,
            ..Command::default()
        };
        let second = compat
            .publish(
                &jump,
                &mut filter,
                &mut publisher,
                &mut prev,
                &vehicle,
                t0 + Duration::from_millis(100),
            )
            .unwrap();
        assert!((second.command.velocity - 5.2).abs() < 1e-9);
        assert!((second.command.steering_angle - 0.75).abs() < 1e-9);
        assert!(second.activation.lon_acc);
        assert!(second.activation.steer_rate);
        assert_eq!(publisher.last_published_at(), Some(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn stop_hold_is_reached_within_jerk_and_acceleration_limits() {
        let compat = Compatibility::default();
        let mut limits = params();
        limits.lon_jerk_lim = LimitTable::constant(0.5).unwrap();
        limits.lon_acc_lim = LimitTable::constant(1.0).unwrap();
        let mut filter = CommandFilter::new(limits.clone(), limits);
        let mut publisher = CommandPublisher::new(Box::new(NullSink { fail: false }));
        let mut prev = None;
        let stopped = VehicleState::default();
        let t0 = Instant::now();

        let first = compat
            .publish(&Command::default(), &mut filter, &mut publisher, &mut prev, &stopped, t0)
            .unwrap();
        // No anchor yet: only the absolute acceleration bound applies.
        assert_eq!(first.command.acceleration, -1.0);

        let mut last = first.command.acceleration;
        for i in 1..=20 {
            let now = t0 + Duration::from_millis(100 * i);
            let out = compat
                .publish(&Command::default(), &mut filter, &mut publisher, &mut prev, &stopped, now)
                .unwrap();
            let acc = out.command.acceleration;
            assert!(acc.abs() <= 1.0 + 1e-9, "acc {acc}");
            assert!((acc - last).abs() <= 0.5 * 0.1 + 1e-9, "jerk step {}", acc - last);
            last = acc;
        }
    }

    #[test]
    fn stop_hold_ramps_from_previous_acceleration() {
        let compat = Compatibility::default();
        let mut limits = params();
        limits.lon_jerk_lim = LimitTable::constant(0.5).unwrap();
        limits.lon_acc_lim = LimitTable::constant(1.0).unwrap();
        let mut filter = CommandFilter::new(limits.clone(), limits);
        let mut publisher = CommandPublisher::new(Box::new(NullSink { fail: false }));
        let t0 = Instant::now();
        let rolling = VehicleState {
            speed: 1.0,
            steering_angle: None,
        };
        let stopped = VehicleState::default();
        let mut prev = None;

        // Rolling to a stop with zero acceleration, then standstill.
        compat
            .publish(&Command::default(), &mut filter, &mut publisher, &mut prev, &rolling, t0)
            .unwrap();
        assert_eq!(prev.map(|c| c.acceleration), Some(0.0));

        let held = compat
            .publish(
                &Command::default(),
                &mut filter,
                &mut publisher,
                &mut prev,
                &stopped,
                t0 + Duration::from_millis(100),
            )
            .unwrap();
        assert!((held.command.acceleration + 0.05).abs() < 1e-9);
        assert!(held.activation.lon_jerk);
    }

    #[test]
    fn failed_publish_keeps_previous_anchor() {
        let compat = Compatibility::default();
        let mut filter = CommandFilter::new(params(), params());
        let mut publisher = CommandPublisher::new(Box::new(NullSink { fail: true }));
        let anchor = Command {
            velocity: 1.0,
            ..Command::default()
        };
        let mut prev = Some(anchor);

        let result = compat.publish(
            &Command::default(),
            &mut filter,
            &mut publisher,
            &mut prev,
            &VehicleState::default(),
            Instant::now(),
        );
        assert!(result.is_err());
        assert_eq!(prev, Some(anchor));
    }
}
