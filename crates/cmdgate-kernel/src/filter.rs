//! [`CommandFilter`] – vehicle-limit interlock for the selected command.
//!
//! Every candidate [`Command`] passes through a fixed chain of stages before
//! it may reach the actuation interface.  Absolute stages clamp a value into
//! a symmetric band; rate stages bound the change relative to the previously
//! emitted command (the continuity anchor) so that no single cycle moves
//! further than `limit · dt`:
//!
//! | # | Stage | Bound |
//! |---|-------|-------|
//! | 1 | longitudinal jerk | `acc ∈ prev.acc ± lon_jerk_lim·dt`, `jerk ∈ ±lon_jerk_lim` |
//! | 2 | longitudinal acceleration | `acc ∈ ±lon_acc_lim`, `vel ∈ prev.vel ± lon_acc_lim·dt` |
//! | 3 | velocity | `vel ∈ ±vel_lim` |
//! | 4 | steering angle | `steer ∈ ±steer_lim` |
//! | 5 | steering rate | `steer_rate ∈ ±steer_rate_lim`, `steer ∈ prev.steer ± steer_rate_lim·dt` |
//! | 6 | lateral jerk | `lat_acc ∈ prev_lat_acc ± lat_jerk_lim·dt` |
//! | 7 | lateral acceleration | `lat_acc ∈ ±lat_acc_lim` |
//! | 8 | actual steering divergence | `steer ∈ measured_steer ± actual_steer_diff_lim` |
//!
//! All table limits are interpolated at the current measured speed.  Lateral
//! acceleration is `v² · tan(steer) / wheel_base`.
//!
//! Rate stages are skipped when there is no anchor yet or the elapsed time is
//! not positive; absolute stages always apply.  Two parameter sets exist,
//! *nominal* and *transition*, and [`CommandFilter::set_transition_flag`]
//! chooses between them.

use std::time::Instant;

use cmdgate_types::{Command, GateError, VehicleState};

use crate::limit_table::LimitTable;

/// Below this speed no lateral acceleration is defined and the lateral stages
/// are skipped.
const MIN_LATERAL_SPEED: f64 = 0.01;

// ────────────────────────────────────────────────────────────────────────────
// Parameters
// ────────────────────────────────────────────────────────────────────────────

/// One complete limit set (nominal or transition).
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParams {
    /// Absolute velocity limit [m/s].
    pub vel_lim: f64,
    /// Steering tire angle limit [rad].
    pub steer_lim: LimitTable,
    /// Steering tire rotation rate limit [rad/s].
    pub steer_rate_lim: LimitTable,
    /// Longitudinal acceleration limit [m/s²].
    pub lon_acc_lim: LimitTable,
    /// Longitudinal jerk limit [m/s³].
    pub lon_jerk_lim: LimitTable,
    /// Lateral acceleration limit [m/s²].
    pub lat_acc_lim: LimitTable,
    /// Lateral jerk limit [m/s³].
    pub lat_jerk_lim: LimitTable,
    /// Allowed divergence between commanded and measured steering [rad].
    pub actual_steer_diff_lim: LimitTable,
    /// Vehicle wheel base [m].
    pub wheel_base: f64,
}

impl FilterParams {
    /// Check the scalar parameters.  Tables are validated on construction.
    pub fn validate(&self) -> Result<(), GateError> {
        if !self.vel_lim.is_finite() || self.vel_lim < 0.0 {
            return Err(GateError::Config(format!("invalid vel_lim {}", self.vel_lim)));
        }
        if !self.wheel_base.is_finite() || self.wheel_base <= 0.0 {
            return Err(GateError::Config(format!(
                "wheel base must be positive, got {}",
                self.wheel_base
            )));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Activation report
// ────────────────────────────────────────────────────────────────────────────

/// Which stages changed the command during one filter call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterActivation {
    pub non_finite: bool,
    pub lon_jerk: bool,
    pub lon_acc: bool,
    pub velocity: bool,
    pub steer: bool,
    pub steer_rate: bool,
    pub lat_jerk: bool,
    pub lat_acc: bool,
    pub actual_steer_diff: bool,
}

impl FilterActivation {
    /// `true` if any stage altered the command.
    pub fn any(&self) -> bool {
        !self.names().is_empty()
    }

    /// Names of the stages that altered the command, in stage order.
    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.non_finite, "non_finite"),
            (self.lon_jerk, "lon_jerk"),
            (self.lon_acc, "lon_acc"),
            (self.velocity, "velocity"),
            (self.steer, "steer"),
            (self.steer_rate, "steer_rate"),
            (self.lat_jerk, "lat_jerk"),
            (self.lat_acc, "lat_acc"),
            (self.actual_steer_diff, "actual_steer_diff"),
        ]
        .into_iter()
        .filter_map(|(active, name)| active.then_some(name))
        .collect()
    }
}

/// Result of one filter call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterOutput {
    pub command: Command,
    pub activation: FilterActivation,
}

// ────────────────────────────────────────────────────────────────────────────
// CommandFilter
// ────────────────────────────────────────────────────────────────────────────

/// Clamps candidate commands against the active [`FilterParams`] set.
pub struct CommandFilter {
    nominal: FilterParams,
    transition: FilterParams,
    transition_flag: bool,
    last_filtered_at: Option<Instant>,
}

impl CommandFilter {
    pub fn new(nominal: FilterParams, transition: FilterParams) -> Self {
        Self {
            nominal,
            transition,
            transition_flag: false,
            last_filtered_at: None,
        }
    }

    /// Switch between the nominal (`false`) and transition (`true`) sets.
    pub fn set_transition_flag(&mut self, flag: bool) {
        self.transition_flag = flag;
    }

    pub fn get_transition_flag(&self) -> bool {
        self.transition_flag
    }

    /// The parameter set subsequent calls use.
    pub fn active_params(&self) -> &FilterParams {
        if self.transition_flag {
            &self.transition
        } else {
            &self.nominal
        }
    }

    /// Filter `candidate` against `prev`, using the time elapsed since the
    /// previous call to this method as `dt`.
    pub fn filter(
        &mut self,
        candidate: &Command,
        prev: Option<&Command>,
        vehicle: &VehicleState,
        now: Instant,
    ) -> FilterOutput {
        let dt = self
            .last_filtered_at
            .and_then(|last| now.checked_duration_since(last))
            .map(|elapsed| elapsed.as_secs_f64());
        self.last_filtered_at = Some(now);
        self.filter_step(candidate, prev, vehicle, dt)
    }

    /// Filter `candidate` with an explicit elapsed time.
    ///
    /// `dt == None`, a non-positive `dt` or a missing `prev` disables the
    /// rate stages for this call.
    pub fn filter_step(
        &self,
        candidate: &Command,
        prev: Option<&Command>,
        vehicle: &VehicleState,
        dt: Option<f64>,
    ) -> FilterOutput {
        let params = self.active_params();
        let speed = if vehicle.speed.is_finite() {
            vehicle.speed.abs()
        } else {
            0.0
        };
        let measured_steer = vehicle.steering_angle.filter(|s| s.is_finite());
        let dt = dt.filter(|dt| dt.is_finite() && *dt > 0.0);
        let rate = prev.zip(dt);

        let mut act = FilterActivation::default();
        let mut cmd = *candidate;

        cmd = step(&mut act.non_finite, cmd, sanitize(&cmd, prev));
        cmd = step(&mut act.lon_jerk, cmd, limit_lon_jerk(&cmd, params, speed, rate));
        cmd = step(&mut act.lon_acc, cmd, limit_lon_acc(&cmd, params, speed, rate));
        cmd = step(&mut act.velocity, cmd, limit_velocity(&cmd, params));
        cmd = step(&mut act.steer, cmd, limit_steer(&cmd, params, speed));
        cmd = step(&mut act.steer_rate, cmd, limit_steer_rate(&cmd, params, speed, rate));
        cmd = step(&mut act.lat_jerk, cmd, limit_lat_jerk(&cmd, params, speed, rate));
        cmd = step(&mut act.lat_acc, cmd, limit_lat_acc(&cmd, params, speed));
        cmd = step(
            &mut act.actual_steer_diff,
            cmd,
            limit_actual_steer_diff(&cmd, params, speed, measured_steer),
        );

        FilterOutput {
            command: cmd,
            activation: act,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stages
// ────────────────────────────────────────────────────────────────────────────

fn step(activated: &mut bool, before: Command, next: Command) -> Command {
    if next != before {
        *activated = true;
    }
    next
}

fn limit_abs(value: f64, lim: f64) -> f64 {
    value.clamp(-lim, lim)
}

fn limit_diff(value: f64, prev: f64, max_step: f64) -> f64 {
    value.clamp(prev - max_step, prev + max_step)
}

/// Lateral acceleration produced by `steer` at speed `v`.
pub fn lateral_acceleration(v: f64, steer: f64, wheel_base: f64) -> f64 {
    v * v * steer.tan() / wheel_base
}

/// Steering angle that produces `lat_acc` at speed `v`.
pub fn steer_from_lateral_acceleration(v: f64, lat_acc: f64, wheel_base: f64) -> f64 {
    (lat_acc * wheel_base / (v * v)).atan()
}

fn lateral_defined(speed: f64, params: &FilterParams) -> bool {
    speed >= MIN_LATERAL_SPEED && params.wheel_base > 0.0
}

fn sanitize(cmd: &Command, prev: Option<&Command>) -> Command {
    let fallback = prev.copied().unwrap_or_default();
    let pick = |value: f64, fallback: f64| if value.is_finite() { value } else { fallback };
    Command {
        stamp: cmd.stamp,
        velocity: pick(cmd.velocity, fallback.velocity),
        acceleration: pick(cmd.acceleration, fallback.acceleration),
        jerk: pick(cmd.jerk, fallback.jerk),
        steering_angle: pick(cmd.steering_angle, fallback.steering_angle),
        steering_rate: pick(cmd.steering_rate, fallback.steering_rate),
    }
}

fn limit_lon_jerk(
    cmd: &Command,
    params: &FilterParams,
    speed: f64,
    rate: Option<(&Command, f64)>,
) -> Command {
    let lim = params.lon_jerk_lim.at(speed);
    let mut out = Command {
        jerk: limit_abs(cmd.jerk, lim),
        ..*cmd
    };
    if let Some((prev, dt)) = rate {
        out.acceleration = limit_diff(cmd.acceleration, prev.acceleration, lim * dt);
    }
    out
}

fn limit_lon_acc(
    cmd: &Command,
    params: &FilterParams,
    speed: f64,
    rate: Option<(&Command, f64)>,
) -> Command {
    let lim = params.lon_acc_lim.at(speed);
    let mut out = Command {
        acceleration: limit_abs(cmd.acceleration, lim),
        ..*cmd
    };
    if let Some((prev, dt)) = rate {
        out.velocity = limit_diff(cmd.velocity, prev.velocity, lim * dt);
    }
    out
}

fn limit_velocity(cmd: &Command, params: &FilterParams) -> Command {
    Command {
        velocity: limit_abs(cmd.velocity, params.vel_lim),
        ..*cmd
    }
}

fn limit_steer(cmd: &Command, params: &FilterParams, speed: f64) -> Command {
    Command {
        steering_angle: limit_abs(cmd.steering_angle, params.steer_lim.at(speed)),
        ..*cmd
    }
}

fn limit_steer_rate(
    cmd: &Command,
    params: &FilterParams,
    speed: f64,
    rate: Option<(&Command, f64)>,
) -> Command {
    let lim = params.steer_rate_lim.at(speed);
    let mut out = Command {
        steering_rate: limit_abs(cmd.steering_rate, lim),
        ..*cmd
    };
    if let Some((prev, dt)) = rate {
        out.steering_angle = limit_diff(cmd.steering_angle, prev.steering_angle, lim * dt);
    }
    out
}

fn limit_lat_jerk(
    cmd: &Command,
    params: &FilterParams,
    speed: f64,
    rate: Option<(&Command, f64)>,
) -> Command {
    let Some((prev, dt)) = rate else {
        return *cmd;
    };
    if !lateral_defined(speed, params) {
        return *cmd;
    }
    let wb = params.wheel_base;
    let curr_lat_acc = lateral_acceleration(speed, cmd.steering_angle, wb);
    let prev_lat_acc = lateral_acceleration(speed, prev.steering_angle, wb);
    let max_change = params.lat_jerk_lim.at(speed) * dt;

    let steering_angle = if curr_lat_acc > prev_lat_acc + max_change {
        steer_from_lateral_acceleration(speed, prev_lat_acc + max_change, wb)
    } else if curr_lat_acc < prev_lat_acc - max_change {
        steer_from_lateral_acceleration(speed, prev_lat_acc - max_change, wb)
    } else {
        cmd.steering_angle
    };
    Command {
        steering_angle,
        ..*cmd
    }
}

fn limit_lat_acc(cmd: &Command, params: &FilterParams, speed: f64) -> Command {
    if !lateral_defined(speed, params) {
        return *cmd;
    }
    let wb = params.wheel_base;
    let lim = params.lat_acc_lim.at(speed);
    let lat_acc = lateral_acceleration(speed, cmd.steering_angle, wb);
    if lat_acc.abs() <= lim {
        return *cmd;
    }
    Command {
        steering_angle: steer_from_lateral_acceleration(speed, lim.copysign(lat_acc), wb),
        ..*cmd
    }
}

fn limit_actual_steer_diff(
    cmd: &Command,
    params: &FilterParams,
    speed: f64,
    measured_steer: Option<f64>,
) -> Command {
    let Some(measured) = measured_steer else {
        return *cmd;
    };
    Command {
        steering_angle: limit_diff(
            cmd.steering_angle,
            measured,
            params.actual_steer_diff_lim.at(speed),
        ),
        ..*cmd
    }
}
