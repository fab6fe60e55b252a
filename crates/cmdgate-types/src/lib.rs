use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier of one command source.
///
/// Two values are reserved: [`SourceId::BUILTIN`] always names the emergency
/// source and [`SourceId::UNKNOWN`] means "no source selected yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u16);

impl SourceId {
    /// The built-in emergency source.
    pub const BUILTIN: SourceId = SourceId(0);
    /// Sentinel for "no active source".
    pub const UNKNOWN: SourceId = SourceId(u16::MAX);

    /// `true` for ids that configured inputs may not use.
    pub fn is_reserved(self) -> bool {
        self == Self::BUILTIN || self == Self::UNKNOWN
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for SourceId {
    fn from(value: u16) -> Self {
        SourceId(value)
    }
}

/// Canonical motion command shared by every gate stage.
///
/// Lateral acceleration and lateral jerk are not stored; they follow from
/// `velocity`, `steering_angle` and the wheel base.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Command {
    pub stamp: DateTime<Utc>,
    /// Target velocity [m/s].
    pub velocity: f64,
    /// Target longitudinal acceleration [m/s²].
    pub acceleration: f64,
    /// Target longitudinal jerk [m/s³].
    pub jerk: f64,
    /// Target steering tire angle [rad].
    pub steering_angle: f64,
    /// Target steering tire rotation rate [rad/s].
    pub steering_rate: f64,
}

impl Command {
    /// A zero command (stand still, straight wheels) stamped `stamp`.
    pub fn zero(stamp: DateTime<Utc>) -> Self {
        Self {
            stamp,
            ..Self::default()
        }
    }

    /// Copy of `self` carrying a new timestamp.
    pub fn restamped(self, stamp: DateTime<Utc>) -> Self {
        Self { stamp, ..self }
    }
}

/// Latest measured vehicle state used by the filter and stop-hold logic.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleState {
    /// Measured longitudinal speed [m/s].
    pub speed: f64,
    /// Measured steering tire angle [rad], if a steering report is available.
    pub steering_angle: Option<f64>,
}

/// Longitudinal half of an [`ActuationCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Longitudinal {
    pub velocity: f64,
    pub acceleration: f64,
    pub jerk: f64,
}

/// Lateral half of an [`ActuationCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Lateral {
    pub steering_tire_angle: f64,
    pub steering_tire_rotation_rate: f64,
}

/// Output message handed to the vehicle actuation interface.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ActuationCommand {
    pub stamp: DateTime<Utc>,
    pub longitudinal: Longitudinal,
    pub lateral: Lateral,
}

impl From<&Command> for ActuationCommand {
    fn from(cmd: &Command) -> Self {
        Self {
            stamp: cmd.stamp,
            longitudinal: Longitudinal {
                velocity: cmd.velocity,
                acceleration: cmd.acceleration,
                jerk: cmd.jerk,
            },
            lateral: Lateral {
                steering_tire_angle: cmd.steering_angle,
                steering_tire_rotation_rate: cmd.steering_rate,
            },
        }
    }
}

/// Edge-triggered report of which source drives the output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateStatus {
    pub stamp: DateTime<Utc>,
    pub source: SourceId,
    pub transition: bool,
}

/// Operator or upstream request to switch the active source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectRequest {
    pub source: SourceId,
    /// Use the transition limit set after the switch.
    pub transition: bool,
}

/// Result of a [`SelectRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectResponse {
    pub success: bool,
    pub message: String,
}

impl SelectResponse {
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Liveness level of a monitored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HealthLevel {
    Ok,
    Warn,
    Stale,
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthLevel::Ok => write!(f, "OK"),
            HealthLevel::Warn => write!(f, "WARN"),
            HealthLevel::Stale => write!(f, "STALE"),
        }
    }
}

/// One health report for one monitored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    /// e.g. `"source/planner"` or `"output"`
    pub name: String,
    pub level: HealthLevel,
    /// Time since the last update; `None` if the entity never updated.
    pub elapsed: Option<Duration>,
    pub message: String,
}

/// Unified event wrapper for the gate's event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "cmdgate-runtime::gate_loop"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a freshly stamped envelope.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A new command from the input channel of `source`.
    Command { source: SourceId, command: Command },
    VehicleState(VehicleState),
    /// The command emitted to the actuation interface this cycle.
    Actuation(ActuationCommand),
    Status(GateStatus),
    Diagnostics(Vec<DiagnosticRecord>),
    SourceChanged {
        previous: SourceId,
        current: SourceId,
    },
}

/// Error type spanning configuration faults, rejected selections and output
/// failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GateError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Invalid Selection: {0}")]
    InvalidSelection(String),

    #[error("Output Error: {0}")]
    Output(String),

    #[error("Channel Error: {0}")]
    Channel(String),
}
