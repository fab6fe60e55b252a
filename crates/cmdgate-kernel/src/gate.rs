//! [`GateController`] – the fixed-period orchestrator of the command gate.
//!
//! One controller owns every stage of the pipeline and the continuity anchor.
//! The runner drives it with two kinds of calls that must never overlap:
//!
//! - [`GateController::on_timer`] once per period:
//!   Selector → Filter → Compatibility → Publisher, then diagnostics and an
//!   edge-triggered status.
//! - [`GateController::select`] whenever an operator asks for another source.
//!
//! # Example
//!
//! ```
//! use std::time::Instant;
//! use cmdgate_kernel::{CommandSink, FilterParams, GateController, GateSettings, InputSpec, LimitTable};
//! use cmdgate_types::{ActuationCommand, GateError, SelectRequest, SourceId};
//!
//! struct Discard;
//! impl CommandSink for Discard {
//!     fn send(&mut self, _: &ActuationCommand) -> Result<(), GateError> { Ok(()) }
//! }
//!
//! let limits = FilterParams {
//!     vel_lim: 20.0,
//!     steer_lim: LimitTable::constant(1.0).unwrap(),
//!     steer_rate_lim: LimitTable::constant(0.5).unwrap(),
//!     lon_acc_lim: LimitTable::constant(2.0).unwrap(),
//!     lon_jerk_lim: LimitTable::constant(5.0).unwrap(),
//!     lat_acc_lim: LimitTable::constant(3.0).unwrap(),
//!     lat_jerk_lim: LimitTable::constant(5.0).unwrap(),
//!     actual_steer_diff_lim: LimitTable::constant(1.0).unwrap(),
//!     wheel_base: 2.7,
//! };
//! let mut settings = GateSettings::new(limits.clone(), limits);
//! settings.inputs.push(InputSpec::new(SourceId(1), "planner"));
//!
//! let mut gate = GateController::new(settings, Box::new(Discard)).unwrap();
//! assert_eq!(gate.active_source(), SourceId::BUILTIN);
//!
//! let outcome = gate.select(&SelectRequest { source: SourceId(1), transition: false });
//! assert!(outcome.response.success);
//!
//! let report = gate.on_timer(Instant::now());
//! assert!(report.output.is_some());
//! ```

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use cmdgate_types::{
    ActuationCommand, Command, DiagnosticRecord, GateError, GateStatus, SelectRequest,
    SelectResponse, SourceId, VehicleState,
};
use tracing::{debug, info, warn};

use crate::compatibility::{
    Compatibility, DEFAULT_STOP_CHECK_SPEED, DEFAULT_STOP_HOLD_ACCELERATION,
};
use crate::diagnostics::{DiagnosticAggregator, TimeoutParams};
use crate::filter::{CommandFilter, FilterActivation, FilterParams};
use crate::publisher::{CommandPublisher, CommandSink, OUTPUT_DIAGNOSTIC};
use crate::selector::{CommandSelector, SourceListener};
use crate::source::{
    CommandSource, DEFAULT_EMERGENCY_ACCELERATION, EmergencySource, SourceHandle,
    SubscribedSource,
};

// ────────────────────────────────────────────────────────────────────────────
// Settings
// ────────────────────────────────────────────────────────────────────────────

/// One configured external input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub id: SourceId,
    pub name: String,
}

impl InputSpec {
    pub fn new(id: SourceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Everything a [`GateController`] needs at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct GateSettings {
    pub nominal: FilterParams,
    pub transition: FilterParams,
    /// External inputs, in registration order.  The built-in source is
    /// always added and must not be listed.
    pub inputs: Vec<InputSpec>,
    pub timeout: TimeoutParams,
    pub emergency_acceleration: f64,
    pub stop_hold_acceleration: f64,
    pub stop_check_speed: f64,
}

impl GateSettings {
    /// Settings with no external inputs and default thresholds.
    pub fn new(nominal: FilterParams, transition: FilterParams) -> Self {
        Self {
            nominal,
            transition,
            inputs: Vec::new(),
            timeout: TimeoutParams::default(),
            emergency_acceleration: DEFAULT_EMERGENCY_ACCELERATION,
            stop_hold_acceleration: DEFAULT_STOP_HOLD_ACCELERATION,
            stop_check_speed: DEFAULT_STOP_CHECK_SPEED,
        }
    }

    /// Check parameters and input ids.  Duplicate ids are caught at
    /// registration.
    pub fn validate(&self) -> Result<(), GateError> {
        self.nominal.validate()?;
        self.transition.validate()?;
        for (name, value) in [
            ("emergency_acceleration", self.emergency_acceleration),
            ("stop_hold_acceleration", self.stop_hold_acceleration),
        ] {
            if !value.is_finite() || value > 0.0 {
                return Err(GateError::Config(format!(
                    "{name} must be a finite deceleration, got {value}"
                )));
            }
        }
        if !self.stop_check_speed.is_finite() || self.stop_check_speed < 0.0 {
            return Err(GateError::Config(format!(
                "stop_check_speed must be non-negative, got {}",
                self.stop_check_speed
            )));
        }
        for input in &self.inputs {
            if input.id.is_reserved() {
                return Err(GateError::Config(format!(
                    "input source '{}' is reserved",
                    input.id
                )));
            }
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Results
// ────────────────────────────────────────────────────────────────────────────

/// Answer to a selection request.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectOutcome {
    pub response: SelectResponse,
    /// Set when the request changed the published `(source, transition)`.
    pub status: Option<GateStatus>,
}

/// What one cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// The emitted command, or `None` when the sink failed.
    pub output: Option<ActuationCommand>,
    pub activation: FilterActivation,
    pub status: Option<GateStatus>,
    pub diagnostics: Vec<DiagnosticRecord>,
}

// ────────────────────────────────────────────────────────────────────────────
// GateController
// ────────────────────────────────────────────────────────────────────────────

pub struct GateController {
    selector: CommandSelector,
    filter: CommandFilter,
    compatibility: Compatibility,
    publisher: CommandPublisher,
    diagnostics: DiagnosticAggregator,
    handles: BTreeMap<SourceId, SourceHandle>,
    prev_control: Option<Command>,
    vehicle: VehicleState,
    last_status: Option<(SourceId, bool)>,
}

impl GateController {
    /// Build the gate and activate the built-in source.
    ///
    /// No status is emitted here; call
    /// [`publish_source_status`][Self::publish_source_status] once the
    /// consumer is ready.
    ///
    /// # Errors
    ///
    /// [`GateError::Config`] for invalid parameters, reserved or duplicate
    /// input ids.
    pub fn new(settings: GateSettings, sink: Box<dyn CommandSink>) -> Result<Self, GateError> {
        Self::build(settings, sink, None)
    }

    /// Like [`new`][Self::new], with a listener that observes every source
    /// change, including the start-up activation of the built-in source.
    pub fn with_listener(
        settings: GateSettings,
        sink: Box<dyn CommandSink>,
        listener: Box<dyn SourceListener>,
    ) -> Result<Self, GateError> {
        Self::build(settings, sink, Some(listener))
    }

    fn build(
        settings: GateSettings,
        sink: Box<dyn CommandSink>,
        listener: Option<Box<dyn SourceListener>>,
    ) -> Result<Self, GateError> {
        settings.validate()?;

        let publisher = CommandPublisher::new(sink);
        let mut diagnostics = DiagnosticAggregator::new();
        diagnostics.register(publisher.diagnostic_task(settings.timeout));

        let mut selector = CommandSelector::new();
        let emergency = EmergencySource::new(settings.emergency_acceleration);
        diagnostics.register(emergency.diagnostic_task(settings.timeout));
        selector.add_source(Box::new(emergency))?;

        let mut handles = BTreeMap::new();
        for input in &settings.inputs {
            let source = SubscribedSource::new(input.id, input.name.clone());
            diagnostics.register(source.diagnostic_task(settings.timeout));
            handles.insert(input.id, source.handle());
            selector.add_source(Box::new(source))?;
        }

        if let Some(listener) = listener {
            selector.set_output(listener);
        }
        selector.select_builtin_source(SourceId::BUILTIN)?;

        info!(
            inputs = settings.inputs.len(),
            "command gate ready with built-in source active"
        );

        Ok(Self {
            selector,
            filter: CommandFilter::new(settings.nominal, settings.transition),
            compatibility: Compatibility::new(
                settings.stop_hold_acceleration,
                settings.stop_check_speed,
            ),
            publisher,
            diagnostics,
            handles,
            prev_control: None,
            vehicle: VehicleState::default(),
            last_status: None,
        })
    }

    /// The write handle feeding input `id`.
    pub fn source_handle(&self, id: SourceId) -> Option<SourceHandle> {
        self.handles.get(&id).cloned()
    }

    /// All input handles in id order.
    pub fn handles(&self) -> impl Iterator<Item = (SourceId, &SourceHandle)> + '_ {
        self.handles.iter().map(|(id, handle)| (*id, handle))
    }

    /// Registered sources as `(id, name)`, built-in first.
    pub fn sources(&self) -> Vec<(SourceId, String)> {
        self.selector
            .sources()
            .map(|s| (s.id(), s.name().to_string()))
            .collect()
    }

    /// Handle an operator selection request.
    ///
    /// A rejected request leaves the active source and the transition flag
    /// untouched.
    pub fn select(&mut self, request: &SelectRequest) -> SelectOutcome {
        match self.selector.select(request.source) {
            Ok(()) => {
                self.filter.set_transition_flag(request.transition);
                SelectOutcome {
                    response: SelectResponse::accepted(format!(
                        "select command source: {}",
                        request.source
                    )),
                    status: self.publish_source_status(),
                }
            }
            Err(err) => {
                let message = match err {
                    GateError::InvalidSelection(message) => message,
                    other => other.to_string(),
                };
                warn!(requested = %request.source, %message, "selection rejected");
                SelectOutcome {
                    response: SelectResponse::rejected(message),
                    status: None,
                }
            }
        }
    }

    /// Run one cycle at `now`.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn on_timer(&mut self, now: Instant) -> CycleReport {
        self.selector.update(self.prev_control.as_ref());
        let active = self.selector.get_source();
        let candidate = self
            .selector
            .current_command()
            .unwrap_or_else(|| self.hold_command());

        let (output, activation) = match self.compatibility.publish(
            &candidate,
            &mut self.filter,
            &mut self.publisher,
            &mut self.prev_control,
            &self.vehicle,
            now,
        ) {
            Ok(published) => {
                if published.activation.any() {
                    warn!(
                        source = %active,
                        stages = ?published.activation.names(),
                        "command limited by filter"
                    );
                }
                (Some(published.output), published.activation)
            }
            Err(err) => {
                warn!(source = %active, error = %err, "failed to emit command");
                (None, FilterActivation::default())
            }
        };

        self.refresh_diagnostics(now);
        let diagnostics = self.diagnostics.report(now);
        let status = self.publish_source_status();
        debug!(source = %active, emitted = output.is_some(), "cycle complete");

        CycleReport {
            output,
            activation,
            status,
            diagnostics,
        }
    }

    /// The current status if `(active source, transition)` changed since the
    /// last emitted status, otherwise `None`.
    pub fn publish_source_status(&mut self) -> Option<GateStatus> {
        let current = (self.selector.get_source(), self.filter.get_transition_flag());
        if self.last_status == Some(current) {
            return None;
        }
        self.last_status = Some(current);
        Some(GateStatus {
            stamp: Utc::now(),
            source: current.0,
            transition: current.1,
        })
    }

    pub fn update_vehicle_state(&mut self, vehicle: VehicleState) {
        self.vehicle = vehicle;
    }

    pub fn vehicle_state(&self) -> VehicleState {
        self.vehicle
    }

    pub fn active_source(&self) -> SourceId {
        self.selector.get_source()
    }

    pub fn transition_flag(&self) -> bool {
        self.filter.get_transition_flag()
    }

    /// The last successfully emitted command.
    pub fn prev_control(&self) -> Option<&Command> {
        self.prev_control.as_ref()
    }

    /// Evaluate every monitored entity at `now` without running a cycle.
    pub fn diagnostics(&mut self, now: Instant) -> Vec<DiagnosticRecord> {
        self.refresh_diagnostics(now);
        self.diagnostics.report(now)
    }

    // Active source without data: repeat the last emission, or stand still.
    fn hold_command(&self) -> Command {
        let stamp = Utc::now();
        self.prev_control
            .map_or_else(|| Command::zero(stamp), |prev| prev.restamped(stamp))
    }

    fn refresh_diagnostics(&mut self, now: Instant) {
        for source in self.selector.sources() {
            self.diagnostics
                .update(&source.diagnostic_name(), source.last_update(now));
        }
        self.diagnostics
            .update(OUTPUT_DIAGNOSTIC, self.publisher.last_published_at());
    }
}
