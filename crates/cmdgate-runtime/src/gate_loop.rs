//! [`GateLoop`] – fixed-period scheduler around a [`GateController`].
//!
//! The loop task is the only owner of the controller.  Ticks, selection
//! requests, command input and vehicle-state input are all serialized through
//! one `tokio::select!`, so a cycle and a selection never run concurrently:
//!
//! ```text
//!  interval tick ─┐
//!  GateHandle ────┤                    ┌─► ActuationOutput   (every tick)
//!  CommandInput ──┼─► GateLoop::run ───┼─► Diagnostics       (every tick)
//!  VehicleStatus ─┤                    ├─► SourceStatus      (on change)
//!  shutdown ──────┘                    └─► SystemAlerts      (source change)
//! ```
//!
//! [`GateHandle`] is the request side: cloneable, usable from async code or
//! from a plain thread.

use std::time::{Duration, Instant};

use cmdgate_kernel::{
    CommandSink, GateController, GateSettings, SourceChange, SourceHandle, SourceListener,
};
use cmdgate_middleware::{EventBus, Topic, TopicReceiver};
use cmdgate_types::{
    ActuationCommand, DiagnosticRecord, Event, EventPayload, GateError, GateStatus,
    SelectRequest, SelectResponse, SourceId, VehicleState,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// `source` field of every event the loop publishes.
pub const EVENT_SOURCE: &str = "cmdgate-runtime::gate_loop";

/// Pending selection requests before callers start waiting.
const REQUEST_QUEUE: usize = 16;

// ────────────────────────────────────────────────────────────────────────────
// Bus adapters
// ────────────────────────────────────────────────────────────────────────────

/// Actuation boundary that publishes on [`Topic::ActuationOutput`].
pub struct BusSink {
    bus: EventBus,
}

impl BusSink {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl CommandSink for BusSink {
    fn send(&mut self, command: &ActuationCommand) -> Result<(), GateError> {
        self.bus.publish_to(
            Topic::ActuationOutput,
            Event::new(EVENT_SOURCE, EventPayload::Actuation(*command)),
        );
        Ok(())
    }
}

/// Announces source changes on [`Topic::SystemAlerts`].
pub struct BusListener {
    bus: EventBus,
}

impl BusListener {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl SourceListener for BusListener {
    fn on_source_changed(&mut self, change: SourceChange) {
        self.bus.publish_to(
            Topic::SystemAlerts,
            Event::new(
                EVENT_SOURCE,
                EventPayload::SourceChanged {
                    previous: change.previous,
                    current: change.current,
                },
            ),
        );
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handle
// ────────────────────────────────────────────────────────────────────────────

/// Read-only view of the gate, refreshed after every cycle and selection.
#[derive(Debug, Clone, PartialEq)]
pub struct GateSnapshot {
    pub active: SourceId,
    pub transition: bool,
    pub sources: Vec<(SourceId, String)>,
    pub vehicle: VehicleState,
    pub last_output: Option<ActuationCommand>,
    pub diagnostics: Vec<DiagnosticRecord>,
}

struct SelectCall {
    request: SelectRequest,
    reply: oneshot::Sender<SelectResponse>,
}

fn loop_gone() -> GateError {
    GateError::Channel("gate loop is not running".to_string())
}

/// Request side of a running [`GateLoop`].
#[derive(Clone)]
pub struct GateHandle {
    requests: mpsc::Sender<SelectCall>,
    snapshot: watch::Receiver<GateSnapshot>,
}

impl GateHandle {
    /// Submit a selection request and wait for the answer.
    ///
    /// # Errors
    ///
    /// [`GateError::Channel`] when the loop has stopped.  A rejected request
    /// is not an error; it comes back with `success == false`.
    pub async fn select(&self, request: SelectRequest) -> Result<SelectResponse, GateError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(SelectCall { request, reply })
            .await
            .map_err(|_| loop_gone())?;
        response.await.map_err(|_| loop_gone())
    }

    /// Blocking variant of [`select`][Self::select] for non-async threads.
    ///
    /// # Panics
    ///
    /// When called from within an async execution context.
    pub fn select_blocking(&self, request: SelectRequest) -> Result<SelectResponse, GateError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .blocking_send(SelectCall { request, reply })
            .map_err(|_| loop_gone())?;
        response.blocking_recv().map_err(|_| loop_gone())
    }

    /// The latest published view of the gate.
    pub fn snapshot(&self) -> GateSnapshot {
        self.snapshot.borrow().clone()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// GateLoop
// ────────────────────────────────────────────────────────────────────────────

pub struct GateLoop {
    gate: GateController,
    bus: EventBus,
    period: Duration,
    requests: mpsc::Receiver<SelectCall>,
    snapshot: watch::Sender<GateSnapshot>,
    commands: TopicReceiver,
    vehicle: TopicReceiver,
}

impl GateLoop {
    /// Build the controller on top of `bus` and return the loop together
    /// with its handle.  Input topics are subscribed here, so events
    /// published after this call are not missed.
    ///
    /// # Errors
    ///
    /// [`GateError::Config`] for a zero period or invalid settings.
    pub fn new(
        settings: GateSettings,
        bus: EventBus,
        period: Duration,
    ) -> Result<(Self, GateHandle), GateError> {
        if period.is_zero() {
            return Err(GateError::Config("cycle period must be positive".to_string()));
        }
        let commands = bus.subscribe_to(Topic::CommandInput);
        let vehicle = bus.subscribe_to(Topic::VehicleStatus);
        let gate = GateController::with_listener(
            settings,
            Box::new(BusSink::new(bus.clone())),
            Box::new(BusListener::new(bus.clone())),
        )?;

        let (requests_tx, requests) = mpsc::channel(REQUEST_QUEUE);
        let (snapshot, snapshot_rx) = watch::channel(Self::view(&gate, None, Vec::new()));

        Ok((
            Self {
                gate,
                bus,
                period,
                requests,
                snapshot,
                commands,
                vehicle,
            },
            GateHandle {
                requests: requests_tx,
                snapshot: snapshot_rx,
            },
        ))
    }

    /// Direct write access to input `id`, bypassing the bus.
    pub fn source_handle(&self, id: SourceId) -> Option<SourceHandle> {
        self.gate.source_handle(id)
    }

    /// Run until `shutdown` turns `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        if let Some(status) = self.gate.publish_source_status() {
            self.publish_status(status);
        }

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_ms = self.period.as_millis() as u64, "gate loop started");

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => self.cycle(),
                Some(call) = self.requests.recv() => self.handle_select(call),
                Some(event) = self.commands.next_event() => self.on_command(event),
                Some(event) = self.vehicle.next_event() => self.on_vehicle_status(event),
            }
        }
        info!("gate loop stopped");
    }

    fn cycle(&mut self) {
        let report = self.gate.on_timer(Instant::now());
        if let Some(status) = report.status {
            self.publish_status(status);
        }
        self.bus.publish_to(
            Topic::Diagnostics,
            Event::new(
                EVENT_SOURCE,
                EventPayload::Diagnostics(report.diagnostics.clone()),
            ),
        );
        self.snapshot
            .send_replace(Self::view(&self.gate, report.output, report.diagnostics));
    }

    fn handle_select(&mut self, call: SelectCall) {
        let outcome = self.gate.select(&call.request);
        if let Some(status) = outcome.status {
            self.publish_status(status);
        }
        self.snapshot.send_modify(|view| {
            view.active = self.gate.active_source();
            view.transition = self.gate.transition_flag();
        });
        // The caller may have given up waiting.
        let _ = call.reply.send(outcome.response);
    }

    fn on_command(&mut self, event: Event) {
        if let EventPayload::Command { source, command } = event.payload {
            match self.gate.source_handle(source) {
                Some(handle) => handle.receive(command),
                None => debug!(%source, "dropping command for unregistered input"),
            }
        }
    }

    fn on_vehicle_status(&mut self, event: Event) {
        if let EventPayload::VehicleState(state) = event.payload {
            self.gate.update_vehicle_state(state);
            self.snapshot.send_modify(|view| view.vehicle = state);
        }
    }

    fn publish_status(&self, status: GateStatus) {
        info!(source = %status.source, transition = status.transition, "gate status");
        self.bus.publish_to(
            Topic::SourceStatus,
            Event::new(EVENT_SOURCE, EventPayload::Status(status)),
        );
    }

    fn view(
        gate: &GateController,
        last_output: Option<ActuationCommand>,
        diagnostics: Vec<DiagnosticRecord>,
    ) -> GateSnapshot {
        GateSnapshot {
            active: gate.active_source(),
            transition: gate.transition_flag(),
            sources: gate.sources(),
            vehicle: gate.vehicle_state(),
            last_output,
            diagnostics,
        }
    }
}
