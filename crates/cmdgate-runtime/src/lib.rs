//! `cmdgate-runtime` – runs the gate inside a Tokio process.
//!
//! # Modules
//!
//! - [`gate_loop`] – [`GateLoop`]: the fixed-period task that owns the
//!   [`GateController`][cmdgate_kernel::GateController] and connects it to the
//!   event bus, plus the [`GateHandle`] used to request source selections.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.  Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to export the per-cycle spans.

pub mod gate_loop;
pub mod telemetry;

pub use gate_loop::{BusListener, BusSink, GateHandle, GateLoop, GateSnapshot};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
