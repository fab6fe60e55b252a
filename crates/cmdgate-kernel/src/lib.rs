//! `cmdgate-kernel` – the command gate core.
//!
//! Arbitrates between command sources, bounds the chosen command against the
//! vehicle limits and forwards exactly one command stream per cycle.  It
//! performs no I/O of its own; transport, configuration and scheduling live in
//! the outer crates.
//!
//! # Modules
//!
//! - [`limit_table`] – [`LimitTable`]: speed-dependent limit lookup with
//!   linear interpolation.
//! - [`source`] – [`CommandSource`] with the built-in [`EmergencySource`] and
//!   the channel-fed [`SubscribedSource`].
//! - [`selector`] – [`CommandSelector`]: source registry and the single active
//!   source.
//! - [`filter`] – [`CommandFilter`]: absolute and rate limits under the
//!   nominal or transition parameter set.
//! - [`compatibility`] – [`Compatibility`]: stop hold, output conversion and
//!   the continuity anchor.
//! - [`publisher`] – [`CommandPublisher`] forwarding to a [`CommandSink`].
//! - [`diagnostics`] – OK/WARN/STALE liveness monitors.
//! - [`gate`] – [`GateController`]: the fixed-period orchestrator.

pub mod compatibility;
pub mod diagnostics;
pub mod filter;
pub mod gate;
pub mod limit_table;
pub mod publisher;
pub mod selector;
pub mod source;

pub use compatibility::{Compatibility, Published};
pub use diagnostics::{DiagnosticAggregator, TimeoutDiag, TimeoutParams};
pub use filter::{CommandFilter, FilterActivation, FilterOutput, FilterParams};
pub use gate::{CycleReport, GateController, GateSettings, InputSpec, SelectOutcome};
pub use limit_table::LimitTable;
pub use publisher::{CommandPublisher, CommandSink, OUTPUT_DIAGNOSTIC};
pub use selector::{CommandSelector, SourceChange, SourceListener};
pub use source::{CommandSource, EmergencySource, SourceHandle, SubscribedSource};
