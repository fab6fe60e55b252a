//! `cmdgate-middleware` – transport between the gate and its collaborators.
//!
//! Routes commands, vehicle state and gate output without caring about their
//! meaning.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
