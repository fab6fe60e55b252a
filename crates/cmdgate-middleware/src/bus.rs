//! Topic-based publish/subscribe event bus connecting the gate to its
//! collaborators.
//!
//! Every topic is its own [`tokio::sync::broadcast`] channel, so each
//! subscriber sees every message on its topic and a slow subscriber only
//! hurts itself.
//!
//! # Topics
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::CommandInput`] | Commands from the external inputs, tagged with their source id |
//! | [`Topic::VehicleStatus`] | Measured speed and steering |
//! | [`Topic::ActuationOutput`] | The one command per cycle leaving the gate |
//! | [`Topic::SourceStatus`] | Edge-triggered `(source, transition)` status |
//! | [`Topic::Diagnostics`] | Per-cycle OK/WARN/STALE records |
//! | [`Topic::SystemAlerts`] | Source changes and other operator-relevant events |

use cmdgate_types::Event;
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    CommandInput,
    VehicleStatus,
    ActuationOutput,
    SourceStatus,
    Diagnostics,
    SystemAlerts,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    command_input: broadcast::Sender<Event>,
    vehicle_status: broadcast::Sender<Event>,
    actuation_output: broadcast::Sender<Event>,
    source_status: broadcast::Sender<Event>,
    diagnostics: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every topic independently.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero (a Tokio broadcast restriction).
    pub fn new(capacity: usize) -> Self {
        Self {
            command_input: broadcast::channel(capacity).0,
            vehicle_status: broadcast::channel(capacity).0,
            actuation_output: broadcast::channel(capacity).0,
            source_status: broadcast::channel(capacity).0,
            diagnostics: broadcast::channel(capacity).0,
            system_alerts: broadcast::channel(capacity).0,
        }
    }

    /// Publish `event` on `topic`.
    ///
    /// Returns the number of subscribers that were handed the event.  Nobody
    /// listening is normal (the diagnostics sink may be absent) and yields
    /// `0`.
    pub fn publish_to(&self, topic: Topic, event: Event) -> usize {
        self.topic_sender(topic).send(event).unwrap_or(0)
    }

    /// Subscribe to `topic`.  Only events published after this call are
    /// delivered.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::CommandInput => &self.command_input,
            Topic::VehicleStatus => &self.vehicle_status,
            Topic::ActuationOutput => &self.actuation_output,
            Topic::SourceStatus => &self.source_status,
            Topic::Diagnostics => &self.diagnostics,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(RecvError::Lagged(n))` – the subscriber fell behind and `n`
    ///   messages were dropped.
    /// * `Err(RecvError::Closed)` – every sender is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Wait for the next event, skipping over lag.
    ///
    /// Returns `None` once the bus is closed.  Input topics are "latest
    /// wins", so dropped messages are only logged.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
