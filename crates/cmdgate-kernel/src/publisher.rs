//! [`CommandPublisher`] – terminal stage towards the actuation interface.
//!
//! The publisher does no filtering.  It forwards each [`ActuationCommand`] to
//! a pluggable [`CommandSink`] and remembers when it last succeeded, which is
//! what the `output` diagnostic monitors.

use std::time::Instant;

use cmdgate_types::{ActuationCommand, GateError};

use crate::diagnostics::{TimeoutDiag, TimeoutParams};

/// Diagnostic entity name of the gate output.
pub const OUTPUT_DIAGNOSTIC: &str = "output";

/// The actuation boundary: whatever transports the final command to the
/// vehicle.
pub trait CommandSink: Send {
    /// # Errors
    ///
    /// [`GateError::Output`] when the command could not be delivered.
    fn send(&mut self, command: &ActuationCommand) -> Result<(), GateError>;
}

/// Forwards commands to a [`CommandSink`] and tracks output liveness.
pub struct CommandPublisher {
    sink: Box<dyn CommandSink>,
    last_published_at: Option<Instant>,
    last_output: Option<ActuationCommand>,
}

impl CommandPublisher {
    pub fn new(sink: Box<dyn CommandSink>) -> Self {
        Self {
            sink,
            last_published_at: None,
            last_output: None,
        }
    }

    /// Send `command`; on success record `now` as the last publish time.
    pub fn publish(&mut self, command: &ActuationCommand, now: Instant) -> Result<(), GateError> {
        self.sink.send(command)?;
        self.last_published_at = Some(now);
        self.last_output = Some(*command);
        Ok(())
    }

    pub fn last_published_at(&self) -> Option<Instant> {
        self.last_published_at
    }

    /// The most recently delivered command.
    pub fn last_output(&self) -> Option<&ActuationCommand> {
        self.last_output.as_ref()
    }

    /// A fresh liveness monitor for the output.
    pub fn diagnostic_task(&self, params: TimeoutParams) -> TimeoutDiag {
        TimeoutDiag::new(OUTPUT_DIAGNOSTIC, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct MockSink {
        sent: Arc<Mutex<Vec<ActuationCommand>>>,
        fail: bool,
    }

    impl CommandSink for MockSink {
        fn send(&mut self, command: &ActuationCommand) -> Result<(), GateError> {
            if self.fail {
                return Err(GateError::Output("link down".to_string()));
            }
            self.sent.lock().unwrap().push(*command);
            Ok(())
        }
    }

    #[test]
    fn publish_forwards_and_records_time() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut publisher = CommandPublisher::new(Box::new(MockSink {
            sent: sent.clone(),
            fail: false,
        }));
        assert_eq!(publisher.last_published_at(), None);

        let now = Instant::now();
        let mut cmd = ActuationCommand::default();
        cmd.longitudinal.velocity = 3.0;
        publisher.publish(&cmd, now).unwrap();

        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(publisher.last_published_at(), Some(now));
        assert_eq!(publisher.last_output().unwrap().longitudinal.velocity, 3.0);
    }

    #[test]
    fn failed_send_leaves_state_untouched() {
        let mut publisher = CommandPublisher::new(Box::new(MockSink {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        }));
        let result = publisher.publish(&ActuationCommand::default(), Instant::now());
        assert!(matches!(result, Err(GateError::Output(_))));
        assert_eq!(publisher.last_published_at(), None);
        assert!(publisher.last_output().is_none());
    }

    #[test]
    fn diagnostic_task_is_named_output() {
        let publisher = CommandPublisher::new(Box::new(MockSink {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }));
        assert_eq!(
            publisher.diagnostic_task(TimeoutParams::default()).name(),
            OUTPUT_DIAGNOSTIC
        );
    }
}
