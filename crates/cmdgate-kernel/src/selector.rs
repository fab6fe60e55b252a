//! [`CommandSelector`] – owns the registered sources and the active one.
//!
//! Exactly one source is active at any time once start-up has called
//! [`CommandSelector::select_builtin_source`].  Afterwards only
//! [`CommandSelector::select`] changes the active source, and only to a
//! registered, non-reserved id.  A rejected request changes nothing.
//!
//! Staleness of the active source is never acted upon here; it is visible
//! through the diagnostics only.

use std::collections::BTreeMap;

use cmdgate_types::{Command, GateError, SourceId};
use tracing::{debug, info};

use crate::source::CommandSource;

/// A change of the active source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceChange {
    pub previous: SourceId,
    pub current: SourceId,
}

/// Downstream consumer notified whenever the active source changes.
pub trait SourceListener: Send {
    fn on_source_changed(&mut self, change: SourceChange);
}

/// Registry of command sources plus the active-source state.
pub struct CommandSelector {
    sources: BTreeMap<SourceId, Box<dyn CommandSource>>,
    active: SourceId,
    current: Option<Command>,
    output: Option<Box<dyn SourceListener>>,
}

impl Default for CommandSelector {
    fn default() -> Self {
        Self {
            sources: BTreeMap::new(),
            active: SourceId::UNKNOWN,
            current: None,
            output: None,
        }
    }
}

impl CommandSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source.
    ///
    /// # Errors
    ///
    /// [`GateError::Config`] when the id is [`SourceId::UNKNOWN`], when
    /// [`SourceId::BUILTIN`] is claimed by anything but the built-in source
    /// (or the built-in source uses another id), or when the id is already
    /// registered.
    pub fn add_source(&mut self, source: Box<dyn CommandSource>) -> Result<(), GateError> {
        let id = source.id();
        if id == SourceId::UNKNOWN || (id == SourceId::BUILTIN) != source.is_builtin() {
            return Err(GateError::Config(format!("input source '{id}' is reserved")));
        }
        if self.sources.contains_key(&id) {
            return Err(GateError::Config(format!(
                "input source '{id}' is registered twice"
            )));
        }
        debug!(source = %id, name = source.name(), "registered command source");
        self.sources.insert(id, source);
        Ok(())
    }

    /// Install the listener notified on source changes.
    pub fn set_output(&mut self, output: Box<dyn SourceListener>) {
        self.output = Some(output);
    }

    /// Start-up path: activate the built-in source without request
    /// validation.
    ///
    /// # Errors
    ///
    /// [`GateError::Config`] if `id` is not registered.
    pub fn select_builtin_source(&mut self, id: SourceId) -> Result<(), GateError> {
        if !self.sources.contains_key(&id) {
            return Err(GateError::Config(format!(
                "built-in source '{id}' is not registered"
            )));
        }
        self.change_source(id);
        Ok(())
    }

    /// Switch the active source to `id`.
    ///
    /// # Errors
    ///
    /// [`GateError::InvalidSelection`] when `id` is reserved or not
    /// registered.  The active source is left unchanged.
    pub fn select(&mut self, id: SourceId) -> Result<(), GateError> {
        if id.is_reserved() {
            return Err(GateError::InvalidSelection(format!(
                "command source '{id}' is reserved"
            )));
        }
        if !self.sources.contains_key(&id) {
            return Err(GateError::InvalidSelection(format!(
                "command source '{id}' is not registered"
            )));
        }
        self.change_source(id);
        Ok(())
    }

    /// The active source id.
    pub fn get_source(&self) -> SourceId {
        self.active
    }

    /// Refresh the active source's latest command for this cycle.
    pub fn update(&mut self, prev_control: Option<&Command>) {
        self.current = self
            .sources
            .get(&self.active)
            .and_then(|source| source.latest_command(prev_control));
    }

    /// The command cached by the last [`update`][Self::update].
    pub fn current_command(&self) -> Option<Command> {
        self.current
    }

    /// All registered sources in id order.
    pub fn sources(&self) -> impl Iterator<Item = &dyn CommandSource> + '_ {
        self.sources.values().map(|s| s.as_ref())
    }

    pub fn source_name(&self, id: SourceId) -> Option<&str> {
        self.sources.get(&id).map(|s| s.name())
    }

    fn change_source(&mut self, id: SourceId) {
        if self.active == id {
            return;
        }
        let change = SourceChange {
            previous: self.active,
            current: id,
        };
        self.active = id;
        self.current = None;
        info!(
            previous = %change.previous,
            current = %change.current,
            name = self.source_name(id).unwrap_or("?"),
            "command source changed"
        );
        if let Some(output) = self.output.as_mut() {
            output.on_source_changed(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{EmergencySource, SubscribedSource};
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<SourceChange>>>);

    impl SourceListener for Recorder {
        fn on_source_changed(&mut self, change: SourceChange) {
            self.0.lock().unwrap().push(change);
        }
    }

    fn selector_with_inputs() -> (CommandSelector, Arc<Mutex<Vec<SourceChange>>>) {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let mut selector = CommandSelector::new();
        selector.add_source(Box::new(EmergencySource::default())).unwrap();
        selector
            .add_source(Box::new(SubscribedSource::new(SourceId(1), "planner")))
            .unwrap();
        selector
            .add_source(Box::new(SubscribedSource::new(SourceId(2), "operator")))
            .unwrap();
        selector.set_output(Box::new(Recorder(changes.clone())));
        selector.select_builtin_source(SourceId::BUILTIN).unwrap();
        (selector, changes)
    }

    #[test]
    fn starts_unknown_then_builtin() {
        assert_eq!(CommandSelector::new().get_source(), SourceId::UNKNOWN);

        let (selector, changes) = selector_with_inputs();
        assert_eq!(selector.get_source(), SourceId::BUILTIN);
        assert_eq!(
            *changes.lock().unwrap(),
            vec![SourceChange {
                previous: SourceId::UNKNOWN,
                current: SourceId::BUILTIN
            }]
        );
    }

    #[test]
    fn select_registered_source_switches_and_notifies() {
        let (mut selector, changes) = selector_with_inputs();
        selector.select(SourceId(1)).unwrap();
        assert_eq!(selector.get_source(), SourceId(1));
        assert_eq!(changes.lock().unwrap().len(), 2);
    }

    #[test]
    fn reselecting_active_source_is_silent() {
        let (mut selector, changes) = selector_with_inputs();
        selector.select(SourceId(1)).unwrap();
        selector.select(SourceId(1)).unwrap();
        assert_eq!(changes.lock().unwrap().len(), 2);
    }

    #[test]
    fn reserved_and_unknown_ids_are_rejected_without_side_effects() {
        let (mut selector, changes) = selector_with_inputs();
        selector.select(SourceId(1)).unwrap();

        for id in [SourceId::BUILTIN, SourceId::UNKNOWN, SourceId(3)] {
            let err = selector.select(id).unwrap_err();
            assert!(matches!(err, GateError::InvalidSelection(ref m) if !m.is_empty()));
            assert_eq!(selector.get_source(), SourceId(1));
        }
        assert_eq!(changes.lock().unwrap().len(), 2);
    }

    #[test]
    fn active_source_follows_last_successful_select() {
        let (mut selector, _) = selector_with_inputs();
        let requests = [2, 7, 1, 0, 2, 9, 1, 1, 65535];
        let mut expected = SourceId::BUILTIN;
        for id in requests {
            if selector.select(SourceId(id)).is_ok() {
                expected = SourceId(id);
            }
            assert_eq!(selector.get_source(), expected);
        }
        assert_eq!(expected, SourceId(1));
    }

    #[test]
    fn add_source_rejects_reserved_and_duplicate_ids() {
        let mut selector = CommandSelector::new();
        assert!(
            selector
                .add_source(Box::new(SubscribedSource::new(SourceId::BUILTIN, "fake")))
                .is_err()
        );
        assert!(
            selector
                .add_source(Box::new(SubscribedSource::new(SourceId::UNKNOWN, "fake")))
                .is_err()
        );
        selector
            .add_source(Box::new(SubscribedSource::new(SourceId(4), "a")))
            .unwrap();
        let dup = selector.add_source(Box::new(SubscribedSource::new(SourceId(4), "b")));
        assert!(matches!(dup, Err(GateError::Config(_))));
    }

    #[test]
    fn select_builtin_requires_registration() {
        let mut selector = CommandSelector::new();
        assert!(selector.select_builtin_source(SourceId::BUILTIN).is_err());
        assert_eq!(selector.get_source(), SourceId::UNKNOWN);
    }

    #[test]
    fn update_exposes_active_source_command() {
        let mut selector = CommandSelector::new();
        selector.add_source(Box::new(EmergencySource::default())).unwrap();
        let planner = SubscribedSource::new(SourceId(1), "planner");
        let handle = planner.handle();
        selector.add_source(Box::new(planner)).unwrap();
        selector.select_builtin_source(SourceId::BUILTIN).unwrap();

        selector.update(None);
        assert_eq!(selector.current_command().unwrap().velocity, 0.0);

        selector.select(SourceId(1)).unwrap();
        selector.update(None);
        assert_eq!(selector.current_command(), None);

        handle.receive(Command {
            velocity: 4.0,
            ..Command::default()
        });
        selector.update(None);
        assert_eq!(selector.current_command().unwrap().velocity, 4.0);
    }

    #[test]
    fn sources_iterate_in_id_order() {
        let (selector, _) = selector_with_inputs();
        let names: Vec<_> = selector.sources().map(|s| s.name()).collect();
        assert_eq!(names, vec!["builtin", "planner", "operator"]);
    }
}
