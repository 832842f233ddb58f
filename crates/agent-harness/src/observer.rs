use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use crate::stream::{EventKind, StreamEvent};

/// Callback invoked for each event of one kind.
///
/// Returning `ControlFlow::Break(())` stops event delivery and stream
/// consumption for the current step.
pub type Observer = Arc<dyn Fn(&StreamEvent) -> ControlFlow<()> + Send + Sync>;

/// At most one observer per [`EventKind`].
#[derive(Clone, Default)]
pub struct EventObservers {
    by_kind: HashMap<EventKind, Observer>,
}

impl EventObservers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer` for `kind`, replacing any previous one.
    pub fn on<F>(mut self, kind: EventKind, observer: F) -> Self
    where
        F: Fn(&StreamEvent) -> ControlFlow<()> + Send + Sync + 'static,
    {
        self.by_kind.insert(kind, Arc::new(observer));
        self
    }

    /// Delivers `event` to the observer registered for its kind, if any.
    pub fn notify(&self, event: &StreamEvent) -> ControlFlow<()> {
        match self.by_kind.get(&event.kind()) {
            Some(observer) => observer(event),
            None => ControlFlow::Continue(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

impl fmt::Debug for EventObservers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.by_kind.keys()).finish()
    }
}
