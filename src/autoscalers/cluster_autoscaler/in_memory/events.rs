use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::autoscalers::cluster_autoscaler::interface::{Event, EventRecorder};

/// Keeps every recorded event in a shared list, so callers can inspect them afterwards.
pub struct InMemoryEventRecorder {
    events: Rc<RefCell<Vec<Event>>>,
}

impl InMemoryEventRecorder {
    pub fn new(events: Rc<RefCell<Vec<Event>>>) -> Self {
        Self { events }
    }
}

impl EventRecorder for InMemoryEventRecorder {
    fn record(&mut self, event: Event) {
        debug!(
            "Event {:?} {} for {}: {}",
            event.event_type, event.reason, event.object, event.message
        );
        self.events.borrow_mut().push(event);
    }
}
