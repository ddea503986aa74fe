//! Per-session publish/subscribe event bus.
//!
//! One bus instance is owned by each [`crate::session::Session`], so multiple
//! concurrent sessions in one process never share subscription state. The
//! table is populated during one-time setup and read during dispatch.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::types::SessionEvent;

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync + 'static>;

/// Maps event names to ordered handler lists. Handlers for one name are
/// invoked in registration order; a panicking handler is isolated and never
/// aborts dispatch to the rest.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for the given event name. Multiple handlers per
    /// name are allowed.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut table = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        table
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Dispatch an event to every handler registered under its name.
    pub fn emit(&self, event: &SessionEvent) {
        let name = event.name();
        let handlers: Vec<Handler> = {
            let table = self
                .handlers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match table.get(name.as_ref()) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(event = %name, "event handler panicked; continuing dispatch");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f.debug_struct("EventBus")
            .field("event_names", &table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn connected() -> SessionEvent {
        SessionEvent::Connected
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 1..=3usize {
            let order = order.clone();
            bus.on("connected", move |_| order.lock().unwrap().push(tag));
        }

        bus.emit(&connected());
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn panicking_handler_does_not_abort_dispatch() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.on("connected", |_| panic!("boom"));
        let counter = hits.clone();
        bus.on("connected", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&connected());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_event_name_is_a_no_op() {
        let bus = EventBus::new();
        bus.emit(&SessionEvent::StreamDisconnected);
    }

    #[test]
    fn events_dispatch_only_to_their_own_name() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bus.on("stream_connected", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&connected());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        bus.emit(&SessionEvent::StreamConnected);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
