//! In-process fan-out between the transport and whoever reads the events.
//!
//! Each channel keeps its own ordered list of handlers. Delivery is
//! synchronous and walks a copy of the list taken at the start of the
//! dispatch, so a handler may subscribe or unsubscribe (itself included)
//! without disturbing the delivery in progress.

use crate::common::protocol::{ChannelKind, InboundEvent};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

type Handler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    channels: HashMap<ChannelKind, Vec<(u64, Handler)>>,
}

#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: ChannelKind, handler: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .channels
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    /// Delivers `event` to the handlers of its channel, in subscription
    /// order. Returns how many handlers were invoked.
    pub fn dispatch(&self, event: &InboundEvent) -> usize {
        let kind = event.kind();
        // Copy the list so the lock is not held while handlers run
        let handlers: Vec<Handler> = {
            let registry = self.registry.lock();
            registry
                .channels
                .get(&kind)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        if handlers.is_empty() {
            debug!("[DISPATCH] no handler for {} event", kind);
        }
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn handler_count(&self, kind: ChannelKind) -> usize {
        self.registry
            .lock()
            .channels
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// Capability returned by [`EventDispatcher::subscribe`]. Removes exactly the
/// handler it was issued for; calling it twice is harmless.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    kind: ChannelKind,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock();
        if let Some(list) = registry.channels.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }
}
