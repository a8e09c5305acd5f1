use std::{fmt, sync::Arc};

use super::{Event, EventKind, EventPublisher, EventStore, Issuer};
use crate::{config::RelayConfig, note::NoteEvent, Result};

/// Handler invoked on the consumer thread with the dispatch context.
pub type Callback<C> = Box<dyn FnMut(&mut C, Option<NoteEvent>)>;

/// Counters for one dispatched batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub handled: usize,
    pub unhandled: usize,
}

/// Callback registry and batch dispatcher for the single consumer.
///
/// Callbacks receive `&mut C` at dispatch time instead of capturing shared
/// state, so the context stays single-owner and lock free.
pub struct EventMonitor<C> {
    store: Arc<EventStore<Event>>,
    callbacks: [[Option<Callback<C>>; EventKind::ALL.len()]; Issuer::ALL.len()],
    max_events_per_tick: usize,
}

impl<C> EventMonitor<C> {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            store: Arc::new(EventStore::new(config.capacity, config.overflow)),
            callbacks: Default::default(),
            max_events_per_tick: config.max_events_per_tick.max(1),
        }
    }

    pub fn publisher(&self) -> EventPublisher {
        EventPublisher::new(Arc::clone(&self.store))
    }

    pub fn store(&self) -> &Arc<EventStore<Event>> {
        &self.store
    }

    /// Installs the handler for `(issuer, kind)`, returning the one it replaced.
    pub fn register_callback<F>(
        &mut self,
        issuer: Issuer,
        kind: EventKind,
        callback: F,
    ) -> Option<Callback<C>>
    where
        F: FnMut(&mut C, Option<NoteEvent>) + 'static,
    {
        self.callbacks[issuer.index()][kind.index()].replace(Box::new(callback))
    }

    pub fn is_registered(&self, issuer: Issuer, kind: EventKind) -> bool {
        self.callbacks[issuer.index()][kind.index()].is_some()
    }

    /// Drains up to one tick's worth of events, MIDI first, each issuer in
    /// arrival order.
    pub fn drain(&self) -> Result<Vec<Event>> {
        let mut batch = self.store.drain_at_most(self.max_events_per_tick)?;
        batch.sort_by_key(|event| event.issuer.priority());
        Ok(batch)
    }

    /// Runs the registered callback for every event in order. Events without a
    /// handler are reported and skipped.
    pub fn dispatch<I>(&mut self, context: &mut C, events: I) -> DispatchStats
    where
        I: IntoIterator<Item = Event>,
    {
        let mut stats = DispatchStats::default();
        for event in events {
            match self.callbacks[event.issuer.index()][event.kind.index()].as_mut() {
                Some(callback) => {
                    callback(context, event.payload);
                    stats.handled += 1;
                }
                None => {
                    tracing::warn!(issuer = %event.issuer, kind = ?event.kind, "unhandled event");
                    stats.unhandled += 1;
                }
            }
        }
        stats
    }

    /// Drains and dispatches one tick's batch.
    pub fn process_events(&mut self, context: &mut C) -> Result<DispatchStats> {
        let batch = self.drain()?;
        Ok(self.dispatch(context, batch))
    }
}

impl<C> fmt::Debug for EventMonitor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered = self.callbacks.iter().flatten().filter(|c| c.is_some()).count();
        f.debug_struct("EventMonitor")
            .field("store", &self.store)
            .field("registered", &registered)
            .field("max_events_per_tick", &self.max_events_per_tick)
            .finish()
    }
}
