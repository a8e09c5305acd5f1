//! Producer/consumer boundary between detector threads and the control loop.
//!
//! Detectors hold an [`EventPublisher`] and push [`Event`]s from their own
//! threads. The control loop owns the [`EventMonitor`], which drains the
//! shared [`EventStore`] once per tick, orders the batch so MIDI goes first
//! and hands every event to the callback registered for its
//! `(issuer, kind)` pair.

mod monitor;
mod store;

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

pub use monitor::{Callback, DispatchStats, EventMonitor};
pub use store::{EventStore, OverflowPolicy, Published};

use crate::{note::NoteEvent, Result};

/// Origin of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Issuer {
    Mic,
    Midi,
}

impl Issuer {
    pub const ALL: [Issuer; 2] = [Issuer::Mic, Issuer::Midi];

    /// Dispatch priority within a batch, lower first. MIDI is authoritative.
    pub fn priority(self) -> u8 {
        match self {
            Issuer::Midi => 0,
            Issuer::Mic => 1,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Issuer::Mic => "MIC",
            Issuer::Midi => "MIDI",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Disconnected,
    NoteOn,
    NoteOff,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::NoteOn,
        EventKind::NoteOff,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// One message travelling through the relay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub issuer: Issuer,
    pub kind: EventKind,
    pub payload: Option<NoteEvent>,
}

impl Event {
    pub fn new(issuer: Issuer, kind: EventKind, payload: Option<NoteEvent>) -> Self {
        Self {
            issuer,
            kind,
            payload,
        }
    }
}

/// Cloneable producer handle handed to detector threads.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    store: Arc<EventStore<Event>>,
}

impl EventPublisher {
    pub fn new(store: Arc<EventStore<Event>>) -> Self {
        Self { store }
    }

    pub fn publish(
        &self,
        issuer: Issuer,
        kind: EventKind,
        payload: Option<NoteEvent>,
    ) -> Result<Published> {
        let outcome = self.store.publish(Event::new(issuer, kind, payload))?;
        if outcome != Published::Queued {
            tracing::warn!(%issuer, ?kind, ?outcome, "event relay overflow");
        }
        Ok(outcome)
    }

    pub fn store(&self) -> &Arc<EventStore<Event>> {
        &self.store
    }
}
