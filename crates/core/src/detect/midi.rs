use std::collections::HashMap;

use crate::{
    note::{NoteEvent, NoteKey},
    relay::{EventKind, EventPublisher, Issuer},
    Result,
};

/// Note-ons softer than this are treated as releases.
pub const MIN_VELOCITY: u8 = 5;
/// Velocity at which intensity saturates at 1.0.
pub const SATURATION_VELOCITY: f32 = 32.0;

/// Channel voice messages the detector cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { number: u8, velocity: u8 },
    NoteOff { number: u8 },
}

/// Decodes a raw MIDI message. Anything other than note on/off is ignored.
pub fn decode_message(message: &[u8]) -> Option<MidiMessage> {
    if message.len() < 3 {
        return None;
    }
    let number = message[1] & 0x7F;
    let velocity = message[2] & 0x7F;
    match message[0] & 0xF0 {
        0x80 => Some(MidiMessage::NoteOff { number }),
        0x90 => Some(MidiMessage::NoteOn { number, velocity }),
        _ => None,
    }
}

pub fn velocity_to_intensity(velocity: u8) -> f32 {
    (f32::from(velocity) / SATURATION_VELOCITY).clamp(0.0, 1.0)
}

/// Turns a MIDI input stream into relay events.
///
/// Releases are only forwarded for notes this detector reported as on, so a
/// stray note-off (or a soft note-on) never retracts another issuer's note.
#[derive(Debug)]
pub struct MidiNoteDetector {
    publisher: EventPublisher,
    held: HashMap<u8, NoteKey>,
    connected: bool,
}

impl MidiNoteDetector {
    pub fn new(publisher: EventPublisher) -> Self {
        Self {
            publisher,
            held: HashMap::new(),
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Notes currently held down, in no particular order.
    pub fn held_notes(&self) -> impl Iterator<Item = NoteKey> + '_ {
        self.held.values().copied()
    }

    pub fn connect(&mut self, port_name: &str) -> Result<()> {
        self.held.clear();
        self.connected = true;
        tracing::info!(port_name, "MIDI port opened");
        self.publisher
            .publish(Issuer::Midi, EventKind::Connected, None)?;
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.held.clear();
        self.connected = false;
        tracing::info!("MIDI port closed");
        self.publisher
            .publish(Issuer::Midi, EventKind::Disconnected, None)?;
        Ok(())
    }

    /// Decodes `message` and publishes the resulting note event, if any.
    pub fn handle_message(&mut self, message: &[u8]) -> Result<()> {
        match decode_message(message) {
            Some(MidiMessage::NoteOn { number, velocity }) if velocity >= MIN_VELOCITY => {
                let key = NoteKey::from_midi_number(number);
                self.held.insert(number, key);
                let event = NoteEvent::on(key, velocity_to_intensity(velocity));
                self.publisher
                    .publish(Issuer::Midi, EventKind::NoteOn, Some(event))?;
            }
            Some(MidiMessage::NoteOn { number, .. }) | Some(MidiMessage::NoteOff { number }) => {
                if let Some(key) = self.held.remove(&number) {
                    self.publisher
                        .publish(Issuer::Midi, EventKind::NoteOff, Some(NoteEvent::off(key)))?;
                }
            }
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RelayConfig,
        note::PitchClass,
        relay::{Event, EventMonitor},
    };

    fn detector() -> (MidiNoteDetector, EventMonitor<()>) {
        let monitor = EventMonitor::new(&RelayConfig::default());
        (MidiNoteDetector::new(monitor.publisher()), monitor)
    }

    fn kinds(events: &[Event]) -> Vec<EventKind> {
        events.iter().map(|event| event.kind).collect()
    }

    #[test]
    fn decodes_note_messages() {
        assert_eq!(
            decode_message(&[0x91, 60, 100]),
            Some(MidiMessage::NoteOn { number: 60, velocity: 100 })
        );
        assert_eq!(decode_message(&[0x80, 61, 0]), Some(MidiMessage::NoteOff { number: 61 }));
        assert_eq!(decode_message(&[0xB0, 64, 127]), None);
        assert_eq!(decode_message(&[0x90, 60]), None);
    }

    #[test]
    fn velocity_saturates() {
        assert_eq!(velocity_to_intensity(16), 0.5);
        assert_eq!(velocity_to_intensity(127), 1.0);
    }

    #[test]
    fn publishes_note_lifecycle() {
        let (mut midi, monitor) = detector();
        midi.connect("test").unwrap();
        midi.handle_message(&[0x90, 61, 64]).unwrap();
        midi.handle_message(&[0x90, 61, 0]).unwrap();

        let events = monitor.drain().unwrap();
        assert_eq!(
            kinds(&events),
            vec![EventKind::Connected, EventKind::NoteOn, EventKind::NoteOff]
        );
        let on = events[1].payload.unwrap();
        assert_eq!(on.note, NoteKey::new(PitchClass::Db, 4));
        assert_eq!(on.intensity, Some(1.0));
    }

    #[test]
    fn ignores_releases_of_unknown_notes() {
        let (mut midi, monitor) = detector();
        midi.handle_message(&[0x80, 60, 0]).unwrap();
        midi.handle_message(&[0x90, 60, 2]).unwrap();
        assert!(monitor.drain().unwrap().is_empty());
    }

    #[test]
    fn disconnect_forgets_held_notes() {
        let (mut midi, monitor) = detector();
        midi.connect("test").unwrap();
        midi.handle_message(&[0x90, 60, 90]).unwrap();
        midi.disconnect().unwrap();
        assert_eq!(midi.held_notes().count(), 0);
        midi.handle_message(&[0x80, 60, 0]).unwrap();

        let events = monitor.drain().unwrap();
        assert_eq!(
            kinds(&events),
            vec![EventKind::Connected, EventKind::NoteOn, EventKind::Disconnected]
        );
    }
}
