use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::{
    engine::Engine,
    note::{NoteEvent, NoteKey},
    output::ColorSink,
    relay::{Event, EventKind, EventPublisher, Issuer},
    ChromaError, Result,
};

/// Longest sleep between stop-flag checks on the replay thread.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One line of a JSON event script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptEntry {
    /// Seconds from the start of the script.
    pub at: f32,
    pub issuer: Issuer,
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f32>,
}

/// A validated, time-ordered list of events standing in for live detectors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    events: Vec<(f32, Event)>,
}

impl Script {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let entries: Vec<ScriptEntry> = serde_json::from_str(text)?;
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: Vec<ScriptEntry>) -> Result<Self> {
        let mut events = entries
            .into_iter()
            .map(|entry| Ok((entry.at, entry_to_event(&entry)?)))
            .collect::<Result<Vec<_>>>()?;
        for (at, _) in &events {
            script_offset(*at)?;
        }
        events.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self { events })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Timestamp of the last event.
    pub fn duration(&self) -> f32 {
        self.events.last().map_or(0.0, |(at, _)| *at)
    }

    pub fn issuers(&self) -> Vec<Issuer> {
        Issuer::ALL
            .into_iter()
            .filter(|issuer| self.events.iter().any(|(_, e)| e.issuer == *issuer))
            .collect()
    }

    /// Events of a single issuer, keeping their order.
    pub fn for_issuer(&self, issuer: Issuer) -> Script {
        Script {
            events: self
                .events
                .iter()
                .filter(|(_, event)| event.issuer == issuer)
                .copied()
                .collect(),
        }
    }

    /// Replays the script on a dedicated producer thread in real time.
    /// Raising `stop` ends the replay early. The thread yields the number of
    /// events it published.
    pub fn spawn(self, publisher: EventPublisher, stop: Arc<AtomicBool>) -> JoinHandle<Result<usize>> {
        thread::spawn(move || {
            let started = Instant::now();
            let mut published = 0;
            for (at, event) in self.events {
                let due = started
                    .checked_add(script_offset(at)?)
                    .ok_or(ChromaError::InvalidInput("script timestamp is out of range"))?;
                loop {
                    if stop.load(Ordering::Relaxed) {
                        return Ok(published);
                    }
                    let now = Instant::now();
                    if now >= due {
                        break;
                    }
                    thread::sleep((due - now).min(POLL_INTERVAL));
                }
                publisher.publish(event.issuer, event.kind, event.payload)?;
                published += 1;
            }
            Ok(published)
        })
    }

    /// Deterministic offline run: steps `engine` at `fps`, publishing each
    /// event once its timestamp is reached, for the script length plus
    /// `tail_s`. Returns the number of ticks executed.
    pub fn render<S: ColorSink>(&self, engine: &mut Engine<S>, fps: f32, tail_s: f32) -> Result<usize> {
        if !(fps > 0.0) || !(tail_s >= 0.0) {
            return Err(ChromaError::InvalidInput("render needs fps > 0 and tail >= 0"));
        }
        let publisher = engine.publisher();
        let dt = 1.0 / fps;
        let ticks = ((self.duration() + tail_s) * fps).ceil() as usize + 1;
        let mut pending = self.events.iter().peekable();

        for tick in 0..ticks {
            let now = tick as f32 * dt;
            while let Some((_, event)) = pending.next_if(|(at, _)| *at <= now) {
                publisher.publish(event.issuer, event.kind, event.payload)?;
            }
            engine.step(if tick == 0 { 0.0 } else { dt })?;
        }
        Ok(ticks)
    }
}

fn script_offset(at: f32) -> Result<Duration> {
    Duration::try_from_secs_f32(at).map_err(|_| {
        ChromaError::InvalidInput("script timestamps must be finite and >= 0")
    })
}

fn entry_to_event(entry: &ScriptEntry) -> Result<Event> {
    let payload = match (&entry.note, entry.event) {
        (Some(name), EventKind::NoteOn) => {
            let note: NoteKey = name.parse()?;
            Some(NoteEvent::on(note, entry.intensity.unwrap_or(1.0)))
        }
        (Some(name), EventKind::NoteOff) => Some(NoteEvent::off(name.parse()?)),
        (None, EventKind::NoteOn) => {
            return Err(ChromaError::msg(format!(
                "note_on at {}s is missing a note",
                entry.at
            )))
        }
        _ => None,
    };
    Ok(Event::new(entry.issuer, entry.event, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        animator::NoteState, config::AppConfig, output::RecordingSink, relay::EventMonitor,
    };

    const SCRIPT: &str = r#"[
        { "at": 0.5, "issuer": "midi", "event": "note_off", "note": "C4" },
        { "at": 0.0, "issuer": "midi", "event": "connected" },
        { "at": 0.1, "issuer": "midi", "event": "note_on", "note": "C4", "intensity": 0.9 },
        { "at": 0.3, "issuer": "mic", "event": "note_on", "note": "E4" }
    ]"#;

    #[test]
    fn parses_and_orders_entries() {
        let script = Script::from_json(SCRIPT).unwrap();
        assert_eq!(script.len(), 4);
        assert_eq!(script.duration(), 0.5);
        assert_eq!(script.issuers(), vec![Issuer::Mic, Issuer::Midi]);
        assert_eq!(script.for_issuer(Issuer::Mic).len(), 1);
        assert_eq!(script.events[0].1.kind, EventKind::Connected);
    }

    #[test]
    fn rejects_bad_entries() {
        assert!(Script::from_json(r#"[{ "at": 0.0, "issuer": "mic", "event": "note_on" }]"#).is_err());
        assert!(Script::from_json(r#"[{ "at": 0.0, "issuer": "mic", "event": "note_on", "note": "X9" }]"#).is_err());
        assert!(Script::from_json(r#"[{ "at": -1.0, "issuer": "mic", "event": "connected" }]"#).is_err());
        assert!(Script::from_json(r#"[{ "at": 1e30, "issuer": "mic", "event": "connected" }]"#).is_err());
        for at in [f32::INFINITY, f32::NAN] {
            let entry = ScriptEntry {
                at,
                issuer: Issuer::Midi,
                event: EventKind::Connected,
                note: None,
                intensity: None,
            };
            assert!(Script::from_entries(vec![entry]).is_err());
        }
    }

    #[test]
    fn offline_render_records_frames() {
        let script = Script::from_json(SCRIPT).unwrap();
        let mut engine = Engine::new(&AppConfig::default(), RecordingSink::new()).unwrap();
        let ticks = script.render(&mut engine, 50.0, 1.0).unwrap();
        assert_eq!(ticks, 76);

        // The mic note at 0.3s was suppressed because MIDI was connected.
        let e4: NoteKey = "E4".parse().unwrap();
        assert_eq!(engine.animator().note_state(e4), NoteState::Silent);
        let frames = engine.output().sink().frames();
        assert!(frames.len() > 2);
        assert_eq!(frames.last().unwrap().rgb, [0, 0, 0]);
    }

    #[test]
    fn replay_thread_publishes_and_stops() {
        let monitor: EventMonitor<()> = EventMonitor::new(&Default::default());
        let script = Script::from_json(
            r#"[
                { "at": 0.0, "issuer": "mic", "event": "connected" },
                { "at": 0.01, "issuer": "mic", "event": "note_on", "note": "A3" },
                { "at": 30.0, "issuer": "mic", "event": "note_off", "note": "A3" }
            ]"#,
        )
        .unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = script.spawn(monitor.publisher(), Arc::clone(&stop));

        let mut seen = Vec::new();
        while seen.len() < 2 {
            seen.extend(monitor.store().drain(true).unwrap());
        }
        stop.store(true, Ordering::Relaxed);
        assert_eq!(handle.join().unwrap().unwrap(), 2);
        assert_eq!(seen[1].kind, EventKind::NoteOn);
    }
}
