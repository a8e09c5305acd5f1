//! Note lifecycle arbitration and per-tick colour compositing.
//!
//! The [`Animator`] is owned by the control loop and mutated only through
//! event callbacks and [`Animator::tick`]. It reconciles two issuers that
//! disagree about which notes are on:
//!
//! * MIDI is exact and authoritative while connected.
//! * The microphone lags and drops out. While MIDI is connected (and
//!   priority is enabled) a mic detection can only join a note MIDI is
//!   holding or released less than `grace_window_s` ago. Otherwise it is
//!   ignored.
//!
//! A note keeps sounding while any issuer asserts it. When the last issuer
//! lets go its brightness fades to zero, after which it is forgotten.

use std::collections::{BTreeMap, HashMap};

use crate::{
    animation::Animation,
    color::{composite, note_color, Lch, Rgb},
    config::AnimatorConfig,
    note::{NoteEvent, NoteKey, PitchClass},
    relay::{EventKind, EventMonitor, Issuer},
    ChromaError, Result,
};

/// Visible lifecycle of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteState {
    Silent,
    Sounding,
    FadingOut,
}

/// Set of issuers currently asserting a note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IssuerSet {
    mic: bool,
    midi: bool,
}

impl IssuerSet {
    pub fn insert(&mut self, issuer: Issuer) {
        *self.slot(issuer) = true;
    }

    pub fn remove(&mut self, issuer: Issuer) -> bool {
        std::mem::replace(self.slot(issuer), false)
    }

    pub fn contains(&self, issuer: Issuer) -> bool {
        match issuer {
            Issuer::Mic => self.mic,
            Issuer::Midi => self.midi,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.mic && !self.midi
    }

    pub fn iter(&self) -> impl Iterator<Item = Issuer> + '_ {
        Issuer::ALL.into_iter().filter(|issuer| self.contains(*issuer))
    }

    fn slot(&mut self, issuer: Issuer) -> &mut bool {
        match issuer {
            Issuer::Mic => &mut self.mic,
            Issuer::Midi => &mut self.midi,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveNote {
    pub key: NoteKey,
    pub issuers: IssuerSet,
    pub intensity: f32,
}

/// Last MIDI activity for a key, kept after the note goes silent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteHistory {
    pub key: NoteKey,
    pub last_midi_start: Option<f64>,
    pub last_midi_end: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NoteAnimation {
    pub key: NoteKey,
    pub base: Lch,
    pub brightness: Animation<f32>,
}

impl NoteAnimation {
    fn is_finished(&self) -> bool {
        self.brightness.is_complete() && self.brightness.value() == 0.0
    }
}

#[derive(Debug)]
pub struct Animator {
    config: AnimatorConfig,
    /// Seconds of control-loop time since creation.
    now: f64,
    connected: IssuerSet,
    active: BTreeMap<NoteKey, ActiveNote>,
    history: HashMap<NoteKey, NoteHistory>,
    animations: BTreeMap<NoteKey, NoteAnimation>,
    palette: [Lch; 12],
    color: Rgb,
}

impl Animator {
    pub fn new(config: AnimatorConfig) -> Result<Self> {
        for duration in [
            config.fade_in_s,
            config.fade_out_s,
            config.grace_window_s,
            config.max_tick_s,
        ] {
            if !(duration >= 0.0) {
                return Err(ChromaError::InvalidInput("animator durations must be >= 0"));
            }
        }
        Ok(Self {
            config,
            now: 0.0,
            connected: IssuerSet::default(),
            active: BTreeMap::new(),
            history: HashMap::new(),
            animations: BTreeMap::new(),
            palette: PitchClass::ALL.map(|pitch| Lch::from_rgb(note_color(pitch))),
            color: Rgb::BLACK,
        })
    }

    /// Wires every `(issuer, kind)` pair of `monitor` to this animator.
    pub fn register_callbacks(monitor: &mut EventMonitor<Animator>) {
        for issuer in Issuer::ALL {
            monitor.register_callback(issuer, EventKind::Connected, move |animator, _| {
                animator.on_connected(issuer);
            });
            monitor.register_callback(issuer, EventKind::Disconnected, move |animator, _| {
                animator.on_disconnected(issuer);
            });
            monitor.register_callback(issuer, EventKind::NoteOn, move |animator, payload| {
                match payload {
                    Some(event) => {
                        if let Err(error) = animator.on_note_on(issuer, event) {
                            tracing::error!(%issuer, %error, "note-on failed");
                        }
                    }
                    None => tracing::warn!(%issuer, "note-on without payload"),
                }
            });
            monitor.register_callback(issuer, EventKind::NoteOff, move |animator, payload| {
                let result = match payload {
                    Some(event) => animator.on_note_off(issuer, event.note),
                    None => animator.release_all(issuer),
                };
                if let Err(error) = result {
                    tracing::error!(%issuer, %error, "note-off failed");
                }
            });
        }
    }

    pub fn config(&self) -> &AnimatorConfig {
        &self.config
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn is_connected(&self, issuer: Issuer) -> bool {
        self.connected.contains(issuer)
    }

    /// Colour produced by the latest tick.
    pub fn color(&self) -> Rgb {
        self.color
    }

    pub fn note_state(&self, key: NoteKey) -> NoteState {
        if self.active.contains_key(&key) {
            NoteState::Sounding
        } else if self.animations.contains_key(&key) {
            NoteState::FadingOut
        } else {
            NoteState::Silent
        }
    }

    pub fn active_note(&self, key: NoteKey) -> Option<&ActiveNote> {
        self.active.get(&key)
    }

    pub fn active_notes(&self) -> impl Iterator<Item = &ActiveNote> {
        self.active.values()
    }

    pub fn history(&self, key: NoteKey) -> Option<&NoteHistory> {
        self.history.get(&key)
    }

    pub fn brightness(&self, key: NoteKey) -> Option<f32> {
        self.animations.get(&key).map(|anim| anim.brightness.value())
    }

    pub fn animation_count(&self) -> usize {
        self.animations.len()
    }

    pub fn on_connected(&mut self, issuer: Issuer) {
        self.connected.insert(issuer);
        tracing::info!(%issuer, "issuer connected");
    }

    /// Withdraws `issuer` from every note it asserts.
    pub fn on_disconnected(&mut self, issuer: Issuer) {
        self.connected.remove(issuer);
        tracing::info!(%issuer, "issuer disconnected");
        if let Err(error) = self.release_all(issuer) {
            tracing::error!(%issuer, %error, "failed to release notes");
        }
    }

    pub fn on_note_on(&mut self, issuer: Issuer, event: NoteEvent) -> Result<()> {
        let key = event.note;
        let intensity = event.intensity.unwrap_or(1.0).clamp(0.0, 1.0);
        match issuer {
            Issuer::Midi => {
                self.history_mut(key).last_midi_start = Some(self.now);
                self.assert_note(issuer, key, intensity)
            }
            Issuer::Mic if self.mic_is_subordinate() => self.mic_join(key, intensity),
            Issuer::Mic => self.assert_note(issuer, key, intensity),
        }
    }

    pub fn on_note_off(&mut self, issuer: Issuer, key: NoteKey) -> Result<()> {
        if issuer == Issuer::Midi {
            self.history_mut(key).last_midi_end = Some(self.now);
            let mic_holds = self
                .active
                .get(&key)
                .is_some_and(|note| note.issuers.contains(Issuer::Mic));
            if mic_holds {
                tracing::debug!(%key, "MIDI release held open by mic");
            }
        }
        self.retract(issuer, key)
    }

    /// Retracts every note `issuer` currently asserts.
    pub fn release_all(&mut self, issuer: Issuer) -> Result<()> {
        let keys: Vec<NoteKey> = self
            .active
            .values()
            .filter(|note| note.issuers.contains(issuer))
            .map(|note| note.key)
            .collect();
        for key in keys {
            if issuer == Issuer::Midi {
                self.history_mut(key).last_midi_end = Some(self.now);
            }
            self.retract(issuer, key)?;
        }
        Ok(())
    }

    /// Advances the clock and every fade by `dt` seconds, drops finished fades
    /// and recomposites. Returns the colour when it differs from the previous
    /// tick.
    pub fn tick(&mut self, dt: f32) -> Result<Option<Rgb>> {
        if !(dt >= 0.0) {
            return Err(ChromaError::InvalidInput("tick time step must be >= 0"));
        }
        self.now += f64::from(dt);
        let step = dt.min(self.config.max_tick_s);

        for animation in self.animations.values_mut() {
            animation.brightness.advance(step)?;
        }
        let active = &self.active;
        self.animations.retain(|key, animation| {
            let keep = active.contains_key(key) || !animation.is_finished();
            if !keep {
                tracing::debug!(%key, "note faded out");
            }
            keep
        });

        let color = composite(
            self.animations
                .values()
                .map(|anim| (anim.base, anim.brightness.value())),
        );
        if color.same_bits(self.color) {
            return Ok(None);
        }
        self.color = color;
        tracing::trace!(?color, "colour changed");
        Ok(Some(color))
    }

    fn mic_is_subordinate(&self) -> bool {
        self.config.midi_priority && self.connected.contains(Issuer::Midi)
    }

    /// Mic note-on under MIDI priority.
    fn mic_join(&mut self, key: NoteKey, intensity: f32) -> Result<()> {
        if let Some(note) = self.active.get_mut(&key) {
            note.issuers.insert(Issuer::Mic);
            tracing::debug!(%key, "mic joined note");
            return Ok(());
        }
        let recent_release = self
            .history
            .get(&key)
            .and_then(|history| history.last_midi_end)
            .is_some_and(|end| self.now - end < f64::from(self.config.grace_window_s));
        if recent_release {
            tracing::debug!(%key, "mic continues recently released MIDI note");
            self.assert_note(Issuer::Mic, key, intensity)
        } else {
            tracing::debug!(%key, "mic detection suppressed by MIDI priority");
            Ok(())
        }
    }

    fn assert_note(&mut self, issuer: Issuer, key: NoteKey, intensity: f32) -> Result<()> {
        let note = self.active.entry(key).or_insert_with(|| {
            tracing::debug!(%key, %issuer, "note on");
            ActiveNote {
                key,
                issuers: IssuerSet::default(),
                intensity,
            }
        });
        note.issuers.insert(issuer);
        note.intensity = intensity;

        let target = if self.config.velocity_brightness {
            intensity
        } else {
            1.0
        };
        self.fade_to(key, target, self.config.fade_in_s)
    }

    fn retract(&mut self, issuer: Issuer, key: NoteKey) -> Result<()> {
        let Some(note) = self.active.get_mut(&key) else {
            return Ok(());
        };
        if !note.issuers.remove(issuer) || !note.issuers.is_empty() {
            return Ok(());
        }
        self.active.remove(&key);
        tracing::debug!(%key, %issuer, "note off");
        self.fade_to(key, 0.0, self.config.fade_out_s)
    }

    /// Every active key has an animation, even one targeting zero.
    fn fade_to(&mut self, key: NoteKey, target: f32, duration: f32) -> Result<()> {
        let easing = self.config.easing;
        match self.animations.get_mut(&key) {
            Some(animation) => {
                let from = animation.brightness.value();
                animation
                    .brightness
                    .reset(from, target, Some(duration), Some(easing))
            }
            None => {
                let animation = NoteAnimation {
                    key,
                    base: self.palette[usize::from(key.pitch.semitone())],
                    brightness: Animation::new(0.0, target, duration, easing)?,
                };
                self.animations.insert(key, animation);
                Ok(())
            }
        }
    }

    fn history_mut(&mut self, key: NoteKey) -> &mut NoteHistory {
        self.history.entry(key).or_insert(NoteHistory {
            key,
            last_midi_start: None,
            last_midi_end: None,
        })
    }
}
