//! Core library for the Chromesthesia note-to-light controller.
//!
//! Notes reported by a microphone pitch tracker and a MIDI device are merged
//! into one smoothly animated colour for an LED strip. Detector threads
//! publish into the [`relay`]; the single control loop in [`engine`] drains
//! it, lets the [`animator`] arbitrate note lifecycles, composites the fading
//! notes in a perceptual colour space and forwards changes to the [`output`].

pub mod animation;
pub mod animator;
pub mod color;
pub mod config;
pub mod detect;
pub mod easing;
pub mod engine;
pub mod error;
pub mod note;
pub mod output;
pub mod relay;

pub use animation::Animation;
pub use animator::{ActiveNote, Animator, IssuerSet, NoteAnimation, NoteHistory, NoteState};
pub use color::{composite, gamma, note_color, Lch, Rgb};
pub use config::{AnimatorConfig, AppConfig, OutputConfig, RelayConfig};
pub use detect::{MicNoteDetector, MidiNoteDetector, PitchTracker, Script};
pub use easing::{lerp, smoothstep, sqrt_ease, Easing};
pub use engine::{Engine, StepReport};
pub use error::{ChromaError, Result};
pub use note::{NoteEvent, NoteKey, PitchClass};
pub use output::{ColorSink, LogSink, OutputFrame, OutputStage, RecordingSink};
pub use relay::{Event, EventKind, EventMonitor, EventPublisher, EventStore, Issuer, OverflowPolicy};
