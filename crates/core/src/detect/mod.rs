//! Event producers.
//!
//! Each detector runs on its own thread and talks to the control loop only
//! through an [`EventPublisher`](crate::relay::EventPublisher).

pub mod mic;
pub mod midi;
pub mod script;

pub use mic::{Detection, MicNoteDetector, PitchTracker, PitchTrackerConfig};
pub use midi::{decode_message, MidiMessage, MidiNoteDetector};
pub use script::{Script, ScriptEntry};
