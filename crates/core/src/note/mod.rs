//! Note identity shared by every issuer.
//!
//! Detectors name notes in MIDI style (`C#4`, `Bb-1`). Sharps are folded onto
//! their enharmonic flats so that the same physical note always produces the
//! same [`NoteKey`] whichever issuer reported it.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{ChromaError, Result};

/// The twelve pitch classes, spelled with flats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    Db,
    D,
    Eb,
    E,
    F,
    Gb,
    G,
    Ab,
    A,
    Bb,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::Db,
        PitchClass::D,
        PitchClass::Eb,
        PitchClass::E,
        PitchClass::F,
        PitchClass::Gb,
        PitchClass::G,
        PitchClass::Ab,
        PitchClass::A,
        PitchClass::Bb,
        PitchClass::B,
    ];

    /// Hue order, starting from A (red) and stepping by perfect fifths.
    pub const CIRCLE_OF_FIFTHS: [PitchClass; 12] = [
        PitchClass::A,
        PitchClass::E,
        PitchClass::B,
        PitchClass::Gb,
        PitchClass::Db,
        PitchClass::Ab,
        PitchClass::Eb,
        PitchClass::Bb,
        PitchClass::F,
        PitchClass::C,
        PitchClass::G,
        PitchClass::D,
    ];

    /// Semitones above C.
    pub fn semitone(self) -> u8 {
        self as u8
    }

    pub fn from_semitone(semitone: u8) -> Self {
        Self::ALL[usize::from(semitone % 12)]
    }

    /// Position on the circle of fifths, `0` for A.
    pub fn fifths_index(self) -> usize {
        // Seven semitones per fifth; 7 is its own inverse mod 12.
        let from_a = (usize::from(self.semitone()) + 12 - 9) % 12;
        (from_a * 7) % 12
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::Db => "Db",
            PitchClass::D => "D",
            PitchClass::Eb => "Eb",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::Gb => "Gb",
            PitchClass::G => "G",
            PitchClass::Ab => "Ab",
            PitchClass::A => "A",
            PitchClass::Bb => "Bb",
            PitchClass::B => "B",
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PitchClass {
    type Err = ChromaError;

    fn from_str(s: &str) -> Result<Self> {
        parse_spelling(s).map(|(pitch, _)| pitch)
    }
}

/// Parses a letter with an optional accidental. The second value is the
/// octave carry for spellings that cross C: `Cb` is B of the octave below
/// and `B#` is C of the octave above.
fn parse_spelling(s: &str) -> Result<(PitchClass, i32)> {
    let mut chars = s.chars();
    let letter = chars.next().map(|c| c.to_ascii_uppercase());
    let natural: i32 = match letter {
        Some('C') => 0,
        Some('D') => 2,
        Some('E') => 4,
        Some('F') => 5,
        Some('G') => 7,
        Some('A') => 9,
        Some('B') => 11,
        _ => return Err(ChromaError::NoteParse(s.to_string())),
    };
    let shift: i32 = match chars.as_str() {
        "" => 0,
        "#" => 1,
        "b" => -1,
        _ => return Err(ChromaError::NoteParse(s.to_string())),
    };
    let semitone = natural + shift;
    let pitch = PitchClass::from_semitone(semitone.rem_euclid(12) as u8);
    Ok((pitch, semitone.div_euclid(12)))
}

/// Identity of a sounding note, independent of the issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteKey {
    pub pitch: PitchClass,
    pub octave: i32,
}

impl NoteKey {
    pub fn new(pitch: PitchClass, octave: i32) -> Self {
        Self { pitch, octave }
    }

    /// MIDI note number to key, with note 60 being `C4`.
    pub fn from_midi_number(number: u8) -> Self {
        Self {
            pitch: PitchClass::from_semitone(number % 12),
            octave: i32::from(number / 12) - 1,
        }
    }

    /// Nearest equal-tempered note to `frequency_hz` (A4 = 440 Hz).
    pub fn from_frequency(frequency_hz: f32) -> Option<Self> {
        if !(frequency_hz > 0.0) {
            return None;
        }
        let number = 69.0 + 12.0 * (frequency_hz / 440.0).log2();
        let number = number.round();
        if !(0.0..=127.0).contains(&number) {
            return None;
        }
        Some(Self::from_midi_number(number as u8))
    }

    pub fn frequency_hz(self) -> f32 {
        let number = (self.octave + 1) * 12 + i32::from(self.pitch.semitone());
        440.0 * 2f32.powf((number - 69) as f32 / 12.0)
    }
}

impl fmt::Display for NoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch, self.octave)
    }
}

impl FromStr for NoteKey {
    type Err = ChromaError;

    /// Parses `letter + accidental? + octave`, e.g. `C4`, `F#3`, `Bb-1`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s
            .char_indices()
            .find(|(i, c)| *i > 0 && (c.is_ascii_digit() || *c == '-'))
            .map(|(i, _)| i)
            .ok_or_else(|| ChromaError::NoteParse(s.to_string()))?;
        let (name, octave) = s.split_at(split);
        let (pitch, carry) = parse_spelling(name)?;
        let octave: i32 = octave
            .parse()
            .map_err(|_| ChromaError::NoteParse(s.to_string()))?;
        Ok(Self {
            pitch,
            octave: octave + carry,
        })
    }
}

/// Payload published by a detector for note events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub note: NoteKey,
    /// Strength of the detection in `[0, 1]`. Note-offs may leave it out.
    #[serde(default)]
    pub intensity: Option<f32>,
}

impl NoteEvent {
    pub fn on(note: NoteKey, intensity: f32) -> Self {
        Self {
            note,
            intensity: Some(intensity.clamp(0.0, 1.0)),
        }
    }

    pub fn off(note: NoteKey) -> Self {
        Self {
            note,
            intensity: None,
        }
    }
}
