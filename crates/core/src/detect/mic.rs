use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{
    note::{NoteEvent, NoteKey},
    relay::{EventKind, EventPublisher, Issuer},
    ChromaError, Result,
};

/// Tuning of the spectral pitch tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchTrackerConfig {
    pub sample_rate: u32,
    /// Lowest fundamental considered (C2).
    pub min_hz: f32,
    /// Highest fundamental considered (C7).
    pub max_hz: f32,
    /// Blocks quieter than this RMS are unvoiced.
    pub rms_gate: f32,
    /// RMS mapped to intensity 1.0.
    pub full_scale_rms: f32,
}

impl Default for PitchTrackerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            min_hz: 65.41,
            max_hz: 2093.0,
            rms_gate: 0.01,
            full_scale_rms: 0.25,
        }
    }
}

/// Result of analysing one voiced block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub note: NoteKey,
    pub frequency_hz: f32,
    pub intensity: f32,
}

/// Finds the dominant pitch of a block of samples.
///
/// A Hann-windowed real FFT is searched for its strongest bin inside
/// `[min_hz, max_hz]`, refined by parabolic interpolation over the
/// neighbouring bins.
pub struct PitchTracker {
    config: PitchTrackerConfig,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl PitchTracker {
    pub fn new(config: PitchTrackerConfig) -> Self {
        Self {
            config,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn config(&self) -> &PitchTrackerConfig {
        &self.config
    }

    /// Analyses one block. `None` means the block is unvoiced.
    pub fn process_block(&mut self, samples: &[f32]) -> Result<Option<Detection>> {
        if samples.len() < 2 {
            return Err(ChromaError::InvalidInput(
                "pitch tracking requires blocks with at least two samples",
            ));
        }

        let rms = compute_rms(samples);
        if rms < self.config.rms_gate {
            return Ok(None);
        }

        let Some(frequency_hz) = self.dominant_frequency(samples)? else {
            return Ok(None);
        };
        let Some(note) = NoteKey::from_frequency(frequency_hz) else {
            return Ok(None);
        };
        let full_scale = self.config.full_scale_rms.max(f32::EPSILON);
        Ok(Some(Detection {
            note,
            frequency_hz,
            intensity: (rms / full_scale).clamp(0.0, 1.0),
        }))
    }

    fn dominant_frequency(&mut self, samples: &[f32]) -> Result<Option<f32>> {
        let len = samples.len();
        let bin_hz = self.config.sample_rate as f32 / len as f32;
        let min_bin = (self.config.min_hz / bin_hz).floor().max(1.0) as usize;
        let max_bin = (self.config.max_hz / bin_hz).ceil() as usize;
        let fft = self.prepare_fft(len);

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }
        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let last = fft.spectrum.len().saturating_sub(2);
        let max_bin = max_bin.min(last);
        if min_bin > max_bin {
            return Ok(None);
        }

        let magnitudes: Vec<f32> = fft.spectrum.iter().map(|bin| bin.norm()).collect();
        let peak = (min_bin..=max_bin)
            .max_by(|a, b| magnitudes[*a].total_cmp(&magnitudes[*b]))
            .unwrap_or(min_bin);
        if magnitudes[peak] <= f32::EPSILON {
            return Ok(None);
        }

        let (left, centre, right) = (magnitudes[peak - 1], magnitudes[peak], magnitudes[peak + 1]);
        let denom = left - 2.0 * centre + right;
        let offset = if denom.abs() > f32::EPSILON {
            (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        Ok(Some((peak as f32 + offset) * bin_hz))
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let planner = &mut self.fft_planner;
        let fft = self.fft.get_or_insert_with(|| FftResources::new(planner, size));
        if fft.size != size {
            *fft = FftResources::new(planner, size);
        }
        fft
    }
}

impl fmt::Debug for PitchTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PitchTracker")
            .field("config", &self.config)
            .field("fft", &self.fft)
            .finish()
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn new(planner: &mut RealFftPlanner<f32>, size: usize) -> Self {
        let plan = planner.plan_fft_forward(size);
        Self {
            size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        }
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

/// Publishes mic note events from successive sample blocks.
///
/// One note at a time: a new pitch releases the previous one, and an
/// unvoiced block releases whatever was sounding.
#[derive(Debug)]
pub struct MicNoteDetector {
    tracker: PitchTracker,
    publisher: EventPublisher,
    current: Option<NoteKey>,
    connected: bool,
}

impl MicNoteDetector {
    pub fn new(config: PitchTrackerConfig, publisher: EventPublisher) -> Self {
        Self {
            tracker: PitchTracker::new(config),
            publisher,
            current: None,
            connected: false,
        }
    }

    pub fn current_note(&self) -> Option<NoteKey> {
        self.current
    }

    pub fn connect(&mut self, device_name: &str) -> Result<()> {
        self.connected = true;
        self.current = None;
        tracing::info!(device_name, "microphone stream started");
        self.publisher
            .publish(Issuer::Mic, EventKind::Connected, None)?;
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.current = None;
        tracing::info!("microphone stream stopped");
        self.publisher
            .publish(Issuer::Mic, EventKind::Disconnected, None)?;
        Ok(())
    }

    /// Analyses one block and publishes any change of detected note.
    pub fn push_samples(&mut self, samples: &[f32]) -> Result<Option<Detection>> {
        let detection = self.tracker.process_block(samples)?;
        let next = detection.map(|d| d.note);

        if next != self.current {
            if let Some(previous) = self.current.take() {
                self.publisher.publish(
                    Issuer::Mic,
                    EventKind::NoteOff,
                    Some(NoteEvent::off(previous)),
                )?;
            }
            if let Some(detection) = detection {
                self.publisher.publish(
                    Issuer::Mic,
                    EventKind::NoteOn,
                    Some(NoteEvent::on(detection.note, detection.intensity)),
                )?;
                self.current = Some(detection.note);
            }
        }
        Ok(detection)
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
