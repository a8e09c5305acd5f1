use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{easing::Easing, relay::OverflowPolicy, ChromaError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub animator: AnimatorConfig,
    pub output: OutputConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.relay.capacity == 0 {
            return Err(ChromaError::InvalidInput("relay capacity must be positive"));
        }
        if self.relay.max_events_per_tick == 0 {
            return Err(ChromaError::InvalidInput(
                "relay must dispatch at least one event per tick",
            ));
        }
        let animator = &self.animator;
        for duration in [
            animator.fade_in_s,
            animator.fade_out_s,
            animator.grace_window_s,
            animator.max_tick_s,
        ] {
            if !(duration >= 0.0) {
                return Err(ChromaError::InvalidInput("durations must be >= 0"));
            }
        }
        if !(0.0..=1.0).contains(&self.output.brightness) {
            return Err(ChromaError::InvalidInput("brightness must lie in [0, 1]"));
        }
        self.output.tick_interval()?;
        Ok(())
    }
}

/// Sizing of the detector-to-control-loop mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub capacity: usize,
    pub max_events_per_tick: usize,
    pub overflow: OverflowPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            max_events_per_tick: 32,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Note arbitration and fade timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimatorConfig {
    /// While MIDI is connected, the microphone may only join notes MIDI
    /// recently played.
    pub midi_priority: bool,
    pub fade_in_s: f32,
    pub fade_out_s: f32,
    /// How long after a MIDI release a mic detection still counts as the
    /// same note.
    pub grace_window_s: f32,
    /// Upper bound on the animation step after a scheduling stall.
    pub max_tick_s: f32,
    pub easing: Easing,
    /// Fade towards the note intensity instead of full brightness.
    pub velocity_brightness: bool,
}

impl Default for AnimatorConfig {
    fn default() -> Self {
        Self {
            midi_priority: true,
            fade_in_s: 0.05,
            fade_out_s: 0.25,
            grace_window_s: 1.0,
            max_tick_s: 0.1,
            easing: Easing::Sqrt,
            velocity_brightness: false,
        }
    }
}

/// Final stage before the LED driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub brightness: f32,
    pub gamma_correct: bool,
    pub tick_rate_hz: f32,
}

impl OutputConfig {
    /// Wall-clock period of one control-loop tick.
    pub fn tick_interval(&self) -> Result<Duration> {
        if !(self.tick_rate_hz > 0.0) {
            return Err(ChromaError::InvalidInput("tick rate must be positive"));
        }
        Duration::try_from_secs_f32(1.0 / self.tick_rate_hz)
            .map_err(|_| ChromaError::InvalidInput("tick rate is out of range"))
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            gamma_correct: true,
            tick_rate_hz: 60.0,
        }
    }
}
