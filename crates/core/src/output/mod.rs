//! Last hop before the LED hardware.
//!
//! The strip is driven as a single logical pixel. [`OutputStage`] applies the
//! output brightness, quantises to 8 bits, gamma-corrects and forwards the
//! result to a [`ColorSink`] only when it differs from the last committed
//! frame.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    color::{gamma, Rgb},
    config::OutputConfig,
    Result,
};

/// One committed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFrame {
    /// Control-loop time in milliseconds.
    pub time_ms: u64,
    pub rgb: [u8; 3],
}

/// Driver for the physical (or simulated) LED strip.
pub trait ColorSink {
    /// Latches a colour without displaying it.
    fn write(&mut self, frame: OutputFrame) -> Result<()>;

    /// Displays the latched colour.
    fn show(&mut self) -> Result<()>;
}

impl<S: ColorSink + ?Sized> ColorSink for Box<S> {
    fn write(&mut self, frame: OutputFrame) -> Result<()> {
        (**self).write(frame)
    }

    fn show(&mut self) -> Result<()> {
        (**self).show()
    }
}

#[derive(Debug)]
pub struct OutputStage<S> {
    sink: S,
    config: OutputConfig,
    /// Last colour the sink accepted. Only updated after a successful show.
    last: [u8; 3],
    commits: u64,
}

impl<S: ColorSink> OutputStage<S> {
    pub fn new(sink: S, config: OutputConfig) -> Self {
        Self {
            sink,
            config,
            last: [0; 3],
            commits: 0,
        }
    }

    /// Converts `color` to device values.
    pub fn encode(&self, color: Rgb) -> [u8; 3] {
        let rgb = color
            .clamped()
            .scaled(self.config.brightness.clamp(0.0, 1.0))
            .to_rgb8();
        if self.config.gamma_correct {
            rgb.map(gamma)
        } else {
            rgb
        }
    }

    /// Writes and shows `color` unless the device already displays it.
    /// Returns whether a commit happened. The strip is assumed dark before
    /// the first commit. A failed write is retried by the next call.
    pub fn present(&mut self, color: Rgb, time_s: f64) -> Result<bool> {
        let rgb = self.encode(color);
        if self.last == rgb {
            return Ok(false);
        }
        let frame = OutputFrame {
            time_ms: (time_s.max(0.0) * 1000.0).round() as u64,
            rgb,
        };
        self.sink.write(frame)?;
        self.sink.show()?;
        self.last = rgb;
        self.commits += 1;
        Ok(true)
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// Reports every frame through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink {
    pending: Option<OutputFrame>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ColorSink for LogSink {
    fn write(&mut self, frame: OutputFrame) -> Result<()> {
        self.pending = Some(frame);
        Ok(())
    }

    fn show(&mut self) -> Result<()> {
        if let Some(frame) = self.pending.take() {
            let [r, g, b] = frame.rgb;
            tracing::info!(time_ms = frame.time_ms, "#{r:02x}{g:02x}{b:02x}");
        }
        Ok(())
    }
}

/// Collects shown frames in memory, e.g. for offline renders.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pending: Option<OutputFrame>,
    frames: Vec<OutputFrame>,
    shows: u64,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[OutputFrame] {
        &self.frames
    }

    /// Number of `show` calls received.
    pub fn shows(&self) -> u64 {
        self.shows
    }

    /// Persists the recorded frames as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.frames)?;
        fs::write(path, text)?;
        Ok(())
    }
}

impl ColorSink for RecordingSink {
    fn write(&mut self, frame: OutputFrame) -> Result<()> {
        self.pending = Some(frame);
        Ok(())
    }

    fn show(&mut self) -> Result<()> {
        self.shows += 1;
        if let Some(frame) = self.pending.take() {
            self.frames.push(frame);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(config: OutputConfig) -> OutputStage<RecordingSink> {
        OutputStage::new(RecordingSink::new(), config)
    }

    #[test]
    fn suppresses_repeated_frames() {
        let mut out = stage(OutputConfig::default());
        assert!(out.present(Rgb::new(1.0, 0.0, 0.0), 0.0).unwrap());
        assert!(!out.present(Rgb::new(1.0, 0.0, 0.0), 0.1).unwrap());
        assert!(out.present(Rgb::BLACK, 0.2).unwrap());
        assert_eq!(out.commits(), 2);
        assert_eq!(out.sink().shows(), 2);
        assert_eq!(out.sink().frames()[1].time_ms, 200);
    }

    #[test]
    fn applies_brightness_and_gamma() {
        let config = OutputConfig {
            brightness: 0.5,
            gamma_correct: false,
            ..OutputConfig::default()
        };
        assert_eq!(stage(config).encode(Rgb::new(1.0, 1.0, 0.0)), [128, 128, 0]);

        let gamma_only = stage(OutputConfig::default());
        assert_eq!(gamma_only.encode(Rgb::new(1.0, 0.5, 0.0)), [255, gamma(128), 0]);
        assert_eq!(gamma_only.encode(Rgb::new(2.0, -1.0, 0.0)), [255, 0, 0]);
    }

    #[test]
    fn starts_dark() {
        let mut out = stage(OutputConfig::default());
        assert!(!out.present(Rgb::BLACK, 0.0).unwrap());
        assert_eq!(out.sink().shows(), 0);
    }

    #[test]
    fn boxed_sinks_forward() {
        let mut out: OutputStage<Box<dyn ColorSink>> =
            OutputStage::new(Box::new(LogSink::new()), OutputConfig::default());
        assert!(out.present(Rgb::new(0.0, 0.0, 1.0), 0.0).unwrap());
    }
}
