use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use crate::{
    animator::Animator,
    config::AppConfig,
    output::{ColorSink, OutputStage},
    relay::{DispatchStats, EventMonitor, EventPublisher},
    ChromaError, Result,
};

/// What a single control-loop step did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    pub dispatch: DispatchStats,
    pub committed: bool,
}

/// Single-threaded control loop: events first, then animation, then output.
#[derive(Debug)]
pub struct Engine<S> {
    monitor: EventMonitor<Animator>,
    animator: Animator,
    output: OutputStage<S>,
    tick_interval: Duration,
}

impl<S: ColorSink> Engine<S> {
    pub fn new(config: &AppConfig, sink: S) -> Result<Self> {
        config.validate()?;
        let tick_interval = config.output.tick_interval()?;
        let mut monitor = EventMonitor::new(&config.relay);
        Animator::register_callbacks(&mut monitor);
        Ok(Self {
            monitor,
            animator: Animator::new(config.animator.clone())?,
            output: OutputStage::new(sink, config.output.clone()),
            tick_interval,
        })
    }

    /// Handle for detector threads.
    pub fn publisher(&self) -> EventPublisher {
        self.monitor.publisher()
    }

    pub fn animator(&self) -> &Animator {
        &self.animator
    }

    pub fn output(&self) -> &OutputStage<S> {
        &self.output
    }

    pub fn into_output(self) -> OutputStage<S> {
        self.output
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Runs one tick covering `dt` seconds of wall time. Events published
    /// while this runs are left for the next tick. The current colour is
    /// offered to the output every tick, so a frame the sink failed to take
    /// goes out again on the next one.
    pub fn step(&mut self, dt: f32) -> Result<StepReport> {
        if !(dt >= 0.0) {
            return Err(ChromaError::InvalidInput("tick time step must be >= 0"));
        }
        let dispatch = self.monitor.process_events(&mut self.animator)?;
        self.animator.tick(dt)?;
        let committed = self
            .output
            .present(self.animator.color(), self.animator.now())?;
        Ok(StepReport {
            dispatch,
            committed,
        })
    }

    /// Steps at the configured tick rate with wall-clock deltas until `stop`
    /// is raised or `limit` elapses. A failed step is logged and the loop
    /// carries on.
    pub fn run(&mut self, stop: &AtomicBool, limit: Option<Duration>) -> Result<()> {
        let started = Instant::now();
        let mut last = started;
        tracing::info!(interval = ?self.tick_interval, "control loop started");

        while !stop.load(Ordering::Relaxed) {
            let now = Instant::now();
            if limit.is_some_and(|limit| now.duration_since(started) >= limit) {
                break;
            }
            let dt = now.duration_since(last).as_secs_f32();
            last = now;
            if let Err(error) = self.step(dt) {
                tracing::warn!(%error, "control loop step failed");
            }

            let spent = now.elapsed();
            if let Some(remaining) = self.tick_interval.checked_sub(spent) {
                thread::sleep(remaining);
            }
        }

        tracing::info!(commits = self.output.commits(), "control loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        animator::NoteState,
        note::{NoteEvent, NoteKey},
        output::{OutputFrame, RecordingSink},
        relay::{EventKind, Issuer},
    };

    const TICK: f32 = 1.0 / 60.0;

    fn engine() -> Engine<RecordingSink> {
        Engine::new(&AppConfig::default(), RecordingSink::new()).unwrap()
    }

    fn c4() -> NoteKey {
        "C4".parse().unwrap()
    }

    #[test]
    fn note_reaches_the_sink_and_fades_to_black() {
        let mut engine = engine();
        let publisher = engine.publisher();
        publisher.publish(Issuer::Midi, EventKind::Connected, None).unwrap();
        publisher
            .publish(Issuer::Midi, EventKind::NoteOn, Some(NoteEvent::on(c4(), 1.0)))
            .unwrap();

        let report = engine.step(TICK).unwrap();
        assert_eq!(report.dispatch.handled, 2);
        assert!(report.committed);
        assert_eq!(engine.animator().note_state(c4()), NoteState::Sounding);

        publisher
            .publish(Issuer::Midi, EventKind::NoteOff, Some(NoteEvent::off(c4())))
            .unwrap();
        for _ in 0..60 {
            engine.step(TICK).unwrap();
        }
        assert_eq!(engine.animator().note_state(c4()), NoteState::Silent);
        let frames = engine.output().sink().frames();
        assert_eq!(frames.last().unwrap().rgb, [0, 0, 0]);
    }

    #[test]
    fn idle_engine_never_commits() {
        let mut engine = engine();
        for _ in 0..10 {
            let report = engine.step(TICK).unwrap();
            assert!(!report.committed);
        }
        assert_eq!(engine.output().commits(), 0);
    }

    #[test]
    fn steady_color_stops_committing() {
        let mut engine = engine();
        engine
            .publisher()
            .publish(Issuer::Mic, EventKind::NoteOn, Some(NoteEvent::on(c4(), 1.0)))
            .unwrap();
        for _ in 0..30 {
            engine.step(TICK).unwrap();
        }
        let commits = engine.output().commits();
        for _ in 0..30 {
            assert!(!engine.step(TICK).unwrap().committed);
        }
        assert_eq!(engine.output().commits(), commits);
        assert_eq!(engine.output().sink().shows(), commits);
    }

    #[test]
    fn midi_is_dispatched_before_mic_in_the_same_tick() {
        let mut engine = engine();
        let publisher = engine.publisher();
        // Arrives first, but MIDI connects within the same batch and wins.
        publisher
            .publish(Issuer::Mic, EventKind::NoteOn, Some(NoteEvent::on(c4(), 1.0)))
            .unwrap();
        publisher.publish(Issuer::Midi, EventKind::Connected, None).unwrap();
        engine.step(TICK).unwrap();
        assert_eq!(engine.animator().note_state(c4()), NoteState::Silent);
    }

    #[test]
    fn run_stops_on_signal() {
        let mut engine = engine();
        let stop = AtomicBool::new(true);
        engine.run(&stop, None).unwrap();

        let stop = AtomicBool::new(false);
        engine.run(&stop, Some(Duration::from_millis(30))).unwrap();
    }

    /// Refuses the first `failures` writes, then records like [`RecordingSink`].
    #[derive(Debug, Default)]
    struct FlakySink {
        failures: usize,
        inner: RecordingSink,
    }

    impl ColorSink for FlakySink {
        fn write(&mut self, frame: OutputFrame) -> Result<()> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(ChromaError::msg("strip offline"));
            }
            self.inner.write(frame)
        }

        fn show(&mut self) -> Result<()> {
            self.inner.show()
        }
    }

    fn instant_fade_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.animator.fade_in_s = 0.0;
        config
    }

    #[test]
    fn failed_frame_is_retried_on_next_step() {
        let sink = FlakySink {
            failures: 1,
            ..FlakySink::default()
        };
        let mut engine = Engine::new(&instant_fade_config(), sink).unwrap();
        engine
            .publisher()
            .publish(Issuer::Mic, EventKind::NoteOn, Some(NoteEvent::on(c4(), 1.0)))
            .unwrap();

        assert!(engine.step(TICK).is_err());
        assert!(engine.step(TICK).unwrap().committed);
        for _ in 0..10 {
            assert!(!engine.step(TICK).unwrap().committed);
        }

        let frames = engine.output().sink().inner.frames();
        assert_eq!(frames.len(), 1);
        assert_ne!(frames[0].rgb, [0, 0, 0]);
        assert_eq!(engine.output().commits(), 1);
    }

    #[test]
    fn run_survives_sink_errors() {
        let sink = FlakySink {
            failures: usize::MAX,
            ..FlakySink::default()
        };
        let mut engine = Engine::new(&instant_fade_config(), sink).unwrap();
        engine
            .publisher()
            .publish(Issuer::Mic, EventKind::NoteOn, Some(NoteEvent::on(c4(), 1.0)))
            .unwrap();
        let stop = AtomicBool::new(false);
        engine.run(&stop, Some(Duration::from_millis(50))).unwrap();
        assert_eq!(engine.animator().note_state(c4()), NoteState::Sounding);
        assert_eq!(engine.output().commits(), 0);
    }

    #[test]
    fn rejects_unrepresentable_tick_rate() {
        let mut config = AppConfig::default();
        config.output.tick_rate_hz = f32::MIN_POSITIVE;
        assert!(Engine::new(&config, RecordingSink::new()).is_err());
    }

    #[test]
    fn rejects_negative_step() {
        assert!(engine().step(-1.0).is_err());
    }
}
