use crate::{
    easing::{Easing, Tween, EPSILON},
    ChromaError, Result,
};

/// Restartable timed interpolation between two values.
///
/// The animation is either running or complete; the only way back to running
/// is [`Animation::reset`].
#[derive(Debug, Clone)]
pub struct Animation<T: Tween> {
    init_value: T,
    final_value: T,
    /// Duration requested by the caller, kept across resets that omit it.
    duration: f32,
    /// Duration actually in effect. Zero for degenerate endpoints.
    span: f32,
    elapsed: f32,
    current: T,
    easing: Easing,
}

impl<T: Tween> Animation<T> {
    pub fn new(init_value: T, final_value: T, duration: f32, easing: Easing) -> Result<Self> {
        validate_duration(duration)?;
        let mut animation = Self {
            init_value,
            final_value,
            duration,
            span: duration,
            elapsed: 0.0,
            current: init_value,
            easing,
        };
        animation.restart(init_value, final_value);
        Ok(animation)
    }

    /// Restarts the timer towards new endpoints. `None` keeps the previous
    /// duration or easing.
    pub fn reset(
        &mut self,
        init_value: T,
        final_value: T,
        duration: Option<f32>,
        easing: Option<Easing>,
    ) -> Result<()> {
        if let Some(duration) = duration {
            validate_duration(duration)?;
            self.duration = duration;
        }
        if let Some(easing) = easing {
            self.easing = easing;
        }
        self.restart(init_value, final_value);
        Ok(())
    }

    fn restart(&mut self, init_value: T, final_value: T) {
        self.elapsed = 0.0;
        self.final_value = final_value;
        if init_value.distance(final_value) < EPSILON {
            self.init_value = final_value;
            self.span = 0.0;
        } else {
            self.init_value = init_value;
            self.span = self.duration;
        }
        self.current = self.init_value;
    }

    /// Moves the animation forward by `dt` seconds and returns the new value.
    pub fn advance(&mut self, dt: f32) -> Result<T> {
        if !(dt >= 0.0) {
            return Err(ChromaError::InvalidInput("animation time step must be >= 0"));
        }
        self.elapsed += dt;
        let progress = if self.span > 0.0 {
            (self.elapsed / self.span).clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.current = self
            .easing
            .apply(self.init_value, self.final_value, progress);
        Ok(self.current)
    }

    pub fn is_complete(&self) -> bool {
        self.elapsed >= self.span
    }

    pub fn value(&self) -> T {
        self.current
    }

    pub fn target(&self) -> T {
        self.final_value
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Duration in effect for the current run.
    pub fn duration(&self) -> f32 {
        self.span
    }
}

fn validate_duration(duration: f32) -> Result<()> {
    if duration >= 0.0 {
        Ok(())
    } else {
        Err(ChromaError::InvalidInput("animation duration must be >= 0"))
    }
}
