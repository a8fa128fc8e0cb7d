//! Exponential moving average over the per-frame "happy" confidence.

/// Default weight given to each new sample.
pub const DEFAULT_ALPHA: f32 = 0.1;

/// EMA-smoothed score in [0, 1].
///
/// Starts at 0 for every session. Only [`update`](Self::update) mutates it;
/// frames without a face leave it untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedScore {
    alpha: f32,
    value: f32,
}

impl SmoothedScore {
    /// Create a score with the given smoothing factor, clamped to (0, 1].
    pub fn new(alpha: f32) -> Self {
        let alpha = if alpha.is_finite() && alpha > 0.0 {
            alpha.min(1.0)
        } else {
            tracing::warn!(alpha, "invalid smoothing factor; using default");
            DEFAULT_ALPHA
        };
        Self { alpha, value: 0.0 }
    }

    /// Resume from an existing value (clamped to [0, 1]).
    pub fn with_value(mut self, value: f32) -> Self {
        self.value = value.clamp(0.0, 1.0);
        self
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    /// Fold one sample into the average and return the new value.
    ///
    /// Samples are clamped to [0, 1]; a non-finite sample is ignored.
    pub fn update(&mut self, sample: f32) -> f32 {
        if !sample.is_finite() {
            tracing::debug!(sample, "ignoring non-finite sample");
            return self.value;
        }
        let sample = sample.clamp(0.0, 1.0);
        self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
        self.value
    }
}

impl Default for SmoothedScore {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}
