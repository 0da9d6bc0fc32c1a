//! Smoothed, modulatable node parameter.
//!
//! Value changes approach their target exponentially, the way
//! `setTargetAtTime` does in a browser audio graph: every sample moves the
//! current value a fixed fraction of the remaining distance. Modulation
//! signals connected to a parameter are added on top of the smoothed value.

/// Default ramp time constant in seconds.
pub const DEFAULT_TIME_CONSTANT: f64 = 0.01;

/// Distance below which a ramp is considered finished and snapped.
const SETTLE_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone)]
pub struct AudioParam {
    current: f32,
    target: f32,
    /// Per-sample approach factor, `1 - exp(-1 / (tau * sr))`.
    coeff: f32,
    sample_rate: f64,
    min: f32,
    max: f32,
}

impl AudioParam {
    pub fn new(initial: f32, sample_rate: f64) -> Self {
        AudioParam {
            current: initial,
            target: initial,
            coeff: 1.0,
            sample_rate,
            min: f32::MIN,
            max: f32::MAX,
        }
    }

    /// Clamp the effective (modulated) value to `[min, max]`.
    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self.current = self.current.clamp(min, max);
        self.target = self.target.clamp(min, max);
        self
    }

    /// Ramp toward `target` with time constant `time_constant` seconds.
    /// A non-positive time constant jumps immediately.
    pub fn set_target(&mut self, target: f32, time_constant: f64) {
        self.target = target.clamp(self.min, self.max);
        if time_constant <= 0.0 {
            self.current = self.target;
            self.coeff = 1.0;
        } else {
            self.coeff = (1.0 - (-1.0 / (time_constant * self.sample_rate)).exp()) as f32;
        }
    }

    /// Jump to `value` with no ramp.
    pub fn set_value(&mut self, value: f32) {
        self.target = value.clamp(self.min, self.max);
        self.current = self.target;
    }

    /// Finish any ramp in progress.
    pub fn snap(&mut self) {
        self.current = self.target;
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_smoothing(&self) -> bool {
        self.current != self.target
    }

    /// Advance one sample and return the smoothed value.
    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        if self.current != self.target {
            self.current += (self.target - self.current) * self.coeff;
            if (self.target - self.current).abs() < SETTLE_EPSILON {
                self.current = self.target;
            }
        }
        self.current
    }

    /// Fill `out` with the effective value for each sample of the block:
    /// smoothed base plus optional modulation, clamped to range.
    pub fn fill_block(&mut self, modulation: Option<&[f32]>, out: &mut [f32]) {
        for (i, slot) in out.iter_mut().enumerate() {
            let base = self.next_sample();
            let m = modulation.map_or(0.0, |m| m.get(i).copied().unwrap_or(0.0));
            *slot = (base + m).clamp(self.min, self.max);
        }
    }

    /// Advance over a block and return the effective value at its start.
    /// For parameters consumed once per block (filter coefficients).
    pub fn block_value(&mut self, modulation: Option<&[f32]>, frames: usize) -> f32 {
        let base = self.current;
        for _ in 0..frames {
            self.next_sample();
        }
        let m = modulation.and_then(|m| m.first().copied()).unwrap_or(0.0);
        (base + m).clamp(self.min, self.max)
    }
}
