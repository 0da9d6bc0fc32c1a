//! Dynamics compressor.
//!
//! Feed-forward design with threshold, ratio, knee, attack and release,
//! modeled on the browser DynamicsCompressorNode: stereo-linked peak
//! detection and automatic makeup gain derived from the static curve.

/// A stereo dynamics compressor.
#[derive(Debug, Clone)]
pub struct Compressor {
    sample_rate: f64,

    /// Threshold in dB.
    pub threshold: f64,
    /// Compression ratio (e.g. 4.0 = 4:1).
    pub ratio: f64,
    /// Knee width in dB (0 = hard knee).
    pub knee: f64,
    /// Attack time in seconds.
    pub attack: f64,
    /// Release time in seconds.
    pub release: f64,

    envelope: f64,
    reduction_db: f64,
}

impl Compressor {
    /// Browser defaults: -24 dB, 12:1, 30 dB knee, 3 ms / 250 ms.
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            threshold: -24.0,
            ratio: 12.0,
            knee: 30.0,
            attack: 0.003,
            release: 0.25,
            envelope: 0.0,
            reduction_db: 0.0,
        }
    }

    /// Set all parameters, clamped to the browser node's ranges.
    pub fn set_params(&mut self, threshold: f64, knee: f64, ratio: f64, attack: f64, release: f64) {
        self.threshold = threshold.clamp(-100.0, 0.0);
        self.knee = knee.clamp(0.0, 40.0);
        self.ratio = ratio.clamp(1.0, 20.0);
        self.attack = attack.clamp(0.0, 1.0);
        self.release = release.clamp(0.0, 1.0);
    }

    #[inline]
    fn linear_to_db(linear: f64) -> f64 {
        if linear <= 0.0 {
            -120.0
        } else {
            20.0 * linear.log10()
        }
    }

    #[inline]
    fn db_to_linear(db: f64) -> f64 {
        10.0_f64.powf(db / 20.0)
    }

    /// Gain change in dB (zero or negative) for an input level in dB.
    #[inline]
    fn compute_gain(&self, input_db: f64) -> f64 {
        let threshold = self.threshold;
        let slope = 1.0 - 1.0 / self.ratio;
        let knee = self.knee;

        if knee <= 0.0 {
            if input_db <= threshold {
                0.0
            } else {
                (threshold - input_db) * slope
            }
        } else {
            let half_knee = knee / 2.0;
            let knee_start = threshold - half_knee;
            let knee_end = threshold + half_knee;

            if input_db <= knee_start {
                0.0
            } else if input_db >= knee_end {
                (threshold - input_db) * slope
            } else {
                // Quadratic transition through the knee.
                let x = input_db - knee_start;
                -slope * x * x / (2.0 * knee)
            }
        }
    }

    /// Makeup gain in dB restoring part of the reduction at full scale.
    fn makeup_db(&self) -> f64 {
        -0.6 * self.compute_gain(0.0)
    }

    /// Time coefficient for a smoothing period; zero means instantaneous.
    #[inline]
    fn coefficient(&self, seconds: f64) -> f64 {
        if seconds <= 0.0 {
            0.0
        } else {
            (-1.0 / (seconds * self.sample_rate)).exp()
        }
    }

    /// Process a stereo sample pair.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let input_level = left.abs().max(right.abs()) as f64;

        let coef = if input_level > self.envelope {
            self.coefficient(self.attack)
        } else {
            self.coefficient(self.release)
        };
        self.envelope = coef * self.envelope + (1.0 - coef) * input_level;

        let envelope_db = Self::linear_to_db(self.envelope);
        self.reduction_db = self.compute_gain(envelope_db);
        let gain = Self::db_to_linear(self.reduction_db + self.makeup_db()) as f32;

        (left * gain, right * gain)
    }

    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for i in 0..left.len().min(right.len()) {
            let (out_l, out_r) = self.process(left[i], right[i]);
            left[i] = out_l;
            right[i] = out_r;
        }
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
        self.reduction_db = 0.0;
    }

    /// Current gain reduction in dB (positive number, for metering).
    pub fn gain_reduction(&self) -> f64 {
        -self.reduction_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hard(threshold: f64, ratio: f64) -> Compressor {
        let mut comp = Compressor::new(44100.0);
        comp.set_params(threshold, 0.0, ratio, 0.001, 0.1);
        comp
    }

    #[test]
    fn quiet_signal_passes_with_makeup_only() {
        let mut comp = hard(-20.0, 4.0);
        let makeup = Compressor::db_to_linear(comp.makeup_db()) as f32;
        for _ in 0..1000 {
            comp.process(0.05, 0.05);
        }
        let (out_l, out_r) = comp.process(0.05, 0.05);
        assert!((out_l - 0.05 * makeup).abs() < 1e-4, "got {out_l}");
        assert_eq!(out_l, out_r);
        assert!(comp.gain_reduction().abs() < 1e-9);
    }

    #[test]
    fn loud_signal_is_reduced() {
        let mut comp = hard(-12.0, 4.0);
        for _ in 0..5000 {
            comp.process(1.0, 1.0);
        }
        // 12 dB over at 4:1 leaves 3 dB over: 9 dB of reduction.
        assert!((comp.gain_reduction() - 9.0).abs() < 0.1, "got {}", comp.gain_reduction());
    }

    #[test]
    fn attack_ramps_in() {
        let mut comp = Compressor::new(44100.0);
        comp.set_params(-20.0, 0.0, 10.0, 0.01, 0.5);
        let (first, _) = comp.process(1.0, 1.0);
        for _ in 0..500 {
            comp.process(1.0, 1.0);
        }
        let (later, _) = comp.process(1.0, 1.0);
        assert!(first > later, "first={first}, later={later}");
    }

    #[test]
    fn release_recovers() {
        let mut comp = Compressor::new(44100.0);
        comp.set_params(-20.0, 0.0, 10.0, 0.001, 0.05);
        for _ in 0..1000 {
            comp.process(1.0, 1.0);
        }
        let (compressed, _) = comp.process(0.1, 0.1);
        for _ in 0..5000 {
            comp.process(0.1, 0.1);
        }
        let (released, _) = comp.process(0.1, 0.1);
        assert!(released > compressed, "compressed={compressed}, released={released}");
    }

    #[test]
    fn soft_knee_is_continuous() {
        let mut comp = Compressor::new(44100.0);
        comp.set_params(-24.0, 30.0, 12.0, 0.003, 0.25);
        let below = comp.compute_gain(-39.0);
        let above = comp.compute_gain(-9.0001);
        let edge = comp.compute_gain(-9.0);
        assert_eq!(below, 0.0);
        assert!((above - edge).abs() < 1e-3);
    }

    #[test]
    fn params_are_clamped() {
        let mut comp = Compressor::new(48000.0);
        comp.set_params(10.0, 80.0, 0.5, 3.0, -1.0);
        assert_eq!(comp.threshold, 0.0);
        assert_eq!(comp.knee, 40.0);
        assert_eq!(comp.ratio, 1.0);
        assert_eq!(comp.attack, 1.0);
        assert_eq!(comp.release, 0.0);
    }
}
