//! Signal analysis tap: level meter and magnitude spectrum.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Spectrum smoothing between successive reads, as in the browser
/// AnalyserNode default.
pub const DEFAULT_SMOOTHING: f32 = 0.8;

/// Keeps the last `fft_size` mono samples passing through a tap.
pub struct Analyser {
    fft_size: usize,
    ring: Vec<f32>,
    write_pos: usize,
    smoothing: f32,
    smoothed: Vec<f32>,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl Analyser {
    /// `fft_size` is rounded up to a power of two (minimum 32).
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        // Blackman window.
        let n = fft_size as f32;
        let window = (0..fft_size)
            .map(|i| {
                let x = i as f32 / n;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();
        Analyser {
            fft_size,
            ring: vec![0.0; fft_size],
            write_pos: 0,
            smoothing: DEFAULT_SMOOTHING,
            smoothed: vec![0.0; fft_size / 2],
            window,
            fft,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = smoothing.clamp(0.0, 1.0);
    }

    /// Record a stereo block, down-mixed to mono.
    pub fn push_block(&mut self, left: &[f32], right: &[f32]) {
        for (&l, &r) in left.iter().zip(right) {
            self.ring[self.write_pos] = 0.5 * (l + r);
            self.write_pos = (self.write_pos + 1) % self.fft_size;
        }
    }

    /// The analysis window in time order, oldest first.
    pub fn time_domain(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.fft_size);
        out.extend_from_slice(&self.ring[self.write_pos..]);
        out.extend_from_slice(&self.ring[..self.write_pos]);
        out
    }

    pub fn peak(&self) -> f32 {
        self.ring.iter().fold(0.0, |m, s| m.max(s.abs()))
    }

    pub fn rms(&self) -> f32 {
        let sum: f32 = self.ring.iter().map(|s| s * s).sum();
        (sum / self.fft_size as f32).sqrt()
    }

    /// Smoothed magnitude spectrum in dB, `fft_size / 2` bins from DC.
    /// Each call folds the current window into the running average.
    pub fn frequency_data_db(&mut self) -> Vec<f32> {
        let mut buf: Vec<Complex<f32>> = self
            .time_domain()
            .iter()
            .zip(&self.window)
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut buf);

        let scale = 1.0 / self.fft_size as f32;
        for (avg, bin) in self.smoothed.iter_mut().zip(&buf) {
            let magnitude = bin.norm() * scale;
            *avg = self.smoothing * *avg + (1.0 - self.smoothing) * magnitude;
        }
        self.smoothed
            .iter()
            .map(|&m| if m > 0.0 { 20.0 * m.log10() } else { f32::NEG_INFINITY })
            .collect()
    }

    pub fn clear(&mut self) {
        self.ring.fill(0.0);
        self.smoothed.fill(0.0);
        self.write_pos = 0;
    }
}
