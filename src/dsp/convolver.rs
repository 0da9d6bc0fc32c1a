//! Partitioned FFT convolution and procedural impulse responses.
//!
//! The convolver splits the impulse response into partitions the size of
//! one processing block and keeps a frequency-domain delay line of past
//! input spectra (uniformly partitioned overlap-save). Cost per block is one
//! forward and one inverse FFT per channel plus one complex multiply-add
//! per partition.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

/// Stereo impulse response.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    pub sample_rate: f64,
    pub channels: [Vec<f32>; 2],
}

impl ImpulseResponse {
    /// Exponentially decaying white noise: `noise * (1 - i/len)^decay_rate`
    /// over `duration` seconds. Non-positive durations fall back to 0.1 s.
    ///
    /// With a seed the noise is reproducible; without one it is drawn
    /// from system entropy.
    pub fn generate(duration: f64, decay_rate: f64, sample_rate: f64, seed: Option<u64>) -> Self {
        let duration = if duration.is_finite() && duration > 0.0 { duration } else { 0.1 };
        let len = ((sample_rate * duration) as usize).max(1);
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut left = Vec::with_capacity(len);
        let mut right = Vec::with_capacity(len);
        for i in 0..len {
            let envelope = (1.0 - i as f64 / len as f64).powf(decay_rate) as f32;
            left.push(rng.gen_range(-1.0f32..1.0) * envelope);
            right.push(rng.gen_range(-1.0f32..1.0) * envelope);
        }

        ImpulseResponse {
            sample_rate,
            channels: [left, right],
        }
    }

    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration(&self) -> f64 {
        self.len() as f64 / self.sample_rate
    }

    /// Loudness normalization matching the browser ConvolverNode: scale
    /// by the inverse RMS, calibrated to -58 dB at 44.1 kHz.
    pub fn normalization_scale(&self) -> f32 {
        const MIN_POWER: f64 = 0.000125;
        let gain_calibration = 10.0_f64.powf(-58.0 / 20.0);

        let total: f64 = self
            .channels
            .iter()
            .flat_map(|ch| ch.iter())
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        let count = (self.channels.len() * self.len()).max(1) as f64;
        let mut power = (total / count).sqrt();
        if !power.is_finite() || power < MIN_POWER {
            power = MIN_POWER;
        }
        (gain_calibration / power * 44100.0 / self.sample_rate) as f32
    }
}

/// Per-channel convolution state.
struct ChannelState {
    partitions: Vec<Vec<Complex<f32>>>,
    history: Vec<Vec<Complex<f32>>>,
    prev_input: Vec<f32>,
}

/// Stereo uniformly partitioned convolver with a fixed block size.
pub struct Convolver {
    block: usize,
    r2c: Arc<dyn RealToComplex<f32>>,
    c2r: Arc<dyn ComplexToReal<f32>>,
    channels: Vec<ChannelState>,
    head: usize,
    scale: f32,
    time_buf: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    accum: Vec<Complex<f32>>,
    response: Option<Arc<ImpulseResponse>>,
    revision: u64,
}

impl Convolver {
    pub fn new(block: usize) -> Self {
        let fft_len = block * 2;
        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(fft_len);
        let c2r = planner.plan_fft_inverse(fft_len);
        let spectrum = r2c.make_output_vec();
        let accum = r2c.make_output_vec();
        Convolver {
            block,
            r2c,
            c2r,
            channels: Vec::new(),
            head: 0,
            scale: 1.0,
            time_buf: vec![0.0; fft_len],
            spectrum,
            accum,
            response: None,
            revision: 0,
        }
    }

    /// Install a new impulse response and clear the convolution history.
    pub fn set_response(&mut self, response: Option<Arc<ImpulseResponse>>) {
        self.channels.clear();
        self.head = 0;
        self.revision += 1;

        if let Some(ir) = &response {
            self.scale = ir.normalization_scale();
            let fft_len = self.block * 2;
            let bins = fft_len / 2 + 1;
            let count = ir.len().div_ceil(self.block).max(1);
            for data in &ir.channels {
                let mut partitions = Vec::with_capacity(count);
                for p in 0..count {
                    let start = p * self.block;
                    let end = (start + self.block).min(data.len());
                    self.time_buf.fill(0.0);
                    if start < end {
                        self.time_buf[..end - start].copy_from_slice(&data[start..end]);
                    }
                    let mut spectrum = self.r2c.make_output_vec();
                    if self.r2c.process(&mut self.time_buf, &mut spectrum).is_err() {
                        log::warn!("impulse response partition {p} could not be transformed");
                    }
                    partitions.push(spectrum);
                }
                self.channels.push(ChannelState {
                    partitions,
                    history: vec![vec![Complex::new(0.0, 0.0); bins]; count],
                    prev_input: vec![0.0; self.block],
                });
            }
        }
        self.response = response;
    }

    pub fn response(&self) -> Option<&Arc<ImpulseResponse>> {
        self.response.as_ref()
    }

    /// Incremented on every `set_response` call.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Convolve one block in place. Slices must be exactly one block long.
    /// Without an impulse response the output is silent.
    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        if self.channels.is_empty() {
            left.fill(0.0);
            right.fill(0.0);
            return;
        }
        let block = self.block;
        let count = self.channels[0].partitions.len();
        self.head = (self.head + 1) % count;
        let norm = self.scale / (2 * block) as f32;

        for (ch, samples) in [left, right].into_iter().enumerate() {
            let state = &mut self.channels[ch];
            self.time_buf[..block].copy_from_slice(&state.prev_input);
            self.time_buf[block..].copy_from_slice(samples);
            state.prev_input.copy_from_slice(samples);

            if self.r2c.process(&mut self.time_buf, &mut self.spectrum).is_err() {
                log::debug!("forward transform failed");
            }
            state.history[self.head].copy_from_slice(&self.spectrum);

            self.accum.fill(Complex::new(0.0, 0.0));
            for (k, partition) in state.partitions.iter().enumerate() {
                let past = &state.history[(self.head + count - k) % count];
                for ((acc, x), h) in self.accum.iter_mut().zip(past).zip(partition) {
                    *acc += x * h;
                }
            }
            // DC and Nyquist bins of a real signal carry no imaginary part.
            let last = self.accum.len() - 1;
            self.accum[0].im = 0.0;
            self.accum[last].im = 0.0;

            if self.c2r.process(&mut self.accum, &mut self.time_buf).is_err() {
                log::debug!("inverse transform failed");
            }
            for (out, &y) in samples.iter_mut().zip(&self.time_buf[block..]) {
                *out = y * norm;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_convolution(x: &[f32], h: &[f32]) -> Vec<f32> {
        let mut y = vec![0.0; x.len()];
        for n in 0..x.len() {
            for (k, &hk) in h.iter().enumerate() {
                if n >= k {
                    y[n] += x[n - k] * hk;
                }
            }
        }
        y
    }

    #[test]
    fn matches_direct_convolution() {
        let block = 16;
        let h: Vec<f32> = (0..40).map(|i| ((i * 7 % 11) as f32 - 5.0) / 10.0).collect();
        let ir = Arc::new(ImpulseResponse {
            sample_rate: 44100.0,
            channels: [h.clone(), h.clone()],
        });
        let scale = ir.normalization_scale();
        let mut conv = Convolver::new(block);
        conv.set_response(Some(ir));

        let x: Vec<f32> = (0..128).map(|i| ((i * 13 % 17) as f32 - 8.0) / 8.0).collect();
        let expected = direct_convolution(&x, &h);

        let mut got = Vec::new();
        for chunk in x.chunks(block) {
            let mut l = chunk.to_vec();
            let mut r = chunk.to_vec();
            conv.process_block(&mut l, &mut r);
            got.extend(l);
        }
        for (i, (g, e)) in got.iter().zip(&expected).enumerate() {
            assert!((g - e * scale).abs() < 1e-4, "sample {i}: got {g}, expected {}", e * scale);
        }
    }

    #[test]
    fn silent_without_response() {
        let mut conv = Convolver::new(8);
        let mut l = vec![1.0; 8];
        let mut r = vec![1.0; 8];
        conv.process_block(&mut l, &mut r);
        assert!(l.iter().chain(&r).all(|&s| s == 0.0));
    }

    #[test]
    fn seeded_generation_is_reproducible() {
        let a = ImpulseResponse::generate(0.5, 2.0, 8000.0, Some(42));
        let b = ImpulseResponse::generate(0.5, 2.0, 8000.0, Some(42));
        let c = ImpulseResponse::generate(0.5, 2.0, 8000.0, Some(43));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 4000);
        assert!((a.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn response_decays() {
        let ir = ImpulseResponse::generate(1.0, 2.0, 8000.0, Some(1));
        let head: f32 = ir.channels[0][..800].iter().map(|s| s.abs()).sum();
        let tail: f32 = ir.channels[0][7200..].iter().map(|s| s.abs()).sum();
        assert!(tail < head * 0.05, "head={head}, tail={tail}");
    }

    #[test]
    fn invalid_duration_falls_back() {
        let ir = ImpulseResponse::generate(-1.0, 2.0, 1000.0, Some(0));
        assert_eq!(ir.len(), 100);
    }

    #[test]
    fn revision_counts_installs() {
        let mut conv = Convolver::new(8);
        assert_eq!(conv.revision(), 0);
        conv.set_response(Some(Arc::new(ImpulseResponse::generate(0.01, 2.0, 8000.0, Some(3)))));
        conv.set_response(None);
        assert_eq!(conv.revision(), 2);
        assert!(conv.response().is_none());
    }
}
