//! Biquad filter matching the browser BiquadFilterNode response types.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Filter response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
    Lowshelf,
    Highshelf,
    Peaking,
    Notch,
    Allpass,
}

impl FilterType {
    pub fn name(self) -> &'static str {
        match self {
            FilterType::Lowpass => "lowpass",
            FilterType::Highpass => "highpass",
            FilterType::Bandpass => "bandpass",
            FilterType::Lowshelf => "lowshelf",
            FilterType::Highshelf => "highshelf",
            FilterType::Peaking => "peaking",
            FilterType::Notch => "notch",
            FilterType::Allpass => "allpass",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "lowpass" => FilterType::Lowpass,
            "highpass" => FilterType::Highpass,
            "bandpass" => FilterType::Bandpass,
            "lowshelf" => FilterType::Lowshelf,
            "highshelf" => FilterType::Highshelf,
            "peaking" => FilterType::Peaking,
            "notch" => FilterType::Notch,
            "allpass" => FilterType::Allpass,
            _ => return None,
        })
    }

    /// Whether the gain parameter affects the response.
    pub fn uses_gain(self) -> bool {
        matches!(self, FilterType::Lowshelf | FilterType::Highshelf | FilterType::Peaking)
    }
}

/// Normalized biquad coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Coefficients {
    pub const IDENTITY: Coefficients = Coefficients {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Cookbook coefficients (Robert Bristow-Johnson). Shelves use slope 1.
    pub fn compute(filter_type: FilterType, frequency: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let nyquist = sample_rate / 2.0;
        let frequency = frequency.clamp(1.0, nyquist * 0.999);
        let q = q.max(1e-4);
        let w0 = 2.0 * PI * frequency / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);
        let a_lin = 10.0_f64.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::Lowpass => {
                let b1 = 1.0 - cos_w0;
                (b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            FilterType::Highpass => {
                let b0 = (1.0 + cos_w0) / 2.0;
                (b0, -(1.0 + cos_w0), b0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            FilterType::Bandpass => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha),
            FilterType::Notch => (1.0, -2.0 * cos_w0, 1.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha),
            FilterType::Allpass => (
                1.0 - alpha,
                -2.0 * cos_w0,
                1.0 + alpha,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterType::Peaking => (
                1.0 + alpha * a_lin,
                -2.0 * cos_w0,
                1.0 - alpha * a_lin,
                1.0 + alpha / a_lin,
                -2.0 * cos_w0,
                1.0 - alpha / a_lin,
            ),
            FilterType::Lowshelf => {
                let shelf_alpha = sin_w0 / 2.0 * 2.0_f64.sqrt();
                let k = 2.0 * a_lin.sqrt() * shelf_alpha;
                (
                    a_lin * ((a_lin + 1.0) - (a_lin - 1.0) * cos_w0 + k),
                    2.0 * a_lin * ((a_lin - 1.0) - (a_lin + 1.0) * cos_w0),
                    a_lin * ((a_lin + 1.0) - (a_lin - 1.0) * cos_w0 - k),
                    (a_lin + 1.0) + (a_lin - 1.0) * cos_w0 + k,
                    -2.0 * ((a_lin - 1.0) + (a_lin + 1.0) * cos_w0),
                    (a_lin + 1.0) + (a_lin - 1.0) * cos_w0 - k,
                )
            }
            FilterType::Highshelf => {
                let shelf_alpha = sin_w0 / 2.0 * 2.0_f64.sqrt();
                let k = 2.0 * a_lin.sqrt() * shelf_alpha;
                (
                    a_lin * ((a_lin + 1.0) + (a_lin - 1.0) * cos_w0 + k),
                    -2.0 * a_lin * ((a_lin - 1.0) + (a_lin + 1.0) * cos_w0),
                    a_lin * ((a_lin + 1.0) + (a_lin - 1.0) * cos_w0 - k),
                    (a_lin + 1.0) - (a_lin - 1.0) * cos_w0 + k,
                    2.0 * ((a_lin - 1.0) - (a_lin + 1.0) * cos_w0),
                    (a_lin + 1.0) - (a_lin - 1.0) * cos_w0 - k,
                )
            }
        };

        Coefficients {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Magnitude response at `frequency` (linear).
    pub fn magnitude_at(&self, frequency: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * frequency / sample_rate;
        let (cos1, sin1) = (w.cos(), w.sin());
        let (cos2, sin2) = ((2.0 * w).cos(), (2.0 * w).sin());
        let num_re = self.b0 + self.b1 * cos1 + self.b2 * cos2;
        let num_im = -(self.b1 * sin1 + self.b2 * sin2);
        let den_re = 1.0 + self.a1 * cos1 + self.a2 * cos2;
        let den_im = -(self.a1 * sin1 + self.a2 * sin2);
        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }
}

/// A stereo biquad IIR filter (2nd order).
///
/// Direct Form II Transposed, one state pair per channel. Coefficients are
/// recomputed only when a parameter actually changes.
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    pub filter_type: FilterType,
    frequency: f64,
    q: f64,
    gain_db: f64,
    coeffs: Coefficients,
    state: [[f64; 2]; 2],
    sample_rate: f64,
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType, sample_rate: f64) -> Self {
        let mut f = BiquadFilter {
            filter_type,
            frequency: 350.0,
            q: 1.0,
            gain_db: 0.0,
            coeffs: Coefficients::IDENTITY,
            state: [[0.0; 2]; 2],
            sample_rate,
        };
        f.update_coefficients();
        f
    }

    fn update_coefficients(&mut self) {
        self.coeffs = Coefficients::compute(
            self.filter_type,
            self.frequency,
            self.q,
            self.gain_db,
            self.sample_rate,
        );
    }

    /// Set all response parameters, recomputing coefficients on change.
    pub fn set_params(&mut self, filter_type: FilterType, frequency: f64, q: f64, gain_db: f64) {
        if filter_type != self.filter_type
            || frequency != self.frequency
            || q != self.q
            || gain_db != self.gain_db
        {
            self.filter_type = filter_type;
            self.frequency = frequency;
            self.q = q;
            self.gain_db = gain_db;
            self.update_coefficients();
        }
    }

    pub fn coefficients(&self) -> Coefficients {
        self.coeffs
    }

    /// Process one sample of `channel` (0 = left, 1 = right).
    #[inline]
    pub fn process(&mut self, channel: usize, input: f32) -> f32 {
        let c = &self.coeffs;
        let z = &mut self.state[channel & 1];
        let x = input as f64;
        let y = c.b0 * x + z[0];
        z[0] = c.b1 * x - c.a1 * y + z[1];
        z[1] = c.b2 * x - c.a2 * y;
        y as f32
    }

    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for s in left.iter_mut() {
            *s = self.process(0, *s);
        }
        for s in right.iter_mut() {
            *s = self.process(1, *s);
        }
    }

    pub fn reset(&mut self) {
        self.state = [[0.0; 2]; 2];
    }
}
