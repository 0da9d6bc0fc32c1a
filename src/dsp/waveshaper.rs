//! Curve-lookup waveshaper and the distortion curve used by the
//! saturation and black hole effects.

use std::f64::consts::PI;
use std::sync::Arc;

/// Number of points in a generated distortion curve.
pub const CURVE_POINTS: usize = 44100;

/// Soft-clipping transfer curve for drive amount `k`:
/// `(3 + k) * x * 20deg / (PI + k * |x|)` sampled over `x` in `[-1, 1)`.
pub fn distortion_curve(k: f64) -> Arc<[f32]> {
    let deg = PI / 180.0;
    (0..CURVE_POINTS)
        .map(|i| {
            let x = i as f64 * 2.0 / CURVE_POINTS as f64 - 1.0;
            ((3.0 + k) * x * 20.0 * deg / (PI + k * x.abs())) as f32
        })
        .collect()
}

/// Maps each input sample through a transfer curve.
///
/// The curve spans inputs `[-1, 1]`; values between points are linearly
/// interpolated and inputs beyond the ends take the edge values. Without a
/// curve the signal passes unchanged.
#[derive(Debug, Clone, Default)]
pub struct WaveShaper {
    curve: Option<Arc<[f32]>>,
}

impl WaveShaper {
    pub fn new(curve: Option<Arc<[f32]>>) -> Self {
        WaveShaper { curve }
    }

    pub fn set_curve(&mut self, curve: Option<Arc<[f32]>>) {
        self.curve = curve;
    }

    pub fn curve(&self) -> Option<&Arc<[f32]>> {
        self.curve.as_ref()
    }

    #[inline]
    pub fn shape(&self, input: f32) -> f32 {
        let Some(curve) = &self.curve else {
            return input;
        };
        match curve.len() {
            0 => input,
            1 => curve[0],
            len => {
                let last = len - 1;
                let v = last as f32 * 0.5 * (input + 1.0);
                if v <= 0.0 {
                    curve[0]
                } else if v >= last as f32 {
                    curve[last]
                } else {
                    let k = v as usize;
                    let f = v - k as f32;
                    curve[k] * (1.0 - f) + curve[k + 1] * f
                }
            }
        }
    }

    pub fn process_block(&self, left: &mut [f32], right: &mut [f32]) {
        for s in left.iter_mut().chain(right.iter_mut()) {
            *s = self.shape(*s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_is_odd_and_bounded() {
        let curve = distortion_curve(50.0);
        assert_eq!(curve.len(), CURVE_POINTS);
        assert!((curve[CURVE_POINTS / 2]).abs() < 1e-6, "x = 0 maps to 0");
        assert!(curve.iter().all(|v| v.abs() <= 1.0));
        assert!(curve[0] < 0.0 && curve[CURVE_POINTS - 1] > 0.0);
    }

    #[test]
    fn no_curve_is_identity() {
        let shaper = WaveShaper::new(None);
        assert_eq!(shaper.shape(0.3), 0.3);
        assert_eq!(shaper.shape(-4.0), -4.0);
    }

    #[test]
    fn lookup_interpolates_and_clamps() {
        let shaper = WaveShaper::new(Some(Arc::from(vec![-1.0, 0.0, 1.0])));
        assert!((shaper.shape(0.5) - 0.5).abs() < 1e-6);
        assert_eq!(shaper.shape(2.0), 1.0);
        assert_eq!(shaper.shape(-2.0), -1.0);
    }

    #[test]
    fn more_drive_saturates_harder() {
        let soft = WaveShaper::new(Some(distortion_curve(5.0)));
        let hard = WaveShaper::new(Some(distortion_curve(100.0)));
        let ratio_soft = soft.shape(0.8) / soft.shape(0.1);
        let ratio_hard = hard.shape(0.8) / hard.shape(0.1);
        assert!(ratio_hard < ratio_soft, "hard={ratio_hard}, soft={ratio_soft}");
    }
}
