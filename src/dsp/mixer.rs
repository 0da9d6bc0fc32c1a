//! Mixing primitives: gain staging and equal-power stereo panning.

use std::f32::consts::FRAC_PI_2;

/// Apply a per-sample gain curve to a stereo block.
pub fn apply_gain(left: &mut [f32], right: &mut [f32], gain: &[f32]) {
    for ((l, r), &g) in left.iter_mut().zip(right.iter_mut()).zip(gain) {
        *l *= g;
        *r *= g;
    }
}

/// Add `src` into `dst`.
pub fn accumulate(dst: &mut [f32], src: &[f32]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}

/// Equal-power stereo panner with the browser StereoPannerNode law for
/// stereo input: panning left folds part of the right channel into the
/// left, and vice versa. Centre leaves the signal untouched.
#[inline]
pub fn pan_stereo(left: f32, right: f32, pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    if pan <= 0.0 {
        let x = (pan + 1.0) * FRAC_PI_2;
        (left + right * x.cos(), right * x.sin())
    } else {
        let x = pan * FRAC_PI_2;
        (left * x.cos(), right + left * x.sin())
    }
}

pub fn pan_block(left: &mut [f32], right: &mut [f32], pan: &[f32]) {
    for ((l, r), &p) in left.iter_mut().zip(right.iter_mut()).zip(pan) {
        let (nl, nr) = pan_stereo(*l, *r, p);
        *l = nl;
        *r = nr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centre_is_transparent() {
        let (l, r) = pan_stereo(0.3, -0.7, 0.0);
        assert!((l - 0.3).abs() < 1e-6);
        assert!((r + 0.7).abs() < 1e-6);
    }

    #[test]
    fn hard_left_folds_right_channel() {
        let (l, r) = pan_stereo(0.25, 0.5, -1.0);
        assert!((l - 0.75).abs() < 1e-6, "got {l}");
        assert!(r.abs() < 1e-6);
    }

    #[test]
    fn hard_right_folds_left_channel() {
        let (l, r) = pan_stereo(0.25, 0.5, 1.0);
        assert!(l.abs() < 1e-6);
        assert!((r - 0.75).abs() < 1e-6, "got {r}");
    }

    #[test]
    fn gain_and_accumulate() {
        let mut l = [1.0, 1.0];
        let mut r = [2.0, 2.0];
        apply_gain(&mut l, &mut r, &[0.5, 0.0]);
        assert_eq!((l, r), ([0.5, 0.0], [1.0, 0.0]));
        accumulate(&mut l, &[0.25, 0.25]);
        assert_eq!(l, [0.75, 0.25]);
    }
}
