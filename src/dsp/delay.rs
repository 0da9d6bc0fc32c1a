//! Stereo delay line with fractional, per-sample variable read position.

/// A stereo circular delay buffer.
///
/// The line holds up to `max_delay_seconds` of audio. The delay time is
/// supplied per sample, so it can be swept by a modulation source without
/// zipper noise (reads are linearly interpolated).
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
    sample_rate: f64,
    max_delay: f64,
}

impl DelayLine {
    pub fn new(sample_rate: f64, max_delay_seconds: f64) -> Self {
        let max_delay = max_delay_seconds.max(0.0);
        // One extra frame for the interpolation neighbour.
        let buffer_size = (sample_rate * max_delay).ceil() as usize + 2;
        DelayLine {
            buffer_l: vec![0.0; buffer_size],
            buffer_r: vec![0.0; buffer_size],
            write_pos: 0,
            sample_rate,
            max_delay,
        }
    }

    pub fn max_delay(&self) -> f64 {
        self.max_delay
    }

    /// Read from the buffer `delay_samples` behind the last written frame.
    #[inline]
    fn read_interpolated(buffer: &[f32], write_pos: usize, delay_samples: f64) -> f32 {
        let buffer_len = buffer.len();
        let delay_int = delay_samples as usize;
        let frac = (delay_samples - delay_int as f64) as f32;

        let read_pos_0 = if write_pos >= delay_int {
            write_pos - delay_int
        } else {
            buffer_len - (delay_int - write_pos)
        };
        let read_pos_1 = if read_pos_0 == 0 {
            buffer_len - 1
        } else {
            read_pos_0 - 1
        };

        let s0 = buffer[read_pos_0];
        let s1 = buffer[read_pos_1];
        s0 + frac * (s1 - s0)
    }

    /// Push one stereo frame and return the frame `delay_seconds` old.
    /// The delay is clamped to `[0, max_delay]`; zero passes the input through.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32, delay_seconds: f64) -> (f32, f32) {
        self.buffer_l[self.write_pos] = left;
        self.buffer_r[self.write_pos] = right;

        let delay_samples = (delay_seconds.clamp(0.0, self.max_delay) * self.sample_rate)
            .min((self.buffer_l.len() - 2) as f64);
        let out_l = Self::read_interpolated(&self.buffer_l, self.write_pos, delay_samples);
        let out_r = Self::read_interpolated(&self.buffer_r, self.write_pos, delay_samples);

        self.write_pos = (self.write_pos + 1) % self.buffer_l.len();
        (out_l, out_r)
    }

    /// Process a block in place with a per-sample delay time.
    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32], delay_seconds: &[f32]) {
        let n = left.len().min(right.len()).min(delay_seconds.len());
        for i in 0..n {
            let (l, r) = self.process(left[i], right[i], delay_seconds[i] as f64);
            left[i] = l;
            right[i] = r;
        }
    }

    pub fn clear(&mut self) {
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.write_pos = 0;
    }
}
