//! Metronome clicks.
//!
//! A click is a short sine burst with a 10 ms linear attack and an
//! exponential decay, rendered once into a buffer and played by a buffer
//! source on every beat. The first beat of each bar is pitched an octave
//! up.
//!
//! Beats are counted on the timeline, not from the play position: playing
//! from 1.2 s at 120 bpm clicks first at 1.5 s. The grid is re-anchored
//! every time playback starts, which covers seeks and loop restarts.

use std::sync::Arc;

use crate::dsp::oscillator::{Oscillator, Waveform};
use crate::project::AudioBuffer;

pub const BEAT_FREQUENCY: f64 = 440.0;
pub const ACCENT_FREQUENCY: f64 = 880.0;
pub const CLICK_GAIN: f64 = 0.7;
const CLICK_ATTACK: f64 = 0.01;
const CLICK_LENGTH: f64 = 0.05;
/// Envelope level at the end of the click.
const CLICK_FLOOR: f64 = 0.001;

/// How far ahead of the context clock clicks are scheduled when playback
/// starts or the host ticks.
pub const LOOKAHEAD: f64 = 0.1;

/// Render one click at `frequency`.
pub fn click_buffer(sample_rate: f64, frequency: f64) -> AudioBuffer {
    let frames = (CLICK_LENGTH * sample_rate).round() as usize;
    let decay = (CLICK_FLOOR / CLICK_GAIN).ln() / (CLICK_LENGTH - CLICK_ATTACK);
    let mut osc = Oscillator::new(Waveform::Sine, sample_rate);
    let samples = (0..frames)
        .map(|i| {
            let t = i as f64 / sample_rate;
            let envelope = if t < CLICK_ATTACK {
                CLICK_GAIN * t / CLICK_ATTACK
            } else {
                CLICK_GAIN * (decay * (t - CLICK_ATTACK)).exp()
            };
            (osc.next_sample(frequency) * envelope) as f32
        })
        .collect();
    AudioBuffer::new(sample_rate.round() as u32, vec![samples])
}

/// Beat positions of one playback run, mapped onto the context clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatGrid {
    seconds_per_beat: f64,
    start_time: f64,
    start_offset: f64,
    next_beat: u64,
    /// Beats at or past this timeline position are not clicked.
    end: f64,
}

impl BeatGrid {
    /// Grid for playback that started at context time `start_time` from
    /// timeline position `start_offset`.
    pub fn anchor(bpm: f64, start_time: f64, start_offset: f64, end: f64) -> Self {
        let seconds_per_beat = 60.0 / bpm;
        // A beat landing on the start position, up to rounding, is clicked.
        let next_beat = (start_offset / seconds_per_beat - 1e-9).ceil().max(0.0) as u64;
        BeatGrid {
            seconds_per_beat,
            start_time,
            start_offset,
            next_beat,
            end,
        }
    }

    pub fn position_of(&self, beat: u64) -> f64 {
        beat as f64 * self.seconds_per_beat
    }

    /// Context time at which `beat` sounds.
    pub fn time_of(&self, beat: u64) -> f64 {
        self.start_time + self.position_of(beat) - self.start_offset
    }

    pub fn next_beat(&self) -> u64 {
        self.next_beat
    }

    /// Beats due before context time `horizon`, with their start times.
    /// Each beat is returned once.
    pub fn take_due(&mut self, horizon: f64) -> Vec<(u64, f64)> {
        let mut due = Vec::new();
        while self.position_of(self.next_beat) < self.end && self.time_of(self.next_beat) < horizon {
            due.push((self.next_beat, self.time_of(self.next_beat)));
            self.next_beat += 1;
        }
        due
    }
}

/// Metronome switch, click sounds and the grid of the current run.
#[derive(Debug, Clone)]
pub struct Metronome {
    enabled: bool,
    beats_per_bar: u32,
    beat: Arc<AudioBuffer>,
    accent: Arc<AudioBuffer>,
    grid: Option<BeatGrid>,
}

impl Metronome {
    pub fn new(sample_rate: f64, beats_per_bar: u32, enabled: bool) -> Self {
        Metronome {
            enabled,
            beats_per_bar: beats_per_bar.max(1),
            beat: Arc::new(click_buffer(sample_rate, BEAT_FREQUENCY)),
            accent: Arc::new(click_buffer(sample_rate, ACCENT_FREQUENCY)),
            grid: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.grid = None;
        }
    }

    pub fn grid(&self) -> Option<&BeatGrid> {
        self.grid.as_ref()
    }

    /// Start counting beats for a new run. Ignored while disabled.
    pub fn anchor(&mut self, bpm: f64, start_time: f64, start_offset: f64, end: f64) {
        if self.enabled && bpm > 0.0 {
            self.grid = Some(BeatGrid::anchor(bpm, start_time, start_offset, end));
        }
    }

    pub fn clear(&mut self) {
        self.grid = None;
    }

    pub fn is_accent(&self, beat: u64) -> bool {
        beat % self.beats_per_bar as u64 == 0
    }

    /// Click sound for `beat`.
    pub fn click_for(&self, beat: u64) -> Arc<AudioBuffer> {
        if self.is_accent(beat) {
            Arc::clone(&self.accent)
        } else {
            Arc::clone(&self.beat)
        }
    }

    /// Beats due before `horizon`, with their click sounds.
    pub fn take_due(&mut self, horizon: f64) -> Vec<(f64, Arc<AudioBuffer>)> {
        let Some(grid) = self.grid.as_mut() else {
            return Vec::new();
        };
        grid.take_due(horizon)
            .into_iter()
            .map(|(beat, when)| (when, self.click_for(beat)))
            .collect()
    }
}
