//! Transport state and clip scheduling arithmetic.
//!
//! Pure functions only; nothing here touches the graph.

use crate::project::Clip;

/// Where the transport is.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    /// Playing since context time `start_time`, which corresponds to
    /// timeline position `start_offset`.
    Playing { start_time: f64, start_offset: f64 },
    Paused { position: f64 },
}

impl TransportState {
    pub fn is_playing(&self) -> bool {
        matches!(self, TransportState::Playing { .. })
    }

    /// Timeline position at context time `now`.
    pub fn position(&self, now: f64) -> f64 {
        match *self {
            TransportState::Stopped => 0.0,
            TransportState::Playing {
                start_time,
                start_offset,
            } => compute_position(now, start_time, start_offset),
            TransportState::Paused { position } => position,
        }
    }
}

/// Timeline position after playing from `start_offset` since `start_time`.
pub fn compute_position(now: f64, start_time: f64, start_offset: f64) -> f64 {
    start_offset + (now - start_time)
}

/// Start position after loop normalization: outside an enabled loop,
/// playback starts at the loop start.
pub fn normalize_start(position: f64, loop_region: Option<(f64, f64)>) -> f64 {
    match loop_region {
        Some((start, end)) if position < start || position >= end => start,
        _ => position,
    }
}

/// One buffer-source playback event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipSchedule {
    /// Context time at which the source starts.
    pub play_at: f64,
    /// Seconds into the buffer where playback begins.
    pub offset: f64,
    /// Seconds of buffer to play.
    pub duration: f64,
}

impl ClipSchedule {
    /// Schedule `clip` for a session that started playing timeline
    /// position `start_offset` at context time `start_time`.
    ///
    /// Returns `None` when nothing of the clip window is left to play.
    pub fn compute(clip: &Clip, start_offset: f64, start_time: f64) -> Option<Self> {
        let skipped = (start_offset - clip.start).max(0.0);
        let schedule = ClipSchedule {
            play_at: start_time + (clip.start - start_offset).max(0.0),
            offset: clip.buffer_offset + skipped,
            duration: clip.duration - skipped,
        };
        if schedule.duration <= 0.0 || schedule.offset >= clip.buffer.duration() {
            return None;
        }
        Some(schedule)
    }
}
