//! Node processors of the audio graph.
//!
//! Every node renders one stereo block per render quantum. Audio inputs
//! arrive summed in `input`; signals connected to a parameter arrive in
//! [`Modulation`] and are added to that parameter's smoothed value.

use std::sync::Arc;

use crate::dsp::analyser::Analyser;
use crate::dsp::compressor::Compressor;
use crate::dsp::convolver::Convolver;
use crate::dsp::delay::DelayLine;
use crate::dsp::filter::{BiquadFilter, FilterType};
use crate::dsp::mixer;
use crate::dsp::oscillator::{Oscillator, Waveform};
use crate::dsp::param::AudioParam;
use crate::dsp::waveshaper::WaveShaper;
use crate::project::AudioBuffer;

/// Frames per processing block.
pub const RENDER_QUANTUM: usize = 128;

/// One stereo block of audio.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub left: [f32; RENDER_QUANTUM],
    pub right: [f32; RENDER_QUANTUM],
}

impl Default for Block {
    fn default() -> Self {
        Block::SILENT
    }
}

impl Block {
    pub const SILENT: Block = Block {
        left: [0.0; RENDER_QUANTUM],
        right: [0.0; RENDER_QUANTUM],
    };

    pub fn clear(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
    }

    pub fn add(&mut self, other: &Block) {
        mixer::accumulate(&mut self.left, &other.left);
        mixer::accumulate(&mut self.right, &other.right);
    }

    /// Add the mono down-mix of `other` into `out`.
    pub fn add_mono_into(&self, out: &mut [f32; RENDER_QUANTUM]) {
        for ((o, &l), &r) in out.iter_mut().zip(&self.left).zip(&self.right) {
            *o += 0.5 * (l + r);
        }
    }

    pub fn peak(&self) -> f32 {
        self.left
            .iter()
            .chain(&self.right)
            .fold(0.0, |m, s| m.max(s.abs()))
    }
}

/// Modulatable parameter slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Gain,
    Pan,
    Frequency,
    Q,
    FilterGain,
    DelayTime,
    Threshold,
    Knee,
    Ratio,
    Attack,
    Release,
}

impl ParamKind {
    pub fn name(self) -> &'static str {
        match self {
            ParamKind::Gain => "gain",
            ParamKind::Pan => "pan",
            ParamKind::Frequency => "frequency",
            ParamKind::Q => "Q",
            ParamKind::FilterGain => "filter gain",
            ParamKind::DelayTime => "delayTime",
            ParamKind::Threshold => "threshold",
            ParamKind::Knee => "knee",
            ParamKind::Ratio => "ratio",
            ParamKind::Attack => "attack",
            ParamKind::Release => "release",
        }
    }
}

/// Per-block timing handed to processors.
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext {
    pub sample_rate: f64,
    /// Absolute frame index of the first sample of this block.
    pub block_start: u64,
}

/// Summed modulation signals for one node, keyed by parameter.
pub struct Modulation<'a> {
    entries: &'a [(ParamKind, [f32; RENDER_QUANTUM])],
}

impl<'a> Modulation<'a> {
    pub fn new(entries: &'a [(ParamKind, [f32; RENDER_QUANTUM])]) -> Self {
        Modulation { entries }
    }

    pub fn get(&self, kind: ParamKind) -> Option<&'a [f32]> {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, signal)| &signal[..])
    }
}

// ── Node types ──────────────────────────────────────────────

pub struct GainNode {
    pub gain: AudioParam,
}

pub struct PannerNode {
    pub pan: AudioParam,
}

pub struct BiquadNode {
    pub filter_type: FilterType,
    pub frequency: AudioParam,
    pub q: AudioParam,
    pub gain: AudioParam,
    filter: BiquadFilter,
}

impl BiquadNode {
    /// Effective coefficients as of the last processed block.
    pub fn filter(&self) -> &BiquadFilter {
        &self.filter
    }
}

pub struct DelayNode {
    pub delay_time: AudioParam,
    line: DelayLine,
}

pub struct CompressorNode {
    pub threshold: AudioParam,
    pub knee: AudioParam,
    pub ratio: AudioParam,
    pub attack: AudioParam,
    pub release: AudioParam,
    compressor: Compressor,
}

impl CompressorNode {
    pub fn reduction_db(&self) -> f64 {
        self.compressor.gain_reduction()
    }
}

pub struct OscillatorNode {
    pub frequency: AudioParam,
    osc: Oscillator,
}

/// Plays a window of a shared audio buffer, once, from an absolute start
/// frame. Buffers at a different sample rate are resampled linearly.
pub struct BufferSource {
    buffer: Arc<AudioBuffer>,
    start_frame: Option<u64>,
    /// Offset into the buffer, in buffer frames.
    offset: f64,
    /// Playback length in context frames; `None` plays to the buffer end.
    duration: Option<u64>,
    stopped: bool,
    ended: bool,
}

impl BufferSource {
    pub fn is_started(&self) -> bool {
        self.start_frame.is_some()
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn start_frame(&self) -> Option<u64> {
        self.start_frame
    }

    pub fn buffer(&self) -> &Arc<AudioBuffer> {
        &self.buffer
    }

    pub(crate) fn start(&mut self, start_frame: u64, offset_seconds: f64, duration_frames: Option<u64>) {
        self.start_frame = Some(start_frame);
        self.offset = offset_seconds.max(0.0) * self.buffer.sample_rate as f64;
        self.duration = duration_frames;
    }

    pub(crate) fn stop(&mut self) {
        self.stopped = true;
        self.ended = true;
    }

    fn render(&mut self, ctx: &ProcessContext, out: &mut Block) {
        out.clear();
        let Some(start) = self.start_frame else {
            return;
        };
        if self.stopped {
            return;
        }
        let frames = self.buffer.frames() as f64;
        let ratio = self.buffer.sample_rate as f64 / ctx.sample_rate;
        for i in 0..RENDER_QUANTUM {
            let now = ctx.block_start + i as u64;
            if now < start {
                continue;
            }
            let elapsed = now - start;
            let position = self.offset + elapsed as f64 * ratio;
            if self.duration.is_some_and(|d| elapsed >= d) || position >= frames {
                self.ended = true;
                break;
            }
            out.left[i] = self.buffer.read_interpolated(0, position);
            out.right[i] = self.buffer.read_interpolated(1, position);
        }
    }
}

/// The processing behaviour of a graph node.
pub enum Processor {
    Gain(GainNode),
    Panner(PannerNode),
    Biquad(BiquadNode),
    Delay(DelayNode),
    Compressor(CompressorNode),
    Oscillator(OscillatorNode),
    WaveShaper(WaveShaper),
    Convolver(Box<Convolver>),
    Analyser(Box<Analyser>),
    Source(BufferSource),
    Destination,
}

impl Processor {
    pub fn gain(value: f32, sample_rate: f64) -> Self {
        Processor::Gain(GainNode {
            gain: AudioParam::new(value, sample_rate),
        })
    }

    pub fn panner(pan: f32, sample_rate: f64) -> Self {
        Processor::Panner(PannerNode {
            pan: AudioParam::new(pan, sample_rate).with_range(-1.0, 1.0),
        })
    }

    pub fn biquad(filter_type: FilterType, sample_rate: f64) -> Self {
        let nyquist = (sample_rate / 2.0) as f32;
        Processor::Biquad(BiquadNode {
            filter_type,
            frequency: AudioParam::new(350.0, sample_rate).with_range(0.0, nyquist),
            q: AudioParam::new(1.0, sample_rate).with_range(1e-4, 1000.0),
            gain: AudioParam::new(0.0, sample_rate).with_range(-100.0, 100.0),
            filter: BiquadFilter::new(filter_type, sample_rate),
        })
    }

    pub fn delay(max_delay_seconds: f64, sample_rate: f64) -> Self {
        Processor::Delay(DelayNode {
            delay_time: AudioParam::new(0.0, sample_rate).with_range(0.0, max_delay_seconds as f32),
            line: DelayLine::new(sample_rate, max_delay_seconds),
        })
    }

    pub fn compressor(sample_rate: f64) -> Self {
        let compressor = Compressor::new(sample_rate);
        Processor::Compressor(CompressorNode {
            threshold: AudioParam::new(compressor.threshold as f32, sample_rate).with_range(-100.0, 0.0),
            knee: AudioParam::new(compressor.knee as f32, sample_rate).with_range(0.0, 40.0),
            ratio: AudioParam::new(compressor.ratio as f32, sample_rate).with_range(1.0, 20.0),
            attack: AudioParam::new(compressor.attack as f32, sample_rate).with_range(0.0, 1.0),
            release: AudioParam::new(compressor.release as f32, sample_rate).with_range(0.0, 1.0),
            compressor,
        })
    }

    pub fn oscillator(waveform: Waveform, frequency: f32, sample_rate: f64) -> Self {
        let nyquist = (sample_rate / 2.0) as f32;
        Processor::Oscillator(OscillatorNode {
            frequency: AudioParam::new(frequency, sample_rate).with_range(-nyquist, nyquist),
            osc: Oscillator::new(waveform, sample_rate),
        })
    }

    pub fn buffer_source(buffer: Arc<AudioBuffer>) -> Self {
        Processor::Source(BufferSource {
            buffer,
            start_frame: None,
            offset: 0.0,
            duration: None,
            stopped: false,
            ended: false,
        })
    }

    /// Short type name for logs and errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Processor::Gain(_) => "gain",
            Processor::Panner(_) => "panner",
            Processor::Biquad(_) => "biquad",
            Processor::Delay(_) => "delay",
            Processor::Compressor(_) => "compressor",
            Processor::Oscillator(_) => "oscillator",
            Processor::WaveShaper(_) => "waveshaper",
            Processor::Convolver(_) => "convolver",
            Processor::Analyser(_) => "analyser",
            Processor::Source(_) => "buffer source",
            Processor::Destination => "destination",
        }
    }

    pub fn param_mut(&mut self, kind: ParamKind) -> Option<&mut AudioParam> {
        match (self, kind) {
            (Processor::Gain(n), ParamKind::Gain) => Some(&mut n.gain),
            (Processor::Panner(n), ParamKind::Pan) => Some(&mut n.pan),
            (Processor::Biquad(n), ParamKind::Frequency) => Some(&mut n.frequency),
            (Processor::Biquad(n), ParamKind::Q) => Some(&mut n.q),
            (Processor::Biquad(n), ParamKind::FilterGain) => Some(&mut n.gain),
            (Processor::Delay(n), ParamKind::DelayTime) => Some(&mut n.delay_time),
            (Processor::Compressor(n), ParamKind::Threshold) => Some(&mut n.threshold),
            (Processor::Compressor(n), ParamKind::Knee) => Some(&mut n.knee),
            (Processor::Compressor(n), ParamKind::Ratio) => Some(&mut n.ratio),
            (Processor::Compressor(n), ParamKind::Attack) => Some(&mut n.attack),
            (Processor::Compressor(n), ParamKind::Release) => Some(&mut n.release),
            (Processor::Oscillator(n), ParamKind::Frequency) => Some(&mut n.frequency),
            _ => None,
        }
    }

    pub fn has_param(&mut self, kind: ParamKind) -> bool {
        self.param_mut(kind).is_some()
    }

    /// Finish every parameter ramp in progress.
    pub fn snap_params(&mut self) {
        let params: Vec<&mut AudioParam> = match self {
            Processor::Gain(n) => vec![&mut n.gain],
            Processor::Panner(n) => vec![&mut n.pan],
            Processor::Biquad(n) => vec![&mut n.frequency, &mut n.q, &mut n.gain],
            Processor::Delay(n) => vec![&mut n.delay_time],
            Processor::Compressor(n) => vec![
                &mut n.threshold,
                &mut n.knee,
                &mut n.ratio,
                &mut n.attack,
                &mut n.release,
            ],
            Processor::Oscillator(n) => vec![&mut n.frequency],
            _ => Vec::new(),
        };
        for p in params {
            p.snap();
        }
    }

    /// Render one block.
    pub fn process(&mut self, ctx: &ProcessContext, input: &Block, modulation: &Modulation, out: &mut Block) {
        let mut curve = [0.0f32; RENDER_QUANTUM];
        match self {
            Processor::Gain(n) => {
                n.gain.fill_block(modulation.get(ParamKind::Gain), &mut curve);
                out.clone_from(input);
                mixer::apply_gain(&mut out.left, &mut out.right, &curve);
            }
            Processor::Panner(n) => {
                n.pan.fill_block(modulation.get(ParamKind::Pan), &mut curve);
                out.clone_from(input);
                mixer::pan_block(&mut out.left, &mut out.right, &curve);
            }
            Processor::Biquad(n) => {
                let frequency = n.frequency.block_value(modulation.get(ParamKind::Frequency), RENDER_QUANTUM);
                let q = n.q.block_value(modulation.get(ParamKind::Q), RENDER_QUANTUM);
                let gain = n.gain.block_value(modulation.get(ParamKind::FilterGain), RENDER_QUANTUM);
                n.filter
                    .set_params(n.filter_type, frequency as f64, q as f64, gain as f64);
                out.clone_from(input);
                n.filter.process_block(&mut out.left, &mut out.right);
            }
            Processor::Delay(n) => {
                n.delay_time.fill_block(modulation.get(ParamKind::DelayTime), &mut curve);
                out.clone_from(input);
                n.line.process_block(&mut out.left, &mut out.right, &curve);
            }
            Processor::Compressor(n) => {
                let threshold = n.threshold.block_value(modulation.get(ParamKind::Threshold), RENDER_QUANTUM);
                let knee = n.knee.block_value(modulation.get(ParamKind::Knee), RENDER_QUANTUM);
                let ratio = n.ratio.block_value(modulation.get(ParamKind::Ratio), RENDER_QUANTUM);
                let attack = n.attack.block_value(modulation.get(ParamKind::Attack), RENDER_QUANTUM);
                let release = n.release.block_value(modulation.get(ParamKind::Release), RENDER_QUANTUM);
                n.compressor.set_params(
                    threshold as f64,
                    knee as f64,
                    ratio as f64,
                    attack as f64,
                    release as f64,
                );
                out.clone_from(input);
                n.compressor.process_block(&mut out.left, &mut out.right);
            }
            Processor::Oscillator(n) => {
                n.frequency.fill_block(modulation.get(ParamKind::Frequency), &mut curve);
                for (i, &f) in curve.iter().enumerate() {
                    let s = n.osc.next_sample(f as f64) as f32;
                    out.left[i] = s;
                    out.right[i] = s;
                }
            }
            Processor::WaveShaper(shaper) => {
                out.clone_from(input);
                shaper.process_block(&mut out.left, &mut out.right);
            }
            Processor::Convolver(conv) => {
                out.clone_from(input);
                conv.process_block(&mut out.left, &mut out.right);
            }
            Processor::Analyser(analyser) => {
                analyser.push_block(&input.left, &input.right);
                out.clone_from(input);
            }
            Processor::Source(source) => source.render(ctx, out),
            Processor::Destination => out.clone_from(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 1000.0;

    fn ctx(block_start: u64) -> ProcessContext {
        ProcessContext {
            sample_rate: SR,
            block_start,
        }
    }

    fn constant(value: f32) -> Block {
        Block {
            left: [value; RENDER_QUANTUM],
            right: [value; RENDER_QUANTUM],
        }
    }

    #[test]
    fn gain_scales_input() {
        let mut gain = Processor::gain(0.5, SR);
        let mut out = Block::default();
        gain.process(&ctx(0), &constant(1.0), &Modulation::new(&[]), &mut out);
        assert!(out.left.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn modulation_is_added_to_gain() {
        let mut gain = Processor::gain(0.0, SR);
        let entries = [(ParamKind::Gain, [0.25; RENDER_QUANTUM])];
        let mut out = Block::default();
        gain.process(&ctx(0), &constant(2.0), &Modulation::new(&entries), &mut out);
        assert!(out.right.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn source_starts_at_its_frame() {
        let buffer = Arc::new(AudioBuffer::new(1000, vec![vec![1.0; 500]]));
        let mut source = Processor::buffer_source(buffer);
        if let Processor::Source(s) = &mut source {
            s.start(10, 0.0, Some(5));
        }
        let mut out = Block::default();
        source.process(&ctx(0), &Block::SILENT, &Modulation::new(&[]), &mut out);
        assert_eq!(out.left[9], 0.0);
        assert_eq!(&out.left[10..15], &[1.0; 5]);
        assert_eq!(out.left[15], 0.0);
        match &source {
            Processor::Source(s) => assert!(s.has_ended()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn source_reads_from_offset_and_resamples() {
        let ramp: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let buffer = Arc::new(AudioBuffer::new(2000, vec![ramp]));
        let mut source = Processor::buffer_source(buffer);
        if let Processor::Source(s) = &mut source {
            // 0.1 s into a 2 kHz buffer = frame 200; two buffer frames per output frame.
            s.start(0, 0.1, None);
        }
        let mut out = Block::default();
        source.process(&ctx(0), &Block::SILENT, &Modulation::new(&[]), &mut out);
        assert_eq!(out.left[0], 200.0);
        assert_eq!(out.left[3], 206.0);
        assert_eq!(out.right[3], 206.0, "mono buffer feeds both channels");
    }

    #[test]
    fn stopped_source_is_silent() {
        let buffer = Arc::new(AudioBuffer::new(1000, vec![vec![1.0; 500]]));
        let mut source = Processor::buffer_source(buffer);
        if let Processor::Source(s) = &mut source {
            s.start(0, 0.0, None);
            s.stop();
        }
        let mut out = constant(3.0);
        source.process(&ctx(0), &Block::SILENT, &Modulation::new(&[]), &mut out);
        assert_eq!(out.peak(), 0.0);
    }

    #[test]
    fn params_exist_only_where_declared() {
        let mut biquad = Processor::biquad(FilterType::Peaking, SR);
        assert!(biquad.has_param(ParamKind::FilterGain));
        assert!(!biquad.has_param(ParamKind::DelayTime));
        let mut shaper = Processor::WaveShaper(WaveShaper::default());
        assert!(!shaper.has_param(ParamKind::Gain));
    }

    #[test]
    fn snap_finishes_every_ramp() {
        let mut comp = Processor::compressor(SR);
        for kind in [ParamKind::Threshold, ParamKind::Ratio] {
            if let Some(p) = comp.param_mut(kind) {
                p.set_target(-10.0, 1.0);
            }
        }
        comp.snap_params();
        assert_eq!(comp.param_mut(ParamKind::Threshold).map(|p| p.value()), Some(-10.0));
        assert_eq!(comp.param_mut(ParamKind::Ratio).map(|p| p.value()), Some(1.0));
    }
}
