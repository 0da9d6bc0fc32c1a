//! Time-based effects: feedback delay, convolution reverb, shimmer.

use std::sync::Arc;

use crate::dsp::convolver::ImpulseResponse;
use crate::dsp::filter::FilterType;
use crate::dsp::oscillator::Waveform;
use crate::error::GraphError;
use crate::graph::{AudioGraph, NodeId, ParamKind};
use crate::params::{EffectKind, ParamReader, ParameterSet, SHIMMER_PITCHES};

use super::{BuildOptions, DryWet, EffectTopology, SMOOTHING, connect_series};

const MAX_DELAY_SECONDS: f64 = 5.0;
const MAX_PRE_DELAY_SECONDS: f64 = 1.0;
const MAX_SHIMMER_DELAY_SECONDS: f64 = 0.5;

/// Envelope exponent of generated impulse responses.
const IR_DECAY_RATE: f64 = 2.0;

const SHIMMER_TIME_CONSTANT: f64 = 0.02;
const SHIMMER_LFO_DEPTH: f32 = 0.005;
const SHIMMER_FEEDBACK_RATIO: f64 = 0.6;

/// Regenerates a convolver's impulse response when the requested decay
/// moves to a different tenth of a second.
struct ImpulseCache {
    convolver: NodeId,
    seed: Option<u64>,
    decay_tenths: Option<i64>,
}

impl ImpulseCache {
    fn new(convolver: NodeId, options: &BuildOptions) -> Self {
        ImpulseCache {
            convolver,
            seed: options.noise_seed,
            decay_tenths: None,
        }
    }

    fn set_decay(&mut self, graph: &mut AudioGraph, decay: f64) -> Result<(), GraphError> {
        let tenths = (decay * 10.0).round() as i64;
        if self.decay_tenths == Some(tenths) {
            return Ok(());
        }
        log::debug!("generating {decay:.1}s impulse response");
        let ir = ImpulseResponse::generate(decay, IR_DECAY_RATE, graph.sample_rate(), self.seed);
        graph.set_impulse_response(self.convolver, Some(Arc::new(ir)))?;
        self.decay_tenths = Some(tenths);
        Ok(())
    }
}

// ── Delay ───────────────────────────────────────────────────

/// `input -> wet -> delay <-> feedback`, the delay feeding the output
/// directly, plus a dry path.
struct Delay {
    input: NodeId,
    output: NodeId,
    delay: NodeId,
    feedback: NodeId,
    mix: DryWet,
}

pub(super) fn delay(graph: &mut AudioGraph, _: &BuildOptions) -> Result<Box<dyn EffectTopology>, GraphError> {
    let input = graph.add_gain(1.0);
    let output = graph.add_gain(1.0);
    let mix = DryWet::new(graph, input, output)?;
    let delay = graph.add_delay(MAX_DELAY_SECONDS);
    let feedback = graph.add_gain(0.0);
    connect_series(graph, &[input, mix.wet, delay, output])?;
    graph.connect(delay, feedback)?;
    graph.connect(feedback, delay)?;
    Ok(Box::new(Delay {
        input,
        output,
        delay,
        feedback,
        mix,
    }))
}

impl EffectTopology for Delay {
    fn input(&self) -> NodeId {
        self.input
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn update(&mut self, graph: &mut AudioGraph, params: &ParameterSet) -> Result<(), GraphError> {
        let p = ParamReader::new(EffectKind::Delay, params);
        graph.set_target(self.delay, ParamKind::DelayTime, p.num("time") as f32, SMOOTHING)?;
        graph.set_target(self.feedback, ParamKind::Gain, p.num("feedback") as f32, SMOOTHING)?;
        self.mix.set_mix(graph, p.num("mix"), SMOOTHING)
    }

    fn nodes(&self) -> Vec<NodeId> {
        vec![
            self.input,
            self.output,
            self.mix.dry,
            self.mix.wet,
            self.delay,
            self.feedback,
        ]
    }
}

// ── Reverb ──────────────────────────────────────────────────

/// `input -> pre-delay -> convolver -> wet`, plus a dry path.
struct Reverb {
    input: NodeId,
    output: NodeId,
    pre_delay: NodeId,
    convolver: NodeId,
    mix: DryWet,
    impulse: ImpulseCache,
}

pub(super) fn reverb(graph: &mut AudioGraph, options: &BuildOptions) -> Result<Box<dyn EffectTopology>, GraphError> {
    let input = graph.add_gain(1.0);
    let output = graph.add_gain(1.0);
    let mix = DryWet::new(graph, input, output)?;
    let pre_delay = graph.add_delay(MAX_PRE_DELAY_SECONDS);
    let convolver = graph.add_convolver();
    connect_series(graph, &[input, pre_delay, convolver, mix.wet, output])?;
    Ok(Box::new(Reverb {
        input,
        output,
        pre_delay,
        convolver,
        mix,
        impulse: ImpulseCache::new(convolver, options),
    }))
}

impl EffectTopology for Reverb {
    fn input(&self) -> NodeId {
        self.input
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn update(&mut self, graph: &mut AudioGraph, params: &ParameterSet) -> Result<(), GraphError> {
        let p = ParamReader::new(EffectKind::Reverb, params);
        self.mix.set_mix(graph, p.num("mix"), SMOOTHING)?;
        let pre_delay = p.num("preDelay") / 1000.0;
        graph.set_target(self.pre_delay, ParamKind::DelayTime, pre_delay as f32, SMOOTHING)?;
        self.impulse.set_decay(graph, p.num("decay"))
    }

    fn nodes(&self) -> Vec<NodeId> {
        vec![
            self.input,
            self.output,
            self.mix.dry,
            self.mix.wet,
            self.pre_delay,
            self.convolver,
        ]
    }
}

// ── Ethereal shimmer ────────────────────────────────────────

/// Convolution decay feeding a short modulated feedback delay.
///
/// ```text
/// input -> convolver -> decay -> wet -> output
///                       decay -> panner -> delay -> feedback -> tone -> delay
///                                                   feedback -> decay
/// lfo -> lfo gain -> delay.delayTime
/// ```
struct Shimmer {
    input: NodeId,
    output: NodeId,
    mix: DryWet,
    convolver: NodeId,
    decay: NodeId,
    panner: NodeId,
    delay: NodeId,
    feedback: NodeId,
    lfo: NodeId,
    lfo_gain: NodeId,
    tone: NodeId,
    impulse: ImpulseCache,
}

/// LFO rate for a pitch choice: the interval in cents over 100.
fn shimmer_lfo_rate(pitch: &str) -> f32 {
    let cents = match SHIMMER_PITCHES.iter().position(|&p| p == pitch) {
        Some(1) => 2400.0,
        Some(2) => 500.0,
        _ => 1200.0,
    };
    cents / 100.0
}

pub(super) fn shimmer(graph: &mut AudioGraph, options: &BuildOptions) -> Result<Box<dyn EffectTopology>, GraphError> {
    let input = graph.add_gain(1.0);
    let output = graph.add_gain(1.0);
    let mix = DryWet::new(graph, input, output)?;
    let convolver = graph.add_convolver();
    let decay = graph.add_gain(1.0);
    let panner = graph.add_panner(0.0);
    let delay = graph.add_delay(MAX_SHIMMER_DELAY_SECONDS);
    let feedback = graph.add_gain(0.0);
    let lfo = graph.add_oscillator(Waveform::Sine, 12.0);
    let lfo_gain = graph.add_gain(0.0);
    let tone = graph.add_biquad(FilterType::Lowpass);

    connect_series(graph, &[input, convolver, decay, mix.wet, output])?;
    connect_series(graph, &[decay, panner, delay, feedback, tone, delay])?;
    graph.connect(feedback, decay)?;
    graph.connect(lfo, lfo_gain)?;
    graph.connect_param(lfo_gain, delay, ParamKind::DelayTime)?;

    Ok(Box::new(Shimmer {
        input,
        output,
        mix,
        convolver,
        decay,
        panner,
        delay,
        feedback,
        lfo,
        lfo_gain,
        tone,
        impulse: ImpulseCache::new(convolver, options),
    }))
}

impl EffectTopology for Shimmer {
    fn input(&self) -> NodeId {
        self.input
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn update(&mut self, graph: &mut AudioGraph, params: &ParameterSet) -> Result<(), GraphError> {
        let p = ParamReader::new(EffectKind::EtherealShimmer, params);
        self.mix.set_mix(graph, p.num("mix"), SHIMMER_TIME_CONSTANT)?;
        self.impulse.set_decay(graph, p.num("decay"))?;

        let amount = p.num("shimmer_amount");
        graph.set_target(self.decay, ParamKind::Gain, amount as f32, SHIMMER_TIME_CONSTANT)?;
        let feedback = SHIMMER_FEEDBACK_RATIO * amount;
        graph.set_target(self.feedback, ParamKind::Gain, feedback as f32, SHIMMER_TIME_CONSTANT)?;

        let rate = shimmer_lfo_rate(p.choice("shimmer_pitch"));
        graph.set_target(self.lfo, ParamKind::Frequency, rate, SHIMMER_TIME_CONSTANT)?;
        graph.set_target(self.lfo_gain, ParamKind::Gain, SHIMMER_LFO_DEPTH, SMOOTHING)?;
        graph.set_target(self.tone, ParamKind::Frequency, p.num("tone") as f32, SHIMMER_TIME_CONSTANT)
    }

    fn nodes(&self) -> Vec<NodeId> {
        vec![
            self.input,
            self.output,
            self.mix.dry,
            self.mix.wet,
            self.convolver,
            self.decay,
            self.panner,
            self.delay,
            self.feedback,
            self.lfo,
            self.lfo_gain,
            self.tone,
        ]
    }
}
