//! LFO-driven effects: chorus, planetary phaser, infinite filter.

use crate::dsp::filter::FilterType;
use crate::dsp::oscillator::Waveform;
use crate::error::GraphError;
use crate::graph::{AudioGraph, NodeId, ParamKind};
use crate::params::{EffectKind, ParamReader, ParameterSet};

use super::{BuildOptions, DryWet, EffectTopology, SMOOTHING, connect_series};

const CHORUS_MAX_DELAY_SECONDS: f64 = 0.1;
/// Depth 1.0 sweeps the chorus delay by 10 ms either way.
const CHORUS_DEPTH_SCALE: f64 = 0.01;

const PHASER_STAGES: usize = 6;
const PHASER_TIME_CONSTANT: f64 = 0.02;

// ── Chorus ──────────────────────────────────────────────────

struct Chorus {
    input: NodeId,
    output: NodeId,
    mix: DryWet,
    delay: NodeId,
    lfo: NodeId,
    depth: NodeId,
}

pub(super) fn chorus(graph: &mut AudioGraph, _: &BuildOptions) -> Result<Box<dyn EffectTopology>, GraphError> {
    let input = graph.add_gain(1.0);
    let output = graph.add_gain(1.0);
    let mix = DryWet::new(graph, input, output)?;
    let delay = graph.add_delay(CHORUS_MAX_DELAY_SECONDS);
    let lfo = graph.add_oscillator(Waveform::Sine, 1.0);
    let depth = graph.add_gain(0.0);
    connect_series(graph, &[input, delay, mix.wet, output])?;
    graph.connect(lfo, depth)?;
    graph.connect_param(depth, delay, ParamKind::DelayTime)?;
    Ok(Box::new(Chorus {
        input,
        output,
        mix,
        delay,
        lfo,
        depth,
    }))
}

impl EffectTopology for Chorus {
    fn input(&self) -> NodeId {
        self.input
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn update(&mut self, graph: &mut AudioGraph, params: &ParameterSet) -> Result<(), GraphError> {
        let p = ParamReader::new(EffectKind::Chorus, params);
        graph.set_target(self.lfo, ParamKind::Frequency, p.num("rate") as f32, SMOOTHING)?;
        let depth = p.num("depth") * CHORUS_DEPTH_SCALE;
        graph.set_target(self.depth, ParamKind::Gain, depth as f32, SMOOTHING)?;
        graph.set_target(self.delay, ParamKind::DelayTime, p.num("delay") as f32, SMOOTHING)?;
        self.mix.set_mix(graph, p.num("mix"), SMOOTHING)
    }

    fn nodes(&self) -> Vec<NodeId> {
        vec![
            self.input,
            self.output,
            self.mix.dry,
            self.mix.wet,
            self.delay,
            self.lfo,
            self.depth,
        ]
    }
}

// ── Planetary phaser ────────────────────────────────────────

/// Six all-pass stages in series with feedback from the last stage to the
/// first. One LFO sweeps every stage around the base frequency.
struct Phaser {
    input: NodeId,
    output: NodeId,
    mix: DryWet,
    stages: Vec<NodeId>,
    feedback: NodeId,
    lfo: NodeId,
    lfo_depth: NodeId,
}

pub(super) fn phaser(graph: &mut AudioGraph, _: &BuildOptions) -> Result<Box<dyn EffectTopology>, GraphError> {
    let input = graph.add_gain(1.0);
    let output = graph.add_gain(1.0);
    let mix = DryWet::new(graph, input, output)?;
    let stages: Vec<NodeId> = (0..PHASER_STAGES)
        .map(|_| graph.add_biquad(FilterType::Allpass))
        .collect();
    let feedback = graph.add_gain(0.0);
    let lfo = graph.add_oscillator(Waveform::Sine, 1.0);
    let lfo_depth = graph.add_gain(0.0);

    let mut path = vec![input, mix.wet];
    path.extend(&stages);
    path.push(output);
    connect_series(graph, &path)?;
    let (first, last) = (stages[0], stages[PHASER_STAGES - 1]);
    graph.connect(last, feedback)?;
    graph.connect(feedback, first)?;
    graph.connect(lfo, lfo_depth)?;
    for &stage in &stages {
        graph.connect_param(lfo_depth, stage, ParamKind::Frequency)?;
    }

    Ok(Box::new(Phaser {
        input,
        output,
        mix,
        stages,
        feedback,
        lfo,
        lfo_depth,
    }))
}

impl EffectTopology for Phaser {
    fn input(&self) -> NodeId {
        self.input
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn update(&mut self, graph: &mut AudioGraph, params: &ParameterSet) -> Result<(), GraphError> {
        let p = ParamReader::new(EffectKind::PlanetaryPhaser, params);
        let base = p.num("baseFrequency");
        self.mix.set_mix(graph, p.num("mix"), PHASER_TIME_CONSTANT)?;
        graph.set_target(self.lfo, ParamKind::Frequency, p.num("rate") as f32, PHASER_TIME_CONSTANT)?;
        let sweep = p.num("depth") * base * 0.5;
        graph.set_target(self.lfo_depth, ParamKind::Gain, sweep as f32, PHASER_TIME_CONSTANT)?;
        for &stage in &self.stages {
            graph.set_target(stage, ParamKind::Frequency, base as f32, PHASER_TIME_CONSTANT)?;
        }
        graph.set_target(self.feedback, ParamKind::Gain, p.num("feedback") as f32, PHASER_TIME_CONSTANT)
    }

    fn nodes(&self) -> Vec<NodeId> {
        let mut nodes = vec![
            self.input,
            self.output,
            self.mix.dry,
            self.mix.wet,
            self.feedback,
            self.lfo,
            self.lfo_depth,
        ];
        nodes.extend(&self.stages);
        nodes
    }
}

// ── Infinite filter ─────────────────────────────────────────

/// One resonant filter whose cutoff is swept by an LFO.
struct InfiniteFilter {
    input: NodeId,
    output: NodeId,
    mix: DryWet,
    filter: NodeId,
    lfo: NodeId,
    lfo_depth: NodeId,
}

pub(super) fn infinite_filter(graph: &mut AudioGraph, _: &BuildOptions) -> Result<Box<dyn EffectTopology>, GraphError> {
    let input = graph.add_gain(1.0);
    let output = graph.add_gain(1.0);
    let mix = DryWet::new(graph, input, output)?;
    let filter = graph.add_biquad(FilterType::Lowpass);
    let lfo = graph.add_oscillator(Waveform::Sine, 1.0);
    let lfo_depth = graph.add_gain(0.0);
    connect_series(graph, &[input, filter, mix.wet, output])?;
    graph.connect(lfo, lfo_depth)?;
    graph.connect_param(lfo_depth, filter, ParamKind::Frequency)?;
    Ok(Box::new(InfiniteFilter {
        input,
        output,
        mix,
        filter,
        lfo,
        lfo_depth,
    }))
}

impl EffectTopology for InfiniteFilter {
    fn input(&self) -> NodeId {
        self.input
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn update(&mut self, graph: &mut AudioGraph, params: &ParameterSet) -> Result<(), GraphError> {
        let p = ParamReader::new(EffectKind::InfiniteFilter, params);
        graph.set_filter_type(self.filter, p.filter_type("type"))?;
        graph.set_target(self.filter, ParamKind::Q, p.num("q") as f32, SMOOTHING)?;
        graph.set_target(self.filter, ParamKind::Frequency, p.num("frequency") as f32, SMOOTHING)?;
        graph.set_target(self.lfo, ParamKind::Frequency, p.num("lfo_rate") as f32, SMOOTHING)?;
        graph.set_target(self.lfo_depth, ParamKind::Gain, p.num("lfo_depth") as f32, SMOOTHING)?;
        self.mix.set_mix(graph, p.num("mix"), SMOOTHING)
    }

    fn nodes(&self) -> Vec<NodeId> {
        vec![
            self.input,
            self.output,
            self.mix.dry,
            self.mix.wet,
            self.filter,
            self.lfo,
            self.lfo_depth,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::graph::Port;
    use crate::params::ParamValue;

    #[test]
    fn chorus_lfo_modulates_delay_time() {
        let mut params = EffectKind::Chorus.default_parameters();
        params.set_number("depth", 0.5);
        params.set_number("delay", 0.03);
        let (mut graph, node) = build_with(EffectKind::Chorus, params);
        let modulation: Vec<_> = graph
            .edges()
            .iter()
            .filter(|e| e.port == Port::Param(ParamKind::DelayTime))
            .copied()
            .collect();
        assert_eq!(modulation.len(), 1);
        assert_eq!(graph.target(modulation[0].from, ParamKind::Gain), Ok(0.005));
        assert_eq!(graph.target(modulation[0].to, ParamKind::DelayTime), Ok(0.03));
        assert!(node.nodes().contains(&modulation[0].to));
    }

    #[test]
    fn phaser_sweeps_every_stage() {
        let (mut graph, node) = build(EffectKind::PlanetaryPhaser);
        let swept: Vec<NodeId> = graph
            .edges()
            .iter()
            .filter(|e| e.port == Port::Param(ParamKind::Frequency))
            .map(|e| e.to)
            .collect();
        assert_eq!(swept.len(), PHASER_STAGES);
        for &stage in &swept {
            assert_eq!(graph.filter_type(stage), Ok(FilterType::Allpass));
            assert_eq!(graph.target(stage, ParamKind::Frequency), Ok(800.0));
        }
        // depth 0.7 * base 800 * 0.5
        let depth = graph
            .edges()
            .iter()
            .find(|e| e.port == Port::Param(ParamKind::Frequency))
            .map(|e| e.from)
            .expect("lfo depth");
        let sweep = graph.target(depth, ParamKind::Gain).unwrap();
        assert!((sweep - 280.0).abs() < 1e-3, "sweep {sweep}");

        let out = render_dc(&mut graph, &node, 0.5, 30);
        assert!(out.peak() < 4.0, "feedback stays bounded: {}", out.peak());
    }

    #[test]
    fn infinite_filter_type_is_selectable() {
        let mut params = EffectKind::InfiniteFilter.default_parameters();
        if let ParameterSet::Flat(map) = &mut params {
            map.insert("type".into(), ParamValue::Choice("notch".into()));
        }
        let (mut graph, mut node) = build_with(EffectKind::InfiniteFilter, params.clone());
        let filter = node
            .nodes()
            .into_iter()
            .find(|&id| graph.filter_type(id).is_ok())
            .expect("sweep filter");
        assert_eq!(graph.filter_type(filter), Ok(FilterType::Notch));

        // Unknown choices fall back to the default type.
        if let ParameterSet::Flat(map) = &mut params {
            map.insert("type".into(), ParamValue::Choice("comb".into()));
        }
        node.update(&mut graph, &params).unwrap();
        assert_eq!(graph.filter_type(filter), Ok(FilterType::Lowpass));
    }

    #[test]
    fn full_wet_filter_removes_dry_signal() {
        let (mut graph, node) = build(EffectKind::InfiniteFilter);
        let dry = node
            .nodes()
            .into_iter()
            .filter(|&id| graph.outgoing(id).any(|e| e.to == node.output()))
            .find(|&id| graph.incoming(id).any(|e| e.from == node.input()))
            .expect("dry gain");
        assert_eq!(graph.target(dry, ParamKind::Gain), Ok(0.0));
    }
}
