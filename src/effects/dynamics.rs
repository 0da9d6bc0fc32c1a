//! Dynamics and distortion: compressor, saturation, black hole voice.

use crate::dsp::filter::FilterType;
use crate::dsp::waveshaper::distortion_curve;
use crate::error::GraphError;
use crate::graph::{AudioGraph, NodeId, ParamKind};
use crate::params::{EffectKind, ParamReader, ParameterSet};

use super::{BuildOptions, DryWet, EffectTopology, SMOOTHING, connect_series};

const BLACK_HOLE_MIX_TIME_CONSTANT: f64 = 0.02;

// ── Compressor ──────────────────────────────────────────────

/// A bare dynamics compressor; input and output are the same node.
struct Compressor {
    node: NodeId,
}

pub(super) fn compressor(graph: &mut AudioGraph, _: &BuildOptions) -> Result<Box<dyn EffectTopology>, GraphError> {
    let node = graph.add_compressor();
    Ok(Box::new(Compressor { node }))
}

impl EffectTopology for Compressor {
    fn input(&self) -> NodeId {
        self.node
    }

    fn output(&self) -> NodeId {
        self.node
    }

    fn update(&mut self, graph: &mut AudioGraph, params: &ParameterSet) -> Result<(), GraphError> {
        let p = ParamReader::new(EffectKind::Compressor, params);
        for (id, kind) in [
            ("threshold", ParamKind::Threshold),
            ("knee", ParamKind::Knee),
            ("ratio", ParamKind::Ratio),
            ("attack", ParamKind::Attack),
            ("release", ParamKind::Release),
        ] {
            graph.set_target(self.node, kind, p.num(id) as f32, SMOOTHING)?;
        }
        Ok(())
    }

    fn nodes(&self) -> Vec<NodeId> {
        vec![self.node]
    }
}

// ── Saturation ──────────────────────────────────────────────

/// `input -> drive -> shaper -> tone lowpass -> wet`, plus a dry path.
struct Saturation {
    input: NodeId,
    output: NodeId,
    drive: NodeId,
    shaper: NodeId,
    tone: NodeId,
    mix: DryWet,
    /// Drive the current curve was computed for.
    curve_drive: Option<f64>,
}

pub(super) fn saturation(graph: &mut AudioGraph, _: &BuildOptions) -> Result<Box<dyn EffectTopology>, GraphError> {
    let input = graph.add_gain(1.0);
    let output = graph.add_gain(1.0);
    let mix = DryWet::new(graph, input, output)?;
    let drive = graph.add_gain(1.0);
    let shaper = graph.add_waveshaper();
    let tone = graph.add_biquad(FilterType::Lowpass);
    connect_series(graph, &[input, drive, shaper, tone, mix.wet, output])?;
    Ok(Box::new(Saturation {
        input,
        output,
        drive,
        shaper,
        tone,
        mix,
        curve_drive: None,
    }))
}

impl EffectTopology for Saturation {
    fn input(&self) -> NodeId {
        self.input
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn update(&mut self, graph: &mut AudioGraph, params: &ParameterSet) -> Result<(), GraphError> {
        let p = ParamReader::new(EffectKind::Saturation, params);
        let drive = p.num("drive");
        graph.set_target(self.drive, ParamKind::Gain, (drive / 10.0) as f32, SMOOTHING)?;
        if self.curve_drive != Some(drive) {
            graph.set_curve(self.shaper, Some(distortion_curve(drive)))?;
            self.curve_drive = Some(drive);
        }
        graph.set_target(self.tone, ParamKind::Frequency, p.num("tone") as f32, SMOOTHING)?;
        self.mix.set_mix(graph, p.num("mix"), SMOOTHING)
    }

    fn nodes(&self) -> Vec<NodeId> {
        vec![
            self.input,
            self.output,
            self.drive,
            self.shaper,
            self.tone,
            self.mix.dry,
            self.mix.wet,
        ]
    }
}

// ── Black hole voice ────────────────────────────────────────

/// Resonant peaking filter into a waveshaper whose curve follows the
/// "gravity" amount. Zero gravity removes the curve.
struct BlackHole {
    input: NodeId,
    output: NodeId,
    resonance: NodeId,
    shaper: NodeId,
    mix: DryWet,
    curve_gravity: Option<f64>,
}

pub(super) fn black_hole(graph: &mut AudioGraph, _: &BuildOptions) -> Result<Box<dyn EffectTopology>, GraphError> {
    let input = graph.add_gain(1.0);
    let output = graph.add_gain(1.0);
    let mix = DryWet::new(graph, input, output)?;
    let resonance = graph.add_biquad(FilterType::Peaking);
    let shaper = graph.add_waveshaper();
    connect_series(graph, &[input, resonance, shaper, mix.wet, output])?;
    Ok(Box::new(BlackHole {
        input,
        output,
        resonance,
        shaper,
        mix,
        curve_gravity: None,
    }))
}

impl EffectTopology for BlackHole {
    fn input(&self) -> NodeId {
        self.input
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn update(&mut self, graph: &mut AudioGraph, params: &ParameterSet) -> Result<(), GraphError> {
        let p = ParamReader::new(EffectKind::BlackHole, params);
        graph.set_target(self.resonance, ParamKind::Frequency, p.num("frequency") as f32, SMOOTHING)?;
        graph.set_target(self.resonance, ParamKind::Q, p.num("q") as f32, SMOOTHING)?;
        graph.set_target(self.resonance, ParamKind::FilterGain, p.num("gain") as f32, SMOOTHING)?;

        let gravity = p.num("gravity");
        if self.curve_gravity != Some(gravity) {
            let curve = (gravity != 0.0).then(|| distortion_curve(gravity));
            graph.set_curve(self.shaper, curve)?;
            self.curve_gravity = Some(gravity);
        }
        self.mix.set_mix(graph, p.num("mix"), BLACK_HOLE_MIX_TIME_CONSTANT)
    }

    fn nodes(&self) -> Vec<NodeId> {
        vec![
            self.input,
            self.output,
            self.resonance,
            self.shaper,
            self.mix.dry,
            self.mix.wet,
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::test_support::*;
    use super::*;

    fn shaper_of(graph: &AudioGraph, node: &super::super::EffectNode) -> NodeId {
        node.nodes()
            .into_iter()
            .find(|&id| graph.curve(id).is_ok())
            .expect("effect has a waveshaper")
    }

    #[test]
    fn compressor_is_a_single_node() {
        let mut params = EffectKind::Compressor.default_parameters();
        params.set_number("threshold", -30.0);
        params.set_number("ratio", 4.0);
        let (mut graph, node) = build_with(EffectKind::Compressor, params);
        assert_eq!(node.input(), node.output());
        assert_eq!(node.nodes().len(), 1);
        assert_eq!(graph.target(node.input(), ParamKind::Threshold), Ok(-30.0));
        assert_eq!(graph.target(node.input(), ParamKind::Ratio), Ok(4.0));
        assert_eq!(graph.target(node.input(), ParamKind::Knee), Ok(30.0));
    }

    #[test]
    fn saturation_recomputes_curve_only_when_drive_changes() {
        let (mut graph, mut node) = build(EffectKind::Saturation);
        let shaper = shaper_of(&graph, &node);
        let first = graph.curve(shaper).unwrap().expect("curve set");

        let mut params = EffectKind::Saturation.default_parameters();
        params.set_number("mix", 0.9);
        node.update(&mut graph, &params).unwrap();
        let same = graph.curve(shaper).unwrap().expect("curve set");
        assert!(Arc::ptr_eq(&first, &same));

        params.set_number("drive", 80.0);
        node.update(&mut graph, &params).unwrap();
        let changed = graph.curve(shaper).unwrap().expect("curve set");
        assert!(!Arc::ptr_eq(&first, &changed));
        assert_eq!(changed[..], distortion_curve(80.0)[..]);
    }

    #[test]
    fn saturation_drive_gain_is_a_tenth_of_drive() {
        let mut params = EffectKind::Saturation.default_parameters();
        params.set_number("drive", 40.0);
        let (mut graph, node) = build_with(EffectKind::Saturation, params);
        let drive = graph.outgoing(node.input()).map(|e| e.to).find(|&id| {
            graph.outgoing(id).any(|e| graph.curve(e.to).is_ok())
        });
        let drive = drive.expect("drive stage feeds the shaper");
        assert_eq!(graph.target(drive, ParamKind::Gain), Ok(4.0));
    }

    #[test]
    fn black_hole_without_gravity_has_no_curve() {
        let mut params = EffectKind::BlackHole.default_parameters();
        params.set_number("gravity", 0.0);
        let (mut graph, mut node) = build_with(EffectKind::BlackHole, params.clone());
        let shaper = shaper_of(&graph, &node);
        assert_eq!(graph.curve(shaper), Ok(None));

        params.set_number("gravity", 50.0);
        node.update(&mut graph, &params).unwrap();
        assert!(graph.curve(shaper).unwrap().is_some());
    }

    #[test]
    fn dry_mix_passes_input_unchanged() {
        let mut params = EffectKind::Saturation.default_parameters();
        params.set_number("mix", 0.0);
        let (mut graph, node) = build_with(EffectKind::Saturation, params);
        let out = render_dc(&mut graph, &node, 0.25, 4);
        assert!(out.left.iter().all(|&s| (s - 0.25).abs() < 1e-6), "got {}", out.left[0]);
    }
}
