//! Equalizers: graphic, parametric and four-band precision EQ.

use crate::dsp::filter::FilterType;
use crate::error::GraphError;
use crate::graph::{AudioGraph, NodeId, ParamKind};
use crate::params::{
    Band, EffectKind, GRAPHIC_EQ_BANDS, GRAPHIC_EQ_GAIN_LIMIT, ParamReader, ParameterSet,
};

use super::{BuildOptions, EffectTopology, SMOOTHING, connect_series};

/// Fixed Q of the graphic EQ bands (one-third octave).
const GRAPHIC_EQ_Q: f32 = 4.31;
const GRAPHIC_EQ_TIME_CONSTANT: f64 = 0.015;

/// Resolution of the precision EQ spectrum tap.
pub const PRECISION_EQ_FFT_SIZE: usize = 2048;

// ── Graphic EQ ──────────────────────────────────────────────

struct GraphicEq {
    input: NodeId,
    output: NodeId,
    bands: Vec<NodeId>,
}

pub(super) fn graphic_eq(graph: &mut AudioGraph, _: &BuildOptions) -> Result<Box<dyn EffectTopology>, GraphError> {
    let input = graph.add_gain(1.0);
    let output = graph.add_gain(1.0);
    let mut bands = Vec::with_capacity(GRAPHIC_EQ_BANDS.len());
    for &(_, frequency) in &GRAPHIC_EQ_BANDS {
        let band = graph.add_biquad(FilterType::Peaking);
        graph.param(band, ParamKind::Frequency)?.set_value(frequency as f32);
        graph.param(band, ParamKind::Q)?.set_value(GRAPHIC_EQ_Q);
        bands.push(band);
    }

    let mut path = vec![input];
    path.extend(&bands);
    path.push(output);
    connect_series(graph, &path)?;
    Ok(Box::new(GraphicEq { input, output, bands }))
}

impl EffectTopology for GraphicEq {
    fn input(&self) -> NodeId {
        self.input
    }

    fn output(&self) -> NodeId {
        self.output
    }

    /// Bands missing from the set keep their current gain.
    fn update(&mut self, graph: &mut AudioGraph, params: &ParameterSet) -> Result<(), GraphError> {
        for (&band, &(id, _)) in self.bands.iter().zip(&GRAPHIC_EQ_BANDS) {
            if let Some(gain) = params.number(id) {
                let gain = gain.clamp(-GRAPHIC_EQ_GAIN_LIMIT, GRAPHIC_EQ_GAIN_LIMIT);
                graph.set_target(band, ParamKind::FilterGain, gain as f32, GRAPHIC_EQ_TIME_CONSTANT)?;
            }
        }
        Ok(())
    }

    fn nodes(&self) -> Vec<NodeId> {
        let mut nodes = vec![self.input, self.output];
        nodes.extend(&self.bands);
        nodes
    }
}

// ── Parametric EQ ───────────────────────────────────────────

/// A variable-length filter list. Changing the number of bands rewires
/// the chain; editing a band only retunes it.
struct ParametricEq {
    input: NodeId,
    output: NodeId,
    bands: Vec<NodeId>,
}

pub(super) fn parametric_eq(graph: &mut AudioGraph, _: &BuildOptions) -> Result<Box<dyn EffectTopology>, GraphError> {
    let input = graph.add_gain(1.0);
    let output = graph.add_gain(1.0);
    graph.connect(input, output)?;
    Ok(Box::new(ParametricEq {
        input,
        output,
        bands: Vec::new(),
    }))
}

impl ParametricEq {
    fn rewire(&mut self, graph: &mut AudioGraph, count: usize) -> Result<(), GraphError> {
        graph.disconnect(self.input)?;
        graph.dispose_all(self.bands.drain(..));
        for _ in 0..count {
            self.bands.push(graph.add_biquad(FilterType::Peaking));
        }
        let mut path = vec![self.input];
        path.extend(&self.bands);
        path.push(self.output);
        connect_series(graph, &path)
    }

    fn tune(graph: &mut AudioGraph, node: NodeId, band: &Band) -> Result<(), GraphError> {
        graph.set_filter_type(node, band.filter_type)?;
        graph.set_target(node, ParamKind::Frequency, band.freq as f32, SMOOTHING)?;
        graph.set_target(node, ParamKind::FilterGain, band.gain as f32, SMOOTHING)?;
        graph.set_target(node, ParamKind::Q, band.q as f32, SMOOTHING)
    }
}

impl EffectTopology for ParametricEq {
    fn input(&self) -> NodeId {
        self.input
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn update(&mut self, graph: &mut AudioGraph, params: &ParameterSet) -> Result<(), GraphError> {
        let Some(bands) = params.bands() else {
            log::warn!("{} expects a band list, ignoring update", EffectKind::ParametricEq);
            return Ok(());
        };
        let rebuilt = bands.len() != self.bands.len();
        if rebuilt {
            log::debug!("parametric EQ now has {} bands", bands.len());
            self.rewire(graph, bands.len())?;
        }
        for (&node, band) in self.bands.iter().zip(bands) {
            Self::tune(graph, node, band)?;
            if rebuilt {
                graph.snap_params(node)?;
            }
        }
        Ok(())
    }

    fn nodes(&self) -> Vec<NodeId> {
        let mut nodes = vec![self.input, self.output];
        nodes.extend(&self.bands);
        nodes
    }
}

// ── Precision EQ ────────────────────────────────────────────

/// Low shelf, two peaking mids and a high shelf, followed by a spectrum tap.
struct PrecisionEq {
    input: NodeId,
    output: NodeId,
    bands: [NodeId; 4],
    analyser: NodeId,
}

pub(super) fn precision_eq(graph: &mut AudioGraph, _: &BuildOptions) -> Result<Box<dyn EffectTopology>, GraphError> {
    let input = graph.add_gain(1.0);
    let output = graph.add_gain(1.0);
    let bands = [
        graph.add_biquad(FilterType::Lowshelf),
        graph.add_biquad(FilterType::Peaking),
        graph.add_biquad(FilterType::Peaking),
        graph.add_biquad(FilterType::Highshelf),
    ];
    let analyser = graph.add_analyser(PRECISION_EQ_FFT_SIZE);
    connect_series(graph, &[input, bands[0], bands[1], bands[2], bands[3], analyser, output])?;
    Ok(Box::new(PrecisionEq {
        input,
        output,
        bands,
        analyser,
    }))
}

impl EffectTopology for PrecisionEq {
    fn input(&self) -> NodeId {
        self.input
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn update(&mut self, graph: &mut AudioGraph, params: &ParameterSet) -> Result<(), GraphError> {
        let p = ParamReader::new(EffectKind::PrecisionEq, params);
        for (i, &band) in self.bands.iter().enumerate() {
            let n = i + 1;
            graph.set_filter_type(band, p.filter_type(&format!("band{n}_type")))?;
            graph.set_target(band, ParamKind::Frequency, p.num(&format!("band{n}_freq")) as f32, SMOOTHING)?;
            graph.set_target(band, ParamKind::FilterGain, p.num(&format!("band{n}_gain")) as f32, SMOOTHING)?;
            // Shelves keep their default Q.
            if n == 2 || n == 3 {
                graph.set_target(band, ParamKind::Q, p.num(&format!("band{n}_q")) as f32, SMOOTHING)?;
            }
        }
        Ok(())
    }

    fn nodes(&self) -> Vec<NodeId> {
        let mut nodes = vec![self.input, self.output, self.analyser];
        nodes.extend(self.bands);
        nodes
    }

    fn analyser(&self) -> Option<NodeId> {
        Some(self.analyser)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::graph::Processor;

    fn biquads_between(graph: &AudioGraph, input: NodeId, output: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = input;
        while current != output {
            let next = graph
                .outgoing(current)
                .next()
                .map(|e| e.to)
                .expect("chain is connected");
            if next != output {
                path.push(next);
            }
            current = next;
        }
        path
    }

    #[test]
    fn graphic_eq_bands_are_fixed_peaking_filters() {
        let mut params = EffectKind::GraphicEq.default_parameters();
        params.set_number("gain_1k", 6.0);
        let (mut graph, node) = build_with(EffectKind::GraphicEq, params);
        let chain = biquads_between(&graph, node.input(), node.output());
        assert_eq!(chain.len(), 10);
        assert_eq!(graph.target(chain[5], ParamKind::Frequency), Ok(1000.0));
        assert_eq!(graph.target(chain[5], ParamKind::FilterGain), Ok(6.0));
        assert_eq!(graph.target(chain[0], ParamKind::Q), Ok(GRAPHIC_EQ_Q));
        assert_eq!(graph.filter_type(chain[9]), Ok(FilterType::Peaking));
    }

    #[test]
    fn graphic_eq_keeps_gain_for_missing_keys() {
        let mut params = EffectKind::GraphicEq.default_parameters();
        params.set_number("gain_32hz", -4.0);
        let (mut graph, mut node) = build_with(EffectKind::GraphicEq, params);
        node.update(&mut graph, &ParameterSet::Flat(Default::default())).unwrap();
        let first = biquads_between(&graph, node.input(), node.output())[0];
        assert_eq!(graph.target(first, ParamKind::FilterGain), Ok(-4.0));
    }

    #[test]
    fn parametric_eq_rewires_on_band_count_change() {
        let (mut graph, mut node) = build(EffectKind::ParametricEq);
        assert!(biquads_between(&graph, node.input(), node.output()).is_empty());

        let two = ParameterSet::BandList(vec![
            Band::peaking(200.0, 3.0),
            Band {
                filter_type: FilterType::Highshelf,
                freq: 6000.0,
                gain: -2.0,
                q: 0.7,
            },
        ]);
        node.update(&mut graph, &two).unwrap();
        let chain = biquads_between(&graph, node.input(), node.output());
        assert_eq!(chain.len(), 2);
        assert_eq!(graph.filter_type(chain[1]), Ok(FilterType::Highshelf));
        assert_eq!(graph.target(chain[0], ParamKind::Frequency), Ok(200.0));
        assert_eq!(node.nodes().len(), 4);

        // Retuning keeps the same primitives.
        let retuned = ParameterSet::BandList(vec![Band::peaking(300.0, 1.0), Band::peaking(900.0, 1.0)]);
        node.update(&mut graph, &retuned).unwrap();
        assert_eq!(biquads_between(&graph, node.input(), node.output()), chain);

        node.update(&mut graph, &ParameterSet::BandList(vec![])).unwrap();
        assert!(biquads_between(&graph, node.input(), node.output()).is_empty());
        assert!(graph.is_consistent());
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn parametric_eq_ignores_flat_parameters() {
        let bands = ParameterSet::BandList(vec![Band::peaking(100.0, 2.0)]);
        let (mut graph, mut node) = build_with(EffectKind::ParametricEq, bands);
        node.update(&mut graph, &ParameterSet::Flat(Default::default())).unwrap();
        assert_eq!(biquads_between(&graph, node.input(), node.output()).len(), 1);
    }

    #[test]
    fn precision_eq_exposes_its_analyser() {
        let (mut graph, node) = build(EffectKind::PrecisionEq);
        let tap = node.analyser().expect("precision EQ has a tap");
        assert_eq!(graph.analyser(tap).map(|a| a.fft_size()), Ok(PRECISION_EQ_FFT_SIZE));
        let chain = biquads_between(&graph, node.input(), node.output());
        assert_eq!(chain.len(), 5, "four bands then the tap");
        assert_eq!(graph.filter_type(chain[0]), Ok(FilterType::Lowshelf));
        assert_eq!(graph.filter_type(chain[3]), Ok(FilterType::Highshelf));
        assert_eq!(graph.target(chain[3], ParamKind::Frequency), Ok(8000.0));

        render_dc(&mut graph, &node, 0.5, 20);
        let peak = graph.analyser(tap).map(|a| a.peak()).unwrap_or_default();
        assert!(peak > 0.1, "tap sees the signal: {peak}");
    }

    #[test]
    fn initial_parameters_are_applied_without_ramps() {
        let mut params = EffectKind::PrecisionEq.default_parameters();
        params.set_number("band2_gain", 9.0);
        let (graph, node) = build_with(EffectKind::PrecisionEq, params);
        let chain = biquads_between(&graph, node.input(), node.output());
        match graph.processor(chain[1]) {
            Ok(Processor::Biquad(b)) => assert_eq!(b.gain.value(), 9.0),
            _ => panic!("expected a biquad"),
        }
    }
}
