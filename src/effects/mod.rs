//! Effect node factory.
//!
//! Each [`EffectKind`] maps to a constructor that builds a small subgraph of
//! primitives inside an [`AudioGraph`] and returns it as an
//! [`EffectTopology`]. The factory only needs a graph, so the same code
//! builds live chains and offline renders.
//!
//! `update` takes the full parameter set and retunes primitives through
//! smoothed ramps. Calling it twice with the same set is a no-op.

mod dynamics;
mod eq;
mod modulation;
mod space;

use crate::dsp::param::DEFAULT_TIME_CONSTANT;
use crate::error::GraphError;
use crate::graph::{AudioGraph, NodeId, ParamKind};
use crate::params::{EffectKind, ParameterSet};
use crate::project::{EffectId, EffectInstance};

/// Settings shared by every constructor.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Seed for procedurally generated impulse responses. `None` draws
    /// fresh noise for every response.
    pub noise_seed: Option<u64>,
}

/// A built effect subgraph.
pub trait EffectTopology {
    /// Entry node.
    fn input(&self) -> NodeId;

    /// Exit node.
    fn output(&self) -> NodeId;

    /// Retune every primitive from the full parameter set.
    fn update(&mut self, graph: &mut AudioGraph, params: &ParameterSet) -> Result<(), GraphError>;

    /// Every primitive owned by this effect, input and output included.
    fn nodes(&self) -> Vec<NodeId>;

    /// Spectrum tap exposed to the UI, if the effect has one.
    fn analyser(&self) -> Option<NodeId> {
        None
    }
}

type Constructor = fn(&mut AudioGraph, &BuildOptions) -> Result<Box<dyn EffectTopology>, GraphError>;

static REGISTRY: [(EffectKind, Constructor); 12] = [
    (EffectKind::GraphicEq, eq::graphic_eq),
    (EffectKind::ParametricEq, eq::parametric_eq),
    (EffectKind::PrecisionEq, eq::precision_eq),
    (EffectKind::Compressor, dynamics::compressor),
    (EffectKind::Saturation, dynamics::saturation),
    (EffectKind::BlackHole, dynamics::black_hole),
    (EffectKind::Delay, space::delay),
    (EffectKind::Reverb, space::reverb),
    (EffectKind::EtherealShimmer, space::shimmer),
    (EffectKind::Chorus, modulation::chorus),
    (EffectKind::PlanetaryPhaser, modulation::phaser),
    (EffectKind::InfiniteFilter, modulation::infinite_filter),
];

fn constructor(kind: EffectKind) -> Option<Constructor> {
    REGISTRY.iter().find(|(k, _)| *k == kind).map(|(_, c)| *c)
}

/// Live (or offline) materialization of one effect instance.
pub struct EffectNode {
    kind: EffectKind,
    instance: EffectId,
    topology: Box<dyn EffectTopology>,
}

impl std::fmt::Debug for EffectNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectNode")
            .field("kind", &self.kind)
            .field("instance", &self.instance)
            .field("input", &self.input())
            .field("output", &self.output())
            .finish()
    }
}

impl EffectNode {
    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    pub fn instance(&self) -> EffectId {
        self.instance
    }

    pub fn input(&self) -> NodeId {
        self.topology.input()
    }

    pub fn output(&self) -> NodeId {
        self.topology.output()
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.topology.nodes()
    }

    pub fn analyser(&self) -> Option<NodeId> {
        self.topology.analyser()
    }

    pub fn update(&mut self, graph: &mut AudioGraph, params: &ParameterSet) -> Result<(), GraphError> {
        self.topology.update(graph, params)
    }

    /// Remove every primitive from the graph.
    pub fn dispose(self, graph: &mut AudioGraph) {
        log::debug!("disposing {} node for {}", self.kind, self.instance);
        graph.dispose_all(self.topology.nodes());
    }
}

/// Build the subgraph for `instance`.
///
/// Returns `None` for an effect type the factory does not know; the caller
/// leaves it out of the chain. Initial parameters are applied without
/// ramps.
pub fn create_effect_node(
    instance: &EffectInstance,
    graph: &mut AudioGraph,
    options: &BuildOptions,
) -> Option<EffectNode> {
    let Some(kind) = instance.kind() else {
        log::warn!("unknown effect type {}, skipping {}", instance.effect_id, instance.id);
        return None;
    };
    let Some(build) = constructor(kind) else {
        log::warn!("no constructor registered for {kind}, skipping {}", instance.id);
        return None;
    };

    let mut topology = match build(graph, options) {
        Ok(topology) => topology,
        Err(e) => {
            log::warn!("failed to build {kind} for {}: {e}", instance.id);
            return None;
        }
    };
    if let Err(e) = topology.update(graph, &instance.parameters) {
        log::warn!("failed to apply parameters of {}: {e}", instance.id);
    }
    for id in topology.nodes() {
        let _ = graph.snap_params(id);
    }
    log::debug!(
        "built {kind} for {} with {} primitives",
        instance.id,
        topology.nodes().len()
    );
    Some(EffectNode {
        kind,
        instance: instance.id,
        topology,
    })
}

/// Whether moving from `old` to `new` changes the primitive layout of the
/// effect instead of only its settings.
pub fn implies_topology_change(kind: EffectKind, old: &ParameterSet, new: &ParameterSet) -> bool {
    kind.uses_band_list() && old.bands().map(<[_]>::len) != new.bands().map(<[_]>::len)
}

// ── Shared building blocks ──────────────────────────────────

fn connect_series(graph: &mut AudioGraph, nodes: &[NodeId]) -> Result<(), GraphError> {
    for pair in nodes.windows(2) {
        graph.connect(pair[0], pair[1])?;
    }
    Ok(())
}

/// Parallel dry and wet gains summed at a shared output.
#[derive(Debug, Clone, Copy)]
struct DryWet {
    dry: NodeId,
    wet: NodeId,
}

impl DryWet {
    /// Create both gains; `input -> dry -> output` is wired, the wet gain
    /// is left for the caller to place.
    fn new(graph: &mut AudioGraph, input: NodeId, output: NodeId) -> Result<Self, GraphError> {
        let dry = graph.add_gain(1.0);
        let wet = graph.add_gain(1.0);
        graph.connect(input, dry)?;
        graph.connect(dry, output)?;
        Ok(DryWet { dry, wet })
    }

    fn set_mix(&self, graph: &mut AudioGraph, mix: f64, tau: f64) -> Result<(), GraphError> {
        graph.set_target(self.dry, ParamKind::Gain, (1.0 - mix) as f32, tau)?;
        graph.set_target(self.wet, ParamKind::Gain, mix as f32, tau)
    }
}

const SMOOTHING: f64 = DEFAULT_TIME_CONSTANT;

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::graph::Block;

    pub const SR: f64 = 44100.0;

    pub fn instance(kind: EffectKind, parameters: ParameterSet) -> EffectInstance {
        EffectInstance {
            id: EffectId(7),
            effect_id: kind.id().to_string(),
            parameters,
        }
    }

    pub fn build(kind: EffectKind) -> (AudioGraph, EffectNode) {
        build_with(kind, kind.default_parameters())
    }

    pub fn build_with(kind: EffectKind, parameters: ParameterSet) -> (AudioGraph, EffectNode) {
        let mut graph = AudioGraph::new(SR);
        let options = BuildOptions { noise_seed: Some(11) };
        let node = create_effect_node(&instance(kind, parameters), &mut graph, &options)
            .expect("known effect");
        (graph, node)
    }

    const ALL_PARAMS: [ParamKind; 11] = [
        ParamKind::Gain,
        ParamKind::Pan,
        ParamKind::Frequency,
        ParamKind::Q,
        ParamKind::FilterGain,
        ParamKind::DelayTime,
        ParamKind::Threshold,
        ParamKind::Knee,
        ParamKind::Ratio,
        ParamKind::Attack,
        ParamKind::Release,
    ];

    /// Every parameter target of every primitive, in node order.
    pub fn targets(graph: &mut AudioGraph, node: &EffectNode) -> Vec<(NodeId, ParamKind, f32)> {
        let mut out = Vec::new();
        for id in node.nodes() {
            for kind in ALL_PARAMS {
                if let Ok(t) = graph.target(id, kind) {
                    out.push((id, kind, t));
                }
            }
        }
        out
    }

    /// Feed a constant into the effect and return the last output block.
    pub fn render_dc(graph: &mut AudioGraph, node: &EffectNode, level: f32, blocks: usize) -> Block {
        use crate::project::AudioBuffer;
        use std::sync::Arc;
        let frames = blocks * crate::graph::RENDER_QUANTUM + 1;
        let buffer = Arc::new(AudioBuffer::new(SR as u32, vec![vec![level; frames]]));
        let src = graph.add_buffer_source(buffer);
        let dest = graph.destination();
        graph.connect(src, node.input()).unwrap();
        graph.connect(node.output(), dest).unwrap();
        graph.start_source(src, 0.0, 0.0, None).unwrap();
        let mut last = Block::SILENT;
        for _ in 0..blocks {
            last = graph.render_block().clone();
        }
        last
    }
}
