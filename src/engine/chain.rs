//! Track and master signal chains.
//!
//! A track routes `input -> [effects] -> mute -> pan -> volume -> meter`
//! into the master bus, and the master routes
//! `input -> [effects] -> volume -> meter` into the destination. The fixed
//! head nodes live for a whole playback session; the effect chain between
//! the input and the head is torn down and rebuilt whenever the track's
//! effect list changes. Sources always connect to the chain input, which
//! survives rebuilds.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::effects::{BuildOptions, EffectNode, create_effect_node};
use crate::error::GraphError;
use crate::graph::{AudioGraph, NodeId, ParamKind};
use crate::params::EffectKind;
use crate::project::{EffectId, EffectInstance, Track, TrackId};

/// Spectrum resolution of the per-track and master meters.
pub const METER_FFT_SIZE: usize = 256;

/// Ramp time constant for mixer edits.
pub const MIXER_TIME_CONSTANT: f64 = 0.01;

/// An ordered run of effect nodes between a fixed entry and exit.
#[derive(Debug)]
pub struct EffectChain {
    entry: NodeId,
    exit: NodeId,
    effects: Vec<EffectNode>,
}

impl EffectChain {
    fn new(graph: &mut AudioGraph, entry: NodeId, exit: NodeId) -> Result<Self, GraphError> {
        graph.connect(entry, exit)?;
        Ok(EffectChain {
            entry,
            exit,
            effects: Vec::new(),
        })
    }

    /// Replace every effect node with fresh ones built from `instances`.
    /// Unknown effect types are left out.
    pub fn rebuild(
        &mut self,
        graph: &mut AudioGraph,
        instances: &[EffectInstance],
        options: &BuildOptions,
    ) -> Result<(), GraphError> {
        self.dispose_effects(graph);
        graph.disconnect(self.entry)?;

        let mut last = self.entry;
        for instance in instances {
            let Some(node) = create_effect_node(instance, graph, options) else {
                continue;
            };
            graph.connect(last, node.input())?;
            last = node.output();
            self.effects.push(node);
        }
        graph.connect(last, self.exit)
    }

    fn dispose_effects(&mut self, graph: &mut AudioGraph) {
        for node in self.effects.drain(..) {
            node.dispose(graph);
        }
    }

    /// Effect kinds in signal order.
    pub fn kinds(&self) -> Vec<EffectKind> {
        self.effects.iter().map(EffectNode::kind).collect()
    }

    pub fn effects(&self) -> &[EffectNode] {
        &self.effects
    }

    pub fn effect_mut(&mut self, id: EffectId) -> Option<&mut EffectNode> {
        self.effects.iter_mut().find(|e| e.instance() == id)
    }

    pub fn effect(&self, id: EffectId) -> Option<&EffectNode> {
        self.effects.iter().find(|e| e.instance() == id)
    }
}

/// Fixed per-track nodes.
#[derive(Debug, Clone, Copy)]
pub struct TrackHead {
    pub input: NodeId,
    pub mute: NodeId,
    pub pan: NodeId,
    pub volume: NodeId,
    pub meter: NodeId,
}

impl TrackHead {
    fn create(graph: &mut AudioGraph, track: &Track, gain: f32, bus: NodeId) -> Result<Self, GraphError> {
        let head = TrackHead {
            input: graph.add_gain(1.0),
            mute: graph.add_gain(gain),
            pan: graph.add_panner(track.pan_position()),
            volume: graph.add_gain(track.volume),
            meter: graph.add_analyser(METER_FFT_SIZE),
        };
        graph.connect(head.mute, head.pan)?;
        graph.connect(head.pan, head.volume)?;
        graph.connect(head.volume, head.meter)?;
        graph.connect(head.meter, bus)?;
        Ok(head)
    }

    pub fn nodes(&self) -> [NodeId; 5] {
        [self.input, self.mute, self.pan, self.volume, self.meter]
    }

    /// Ramp volume, pan and the mute/solo gain toward the track state.
    pub fn apply_mix(&self, graph: &mut AudioGraph, track: &Track, gain: f32) -> Result<(), GraphError> {
        graph.set_target(self.mute, ParamKind::Gain, gain, MIXER_TIME_CONSTANT)?;
        graph.set_target(self.pan, ParamKind::Pan, track.pan_position(), MIXER_TIME_CONSTANT)?;
        graph.set_target(self.volume, ParamKind::Gain, track.volume, MIXER_TIME_CONSTANT)
    }
}

/// Head plus effect chain of one track.
#[derive(Debug)]
pub struct TrackChain {
    pub head: TrackHead,
    chain: EffectChain,
}

impl TrackChain {
    /// Create the head for `track` with an empty chain, routed into `bus`.
    pub fn new(graph: &mut AudioGraph, track: &Track, gain: f32, bus: NodeId) -> Result<Self, GraphError> {
        let head = TrackHead::create(graph, track, gain, bus)?;
        let chain = EffectChain::new(graph, head.input, head.mute)?;
        log::debug!("created head for {}", track.id);
        Ok(TrackChain { head, chain })
    }

    /// Where sources for this track connect.
    pub fn input(&self) -> NodeId {
        self.head.input
    }

    pub fn chain(&self) -> &EffectChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut EffectChain {
        &mut self.chain
    }

    /// Rebuild the effect chain from the track's current effect list.
    pub fn rebuild(&mut self, graph: &mut AudioGraph, track: &Track, options: &BuildOptions) -> Result<(), GraphError> {
        self.chain.rebuild(graph, &track.effects, options)?;
        log::debug!("rebuilt chain for {}: {:?}", track.id, self.chain.kinds());
        Ok(())
    }

    /// Remove the head and every effect node.
    pub fn dispose(mut self, graph: &mut AudioGraph) {
        self.chain.dispose_effects(graph);
        graph.dispose_all(self.head.nodes());
    }
}

/// Master bus: `input -> [effects] -> volume -> meter -> destination`.
#[derive(Debug)]
pub struct MasterChain {
    pub input: NodeId,
    pub volume: NodeId,
    pub meter: NodeId,
    chain: EffectChain,
}

impl MasterChain {
    pub fn new(graph: &mut AudioGraph, volume: f32) -> Result<Self, GraphError> {
        let input = graph.add_gain(1.0);
        let volume = graph.add_gain(volume);
        let meter = graph.add_analyser(METER_FFT_SIZE);
        let destination = graph.destination();
        graph.connect(volume, meter)?;
        graph.connect(meter, destination)?;
        let chain = EffectChain::new(graph, input, volume)?;
        Ok(MasterChain {
            input,
            volume,
            meter,
            chain,
        })
    }

    pub fn chain(&self) -> &EffectChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut EffectChain {
        &mut self.chain
    }

    pub fn rebuild(
        &mut self,
        graph: &mut AudioGraph,
        effects: &[EffectInstance],
        options: &BuildOptions,
    ) -> Result<(), GraphError> {
        self.chain.rebuild(graph, effects, options)
    }

    pub fn set_volume(&self, graph: &mut AudioGraph, volume: f32) -> Result<(), GraphError> {
        graph.set_target(self.volume, ParamKind::Gain, volume, MIXER_TIME_CONSTANT)
    }

    pub fn dispose(mut self, graph: &mut AudioGraph) {
        self.chain.dispose_effects(graph);
        graph.dispose_all([self.input, self.volume, self.meter]);
    }
}

/// Return the chain for `track`, creating its head and building its effect
/// chain on first use.
pub fn ensure_head<'a>(
    chains: &'a mut BTreeMap<TrackId, TrackChain>,
    graph: &mut AudioGraph,
    track: &Track,
    gain: f32,
    bus: NodeId,
    options: &BuildOptions,
) -> Result<&'a mut TrackChain, GraphError> {
    match chains.entry(track.id) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let mut chain = TrackChain::new(graph, track, gain, bus)?;
            chain.rebuild(graph, track, options)?;
            Ok(entry.insert(chain))
        }
    }
}

/// Tear down and rebuild the effect chain of `track`, if it has a head.
pub fn rebuild_chain(
    chains: &mut BTreeMap<TrackId, TrackChain>,
    graph: &mut AudioGraph,
    track: &Track,
    options: &BuildOptions,
) -> Result<bool, GraphError> {
    match chains.get_mut(&track.id) {
        Some(chain) => {
            chain.rebuild(graph, track, options)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_with(kinds: &[&str]) -> Track {
        let mut track = Track::new(TrackId(1), "Bass");
        for (i, id) in kinds.iter().enumerate() {
            let kind = EffectKind::from_id(id);
            track.effects.push(EffectInstance {
                id: EffectId(i as u64 + 1),
                effect_id: id.to_string(),
                parameters: kind
                    .map(EffectKind::default_parameters)
                    .unwrap_or(crate::params::ParameterSet::Flat(Default::default())),
            });
        }
        track
    }

    /// Follow the first outgoing edge from `from` until `to`.
    fn path(graph: &AudioGraph, from: NodeId, to: NodeId) -> Vec<NodeId> {
        let mut nodes = vec![from];
        let mut current = from;
        while current != to {
            current = graph.outgoing(current).next().map(|e| e.to).expect("connected");
            nodes.push(current);
        }
        nodes
    }

    #[test]
    fn head_routes_into_the_bus() {
        let mut graph = AudioGraph::new(44100.0);
        let master = MasterChain::new(&mut graph, 1.0).unwrap();
        let track = track_with(&[]);
        let chain = TrackChain::new(&mut graph, &track, 1.0, master.input).unwrap();
        let route = path(&graph, chain.input(), graph.destination());
        assert_eq!(route[..6], [
            chain.head.input,
            chain.head.mute,
            chain.head.pan,
            chain.head.volume,
            chain.head.meter,
            master.input
        ]);
        assert_eq!(route.last(), Some(&graph.destination()));
    }

    #[test]
    fn rebuild_orders_effects_and_skips_unknown_types() {
        let mut graph = AudioGraph::new(44100.0);
        let bus = graph.destination();
        let track = track_with(&["delay", "vocoder", "compressor"]);
        let mut chains = BTreeMap::new();
        let chain = ensure_head(&mut chains, &mut graph, &track, 1.0, bus, &BuildOptions::default()).unwrap();
        assert_eq!(chain.chain().kinds(), vec![EffectKind::Delay, EffectKind::Compressor]);
        assert!(chain.chain().effect(EffectId(2)).is_none());
    }

    #[test]
    fn ensure_head_is_idempotent() {
        let mut graph = AudioGraph::new(44100.0);
        let bus = graph.destination();
        let track = track_with(&["reverb"]);
        let mut chains = BTreeMap::new();
        let options = BuildOptions::default();
        let first = ensure_head(&mut chains, &mut graph, &track, 1.0, bus, &options).unwrap().head.input;
        let count = graph.node_count();
        let second = ensure_head(&mut chains, &mut graph, &track, 1.0, bus, &options).unwrap().head.input;
        assert_eq!(first, second);
        assert_eq!(graph.node_count(), count);
    }

    #[test]
    fn rebuild_disposes_old_effect_nodes() {
        let mut graph = AudioGraph::new(44100.0);
        let bus = graph.destination();
        let mut track = track_with(&["chorus", "saturation"]);
        let mut chains = BTreeMap::new();
        let options = BuildOptions::default();
        let old: Vec<NodeId> = ensure_head(&mut chains, &mut graph, &track, 1.0, bus, &options)
            .unwrap()
            .chain()
            .effects()
            .iter()
            .flat_map(EffectNode::nodes)
            .collect();

        track.effects.remove(0);
        assert!(rebuild_chain(&mut chains, &mut graph, &track, &options).unwrap());
        assert!(old.iter().all(|&id| !graph.contains(id)));
        assert!(graph.is_consistent());
        let chain = &chains[&track.id];
        assert_eq!(chain.chain().kinds(), vec![EffectKind::Saturation]);
        let saturation = &chain.chain().effects()[0];
        assert!(graph.outgoing(chain.input()).any(|e| e.to == saturation.input()));
        assert!(graph.outgoing(saturation.output()).any(|e| e.to == chain.head.mute));
    }

    #[test]
    fn dispose_removes_head_and_chain() {
        let mut graph = AudioGraph::new(44100.0);
        let bus = graph.destination();
        let track = track_with(&["phaser_missing", "planetary_phaser"]);
        let chain = {
            let mut chains = BTreeMap::new();
            ensure_head(&mut chains, &mut graph, &track, 1.0, bus, &BuildOptions::default()).unwrap();
            chains.remove(&track.id).unwrap()
        };
        chain.dispose(&mut graph);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn apply_mix_ramps_head_nodes() {
        let mut graph = AudioGraph::new(44100.0);
        let bus = graph.destination();
        let mut track = track_with(&[]);
        let chain = TrackChain::new(&mut graph, &track, 1.0, bus).unwrap();
        track.set_volume(0.5);
        track.set_pan(-100);
        chain.head.apply_mix(&mut graph, &track, 0.0).unwrap();
        assert_eq!(graph.target(chain.head.volume, ParamKind::Gain), Ok(0.5));
        assert_eq!(graph.target(chain.head.pan, ParamKind::Pan), Ok(-1.0));
        assert_eq!(graph.target(chain.head.mute, ParamKind::Gain), Ok(0.0));
    }
}
