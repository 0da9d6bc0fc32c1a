//! Arena-backed audio graph.
//!
//! Nodes live in a slot arena addressed by generational [`NodeId`]s, so a
//! handle to a disposed node can never reach a reused slot. Edges carry
//! audio into a node's input or modulation into one of its parameters.
//! Disposing a node removes every edge touching it.
//!
//! Blocks are processed in depth-first post-order over incoming edges.
//! Edges that close a cycle read the source's previous block, which gives
//! feedback loops one render quantum of latency.

pub mod context;
pub mod node;

use std::fmt;
use std::sync::Arc;

use crate::dsp::analyser::Analyser;
use crate::dsp::convolver::{Convolver, ImpulseResponse};
use crate::dsp::filter::FilterType;
use crate::dsp::oscillator::Waveform;
use crate::dsp::param::AudioParam;
use crate::dsp::waveshaper::WaveShaper;
use crate::error::GraphError;
use crate::project::AudioBuffer;

pub use context::{InterleavedBuffer, LiveContext, OfflineContext, RenderContext};
pub use node::{Block, Modulation, ParamKind, ProcessContext, Processor, RENDER_QUANTUM};

/// Generational handle to a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Where an edge lands on its target node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Input,
    Param(ParamKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub port: Port,
}

struct Node {
    processor: Processor,
    output: Block,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Cached processing order and per-node incoming edges.
struct Plan {
    order: Vec<usize>,
    incoming: Vec<Vec<(usize, Port)>>,
}

pub struct AudioGraph {
    sample_rate: f64,
    frame: u64,
    slots: Vec<Slot>,
    free: Vec<u32>,
    edges: Vec<Edge>,
    plan: Option<Plan>,
    destination: NodeId,
    input_scratch: Block,
    modulation_scratch: Vec<(ParamKind, [f32; RENDER_QUANTUM])>,
}

impl AudioGraph {
    pub fn new(sample_rate: f64) -> Self {
        let mut graph = AudioGraph {
            sample_rate,
            frame: 0,
            slots: Vec::new(),
            free: Vec::new(),
            edges: Vec::new(),
            plan: None,
            destination: NodeId {
                index: 0,
                generation: 0,
            },
            input_scratch: Block::SILENT,
            modulation_scratch: Vec::new(),
        };
        graph.destination = graph.add(Processor::Destination);
        graph
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Absolute index of the next frame to be rendered.
    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    /// Context clock in seconds.
    pub fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate
    }

    /// Frame index for a context time, rounded to the nearest frame.
    pub fn frame_at(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate).round() as u64
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    // ── Node lifecycle ──────────────────────────────────────

    pub fn add(&mut self, processor: Processor) -> NodeId {
        self.plan = None;
        let node = Node {
            processor,
            output: Block::SILENT,
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index: (self.slots.len() - 1) as u32,
                generation: 0,
            }
        }
    }

    pub fn add_gain(&mut self, value: f32) -> NodeId {
        self.add(Processor::gain(value, self.sample_rate))
    }

    pub fn add_panner(&mut self, pan: f32) -> NodeId {
        self.add(Processor::panner(pan, self.sample_rate))
    }

    pub fn add_biquad(&mut self, filter_type: FilterType) -> NodeId {
        self.add(Processor::biquad(filter_type, self.sample_rate))
    }

    pub fn add_delay(&mut self, max_delay_seconds: f64) -> NodeId {
        self.add(Processor::delay(max_delay_seconds, self.sample_rate))
    }

    pub fn add_compressor(&mut self) -> NodeId {
        self.add(Processor::compressor(self.sample_rate))
    }

    pub fn add_oscillator(&mut self, waveform: Waveform, frequency: f32) -> NodeId {
        self.add(Processor::oscillator(waveform, frequency, self.sample_rate))
    }

    pub fn add_waveshaper(&mut self) -> NodeId {
        self.add(Processor::WaveShaper(WaveShaper::default()))
    }

    pub fn add_convolver(&mut self) -> NodeId {
        self.add(Processor::Convolver(Box::new(Convolver::new(RENDER_QUANTUM))))
    }

    pub fn add_analyser(&mut self, fft_size: usize) -> NodeId {
        self.add(Processor::Analyser(Box::new(Analyser::new(fft_size))))
    }

    pub fn add_buffer_source(&mut self, buffer: Arc<AudioBuffer>) -> NodeId {
        self.add(Processor::buffer_source(buffer))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|s| s.generation == id.generation && s.node.is_some())
    }

    fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
            .ok_or_else(|| GraphError::StaleNode(id.to_string()))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
            .ok_or_else(|| GraphError::StaleNode(id.to_string()))
    }

    pub fn processor(&self, id: NodeId) -> Result<&Processor, GraphError> {
        Ok(&self.node(id)?.processor)
    }

    pub fn processor_mut(&mut self, id: NodeId) -> Result<&mut Processor, GraphError> {
        Ok(&mut self.node_mut(id)?.processor)
    }

    /// Remove a node and every edge touching it. The destination is
    /// permanent and ignores disposal.
    pub fn dispose(&mut self, id: NodeId) -> Result<(), GraphError> {
        if id == self.destination {
            log::warn!("ignoring disposal of the graph destination");
            return Ok(());
        }
        self.node(id)?;
        let slot = &mut self.slots[id.index as usize];
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.edges.retain(|e| e.from != id && e.to != id);
        self.plan = None;
        Ok(())
    }

    /// Dispose every node in `ids`, skipping handles already gone.
    pub fn dispose_all(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        for id in ids {
            if self.contains(id) {
                let _ = self.dispose(id);
            }
        }
    }

    /// Number of live nodes, destination included.
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    // ── Edges ───────────────────────────────────────────────

    /// Route `from`'s output into `to`'s input. Repeated connections are
    /// ignored.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.add_edge(from, to, Port::Input)
    }

    /// Route `from`'s output into parameter `param` of `to`.
    pub fn connect_param(&mut self, from: NodeId, to: NodeId, param: ParamKind) -> Result<(), GraphError> {
        if !self.node_mut(to)?.processor.has_param(param) {
            return Err(GraphError::NoSuchParam(to.to_string(), param.name()));
        }
        self.add_edge(from, to, Port::Param(param))
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, port: Port) -> Result<(), GraphError> {
        self.node(from)?;
        self.node(to)?;
        let edge = Edge { from, to, port };
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
            self.plan = None;
        }
        Ok(())
    }

    /// Remove every outgoing edge of `from`.
    pub fn disconnect(&mut self, from: NodeId) -> Result<(), GraphError> {
        self.node(from)?;
        self.edges.retain(|e| e.from != from);
        self.plan = None;
        Ok(())
    }

    /// Remove the edges from `from` into `to` (any port).
    pub fn disconnect_from(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.node(from)?;
        self.edges.retain(|e| !(e.from == from && e.to == to));
        self.plan = None;
        Ok(())
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn outgoing(&self, from: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.from == from)
    }

    pub fn incoming(&self, to: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.to == to)
    }

    /// Every edge joins two live nodes.
    pub fn is_consistent(&self) -> bool {
        self.edges
            .iter()
            .all(|e| self.contains(e.from) && self.contains(e.to))
    }

    // ── Parameters and node settings ────────────────────────

    pub fn param(&mut self, id: NodeId, kind: ParamKind) -> Result<&mut AudioParam, GraphError> {
        self.node_mut(id)?
            .processor
            .param_mut(kind)
            .ok_or_else(|| GraphError::NoSuchParam(id.to_string(), kind.name()))
    }

    /// Ramp a parameter toward `value` with time constant `tau` seconds.
    pub fn set_target(&mut self, id: NodeId, kind: ParamKind, value: f32, tau: f64) -> Result<(), GraphError> {
        self.param(id, kind)?.set_target(value, tau);
        Ok(())
    }

    /// Current target of a parameter.
    pub fn target(&mut self, id: NodeId, kind: ParamKind) -> Result<f32, GraphError> {
        Ok(self.param(id, kind)?.target())
    }

    pub fn snap_params(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.node_mut(id)?.processor.snap_params();
        Ok(())
    }

    fn wrong_kind(id: NodeId, expected: &'static str) -> GraphError {
        GraphError::WrongKind {
            node: id.to_string(),
            expected,
        }
    }

    pub fn set_filter_type(&mut self, id: NodeId, filter_type: FilterType) -> Result<(), GraphError> {
        match &mut self.node_mut(id)?.processor {
            Processor::Biquad(n) => {
                n.filter_type = filter_type;
                Ok(())
            }
            _ => Err(Self::wrong_kind(id, "biquad")),
        }
    }

    pub fn filter_type(&self, id: NodeId) -> Result<FilterType, GraphError> {
        match &self.node(id)?.processor {
            Processor::Biquad(n) => Ok(n.filter_type),
            _ => Err(Self::wrong_kind(id, "biquad")),
        }
    }

    pub fn set_curve(&mut self, id: NodeId, curve: Option<Arc<[f32]>>) -> Result<(), GraphError> {
        match &mut self.node_mut(id)?.processor {
            Processor::WaveShaper(shaper) => {
                shaper.set_curve(curve);
                Ok(())
            }
            _ => Err(Self::wrong_kind(id, "waveshaper")),
        }
    }

    pub fn curve(&self, id: NodeId) -> Result<Option<Arc<[f32]>>, GraphError> {
        match &self.node(id)?.processor {
            Processor::WaveShaper(shaper) => Ok(shaper.curve().cloned()),
            _ => Err(Self::wrong_kind(id, "waveshaper")),
        }
    }

    pub fn set_impulse_response(
        &mut self,
        id: NodeId,
        response: Option<Arc<ImpulseResponse>>,
    ) -> Result<(), GraphError> {
        match &mut self.node_mut(id)?.processor {
            Processor::Convolver(conv) => {
                conv.set_response(response);
                Ok(())
            }
            _ => Err(Self::wrong_kind(id, "convolver")),
        }
    }

    pub fn convolver(&self, id: NodeId) -> Result<&Convolver, GraphError> {
        match &self.node(id)?.processor {
            Processor::Convolver(conv) => Ok(conv),
            _ => Err(Self::wrong_kind(id, "convolver")),
        }
    }

    pub fn analyser(&self, id: NodeId) -> Result<&Analyser, GraphError> {
        match &self.node(id)?.processor {
            Processor::Analyser(a) => Ok(a),
            _ => Err(Self::wrong_kind(id, "analyser")),
        }
    }

    pub fn analyser_mut(&mut self, id: NodeId) -> Result<&mut Analyser, GraphError> {
        match &mut self.node_mut(id)?.processor {
            Processor::Analyser(a) => Ok(a),
            _ => Err(Self::wrong_kind(id, "analyser")),
        }
    }

    // ── Buffer sources ──────────────────────────────────────

    /// Schedule a source to start at context time `when`, `offset` seconds
    /// into its buffer, playing for `duration` seconds (or to the end).
    pub fn start_source(
        &mut self,
        id: NodeId,
        when: f64,
        offset: f64,
        duration: Option<f64>,
    ) -> Result<(), GraphError> {
        let sample_rate = self.sample_rate;
        let start_frame = self.frame_at(when).max(self.frame);
        match &mut self.node_mut(id)?.processor {
            Processor::Source(source) => {
                let frames = duration.map(|d| (d.max(0.0) * sample_rate).round() as u64);
                source.start(start_frame, offset, frames);
                Ok(())
            }
            _ => Err(Self::wrong_kind(id, "buffer source")),
        }
    }

    /// Stop a source immediately.
    pub fn stop_source(&mut self, id: NodeId) -> Result<(), GraphError> {
        match &mut self.node_mut(id)?.processor {
            Processor::Source(source) => {
                source.stop();
                Ok(())
            }
            _ => Err(Self::wrong_kind(id, "buffer source")),
        }
    }

    pub fn source_ended(&self, id: NodeId) -> Result<bool, GraphError> {
        match &self.node(id)?.processor {
            Processor::Source(source) => Ok(source.has_ended()),
            _ => Err(Self::wrong_kind(id, "buffer source")),
        }
    }

    // ── Rendering ───────────────────────────────────────────

    fn build_plan(&self) -> Plan {
        let n = self.slots.len();
        let mut incoming: Vec<Vec<(usize, Port)>> = vec![Vec::new(); n];
        for edge in &self.edges {
            incoming[edge.to.index as usize].push((edge.from.index as usize, edge.port));
        }

        // 0 = unvisited, 1 = on the DFS stack, 2 = placed.
        let mut state = vec![0u8; n];
        let mut order = Vec::with_capacity(n);
        let mut stack: Vec<(usize, usize)> = Vec::new();
        for root in 0..n {
            if self.slots[root].node.is_none() || state[root] != 0 {
                continue;
            }
            state[root] = 1;
            stack.push((root, 0));
            while let Some(top) = stack.last_mut() {
                let (current, next) = *top;
                if let Some(&(pred, _)) = incoming[current].get(next) {
                    top.1 += 1;
                    if state[pred] == 0 {
                        state[pred] = 1;
                        stack.push((pred, 0));
                    }
                } else {
                    state[current] = 2;
                    order.push(current);
                    stack.pop();
                }
            }
        }
        Plan { order, incoming }
    }

    /// Render one render quantum and return what reached the destination.
    pub fn render_block(&mut self) -> &Block {
        let plan = match self.plan.take() {
            Some(plan) => plan,
            None => self.build_plan(),
        };
        let ctx = ProcessContext {
            sample_rate: self.sample_rate,
            block_start: self.frame,
        };

        for &index in &plan.order {
            self.input_scratch.clear();
            self.modulation_scratch.clear();
            for &(src, port) in &plan.incoming[index] {
                let Some(source) = self.slots[src].node.as_ref() else {
                    continue;
                };
                match port {
                    Port::Input => self.input_scratch.add(&source.output),
                    Port::Param(kind) => {
                        let slot = match self.modulation_scratch.iter().position(|(k, _)| *k == kind) {
                            Some(i) => i,
                            None => {
                                self.modulation_scratch.push((kind, [0.0; RENDER_QUANTUM]));
                                self.modulation_scratch.len() - 1
                            }
                        };
                        source.output.add_mono_into(&mut self.modulation_scratch[slot].1);
                    }
                }
            }
            if let Some(node) = self.slots[index].node.as_mut() {
                let modulation = Modulation::new(&self.modulation_scratch);
                node.processor
                    .process(&ctx, &self.input_scratch, &modulation, &mut node.output);
            }
        }

        self.plan = Some(plan);
        self.frame += RENDER_QUANTUM as u64;
        let index = self.destination.index as usize;
        match self.slots[index].node.as_ref() {
            Some(node) => &node.output,
            None => &Block::SILENT,
        }
    }
}
