//! Rendering contexts: a live context pulled by the audio host one buffer
//! at a time, and an offline context rendered to completion.

use super::{AudioGraph, Block, RENDER_QUANTUM};

/// Interleaved PCM produced by a render.
#[derive(Debug, Clone, PartialEq)]
pub struct InterleavedBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl InterleavedBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// De-interleave one channel.
    pub fn channel(&self, index: usize) -> Vec<f32> {
        self.samples
            .iter()
            .skip(index)
            .step_by(self.channels.max(1) as usize)
            .copied()
            .collect()
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0, |m, s| m.max(s.abs()))
    }
}

/// What the effect factory and chain builders need from a context.
pub trait RenderContext {
    fn graph(&self) -> &AudioGraph;

    fn graph_mut(&mut self) -> &mut AudioGraph;

    fn sample_rate(&self) -> f64 {
        self.graph().sample_rate()
    }

    /// Context clock in seconds.
    fn current_time(&self) -> f64 {
        self.graph().current_time()
    }
}

/// A real-time context. The host pulls output in buffers of any size; the
/// graph renders whole blocks and keeps the unread tail for the next pull.
///
/// The context clock is the graph's block clock, as in a browser audio
/// context: it runs up to one render quantum ahead of what the host has
/// read, and a source started at [`RenderContext::current_time`] begins on
/// exactly the next rendered frame.
pub struct LiveContext {
    graph: AudioGraph,
    pending: Block,
    /// Read position in `pending`; `RENDER_QUANTUM` when drained.
    pending_pos: usize,
}

impl LiveContext {
    pub fn new(sample_rate: f64) -> Self {
        LiveContext {
            graph: AudioGraph::new(sample_rate),
            pending: Block::SILENT,
            pending_pos: RENDER_QUANTUM,
        }
    }

    fn next_frame(&mut self) -> (f32, f32) {
        if self.pending_pos == RENDER_QUANTUM {
            self.pending.clone_from(self.graph.render_block());
            self.pending_pos = 0;
        }
        let frame = (self.pending.left[self.pending_pos], self.pending.right[self.pending_pos]);
        self.pending_pos += 1;
        frame
    }

    /// Fill an interleaved stereo buffer.
    pub fn fill(&mut self, out: &mut [f32]) {
        for frame in out.chunks_exact_mut(2) {
            let (l, r) = self.next_frame();
            frame[0] = l;
            frame[1] = r;
        }
    }

    /// Fill planar stereo buffers, as an AudioWorklet output expects.
    pub fn fill_planar(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            (*l, *r) = self.next_frame();
        }
    }

    /// Render and discard `seconds` of output.
    pub fn advance(&mut self, seconds: f64) {
        let frames = (seconds.max(0.0) * self.graph.sample_rate()).round() as usize;
        for _ in 0..frames {
            self.next_frame();
        }
    }
}

impl RenderContext for LiveContext {
    fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    fn graph_mut(&mut self) -> &mut AudioGraph {
        &mut self.graph
    }
}

/// A non-real-time context of fixed length, rendered in one call.
pub struct OfflineContext {
    graph: AudioGraph,
    length: usize,
}

impl OfflineContext {
    pub fn new(sample_rate: f64, length_frames: usize) -> Self {
        OfflineContext {
            graph: AudioGraph::new(sample_rate),
            length: length_frames,
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Render the whole graph into an interleaved stereo buffer.
    pub fn start_rendering(mut self) -> InterleavedBuffer {
        let mut samples = Vec::with_capacity(self.length * 2);
        let mut remaining = self.length;
        while remaining > 0 {
            let block = self.graph.render_block();
            let take = remaining.min(RENDER_QUANTUM);
            for i in 0..take {
                samples.push(block.left[i]);
                samples.push(block.right[i]);
            }
            remaining -= take;
        }
        log::debug!("offline render of {} frames complete", self.length);
        InterleavedBuffer {
            sample_rate: self.graph.sample_rate().round() as u32,
            channels: 2,
            samples,
        }
    }
}

impl RenderContext for OfflineContext {
    fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    fn graph_mut(&mut self) -> &mut AudioGraph {
        &mut self.graph
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::project::AudioBuffer;

    fn tone_context<C: RenderContext>(ctx: &mut C) {
        let sr = ctx.sample_rate();
        let ramp: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
        let graph = ctx.graph_mut();
        let src = graph.add_buffer_source(Arc::new(AudioBuffer::new(sr as u32, vec![ramp])));
        let dest = graph.destination();
        graph.connect(src, dest).unwrap();
        graph.start_source(src, 0.0, 0.0, None).unwrap();
    }

    #[test]
    fn offline_render_has_exact_length() {
        let mut ctx = OfflineContext::new(8000.0, 300);
        tone_context(&mut ctx);
        let out = ctx.start_rendering();
        assert_eq!(out.frames(), 300);
        assert_eq!(out.channels, 2);
        assert_eq!(out.channel(0)[299], 0.299);
        assert_eq!(out.channel(1)[10], 0.01);
    }

    #[test]
    fn live_fill_carries_partial_blocks() {
        let mut ctx = LiveContext::new(8000.0);
        tone_context(&mut ctx);
        let mut first = vec![0.0; 2 * 100];
        let mut second = vec![0.0; 2 * 100];
        ctx.fill(&mut first);
        // One whole block has been rendered.
        assert!((ctx.current_time() - RENDER_QUANTUM as f64 / 8000.0).abs() < 1e-12);
        ctx.fill(&mut second);
        // Frame 100 continues where the first pull stopped.
        assert_eq!(second[0], 0.1);
        assert_eq!(second[2 * 50], 0.15);
    }

    #[test]
    fn live_and_offline_agree() {
        let mut live = LiveContext::new(8000.0);
        tone_context(&mut live);
        let mut left = vec![0.0; 500];
        let mut right = vec![0.0; 500];
        live.fill_planar(&mut left, &mut right);

        let mut offline = OfflineContext::new(8000.0, 500);
        tone_context(&mut offline);
        let out = offline.start_rendering();
        assert_eq!(out.channel(0), left);
        assert_eq!(out.channel(1), right);
    }

    #[test]
    fn advance_moves_the_clock() {
        let mut live = LiveContext::new(8000.0);
        live.advance(0.512);
        assert!((live.current_time() - 0.512).abs() < 1e-12);
        // Partial blocks round the clock up to the next quantum.
        live.advance(0.001);
        assert!((live.current_time() - 0.528).abs() < 1e-12);
    }

    #[test]
    fn sources_start_on_the_context_clock() {
        let mut live = LiveContext::new(8000.0);
        let mut out = vec![0.0; 2 * 100];
        live.fill(&mut out);
        let when = live.current_time();

        let ramp: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
        let graph = live.graph_mut();
        let src = graph.add_buffer_source(Arc::new(AudioBuffer::new(8000, vec![ramp])));
        let dest = graph.destination();
        graph.connect(src, dest).unwrap();
        graph.start_source(src, when, 0.0, None).unwrap();

        let mut out = vec![0.0; 2 * 100];
        live.fill(&mut out);
        // The 28 frames left over from the first block were rendered
        // before the start; the source begins at frame 128 exactly.
        assert!(out[..2 * 28].iter().all(|&s| s == 0.0));
        assert_eq!(out[2 * 29], 0.001);
        assert_eq!(out[2 * 38], 0.01);
    }
}
