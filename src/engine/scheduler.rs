//! Playback scheduler.
//!
//! Owns the live context and every live node: the master bus, one head and
//! effect chain per track, and the buffer sources scheduled into them.
//! The project is passed into every operation; the scheduler never keeps
//! its own copy.
//!
//! Pausing tears the whole live graph down. Playing builds it again from
//! the project, creating each track's head the first time one of its clips
//! is scheduled.
//!
//! With the metronome on, click sources are fed into the master input a
//! little ahead of the render position. The beat grid is anchored every
//! time playback starts, so seeks and loop restarts click on the beat.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::effects::{BuildOptions, EffectNode, implies_topology_change};
use crate::error::GraphError;
use crate::graph::{LiveContext, NodeId, RENDER_QUANTUM, RenderContext};
use crate::params::ParameterSet;
use crate::project::{EffectId, EffectOwner, Project, Track, TrackId};

use super::chain::{MasterChain, TrackChain, ensure_head, rebuild_chain};
use super::metronome::{LOOKAHEAD, Metronome};
use super::transport::{ClipSchedule, TransportState, normalize_start};

/// Level of a meter tap.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeterReading {
    pub peak: f32,
    pub rms: f32,
}

/// Everything the scheduler holds between calls.
pub struct EngineState {
    ctx: LiveContext,
    master: Option<MasterChain>,
    chains: BTreeMap<TrackId, TrackChain>,
    sources: BTreeMap<TrackId, Vec<NodeId>>,
    clicks: Vec<NodeId>,
}

impl EngineState {
    fn new(sample_rate: f64) -> Self {
        EngineState {
            ctx: LiveContext::new(sample_rate),
            master: None,
            chains: BTreeMap::new(),
            sources: BTreeMap::new(),
            clicks: Vec::new(),
        }
    }

    fn dispose_sources(&mut self, sources: Vec<NodeId>) {
        let graph = self.ctx.graph_mut();
        for source in sources {
            let _ = graph.stop_source(source);
            let _ = graph.disconnect(source);
            let _ = graph.dispose(source);
        }
    }

    fn stop_sources(&mut self, track: TrackId) {
        if let Some(sources) = self.sources.remove(&track) {
            self.dispose_sources(sources);
        }
    }

    fn stop_clicks(&mut self) {
        let clicks = std::mem::take(&mut self.clicks);
        self.dispose_sources(clicks);
    }

    /// Stop every source and dispose every live node.
    fn teardown(&mut self) {
        let tracks: Vec<TrackId> = self.sources.keys().copied().collect();
        for track in tracks {
            self.stop_sources(track);
        }
        self.stop_clicks();
        let graph = self.ctx.graph_mut();
        for (_, chain) in std::mem::take(&mut self.chains) {
            chain.dispose(graph);
        }
        if let Some(master) = self.master.take() {
            master.dispose(graph);
        }
    }
}

pub struct PlaybackScheduler {
    config: EngineConfig,
    options: BuildOptions,
    transport: TransportState,
    metronome: Metronome,
    state: EngineState,
}

impl PlaybackScheduler {
    pub fn new(config: EngineConfig) -> Self {
        let options = BuildOptions {
            noise_seed: config.noise_seed,
        };
        let state = EngineState::new(config.sample_rate as f64);
        let metronome = Metronome::new(config.sample_rate as f64, config.beats_per_bar, config.metronome);
        PlaybackScheduler {
            config,
            options,
            transport: TransportState::Stopped,
            metronome,
            state,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> TransportState {
        self.transport
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    pub fn context(&self) -> &LiveContext {
        &self.state.ctx
    }

    /// Context clock in seconds.
    pub fn now(&self) -> f64 {
        self.state.ctx.current_time()
    }

    /// Current timeline position.
    pub fn position(&self) -> f64 {
        self.transport.position(self.now())
    }

    // ── Transport ───────────────────────────────────────────

    /// Start playback from the current position.
    pub fn play(&mut self, project: &Project) -> Result<(), GraphError> {
        if self.is_playing() {
            return Ok(());
        }
        let loop_bounds = project.active_loop().map(|l| (l.start, l.end));
        let start_offset = normalize_start(self.position(), loop_bounds);
        let start_time = self.now();

        self.ensure_master(project)?;
        let mut scheduled = 0;
        for track in &project.tracks {
            scheduled += self.schedule_track(project, track, start_offset, start_time)?;
        }
        self.transport = TransportState::Playing {
            start_time,
            start_offset,
        };
        self.anchor_metronome(project);
        self.schedule_clicks(start_time + LOOKAHEAD);
        log::info!("playing from {start_offset:.3}s, {scheduled} clips scheduled");
        Ok(())
    }

    /// Stop playback, keeping the position. Returns that position.
    pub fn pause(&mut self) -> f64 {
        let position = self.position();
        if self.is_playing() {
            self.state.teardown();
            self.metronome.clear();
            self.transport = TransportState::Paused { position };
            log::info!("paused at {position:.3}s");
        }
        position
    }

    /// Stop playback and rewind to the timeline start.
    pub fn stop(&mut self) {
        self.pause();
        self.transport = TransportState::Stopped;
    }

    /// Move the playhead. While playing, playback restarts at `position`.
    pub fn seek(&mut self, project: &Project, position: f64) -> Result<(), GraphError> {
        let position = position.max(0.0);
        let playing = self.is_playing();
        self.pause();
        self.transport = TransportState::Paused { position };
        if playing {
            self.play(project)?;
        }
        Ok(())
    }

    /// Advance position bookkeeping. Call once per host frame.
    ///
    /// Handles loop restarts and the end-of-timeline stop, and disposes
    /// sources that finished playing. Returns the current position.
    pub fn tick(&mut self, project: &Project) -> Result<f64, GraphError> {
        if !self.is_playing() {
            return Ok(self.position());
        }
        let position = self.position();
        if let Some(region) = project.active_loop() {
            if position >= region.end {
                log::debug!("loop end reached at {position:.3}s");
                self.pause();
                self.transport = TransportState::Paused {
                    position: region.start,
                };
                self.play(project)?;
                return Ok(region.start);
            }
        } else if position >= self.config.timeline_seconds(project.bpm) {
            log::info!("end of timeline reached");
            self.stop();
            return Ok(0.0);
        }
        self.prune_finished_sources();
        self.schedule_clicks(self.now() + LOOKAHEAD);
        Ok(position)
    }

    fn prune_finished_sources(&mut self) {
        let graph = self.state.ctx.graph_mut();
        let mut keep_running = |source: &NodeId| {
            if graph.source_ended(*source).unwrap_or(true) {
                let _ = graph.dispose(*source);
                false
            } else {
                true
            }
        };
        for sources in self.state.sources.values_mut() {
            sources.retain(&mut keep_running);
        }
        self.state.clicks.retain(&mut keep_running);
    }

    // ── Metronome ───────────────────────────────────────────

    pub fn metronome_enabled(&self) -> bool {
        self.metronome.is_enabled()
    }

    /// Turn the click track on or off. Turning it on while playing starts
    /// clicking from the next beat; turning it off silences pending clicks.
    pub fn set_metronome(&mut self, project: &Project, enabled: bool) {
        self.metronome.set_enabled(enabled);
        if enabled {
            if self.is_playing() && self.metronome.grid().is_none() {
                self.anchor_metronome(project);
                self.schedule_clicks(self.now() + LOOKAHEAD);
            }
        } else {
            self.state.stop_clicks();
        }
        log::debug!("metronome {}", if enabled { "on" } else { "off" });
    }

    /// Anchor the beat grid at the current transport position. Clicks stop
    /// at the loop end, or at the timeline end without a loop.
    fn anchor_metronome(&mut self, project: &Project) {
        let TransportState::Playing { .. } = self.transport else {
            return;
        };
        let end = match project.active_loop() {
            Some(region) => region.end,
            None => self.config.timeline_seconds(project.bpm),
        };
        self.metronome.anchor(project.bpm, self.now(), self.position(), end);
    }

    /// Start a click source for every beat due before context time
    /// `horizon`.
    fn schedule_clicks(&mut self, horizon: f64) {
        let due = self.metronome.take_due(horizon);
        if due.is_empty() {
            return;
        }
        let Some(bus) = self.state.master.as_ref().map(|m| m.input) else {
            return;
        };
        let graph = self.state.ctx.graph_mut();
        for (when, click) in due {
            let source = graph.add_buffer_source(click);
            let started = graph
                .connect(source, bus)
                .and_then(|()| graph.start_source(source, when, 0.0, None));
            match started {
                Ok(()) => self.state.clicks.push(source),
                Err(e) => {
                    log::warn!("metronome click at {when:.3}s dropped: {e}");
                    let _ = graph.dispose(source);
                }
            }
        }
    }

    /// Schedule the clicks sounding within the next `frames` of output.
    fn schedule_clicks_for(&mut self, frames: usize) {
        if self.metronome.grid().is_some() {
            let span = (frames + RENDER_QUANTUM) as f64 / self.config.sample_rate as f64;
            self.schedule_clicks(self.now() + span);
        }
    }

    // ── Graph construction ──────────────────────────────────

    fn ensure_master(&mut self, project: &Project) -> Result<NodeId, GraphError> {
        if let Some(master) = &self.state.master {
            return Ok(master.input);
        }
        let graph = self.state.ctx.graph_mut();
        let mut master = MasterChain::new(graph, project.master_volume)?;
        master.rebuild(graph, &project.master_effects, &self.options)?;
        let input = master.input;
        self.state.master = Some(master);
        Ok(input)
    }

    /// Schedule every clip of `track` still ahead of `start_offset`.
    fn schedule_track(
        &mut self,
        project: &Project,
        track: &Track,
        start_offset: f64,
        start_time: f64,
    ) -> Result<usize, GraphError> {
        let bus = self.ensure_master(project)?;
        let gain = project.effective_gain(track);
        let mut count = 0;
        for clip in &track.clips {
            let Some(schedule) = ClipSchedule::compute(clip, start_offset, start_time) else {
                log::debug!("{} has nothing left to play at {start_offset:.3}s", clip.id);
                continue;
            };
            let graph = self.state.ctx.graph_mut();
            let input = ensure_head(&mut self.state.chains, graph, track, gain, bus, &self.options)?.input();
            let source = graph.add_buffer_source(Arc::clone(&clip.buffer));
            graph.connect(source, input)?;
            graph.start_source(source, schedule.play_at, schedule.offset, Some(schedule.duration))?;
            self.state.sources.entry(track.id).or_default().push(source);
            count += 1;
        }
        Ok(count)
    }

    /// Stop the sources of one track, rebuild its chain from the project
    /// and reschedule its clips from the current position. Other tracks
    /// keep playing untouched.
    pub fn rebuild_and_resume(&mut self, project: &Project, track_id: TrackId) -> Result<(), GraphError> {
        if !self.is_playing() {
            return Ok(());
        }
        let Ok(track) = project.track(track_id) else {
            log::warn!("rebuild requested for unknown {track_id}");
            return Ok(());
        };
        let position = self.position();
        let now = self.now();

        self.state.stop_sources(track_id);
        let graph = self.state.ctx.graph_mut();
        rebuild_chain(&mut self.state.chains, graph, track, &self.options)?;
        let count = self.schedule_track(project, track, position, now)?;
        log::debug!("resumed {track_id} at {position:.3}s with {count} clips");
        Ok(())
    }

    /// Rebuild the master effect chain in place.
    pub fn rebuild_master(&mut self, project: &Project) -> Result<(), GraphError> {
        let graph = self.state.ctx.graph_mut();
        if let Some(master) = &mut self.state.master {
            master.rebuild(graph, &project.master_effects, &self.options)?;
        }
        Ok(())
    }

    /// The effect list of `owner` changed (effect added, removed or
    /// reordered).
    pub fn on_effects_changed(&mut self, project: &Project, owner: EffectOwner) -> Result<(), GraphError> {
        match owner {
            EffectOwner::Track(track) => self.rebuild_and_resume(project, track),
            EffectOwner::Master => self.rebuild_master(project),
        }
    }

    /// Apply new parameters of effect `id` to its live node. `previous` is
    /// the parameter set before the edit; a band-count change rebuilds the
    /// owning chain instead of retuning.
    pub fn on_parameter_change(
        &mut self,
        project: &Project,
        id: EffectId,
        previous: &ParameterSet,
    ) -> Result<(), GraphError> {
        if !self.is_playing() {
            return Ok(());
        }
        let (Ok(instance), Ok(owner)) = (project.effect(id), project.locate_effect(id)) else {
            log::warn!("parameter change for unknown effect {id}");
            return Ok(());
        };
        let Some(kind) = instance.kind() else {
            return Ok(());
        };
        if implies_topology_change(kind, previous, &instance.parameters) {
            return self.on_effects_changed(project, owner);
        }
        let graph = self.state.ctx.graph_mut();
        let node = match owner {
            EffectOwner::Track(track) => self
                .state
                .chains
                .get_mut(&track)
                .and_then(|c| c.chain_mut().effect_mut(id)),
            EffectOwner::Master => self.state.master.as_mut().and_then(|m| m.chain_mut().effect_mut(id)),
        };
        match node {
            Some(node) => node.update(graph, &instance.parameters),
            None => {
                log::debug!("{id} has no live node");
                Ok(())
            }
        }
    }

    // ── Mixer ───────────────────────────────────────────────

    /// Retune every live head from the project's volume, pan, mute and
    /// solo state. Mute and solo of one track affect the others, so all
    /// heads are re-resolved.
    pub fn apply_mixer(&mut self, project: &Project) -> Result<(), GraphError> {
        let graph = self.state.ctx.graph_mut();
        for track in &project.tracks {
            if let Some(chain) = self.state.chains.get(&track.id) {
                chain.head.apply_mix(graph, track, project.effective_gain(track))?;
            }
        }
        if let Some(master) = &self.state.master {
            master.set_volume(graph, project.master_volume)?;
        }
        Ok(())
    }

    /// Drop the live nodes of a track removed from the project.
    pub fn on_track_removed(&mut self, track: TrackId) {
        self.state.stop_sources(track);
        if let Some(chain) = self.state.chains.remove(&track) {
            chain.dispose(self.state.ctx.graph_mut());
            log::debug!("disposed live nodes of {track}");
        }
    }

    // ── Inspection ──────────────────────────────────────────

    pub fn track_chain(&self, track: TrackId) -> Option<&TrackChain> {
        self.state.chains.get(&track)
    }

    pub fn master_chain(&self) -> Option<&MasterChain> {
        self.state.master.as_ref()
    }

    /// Live sources currently scheduled for `track`.
    pub fn sources(&self, track: TrackId) -> &[NodeId] {
        self.state.sources.get(&track).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn live_effect(&self, id: EffectId) -> Option<&EffectNode> {
        self.state
            .chains
            .values()
            .find_map(|c| c.chain().effect(id))
            .or_else(|| self.state.master.as_ref().and_then(|m| m.chain().effect(id)))
    }

    fn meter_of(&self, node: NodeId) -> Option<MeterReading> {
        let analyser = self.state.ctx.graph().analyser(node).ok()?;
        Some(MeterReading {
            peak: analyser.peak(),
            rms: analyser.rms(),
        })
    }

    pub fn track_meter(&self, track: TrackId) -> Option<MeterReading> {
        self.meter_of(self.state.chains.get(&track)?.head.meter)
    }

    pub fn master_meter(&self) -> Option<MeterReading> {
        self.meter_of(self.state.master.as_ref()?.meter)
    }

    pub fn track_spectrum(&mut self, track: TrackId) -> Option<Vec<f32>> {
        let meter = self.state.chains.get(&track)?.head.meter;
        Some(self.state.ctx.graph_mut().analyser_mut(meter).ok()?.frequency_data_db())
    }

    /// Spectrum of an effect with its own analysis tap (precision EQ).
    pub fn effect_spectrum(&mut self, id: EffectId) -> Option<Vec<f32>> {
        let tap = self.live_effect(id)?.analyser()?;
        Some(self.state.ctx.graph_mut().analyser_mut(tap).ok()?.frequency_data_db())
    }

    // ── Rendering ───────────────────────────────────────────

    /// Fill an interleaved stereo buffer from the live graph.
    pub fn render(&mut self, out: &mut [f32]) {
        self.schedule_clicks_for(out.len() / 2);
        self.state.ctx.fill(out);
    }

    pub fn render_planar(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.schedule_clicks_for(left.len().min(right.len()));
        self.state.ctx.fill_planar(left, right);
    }

    /// Render and discard `seconds` of output.
    pub fn advance(&mut self, seconds: f64) {
        let frames = (seconds.max(0.0) * self.config.sample_rate as f64).ceil() as usize;
        self.schedule_clicks_for(frames);
        self.state.ctx.advance(seconds);
    }

    /// No edge touches a disposed node.
    pub fn is_consistent(&self) -> bool {
        self.state.ctx.graph().is_consistent()
    }

    pub fn live_node_count(&self) -> usize {
        self.state.ctx.graph().node_count()
    }
}
