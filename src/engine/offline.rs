//! Offline render pipeline.
//!
//! Builds the same graph the live scheduler would build, inside an
//! [`OfflineContext`], with every clip scheduled at its absolute timeline
//! position, and renders it to completion.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::effects::BuildOptions;
use crate::error::{ExportError, GraphError};
use crate::graph::{InterleavedBuffer, OfflineContext, RenderContext};
use crate::params::EffectKind;
use crate::project::{Project, TrackId};
use crate::wav;

use super::chain::{MasterChain, TrackChain, ensure_head};
use super::transport::ClipSchedule;

/// A fully wired offline graph, ready to render.
pub struct OfflineSession {
    ctx: OfflineContext,
    master: MasterChain,
    chains: BTreeMap<TrackId, TrackChain>,
    scheduled: usize,
}

impl OfflineSession {
    /// Build the graph for `project` into a context `length_frames` long.
    pub fn build(
        project: &Project,
        sample_rate: f64,
        length_frames: usize,
        options: &BuildOptions,
    ) -> Result<Self, GraphError> {
        let mut ctx = OfflineContext::new(sample_rate, length_frames);
        let graph = ctx.graph_mut();
        let mut master = MasterChain::new(graph, project.master_volume)?;
        master.rebuild(graph, &project.master_effects, options)?;

        let mut chains = BTreeMap::new();
        let mut scheduled = 0;
        for track in &project.tracks {
            let gain = project.effective_gain(track);
            for clip in &track.clips {
                let Some(schedule) = ClipSchedule::compute(clip, 0.0, 0.0) else {
                    log::warn!("{} is empty, leaving it out of the mixdown", clip.id);
                    continue;
                };
                let input = ensure_head(&mut chains, graph, track, gain, master.input, options)?.input();
                let source = graph.add_buffer_source(Arc::clone(&clip.buffer));
                graph.connect(source, input)?;
                graph.start_source(source, schedule.play_at, schedule.offset, Some(schedule.duration))?;
                scheduled += 1;
            }
        }
        Ok(OfflineSession {
            ctx,
            master,
            chains,
            scheduled,
        })
    }

    /// Effect kinds between a track's sources and its head, in order.
    pub fn track_effect_kinds(&self, track: TrackId) -> Option<Vec<EffectKind>> {
        self.chains.get(&track).map(|c| c.chain().kinds())
    }

    pub fn master_effect_kinds(&self) -> Vec<EffectKind> {
        self.master.chain().kinds()
    }

    pub fn scheduled_clips(&self) -> usize {
        self.scheduled
    }

    pub fn render(self) -> InterleavedBuffer {
        self.ctx.start_rendering()
    }
}

/// Render `total_seconds` of the project from time zero.
pub fn render_offline_mix(
    project: &Project,
    total_seconds: f64,
    sample_rate: u32,
    options: &BuildOptions,
) -> Result<InterleavedBuffer, ExportError> {
    if project.clip_count() == 0 {
        return Err(ExportError::EmptyProject);
    }
    if !(total_seconds > 0.0 && total_seconds.is_finite()) {
        return Err(ExportError::InvalidDuration(total_seconds));
    }
    if sample_rate == 0 {
        return Err(ExportError::InvalidSampleRate);
    }
    let length = (total_seconds * sample_rate as f64).ceil() as usize;
    let session = OfflineSession::build(project, sample_rate as f64, length, options)?;
    log::info!(
        "rendering {total_seconds:.3}s mixdown of {} clips at {sample_rate} Hz",
        session.scheduled_clips()
    );
    Ok(session.render())
}

/// Render the whole project, up to the end of its last clip, to a 16-bit
/// stereo WAV file at the configured sample rate.
pub fn export_mixdown(project: &Project, config: &EngineConfig) -> Result<Vec<u8>, ExportError> {
    let duration = project.content_end();
    if project.clip_count() == 0 || duration <= 0.0 {
        return Err(ExportError::EmptyProject);
    }
    let options = BuildOptions {
        noise_seed: config.noise_seed,
    };
    let buffer = render_offline_mix(project, duration, config.sample_rate, &options)?;
    let bytes = wav::encode_wav16(&buffer)?;
    log::info!("exported {} bytes of WAV", bytes.len());
    Ok(bytes)
}
