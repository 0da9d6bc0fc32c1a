//! Project model: tracks, clips, effect instances and the loop region.
//!
//! The project is plain data. The live engine reads it when building chains
//! and scheduling clips; nothing in here touches the audio graph.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::ProjectError;
use crate::params::{Band, EffectKind, ParameterSet};

// ── Identifiers ─────────────────────────────────────────────

macro_rules! id_type {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(TrackId, "track-");
id_type!(ClipId, "clip-");
id_type!(EffectId, "fx-");

// ── Audio buffers ───────────────────────────────────────────

/// Decoded, immutable audio samples. Shared between clips and the live
/// sources that play them.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    /// One vector per channel, all of equal length.
    pub channels: Vec<Vec<f32>>,
}

impl Default for AudioBuffer {
    fn default() -> Self {
        AudioBuffer {
            sample_rate: 44100,
            channels: Vec::new(),
        }
    }
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        AudioBuffer { sample_rate, channels }
    }

    /// De-interleave `samples` into `channel_count` channels.
    pub fn from_interleaved(samples: &[f32], channel_count: usize, sample_rate: u32) -> Self {
        let channel_count = channel_count.max(1);
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (ch, &s) in frame.iter().enumerate() {
                channels[ch].push(s);
            }
        }
        AudioBuffer { sample_rate, channels }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Linearly interpolated read at a fractional frame position.
    /// Mono buffers answer for both output channels.
    pub fn read_interpolated(&self, channel: usize, position: f64) -> f32 {
        let Some(data) = self
            .channels
            .get(channel)
            .or_else(|| self.channels.first())
        else {
            return 0.0;
        };
        if data.is_empty() || position < 0.0 {
            return 0.0;
        }

        let idx = position as usize;
        if idx >= data.len() - 1 {
            return if idx < data.len() { data[idx] } else { 0.0 };
        }

        let frac = (position - idx as f64) as f32;
        data[idx] * (1.0 - frac) + data[idx + 1] * frac
    }
}

// ── Model ───────────────────────────────────────────────────

/// A window onto an audio buffer placed on the timeline. Times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: ClipId,
    /// Timeline position of the window start.
    pub start: f64,
    /// Window length.
    pub duration: f64,
    /// Offset into the buffer where the window begins.
    pub buffer_offset: f64,
    #[serde(default)]
    pub label: String,
    #[serde(skip)]
    pub buffer: Arc<AudioBuffer>,
}

impl Clip {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// An effect slot in a track or master chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectInstance {
    pub id: EffectId,
    /// Type tag. Kept as a string so project files naming an unknown type
    /// still load and round-trip; such slots are bypassed.
    pub effect_id: String,
    pub parameters: ParameterSet,
}

impl EffectInstance {
    pub fn kind(&self) -> Option<EffectKind> {
        EffectKind::from_id(&self.effect_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    /// Linear gain in `[0, 1.5]`.
    pub volume: f32,
    /// Integer pan in `[-100, 100]`.
    pub pan: i32,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub soloed: bool,
    #[serde(default)]
    pub effects: Vec<EffectInstance>,
    #[serde(default)]
    pub clips: Vec<Clip>,
}

pub const MAX_TRACK_VOLUME: f32 = 1.5;

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>) -> Self {
        Track {
            id,
            name: name.into(),
            volume: 1.0,
            pan: 0,
            muted: false,
            soloed: false,
            effects: Vec::new(),
            clips: Vec::new(),
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, MAX_TRACK_VOLUME);
    }

    pub fn set_pan(&mut self, pan: i32) {
        self.pan = pan.clamp(-100, 100);
    }

    /// Pan mapped to `[-1, 1]`.
    pub fn pan_position(&self) -> f32 {
        self.pan as f32 / 100.0
    }
}

/// Loop region in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub start: f64,
    pub end: f64,
    pub enabled: bool,
}

pub const MIN_LOOP_LENGTH: f64 = 0.001;

/// Length actually enforced, slightly above the minimum so the difference
/// of the two bounds still reaches it after rounding.
const LOOP_PADDING: f64 = MIN_LOOP_LENGTH * (1.0 + 1e-6);

impl LoopRegion {
    /// Disabled one-bar region at the timeline start.
    pub fn one_bar(bpm: f64, beats_per_bar: u32) -> Self {
        LoopRegion {
            start: 0.0,
            end: beats_per_bar as f64 * 60.0 / bpm,
            enabled: false,
        }
    }

    /// Whether `position` lies inside `[start, end)`.
    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position < self.end
    }
}

/// Where an effect instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectOwner {
    Track(TrackId),
    Master,
}

/// Account tier used for feature gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    Free,
    Producer,
}

impl AccessLevel {
    pub fn max_tracks(self, config: &EngineConfig) -> Option<usize> {
        match self {
            AccessLevel::Free => Some(config.free_max_tracks),
            AccessLevel::Producer => None,
        }
    }

    pub fn max_effects_per_track(self, config: &EngineConfig) -> Option<usize> {
        match self {
            AccessLevel::Free => Some(config.free_max_effects_per_track),
            AccessLevel::Producer => None,
        }
    }
}

/// Effective gain of a track after mute/solo resolution.
///
/// Any solo in the project silences every non-soloed track, whatever its
/// mute flag says. Without a solo, mute alone decides.
pub fn resolve_gain(muted: bool, soloed: bool, any_soloed: bool) -> f32 {
    if any_soloed {
        if soloed { 1.0 } else { 0.0 }
    } else if muted {
        0.0
    } else {
        1.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub name: String,
    pub bpm: f64,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub master_effects: Vec<EffectInstance>,
    #[serde(default = "default_master_volume")]
    pub master_volume: f32,
    #[serde(default)]
    pub loop_region: Option<LoopRegion>,
    #[serde(skip)]
    next_track: u64,
    #[serde(skip)]
    next_clip: u64,
    #[serde(skip)]
    next_effect: u64,
}

fn default_master_volume() -> f32 {
    1.0
}

impl Default for Project {
    fn default() -> Self {
        Project::new(120.0)
    }
}

impl Project {
    pub fn new(bpm: f64) -> Self {
        Project {
            name: String::new(),
            bpm,
            tracks: Vec::new(),
            master_effects: Vec::new(),
            master_volume: 1.0,
            loop_region: None,
            next_track: 1,
            next_clip: 1,
            next_effect: 1,
        }
    }

    /// Advance the id allocators past every id present in the model.
    /// Called after deserializing so new ids never collide with loaded ones.
    pub fn reindex(&mut self) {
        let max_track = self.tracks.iter().map(|t| t.id.0).max().unwrap_or(0);
        let max_clip = self
            .tracks
            .iter()
            .flat_map(|t| t.clips.iter().map(|c| c.id.0))
            .max()
            .unwrap_or(0);
        let max_effect = self
            .tracks
            .iter()
            .flat_map(|t| t.effects.iter())
            .chain(self.master_effects.iter())
            .map(|e| e.id.0)
            .max()
            .unwrap_or(0);
        self.next_track = self.next_track.max(max_track + 1);
        self.next_clip = self.next_clip.max(max_clip + 1);
        self.next_effect = self.next_effect.max(max_effect + 1);
    }

    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), ProjectError> {
        if !(bpm > 0.0 && bpm.is_finite()) {
            return Err(ProjectError::InvalidTempo(bpm));
        }
        self.bpm = bpm;
        Ok(())
    }

    /// Check a project that did not come through the editing methods, such
    /// as one read from a file: tempo, clip windows, volumes, band lists and
    /// the loop region must all be playable.
    pub fn validate(&self) -> Result<(), ProjectError> {
        if !(self.bpm > 0.0 && self.bpm.is_finite()) {
            return Err(ProjectError::InvalidTempo(self.bpm));
        }
        let non_negative = |v: f64| v >= 0.0 && v.is_finite();
        let volume = |v: f32| (0.0..=MAX_TRACK_VOLUME).contains(&v);
        if !volume(self.master_volume) {
            return Err(ProjectError::InvalidVolume(self.master_volume));
        }
        for track in &self.tracks {
            if !volume(track.volume) {
                return Err(ProjectError::InvalidVolume(track.volume));
            }
            for clip in &track.clips {
                let reason = if !non_negative(clip.start) {
                    Some(format!("start {}", clip.start))
                } else if !non_negative(clip.duration) {
                    Some(format!("duration {}", clip.duration))
                } else if !non_negative(clip.buffer_offset) {
                    Some(format!("buffer offset {}", clip.buffer_offset))
                } else {
                    None
                };
                if let Some(reason) = reason {
                    return Err(ProjectError::InvalidClip { clip: clip.id, reason });
                }
            }
        }
        let effects = self.tracks.iter().flat_map(|t| &t.effects).chain(&self.master_effects);
        for effect in effects {
            for band in effect.parameters.bands().unwrap_or_default() {
                self.check_band(effect.id, band)?;
            }
        }
        if let Some(region) = self.loop_region {
            if !(non_negative(region.start) && non_negative(region.end) && region.start < region.end) {
                return Err(ProjectError::InvalidLoop {
                    start: region.start,
                    end: region.end,
                });
            }
        }
        Ok(())
    }

    // ── Tracks ──────────────────────────────────────────────

    pub fn add_track(
        &mut self,
        name: impl Into<String>,
        access: AccessLevel,
        config: &EngineConfig,
    ) -> Result<TrackId, ProjectError> {
        if let Some(limit) = access.max_tracks(config) {
            if self.tracks.len() >= limit {
                return Err(ProjectError::TrackLimit { limit });
            }
        }
        let id = TrackId(self.next_track);
        self.next_track += 1;
        self.tracks.push(Track::new(id, name));
        Ok(id)
    }

    /// Remove a track with its clips and effect instances.
    pub fn remove_track(&mut self, id: TrackId) -> Result<Track, ProjectError> {
        let index = self
            .tracks
            .iter()
            .position(|t| t.id == id)
            .ok_or(ProjectError::TrackNotFound(id))?;
        Ok(self.tracks.remove(index))
    }

    pub fn track(&self, id: TrackId) -> Result<&Track, ProjectError> {
        self.tracks
            .iter()
            .find(|t| t.id == id)
            .ok_or(ProjectError::TrackNotFound(id))
    }

    pub fn track_mut(&mut self, id: TrackId) -> Result<&mut Track, ProjectError> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(ProjectError::TrackNotFound(id))
    }

    pub fn any_soloed(&self) -> bool {
        self.tracks.iter().any(|t| t.soloed)
    }

    /// Mute/solo-resolved gain for one track.
    pub fn effective_gain(&self, track: &Track) -> f32 {
        resolve_gain(track.muted, track.soloed, self.any_soloed())
    }

    // ── Clips ───────────────────────────────────────────────

    /// Place a whole buffer on a track at `start`.
    pub fn add_clip(
        &mut self,
        track: TrackId,
        start: f64,
        label: impl Into<String>,
        buffer: Arc<AudioBuffer>,
    ) -> Result<ClipId, ProjectError> {
        let id = ClipId(self.next_clip);
        let duration = buffer.duration();
        let track = self.track_mut(track)?;
        track.clips.push(Clip {
            id,
            start: start.max(0.0),
            duration,
            buffer_offset: 0.0,
            label: label.into(),
            buffer,
        });
        self.next_clip += 1;
        Ok(id)
    }

    pub fn remove_clip(&mut self, id: ClipId) -> Result<Clip, ProjectError> {
        for track in &mut self.tracks {
            if let Some(index) = track.clips.iter().position(|c| c.id == id) {
                return Ok(track.clips.remove(index));
            }
        }
        Err(ProjectError::ClipNotFound(id))
    }

    pub fn clip_mut(&mut self, id: ClipId) -> Result<&mut Clip, ProjectError> {
        self.tracks
            .iter_mut()
            .flat_map(|t| t.clips.iter_mut())
            .find(|c| c.id == id)
            .ok_or(ProjectError::ClipNotFound(id))
    }

    pub fn clip_count(&self) -> usize {
        self.tracks.iter().map(|t| t.clips.len()).sum()
    }

    /// End of the latest clip window, or zero for an empty project.
    pub fn content_end(&self) -> f64 {
        self.tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .map(Clip::end)
            .fold(0.0, f64::max)
    }

    // ── Effects ─────────────────────────────────────────────

    /// Append a new instance of `kind` with its default parameters.
    pub fn add_effect(
        &mut self,
        owner: EffectOwner,
        kind: EffectKind,
        access: AccessLevel,
        config: &EngineConfig,
    ) -> Result<EffectId, ProjectError> {
        let id = EffectId(self.next_effect);
        let instance = EffectInstance {
            id,
            effect_id: kind.id().to_string(),
            parameters: kind.default_parameters(),
        };
        match owner {
            EffectOwner::Track(track_id) => {
                let track = self.track_mut(track_id)?;
                if let Some(limit) = access.max_effects_per_track(config) {
                    if track.effects.len() >= limit {
                        return Err(ProjectError::EffectLimit { limit });
                    }
                }
                track.effects.push(instance);
            }
            EffectOwner::Master => self.master_effects.push(instance),
        }
        self.next_effect += 1;
        Ok(id)
    }

    pub fn locate_effect(&self, id: EffectId) -> Result<EffectOwner, ProjectError> {
        if self.master_effects.iter().any(|e| e.id == id) {
            return Ok(EffectOwner::Master);
        }
        self.tracks
            .iter()
            .find(|t| t.effects.iter().any(|e| e.id == id))
            .map(|t| EffectOwner::Track(t.id))
            .ok_or(ProjectError::EffectNotFound(id))
    }

    pub fn effect(&self, id: EffectId) -> Result<&EffectInstance, ProjectError> {
        self.tracks
            .iter()
            .flat_map(|t| t.effects.iter())
            .chain(self.master_effects.iter())
            .find(|e| e.id == id)
            .ok_or(ProjectError::EffectNotFound(id))
    }

    fn effect_mut(&mut self, id: EffectId) -> Result<&mut EffectInstance, ProjectError> {
        self.tracks
            .iter_mut()
            .flat_map(|t| t.effects.iter_mut())
            .chain(self.master_effects.iter_mut())
            .find(|e| e.id == id)
            .ok_or(ProjectError::EffectNotFound(id))
    }

    pub fn remove_effect(&mut self, id: EffectId) -> Result<(EffectOwner, EffectInstance), ProjectError> {
        if let Some(index) = self.master_effects.iter().position(|e| e.id == id) {
            return Ok((EffectOwner::Master, self.master_effects.remove(index)));
        }
        for track in &mut self.tracks {
            if let Some(index) = track.effects.iter().position(|e| e.id == id) {
                return Ok((EffectOwner::Track(track.id), track.effects.remove(index)));
            }
        }
        Err(ProjectError::EffectNotFound(id))
    }

    /// Replace an instance's parameters after validating them against its
    /// kind. Unknown kinds accept any parameter bag.
    pub fn set_effect_parameters(
        &mut self,
        id: EffectId,
        parameters: ParameterSet,
        config: &EngineConfig,
    ) -> Result<(), ProjectError> {
        let effect = self.effect_mut(id)?;
        if let Some(kind) = effect.kind() {
            parameters.validate(kind, config.max_parametric_bands)?;
        }
        effect.parameters = parameters;
        Ok(())
    }

    fn bands_mut(&mut self, id: EffectId) -> Result<&mut Vec<Band>, ProjectError> {
        let effect = self.effect_mut(id)?;
        match &mut effect.parameters {
            ParameterSet::BandList(bands) => Ok(bands),
            ParameterSet::Flat(_) => Err(ProjectError::NotABandList(id)),
        }
    }

    fn check_band(&self, id: EffectId, band: &Band) -> Result<(), ProjectError> {
        band.check().map_err(|reason| ProjectError::InvalidParameters {
            effect: id.to_string(),
            reason,
        })
    }

    pub fn add_band(&mut self, id: EffectId, band: Band, config: &EngineConfig) -> Result<usize, ProjectError> {
        let limit = config.max_parametric_bands;
        self.check_band(id, &band)?;
        let bands = self.bands_mut(id)?;
        if bands.len() >= limit {
            return Err(ProjectError::BandLimit { limit });
        }
        bands.push(band);
        Ok(bands.len() - 1)
    }

    pub fn update_band(&mut self, id: EffectId, index: usize, band: Band) -> Result<(), ProjectError> {
        self.check_band(id, &band)?;
        let bands = self.bands_mut(id)?;
        let slot = bands
            .get_mut(index)
            .ok_or(ProjectError::BandOutOfRange { effect: id, index })?;
        *slot = band;
        Ok(())
    }

    pub fn remove_band(&mut self, id: EffectId, index: usize) -> Result<Band, ProjectError> {
        let bands = self.bands_mut(id)?;
        if index >= bands.len() {
            return Err(ProjectError::BandOutOfRange { effect: id, index });
        }
        Ok(bands.remove(index))
    }

    // ── Loop ────────────────────────────────────────────────

    /// Set the loop bounds, swapping inverted bounds, clamping to the
    /// timeline and keeping at least [`MIN_LOOP_LENGTH`] between them.
    /// Non-finite bounds are rejected and leave the region unchanged.
    pub fn set_loop_region(
        &mut self,
        start: f64,
        end: f64,
        enabled: bool,
        timeline_end: f64,
    ) -> Result<LoopRegion, ProjectError> {
        if !(start.is_finite() && end.is_finite() && timeline_end.is_finite()) {
            return Err(ProjectError::InvalidLoop { start, end });
        }
        let (mut start, mut end) = if end < start { (end, start) } else { (start, end) };
        start = start.clamp(0.0, (timeline_end - LOOP_PADDING).max(0.0));
        end = end.clamp(start + LOOP_PADDING, timeline_end.max(start + LOOP_PADDING));
        let region = LoopRegion { start, end, enabled };
        self.loop_region = Some(region);
        Ok(region)
    }

    /// Loop region if looping is switched on.
    pub fn active_loop(&self) -> Option<LoopRegion> {
        self.loop_region.filter(|l| l.enabled)
    }
}
