pub mod bundle;
pub mod config;
pub mod dsp;
pub mod effects;
pub mod engine;
pub mod error;
pub mod graph;
pub mod params;
pub mod project;
pub mod services;
pub mod wav;

use std::sync::Arc;

use wasm_bindgen::prelude::*;

use crate::config::EngineConfig;
use crate::engine::{MeterReading, PlaybackScheduler};
use crate::error::{EngineError, ProjectError};
use crate::params::{EffectDescriptor, EffectKind, ParameterSet};
use crate::project::{AccessLevel, ClipId, EffectId, EffectOwner, Project, TrackId};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the engine version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Descriptors of every effect the factory can build.
pub fn catalog() -> Vec<&'static EffectDescriptor> {
    EffectKind::ALL.iter().map(|k| k.descriptor()).collect()
}

fn to_js(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn effect_kind(id: &str) -> Result<EffectKind, EngineError> {
    EffectKind::from_id(id).ok_or_else(|| {
        EngineError::Project(ProjectError::InvalidParameters {
            effect: id.to_string(),
            reason: "unknown effect type".into(),
        })
    })
}

/// WASM-exposed: the effect catalogue as an array of descriptors.
#[wasm_bindgen]
pub fn effect_catalog() -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(&catalog()).map_err(to_js)
}

/// WASM-exposed: validate an AI suggestion response for an effect type and
/// return the parameter set to apply.
#[wasm_bindgen]
pub fn parse_suggestion(effect_id: &str, response_text: &str) -> Result<JsValue, JsValue> {
    let kind = effect_kind(effect_id).map_err(to_js)?;
    let params = services::parse_suggestion(kind, response_text).map_err(to_js)?;
    serde_wasm_bindgen::to_value(&params).map_err(to_js)
}

/// Render a saved bundle to a 16-bit stereo WAV mixdown.
pub fn render_bundle_wav(bytes: &[u8], config: &EngineConfig) -> Result<Vec<u8>, EngineError> {
    let project = bundle::load_bundle_bytes(bytes)?;
    Ok(engine::export_mixdown(&project, config)?)
}

/// WASM-exposed: render a saved bundle to a WAV byte array.
#[wasm_bindgen]
pub fn export_bundle_wav(bytes: &[u8], sample_rate: u32) -> Result<Vec<u8>, JsValue> {
    let config = EngineConfig {
        sample_rate,
        ..EngineConfig::default()
    };
    render_bundle_wav(bytes, &config).map_err(to_js)
}

/// A project together with its live playback engine, driven by an
/// AudioWorklet host: the host calls `render` from its process callback
/// and `tick` once per animation frame.
#[wasm_bindgen]
pub struct DawEngine {
    config: EngineConfig,
    access: AccessLevel,
    project: Project,
    scheduler: PlaybackScheduler,
}

impl DawEngine {
    pub fn with_config(config: EngineConfig) -> Self {
        DawEngine {
            scheduler: PlaybackScheduler::new(config.clone()),
            project: Project::default(),
            access: AccessLevel::Free,
            config,
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn set_access(&mut self, access: AccessLevel) {
        self.access = access;
    }

    /// Replace the project. Playback stops first.
    pub fn replace_project(&mut self, project: Project) {
        self.scheduler.stop();
        self.project = project;
    }

    pub fn create_track(&mut self, name: &str) -> Result<TrackId, EngineError> {
        Ok(self.project.add_track(name, self.access, &self.config)?)
    }

    pub fn delete_track(&mut self, id: TrackId) -> Result<(), EngineError> {
        self.project.remove_track(id)?;
        self.scheduler.on_track_removed(id);
        Ok(())
    }

    /// Decode `bytes` and place the audio on `track` at `start` seconds.
    /// A decode failure creates nothing.
    pub fn import_audio(
        &mut self,
        track: TrackId,
        start: f64,
        label: &str,
        bytes: &[u8],
    ) -> Result<ClipId, EngineError> {
        self.project.track(track)?;
        let buffer = wav::decode_audio(bytes).map_err(|e| ProjectError::Decode(e.to_string()))?;
        Ok(self.project.add_clip(track, start, label, Arc::new(buffer))?)
    }

    pub fn insert_effect(&mut self, owner: EffectOwner, kind: EffectKind) -> Result<EffectId, EngineError> {
        let id = self.project.add_effect(owner, kind, self.access, &self.config)?;
        self.scheduler.on_effects_changed(&self.project, owner)?;
        Ok(id)
    }

    pub fn delete_effect(&mut self, id: EffectId) -> Result<(), EngineError> {
        let (owner, _) = self.project.remove_effect(id)?;
        self.scheduler.on_effects_changed(&self.project, owner)?;
        Ok(())
    }

    pub fn update_effect(&mut self, id: EffectId, parameters: ParameterSet) -> Result<(), EngineError> {
        let previous = self.project.effect(id)?.parameters.clone();
        self.project.set_effect_parameters(id, parameters, &self.config)?;
        self.scheduler.on_parameter_change(&self.project, id, &previous)?;
        Ok(())
    }

    pub fn update_track_mix(
        &mut self,
        id: TrackId,
        volume: f32,
        pan: i32,
        muted: bool,
        soloed: bool,
    ) -> Result<(), EngineError> {
        let track = self.project.track_mut(id)?;
        track.set_volume(volume);
        track.set_pan(pan);
        track.muted = muted;
        track.soloed = soloed;
        self.scheduler.apply_mixer(&self.project)?;
        Ok(())
    }

    pub fn update_master_volume(&mut self, volume: f32) -> Result<(), EngineError> {
        self.project.master_volume = volume.clamp(0.0, project::MAX_TRACK_VOLUME);
        self.scheduler.apply_mixer(&self.project)?;
        Ok(())
    }

    pub fn update_loop(&mut self, start: f64, end: f64, enabled: bool) -> Result<(), EngineError> {
        let timeline_end = self.config.timeline_seconds(self.project.bpm);
        self.project.set_loop_region(start, end, enabled, timeline_end)?;
        Ok(())
    }

    pub fn update_metronome(&mut self, enabled: bool) {
        self.scheduler.set_metronome(&self.project, enabled);
    }

    pub fn meter(&self, track: Option<TrackId>) -> Option<MeterReading> {
        match track {
            Some(id) => self.scheduler.track_meter(id),
            None => self.scheduler.master_meter(),
        }
    }

    pub fn mixdown(&self) -> Result<Vec<u8>, EngineError> {
        Ok(engine::export_mixdown(&self.project, &self.config)?)
    }
}

#[wasm_bindgen]
impl DawEngine {
    /// Create an engine from an optional JSON configuration document.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<DawEngine, JsValue> {
        let config = match config_json {
            Some(json) => EngineConfig::from_json_str(&json).map_err(to_js)?,
            None => EngineConfig::default(),
        };
        Ok(DawEngine::with_config(config))
    }

    #[wasm_bindgen(js_name = setAccessLevel)]
    pub fn set_access_level(&mut self, response_body: &str) {
        self.access = services::parse_access_level(response_body);
    }

    #[wasm_bindgen(js_name = loadBundle)]
    pub fn load_bundle(&mut self, bytes: &[u8]) -> Result<(), JsValue> {
        let project = bundle::load_bundle_bytes(bytes).map_err(to_js)?;
        self.replace_project(project);
        Ok(())
    }

    #[wasm_bindgen(js_name = saveBundle)]
    pub fn save_bundle(&self) -> Result<Vec<u8>, JsValue> {
        bundle::save_bundle_bytes(&self.project).map_err(to_js)
    }

    #[wasm_bindgen(js_name = addTrack)]
    pub fn add_track(&mut self, name: &str) -> Result<u64, JsValue> {
        self.create_track(name).map(|id| id.0).map_err(to_js)
    }

    #[wasm_bindgen(js_name = removeTrack)]
    pub fn remove_track(&mut self, id: u64) -> Result<(), JsValue> {
        self.delete_track(TrackId(id)).map_err(to_js)
    }

    #[wasm_bindgen(js_name = importClip)]
    pub fn import_clip(&mut self, track: u64, start: f64, label: &str, bytes: &[u8]) -> Result<u64, JsValue> {
        self.import_audio(TrackId(track), start, label, bytes)
            .map(|id| id.0)
            .map_err(to_js)
    }

    /// Add an effect to a track, or to the master bus when `track` is
    /// undefined.
    #[wasm_bindgen(js_name = addEffect)]
    pub fn add_effect(&mut self, track: Option<u64>, effect_id: &str) -> Result<u64, JsValue> {
        let owner = track.map_or(EffectOwner::Master, |t| EffectOwner::Track(TrackId(t)));
        let kind = effect_kind(effect_id).map_err(to_js)?;
        self.insert_effect(owner, kind).map(|id| id.0).map_err(to_js)
    }

    #[wasm_bindgen(js_name = removeEffect)]
    pub fn remove_effect(&mut self, id: u64) -> Result<(), JsValue> {
        self.delete_effect(EffectId(id)).map_err(to_js)
    }

    #[wasm_bindgen(js_name = setEffectParameters)]
    pub fn set_effect_parameters(&mut self, id: u64, parameters: JsValue) -> Result<(), JsValue> {
        let parameters: ParameterSet = serde_wasm_bindgen::from_value(parameters).map_err(to_js)?;
        self.update_effect(EffectId(id), parameters).map_err(to_js)
    }

    #[wasm_bindgen(js_name = setTrackMix)]
    pub fn set_track_mix(&mut self, id: u64, volume: f32, pan: i32, muted: bool, soloed: bool) -> Result<(), JsValue> {
        self.update_track_mix(TrackId(id), volume, pan, muted, soloed)
            .map_err(to_js)
    }

    #[wasm_bindgen(js_name = setMasterVolume)]
    pub fn set_master_volume(&mut self, volume: f32) -> Result<(), JsValue> {
        self.update_master_volume(volume).map_err(to_js)
    }

    #[wasm_bindgen(js_name = setLoop)]
    pub fn set_loop(&mut self, start: f64, end: f64, enabled: bool) -> Result<(), JsValue> {
        self.update_loop(start, end, enabled).map_err(to_js)
    }

    #[wasm_bindgen(js_name = setMetronome)]
    pub fn set_metronome(&mut self, enabled: bool) {
        self.update_metronome(enabled);
    }

    #[wasm_bindgen(getter)]
    pub fn metronome(&self) -> bool {
        self.scheduler.metronome_enabled()
    }

    pub fn play(&mut self) -> Result<(), JsValue> {
        self.scheduler.play(&self.project).map_err(to_js)
    }

    pub fn pause(&mut self) -> f64 {
        self.scheduler.pause()
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
    }

    pub fn seek(&mut self, position: f64) -> Result<(), JsValue> {
        self.scheduler.seek(&self.project, position).map_err(to_js)
    }

    /// Advance transport bookkeeping; returns the playhead position.
    pub fn tick(&mut self) -> Result<f64, JsValue> {
        self.scheduler.tick(&self.project).map_err(to_js)
    }

    #[wasm_bindgen(getter, js_name = isPlaying)]
    pub fn is_playing(&self) -> bool {
        self.scheduler.is_playing()
    }

    /// Fill an interleaved stereo buffer.
    pub fn render(&mut self, out: &mut [f32]) {
        self.scheduler.render(out);
    }

    #[wasm_bindgen(js_name = renderPlanar)]
    pub fn render_planar(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.scheduler.render_planar(left, right);
    }

    /// `[peak, rms]` of a track, or of the master bus when `track` is
    /// undefined. Empty when nothing is playing.
    #[wasm_bindgen(js_name = meterLevels)]
    pub fn meter_levels(&self, track: Option<u64>) -> Vec<f32> {
        self.meter(track.map(TrackId))
            .map(|m| vec![m.peak, m.rms])
            .unwrap_or_default()
    }

    #[wasm_bindgen(js_name = trackSpectrum)]
    pub fn track_spectrum(&mut self, track: u64) -> Vec<f32> {
        self.scheduler.track_spectrum(TrackId(track)).unwrap_or_default()
    }

    #[wasm_bindgen(js_name = effectSpectrum)]
    pub fn effect_spectrum(&mut self, id: u64) -> Vec<f32> {
        self.scheduler.effect_spectrum(EffectId(id)).unwrap_or_default()
    }

    #[wasm_bindgen(js_name = exportWav)]
    pub fn export_wav(&self) -> Result<Vec<u8>, JsValue> {
        self.mixdown().map_err(to_js)
    }

    #[wasm_bindgen(js_name = projectJson)]
    pub fn project_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.project).map_err(to_js)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExportError;

    fn config() -> EngineConfig {
        EngineConfig {
            sample_rate: 8000,
            noise_seed: Some(5),
            ..EngineConfig::default()
        }
    }

    fn wav_bytes(seconds: f64) -> Vec<u8> {
        let frames = (seconds * 8000.0) as usize;
        let samples = (0..frames).map(|i| ((i % 40) as f32 / 40.0) - 0.5).collect();
        wav::encode_buffer_wav16(&project::AudioBuffer::new(8000, vec![samples])).unwrap()
    }

    #[test]
    fn catalog_lists_every_effect() {
        let ids: Vec<&str> = catalog().iter().map(|d| d.id).collect();
        assert_eq!(ids.len(), 12);
        assert!(ids.contains(&"infinitFilter"));
        assert!(ids.contains(&"black_hole_voice"));
    }

    #[test]
    fn session_plays_and_exports() {
        let mut engine = DawEngine::with_config(config());
        engine.set_access(AccessLevel::Producer);
        let track = engine.create_track("loop").unwrap();
        engine.import_audio(track, 0.0, "saw", &wav_bytes(0.5)).unwrap();
        let fx = engine.insert_effect(EffectOwner::Track(track), EffectKind::Reverb).unwrap();

        engine.scheduler.play(&engine.project).unwrap();
        let mut out = vec![0.0; 2 * 512];
        engine.scheduler.render(&mut out);
        assert!(out.iter().any(|&s| s != 0.0));

        let mut params = engine.project().effect(fx).unwrap().parameters.clone();
        params.set_number("mix", 0.9);
        engine.update_effect(fx, params).unwrap();
        engine.update_track_mix(track, 0.8, 20, false, true).unwrap();
        assert!(engine.meter(Some(track)).is_some());
        engine.scheduler.pause();

        let wav = engine.mixdown().unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
    }

    #[test]
    fn metronome_toggles_through_the_engine() {
        let mut engine = DawEngine::with_config(config());
        assert!(!engine.metronome());
        engine.update_metronome(true);
        assert!(engine.metronome());
        engine.scheduler.play(&engine.project).unwrap();
        let mut out = vec![0.0; 2 * 256];
        engine.scheduler.render(&mut out);
        assert!(out.iter().any(|s| s.abs() > 1e-3));

        engine.update_metronome(false);
        engine.scheduler.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn failed_import_creates_no_clip() {
        let mut engine = DawEngine::with_config(config());
        let track = engine.create_track("t").unwrap();
        let err = engine.import_audio(track, 0.0, "bad", b"definitely not audio");
        assert!(matches!(err, Err(EngineError::Project(ProjectError::Decode(_)))));
        assert_eq!(engine.project().clip_count(), 0);
        assert!(matches!(
            engine.import_audio(TrackId(99), 0.0, "x", &wav_bytes(0.1)),
            Err(EngineError::Project(ProjectError::TrackNotFound(_)))
        ));
    }

    #[test]
    fn free_tier_is_enforced_through_the_engine() {
        let mut engine = DawEngine::with_config(config());
        let track = engine.create_track("t").unwrap();
        for _ in 0..3 {
            engine.insert_effect(EffectOwner::Track(track), EffectKind::Delay).unwrap();
        }
        assert!(matches!(
            engine.insert_effect(EffectOwner::Track(track), EffectKind::Delay),
            Err(EngineError::Project(ProjectError::EffectLimit { limit: 3 }))
        ));
    }

    #[test]
    fn empty_bundle_export_is_an_error() {
        let bytes = bundle::save_bundle_bytes(&Project::default()).unwrap();
        assert!(matches!(
            render_bundle_wav(&bytes, &config()),
            Err(EngineError::Export(ExportError::EmptyProject))
        ));
    }

    #[test]
    fn bundle_renders_to_wav() {
        let mut engine = DawEngine::with_config(config());
        let track = engine.create_track("t").unwrap();
        engine.import_audio(track, 0.5, "saw", &wav_bytes(0.25)).unwrap();
        let bytes = bundle::save_bundle_bytes(engine.project()).unwrap();
        let wav = render_bundle_wav(&bytes, &config()).unwrap();
        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        // Content ends at 0.75 s.
        assert_eq!(reader.duration(), 6000);
    }
}
