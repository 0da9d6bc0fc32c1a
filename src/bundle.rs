//! Project bundles.
//!
//! A bundle is a zip archive holding `project.json` and one 16-bit WAV file
//! per distinct clip buffer under `audio/`. Clips reference their file by
//! name through the manifest's `audio` map; identical buffers share one
//! file.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::BundleError;
use crate::project::{AudioBuffer, ClipId, Project};
use crate::wav;

pub const PROJECT_FILE: &str = "project.json";
pub const AUDIO_DIR: &str = "audio";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default = "default_format")]
    format: u32,
    project: Project,
    /// Audio file name of every clip.
    #[serde(default)]
    audio: BTreeMap<ClipId, String>,
}

fn default_format() -> u32 {
    FORMAT_VERSION
}

/// Write `project` as a bundle into `writer`.
pub fn save_bundle<W: Write + Seek>(project: &Project, writer: W) -> Result<W, BundleError> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut by_digest: BTreeMap<Vec<u8>, String> = BTreeMap::new();
    let mut by_buffer: BTreeMap<*const AudioBuffer, String> = BTreeMap::new();
    let mut audio = BTreeMap::new();
    for clip in project.tracks.iter().flat_map(|t| t.clips.iter()) {
        if let Some(name) = by_buffer.get(&Arc::as_ptr(&clip.buffer)) {
            audio.insert(clip.id, name.clone());
            continue;
        }
        let bytes = wav::encode_buffer_wav16(&clip.buffer)?;
        let digest = Sha256::digest(&bytes).to_vec();
        let name = match by_digest.get(&digest) {
            Some(name) => name.clone(),
            None => {
                let name = format!("audio_{}.wav", by_digest.len());
                zip.start_file(format!("{AUDIO_DIR}/{name}"), options)?;
                zip.write_all(&bytes)?;
                by_digest.insert(digest, name.clone());
                name
            }
        };
        by_buffer.insert(Arc::as_ptr(&clip.buffer), name.clone());
        audio.insert(clip.id, name);
    }

    let manifest = Manifest {
        format: FORMAT_VERSION,
        project: project.clone(),
        audio,
    };
    zip.start_file(PROJECT_FILE, options)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
    let writer = zip.finish()?;
    log::info!(
        "saved bundle with {} tracks and {} audio files",
        project.tracks.len(),
        by_digest.len()
    );
    Ok(writer)
}

pub fn save_bundle_bytes(project: &Project) -> Result<Vec<u8>, BundleError> {
    Ok(save_bundle(project, Cursor::new(Vec::new()))?.into_inner())
}

pub fn save_bundle_file(project: &Project, path: impl AsRef<Path>) -> Result<(), BundleError> {
    let file = std::fs::File::create(path)?;
    save_bundle(project, file)?;
    Ok(())
}

/// Read a bundle. Every referenced audio file is decoded before the project
/// is returned; any failure leaves nothing behind.
pub fn load_bundle<R: Read + Seek>(reader: R) -> Result<Project, BundleError> {
    let mut archive = ZipArchive::new(reader)?;
    let manifest: Manifest = {
        let mut file = match archive.by_name(PROJECT_FILE) {
            Ok(file) => file,
            Err(zip::result::ZipError::FileNotFound) => return Err(BundleError::MissingProjectFile),
            Err(e) => return Err(e.into()),
        };
        let mut text = String::new();
        file.read_to_string(&mut text)?;
        serde_json::from_str(&text)?
    };
    if manifest.format > FORMAT_VERSION {
        return Err(BundleError::Invalid(format!(
            "bundle format {} is newer than supported {FORMAT_VERSION}",
            manifest.format
        )));
    }

    manifest
        .project
        .validate()
        .map_err(|e| BundleError::Invalid(e.to_string()))?;

    let mut decoded: BTreeMap<String, Arc<AudioBuffer>> = BTreeMap::new();
    let mut project = manifest.project;
    for clip in project.tracks.iter_mut().flat_map(|t| t.clips.iter_mut()) {
        let name = manifest
            .audio
            .get(&clip.id)
            .ok_or_else(|| BundleError::Invalid(format!("{} has no audio file", clip.id)))?;
        if let Some(buffer) = decoded.get(name) {
            clip.buffer = Arc::clone(buffer);
            continue;
        }
        let mut bytes = Vec::new();
        archive
            .by_name(&format!("{AUDIO_DIR}/{name}"))
            .map_err(|e| BundleError::Audio {
                name: name.clone(),
                reason: e.to_string(),
            })?
            .read_to_end(&mut bytes)?;
        let buffer = Arc::new(wav::decode_audio(&bytes).map_err(|e| BundleError::Audio {
            name: name.clone(),
            reason: e.to_string(),
        })?);
        decoded.insert(name.clone(), Arc::clone(&buffer));
        clip.buffer = buffer;
    }
    project.reindex();
    log::info!(
        "loaded bundle with {} tracks, {} clips and {} audio files",
        project.tracks.len(),
        project.clip_count(),
        decoded.len()
    );
    Ok(project)
}

pub fn load_bundle_bytes(bytes: &[u8]) -> Result<Project, BundleError> {
    load_bundle(Cursor::new(bytes))
}

pub fn load_bundle_file(path: impl AsRef<Path>) -> Result<Project, BundleError> {
    load_bundle(std::fs::File::open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::params::{Band, EffectKind, ParameterSet};
    use crate::project::{AccessLevel, EffectOwner, TrackId};

    fn tone(frames: usize, level: f32) -> Arc<AudioBuffer> {
        let samples = (0..frames).map(|i| level * ((i % 50) as f32 / 50.0 - 0.5)).collect();
        Arc::new(AudioBuffer::new(8000, vec![samples]))
    }

    fn sample_project() -> Project {
        let config = EngineConfig::default();
        let mut project = Project::new(96.0);
        let drums = project.add_track("drums", AccessLevel::Producer, &config).unwrap();
        let bass = project.add_track("bass", AccessLevel::Producer, &config).unwrap();
        let shared = tone(4000, 0.8);
        project.add_clip(drums, 0.0, "kick", Arc::clone(&shared)).unwrap();
        project.add_clip(drums, 2.0, "kick again", shared).unwrap();
        project.add_clip(bass, 1.0, "bass", tone(2000, 0.3)).unwrap();

        let delay = project
            .add_effect(EffectOwner::Track(drums), EffectKind::Delay, AccessLevel::Producer, &config)
            .unwrap();
        let mut params = project.effect(delay).unwrap().parameters.clone();
        params.set_number("time", 0.375);
        project.set_effect_parameters(delay, params, &config).unwrap();
        let eq = project
            .add_effect(EffectOwner::Track(bass), EffectKind::ParametricEq, AccessLevel::Producer, &config)
            .unwrap();
        project.add_band(eq, Band::peaking(120.0, -3.5), &config).unwrap();
        project
            .add_effect(EffectOwner::Master, EffectKind::Compressor, AccessLevel::Producer, &config)
            .unwrap();

        let track = project.track_mut(bass).unwrap();
        track.set_volume(0.7);
        track.set_pan(-25);
        track.soloed = true;
        project.clip_mut(ClipId(3)).unwrap().buffer_offset = 0.125;
        project.master_volume = 0.8;
        project.set_loop_region(1.0, 3.5, true, 100.0).unwrap();
        project
    }

    #[test]
    fn round_trip_preserves_the_project() {
        let project = sample_project();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.ifnt");
        save_bundle_file(&project, &path).unwrap();
        let loaded = load_bundle_file(&path).unwrap();

        assert_eq!(loaded.bpm, 96.0);
        assert_eq!(loaded.tracks.len(), 2);
        assert_eq!(loaded.clip_count(), 3);
        assert_eq!(loaded.master_effects, project.master_effects);
        assert_eq!(loaded.master_volume, 0.8);
        assert_eq!(loaded.loop_region, project.loop_region);
        for (a, b) in project.tracks.iter().zip(&loaded.tracks) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.effects, b.effects);
            assert_eq!((a.volume, a.pan, a.muted, a.soloed), (b.volume, b.pan, b.muted, b.soloed));
            assert_eq!(a.clips.len(), b.clips.len());
            for (ca, cb) in a.clips.iter().zip(&b.clips) {
                assert_eq!(
                    (ca.id, ca.start, ca.duration, ca.buffer_offset, &ca.label),
                    (cb.id, cb.start, cb.duration, cb.buffer_offset, &cb.label)
                );
                assert_eq!(ca.buffer.frames(), cb.buffer.frames());
            }
        }
        let bass = &loaded.tracks[1].clips[0];
        assert_eq!(bass.buffer_offset, 0.125);
    }

    #[test]
    fn shared_buffers_are_encoded_once() {
        let mut project = sample_project();
        let drums = project.tracks[0].id;
        let shared = Arc::clone(&project.tracks[0].clips[0].buffer);
        for i in 0..5 {
            project.add_clip(drums, 4.0 + i as f64, "kick", Arc::clone(&shared)).unwrap();
        }
        let bytes = save_bundle_bytes(&project).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        assert_eq!(archive.file_names().filter(|n| n.starts_with(AUDIO_DIR)).count(), 2);

        let mut text = String::new();
        archive.by_name(PROJECT_FILE).unwrap().read_to_string(&mut text).unwrap();
        let manifest: Manifest = serde_json::from_str(&text).unwrap();
        let kick = &manifest.audio[&project.tracks[0].clips[0].id];
        let kicks = manifest.audio.values().filter(|name| *name == kick).count();
        assert_eq!(kicks, 7);
    }

    #[test]
    fn identical_buffers_share_one_file() {
        let bytes = save_bundle_bytes(&sample_project()).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        let audio: Vec<String> = archive
            .file_names()
            .filter(|n| n.starts_with(AUDIO_DIR))
            .map(str::to_string)
            .collect();
        assert_eq!(audio.len(), 2);

        let loaded = load_bundle_bytes(&bytes).unwrap();
        let drums = &loaded.tracks[0].clips;
        assert!(Arc::ptr_eq(&drums[0].buffer, &drums[1].buffer));
        assert!(archive.by_name(PROJECT_FILE).is_ok());
    }

    #[test]
    fn resaving_produces_an_equivalent_bundle() {
        let first = save_bundle_bytes(&sample_project()).unwrap();
        let loaded = load_bundle_bytes(&first).unwrap();
        let second = save_bundle_bytes(&loaded).unwrap();

        let manifest = |bytes: &[u8]| -> serde_json::Value {
            let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
            let mut text = String::new();
            archive.by_name(PROJECT_FILE).unwrap().read_to_string(&mut text).unwrap();
            serde_json::from_str(&text).unwrap()
        };
        assert_eq!(manifest(&first), manifest(&second));
    }

    #[test]
    fn loading_advances_id_allocators() {
        let bytes = save_bundle_bytes(&sample_project()).unwrap();
        let mut loaded = load_bundle_bytes(&bytes).unwrap();
        let id = loaded
            .add_track("new", AccessLevel::Producer, &EngineConfig::default())
            .unwrap();
        assert_eq!(id, TrackId(3));
    }

    #[test]
    fn missing_project_file_is_reported() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("readme.txt", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"hello").unwrap();
        let bytes = zip.finish().unwrap().into_inner();
        assert!(matches!(
            load_bundle_bytes(&bytes),
            Err(BundleError::MissingProjectFile)
        ));
    }

    fn bundle_with_manifest(manifest: serde_json::Value) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(PROJECT_FILE, SimpleFileOptions::default()).unwrap();
        zip.write_all(manifest.to_string().as_bytes()).unwrap();
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn corrupt_manifest_is_rejected() {
        let manifest = |bpm: serde_json::Value, clip: serde_json::Value| {
            serde_json::json!({
                "format": 1,
                "project": {
                    "bpm": bpm,
                    "tracks": [{
                        "id": 1, "name": "t", "volume": 1.0, "pan": 0,
                        "clips": [clip]
                    }]
                },
                "audio": { "7": "audio_0.wav" }
            })
        };
        let clip = |start: f64, duration: f64| {
            serde_json::json!({ "id": 7, "start": start, "duration": duration, "bufferOffset": 0.0 })
        };

        for (bpm, clip) in [
            (serde_json::json!(-60.0), clip(0.0, 1.0)),
            (serde_json::json!(0.0), clip(0.0, 1.0)),
            (serde_json::json!(120.0), clip(-2.0, 1.0)),
            (serde_json::json!(120.0), clip(0.0, -1.0)),
        ] {
            let bytes = bundle_with_manifest(manifest(bpm, clip));
            assert!(matches!(load_bundle_bytes(&bytes), Err(BundleError::Invalid(_))));
        }

        let mut project = sample_project();
        project.tracks[1].effects[0].parameters = ParameterSet::BandList(vec![Band::peaking(-5.0, 0.0)]);
        let bytes = save_bundle_bytes(&project).unwrap();
        assert!(matches!(load_bundle_bytes(&bytes), Err(BundleError::Invalid(_))));
    }

    #[test]
    fn corrupt_audio_is_reported() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let project = sample_project();
        let mut audio = BTreeMap::new();
        for clip in project.tracks.iter().flat_map(|t| t.clips.iter()) {
            audio.insert(clip.id, "broken.wav".to_string());
        }
        let manifest = Manifest {
            format: FORMAT_VERSION,
            project,
            audio,
        };
        zip.start_file(PROJECT_FILE, options).unwrap();
        zip.write_all(&serde_json::to_vec(&manifest).unwrap()).unwrap();
        zip.start_file("audio/broken.wav", options).unwrap();
        zip.write_all(b"RIFF....WAVEnope").unwrap();
        let bytes = zip.finish().unwrap().into_inner();
        assert!(matches!(
            load_bundle_bytes(&bytes),
            Err(BundleError::Audio { name, .. }) if name == "broken.wav"
        ));
    }
}
