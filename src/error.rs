use thiserror::Error;

use crate::project::{ClipId, EffectId, TrackId};

/// Top-level error returned by user-initiated engine actions.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error(transparent)]
    Suggestion(#[from] SuggestionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Misuse of the audio graph arena.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The handle refers to a node that was disposed (or never existed).
    #[error("node {0} is disposed or unknown")]
    StaleNode(String),
    #[error("node {0} has no parameter named {1}")]
    NoSuchParam(String, &'static str),
    #[error("node {node} is not a {expected} node")]
    WrongKind { node: String, expected: &'static str },
}

/// Rejected edits to the project model. No state is mutated when one of
/// these is returned.
#[derive(Debug, Error, PartialEq)]
pub enum ProjectError {
    #[error("track {0} not found")]
    TrackNotFound(TrackId),
    #[error("clip {0} not found")]
    ClipNotFound(ClipId),
    #[error("effect instance {0} not found")]
    EffectNotFound(EffectId),
    #[error("the free plan is limited to {limit} tracks")]
    TrackLimit { limit: usize },
    #[error("the free plan is limited to {limit} effects per track")]
    EffectLimit { limit: usize },
    #[error("parametric EQ is limited to {limit} bands")]
    BandLimit { limit: usize },
    #[error("effect {0} has no band list")]
    NotABandList(EffectId),
    #[error("band index {index} out of range for effect {effect}")]
    BandOutOfRange { effect: EffectId, index: usize },
    #[error("invalid parameter set for {effect}: {reason}")]
    InvalidParameters { effect: String, reason: String },
    #[error("beats per minute must be positive, got {0}")]
    InvalidTempo(f64),
    #[error("loop bounds must be finite, got {start}..{end}")]
    InvalidLoop { start: f64, end: f64 },
    #[error("clip {clip} has an invalid {reason}")]
    InvalidClip { clip: ClipId, reason: String },
    #[error("volume {0} is outside the mixer range")]
    InvalidVolume(f32),
    #[error("could not decode audio: {0}")]
    Decode(String),
}

/// Offline render / export failures.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("the project is empty; add some clips before exporting")]
    EmptyProject,
    #[error("invalid render length: {0} seconds")]
    InvalidDuration(f64),
    #[error("sample rate must be positive")]
    InvalidSampleRate,
    #[error("could not build the render graph: {0}")]
    Graph(#[from] GraphError),
    #[error("WAV encoding failed: {0}")]
    Encoding(String),
}

impl From<hound::Error> for ExportError {
    fn from(e: hound::Error) -> Self {
        ExportError::Encoding(e.to_string())
    }
}

/// Project bundle save/load failures.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("invalid project description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid project bundle: project.json not found")]
    MissingProjectFile,
    #[error("audio file {name} could not be decoded: {reason}")]
    Audio { name: String, reason: String },
    #[error("WAV encoding failed: {0}")]
    Encoding(String),
    #[error("invalid project: {0}")]
    Invalid(String),
}

impl From<hound::Error> for BundleError {
    fn from(e: hound::Error) -> Self {
        BundleError::Encoding(e.to_string())
    }
}

/// Rejected AI parameter suggestions; existing parameters are untouched.
#[derive(Debug, Error, PartialEq)]
pub enum SuggestionError {
    #[error("the suggestion service is not configured")]
    Unavailable,
    #[error("the suggestion service could not be reached: {0}")]
    Transport(String),
    #[error("the response did not contain a JSON object")]
    NoJsonObject,
    #[error("the response could not be parsed: {0}")]
    Unparseable(String),
    #[error("the response is missing required key {0}")]
    MissingKey(String),
    #[error("{key} = {value} is outside [{min}, {max}]")]
    OutOfRange { key: String, value: f64, min: f64, max: f64 },
    #[error("effect {0} does not support suggestions")]
    UnsupportedEffect(String),
}

/// Engine configuration could not be read.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
