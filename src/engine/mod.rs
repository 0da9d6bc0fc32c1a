//! Live and offline engines built on the audio graph.
//!
//! `chain` wires track and master signal chains, `transport` holds the
//! scheduling arithmetic, `scheduler` drives live playback and `offline`
//! renders mixdowns. `metronome` supplies the live click track.

pub mod chain;
pub mod metronome;
pub mod offline;
pub mod scheduler;
pub mod transport;

pub use chain::{EffectChain, MasterChain, TrackChain, TrackHead};
pub use metronome::{BeatGrid, Metronome};
pub use offline::{OfflineSession, export_mixdown, render_offline_mix};
pub use scheduler::{EngineState, MeterReading, PlaybackScheduler};
pub use transport::{ClipSchedule, TransportState, compute_position};
