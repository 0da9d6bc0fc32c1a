//! Sample-level DSP primitives.
//!
//! Everything here is plain per-block processing with no knowledge of the
//! graph. The same code renders live blocks for an AudioWorklet host and
//! offline mixdowns.

pub mod analyser;
pub mod compressor;
pub mod convolver;
pub mod delay;
pub mod filter;
pub mod mixer;
pub mod oscillator;
pub mod param;
pub mod waveshaper;
