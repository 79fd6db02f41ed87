//! Implements the SILK (linear-prediction speech) codec core.
//!
//! SILK operates on 8/12/16 kHz internal frames (resampled to whatever output rate the
//! session was opened at) using three building blocks in sequence: a normalised
//! line-spectral frequency (NLSF) decoder that reconstructs the short-term linear
//! prediction filter, a long-term (pitch) predictor for voiced frames, and a shell-coded
//! excitation signal that drives both filters.

#[cfg(feature = "decoder")]
pub(crate) use decoder::{LostFlag, SilkDecoder};
#[cfg(feature = "encoder")]
pub(crate) use encoder::SilkEncoder;
pub(crate) use tables::FrameSignalType;

#[cfg(feature = "decoder")]
mod decoder;
#[cfg(feature = "encoder")]
mod encoder;
pub(crate) mod tables;
