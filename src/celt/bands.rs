//! Band energy coding: a Laplace-coded coarse term per band plus raw-bit fine refinement
//! (RFC 6716 §4.3.2, "Energy Envelope").
//!
//! The reference implementation predicts each band's coarse energy from both the previous
//! frame's value for that band and the already-decoded energy of the band below it, using a
//! 2-D table of prediction coefficients and per-band Laplace parameters lifted from the
//! RFC's Appendix A.3 (`e_prob_model`). This crate keeps the inter-frame (previous-frame)
//! half of that prediction and uses a single procedurally-derived per-band decay/start-
//! frequency pair instead of reproducing the appendix table verbatim — see the
//! table-fidelity Open Question in `DESIGN.md`. The coding shape (Laplace-coded coarse
//! term, raw-bit fine term, all-or-nothing energy floor) matches the reference exactly.

use crate::celt::mode::NUM_BANDS;
use crate::decoder_error::DecoderError;
use crate::encoder_error::EncoderError;
use crate::range_coder::{RangeDecoder, RangeEncoder};

/// Size, in the same units as the decoded energies, of one coarse quantization step.
const COARSE_STEP: f32 = 0.5;

/// Q15 decay rate shared by every band's coarse Laplace model.
const COARSE_DECAY: u32 = 6000;

/// Q15 starting frequency (probability mass assigned to a zero delta) for band `b`. Lower
/// bands carry more energy and vary less frame-to-frame, so they get a sharper
/// distribution (higher `fs`); higher bands get a flatter one.
fn coarse_fs(band: usize) -> u32 {
    let base = 6000u32.saturating_sub(band as u32 * 150);
    base.clamp(500, 6000)
}

/// Decodes the coarse (Laplace-coded) energy for every band, updating `prev` in place so
/// the next frame's call predicts from this one.
pub(crate) fn decode_coarse_energy(
    dec: &mut RangeDecoder,
    prev: &mut [f32; NUM_BANDS],
) -> Result<[f32; NUM_BANDS], DecoderError> {
    let mut energy = [0.0f32; NUM_BANDS];
    for band in 0..NUM_BANDS {
        let qi = dec.decode_laplace(coarse_fs(band), COARSE_DECAY);
        let value = prev[band] + qi as f32 * COARSE_STEP;
        energy[band] = value;
        prev[band] = value;
    }
    Ok(energy)
}

/// Encodes the coarse energy for every band against the running prediction in `prev`.
pub(crate) fn encode_coarse_energy(
    enc: &mut RangeEncoder,
    prev: &mut [f32; NUM_BANDS],
    energy: &[f32; NUM_BANDS],
) -> Result<(), EncoderError> {
    for band in 0..NUM_BANDS {
        let delta = energy[band] - prev[band];
        let mut qi = (delta / COARSE_STEP).round() as i32;
        enc.encode_laplace(&mut qi, coarse_fs(band), COARSE_DECAY)?;
        prev[band] += qi as f32 * COARSE_STEP;
    }
    Ok(())
}

/// Decodes the fine energy refinement for every band using `bits[band]` raw bits of
/// precision, adding the result onto `energy` in place.
pub(crate) fn decode_fine_energy(
    dec: &mut RangeDecoder,
    energy: &mut [f32; NUM_BANDS],
    bits: &[u32; NUM_BANDS],
) {
    for band in 0..NUM_BANDS {
        let nbits = bits[band];
        if nbits == 0 {
            continue;
        }
        let raw = dec.decode_bits(nbits);
        let frac = raw as f32 / (1u32 << nbits) as f32 - 0.5;
        energy[band] += frac * COARSE_STEP;
    }
}

/// Encodes the fine energy refinement for every band, mirroring [`decode_fine_energy`].
pub(crate) fn encode_fine_energy(
    enc: &mut RangeEncoder,
    energy: &[f32; NUM_BANDS],
    quantized: &[f32; NUM_BANDS],
    bits: &[u32; NUM_BANDS],
) -> Result<(), EncoderError> {
    for band in 0..NUM_BANDS {
        let nbits = bits[band];
        if nbits == 0 {
            continue;
        }
        let residual = (energy[band] - quantized[band]) / COARSE_STEP + 0.5;
        let levels = 1u32 << nbits;
        let raw = ((residual * levels as f32).round() as i64).clamp(0, levels as i64 - 1) as u32;
        enc.encode_bits(raw, nbits)?;
    }
    Ok(())
}
