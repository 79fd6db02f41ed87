//! Shared SILK constants and ICDF tables.
//!
//! The reference implementation carries the RFC 6716 Appendix A probability tables
//! verbatim (one ICDF per bandwidth/order/context combination, several hundred entries in
//! total). This crate instead derives a handful of representative ICDF shapes
//! procedurally and reuses them across contexts — see the table-fidelity Open Question in
//! `DESIGN.md`. Every table here still satisfies the range coder's contract: monotonically
//! non-increasing, ending at zero.

/// Maximum LPC prediction order SILK ever uses (WB frames, 16 coefficients).
pub(crate) const MAX_LPC_ORDER: usize = 16;
/// Maximum pitch lag, in samples, at the highest internal rate (16 kHz).
pub(crate) const MAX_PITCH_LAG: usize = 18 * 16;
/// Number of subframes in a 20 ms SILK frame (four 5 ms subframes).
pub(crate) const MAX_SUBFRAMES: usize = 4;
/// Order of the NLSF representation at 8/12 kHz (narrowband/mediumband).
pub(crate) const NLSF_ORDER_NB: usize = 10;
/// Order of the NLSF representation at 16 kHz (wideband).
pub(crate) const NLSF_ORDER_WB: usize = 16;

/// SILK's three per-subframe signal classifications (RFC 6716 §4.2.7.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FrameSignalType {
    /// No speech energy; excitation is comfort noise only.
    Inactive,
    /// Speech energy without a clear pitch periodicity.
    Unvoiced,
    /// Speech energy with long-term (pitch) periodicity; LTP is active.
    Voiced,
}

impl FrameSignalType {
    pub(crate) fn from_index(index: u32) -> Self {
        match index {
            0 => FrameSignalType::Inactive,
            1 => FrameSignalType::Unvoiced,
            _ => FrameSignalType::Voiced,
        }
    }

    pub(crate) fn to_index(self) -> u32 {
        match self {
            FrameSignalType::Inactive => 0,
            FrameSignalType::Unvoiced => 1,
            FrameSignalType::Voiced => 2,
        }
    }
}

/// ICDF for the 3-way frame type decision, conditioned on whether the previous frame had
/// active voice. Ends at 0 per the range coder's ICDF contract.
pub(crate) const FRAME_TYPE_ICDF: [u8; 4] = [255, 200, 80, 0];

/// ICDF for the 4-step delta gain index (predictive coding of the Q16 subframe gain).
pub(crate) const GAIN_DELTA_ICDF: [u8; 9] = [255, 230, 196, 154, 108, 66, 36, 12, 0];

/// ICDF for the independent (first-subframe) gain index, 32 steps of 3 dB each.
pub(crate) const GAIN_INDEX_ICDF: [u8; 32] = {
    let mut table = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        // Monotonically decreasing triangular shape, high mass on the mid-range gains.
        let remaining = 31 - i;
        table[i] = (remaining * remaining / 31) as u8;
        i += 1;
    }
    table
};

/// ICDF for the primary pitch-lag high part (coarse lag selection).
pub(crate) const PITCH_LAG_ICDF: [u8; 32] = GAIN_INDEX_ICDF;

/// ICDF for the per-subframe LTP filter index (selects one of 8 tap sets).
pub(crate) const LTP_FILTER_ICDF: [u8; 8] = [255, 224, 192, 160, 128, 96, 64, 0];

/// The 8 legal LTP tap sets (5-tap pitch predictors), Q14-equivalent floats here since
/// this crate keeps SILK's per-sample synthesis in floating point.
pub(crate) const LTP_TAPS: [[f32; 5]; 8] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 0.2, 0.0, 0.0],
    [0.0, 0.1, 0.4, 0.1, 0.0],
    [-0.05, 0.15, 0.6, 0.15, -0.05],
    [0.0, 0.25, 0.5, 0.25, 0.0],
    [-0.1, 0.2, 0.7, 0.2, -0.1],
    [0.0, 0.3, 0.85, 0.3, 0.0],
    [-0.05, 0.25, 0.9, 0.25, -0.05],
];

/// ICDF for the shell-code pulse count per 16-sample block (capped representative shape).
pub(crate) const PULSE_COUNT_ICDF: [u8; 17] = [
    255, 240, 220, 195, 165, 135, 108, 84, 64, 47, 33, 22, 14, 8, 4, 1, 0,
];

/// Minimum spacing (in normalised NLSF units, `[0, 1]`) enforced between adjacent line
/// frequencies during stabilisation.
pub(crate) const NLSF_MIN_SPACING: f32 = 0.012;

/// The clamp window the middle LTP coefficient's Q14 value is restored into by
/// `update_from_good_frame` (Property 6), expressed here in the crate's float domain.
pub(crate) const LTP_GAIN_CLAMP: (f32, f32) = (0.7, 0.95);

/// `pitchDriftFacQ16`-equivalent drift applied per PLC subframe (Q16 `1/65536`).
pub(crate) const PLC_PITCH_DRIFT: f32 = 1.0 / 65536.0;

/// `harmAttQ15`-equivalent per-frame harmonic attenuation during SILK PLC.
pub(crate) const PLC_HARM_ATT: [f32; 2] = [0.99, 0.95];

/// `randAttVQ15`/`randAttUVQ15`-equivalent noise attenuation during SILK PLC (voiced, unvoiced).
pub(crate) const PLC_RAND_ATT: (f32, f32) = (0.05, 0.25);

pub(crate) fn nlsf_order(internal_rate_hz: u32) -> usize {
    if internal_rate_hz >= 16000 {
        NLSF_ORDER_WB
    } else {
        NLSF_ORDER_NB
    }
}

/// NLSF stabilisation (RFC 6716 §4.2.7.5): enforces a minimum spacing between adjacent
/// line frequencies so the resulting filter can't degenerate into a pair of coincident
/// roots. Shared between encoder and decoder since both need identical behaviour for the
/// predictive NLSF coding loop to stay in sync.
pub(crate) fn stabilise_nlsf(nlsf: &mut [f32], min_spacing: f32) {
    for _ in 0..20 {
        let mut changed = false;
        for i in 0..nlsf.len().saturating_sub(1) {
            if nlsf[i + 1] - nlsf[i] < min_spacing {
                let mid = (nlsf[i] + nlsf[i + 1]) / 2.0;
                nlsf[i] = mid - min_spacing / 2.0;
                nlsf[i + 1] = mid + min_spacing / 2.0;
                changed = true;
            }
        }
        if nlsf.first().is_some_and(|&v| v < min_spacing / 2.0) {
            nlsf[0] = min_spacing / 2.0;
            changed = true;
        }
        if let Some(last) = nlsf.last_mut() {
            if *last > 1.0 - min_spacing / 2.0 {
                *last = 1.0 - min_spacing / 2.0;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}
