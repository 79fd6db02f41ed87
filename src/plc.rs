//! Packet Loss Concealment (PLC).
//!
//! Produces plausible audio for a frame whose packet never arrived, and keeps the SILK and
//! CELT decoder state (history buffers, band energies, de-emphasis memory) coherent so that
//! the next successfully-decoded frame does not click. See spec §4.6.
//!
//! The three sub-strategies (SILK, CELT, Hybrid) share one fade schedule ([`PlcState`]) but
//! otherwise operate on disjoint decoder state, mirroring the reference decoder's layering:
//! SILK PLC extrapolates from the pitch buffer, CELT PLC resynthesises from decaying band
//! energy, and Hybrid PLC runs both and sums the result.

use crate::celt::mode::NUM_BANDS;

/// Number of consecutive lost frames after which concealment gives up and the fade clamps
/// to silence (Property 3).
pub const MAX_CONCEALED_FRAMES: u32 = 5;
/// Multiplicative fade applied per consecutive loss.
pub const FADE_PER_FRAME: f32 = 0.5;
/// Below this fade level the engine reports exhaustion and clamps to exactly zero.
const FADE_FLOOR: f32 = 1e-3;
/// `EnergyDecayPerFrame`: linear per-band energy decay CELT PLC applies each concealed frame.
pub const ENERGY_DECAY_PER_FRAME: f32 = 0.85;
/// First CELT band Hybrid PLC is responsible for filling.
pub const HYBRID_START_BAND: usize = 17;

/// Read-only snapshot of the SILK state PLC needs, taken at the end of every good frame.
///
/// This is the "borrowed view struct" design sketched in spec §9: rather than wiring an
/// interface-style callback from the decoder into the concealment engine, the decoder hands
/// PLC an immutable copy of exactly the fields it needs once, after every frame attempt.
#[derive(Clone, Debug)]
pub(crate) struct SilkPlcSnapshot {
    pub(crate) voiced: bool,
    pub(crate) pitch_lag: usize,
    pub(crate) ltp_scale: f32,
    pub(crate) gains: [f32; 4],
    pub(crate) lpc: Vec<f32>,
    pub(crate) history_tail: Vec<f32>,
}

/// Read-only snapshot of the CELT state PLC needs.
#[derive(Clone, Debug)]
pub(crate) struct CeltPlcSnapshot {
    pub(crate) energy: [f32; NUM_BANDS],
    pub(crate) overlap: Vec<f32>,
    pub(crate) deemph_mem: [f32; 2],
    pub(crate) lcg_seed: u32,
    pub(crate) channels: usize,
}

/// A simple 32-bit linear congruential generator, used both for CELT PLC's noise fill and
/// for the reference decoder's comfort-noise dither (multiplier/increment from spec §4.6).
#[derive(Clone, Copy, Debug)]
pub(crate) struct Lcg(pub(crate) u32);

impl Lcg {
    const MULTIPLIER: u32 = 1_664_525;
    const INCREMENT: u32 = 1_013_904_223;

    pub(crate) fn next_f32(&mut self) -> f32 {
        self.0 = self.0.wrapping_mul(Self::MULTIPLIER).wrapping_add(Self::INCREMENT);
        ((self.0 >> 8) as i32 as f32) / (1i64 << 23) as f32
    }
}

/// Fade/loss-counter state machine shared by every concealment strategy (§4.6, Property 3).
#[derive(Clone, Copy, Debug)]
pub struct PlcState {
    fade: f32,
    lost_count: u32,
    last_mode: Option<crate::CodecMode>,
    last_frame_size: usize,
    last_channels: usize,
}

impl Default for PlcState {
    fn default() -> Self {
        Self::new()
    }
}

impl PlcState {
    /// Creates a fresh PLC state: fade at 1.0, no losses recorded.
    pub fn new() -> Self {
        Self {
            fade: 1.0,
            lost_count: 0,
            last_mode: None,
            last_frame_size: 0,
            last_channels: 0,
        }
    }

    /// Called at the start of every successfully decoded frame: restores `fade = 1.0` and
    /// clears the loss counter.
    pub fn reset(&mut self) {
        self.fade = 1.0;
        self.lost_count = 0;
    }

    /// Records one more consecutive lost frame: halves the fade factor, increments the
    /// counter, and clamps the fade to exactly zero once it drops below `FADE_FLOOR`.
    pub(crate) fn record_loss(&mut self) {
        self.lost_count = self.lost_count.saturating_add(1);
        self.fade *= FADE_PER_FRAME;
        if self.fade < FADE_FLOOR {
            self.fade = 0.0;
        }
    }

    /// The current fade multiplier, `0.5^lost_count` clamped to zero (Property 3).
    pub fn fade(&self) -> f32 {
        self.fade
    }

    /// Number of consecutive frames concealed so far.
    pub fn lost_count(&self) -> u32 {
        self.lost_count
    }

    /// `true` once concealment has run out of useful signal to extrapolate (either the
    /// maximum concealed-frame count was reached or the fade clamp fired).
    pub fn is_exhausted(&self) -> bool {
        self.lost_count >= MAX_CONCEALED_FRAMES || self.fade <= 0.0
    }

    pub(crate) fn remember_good_frame(
        &mut self,
        mode: crate::CodecMode,
        frame_size: usize,
        channels: usize,
    ) {
        self.last_mode = Some(mode);
        self.last_frame_size = frame_size;
        self.last_channels = channels;
    }

    pub(crate) fn last_mode(&self) -> Option<crate::CodecMode> {
        self.last_mode
    }

    pub(crate) fn last_frame_size(&self) -> usize {
        self.last_frame_size
    }

    pub(crate) fn last_channels(&self) -> usize {
        self.last_channels
    }
}

/// Synthesises one frame of SILK concealment, writing `frame_size` interleaved samples per
/// channel into a freshly allocated buffer (the allocating variant of §4.6's "two variants
/// per strategy").
pub(crate) fn conceal_silk(
    snapshot: &SilkPlcSnapshot,
    fade: f32,
    frame_size: usize,
    lcg: &mut Lcg,
) -> Vec<f32> {
    let mut out = vec![0.0f32; frame_size];
    conceal_silk_into(snapshot, fade, &mut out, lcg);
    out
}

/// Buffer-in variant of [`conceal_silk`].
pub(crate) fn conceal_silk_into(
    snapshot: &SilkPlcSnapshot,
    fade: f32,
    dst: &mut [f32],
    lcg: &mut Lcg,
) {
    let history = &snapshot.history_tail;
    let hlen = history.len();
    let order = snapshot.lpc.len();
    let mut local_history = history.clone();
    let drift = 1.0 + crate::silk::tables::PLC_PITCH_DRIFT;
    let mut lag = snapshot.pitch_lag as f32;
    let harm_att = crate::silk::tables::PLC_HARM_ATT[0];
    let (rand_v, rand_uv) = crate::silk::tables::PLC_RAND_ATT;

    let base_gain = snapshot.gains.iter().copied().fold(0.0f32, f32::max).max(1e-4);

    for (i, sample) in dst.iter_mut().enumerate() {
        let predicted = if snapshot.voiced && hlen > snapshot.pitch_lag + 2 {
            let idx = (hlen as f32 - lag).round() as isize;
            let idx = idx.clamp(0, hlen as isize - 1) as usize;
            local_history[idx] * snapshot.ltp_scale * harm_att
        } else {
            0.0
        };

        let noise_att = if snapshot.voiced { rand_v } else { rand_uv };
        let noise = lcg.next_f32() * base_gain * noise_att;

        let mut val = predicted + noise;
        // Short-term synthesis from the frozen LPC filter, same recursion shape as the
        // live decode path.
        let hlen2 = local_history.len();
        let mut lpc_pred = 0.0f32;
        for (k, &a) in snapshot.lpc.iter().enumerate() {
            if k < hlen2 {
                lpc_pred += a * local_history[hlen2 - 1 - k];
            }
        }
        val += lpc_pred;
        val *= fade;
        val = val.clamp(-1.0, 1.0);

        local_history.copy_within(1.., 0);
        if let Some(last) = local_history.last_mut() {
            *last = val;
        }

        lag *= drift;
        *sample = val;
        let _ = i;
        let _ = order;
    }
}

/// Synthesises one frame of CELT concealment in-place over `bands`' coefficient buffer:
/// decays every band's stored log-energy by [`ENERGY_DECAY_PER_FRAME`] (Property 5),
/// converts to linear amplitude scaled by `fade^2`, and fills each band with a unit-norm
/// random vector drawn from `lcg` scaled to the target energy.
pub(crate) fn conceal_celt_band_energy(
    energy: &mut [f32; NUM_BANDS],
    _fade: f32,
    start_band: usize,
) {
    // Energy is stored in log2 domain; decaying the *linear* energy by a constant factor
    // each frame is equivalent to adding that factor's (negative) log2 to the stored value.
    let decay_log2 = ENERGY_DECAY_PER_FRAME.log2();
    for e in energy.iter_mut().skip(start_band) {
        *e += decay_log2;
    }
}

/// Fills `coeffs[start_band..]`'s MDCT bins with noise shaped to `energy`'s linear value,
/// scaled by `fade^2`, using `lcg` for the random direction (§4.6).
pub(crate) fn fill_celt_noise(
    coeffs: &mut [f32],
    band_width: usize,
    band_start: usize,
    log2_energy: f32,
    fade: f32,
    lcg: &mut Lcg,
) {
    let end = (band_start + band_width).min(coeffs.len());
    if band_start >= end {
        return;
    }
    let mut vec: Vec<f32> = (band_start..end).map(|_| lcg.next_f32()).collect();
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-9);
    let linear_energy = 2f32.powf(log2_energy);
    let target_amp = linear_energy.max(0.0).sqrt() * fade * fade;
    for v in vec.iter_mut() {
        *v = *v / norm * target_amp;
    }
    coeffs[band_start..end].copy_from_slice(&vec);
}

#[cfg(test)]
mod tests {
    use proptest::prop_assert;

    use super::*;

    /// Property 3: fade after k losses equals `0.5^k`, clamped to zero below 1e-3, and a
    /// good frame resets it to 1.0.
    #[test]
    fn fade_is_monotone_and_clamps() {
        let mut plc = PlcState::new();
        assert_eq!(plc.fade(), 1.0);

        let mut expected = 1.0f32;
        for k in 1..=MAX_CONCEALED_FRAMES {
            plc.record_loss();
            expected *= FADE_PER_FRAME;
            let want = if expected < FADE_FLOOR { 0.0 } else { expected };
            assert_eq!(plc.fade(), want, "after {k} losses");
            assert_eq!(plc.lost_count(), k);
        }
        assert!(plc.is_exhausted());

        plc.reset();
        assert_eq!(plc.fade(), 1.0);
        assert_eq!(plc.lost_count(), 0);
        assert!(!plc.is_exhausted());
    }

    #[test]
    fn exhaustion_fires_at_max_concealed_frames() {
        let mut plc = PlcState::new();
        for _ in 0..MAX_CONCEALED_FRAMES - 1 {
            plc.record_loss();
            assert!(!plc.is_exhausted());
        }
        plc.record_loss();
        assert!(plc.is_exhausted());
    }

    #[test]
    fn lcg_is_deterministic_for_fixed_seed() {
        let mut a = Lcg(42);
        let mut b = Lcg(42);
        for _ in 0..100 {
            assert_eq!(a.next_f32(), b.next_f32());
        }
    }

    proptest::proptest! {
        /// Property 3, for all legal loss counts rather than one walk: fade never leaves
        /// `[0, 1]` and never increases as more consecutive losses are recorded.
        #[test]
        fn fade_never_increases_for_any_loss_count(k in 0u32..50) {
            let mut plc = PlcState::new();
            let mut previous = plc.fade();
            for _ in 0..k {
                plc.record_loss();
                let fade = plc.fade();
                prop_assert!((0.0..=1.0).contains(&fade));
                prop_assert!(fade <= previous);
                previous = fade;
            }
        }
    }
}
