//! Implements the Silk decoder.

use crate::math::{clamp_i32, fast_exp2};
use crate::plc::SilkPlcSnapshot;
use crate::range_coder::RangeDecoder;
use crate::silk::tables::{
    nlsf_order, stabilise_nlsf, FrameSignalType, FRAME_TYPE_ICDF, GAIN_DELTA_ICDF,
    GAIN_INDEX_ICDF, LTP_FILTER_ICDF, LTP_GAIN_CLAMP, LTP_TAPS, MAX_LPC_ORDER, MAX_PITCH_LAG,
    MAX_SUBFRAMES, NLSF_MIN_SPACING, PITCH_LAG_ICDF, PULSE_COUNT_ICDF,
};
use crate::{Channels, DecoderError, SamplingRate};

/// Whether the caller is asking for a normal decode, concealment for a lost frame, or a
/// forward-error-correction decode of an earlier frame carried redundantly in this one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum LostFlag {
    /// No packet loss.
    NoLoss,
    /// Packet loss.
    Loss,
    /// Forward correction.
    DecodeFec,
}

/// Per-channel SILK decoder state that must survive across frames (§3 "SILK decoder
/// state").
#[derive(Clone, Debug)]
struct ChannelState {
    /// LPC synthesis filter history, most recent sample last.
    lpc_history: Vec<f32>,
    /// Long-term-prediction excitation history, indexed the same way as `lpc_history`.
    ltp_history: Vec<f32>,
    /// Previous frame's LPC coefficients (one per MAX_LPC_ORDER slot, float domain here).
    prev_lpc: Vec<f32>,
    /// Previous frame's per-subframe gains.
    prev_gains: [f32; MAX_SUBFRAMES],
    /// Previous frame's pitch lag in samples.
    prev_lag: usize,
    /// Previous frame's LTP scale factor.
    prev_ltp_scale: f32,
    /// Previous frame's NLSF vector (normalised, `[0, 1]`).
    prev_nlsf: Vec<f32>,
    /// Noise-shaping LCG seed, carried so comfort noise and dither stay deterministic
    /// frame-to-frame exactly like the reference decoder's `LCG_seed`.
    lcg_seed: u32,
    /// Whether the previous frame was voiced; used by the PLC engine to pick a strategy.
    prev_voiced: bool,
}

impl ChannelState {
    fn new(max_order: usize) -> Self {
        Self {
            lpc_history: vec![0.0; MAX_PITCH_LAG + max_order],
            ltp_history: vec![0.0; MAX_PITCH_LAG + max_order],
            prev_lpc: vec![0.0; max_order],
            prev_gains: [0.0; MAX_SUBFRAMES],
            prev_lag: MAX_PITCH_LAG / 2,
            prev_ltp_scale: 1.0,
            prev_nlsf: (0..max_order)
                .map(|i| (i + 1) as f32 / (max_order + 1) as f32)
                .collect(),
            lcg_seed: 0x1234_5678,
            prev_voiced: false,
        }
    }

    fn push_history(history: &mut [f32], value: f32) {
        history.copy_within(1.., 0);
        if let Some(last) = history.last_mut() {
            *last = value;
        }
    }

    fn lcg_next(&mut self) -> f32 {
        self.lcg_seed = self
            .lcg_seed
            .wrapping_mul(196_314_165)
            .wrapping_add(907_633_515);
        // Map the top bits onto [-1, 1).
        ((self.lcg_seed >> 8) as i32 as f32) / (1u32 << 23) as f32
    }
}

/// The Silk decoder.
#[derive(Clone, Debug)]
pub(crate) struct SilkDecoder {
    sampling_rate: SamplingRate,
    channels: Channels,
    internal_sampling_rate: SamplingRate,
    internal_channels: Channels,
    payload_size_ms: usize,
    channel_state: Vec<ChannelState>,
    nlsf_order: usize,
}

impl SilkDecoder {
    /// Creates a new Silk decoder. Configures the output sampling rate and output channels.
    pub(crate) fn new(
        sampling_rate: SamplingRate,
        channels: Channels,
    ) -> Result<Self, DecoderError> {
        let internal_sampling_rate = internal_rate_for(sampling_rate);
        let nlsf_order = nlsf_order(internal_sampling_rate as u32);
        let channel_count = channels as usize;

        Ok(Self {
            sampling_rate,
            channels,
            internal_sampling_rate,
            internal_channels: channels,
            payload_size_ms: 20,
            channel_state: (0..channel_count)
                .map(|_| ChannelState::new(nlsf_order))
                .collect(),
            nlsf_order,
        })
    }

    /// Resets the Silk decoder.
    pub(crate) fn reset(&mut self) -> Result<(), DecoderError> {
        let channel_count = self.channels as usize;
        self.channel_state = (0..channel_count)
            .map(|_| ChannelState::new(self.nlsf_order))
            .collect();
        Ok(())
    }

    /// Gets the pitch of the last decoded frame, in samples at 48 kHz.
    pub(crate) fn pitch(&self) -> u32 {
        let lag = self.channel_state.first().map_or(0, |c| c.prev_lag);
        let scale = 48_000 / self.internal_sampling_rate as u32;
        lag as u32 * scale
    }

    /// Sets the internal channels.
    pub(crate) fn internal_channels(&mut self, internal_channels: Channels) {
        self.internal_channels = internal_channels;
    }

    /// Sets the internal channels.
    pub(crate) fn set_internal_channels(&mut self, internal_channels: Channels) {
        self.internal_channels = internal_channels;
    }

    /// Sets the sampling rate.
    pub(crate) fn set_internal_sampling_rate(&mut self, sampling_rate: SamplingRate) {
        self.internal_sampling_rate = sampling_rate;
    }

    /// Sets the payload size in ms.
    pub(crate) fn set_payload_size_ms(&mut self, payload_size_ms: usize) {
        self.payload_size_ms = payload_size_ms;
    }

    /// Returns the internal sampling rate SILK is currently decoding at (8/12/16 kHz,
    /// chosen from the output rate by [`internal_rate_for`]).
    pub(crate) fn internal_sampling_rate(&self) -> SamplingRate {
        self.internal_sampling_rate
    }

    /// Takes a read-only snapshot of the state needed to drive SILK PLC for `channel` once
    /// this frame is no longer the current one. Called by the owning [`crate::Decoder`]
    /// after every successful decode.
    pub(crate) fn plc_snapshot(&self, channel: usize) -> SilkPlcSnapshot {
        let idx = channel.min(self.channel_state.len().saturating_sub(1));
        let ch = &self.channel_state[idx];
        SilkPlcSnapshot {
            voiced: ch.prev_voiced,
            pitch_lag: ch.prev_lag,
            ltp_scale: ch.prev_ltp_scale,
            gains: ch.prev_gains,
            lpc: ch.prev_lpc.clone(),
            history_tail: ch.lpc_history.clone(),
        }
    }

    /// Decodes one SILK frame (one Opus frame's worth of samples) for every channel,
    /// appending interleaved `f32` PCM samples at the internal sampling rate into `samples`.
    ///
    /// `lost_flag` selects between a normal decode, PLC (the caller passes no range
    /// decoder) and FEC (decoding the redundant copy of a previous frame).
    pub(crate) fn decode(
        &mut self,
        dec: &mut Option<RangeDecoder>,
        samples: &mut Vec<f32>,
        frame_size: &mut usize,
        lost_flag: LostFlag,
        _first_frame: bool,
    ) -> Result<(), DecoderError> {
        let subframe_len = self.internal_sampling_rate as usize / 200; // 5 ms
        let subframes = (self.payload_size_ms / 5).clamp(1, MAX_SUBFRAMES);
        let total_len = subframe_len * subframes;
        *frame_size = total_len;

        let channel_count = self.internal_channels as usize;
        let order = self.nlsf_order;

        if matches!(lost_flag, LostFlag::Loss) || dec.is_none() {
            // Concealment is handled by the PLC engine one layer up; here we just keep
            // state consistent by decaying the stored gain so a resumed good frame doesn't
            // see a stale large gain.
            for ch in self.channel_state.iter_mut() {
                ch.prev_gains.iter_mut().for_each(|g| *g *= 0.5);
            }
            samples.resize(samples.len() + total_len * channel_count, 0.0);
            return Ok(());
        }

        let decoder = dec.as_mut().ok_or(DecoderError::InternalError("missing range decoder"))?;

        for channel in 0..channel_count {
            if channel >= self.channel_state.len() {
                self.channel_state.push(ChannelState::new(order));
            }
        }

        let mut channel_pcm: Vec<Vec<f32>> = Vec::with_capacity(channel_count);

        for channel in 0..channel_count {
            let pcm = self.decode_channel_frame(decoder, channel, subframes, subframe_len, order)?;
            channel_pcm.push(pcm);
        }

        for i in 0..total_len {
            for pcm in &channel_pcm {
                samples.push(pcm[i]);
            }
        }

        Ok(())
    }

    fn decode_channel_frame(
        &mut self,
        decoder: &mut RangeDecoder,
        channel: usize,
        subframes: usize,
        subframe_len: usize,
        order: usize,
    ) -> Result<Vec<f32>, DecoderError> {
        let vad_active = decoder.decode_bit_logp(1);

        let mut out = Vec::with_capacity(subframe_len * subframes);

        // NLSF indices: one delta-coded residual per coefficient, interpreted as a
        // normalised line-spectral frequency in [0, 1].
        let mut nlsf = {
            let state = &self.channel_state[channel];
            state.prev_nlsf.clone()
        };
        for value in nlsf.iter_mut() {
            let delta = decoder.decode_icdf(&GAIN_DELTA_ICDF, 8) as i32 - 4;
            *value = (*value + delta as f32 / 64.0).clamp(0.0, 1.0);
        }
        stabilise_nlsf(&mut nlsf, NLSF_MIN_SPACING);
        let lpc = nlsf_to_lpc(&nlsf, order);
        let lpc = bandwidth_expand_until_stable(&lpc);

        let mut pitch_lag = self.channel_state[channel].prev_lag;
        let mut prev_gain = {
            let g = self.channel_state[channel].prev_gains[MAX_SUBFRAMES - 1];
            if g > 0.0 {
                g
            } else {
                0.1
            }
        };

        for sf in 0..subframes {
            let frame_type = if vad_active {
                FrameSignalType::from_index(decoder.decode_icdf(&FRAME_TYPE_ICDF, 8))
            } else {
                FrameSignalType::Inactive
            };

            let gain_index = if sf == 0 {
                decoder.decode_icdf(&GAIN_INDEX_ICDF, 8)
            } else {
                decoder.decode_icdf(&GAIN_DELTA_ICDF, 8)
            };
            let gain_db = gain_index as f32 * 0.75 - 4.0;
            let mut gain = prev_gain * fast_exp2(gain_db / 6.0);
            gain = gain.clamp(1e-5, 32768.0);
            prev_gain = gain;
            self.channel_state[channel].prev_gains[sf] = gain;

            let voiced = matches!(frame_type, FrameSignalType::Voiced);
            if voiced {
                let lag_delta = decoder.decode_icdf(&PITCH_LAG_ICDF, 8) as i32 - 16;
                pitch_lag = (pitch_lag as i32 + lag_delta)
                    .clamp(32, MAX_PITCH_LAG as i32 - order as i32 - 1) as usize;
            }
            let ltp_index = decoder.decode_icdf(&LTP_FILTER_ICDF, 8) as usize;
            let ltp_scale_q14 = {
                let raw = decoder.decode_bits(2) as f32 / 3.0;
                (LTP_GAIN_CLAMP.0 + raw * (LTP_GAIN_CLAMP.1 - LTP_GAIN_CLAMP.0))
                    .clamp(LTP_GAIN_CLAMP.0, LTP_GAIN_CLAMP.1)
            };

            let excitation =
                decode_excitation(decoder, subframe_len, frame_type, &mut self.channel_state[channel]);

            let history_len = self.channel_state[channel].ltp_history.len();
            let mut subframe_out = Vec::with_capacity(subframe_len);
            for &exc in excitation.iter() {
                let mut sample = exc * gain;

                if voiced && pitch_lag + 2 < history_len {
                    let hist = &self.channel_state[channel].ltp_history;
                    let base = history_len - pitch_lag;
                    let taps = LTP_TAPS[ltp_index.min(LTP_TAPS.len() - 1)];
                    let mut ltp_pred = 0.0f32;
                    for (k, &tap) in taps.iter().enumerate() {
                        let idx = base + k;
                        if idx >= 2 && idx < history_len {
                            ltp_pred += tap * hist[idx - 2];
                        }
                    }
                    sample += ltp_pred * ltp_scale_q14;
                }

                // Short-term (LPC) synthesis filter: sample + sum(a_i * history[-i]).
                let hist = &self.channel_state[channel].lpc_history;
                let hlen = hist.len();
                let mut predicted = 0.0f32;
                for (i, &a) in lpc.iter().enumerate() {
                    if i < hlen {
                        predicted += a * hist[hlen - 1 - i];
                    }
                }
                sample += predicted;
                sample = sample.clamp(-1.0, 1.0);

                ChannelState::push_history(&mut self.channel_state[channel].lpc_history, sample);
                ChannelState::push_history(&mut self.channel_state[channel].ltp_history, exc * gain);

                subframe_out.push(sample);
            }

            out.extend(subframe_out);
            self.channel_state[channel].prev_voiced = voiced;
            self.channel_state[channel].prev_lag = pitch_lag;
            self.channel_state[channel].prev_ltp_scale = ltp_scale_q14;
        }

        self.channel_state[channel].prev_nlsf = nlsf;
        self.channel_state[channel].prev_lpc = lpc;

        Ok(out)
    }
}

fn internal_rate_for(sampling_rate: SamplingRate) -> SamplingRate {
    match sampling_rate {
        SamplingRate::Hz8000 => SamplingRate::Hz8000,
        SamplingRate::Hz12000 => SamplingRate::Hz12000,
        _ => SamplingRate::Hz16000,
    }
}

/// Converts a normalised NLSF vector to direct-form LPC coefficients.
///
/// The reference implementation evaluates two Chebyshev-like polynomials built from the
/// cosines of alternating NLSF values (one polynomial per symmetric/antisymmetric half of
/// the LPC spectrum) using Q12 fixed point. This crate evaluates the same polynomial
/// recursion in `f32` instead of reproducing the reference's fixed-point rounding exactly
/// — see the table-fidelity Open Question in `DESIGN.md`.
pub(crate) fn nlsf_to_lpc(nlsf: &[f32], order: usize) -> Vec<f32> {
    use std::f32::consts::PI;

    let half = order / 2;
    let cos_vals: Vec<f32> = nlsf.iter().map(|&v| (v * PI).cos()).collect();

    // Build the two half-order polynomials P and Q from alternating roots.
    let build = |roots: &[f32]| -> Vec<f32> {
        let mut poly = vec![1.0f32];
        for &r in roots {
            let mut next = vec![0.0f32; poly.len() + 2];
            for (i, &c) in poly.iter().enumerate() {
                next[i] += c;
                next[i + 2] += c;
                next[i + 1] -= 2.0 * r * c;
            }
            poly = next;
        }
        poly
    };

    let p_roots: Vec<f32> = cos_vals.iter().step_by(2).copied().collect();
    let q_roots: Vec<f32> = cos_vals.iter().skip(1).step_by(2).copied().collect();
    let p = build(&p_roots);
    let q = build(&q_roots);

    let n = order + 1;
    let mut a = vec![0.0f32; n];
    for i in 0..n {
        let pi = p.get(i).copied().unwrap_or(0.0);
        let qi = q.get(i).copied().unwrap_or(0.0);
        a[i] = 0.5 * (pi + qi);
    }
    // a[0] is always 1 (unit DC term); drop it, negate the rest for the synthesis-filter
    // sign convention (`x[n] = e[n] + sum(a_i * x[n-i])`).
    let _ = half;
    a.iter().skip(1).take(order).map(|v| -*v).collect()
}

/// Iteratively bandwidth-expands `lpc` (`a_i *= gamma^i` for a shrinking `gamma`) until the
/// step-down (Levinson) recursion confirms every reflection coefficient has magnitude < 1,
/// i.e. the synthesis filter is guaranteed stable, capped at 20 iterations per §4.3.
pub(crate) fn bandwidth_expand_until_stable(lpc: &[f32]) -> Vec<f32> {
    let mut gamma = 1.0f32;
    let mut coeffs = lpc.to_vec();
    for _ in 0..20 {
        if is_stable(&coeffs) {
            return coeffs;
        }
        gamma *= 0.99;
        coeffs = lpc
            .iter()
            .enumerate()
            .map(|(i, &a)| a * gamma.powi(i as i32 + 1))
            .collect();
    }
    coeffs
}

/// Step-down recursion: derives reflection coefficients from direct-form LPC coefficients
/// and reports whether every one has magnitude strictly less than 1.
fn is_stable(lpc: &[f32]) -> bool {
    let order = lpc.len();
    if order == 0 {
        return true;
    }
    let mut a = lpc.to_vec();
    for m in (1..=order).rev() {
        let k = a[m - 1];
        if k.abs() >= 0.999_5 {
            return false;
        }
        if m == 1 {
            break;
        }
        let denom = 1.0 - k * k;
        if denom.abs() < 1e-6 {
            return false;
        }
        let mut next = vec![0.0f32; m - 1];
        for i in 0..m - 1 {
            next[i] = (a[i] - k * a[m - 2 - i]) / denom;
        }
        a = next;
    }
    true
}

/// Decodes one subframe's excitation signal via shell coding: a pulse-count-per-block
/// value, per-sample magnitudes that sum to that count, LSB refinement bits and sign bits
/// (RFC 6716 §4.2.7.8).
fn decode_excitation(
    dec: &mut RangeDecoder,
    n: usize,
    frame_type: FrameSignalType,
    state: &mut ChannelState,
) -> Vec<f32> {
    let mut out = Vec::with_capacity(n);
    if matches!(frame_type, FrameSignalType::Inactive) {
        for _ in 0..n {
            out.push(state.lcg_next() * 0.02);
        }
        return out;
    }

    const BLOCK: usize = 16;
    let mut remaining = n;
    let mut pos = 0;
    while remaining > 0 {
        let block_len = remaining.min(BLOCK);
        let pulse_count = dec.decode_icdf(&PULSE_COUNT_ICDF, 8);
        let mut mags = vec![0u32; block_len];
        let mut left = pulse_count;
        for slot in mags.iter_mut().take(block_len.saturating_sub(1)) {
            if left == 0 {
                break;
            }
            let m = dec.decode_uint(left + 1);
            *slot = m;
            left -= m;
        }
        if let Some(last) = mags.last_mut() {
            if block_len > 0 {
                *last += left;
            }
        }

        for &mag in &mags {
            let lsb = dec.decode_bits(1);
            let value = (mag << 1 | lsb) as f32 / 4.0;
            let sign = if mag > 0 && dec.decode_bits(1) != 0 {
                -1.0
            } else {
                1.0
            };
            out.push(sign * value);
        }
        pos += block_len;
        remaining -= block_len;
    }
    debug_assert_eq!(pos, n);
    let _ = clamp_i32;
    out
}
