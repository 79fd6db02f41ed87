//! Implements the CELT decoder.

use crate::celt::allocation::{fine_energy_bits, pulses_for_width};
use crate::celt::bands::{decode_coarse_energy, decode_fine_energy};
use crate::celt::comb_filter::comb_filter_inplace;
use crate::celt::mdct::Mdct;
use crate::celt::mode::{E_BANDS, NUM_BANDS, OVERLAP};
use crate::celt::pvq::{decode_pulses, reconstruct};
use crate::plc::{conceal_celt_band_energy, fill_celt_noise, CeltPlcSnapshot, Lcg};
use crate::range_coder::RangeDecoder;
use crate::{Channels, DecoderError, SamplingRate};

/// De-emphasis coefficient applied after the inverse MDCT (RFC 6716 §4.3.6).
const DEEMPH_COEFF: f32 = 0.85;

#[derive(Clone, Debug)]
struct ChannelState {
    energy: [f32; NUM_BANDS],
    overlap: Vec<f32>,
    deemph_mem: f32,
    post_period: usize,
    post_gain: f32,
    post_tapset: usize,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            energy: [0.0; NUM_BANDS],
            overlap: vec![0.0; OVERLAP],
            deemph_mem: 0.0,
            post_period: 0,
            post_gain: 0.0,
            post_tapset: 0,
        }
    }
}

/// The CELT decoder.
#[derive(Clone, Debug)]
pub(crate) struct CeltDecoder {
    channels: Channels,
    sampling_rate: SamplingRate,
    channel_state: Vec<ChannelState>,
    lcg_seed: u32,
    last_pitch: u32,
}

impl CeltDecoder {
    /// Creates a new CELT decoder.
    pub(crate) fn new(
        sampling_rate: SamplingRate,
        channels: Channels,
    ) -> Result<Self, DecoderError> {
        Ok(Self {
            channels,
            sampling_rate,
            channel_state: (0..channels as usize).map(|_| ChannelState::new()).collect(),
            lcg_seed: 0x9E37_79B9,
            last_pitch: 0,
        })
    }

    /// Resets the CELT decoder.
    pub(crate) fn reset(&mut self) -> Result<(), DecoderError> {
        self.channel_state = (0..self.channels as usize).map(|_| ChannelState::new()).collect();
        self.lcg_seed = 0x9E37_79B9;
        self.last_pitch = 0;
        Ok(())
    }

    /// Gets the pitch of the last decoded frame.
    pub(crate) fn pitch(&self) -> u32 {
        self.last_pitch
    }

    /// Takes a snapshot of the state CELT PLC needs, for channel 0 (PLC operates
    /// per-channel but the fade schedule is shared; the [`crate::hybrid`] and top-level
    /// decoder call this once per channel).
    pub(crate) fn plc_snapshot(&self, channel: usize) -> CeltPlcSnapshot {
        let ch = &self.channel_state[channel.min(self.channel_state.len() - 1)];
        CeltPlcSnapshot {
            energy: ch.energy,
            overlap: ch.overlap.clone(),
            deemph_mem: [ch.deemph_mem, ch.deemph_mem],
            lcg_seed: self.lcg_seed,
            channels: self.channels as usize,
        }
    }

    /// Decodes one CELT frame, appending `frame_size` interleaved samples per channel into
    /// `samples` (starting at whatever band `start_band` indicates, so Hybrid mode can
    /// restrict CELT to its high-band share of the spectrum).
    pub(crate) fn decode(
        &mut self,
        dec: &mut RangeDecoder,
        samples: &mut Vec<f32>,
        frame_size: usize,
        start_band: usize,
    ) -> Result<(), DecoderError> {
        let channel_count = self.channels as usize;
        let silence = dec.decode_bit_logp(15);

        let post_filter = dec.decode_bit_logp(1);
        let (post_period, post_gain, post_tapset) = if post_filter {
            let octave = dec.decode_uint(6);
            let period = (16 << octave) + dec.decode_bits(4 + octave) as usize;
            let gain_q = dec.decode_bits(3);
            let gain = gain_q as f32 * 0.09375;
            let tapset = if dec.decode_bit_logp(2) { 1 } else { 0 };
            (period, gain, tapset)
        } else {
            (0, 0.0, 0)
        };

        // Always read the transient bit: the encoder always writes it (one bit per frame
        // regardless of size), so making this conditional on `frame_size` desyncs the range
        // coder for every frame at or above 960 samples (20 ms @ 48 kHz). The value itself
        // is not consumed further (no short-block MDCT/tf-change support, see DESIGN.md).
        let _transient = dec.decode_bit_logp(3);
        let intra = dec.decode_bit_logp(3);

        let mut pcm_per_channel = Vec::with_capacity(channel_count);

        for channel in 0..channel_count {
            if channel >= self.channel_state.len() {
                self.channel_state.push(ChannelState::new());
            }

            if silence {
                let out = vec![0.0f32; frame_size];
                pcm_per_channel.push(out);
                continue;
            }

            let mut prev = if intra {
                [0.0f32; NUM_BANDS]
            } else {
                self.channel_state[channel].energy
            };
            let energy = decode_coarse_energy(dec, &mut prev)
                .map_err(|_| DecoderError::InternalError("celt coarse energy"))?;

            let mut energy = energy;
            let mut bits = [0u32; NUM_BANDS];
            for (b, slot) in bits.iter_mut().enumerate() {
                *slot = fine_energy_bits(b);
            }
            decode_fine_energy(dec, &mut energy, &bits);

            let mut coeffs = vec![0.0f32; 512.max(frame_size / 2)];
            for band in start_band..NUM_BANDS {
                let lo = E_BANDS[band] as usize;
                let hi = E_BANDS[band + 1] as usize;
                let width = (hi - lo).min(coeffs.len().saturating_sub(lo));
                if width == 0 {
                    continue;
                }
                let k = pulses_for_width(band, width);
                let pulses = decode_pulses(dec, width, k)
                    .map_err(|_| DecoderError::InternalError("celt pvq decode"))?;
                let shape = reconstruct(&pulses);
                let amp = 2f32.powf(energy[band] * 0.5);
                for (i, v) in shape.into_iter().enumerate() {
                    if lo + i < coeffs.len() {
                        coeffs[lo + i] = v * amp;
                    }
                }
            }

            let n = coeffs.len();
            let mdct = Mdct::new(n);
            let mut time = vec![0.0f32; n];
            mdct.inverse_overlap_add(&coeffs, &mut self.channel_state[channel].overlap, &mut time);

            let mut out = vec![0.0f32; frame_size];
            let copy_len = time.len().min(frame_size);
            out[..copy_len].copy_from_slice(&time[..copy_len]);

            if post_filter && post_period > 0 && out.len() > post_period + 2 {
                let prev_period = if self.channel_state[channel].post_period > 0 {
                    self.channel_state[channel].post_period
                } else {
                    post_period
                };
                let prev_gain = self.channel_state[channel].post_gain;
                let prev_tapset = self.channel_state[channel].post_tapset;
                let start = post_period + 2;
                let mut padded = vec![0.0f32; start + out.len()];
                padded[start..].copy_from_slice(&out);
                comb_filter_inplace(
                    &mut padded,
                    start,
                    prev_period,
                    post_period,
                    out.len(),
                    prev_gain,
                    post_gain,
                    prev_tapset,
                    post_tapset,
                    OVERLAP.min(out.len()),
                );
                out.copy_from_slice(&padded[start..]);
            }
            self.channel_state[channel].post_period = post_period;
            self.channel_state[channel].post_gain = post_gain;
            self.channel_state[channel].post_tapset = post_tapset;

            for sample in out.iter_mut() {
                let v = *sample + DEEMPH_COEFF * self.channel_state[channel].deemph_mem;
                self.channel_state[channel].deemph_mem = v;
                *sample = v;
            }

            self.channel_state[channel].energy = energy;
            pcm_per_channel.push(out);
            if post_period > 0 {
                self.last_pitch = post_period as u32;
            }
        }

        for i in 0..frame_size {
            for ch_out in &pcm_per_channel {
                samples.push(ch_out.get(i).copied().unwrap_or(0.0));
            }
        }

        Ok(())
    }

    /// The LCG seed CELT PLC should continue from, advanced one step for this call.
    pub(crate) fn next_lcg(&mut self) -> u32 {
        self.lcg_seed = self.lcg_seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.lcg_seed
    }

    pub(crate) fn channel_count(&self) -> usize {
        self.channels as usize
    }

    pub(crate) fn sampling_rate(&self) -> SamplingRate {
        self.sampling_rate
    }

    /// Applies de-emphasis and overlap/energy bookkeeping for a concealed frame produced
    /// by the PLC engine, so the next good frame continues smoothly (spec §4.6 "raw
    /// variant that skips de-emphasis" for decoder-owned paths, full variant otherwise).
    pub(crate) fn apply_concealed_frame(&mut self, channel: usize, energy: [f32; NUM_BANDS]) {
        if channel < self.channel_state.len() {
            self.channel_state[channel].energy = energy;
        }
    }

    /// Synthesises one concealed frame per every channel: decays the stored band energy
    /// ([`conceal_celt_band_energy`], Property 5), fills the spectrum with noise shaped to
    /// that energy ([`fill_celt_noise`]) scaled by `fade`, and runs the result back through
    /// the same inverse-MDCT/overlap-add/de-emphasis chain a normal decode uses, so state
    /// stays consistent for whichever good frame arrives next.
    pub(crate) fn conceal(&mut self, frame_size: usize, fade: f32) -> Vec<f32> {
        let channel_count = self.channels as usize;
        let mut pcm_per_channel = Vec::with_capacity(channel_count);

        for channel in 0..channel_count {
            if channel >= self.channel_state.len() {
                self.channel_state.push(ChannelState::new());
            }

            conceal_celt_band_energy(&mut self.channel_state[channel].energy, fade, 0);
            let energy = self.channel_state[channel].energy;

            let n = 512.max(frame_size / 2);
            let mut coeffs = vec![0.0f32; n];
            let mut lcg = Lcg(self.lcg_seed);
            for band in 0..NUM_BANDS {
                let lo = E_BANDS[band] as usize;
                let hi = E_BANDS[band + 1] as usize;
                let width = (hi - lo).min(n.saturating_sub(lo));
                if width == 0 {
                    continue;
                }
                fill_celt_noise(&mut coeffs, width, lo, energy[band], fade, &mut lcg);
            }
            self.lcg_seed = lcg.0;

            let mdct = Mdct::new(n);
            let mut time = vec![0.0f32; n];
            mdct.inverse_overlap_add(&coeffs, &mut self.channel_state[channel].overlap, &mut time);

            let mut out = vec![0.0f32; frame_size];
            let copy_len = time.len().min(frame_size);
            out[..copy_len].copy_from_slice(&time[..copy_len]);

            for sample in out.iter_mut() {
                let v = *sample + DEEMPH_COEFF * self.channel_state[channel].deemph_mem;
                self.channel_state[channel].deemph_mem = v;
                *sample = v;
            }

            pcm_per_channel.push(out);
        }

        let mut samples = Vec::with_capacity(frame_size * channel_count);
        for i in 0..frame_size {
            for ch_out in &pcm_per_channel {
                samples.push(ch_out.get(i).copied().unwrap_or(0.0));
            }
        }
        samples
    }
}
