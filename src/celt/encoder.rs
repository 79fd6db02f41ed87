//! Implements the CELT encoder.

use crate::celt::allocation::{fine_energy_bits, pulses_for_width};
use crate::celt::bands::{encode_coarse_energy, encode_fine_energy};
use crate::celt::mdct::Mdct;
use crate::celt::mode::{E_BANDS, NUM_BANDS};
use crate::celt::pvq::{encode_pulses, search_pulses};
use crate::encoder_error::EncoderError;
use crate::range_coder::RangeEncoder;
use crate::{Channels, SamplingRate};

#[derive(Clone, Debug)]
struct ChannelState {
    energy: [f32; NUM_BANDS],
    overlap: Vec<f32>,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            energy: [0.0; NUM_BANDS],
            overlap: vec![0.0; crate::celt::mode::OVERLAP],
        }
    }
}

/// The CELT encoder.
#[derive(Clone, Debug)]
pub(crate) struct CeltEncoder {
    channels: Channels,
    sampling_rate: SamplingRate,
    channel_state: Vec<ChannelState>,
    complexity: u8,
    vbr: bool,
}

impl CeltEncoder {
    /// Creates a new CELT encoder.
    pub(crate) fn new(sampling_rate: SamplingRate, channels: Channels) -> Self {
        Self {
            channels,
            sampling_rate,
            channel_state: (0..channels as usize).map(|_| ChannelState::new()).collect(),
            complexity: 10,
            vbr: true,
        }
    }

    pub(crate) fn set_complexity(&mut self, complexity: u8) {
        self.complexity = complexity;
    }

    pub(crate) fn set_vbr(&mut self, vbr: bool) {
        self.vbr = vbr;
    }

    pub(crate) fn sampling_rate(&self) -> SamplingRate {
        self.sampling_rate
    }

    /// Encodes `frame_size` interleaved `f32` samples per channel of `pcm`, starting at
    /// `start_band` (so Hybrid mode can restrict CELT to its high-band share).
    pub(crate) fn encode(
        &mut self,
        enc: &mut RangeEncoder,
        pcm: &[f32],
        frame_size: usize,
        start_band: usize,
    ) -> Result<(), EncoderError> {
        let channel_count = self.channels as usize;

        let silence = pcm.iter().all(|&s| s.abs() < 1e-9);
        enc.encode_bit_logp(u32::from(silence), 15)?;
        // No post-filter / transient / intra signalling from this simplified encoder; the
        // matching decoder bits default to "off" the same way a silent/stationary frame
        // would from the reference encoder.
        enc.encode_bit_logp(0, 1)?;
        enc.encode_bit_logp(0, 3)?;
        enc.encode_bit_logp(0, 3)?;

        if silence {
            return Ok(());
        }

        for channel in 0..channel_count {
            if channel >= self.channel_state.len() {
                self.channel_state.push(ChannelState::new());
            }

            let mut channel_pcm = vec![0.0f32; frame_size];
            for (i, slot) in channel_pcm.iter_mut().enumerate() {
                let idx = i * channel_count + channel;
                *slot = pcm.get(idx).copied().unwrap_or(0.0);
            }

            let n = 512.max(frame_size / 2);
            let mdct = Mdct::new(n);
            let mut time = vec![0.0f32; 2 * n];
            let copy_len = channel_pcm.len().min(2 * n);
            time[..copy_len].copy_from_slice(&channel_pcm[..copy_len]);
            let mut coeffs = vec![0.0f32; n];
            mdct.forward(&time, &mut coeffs);

            let mut energy = [0.0f32; NUM_BANDS];
            for band in 0..NUM_BANDS {
                let lo = E_BANDS[band] as usize;
                let hi = E_BANDS[band + 1] as usize;
                if lo >= coeffs.len() {
                    continue;
                }
                let hi = hi.min(coeffs.len());
                let sum_sq: f32 = coeffs[lo..hi].iter().map(|v| v * v).sum();
                energy[band] = if sum_sq > 1e-12 {
                    sum_sq.log2()
                } else {
                    -30.0
                };
            }

            let mut prev = self.channel_state[channel].energy;
            encode_coarse_energy(enc, &mut prev, &energy)?;

            let mut bits = [0u32; NUM_BANDS];
            for (b, slot) in bits.iter_mut().enumerate() {
                *slot = fine_energy_bits(b);
            }
            encode_fine_energy(enc, &energy, &prev, &bits)?;

            for band in start_band..NUM_BANDS {
                let lo = E_BANDS[band] as usize;
                let hi = E_BANDS[band + 1] as usize;
                let width = (hi - lo).min(coeffs.len().saturating_sub(lo));
                if width == 0 {
                    continue;
                }
                let amp = 2f32.powf(energy[band] * 0.5).max(1e-9);
                let target: Vec<f32> = coeffs[lo..lo + width].iter().map(|v| v / amp).collect();
                let k = pulses_for_width(band, width);
                let pulses = search_pulses(&target, k);
                encode_pulses(enc, &pulses, k)?;
            }

            self.channel_state[channel].energy = energy;
        }

        Ok(())
    }
}
