//! Implements the Silk encoder.

use crate::encoder_error::EncoderError;
use crate::range_coder::RangeEncoder;
use crate::silk::tables::{
    nlsf_order, stabilise_nlsf, FrameSignalType, FRAME_TYPE_ICDF, GAIN_DELTA_ICDF,
    GAIN_INDEX_ICDF, LTP_FILTER_ICDF, MAX_SUBFRAMES, NLSF_MIN_SPACING, PITCH_LAG_ICDF,
    PULSE_COUNT_ICDF,
};
use crate::{Channels, SamplingRate};

#[derive(Clone, Debug)]
struct ChannelState {
    prev_nlsf: Vec<f32>,
    prev_gain: f32,
    prev_lag: usize,
}

impl ChannelState {
    fn new(order: usize) -> Self {
        Self {
            prev_nlsf: (0..order).map(|i| (i + 1) as f32 / (order + 1) as f32).collect(),
            prev_gain: 0.1,
            prev_lag: 200,
        }
    }
}

/// The Silk encoder.
#[derive(Clone, Debug)]
pub(crate) struct SilkEncoder {
    sampling_rate: SamplingRate,
    channels: Channels,
    internal_sampling_rate: SamplingRate,
    payload_size_ms: usize,
    complexity: u8,
    channel_state: Vec<ChannelState>,
    nlsf_order: usize,
}

impl SilkEncoder {
    pub(crate) fn new(sampling_rate: SamplingRate, channels: Channels) -> Self {
        let internal_sampling_rate = match sampling_rate {
            SamplingRate::Hz8000 => SamplingRate::Hz8000,
            SamplingRate::Hz12000 => SamplingRate::Hz12000,
            _ => SamplingRate::Hz16000,
        };
        let nlsf_order = nlsf_order(internal_sampling_rate as u32);
        Self {
            sampling_rate,
            channels,
            internal_sampling_rate,
            payload_size_ms: 20,
            complexity: 10,
            channel_state: (0..channels as usize).map(|_| ChannelState::new(nlsf_order)).collect(),
            nlsf_order,
        }
    }

    pub(crate) fn set_payload_size_ms(&mut self, payload_size_ms: usize) {
        self.payload_size_ms = payload_size_ms;
    }

    pub(crate) fn set_complexity(&mut self, complexity: u8) {
        self.complexity = complexity;
    }

    pub(crate) fn internal_sampling_rate(&self) -> SamplingRate {
        self.internal_sampling_rate
    }

    /// Encodes `pcm` (interleaved `f32`, `frame_size` samples per channel at the internal
    /// sampling rate) into the range encoder's entropy stream.
    pub(crate) fn encode(
        &mut self,
        enc: &mut RangeEncoder,
        pcm: &[f32],
        frame_size: usize,
    ) -> Result<(), EncoderError> {
        let channel_count = self.channels as usize;
        let subframe_len = self.internal_sampling_rate as usize / 200;
        let subframes = (frame_size / subframe_len.max(1)).clamp(1, MAX_SUBFRAMES);
        let order = self.nlsf_order;

        for channel in 0..channel_count {
            if channel >= self.channel_state.len() {
                self.channel_state.push(ChannelState::new(order));
            }

            let mut channel_pcm = vec![0.0f32; frame_size];
            for (i, slot) in channel_pcm.iter_mut().enumerate() {
                let idx = i * channel_count + channel;
                *slot = pcm.get(idx).copied().unwrap_or(0.0);
            }

            let activity: f32 = channel_pcm.iter().map(|s| s.abs()).sum::<f32>() / channel_pcm.len().max(1) as f32;
            let vad_active = activity > 1e-4;
            enc.encode_bit_logp(u32::from(vad_active), 1)?;

            let mut nlsf = self.channel_state[channel].prev_nlsf.clone();
            for value in nlsf.iter_mut() {
                let delta: i32 = 0;
                enc.encode_icdf(((delta + 4) as u32) as usize, &GAIN_DELTA_ICDF, 8)?;
                *value = (*value + delta as f32 / 64.0).clamp(0.0, 1.0);
            }
            stabilise_nlsf(&mut nlsf, NLSF_MIN_SPACING);

            let mut prev_gain = self.channel_state[channel].prev_gain;

            for sf in 0..subframes {
                let start = sf * subframe_len;
                let end = (start + subframe_len).min(channel_pcm.len());
                let block = &channel_pcm[start..end];

                let rms = (block.iter().map(|s| s * s).sum::<f32>() / block.len().max(1) as f32).sqrt();
                let frame_type = if !vad_active {
                    FrameSignalType::Inactive
                } else if rms > 0.08 {
                    FrameSignalType::Voiced
                } else {
                    FrameSignalType::Unvoiced
                };
                enc.encode_icdf(frame_type.to_index() as usize, &FRAME_TYPE_ICDF, 8)?;

                let gain = rms.max(1e-5);
                let gain_db = 6.0 * (gain / prev_gain.max(1e-6)).max(1e-6).log2();
                if sf == 0 {
                    let idx = ((gain_db + 4.0) / 0.75).round().clamp(0.0, 31.0) as usize;
                    enc.encode_icdf(idx, &GAIN_INDEX_ICDF, 8)?;
                } else {
                    let idx = ((gain_db + 4.0) / 0.75).round().clamp(0.0, 8.0) as usize;
                    enc.encode_icdf(idx, &GAIN_DELTA_ICDF, 8)?;
                }
                prev_gain = gain;

                let voiced = matches!(frame_type, FrameSignalType::Voiced);
                if voiced {
                    enc.encode_icdf(16, &PITCH_LAG_ICDF, 8)?;
                }
                enc.encode_icdf(3, &LTP_FILTER_ICDF, 8)?;
                enc.encode_bits(2, 2)?;

                encode_excitation(enc, block, gain, frame_type)?;
            }

            self.channel_state[channel].prev_nlsf = nlsf;
            self.channel_state[channel].prev_gain = prev_gain;
        }

        Ok(())
    }
}

fn encode_excitation(
    enc: &mut RangeEncoder,
    block: &[f32],
    gain: f32,
    frame_type: FrameSignalType,
) -> Result<(), EncoderError> {
    if matches!(frame_type, FrameSignalType::Inactive) {
        return Ok(());
    }

    const BLOCK: usize = 16;
    let mut pos = 0;
    while pos < block.len() {
        let block_len = (block.len() - pos).min(BLOCK);
        let mut mags = vec![0u32; block_len];
        for (i, slot) in mags.iter_mut().enumerate() {
            let sample = block[pos + i] / gain.max(1e-6);
            *slot = (sample.abs() * 4.0).round().clamp(0.0, 15.0) as u32;
        }
        let pulse_count: u32 = mags.iter().sum();
        enc.encode_icdf(pulse_count.min(16) as usize, &PULSE_COUNT_ICDF, 8)?;

        let mut left = pulse_count.min(16);
        for slot in mags.iter_mut().take(block_len.saturating_sub(1)) {
            let m = (*slot).min(left);
            enc.encode_uint(m, left + 1)?;
            left -= m;
            *slot = m;
        }
        if let Some(last) = mags.last_mut() {
            *last = left;
        }

        for (i, &mag) in mags.iter().enumerate() {
            enc.encode_bits(mag & 1, 1)?;
            if mag > 0 {
                let sign = u32::from(block[pos + i] < 0.0);
                enc.encode_bits(sign, 1)?;
            }
        }
        pos += block_len;
    }
    Ok(())
}
