//! Implement the Opus decoder.

use crate::celt::CeltDecoder;
use crate::hybrid;
use crate::plc::{conceal_silk, Lcg, PlcState};
use crate::range_coder::{RangeDecoder, Tell};
use crate::silk::{LostFlag, SilkDecoder};
use crate::{
    Bandwidth, Channels, CodecMode, DecoderError, FrameDuration, Packet, Sample, SamplingRate,
};

/// Configures the decoder on creation.
///
/// Internally Opus stores data at 48000 Hz, so that should be the default
/// value for the sampling rate. However, the decoder can efficiently decode
/// to buffers at 8, 12, 16, and 24 kHz so if for some reason the caller cannot
/// use data at the full sample rate, or knows the compressed data doesn't
/// use the full frequency range, it can request decoding at a reduced
/// rate. Likewise, the decoder is capable of filling in either mono or
/// interleaved stereo pcm buffers, at the caller's request.
#[derive(Clone, Debug)]
pub struct DecoderConfiguration {
    /// Sample rate to decode at (Hz). Default: 48000 kHz.
    pub sampling_rate: SamplingRate,
    /// Number of channels to decode. Default: Stereo.
    pub channels: Channels,
    /// Scales the decoded output by a factor specified in Q8 dB units. Default: 0.
    pub gain: i16,
}

impl Default for DecoderConfiguration {
    fn default() -> Self {
        Self {
            sampling_rate: SamplingRate::Hz48000,
            channels: Channels::Stereo,
            gain: 0,
        }
    }
}

/// Opus decoder.
///
/// Opus is a stateful codec with overlapping blocks and as a result Opus
/// packets are not coded independently of each other. Packets must be
/// passed into the decoder serially and in the correct order for a correct
/// decode. Lost packets can be replaced with loss concealment by calling
/// the decoder with `None` for the missing packet.
#[derive(Clone, Debug)]
pub struct Decoder {
    celt_dec: CeltDecoder,
    silk_dec: SilkDecoder,
    channels: Channels,
    sampling_rate: SamplingRate,
    decode_gain: i16,

    stream_channels: Channels,
    bandwidth: Bandwidth,
    mode: Option<CodecMode>,
    prev_mode: Option<CodecMode>,
    frame_size: usize,
    prev_redundancy: Option<usize>,
    last_packet_duration: Option<u32>,

    plc: PlcState,
    lcg: Lcg,
    softclip_mem: Vec<f32>,

    final_range: u32,
}

impl Decoder {
    /// Creates a new `Decoder` with the given configuration.
    pub fn new(configuration: &DecoderConfiguration) -> Result<Self, DecoderError> {
        let celt_dec = CeltDecoder::new(configuration.sampling_rate, configuration.channels)?;
        let silk_dec = SilkDecoder::new(configuration.sampling_rate, configuration.channels)?;

        Ok(Self {
            celt_dec,
            silk_dec,
            sampling_rate: configuration.sampling_rate,
            channels: configuration.channels,
            decode_gain: configuration.gain,
            stream_channels: configuration.channels,
            bandwidth: Bandwidth::Auto,
            mode: None,
            prev_mode: None,
            frame_size: configuration.sampling_rate as usize / 400,
            prev_redundancy: None,
            last_packet_duration: None,

            plc: PlcState::new(),
            lcg: Lcg(0x1234_5678),
            softclip_mem: vec![0.0; configuration.channels as usize],

            final_range: 0,
        })
    }

    /// Resets the Decoder to be equivalent to a freshly initialized decoder.
    ///
    /// This should be called when switching streams in order to prevent
    /// the back to back decoding from giving different results from
    /// one at a time decoding.
    pub fn reset(&mut self) -> Result<(), DecoderError> {
        self.silk_dec.reset()?;
        self.celt_dec.reset()?;

        self.stream_channels = self.channels;
        self.bandwidth = Bandwidth::Auto;
        self.mode = None;
        self.prev_mode = None;
        self.frame_size = self.sampling_rate as usize / 400;
        self.prev_redundancy = None;
        self.last_packet_duration = None;
        self.plc = PlcState::new();
        self.softclip_mem.iter_mut().for_each(|m| *m = 0.0);

        Ok(())
    }

    /// Returns the sampling rate the decoder was initialized with.
    pub fn sampling_rate(&self) -> SamplingRate {
        self.sampling_rate
    }

    /// Returns the channels the decoder was initialized with.
    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Returns the amount to scale PCM signal by in Q8 dB units.
    pub fn gain(&self) -> i16 {
        self.decode_gain
    }

    /// Returns the decoder's last bandpass.
    pub fn bandwidth(&self) -> Bandwidth {
        self.bandwidth
    }

    /// Returns the pitch of the last decoded frame, measured in samples at 48 kHz
    pub fn pitch(&self) -> Option<u32> {
        if let Some(prev_mode) = self.prev_mode {
            match prev_mode {
                CodecMode::Celt => Some(self.celt_dec.pitch()),
                CodecMode::Silk | CodecMode::Hybrid => Some(self.silk_dec.pitch()),
            }
        } else {
            None
        }
    }

    /// Returns the duration (in samples) of the last packet successfully decoded or concealed.
    pub fn last_packet_duration(&self) -> Option<u32> {
        self.last_packet_duration
    }

    /// Returns the final state of the codec's entropy coder.
    ///
    /// This is used for testing purposes, the encoder and decoder state
    /// should be identical after coding a payload assuming no data
    /// corruption or software bugs).
    pub fn final_range(&mut self) -> u32 {
        self.final_range
    }

    /// Decode an Opus packet with a generic sample output.
    ///
    /// Returns number of decoded samples.
    ///
    /// Caller needs to make sure that the samples buffer has enough space to fit
    /// all samples inside the packet. Call `query_packet_sample_count()` to query
    /// the number of samples inside a packet and resize the buffer if needed.
    ///
    /// The internal format is `f32`. Use `decode_float()` to access it directly.
    ///
    /// # Arguments
    /// * `packet`     - Input payload. Use a `None` to indicate packet loss.
    /// * `samples`    - Output signal encoded as PCM samples (interleaved if 2 channels).
    ///                  Length must be at least `frame_size` * `channels`.
    /// * `frame_size` - Number of samples per channel of available space in a PCM.
    ///                  `frame_size` must be a multiple of 2.5 ms (400 for 48kHz).
    ///                  In the case of PLC (packet==`None`) or FEC (decode_fec=`true`), then
    ///                  `frame_size` needs to be exactly the duration of audio that is missing,
    ///                  otherwise the decoder will not be in the optimal state to decode
    ///                  the next incoming packet.
    /// * `decode_fec` - Request that any in-band forward error correction data be decoded.
    ///                  If no such data is available, the frame is decoded as if it were lost.
    ///
    pub fn decode<S: Sample>(
        &mut self,
        packet: Option<&[u8]>,
        samples: &mut [S],
        frame_size: usize,
        decode_fec: bool,
    ) -> Result<u32, DecoderError> {
        let channels = self.channels as usize;
        let mut float_buf = vec![0.0f32; frame_size * channels];
        let (count, _offset) =
            self.decode_native(packet, &mut float_buf, frame_size, decode_fec, 0, true)?;
        for (dst, &src) in samples.iter_mut().zip(float_buf.iter()) {
            *dst = S::from_f32(src);
        }
        Ok(count)
    }

    /// Decode an Opus packet with floating point output.
    ///
    /// Returns number of decoded samples.
    ///
    /// Caller needs to make sure that the samples buffer has enough space to fit
    /// all samples inside the packet. Call `query_packet_sample_count()` to query
    /// the number of samples inside a packet and resize the buffer if needed.
    ///
    /// # Arguments
    /// * `packet`     - Input payload. Use a `None` to indicate packet loss.
    /// * `samples`    - Output signal encoded as PCM samples (interleaved if 2 channels).
    ///                  Length is frame_size * channels.
    /// * `frame_size` - Number of samples per channel of available space in a PCM.
    ///                  `frame_size` must be a multiple of 2.5 ms (400 for 48kHz).
    ///                  In the case of PLC (packet==`None`) or FEC (decode_fec=`true`), then
    ///                  `frame_size` needs to be exactly the duration of audio that is missing,
    ///                  otherwise the decoder will not be in the optimal state to decode
    ///                  the next incoming packet.
    /// * `decode_fec` - Request that any in-band forward error correction data be decoded.
    ///                  If no such data is available, the frame is decoded as if it were lost.
    ///
    pub fn decode_float(
        &mut self,
        packet: Option<&[u8]>,
        samples: &mut [f32],
        frame_size: usize,
        decode_fec: bool,
    ) -> Result<u32, DecoderError> {
        let (count, _offset) =
            self.decode_native(packet, samples, frame_size, decode_fec, 0, false)?;
        Ok(count)
    }

    /// Returns the samples decoded and the packet_offset (used for multiple streams).
    ///
    /// `decode_fec` is accepted but, since this crate's encoder never emits redundant FEC
    /// frames, a packet requesting it is decoded as a normal frame — see the FEC Open
    /// Question in `DESIGN.md`.
    fn decode_native(
        &mut self,
        packet: Option<&[u8]>,
        samples: &mut [f32],
        frame_size: usize,
        _decode_fec: bool,
        self_delimited: usize,
        soft_clip: bool,
    ) -> Result<(u32, usize), DecoderError> {
        let out_channels = self.channels as usize;

        let Some(data) = packet else {
            self.plc.record_loss();
            let fade = self.plc.fade();
            let mode = self.prev_mode.unwrap_or(CodecMode::Celt);

            let mut pcm = match mode {
                CodecMode::Celt => self.celt_dec.conceal(frame_size, fade),
                CodecMode::Silk | CodecMode::Hybrid => {
                    let mut discard = Vec::new();
                    let mut discard_len = 0usize;
                    self.silk_dec.decode(
                        &mut None,
                        &mut discard,
                        &mut discard_len,
                        LostFlag::Loss,
                        false,
                    )?;

                    let mut interleaved = vec![0.0f32; frame_size * out_channels];
                    for channel in 0..out_channels {
                        let snapshot = self.silk_dec.plc_snapshot(channel);
                        let mono = conceal_silk(&snapshot, fade, frame_size, &mut self.lcg);
                        for i in 0..frame_size {
                            interleaved[i * out_channels + channel] = mono[i];
                        }
                    }
                    interleaved
                }
            };
            pcm.resize(frame_size * out_channels, 0.0);

            let n = frame_size.min(samples.len() / out_channels.max(1));
            samples[..n * out_channels].copy_from_slice(&pcm[..n * out_channels]);
            self.last_packet_duration = Some(frame_size as u32);
            return Ok((frame_size as u32, 1));
        };

        let packet = Packet::parse(data, self_delimited != 0)
            .map_err(|_| DecoderError::InvalidPacket)?;
        let toc = packet.toc();
        let mode = toc.mode();
        let bandwidth = toc.bandwidth();
        let packet_channels = toc.channels() as usize;
        let frame_samples = toc.samples_per_frame(self.sampling_rate);

        let payload_ms = match toc.frame_duration() {
            FrameDuration::Ms2_5 => 2,
            FrameDuration::Ms5 => 5,
            FrameDuration::Ms10 => 10,
            FrameDuration::Ms20 => 20,
            FrameDuration::Ms40 => 40,
            FrameDuration::Ms60 => 60,
        };
        self.silk_dec.set_payload_size_ms(payload_ms);
        self.silk_dec.set_internal_channels(toc.channels());

        let mut out_pcm = Vec::with_capacity(frame_samples * out_channels * packet.frame_count());
        let mut total_samples = 0usize;
        let mut final_range = 0u32;

        for frame_bytes in packet.frames() {
            let mut dec = RangeDecoder::new(frame_bytes);

            // CELT always decodes directly into `out_channels` (it owns its own channel
            // count independent of the packet's stereo flag); SILK decodes at whatever
            // channel count the packet declares, so its output is adapted afterwards.
            let frame_pcm = match mode {
                CodecMode::Celt => {
                    let mut buf = Vec::with_capacity(frame_samples * out_channels);
                    self.celt_dec.decode(&mut dec, &mut buf, frame_samples, 0)?;
                    final_range = dec.range();
                    buf
                }
                CodecMode::Silk => {
                    let mut buf = Vec::new();
                    let mut fs = 0usize;
                    let mut opt_dec = Some(dec);
                    self.silk_dec.decode(
                        &mut opt_dec,
                        &mut buf,
                        &mut fs,
                        LostFlag::NoLoss,
                        true,
                    )?;
                    let dec = opt_dec
                        .take()
                        .ok_or(DecoderError::InternalError("missing range decoder"))?;
                    final_range = dec.range();

                    let internal_rate = self.silk_dec.internal_sampling_rate() as usize;
                    let resampled = resample_linear(
                        &buf,
                        packet_channels,
                        internal_rate,
                        self.sampling_rate as usize,
                        frame_samples,
                    );
                    adapt_channels(&resampled, packet_channels, out_channels)
                }
                CodecMode::Hybrid => {
                    let mut silk_buf = Vec::new();
                    let mut fs = 0usize;
                    let mut opt_dec = Some(dec);
                    self.silk_dec.decode(
                        &mut opt_dec,
                        &mut silk_buf,
                        &mut fs,
                        LostFlag::NoLoss,
                        true,
                    )?;
                    let mut dec = opt_dec
                        .take()
                        .ok_or(DecoderError::InternalError("missing range decoder"))?;

                    let internal_rate = self.silk_dec.internal_sampling_rate() as usize;
                    let silk_resampled = resample_linear(
                        &silk_buf,
                        packet_channels,
                        internal_rate,
                        self.sampling_rate as usize,
                        frame_samples,
                    );
                    let silk_adapted = adapt_channels(&silk_resampled, packet_channels, out_channels);

                    let mut celt_buf = Vec::with_capacity(frame_samples * out_channels);
                    self.celt_dec.decode(
                        &mut dec,
                        &mut celt_buf,
                        frame_samples,
                        hybrid::HYBRID_CELT_START_BAND,
                    )?;
                    final_range = dec.range();

                    let mut combined = vec![0.0f32; frame_samples * out_channels];
                    hybrid::combine(&silk_adapted, &celt_buf, &mut combined);
                    combined
                }
            };

            out_pcm.extend_from_slice(&frame_pcm);
            total_samples += frame_samples;
        }

        self.plc.reset();
        self.plc.remember_good_frame(mode, frame_samples, out_channels);
        self.prev_mode = Some(mode);
        self.mode = Some(mode);
        self.bandwidth = bandwidth;
        self.final_range = final_range;
        self.frame_size = frame_samples;
        self.last_packet_duration = Some(total_samples as u32);

        let n = total_samples.min(samples.len() / out_channels.max(1));
        samples[..n * out_channels].copy_from_slice(&out_pcm[..n * out_channels]);

        if soft_clip {
            crate::pcm_soft_clip(&mut samples[..n * out_channels], out_channels, &mut self.softclip_mem);
        }

        self.prev_redundancy = None;
        Ok((total_samples as u32, 1))
    }
}

/// Resamples `input` (interleaved, `channels` channels, `from_rate` Hz) to `out_len`
/// samples per channel at `to_rate` Hz using linear interpolation.
///
/// SILK's internal rate (8/12/16 kHz) rarely matches the decoder's requested output rate;
/// the reference decoder uses a polyphase resampler here, this crate uses linear
/// interpolation instead — see the table-fidelity Open Question in `DESIGN.md`.
pub(crate) fn resample_linear(
    input: &[f32],
    channels: usize,
    from_rate: usize,
    to_rate: usize,
    out_len: usize,
) -> Vec<f32> {
    if channels == 0 {
        return Vec::new();
    }
    if from_rate == to_rate {
        let mut out = input.to_vec();
        out.resize(out_len * channels, 0.0);
        return out;
    }

    let in_frames = input.len() / channels;
    let mut out = vec![0.0f32; out_len * channels];
    for i in 0..out_len {
        let src_pos = i as f32 * from_rate as f32 / to_rate as f32;
        let idx = src_pos.floor() as usize;
        let frac = src_pos - idx as f32;
        for ch in 0..channels {
            let a = if idx < in_frames { input[idx * channels + ch] } else { 0.0 };
            let b = if idx + 1 < in_frames { input[(idx + 1) * channels + ch] } else { a };
            out[i * channels + ch] = a + (b - a) * frac;
        }
    }
    out
}

/// Adapts `input` (interleaved, `in_channels` channels) to `out_channels` by duplicating
/// (mono to stereo) or averaging (stereo to mono); a no-op when the counts match.
pub(crate) fn adapt_channels(input: &[f32], in_channels: usize, out_channels: usize) -> Vec<f32> {
    if in_channels == out_channels || in_channels == 0 {
        return input.to_vec();
    }
    let frames = input.len() / in_channels;
    let mut out = vec![0.0f32; frames * out_channels];
    match (in_channels, out_channels) {
        (1, 2) => {
            for i in 0..frames {
                out[i * 2] = input[i];
                out[i * 2 + 1] = input[i];
            }
        }
        (2, 1) => {
            for i in 0..frames {
                out[i] = 0.5 * (input[i * 2] + input[i * 2 + 1]);
            }
        }
        _ => {
            for i in 0..frames.min(out.len() / out_channels) {
                for ch in 0..out_channels {
                    out[i * out_channels + ch] = input[i * in_channels + ch % in_channels];
                }
            }
        }
    }
    out
}
