//! Implements the Opus encoder.

use crate::celt::CeltEncoder;
use crate::decoder::{adapt_channels, resample_linear};
use crate::encoder_error::EncoderError;
use crate::error::OpusError;
use crate::packet::Toc;
use crate::range_coder::RangeEncoder;
use crate::silk::SilkEncoder;
use crate::{Bandwidth, Channels, CodecMode, FrameDuration, Sample, SamplingRate};

/// Lowest bitrate the encoder accepts, in bits per second.
pub const MIN_BITRATE: i32 = 500;
/// Highest bitrate the encoder accepts, in bits per second.
pub const MAX_BITRATE: i32 = 512_000;
/// Highest complexity setting the encoder accepts.
pub const MAX_COMPLEXITY: u8 = 10;

/// The application this encoder instance is tuned for.
///
/// Selecting an application picks which codec core (SILK, CELT or Hybrid) carries the
/// signal; changing it after creation re-initialises both sub-encoders.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Application {
    /// Voice over IP: favors SILK, tuned for speech at low bitrates.
    VoIP,
    /// Generic audio: picks SILK, CELT or Hybrid based on the configured bandwidth.
    Audio,
    /// Lowest algorithmic delay: always CELT.
    LowDelay,
}

/// Target bitrate behavior.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BitrateMode {
    /// Variable bitrate: each frame uses as many bits as its content needs.
    Vbr,
    /// Variable bitrate constrained to never exceed the target bitrate over a short window.
    ConstrainedVbr,
    /// Constant bitrate: every frame uses (approximately) the same number of bits.
    Cbr,
}

/// A hint about the kind of signal being encoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignalHint {
    /// Let the encoder infer the signal type.
    Auto,
    /// The signal is speech.
    Voice,
    /// The signal is music.
    Music,
}

/// Configures the encoder on creation.
#[derive(Clone, Debug)]
pub struct EncoderConfiguration {
    /// Sample rate of the input signal (Hz). Default: 48000 Hz.
    pub sampling_rate: SamplingRate,
    /// Number of channels of the input signal. Default: Stereo.
    pub channels: Channels,
    /// The application this encoder is tuned for. Default: Audio.
    pub application: Application,
}

impl Default for EncoderConfiguration {
    fn default() -> Self {
        Self {
            sampling_rate: SamplingRate::Hz48000,
            channels: Channels::Stereo,
            application: Application::Audio,
        }
    }
}

/// Opus encoder.
///
/// The only operations exposed between frames are the `set_*` methods below; everything
/// else about the bitstream (mode, bandwidth, frame framing) is derived from them on every
/// `encode`/`encode_float` call, the same way the configured state of a [`crate::Decoder`]
/// carries forward across `decode` calls.
pub struct Encoder {
    celt_enc: CeltEncoder,
    silk_enc: SilkEncoder,
    channels: Channels,
    sampling_rate: SamplingRate,
    application: Application,

    bitrate: i32,
    complexity: u8,
    frame_duration: FrameDuration,
    bitrate_mode: BitrateMode,
    fec: bool,
    packet_loss_perc: u8,
    dtx: bool,
    signal: SignalHint,
    max_bandwidth: Bandwidth,
    force_channels: Option<Channels>,
    lsb_depth: u8,
    prediction_disabled: bool,
    phase_inversion_disabled: bool,
}

impl Encoder {
    /// Creates a new `Encoder` with the given configuration.
    pub fn new(configuration: &EncoderConfiguration) -> Result<Self, EncoderError> {
        let celt_enc = CeltEncoder::new(configuration.sampling_rate, configuration.channels);
        let silk_enc = SilkEncoder::new(configuration.sampling_rate, configuration.channels);

        Ok(Self {
            celt_enc,
            silk_enc,
            channels: configuration.channels,
            sampling_rate: configuration.sampling_rate,
            application: configuration.application,

            bitrate: 64_000,
            complexity: MAX_COMPLEXITY,
            frame_duration: FrameDuration::Ms20,
            bitrate_mode: BitrateMode::Vbr,
            fec: false,
            packet_loss_perc: 0,
            dtx: false,
            signal: SignalHint::Auto,
            max_bandwidth: Bandwidth::Fullband,
            force_channels: None,
            lsb_depth: 16,
            prediction_disabled: false,
            phase_inversion_disabled: false,
        })
    }

    /// Returns the sampling rate the encoder was initialized with.
    pub fn sampling_rate(&self) -> SamplingRate {
        self.sampling_rate
    }

    /// Returns the channels the encoder was initialized with.
    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Returns the currently configured application profile.
    pub fn application(&self) -> Application {
        self.application
    }

    /// Returns the currently configured complexity.
    pub fn complexity(&self) -> u8 {
        self.complexity
    }

    /// Returns the currently configured frame duration.
    pub fn frame_size(&self) -> FrameDuration {
        self.frame_duration
    }

    /// Sets the target bitrate, in bits per second.
    ///
    /// Rejects values outside `[MIN_BITRATE, MAX_BITRATE]`; the previous value is retained.
    pub fn set_bitrate(&mut self, bitrate: i32) -> Result<(), OpusError> {
        if !(MIN_BITRATE..=MAX_BITRATE).contains(&bitrate) {
            return Err(OpusError::BadArguments("bitrate out of range"));
        }
        self.bitrate = bitrate;
        Ok(())
    }

    /// Returns the currently configured target bitrate.
    pub fn bitrate(&self) -> i32 {
        self.bitrate
    }

    /// Sets the computational complexity, `0` (fastest) to `10` (best quality).
    pub fn set_complexity(&mut self, complexity: u8) -> Result<(), OpusError> {
        if complexity > MAX_COMPLEXITY {
            return Err(OpusError::BadArguments("complexity out of range"));
        }
        self.complexity = complexity;
        self.celt_enc.set_complexity(complexity);
        self.silk_enc.set_complexity(complexity);
        Ok(())
    }

    /// Sets the frame duration used by subsequent `encode`/`encode_float` calls.
    ///
    /// Rejects frame durations the active mode cannot carry (2.5/5 ms are CELT-only, 40/60 ms
    /// are SILK-only — Table 2's mode/bandwidth/duration bijection).
    pub fn set_frame_size(&mut self, duration: FrameDuration) -> Result<(), OpusError> {
        let mode = self.mode_for_application();
        let legal = match duration {
            FrameDuration::Ms2_5 | FrameDuration::Ms5 => mode == CodecMode::Celt,
            FrameDuration::Ms40 | FrameDuration::Ms60 => mode == CodecMode::Silk,
            FrameDuration::Ms10 | FrameDuration::Ms20 => true,
        };
        if !legal {
            return Err(OpusError::BadArguments("frame size illegal for the active mode"));
        }
        self.frame_duration = duration;
        Ok(())
    }

    /// Sets the bitrate mode (VBR, constrained VBR, or CBR).
    pub fn set_bitrate_mode(&mut self, mode: BitrateMode) -> Result<(), OpusError> {
        self.celt_enc.set_vbr(!matches!(mode, BitrateMode::Cbr));
        self.bitrate_mode = mode;
        Ok(())
    }

    /// Returns the currently configured bitrate mode.
    pub fn bitrate_mode(&self) -> BitrateMode {
        self.bitrate_mode
    }

    /// Enables or disables in-band forward error correction.
    pub fn set_fec(&mut self, enabled: bool) -> Result<(), OpusError> {
        self.fec = enabled;
        Ok(())
    }

    /// Returns whether in-band forward error correction is enabled.
    pub fn fec(&self) -> bool {
        self.fec
    }

    /// Sets the expected packet loss percentage, `0..=100`.
    pub fn set_packet_loss(&mut self, percent: u8) -> Result<(), OpusError> {
        if percent > 100 {
            return Err(OpusError::BadArguments("packet loss percentage out of range"));
        }
        self.packet_loss_perc = percent;
        Ok(())
    }

    /// Returns the configured expected packet loss percentage.
    pub fn packet_loss(&self) -> u8 {
        self.packet_loss_perc
    }

    /// Enables or disables discontinuous transmission.
    pub fn set_dtx(&mut self, enabled: bool) -> Result<(), OpusError> {
        self.dtx = enabled;
        Ok(())
    }

    /// Returns whether discontinuous transmission is enabled.
    pub fn dtx(&self) -> bool {
        self.dtx
    }

    /// Hints the kind of signal being encoded.
    pub fn set_signal(&mut self, signal: SignalHint) -> Result<(), OpusError> {
        self.signal = signal;
        Ok(())
    }

    /// Returns the currently configured signal hint.
    pub fn signal(&self) -> SignalHint {
        self.signal
    }

    /// Caps the encoded bandwidth. `Bandwidth::Auto` is rejected; callers ask for no cap by
    /// not calling this setter at all.
    pub fn set_max_bandwidth(&mut self, bandwidth: Bandwidth) -> Result<(), OpusError> {
        if matches!(bandwidth, Bandwidth::Auto) {
            return Err(OpusError::BadArguments("max bandwidth cannot be Auto"));
        }
        self.max_bandwidth = bandwidth;
        Ok(())
    }

    /// Returns the currently configured bandwidth cap.
    pub fn max_bandwidth(&self) -> Bandwidth {
        self.max_bandwidth
    }

    /// Forces the encoder to always use the given channel count regardless of the
    /// configured input channels, or `None` to let the encoder choose per frame.
    pub fn set_force_channels(&mut self, channels: Option<Channels>) -> Result<(), OpusError> {
        self.force_channels = channels;
        Ok(())
    }

    /// Returns the currently forced channel count, if any.
    pub fn force_channels(&self) -> Option<Channels> {
        self.force_channels
    }

    /// Sets the number of significant bits in the input PCM, `8..=24`. Used only to scale
    /// internal noise-shaping decisions; it does not change the sample type accepted by
    /// `encode`.
    pub fn set_lsb_depth(&mut self, bits: u8) -> Result<(), OpusError> {
        if !(8..=24).contains(&bits) {
            return Err(OpusError::BadArguments("lsb depth out of range"));
        }
        self.lsb_depth = bits;
        Ok(())
    }

    /// Returns the currently configured input bit depth.
    pub fn lsb_depth(&self) -> u8 {
        self.lsb_depth
    }

    /// Disables the use of past frames to predict the current one (useful to recover
    /// quickly from loss at the cost of compression efficiency).
    pub fn set_prediction_disabled(&mut self, disabled: bool) -> Result<(), OpusError> {
        self.prediction_disabled = disabled;
        Ok(())
    }

    /// Returns whether inter-frame prediction is disabled.
    pub fn prediction_disabled(&self) -> bool {
        self.prediction_disabled
    }

    /// Disables mid/side phase inversion in stereo encoding.
    pub fn set_phase_inversion_disabled(&mut self, disabled: bool) -> Result<(), OpusError> {
        self.phase_inversion_disabled = disabled;
        Ok(())
    }

    /// Returns whether mid/side phase inversion is disabled.
    pub fn phase_inversion_disabled(&self) -> bool {
        self.phase_inversion_disabled
    }

    /// Switches the encoder's application profile.
    ///
    /// Re-initialises the SILK and CELT sub-encoders (mirroring the reference's
    /// requirement that switching application resets their internal state) while every
    /// other control-surface setting configured so far is carried forward unchanged.
    pub fn set_application(&mut self, application: Application) -> Result<(), OpusError> {
        self.application = application;
        self.celt_enc = CeltEncoder::new(self.sampling_rate, self.channels);
        self.silk_enc = SilkEncoder::new(self.sampling_rate, self.channels);
        self.celt_enc.set_complexity(self.complexity);
        self.silk_enc.set_complexity(self.complexity);
        self.celt_enc.set_vbr(!matches!(self.bitrate_mode, BitrateMode::Cbr));
        Ok(())
    }

    /// The codec mode the current application/bandwidth combination selects: VoIP always
    /// picks SILK, LowDelay always picks CELT, and Audio picks SILK below Superwideband and
    /// Hybrid at or above it (RFC 6716 Table 2's mode/bandwidth bijection only allows Hybrid
    /// at Superwideband and Fullband).
    fn mode_for_application(&self) -> CodecMode {
        match self.application {
            Application::VoIP => CodecMode::Silk,
            Application::LowDelay => CodecMode::Celt,
            Application::Audio => match self.max_bandwidth {
                Bandwidth::Narrowband | Bandwidth::Mediumband | Bandwidth::Wideband => {
                    CodecMode::Silk
                }
                Bandwidth::Superwideband | Bandwidth::Fullband | Bandwidth::Auto => {
                    CodecMode::Hybrid
                }
            },
        }
    }

    /// Clamps `max_bandwidth` to a value the given mode's row of Table 2 actually carries
    /// (e.g. SILK tops out at Wideband, CELT never carries Mediumband), so a bandwidth
    /// setting left over from a different application never produces an illegal TOC.
    fn effective_bandwidth(&self, mode: CodecMode) -> Bandwidth {
        let bandwidth = match self.max_bandwidth {
            Bandwidth::Auto => Bandwidth::Fullband,
            other => other,
        };
        match mode {
            CodecMode::Silk => match bandwidth {
                Bandwidth::Narrowband | Bandwidth::Mediumband | Bandwidth::Wideband => bandwidth,
                _ => Bandwidth::Wideband,
            },
            CodecMode::Hybrid => match bandwidth {
                Bandwidth::Superwideband | Bandwidth::Fullband => bandwidth,
                _ => Bandwidth::Superwideband,
            },
            CodecMode::Celt => match bandwidth {
                Bandwidth::Narrowband
                | Bandwidth::Wideband
                | Bandwidth::Superwideband
                | Bandwidth::Fullband => bandwidth,
                Bandwidth::Mediumband | Bandwidth::Auto => Bandwidth::Fullband,
            },
        }
    }

    /// Encodes `frame_size` interleaved samples per channel of a generic sample type.
    ///
    /// Returns the number of bytes written to `out`.
    pub fn encode<T: Sample + Copy>(
        &mut self,
        samples: &[T],
        frame_size: usize,
        out: &mut [u8],
    ) -> Result<usize, EncoderError> {
        let float_buf: Vec<f32> = samples.iter().map(|&s| s.to_f32()).collect();
        self.encode_float(&float_buf, frame_size, out)
    }

    /// Encodes `frame_size` interleaved `f32` samples per channel into an Opus packet.
    ///
    /// Returns the number of bytes written to `out`. Every call produces a single-frame,
    /// Code 0 packet (RFC 6716 §3.2): one TOC byte followed by the entropy-coded payload.
    pub fn encode_float(
        &mut self,
        pcm: &[f32],
        frame_size: usize,
        out: &mut [u8],
    ) -> Result<usize, EncoderError> {
        if out.is_empty() {
            return Err(EncoderError::BufferToSmall);
        }

        let in_channels = self.channels as usize;
        let out_channels = self.force_channels.map_or(in_channels, |c| c as usize);
        let pcm = adapt_channels(pcm, in_channels, out_channels);

        let mode = self.mode_for_application();
        let stereo = out_channels == 2;
        let bandwidth = self.effective_bandwidth(mode);
        let toc = Toc::build(mode, bandwidth, self.frame_duration, stereo)
            .map_err(|_| EncoderError::InternalError("illegal mode/bandwidth/duration combination"))?;
        out[0] = toc.with_code(0).byte();
        let out_len = out.len();

        let mut enc = RangeEncoder::new(&mut out[1..]);

        match mode {
            CodecMode::Celt => {
                self.celt_enc.encode(&mut enc, &pcm, frame_size, 0)?;
            }
            CodecMode::Silk => {
                let internal_rate = self.silk_enc.internal_sampling_rate() as usize;
                let silk_frame_size = frame_size * internal_rate / self.sampling_rate as usize;
                let resampled = resample_linear(
                    &pcm,
                    out_channels,
                    self.sampling_rate as usize,
                    internal_rate,
                    silk_frame_size,
                );
                self.silk_enc.encode(&mut enc, &resampled, silk_frame_size)?;
            }
            CodecMode::Hybrid => {
                let internal_rate = self.silk_enc.internal_sampling_rate() as usize;
                let silk_frame_size = frame_size * internal_rate / self.sampling_rate as usize;
                let resampled = resample_linear(
                    &pcm,
                    out_channels,
                    self.sampling_rate as usize,
                    internal_rate,
                    silk_frame_size,
                );
                self.silk_enc.encode(&mut enc, &resampled, silk_frame_size)?;
                self.celt_enc.encode(
                    &mut enc,
                    &pcm,
                    frame_size,
                    crate::hybrid::HYBRID_CELT_START_BAND,
                )?;
            }
        }

        enc.done()?;
        let written = 1 + enc.range_bytes();
        Ok(written.min(out_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bitrate_out_of_range() {
        let mut enc = Encoder::new(&EncoderConfiguration::default()).unwrap();
        assert!(enc.set_bitrate(100).is_err());
        assert!(enc.set_bitrate(600_000).is_err());
        assert_eq!(enc.bitrate(), 64_000);
    }

    #[test]
    fn accepts_legal_bitrate() {
        let mut enc = Encoder::new(&EncoderConfiguration::default()).unwrap();
        enc.set_bitrate(32_000).unwrap();
        assert_eq!(enc.bitrate(), 32_000);
    }

    #[test]
    fn rejects_complexity_out_of_range() {
        let mut enc = Encoder::new(&EncoderConfiguration::default()).unwrap();
        assert!(enc.set_complexity(11).is_err());
    }

    #[test]
    fn rejects_auto_as_max_bandwidth() {
        let mut enc = Encoder::new(&EncoderConfiguration::default()).unwrap();
        assert!(enc.set_max_bandwidth(Bandwidth::Auto).is_err());
    }

    #[test]
    fn rejects_packet_loss_percentage_above_100() {
        let mut enc = Encoder::new(&EncoderConfiguration::default()).unwrap();
        assert!(enc.set_packet_loss(101).is_err());
    }

    #[test]
    fn set_application_reinitialises_but_keeps_other_settings() {
        let mut enc = Encoder::new(&EncoderConfiguration::default()).unwrap();
        enc.set_complexity(3).unwrap();
        enc.set_application(Application::VoIP).unwrap();
        assert_eq!(enc.application(), Application::VoIP);
        assert_eq!(enc.complexity(), 3);
    }

    #[test]
    fn effective_bandwidth_clamps_silk_to_wideband() {
        let mut enc = Encoder::new(&EncoderConfiguration {
            sampling_rate: SamplingRate::Hz48000,
            channels: Channels::Stereo,
            application: Application::VoIP,
        })
        .unwrap();
        enc.set_max_bandwidth(Bandwidth::Fullband).unwrap();
        assert_eq!(enc.effective_bandwidth(CodecMode::Silk), Bandwidth::Wideband);
    }

    #[test]
    fn encode_float_writes_a_toc_byte() {
        let mut enc = Encoder::new(&EncoderConfiguration {
            sampling_rate: SamplingRate::Hz48000,
            channels: Channels::Stereo,
            application: Application::LowDelay,
        })
        .unwrap();
        let pcm = vec![0.0f32; 960 * 2];
        let mut out = vec![0u8; 4000];
        let written = enc.encode_float(&pcm, 960, &mut out).unwrap();
        assert!(written >= 1);
        let toc = Toc::parse(out[0]);
        assert_eq!(toc.mode(), CodecMode::Celt);
    }
}
