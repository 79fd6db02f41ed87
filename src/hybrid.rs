//! Hybrid mode: SILK covers CELT bands 0-16 (up to the SILK/CELT split around 8 kHz) and
//! CELT covers bands 17-20, both reading from the same entropy stream (spec §4.5). TOC
//! configurations 12-15 select Hybrid; frame sizes are restricted to 10 or 20 ms.

use crate::celt::mode::NUM_BANDS;

/// First CELT band covered in Hybrid mode; SILK owns everything below this.
pub(crate) const HYBRID_CELT_START_BAND: usize = 17;

/// Sums a SILK-decoded low-band frame and a CELT-decoded high-band frame sample-for-sample,
/// the way the reference decoder combines the two cores' output before CELT's shared
/// de-emphasis stage runs once over the sum.
pub(crate) fn combine(silk_pcm: &[f32], celt_pcm: &[f32], out: &mut [f32]) {
    let len = out.len().min(silk_pcm.len()).min(celt_pcm.len());
    for i in 0..len {
        out[i] = silk_pcm[i] + celt_pcm[i];
    }
    for sample in out.iter_mut().skip(len) {
        *sample = 0.0;
    }
}

/// `true` if `band` is covered by SILK rather than CELT in Hybrid mode.
pub(crate) fn band_is_silk(band: usize) -> bool {
    band < HYBRID_CELT_START_BAND
}
