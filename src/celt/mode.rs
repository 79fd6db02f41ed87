//! Shared CELT mode constants: the analysis/synthesis window, critical band boundaries,
//! and the per-frame-size allocation parameters the rest of `celt` indexes into.

use std::f32::consts::PI;

/// Number of critical bands used by the 48 kHz, 20 ms CELT mode (RFC 6716 §4.4, Table 55
/// lists 21 bands run up to the Nyquist rate).
pub(crate) const NUM_BANDS: usize = 21;

/// Band edges in 2.5 ms "bins", i.e. `eBands` from the reference mode table, one entry
/// per band boundary (`NUM_BANDS + 1` edges).
pub(crate) const E_BANDS: [u16; NUM_BANDS + 1] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 12, 14, 16, 20, 24, 28, 34, 40, 48, 60, 78, 100,
];

/// Number of MDCT bins in the largest (20 ms) short block at 48 kHz.
pub(crate) const MAX_SHORT_BLOCKS: usize = 8;

/// The standard CELT overlap region, in samples, at 48 kHz (2.5 ms).
pub(crate) const OVERLAP: usize = 120;

/// Value of the symmetric analysis/synthesis window at sample `i` of a region `overlap`
/// samples wide, same shape the reference `mode.window` table holds for `overlap == 120`,
/// generalised to whatever overlap width the caller is actually using this frame size.
///
/// This crate trades the reference implementation's single precomputed 120-entry table for
/// a direct evaluation of the same raised-sine-squared shape, since the codec has to
/// support several overlap widths (NB/WB/short blocks) and a closed-form evaluation avoids
/// keeping one table per width.
#[inline]
pub(crate) fn window(i: usize, overlap: usize) -> f32 {
    debug_assert!(i < overlap);
    let theta = PI / 2.0 * (i as f32 + 0.5) / overlap as f32;
    theta.sin()
}

/// Squared window value, the quantity every comb-filter and overlap-add call site needs.
#[inline]
pub(crate) fn window_sq(i: usize, overlap: usize) -> f32 {
    let w = window(i, overlap);
    w * w
}

/// log2(number of MDCT bins) for each legal short-block count (1, 2, 4, 8), used to derive
/// `max_shift` for the MDCT/IMDCT stage.
pub(crate) fn max_shift(short_blocks: usize) -> usize {
    match short_blocks {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_symmetric_and_bounded() {
        let overlap = 16;
        for i in 0..overlap {
            let w = window(i, overlap);
            assert!((0.0..=1.0).contains(&w));
        }
        // sin ramps monotonically across the region since theta stays in [0, pi/2).
        let first = window(0, overlap);
        let last = window(overlap - 1, overlap);
        assert!(last > first);
    }

    #[test]
    fn band_edges_are_monotonic() {
        assert_eq!(E_BANDS[0], 0);
        for w in E_BANDS.windows(2) {
            assert!(w[1] > w[0]);
        }
    }
}
