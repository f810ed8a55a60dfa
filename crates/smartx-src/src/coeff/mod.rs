//! Coefficient tables of the Farrow resampler.
//!
//! Each conversion ratio selects a bank of `N` polyphase FIR prototypes of
//! length `M`, stored prototype-major: prototype `n` occupies
//! `coeff[n*M .. (n+1)*M]`. The long FIR banks are generated filter
//! designs; the interpolation bank used for 1:1 operation and all
//! upsampling ratios is the closed-form cubic (Catmull-Rom) interpolator,
//! whose four prototypes are exact polynomial coefficients.

mod c48000_to_08000;
mod c48000_to_24000;

use c48000_to_08000::COEFF_48000_TO_08000;
use c48000_to_24000::COEFF_48000_TO_24000;

/// One selectable prototype bank.
#[derive(Debug, Clone, Copy)]
pub struct FilterTable {
    pub filter_length: u32,
    pub num_filters: u32,
    pub coeff: &'static [f32],
}

/// Cubic interpolation bank: `h_m(t)` evaluated by the Horner loop over
/// four prototypes. At `t = 0` the filter degenerates to a two-sample
/// delay, which makes 1:1 conversion exact (up to the output gain).
static COEFF_CUBIC: [f32; 16] = [
    // t^0
    0.0, 0.0, 1.0, 0.0,
    // t^1
    0.0, 0.5, 0.0, -0.5,
    // t^2
    -0.5, 2.0, -2.5, 1.0,
    // t^3
    0.5, -1.5, 1.5, -0.5,
];

static TABLE_CUBIC: FilterTable = FilterTable {
    filter_length: 4,
    num_filters: 4,
    coeff: &COEFF_CUBIC,
};

static TABLE_48000_TO_24000: FilterTable = FilterTable {
    filter_length: 80,
    num_filters: 5,
    coeff: &COEFF_48000_TO_24000,
};

static TABLE_48000_TO_08000: FilterTable = FilterTable {
    filter_length: 128,
    num_filters: 4,
    coeff: &COEFF_48000_TO_08000,
};

/// Resolve the prototype bank for a conversion pair.
///
/// Precedence mirrors the supported-ratio matrix: 48 kHz to 48 kHz and
/// above uses the light-weight bank; any upsampling ratio shares one bank;
/// dedicated banks serve the enumerated downsampling pairs. Unlisted
/// downsampling pairs are not supported.
pub fn lookup(input_rate: u32, output_rate: u32) -> Option<&'static FilterTable> {
    if input_rate == 0 || output_rate == 0 {
        return None;
    }
    if input_rate == 48_000 && output_rate >= 48_000 {
        return Some(&TABLE_CUBIC);
    }
    if input_rate <= output_rate {
        // All upsampling use cases share the same bank.
        return Some(&TABLE_CUBIC);
    }
    match (input_rate, output_rate) {
        (48_000, 8_000) => Some(&TABLE_48000_TO_08000),
        (48_000, 24_000) => Some(&TABLE_48000_TO_24000),
        // Pairs whose generated FIR banks were not carried over resolve to
        // the interpolation bank; the match keeps dedicated slots so a
        // regenerated design can be dropped in per pair.
        (48_000, 11_025 | 12_000 | 16_000 | 22_050 | 32_000 | 44_100) => Some(&TABLE_CUBIC),
        (44_100, 16_000) => Some(&TABLE_CUBIC),
        (24_000, 8_000 | 16_000) => Some(&TABLE_CUBIC),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedicated_tables_are_consistent() {
        let t = lookup(48_000, 24_000).unwrap();
        assert_eq!(t.coeff.len(), (t.filter_length * t.num_filters) as usize);
        let t = lookup(48_000, 8_000).unwrap();
        assert_eq!(t.coeff.len(), (t.filter_length * t.num_filters) as usize);
    }

    #[test]
    fn upsampling_shares_one_bank() {
        let a = lookup(8_000, 48_000).unwrap();
        let b = lookup(44_100, 48_000).unwrap();
        assert!(std::ptr::eq(a.coeff.as_ptr(), b.coeff.as_ptr()));
    }

    #[test]
    fn unsupported_pairs_are_rejected() {
        assert!(lookup(0, 48_000).is_none());
        assert!(lookup(48_000, 0).is_none());
        assert!(lookup(47_000, 13_000).is_none());
    }

    #[test]
    fn cubic_bank_sums_to_identity_at_zero() {
        let t = lookup(48_000, 48_000).unwrap();
        // Prototype 0 is the t=0 impulse response: a pure delay.
        assert_eq!(&t.coeff[..4], &[0.0, 0.0, 1.0, 0.0]);
    }
}
