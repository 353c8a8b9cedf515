//! Bit-exact conversion between 32-bit floats and the 16-bit half-float
//! representation (1 sign, 5 exponent, 10 mantissa bits) used to shrink
//! vertex and pixel payloads.
//!
//! The codec is a stateless bit-field re-derivation, NOT a wrapper around a
//! floating-point narrowing routine. Mantissa bits that do not fit are
//! truncated toward zero rather than rounded to nearest; callers rely on the
//! exact bit patterns this produces (`encode(1.5) == 0x3E00`), so do not
//! "fix" the rounding. Every u16 and every u32 bit pattern is a valid input
//! with a defined output, signaling NaN payloads included.

/// The minimum half-float exponent (-15) re-biased with the single-precision
/// bias of 127.
const MIN_BIASED_EXP: u32 = 0x3800_0000;
/// The first single-precision exponent that overflows the half-float range
/// and is stored as Inf or NaN.
const MAX_BIASED_EXP: u32 = 0x4780_0000;
/// All-ones single-precision exponent field.
const F32_MAX_BIASED_EXP: u32 = 0xFF << 23;
/// All-ones half-float exponent field.
const HALF_MAX_BIASED_EXP: u32 = 0x1F << 10;

/// Encodes a 32-bit float into its closest-toward-zero half-float bit
/// pattern.
///
/// Values at or above the half range encode as signed infinity; NaN inputs
/// encode as a canonical NaN with all mantissa bits set. Values at or below
/// the half-normal range encode as denormals, or as signed zero once the
/// shift exhausts every mantissa bit.
pub fn encode(f: f32) -> u16 {
    let x = f.to_bits();
    let sign = ((x >> 16) & 0x8000) as u16;
    let mut mantissa = x & ((1 << 23) - 1);
    let exp = x & F32_MAX_BIASED_EXP;

    if exp >= MAX_BIASED_EXP {
        // Everything past the half range collapses to Inf, except genuine
        // NaNs which keep a full mantissa.
        if mantissa != 0 && exp == F32_MAX_BIASED_EXP {
            mantissa = (1 << 23) - 1;
        } else {
            mantissa = 0;
        }

        sign | (HALF_MAX_BIASED_EXP as u16) | (mantissa >> 13) as u16
    } else if exp <= MIN_BIASED_EXP {
        // Denormal half. The implicit leading bit of the (normal) input has
        // to surface in the mantissa before the exponent-dependent shift;
        // single-precision denormals have no implicit bit and underflow to
        // signed zero below anyway.
        if exp != 0 {
            mantissa |= 1 << 23;
        }

        let shift = 14 + ((MIN_BIASED_EXP - exp) >> 23);
        mantissa = if shift >= 32 { 0 } else { mantissa >> shift };

        sign | mantissa as u16
    } else {
        sign | (((exp - MIN_BIASED_EXP) >> 13) as u16) | ((mantissa >> 13) as u16)
    }
}

/// Decodes a half-float bit pattern into the 32-bit float it denotes.
///
/// Max-exponent halves map to signed infinity, or to a NaN with the full
/// 23-bit mantissa when any mantissa bit was set. Denormal halves are
/// renormalized by shifting the mantissa left until the implicit bit
/// surfaces, adjusting the reconstructed exponent per shift.
pub fn decode(h: u16) -> f32 {
    let sign = u32::from(h >> 15);
    let mut mantissa = u32::from(h) & ((1 << 10) - 1);
    let mut exp = u32::from(h) & HALF_MAX_BIASED_EXP;

    if exp == HALF_MAX_BIASED_EXP {
        exp = F32_MAX_BIASED_EXP;
        if mantissa != 0 {
            mantissa = (1 << 23) - 1;
        }
    } else if exp == 0 {
        if mantissa != 0 {
            mantissa <<= 1;
            exp = MIN_BIASED_EXP;
            while mantissa & (1 << 10) == 0 {
                mantissa <<= 1;
                exp -= 1 << 23;
            }

            mantissa &= (1 << 10) - 1;
            mantissa <<= 13;
        }
    } else {
        mantissa <<= 13;
        exp = (exp << 13) + MIN_BIASED_EXP;
    }

    f32::from_bits((sign << 31) | exp | mantissa)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_bit_patterns() {
        assert_eq!(encode(1.5), 0x3E00);
        assert_eq!(decode(0x3E00), 1.5);

        assert_eq!(encode(0.0), 0x0000);
        assert_eq!(encode(-0.0), 0x8000);
        assert_eq!(encode(1.0), 0x3C00);
        assert_eq!(encode(-2.0), 0xC000);
        assert_eq!(encode(65504.0), 0x7BFF);
    }

    #[test]
    fn infinities() {
        use std::f32;

        assert_eq!(encode(f32::INFINITY), 0x7C00);
        assert_eq!(encode(f32::NEG_INFINITY), 0xFC00);
        assert_eq!(decode(0x7C00), f32::INFINITY);
        assert_eq!(decode(0xFC00), f32::NEG_INFINITY);

        // Finite values past the half range overflow to Inf, not NaN.
        assert_eq!(encode(65536.0), 0x7C00);
        assert_eq!(encode(f32::MAX), 0x7C00);
        assert_eq!(encode(f32::MIN), 0xFC00);
    }

    #[test]
    fn nan_is_canonicalized() {
        use std::f32;

        let h = encode(f32::NAN);
        assert_eq!(h & 0x7C00, 0x7C00);
        assert_eq!(h & 0x03FF, 0x03FF);
        assert!(decode(h).is_nan());

        // Signaling payloads are still NaN after decoding.
        let signaling = f32::from_bits(0x7F80_0001);
        assert!(decode(encode(signaling)).is_nan());
    }

    #[test]
    fn truncates_toward_zero() {
        // Sub-half-precision mantissa bits are dropped, never rounded up.
        let f = f32::from_bits(0x3F80_1FFF);
        assert_eq!(encode(f), 0x3C00);
        assert_eq!(decode(encode(f)), 1.0);

        let f = f32::from_bits(0xBF80_1FFF);
        assert_eq!(encode(f), 0xBC00);
    }

    #[test]
    fn single_precision_denormals_underflow_to_signed_zero() {
        let tiny = f32::from_bits(0x0000_0001);
        assert_eq!(encode(tiny), 0x0000);
        assert_eq!(encode(-tiny), 0x8000);
    }

    #[test]
    fn half_denormals() {
        // Smallest positive half, 2^-24.
        let f = decode(0x0001);
        assert_eq!(f.to_bits(), 0x3380_0000);
        assert_eq!(encode(f), 0x0001);

        // Largest denormal, just below 2^-14.
        let f = decode(0x03FF);
        assert_eq!(encode(f), 0x03FF);

        // 2^-15 sits in the denormal range.
        assert_eq!(encode(f32::from_bits(0x3800_0000)), 0x0200);
    }

    #[test]
    fn exhaustive_half_round_trip() {
        for bits in 0..=0xFFFFu32 {
            let h = bits as u16;
            let f = decode(h);

            if f.is_nan() {
                // NaN payloads canonicalize; the sign and NaN-ness survive.
                assert_eq!(encode(f), (h & 0x8000) | 0x7FFF);
            } else {
                assert_eq!(encode(f), h, "half 0x{:04X} failed to round-trip", h);
            }
        }
    }

    #[test]
    fn exhaustive_representable_float_round_trip() {
        // Every value in half range decodes to a float that re-encodes and
        // re-decodes to the identical bits.
        for bits in 0..=0xFFFFu32 {
            let f = decode(bits as u16);
            if f.is_nan() {
                continue;
            }

            assert_eq!(decode(encode(f)).to_bits(), f.to_bits());
        }
    }
}
