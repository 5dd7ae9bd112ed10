// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Compressed float packing (`Float16_t`, `Double32_t`).
//!
//! With a non-zero factor the value is quantized over `[xmin, xmax]` into a
//! u32. Without one, `xmin` holds the mantissa width and the value is
//! truncated to an 8-bit exponent plus an `nbits`-wide mantissa.

/// Largest mantissa width that still fits the u16 mantissa word with its sign bit.
const MAX_NBITS: u32 = 14;

pub(crate) fn clamp_nbits(nbits: u32) -> u32 {
    nbits.clamp(1, MAX_NBITS)
}

pub(crate) fn quantize(x: f64, xmin: f64, xmax: f64, factor: f64) -> u32 {
    let x = if x < xmin {
        xmin
    } else if x > xmax {
        xmax
    } else {
        x
    };
    (0.5 + factor * (x - xmin)) as u32
}

pub(crate) fn dequantize(aint: u32, xmin: f64, factor: f64) -> f64 {
    f64::from(aint) / factor + xmin
}

/// Split an f32 into the (exponent, mantissa) pair written on the wire.
pub(crate) fn pack_nbits(value: f32, nbits: u32) -> (u8, u16) {
    let nbits = clamp_nbits(nbits);
    let bits = value.to_bits();
    let exp = ((bits << 1) >> 24) & 0xff;
    let mut man = ((1u32 << (nbits + 1)) - 1) & (bits >> (23 - nbits - 1));
    man += 1;
    man >>= 1;
    if man & (1 << nbits) != 0 {
        man = (1 << nbits) - 1;
    }
    if value < 0.0 {
        man |= 1 << (nbits + 1);
    }
    (exp as u8, man as u16)
}

pub(crate) fn unpack_nbits(exp: u8, man: u16, nbits: u32) -> f32 {
    let nbits = clamp_nbits(nbits);
    let man = u32::from(man);
    let mut bits = u32::from(exp) << 23;
    bits |= (man & ((1 << (nbits + 1)) - 1)) << (23 - nbits);
    let f = f32::from_bits(bits);
    if (1 << (nbits + 1)) & man != 0 {
        -f
    } else {
        f
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_clamps_to_range() {
        let factor = f64::from(u32::MAX) / 10.0;
        assert_eq!(quantize(-5.0, 0.0, 10.0, factor), 0);
        let top = quantize(50.0, 0.0, 10.0, factor);
        assert_eq!(top, quantize(10.0, 0.0, 10.0, factor));
    }

    #[test]
    fn test_nbits_roundtrip_precision() {
        for &(value, nbits) in &[(1.5f32, 12u32), (-3.25, 12), (100.0, 8), (0.1, 14)] {
            let (exp, man) = pack_nbits(value, nbits);
            let back = unpack_nbits(exp, man, nbits);
            let tol = value.abs() / (1u32 << nbits) as f32 * 2.0;
            assert!(
                (back - value).abs() <= tol,
                "value={} nbits={} back={}",
                value,
                nbits,
                back
            );
            assert_eq!(back.is_sign_negative(), value.is_sign_negative());
        }
    }

    #[test]
    fn test_mantissa_overflow_saturates() {
        // all mantissa bits set rounds up past the field width
        let value = f32::from_bits(0x3fff_ffff);
        let (_, man) = pack_nbits(value, 4);
        assert_eq!(man, (1 << 4) - 1);
    }
}
