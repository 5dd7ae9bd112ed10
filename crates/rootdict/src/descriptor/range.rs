// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `[xmin,xmax(,nbits)]` ranges for compressed floats.

use crate::error::SchemaError;
use std::f64::consts::PI;

/// Quantization parameters of a `Float16_t` / `Double32_t` member.
///
/// A zero `factor` means "no range": `xmin` then carries the mantissa
/// width (0 selects the per-kind default).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FloatRange {
    pub xmin: f64,
    pub xmax: f64,
    pub factor: f64,
}

impl FloatRange {
    /// Range over `[xmin, xmax]` quantized on `nbits` bits.
    ///
    /// When the interval is empty and `nbits < 15`, `xmin` is set to
    /// `nbits + 0.1`: readers recover the mantissa width by truncation.
    pub fn new(xmin: f64, xmax: f64, nbits: u32) -> Self {
        let bigint = if nbits < 32 {
            f64::from(1u32 << nbits)
        } else {
            f64::from(u32::MAX)
        };
        let mut range = FloatRange {
            xmin,
            xmax,
            factor: 0.0,
        };
        if xmin < xmax {
            range.factor = bigint / (xmax - xmin);
        }
        if xmin >= xmax && nbits < 15 {
            range.xmin = f64::from(nbits) + 0.1;
        }
        range
    }

    /// Truncated mantissa width, no quantization interval.
    pub fn with_nbits(nbits: u32) -> Self {
        Self::new(0.0, 0.0, nbits)
    }

    pub fn is_set(&self) -> bool {
        self.factor != 0.0 || self.xmin != 0.0 || self.xmax != 0.0
    }
}

/// Extract the compressed-float range from a member title.
///
/// The first bracketed group holding a comma is used; a leading
/// dimension group such as `[3]` is skipped. Titles without such a group
/// yield the empty range.
///
/// ```
/// use rootdict::descriptor::parse_range;
///
/// let r = parse_range("[3][0, 10, 16] momentum").expect("valid range");
/// assert_eq!((r.xmin, r.xmax), (0.0, 10.0));
/// assert_eq!(r.factor, 65536.0 / 10.0);
/// ```
pub fn parse_range(title: &str) -> Result<FloatRange, SchemaError> {
    let Some(group) = range_group(title) else {
        return Ok(FloatRange::default());
    };

    let bad = |reason: String| SchemaError::BadRange {
        title: title.to_string(),
        reason,
    };

    let tokens: Vec<&str> = group.splitn(3, ',').collect();
    let mut nbits = 32u32;
    if let Some(tok) = tokens.get(2) {
        let n: i64 = tok
            .trim()
            .parse()
            .map_err(|_| bad(format!("invalid number of bits {:?}", tok.trim())))?;
        if !(2..=32).contains(&n) {
            return Err(bad(format!("number of bits {} outside [2, 32]", n)));
        }
        nbits = n as u32;
    }

    let xmin = parse_bound(tokens[0])
        .ok_or_else(|| bad(format!("invalid minimum {:?}", tokens[0])))?;
    let xmax = parse_bound(tokens[1])
        .ok_or_else(|| bad(format!("invalid maximum {:?}", tokens[1])))?;
    Ok(FloatRange::new(xmin, xmax, nbits))
}

/// Content of the first `[..]` group containing a comma, looking at most at
/// the first two groups.
fn range_group(title: &str) -> Option<&str> {
    let mut rest = title;
    for _ in 0..2 {
        let left = rest.find('[')?;
        let right = left + rest[left..].find(']')?;
        let inner = &rest[left + 1..right];
        if inner.contains(',') {
            return Some(inner);
        }
        rest = &rest[right..];
    }
    None
}

fn parse_bound(token: &str) -> Option<f64> {
    let tok: String = token
        .to_lowercase()
        .chars()
        .filter(|c| *c != ' ')
        .collect();
    if tok.contains("pi") {
        let mut v = if tok.contains("2pi") || tok.contains("2*pi") || tok.contains("twopi") {
            2.0 * PI
        } else if tok.contains("pi/2") {
            PI / 2.0
        } else if tok.contains("pi/4") {
            PI / 4.0
        } else {
            PI
        };
        if tok.contains('-') {
            v = -v;
        }
        return Some(v);
    }
    tok.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_range() {
        assert_eq!(parse_range("plain title").expect("no range"), FloatRange::default());
        assert_eq!(parse_range("[fN] counted").expect("no range"), FloatRange::default());
        assert!(!FloatRange::default().is_set());
    }

    #[test]
    fn test_two_tokens_default_32_bits() {
        let r = parse_range("[-1,1]").expect("valid range");
        assert_eq!(r.xmin, -1.0);
        assert_eq!(r.xmax, 1.0);
        assert_eq!(r.factor, f64::from(u32::MAX) / 2.0);
    }

    #[test]
    fn test_dimension_prefix_is_skipped() {
        let r = parse_range("[5][0,100,8]").expect("valid range");
        assert_eq!(r.xmax, 100.0);
        assert_eq!(r.factor, 256.0 / 100.0);
    }

    #[test]
    fn test_pi_constants() {
        let r = parse_range("[-pi, 2 * PI, 20]").expect("valid range");
        assert_eq!(r.xmin, -PI);
        assert_eq!(r.xmax, 2.0 * PI);

        let r = parse_range("[-pi/4,pi/2]").expect("valid range");
        assert_eq!(r.xmin, -PI / 4.0);
        assert_eq!(r.xmax, PI / 2.0);

        let r = parse_range("[0,twopi]").expect("valid range");
        assert_eq!(r.xmax, 2.0 * PI);
    }

    #[test]
    fn test_nbits_sentinel() {
        let r = parse_range("[0,0,12]").expect("valid range");
        assert_eq!(r.factor, 0.0);
        assert_eq!(r.xmin, 12.1);
        assert_eq!(r.xmin as u32, 12);

        // no sentinel at 15 bits and above
        let r = parse_range("[0,0,15]").expect("valid range");
        assert_eq!(r.xmin, 0.0);
    }

    #[test]
    fn test_invalid_nbits_rejected() {
        for title in ["[0,1,1]", "[0,1,33]", "[0,1,x]"] {
            match parse_range(title) {
                Err(SchemaError::BadRange { .. }) => {}
                other => panic!("Expected BadRange for {}, got {:?}", title, other),
            }
        }
        assert!(parse_range("[0,abc]").is_err());
    }
}
