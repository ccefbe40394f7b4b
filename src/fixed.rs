//! Fixed-point conversion helpers for the register interface.
//!
//! The register file speaks five binary fixed-point formats, all carried
//! in 32-bit words with an implied binary point:
//! - 12.4 signed for vertex X/Y screen coordinates (1/16 pixel resolution)
//! - 12.12 unsigned for color channels (0x1000 = 1.0)
//! - 20.12 for depth Z
//! - 14.18 for texture coordinates S/T
//! - 2.30 for the reciprocal W
//!
//! Encoding shifts the value left by the fraction bit count, truncating
//! toward zero; out-of-range inputs wrap with the low bits preserved, the
//! same way the hardware's narrow datapath would. Decoding interprets the
//! word as a signed (or, for colors, unsigned) integer and divides by the
//! scale. Round-tripping a representable value is exact to one ULP of the
//! format.

/// Convert f32 to 12.4 signed fixed-point (1/16 pixel steps).
pub fn to_fixed_12_4(val: f32) -> u32 {
    (val * 16.0) as i64 as u32
}

/// Convert 12.4 signed fixed-point to f32.
pub fn from_fixed_12_4(val: u32) -> f32 {
    val as i32 as f32 / 16.0
}

/// Convert f32 to 12.12 unsigned fixed-point (0x1000 = 1.0).
pub fn to_fixed_12_12(val: f32) -> u32 {
    (val * 4096.0) as i64 as u32
}

/// Convert 12.12 unsigned fixed-point to f32.
pub fn from_fixed_12_12(val: u32) -> f32 {
    val as f32 / 4096.0
}

/// Convert f32 to 20.12 fixed-point, used for depth Z.
pub fn to_fixed_20_12(val: f32) -> u32 {
    (val * 4096.0) as i64 as u32
}

/// Convert 20.12 fixed-point to f32.
pub fn from_fixed_20_12(val: u32) -> f32 {
    val as i32 as f32 / 4096.0
}

/// Convert f32 to 14.18 signed fixed-point, used for S/T.
pub fn to_fixed_14_18(val: f32) -> u32 {
    (val * 262144.0) as i64 as u32
}

/// Convert 14.18 signed fixed-point to f32.
pub fn from_fixed_14_18(val: u32) -> f32 {
    val as i32 as f32 / 262144.0
}

/// Convert f32 to 2.30 signed fixed-point, used for 1/W.
pub fn to_fixed_2_30(val: f32) -> u32 {
    (val * 1073741824.0) as i64 as u32
}

/// Convert 2.30 signed fixed-point to f32.
pub fn from_fixed_2_30(val: u32) -> f32 {
    val as i32 as f32 / 1073741824.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(val: f32, encode: fn(f32) -> u32, decode: fn(u32) -> f32, ulp: f32) {
        let out = decode(encode(val));
        assert!(
            (out - val).abs() <= ulp,
            "{val} -> {out} differs by more than {ulp}"
        );
    }

    #[test]
    fn roundtrip_12_4() {
        for val in [-2047.9, -1.0, -0.0625, 0.0, 0.5, 1.5, 320.25, 2047.5] {
            roundtrip(val, to_fixed_12_4, from_fixed_12_4, 1.0 / 16.0);
        }
    }

    #[test]
    fn roundtrip_12_12() {
        for val in [0.0, 0.25, 0.5, 0.999, 1.0] {
            roundtrip(val, to_fixed_12_12, from_fixed_12_12, 1.0 / 4096.0);
        }
        assert_eq!(to_fixed_12_12(1.0), 0x1000);
    }

    #[test]
    fn roundtrip_20_12() {
        for val in [-8.0, 0.0, 0.125, 0.5, 0.8, 1.0, 100.5] {
            roundtrip(val, to_fixed_20_12, from_fixed_20_12, 1.0 / 4096.0);
        }
    }

    #[test]
    fn roundtrip_14_18() {
        for val in [-4.5, -0.5, 0.0, 0.5, 1.0, 8191.0] {
            roundtrip(val, to_fixed_14_18, from_fixed_14_18, 1.0 / 262144.0);
        }
    }

    #[test]
    fn roundtrip_2_30() {
        for val in [-1.5, -1.0, 0.0, 0.5, 1.0, 1.9] {
            roundtrip(val, to_fixed_2_30, from_fixed_2_30, 1.0 / 1073741824.0);
        }
    }

    #[test]
    fn encoding_truncates_toward_zero() {
        assert_eq!(to_fixed_12_4(0.99 / 16.0), 0);
        assert_eq!(to_fixed_12_4(-0.99 / 16.0), 0);
    }

    #[test]
    fn out_of_range_wraps() {
        // 2^28 pixels is far outside the 12.4 range; only the low 32 bits
        // of the shifted value survive, like the hardware register would
        // keep.
        let encoded = to_fixed_12_4(268435456.0);
        assert_eq!(encoded, (268435456i64 * 16) as u32);
    }

    #[test]
    fn nan_encodes_as_zero() {
        assert_eq!(to_fixed_20_12(f32::NAN), 0);
    }
}
