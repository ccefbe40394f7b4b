//! Register map and state decode.
//!
//! The device exposes a flat, word-addressed register space. Every register
//! is shadowed by the engine; this module holds the offsets, the bitfield
//! views of the mode registers, the compare/blend vocabularies shared by the
//! depth, alpha-test and chroma paths, and the [`PipelineKey`] that
//! identifies a fixed-function pipeline variant on the GPU backend.

use vulkanalia::prelude::v1_0::*;

/// Register offsets, relative to the device base. Word access only.
pub mod reg {
    pub const STATUS: u32 = 0x000;

    pub const VERTEX_AX: u32 = 0x008;
    pub const VERTEX_AY: u32 = 0x00C;
    pub const VERTEX_BX: u32 = 0x010;
    pub const VERTEX_BY: u32 = 0x014;
    pub const VERTEX_CX: u32 = 0x018;
    pub const VERTEX_CY: u32 = 0x01C;

    pub const START_R: u32 = 0x020;
    pub const START_G: u32 = 0x024;
    pub const START_B: u32 = 0x028;
    pub const START_Z: u32 = 0x02C;
    pub const START_A: u32 = 0x030;
    pub const START_S: u32 = 0x034;
    pub const START_T: u32 = 0x038;
    pub const START_W: u32 = 0x03C;

    // Shaded-quad delta registers. Shadowed but never consumed: the
    // rasterizer is barycentric and derives its own gradients.
    pub const DELTA_FIRST: u32 = 0x040;
    pub const DELTA_LAST: u32 = 0x07C;

    pub const TRIANGLE_CMD: u32 = 0x080;
    pub const FTRIANGLE_CMD: u32 = 0x084;
    pub const COLOR_SELECT: u32 = 0x088;

    pub const FBZ_COLOR_PATH: u32 = 0x104;
    pub const FOG_MODE: u32 = 0x108;
    pub const ALPHA_MODE: u32 = 0x10C;
    pub const FBZ_MODE: u32 = 0x110;

    pub const CLIP_LEFT_RIGHT: u32 = 0x118;
    pub const CLIP_LOW_Y_HIGH: u32 = 0x11C;

    pub const FAST_FILL_CMD: u32 = 0x124;
    pub const SWAP_BUFFER_CMD: u32 = 0x128;

    pub const FOG_COLOR: u32 = 0x1C4;
    pub const CHROMA_KEY: u32 = 0x1CC;
    pub const COLOR0: u32 = 0x1D8;
    pub const COLOR1: u32 = 0x1DC;

    pub const VIDEO_DIM: u32 = 0x214;

    pub const TEXTURE_MODE: u32 = 0x300;
    pub const TEX_WIDTH: u32 = 0x330;
    pub const TEX_HEIGHT: u32 = 0x334;
    pub const TEX_UPLOAD: u32 = 0x338;

    /// Linear texture memory window: 64 KiB above the register space.
    pub const TEX_MEM_BASE: u32 = 0x1_0000;
    pub const TEX_MEM_SIZE: u32 = 0x1_0000;

    /// STATUS bit set by a vertical retrace, cleared by the next read.
    pub const STATUS_VRETRACE: u32 = 1 << 6;
}

/// The eight-op compare vocabulary shared by the depth test, the alpha test
/// and (for completeness) the chroma key. Values match the standard depth
/// function encoding.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never = 0,
    Less = 1,
    Equal = 2,
    LessEqual = 3,
    Greater = 4,
    NotEqual = 5,
    GreaterEqual = 6,
    Always = 7,
}

impl CompareOp {
    /// Decode the low three bits of a register field. Total.
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 7 {
            0 => Self::Never,
            1 => Self::Less,
            2 => Self::Equal,
            3 => Self::LessEqual,
            4 => Self::Greater,
            5 => Self::NotEqual,
            6 => Self::GreaterEqual,
            _ => Self::Always,
        }
    }

    /// Evaluate `new <op> old`.
    pub fn test(self, new: f32, old: f32) -> bool {
        match self {
            Self::Never => false,
            Self::Less => new < old,
            Self::Equal => new == old,
            Self::LessEqual => new <= old,
            Self::Greater => new > old,
            Self::NotEqual => new != old,
            Self::GreaterEqual => new >= old,
            Self::Always => true,
        }
    }

    /// Map to the Vulkan compare op with the same semantics.
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            Self::Never => vk::CompareOp::NEVER,
            Self::Less => vk::CompareOp::LESS,
            Self::Equal => vk::CompareOp::EQUAL,
            Self::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
            Self::Greater => vk::CompareOp::GREATER,
            Self::NotEqual => vk::CompareOp::NOT_EQUAL,
            Self::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
            Self::Always => vk::CompareOp::ALWAYS,
        }
    }
}

/// Blend factors, as encoded in the 4-bit fields of `alphaMode`.
/// `AlphaSaturate` is the `min(src.a, 1 - dst.a)` variant.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero = 0,
    SrcAlpha = 1,
    ConstColor = 2,
    DstAlpha = 3,
    One = 4,
    InvSrcAlpha = 5,
    InvConstColor = 6,
    InvDstAlpha = 7,
    AlphaSaturate = 15,
}

impl BlendFactor {
    /// Decode a 4-bit register field. Total; encodings the hardware never
    /// produced read as `Zero`.
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 0xF {
            0 => Self::Zero,
            1 => Self::SrcAlpha,
            2 => Self::ConstColor,
            3 => Self::DstAlpha,
            4 => Self::One,
            5 => Self::InvSrcAlpha,
            6 => Self::InvConstColor,
            7 => Self::InvDstAlpha,
            15 => Self::AlphaSaturate,
            _ => Self::Zero,
        }
    }

    /// Map to the equivalent Vulkan blend factor.
    pub fn to_vk(self) -> vk::BlendFactor {
        match self {
            Self::Zero => vk::BlendFactor::ZERO,
            Self::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            Self::ConstColor => vk::BlendFactor::CONSTANT_COLOR,
            Self::DstAlpha => vk::BlendFactor::DST_ALPHA,
            Self::One => vk::BlendFactor::ONE,
            Self::InvSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            Self::InvConstColor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
            Self::InvDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
            Self::AlphaSaturate => vk::BlendFactor::SRC_ALPHA_SATURATE,
        }
    }
}

/// View of the `fbzMode` register: depth, dither, clipping and chroma
/// controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FbzMode(pub u32);

impl FbzMode {
    pub fn clipping(self) -> bool {
        self.0 & (1 << 0) != 0
    }

    pub fn chroma_key(self) -> bool {
        self.0 & (1 << 1) != 0
    }

    pub fn depth_test(self) -> bool {
        self.0 & (1 << 4) != 0
    }

    pub fn depth_fn(self) -> CompareOp {
        CompareOp::from_bits(self.0 >> 5)
    }

    pub fn dither(self) -> bool {
        self.0 & (1 << 8) != 0
    }

    pub fn depth_write(self) -> bool {
        self.0 & (1 << 10) != 0
    }

    pub fn dither_2x2(self) -> bool {
        self.0 & (1 << 11) != 0
    }

    /// The value `FAST_FILL_CMD` clears the depth plane to: the far plane
    /// for less-flavored compares, the near plane for greater-flavored
    /// ones, and near otherwise.
    pub fn depth_clear_value(self) -> f32 {
        match self.depth_fn() {
            CompareOp::Less | CompareOp::LessEqual | CompareOp::Equal | CompareOp::NotEqual => 1.0,
            CompareOp::Greater | CompareOp::GreaterEqual => 0.0,
            _ => 0.0,
        }
    }
}

/// View of the `alphaMode` register: alpha test and blending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlphaMode(pub u32);

impl AlphaMode {
    pub fn alpha_test(self) -> bool {
        self.0 & (1 << 0) != 0
    }

    pub fn alpha_fn(self) -> CompareOp {
        CompareOp::from_bits(self.0 >> 1)
    }

    pub fn blend(self) -> bool {
        self.0 & (1 << 4) != 0
    }

    pub fn src_factor(self) -> BlendFactor {
        BlendFactor::from_bits(self.0 >> 8)
    }

    pub fn dst_factor(self) -> BlendFactor {
        BlendFactor::from_bits(self.0 >> 12)
    }

    /// The 8-bit reference alpha, compared against fragment alpha as
    /// `ref / 255`.
    pub fn alpha_ref(self) -> u8 {
        (self.0 >> 24) as u8
    }
}

/// Texture formats named by `textureMode` bits 8..11. Only ARGB8888 is
/// decoded; everything else samples as opaque white.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexFormat {
    Argb8888 = 0,
    Unsupported = 0xF,
}

/// View of the `textureMode` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureMode(pub u32);

impl TextureMode {
    pub fn enabled(self) -> bool {
        self.0 & (1 << 0) != 0
    }

    pub fn magnify_linear(self) -> bool {
        self.0 & (1 << 4) != 0
    }

    pub fn clamp_s(self) -> bool {
        self.0 & (1 << 5) != 0
    }

    pub fn clamp_t(self) -> bool {
        self.0 & (1 << 6) != 0
    }

    pub fn format(self) -> TexFormat {
        match (self.0 >> 8) & 0xF {
            0 => TexFormat::Argb8888,
            _ => TexFormat::Unsupported,
        }
    }
}

/// RGB source selected by `fbzColorPath` bits 0..1.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RgbSource {
    Iterated = 0,
    Texture = 1,
}

/// Combine mode selected by `fbzColorPath` bits 4..6.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMode {
    /// Zero the local contribution: the texel passes through (decal).
    ZeroOther = 0,
    /// `clamp(texel - iterated)`.
    Sub = 1,
    /// The iterated color wins.
    Local = 2,
    /// `iterated * texel` (modulate).
    Mul = 3,
    /// `clamp(iterated + texel)`.
    Add = 4,
}

/// Resolved color-combine configuration, as handed to the backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorCombine {
    pub source: RgbSource,
    pub mode: CombineMode,
}

impl ColorCombine {
    /// Convenience presets, observed directly by register value.
    pub const MODULATE: u32 = 0x31;
    pub const ADD: u32 = 0x41;
    pub const DECAL: u32 = 0x01;

    /// Decode an `fbzColorPath` word. `None` means the register was never
    /// written, which preserves the historical behavior of modulating
    /// whenever texturing is on.
    pub fn resolve(word: Option<u32>) -> Self {
        let Some(word) = word else {
            return Self {
                source: RgbSource::Texture,
                mode: CombineMode::Mul,
            };
        };
        let source = match word & 3 {
            1 => RgbSource::Texture,
            _ => RgbSource::Iterated,
        };
        let mode = match (word >> 4) & 7 {
            0 => CombineMode::ZeroOther,
            1 => CombineMode::Sub,
            2 => CombineMode::Local,
            3 => CombineMode::Mul,
            4 => CombineMode::Add,
            _ => CombineMode::ZeroOther,
        };
        Self { source, mode }
    }

    /// Re-encode for the fragment shader's push-constant word.
    pub fn to_bits(self) -> u32 {
        self.source as u32 | ((self.mode as u32) << 4)
    }
}

/// Identity of a fixed-function pipeline variant: the depth and blend state
/// a GPU pipeline object bakes in. Two keys compare equal iff every field
/// matches, which makes the type usable as a cache key; everything else the
/// fragment path needs travels by push constant instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: CompareOp,
    pub blend_enable: bool,
    pub src_blend_factor: BlendFactor,
    pub dst_blend_factor: BlendFactor,
}

impl PipelineKey {
    /// Derive the key from the raw `fbzMode` and `alphaMode` words.
    /// Deterministic: equal inputs produce equal keys.
    pub fn from_registers(fbz_mode: u32, alpha_mode: u32) -> Self {
        let fbz = FbzMode(fbz_mode);
        let alpha = AlphaMode(alpha_mode);
        Self {
            depth_test_enable: fbz.depth_test(),
            depth_write_enable: fbz.depth_write(),
            depth_compare_op: fbz.depth_fn(),
            blend_enable: alpha.blend(),
            src_blend_factor: alpha.src_factor(),
            dst_blend_factor: alpha.dst_factor(),
        }
    }
}

impl Default for PipelineKey {
    /// The baseline pipeline built at init time: LESS, no blending.
    fn default() -> Self {
        Self {
            depth_test_enable: false,
            depth_write_enable: false,
            depth_compare_op: CompareOp::Less,
            blend_enable: false,
            src_blend_factor: BlendFactor::One,
            dst_blend_factor: BlendFactor::Zero,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn compare_op_table() {
        let cases: &[(CompareOp, fn(f32, f32) -> bool)] = &[
            (CompareOp::Never, |_, _| false),
            (CompareOp::Less, |n, o| n < o),
            (CompareOp::Equal, |n, o| n == o),
            (CompareOp::LessEqual, |n, o| n <= o),
            (CompareOp::Greater, |n, o| n > o),
            (CompareOp::NotEqual, |n, o| n != o),
            (CompareOp::GreaterEqual, |n, o| n >= o),
            (CompareOp::Always, |_, _| true),
        ];
        for &(op, reference) in cases {
            for new in [0.0f32, 0.25, 0.5, 1.0] {
                for old in [0.0f32, 0.25, 0.5, 1.0] {
                    assert_eq!(op.test(new, old), reference(new, old), "{op:?} {new} {old}");
                }
            }
        }
    }

    #[test]
    fn compare_op_from_bits_is_total() {
        for bits in 0..16u32 {
            let op = CompareOp::from_bits(bits);
            assert_eq!(op as u32, bits & 7);
        }
    }

    #[test]
    fn blend_factor_unknown_bits_read_zero() {
        for bits in 8..15u32 {
            assert_eq!(BlendFactor::from_bits(bits), BlendFactor::Zero);
        }
        assert_eq!(BlendFactor::from_bits(15), BlendFactor::AlphaSaturate);
    }

    #[test]
    fn pipeline_key_is_deterministic() {
        let fbz = (1 << 4) | (1 << 10) | (4 << 5);
        let alpha = (1 << 4) | (1 << 8) | (5 << 12);
        let a = PipelineKey::from_registers(fbz, alpha);
        let b = PipelineKey::from_registers(fbz, alpha);
        assert_eq!(a, b);
        assert_eq!(a.depth_compare_op, CompareOp::Greater);
        assert_eq!(a.src_blend_factor, BlendFactor::SrcAlpha);
        assert_eq!(a.dst_blend_factor, BlendFactor::InvSrcAlpha);

        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn color_combine_presets() {
        let modulate = ColorCombine::resolve(Some(ColorCombine::MODULATE));
        assert_eq!(modulate.source, RgbSource::Texture);
        assert_eq!(modulate.mode, CombineMode::Mul);

        let add = ColorCombine::resolve(Some(ColorCombine::ADD));
        assert_eq!(add.mode, CombineMode::Add);

        let decal = ColorCombine::resolve(Some(ColorCombine::DECAL));
        assert_eq!(decal.mode, CombineMode::ZeroOther);

        // Never written: modulate, to preserve the historical default.
        let unwritten = ColorCombine::resolve(None);
        assert_eq!(unwritten.source, RgbSource::Texture);
        assert_eq!(unwritten.mode, CombineMode::Mul);
    }

    #[test]
    fn fbz_mode_depth_clear() {
        let less = FbzMode(1 << 4 | (1 << 5));
        assert_eq!(less.depth_clear_value(), 1.0);
        let greater = FbzMode(1 << 4 | (4 << 5));
        assert_eq!(greater.depth_clear_value(), 0.0);
        let never = FbzMode(0);
        assert_eq!(never.depth_clear_value(), 0.0);
    }
}
