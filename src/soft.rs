//! Software reference rasterizer.
//!
//! Barycentric scanline rasterizer with the full per-pixel pipeline:
//! depth test/write, texturing with color combine, alpha test, chroma
//! key, depth-linear fog, ordered dithering and alpha blending. This is
//! the behavioral reference the GPU backend mirrors, and the fallback it
//! degrades to.

use anyhow::Result;
use glam::{Vec2, Vec4};

use crate::backend::{
    ChromaKey, FogState, PipelineState, Rasterizer, Scissor, WrapMode,
};
use crate::regs::{AlphaMode, BlendFactor, CombineMode, ColorCombine, FbzMode, RgbSource};
use crate::vertex::{edge, normalize_depth, Triangle};

/// 2x2 ordered-dither matrix.
const BAYER_2X2: [[f32; 2]; 2] = [[0.0, 2.0], [3.0, 1.0]];

/// 4x4 ordered-dither matrix.
const BAYER_4X4: [[f32; 4]; 4] = [
    [0.0, 8.0, 2.0, 10.0],
    [12.0, 4.0, 14.0, 6.0],
    [3.0, 11.0, 1.0, 9.0],
    [15.0, 7.0, 13.0, 5.0],
];

struct TextureImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

pub struct SoftwareRasterizer {
    width: u32,
    height: u32,
    /// Completed frame, handed out by `frame()`.
    front: Vec<u8>,
    /// Render target for the current batch.
    back: Vec<u8>,
    depth: Vec<f32>,

    state: PipelineState,
    scissor: Scissor,
    chroma: ChromaKey,
    fog: FogState,
    combine: ColorCombine,
    constant_color: Vec4,
    clear_color: [f32; 4],
    clear_depth: f32,

    texture: Option<TextureImage>,
    texture_enabled: bool,
    wrap_s: WrapMode,
    wrap_t: WrapMode,
}

impl SoftwareRasterizer {
    pub fn new(width: u32, height: u32) -> Self {
        let pixels = (width * height * 4) as usize;
        Self {
            width,
            height,
            front: vec![0u8; pixels],
            back: vec![0u8; pixels],
            depth: vec![1.0; (width * height) as usize],
            state: PipelineState::default(),
            scissor: Scissor::default(),
            chroma: ChromaKey::default(),
            fog: FogState::default(),
            combine: ColorCombine::resolve(None),
            constant_color: Vec4::ZERO,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
            texture: None,
            texture_enabled: false,
            wrap_s: WrapMode::Repeat,
            wrap_t: WrapMode::Repeat,
        }
    }

    fn clear_back(&mut self) {
        let rgba = pack(Vec4::from_array(self.clear_color));
        for pixel in self.back.chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
        self.depth.fill(self.clear_depth);
    }

    fn draw_triangle(&mut self, triangle: &Triangle) {
        // Degenerate triangles are discarded; negative winding is
        // normalized so the inside test can use a single sign convention.
        let Some(triangle) = triangle.normalized() else {
            return;
        };
        let [v0, v1, v2] = triangle.vertices;
        let area = triangle.signed_area();
        let inv_area = 1.0 / area;

        let fbz = FbzMode(self.state.fbz_mode);
        let alpha_mode = AlphaMode(self.state.alpha_mode);

        // Bounding box, intersected with the render target and, when
        // clipping is enabled, with the scissor rectangle.
        let min_xf = v0.pos.x.min(v1.pos.x).min(v2.pos.x);
        let max_xf = v0.pos.x.max(v1.pos.x).max(v2.pos.x);
        let min_yf = v0.pos.y.min(v1.pos.y).min(v2.pos.y);
        let max_yf = v0.pos.y.max(v1.pos.y).max(v2.pos.y);

        let mut min_x = (min_xf.floor().max(0.0)) as i64;
        let mut max_x = (max_xf.ceil()) as i64;
        let mut min_y = (min_yf.floor().max(0.0)) as i64;
        let mut max_y = (max_yf.ceil()) as i64;
        max_x = max_x.min(self.width as i64 - 1);
        max_y = max_y.min(self.height as i64 - 1);

        if fbz.clipping() {
            min_x = min_x.max(self.scissor.left as i64);
            max_x = max_x.min(self.scissor.right as i64);
            min_y = min_y.max(self.scissor.top as i64);
            max_y = max_y.min(self.scissor.bottom as i64);
        }
        if min_x > max_x || min_y > max_y {
            return;
        }

        let z0 = normalize_depth(v0.z);
        let z1 = normalize_depth(v1.z);
        let z2 = normalize_depth(v2.z);

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                // Evaluate the three edge functions against the pixel
                // center. Inside iff all are non-negative (the winding
                // was normalized above).
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(v1.pos, v2.pos, p);
                let w1 = edge(v2.pos, v0.pos, p);
                let w2 = edge(v0.pos, v1.pos, p);
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let b0 = w0 * inv_area;
                let b1 = w1 * inv_area;
                let b2 = w2 * inv_area;

                let z = b0 * z0 + b1 * z1 + b2 * z2;
                let index = (y as u32 * self.width + x as u32) as usize;

                if fbz.depth_test() && !fbz.depth_fn().test(z, self.depth[index]) {
                    continue;
                }

                // Affine attribute interpolation.
                let mut color = b0 * v0.color + b1 * v1.color + b2 * v2.color;
                if self.texture_enabled {
                    let uv = b0 * v0.uv + b1 * v1.uv + b2 * v2.uv;
                    color = self.apply_combine(color, self.sample(uv.x, uv.y));
                }
                color = color.clamp(Vec4::ZERO, Vec4::ONE);

                if alpha_mode.alpha_test() {
                    let reference = alpha_mode.alpha_ref() as f32 / 255.0;
                    if !alpha_mode.alpha_fn().test(color.w, reference) {
                        continue;
                    }
                }

                if fbz.chroma_key() && self.chroma.enabled && chroma_matches(color, self.chroma.rgb)
                {
                    continue;
                }

                if self.fog.enabled {
                    let fog = Vec4::new(self.fog.color[0], self.fog.color[1], self.fog.color[2], 0.0);
                    let mut fogged = (1.0 - z) * color + z * fog;
                    fogged.w = color.w;
                    color = fogged.clamp(Vec4::ZERO, Vec4::ONE);
                }

                if fbz.dither() {
                    color = dither(color, x as u32, y as u32, fbz.dither_2x2());
                }

                let offset = index * 4;
                if alpha_mode.blend() {
                    let dst = unpack(&self.back[offset..offset + 4]);
                    let src_factor =
                        blend_factor(alpha_mode.src_factor(), color, dst, self.constant_color);
                    let dst_factor =
                        blend_factor(alpha_mode.dst_factor(), color, dst, self.constant_color);
                    color = (color * src_factor + dst * dst_factor).clamp(Vec4::ZERO, Vec4::ONE);
                }

                self.back[offset..offset + 4].copy_from_slice(&pack(color));
                if fbz.depth_write() {
                    self.depth[index] = z;
                }
            }
        }
    }

    /// Color combine between the interpolated vertex color and the
    /// sampled texel, per `fbzColorPath`.
    fn apply_combine(&self, iterated: Vec4, texel: Vec4) -> Vec4 {
        if self.combine.source == RgbSource::Iterated {
            return iterated;
        }
        match self.combine.mode {
            CombineMode::ZeroOther => texel,
            CombineMode::Sub => (texel - iterated).clamp(Vec4::ZERO, Vec4::ONE),
            CombineMode::Local => iterated,
            CombineMode::Mul => iterated * texel,
            CombineMode::Add => (iterated + texel).clamp(Vec4::ZERO, Vec4::ONE),
        }
    }

    /// Nearest-neighbor sample honoring the per-axis wrap modes. With no
    /// texture bound (or an unsupported format substituted at upload) the
    /// sample is opaque white.
    fn sample(&self, s: f32, t: f32) -> Vec4 {
        let Some(texture) = &self.texture else {
            return Vec4::ONE;
        };
        let u = apply_wrap(s, self.wrap_s);
        let v = apply_wrap(t, self.wrap_t);
        let x = ((u * texture.width as f32) as i64).clamp(0, texture.width as i64 - 1) as u32;
        let y = ((v * texture.height as f32) as i64).clamp(0, texture.height as i64 - 1) as u32;
        let offset = ((y * texture.width + x) * 4) as usize;
        unpack(&texture.pixels[offset..offset + 4])
    }
}

impl Rasterizer for SoftwareRasterizer {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.width = width;
        self.height = height;
        let pixels = (width * height * 4) as usize;
        self.front = vec![0u8; pixels];
        self.back = vec![0u8; pixels];
        self.depth = vec![1.0; (width * height) as usize];
        Ok(())
    }

    fn update_pipeline_state(&mut self, state: &PipelineState) -> Result<()> {
        self.state = *state;
        Ok(())
    }

    fn set_scissor(&mut self, scissor: Scissor) {
        self.scissor = scissor;
    }

    fn set_chroma_key(&mut self, key: ChromaKey) {
        self.chroma = key;
    }

    fn set_texture_data(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<()> {
        self.texture = Some(TextureImage {
            width,
            height,
            pixels: pixels.to_vec(),
        });
        Ok(())
    }

    fn set_texture_enabled(&mut self, enabled: bool) {
        self.texture_enabled = enabled;
    }

    fn set_texture_wrap_mode(&mut self, wrap_s: WrapMode, wrap_t: WrapMode) -> Result<()> {
        self.wrap_s = wrap_s;
        self.wrap_t = wrap_t;
        Ok(())
    }

    fn set_color_path(&mut self, combine: ColorCombine) {
        self.combine = combine;
    }

    fn set_fog_state(&mut self, fog: FogState) {
        self.fog = fog;
    }

    fn set_constant_color(&mut self, rgba: [f32; 4]) {
        self.constant_color = Vec4::from_array(rgba);
    }

    fn flush_triangles(&mut self, triangles: &[Triangle]) -> Result<()> {
        // Every flush starts from the stored clear values, mirroring the
        // GPU render pass's clear-on-load; an empty batch yields a
        // clear-only frame.
        self.clear_back();
        for triangle in triangles {
            self.draw_triangle(triangle);
        }
        Ok(())
    }

    fn clear_framebuffer(&mut self, color: [f32; 4], depth: f32) -> Result<()> {
        self.clear_color = color;
        self.clear_depth = depth;
        self.clear_back();
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<()> {
        std::mem::swap(&mut self.front, &mut self.back);
        Ok(())
    }

    fn frame(&self) -> &[u8] {
        &self.front
    }

    fn destroy(&mut self) {}
}

/// Blend factor evaluation. `AlphaSaturate` is `min(src.a, 1 - dst.a)`
/// for the color channels and one for alpha.
fn blend_factor(factor: BlendFactor, src: Vec4, dst: Vec4, constant: Vec4) -> Vec4 {
    match factor {
        BlendFactor::Zero => Vec4::ZERO,
        BlendFactor::One => Vec4::ONE,
        BlendFactor::SrcAlpha => Vec4::splat(src.w),
        BlendFactor::DstAlpha => Vec4::splat(dst.w),
        BlendFactor::InvSrcAlpha => Vec4::splat(1.0 - src.w),
        BlendFactor::InvDstAlpha => Vec4::splat(1.0 - dst.w),
        BlendFactor::ConstColor => constant,
        BlendFactor::InvConstColor => Vec4::ONE - constant,
        BlendFactor::AlphaSaturate => {
            let f = src.w.min(1.0 - dst.w);
            Vec4::new(f, f, f, 1.0)
        }
    }
}

/// Ordered dither: quantize the color channels to the part's 5-bit
/// framebuffer depth with a Bayer threshold indexed by the pixel
/// position, then expand back to the full range. Alpha has no storage
/// constraint and passes through.
fn dither(color: Vec4, x: u32, y: u32, use_2x2: bool) -> Vec4 {
    let (threshold, steps) = if use_2x2 {
        (BAYER_2X2[(y % 2) as usize][(x % 2) as usize], 4.0)
    } else {
        (BAYER_4X4[(y % 4) as usize][(x % 4) as usize], 16.0)
    };
    let t = (threshold + 0.5) / steps;
    let quantize = |c: f32| ((c * 31.0 + (t - 0.5)).round().clamp(0.0, 31.0)) / 31.0;
    Vec4::new(
        quantize(color.x),
        quantize(color.y),
        quantize(color.z),
        color.w,
    )
}

/// Chroma-key match: the 8-bit-quantized fragment color is within one
/// step of the key on every channel.
fn chroma_matches(color: Vec4, key: [u8; 3]) -> bool {
    let q = |c: f32| (c * 255.0).round() as i32;
    (q(color.x) - key[0] as i32).abs() <= 1
        && (q(color.y) - key[1] as i32).abs() <= 1
        && (q(color.z) - key[2] as i32).abs() <= 1
}

fn apply_wrap(coord: f32, mode: WrapMode) -> f32 {
    match mode {
        // frac() with negative normalization, so -0.25 samples at 0.75.
        WrapMode::Repeat => coord - coord.floor(),
        WrapMode::Clamp => coord.clamp(0.0, 1.0),
    }
}

fn pack(color: Vec4) -> [u8; 4] {
    let b = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    [b(color.x), b(color.y), b(color.z), b(color.w)]
}

fn unpack(bytes: &[u8]) -> Vec4 {
    Vec4::new(
        bytes[0] as f32 / 255.0,
        bytes[1] as f32 / 255.0,
        bytes[2] as f32 / 255.0,
        bytes[3] as f32 / 255.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::PipelineKey;

    fn triangle(points: [(f32, f32); 3], color: Vec4, z: f32) -> Triangle {
        let mut tri = Triangle::default();
        for (vertex, &(x, y)) in tri.vertices.iter_mut().zip(points.iter()) {
            vertex.pos = Vec2::new(x, y);
            vertex.color = color;
            vertex.z = z;
        }
        tri
    }

    fn pixel(raster: &SoftwareRasterizer, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * raster.width + x) * 4) as usize;
        raster.frame()[offset..offset + 4].try_into().unwrap()
    }

    fn state(fbz_mode: u32, alpha_mode: u32) -> PipelineState {
        PipelineState {
            key: PipelineKey::from_registers(fbz_mode, alpha_mode),
            fbz_mode,
            alpha_mode,
        }
    }

    #[test]
    fn covers_pixel_centers_inside_only() {
        let mut raster = SoftwareRasterizer::new(16, 16);
        let tri = triangle([(2.0, 2.0), (14.0, 2.0), (2.0, 14.0)], Vec4::ONE, 0.5);
        raster.flush_triangles(&[tri]).unwrap();
        raster.swap_buffers().unwrap();
        assert_eq!(pixel(&raster, 4, 4), [255, 255, 255, 255]);
        assert_eq!(pixel(&raster, 15, 15), [0, 0, 0, 255]);
    }

    #[test]
    fn scissor_shrinks_the_bbox() {
        let mut raster = SoftwareRasterizer::new(16, 16);
        raster
            .update_pipeline_state(&state(1 << 0, 0))
            .unwrap();
        raster.set_scissor(Scissor {
            left: 8,
            top: 0,
            right: 15,
            bottom: 15,
        });
        let tri = triangle([(0.0, 0.0), (16.0, 0.0), (0.0, 16.0)], Vec4::ONE, 0.5);
        raster.flush_triangles(&[tri]).unwrap();
        raster.swap_buffers().unwrap();
        assert_eq!(pixel(&raster, 4, 4), [0, 0, 0, 255]);
        assert_eq!(pixel(&raster, 8, 4), [255, 255, 255, 255]);
    }

    #[test]
    fn depth_test_rejects_farther_fragment() {
        let mut raster = SoftwareRasterizer::new(16, 16);
        let fbz = (1 << 4) | (1 << 5) | (1 << 10); // depth test LESS + write
        raster.update_pipeline_state(&state(fbz, 0)).unwrap();
        let near = triangle(
            [(0.0, 0.0), (16.0, 0.0), (0.0, 16.0)],
            Vec4::new(1.0, 0.0, 0.0, 1.0),
            0.2,
        );
        let far = triangle(
            [(0.0, 0.0), (16.0, 0.0), (0.0, 16.0)],
            Vec4::new(0.0, 0.0, 1.0, 1.0),
            0.8,
        );
        raster.flush_triangles(&[near, far]).unwrap();
        raster.swap_buffers().unwrap();
        let [r, _, b, _] = pixel(&raster, 4, 4);
        assert!(r > 200 && b < 50, "near red should have survived: {r} {b}");
    }

    #[test]
    fn modulate_combines_vertex_and_texel() {
        let mut raster = SoftwareRasterizer::new(8, 8);
        raster
            .set_texture_data(1, 1, &[255, 0, 0, 255])
            .unwrap();
        raster.set_texture_enabled(true);
        let tri = triangle([(0.0, 0.0), (8.0, 0.0), (0.0, 8.0)], Vec4::ONE, 0.5);
        raster.flush_triangles(&[tri]).unwrap();
        raster.swap_buffers().unwrap();
        assert_eq!(pixel(&raster, 2, 2), [255, 0, 0, 255]);
    }

    #[test]
    fn repeat_wrap_normalizes_negative_coordinates() {
        assert_eq!(apply_wrap(-0.25, WrapMode::Repeat), 0.75);
        assert_eq!(apply_wrap(1.5, WrapMode::Repeat), 0.5);
        assert_eq!(apply_wrap(-0.25, WrapMode::Clamp), 0.0);
        assert_eq!(apply_wrap(1.5, WrapMode::Clamp), 1.0);
    }

    #[test]
    fn dither_produces_distinct_levels() {
        let gray = Vec4::splat(0.502);
        let mut values = std::collections::HashSet::new();
        for y in 0..4 {
            for x in 0..4 {
                let out = dither(gray, x, y, false);
                values.insert((out.x * 255.0).round() as u8);
            }
        }
        assert!(values.len() >= 2, "4x4 dither collapsed to {values:?}");
    }

    #[test]
    fn saturate_blend_factor() {
        let src = Vec4::new(1.0, 1.0, 1.0, 0.75);
        let dst = Vec4::new(0.0, 0.0, 0.0, 0.5);
        let f = blend_factor(BlendFactor::AlphaSaturate, src, dst, Vec4::ZERO);
        assert_eq!(f.x, 0.5);
        assert_eq!(f.w, 1.0);
    }

    #[test]
    fn chroma_tolerance_is_one_step() {
        let key = [255, 0, 255];
        assert!(chroma_matches(Vec4::new(1.0, 0.0, 1.0, 1.0), key));
        assert!(chroma_matches(Vec4::new(254.0 / 255.0, 1.0 / 255.0, 1.0, 1.0), key));
        assert!(!chroma_matches(Vec4::new(1.0, 0.0, 0.9, 1.0), key));
    }
}
