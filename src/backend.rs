//! The rasterizer backend seam.
//!
//! The engine drives whichever backend is active through this trait; the
//! software reference and the GPU mirror implement the same contract, so
//! the front-end never needs to know which one is drawing. State setters
//! are cheap and infallible where possible; anything that touches device
//! resources returns a `Result` so the engine can degrade to the software
//! reference when the GPU path fails.

use anyhow::Result;

use crate::regs::{ColorCombine, PipelineKey};
use crate::vertex::Triangle;

/// Largest framebuffer the device will honor; `VIDEO_DIM` writes beyond
/// this are dropped. The triple buffer allocates its slots at this size so
/// a resize never reallocates under the consumer.
pub const MAX_WIDTH: u32 = 1024;
pub const MAX_HEIGHT: u32 = 768;

/// Upper bound on the triangle batch; `TRIANGLE_CMD` past this is dropped.
pub const MAX_BATCH: usize = 1024;

/// Scissor rectangle, in pixels, half-open on neither end: `left..=right`,
/// `top..=bottom` are drawable when clipping is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scissor {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// Per-axis texture addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapMode {
    #[default]
    Repeat,
    Clamp,
}

/// Depth-linear fog: `out = (1 - z) * color + z * fog_color`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FogState {
    pub enabled: bool,
    pub color: [f32; 3],
}

/// Chroma-key discard state; `rgb` is compared against the 8-bit-quantized
/// fragment color with a per-channel tolerance of one step.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromaKey {
    pub enabled: bool,
    pub rgb: [u8; 3],
}

/// Fixed-function state pushed on `UpdatePipelineState`: the cache key plus
/// the raw mode words the fragment path re-derives its switches from.
#[derive(Debug, Clone, Copy)]
pub struct PipelineState {
    pub key: PipelineKey,
    pub fbz_mode: u32,
    pub alpha_mode: u32,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            key: PipelineKey::default(),
            fbz_mode: 0,
            alpha_mode: 0,
        }
    }
}

/// The backend capability set. One rasterizer is active at a time; the
/// engine owns it behind this trait.
pub trait Rasterizer: Send {
    /// Reallocate the render targets. Clears both planes; in-flight
    /// content is dropped.
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    /// Select the fixed-function variant for subsequent draws. The GPU
    /// backend resolves this against its pipeline cache.
    fn update_pipeline_state(&mut self, state: &PipelineState) -> Result<()>;

    fn set_scissor(&mut self, scissor: Scissor);

    fn set_chroma_key(&mut self, key: ChromaKey);

    /// Replace the current texture with tightly packed RGBA8 pixels.
    fn set_texture_data(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<()>;

    fn set_texture_enabled(&mut self, enabled: bool);

    fn set_texture_wrap_mode(&mut self, wrap_s: WrapMode, wrap_t: WrapMode) -> Result<()>;

    fn set_color_path(&mut self, combine: ColorCombine);

    fn set_fog_state(&mut self, fog: FogState);

    /// Constant color consumed by the CONST_COLOR blend factors.
    fn set_constant_color(&mut self, rgba: [f32; 4]);

    /// Rasterize a batch into the back buffer. The back buffer is cleared
    /// to the stored clear values first, so an empty batch produces a
    /// clear-only frame.
    fn flush_triangles(&mut self, triangles: &[Triangle]) -> Result<()>;

    /// Store new clear values and clear the back buffer immediately
    /// (`FAST_FILL_CMD`).
    fn clear_framebuffer(&mut self, color: [f32; 4], depth: f32) -> Result<()>;

    /// Make the last rendered back buffer the one `frame()` returns.
    fn swap_buffers(&mut self) -> Result<()>;

    /// The newest complete frame, tightly packed RGBA8, row-major from the
    /// top-left.
    fn frame(&self) -> &[u8];

    /// Release device resources. Idempotent; called before the backend is
    /// dropped or replaced.
    fn destroy(&mut self);
}
