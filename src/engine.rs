//! Register front-end and vertex assembler.
//!
//! The engine shadows every register, decodes writes into vertex, color
//! and state mutations, batches triangles, and owns the handoff of
//! finished frames to the compositor. Guest threads call
//! [`handle_write`](Engine::handle_write)/[`handle_read`](Engine::handle_read)
//! under a short internal writer lock; the compositor calls
//! [`get_frame`](Engine::get_frame), which never takes that lock and only
//! performs an atomic slot swap.
//!
//! Register write semantics are "always accepted, effect best-effort":
//! there is no error channel back to the guest. A failing GPU backend
//! degrades to the software reference mid-frame and keeps producing
//! complete frames.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use log::{debug, info, warn};

use crate::backend::{
    ChromaKey, FogState, PipelineState, Rasterizer, Scissor, WrapMode, MAX_BATCH, MAX_HEIGHT,
    MAX_WIDTH,
};
use crate::fixed::{
    from_fixed_12_12, from_fixed_12_4, from_fixed_14_18, from_fixed_20_12, from_fixed_2_30,
};
use crate::frame::TripleBuffer;
use crate::gpu::GpuRasterizer;
use crate::regs::{reg, ColorCombine, FbzMode, PipelineKey, TexFormat, TextureMode};
use crate::soft::SoftwareRasterizer;
use crate::texmem::TextureWindow;
use crate::vertex::{Triangle, Vertex};

pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

/// Which rasterizer backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Software,
    Gpu,
}

/// Everything the writer lock protects: the register shadow, the working
/// vertex state and the active backend.
struct EngineInner {
    backend: Box<dyn Rasterizer>,
    kind: BackendKind,

    /// Shadow of the word-addressed register space.
    regs: Box<[u32; 256]>,
    texmem: TextureWindow,

    /// Flat-shading accumulator for color/Z/S/T/W.
    current: Vertex,
    /// A/B/C screen positions.
    positions: [glam::Vec2; 3],
    /// Per-vertex attribute slots used once Gouraud is latched.
    slots: [Vertex; 3],
    color_select: usize,
    /// Latched by the first `COLOR_SELECT` write, never cleared.
    gouraud: bool,
    /// Set once `FBZ_COLOR_PATH` has been written; before that, texturing
    /// defaults to modulate.
    color_path_written: bool,

    scissor: Scissor,
    clear_color: [f32; 4],
    clear_depth: f32,
    pipeline_dirty: bool,

    batch: Vec<Triangle>,
    last_upload: Option<(u32, u32)>,

    width: u32,
    height: u32,
    destroyed: bool,
}

/// The rendering engine, exposed to the VM as a memory-mapped register
/// bank. Producer threads (the guest CPU) write registers; one consumer
/// thread (the compositor) reads frames.
pub struct Engine {
    inner: Mutex<EngineInner>,
    frames: TripleBuffer,
    enabled: AtomicBool,
    vretrace: AtomicBool,
    /// Current dimensions as `(width << 32) | height`, readable without
    /// the writer lock.
    dims: AtomicU64,
}

const fn idx(addr: u32) -> usize {
    (addr >> 2) as usize
}

/// Decode a packed ARGB word into float RGBA; a zero alpha field reads as
/// opaque so cleared registers still render.
fn unpack_argb(word: u32) -> [f32; 4] {
    let alpha = (word >> 24) & 0xFF;
    let alpha = if alpha == 0 { 255 } else { alpha };
    [
        ((word >> 16) & 0xFF) as f32 / 255.0,
        ((word >> 8) & 0xFF) as f32 / 255.0,
        (word & 0xFF) as f32 / 255.0,
        alpha as f32 / 255.0,
    ]
}

fn unpack_rgb(word: u32) -> [f32; 3] {
    [
        ((word >> 16) & 0xFF) as f32 / 255.0,
        ((word >> 8) & 0xFF) as f32 / 255.0,
        (word & 0xFF) as f32 / 255.0,
    ]
}

fn wrap_mode(clamp: bool) -> WrapMode {
    if clamp {
        WrapMode::Clamp
    } else {
        WrapMode::Repeat
    }
}

fn build_backend(kind: BackendKind, width: u32, height: u32) -> Result<Box<dyn Rasterizer>> {
    Ok(match kind {
        BackendKind::Software => Box::new(SoftwareRasterizer::new(width, height)),
        BackendKind::Gpu => Box::new(GpuRasterizer::new(width, height)?),
    })
}

impl Engine {
    /// Build an engine with the requested backend. A GPU that fails to
    /// initialize degrades to the software reference; the constructor
    /// itself only fails if no backend at all can be built.
    pub fn new(kind: BackendKind) -> Result<Self> {
        let (backend, kind) = match kind {
            BackendKind::Software => (
                build_backend(BackendKind::Software, DEFAULT_WIDTH, DEFAULT_HEIGHT)?,
                BackendKind::Software,
            ),
            BackendKind::Gpu => match build_backend(BackendKind::Gpu, DEFAULT_WIDTH, DEFAULT_HEIGHT)
            {
                Ok(backend) => (backend, BackendKind::Gpu),
                Err(error) => {
                    warn!("GPU backend unavailable ({error:#}); using the software rasterizer.");
                    (
                        build_backend(BackendKind::Software, DEFAULT_WIDTH, DEFAULT_HEIGHT)?,
                        BackendKind::Software,
                    )
                }
            },
        };

        info!("Engine created with {kind:?} backend.");
        Ok(Self {
            inner: Mutex::new(EngineInner {
                backend,
                kind,
                regs: Box::new([0u32; 256]),
                texmem: TextureWindow::new(),
                current: Vertex::default(),
                positions: [glam::Vec2::ZERO; 3],
                slots: [Vertex::default(); 3],
                color_select: 0,
                gouraud: false,
                color_path_written: false,
                scissor: Scissor::default(),
                clear_color: [0.0, 0.0, 0.0, 1.0],
                clear_depth: 1.0,
                pipeline_dirty: true,
                batch: Vec::with_capacity(MAX_BATCH),
                last_upload: None,
                width: DEFAULT_WIDTH,
                height: DEFAULT_HEIGHT,
                destroyed: false,
            }),
            frames: TripleBuffer::new(DEFAULT_WIDTH, DEFAULT_HEIGHT),
            enabled: AtomicBool::new(true),
            vretrace: AtomicBool::new(false),
            dims: AtomicU64::new(((DEFAULT_WIDTH as u64) << 32) | DEFAULT_HEIGHT as u64),
        })
    }

    /// Decode and apply a 32-bit register write.
    pub fn handle_write(&self, addr: u32, value: u32) {
        let mut inner = self.inner.lock().unwrap();
        self.write_locked(&mut inner, addr, value);
    }

    /// Read a register. Ordinary registers return their shadow; STATUS is
    /// computed, and texture-window addresses read back the stored bytes.
    pub fn handle_read(&self, addr: u32) -> u32 {
        if (reg::TEX_MEM_BASE..reg::TEX_MEM_BASE + reg::TEX_MEM_SIZE).contains(&addr) {
            let inner = self.inner.lock().unwrap();
            return inner.texmem.read_word(addr - reg::TEX_MEM_BASE);
        }
        match addr {
            reg::STATUS => {
                // FIFOs are always drained from the guest's point of view:
                // the memory FIFO free count fills bits 12..19 and the PCI
                // free count bits 20..24. The vretrace bit is edge
                // triggered and clears on read.
                let mut status = (0xFF << 12) | (0x1F << 20);
                if self.vretrace.swap(false, Ordering::AcqRel) {
                    status |= reg::STATUS_VRETRACE;
                }
                status
            }
            _ if addr < 0x400 => self.inner.lock().unwrap().regs[idx(addr)],
            _ => 0,
        }
    }

    /// Borrow the newest complete frame (tightly packed RGBA8, top-left
    /// origin), or `None` while the engine is disabled. Never blocks on
    /// the writer lock; single consumer thread.
    pub fn get_frame(&self) -> Option<&[u8]> {
        if !self.enabled.load(Ordering::Relaxed) {
            return None;
        }
        Some(self.frames.acquire().0)
    }

    pub fn get_dimensions(&self) -> (u32, u32) {
        let dims = self.dims.load(Ordering::Relaxed);
        ((dims >> 32) as u32, dims as u32)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Note a vertical retrace; the next STATUS read reports it.
    pub fn signal_vsync(&self) {
        self.vretrace.store(true, Ordering::Release);
    }

    pub fn triangle_batch_count(&self) -> usize {
        self.inner.lock().unwrap().batch.len()
    }

    /// Switch rasterizer backends at runtime, replaying dimensions,
    /// texture and pipeline state so the guest observes no difference. On
    /// failure the current backend stays active.
    pub fn set_backend(&self, kind: BackendKind) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if kind == inner.kind {
            return Ok(());
        }
        let backend = build_backend(kind, inner.width, inner.height)?;
        inner.backend.destroy();
        inner.backend = backend;
        inner.kind = kind;
        info!("Switched to {kind:?} backend.");
        if let Err(error) = self.replay_state(&mut inner) {
            self.degrade(&mut inner, error);
        }
        Ok(())
    }

    /// Tear down the active backend. Idempotent; also run on drop.
    pub fn destroy(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.destroyed {
            inner.backend.destroy();
            inner.destroyed = true;
        }
    }

    fn write_locked(&self, inner: &mut EngineInner, addr: u32, value: u32) {
        if (reg::TEX_MEM_BASE..reg::TEX_MEM_BASE + reg::TEX_MEM_SIZE).contains(&addr) {
            inner.texmem.write_word(addr - reg::TEX_MEM_BASE, value);
            return;
        }
        if addr < 0x400 {
            inner.regs[idx(addr)] = value;
        }

        match addr {
            reg::VERTEX_AX => inner.positions[0].x = from_fixed_12_4(value),
            reg::VERTEX_AY => inner.positions[0].y = from_fixed_12_4(value),
            reg::VERTEX_BX => inner.positions[1].x = from_fixed_12_4(value),
            reg::VERTEX_BY => inner.positions[1].y = from_fixed_12_4(value),
            reg::VERTEX_CX => inner.positions[2].x = from_fixed_12_4(value),
            reg::VERTEX_CY => inner.positions[2].y = from_fixed_12_4(value),

            reg::START_R => inner.attr_vertex().color.x = from_fixed_12_12(value),
            reg::START_G => inner.attr_vertex().color.y = from_fixed_12_12(value),
            reg::START_B => inner.attr_vertex().color.z = from_fixed_12_12(value),
            reg::START_A => inner.attr_vertex().color.w = from_fixed_12_12(value),
            reg::START_Z => inner.attr_vertex().z = from_fixed_20_12(value),
            reg::START_S => inner.attr_vertex().uv.x = from_fixed_14_18(value),
            reg::START_T => inner.attr_vertex().uv.y = from_fixed_14_18(value),
            reg::START_W => inner.attr_vertex().w = from_fixed_2_30(value),

            reg::TRIANGLE_CMD | reg::FTRIANGLE_CMD => inner.append_triangle(),

            reg::COLOR_SELECT => {
                inner.color_select = (value % 3) as usize;
                inner.gouraud = true;
            }

            reg::CLIP_LEFT_RIGHT => {
                inner.scissor.left = (value >> 16) & 0x3FF;
                inner.scissor.right = value & 0x3FF;
                let scissor = inner.scissor;
                inner.backend.set_scissor(scissor);
            }
            reg::CLIP_LOW_Y_HIGH => {
                inner.scissor.top = (value >> 16) & 0x3FF;
                inner.scissor.bottom = value & 0x3FF;
                let scissor = inner.scissor;
                inner.backend.set_scissor(scissor);
            }

            reg::FBZ_MODE
            | reg::ALPHA_MODE
            | reg::CHROMA_KEY
            | reg::FOG_MODE
            | reg::FOG_COLOR
            | reg::TEXTURE_MODE => inner.pipeline_dirty = true,
            reg::FBZ_COLOR_PATH => {
                inner.color_path_written = true;
                inner.pipeline_dirty = true;
            }

            reg::COLOR1 => inner.backend.set_constant_color(unpack_argb(value)),

            reg::FAST_FILL_CMD => self.fast_fill(inner),
            reg::SWAP_BUFFER_CMD => self.swap(inner),
            reg::VIDEO_DIM => self.resize(inner, value),
            reg::TEX_UPLOAD => self.upload_texture(inner),

            _ => {}
        }
    }

    /// `FAST_FILL_CMD`: clear color to `COLOR0` and depth to the value the
    /// active depth compare expects.
    fn fast_fill(&self, inner: &mut EngineInner) {
        let color = unpack_argb(inner.regs[idx(reg::COLOR0)]);
        let depth = FbzMode(inner.regs[idx(reg::FBZ_MODE)]).depth_clear_value();
        inner.clear_color = color;
        inner.clear_depth = depth;
        if let Err(error) = inner.backend.clear_framebuffer(color, depth) {
            self.degrade(inner, error);
            let _ = inner.backend.clear_framebuffer(color, depth);
        }
    }

    /// `SWAP_BUFFER_CMD`: reapply dirty pipeline state, flush the batch,
    /// publish the finished frame. The batch is emptied regardless of
    /// backend errors.
    fn swap(&self, inner: &mut EngineInner) {
        if inner.pipeline_dirty {
            if let Err(error) = self.apply_pipeline_state(inner) {
                self.degrade(inner, error);
            }
            inner.pipeline_dirty = false;
        }

        let mut batch = std::mem::take(&mut inner.batch);
        let result = inner
            .backend
            .flush_triangles(&batch)
            .and_then(|_| inner.backend.swap_buffers());
        if let Err(error) = result {
            self.degrade(inner, error);
            // Re-render the same batch on the fallback so the published
            // frame is still complete.
            let _ = inner
                .backend
                .flush_triangles(&batch)
                .and_then(|_| inner.backend.swap_buffers());
        }
        batch.clear();
        inner.batch = batch;

        self.frames
            .publish(inner.backend.frame(), inner.width, inner.height);
    }

    /// `VIDEO_DIM`: resize the render targets. Out-of-range dimensions
    /// are dropped; a failing resize keeps the previous dimensions.
    fn resize(&self, inner: &mut EngineInner, value: u32) {
        let width = value >> 16;
        let height = value & 0xFFFF;
        if width == 0 || height == 0 || width > MAX_WIDTH || height > MAX_HEIGHT {
            debug!("Dropping out-of-range video dimensions {width}x{height}.");
            return;
        }
        match inner.backend.resize(width, height) {
            Ok(()) => {
                inner.width = width;
                inner.height = height;
                self.dims
                    .store(((width as u64) << 32) | height as u64, Ordering::Relaxed);
                info!("Resized framebuffer to {width}x{height}.");
            }
            Err(error) => warn!("Resize to {width}x{height} failed ({error:#}); keeping {}x{}.",
                inner.width, inner.height),
        }
    }

    /// `TEX_UPLOAD`: commit the window contents as the active texture,
    /// honoring the current `textureMode` format. Unsupported formats
    /// upload as a single opaque white texel.
    fn upload_texture(&self, inner: &mut EngineInner) {
        let width = inner.regs[idx(reg::TEX_WIDTH)];
        let height = inner.regs[idx(reg::TEX_HEIGHT)];
        if width == 0
            || height == 0
            || width as u64 * height as u64 * 4 > reg::TEX_MEM_SIZE as u64
        {
            debug!("Dropping texture upload with geometry {width}x{height}.");
            return;
        }

        let mode = TextureMode(inner.regs[idx(reg::TEXTURE_MODE)]);
        let (width, height, pixels) = match mode.format() {
            TexFormat::Argb8888 => {
                let mut pixels = Vec::with_capacity((width * height * 4) as usize);
                for texel in inner.texmem.bytes()[..(width * height * 4) as usize].chunks_exact(4) {
                    let word = u32::from_le_bytes(texel.try_into().unwrap());
                    pixels.push((word >> 16) as u8);
                    pixels.push((word >> 8) as u8);
                    pixels.push(word as u8);
                    pixels.push((word >> 24) as u8);
                }
                (width, height, pixels)
            }
            TexFormat::Unsupported => {
                warn!("Unsupported texture format; sampling as white.");
                (1, 1, vec![0xFF; 4])
            }
        };

        if let Err(error) = inner.backend.set_texture_data(width, height, &pixels) {
            self.degrade(inner, error);
            let _ = inner.backend.set_texture_data(width, height, &pixels);
        }
        inner.last_upload = Some((width, height));
    }

    /// Push the full pipeline-adjacent state into the backend. Called on
    /// the first swap after any mode register changed.
    fn apply_pipeline_state(&self, inner: &mut EngineInner) -> Result<()> {
        let fbz_word = inner.regs[idx(reg::FBZ_MODE)];
        let alpha_word = inner.regs[idx(reg::ALPHA_MODE)];
        let state = PipelineState {
            key: PipelineKey::from_registers(fbz_word, alpha_word),
            fbz_mode: fbz_word,
            alpha_mode: alpha_word,
        };
        inner.backend.update_pipeline_state(&state)?;

        let fbz = FbzMode(fbz_word);
        let chroma_word = inner.regs[idx(reg::CHROMA_KEY)];
        inner.backend.set_chroma_key(ChromaKey {
            enabled: fbz.chroma_key(),
            rgb: [
                (chroma_word >> 16) as u8,
                (chroma_word >> 8) as u8,
                chroma_word as u8,
            ],
        });

        inner.backend.set_fog_state(FogState {
            enabled: inner.regs[idx(reg::FOG_MODE)] & 1 != 0,
            color: unpack_rgb(inner.regs[idx(reg::FOG_COLOR)]),
        });

        let path_word = inner
            .color_path_written
            .then(|| inner.regs[idx(reg::FBZ_COLOR_PATH)]);
        inner.backend.set_color_path(ColorCombine::resolve(path_word));

        let mode = TextureMode(inner.regs[idx(reg::TEXTURE_MODE)]);
        inner.backend.set_texture_enabled(mode.enabled());
        inner
            .backend
            .set_texture_wrap_mode(wrap_mode(mode.clamp_s()), wrap_mode(mode.clamp_t()))?;

        let scissor = inner.scissor;
        inner.backend.set_scissor(scissor);
        inner
            .backend
            .set_constant_color(unpack_argb(inner.regs[idx(reg::COLOR1)]));
        Ok(())
    }

    /// Rebuild the backend's state from the shadow after a degrade or a
    /// backend switch.
    fn replay_state(&self, inner: &mut EngineInner) -> Result<()> {
        inner.backend.resize(inner.width, inner.height)?;
        inner
            .backend
            .clear_framebuffer(inner.clear_color, inner.clear_depth)?;
        if let Some((width, height)) = inner.last_upload {
            let mut pixels = Vec::with_capacity((width * height * 4) as usize);
            for texel in inner.texmem.bytes()[..(width * height * 4) as usize].chunks_exact(4) {
                let word = u32::from_le_bytes(texel.try_into().unwrap());
                pixels.push((word >> 16) as u8);
                pixels.push((word >> 8) as u8);
                pixels.push(word as u8);
                pixels.push((word >> 24) as u8);
            }
            inner.backend.set_texture_data(width, height, &pixels)?;
        }
        self.apply_pipeline_state(inner)?;
        inner.pipeline_dirty = false;
        Ok(())
    }

    /// Swap in a fresh software rasterizer after a GPU failure. The
    /// replay cannot fail on the software backend.
    fn degrade(&self, inner: &mut EngineInner, error: anyhow::Error) {
        if inner.kind == BackendKind::Software {
            warn!("Software rasterizer reported an error: {error:#}");
            return;
        }
        warn!("GPU backend failed ({error:#}); degrading to the software rasterizer.");
        inner.backend.destroy();
        inner.backend = Box::new(SoftwareRasterizer::new(inner.width, inner.height));
        inner.kind = BackendKind::Software;
        if let Err(error) = self.replay_state(inner) {
            warn!("State replay on the software rasterizer failed: {error:#}");
        }
    }
}

impl EngineInner {
    /// The vertex the next attribute write lands in: the flat accumulator,
    /// or the selected per-vertex slot once Gouraud is latched.
    fn attr_vertex(&mut self) -> &mut Vertex {
        if self.gouraud {
            &mut self.slots[self.color_select]
        } else {
            &mut self.current
        }
    }

    /// `TRIANGLE_CMD`: snapshot the current positions and attributes into
    /// the batch. At capacity the write is dropped (back-pressure).
    fn append_triangle(&mut self) {
        if self.batch.len() >= MAX_BATCH {
            debug!("Triangle batch full; dropping TRIANGLE_CMD.");
            return;
        }
        let mut triangle = Triangle::default();
        for (i, vertex) in triangle.vertices.iter_mut().enumerate() {
            *vertex = if self.gouraud { self.slots[i] } else { self.current };
            vertex.pos = self.positions[i];
        }
        self.batch.push(triangle);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.destroy();
    }
}
