//! Cycle-inspired emulation of a late-90s 3D accelerator, exposed to a
//! host VM as a memory-mapped register bank.
//!
//! The [`Engine`] accepts a stream of register writes from the guest CPU,
//! assembles triangles in the device's fixed-point vertex formats, and
//! rasterizes them into a double-buffered framebuffer. Two backends share
//! one contract: a software barycentric rasterizer (the behavioral
//! reference) and an offscreen Vulkan mirror with a pipeline-variant
//! cache. Finished frames reach the compositor through a lock-free
//! triple buffer, so the guest and the compositor never block each other.

pub mod backend;
pub mod engine;
pub mod fixed;
pub mod frame;
pub mod gpu;
pub mod ports;
pub mod regs;
pub mod soft;
pub mod texmem;
pub mod vertex;

pub use backend::Rasterizer;
pub use engine::{BackendKind, Engine, DEFAULT_HEIGHT, DEFAULT_WIDTH};
pub use ports::PortShim;
pub use regs::{reg, PipelineKey};
