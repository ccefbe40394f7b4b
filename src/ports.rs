//! 8-bit I/O port surface.
//!
//! Narrow guest CPUs that cannot issue 32-bit memory-mapped writes drive
//! the engine through a small address/data shim: two bytes of register
//! offset and four bytes of little-endian data are staged, and the write
//! of the final data byte commits a full 32-bit register write. An
//! auxiliary port pair stages a source address in guest RAM for the
//! DMA-style texture upload. The shim holds no register state of its own;
//! everything lands in the engine's shadow, so the two surfaces are
//! interchangeable.

use crate::engine::Engine;
use crate::regs::reg;

pub const PORT_ADDR_LO: u8 = 0;
pub const PORT_ADDR_HI: u8 = 1;
pub const PORT_DATA0: u8 = 2;
pub const PORT_DATA1: u8 = 3;
pub const PORT_DATA2: u8 = 4;
/// Writing this port commits the staged 32-bit register write.
pub const PORT_DATA3: u8 = 5;
/// Writing this port copies the staged DMA window from guest RAM into
/// texture memory and triggers `TEX_UPLOAD`.
pub const PORT_DMA_TRIGGER: u8 = 6;
pub const PORT_DMA_SRC_LO: u8 = 7;
pub const PORT_DMA_SRC_HI: u8 = 8;

/// Per-guest staging state for the port surface.
#[derive(Debug, Default)]
pub struct PortShim {
    addr: [u8; 2],
    data: [u8; 4],
    dma_src: [u8; 2],
}

impl PortShim {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle an 8-bit port write. Unknown ports are ignored, like any
    /// other out-of-range access.
    pub fn write(&mut self, engine: &Engine, port: u8, value: u8) {
        match port {
            PORT_ADDR_LO => self.addr[0] = value,
            PORT_ADDR_HI => self.addr[1] = value,
            PORT_DATA0 => self.data[0] = value,
            PORT_DATA1 => self.data[1] = value,
            PORT_DATA2 => self.data[2] = value,
            PORT_DATA3 => {
                self.data[3] = value;
                engine.handle_write(
                    u16::from_le_bytes(self.addr) as u32,
                    u32::from_le_bytes(self.data),
                );
            }
            PORT_DMA_SRC_LO => self.dma_src[0] = value,
            PORT_DMA_SRC_HI => self.dma_src[1] = value,
            _ => {}
        }
    }

    /// Handle the DMA trigger port: copy `TEX_WIDTH * TEX_HEIGHT * 4`
    /// bytes from `guest_ram` at the staged source address into the
    /// texture window, then commit the upload. The bus glue that owns
    /// guest RAM passes it in; a window running past the end of RAM is
    /// truncated.
    pub fn trigger_dma(&self, engine: &Engine, guest_ram: &[u8]) {
        let width = engine.handle_read(reg::TEX_WIDTH) as u64;
        let height = engine.handle_read(reg::TEX_HEIGHT) as u64;
        let length = (width * height * 4).min(reg::TEX_MEM_SIZE as u64) as usize;
        let source = u16::from_le_bytes(self.dma_src) as usize;

        let end = (source + length).min(guest_ram.len());
        let bytes = guest_ram.get(source..end).unwrap_or(&[]);
        for (offset, chunk) in bytes.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            engine.handle_write(
                reg::TEX_MEM_BASE + (offset * 4) as u32,
                u32::from_le_bytes(word),
            );
        }
        engine.handle_write(reg::TEX_UPLOAD, 1);
    }

    /// Route a port write, servicing the DMA trigger inline.
    pub fn write_with_memory(&mut self, engine: &Engine, port: u8, value: u8, guest_ram: &[u8]) {
        if port == PORT_DMA_TRIGGER {
            self.trigger_dma(engine, guest_ram);
        } else {
            self.write(engine, port, value);
        }
    }
}
