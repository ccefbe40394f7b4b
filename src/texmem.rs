//! Guest-visible linear texture memory.
//!
//! A 64 KiB window the guest fills with texel data before triggering an
//! upload. Word writes are split little-endian into byte stores; anything
//! falling past the end of the window is silently dropped, matching the
//! register interface's "always accepted, effect best-effort" contract.

use crate::regs::reg::TEX_MEM_SIZE;

pub struct TextureWindow {
    bytes: Box<[u8]>,
}

impl TextureWindow {
    pub fn new() -> Self {
        Self {
            bytes: vec![0u8; TEX_MEM_SIZE as usize].into_boxed_slice(),
        }
    }

    /// Store a 32-bit word at a byte offset, little-endian. Bytes beyond
    /// the window's end are dropped individually, so a write straddling
    /// the boundary keeps its in-range prefix.
    pub fn write_word(&mut self, offset: u32, value: u32) {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            if let Some(slot) = self.bytes.get_mut(offset as usize + i) {
                *slot = byte;
            }
        }
    }

    /// Read back a 32-bit word; out-of-range bytes read as zero.
    pub fn read_word(&self, offset: u32) -> u32 {
        let mut out = [0u8; 4];
        for (i, byte) in out.iter_mut().enumerate() {
            if let Some(&slot) = self.bytes.get(offset as usize + i) {
                *byte = slot;
            }
        }
        u32::from_le_bytes(out)
    }

    /// The raw window contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bulk copy into the window (the DMA-style upload path). The source
    /// is truncated to what fits.
    pub fn fill_from(&mut self, src: &[u8]) {
        let len = src.len().min(self.bytes.len());
        self.bytes[..len].copy_from_slice(&src[..len]);
    }
}

impl Default for TextureWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_roundtrip_is_little_endian() {
        let mut window = TextureWindow::new();
        window.write_word(0x10, 0xAABBCCDD);
        assert_eq!(window.bytes()[0x10..0x14], [0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(window.read_word(0x10), 0xAABBCCDD);
    }

    #[test]
    fn writes_past_the_end_are_dropped() {
        let mut window = TextureWindow::new();
        window.write_word(TEX_MEM_SIZE, 0xFFFFFFFF);
        assert!(window.bytes().iter().all(|&b| b == 0));

        // A straddling write keeps its in-range bytes.
        window.write_word(TEX_MEM_SIZE - 2, 0x44332211);
        assert_eq!(
            window.bytes()[(TEX_MEM_SIZE - 2) as usize..],
            [0x11, 0x22]
        );
    }
}
