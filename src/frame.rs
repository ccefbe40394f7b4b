//! Lock-free triple-buffered frame handoff.
//!
//! Three equally sized color buffers rotate among three roles: the
//! producer's private write slot, the shared slot, and the consumer's
//! private read slot. Publishing swaps the producer's index with the
//! shared index; acquiring swaps the shared index with the consumer's.
//! Both are single atomic exchanges, so neither side ever blocks the
//! other, frames may be dropped or repeated, but a torn frame can never
//! be observed: the shared slot always holds a frame that was completely
//! written before it was published.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::backend::{MAX_HEIGHT, MAX_WIDTH};

struct Slot {
    pixels: Box<[u8]>,
    width: u32,
    height: u32,
}

impl Slot {
    fn new(width: u32, height: u32) -> Self {
        // Allocated at the device maximum so a resize never has to touch
        // a slot the consumer might be reading.
        Self {
            pixels: vec![0u8; (MAX_WIDTH * MAX_HEIGHT * 4) as usize].into_boxed_slice(),
            width,
            height,
        }
    }
}

/// The three-slot handoff. Exactly one producer thread may call
/// [`publish`](Self::publish) and exactly one consumer thread may call
/// [`acquire`](Self::acquire); the slot indices partition the buffers
/// between them at every point in time.
pub struct TripleBuffer {
    slots: [UnsafeCell<Slot>; 3],
    /// Index of the producer's private slot. Only the producer touches it.
    write: AtomicUsize,
    /// Index of the published slot, exchanged by both sides.
    shared: AtomicUsize,
    /// Index of the consumer's private slot. Only the consumer touches it.
    read: AtomicUsize,
}

// The UnsafeCells are only ever dereferenced through the owning index:
// the producer writes slots[write], the consumer reads slots[read], and
// the shared slot is untouched between the swaps that hand it over. The
// atomic exchanges provide the acquire/release edges for the pixel data.
unsafe impl Send for TripleBuffer {}
unsafe impl Sync for TripleBuffer {}

impl TripleBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            slots: [
                UnsafeCell::new(Slot::new(width, height)),
                UnsafeCell::new(Slot::new(width, height)),
                UnsafeCell::new(Slot::new(width, height)),
            ],
            write: AtomicUsize::new(0),
            shared: AtomicUsize::new(1),
            read: AtomicUsize::new(2),
        }
    }

    /// Copy a finished frame into the write slot and swap it into the
    /// shared position. Producer side only.
    pub fn publish(&self, frame: &[u8], width: u32, height: u32) {
        let index = self.write.load(Ordering::Relaxed);
        {
            // Sole owner of the write slot until the swap below.
            let slot = unsafe { &mut *self.slots[index].get() };
            let len = frame.len().min(slot.pixels.len());
            slot.pixels[..len].copy_from_slice(&frame[..len]);
            slot.width = width;
            slot.height = height;
        }
        let previous = self.shared.swap(index, Ordering::AcqRel);
        self.write.store(previous, Ordering::Relaxed);
    }

    /// Take the newest published frame. Returns the pixel data trimmed to
    /// the dimensions it was rendered at. Consumer side only; the borrow
    /// stays valid until the next call (the producer can never reclaim the
    /// consumer's slot).
    pub fn acquire(&self) -> (&[u8], u32, u32) {
        let current = self.read.load(Ordering::Relaxed);
        let index = self.shared.swap(current, Ordering::AcqRel);
        self.read.store(index, Ordering::Relaxed);

        let slot = unsafe { &*self.slots[index].get() };
        let len = (slot.width * slot.height * 4) as usize;
        (&slot.pixels[..len], slot.width, slot.height)
    }

    /// The current (write, shared, read) indices, for invariant checks.
    pub fn indices(&self) -> (usize, usize, usize) {
        (
            self.write.load(Ordering::Relaxed),
            self.shared.load(Ordering::Relaxed),
            self.read.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn assert_distinct(buffer: &TripleBuffer) {
        let (w, s, r) = buffer.indices();
        assert!(w != s && s != r && w != r, "indices collided: {w} {s} {r}");
    }

    #[test]
    fn publish_then_acquire_sees_the_frame() {
        let buffer = TripleBuffer::new(2, 1);
        buffer.publish(&[1, 2, 3, 4, 5, 6, 7, 8], 2, 1);
        let (frame, w, h) = buffer.acquire();
        assert_eq!((w, h), (2, 1));
        assert_eq!(frame, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_distinct(&buffer);
    }

    #[test]
    fn repeated_acquire_keeps_a_complete_frame() {
        let buffer = TripleBuffer::new(1, 1);
        buffer.publish(&[9, 9, 9, 9], 1, 1);
        let (first, _, _) = buffer.acquire();
        assert_eq!(first, &[9, 9, 9, 9]);
        // No new publish: the consumer may get the same or the stale
        // frame back, but never a torn one.
        let (second, _, _) = buffer.acquire();
        assert_eq!(second.len(), 4);
        assert_distinct(&buffer);
    }

    #[test]
    fn indices_stay_distinct_under_contention() {
        let buffer = Arc::new(TripleBuffer::new(4, 4));
        let producer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                let frame = vec![0xAB; 64];
                for _ in 0..10_000 {
                    buffer.publish(&frame, 4, 4);
                }
            })
        };
        for _ in 0..10_000 {
            let (frame, w, h) = buffer.acquire();
            assert_eq!((w, h), (4, 4));
            // Every byte comes from a single completed publish; the
            // frames are uniform so any mix would show up here.
            assert!(frame.iter().all(|&b| b == 0xAB || b == 0));
        }
        producer.join().unwrap();
        assert_distinct(&buffer);
    }
}
