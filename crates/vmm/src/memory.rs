//! Simulated physical memory.
//!
//! Main memory is modeled as an array of page-sized frames, each behind its
//! own lock. Page-in and page-out copies to *different* frames therefore run
//! in parallel; only the core map serializes frame-table metadata. Exclusive
//! use of a single frame during a transfer is guaranteed by the core map's
//! busy flag, not by holding the frame lock across the whole transaction.

use spin::Mutex;

use crate::FrameNumber;

/// The machine's physical memory, divided into page-sized frames.
pub struct MainMemory {
    frames: Box<[Mutex<Box<[u8]>>]>,
    page_size: usize,
}

impl MainMemory {
    /// Creates zeroed main memory with `num_frames` frames of `page_size` bytes.
    pub fn new(num_frames: usize, page_size: usize) -> Self {
        let frames = (0..num_frames)
            .map(|_| Mutex::new(vec![0u8; page_size].into_boxed_slice()))
            .collect();
        Self { frames, page_size }
    }

    /// Returns the number of frames.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the frame (and page) size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fills a frame with zeroes.
    pub fn zero_frame(&self, frame: FrameNumber) {
        let mut data = self.lock_frame(frame);
        data.fill(0);
    }

    /// Copies `bytes` into a frame starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the copy would run past the end of the frame.
    pub fn write_frame(&self, frame: FrameNumber, offset: usize, bytes: &[u8]) {
        let mut data = self.lock_frame(frame);
        assert!(
            offset + bytes.len() <= data.len(),
            "write past end of frame {frame}"
        );
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Returns a copy of the frame's contents.
    pub fn read_frame(&self, frame: FrameNumber) -> Vec<u8> {
        self.lock_frame(frame).to_vec()
    }

    /// Reads `buf.len()` bytes from a frame starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the read would run past the end of the frame.
    pub fn read_frame_at(&self, frame: FrameNumber, offset: usize, buf: &mut [u8]) {
        let data = self.lock_frame(frame);
        assert!(
            offset + buf.len() <= data.len(),
            "read past end of frame {frame}"
        );
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
    }

    fn lock_frame(&self, frame: FrameNumber) -> spin::MutexGuard<'_, Box<[u8]>> {
        self.frames
            .get(frame.as_usize())
            .unwrap_or_else(|| panic!("frame {frame} out of range"))
            .lock()
    }
}
