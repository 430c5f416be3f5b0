//! Free-frame bitmap.
//!
//! A word-packed bitmap tracking which physical frames are in use. This is the
//! leaf allocation structure underneath the core map: it answers "which frames
//! are free" and nothing else. Ownership metadata lives in the frame
//! descriptors.

const BITS_PER_WORD: usize = usize::BITS as usize;

/// A fixed-size bitmap over frame indices.
///
/// Bit set means the frame is allocated; bit clear means it is free.
pub struct Bitmap {
    words: Box<[usize]>,
    len: usize,
}

impl Bitmap {
    /// Creates a bitmap with `len` bits, all clear.
    pub fn new(len: usize) -> Self {
        let word_count = len.div_ceil(BITS_PER_WORD);
        Self {
            words: vec![0; word_count].into_boxed_slice(),
            len,
        }
    }

    /// Returns the number of bits in the bitmap.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the given bit is set.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn test(&self, index: usize) -> bool {
        assert!(index < self.len, "bitmap index out of range");
        self.words[index / BITS_PER_WORD] & (1 << (index % BITS_PER_WORD)) != 0
    }

    /// Sets the given bit.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn mark(&mut self, index: usize) {
        assert!(index < self.len, "bitmap index out of range");
        self.words[index / BITS_PER_WORD] |= 1 << (index % BITS_PER_WORD);
    }

    /// Clears the given bit. Clearing an already-clear bit is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn clear(&mut self, index: usize) {
        assert!(index < self.len, "bitmap index out of range");
        self.words[index / BITS_PER_WORD] &= !(1 << (index % BITS_PER_WORD));
    }

    /// Finds the first clear bit, sets it, and returns its index.
    ///
    /// Returns `None` if every bit is set.
    pub fn find(&mut self) -> Option<usize> {
        let index = self.find_where(|_| true)?;
        self.mark(index);
        Some(index)
    }

    /// Returns the index of the first clear bit accepted by `pred`, without
    /// setting it.
    pub fn find_where(&self, mut pred: impl FnMut(usize) -> bool) -> Option<usize> {
        (0..self.len).find(|&i| !self.test(i) && pred(i))
    }

    /// Returns the number of clear bits.
    pub fn count_clear(&self) -> usize {
        let set: usize = self.words.iter().map(|w| w.count_ones() as usize).sum();
        self.len - set
    }
}
