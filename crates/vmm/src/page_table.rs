//! Linear page tables.
//!
//! Each address space owns one flat array of translation entries, indexed by
//! virtual page number. There is no hierarchy: the teaching machine's address
//! spaces are small enough that a linear table per process is the whole story.

use crate::{FrameNumber, PageNumber};

/// A single virtual-to-physical translation.
///
/// Invariants:
/// - `valid` implies `physical_page.is_some()`.
/// - `in_swap` implies `!valid`; the page's content then lives at offset
///   `virtual_page * page_size` in the owning process's swap file.
#[derive(Debug, Clone, Copy)]
pub struct TranslationEntry {
    /// The virtual page this entry translates.
    pub virtual_page: PageNumber,
    /// The physical frame holding the page, when resident.
    pub physical_page: Option<FrameNumber>,
    /// Whether the translation is usable.
    pub valid: bool,
    /// Set when the page has been referenced since the bit was last cleared.
    pub used: bool,
    /// Set when the page has been written since it was loaded.
    pub dirty: bool,
    /// Whether writes to the page should fault.
    pub read_only: bool,
    /// Whether the page's content currently lives in the swap file.
    pub in_swap: bool,
    /// The hardware TLB slot caching this translation, if any.
    pub tlb_slot: Option<usize>,
}

impl TranslationEntry {
    /// Creates an invalid entry for the given virtual page.
    pub fn invalid(virtual_page: PageNumber) -> Self {
        Self {
            virtual_page,
            physical_page: None,
            valid: false,
            used: false,
            dirty: false,
            read_only: false,
            in_swap: false,
            tlb_slot: None,
        }
    }

    /// Folds dirty/use bits cached in a TLB slot back into this entry.
    ///
    /// The page table is the single source of truth once a slot is
    /// invalidated, so the bits are merged (or-ed), never overwritten.
    pub fn absorb_tlb_bits(&mut self, dirty: bool, used: bool) {
        self.dirty |= dirty;
        self.used |= used;
        self.tlb_slot = None;
    }
}

/// A linear page table: one entry per virtual page of an address space.
pub struct PageTable {
    entries: Box<[TranslationEntry]>,
}

impl PageTable {
    /// Creates a table of `num_pages` invalid entries, each with
    /// `virtual_page` set to its own index.
    pub fn new(num_pages: usize) -> Self {
        let entries = (0..num_pages)
            .map(|i| TranslationEntry::invalid(PageNumber::new(i)))
            .collect();
        Self { entries }
    }

    /// Returns the number of entries.
    pub fn num_pages(&self) -> usize {
        self.entries.len()
    }

    /// Returns the entry for the given page.
    ///
    /// # Panics
    ///
    /// Panics if the page is outside the address space.
    pub fn entry(&self, page: PageNumber) -> &TranslationEntry {
        self.entries
            .get(page.as_usize())
            .unwrap_or_else(|| panic!("page {page} outside address space"))
    }

    /// Returns a mutable reference to the entry for the given page.
    ///
    /// # Panics
    ///
    /// Panics if the page is outside the address space.
    pub fn entry_mut(&mut self, page: PageNumber) -> &mut TranslationEntry {
        self.entries
            .get_mut(page.as_usize())
            .unwrap_or_else(|| panic!("page {page} outside address space"))
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.entries.iter()
    }
}
