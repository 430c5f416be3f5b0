//! TLB synchronization.
//!
//! The machine's TLB is a small, fixed-size cache over the running process's
//! page table, with no address-space tag: it can only ever describe one
//! process at a time, so every context switch invalidates it completely.
//! Each slot accumulates dirty/use bits as the CPU touches memory; those bits
//! belong to the owning page table and are merged back whenever a slot is
//! invalidated, so the page table is the single source of truth once a
//! translation leaves the cache.
//!
//! Lock order: the TLB lock is taken before the core-map lock and before any
//! page-table lock, never the other way around.

use std::sync::{Arc, Weak};

use crate::{AddressSpace, FrameNumber, Machine, PageNumber, page_table::TranslationEntry};

/// One TLB slot: either empty or caching a single frame's translation.
struct TlbSlot {
    valid: bool,
    page: PageNumber,
    frame: FrameNumber,
    space: Weak<AddressSpace>,
    dirty: bool,
    used: bool,
    read_only: bool,
}

impl TlbSlot {
    fn empty() -> Self {
        Self {
            valid: false,
            page: PageNumber::new(0),
            frame: FrameNumber::new(0),
            space: Weak::new(),
            dirty: false,
            used: false,
            read_only: false,
        }
    }
}

/// The translation cache.
pub struct Tlb {
    slots: Box<[TlbSlot]>,
    cursor: usize,
}

impl Tlb {
    /// Creates a TLB with `size` empty slots.
    pub fn new(size: usize) -> Self {
        Self {
            slots: (0..size).map(|_| TlbSlot::empty()).collect(),
            cursor: 0,
        }
    }

    /// Returns the number of slots.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Installs a translation into the next slot in round-robin order,
    /// returning the slot index.
    ///
    /// If the slot is occupied, the occupant's dirty/use bits are first
    /// committed to its owning page table and the core map's residency record
    /// for the old frame is cleared.
    ///
    /// # Panics
    ///
    /// Panics if the entry is not a valid, resident translation.
    pub fn set_page(
        &mut self,
        machine: &Machine,
        space: &Arc<AddressSpace>,
        entry: TranslationEntry,
    ) -> usize {
        assert!(entry.valid, "cannot cache an invalid translation");
        let frame = entry
            .physical_page
            .expect("valid translation without a frame");

        let slot = self.cursor;
        self.cursor = (self.cursor + 1) % self.slots.len();
        self.save_slot(machine, slot);

        self.slots[slot] = TlbSlot {
            valid: true,
            page: entry.virtual_page,
            frame,
            space: Arc::downgrade(space),
            dirty: false,
            used: false,
            read_only: entry.read_only,
        };
        machine.core_map().set_tlb(frame, slot);
        space.update_entry(entry.virtual_page, |e| e.tlb_slot = Some(slot));
        log::trace!("tlb: slot {slot} <- page {} frame {frame}", entry.virtual_page);
        slot
    }

    /// Invalidates one slot, committing its dirty/use bits to the owning page
    /// table. Invalidating an empty slot is a no-op.
    ///
    /// If the owning address space is already gone the bits have nowhere to
    /// go; the slot and the core map's residency record are still cleared.
    pub fn save_slot(&mut self, machine: &Machine, slot: usize) {
        let occupant = &mut self.slots[slot];
        if !occupant.valid {
            return;
        }
        occupant.valid = false;
        let (page, frame, dirty, used) =
            (occupant.page, occupant.frame, occupant.dirty, occupant.used);
        let space = occupant.space.upgrade();

        machine.core_map().clear_tlb(frame);
        if let Some(space) = space {
            space.update_entry(page, |e| e.absorb_tlb_bits(dirty, used));
        }
        log::trace!("tlb: slot {slot} invalidated (page {page}, dirty {dirty})");
    }

    /// Invalidates every slot, committing all cached dirty/use bits.
    ///
    /// Called on every context switch: without an address-space tag, stale
    /// translations from the outgoing process must never survive into the
    /// incoming one.
    pub fn invalidate_all(&mut self, machine: &Machine) {
        for slot in 0..self.slots.len() {
            self.save_slot(machine, slot);
        }
    }

    /// Simulates a CPU access through the TLB.
    ///
    /// On a hit, marks the slot used (and dirty for a write) and returns
    /// true. On a miss returns false; the caller is expected to raise a page
    /// fault.
    ///
    /// # Panics
    ///
    /// Panics on a write hit to a read-only page; the machine has no
    /// recovery path for read-only faults.
    pub fn touch(&mut self, space: &Arc<AddressSpace>, vaddr: usize, write: bool) -> bool {
        let page = PageNumber::containing(vaddr, space.page_size());
        let space = Arc::downgrade(space);
        let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.valid && s.page == page && Weak::ptr_eq(&s.space, &space))
        else {
            return false;
        };
        assert!(
            !(write && slot.read_only),
            "write to read-only page {page}"
        );
        slot.used = true;
        slot.dirty |= write;
        true
    }

    /// Returns the slot caching the given frame, if any.
    pub fn slot_for_frame(&self, frame: FrameNumber) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.valid && s.frame == frame)
    }
}
