//! Per-process address spaces.
//!
//! An address space is built from an executable image and owns one linear
//! page table plus a swap store. Pages come in three flavors determined by
//! the executable's header: code (read-only once a page lies entirely inside
//! the code segment), initialized data, and zero-filled pages for
//! uninitialized data and the stack.
//!
//! With demand loading enabled the constructor touches no physical memory at
//! all: every entry starts invalid and pages are materialized one fault at a
//! time, evicting a victim frame when memory is full. Without it, the whole
//! image is loaded eagerly at construction and stays resident for the life of
//! the process.

use std::fmt;
use std::sync::Arc;

use spin::Mutex;

use crate::{
    FrameNumber, Machine, PageNumber, ProcessId,
    executable::{Executable, Segment},
    fs::OpenFile,
    page_table::{PageTable, TranslationEntry},
    swap::SwapStore,
};

/// Why an address space could not be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The file is too short or its magic number does not match.
    NotExecutable,
    /// Eager loading needs more free frames than the machine has.
    InsufficientMemory,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotExecutable => write!(f, "file is not a valid executable"),
            Self::InsufficientMemory => write!(f, "not enough free frames to load the program"),
        }
    }
}

impl std::error::Error for LoadError {}

/// A process's virtual address space.
pub struct AddressSpace {
    machine: Arc<Machine>,
    pid: ProcessId,
    num_pages: usize,
    code: Segment,
    init_data: Segment,
    /// Kept open for the life of the space under demand loading; dropped
    /// after the eager load otherwise.
    executable: Mutex<Option<Executable>>,
    table: Mutex<PageTable>,
    swap: SwapStore,
}

impl AddressSpace {
    /// Creates an address space for the program in `file`.
    ///
    /// The space covers the executable's three segments plus the configured
    /// user stack, rounded up to whole pages. With demand loading disabled
    /// the whole image is loaded into physical memory before returning.
    pub fn new(machine: Arc<Machine>, file: Arc<dyn OpenFile>) -> Result<Arc<Self>, LoadError> {
        let exe = Executable::new(file).ok_or(LoadError::NotExecutable)?;
        let config = machine.config().clone();

        let size = exe.size() + config.user_stack_size;
        let num_pages = size.div_ceil(config.page_size);
        if !config.demand_loading && num_pages > machine.core_map().count_clear() {
            return Err(LoadError::InsufficientMemory);
        }

        let pid = machine.allocate_pid();
        log::info!(
            "space {pid}: {num_pages} pages ({} code, {} data, {} bss, {} stack bytes)",
            exe.code().size,
            exe.init_data().size,
            exe.uninit_data().size,
            config.user_stack_size
        );

        let space = Arc::new(Self {
            pid,
            num_pages,
            code: exe.code(),
            init_data: exe.init_data(),
            swap: SwapStore::new(machine.filesystem(), pid, num_pages * config.page_size),
            executable: Mutex::new(Some(exe)),
            table: Mutex::new(PageTable::new(num_pages)),
            machine,
        });

        if !config.demand_loading {
            space.load_all()?;
            // The image is fully resident; the file is no longer needed.
            *space.executable.lock() = None;
        }
        Ok(space)
    }

    /// The owning process's identifier.
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// The number of virtual pages in this space.
    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// The page size in bytes.
    pub fn page_size(&self) -> usize {
        self.machine.page_size()
    }

    /// This space's swap store.
    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    /// Snapshots the translation entry for a page.
    ///
    /// # Panics
    ///
    /// Panics if the page is outside the address space.
    pub fn translation(&self, page: PageNumber) -> TranslationEntry {
        *self.table.lock().entry(page)
    }

    /// Commits TLB state ahead of a switch away from this process.
    pub fn save_state(&self) {
        self.machine.tlb().lock().invalidate_all(&self.machine);
    }

    /// Prepares the machine to run this process after a switch.
    ///
    /// The TLB carries no address-space tag, so anything left by the previous
    /// process is flushed rather than reinterpreted.
    pub fn restore_state(&self) {
        self.machine.tlb().lock().invalidate_all(&self.machine);
    }

    /// Applies an edit to one page-table entry under the table lock.
    pub(crate) fn update_entry(&self, page: PageNumber, f: impl FnOnce(&mut TranslationEntry)) {
        f(self.table.lock().entry_mut(page));
    }

    /// Loads a page from the executable (or zero-fills it), returning the new
    /// resident translation.
    ///
    /// # Panics
    ///
    /// Panics if the page is outside the address space.
    pub(crate) fn load_page(self: &Arc<Self>, page: PageNumber) -> TranslationEntry {
        assert!(
            page.as_usize() < self.num_pages,
            "page {page} outside address space"
        );
        let frame = self.allocate_frame(page);
        let page_size = self.page_size();

        let mut buf = vec![0u8; page_size];
        {
            let guard = self.executable.lock();
            let exe = guard
                .as_ref()
                .expect("demand loading requires the executable to stay open");
            fill_from_segment(&mut buf, page.start(page_size), exe.code(), |b, pos| {
                exe.read_code_block(b, pos)
            });
            fill_from_segment(&mut buf, page.start(page_size), exe.init_data(), |b, pos| {
                exe.read_data_block(b, pos)
            });
        }
        self.machine.memory().write_frame(frame, 0, &buf);

        let entry = self.install_translation(page, frame, false);
        self.machine.core_map().unlock(frame);
        log::debug!("space {}: loaded page {page} into frame {frame}", self.pid);
        entry
    }

    /// Reloads a swapped-out page, returning the new resident translation.
    ///
    /// The entry comes back dirty: the swap copy, not the executable, is now
    /// the page's authority, so a later eviction must write it out again even
    /// if the CPU never touches it.
    pub(crate) fn load_page_from_swap(self: &Arc<Self>, page: PageNumber) -> TranslationEntry {
        let frame = self.allocate_frame(page);

        let mut buf = vec![0u8; self.page_size()];
        self.swap.read_page(page, &mut buf);
        self.machine.memory().write_frame(frame, 0, &buf);

        let entry = self.install_translation(page, frame, true);
        self.machine.core_map().unlock(frame);
        log::debug!("space {}: swapped page {page} in to frame {frame}", self.pid);
        entry
    }

    /// Acquires a frame for `page`, evicting a victim if memory is full.
    ///
    /// The returned frame is busy; the caller unlocks it after the page's
    /// content is in place.
    fn allocate_frame(self: &Arc<Self>, page: PageNumber) -> FrameNumber {
        let core_map = self.machine.core_map();
        if let Some(frame) = core_map.add(Arc::downgrade(self), page, self.pid) {
            return frame;
        }
        let victim = evict_one(&self.machine);
        core_map.add_victim(Arc::downgrade(self), page, self.pid, victim);
        victim
    }

    /// Pushes one resident page out of the given frame.
    ///
    /// The frame must already be marked busy by `pick_victim`. Any TLB slot
    /// caching the translation is committed first, so the entry's dirty bit
    /// is complete when sampled. Dirty content goes to the swap file; clean
    /// pages are dropped and will reload from the executable.
    fn evict_page(&self, frame: FrameNumber, page: PageNumber) {
        {
            let mut tlb = self.machine.tlb().lock();
            if let Some(slot) = tlb.slot_for_frame(frame) {
                tlb.save_slot(&self.machine, slot);
            }
        }

        // Holding the table lock across the write-back keeps a concurrent
        // fault on this page from reading the swap slot before it is filled.
        let mut table = self.table.lock();
        let entry = table.entry_mut(page);
        let dirty = entry.dirty;
        entry.valid = false;
        entry.physical_page = None;
        entry.dirty = false;
        entry.used = false;
        entry.tlb_slot = None;
        entry.in_swap = dirty;

        if dirty {
            assert!(
                self.machine.config().swap,
                "dirty page {page} evicted with swap disabled: content has no backing store"
            );
            let bytes = self.machine.memory().read_frame(frame);
            self.swap.write_page(page, &bytes);
            log::debug!("space {}: page {page} swapped out of frame {frame}", self.pid);
        } else {
            log::debug!("space {}: page {page} dropped from frame {frame}", self.pid);
        }
        drop(table);

        // A fault in flight during the first sweep can have reinstalled the
        // translation while the entry was still valid. The entry is invalid
        // now, so sweep once more: no slot may map a frame being recycled.
        {
            let mut tlb = self.machine.tlb().lock();
            if let Some(slot) = tlb.slot_for_frame(frame) {
                tlb.save_slot(&self.machine, slot);
            }
        }

        self.machine.core_map().clear(frame);
    }

    /// Loads the entire image into physical memory at construction time.
    fn load_all(self: &Arc<Self>) -> Result<(), LoadError> {
        for index in 0..self.num_pages {
            let page = PageNumber::new(index);
            let frame = self
                .machine
                .core_map()
                .add(Arc::downgrade(self), page, self.pid)
                .ok_or(LoadError::InsufficientMemory)?;
            self.machine.memory().zero_frame(frame);
            self.install_translation(page, frame, false);
            self.machine.core_map().unlock(frame);
        }

        let guard = self.executable.lock();
        let exe = guard.as_ref().expect("executable is open during load");
        self.load_segment(exe.code(), |b, pos| exe.read_code_block(b, pos));
        self.load_segment(exe.init_data(), |b, pos| exe.read_data_block(b, pos));
        Ok(())
    }

    /// Copies one segment into already-resident pages, a chunk at a time.
    ///
    /// Segments need not be page-aligned, so each chunk stops at whichever
    /// comes first: the end of the segment or the end of the current page.
    fn load_segment(&self, segment: Segment, read: impl Fn(&mut [u8], usize) -> usize) {
        let page_size = self.page_size();
        let mut buf = vec![0u8; page_size];
        let mut copied = 0;
        while copied < segment.size {
            let vaddr = segment.virtual_addr + copied;
            let page = PageNumber::containing(vaddr, page_size);
            let offset = vaddr % page_size;
            let chunk = (segment.size - copied).min(page_size - offset);

            let got = read(&mut buf[..chunk], copied);
            assert_eq!(got, chunk, "executable truncated at segment byte {copied}");

            let frame = self
                .table
                .lock()
                .entry(page)
                .physical_page
                .expect("eagerly loaded page is resident");
            self.machine.memory().write_frame(frame, offset, &buf[..chunk]);
            copied += chunk;
        }
    }

    fn install_translation(
        &self,
        page: PageNumber,
        frame: FrameNumber,
        from_swap: bool,
    ) -> TranslationEntry {
        let mut table = self.table.lock();
        let entry = table.entry_mut(page);
        entry.valid = true;
        entry.physical_page = Some(frame);
        entry.read_only = self.page_is_read_only(page);
        entry.dirty = from_swap;
        entry.used = false;
        entry.in_swap = false;
        entry.tlb_slot = None;
        *entry
    }

    /// A page is read-only when it lies entirely inside the code segment; a
    /// page the code segment shares with data stays writable.
    fn page_is_read_only(&self, page: PageNumber) -> bool {
        let start = page.start(self.page_size());
        let end = start + self.page_size();
        self.code.size > 0 && start >= self.code.virtual_addr && end <= self.code.virtual_end()
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("pid", &self.pid)
            .field("num_pages", &self.num_pages)
            .finish_non_exhaustive()
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        let table = self.table.get_mut();
        for entry in table.iter() {
            if !entry.valid {
                continue;
            }
            let frame = entry.physical_page.expect("valid entry without a frame");
            {
                let mut tlb = self.machine.tlb().lock();
                if let Some(slot) = tlb.slot_for_frame(frame) {
                    tlb.save_slot(&self.machine, slot);
                }
            }
            self.machine.core_map().clear_if_owned(frame, self.pid);
        }
        self.swap.remove();
        log::info!("space {}: torn down", self.pid);
    }
}

/// Vacates one physical frame machine-wide, returning it busy and cleared.
fn evict_one(machine: &Machine) -> FrameNumber {
    let victim = machine.core_map().pick_victim();
    if let Some(owner) = machine.core_map().frame_owner(victim) {
        match owner.space.upgrade() {
            Some(space) => space.evict_page(victim, owner.virtual_page),
            // The owner is mid-teardown; its Drop will release the frame's
            // ownership record, and the busy flag keeps the frame ours.
            None => machine.core_map().clear(victim),
        }
    }
    victim
}

/// Copies the part of `segment` overlapping the page at `page_start` into the
/// matching range of `buf`. Bytes outside the segment are left untouched.
fn fill_from_segment(
    buf: &mut [u8],
    page_start: usize,
    segment: Segment,
    read: impl Fn(&mut [u8], usize) -> usize,
) {
    let page_end = page_start + buf.len();
    let lo = page_start.max(segment.virtual_addr);
    let hi = page_end.min(segment.virtual_end());
    if lo >= hi {
        return;
    }
    let got = read(&mut buf[lo - page_start..hi - page_start], lo - segment.virtual_addr);
    assert_eq!(got, hi - lo, "executable truncated in segment");
}
