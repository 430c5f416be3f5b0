//! Exception dispatch and page-fault handling.
//!
//! The simulated CPU raises an exception whenever a memory access misses the
//! TLB; everything else about virtual memory hangs off that single entry
//! point. A page fault is resolved in three steps: find (or make) a resident
//! copy of the faulting page, then cache its translation in the TLB, then let
//! the CPU retry the access. All other exception kinds are fatal to the
//! machine.

use std::fmt;
use std::sync::Arc;

use crate::{AddressSpace, Machine, PageNumber};

/// Exceptions the simulated CPU can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// A system call trap.
    Syscall,
    /// A memory access whose translation is not in the TLB.
    PageFault,
    /// A write hit a read-only page.
    ReadOnly,
    /// An unmapped physical address was referenced.
    BusError,
    /// An unaligned or out-of-range virtual address was referenced.
    AddressError,
    /// Integer overflow in user code.
    Overflow,
    /// An undecodable instruction.
    IllegalInstruction,
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Syscall => "syscall",
            Self::PageFault => "page fault",
            Self::ReadOnly => "write to read-only page",
            Self::BusError => "bus error",
            Self::AddressError => "address error",
            Self::Overflow => "arithmetic overflow",
            Self::IllegalInstruction => "illegal instruction",
        };
        write!(f, "{name}")
    }
}

/// Resolves exceptions for processes running on one machine.
pub struct FaultHandler {
    machine: Arc<Machine>,
}

impl FaultHandler {
    /// Creates a handler bound to a machine.
    pub fn new(machine: Arc<Machine>) -> Self {
        Self { machine }
    }

    /// Routes an exception raised while `space` was running.
    ///
    /// # Panics
    ///
    /// Panics on every exception kind except `PageFault`; none of the others
    /// have a recovery path in this machine.
    pub fn dispatch(&self, exception: Exception, space: &Arc<AddressSpace>, vaddr: usize) {
        match exception {
            Exception::PageFault => {
                self.handle_page_fault(space, vaddr);
            }
            other => panic!("unhandled {other} at address {vaddr:#x}"),
        }
    }

    /// Makes the page containing `vaddr` resident and caches its translation.
    ///
    /// The page's content comes from wherever its current authority is: the
    /// swap file if it was evicted dirty, the executable (or zero fill)
    /// otherwise. A page that is already resident just missed the TLB and is
    /// reinstalled as-is.
    ///
    /// # Panics
    ///
    /// Panics if `vaddr` is outside the address space.
    pub fn handle_page_fault(
        &self,
        space: &Arc<AddressSpace>,
        vaddr: usize,
    ) -> crate::TranslationEntry {
        let page = PageNumber::containing(vaddr, space.page_size());
        assert!(
            page.as_usize() < space.num_pages(),
            "address {vaddr:#x} outside address space of process {}",
            space.pid()
        );

        let entry = space.translation(page);
        let entry = if entry.valid {
            entry
        } else if entry.in_swap {
            space.load_page_from_swap(page)
        } else {
            space.load_page(page)
        };

        self.machine.tlb().lock().set_page(&self.machine, space, entry);
        entry
    }

    /// Flushes the TLB on a context switch.
    ///
    /// The TLB has no address-space tag, so translations from the outgoing
    /// process must not survive into the incoming one.
    pub fn handle_context_switch(&self) {
        self.machine.tlb().lock().invalidate_all(&self.machine);
    }

    /// Simulates one CPU memory access, faulting and retrying until the TLB
    /// hits.
    ///
    /// # Panics
    ///
    /// Panics if `write` is set and the page is read-only.
    pub fn access(&self, space: &Arc<AddressSpace>, vaddr: usize, write: bool) {
        loop {
            if self.machine.tlb().lock().touch(space, vaddr, write) {
                return;
            }
            self.handle_page_fault(space, vaddr);
        }
    }
}
