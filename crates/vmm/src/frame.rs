//! Physical frame descriptors.
//!
//! One descriptor per physical frame, owned by the core map. The descriptor
//! records which process and virtual page currently occupy the frame, whether
//! the translation is cached in a TLB slot, and whether the frame is pinned
//! by an in-flight allocation or transfer.

use std::sync::Weak;

use crate::{AddressSpace, PageNumber, ProcessId};

/// Metadata for one physical frame.
///
/// A frame marked `valid` always has `owner` fields pointing at a page-table
/// entry whose `physical_page` is this frame's index, unless the entry is
/// mid-transition under the core map's lock.
pub struct FrameDescriptor {
    /// Whether the frame is currently assigned to some page.
    pub valid: bool,
    /// The owning process, when valid.
    pub owner_process: Option<ProcessId>,
    /// Non-owning back-reference to the owning address space.
    ///
    /// Never upgraded into ownership; an address space that dies with frames
    /// still referencing it shows up as a failed upgrade, not a dangling
    /// pointer.
    pub owner_space: Weak<AddressSpace>,
    /// The virtual page resident in this frame, when valid.
    pub virtual_page: Option<PageNumber>,
    /// The hardware TLB slot caching this frame's translation, if any.
    pub tlb_slot: Option<usize>,
    /// Pinned during an in-flight allocation or transfer; eviction skips
    /// busy frames, and `add` will not hand them out.
    pub busy: bool,
}

impl FrameDescriptor {
    /// Creates an empty (free, not busy) descriptor.
    pub fn empty() -> Self {
        Self {
            valid: false,
            owner_process: None,
            owner_space: Weak::new(),
            virtual_page: None,
            tlb_slot: None,
            busy: false,
        }
    }

    /// Resets ownership fields, leaving the busy flag untouched.
    ///
    /// The busy flag belongs to the allocation/eviction transaction in
    /// flight and is only released through the core map's `unlock`.
    pub fn reset(&mut self) {
        self.valid = false;
        self.owner_process = None;
        self.owner_space = Weak::new();
        self.virtual_page = None;
        self.tlb_slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_descriptor_is_free() {
        let desc = FrameDescriptor::empty();
        assert!(!desc.valid);
        assert!(!desc.busy);
        assert!(desc.owner_process.is_none());
        assert!(desc.owner_space.upgrade().is_none());
    }

    #[test]
    fn reset_preserves_busy() {
        let mut desc = FrameDescriptor::empty();
        desc.valid = true;
        desc.owner_process = Some(ProcessId::new(1));
        desc.virtual_page = Some(PageNumber::new(3));
        desc.busy = true;

        desc.reset();

        assert!(!desc.valid);
        assert!(desc.owner_process.is_none());
        assert!(desc.virtual_page.is_none());
        assert!(desc.busy);
    }
}
