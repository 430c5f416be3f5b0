//! Page, frame, and process number types.
//!
//! This module provides newtypes for physical frame numbers, virtual page numbers,
//! and process identifiers, which are used throughout the virtual-memory subsystem.

use core::{
    fmt,
    ops::{Add, Sub},
};

/// Stamps out the shared shape of an index newtype.
///
/// Frame and page numbers carry identical construction, formatting, and
/// offset arithmetic; only their address-conversion helpers differ.
macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new page/frame number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw page/frame number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_page_number_common!(
    FrameNumber,
    "A physical memory frame number.\n\n\
     Represents a physical memory frame, which is the physical memory equivalent of a page.\n\
     Frame numbers are zero-indexed and correspond to page-size-aligned offsets into the\n\
     machine's main memory."
);

impl FrameNumber {
    /// Returns the byte offset of the start of this frame in main memory.
    #[inline]
    pub const fn start(self, page_size: usize) -> usize {
        self.0 * page_size
    }
}

impl_page_number_common!(
    PageNumber,
    "A virtual memory page number.\n\n\
     Represents a virtual memory page. Page numbers are zero-indexed and correspond to\n\
     page-size-aligned virtual addresses within an address space."
);

impl PageNumber {
    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self, page_size: usize) -> usize {
        self.0 * page_size
    }

    /// Returns the page containing the given virtual address.
    #[inline]
    pub const fn containing(vaddr: usize, page_size: usize) -> Self {
        Self(vaddr / page_size)
    }
}

/// A process identifier.
///
/// Assigned by the machine when an address space is created, and used both for
/// frame-ownership records in the core map and for the deterministic swap-file
/// naming convention (`SWAP.<pid>`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Creates a new process identifier.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessId({})", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod frame_number {
        use super::*;

        #[test]
        fn start_is_page_size_aligned() {
            assert_eq!(FrameNumber::new(0).start(128), 0);
            assert_eq!(FrameNumber::new(3).start(128), 384);
        }

        #[test]
        fn arithmetic_stays_in_frame_units() {
            let base = FrameNumber::new(10);
            assert_eq!((base + 5).as_usize(), 15);
            assert_eq!((base - 4).as_usize(), 6);
            assert_eq!(base - FrameNumber::new(3), 7);
        }

        #[test]
        fn orders_by_index() {
            assert!(FrameNumber::new(5) < FrameNumber::new(10));
            assert_eq!(FrameNumber::new(5), FrameNumber::new(5));
        }
    }

    mod page_number {
        use super::*;

        #[test]
        fn new_page() {
            let page = PageNumber::new(42);
            assert_eq!(page.as_usize(), 42);
        }

        #[test]
        fn containing_address() {
            let page = PageNumber::containing(128 * 3 + 10, 128);
            assert_eq!(page.as_usize(), 3);
        }

        #[test]
        fn containing_aligned_address() {
            let page = PageNumber::containing(128 * 5, 128);
            assert_eq!(page.as_usize(), 5);
        }

        #[test]
        fn round_trip() {
            let page = PageNumber::new(7);
            let recovered = PageNumber::containing(page.start(128), 128);
            assert_eq!(page, recovered);
        }
    }

    mod process_id {
        use super::*;

        #[test]
        fn new_id() {
            let pid = ProcessId::new(3);
            assert_eq!(pid.as_u32(), 3);
        }

        #[test]
        fn display_format() {
            let pid = ProcessId::new(12);
            assert_eq!(format!("{pid}"), "12");
        }
    }
}
