//! # Virtual Memory Manager (VMM)
//!
//! The virtual-memory core of a small teaching machine. It provides:
//!
//! - Per-process address spaces built from flat executable images.
//! - Demand paging with a pluggable frame-eviction policy.
//! - A core map tracking the owner of every physical frame.
//! - Software TLB synchronization with the page tables behind it.
//! - A per-process swap backing store for evicted dirty pages.
//!
//! Everything hangs off a [`Machine`]: build one from a [`MachineConfig`] and
//! a file system, create an [`AddressSpace`] per program, and route CPU
//! exceptions through a [`FaultHandler`].

mod address_space;
mod bitmap;
mod config;
mod core_map;
mod executable;
mod fault;
mod frame;
mod fs;
mod machine;
mod memory;
mod numbers;
mod page_table;
mod swap;
mod tlb;

pub use address_space::{AddressSpace, LoadError};
pub use bitmap::Bitmap;
pub use config::{MachineConfig, VictimPolicyKind};
pub use core_map::{CoreMap, FrameOwner, VictimPolicy};
pub use executable::{EXEC_MAGIC, Executable, HEADER_SIZE, Segment, build_image};
pub use fault::{Exception, FaultHandler};
pub use frame::FrameDescriptor;
pub use fs::{FileSystem, MemFileSystem, OpenFile};
pub use machine::Machine;
pub use memory::MainMemory;
pub use numbers::{FrameNumber, PageNumber, ProcessId};
pub use page_table::{PageTable, TranslationEntry};
pub use swap::SwapStore;
pub use tlb::Tlb;
