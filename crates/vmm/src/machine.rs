//! Machine assembly.
//!
//! There are no ambient globals here: `Machine::new` builds main memory, the
//! core map, and the TLB from one configuration, and everything downstream
//! (address spaces, the fault handler) holds an `Arc` to the result.
//! Lifecycle is the caller's: drop the last `Arc` and the machine is gone.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::{
    MachineConfig, ProcessId, core_map::CoreMap, fs::FileSystem, memory::MainMemory, tlb::Tlb,
};

/// A simulated machine: physical memory, the core map, the TLB, and a handle
/// to the file-system collaborator.
pub struct Machine {
    config: MachineConfig,
    memory: MainMemory,
    core_map: CoreMap,
    tlb: Mutex<Tlb>,
    filesystem: Arc<dyn FileSystem>,
    next_pid: AtomicU32,
}

impl Machine {
    /// Builds a machine from a validated configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is inconsistent (see
    /// [`MachineConfig`](crate::MachineConfig)).
    pub fn new(config: MachineConfig, filesystem: Arc<dyn FileSystem>) -> Arc<Self> {
        config.validate();
        log::info!(
            "machine: {} frames of {} bytes, {} TLB slots, policy {:?}",
            config.num_frames,
            config.page_size,
            config.tlb_size,
            config.policy
        );
        Arc::new(Self {
            memory: MainMemory::new(config.num_frames, config.page_size),
            core_map: CoreMap::new(config.num_frames, config.policy),
            tlb: Mutex::new(Tlb::new(config.tlb_size)),
            filesystem,
            next_pid: AtomicU32::new(0),
            config,
        })
    }

    /// The machine's configuration.
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// The page (and frame) size in bytes.
    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Main memory.
    pub fn memory(&self) -> &MainMemory {
        &self.memory
    }

    /// The frame-ownership table.
    pub fn core_map(&self) -> &CoreMap {
        &self.core_map
    }

    /// The translation cache. Lock order: take this lock before any core-map
    /// or page-table access, never while holding one.
    pub fn tlb(&self) -> &Mutex<Tlb> {
        &self.tlb
    }

    /// The file-system collaborator.
    pub fn filesystem(&self) -> Arc<dyn FileSystem> {
        Arc::clone(&self.filesystem)
    }

    /// Hands out the next process identifier.
    pub fn allocate_pid(&self) -> ProcessId {
        ProcessId::new(self.next_pid.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFileSystem;

    #[test]
    fn builds_from_default_config() {
        let machine = Machine::new(MachineConfig::default(), Arc::new(MemFileSystem::new()));
        assert_eq!(machine.memory().num_frames(), 32);
        assert_eq!(machine.core_map().count_clear(), 32);
        assert_eq!(machine.page_size(), 128);
    }

    #[test]
    fn pids_are_unique() {
        let machine = Machine::new(MachineConfig::default(), Arc::new(MemFileSystem::new()));
        let first = machine.allocate_pid();
        let second = machine.allocate_pid();
        assert_ne!(first, second);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_invalid_config() {
        let config = MachineConfig {
            page_size: 100,
            ..Default::default()
        };
        Machine::new(config, Arc::new(MemFileSystem::new()));
    }
}
