//! Machine configuration.
//!
//! Demand loading, swap, and the eviction policy are all runtime choices,
//! made once when the machine is constructed.

/// Eviction policy selection.
///
/// Chosen at configuration time; see [`crate::core_map::VictimPolicy`] for the
/// behavior each variant provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VictimPolicyKind {
    /// Evict the oldest-allocated non-busy frame.
    Fifo,
    /// Pick frames uniformly at random, retrying until a non-busy frame is found.
    ///
    /// The seed makes victim sequences reproducible across runs.
    Random { seed: u64 },
    /// Sweep a fixed cursor across the frame table.
    RoundRobin,
}

/// Configuration for a simulated machine.
///
/// The defaults describe a deliberately small machine: 128-byte pages, 32
/// physical frames, a 4-slot TLB, and a 1 KiB user stack.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Size of a page (and a frame) in bytes. Must be a power of two.
    pub page_size: usize,
    /// Number of physical frames in main memory.
    pub num_frames: usize,
    /// Number of hardware TLB slots.
    pub tlb_size: usize,
    /// Bytes reserved for each process's user stack.
    pub user_stack_size: usize,
    /// Whether pages are loaded on first fault rather than at exec time.
    pub demand_loading: bool,
    /// Whether evicted dirty pages are written to a per-process swap file.
    ///
    /// Has no effect unless `demand_loading` is also enabled: without demand
    /// loading, every page is resident for the life of the process.
    pub swap: bool,
    /// Which frame the core map evicts under memory pressure.
    pub policy: VictimPolicyKind,
}

impl MachineConfig {
    /// Asserts that the configuration is internally consistent.
    ///
    /// # Panics
    ///
    /// Panics if the page size is not a power of two, or if the frame, TLB
    /// slot, or stack sizes are zero.
    pub(crate) fn validate(&self) {
        assert!(
            self.page_size.is_power_of_two(),
            "page size must be a power of two"
        );
        assert!(self.num_frames > 0, "machine must have at least one frame");
        assert!(self.tlb_size > 0, "TLB must have at least one slot");
        assert!(self.user_stack_size > 0, "user stack must be non-empty");
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            page_size: 128,
            num_frames: 32,
            tlb_size: 4,
            user_stack_size: 1024,
            demand_loading: true,
            swap: true,
            policy: VictimPolicyKind::Fifo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MachineConfig::default();
        assert_eq!(config.page_size, 128);
        assert_eq!(config.num_frames, 32);
        assert_eq!(config.tlb_size, 4);
        assert_eq!(config.user_stack_size, 1024);
        config.validate();
    }

    #[test]
    #[should_panic(expected = "page size must be a power of two")]
    fn rejects_unaligned_page_size() {
        let config = MachineConfig {
            page_size: 100,
            ..Default::default()
        };
        config.validate();
    }

    #[test]
    #[should_panic(expected = "at least one frame")]
    fn rejects_zero_frames() {
        let config = MachineConfig {
            num_frames: 0,
            ..Default::default()
        };
        config.validate();
    }
}
