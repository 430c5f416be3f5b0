//! The core map: physical-frame ownership and eviction arbitration.
//!
//! The core map is the single source of truth for which process and virtual
//! page occupy each physical frame. One lock guards the descriptor array, the
//! free-frame bitmap, and the eviction policy's state; every frame-ownership
//! change in the system goes through it. Page I/O never happens under this
//! lock: callers mark a frame busy, drop the lock, move data, then `unlock`.

use std::sync::Weak;

use rand::{Rng, SeedableRng, rngs::StdRng};
use spin::Mutex;

use crate::{
    AddressSpace, FrameNumber, PageNumber, ProcessId, VictimPolicyKind, bitmap::Bitmap,
    frame::FrameDescriptor,
};

/// Snapshot of a frame's ownership, taken under the core-map lock.
pub struct FrameOwner {
    /// The owning process.
    pub process: ProcessId,
    /// The virtual page resident in the frame.
    pub virtual_page: PageNumber,
    /// Non-owning handle to the owning address space.
    pub space: Weak<AddressSpace>,
    /// The TLB slot caching the frame's translation, if any.
    pub tlb_slot: Option<usize>,
}

struct CoreMapInner {
    frames: Box<[FrameDescriptor]>,
    bitmap: Bitmap,
    policy: Box<dyn VictimPolicy>,
}

/// The machine-wide frame-ownership table.
pub struct CoreMap {
    inner: Mutex<CoreMapInner>,
}

impl CoreMap {
    /// Creates a core map for `num_frames` physical frames with the given
    /// eviction policy.
    pub fn new(num_frames: usize, policy: VictimPolicyKind) -> Self {
        let frames = (0..num_frames).map(|_| FrameDescriptor::empty()).collect();
        Self {
            inner: Mutex::new(CoreMapInner {
                frames,
                bitmap: Bitmap::new(num_frames),
                policy: make_policy(policy),
            }),
        }
    }

    /// Allocates a free frame for `(pid, page)` of `space`.
    ///
    /// The returned frame is marked valid and busy; the caller must `unlock`
    /// it once data movement is complete. Returns `None` when no free frame
    /// exists, in which case the caller must evict.
    pub fn add(
        &self,
        space: Weak<AddressSpace>,
        page: PageNumber,
        pid: ProcessId,
    ) -> Option<FrameNumber> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        // A free-but-busy frame is mid-eviction and reserved for the evictor's
        // add_victim; skip it.
        let frames = &inner.frames;
        let index = inner.bitmap.find_where(|i| !frames[i].busy)?;
        inner.bitmap.mark(index);

        let frame = FrameNumber::new(index);
        inner.install(frame, space, page, pid);
        inner.frames[index].busy = true;
        log::trace!("core map: frame {frame} -> pid {pid} page {page}");
        Some(frame)
    }

    /// Installs ownership into a frame just vacated by eviction.
    ///
    /// Bypasses the bitmap search; the frame must still be busy from
    /// `pick_victim` and must have been cleared.
    ///
    /// # Panics
    ///
    /// Panics if the frame is not busy, is still valid, or is marked
    /// allocated in the bitmap — any of these means the eviction hand-off
    /// contract was broken.
    pub fn add_victim(
        &self,
        space: Weak<AddressSpace>,
        page: PageNumber,
        pid: ProcessId,
        frame: FrameNumber,
    ) {
        let mut inner = self.inner.lock();
        let index = frame.as_usize();
        assert!(
            inner.frames[index].busy,
            "add_victim on frame {frame} that is not busy"
        );
        assert!(
            !inner.frames[index].valid,
            "add_victim on frame {frame} that was not cleared"
        );
        assert!(
            !inner.bitmap.test(index),
            "add_victim on frame {frame} still marked allocated"
        );
        inner.bitmap.mark(index);
        inner.install(frame, space, page, pid);
        log::trace!("core map: victim frame {frame} -> pid {pid} page {page}");
    }

    /// Selects a frame to evict, marking it busy as part of selection.
    ///
    /// No two concurrent calls can return the same frame: the busy flag is
    /// set under the same lock acquisition that picks the victim.
    ///
    /// # Panics
    ///
    /// Panics if every valid frame is busy — the machine cannot make
    /// progress, which is a configuration error (more concurrent faults than
    /// physical frames).
    pub fn pick_victim(&self) -> FrameNumber {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let victim = inner.policy.pick(&inner.frames);
        inner.frames[victim.as_usize()].busy = true;
        log::debug!("core map: picked victim frame {victim}");
        victim
    }

    /// Resets a frame to free and invalid.
    ///
    /// Used both on address-space teardown and at the end of an eviction. The
    /// busy flag is deliberately untouched: during eviction it keeps the
    /// vacated frame reserved until `add_victim`, and only `unlock` ends the
    /// transaction. Clearing an already-clear frame is a no-op.
    pub fn clear(&self, frame: FrameNumber) {
        let mut inner = self.inner.lock();
        let index = frame.as_usize();
        if inner.frames[index].valid {
            inner.bitmap.clear(index);
            inner.policy.note_clear(frame);
        }
        inner.frames[index].reset();
    }

    /// Resets a frame only if it is still owned by the given process.
    ///
    /// Address-space teardown uses this instead of `clear`: between the dying
    /// space's last look at its page table and this call, an evictor may
    /// already have recycled the frame for another process.
    pub fn clear_if_owned(&self, frame: FrameNumber, pid: ProcessId) {
        let mut inner = self.inner.lock();
        let index = frame.as_usize();
        if inner.frames[index].valid && inner.frames[index].owner_process == Some(pid) {
            inner.bitmap.clear(index);
            inner.policy.note_clear(frame);
            inner.frames[index].reset();
        }
    }

    /// Records which TLB slot caches this frame's translation.
    pub fn set_tlb(&self, frame: FrameNumber, slot: usize) {
        self.inner.lock().frames[frame.as_usize()].tlb_slot = Some(slot);
    }

    /// Clears the frame's TLB-residency record.
    pub fn clear_tlb(&self, frame: FrameNumber) {
        self.inner.lock().frames[frame.as_usize()].tlb_slot = None;
    }

    /// Returns the number of free frames.
    pub fn count_clear(&self) -> usize {
        self.inner.lock().bitmap.count_clear()
    }

    /// Releases a frame's busy flag once its allocation or eviction
    /// transaction completes.
    ///
    /// # Panics
    ///
    /// Panics if the frame was not busy; unlocking an unpinned frame is a
    /// caller bug, not a runtime condition.
    pub fn unlock(&self, frame: FrameNumber) {
        let mut inner = self.inner.lock();
        let desc = &mut inner.frames[frame.as_usize()];
        assert!(desc.busy, "unlock of frame {frame} that is not busy");
        desc.busy = false;
    }

    /// Snapshots the ownership of a valid frame, or `None` if it is free.
    pub fn frame_owner(&self, frame: FrameNumber) -> Option<FrameOwner> {
        let inner = self.inner.lock();
        let desc = &inner.frames[frame.as_usize()];
        if !desc.valid {
            return None;
        }
        Some(FrameOwner {
            process: desc.owner_process.expect("valid frame without owner"),
            virtual_page: desc.virtual_page.expect("valid frame without page"),
            space: desc.owner_space.clone(),
            tlb_slot: desc.tlb_slot,
        })
    }
}

impl CoreMapInner {
    fn install(&mut self, frame: FrameNumber, space: Weak<AddressSpace>, page: PageNumber, pid: ProcessId) {
        let desc = &mut self.frames[frame.as_usize()];
        desc.valid = true;
        desc.owner_process = Some(pid);
        desc.owner_space = space;
        desc.virtual_page = Some(page);
        desc.tlb_slot = None;
        self.policy.note_insert(frame);
    }
}

/// A frame-eviction strategy.
///
/// Implementations are driven entirely under the core-map lock, so they see a
/// consistent frame table; `pick` must return a valid, non-busy frame or
/// panic if none exists.
pub trait VictimPolicy: Send {
    /// Called when a frame is assigned to a page.
    fn note_insert(&mut self, frame: FrameNumber);

    /// Called when a frame is freed.
    fn note_clear(&mut self, frame: FrameNumber);

    /// Picks a valid, non-busy frame to evict.
    fn pick(&mut self, frames: &[FrameDescriptor]) -> FrameNumber;
}

fn make_policy(kind: VictimPolicyKind) -> Box<dyn VictimPolicy> {
    match kind {
        VictimPolicyKind::Fifo => Box::new(FifoPolicy::default()),
        VictimPolicyKind::Random { seed } => Box::new(RandomPolicy::new(seed)),
        VictimPolicyKind::RoundRobin => Box::new(RoundRobinPolicy::default()),
    }
}

fn evictable(frames: &[FrameDescriptor], frame: FrameNumber) -> bool {
    let desc = &frames[frame.as_usize()];
    desc.valid && !desc.busy
}

/// Evicts the oldest-allocated non-busy frame.
#[derive(Default)]
struct FifoPolicy {
    queue: std::collections::VecDeque<FrameNumber>,
}

impl VictimPolicy for FifoPolicy {
    fn note_insert(&mut self, frame: FrameNumber) {
        self.queue.push_back(frame);
    }

    fn note_clear(&mut self, frame: FrameNumber) {
        self.queue.retain(|&f| f != frame);
    }

    fn pick(&mut self, frames: &[FrameDescriptor]) -> FrameNumber {
        // Rotate busy frames to the back; they stay allocated, just not
        // evictable right now.
        for _ in 0..self.queue.len() {
            let frame = self.queue.pop_front().expect("queue emptied mid-scan");
            if evictable(frames, frame) {
                return frame;
            }
            self.queue.push_back(frame);
        }
        panic!("no evictable frame: all valid frames are busy");
    }
}

/// Picks frames uniformly at random, retrying busy frames.
struct RandomPolicy {
    rng: StdRng,
}

impl RandomPolicy {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl VictimPolicy for RandomPolicy {
    fn note_insert(&mut self, _frame: FrameNumber) {}

    fn note_clear(&mut self, _frame: FrameNumber) {}

    fn pick(&mut self, frames: &[FrameDescriptor]) -> FrameNumber {
        // Bounded retries keep selection uniform in the common case; the
        // linear sweep below guarantees termination when most frames are busy.
        for _ in 0..frames.len() * 16 {
            let frame = FrameNumber::new(self.rng.gen_range(0..frames.len()));
            if evictable(frames, frame) {
                return frame;
            }
        }
        (0..frames.len())
            .map(FrameNumber::new)
            .find(|&f| evictable(frames, f))
            .unwrap_or_else(|| panic!("no evictable frame: all valid frames are busy"))
    }
}

/// Sweeps a fixed cursor across the frame table.
#[derive(Default)]
struct RoundRobinPolicy {
    cursor: usize,
}

impl VictimPolicy for RoundRobinPolicy {
    fn note_insert(&mut self, _frame: FrameNumber) {}

    fn note_clear(&mut self, _frame: FrameNumber) {}

    fn pick(&mut self, frames: &[FrameDescriptor]) -> FrameNumber {
        for i in 0..frames.len() {
            let index = (self.cursor + i) % frames.len();
            let frame = FrameNumber::new(index);
            if evictable(frames, frame) {
                self.cursor = (index + 1) % frames.len();
                return frame;
            }
        }
        panic!("no evictable frame: all valid frames are busy");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(map: &CoreMap, pid: u32, page: usize) -> FrameNumber {
        let frame = map
            .add(Weak::new(), PageNumber::new(page), ProcessId::new(pid))
            .expect("expected a free frame");
        map.unlock(frame);
        frame
    }

    #[test]
    fn count_clear_tracks_adds_and_clears() {
        let map = CoreMap::new(8, VictimPolicyKind::Fifo);
        assert_eq!(map.count_clear(), 8);

        let f0 = add(&map, 1, 0);
        let f1 = add(&map, 1, 1);
        assert_eq!(map.count_clear(), 6);

        map.clear(f0);
        assert_eq!(map.count_clear(), 7);
        map.clear(f1);
        assert_eq!(map.count_clear(), 8);
    }

    #[test]
    fn add_returns_none_when_full() {
        let map = CoreMap::new(2, VictimPolicyKind::Fifo);
        add(&map, 1, 0);
        add(&map, 1, 1);
        assert!(
            map.add(Weak::new(), PageNumber::new(2), ProcessId::new(1))
                .is_none()
        );
    }

    #[test]
    fn clear_is_idempotent() {
        let map = CoreMap::new(4, VictimPolicyKind::Fifo);
        let frame = add(&map, 1, 0);
        map.clear(frame);
        map.clear(frame);
        assert_eq!(map.count_clear(), 4);
        assert!(map.frame_owner(frame).is_none());
    }

    #[test]
    fn frame_owner_reports_installed_fields() {
        let map = CoreMap::new(4, VictimPolicyKind::Fifo);
        let frame = add(&map, 7, 3);

        let owner = map.frame_owner(frame).expect("frame should be owned");
        assert_eq!(owner.process, ProcessId::new(7));
        assert_eq!(owner.virtual_page, PageNumber::new(3));
        assert_eq!(owner.tlb_slot, None);
    }

    #[test]
    fn tlb_residency_round_trips() {
        let map = CoreMap::new(4, VictimPolicyKind::Fifo);
        let frame = add(&map, 1, 0);

        map.set_tlb(frame, 2);
        assert_eq!(map.frame_owner(frame).unwrap().tlb_slot, Some(2));
        map.clear_tlb(frame);
        assert_eq!(map.frame_owner(frame).unwrap().tlb_slot, None);
    }

    #[test]
    fn clear_if_owned_ignores_recycled_frames() {
        let map = CoreMap::new(4, VictimPolicyKind::Fifo);
        let frame = add(&map, 1, 0);

        // The frame has moved on to another process; the stale owner's
        // teardown must leave it alone.
        map.clear(frame);
        let reused = add(&map, 2, 5);
        assert_eq!(reused, frame);

        map.clear_if_owned(frame, ProcessId::new(1));
        assert_eq!(map.frame_owner(frame).unwrap().process, ProcessId::new(2));

        map.clear_if_owned(frame, ProcessId::new(2));
        assert!(map.frame_owner(frame).is_none());
    }

    #[test]
    #[should_panic(expected = "not busy")]
    fn unlock_of_unpinned_frame_panics() {
        let map = CoreMap::new(4, VictimPolicyKind::Fifo);
        let frame = add(&map, 1, 0);
        map.unlock(frame); // already released by the helper
    }

    #[test]
    fn eviction_handoff_reserves_the_frame() {
        let map = CoreMap::new(1, VictimPolicyKind::Fifo);
        add(&map, 1, 0);

        let victim = map.pick_victim();
        map.clear(victim);

        // The vacated frame is busy, so a concurrent allocation must not
        // steal it even though the bitmap shows it free.
        assert_eq!(map.count_clear(), 1);
        assert!(
            map.add(Weak::new(), PageNumber::new(9), ProcessId::new(2))
                .is_none()
        );

        map.add_victim(Weak::new(), PageNumber::new(5), ProcessId::new(2), victim);
        map.unlock(victim);

        let owner = map.frame_owner(victim).unwrap();
        assert_eq!(owner.process, ProcessId::new(2));
        assert_eq!(owner.virtual_page, PageNumber::new(5));
    }

    #[test]
    fn fifo_evicts_in_allocation_order() {
        let map = CoreMap::new(3, VictimPolicyKind::Fifo);
        let f0 = add(&map, 1, 0);
        let f1 = add(&map, 1, 1);
        add(&map, 1, 2);

        assert_eq!(map.pick_victim(), f0);
        assert_eq!(map.pick_victim(), f1);
    }

    #[test]
    fn fifo_skips_busy_frames() {
        let map = CoreMap::new(2, VictimPolicyKind::Fifo);
        let f0 = add(&map, 1, 0);
        let f1 = add(&map, 1, 1);

        let first = map.pick_victim();
        assert_eq!(first, f0);
        // f0 is now busy, so the next pick must move on.
        assert_eq!(map.pick_victim(), f1);
    }

    #[test]
    fn round_robin_sweeps_the_table() {
        let map = CoreMap::new(3, VictimPolicyKind::RoundRobin);
        let f0 = add(&map, 1, 0);
        let f1 = add(&map, 1, 1);
        let f2 = add(&map, 1, 2);

        assert_eq!(map.pick_victim(), f0);
        assert_eq!(map.pick_victim(), f1);
        assert_eq!(map.pick_victim(), f2);
    }

    #[test]
    fn random_policy_only_picks_evictable_frames() {
        let map = CoreMap::new(8, VictimPolicyKind::Random { seed: 42 });
        // Only half the frames are allocated.
        let allocated: Vec<FrameNumber> = (0..4).map(|p| add(&map, 1, p)).collect();

        for _ in 0..4 {
            let victim = map.pick_victim();
            assert!(allocated.contains(&victim));
        }
    }

    #[test]
    fn concurrent_picks_never_return_the_same_frame() {
        use std::sync::Arc;

        let map = Arc::new(CoreMap::new(8, VictimPolicyKind::Fifo));
        for page in 0..8 {
            add(&map, 1, page);
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let map = Arc::clone(&map);
            handles.push(std::thread::spawn(move || map.pick_victim()));
        }

        let mut victims: Vec<FrameNumber> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        victims.sort();
        victims.dedup();
        assert_eq!(victims.len(), 8, "two threads were handed the same victim");
    }

    #[test]
    #[should_panic(expected = "no evictable frame")]
    fn pick_with_all_frames_busy_panics() {
        let map = CoreMap::new(1, VictimPolicyKind::Fifo);
        add(&map, 1, 0);
        map.pick_victim();
        map.pick_victim();
    }
}
