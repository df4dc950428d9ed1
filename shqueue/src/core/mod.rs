//! Shared state that lives inside the memory region: the control block at
//! the base, the slot array after it, and the bounds-checked view that maps
//! a raw address onto both.
//!
//! Nothing here owns the region. All cross-process mutation goes through the
//! atomic fields; slot payloads are only written under a successfully
//! claimed cursor position (see the queue module).

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::errors::QueueError;
use crate::layout;

/// Construction state of a shared region, stored in the control block.
///
/// Transitions only ever run `Uninitialized -> Initializing -> Initialized`,
/// driven by the attach handshake. A fresh zero-filled region reads as
/// `Uninitialized`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized = 0,
    Initializing = 1,
    Initialized = 2,
}

impl InitState {
    #[inline]
    fn from_raw(raw: u32) -> InitState {
        match raw {
            0 => InitState::Uninitialized,
            1 => InitState::Initializing,
            _ => InitState::Initialized,
        }
    }
}

/// Poll interval while waiting for another process to finish construction.
const INIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Queue header at the base of the shared region.
///
/// `head` and `tail` are logical positions: they increase without bound
/// (wrapping at the integer limit) and are reduced modulo capacity only for
/// slot indexing. Both advance by exactly one per successful claim, via
/// compare-and-swap.
#[repr(C)]
pub struct ControlBlock {
    init_state: AtomicU32,
    pub(crate) head: AtomicUsize,
    pub(crate) tail: AtomicUsize,
    capacity: AtomicUsize,
}

impl ControlBlock {
    /// Attempt to become the sole initializer of this region.
    #[inline]
    pub(crate) fn try_begin_init(&self) -> bool {
        self.init_state
            .compare_exchange(
                InitState::Uninitialized as u32,
                InitState::Initializing as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Write the initial cursor values and capacity of an existing, claimed
    /// control block. Called exactly once per region, by the handshake
    /// winner, before [`publish_initialized`](Self::publish_initialized).
    pub(crate) fn initialize(&self, capacity: usize) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    /// Mark construction complete. The release store pairs with the acquire
    /// loads in [`wait_initialized`](Self::wait_initialized), making every
    /// prior control-block and slot write visible to other attachers.
    #[inline]
    pub(crate) fn publish_initialized(&self) {
        self.init_state
            .store(InitState::Initialized as u32, Ordering::Release);
    }

    /// Block until another attacher finishes construction. Sleeps between
    /// polls; the wait is bounded only by the initializer's progress.
    pub(crate) fn wait_initialized(&self) {
        while self.state() != InitState::Initialized {
            thread::sleep(INIT_POLL_INTERVAL);
        }
    }

    #[inline]
    pub fn state(&self) -> InitState {
        InitState::from_raw(self.init_state.load(Ordering::Acquire))
    }

    /// Fixed at construction; meaningful once [`state`](Self::state) has
    /// returned [`InitState::Initialized`].
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }
}

/// One buffer position: a lap-aware sequence counter, the payload, and the
/// protection flag of the most recently written value.
///
/// Sequence protocol, for logical position `p`:
/// - `sequence == p`     the slot is free for a producer writing `p`
/// - `sequence == p + 1` the slot holds readable data for `p`
/// - after a read, `sequence = p + capacity` frees it for the next lap
#[repr(C, align(64))]
pub struct Slot<T> {
    pub(crate) sequence: AtomicUsize,
    pub(crate) important: AtomicBool,
    pub(crate) data: UnsafeCell<MaybeUninit<T>>,
}

// The payload is only touched between a successful cursor CAS and the
// release store of `sequence`, which is what makes sharing sound.
unsafe impl<T: Send> Send for Slot<T> {}
unsafe impl<T: Send> Sync for Slot<T> {}

impl<T> Slot<T> {
    /// Stamp the initial sequence of an existing slot. Called exactly once
    /// per slot, by the handshake winner.
    pub(crate) fn initialize(&self, index: usize) {
        self.sequence.store(index, Ordering::Relaxed);
        self.important.store(false, Ordering::Relaxed);
    }
}

/// Typed, bounds-checked view of a raw region as control block + slot array.
///
/// This is the only place addresses are computed from the base pointer.
/// Everything downstream goes through [`control`](Self::control) and
/// [`slot`](Self::slot).
pub(crate) struct RegionView<T> {
    control: NonNull<ControlBlock>,
    slots: NonNull<Slot<T>>,
    max_slots: usize,
}

impl<T> RegionView<T> {
    /// Bind `region_size` bytes at `base`.
    ///
    /// The caller guarantees that `base` points to a readable and writable
    /// block of at least `region_size` bytes that outlives the view, shared
    /// only with other attachers of the same queue, and that the block was
    /// zero-filled before the first attacher arrived. Freshly created OS
    /// shared memory and zeroed heap allocations both qualify. Under that
    /// contract every byte pattern the region goes through is a valid
    /// `ControlBlock` / `Slot<T>` (atomics are plain integers, payloads stay
    /// `MaybeUninit` until the sequence protocol publishes them).
    pub(crate) fn new(base: *mut u8, region_size: usize) -> Result<RegionView<T>, QueueError> {
        let header = layout::control_block_size();
        if base.is_null() {
            return Err(QueueError::Logic("region base is null".to_string()));
        }
        if (base as usize) % layout::SLOT_ALIGN != 0 {
            return Err(QueueError::Misaligned {
                addr: base as usize,
                align: layout::SLOT_ALIGN,
            });
        }
        if region_size < header {
            return Err(QueueError::RegionTooSmall {
                region_size,
                required: layout::required_region_size::<T>(1),
            });
        }
        let max_slots = (region_size - header) / std::mem::size_of::<Slot<T>>();
        let control = unsafe { NonNull::new_unchecked(base as *mut ControlBlock) };
        let slots =
            unsafe { NonNull::new_unchecked(base.add(layout::slot_array_offset()) as *mut Slot<T>) };
        Ok(RegionView {
            control,
            slots,
            max_slots,
        })
    }

    #[inline]
    pub(crate) fn control(&self) -> &ControlBlock {
        unsafe { self.control.as_ref() }
    }

    #[inline]
    pub(crate) fn slot(&self, index: usize) -> &Slot<T> {
        assert!(index < self.max_slots);
        unsafe { &*self.slots.as_ptr().add(index) }
    }

    /// Upper bound on the slot count this mapping can address. The
    /// established queue capacity may be smaller, never larger.
    #[inline]
    pub(crate) fn max_slots(&self) -> usize {
        self.max_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::HeapRegion;

    #[test]
    fn zeroed_region_reads_uninitialized() {
        let region = HeapRegion::new_zeroed(4096);
        let view: RegionView<u64> = RegionView::new(region.base(), region.len()).unwrap();
        assert_eq!(view.control().state(), InitState::Uninitialized);
    }

    #[test]
    fn init_race_has_a_single_winner() {
        let region = HeapRegion::new_zeroed(4096);
        let view: RegionView<u64> = RegionView::new(region.base(), region.len()).unwrap();
        let control = view.control();
        assert!(control.try_begin_init());
        assert!(!control.try_begin_init());
        assert_eq!(control.state(), InitState::Initializing);
        control.initialize(8);
        control.publish_initialized();
        assert_eq!(control.state(), InitState::Initialized);
        assert_eq!(control.capacity(), 8);
        // A late attacher cannot restart construction.
        assert!(!control.try_begin_init());
    }

    #[test]
    fn rejects_misaligned_base() {
        let region = HeapRegion::new_zeroed(4096);
        let skewed = unsafe { region.base().add(8) };
        let result: Result<RegionView<u64>, _> = RegionView::new(skewed, region.len() - 8);
        assert!(matches!(result, Err(QueueError::Misaligned { .. })));
    }

    #[test]
    fn rejects_region_smaller_than_header() {
        let region = HeapRegion::new_zeroed(4096);
        let result: Result<RegionView<u64>, _> = RegionView::new(region.base(), 16);
        assert!(matches!(result, Err(QueueError::RegionTooSmall { .. })));
    }
}
