//! The queue handle and the lock-free claim protocol.
//!
//! `SharedQueue` is a non-owning view over a region prepared by
//! [`attach`](SharedQueue::attach). Any number of handles, in any number of
//! processes, may operate on the same region concurrently; the per-slot
//! sequence counters are what synchronize payload access, not the cursors
//! alone.

use std::cmp;
use std::sync::atomic::Ordering;

use crate::core::{InitState, RegionView};
use crate::errors::QueueError;
use crate::layout;

/// Bounded multi-producer multi-consumer queue over externally owned memory.
///
/// Elements are stored by value in place, so `T` must be plain fixed-size
/// data whose representation is meaningful in every attaching address space:
/// no pointers into a private heap, no non-trivial drop. The `Copy` bound is
/// how that contract is spelled here.
///
/// When the queue is full, enqueuing evicts the oldest item to make room,
/// unless that item was flagged important, in which case the enqueue is
/// refused. Eviction only ever touches the oldest position, so the delivered
/// order stays FIFO.
pub struct SharedQueue<T> {
    view: RegionView<T>,
}

// All shared mutation is through atomics; the payload write is gated by a
// successful cursor CAS and published by the release store of `sequence`.
unsafe impl<T: Send> Send for SharedQueue<T> {}
unsafe impl<T: Send> Sync for SharedQueue<T> {}

impl<T: Copy> SharedQueue<T> {
    /// Attach to the queue in `region_size` bytes at `base`, sizing the
    /// capacity from whatever the region can hold.
    ///
    /// Exactly one of the racing attachers constructs the control block and
    /// slot array; the rest wait for construction to finish and adopt the
    /// established capacity.
    ///
    /// The caller guarantees that `base` points to a readable and writable
    /// block of at least `region_size` bytes, 64-byte aligned, that outlives
    /// every handle over it, and that the block was zero-filled before the
    /// first attacher arrived. Freshly created OS shared memory qualifies.
    pub fn attach(base: *mut u8, region_size: usize) -> Result<SharedQueue<T>, QueueError> {
        let capacity = layout::capacity_for::<T>(region_size)?;
        SharedQueue::attach_inner(base, region_size, capacity)
    }

    /// Attach with an explicitly requested capacity instead of deriving one
    /// from the region size. Fails when the region cannot hold it. On an
    /// already-initialized region the request is ignored and the established
    /// capacity adopted, exactly as [`attach`](Self::attach) would.
    pub fn attach_with_capacity(
        base: *mut u8,
        region_size: usize,
        capacity: usize,
    ) -> Result<SharedQueue<T>, QueueError> {
        let required = layout::required_region_size::<T>(cmp::max(capacity, 1));
        if capacity == 0 || region_size < required {
            return Err(QueueError::RegionTooSmall {
                region_size,
                required,
            });
        }
        SharedQueue::attach_inner(base, region_size, capacity)
    }

    fn attach_inner(
        base: *mut u8,
        region_size: usize,
        capacity: usize,
    ) -> Result<SharedQueue<T>, QueueError> {
        let view: RegionView<T> = RegionView::new(base, region_size)?;
        let control = view.control();

        if control.try_begin_init() {
            // Sole initializer: build the shared state in place, then
            // publish. `init_state` itself is never rewritten here.
            control.initialize(capacity);
            for index in 0..capacity {
                view.slot(index).initialize(index);
            }
            control.publish_initialized();
        } else {
            control.wait_initialized();
            // This mapping may be smaller than the creator's; the
            // established capacity has to stay addressable through it.
            let established = control.capacity();
            if established > view.max_slots() {
                return Err(QueueError::RegionTooSmall {
                    region_size,
                    required: layout::required_region_size::<T>(established),
                });
            }
        }

        Ok(SharedQueue { view })
    }

    /// Admit `value`, evicting the oldest non-important item if the queue is
    /// full. Returns `false` only when the queue is full and the oldest item
    /// is flagged important; nothing is mutated in that case.
    pub fn enqueue(&self, value: T, important: bool) -> bool {
        let control = self.view.control();
        let capacity = control.capacity();
        let mut pos = control.tail.load(Ordering::Relaxed);

        loop {
            let slot = self.view.slot(pos % capacity);
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                // Slot is free for this lap; claim the position.
                match control.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.data.get()).write(value) };
                        slot.important.store(important, Ordering::Relaxed);
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return true;
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // The slot still holds last lap's value: the queue is at
                // capacity and this is the single oldest occupied position.
                if slot.important.load(Ordering::Acquire) {
                    return false;
                }
                match control.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.data.get()).write(value) };
                        slot.important.store(important, Ordering::Relaxed);
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        // One item was discarded to make room, so move head
                        // past it. A failed exchange means a consumer
                        // dequeued it concurrently: delivered, not dropped,
                        // and head is already where it should be.
                        let evicted = pos.wrapping_sub(capacity);
                        let _ = control.head.compare_exchange(
                            evicted,
                            evicted.wrapping_add(1),
                            Ordering::AcqRel,
                            Ordering::Relaxed,
                        );
                        return true;
                    }
                    Err(current) => pos = current,
                }
            } else {
                // Stale tail: another producer advanced past this position.
                pos = control.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Take the oldest item, returning it together with its importance flag.
    /// `None` means the queue was empty from this consumer's viewpoint.
    pub fn dequeue(&self) -> Option<(T, bool)> {
        let control = self.view.control();
        let capacity = control.capacity();
        let mut pos = control.head.load(Ordering::Relaxed);

        loop {
            let slot = self.view.slot(pos % capacity);
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;

            if diff == 0 {
                match control.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.data.get()).assume_init_read() };
                        let important = slot.important.load(Ordering::Relaxed);
                        slot.important.store(false, Ordering::Relaxed);
                        // Free the slot for the next lap.
                        slot.sequence
                            .store(pos.wrapping_add(capacity), Ordering::Release);
                        return Some((value, important));
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                // Stale head: another consumer advanced past this position.
                pos = control.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Instantaneous `head == tail` snapshot; may be stale by the time the
    /// caller acts on it.
    pub fn is_empty(&self) -> bool {
        let control = self.view.control();
        let head = control.head.load(Ordering::Acquire);
        let tail = control.tail.load(Ordering::Acquire);
        head == tail
    }

    /// Occupancy derived from the cursors. The two loads are not a single
    /// atomic snapshot: between a producer's tail advance and its matching
    /// head advance during an eviction, the raw difference can read one past
    /// capacity, so the result is clamped. Treat it as an approximation
    /// under concurrency, not a basis for correctness decisions.
    pub fn len(&self) -> usize {
        let control = self.view.control();
        let head = control.head.load(Ordering::Acquire);
        let tail = control.tail.load(Ordering::Acquire);
        cmp::min(tail.wrapping_sub(head), control.capacity())
    }

    /// Capacity established when the region was constructed.
    pub fn capacity(&self) -> usize {
        self.view.control().capacity()
    }

    /// Construction state of the underlying region.
    pub fn state(&self) -> InitState {
        self.view.control().state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::HeapRegion;

    fn queue_of(region: &HeapRegion, capacity: usize) -> SharedQueue<u64> {
        SharedQueue::attach_with_capacity(region.base(), region.len(), capacity).unwrap()
    }

    #[test]
    fn fifo_order_without_eviction() {
        let region = HeapRegion::for_queue::<u64>(4);
        let queue = queue_of(&region, 4);

        for value in [10, 20, 30, 40] {
            assert!(queue.enqueue(value, false));
        }
        assert_eq!(queue.len(), 4);

        for expected in [10, 20, 30, 40] {
            assert_eq!(queue.dequeue(), Some((expected, false)));
        }
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn important_oldest_rejects_enqueue() {
        let region = HeapRegion::for_queue::<u64>(4);
        let queue = queue_of(&region, 4);

        assert!(queue.enqueue(1, true));
        for value in [2, 3, 4] {
            assert!(queue.enqueue(value, false));
        }

        // Full, oldest is protected: refused, and refused again.
        assert!(!queue.enqueue(5, false));
        assert!(!queue.enqueue(5, true));
        assert_eq!(queue.len(), 4);

        for expected in [(1, true), (2, false), (3, false), (4, false)] {
            assert_eq!(queue.dequeue(), Some(expected));
        }
    }

    #[test]
    fn eviction_drops_only_the_oldest() {
        let region = HeapRegion::for_queue::<u64>(4);
        let queue = queue_of(&region, 4);

        for value in [1, 2, 3, 4] {
            assert!(queue.enqueue(value, false));
        }
        assert!(queue.enqueue(5, false));
        assert_eq!(queue.len(), 4);

        for expected in [2, 3, 4, 5] {
            assert_eq!(queue.dequeue(), Some((expected, false)));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn eviction_can_repeat_across_laps() {
        let region = HeapRegion::for_queue::<u64>(2);
        let queue = queue_of(&region, 2);

        for value in 0..10 {
            assert!(queue.enqueue(value, false));
        }
        // Only the two newest survive.
        assert_eq!(queue.dequeue(), Some((8, false)));
        assert_eq!(queue.dequeue(), Some((9, false)));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn importance_flag_round_trips_and_clears() {
        let region = HeapRegion::for_queue::<u64>(4);
        let queue = queue_of(&region, 4);

        assert!(queue.enqueue(7, true));
        assert_eq!(queue.dequeue(), Some((7, true)));

        // The slot's flag was cleared on read; the next occupant of the same
        // physical slot starts unprotected.
        for value in [1, 2, 3, 4] {
            assert!(queue.enqueue(value, false));
        }
        assert!(queue.enqueue(5, false));
        assert_eq!(queue.dequeue(), Some((2, false)));
    }

    #[test]
    fn failed_enqueue_leaves_cursors_untouched() {
        let region = HeapRegion::for_queue::<u64>(2);
        let queue = queue_of(&region, 2);

        assert!(queue.enqueue(1, true));
        assert!(queue.enqueue(2, true));
        let len_before = queue.len();
        for _ in 0..100 {
            assert!(!queue.enqueue(9, false));
        }
        assert_eq!(queue.len(), len_before);
        assert_eq!(queue.dequeue(), Some((1, true)));
        assert_eq!(queue.dequeue(), Some((2, true)));
    }

    #[test]
    fn attach_derives_capacity_from_region_size() {
        let region = HeapRegion::for_queue::<u64>(8);
        let queue: SharedQueue<u64> = SharedQueue::attach(region.base(), region.len()).unwrap();
        assert_eq!(queue.capacity(), 8);
        assert_eq!(queue.state(), InitState::Initialized);
    }

    #[test]
    fn second_attach_adopts_established_capacity() {
        let region = HeapRegion::for_queue::<u64>(8);
        let first: SharedQueue<u64> =
            SharedQueue::attach_with_capacity(region.base(), region.len(), 4).unwrap();
        assert!(first.enqueue(42, false));

        // Derived and explicitly requested capacities are both overridden by
        // what the region already established.
        let second: SharedQueue<u64> = SharedQueue::attach(region.base(), region.len()).unwrap();
        assert_eq!(second.capacity(), 4);
        let third: SharedQueue<u64> =
            SharedQueue::attach_with_capacity(region.base(), region.len(), 8).unwrap();
        assert_eq!(third.capacity(), 4);

        // And the existing contents were left alone.
        assert_eq!(second.dequeue(), Some((42, false)));
    }

    #[test]
    fn attach_rejects_zero_capacity() {
        let region = HeapRegion::for_queue::<u64>(4);
        let result: Result<SharedQueue<u64>, _> =
            SharedQueue::attach_with_capacity(region.base(), region.len(), 0);
        assert!(matches!(result, Err(QueueError::RegionTooSmall { .. })));
    }

    #[test]
    fn attach_rejects_undersized_region() {
        let region = HeapRegion::for_queue::<u64>(4);
        let result: Result<SharedQueue<u64>, _> =
            SharedQueue::attach_with_capacity(region.base(), region.len(), 64);
        assert!(matches!(result, Err(QueueError::RegionTooSmall { .. })));
    }

    #[test]
    fn interleaved_enqueue_dequeue_keeps_order() {
        let region = HeapRegion::for_queue::<u64>(4);
        let queue = queue_of(&region, 4);

        assert!(queue.enqueue(1, false));
        assert!(queue.enqueue(2, false));
        assert_eq!(queue.dequeue(), Some((1, false)));
        assert!(queue.enqueue(3, false));
        assert!(queue.enqueue(4, false));
        assert!(queue.enqueue(5, false));
        assert_eq!(queue.len(), 4);
        for expected in [2, 3, 4, 5] {
            assert_eq!(queue.dequeue(), Some((expected, false)));
        }
    }
}
