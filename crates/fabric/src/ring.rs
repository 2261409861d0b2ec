//! Single-producer/single-consumer ring buffer with two-phase push and pop.
//!
//! # Design
//!
//! Producer and consumer each own one half of the ring. `push_begin` exposes
//! a window of free slots the producer fills in place; `push_commit`
//! publishes them with a Release store of the tail. The consumer mirrors
//! this with `pop_begin` (everything visible) and `pop_commit` (release
//! slots back to the producer).
//!
//! ```text
//! producer: write slots, Release-store tail
//!     -> consumer: Acquire-load tail, read slots
//! consumer: read slots, Release-store head
//!     -> producer: Acquire-load head, overwrite slots
//! ```
//!
//! The SPSC discipline is enforced by ownership. Each half is `Send` and
//! auto-`Sync`, but neither is `Clone` and every method that moves an index
//! takes `&mut self`, so exactly one caller can push and exactly one can pop
//! at any time. Shared references only reach the read-only accessors.
//!
//! Indices grow monotonically (wrapping) and are masked on access, so a full
//! ring is `tail - head == capacity` with no wasted slot.

use std::cell::UnsafeCell;
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::error::FabricError;

struct Shared<T> {
    slots: Box<[UnsafeCell<T>]>,
    mask: usize,
    /// Consumer's read index. Only the consumer stores it.
    head: CachePadded<AtomicUsize>,
    /// Producer's publish index. Only the producer stores it.
    tail: CachePadded<AtomicUsize>,
}

// SAFETY: producer and consumer touch disjoint slot ranges, and ownership of
// a range is handed over only through the Release/Acquire pairs on head/tail.
unsafe impl<T: Send> Sync for Shared<T> {}
unsafe impl<T: Send> Send for Shared<T> {}

impl<T> Shared<T> {
    fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn base(&self) -> *mut T {
        // UnsafeCell<T> has the same layout as T.
        self.slots.as_ptr() as *mut T
    }

    /// Split `count` slots starting at logical index `start` into the part
    /// before the physical end of the buffer and the wrapped remainder.
    fn split(&self, start: usize, count: usize) -> (usize, usize, usize) {
        let offset = start & self.mask;
        let first = count.min(self.capacity() - offset);
        (offset, first, count - first)
    }
}

/// Create a ring with `capacity` slots (a non-zero power of two).
pub fn channel<T: Copy + Default + Send>(
    capacity: usize,
) -> Result<(Producer<T>, Consumer<T>), FabricError> {
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(FabricError::InvalidCapacity(capacity));
    }
    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(T::default()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let shared = Arc::new(Shared {
        slots,
        mask: capacity - 1,
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
    });
    Ok((
        Producer {
            shared: shared.clone(),
            tail: 0,
            cached_head: 0,
            reserved: 0,
        },
        Consumer {
            shared,
            head: 0,
            exposed: 0,
        },
    ))
}

// ============================================================================
// Producer
// ============================================================================

pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    /// Local copy of the published tail; we are its only writer.
    tail: usize,
    /// Last observed consumer head, refreshed only when the ring looks full.
    cached_head: usize,
    /// Slots exposed by the last `push_begin` and not yet committed.
    reserved: usize,
}

impl<T: Copy> Producer<T> {
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Free slots as of now.
    pub fn free(&mut self) -> usize {
        self.cached_head = self.shared.head.load(Ordering::Acquire);
        self.capacity() - self.tail.wrapping_sub(self.cached_head)
    }

    /// Reserve `count` contiguous (modulo wrap) slots for writing.
    ///
    /// Nothing becomes visible to the consumer until [`push_commit`].
    /// A new `push_begin` replaces any uncommitted reservation.
    ///
    /// [`push_commit`]: Producer::push_commit
    pub fn push_begin(&mut self, count: usize) -> Result<PushWindow<'_, T>, FabricError> {
        let capacity = self.capacity();
        if self.tail.wrapping_sub(self.cached_head) + count > capacity {
            self.cached_head = self.shared.head.load(Ordering::Acquire);
            let used = self.tail.wrapping_sub(self.cached_head);
            if used + count > capacity {
                return Err(FabricError::QueueFull {
                    requested: count,
                    free: capacity - used,
                });
            }
        }
        self.reserved = count;

        let (offset, first, second) = self.shared.split(self.tail, count);
        let base = self.shared.base();
        // SAFETY: the `count` slots after `tail` are outside [head, tail), so
        // the consumer will not read them until we publish; `&mut self`
        // guarantees no other window aliases them.
        let (first, second) = unsafe {
            (
                std::slice::from_raw_parts_mut(base.add(offset), first),
                std::slice::from_raw_parts_mut(base, second),
            )
        };
        Ok(PushWindow { first, second })
    }

    /// Publish the first `count` reserved slots to the consumer.
    pub fn push_commit(&mut self, count: usize) {
        assert!(
            count <= self.reserved,
            "push_commit({count}) exceeds reservation of {}",
            self.reserved
        );
        self.reserved -= count;
        self.tail = self.tail.wrapping_add(count);
        self.shared.tail.store(self.tail, Ordering::Release);
    }
}

/// Writable view over reserved slots, possibly split at the buffer end.
pub struct PushWindow<'a, T> {
    first: &'a mut [T],
    second: &'a mut [T],
}

impl<T: Copy> PushWindow<'_, T> {
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Both halves, in ring order.
    pub fn as_mut_slices(&mut self) -> (&mut [T], &mut [T]) {
        (&mut *self.first, &mut *self.second)
    }

    /// Fill the window starting at `start` from `src`.
    pub fn copy_from_slice(&mut self, start: usize, src: &[T]) {
        assert!(start + src.len() <= self.len(), "copy exceeds push window");
        for (i, value) in src.iter().enumerate() {
            self[start + i] = *value;
        }
    }
}

impl<T> Index<usize> for PushWindow<'_, T> {
    type Output = T;

    fn index(&self, i: usize) -> &T {
        if i < self.first.len() {
            &self.first[i]
        } else {
            &self.second[i - self.first.len()]
        }
    }
}

impl<T> IndexMut<usize> for PushWindow<'_, T> {
    fn index_mut(&mut self, i: usize) -> &mut T {
        let split = self.first.len();
        if i < split {
            &mut self.first[i]
        } else {
            &mut self.second[i - split]
        }
    }
}

// ============================================================================
// Consumer
// ============================================================================

pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    /// Local copy of the published head; we are its only writer.
    head: usize,
    /// Slots exposed by the last `pop_begin`.
    exposed: usize,
}

impl<T: Copy> Consumer<T> {
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Slots currently published by the producer and not yet popped.
    pub fn len(&self) -> usize {
        self.shared
            .tail
            .load(Ordering::Acquire)
            .wrapping_sub(self.head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expose every currently visible slot. May be empty.
    pub fn pop_begin(&mut self) -> PopWindow<'_, T> {
        let available = self.len();
        self.exposed = available;

        let (offset, first, second) = self.shared.split(self.head, available);
        let base = self.shared.base();
        // SAFETY: [head, tail) was published by the producer with Release and
        // observed here with Acquire; the producer will not overwrite it until
        // we advance head.
        let (first, second) = unsafe {
            (
                std::slice::from_raw_parts(base.add(offset) as *const T, first),
                std::slice::from_raw_parts(base as *const T, second),
            )
        };
        PopWindow { first, second }
    }

    /// Release the first `count` exposed slots back to the producer.
    pub fn pop_commit(&mut self, count: usize) {
        assert!(
            count <= self.exposed,
            "pop_commit({count}) exceeds {} exposed slots",
            self.exposed
        );
        self.exposed -= count;
        self.head = self.head.wrapping_add(count);
        self.shared.head.store(self.head, Ordering::Release);
    }
}

/// Readable view over published slots, possibly split at the buffer end.
#[derive(Clone, Copy)]
pub struct PopWindow<'a, T> {
    first: &'a [T],
    second: &'a [T],
}

impl<'a, T> PopWindow<'a, T> {
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slices(&self) -> (&'a [T], &'a [T]) {
        (self.first, self.second)
    }

    /// Sub-window of `len` slots starting at `start`, as two slices.
    pub fn range(&self, start: usize, len: usize) -> (&'a [T], &'a [T]) {
        assert!(start + len <= self.len(), "range exceeds pop window");
        let split = self.first.len();
        if start >= split {
            let s = start - split;
            (&self.second[s..s + len], &[])
        } else if start + len <= split {
            (&self.first[start..start + len], &[])
        } else {
            (&self.first[start..], &self.second[..start + len - split])
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a T> {
        self.first.iter().chain(self.second.iter())
    }
}

impl<T> Index<usize> for PopWindow<'_, T> {
    type Output = T;

    fn index(&self, i: usize) -> &T {
        if i < self.first.len() {
            &self.first[i]
        } else {
            &self.second[i - self.first.len()]
        }
    }
}
