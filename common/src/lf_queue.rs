// Lock-free SPSC queue
//
// A bounded single-producer single-consumer ring of fixed-size records,
// used to carry requests, responses, and market updates between pinned
// threads. The shared occupancy count is the publication gate: the
// producer releases it after the payload store, the consumer acquires it
// before the payload load.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cache-line aligned producer cursor.
/// Separated from the consumer cursor to prevent false sharing.
#[repr(align(64))]
struct ProducerCursor {
    /// Next slot the producer writes. Only touched by the producer thread.
    write_idx: UnsafeCell<usize>,
}

/// Cache-line aligned consumer cursor.
#[repr(align(64))]
struct ConsumerCursor {
    /// Next slot the consumer reads. Only touched by the consumer thread.
    read_idx: UnsafeCell<usize>,
}

/// Cache-line aligned occupancy count, shared by both sides.
#[repr(align(64))]
struct Occupancy {
    count: AtomicUsize,
}

/// A lock-free single-producer single-consumer (SPSC) queue.
///
/// # Type Parameters
/// - `T`: The type of elements stored in the queue
/// - `N`: The capacity of the queue
///
/// # Memory Ordering
/// - Producer: payload store, then `count.fetch_add` with Release
/// - Consumer: `count` load with Acquire, then payload load
/// - Consumer: payload load, then `count.fetch_sub` with Release
/// - Producer: `count` load with Acquire before reusing a slot
///
/// # Safety
/// - Only one thread may call `push` (the producer)
/// - Only one (distinct) thread may call `pop` (the consumer)
/// - `len`, `is_empty`, `is_full`, `capacity` are safe from either side
pub struct LFQueue<T, const N: usize> {
    /// The storage buffer. MaybeUninit because slots outside the
    /// [read_idx, write_idx) window hold no live value.
    buffer: UnsafeCell<[MaybeUninit<T>; N]>,

    producer: ProducerCursor,
    consumer: ConsumerCursor,
    occupancy: Occupancy,
}

// SAFETY: LFQueue transfers ownership of T values between threads.
unsafe impl<T: Send, const N: usize> Send for LFQueue<T, N> {}

// SAFETY: only the producer writes write_idx, only the consumer writes
// read_idx, and the occupancy count synchronizes payload visibility.
unsafe impl<T: Send, const N: usize> Sync for LFQueue<T, N> {}

impl<T, const N: usize> LFQueue<T, N> {
    /// Creates a new empty queue.
    ///
    /// # Panics
    /// Panics if N is 0.
    pub fn new() -> Self {
        assert!(N > 0, "Capacity must be greater than 0");

        Self {
            // SAFETY: MaybeUninit doesn't require initialization
            buffer: UnsafeCell::new(unsafe {
                MaybeUninit::<[MaybeUninit<T>; N]>::uninit().assume_init()
            }),
            producer: ProducerCursor {
                write_idx: UnsafeCell::new(0),
            },
            consumer: ConsumerCursor {
                read_idx: UnsafeCell::new(0),
            },
            occupancy: Occupancy {
                count: AtomicUsize::new(0),
            },
        }
    }

    /// Creates a new queue directly on the heap, avoiding stack overflow
    /// for large capacities (the buffer is an inline array).
    ///
    /// # Panics
    /// Panics if N is 0.
    pub fn new_boxed() -> Box<Self> {
        assert!(N > 0, "Capacity must be greater than 0");

        use std::alloc::{alloc_zeroed, handle_alloc_error, Layout};

        let layout = Layout::new::<Self>();
        // SAFETY: the layout is valid for Self. All-zero bytes are a valid
        // representation: both cursors at 0, count 0, buffer uninitialized.
        unsafe {
            let ptr = alloc_zeroed(layout) as *mut Self;
            if ptr.is_null() {
                handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        }
    }

    /// Attempts to push an item onto the queue.
    ///
    /// # Returns
    /// * `Ok(())` if the item was pushed
    /// * `Err(item)` if the queue is full, returning ownership of the item
    ///
    /// # Safety
    /// Must only be called from the producer thread.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        // Acquire pairs with the consumer's Release decrement: a slot is
        // only reused after the consumer has fully read it out.
        if self.occupancy.count.load(Ordering::Acquire) == N {
            return Err(item);
        }

        // SAFETY: we are the only producer; count < N guarantees the slot
        // at write_idx holds no unread value.
        unsafe {
            let idx = *self.producer.write_idx.get();
            (*self.buffer.get())[idx].write(item);
            *self.producer.write_idx.get() = if idx + 1 == N { 0 } else { idx + 1 };
        }

        // Publish: the payload store above becomes visible to the consumer
        // before the incremented count.
        self.occupancy.count.fetch_add(1, Ordering::Release);

        Ok(())
    }

    /// Attempts to pop an item from the queue.
    ///
    /// # Returns
    /// * `Some(item)` if an item was available
    /// * `None` if the queue is empty
    ///
    /// # Safety
    /// Must only be called from the consumer thread.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        // Acquire pairs with the producer's Release increment, making the
        // payload store visible before we read the slot.
        if self.occupancy.count.load(Ordering::Acquire) == 0 {
            return None;
        }

        // SAFETY: we are the only consumer; count > 0 guarantees the slot
        // at read_idx holds a published value.
        let item = unsafe {
            let idx = *self.consumer.read_idx.get();
            let item = (*self.buffer.get())[idx].assume_init_read();
            *self.consumer.read_idx.get() = if idx + 1 == N { 0 } else { idx + 1 };
            item
        };

        // Release the slot back to the producer.
        self.occupancy.count.fetch_sub(1, Ordering::Release);

        Some(item)
    }

    /// Returns the current number of items in the queue.
    ///
    /// Observable from either side; the value may change immediately
    /// after reading.
    #[inline]
    pub fn len(&self) -> usize {
        self.occupancy.count.load(Ordering::Relaxed)
    }

    /// Returns true if the queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the queue is full.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Returns the capacity of the queue.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T, const N: usize> Default for LFQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for LFQueue<T, N> {
    fn drop(&mut self) {
        // Drop any remaining items in the queue
        while self.pop().is_some() {}
    }
}
