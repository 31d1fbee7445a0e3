// Memory pool allocator
//
// A generic typed memory pool for zero-allocation object management after
// initialization. Blocks are addressed by stable indices so that records
// can hold intrusive links to each other without reference counting.
//
// # Safety Invariants
//
// This pool uses interior mutability via UnsafeCell for single-threaded
// performance. The following invariants must be maintained:
//
// 1. Single-threaded access only - no concurrent access to the same pool
// 2. An index must only be used with the pool that issued it
// 3. An index must not be used after deallocation (use-after-free)
// 4. Each block must be deallocated exactly once; a double free is a
//    fatal invariant violation, not undefined behavior

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

use crate::fatal;

/// A pre-allocated pool of N objects of type T.
///
/// `allocate` constructs a value in place and returns a stable index;
/// `deallocate` destroys it and returns the block. Allocation scans from a
/// `next_free` hint, and deallocation points the hint back at the freed
/// block to bias reuse toward LIFO order for cache locality.
///
/// # Safety
///
/// This type is designed for **single-threaded use only**. Using it from
/// multiple threads simultaneously is undefined behavior.
pub struct MemPool<T, const N: usize> {
    /// Storage for pool objects. A block is initialized exactly while its
    /// `is_free` flag is false.
    storage: UnsafeCell<[MaybeUninit<T>; N]>,

    /// Per-block free flag.
    is_free: UnsafeCell<[bool; N]>,

    /// Index the next allocation probes first.
    next_free: UnsafeCell<usize>,

    /// Number of free blocks remaining.
    free_count: UnsafeCell<usize>,
}

impl<T, const N: usize> MemPool<T, N> {
    /// Creates a new memory pool with all N blocks available.
    ///
    /// # Warning
    ///
    /// For large pools the arrays are created on the stack before being
    /// returned; use `new_boxed()` instead.
    ///
    /// # Panics
    ///
    /// Panics if N is 0.
    pub fn new() -> Self {
        assert!(N > 0, "MemPool capacity must be greater than 0");

        Self {
            // SAFETY: MaybeUninit doesn't require initialization
            storage: UnsafeCell::new(unsafe {
                MaybeUninit::<[MaybeUninit<T>; N]>::uninit().assume_init()
            }),
            is_free: UnsafeCell::new([true; N]),
            next_free: UnsafeCell::new(0),
            free_count: UnsafeCell::new(N),
        }
    }

    /// Creates a new memory pool directly on the heap, avoiding stack
    /// overflow for large pools.
    ///
    /// # Panics
    ///
    /// Panics if N is 0.
    pub fn new_boxed() -> Box<Self> {
        assert!(N > 0, "MemPool capacity must be greater than 0");

        use std::alloc::{alloc_zeroed, handle_alloc_error, Layout};

        let layout = Layout::new::<Self>();
        // SAFETY: the layout is valid for Self. Zeroed memory leaves the
        // storage uninitialized (fine for MaybeUninit) and next_free at 0;
        // the free flags and free count are then written explicitly.
        unsafe {
            let ptr = alloc_zeroed(layout) as *mut Self;
            if ptr.is_null() {
                handle_alloc_error(layout);
            }

            let is_free = std::ptr::addr_of_mut!((*ptr).is_free) as *mut [bool; N];
            for flag in (*is_free).iter_mut() {
                *flag = true;
            }
            let free_count = std::ptr::addr_of_mut!((*ptr).free_count) as *mut usize;
            std::ptr::write(free_count, N);

            Box::from_raw(ptr)
        }
    }

    /// Allocates a block, constructing `value` in place.
    ///
    /// Returns the block's index, or `None` if the pool is exhausted.
    /// Over-allocation never corrupts the pool.
    ///
    /// # Performance
    ///
    /// O(1) amortized: the `next_free` hint is correct whenever the last
    /// operation was a deallocation, and the probe advances past runs of
    /// live blocks otherwise.
    #[inline]
    pub fn allocate(&self, value: T) -> Option<usize> {
        // SAFETY: single-threaded access is required by the type's contract
        unsafe {
            if *self.free_count.get() == 0 {
                return None;
            }

            let is_free = &mut *self.is_free.get();
            let mut idx = *self.next_free.get();
            for _ in 0..N {
                if is_free[idx] {
                    is_free[idx] = false;
                    *self.free_count.get() -= 1;
                    (*self.storage.get())[idx].write(value);
                    *self.next_free.get() = if idx + 1 == N { 0 } else { idx + 1 };
                    return Some(idx);
                }
                idx = if idx + 1 == N { 0 } else { idx + 1 };
            }

            // free_count said a block exists; the scan must find it
            fatal!("<MemPool> free count and free flags disagree");
        }
    }

    /// Returns a block to the pool, dropping the value in place.
    ///
    /// The freed index becomes the next allocation hint.
    ///
    /// # Fatal
    ///
    /// An out-of-range index or a block that is already free terminates
    /// the process: the pool refuses to continue in an inconsistent state.
    #[inline]
    pub fn deallocate(&self, index: usize) {
        if index >= N {
            fatal!("<MemPool> deallocate of foreign index {} (capacity {})", index, N);
        }

        // SAFETY: single-threaded access is required by the type's contract
        unsafe {
            let is_free = &mut *self.is_free.get();
            if is_free[index] {
                fatal!("<MemPool> double free of block {}", index);
            }

            (*self.storage.get())[index].assume_init_drop();
            is_free[index] = true;
            *self.free_count.get() += 1;
            *self.next_free.get() = index;
        }
    }

    /// Returns a shared reference to the block at `index`.
    ///
    /// # Safety contract
    ///
    /// The index must refer to a currently-allocated block; no mutable
    /// reference to the same block may exist.
    #[inline]
    pub fn get(&self, index: usize) -> &T {
        debug_assert!(index < N, "index out of bounds");
        // SAFETY: caller guarantees the block is allocated and unaliased
        unsafe {
            debug_assert!(!(*self.is_free.get())[index], "access to free block");
            &*(*self.storage.get())[index].as_ptr()
        }
    }

    /// Returns a mutable reference to the block at `index`.
    ///
    /// # Safety contract
    ///
    /// The index must refer to a currently-allocated block; no other
    /// reference to the same block may exist.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub fn get_mut(&self, index: usize) -> &mut T {
        debug_assert!(index < N, "index out of bounds");
        // SAFETY: caller guarantees the block is allocated and unaliased;
        // interior mutability is used intentionally for single-threaded
        // performance.
        unsafe {
            debug_assert!(!(*self.is_free.get())[index], "access to free block");
            &mut *(*self.storage.get())[index].as_mut_ptr()
        }
    }

    /// Returns the number of available (free) blocks.
    #[inline]
    pub fn available(&self) -> usize {
        // SAFETY: single-threaded access is required by the contract
        unsafe { *self.free_count.get() }
    }

    /// Returns the total capacity of the pool.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T, const N: usize> Default for MemPool<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for MemPool<T, N> {
    fn drop(&mut self) {
        // Drop any blocks still live
        unsafe {
            let is_free = &*self.is_free.get();
            for (idx, free) in is_free.iter().enumerate() {
                if !free {
                    (*self.storage.get())[idx].assume_init_drop();
                }
            }
        }
    }
}

// SAFETY: the pool can move between threads, but must only be used from
// one thread at a time. Sync is intentionally NOT implemented.
unsafe impl<T: Send, const N: usize> Send for MemPool<T, N> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_and_deallocation() {
        let pool: MemPool<u64, 4> = MemPool::new();

        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);

        let idx = pool.allocate(0u64).expect("should allocate");
        assert_eq!(pool.available(), 3);

        *pool.get_mut(idx) = 42;
        assert_eq!(*pool.get(idx), 42);

        pool.deallocate(idx);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_pool_exhaustion() {
        let pool: MemPool<u32, 2> = MemPool::new();

        let a = pool.allocate(1).expect("first allocation");
        let b = pool.allocate(2).expect("second allocation");

        assert_eq!(pool.available(), 0);

        // Over-allocation returns None, repeatedly
        assert!(pool.allocate(3).is_none());
        assert!(pool.allocate(4).is_none());

        // And the live blocks are untouched
        assert_eq!(*pool.get(a), 1);
        assert_eq!(*pool.get(b), 2);

        pool.deallocate(a);
        pool.deallocate(b);
    }

    #[test]
    fn test_lifo_reuse_of_freed_block() {
        let pool: MemPool<i32, 4> = MemPool::new();

        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(200).unwrap();

        pool.deallocate(a);

        // The freed index is the next allocation hint
        let c = pool.allocate(300).unwrap();
        assert_eq!(c, a);
        assert_eq!(*pool.get(c), 300);
        assert_eq!(*pool.get(b), 200);

        pool.deallocate(b);
        pool.deallocate(c);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_probe_skips_live_blocks() {
        let pool: MemPool<u8, 4> = MemPool::new();

        let a = pool.allocate(1).unwrap();
        let b = pool.allocate(2).unwrap();
        let c = pool.allocate(3).unwrap();

        // Free the middle block, then exhaust: the probe must wrap past
        // live blocks and find every remaining free slot.
        pool.deallocate(b);
        let d = pool.allocate(4).unwrap();
        assert_eq!(d, b);
        let e = pool.allocate(5).unwrap();

        assert_eq!(pool.available(), 0);
        assert_eq!(*pool.get(a), 1);
        assert_eq!(*pool.get(c), 3);
        assert_eq!(*pool.get(d), 4);
        assert_eq!(*pool.get(e), 5);

        pool.deallocate(a);
        pool.deallocate(c);
        pool.deallocate(d);
        pool.deallocate(e);
    }

    #[test]
    fn test_full_capacity_usage() {
        const SIZE: usize = 64;
        let pool: MemPool<usize, SIZE> = MemPool::new();

        let mut indices = Vec::with_capacity(SIZE);
        for i in 0..SIZE {
            let idx = pool.allocate(i).expect("should allocate");
            indices.push(idx);
        }

        assert_eq!(pool.available(), 0);
        assert!(pool.allocate(0).is_none());

        for (i, &idx) in indices.iter().enumerate() {
            assert_eq!(*pool.get(idx), i);
        }

        for idx in indices {
            pool.deallocate(idx);
        }

        assert_eq!(pool.available(), SIZE);
    }

    #[test]
    fn test_new_boxed_large_pool() {
        let pool: Box<MemPool<u64, 8192>> = MemPool::new_boxed();
        assert_eq!(pool.available(), 8192);

        let idx = pool.allocate(7).unwrap();
        assert_eq!(*pool.get(idx), 7);
        pool.deallocate(idx);
        assert_eq!(pool.available(), 8192);
    }

    #[test]
    fn test_drop_runs_destructors_of_live_blocks() {
        use std::rc::Rc;

        let witness = Rc::new(());
        {
            let pool: MemPool<Rc<()>, 4> = MemPool::new();
            let _a = pool.allocate(Rc::clone(&witness)).unwrap();
            let b = pool.allocate(Rc::clone(&witness)).unwrap();
            pool.deallocate(b);
            assert_eq!(Rc::strong_count(&witness), 2);
            // _a is still live when the pool drops
        }
        assert_eq!(Rc::strong_count(&witness), 1);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_is_fatal() {
        let pool: MemPool<u32, 2> = MemPool::new();
        let idx = pool.allocate(1).unwrap();
        pool.deallocate(idx);
        pool.deallocate(idx);
    }

    #[test]
    #[should_panic(expected = "foreign index")]
    fn test_foreign_index_is_fatal() {
        let pool: MemPool<u32, 2> = MemPool::new();
        pool.deallocate(7);
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn test_zero_capacity_panics() {
        let _pool: MemPool<u8, 0> = MemPool::new();
    }

    #[test]
    fn test_with_complex_type() {
        struct Order {
            id: u64,
            price: i64,
            quantity: u32,
        }

        let pool: MemPool<Order, 8> = MemPool::new();

        let idx = pool
            .allocate(Order {
                id: 12345,
                price: 9999,
                quantity: 100,
            })
            .unwrap();

        let order = pool.get(idx);
        assert_eq!(order.id, 12345);
        assert_eq!(order.price, 9999);
        assert_eq!(order.quantity, 100);

        pool.deallocate(idx);
    }
}
