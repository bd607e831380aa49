//! Bump allocation arena for native descriptor construction
//!
//! Calls into the filtering engine take nested descriptor structures by
//! address: a filter points at its condition array, each condition points at
//! its value, values point at strings and blobs. Tracking each of those
//! allocations individually would leak bookkeeping into every call site, so a
//! top-level operation creates one [`Arena`], builds the whole descriptor tree
//! out of it, makes the engine call, and drops the arena.
//!
//! Regions are handed out as references bound to the arena's lifetime, so the
//! borrow checker refuses to dispose of the arena while any descriptor built
//! from it is still reachable.
//!
//! # Invariants
//!
//! - Every region lies entirely within one slab
//! - Every region is zero-initialised
//! - Every region starts on an [`ALIGNMENT`]-byte boundary
//!
//! Zero-length and oversized requests are logic errors in descriptor
//! construction and panic.

use std::alloc::{self, Layout};
use std::cell::{Cell, RefCell};
use std::mem;
use std::ptr::NonNull;
use std::slice;

use tracing::trace;

/// Default slab size in bytes.
pub const SLAB_SIZE: usize = 4096;

/// Alignment of every region returned by the arena.
pub const ALIGNMENT: usize = 8;

/// One contiguous block owned by the arena.
struct Slab {
    ptr: NonNull<u8>,
    layout: Layout,
}

/// Bump allocator over slabs of zeroed heap memory.
///
/// Not `Sync`: an arena belongs to a single operation on a single thread.
pub struct Arena {
    slabs: RefCell<Vec<Slab>>,
    slab_size: usize,
    /// Offset of the cursor within the newest slab.
    next: Cell<usize>,
    /// Bytes left in the newest slab after the cursor.
    remaining: Cell<usize>,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena {
    /// Creates an empty arena using [`SLAB_SIZE`] slabs. No memory is
    /// allocated until the first request.
    pub fn new() -> Self {
        Self::with_slab_size(SLAB_SIZE)
    }

    /// Creates an empty arena with a custom slab size.
    ///
    /// # Panics
    ///
    /// Panics if `slab_size` is zero or not a multiple of [`ALIGNMENT`].
    pub fn with_slab_size(slab_size: usize) -> Self {
        assert!(
            slab_size > 0 && slab_size % ALIGNMENT == 0,
            "slab size must be a non-zero multiple of {ALIGNMENT} (got {slab_size})"
        );
        Self {
            slabs: RefCell::new(Vec::new()),
            slab_size,
            next: Cell::new(0),
            remaining: Cell::new(0),
        }
    }

    /// Largest single request the arena accepts.
    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    /// Number of slabs currently held.
    pub fn slab_count(&self) -> usize {
        self.slabs.borrow().len()
    }

    /// Appends a fresh zeroed slab able to hold at least `min_len` bytes and
    /// points the cursor at its start.
    fn grow(&self, min_len: usize) {
        let size = self.slab_size.max(min_len);
        let layout = match Layout::from_size_align(size, ALIGNMENT) {
            Ok(layout) => layout,
            Err(e) => panic!("invalid slab layout ({size} bytes): {e}"),
        };
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };

        let mut slabs = self.slabs.borrow_mut();
        slabs.push(Slab { ptr, layout });
        self.next.set(0);
        self.remaining.set(size);
        trace!(slabs = slabs.len(), size, "arena grew");
    }

    /// Rounds the cursor up to the alignment boundary, consuming slack.
    fn align(&self) {
        let offset = self.next.get() % ALIGNMENT;
        if offset != 0 {
            let pad = (ALIGNMENT - offset).min(self.remaining.get());
            self.next.set(self.next.get() + pad);
            self.remaining.set(self.remaining.get() - pad);
        }
    }

    /// Returns a zeroed, [`ALIGNMENT`]-aligned region of `len` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or larger than the slab size.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_bytes(&self, len: usize) -> &mut [u8] {
        let ptr = self.alloc_raw(len);
        // SAFETY: alloc_raw returns `len` zeroed bytes inside a live slab that
        // no other region overlaps; the slab lives until dispose(&mut self).
        unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), len) }
    }

    fn alloc_raw(&self, len: usize) -> NonNull<u8> {
        assert!(len != 0, "can't allocate zero bytes");
        assert!(
            len <= self.slab_size,
            "can't allocate something that big ({len} bytes)"
        );

        self.align();
        if len > self.remaining.get() {
            self.grow(len);
        }

        let slabs = self.slabs.borrow();
        let Some(slab) = slabs.last() else {
            unreachable!("grow always leaves a current slab");
        };
        let offset = self.next.get();
        // SAFETY: offset + len <= slab size, checked against `remaining`.
        let ptr = unsafe { slab.ptr.add(offset) };
        self.next.set(offset + len);
        self.remaining.set(self.remaining.get() - len);
        ptr
    }

    /// Moves `value` into the arena.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or needs more than [`ALIGNMENT`] alignment.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc<T: Copy>(&self, value: T) -> &mut T {
        Self::check_layout::<T>();
        let ptr = self.alloc_raw(mem::size_of::<T>()).cast::<T>();
        // SAFETY: region is sized and aligned for T and exclusively ours.
        unsafe {
            ptr.as_ptr().write(value);
            &mut *ptr.as_ptr()
        }
    }

    /// Copies `src` into a contiguous arena region.
    ///
    /// # Panics
    ///
    /// Panics if `src` is empty, the copy exceeds the slab size, or `T` needs
    /// more than [`ALIGNMENT`] alignment.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice_copy<T: Copy>(&self, src: &[T]) -> &mut [T] {
        Self::check_layout::<T>();
        let Some(len) = mem::size_of::<T>().checked_mul(src.len()) else {
            panic!("can't allocate something that big ({} elements)", src.len());
        };
        let ptr = self.alloc_raw(len).cast::<T>();
        // SAFETY: region holds src.len() elements of T, aligned, not
        // overlapping `src` (which lives outside the arena or in an earlier
        // region).
        unsafe {
            ptr.as_ptr().copy_from_nonoverlapping(src.as_ptr(), src.len());
            slice::from_raw_parts_mut(ptr.as_ptr(), src.len())
        }
    }

    fn check_layout<T>() {
        assert!(mem::size_of::<T>() != 0, "can't allocate zero bytes");
        assert!(
            mem::align_of::<T>() <= ALIGNMENT,
            "type alignment {} exceeds arena alignment {ALIGNMENT}",
            mem::align_of::<T>()
        );
    }

    /// Frees every slab. The arena can be used again afterwards.
    pub fn dispose(&mut self) {
        let slabs = self.slabs.get_mut();
        let count = slabs.len();
        for slab in slabs.drain(..) {
            // SAFETY: each slab was allocated with exactly this layout and is
            // freed once, here.
            unsafe { alloc::dealloc(slab.ptr.as_ptr(), slab.layout) };
        }
        self.next.set(0);
        self.remaining.set(0);
        if count > 0 {
            trace!(slabs = count, "arena disposed");
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr<T>(r: &T) -> usize {
        std::ptr::from_ref(r) as *const u8 as usize
    }

    #[test]
    fn test_allocations_land_on_boundary() {
        let arena = Arena::new();
        // 8 through 15 bytes: every one must start on the boundary
        for i in 0..ALIGNMENT {
            let region = arena.alloc_bytes(mem::size_of::<u64>() + i);
            assert_eq!(region.as_ptr() as usize % ALIGNMENT, 0);
            region[0] = 0xAA;
        }
    }

    #[test]
    fn test_regions_are_zeroed() {
        let arena = Arena::new();
        let region = arena.alloc_bytes(64);
        assert!(region.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_span_slabs_with_rounding() {
        let arena = Arena::new();
        // Almost a full slab: alignment rounds the cursor to the end
        let big = arena.alloc_bytes(SLAB_SIZE - ALIGNMENT / 2);
        big.fill(0x11);

        let next = arena.alloc(0u64);
        *next = u64::MAX;
        assert_eq!(arena.slab_count(), 2);
        assert!(big.iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_span_slabs_with_rounding_smaller() {
        let arena = Arena::new();
        let big = arena.alloc_bytes(SLAB_SIZE - ALIGNMENT / 2);
        big.fill(0x22);

        // Alignment eats the last slack, so even one byte needs a new slab
        let small = arena.alloc_bytes(1);
        small[0] = 0x33;
        assert_eq!(arena.slab_count(), 2);

        // Cursor is misaligned inside the second slab; padding still fits
        let word = arena.alloc(7u64);
        assert_eq!(*word, 7);
        assert_eq!(addr(word) % ALIGNMENT, 0);
        assert_eq!(arena.slab_count(), 2);
        assert!(big.iter().all(|&b| b == 0x22));
        assert_eq!(small[0], 0x33);
    }

    #[test]
    fn test_full_slab_request_after_partial_slab() {
        let arena = Arena::new();
        arena.alloc_bytes(SLAB_SIZE - ALIGNMENT / 2);
        arena.alloc_bytes(1);
        arena.alloc_bytes(ALIGNMENT);

        let whole = arena.alloc_bytes(SLAB_SIZE);
        whole[SLAB_SIZE - 1] = 1;
        let tail = arena.alloc_bytes(1);
        tail[0] = 2;

        assert_eq!(arena.slab_count(), 4);
        assert_eq!(whole[SLAB_SIZE - 1], 1);
    }

    #[test]
    fn test_span_slab_without_rounding() {
        let arena = Arena::new();
        // Leave more than one boundary's worth of slack
        arena.alloc_bytes(SLAB_SIZE - ALIGNMENT * 2);
        // Asking for more than the slack forces a new slab
        let region = arena.alloc_bytes(ALIGNMENT * 3);
        region.fill(0xFF);
        assert_eq!(arena.slab_count(), 2);
    }

    #[test]
    fn test_typed_slice_copy() {
        let arena = Arena::new();
        let units: Vec<u16> = "filter".encode_utf16().collect();
        let copy = arena.alloc_slice_copy(&units);
        assert_eq!(copy, units.as_slice());
        assert_eq!(copy.as_ptr() as usize % ALIGNMENT, 0);
    }

    #[test]
    fn test_dispose_then_reuse_matches_fresh_arena() {
        let mut used = Arena::new();
        used.alloc_bytes(SLAB_SIZE);
        used.alloc_bytes(10);
        used.dispose();
        assert_eq!(used.slab_count(), 0);

        let fresh = Arena::new();
        for len in [3, SLAB_SIZE - 8, 9, 1] {
            let a = used.alloc_bytes(len);
            let b = fresh.alloc_bytes(len);
            assert_eq!(a.len(), b.len());
            assert!(a.iter().all(|&x| x == 0));
            assert_eq!(used.slab_count(), fresh.slab_count());
        }
    }

    #[test]
    fn test_dispose_twice_is_harmless() {
        let mut arena = Arena::new();
        arena.alloc_bytes(16);
        arena.dispose();
        arena.dispose();
        assert_eq!(arena.slab_count(), 0);
    }

    #[test]
    #[should_panic(expected = "can't allocate zero bytes")]
    fn test_zero_length_panics() {
        Arena::new().alloc_bytes(0);
    }

    #[test]
    #[should_panic(expected = "can't allocate something that big")]
    fn test_oversized_panics() {
        Arena::new().alloc_bytes(SLAB_SIZE + 1);
    }

    #[test]
    #[should_panic(expected = "non-zero multiple")]
    fn test_misaligned_slab_size_panics() {
        let _ = Arena::with_slab_size(12);
    }

    proptest! {
        #[test]
        fn prop_every_size_is_aligned(len in 1usize..=SLAB_SIZE) {
            let arena = Arena::new();
            arena.alloc_bytes(1);
            let region = arena.alloc_bytes(len);
            prop_assert_eq!(region.as_ptr() as usize % ALIGNMENT, 0);
            prop_assert_eq!(region.len(), len);
        }

        #[test]
        fn prop_slab_transitions_preserve_earlier_regions(
            sizes in proptest::collection::vec(1usize..=SLAB_SIZE / 2, 1..40)
        ) {
            let arena = Arena::with_slab_size(SLAB_SIZE / 2);
            let mut regions = Vec::new();
            for (i, len) in sizes.iter().enumerate() {
                let region = arena.alloc_bytes(*len);
                prop_assert!(region.iter().all(|&b| b == 0));
                region.fill(i as u8);
                regions.push(region);
            }
            for (i, region) in regions.iter().enumerate() {
                prop_assert!(region.iter().all(|&b| b == i as u8));
            }
        }
    }
}
