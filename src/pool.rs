//! The pool header and the allocator entry points (`malloc`, `calloc`,
//! `realloc`, `free`, `permalloc`, `usable_size`).
//!
//! Unlike `rlsf::Tlsf`, whose bitmaps and free-list heads live in an
//! ordinary Rust value the caller keeps around next to the pool, this
//! header is written *into* the first bytes of the caller-supplied region
//! itself — the region is the allocator's only storage, so its own
//! bookkeeping has to live there too. [`Pool`] is consequently a thin,
//! non-owning handle: a `NonNull<PoolHeader>` plus the methods that know how
//! to walk the blocks that follow it.

use core::cell::Cell;
use core::ptr::NonNull;

use crate::block::{self, BlockPtr};
use crate::config::{self, HDR_SIZE, MIN_BLOCK_SIZE};
use crate::index::FreeIndex;

#[cfg(feature = "debug")]
use crate::diag::Statistics;

/// Reasons [`Pool::init`] can refuse a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// The region is too small to hold a header, one real block and a
    /// sentinel.
    RegionTooSmall,
    /// The region is larger than [`config::MAX_POOL_SIZE`] can address.
    RegionTooLarge,
}

#[repr(C)]
struct PoolHeader {
    region_size: usize,
    sentinel: Cell<BlockPtr>,
    index: FreeIndex,
    #[cfg(feature = "debug")]
    stats: Statistics,
    #[cfg(feature = "debug")]
    last_error: Cell<Option<&'static str>>,
}

/// A non-owning handle to a fixed memory region managed as a TLSF pool.
///
/// Every method is `unsafe` at the boundary of the region it was created
/// from: the caller must not let two [`Pool`] handles alias the same region
/// and must keep the region alive and unaliased by anything else for as
/// long as the handle is used, same contract `GlobalAlloc` implementors
/// hold themselves to.
pub struct Pool {
    header: NonNull<PoolHeader>,
}

impl Pool {
    /// Lay out a fresh pool inside `region`, `region_size` bytes long.
    ///
    /// # Safety
    /// `region` must be valid for reads and writes for `region_size` bytes,
    /// and that memory must not be accessed by anything else for as long as
    /// the returned [`Pool`] (or any pointer it hands out) is alive.
    pub unsafe fn init(region: NonNull<u8>, region_size: usize) -> Result<Pool, InitError> {
        let header_size = config::align_up(core::mem::size_of::<PoolHeader>());
        let min_total = header_size + MIN_BLOCK_SIZE + HDR_SIZE;
        if region_size < min_total {
            return Err(InitError::RegionTooSmall);
        }
        if region_size > config::MAX_POOL_SIZE {
            return Err(InitError::RegionTooLarge);
        }

        let header_ptr: NonNull<PoolHeader> = region.cast();
        let first_block = NonNull::new_unchecked(region.as_ptr().add(header_size));
        let sentinel = NonNull::new_unchecked(region.as_ptr().add(region_size - HDR_SIZE));
        let first_block_size = (sentinel.as_ptr() as usize) - (first_block.as_ptr() as usize);

        header_ptr.as_ptr().write(PoolHeader {
            region_size,
            sentinel: Cell::new(sentinel),
            index: FreeIndex::INIT,
            #[cfg(feature = "debug")]
            stats: Statistics::EMPTY,
            #[cfg(feature = "debug")]
            last_error: Cell::new(None),
        });

        // The first block has no real physical predecessor, so its
        // `PREV_USED` bit is set to keep `free` from ever trying to merge
        // backward past the start of the region.
        block::set_header(first_block, first_block_size, false, true);
        block::set_header(sentinel, HDR_SIZE, true, false);

        let mut pool = Pool { header: header_ptr };
        pool.header_mut().index.add_free(first_block);

        Ok(pool)
    }

    #[inline]
    fn header(&self) -> &PoolHeader {
        unsafe { self.header.as_ref() }
    }

    #[inline]
    fn header_mut(&mut self) -> &mut PoolHeader {
        unsafe { self.header.as_mut() }
    }

    /// Total size of the region backing this pool, header included.
    pub fn region_size(&self) -> usize {
        self.header().region_size
    }

    fn required_block_size(payload_size: usize) -> usize {
        config::align_up(payload_size)
            .saturating_add(HDR_SIZE)
            .max(MIN_BLOCK_SIZE)
    }

    /// Mark `block` used at `used_size` bytes (header included), splitting
    /// off a free remainder when at least [`MIN_BLOCK_SIZE`] bytes would be
    /// left over, and fixing up the following block's `PREV_USED` bit.
    ///
    /// # Safety
    /// `block` must currently be unlinked from every free list and at least
    /// `used_size` bytes long.
    unsafe fn commit_used(&mut self, block: BlockPtr, used_size: usize, prev_used: bool) {
        let total = block::size(block);
        debug_assert!(total >= used_size);
        // A remainder of exactly `MIN_BLOCK_SIZE` is left attached rather
        // than split off: splitting is only worthwhile when the leftover
        // block would itself be usable, and a bare-minimum block is
        // marginal enough that carrying a few extra bytes on the live
        // allocation instead is the better trade.
        if total - used_size > MIN_BLOCK_SIZE {
            let remainder = NonNull::new_unchecked(block.as_ptr().add(used_size));
            block::set_header(remainder, total - used_size, false, true);
            block::set_header(block, used_size, true, prev_used);
            self.header_mut().index.add_free(remainder);
        } else {
            block::set_header(block, total, true, prev_used);
        }
        let follower = block::phys_next(block);
        block::set_prev_used(follower, true);
    }

    /// Shrink (or leave unchanged) an already-`used` block in place,
    /// splitting off a free remainder when worthwhile. Unlike
    /// [`Self::commit_used`], `block` was used *before* this call, so its
    /// physical far neighbour (the block following the split-off
    /// remainder) may already be free, or may carry a stale `PREV_USED`
    /// bit from when the whole span was one used block — both need fixing
    /// up here.
    ///
    /// # Safety
    /// `block` must be a live used block at least `used_size` bytes long.
    unsafe fn shrink_used_block(&mut self, block: BlockPtr, used_size: usize, prev_used: bool) {
        let total = block::size(block);
        debug_assert!(total >= used_size);
        if total - used_size <= MIN_BLOCK_SIZE {
            // No split: the block keeps its current size and its follower
            // is unchanged, so its `PREV_USED` bit (already `true`) needs
            // no update.
            return;
        }

        let remainder = NonNull::new_unchecked(block.as_ptr().add(used_size));
        let remainder_size = total - used_size;
        block::set_header(block, used_size, true, prev_used);
        block::set_header(remainder, remainder_size, false, true);

        let follower = block::phys_next(remainder);
        if block::is_used(follower) {
            block::set_prev_used(follower, false);
            self.header_mut().index.add_free(remainder);
        } else {
            // The far neighbour was already free: absorb it rather than
            // leave two physically-adjacent free blocks (invariant 4).
            self.header_mut().index.remove_free(follower);
            let merged = remainder_size + block::size(follower);
            block::set_header(remainder, merged, false, true);
            self.header_mut().index.add_free(remainder);
        }
    }

    /// Allocate at least `size` bytes, returning `None` if the pool has no
    /// free block large enough. Never grows the region.
    ///
    /// # Safety
    /// The pool must have been initialized by [`Pool::init`] and not yet
    /// torn down.
    pub unsafe fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let required = Self::required_block_size(size);
        let (block, bucket) = self.header().index.find_fit(required)?;
        match bucket {
            Some(b) => self.header_mut().index.remove_free_head(block, b),
            None => self.header_mut().index.remove_free(block),
        }
        let prev_used = block::is_prev_used(block);
        self.commit_used(block, required, prev_used);
        #[cfg(feature = "debug")]
        self.header_mut().stats.record_alloc(required);
        Some(block::payload_ptr(block))
    }

    /// Allocate space for `count` elements of `size` bytes each, zeroed.
    /// Returns `None` on overflow or if the pool cannot satisfy the
    /// request.
    ///
    /// # Safety
    /// Same as [`Pool::malloc`].
    pub unsafe fn calloc(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let total = count.checked_mul(size)?;
        let ptr = self.malloc(total)?;
        core::ptr::write_bytes(ptr.as_ptr(), 0, total);
        Some(ptr)
    }

    /// Resize a live allocation, growing in place or into a trailing free
    /// neighbour where possible and falling back to allocate-copy-free
    /// otherwise. Returns `None` (leaving `ptr` valid and unchanged) if no
    /// path succeeds.
    ///
    /// # Safety
    /// `ptr` must have been returned by a `malloc`-family method of this
    /// same pool and not yet freed.
    pub unsafe fn realloc(&mut self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        let block = block::block_of_payload(ptr);
        let old_payload = block::size(block) - HDR_SIZE;
        let required = Self::required_block_size(new_size);
        let cur_total = block::size(block);
        let prev_used = block::is_prev_used(block);

        if required <= cur_total {
            self.shrink_used_block(block, required, prev_used);
            #[cfg(feature = "debug")]
            self.header_mut().stats.record_alloc(required);
            return Some(ptr);
        }

        let nxt = block::phys_next(block);
        if !block::is_used(nxt) {
            let combined = cur_total + block::size(nxt);
            if combined >= required {
                self.header_mut().index.remove_free(nxt);
                block::set_header(block, combined, true, prev_used);
                self.commit_used(block, required, prev_used);
                #[cfg(feature = "debug")]
                self.header_mut().stats.record_alloc(required);
                return Some(ptr);
            }
        }

        let new_ptr = self.malloc(new_size)?;
        core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_payload.min(new_size));
        self.free(ptr);
        Some(new_ptr)
    }

    /// Release a live allocation back to the pool, coalescing with any free
    /// physical neighbours in O(1).
    ///
    /// # Safety
    /// `ptr` must have been returned by a `malloc`-family method of this
    /// same pool and must not already have been freed.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let mut block = block::block_of_payload(ptr);

        #[cfg(feature = "debug")]
        if !block::is_used(block) {
            self.record_error("double free or invalid pointer passed to free");
            return;
        }

        #[cfg(feature = "debug")]
        let freed_size = block::size(block);

        let mut prev_used = block::is_prev_used(block);
        if !prev_used {
            let pred = block::predecessor_via_back_pointer(block);
            self.header_mut().index.remove_free(pred);
            let merged = block::size(pred) + block::size(block);
            prev_used = block::is_prev_used(pred);
            block::set_header(pred, merged, true, prev_used);
            block = pred;
        }

        let nxt = block::phys_next(block);
        if !block::is_used(nxt) {
            self.header_mut().index.remove_free(nxt);
            let merged = block::size(block) + block::size(nxt);
            block::set_header(block, merged, true, prev_used);
        }

        self.header_mut().index.add_free(block);
        let follower = block::phys_next(block);
        block::set_prev_used(follower, false);

        #[cfg(feature = "debug")]
        self.header_mut().stats.record_free(freed_size);
    }

    /// Permanently carve `size` bytes out of the pool's free space, never
    /// to be returned. The allocation is a real used block like any other —
    /// it carries a header and so keeps the physical chain intact for the
    /// sanity walker and statistics sweep — it is simply never handed to
    /// [`FreeIndex::add_free`], so it can never be found by `malloc` or
    /// coalesced into by `free`. Falls back to an ordinary [`Pool::malloc`]
    /// when the pool's physical tail cannot satisfy the request.
    ///
    /// # Safety
    /// Same as [`Pool::malloc`].
    pub unsafe fn permalloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let want = Self::required_block_size(size);
        let sentinel = self.header().sentinel.get();
        if block::is_prev_used(sentinel) {
            return self.malloc(size);
        }

        let pred = block::predecessor_via_back_pointer(sentinel);
        let pred_size = block::size(pred);
        if pred_size < want {
            return self.malloc(size);
        }
        let pred_prev_used = block::is_prev_used(pred);
        self.header_mut().index.remove_free(pred);

        let free_room = pred_size - want;
        let new_block = if free_room > MIN_BLOCK_SIZE {
            // The leftover is big enough to stay a real free block: split
            // the permanent allocation off pred's tail end, so it lands
            // immediately before the (unmoved) sentinel.
            let new_pred_size = pred_size - want;
            let new_block = NonNull::new_unchecked(pred.as_ptr().add(new_pred_size));
            block::set_header(pred, new_pred_size, false, pred_prev_used);
            block::set_header(new_block, want, true, false);
            self.header_mut().index.add_free(pred);
            new_block
        } else {
            // What would remain falls below MIN_BLOCK_SIZE and could never
            // be split off or reused; fold it into the permanent
            // allocation instead of tracking an unusable free sliver. The
            // sentinel's address and size are untouched since nothing
            // after `pred` moved.
            block::set_header(pred, pred_size, true, pred_prev_used);
            pred
        };
        block::set_prev_used(sentinel, true);
        #[cfg(feature = "debug")]
        self.header_mut().stats.record_alloc(block::size(new_block));
        Some(block::payload_ptr(new_block))
    }

    /// The number of bytes available to the caller through `ptr`, which may
    /// be larger than the size last requested through `malloc`/`realloc`
    /// due to rounding.
    ///
    /// # Safety
    /// Same as [`Pool::free`], save that `ptr` is left untouched.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        let block = block::block_of_payload(ptr);
        block::size(block) - HDR_SIZE
    }

    /// Release this handle's logical ownership of the backing region. The
    /// region itself is the caller's to free, reuse or let go out of scope;
    /// this only retires the `Pool` value that was layered over it. In a
    /// `debug` build the whole region is zeroed first, so any pointer still
    /// held past this call reads zeros instead of stale block headers or
    /// payload data.
    ///
    /// # Safety
    /// No pointer this pool ever handed out may be dereferenced after this
    /// call, and the region must not be passed to [`Pool::init`] again
    /// without being treated as uninitialized.
    pub unsafe fn cleanup(self) {
        #[cfg(feature = "debug")]
        {
            let (start, end) = self.region_bounds();
            core::ptr::write_bytes(start as *mut u8, 0u8, end - start);
        }
        let _ = self;
    }

    #[cfg(feature = "debug")]
    pub(crate) fn record_error(&self, message: &'static str) {
        self.header().last_error.set(Some(message));
    }

    #[cfg(feature = "debug")]
    pub(crate) fn clear_error(&self) {
        self.header().last_error.set(None);
    }

    /// The most recent diagnostic message recorded by this pool (a double
    /// free, a failed sanity check, ...), if any. Cleared by
    /// [`crate::diag::sanity_check`] on every call.
    #[cfg(feature = "debug")]
    pub fn last_error(&self) -> Option<&'static str> {
        self.header().last_error.get()
    }

    /// Running allocation counters, updated incrementally on every
    /// `malloc`/`calloc`/`realloc`/`free`/`permalloc`. This is the
    /// profiling substrate for [`crate::diag::start_profiling`]; for an
    /// instantaneous snapshot of the pool's current used/free/fragmentation
    /// state, see [`crate::diag::statistics`] instead.
    #[cfg(feature = "debug")]
    pub fn counters(&self) -> Statistics {
        self.header().stats
    }

    /// The pool's first real (non-header) block, for diagnostic traversal.
    pub(crate) fn first_block(&self) -> BlockPtr {
        let header_size = config::align_up(core::mem::size_of::<PoolHeader>());
        unsafe { NonNull::new_unchecked((self.header.as_ptr() as *mut u8).add(header_size)) }
    }

    pub(crate) fn sentinel(&self) -> BlockPtr {
        self.header().sentinel.get()
    }

    pub(crate) fn index(&self) -> &FreeIndex {
        &self.header().index
    }

    /// The byte range `[start, end)` this pool's region occupies, header
    /// included. Used by [`crate::diag::sanity_check`] to bound-check block
    /// sizes independent of where the sentinel claims to sit.
    pub(crate) fn region_bounds(&self) -> (usize, usize) {
        let start = self.header.as_ptr() as usize;
        (start, start + self.header().region_size)
    }
}
