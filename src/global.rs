//! An optional [`GlobalAlloc`] adapter over a single static region.
//!
//! `rlsf::GlobalTlsf` wraps a `FlexTlsf` behind a platform mutex
//! (`pthread_mutex_t` on Unix, see `crates/rlsf/src/global/unix.rs`) so it
//! can register pages with the OS as the heap grows. This allocator never
//! grows its region, so there is nothing platform-specific to do — a plain
//! spinlock over a `static` buffer is enough, and keeps this feature
//! `std`-free.
//!
//! Unlike `tlsf.rs`'s `Tlsf::allocate_initializing_by`, which pads every
//! block by `layout.align() - GRANULARITY / 2` bytes so the payload can sit
//! at an arbitrary in-block offset, [`Pool::malloc`] always returns a
//! payload at a fixed, header-relative offset aligned to
//! [`config::ALIGNMENT`] — there is no slack to carve a larger offset out
//! of. Rather than bolt that padding scheme onto the core allocator for the
//! sake of this optional adapter, [`StaticPool`] states its alignment
//! contract explicitly instead: any [`Layout`] whose alignment exceeds
//! [`config::ALIGNMENT`] is rejected (a null pointer from `alloc`/
//! `alloc_zeroed`, matching [`GlobalAlloc`]'s contract for an
//! unsatisfiable request) rather than silently handed back a pointer that
//! might not meet it.

use core::alloc::{GlobalAlloc, Layout};
use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config;
use crate::pool::Pool;

struct Spinlock(AtomicBool);

impl Spinlock {
    const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    #[inline]
    fn lock(&self) {
        while self
            .0
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
    }

    #[inline]
    fn unlock(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A [`GlobalAlloc`] backed by a fixed-size static buffer, lazily carved
/// into a [`Pool`] on first use.
///
/// ```ignore
/// #[global_allocator]
/// static ALLOCATOR: tlsfpool::global::StaticPool<{ 1 << 20 }> =
///     tlsfpool::global::StaticPool::new();
/// ```
pub struct StaticPool<const N: usize> {
    region: UnsafeCell<[u8; N]>,
    pool: UnsafeCell<Option<Pool>>,
    lock: Spinlock,
}

unsafe impl<const N: usize> Sync for StaticPool<N> {}

impl<const N: usize> StaticPool<N> {
    pub const fn new() -> Self {
        Self {
            region: UnsafeCell::new([0; N]),
            pool: UnsafeCell::new(None),
            lock: Spinlock::new(),
        }
    }

    /// # Safety
    /// Must be called with [`Self::lock`] held.
    unsafe fn pool_mut(&self) -> &mut Pool {
        let slot = &mut *self.pool.get();
        if slot.is_none() {
            let region = NonNull::new_unchecked((*self.region.get()).as_mut_ptr());
            *slot = Pool::init(region, N).ok();
        }
        slot.as_mut().expect("static pool region too small for a single block")
    }
}

/// Whether `layout` can be satisfied at all: [`Pool::malloc`] only ever
/// aligns a payload to [`config::ALIGNMENT`], so a request for a coarser
/// alignment can never be honored.
#[inline]
fn fits_alignment(layout: &Layout) -> bool {
    layout.align() <= config::ALIGNMENT
}

unsafe impl<const N: usize> GlobalAlloc for StaticPool<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !fits_alignment(&layout) {
            return ptr::null_mut();
        }
        self.lock.lock();
        let result = self
            .pool_mut()
            .malloc(layout.size())
            .map(NonNull::as_ptr)
            .unwrap_or(ptr::null_mut());
        self.lock.unlock();
        result
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.lock.lock();
        self.pool_mut().free(NonNull::new_unchecked(ptr));
        self.lock.unlock();
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if !fits_alignment(&layout) {
            return ptr::null_mut();
        }
        self.lock.lock();
        let result = self
            .pool_mut()
            .realloc(NonNull::new_unchecked(ptr), new_size)
            .map(NonNull::as_ptr)
            .unwrap_or(ptr::null_mut());
        self.lock.unlock();
        result
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if !fits_alignment(&layout) {
            return ptr::null_mut();
        }
        self.lock.lock();
        let result = self
            .pool_mut()
            .calloc(1, layout.size())
            .map(NonNull::as_ptr)
            .unwrap_or(ptr::null_mut());
        self.lock.unlock();
        result
    }
}

#[cfg(test)]
mod tests {
    // Exercises `StaticPool` directly through `GlobalAlloc`, without
    // installing it via `#[global_allocator]` — this process's real global
    // allocator is still whatever `std`'s test harness already set up, and
    // nothing here should fight it for that role.
    use super::*;

    static POOL: StaticPool<4096> = StaticPool::new();

    #[test]
    fn alloc_dealloc_round_trip() {
        let layout = Layout::from_size_align(64, config::ALIGNMENT).unwrap();
        let p = unsafe { POOL.alloc(layout) };
        assert!(!p.is_null());
        assert_eq!(p as usize % config::ALIGNMENT, 0);
        unsafe {
            ptr::write_bytes(p, 0xAB, 64);
            POOL.dealloc(p, layout);
        }
    }

    #[test]
    fn alloc_zeroed_is_all_zero() {
        let layout = Layout::from_size_align(128, config::ALIGNMENT).unwrap();
        let p = unsafe { POOL.alloc_zeroed(layout) };
        assert!(!p.is_null());
        let slice = unsafe { core::slice::from_raw_parts(p, 128) };
        assert!(slice.iter().all(|&b| b == 0));
        unsafe { POOL.dealloc(p, layout) };
    }

    #[test]
    fn realloc_preserves_contents() {
        let layout = Layout::from_size_align(32, config::ALIGNMENT).unwrap();
        let p = unsafe { POOL.alloc(layout) };
        assert!(!p.is_null());
        unsafe { ptr::write_bytes(p, 0xCD, 32) };
        let grown = unsafe { POOL.realloc(p, layout, 256) };
        assert!(!grown.is_null());
        let slice = unsafe { core::slice::from_raw_parts(grown, 32) };
        assert!(slice.iter().all(|&b| b == 0xCD));
        unsafe { POOL.dealloc(grown, Layout::from_size_align(256, config::ALIGNMENT).unwrap()) };
    }

    #[test]
    fn over_aligned_request_is_rejected_rather_than_mis_aligned() {
        let over_aligned = config::ALIGNMENT * 4;
        let layout = Layout::from_size_align(64, over_aligned).unwrap();
        let p = unsafe { POOL.alloc(layout) };
        assert!(p.is_null(), "a layout stricter than config::ALIGNMENT must be refused, not silently mis-aligned");
    }
}
