//! Diagnostics: allocation statistics, a sampling profiler, a pool sanity
//! walker and print routines to a caller-supplied [`core::fmt::Write`]
//! sink. Everything here is compiled only under the `debug` feature, the
//! same trade `rlsf` makes with its own `stats` cargo feature — a release
//! build pays nothing for bookkeeping it never asked for.

use core::fmt;
use core::ptr::NonNull;

use crate::block;
use crate::config::ALIGNMENT;
use crate::pool::Pool;

/// Running counters for one pool, updated on every `malloc`/`calloc`/
/// `realloc`/`free`.
#[derive(Debug, Clone, Copy)]
pub struct Statistics {
    pub alloc_count: u64,
    pub free_count: u64,
    pub bytes_allocated: u64,
    pub bytes_freed: u64,
    pub peak_bytes_in_use: u64,
    current_bytes_in_use: u64,
}

impl Statistics {
    pub(crate) const EMPTY: Self = Self {
        alloc_count: 0,
        free_count: 0,
        bytes_allocated: 0,
        bytes_freed: 0,
        peak_bytes_in_use: 0,
        current_bytes_in_use: 0,
    };

    pub(crate) fn record_alloc(&mut self, size: usize) {
        self.alloc_count += 1;
        self.bytes_allocated += size as u64;
        self.current_bytes_in_use += size as u64;
        if self.current_bytes_in_use > self.peak_bytes_in_use {
            self.peak_bytes_in_use = self.current_bytes_in_use;
        }
    }

    pub(crate) fn record_free(&mut self, size: usize) {
        self.free_count += 1;
        self.bytes_freed += size as u64;
        self.current_bytes_in_use -= size as u64;
    }

    /// Bytes currently handed out to live allocations (header overhead
    /// included).
    pub fn bytes_in_use(&self) -> u64 {
        self.current_bytes_in_use
    }
}

/// A snapshot of a pool's [`Statistics`] taken by [`start_profiling`].
/// Holding the snapshot by value, rather than a flag flipped inside the
/// pool header, sidesteps ever reading back a profile session that a
/// concurrent `start_profiling` call quietly overwrote.
#[derive(Debug, Clone, Copy)]
pub struct ProfileMark(Statistics);

/// The delta between a [`ProfileMark`] and the pool's statistics at
/// [`stop_profiling`] time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileReport {
    pub allocations: u64,
    pub frees: u64,
    pub bytes_allocated: u64,
    pub bytes_freed: u64,
}

pub fn start_profiling(pool: &Pool) -> ProfileMark {
    ProfileMark(pool.counters())
}

pub fn stop_profiling(pool: &Pool, mark: ProfileMark) -> ProfileReport {
    let now = pool.counters();
    ProfileReport {
        allocations: now.alloc_count - mark.0.alloc_count,
        frees: now.free_count - mark.0.free_count,
        bytes_allocated: now.bytes_allocated - mark.0.bytes_allocated,
        bytes_freed: now.bytes_freed - mark.0.bytes_freed,
    }
}

/// A single linear walk of the physical chain, reporting the pool's
/// instantaneous used/free byte totals and a fragmentation proxy — the
/// number of used↔free transitions between physically adjacent blocks.
/// Unlike [`Statistics`], which accumulates across the pool's whole
/// lifetime, this reflects only the pool's state at the moment of the
/// call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStatistics {
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub fragmentation: usize,
}

/// Sweep `pool`'s physical chain once, from the first real block to the
/// sentinel inclusive.
///
/// # Safety
/// `pool` must have been initialized by [`Pool::init`].
pub unsafe fn statistics(pool: &Pool) -> PoolStatistics {
    let sentinel = pool.sentinel();
    let mut cur = pool.first_block();
    let mut stats = PoolStatistics::default();
    let mut prev_used: Option<bool> = None;

    loop {
        let sz = block::size(cur);
        let is_used = block::is_used(cur);
        if is_used {
            stats.used_bytes += sz;
        } else {
            stats.free_bytes += sz;
        }
        if prev_used.map_or(false, |p| p != is_used) {
            stats.fragmentation += 1;
        }
        prev_used = Some(is_used);

        if cur == sentinel {
            break;
        }
        cur = block::phys_next(cur);
    }

    stats
}

/// This block's size word is zero or not a multiple of [`ALIGNMENT`]. Fatal:
/// the walker cannot trust `phys_next` past this point and stops here.
pub const SANITY_SIZE_MISALIGNED: u32 = 0x01;
/// This block's recorded size would place its end beyond the pool's own
/// backing region.
pub const SANITY_SIZE_EXCEEDS_POOL: u32 = 0x02;
/// Walking `phys_next` from this (non-sentinel) block overshoots the
/// sentinel's recorded address — the physical chain does not close exactly
/// onto it.
pub const SANITY_NEXT_OUT_OF_BOUNDS: u32 = 0x04;
/// `PREV_USED` is set, but the physical predecessor is actually free
/// (used→free mismatch).
pub const SANITY_PREV_USED_FALSE_POSITIVE: u32 = 0x08;
/// `PREV_USED` is clear, but the physical predecessor is actually used
/// (free→used mismatch).
pub const SANITY_PREV_USED_FALSE_NEGATIVE: u32 = 0x10;
/// Two physically adjacent blocks are both free — they should have been
/// coalesced by `free`.
pub const SANITY_UNCOALESCED_NEIGHBORS: u32 = 0x20;
/// The free index's bitmaps disagree with which bucket lists are actually
/// empty.
pub const SANITY_FREE_LIST_INCONSISTENT: u32 = 0x40;
/// The sentinel is missing, used-but-wrong-sized, or not where the pool
/// header says it is.
pub const SANITY_SENTINEL_CORRUPT: u32 = 0x80;

/// Walk every block in `pool` and cross-check it against its neighbours and
/// the free index, returning a bitmask of the `SANITY_*` flags for whatever
/// is wrong (zero if nothing is). Clears [`Pool::last_error`].
///
/// # Safety
/// `pool` must have been initialized by [`Pool::init`].
pub unsafe fn sanity_check(pool: &Pool) -> u32 {
    pool.clear_error();
    let mut flags = 0;

    let (_, region_end) = pool.region_bounds();
    let sentinel = pool.sentinel();
    let sentinel_addr = sentinel.as_ptr() as usize;
    let mut cur = pool.first_block();
    let mut expect_prev_used = true;

    loop {
        let addr = cur.as_ptr() as usize;
        let sz = block::size(cur);
        if sz == 0 || sz % ALIGNMENT != 0 {
            flags |= SANITY_SIZE_MISALIGNED;
            break;
        }
        if addr + sz > region_end {
            flags |= SANITY_SIZE_EXCEEDS_POOL;
            break;
        }
        if cur != sentinel && addr + sz > sentinel_addr {
            flags |= SANITY_NEXT_OUT_OF_BOUNDS;
            break;
        }

        let is_used = block::is_used(cur);
        let prev_used_bit = block::is_prev_used(cur);
        if prev_used_bit && !expect_prev_used {
            flags |= SANITY_PREV_USED_FALSE_POSITIVE;
        } else if !prev_used_bit && expect_prev_used {
            flags |= SANITY_PREV_USED_FALSE_NEGATIVE;
        }
        if !is_used && !expect_prev_used {
            flags |= SANITY_UNCOALESCED_NEIGHBORS;
        }

        if cur == sentinel {
            if !(is_used && sz == crate::config::HDR_SIZE) {
                flags |= SANITY_SENTINEL_CORRUPT;
            }
            break;
        }

        expect_prev_used = is_used;
        cur = block::phys_next(cur);
    }

    if !pool.index().is_consistent_with_bitmaps() {
        flags |= SANITY_FREE_LIST_INCONSISTENT;
    }

    if flags != 0 {
        pool.record_error("sanity_check found pool corruption");
    }
    flags
}

/// Print a one-line summary of the pool header to `sink`.
pub fn print_pool_header<W: fmt::Write>(pool: &Pool, sink: &mut W) -> fmt::Result {
    writeln!(
        sink,
        "pool region_size={} sentinel={:p}",
        pool.region_size(),
        pool.sentinel().as_ptr()
    )
}

/// Print a one-line summary of a single block to `sink`.
///
/// # Safety
/// `block_ptr` must point to a live block header belonging to a pool this
/// module can walk (see [`sanity_check`]).
pub unsafe fn print_memory_block<W: fmt::Write>(
    block_ptr: NonNull<u8>,
    sink: &mut W,
) -> fmt::Result {
    writeln!(
        sink,
        "block@{:p} size={} used={} prev_used={}",
        block_ptr.as_ptr(),
        block::size(block_ptr),
        block::is_used(block_ptr),
        block::is_prev_used(block_ptr)
    )
}

/// Print every block in `pool`, physical order, one line each.
///
/// # Safety
/// `pool` must have been initialized by [`Pool::init`].
pub unsafe fn dump_blocks<W: fmt::Write>(pool: &Pool, sink: &mut W) -> fmt::Result {
    let sentinel = pool.sentinel();
    let mut cur = pool.first_block();
    loop {
        print_memory_block(cur, sink)?;
        if cur == sentinel {
            break;
        }
        cur = block::phys_next(cur);
    }
    Ok(())
}
