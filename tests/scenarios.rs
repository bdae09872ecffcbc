//! End-to-end scenarios exercised purely through the public API, in the
//! spirit of the scenario-driven tests in `crates/rlsf/src/tlsf/tests.rs`.

use std::ptr::NonNull;
use tlsfpool::Pool;

fn new_pool(size: usize) -> (Vec<u8>, Pool) {
    let mut region = vec![0u8; size];
    let ptr = unsafe { NonNull::new_unchecked(region.as_mut_ptr()) };
    let pool = unsafe { Pool::init(ptr, size) }.unwrap();
    (region, pool)
}

#[test]
fn init_rejects_a_region_too_small_to_hold_one_block() {
    let mut tiny = [0u8; 4];
    let ptr = unsafe { NonNull::new_unchecked(tiny.as_mut_ptr()) };
    assert!(unsafe { Pool::init(ptr, tiny.len()) }.is_err());
}

#[cfg(feature = "debug")]
#[test]
fn cleanup_zeroes_the_region_in_debug_builds() {
    let (region, mut pool) = new_pool(4096);
    let p = unsafe { pool.malloc(64) }.unwrap();
    unsafe { core::ptr::write_bytes(p.as_ptr(), 0xAB, 64) };
    unsafe { pool.cleanup() };
    assert!(region.iter().all(|&b| b == 0), "cleanup left non-zero bytes in a debug build");
}

#[test]
fn single_allocation_round_trip() {
    let (_region, mut pool) = new_pool(4096);
    let p = unsafe { pool.malloc(64) }.unwrap();
    assert!(unsafe { pool.usable_size(p) } >= 64);
    unsafe { pool.free(p) };
}

#[test]
fn exhausting_the_pool_then_freeing_recovers_full_capacity() {
    let (_region, mut pool) = new_pool(8192);
    let mut live = Vec::new();
    while let Some(p) = unsafe { pool.malloc(100) } {
        live.push(p);
    }
    assert!(!live.is_empty());
    for p in live {
        unsafe { pool.free(p) };
    }
    // After freeing everything and full coalescing, a big allocation should
    // fit again.
    let p = unsafe { pool.malloc(7000) };
    assert!(p.is_some());
}

#[test]
fn realloc_shrink_releases_the_tail_for_reuse() {
    let (_region, mut pool) = new_pool(4096);
    let a = unsafe { pool.malloc(1000) }.unwrap();
    let a = unsafe { pool.realloc(a, 32) }.unwrap();
    // The space given back by shrinking should be usable by a fresh
    // allocation without touching `a`.
    let b = unsafe { pool.malloc(900) };
    assert!(b.is_some());
    unsafe {
        pool.free(a);
        if let Some(b) = b {
            pool.free(b);
        }
    }
}

#[test]
fn realloc_falls_back_to_move_when_no_room_to_grow_in_place() {
    let (_region, mut pool) = new_pool(4096);
    let a = unsafe { pool.malloc(64) }.unwrap();
    let b = unsafe { pool.malloc(64) }.unwrap(); // denies `a` a free neighbor
    unsafe {
        core::ptr::write_bytes(a.as_ptr(), 0xAB, 64);
    }
    let grown = unsafe { pool.realloc(a, 2000) }.unwrap();
    assert_ne!(grown, a, "expected realloc to move when it could not grow in place");
    let slice = unsafe { core::slice::from_raw_parts(grown.as_ptr(), 64) };
    assert!(slice.iter().all(|&b| b == 0xAB), "realloc must preserve old contents");
    unsafe {
        pool.free(grown);
        pool.free(b);
    }
}

#[test]
fn calloc_zeroes_memory() {
    let (_region, mut pool) = new_pool(4096);
    let p = unsafe { pool.calloc(16, 8) }.unwrap();
    let slice = unsafe { core::slice::from_raw_parts(p.as_ptr(), 128) };
    assert!(slice.iter().all(|&b| b == 0));
    unsafe { pool.free(p) };
}

#[test]
fn permalloc_memory_survives_pool_exhaustion_and_refill() {
    let (_region, mut pool) = new_pool(8192);
    let perm = unsafe { pool.permalloc(200) }.unwrap();
    unsafe {
        core::ptr::write_bytes(perm.as_ptr(), 0x42, 200);
    }

    let mut live = Vec::new();
    while let Some(p) = unsafe { pool.malloc(128) } {
        live.push(p);
    }
    for p in live {
        unsafe { pool.free(p) };
    }

    // The permalloc'd region must still read back exactly what was written,
    // untouched by any of the malloc/free churn above.
    let slice = unsafe { core::slice::from_raw_parts(perm.as_ptr(), 200) };
    assert!(slice.iter().all(|&b| b == 0x42));
}

#[test]
fn permalloc_of_more_than_the_pool_fails_cleanly() {
    let (_region, mut pool) = new_pool(4096);
    assert!(unsafe { pool.permalloc(1 << 20) }.is_none());
    // The pool must still be fully usable afterwards.
    let p = unsafe { pool.malloc(64) };
    assert!(p.is_some());
}

#[test]
fn permalloc_falls_back_to_malloc_when_tail_is_used() {
    // When the block right before the sentinel is used, permalloc degrades
    // to an ordinary malloc rather than failing outright. Mopping up with
    // minimum-sized allocations guarantees the
    // final request's own split-vs-absorb decision leaves zero free bytes
    // at the tail (the smallest possible request and the smallest
    // possible leftover share the same threshold, `MIN_BLOCK_SIZE`), so
    // the last real block is used regardless of the pool's exact capacity.
    let (_region, mut pool) = new_pool(4096);
    let mut live = Vec::new();
    while let Some(p) = unsafe { pool.malloc(1) } {
        live.push(p);
    }
    let p = unsafe { pool.permalloc(8) };
    assert!(p.is_some(), "permalloc should fall back to malloc rather than fail");
    for p in live {
        unsafe { pool.free(p) };
    }
}

#[test]
fn find_fit_bounded_fallback_scans_list() {
    // The bounded first-fit fallback is reachable whenever two free blocks
    // of different sizes land in the pool's single top overflow bucket
    // (everything >= 2^(FLI_WIDTH+SLI_WIDTH+IGNORE_LSBS) shares one bucket,
    // so an exact-bucket-head check can undershoot).
    let (_region, mut pool) = new_pool(1_000_000);
    let a = unsafe { pool.malloc(70_000) }.unwrap();
    let _b = unsafe { pool.malloc(50_000) }.unwrap(); // keeps a and c apart
    let c = unsafe { pool.malloc(120_000) }.unwrap();
    unsafe {
        // Free the larger block first so the smaller one ends up at the
        // bucket list's head, forcing the fallback scan to walk past it.
        pool.free(c);
        pool.free(a);
    }
    let reused = unsafe { pool.malloc(90_000) }.unwrap();
    assert_eq!(
        reused, c,
        "expected the bounded first-fit fallback to find the larger, non-head block"
    );
}

#[cfg(feature = "debug")]
#[test]
fn statistics_after_init_reports_the_sentinel_and_one_giant_free_block() {
    let (_region, pool) = new_pool((1 << 20) - 1);
    let stats = unsafe { tlsfpool::diag::statistics(&pool) };
    assert_eq!(stats.used_bytes, tlsfpool::ALIGNMENT, "only the sentinel is used right after init");
    assert!(stats.free_bytes > 0);
    assert!(stats.fragmentation <= 1);
    assert_eq!(unsafe { tlsfpool::diag::sanity_check(&pool) }, 0);
}

#[cfg(feature = "debug")]
#[test]
fn statistics_reflects_a_round_tripped_allocation() {
    let (_region, mut pool) = new_pool(4096);
    let p = unsafe { pool.malloc(100) }.unwrap();
    unsafe {
        core::ptr::write_bytes(p.as_ptr(), 0xaa, 100);
    }
    assert_eq!(unsafe { tlsfpool::diag::sanity_check(&pool) }, 0);
    unsafe { pool.free(p) };
    let stats = unsafe { tlsfpool::diag::statistics(&pool) };
    assert_eq!(stats.used_bytes, tlsfpool::ALIGNMENT, "back to just the sentinel after freeing");
}

#[cfg(feature = "debug")]
#[test]
fn profiling_sees_every_traced_operation() {
    let (_region, mut pool) = new_pool(4096);
    let mark = tlsfpool::diag::start_profiling(&pool);
    let p = unsafe { pool.malloc(64) }.unwrap();
    let q = unsafe { pool.malloc(128) }.unwrap();
    unsafe { pool.free(p) };
    let report = tlsfpool::diag::stop_profiling(&pool, mark);
    assert_eq!(report.allocations, 2);
    assert_eq!(report.frees, 1);
    assert!(report.bytes_allocated >= 64 + 128);
    assert!(report.bytes_freed >= 64);
    unsafe { pool.free(q) };
}

#[cfg(feature = "debug")]
#[test]
fn realloc_shrink_merges_with_already_free_tail_neighbor() {
    // Shrinking `a` in place always splits off a remainder physically
    // adjacent to whatever free space already followed `a` (here, the
    // remainder of the pool's initial giant free block). That remainder
    // must be merged into its free neighbor rather than left sitting next
    // to it — two physically-adjacent free blocks should never coexist.
    let (_region, mut pool) = new_pool(4096);
    let a = unsafe { pool.malloc(1000) }.unwrap();
    let a = unsafe { pool.realloc(a, 32) }.unwrap();
    assert_eq!(
        unsafe { tlsfpool::diag::sanity_check(&pool) },
        0,
        "two physically-adjacent free blocks after a shrinking realloc"
    );
    unsafe { pool.free(a) };
    // Everything should have coalesced back into one giant free block,
    // usable by a single allocation spanning almost the whole pool.
    let p = unsafe { pool.malloc(3000) };
    assert!(p.is_some(), "pool failed to fully recover capacity after shrink + free");
    assert_eq!(unsafe { tlsfpool::diag::sanity_check(&pool) }, 0);
}

#[cfg(feature = "debug")]
#[test]
fn double_free_is_recorded_without_corrupting_the_pool() {
    let (_region, mut pool) = new_pool(4096);
    let p = unsafe { pool.malloc(64) }.unwrap();
    unsafe {
        pool.free(p);
        pool.free(p);
    }
    assert!(pool.last_error().is_some());
}
