//! Compile-time configuration.
//!
//! Mirrors the "compile-time configuration" table from the design document:
//! alignment and address width are selected by Cargo features because they
//! change the in-memory layout of every block header; the remaining knobs
//! (`FLI_WIDTH`, `SLI_WIDTH`, `IGNORE_LSBS`, `MIN_MEMORY_BLOCK_SIZE`) are
//! plain constants, tuned here the way a `config.h` would be in the systems
//! code this crate's algorithm descends from.

cfg_if::cfg_if! {
    if #[cfg(feature = "address-16bit")] {
        /// The block-header size word. Also the unit in which [`MAX_POOL_SIZE`]
        /// is expressed.
        pub type RawSize = u16;
    } else {
        pub type RawSize = u32;
    }
}

/// Block alignment in bytes. All block sizes are multiples of this value,
/// which is why the low two bits of a [`RawSize`] are free to use as flags.
#[cfg(feature = "align8")]
pub const ALIGNMENT: usize = 8;
#[cfg(not(feature = "align8"))]
pub const ALIGNMENT: usize = 4;

pub const ALIGN_MASK: usize = ALIGNMENT - 1;

/// Number of first-level (logarithmic) size-class rows, not counting the
/// implicit top overflow row. Bucket coordinates range over
/// `0..=FLI_WIDTH`, i.e. `FLI_WIDTH + 1` rows total (see [`NUM_FL_ROWS`]).
pub const FLI_WIDTH: u32 = 9;

/// `log2` of the number of second-level sub-classes per row.
pub const SLI_WIDTH: u32 = 3;

/// Number of second-level sub-classes per row (`2^SLI_WIDTH`).
pub const NUM_SL: usize = 1 << SLI_WIDTH;

/// Number of first-level rows, including the top overflow row.
pub const NUM_FL_ROWS: usize = FLI_WIDTH as usize + 1;

/// Bits of size precision discarded for the smallest size classes.
pub const IGNORE_LSBS: u32 = 4;

/// The largest pool size representable by [`RawSize`], in bytes.
pub const MAX_POOL_SIZE: usize = (RawSize::MAX as usize) & !ALIGN_MASK;

const fn max_usize(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

/// Minimum payload words a free block's body must reserve: the forward and
/// backward free-list links plus the last-word back-pointer used for O(1)
/// predecessor lookup on `free`. When a block's body is exactly this long,
/// the back-pointer is the last of these three words (never aliases
/// `next_free`/`prev_free`).
pub const MIN_FREE_BODY_WORDS: usize = 3;

/// Every block's header occupies one aligned slot, wide enough to hold a
/// [`RawSize`] word regardless of how it compares to [`ALIGNMENT`]; this
/// keeps the payload (or, for free blocks, the free-list links that follow)
/// aligned without a separate padding calculation at each use site.
pub const HDR_SIZE: usize = ALIGNMENT;

/// Floor on any block size, header included, before rounding to
/// [`ALIGNMENT`]: `max(1 << IGNORE_LSBS, header + free body)`.
pub const MIN_MEMORY_BLOCK_SIZE_UNALIGNED: usize = {
    let free_body = MIN_FREE_BODY_WORDS * core::mem::size_of::<usize>();
    max_usize(1 << IGNORE_LSBS, HDR_SIZE + free_body)
};

/// [`MIN_MEMORY_BLOCK_SIZE_UNALIGNED`] rounded up to [`ALIGNMENT`].
pub const MIN_BLOCK_SIZE: usize =
    (MIN_MEMORY_BLOCK_SIZE_UNALIGNED + ALIGN_MASK) & !ALIGN_MASK;

#[inline]
pub const fn align_up(n: usize) -> usize {
    (n + ALIGN_MASK) & !ALIGN_MASK
}

#[inline]
pub const fn align_down(n: usize) -> usize {
    n & !ALIGN_MASK
}
