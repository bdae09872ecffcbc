//! Block-header layout, flag accessors and physical-neighbour traversal.
//!
//! Every block — used or free — begins with a single [`RawSize`] word
//! carrying its size plus two status bits, the same bit-stealing trick
//! `rlsf::tlsf::BlockHdr::size` uses (there it packs `SIZE_USED` and
//! `SIZE_LAST_IN_POOL`; here the second bit is `PREV_USED` instead, because
//! this allocator represents the pool tail with a real sentinel *block*
//! rather than a flag on the last real one — see `DESIGN.md`).
//!
//! All multi-byte fields are read/written with `read_unaligned`/
//! `write_unaligned`: with `ALIGNMENT` configurable down to 4 bytes, a
//! `usize` link on a 64-bit host would otherwise not be naturally aligned.

use core::ptr::NonNull;

use crate::config::{self, RawSize, ALIGNMENT, HDR_SIZE};

/// `bit[0]` of a block's size word: the block is currently allocated.
pub const THIS_USED: RawSize = 0b01;
/// `bit[1]` of a block's size word: the physically preceding block is
/// currently allocated.
pub const PREV_USED: RawSize = 0b10;
/// The remaining bits, which hold the block's size (header included).
pub const SIZE_MASK: RawSize = !(0b11);

/// A pointer to the start of a block's header, used- or free-shaped alike.
pub type BlockPtr = NonNull<u8>;

#[inline]
unsafe fn read_word(p: BlockPtr) -> RawSize {
    (p.as_ptr() as *const RawSize).read_unaligned()
}

#[inline]
unsafe fn write_word(p: BlockPtr, v: RawSize) {
    (p.as_ptr() as *mut RawSize).write_unaligned(v)
}

/// Size of the block at `p`, header included, in bytes.
///
/// # Safety
/// `p` must point to a live block header belonging to the same pool.
#[inline]
pub unsafe fn size(p: BlockPtr) -> usize {
    (read_word(p) & SIZE_MASK) as usize
}

/// # Safety
/// Same as [`size`].
#[inline]
pub unsafe fn is_used(p: BlockPtr) -> bool {
    (read_word(p) & THIS_USED) != 0
}

/// # Safety
/// Same as [`size`].
#[inline]
pub unsafe fn is_prev_used(p: BlockPtr) -> bool {
    (read_word(p) & PREV_USED) != 0
}

/// # Safety
/// Same as [`size`].
#[inline]
pub unsafe fn set_prev_used(p: BlockPtr, used: bool) {
    let w = read_word(p);
    write_word(
        p,
        if used { w | PREV_USED } else { w & !PREV_USED },
    );
}

/// Overwrite a block's size word wholesale. `size` must already be
/// [`ALIGNMENT`]-aligned and representable in a [`RawSize`].
///
/// # Safety
/// Same as [`size`], and the caller must not shrink past any follower this
/// block's free-index membership still assumes exists.
#[inline]
pub unsafe fn set_header(p: BlockPtr, size: usize, this_used: bool, prev_used: bool) {
    debug_assert_eq!(size & !(SIZE_MASK as usize), 0, "size must be flag-clear");
    let mut w = size as RawSize;
    if this_used {
        w |= THIS_USED;
    }
    if prev_used {
        w |= PREV_USED;
    }
    write_word(p, w);
}

/// The block physically following `p`. The caller is responsible for
/// knowing when `p` is the sentinel (which has no real successor).
///
/// # Safety
/// Same as [`size`]; the result must lie within the pool.
#[inline]
pub unsafe fn phys_next(p: BlockPtr) -> BlockPtr {
    NonNull::new_unchecked(p.as_ptr().add(size(p)))
}

/// The payload pointer a used block hands to its caller.
///
/// # Safety
/// `p` must be a used block header.
#[inline]
pub unsafe fn payload_ptr(p: BlockPtr) -> NonNull<u8> {
    NonNull::new_unchecked(p.as_ptr().add(HDR_SIZE))
}

/// Recover the block header from a payload pointer handed back by `malloc`.
///
/// # Safety
/// `ptr` must be a pointer previously returned by this pool's `malloc`-family
/// functions.
#[inline]
pub unsafe fn block_of_payload(ptr: NonNull<u8>) -> BlockPtr {
    NonNull::new_unchecked(ptr.as_ptr().sub(HDR_SIZE))
}

/// Offset of the forward free-list link within a free block's body.
pub const FREE_NEXT_OFFSET: usize = HDR_SIZE;
/// Offset of the backward free-list link within a free block's body.
pub const FREE_PREV_OFFSET: usize = HDR_SIZE + core::mem::size_of::<usize>();

#[inline]
unsafe fn read_link(p: BlockPtr, offset: usize) -> Option<BlockPtr> {
    let raw = (p.as_ptr().add(offset) as *const usize).read_unaligned();
    NonNull::new(raw as *mut u8)
}

#[inline]
unsafe fn write_link(p: BlockPtr, offset: usize, v: Option<BlockPtr>) {
    let raw = v.map_or(0usize, |p| p.as_ptr() as usize);
    (p.as_ptr().add(offset) as *mut usize).write_unaligned(raw);
}

/// # Safety
/// `p` must be a free block at least [`config::MIN_BLOCK_SIZE`] bytes long.
#[inline]
pub unsafe fn next_free(p: BlockPtr) -> Option<BlockPtr> {
    read_link(p, FREE_NEXT_OFFSET)
}

/// # Safety
/// Same as [`next_free`].
#[inline]
pub unsafe fn set_next_free(p: BlockPtr, v: Option<BlockPtr>) {
    write_link(p, FREE_NEXT_OFFSET, v)
}

/// # Safety
/// Same as [`next_free`].
#[inline]
pub unsafe fn prev_free(p: BlockPtr) -> Option<BlockPtr> {
    read_link(p, FREE_PREV_OFFSET)
}

/// # Safety
/// Same as [`next_free`].
#[inline]
pub unsafe fn set_prev_free(p: BlockPtr, v: Option<BlockPtr>) {
    write_link(p, FREE_PREV_OFFSET, v)
}

/// Offset of the last word of a block of the given `size`, where the free
/// predecessor's back-pointer to itself lives. O(1) predecessor lookup on
/// `free` reads this word from `size_of::<usize>()` bytes before a block
/// that has `PREV_USED == 0`.
#[inline]
fn back_pointer_offset(block_size: usize) -> usize {
    block_size - core::mem::size_of::<usize>()
}

/// Write this free block's own address into the last word of its body, so a
/// subsequent `free` of its physical successor can find it in O(1).
///
/// # Safety
/// `p` must be a free block of size `size(p)`, and `size(p)` must be at
/// least `size_of::<usize>()`, which [`config::MIN_BLOCK_SIZE`] guarantees.
#[inline]
pub unsafe fn write_self_back_pointer(p: BlockPtr) {
    let off = back_pointer_offset(size(p));
    ((p.as_ptr().add(off)) as *mut usize).write_unaligned(p.as_ptr() as usize);
}

/// Read the back-pointer stored in the last word immediately preceding
/// `p`'s header — i.e. the free predecessor's own head address.
///
/// # Safety
/// The physical predecessor of `p` must currently be a free block (so that
/// this word is a valid back-pointer and not part of someone's payload).
#[inline]
pub unsafe fn predecessor_via_back_pointer(p: BlockPtr) -> BlockPtr {
    let raw = (p.as_ptr() as *const usize).sub(1).read_unaligned();
    NonNull::new_unchecked(raw as *mut u8)
}

const _: () = {
    if ALIGNMENT < 4 {
        panic!("ALIGNMENT must be at least 4");
    }
    if config::MIN_BLOCK_SIZE < HDR_SIZE + core::mem::size_of::<usize>() {
        panic!("MIN_BLOCK_SIZE cannot fit a back-pointer");
    }
};
