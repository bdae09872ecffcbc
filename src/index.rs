//! The two-level segregated free-block index: bitmaps plus per-bucket
//! doubly-linked free lists. This is the O(1) heart of the allocator,
//! structured the same way `rlsf::Tlsf`'s `fl_bitmap`/`sl_bitmap`/
//! `first_free` triple is, but embedded directly in the pool header inside
//! the caller-supplied region rather than living in a separate Rust value
//! (see `DESIGN.md` — the pool is a non-owning view, so its bookkeeping has
//! to live in the region too).

use crate::bits;
use crate::block::{self, BlockPtr};
use crate::config::{NUM_FL_ROWS, NUM_SL};
use crate::map::{self, Bucket};

#[cfg_attr(doc, svgbobdoc::transform)]
/// Bitmaps and bucket-list heads for the two-level segregated fit index.
///
/// # Data layout
///
/// <center>
/// ```svgbob
///   First level (fli)
///                                                                 NUM_FL_ROWS = 10
///                             ,-----+-----+-----+-----+-----+-----+-----+-----,
///               fl_bitmap: u16=|  0  |  0  |  1  |  0  |  0  |  0  |  0  |  0  | ...
///                             +-----+-----+-----+-----+-----+-----+-----+-----+
///                                 fli=   0     1     2     3     4     5     6
///                             '-----+-----+--+--+-----+-----+-----+-----+-----'
///                                                |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Second level (sli)                          |
///                                               v                  NUM_SL = 8
///                                ,-----+-----+-----+-----+-----+-----+-----+-----,
///        "sl_bitmap[2]: u8"    = |  0  |  0  |  1  |  0  |  0  |  0  |  0  |  0  |
///                                +-----+-----+-----+-----+-----+-----+-----+-----+
///                                  sli=   0     1     2     3     4     5     6
///                                +-----+-----+-----+-----+-----+-----+-----+-----+
///        "free_blocks[2][..]"    |     |     |  O  |     |     |     |     |     |
///                                '-----+-----+--|--+-----+-----+-----+-----+-----'
///                                               |
///                                               |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Free blocks (doubly linked via next_free/prev_free)
///                                               |
///                       ,-----------------------'
///                       | ,---+---+-------,    ,---+---+-------,
///                       '-+>O | O-+-------+----+>O |   |       |
///                         +---+---'       |    +---+---'       |
///                         '---------------'    '---------------'
/// ```
/// </center>
#[repr(C)]
pub struct FreeIndex {
    fl_bitmap: u16,
    sl_bitmap: [u8; NUM_FL_ROWS],
    free_blocks: [[Option<BlockPtr>; NUM_SL]; NUM_FL_ROWS],
}

impl FreeIndex {
    pub const INIT: Self = Self {
        fl_bitmap: 0,
        sl_bitmap: [0; NUM_FL_ROWS],
        free_blocks: [[None; NUM_SL]; NUM_FL_ROWS],
    };

    #[inline]
    fn head(&self, bucket: Bucket) -> Option<BlockPtr> {
        self.free_blocks[bucket.0 as usize][bucket.1 as usize]
    }

    /// Insert a free block, computing its bucket from its own size word.
    ///
    /// # Safety
    /// `b` must be a block owned by this pool, at least `MIN_BLOCK_SIZE`
    /// bytes, not currently a member of any free list.
    pub unsafe fn add_free(&mut self, b: BlockPtr) {
        let sz = block::size(b);
        let prev_used = block::is_prev_used(b);
        block::set_header(b, sz, false, prev_used);
        block::write_self_back_pointer(b);

        let (fli, sli) = map::map_floor(sz);
        let head = self.free_blocks[fli as usize][sli as usize];
        block::set_next_free(b, head);
        block::set_prev_free(b, None);
        if let Some(h) = head {
            block::set_prev_free(h, Some(b));
        }
        self.free_blocks[fli as usize][sli as usize] = Some(b);

        bits::set_bit16(&mut self.fl_bitmap, fli);
        bits::set_bit8(&mut self.sl_bitmap[fli as usize], sli);
    }

    /// Remove a free block from its bucket list, computing the bucket from
    /// its own (still-accurate) size word.
    ///
    /// # Safety
    /// `b` must currently be a member of the free list that its size word
    /// maps to.
    pub unsafe fn remove_free(&mut self, b: BlockPtr) {
        let sz = block::size(b);
        let (fli, sli) = map::map_floor(sz);
        let next = block::next_free(b);
        let prev = block::prev_free(b);

        match prev {
            Some(pv) => block::set_next_free(pv, next),
            None => {
                self.free_blocks[fli as usize][sli as usize] = next;
                if next.is_none() {
                    bits::clear_bit8(&mut self.sl_bitmap[fli as usize], sli);
                    if self.sl_bitmap[fli as usize] == 0 {
                        bits::clear_bit16(&mut self.fl_bitmap, fli);
                    }
                }
            }
        }
        if let Some(nx) = next {
            block::set_prev_free(nx, prev);
        }
    }

    /// Like [`Self::remove_free`], but for the common case where the caller
    /// already knows `b` is its bucket's head (e.g. straight out of
    /// [`Self::find_fit`]) and has not yet mutated any bitmap. Saves
    /// recomputing `(fli, sli)` and re-reading `b.prev_free`, which is
    /// always `None` for a head.
    ///
    /// # Safety
    /// `b` must be the current head of bucket `bucket`.
    pub unsafe fn remove_free_head(&mut self, b: BlockPtr, bucket: Bucket) {
        debug_assert_eq!(self.head(bucket), Some(b));
        let (fli, sli) = bucket;
        let next = block::next_free(b);
        self.free_blocks[fli as usize][sli as usize] = next;
        if let Some(nx) = next {
            block::set_prev_free(nx, None);
        } else {
            bits::clear_bit8(&mut self.sl_bitmap[fli as usize], sli);
            if self.sl_bitmap[fli as usize] == 0 {
                bits::clear_bit16(&mut self.fl_bitmap, fli);
            }
        }
    }

    #[inline]
    fn next_bucket(bucket: Bucket) -> Option<Bucket> {
        let (fli, sli) = bucket;
        let sli = sli + 1;
        if (sli as usize) < NUM_SL {
            Some((fli, sli))
        } else if (fli as usize + 1) < NUM_FL_ROWS {
            Some((fli + 1, 0))
        } else {
            None
        }
    }

    /// Find a free block of at least `size` bytes in O(1), falling back to
    /// a bounded first-fit scan of one bucket list when the index descent
    /// cannot pin down an exact satisfying bucket. Returns the block and
    /// the bucket it was the head of, if any (a block found via the
    /// first-fit fallback may not be the head, and must be removed with
    /// [`Self::remove_free`] instead of [`Self::remove_free_head`]).
    ///
    /// # Safety
    /// The free index must accurately reflect the pool's free blocks.
    pub unsafe fn find_fit(&self, size: usize) -> Option<(BlockPtr, Option<Bucket>)> {
        let bucket = map::map_ceil(size);

        if let Some(h) = self.head(bucket) {
            if block::size(h) >= size {
                return Some((h, Some(bucket)));
            }
        }

        if let Some(next) = Self::next_bucket(bucket) {
            if let Some(h) = self.head(next) {
                if block::size(h) >= size {
                    return Some((h, Some(next)));
                }
            }
        }

        // Bitmap descent: first look for a strictly-larger sub-class in the
        // same row, then fall back to the first non-empty higher row.
        let (fli, sli) = bucket;
        let row_mask_from = sli + 1;
        let found_sli = bits::scan_forward8(self.sl_bitmap[fli as usize], row_mask_from);
        if (found_sli as usize) < NUM_SL {
            let h = self.head((fli, found_sli));
            debug_assert!(h.is_some());
            return h.map(|h| (h, Some((fli, found_sli))));
        }

        let found_fli = bits::scan_forward16(self.fl_bitmap, fli + 1);
        if (found_fli as usize) < NUM_FL_ROWS {
            let found_sli = bits::scan_forward8(self.sl_bitmap[found_fli as usize], 0);
            debug_assert!((found_sli as usize) < NUM_SL);
            let b = (found_fli, found_sli);
            let h = self.head(b);
            debug_assert!(h.is_some());
            return h.map(|h| (h, Some(b)));
        }

        // Bounded first-fit fallback: scan the original bucket's list, which
        // may hold blocks smaller than `size` (rounding within a bucket) as
        // well as, occasionally, ones large enough that the head-only check
        // above missed.
        let mut cur = self.head(bucket);
        while let Some(b) = cur {
            if block::size(b) >= size {
                return Some((b, None));
            }
            cur = block::next_free(b);
        }

        None
    }

    #[cfg(feature = "debug")]
    pub(crate) fn is_consistent_with_bitmaps(&self) -> bool {
        for fli in 0..NUM_FL_ROWS {
            let row_nonempty = self.sl_bitmap[fli] != 0;
            if bits::get_bit16(self.fl_bitmap, fli as u32) != row_nonempty {
                return false;
            }
            for sli in 0..NUM_SL {
                let bucket_nonempty = self.free_blocks[fli][sli].is_some();
                if bits::get_bit8(self.sl_bitmap[fli], sli as u32) != bucket_nonempty {
                    return false;
                }
            }
        }
        true
    }
}
