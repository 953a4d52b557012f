//! The TLSF allocator core.
use core::{
    cmp::min,
    marker::PhantomData,
    mem::{self, MaybeUninit},
    ptr::{self, NonNull},
};

use crate::utils::{align_down, align_up, ffs};

mod map;
#[cfg(test)]
mod tests;

use map::{Dims, SL_INDEX_COUNT, SL_INDEX_COUNT_LOG2};

/// Upper bound on `FL_INDEX_COUNT` across every valid `(ALIGN_LOG2,
/// FL_INDEX_MAX)` combination (`FL_INDEX_MAX < 32`). Stable Rust cannot size
/// an array by a const-generic expression (`FL_INDEX_MAX - FL_INDEX_SHIFT +
/// 1`), so `sl_bitmap` and `blocks` are allocated at this fixed capacity and
/// only the leading `Self::FL_INDEX_COUNT` entries of each are ever touched.
const FL_INDEX_COUNT_MAX: usize = 32;

const FREE: usize = 1;
const PREV_FREE: usize = 2;
const FLAG_MASK: usize = FREE | PREV_FREE;

/// The header of a memory block, immediately preceding its payload (for a
/// used block) or its free-list links (for a free one).
///
/// `size_masks` packs the block's size in its upper bits with two flag bits
/// in the low two bits ([`FREE`], [`PREV_FREE`]), which is sound because
/// every block's size is a multiple of `ALIGN` and `ALIGN >= 4` is enforced
/// at compile time.
#[repr(C)]
struct BlockHdr {
    prev_phys: Option<NonNull<BlockHdr>>,
    size_masks: usize,
}

impl BlockHdr {
    #[inline]
    fn size(&self) -> usize {
        self.size_masks & !FLAG_MASK
    }

    #[inline]
    fn is_free(&self) -> bool {
        self.size_masks & FREE != 0
    }

    #[inline]
    fn is_prev_free(&self) -> bool {
        self.size_masks & PREV_FREE != 0
    }

    #[inline]
    fn is_last(&self) -> bool {
        self.size() == 0
    }

    #[inline]
    fn set_free(&mut self) {
        self.size_masks |= FREE;
    }

    #[inline]
    fn set_used(&mut self) {
        self.size_masks &= !FREE;
    }

    #[inline]
    fn set_prev_free(&mut self) {
        self.size_masks |= PREV_FREE;
    }

    #[inline]
    fn set_prev_used(&mut self) {
        self.size_masks &= !PREV_FREE;
    }
}

/// The header of a free memory block. Laid out so that `common` occupies
/// the same prefix as [`BlockHdr`], allowing a `NonNull<BlockHdr>` known to
/// be free to be reinterpreted as a `NonNull<FreeBlockHdr>`.
///
/// `prev_free`/`next_free` are only meaningful while the block is free; the
/// list is terminated by `None` rather than a self-addressing sentinel node
/// (see the module-level notes in `lib.rs`), so there is nothing analogous
/// to thread through on every list operation.
#[repr(C)]
struct FreeBlockHdr {
    common: BlockHdr,
    next_free: Option<NonNull<FreeBlockHdr>>,
    prev_free: Option<NonNull<FreeBlockHdr>>,
}

#[cfg_attr(doc, svgbobdoc::transform)]
/// A Two-Level Segregated Fit allocator over memory supplied by the caller.
///
/// # Data Structure Overview
///
/// <center>
/// ```svgbob
///   First level
///                                                                       FL_INDEX_COUNT
///                               ,-----+-----+-----+-----+-----+-----+-----+-----,
///               fl_bitmap: u32 = |  0  |  0  |  0  |  1  |  0  |  0  |  0  |  0  |
///                               +-----+-----+-----+-----+-----+-----+-----+-----+
///                      min size | 2¹¹ | 2¹⁰ |  2⁹ |  2⁸ |  2⁷ |  2⁶ |  2⁵ |  2⁴ |
///                               '-----+-----+--+--+-----+-----+-----+-----+-----'
///                                                    |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Second Level                                     |
///                                                    v                      SL_INDEX_COUNT = 32
///                                  ,-----+-----+-----+-----+-----+-----+-----+-----,
///          "sl_bitmap[4]: u32" =   |  0  |  0  |  1  |  0  |  0  |  0  |  0  |  0  |
///                                  +-----+-----+-----+-----+-----+-----+-----+-----+
///                                  |     |     |  O  |     |     |     |     |     |
///                                  '-----+-----+--|--+-----+-----+-----+-----+-----'
///                                                 |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Free blocks                                   |
///             ,-----------------------------------'
///             | ,---+---+-------,    ,---+---+-------,    ,---+---+-------,
///             '-+>  |  -+-------+----+>  |  -+-------+----+>  |   |       |
///               +---+---'       |    +---+---'       |    +---+---'       |
///               '---------------'    '---------------'    '---------------'
/// ```
/// </center>
///
/// `ALIGN_LOG2` and `FL_INDEX_MAX` are checked at compile time; see
/// [`Self::VALID`]. The allocator does not own the memory it manages — every
/// region is supplied by the caller via [`Self::add_pool`] and must outlive
/// `'pool`.
pub struct Tlsf<'pool, const ALIGN_LOG2: u32 = 3, const FL_INDEX_MAX: u32 = 30> {
    fl_bitmap: u32,
    sl_bitmap: [u32; FL_INDEX_COUNT_MAX],
    blocks: [[Option<NonNull<FreeBlockHdr>>; SL_INDEX_COUNT]; FL_INDEX_COUNT_MAX],
    _phantom: PhantomData<&'pool mut ()>,
}

// Safety: every block header reachable from a `Tlsf` is exclusively owned by
// that `Tlsf` (there is no interior mutability anywhere in the structure), so
// moving or sharing a `Tlsf` across threads is as safe as moving or sharing
// the memory it manages would be.
unsafe impl<const ALIGN_LOG2: u32, const FL_INDEX_MAX: u32> Send
    for Tlsf<'_, ALIGN_LOG2, FL_INDEX_MAX>
{
}
unsafe impl<const ALIGN_LOG2: u32, const FL_INDEX_MAX: u32> Sync
    for Tlsf<'_, ALIGN_LOG2, FL_INDEX_MAX>
{
}

impl<const ALIGN_LOG2: u32, const FL_INDEX_MAX: u32> Default
    for Tlsf<'_, ALIGN_LOG2, FL_INDEX_MAX>
{
    fn default() -> Self {
        Self::INIT
    }
}

impl<'pool, const ALIGN_LOG2: u32, const FL_INDEX_MAX: u32> Tlsf<'pool, ALIGN_LOG2, FL_INDEX_MAX> {
    /// Payload alignment, `1 << ALIGN_LOG2`.
    pub const ALIGN: usize = 1usize << ALIGN_LOG2;
    const FL_INDEX_SHIFT: u32 = SL_INDEX_COUNT_LOG2 + ALIGN_LOG2;
    /// Number of first-level classes.
    pub const FL_INDEX_COUNT: usize = (FL_INDEX_MAX - Self::FL_INDEX_SHIFT + 1) as usize;
    /// Sizes below this use linear (not logarithmic) subdivision.
    pub const SMALL_BLOCK_SIZE: usize = 1usize << Self::FL_INDEX_SHIFT;
    /// Largest block size this instantiation can index.
    pub const MAX_BLOCK_SIZE: usize = 1usize << FL_INDEX_MAX;
    /// Bytes separating a block's header base from its payload base.
    pub const BLOCK_HEADER_OVERHEAD: usize = align_up(mem::size_of::<BlockHdr>(), Self::ALIGN);
    /// Smallest size a free block may have (enough to hold its free-list links).
    pub const MIN_BLOCK_SIZE: usize = align_up(
        mem::size_of::<FreeBlockHdr>() - Self::BLOCK_HEADER_OVERHEAD,
        Self::ALIGN,
    );

    /// Evaluates (and, on violation, panics) at compile time. Referenced
    /// from every public constructor so that an invalid parameterization is
    /// a build error rather than a runtime assertion.
    const VALID: () = {
        if ALIGN_LOG2 >= 5 {
            const_panic!("ALIGN_LOG2 must be less than 5");
        }
        if FL_INDEX_MAX < 10 || FL_INDEX_MAX >= 32 {
            const_panic!("FL_INDEX_MAX must be in the range 10..32");
        }
        if FL_INDEX_MAX - ALIGN_LOG2 <= 5 {
            const_panic!("FL_INDEX_MAX - ALIGN_LOG2 must be greater than 5");
        }
        if Self::FL_INDEX_COUNT > FL_INDEX_COUNT_MAX {
            const_panic!("derived FL_INDEX_COUNT exceeds the allocator's fixed array capacity");
        }
    };

    /// An empty heap with no installed pool.
    pub const INIT: Self = {
        let () = Self::VALID;
        Self {
            fl_bitmap: 0,
            sl_bitmap: [0; FL_INDEX_COUNT_MAX],
            blocks: [[None; SL_INDEX_COUNT]; FL_INDEX_COUNT_MAX],
            _phantom: PhantomData,
        }
    };

    /// Creates an empty heap. Equivalent to [`Self::INIT`].
    #[inline]
    pub fn new() -> Self {
        Self::INIT
    }

    /// Creates a heap and immediately installs `mem` as its first pool.
    /// The caller-facing equivalent of a language-neutral `create_with_pool`.
    #[inline]
    pub fn new_with_pool(mem: &'pool mut [MaybeUninit<u8>]) -> Self {
        let mut tlsf = Self::INIT;
        tlsf.add_pool(mem);
        tlsf
    }

    #[inline]
    const fn dims() -> Dims {
        Dims {
            align: Self::ALIGN,
            fl_index_shift: Self::FL_INDEX_SHIFT,
            fl_index_count: Self::FL_INDEX_COUNT,
            small_block_size: Self::SMALL_BLOCK_SIZE,
            min_block_size: Self::MIN_BLOCK_SIZE,
            max_block_size: Self::MAX_BLOCK_SIZE,
        }
    }

    // ---- block-header protocol (§4.3) --------------------------------

    /// # Safety
    /// `block` must not be the pool-terminating sentinel.
    #[inline]
    unsafe fn next_phys(block: NonNull<BlockHdr>) -> NonNull<BlockHdr> {
        debug_assert!(!block.as_ref().is_last());
        NonNull::new_unchecked(
            (block.as_ptr() as *mut u8).add(Self::BLOCK_HEADER_OVERHEAD + block.as_ref().size()),
        )
        .cast()
    }

    /// Recomputes `next_phys(block)` and points its `prev_phys` back at
    /// `block`. Used whenever `block`'s address or size has just changed
    /// and an already-initialized neighbor's back-link must catch up.
    ///
    /// # Safety
    /// `next_phys(block)` must denote an already-initialized block.
    #[inline]
    unsafe fn link_next(block: NonNull<BlockHdr>) -> NonNull<BlockHdr> {
        let next = Self::next_phys(block);
        (*next.as_ptr()).prev_phys = Some(block);
        next
    }

    /// # Safety
    /// `next_phys(block)` must denote an already-initialized block.
    #[inline]
    unsafe fn mark_used(block: NonNull<BlockHdr>) {
        let next = Self::next_phys(block);
        (*next.as_ptr()).set_prev_used();
        (*block.as_ptr()).set_used();
    }

    /// # Safety
    /// `next_phys(block)` must denote an already-initialized block.
    #[inline]
    unsafe fn mark_free(block: NonNull<BlockHdr>) {
        let next = Self::link_next(block);
        (*next.as_ptr()).set_prev_free();
        (*block.as_ptr()).set_free();
    }

    #[inline]
    unsafe fn can_split(block: NonNull<BlockHdr>, size: usize) -> bool {
        block.as_ref().size() >= size + Self::BLOCK_HEADER_OVERHEAD + Self::MIN_BLOCK_SIZE
    }

    /// Divides `block` (currently of some size `>= size +
    /// BLOCK_HEADER_OVERHEAD + MIN_BLOCK_SIZE`) into a head of exactly
    /// `size` bytes and a free remainder, returning the remainder. The
    /// remainder is constructed fresh (not by preserving bits of whatever
    /// occupied that memory before) to avoid reading not-yet-initialized
    /// header bytes.
    ///
    /// # Safety
    /// `block` must be a live block and `Self::can_split(block, size)` must hold.
    unsafe fn split(block: NonNull<BlockHdr>, size: usize) -> NonNull<BlockHdr> {
        debug_assert!(Self::can_split(block, size));
        let flags = block.as_ref().size_masks & FLAG_MASK;
        let old_size = block.as_ref().size();
        (*block.as_ptr()).size_masks = size | flags;

        let remainder: NonNull<BlockHdr> =
            NonNull::new_unchecked((block.as_ptr() as *mut u8).add(Self::BLOCK_HEADER_OVERHEAD + size))
                .cast();
        let remain_size = old_size - size - Self::BLOCK_HEADER_OVERHEAD;
        *remainder.as_ptr() = BlockHdr {
            prev_phys: Some(block),
            size_masks: remain_size,
        };
        Self::mark_free(remainder);
        remainder
    }

    /// Absorbs `next` (`= next_phys(block)`, already removed from the free
    /// index by the caller) into `block`.
    ///
    /// # Safety
    /// `next == next_phys(block)`, `next` is not the sentinel, and neither
    /// block is currently on a free list.
    unsafe fn merge(block: NonNull<BlockHdr>, next: NonNull<BlockHdr>) -> NonNull<BlockHdr> {
        (*block.as_ptr()).size_masks += Self::BLOCK_HEADER_OVERHEAD + next.as_ref().size();
        Self::link_next(block);
        block
    }

    #[inline]
    unsafe fn block_to_ptr(block: NonNull<BlockHdr>) -> NonNull<u8> {
        NonNull::new_unchecked((block.as_ptr() as *mut u8).add(Self::BLOCK_HEADER_OVERHEAD))
    }

    #[inline]
    unsafe fn block_from_ptr(ptr: NonNull<u8>) -> NonNull<BlockHdr> {
        NonNull::new_unchecked((ptr.as_ptr() as *mut u8).sub(Self::BLOCK_HEADER_OVERHEAD)).cast()
    }

    // ---- bitmap-indexed free-list (§4.2) ------------------------------

    /// # Safety
    /// `block` must not currently be linked into any free list.
    unsafe fn insert_free_block(&mut self, block: NonNull<FreeBlockHdr>, fl: usize, sl: usize) {
        let old_head = self.blocks[fl][sl];
        (*block.as_ptr()).next_free = old_head;
        (*block.as_ptr()).prev_free = None;
        if let Some(head) = old_head {
            (*head.as_ptr()).prev_free = Some(block);
        }
        self.blocks[fl][sl] = Some(block);
        self.fl_bitmap |= 1 << fl;
        self.sl_bitmap[fl] |= 1 << sl;
    }

    /// # Safety
    /// `block` must currently be linked into `blocks[fl][sl]`.
    unsafe fn remove_free_block(&mut self, block: NonNull<FreeBlockHdr>, fl: usize, sl: usize) {
        let prev = block.as_ref().prev_free;
        let next = block.as_ref().next_free;
        if let Some(next) = next {
            (*next.as_ptr()).prev_free = prev;
        }
        if let Some(prev) = prev {
            (*prev.as_ptr()).next_free = next;
        } else {
            self.blocks[fl][sl] = next;
            if next.is_none() {
                self.sl_bitmap[fl] &= !(1 << sl);
                if self.sl_bitmap[fl] == 0 {
                    self.fl_bitmap &= !(1 << fl);
                }
            }
        }
    }

    /// Computes `(fl, sl)` for `block.size()` and inserts it.
    ///
    /// # Safety
    /// `block` must not currently be linked into any free list.
    #[inline]
    unsafe fn insert_block(&mut self, block: NonNull<BlockHdr>) {
        let (fl, sl) = Self::dims().mapping_insert(block.as_ref().size());
        self.insert_free_block(block.cast(), fl, sl);
    }

    /// Computes `(fl, sl)` for `block.size()` and removes it.
    ///
    /// # Safety
    /// `block` must currently be linked into the free list its size maps to.
    #[inline]
    unsafe fn block_remove(&mut self, block: NonNull<BlockHdr>) {
        let (fl, sl) = Self::dims().mapping_insert(block.as_ref().size());
        self.remove_free_block(block.cast(), fl, sl);
    }

    /// Locates the smallest non-empty class `>= (fl, sl)`, without removing
    /// anything from it.
    fn search_suitable_block(&self, fl: usize, sl: usize) -> Option<(usize, usize, NonNull<FreeBlockHdr>)> {
        let sl_map = self.sl_bitmap[fl] & (!0u32).checked_shl(sl as u32).unwrap_or(0);
        if let Some(s) = ffs(sl_map) {
            let s = s as usize;
            return self.blocks[fl][s].map(|b| (fl, s, b));
        }

        let fl_map = self.fl_bitmap & (!0u32).checked_shl(fl as u32 + 1).unwrap_or(0);
        let f = ffs(fl_map)? as usize;
        let s = ffs(self.sl_bitmap[f])? as usize;
        self.blocks[f][s].map(|b| (f, s, b))
    }

    // ---- split/merge orchestration -------------------------------------

    /// # Safety
    /// `block` must be a currently-free block not linked into any free list.
    unsafe fn block_trim_free(&mut self, block: NonNull<BlockHdr>, size: usize) {
        debug_assert!(block.as_ref().is_free());
        if Self::can_split(block, size) {
            let remainder = Self::split(block, size);
            (*remainder.as_ptr()).set_prev_free();
            self.insert_block(remainder);
        }
    }

    /// # Safety
    /// `block` must be a currently-used block.
    unsafe fn block_trim_used(&mut self, block: NonNull<BlockHdr>, size: usize) {
        debug_assert!(!block.as_ref().is_free());
        if Self::can_split(block, size) {
            let remainder = Self::split(block, size);
            (*remainder.as_ptr()).set_prev_used();
            let remainder = self.block_merge_next(remainder);
            self.insert_block(remainder);
        }
    }

    /// # Safety
    /// `block` must be a live block not linked into any free list.
    unsafe fn block_merge_prev(&mut self, block: NonNull<BlockHdr>) -> NonNull<BlockHdr> {
        if block.as_ref().is_prev_free() {
            let prev = block.as_ref().prev_phys.unwrap();
            debug_assert!(prev.as_ref().is_free());
            self.block_remove(prev);
            Self::merge(prev, block)
        } else {
            block
        }
    }

    /// # Safety
    /// `block` must be a live, non-sentinel block not linked into any free list.
    unsafe fn block_merge_next(&mut self, block: NonNull<BlockHdr>) -> NonNull<BlockHdr> {
        let next = Self::next_phys(block);
        if next.as_ref().is_free() {
            self.block_remove(next);
            Self::merge(block, next)
        } else {
            block
        }
    }

    // ---- public allocation protocol (§4.4) -----------------------------

    /// Installs `mem` as an additional pool. `mem` need not be aligned or
    /// exactly sized; it is rounded inward to `ALIGN` and, if larger than
    /// one allocator can address, chunked into multiple sentinel-terminated
    /// sub-pools (each capped at `MAX_BLOCK_SIZE`). A region too small to
    /// hold one block is silently ignored, mirroring how an oversize
    /// request is silently refused by [`Self::malloc`] rather than panicking.
    pub fn add_pool(&mut self, mem: &'pool mut [MaybeUninit<u8>]) {
        let () = Self::VALID;

        let start = mem.as_mut_ptr() as usize;
        let end = start.wrapping_add(mem.len());
        let start = align_up(start, Self::ALIGN);
        let end = align_down(end, Self::ALIGN);
        if end <= start {
            return;
        }

        let mut cursor = start as *mut u8;
        let mut remaining = end - start;
        let reserved = 2 * Self::BLOCK_HEADER_OVERHEAD;
        // Capped a strict `ALIGN` below `MAX_BLOCK_SIZE`, not at it: a block of
        // exactly `MAX_BLOCK_SIZE` bytes maps (via `fls`) to `FL_INDEX_COUNT`,
        // one past the last valid first-level class.
        let chunk_cap = Self::MAX_BLOCK_SIZE - Self::ALIGN;

        while remaining > reserved {
            let usable = align_down((remaining - reserved).min(chunk_cap), Self::ALIGN);
            if usable < Self::MIN_BLOCK_SIZE {
                break;
            }

            // Safety: `cursor` is `ALIGN`-aligned, `'pool`-owned, and holds
            // at least `usable + reserved` untouched bytes.
            unsafe { self.add_single_pool(cursor, usable) };

            let consumed = usable + reserved;
            cursor = cursor.wrapping_add(consumed);
            remaining -= consumed;
        }
    }

    /// Installs one pool of exactly `usable` free bytes at `mem`, bracketed
    /// by a zero-size used sentinel. Both headers are written as complete,
    /// freshly-constructed values (rather than built up via the
    /// read-modify-write bit-setters used elsewhere) because this memory
    /// has never held a valid `BlockHdr`, and reading it first — even just
    /// to preserve its flag bits — would read uninitialized bytes.
    ///
    /// # Safety
    /// `mem` must be `ALIGN`-aligned and own at least `usable + 2 *
    /// BLOCK_HEADER_OVERHEAD` bytes that outlive `'pool`.
    unsafe fn add_single_pool(&mut self, mem: *mut u8, usable: usize) {
        let block: NonNull<BlockHdr> = NonNull::new_unchecked(mem).cast();
        *block.as_ptr() = BlockHdr {
            prev_phys: None,
            size_masks: usable | FREE,
        };

        let sentinel = Self::next_phys(block);
        *sentinel.as_ptr() = BlockHdr {
            prev_phys: Some(block),
            size_masks: PREV_FREE,
        };

        self.insert_block(block);
    }

    /// Attempts to allocate a block of at least `size` bytes. Returns the
    /// payload's address on success.
    ///
    /// # Time complexity
    /// O(1): two bounded bit scans, a constant-time list splice, and at
    /// most one split.
    pub fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let dims = Self::dims();
        let size = dims.adjust_size(size)?;
        let (fl, sl) = dims.mapping_search(size);
        if fl >= Self::FL_INDEX_COUNT {
            return None;
        }
        let (fl, sl, block) = self.search_suitable_block(fl, sl)?;

        unsafe {
            debug_assert!(block.as_ref().common.size() >= size);
            self.remove_free_block(block, fl, sl);

            let block = block.cast::<BlockHdr>();
            self.block_trim_free(block, size);
            Self::mark_used(block);
            Some(Self::block_to_ptr(block))
        }
    }

    /// Releases a block previously returned by [`Self::malloc`] or
    /// [`Self::realloc`].
    ///
    /// # Safety
    /// `ptr` must denote a block currently allocated from `self`, and must
    /// not be used (read, written, or freed again) afterwards.
    ///
    /// # Time complexity
    /// O(1): at most two merges and one list insertion.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let mut block = Self::block_from_ptr(ptr);
        debug_assert!(!block.as_ref().is_free(), "double free or corrupted pointer");

        Self::mark_free(block);
        block = self.block_merge_prev(block);
        block = self.block_merge_next(block);
        self.insert_block(block);
    }

    /// Resizes a block previously returned by [`Self::malloc`] or
    /// [`Self::realloc`] to `size` bytes, preserving `min(old_size, size)`
    /// bytes of its contents. Returns the (possibly unchanged) payload
    /// address on success. On failure, returns `None` and leaves `ptr`
    /// valid and unmodified.
    ///
    /// `realloc(ptr, 0)` shrinks `ptr` to [`Self::MIN_BLOCK_SIZE`] rather
    /// than freeing it; see the design notes for the rationale.
    ///
    /// # Safety
    /// `ptr` must denote a block currently allocated from `self`. If this
    /// call returns a pointer other than `ptr`, `ptr` must not be used
    /// afterwards.
    ///
    /// # Time complexity
    /// O(`min(old_size, size)`) in the relocating case (a `memcpy` of
    /// caller-known size); O(1) otherwise.
    pub unsafe fn realloc(&mut self, ptr: NonNull<u8>, size: usize) -> Option<NonNull<u8>> {
        let block = Self::block_from_ptr(ptr);
        debug_assert!(!block.as_ref().is_free());

        let dims = Self::dims();
        let current = block.as_ref().size();
        let next = Self::next_phys(block);
        let combined = current + Self::BLOCK_HEADER_OVERHEAD + next.as_ref().size();
        let size = dims.adjust_size(size)?;

        if size > current && (!next.as_ref().is_free() || size > combined) {
            // Growth that cannot be satisfied in place: relocate. `ptr`
            // remains valid and untouched if `malloc` fails here.
            let new_ptr = self.malloc(size)?;
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), min(current, size));
            self.free(ptr);
            return Some(new_ptr);
        }

        let block = if size > current {
            // In-place growth: absorb the free successor, then trim below.
            self.block_remove(next);
            let merged = Self::merge(block, next);
            Self::mark_used(merged);
            merged
        } else {
            block
        };

        self.block_trim_used(block, size);
        Some(Self::block_to_ptr(block))
    }
}
