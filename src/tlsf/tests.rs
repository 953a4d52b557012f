extern crate std;

use core::mem::MaybeUninit;
use std::{boxed::Box, collections::BTreeMap, prelude::v1::*};

use quickcheck_macros::quickcheck;

use super::*;

type T = Tlsf<'static, 3, 20>;

fn pool(bytes: usize) -> Box<[MaybeUninit<u8>]> {
    core::iter::repeat(MaybeUninit::new(0u8))
        .take(bytes)
        .collect::<Vec<_>>()
        .into_boxed_slice()
}

#[test]
fn empty_heap_malloc_fails() {
    let mut t: T = Tlsf::new();
    assert!(t.malloc(8).is_none());
}

#[test]
fn basic_malloc_free_roundtrip() {
    let mem = Box::leak(pool(4096));
    let mut t: T = Tlsf::new();
    t.add_pool(mem);
    let p = t.malloc(64).unwrap();
    unsafe {
        p.as_ptr().write_bytes(0xAB, 64);
        t.free(p);
    }
}

#[test]
fn malloc_zero_rounds_up_to_min_block_size() {
    let mem = Box::leak(pool(4096));
    let mut t: T = Tlsf::new();
    t.add_pool(mem);
    let p = t.malloc(0).unwrap();
    unsafe { t.free(p) };
}

#[test]
fn oversized_allocation_fails_without_corrupting_state() {
    let mem = Box::leak(pool(4096));
    let mut t: T = Tlsf::new();
    t.add_pool(mem);
    assert!(t.malloc(1 << 30).is_none());
    // the heap must still be usable afterwards
    assert!(t.malloc(64).is_some());
}

#[test]
fn coalescing_recovers_full_capacity() {
    let mem = Box::leak(pool(4096));
    let mut t: T = Tlsf::new();
    t.add_pool(mem);

    let mut ptrs = Vec::new();
    while let Some(p) = t.malloc(64) {
        ptrs.push(p);
    }
    assert!(ptrs.len() > 1);
    for p in ptrs.drain(..) {
        unsafe { t.free(p) };
    }

    // after freeing everything, a single large allocation should succeed
    // again (free-block coalescing must have merged every adjacent block
    // back together, not left a forest of small free fragments).
    let big = t.malloc(3000);
    assert!(big.is_some());
}

#[test]
fn realloc_grow_in_place_when_neighbor_is_free() {
    let mem = Box::leak(pool(4096));
    let mut t: T = Tlsf::new();
    t.add_pool(mem);

    let a = t.malloc(64).unwrap();
    let b = t.malloc(64).unwrap();
    unsafe { t.free(b) };

    unsafe {
        a.as_ptr().write_bytes(0x42, 64);
        let grown = t.realloc(a, 128).unwrap();
        assert_eq!(grown.as_ptr() as usize, a.as_ptr() as usize);
        assert_eq!(*grown.as_ptr(), 0x42);
        t.free(grown);
    }
}

#[test]
fn realloc_relocates_when_no_room_in_place() {
    let mem = Box::leak(pool(4096));
    let mut t: T = Tlsf::new();
    t.add_pool(mem);

    let a = t.malloc(64).unwrap();
    let _b = t.malloc(64).unwrap(); // keeps `a`'s neighbor allocated

    unsafe {
        a.as_ptr().write_bytes(0x7, 64);
        let moved = t.realloc(a, 512).unwrap();
        assert_eq!(*moved.as_ptr(), 0x7);
        t.free(moved);
    }
}

#[test]
fn realloc_shrink_to_zero_keeps_pointer_valid() {
    let mem = Box::leak(pool(4096));
    let mut t: T = Tlsf::new();
    t.add_pool(mem);

    let a = t.malloc(256).unwrap();
    unsafe {
        let shrunk = t.realloc(a, 0).unwrap();
        assert_eq!(shrunk.as_ptr() as usize, a.as_ptr() as usize);
        t.free(shrunk);
    }
}

#[test]
fn add_pool_chunks_regions_larger_than_max_block_size() {
    let mut t: Tlsf<'static, 3, 10> = Tlsf::new();
    // MAX_BLOCK_SIZE here is 1 << 10 == 1024; hand it a region several
    // times larger and confirm it gets split into multiple addressable
    // sub-pools rather than truncated to one.
    let mem = Box::leak(pool(1 << 14));
    t.add_pool(mem);

    let mut total = 0usize;
    while let Some(p) = t.malloc(512) {
        total += 1;
        let _ = p;
        if total > 64 {
            break; // guard against an infinite loop if chunking is broken
        }
    }
    assert!(total >= 8, "expected multiple sub-pools worth of capacity, got {}", total);
}

/// A reference model tracking every live allocation as a `[ptr, ptr+size)`
/// byte range, so it catches not just a pointer being handed out twice but
/// two distinct live allocations whose ranges overlap (a splitting or
/// size-class bug in the real allocator).
struct ShadowAllocator {
    base: usize,
    len: usize,
    live: BTreeMap<usize, usize>,
}

impl ShadowAllocator {
    fn new(base: usize, len: usize) -> Self {
        Self {
            base,
            len,
            live: BTreeMap::new(),
        }
    }

    fn allocate(&mut self, ptr: usize, size: usize) {
        let end = ptr + size;
        assert!(
            ptr >= self.base && end <= self.base + self.len,
            "allocation out of pool bounds"
        );

        if let Some((&prev_ptr, &prev_end)) = self.live.range(..ptr).next_back() {
            assert!(
                prev_end <= ptr,
                "allocation [{:#x}, {:#x}) overlaps live range [{:#x}, {:#x})",
                ptr, end, prev_ptr, prev_end
            );
        }
        if let Some((&next_ptr, &next_end)) = self.live.range(ptr..).next() {
            assert!(
                next_ptr >= end,
                "allocation [{:#x}, {:#x}) overlaps live range [{:#x}, {:#x})",
                ptr, end, next_ptr, next_end
            );
        }

        assert!(
            self.live.insert(ptr, end).is_none(),
            "allocator handed out a pointer that is already live"
        );
    }

    fn deallocate(&mut self, ptr: usize) {
        assert!(
            self.live.remove(&ptr).is_some(),
            "freed a pointer the shadow model never allocated"
        );
    }
}

#[quickcheck]
fn shadow_model_agrees_with_real_allocator(ops: Vec<(u8, u16)>) -> bool {
    let _ = env_logger::builder().is_test(true).try_init();

    const POOL_BYTES: usize = 1 << 16;
    let mem = Box::leak(pool(POOL_BYTES));
    let base = mem.as_ptr() as usize;
    log::trace!("pool = {:p}: [u8; {}]", mem, mem.len());

    let mut t: T = Tlsf::new();
    t.add_pool(mem);
    log::trace!("tlsf = {:?}", t);

    let mut shadow = ShadowAllocator::new(base, POOL_BYTES);
    let mut live: Vec<(core::ptr::NonNull<u8>, usize)> = Vec::new();

    for (choice, raw_size) in ops {
        match choice % 3 {
            0 => {
                let size = (raw_size as usize) % 2048;
                log::trace!("malloc({})", size);
                if let Some(p) = t.malloc(size) {
                    log::trace!(" -> {:?}", p);
                    shadow.allocate(p.as_ptr() as usize, size.max(T::MIN_BLOCK_SIZE));
                    live.push((p, size));
                } else {
                    log::trace!(" -> fail");
                }
            }
            1 => {
                if !live.is_empty() {
                    let idx = (raw_size as usize) % live.len();
                    let (p, _) = live.swap_remove(idx);
                    log::trace!("free({:?})", p);
                    shadow.deallocate(p.as_ptr() as usize);
                    unsafe { t.free(p) };
                }
            }
            _ => {
                if !live.is_empty() {
                    let idx = (raw_size as usize) % live.len();
                    let new_size = (raw_size as usize) % 2048;
                    let (p, _old_size) = live[idx];
                    log::trace!("realloc({:?}, {})", p, new_size);
                    shadow.deallocate(p.as_ptr() as usize);
                    if let Some(new_p) = unsafe { t.realloc(p, new_size) } {
                        log::trace!(" -> {:?}", new_p);
                        shadow.allocate(new_p.as_ptr() as usize, new_size.max(T::MIN_BLOCK_SIZE));
                        live[idx] = (new_p, new_size);
                    } else {
                        log::trace!(" -> fail");
                        shadow.allocate(p.as_ptr() as usize, _old_size.max(T::MIN_BLOCK_SIZE));
                    }
                }
            }
        }
    }

    for (p, _) in live {
        unsafe { t.free(p) };
    }
    true
}
