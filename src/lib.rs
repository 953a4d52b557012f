//! A Two-Level Segregated Fit (TLSF) dynamic memory allocator.
//!
//! [`Tlsf`] manages one or more caller-supplied memory regions ("pools") and
//! hands out allocations from them in amortized O(1) time, with O(1)
//! deallocation and in-place-growth reallocation. It does not call into the
//! global allocator, the OS, or any other external source of memory — every
//! byte it ever returns from [`Tlsf::malloc`] came from a region the caller
//! previously passed to [`Tlsf::add_pool`]. This makes it suitable as the
//! innermost allocator in `no_std` contexts: bare-metal firmware, kernels,
//! and custom `GlobalAlloc` backends alike.
//!
//! ```
//! use core::mem::MaybeUninit;
//! use tlsf::Tlsf;
//!
//! let mut pool = [MaybeUninit::new(0u8); 4096];
//! let mut tlsf: Tlsf<'_, 3, 20> = Tlsf::new_with_pool(&mut pool);
//!
//! let p = tlsf.malloc(100).unwrap();
//! unsafe { tlsf.free(p) };
//! ```
//!
//! # Feature flags
//!
//! - `std` — currently unused by the allocator itself (which is `no_std`
//!   unconditionally); reserved for host-only test and benchmark helpers.
//! - `doc_cfg` — enables the inline diagrams in this documentation; only
//!   meaningful when building docs.
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

/// Panics at compile time with `msg`. A thin wrapper over `panic!` so that
/// every const-eval assertion in this crate reads the same way and can be
/// grepped for in one place.
macro_rules! const_panic {
    ($msg:expr) => {
        panic!($msg)
    };
}

mod tlsf;
mod utils;

pub use crate::tlsf::Tlsf;

#[cfg(test)]
extern crate std;
