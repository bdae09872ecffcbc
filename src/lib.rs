//! A deterministic, O(1) dynamic memory allocator for a single
//! caller-supplied fixed-size region, implementing the Two-Level
//! Segregated Fit (TLSF) algorithm.
//!
//! This crate descends from the same TLSF lineage as [`rlsf`], which
//! parameterizes bitmap width and bucket counts through const generics and
//! keeps its bookkeeping in an ordinary Rust value next to the memory it
//! manages. Here the pool header lives *inside* the region itself — see
//! [`pool::Pool`] — so the whole allocator state travels with the memory
//! it describes, which is the property a fixed embedded heap needs.
//!
//! # Example
//!
//! ```
//! use core::ptr::NonNull;
//! use tlsfpool::Pool;
//!
//! let mut region = [0u8; 4096];
//! let region_ptr = unsafe { NonNull::new_unchecked(region.as_mut_ptr()) };
//! let mut pool = unsafe { Pool::init(region_ptr, region.len()) }.unwrap();
//!
//! unsafe {
//!     let p = pool.malloc(128).unwrap();
//!     pool.free(p);
//! }
//! ```
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

#[cfg(any(test, feature = "std"))]
extern crate std;

mod bits;
mod block;
mod config;
mod index;
mod map;
mod pool;

#[cfg(feature = "debug")]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "debug")))]
pub mod diag;

#[cfg(feature = "global")]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "global")))]
pub mod global;

pub use config::{ALIGNMENT, MAX_POOL_SIZE, MIN_BLOCK_SIZE};
pub use pool::{InitError, Pool};
