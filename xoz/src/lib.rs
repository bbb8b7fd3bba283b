// SPDX-License-Identifier: MIT
#![cfg_attr(not(feature = "std"), no_std)]

//! XOZ: a single-file, block-addressed storage engine. This crate covers
//! its core, backend-agnostic layers — the block array, the segment codec,
//! and the descriptor codec — not the outer file framing (header, trailer,
//! checksum) or the free-space allocator's internal policy, both of which
//! are consumed here only through narrow interfaces.

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod bits;
pub mod error;
mod macros;

pub mod extent;

#[cfg(feature = "alloc")]
pub mod segment;

#[cfg(feature = "alloc")]
pub mod allocator;

#[cfg(feature = "alloc")]
pub mod block;

#[cfg(feature = "alloc")]
pub mod segment_io;

#[cfg(feature = "alloc")]
pub mod descriptor;

pub mod prelude {
    pub use super::error::*;
    pub use super::extent::Extent;

    #[cfg(feature = "alloc")]
    pub use super::segment::Segment;
    #[cfg(feature = "alloc")]
    pub use super::allocator::{Allocator, BumpAllocator};
    #[cfg(feature = "alloc")]
    pub use super::block::{BlockArray, BlockArrayBackend, BlockSource};
    #[cfg(feature = "alloc")]
    pub use super::descriptor::{Descriptor, DescriptorHeader};
    #[cfg(feature = "alloc")]
    pub use super::segment_io::SegmentIO;
}
