// SPDX-License-Identifier: MIT

//! Block arrays: the resizable, block-addressed layer every other XOZ
//! structure is read from and written to. [`array`] holds the backend-agnostic
//! bookkeeping (bounds, slack, sub-block walking); [`file`] and
//! [`segment_backed`] are the two concrete backends.

pub mod array;
#[cfg(any(feature = "std", feature = "alloc"))]
pub mod file;
#[cfg(feature = "alloc")]
pub mod segment_backed;

pub use array::{BlockArray, BlockArrayBackend, BlockSource};
