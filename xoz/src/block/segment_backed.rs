// SPDX-License-Identifier: MIT

//! The segment-backed [`BlockArrayBackend`]: a block array whose storage is
//! itself a [`Segment`] of extents carved out of a parent [`BlockSource`] by
//! an [`Allocator`]. This is what closes the recursive loop: the allocator's
//! own bookkeeping structures, and descriptor sets nested inside a bigger
//! repository, are themselves stored in block arrays backed by segments.

use crate::allocator::Allocator;
use crate::block::array::{BlockArrayBackend, BlockSource};
use crate::error::{BlockArrayError, BlockArrayResult};
use crate::extent::Extent;
use crate::segment::Segment;

/// Backs a [`crate::block::array::BlockArray`] with a growable [`Segment`]
/// allocated, extent by extent, from a parent block source.
///
/// Shrinking only ever removes whole trailing extents or splits the last one
/// short; it never asks the allocator to give anything back until
/// [`BlockArrayBackend::impl_release`] is called, mirroring how plain
/// shrinks on a file-backed array only touch the logical window.
pub struct SegmentBackend<'p, P: BlockSource + ?Sized, A: Allocator> {
    parent: &'p mut P,
    alloc: &'p mut A,
    segment: Segment,
    blk_sz: u32,
}

impl<'p, P: BlockSource + ?Sized, A: Allocator> SegmentBackend<'p, P, A> {
    pub fn new(parent: &'p mut P, alloc: &'p mut A, segment: Segment) -> Self {
        let blk_sz = parent.blk_sz();
        SegmentBackend {
            parent,
            alloc,
            segment,
            blk_sz,
        }
    }

    /// The segment currently describing this array's accessible and slack
    /// blocks combined.
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    fn alloc_err(e: crate::error::AllocatorError) -> BlockArrayError {
        BlockArrayError::Other(match e {
            crate::error::AllocatorError::OutOfBlocks => "allocator is out of blocks",
            _ => "allocator error",
        })
    }

    /// Translates a block number local to this array's own address space
    /// (0-based, counting whole blocks across the segment's extents in
    /// order) into the parent block source's block number.
    fn translate(&self, local_blk_nr: u32) -> BlockArrayResult<u32> {
        let mut remaining = local_blk_nr;
        for ext in self.segment.exts() {
            let cnt = ext.blk_cnt() as u32;
            if remaining < cnt {
                return Ok(ext.blk_nr() + remaining);
            }
            remaining -= cnt;
        }
        Err(BlockArrayError::Other("local block number not covered by any extent"))
    }
}

impl<'p, P: BlockSource + ?Sized, A: Allocator> BlockArrayBackend for SegmentBackend<'p, P, A> {
    fn impl_grow(&mut self, blk_cnt: u16) -> BlockArrayResult<(u32, u16)> {
        let first_local_blk_nr = self.segment.full_blk_cnt() as u32;
        let fresh = self.alloc.alloc(blk_cnt as u32).map_err(Self::alloc_err)?;
        let got: u32 = fresh.full_blk_cnt() as u32;
        self.segment.extend(fresh);
        Ok((first_local_blk_nr, got.min(u16::MAX as u32) as u16))
    }

    fn impl_shrink(&mut self, blk_cnt: u32, past_end_blk_nr: u32) -> BlockArrayResult<u32> {
        // The abstract layer always defers physical release; this backend
        // never shrinks the segment's footprint here.
        let _ = (blk_cnt, past_end_blk_nr);
        Ok(0)
    }

    fn impl_release(&mut self, past_end_blk_nr: u32) -> BlockArrayResult<u32> {
        // `past_end_blk_nr` is already expressed in this array's own local
        // block-number space, same as the segment's cumulative block count.
        let keep = past_end_blk_nr;

        let total: u32 = self.segment.full_blk_cnt() as u32;
        if total <= keep {
            return Ok(0);
        }

        let mut to_release = total - keep;
        let mut released_ext_cnt = 0u32;

        while to_release > 0 {
            let last = match self.segment.exts().last() {
                Some(e) => *e,
                None => break,
            };
            let last_cnt = last.blk_cnt() as u32;

            if last_cnt <= to_release {
                self.segment.remove_last_extent();
                self.alloc.dealloc(single_extent_segment(last)).map_err(Self::alloc_err)?;
                to_release -= last_cnt;
                released_ext_cnt += last_cnt;
            } else {
                let head_cnt = (last_cnt - to_release) as u16;
                self.segment.remove_last_extent();
                let (head, tail) = last.split(head_cnt);
                self.segment.add_extent(head);
                self.alloc.dealloc(single_extent_segment(tail)).map_err(Self::alloc_err)?;
                released_ext_cnt += to_release;
                to_release = 0;
            }
        }

        Ok(released_ext_cnt)
    }

    fn impl_read(&mut self, blk_nr: u32, offset: u32, buf: &mut [u8]) -> BlockArrayResult<()> {
        let parent_blk_nr = self.translate(blk_nr)?;
        let ext = Extent::new_blocks(parent_blk_nr, 1);
        let n = self.parent.read_extent(&ext, buf, buf.len() as u32, offset)?;
        if (n as usize) < buf.len() {
            return Err(BlockArrayError::Other("short read from parent block source"));
        }
        Ok(())
    }

    fn impl_write(&mut self, blk_nr: u32, offset: u32, buf: &[u8]) -> BlockArrayResult<()> {
        let parent_blk_nr = self.translate(blk_nr)?;
        let ext = Extent::new_blocks(parent_blk_nr, 1);
        let n = self.parent.write_extent(&ext, buf, buf.len() as u32, offset)?;
        if (n as usize) < buf.len() {
            return Err(BlockArrayError::Other("short write to parent block source"));
        }
        Ok(())
    }
}

fn single_extent_segment(ext: Extent) -> Segment {
    let mut s = Segment::new();
    s.add_extent(ext);
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::BumpAllocator;
    use crate::block::array::BlockArray;
    use crate::block::file::MemBackend;

    fn parent(blk_sz: u32, blk_cnt: u32) -> BlockArray<MemBackend> {
        let (backend, past_end) = MemBackend::create(blk_sz, blk_cnt);
        BlockArray::new(backend, blk_sz, 0, past_end).unwrap()
    }

    #[test]
    fn grow_allocates_from_parent_and_extends_segment() {
        let mut p = parent(128, 100);
        let mut alloc = BumpAllocator::new(0);
        let backend = SegmentBackend::new(&mut p, &mut alloc, Segment::new());
        let mut arr = BlockArray::new(backend, 128, 0, 0).unwrap();

        let first = arr.grow_by_blocks(4).unwrap();
        assert_eq!(first, 0);
        assert_eq!(arr.backend().segment().full_blk_cnt(), 4);
    }

    #[test]
    fn release_trims_trailing_extent_down_to_past_end() {
        let mut p = parent(128, 100);
        let mut alloc = BumpAllocator::new(0);
        let backend = SegmentBackend::new(&mut p, &mut alloc, Segment::new());
        let mut arr = BlockArray::new(backend, 128, 0, 0).unwrap();

        arr.grow_by_blocks(8).unwrap();
        arr.shrink_by_blocks(3).unwrap();
        assert_eq!(arr.backend().segment().full_blk_cnt(), 8);

        let released = arr.release_blocks().unwrap();
        assert_eq!(released, 3);
        assert_eq!(arr.backend().segment().full_blk_cnt(), 5);
    }

    #[test]
    fn read_write_roundtrips_through_parent() {
        let mut p = parent(128, 100);
        let mut alloc = BumpAllocator::new(0);
        let backend = SegmentBackend::new(&mut p, &mut alloc, Segment::new());
        let mut arr = BlockArray::new(backend, 128, 0, 0).unwrap();

        arr.grow_by_blocks(2).unwrap();
        let ext = Extent::new_blocks(0, 2);
        arr.write_extent(&ext, &[9u8; 256], 256, 0).unwrap();
        let mut out = [0u8; 256];
        arr.read_extent(&ext, &mut out, 256, 0).unwrap();
        assert!(out.iter().all(|&b| b == 9));
    }
}
