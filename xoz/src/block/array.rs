// SPDX-License-Identifier: MIT

//! The abstract block array: bounds checking, slack bookkeeping and
//! sub-block bitmap walking, generic over a [`BlockArrayBackend`] that
//! supplies the five primitives a concrete storage medium must implement.

use crate::error::{BlockArrayError, BlockArrayResult};
use crate::extent::{Extent, SUBBLK_CNT_PER_BLK};

/// The five operations a concrete block array backend must provide. All the
/// bookkeeping (bounds, slack, EOF, sub-block walking) lives in
/// [`BlockArray`] itself; a backend only has to move bytes and adjust its
/// own physical size.
pub trait BlockArrayBackend {
    /// Grows the backend by at least `blk_cnt` blocks. Returns the first
    /// newly-accessible block number and how many blocks were actually
    /// added (must be `>= blk_cnt`).
    fn impl_grow(&mut self, blk_cnt: u16) -> BlockArrayResult<(u32, u16)>;

    /// Shrinks the backend by up to `blk_cnt` blocks, deferring the rest as
    /// slack at its own discretion. Returns how many blocks were actually,
    /// physically removed. `past_end_blk_nr` is the array's accessible
    /// bound *before* this shrink is applied, letting the backend work out
    /// how much slack it already holds without keeping its own copy of
    /// state that the abstract layer already owns.
    fn impl_shrink(&mut self, blk_cnt: u32, past_end_blk_nr: u32) -> BlockArrayResult<u32>;

    /// Frees all pending slack down to `past_end_blk_nr`. Returns how many
    /// blocks were physically removed.
    fn impl_release(&mut self, past_end_blk_nr: u32) -> BlockArrayResult<u32>;

    /// Reads `buf.len()` bytes at byte offset `offset` from the start of
    /// block `blk_nr`'s region.
    fn impl_read(&mut self, blk_nr: u32, offset: u32, buf: &mut [u8]) -> BlockArrayResult<()>;

    /// Writes `buf.len()` bytes at byte offset `offset` from the start of
    /// block `blk_nr`'s region.
    fn impl_write(&mut self, blk_nr: u32, offset: u32, buf: &[u8]) -> BlockArrayResult<()>;
}

/// Lets other components (Segment IO, the segment-backed array's parent)
/// address a block array generically without depending on its concrete
/// backend type.
pub trait BlockSource {
    fn blk_sz(&self) -> u32;
    fn blk_sz_order(&self) -> u8;
    fn read_extent(&mut self, ext: &Extent, buf: &mut [u8], max: u32, start: u32) -> BlockArrayResult<u32>;
    fn write_extent(&mut self, ext: &Extent, buf: &[u8], max: u32, start: u32) -> BlockArrayResult<u32>;
}

/// A resizable, block-addressed space built over a [`BlockArrayBackend`].
///
/// Blocks `[0, begin_blk_nr)` are reserved for an outer layer and never
/// touched. Blocks `[begin_blk_nr, past_end_blk_nr)` are accessible.
/// `[past_end_blk_nr, real_past_end_blk_nr)` is slack: blocks the backend
/// still owns physically but that are not yet visible to readers.
pub struct BlockArray<B: BlockArrayBackend> {
    backend: B,
    blk_sz_order: u8,
    suballoc_enabled: bool,
    begin_blk_nr: u32,
    past_end_blk_nr: u32,
    real_past_end_blk_nr: u32,
}

/// Smallest legal block size: `2^7 = 128` bytes.
const MIN_BLK_SZ_ORDER: u8 = 7;
/// Largest legal block size: `2^16 = 65536` bytes.
const MAX_BLK_SZ_ORDER: u8 = 16;

impl<B: BlockArrayBackend> BlockArray<B> {
    /// Wraps `backend` as a block array with the given geometry. `blk_sz`
    /// must be a power of two in `[128, 65536]`; `begin_blk_nr` must be
    /// `<= past_end_blk_nr`.
    pub fn new(backend: B, blk_sz: u32, begin_blk_nr: u32, past_end_blk_nr: u32) -> BlockArrayResult<Self> {
        if blk_sz.count_ones() != 1 {
            return Err(BlockArrayError::Other("block size must be a power of two"));
        }
        let blk_sz_order = blk_sz.trailing_zeros() as u8;
        if !(MIN_BLK_SZ_ORDER..=MAX_BLK_SZ_ORDER).contains(&blk_sz_order) {
            return Err(BlockArrayError::Other("block size out of the [128, 65536] range"));
        }
        if begin_blk_nr > past_end_blk_nr {
            return Err(BlockArrayError::Other("begin_blk_nr is past past_end_blk_nr"));
        }

        let subblk_sz = 1u32 << (blk_sz_order - crate::extent::SUBBLK_SIZE_ORDER);
        let suballoc_enabled = blk_sz_order >= crate::extent::SUBBLK_SIZE_ORDER && subblk_sz >= 1;

        Ok(BlockArray {
            backend,
            blk_sz_order,
            suballoc_enabled,
            begin_blk_nr,
            past_end_blk_nr,
            real_past_end_blk_nr: past_end_blk_nr,
        })
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[inline]
    pub fn blk_sz(&self) -> u32 {
        1 << self.blk_sz_order
    }

    #[inline]
    pub fn blk_sz_order(&self) -> u8 {
        self.blk_sz_order
    }

    #[inline]
    pub fn subblk_sz(&self) -> u32 {
        self.blk_sz() >> crate::extent::SUBBLK_SIZE_ORDER
    }

    #[inline]
    pub fn suballoc_enabled(&self) -> bool {
        self.suballoc_enabled
    }

    #[inline]
    pub fn begin_blk_nr(&self) -> u32 {
        self.begin_blk_nr
    }

    #[inline]
    pub fn past_end_blk_nr(&self) -> u32 {
        self.past_end_blk_nr
    }

    #[inline]
    pub fn real_past_end_blk_nr(&self) -> u32 {
        self.real_past_end_blk_nr
    }

    #[inline]
    pub fn blk_cnt(&self) -> u32 {
        self.past_end_blk_nr - self.begin_blk_nr
    }

    /// Total blocks the backend physically holds, accessible or slack.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.real_past_end_blk_nr - self.begin_blk_nr
    }

    /// Extends the accessible window by `blk_cnt` blocks, reusing slack
    /// first. Returns the first newly-accessible block number.
    pub fn grow_by_blocks(&mut self, blk_cnt: u16) -> BlockArrayResult<u32> {
        if blk_cnt == 0 {
            return Err(BlockArrayError::Other("grow of 0 blocks is not allowed"));
        }

        let first_new_blk_nr = self.past_end_blk_nr;
        let slack = self.real_past_end_blk_nr - self.past_end_blk_nr;

        if slack >= blk_cnt as u32 {
            self.past_end_blk_nr += blk_cnt as u32;
            return Ok(first_new_blk_nr);
        }

        let needed = blk_cnt as u32 - slack;
        let needed: u16 = needed.min(u16::MAX as u32) as u16;
        let (_, real_blk_cnt) = self.backend.impl_grow(needed)?;
        debug_assert!(real_blk_cnt as u32 >= needed as u32);

        self.real_past_end_blk_nr += real_blk_cnt as u32;
        self.past_end_blk_nr = self.real_past_end_blk_nr;

        Ok(first_new_blk_nr)
    }

    /// Contracts the accessible window by `blk_cnt` blocks. The backend may
    /// keep some of them as slack.
    pub fn shrink_by_blocks(&mut self, blk_cnt: u32) -> BlockArrayResult<()> {
        if blk_cnt == 0 {
            return Err(BlockArrayError::Other("shrink of 0 blocks is not allowed"));
        }
        if blk_cnt > self.blk_cnt() {
            return Err(BlockArrayError::UnexpectedShorten {
                requested: blk_cnt,
                available: self.blk_cnt(),
            });
        }

        let real_blk_cnt = self.backend.impl_shrink(blk_cnt, self.past_end_blk_nr)?;
        self.past_end_blk_nr -= blk_cnt;
        self.real_past_end_blk_nr -= real_blk_cnt;

        Ok(())
    }

    /// Asks the backend to free all pending slack. Returns how many blocks
    /// were physically removed.
    pub fn release_blocks(&mut self) -> BlockArrayResult<u32> {
        let real_blk_cnt = self.backend.impl_release(self.past_end_blk_nr)?;
        self.real_past_end_blk_nr -= real_blk_cnt;
        Ok(real_blk_cnt)
    }

    fn fail_if_out_of_boundaries(&self, ext: &Extent) -> BlockArrayResult<()> {
        let within = ext.blk_nr() >= self.begin_blk_nr
            && ext.blk_nr() < self.past_end_blk_nr
            && ext.end_blk_nr() <= self.past_end_blk_nr;
        if within {
            Ok(())
        } else {
            Err(BlockArrayError::ExtentOutOfBounds)
        }
    }

    /// Bounds-checks `ext` and clamps `max` against the extent's usable
    /// data space past `start`. Returns the effective byte count to
    /// move, `0` meaning EOF.
    fn chk_extent_for_rw(&self, ext: &Extent, max: u32, start: u32) -> BlockArrayResult<u32> {
        self.fail_if_out_of_boundaries(ext)?;

        let usable = ext.data_space_size(self.blk_sz_order);
        if start as u64 >= usable {
            return Ok(0);
        }
        let remain = (usable - start as u64) as u32;
        Ok(remain.min(max))
    }

    /// Copies bytes from `ext`'s backing into `buf`, starting `start` bytes
    /// into the extent. Returns the actual byte count moved (`0` at EOF).
    pub fn read_extent(&mut self, ext: &Extent, buf: &mut [u8], max: u32, start: u32) -> BlockArrayResult<u32> {
        let to_rw = self.chk_extent_for_rw(ext, max, start)?;
        if to_rw == 0 {
            return Ok(0);
        }

        if ext.is_suballoc() {
            let subblk_sz = self.subblk_sz();
            let mut doff = 0u32;
            for (blk_off, len) in suballoc_runs(ext.bitmap(), subblk_sz, start, to_rw) {
                self.backend
                    .impl_read(ext.blk_nr(), blk_off, &mut buf[doff as usize..(doff + len) as usize])?;
                doff += len;
            }
        } else {
            self.backend.impl_read(ext.blk_nr(), start, &mut buf[..to_rw as usize])?;
        }

        Ok(to_rw)
    }

    /// Dual of [`BlockArray::read_extent`].
    pub fn write_extent(&mut self, ext: &Extent, buf: &[u8], max: u32, start: u32) -> BlockArrayResult<u32> {
        let to_rw = self.chk_extent_for_rw(ext, max, start)?;
        if to_rw == 0 {
            return Ok(0);
        }

        if ext.is_suballoc() {
            let subblk_sz = self.subblk_sz();
            let mut soff = 0u32;
            for (blk_off, len) in suballoc_runs(ext.bitmap(), subblk_sz, start, to_rw) {
                self.backend
                    .impl_write(ext.blk_nr(), blk_off, &buf[soff as usize..(soff + len) as usize])?;
                soff += len;
            }
        } else {
            self.backend.impl_write(ext.blk_nr(), start, &buf[..to_rw as usize])?;
        }

        Ok(to_rw)
    }
}

impl<B: BlockArrayBackend> BlockSource for BlockArray<B> {
    #[inline]
    fn blk_sz(&self) -> u32 {
        BlockArray::blk_sz(self)
    }

    #[inline]
    fn blk_sz_order(&self) -> u8 {
        self.blk_sz_order
    }

    #[inline]
    fn read_extent(&mut self, ext: &Extent, buf: &mut [u8], max: u32, start: u32) -> BlockArrayResult<u32> {
        BlockArray::read_extent(self, ext, buf, max, start)
    }

    #[inline]
    fn write_extent(&mut self, ext: &Extent, buf: &[u8], max: u32, start: u32) -> BlockArrayResult<u32> {
        BlockArray::write_extent(self, ext, buf, max, start)
    }
}

/// Computes the `(block-local byte offset, length)` runs to touch within a
/// single sub-allocated block, walking the 16-bit bitmap most-significant
/// bit first (bit 15 is sub-block 0), skipping `start` bytes' worth of set
/// sub-blocks before it starts copying, and stopping once `remain` bytes
/// have been accounted for.
fn suballoc_runs(bitmap: u16, subblk_sz: u32, mut start: u32, mut remain: u32) -> alloc::vec::Vec<(u32, u32)> {
    let mut runs = alloc::vec::Vec::new();
    let mut blk_offset = 0u32;

    for i in 0..SUBBLK_CNT_PER_BLK {
        if remain == 0 {
            break;
        }
        let bit = 1u16 << (SUBBLK_CNT_PER_BLK - 1 - i);
        if bitmap & bit != 0 {
            if start >= subblk_sz {
                start -= subblk_sz;
            } else {
                let copy_sz = (subblk_sz - start).min(remain);
                runs.push((blk_offset + start, copy_sz));
                remain -= copy_sz;
                start = 0;
            }
        }
        blk_offset += subblk_sz;
    }

    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// A plain in-memory backend used only to exercise `BlockArray`'s own
    /// bookkeeping in isolation from any real storage medium.
    struct MemBackend {
        buf: Vec<u8>,
        blk_sz: u32,
        grows: u32,
        shrinks: u32,
        releases: u32,
    }

    impl MemBackend {
        fn new(blk_sz: u32, initial_blk_cnt: u32) -> Self {
            MemBackend {
                buf: vec![0u8; (blk_sz * initial_blk_cnt) as usize],
                blk_sz,
                grows: 0,
                shrinks: 0,
                releases: 0,
            }
        }
    }

    impl BlockArrayBackend for MemBackend {
        fn impl_grow(&mut self, blk_cnt: u16) -> BlockArrayResult<(u32, u16)> {
            self.grows += 1;
            let first = (self.buf.len() / self.blk_sz as usize) as u32;
            self.buf.resize(self.buf.len() + blk_cnt as usize * self.blk_sz as usize, 0);
            Ok((first, blk_cnt))
        }

        fn impl_shrink(&mut self, _blk_cnt: u32, _past_end_blk_nr: u32) -> BlockArrayResult<u32> {
            self.shrinks += 1;
            Ok(0)
        }

        fn impl_release(&mut self, _past_end_blk_nr: u32) -> BlockArrayResult<u32> {
            self.releases += 1;
            Ok(0)
        }

        fn impl_read(&mut self, blk_nr: u32, offset: u32, buf: &mut [u8]) -> BlockArrayResult<()> {
            let pos = blk_nr as usize * self.blk_sz as usize + offset as usize;
            buf.copy_from_slice(&self.buf[pos..pos + buf.len()]);
            Ok(())
        }

        fn impl_write(&mut self, blk_nr: u32, offset: u32, buf: &[u8]) -> BlockArrayResult<()> {
            let pos = blk_nr as usize * self.blk_sz as usize + offset as usize;
            self.buf[pos..pos + buf.len()].copy_from_slice(buf);
            Ok(())
        }
    }

    fn arr(blk_sz: u32, begin: u32, past_end: u32) -> BlockArray<MemBackend> {
        BlockArray::new(MemBackend::new(blk_sz, past_end), blk_sz, begin, past_end).unwrap()
    }

    #[test]
    fn rejects_non_power_of_two_blk_sz() {
        assert!(BlockArray::new(MemBackend::new(100, 1), 100, 0, 1).is_err());
    }

    #[test]
    fn rejects_blk_sz_below_128() {
        assert!(BlockArray::new(MemBackend::new(64, 1), 64, 0, 1).is_err());
    }

    #[test]
    fn grow_zero_is_rejected() {
        let mut a = arr(128, 0, 4);
        assert!(a.grow_by_blocks(0).is_err());
    }

    #[test]
    fn grow_reuses_slack_before_calling_backend() {
        let mut a = arr(128, 0, 4);
        a.shrink_by_blocks(2).unwrap(); // past_end=2, real_past_end=4 (slack)
        let first = a.grow_by_blocks(1).unwrap();
        assert_eq!(first, 2);
        assert_eq!(a.backend().grows, 0);
        assert_eq!(a.past_end_blk_nr(), 3);
        assert_eq!(a.real_past_end_blk_nr(), 4);
    }

    #[test]
    fn grow_past_slack_calls_backend_and_clears_slack() {
        let mut a = arr(128, 0, 2);
        a.grow_by_blocks(3).unwrap();
        assert_eq!(a.backend().grows, 1);
        assert_eq!(a.past_end_blk_nr(), a.real_past_end_blk_nr());
    }

    #[test]
    fn shrink_past_blk_cnt_is_rejected() {
        let mut a = arr(128, 0, 4);
        assert!(a.shrink_by_blocks(5).is_err());
    }

    #[test]
    fn shrink_always_keeps_real_past_end_when_backend_defers() {
        let mut a = arr(128, 0, 4);
        a.shrink_by_blocks(2).unwrap();
        assert_eq!(a.past_end_blk_nr(), 2);
        assert_eq!(a.real_past_end_blk_nr(), 4);
        assert_eq!(a.backend().shrinks, 1);
    }

    #[test]
    fn invariants_hold_after_grow_shrink_release() {
        let mut a = arr(128, 1, 5);
        a.grow_by_blocks(2).unwrap();
        assert!(a.begin_blk_nr() <= a.past_end_blk_nr());
        assert!(a.past_end_blk_nr() <= a.real_past_end_blk_nr());
        a.shrink_by_blocks(3).unwrap();
        assert!(a.begin_blk_nr() <= a.past_end_blk_nr());
        assert!(a.past_end_blk_nr() <= a.real_past_end_blk_nr());
        a.release_blocks().unwrap();
        assert!(a.begin_blk_nr() <= a.past_end_blk_nr());
        assert!(a.past_end_blk_nr() <= a.real_past_end_blk_nr());
    }

    #[test]
    fn read_write_full_block_extent_roundtrips() {
        let mut a = arr(128, 0, 4);
        let ext = Extent::new_blocks(1, 2);
        a.write_extent(&ext, &[7u8; 256], 256, 0).unwrap();
        let mut out = [0u8; 256];
        let n = a.read_extent(&ext, &mut out, 256, 0).unwrap();
        assert_eq!(n, 256);
        assert!(out.iter().all(|&b| b == 7));
    }

    #[test]
    fn read_extent_returns_zero_at_eof() {
        let mut a = arr(128, 0, 4);
        let ext = Extent::new_blocks(1, 1);
        let mut out = [0u8; 8];
        let n = a.read_extent(&ext, &mut out, 8, 128).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn read_extent_clamps_to_max() {
        let mut a = arr(128, 0, 4);
        let ext = Extent::new_blocks(1, 1);
        let mut out = [0u8; 8];
        let n = a.read_extent(&ext, &mut out, 8, 120).unwrap();
        assert_eq!(n, 8);
    }

    #[test]
    fn extent_out_of_boundaries_is_rejected() {
        let mut a = arr(128, 0, 2);
        let ext = Extent::new_blocks(5, 1);
        let mut out = [0u8; 8];
        assert_eq!(a.read_extent(&ext, &mut out, 8, 0), Err(BlockArrayError::ExtentOutOfBounds));
    }

    #[test]
    fn suballoc_write_read_respects_msb_first_bitmap() {
        let mut a = arr(128, 0, 4);
        let subblk_sz = a.subblk_sz();
        // bits 15 and 0 set: sub-blocks 0 and 15.
        let ext = Extent::new_suballoc(1, 0b1000_0000_0000_0001);
        let mut payload = alloc::vec![0u8; subblk_sz as usize * 2];
        payload[..subblk_sz as usize].fill(1);
        payload[subblk_sz as usize..].fill(2);
        a.write_extent(&ext, &payload, payload.len() as u32, 0).unwrap();

        let mut out = alloc::vec![0u8; subblk_sz as usize];
        a.read_extent(&ext, &mut out, subblk_sz, 0).unwrap();
        assert!(out.iter().all(|&b| b == 1));

        let mut out2 = alloc::vec![0u8; subblk_sz as usize];
        a.read_extent(&ext, &mut out2, subblk_sz, subblk_sz).unwrap();
        assert!(out2.iter().all(|&b| b == 2));
    }
}
