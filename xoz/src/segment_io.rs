// SPDX-License-Identifier: MIT

//! Segment IO: a byte cursor over a [`Segment`]'s logical address space —
//! its extents' data laid end to end, followed by its inline tail.
//!
//! Deliberately not an `impl xoz_io::ByteIO`: that trait's error type is
//! hardcoded to [`xoz_io::error::IoError`], while errors here need to carry
//! the owning block array's [`crate::error::BlockArrayError`] as well. The
//! cursor math (`Seekdir`, `calc_seek`) is still reused from `xoz_io` so the
//! two cursors behave identically.

use alloc::vec::Vec;

use xoz_io::{Seekdir, calc_seek};

use crate::block::array::BlockSource;
use crate::error::{SegmentError, SegmentResult};
use crate::extent::Extent;
use crate::segment::Segment;

/// A byte cursor over a segment's data space, backed by reads/writes into a
/// parent [`BlockSource`].
pub struct SegmentIO<'p, P: BlockSource + ?Sized> {
    parent: &'p mut P,
    segment: Segment,
    /// `begin_positions[i]` is the byte offset at which extent `i`'s data
    /// begins within the non-inline portion of the address space.
    begin_positions: Vec<u32>,
    no_inline_sz: u32,
    total_sz: u32,
    rd_pos: u32,
    wr_pos: u32,
}

enum Region {
    Extent(usize, u32),
    Inline(u32),
    Eof,
}

impl<'p, P: BlockSource + ?Sized> SegmentIO<'p, P> {
    pub fn new(parent: &'p mut P, segment: Segment) -> Self {
        let order = parent.blk_sz_order();
        let mut begin_positions = Vec::with_capacity(segment.exts().len());
        let mut offset = 0u32;
        for ext in segment.exts() {
            begin_positions.push(offset);
            offset += ext.data_space_size(order) as u32;
        }
        let no_inline_sz = offset;
        let total_sz = no_inline_sz + segment.inline_data_sz() as u32;

        SegmentIO {
            parent,
            segment,
            begin_positions,
            no_inline_sz,
            total_sz,
            rd_pos: 0,
            wr_pos: 0,
        }
    }

    #[inline]
    pub fn rd_pos(&self) -> u32 {
        self.rd_pos
    }

    #[inline]
    pub fn wr_pos(&self) -> u32 {
        self.wr_pos
    }

    #[inline]
    pub fn src_sz(&self) -> u32 {
        self.total_sz
    }

    #[inline]
    pub fn remain_rd(&self) -> u32 {
        self.total_sz.saturating_sub(self.rd_pos)
    }

    #[inline]
    pub fn remain_wr(&self) -> u32 {
        self.total_sz.saturating_sub(self.wr_pos)
    }

    pub fn seek_rd(&mut self, dir: Seekdir, offset: i64) -> u32 {
        self.rd_pos = calc_seek(dir, offset, self.rd_pos, self.total_sz);
        self.rd_pos
    }

    pub fn seek_wr(&mut self, dir: Seekdir, offset: i64) -> u32 {
        self.wr_pos = calc_seek(dir, offset, self.wr_pos, self.total_sz);
        self.wr_pos
    }

    /// The segment as it stands, including any in-place inline edits made
    /// through this cursor. Consumes the cursor since it holds the only
    /// owned copy.
    pub fn into_segment(self) -> Segment {
        self.segment
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Locates the extent (or inline tail) that byte position `pos` falls
    /// into, skipping over zero-length (anchor) extents.
    fn locate(&self, pos: u32) -> Region {
        if pos >= self.total_sz {
            return Region::Eof;
        }
        if pos >= self.no_inline_sz {
            return Region::Inline(pos - self.no_inline_sz);
        }

        let mut idx = 0usize;
        for (i, &bp) in self.begin_positions.iter().enumerate() {
            if bp <= pos {
                idx = i;
            } else {
                break;
            }
        }
        while idx + 1 < self.segment.exts().len() && self.segment.exts()[idx].data_space_size(self.parent.blk_sz_order()) == 0
        {
            idx += 1;
        }
        Region::Extent(idx, pos - self.begin_positions[idx])
    }

    /// Reads at most `buf.len()` bytes at the read cursor, batching across
    /// as many extents (and finally the inline tail) as needed. Returns
    /// `Ok(0)` only at EOF.
    pub fn read_some(&mut self, buf: &mut [u8]) -> SegmentResult<usize> {
        let mut done = 0usize;
        while done < buf.len() {
            match self.locate(self.rd_pos) {
                Region::Eof => break,
                Region::Inline(off) => {
                    let data = self.segment.inline_data().unwrap_or(&[]);
                    let avail = data.len() - off as usize;
                    let want = avail.min(buf.len() - done);
                    if want == 0 {
                        break;
                    }
                    buf[done..done + want].copy_from_slice(&data[off as usize..off as usize + want]);
                    done += want;
                    self.rd_pos += want as u32;
                }
                Region::Extent(idx, off) => {
                    let ext: Extent = self.segment.exts()[idx];
                    let want = (buf.len() - done) as u32;
                    let n = self
                        .parent
                        .read_extent(&ext, &mut buf[done..], want, off)
                        .map_err(SegmentError::BlockArray)?;
                    if n == 0 {
                        break;
                    }
                    done += n as usize;
                    self.rd_pos += n;
                }
            }
        }
        Ok(done)
    }

    /// Writes at most `data.len()` bytes at the write cursor, batching the
    /// same way [`SegmentIO::read_some`] does.
    pub fn write_some(&mut self, data: &[u8]) -> SegmentResult<usize> {
        let mut done = 0usize;
        while done < data.len() {
            match self.locate(self.wr_pos) {
                Region::Eof => break,
                Region::Inline(off) => {
                    let tail = self.segment.inline_data_mut().unwrap_or(&mut []);
                    let avail = tail.len() - off as usize;
                    let want = avail.min(data.len() - done);
                    if want == 0 {
                        break;
                    }
                    tail[off as usize..off as usize + want].copy_from_slice(&data[done..done + want]);
                    done += want;
                    self.wr_pos += want as u32;
                }
                Region::Extent(idx, off) => {
                    let ext: Extent = self.segment.exts()[idx];
                    let want = (data.len() - done) as u32;
                    let n = self
                        .parent
                        .write_extent(&ext, &data[done..], want, off)
                        .map_err(SegmentError::BlockArray)?;
                    if n == 0 {
                        break;
                    }
                    done += n as usize;
                    self.wr_pos += n;
                }
            }
        }
        Ok(done)
    }

    /// Reads exactly `buf.len()` bytes, or fails with `NotEnoughRoom`
    /// upfront / `UnexpectedShorten` if the loop stalls despite room.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> SegmentResult {
        let requested = buf.len() as u32;
        let available = self.remain_rd();
        if available < requested {
            return Err(SegmentError::NotEnoughRoom { requested, available });
        }
        let mut done = 0;
        while done < buf.len() {
            let n = self.read_some(&mut buf[done..])?;
            if n == 0 {
                return Err(SegmentError::UnexpectedShorten {
                    requested,
                    moved: done as u32,
                });
            }
            done += n;
        }
        Ok(())
    }

    /// Writes exactly `data.len()` bytes, or fails the same way
    /// [`SegmentIO::read_exact`] does.
    pub fn write_exact(&mut self, data: &[u8]) -> SegmentResult {
        let requested = data.len() as u32;
        let available = self.remain_wr();
        if available < requested {
            return Err(SegmentError::NotEnoughRoom { requested, available });
        }
        let mut done = 0;
        while done < data.len() {
            let n = self.write_some(&data[done..])?;
            if n == 0 {
                return Err(SegmentError::UnexpectedShorten {
                    requested,
                    moved: done as u32,
                });
            }
            done += n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::array::BlockArray;
    use crate::block::file::MemBackend;

    fn parent(blk_sz: u32, blk_cnt: u32) -> BlockArray<MemBackend> {
        let (backend, past_end) = MemBackend::create(blk_sz, blk_cnt);
        BlockArray::new(backend, blk_sz, 0, past_end).unwrap()
    }

    #[test]
    fn read_write_roundtrip_across_two_extents() {
        let mut p = parent(128, 10);
        let mut seg = Segment::new();
        seg.add_extent(Extent::new_blocks(0, 2));
        seg.add_extent(Extent::new_blocks(4, 1));

        let mut io = SegmentIO::new(&mut p, seg);
        let data: Vec<u8> = (0..(3 * 128)).map(|i| (i % 251) as u8).collect();
        io.write_exact(&data).unwrap();
        io.seek_wr(Seekdir::Beg, 0);

        io.seek_rd(Seekdir::Beg, 0);
        let mut out = alloc::vec![0u8; data.len()];
        io.read_exact(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn inline_tail_is_addressable_past_extents() {
        let mut p = parent(128, 10);
        let mut seg = Segment::new();
        seg.add_extent(Extent::new_blocks(0, 1));
        seg.reserve_inline_data(4).unwrap();

        let mut io = SegmentIO::new(&mut p, seg);
        assert_eq!(io.src_sz(), 128 + 4);

        io.seek_wr(Seekdir::Beg, 128);
        io.write_exact(&[9, 9, 9, 9]).unwrap();

        let out = io.into_segment();
        assert_eq!(out.inline_data(), Some(&[9u8, 9, 9, 9][..]));
    }

    #[test]
    fn read_exact_past_end_fails_with_not_enough_room() {
        let mut p = parent(128, 10);
        let mut seg = Segment::new();
        seg.add_extent(Extent::new_blocks(0, 1));

        let mut io = SegmentIO::new(&mut p, seg);
        io.seek_rd(Seekdir::Beg, 120);
        let mut out = [0u8; 16];
        let err = io.read_exact(&mut out).unwrap_err();
        assert_eq!(
            err,
            SegmentError::NotEnoughRoom {
                requested: 16,
                available: 8
            }
        );
    }
}
