// SPDX-License-Identifier: MIT

use crate::{ByteIO, Seekdir, calc_seek};

/// A `ByteIO` restricted to a fixed-size window over another `ByteIO`,
/// anchored at the wrapped cursor's position when the slice is created.
///
/// The base cursor is advanced lazily: a slice operation only touches the
/// base the moment bytes actually move, so creating a `SliceByteIO` and
/// never reading/writing through it leaves the base untouched.
#[derive(Debug)]
pub struct SliceByteIO<'a, IO: ByteIO + ?Sized> {
    base: &'a mut IO,
    base_rd_origin: u32,
    base_wr_origin: u32,
    len: u32,
    rd_pos: u32,
    wr_pos: u32,
}

impl<'a, IO: ByteIO + ?Sized> SliceByteIO<'a, IO> {
    /// Restricts `base` to a `len`-byte window starting at its current read
    /// and write cursors.
    pub fn new(base: &'a mut IO, len: u32) -> Self {
        let base_rd_origin = base.rd_pos();
        let base_wr_origin = base.wr_pos();
        Self {
            base,
            base_rd_origin,
            base_wr_origin,
            len,
            rd_pos: 0,
            wr_pos: 0,
        }
    }
}

impl<'a, IO: ByteIO + ?Sized> ByteIO for SliceByteIO<'a, IO> {
    #[inline]
    fn rd_pos(&self) -> u32 {
        self.rd_pos
    }

    #[inline]
    fn wr_pos(&self) -> u32 {
        self.wr_pos
    }

    #[inline]
    fn src_sz(&self) -> u32 {
        self.len
    }

    fn seek_rd(&mut self, dir: Seekdir, offset: i64) -> u32 {
        self.rd_pos = calc_seek(dir, offset, self.rd_pos, self.len);
        self.base.seek_rd(Seekdir::Beg, (self.base_rd_origin + self.rd_pos) as i64);
        self.rd_pos
    }

    fn seek_wr(&mut self, dir: Seekdir, offset: i64) -> u32 {
        self.wr_pos = calc_seek(dir, offset, self.wr_pos, self.len);
        self.base.seek_wr(Seekdir::Beg, (self.base_wr_origin + self.wr_pos) as i64);
        self.wr_pos
    }

    fn read_some(&mut self, buf: &mut [u8]) -> crate::IoResult<usize> {
        let remain = self.remain_rd() as usize;
        if remain == 0 {
            return Ok(0);
        }
        let want = buf.len().min(remain);
        self.base.seek_rd(Seekdir::Beg, (self.base_rd_origin + self.rd_pos) as i64);
        let n = self.base.read_some(&mut buf[..want])?;
        self.rd_pos += n as u32;
        Ok(n)
    }

    fn write_some(&mut self, data: &[u8]) -> crate::IoResult<usize> {
        let remain = self.remain_wr() as usize;
        if remain == 0 {
            return Ok(0);
        }
        let want = data.len().min(remain);
        self.base.seek_wr(Seekdir::Beg, (self.base_wr_origin + self.wr_pos) as i64);
        let n = self.base.write_some(&data[..want])?;
        self.wr_pos += n as u32;
        Ok(n)
    }

    fn flush(&mut self) -> crate::IoResult {
        self.base.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ByteIOExt;
    use crate::mem::MemByteIO;

    #[test]
    fn slice_restricts_to_window_starting_at_base_cursor() {
        let mut buf = [0u8; 16];
        let mut base = MemByteIO::new(&mut buf);
        base.seek_wr(Seekdir::Beg, 4);
        {
            let mut slice = SliceByteIO::new(&mut base, 4);
            slice.write_exact(&[1, 2, 3, 4]).unwrap();
            assert_eq!(
                slice.write_exact(&[5]),
                Err(crate::error::IoError::NotEnoughRoom {
                    requested: 1,
                    available: 0
                })
            );
        }
        assert_eq!(&buf[4..8], &[1, 2, 3, 4]);
        assert_eq!(buf[8], 0);
    }

    #[test]
    fn slice_read_write_cursors_are_independent_of_base_after_creation() {
        let mut buf = [9u8; 16];
        let mut base = MemByteIO::new(&mut buf);
        base.seek_rd(Seekdir::Beg, 2);
        let mut slice = SliceByteIO::new(&mut base, 4);
        let mut out = [0u8; 2];
        slice.read_exact(&mut out).unwrap();
        assert_eq!(out, [9, 9]);
        assert_eq!(slice.rd_pos(), 2);
    }
}
