// SPDX-License-Identifier: MIT

use std::io::{Read, Seek, SeekFrom, Write};

use crate::{ByteIO, IoResult, Seekdir, calc_seek};

/// `ByteIO` over any `Read + Write + Seek` backend (typically `std::fs::File`),
/// bounded by an explicit `src_sz` given at construction.
///
/// The backend exposes a single OS-level cursor, so each read/write
/// re-seeks to the tracked `rd_pos`/`wr_pos` before the actual operation —
/// this is what lets the two logical cursors stay independent.
#[derive(Debug)]
pub struct FileByteIO<'a, T: Read + Write + Seek> {
    io: &'a mut T,
    base: u64,
    src_sz: u32,
    rd_pos: u32,
    wr_pos: u32,
}

impl<'a, T: Read + Write + Seek> FileByteIO<'a, T> {
    pub fn new(io: &'a mut T, base: u64, src_sz: u32) -> Self {
        Self {
            io,
            base,
            src_sz,
            rd_pos: 0,
            wr_pos: 0,
        }
    }
}

impl<'a, T: Read + Write + Seek> ByteIO for FileByteIO<'a, T> {
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
        self.src_sz
    }

    fn seek_rd(&mut self, dir: Seekdir, offset: i64) -> u32 {
        self.rd_pos = calc_seek(dir, offset, self.rd_pos, self.src_sz);
        self.rd_pos
    }

    fn seek_wr(&mut self, dir: Seekdir, offset: i64) -> u32 {
        self.wr_pos = calc_seek(dir, offset, self.wr_pos, self.src_sz);
        self.wr_pos
    }

    fn read_some(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        let remain = self.remain_rd() as usize;
        if remain == 0 {
            return Ok(0);
        }
        let n = buf.len().min(remain);
        self.io.seek(SeekFrom::Start(self.base + self.rd_pos as u64))?;
        self.io.read_exact(&mut buf[..n])?;
        self.rd_pos += n as u32;
        Ok(n)
    }

    fn write_some(&mut self, data: &[u8]) -> IoResult<usize> {
        let remain = self.remain_wr() as usize;
        if remain == 0 {
            return Ok(0);
        }
        let n = data.len().min(remain);
        self.io.seek(SeekFrom::Start(self.base + self.wr_pos as u64))?;
        self.io.write_all(&data[..n])?;
        self.wr_pos += n as u32;
        Ok(n)
    }

    fn flush(&mut self) -> IoResult {
        self.io.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ByteIOExt;
    use tempfile::tempfile;

    #[test]
    fn read_write_roundtrip() {
        let mut file = tempfile().unwrap();
        file.set_len(64).unwrap();
        let mut io = FileByteIO::new(&mut file, 0, 64);
        io.write_exact(&[9, 8, 7, 6]).unwrap();
        io.seek_rd(Seekdir::Beg, 0);
        let mut out = [0u8; 4];
        io.read_exact(&mut out).unwrap();
        assert_eq!(out, [9, 8, 7, 6]);
    }

    #[test]
    fn independent_rd_wr_cursors() {
        let mut file = tempfile().unwrap();
        file.set_len(64).unwrap();
        let mut io = FileByteIO::new(&mut file, 0, 64);
        io.write_exact(&[1, 2, 3, 4]).unwrap();
        io.seek_wr(Seekdir::Beg, 0);
        io.write_exact(&[5, 6]).unwrap();
        assert_eq!(io.wr_pos(), 2);
        io.seek_rd(Seekdir::Beg, 0);
        let mut out = [0u8; 4];
        io.read_exact(&mut out).unwrap();
        assert_eq!(out, [5, 6, 3, 4]);
    }

    #[test]
    fn base_offset_isolates_region() {
        let mut file = tempfile().unwrap();
        file.set_len(128).unwrap();
        let mut io = FileByteIO::new(&mut file, 64, 32);
        io.fill(0xEE, 32).unwrap();
        let mut whole = FileByteIO::new(&mut file, 0, 128);
        whole.seek_rd(Seekdir::Beg, 64);
        let mut out = [0u8; 32];
        whole.read_exact(&mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0xEE));
    }
}
