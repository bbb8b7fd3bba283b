// SPDX-License-Identifier: MIT

//! File-backed and in-memory [`BlockArrayBackend`]s: the block array
//! persisted to a real file, or to a growable in-memory buffer for tests
//! and embedded use.

use crate::block::array::{BlockArray, BlockArrayBackend};
use crate::error::{BlockArrayError, BlockArrayResult, IoError};

fn io_err(e: impl Into<IoError>) -> BlockArrayError {
    BlockArrayError::IO(e.into())
}

/// A [`BlockArrayBackend`] over an OS file. Growing extends the file
/// (reading past the old end yields zeros, matching a sparse-file or
/// zero-fill extension); shrinking always defers, keeping the file's
/// physical size as slack until [`BlockArray::release_blocks`] is called.
#[cfg(feature = "std")]
pub struct DiskBackend {
    file: std::fs::File,
    blk_sz: u32,
}

#[cfg(feature = "std")]
impl DiskBackend {
    /// Opens an existing file. Fails if its size isn't a multiple of
    /// `blk_sz`, or if `begin_blk_nr` exceeds the block count it holds.
    pub fn open(path: &std::path::Path, blk_sz: u32, begin_blk_nr: u32) -> BlockArrayResult<(Self, u32)> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(io_err)?;
        Self::from_file(file, blk_sz, begin_blk_nr)
    }

    /// Creates a new file-backed array. If the file already exists and
    /// `fail_if_exists` is set, fails; otherwise an existing file is simply
    /// opened. A freshly created file is zero-extended to reserve
    /// `begin_blk_nr` blocks for an outer header layer.
    pub fn create(
        path: &std::path::Path,
        blk_sz: u32,
        begin_blk_nr: u32,
        fail_if_exists: bool,
    ) -> BlockArrayResult<(Self, u32)> {
        if path.exists() {
            if fail_if_exists {
                return Err(BlockArrayError::Other("file already exists"));
            }
            return Self::open(path, blk_sz, begin_blk_nr);
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(io_err)?;
        file.set_len(begin_blk_nr as u64 * blk_sz as u64).map_err(io_err)?;

        Ok((DiskBackend { file, blk_sz }, begin_blk_nr))
    }

    fn from_file(file: std::fs::File, blk_sz: u32, begin_blk_nr: u32) -> BlockArrayResult<(Self, u32)> {
        let len = file.metadata().map_err(io_err)?.len();
        if len % blk_sz as u64 != 0 {
            return Err(BlockArrayError::Other("file size is not a multiple of the block size"));
        }

        let past_end_blk_nr = (len / blk_sz as u64) as u32;
        if begin_blk_nr > past_end_blk_nr {
            return Err(BlockArrayError::Other(
                "begin_blk_nr is past the file's block count",
            ));
        }

        Ok((DiskBackend { file, blk_sz }, past_end_blk_nr))
    }

    /// Current physical file size, in blocks.
    fn physical_blk_cnt(&self) -> BlockArrayResult<u32> {
        let len = self.file.metadata().map_err(io_err)?.len();
        Ok((len / self.blk_sz as u64) as u32)
    }
}

#[cfg(feature = "std")]
impl BlockArrayBackend for DiskBackend {
    fn impl_grow(&mut self, blk_cnt: u16) -> BlockArrayResult<(u32, u16)> {
        let cur_blk_cnt = self.physical_blk_cnt()?;
        let new_len = (cur_blk_cnt as u64 + blk_cnt as u64) * self.blk_sz as u64;
        self.file.set_len(new_len).map_err(io_err)?;
        Ok((cur_blk_cnt, blk_cnt))
    }

    fn impl_shrink(&mut self, _blk_cnt: u32, _past_end_blk_nr: u32) -> BlockArrayResult<u32> {
        // Never shrink the file until release_blocks() is explicitly called.
        Ok(0)
    }

    fn impl_release(&mut self, past_end_blk_nr: u32) -> BlockArrayResult<u32> {
        let cur_blk_cnt = self.physical_blk_cnt()?;
        if cur_blk_cnt <= past_end_blk_nr {
            return Ok(0);
        }
        let released = cur_blk_cnt - past_end_blk_nr;
        self.file
            .set_len(past_end_blk_nr as u64 * self.blk_sz as u64)
            .map_err(io_err)?;
        Ok(released)
    }

    fn impl_read(&mut self, blk_nr: u32, offset: u32, buf: &mut [u8]) -> BlockArrayResult<()> {
        use std::io::{Read, Seek, SeekFrom};
        let pos = blk_nr as u64 * self.blk_sz as u64 + offset as u64;
        self.file.seek(SeekFrom::Start(pos)).map_err(io_err)?;
        self.file.read_exact(buf).map_err(io_err)?;
        Ok(())
    }

    fn impl_write(&mut self, blk_nr: u32, offset: u32, buf: &[u8]) -> BlockArrayResult<()> {
        use std::io::{Seek, SeekFrom, Write};
        let pos = blk_nr as u64 * self.blk_sz as u64 + offset as u64;
        self.file.seek(SeekFrom::Start(pos)).map_err(io_err)?;
        self.file.write_all(buf).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(feature = "std")]
impl BlockArray<DiskBackend> {
    pub fn open_disk(path: &std::path::Path, blk_sz: u32, begin_blk_nr: u32) -> BlockArrayResult<Self> {
        let (backend, past_end_blk_nr) = DiskBackend::open(path, blk_sz, begin_blk_nr)?;
        BlockArray::new(backend, blk_sz, begin_blk_nr, past_end_blk_nr)
    }

    pub fn create_disk(
        path: &std::path::Path,
        blk_sz: u32,
        begin_blk_nr: u32,
        fail_if_exists: bool,
    ) -> BlockArrayResult<Self> {
        let (backend, past_end_blk_nr) = DiskBackend::create(path, blk_sz, begin_blk_nr, fail_if_exists)?;
        BlockArray::new(backend, blk_sz, begin_blk_nr, past_end_blk_nr)
    }

    /// Releases slack and closes the backing handle. Mirrors the
    /// file-backed array's destructor in the source design: if
    /// `release_blocks` fails, the handle is still dropped, but the error
    /// is still reported.
    pub fn close(mut self) -> BlockArrayResult<()> {
        self.release_blocks()?;
        Ok(())
    }
}

/// A [`BlockArrayBackend`] over a growable in-memory byte buffer, for tests
/// and `no_std + alloc` embedded use without a filesystem.
#[cfg(feature = "alloc")]
pub struct MemBackend {
    buf: alloc::vec::Vec<u8>,
    blk_sz: u32,
}

#[cfg(feature = "alloc")]
impl MemBackend {
    pub fn create(blk_sz: u32, begin_blk_nr: u32) -> (Self, u32) {
        let buf = alloc::vec![0u8; begin_blk_nr as usize * blk_sz as usize];
        (MemBackend { buf, blk_sz }, begin_blk_nr)
    }
}

#[cfg(feature = "alloc")]
impl BlockArrayBackend for MemBackend {
    fn impl_grow(&mut self, blk_cnt: u16) -> BlockArrayResult<(u32, u16)> {
        let cur_blk_cnt = (self.buf.len() / self.blk_sz as usize) as u32;
        self.buf.resize(self.buf.len() + blk_cnt as usize * self.blk_sz as usize, 0);
        Ok((cur_blk_cnt, blk_cnt))
    }

    fn impl_shrink(&mut self, _blk_cnt: u32, _past_end_blk_nr: u32) -> BlockArrayResult<u32> {
        Ok(0)
    }

    fn impl_release(&mut self, past_end_blk_nr: u32) -> BlockArrayResult<u32> {
        let cur_blk_cnt = (self.buf.len() / self.blk_sz as usize) as u32;
        if cur_blk_cnt <= past_end_blk_nr {
            return Ok(0);
        }
        let released = cur_blk_cnt - past_end_blk_nr;
        self.buf.truncate(past_end_blk_nr as usize * self.blk_sz as usize);
        Ok(released)
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

#[cfg(feature = "alloc")]
impl BlockArray<MemBackend> {
    pub fn create_mem(blk_sz: u32, begin_blk_nr: u32) -> BlockArrayResult<Self> {
        let (backend, past_end_blk_nr) = MemBackend::create(blk_sz, begin_blk_nr);
        BlockArray::new(backend, blk_sz, begin_blk_nr, past_end_blk_nr)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::extent::Extent;

    #[test]
    fn create_reserves_header_region_and_opens_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.xoz");
        let a = BlockArray::create_disk(&path, 128, 2, true).unwrap();
        assert_eq!(a.begin_blk_nr(), 2);
        assert_eq!(a.past_end_blk_nr(), 2);
        drop(a);

        let b = BlockArray::open_disk(&path, 128, 2).unwrap();
        assert_eq!(b.past_end_blk_nr(), 2);
    }

    #[test]
    fn create_fails_if_exists_and_flag_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.xoz");
        BlockArray::create_disk(&path, 128, 0, true).unwrap();
        assert!(BlockArray::create_disk(&path, 128, 0, true).is_err());
    }

    #[test]
    fn open_rejects_size_not_multiple_of_blk_sz() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.xoz");
        std::fs::write(&path, [0u8; 100]).unwrap();
        assert!(BlockArray::open_disk(&path, 128, 0).is_err());
    }

    #[test]
    fn grow_then_release_returns_file_to_begin_blk_nr_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.xoz");
        let mut a = BlockArray::create_disk(&path, 128, 1, true).unwrap();
        a.grow_by_blocks(9).unwrap();
        a.release_blocks().unwrap();
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 1 * 128);
    }

    #[test]
    fn shrink_defers_physical_truncation_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.xoz");
        let mut a = BlockArray::create_disk(&path, 128, 0, true).unwrap();
        a.grow_by_blocks(4).unwrap();
        a.shrink_by_blocks(2).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4 * 128);
        a.release_blocks().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * 128);
    }

    #[test]
    fn mem_backend_read_write_roundtrip() {
        let mut a = BlockArray::create_mem(128, 0).unwrap();
        a.grow_by_blocks(2).unwrap();
        let ext = Extent::new_blocks(0, 2);
        a.write_extent(&ext, &[5u8; 256], 256, 0).unwrap();
        let mut out = [0u8; 256];
        a.read_extent(&ext, &mut out, 256, 0).unwrap();
        assert!(out.iter().all(|&b| b == 5));
    }
}
