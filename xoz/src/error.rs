// SPDX-License-Identifier: MIT

use core::fmt;

pub use xoz_io::error::IoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockArrayError {
    IO(IoError),
    /// A grow/alloc request could not be satisfied within `src_sz`/capacity.
    NotEnoughRoom { requested: u32, available: u32 },
    /// A shrink request asked to remove more blocks than are accessible.
    UnexpectedShorten { requested: u32, available: u32 },
    /// An extent does not lie within `[begin_blk_nr, past_end_blk_nr)`.
    ExtentOutOfBounds,
    Other(&'static str),
}

impl BlockArrayError {
    pub fn msg(&self) -> &'static str {
        match self {
            BlockArrayError::IO(_) => "IO error",
            BlockArrayError::NotEnoughRoom { .. } => "not enough room",
            BlockArrayError::UnexpectedShorten { .. } => "unexpected shorten",
            BlockArrayError::ExtentOutOfBounds => "extent out of bounds",
            BlockArrayError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<XozError> {
        match self {
            BlockArrayError::IO(e) => Some(XozError::IO(*e)),
            _ => None,
        }
    }
}

impl fmt::Display for BlockArrayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        let mut current = self.source();
        while let Some(src) = current {
            write!(f, "\n  caused by: {}", src.msg())?;
            current = src.source();
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BlockArrayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    IO(IoError),
    /// A Segment IO backed by a block array propagated a grow/shrink/extent
    /// error from that array.
    BlockArray(BlockArrayError),
    /// A read/write through Segment IO asked for more bytes than remain
    /// before the segment's logical end.
    NotEnoughRoom { requested: u32, available: u32 },
    /// A Segment IO read/write stalled partway despite enough room having
    /// been reported.
    UnexpectedShorten { requested: u32, moved: u32 },
    /// An extent's `blk_nr`/bitmap addresses a block past the array's
    /// accessible range.
    ExtentOutOfBounds,
    /// The decoded bytes violate a segment invariant (zero block number,
    /// backward-near delta wrapping past the anchor, ...).
    InconsistentXoz(&'static str),
    /// A caller action would produce an invalid on-disk segment (inline
    /// tail longer than 63 bytes, ...).
    WouldEndUpInconsistentXoz(&'static str),
    Other(&'static str),
}

impl SegmentError {
    pub fn msg(&self) -> &'static str {
        match self {
            SegmentError::IO(_) => "IO error",
            SegmentError::BlockArray(_) => "block array error",
            SegmentError::NotEnoughRoom { .. } => "not enough room",
            SegmentError::UnexpectedShorten { .. } => "unexpected shorten",
            SegmentError::ExtentOutOfBounds => "extent out of bounds",
            SegmentError::InconsistentXoz(msg) => msg,
            SegmentError::WouldEndUpInconsistentXoz(msg) => msg,
            SegmentError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<XozError> {
        match self {
            SegmentError::IO(e) => Some(XozError::IO(*e)),
            SegmentError::BlockArray(e) => Some(XozError::BlockArray(*e)),
            _ => None,
        }
    }
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        let mut current = self.source();
        while let Some(src) = current {
            write!(f, "\n  caused by: {}", src.msg())?;
            current = src.source();
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SegmentError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorError {
    IO(IoError),
    Segment(SegmentError),
    /// The descriptor's on-disk encoding is self-contradictory (bad
    /// size/type/id combination, truncated payload, ...).
    InconsistentXoz(&'static str),
    /// A caller action would produce an invalid on-disk descriptor (odd
    /// `dsize`, `dsize` above 126, `size` above `2^31-1`, ...).
    WouldEndUpInconsistentXoz(&'static str),
    Other(&'static str),
}

impl DescriptorError {
    pub fn msg(&self) -> &'static str {
        match self {
            DescriptorError::IO(_) => "IO error",
            DescriptorError::Segment(_) => "segment error",
            DescriptorError::InconsistentXoz(msg) => msg,
            DescriptorError::WouldEndUpInconsistentXoz(msg) => msg,
            DescriptorError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<XozError> {
        match self {
            DescriptorError::IO(e) => Some(XozError::IO(*e)),
            DescriptorError::Segment(e) => Some(XozError::Segment(*e)),
            _ => None,
        }
    }
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        let mut current = self.source();
        while let Some(src) = current {
            write!(f, "\n  caused by: {}", src.msg())?;
            current = src.source();
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DescriptorError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorError {
    BlockArray(BlockArrayError),
    OutOfBlocks,
    Other(&'static str),
}

impl AllocatorError {
    pub fn msg(&self) -> &'static str {
        match self {
            AllocatorError::BlockArray(_) => "block array error",
            AllocatorError::OutOfBlocks => "out of blocks",
            AllocatorError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<XozError> {
        match self {
            AllocatorError::BlockArray(e) => Some(XozError::BlockArray(*e)),
            _ => None,
        }
    }
}

impl fmt::Display for AllocatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        let mut current = self.source();
        while let Some(src) = current {
            write!(f, "\n  caused by: {}", src.msg())?;
            current = src.source();
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocatorError {}

/// Errors from opening, growing or closing a repository (the top-level
/// container built out of a block array, descriptor set and allocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryError {
    IO(IoError),
    BlockArray(BlockArrayError),
    Descriptor(DescriptorError),
    Allocator(AllocatorError),
    /// The requested mutation would leave the repository in an inconsistent
    /// on-disk state if applied (e.g. shrinking past a still-referenced
    /// extent); refused before any write happens.
    WouldEndUpInconsistentXoz(&'static str),
    /// The repository being opened failed header/footer validation.
    OpenXoz(&'static str),
    Other(&'static str),
}

impl RepositoryError {
    pub fn msg(&self) -> &'static str {
        match self {
            RepositoryError::IO(_) => "IO error",
            RepositoryError::BlockArray(_) => "block array error",
            RepositoryError::Descriptor(_) => "descriptor error",
            RepositoryError::Allocator(_) => "allocator error",
            RepositoryError::WouldEndUpInconsistentXoz(msg) => msg,
            RepositoryError::OpenXoz(msg) => msg,
            RepositoryError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<XozError> {
        match self {
            RepositoryError::IO(e) => Some(XozError::IO(*e)),
            RepositoryError::BlockArray(e) => Some(XozError::BlockArray(*e)),
            RepositoryError::Descriptor(e) => Some(XozError::Descriptor(*e)),
            RepositoryError::Allocator(e) => Some(XozError::Allocator(*e)),
            _ => None,
        }
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        let mut current = self.source();
        while let Some(src) = current {
            write!(f, "\n  caused by: {}", src.msg())?;
            current = src.source();
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RepositoryError {}

/// Top-level error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XozError {
    IO(IoError),
    BlockArray(BlockArrayError),
    Segment(SegmentError),
    Descriptor(DescriptorError),
    Allocator(AllocatorError),
    Repository(RepositoryError),
    Other(&'static str),
}

impl XozError {
    pub fn msg(&self) -> &'static str {
        match self {
            XozError::IO(e) => e.msg(),
            XozError::BlockArray(e) => e.msg(),
            XozError::Segment(e) => e.msg(),
            XozError::Descriptor(e) => e.msg(),
            XozError::Allocator(e) => e.msg(),
            XozError::Repository(e) => e.msg(),
            XozError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<XozError> {
        match self {
            XozError::BlockArray(e) => e.source(),
            XozError::Segment(e) => e.source(),
            XozError::Descriptor(e) => e.source(),
            XozError::Allocator(e) => e.source(),
            XozError::Repository(e) => e.source(),
            XozError::IO(_) => None,
            XozError::Other(_) => None,
        }
    }
}

impl fmt::Display for XozError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        let mut current = self.source();
        while let Some(src) = current {
            write!(f, "\n  caused by: {}", src.msg())?;
            current = src.source();
        }
        Ok(())
    }
}

pub type XozResult<T = ()> = Result<T, XozError>;
pub type BlockArrayResult<T = ()> = Result<T, BlockArrayError>;
pub type SegmentResult<T = ()> = Result<T, SegmentError>;
pub type DescriptorResult<T = ()> = Result<T, DescriptorError>;
pub type AllocatorResult<T = ()> = Result<T, AllocatorError>;
pub type RepositoryResult<T = ()> = Result<T, RepositoryError>;

crate::xoz_error_wiring! {
    top => XozError {
        IoError          : IO,
        BlockArrayError  : BlockArray,
        SegmentError     : Segment,
        DescriptorError  : Descriptor,
        AllocatorError   : Allocator,
        RepositoryError  : Repository,
    },
    str_into => [
        BlockArrayError,
        SegmentError,
        DescriptorError,
        AllocatorError,
        RepositoryError,
    ],
    sub => {
        IoError         => [ BlockArrayError::IO, SegmentError::IO, DescriptorError::IO, RepositoryError::IO ],
        BlockArrayError => [ AllocatorError::BlockArray, RepositoryError::BlockArray, SegmentError::BlockArray ],
        SegmentError    => [ DescriptorError::Segment ],
        DescriptorError => [ RepositoryError::Descriptor ],
        AllocatorError  => [ RepositoryError::Allocator ],
    },
}

#[cfg(feature = "std")]
mod std_error_impls {
    use super::*;

    impl std::error::Error for XozError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            match self {
                XozError::IO(e) => Some(e),
                XozError::BlockArray(e) => Some(e),
                XozError::Segment(e) => Some(e),
                XozError::Descriptor(e) => Some(e),
                XozError::Allocator(e) => Some(e),
                XozError::Repository(e) => Some(e),
                XozError::Other(_) => None,
            }
        }
    }
}
