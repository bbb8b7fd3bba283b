// SPDX-License-Identifier: MIT

//! Segment codec: a segment is an ordered list of [`Extent`]s plus an
//! optional inline data tail, encoded as a stream of 16-bit little-endian
//! words.
//!
//! Each extent's header word carries a 2-bit class tag in its top bits:
//!
//! - `00` plain extent (contiguous block run)
//! - `10` sub-block allocation extent
//! - `11` inline data header
//!
//! There is no standalone end-of-segment word: a segment ends either at
//! EOF/`segm_len` or at an inline data header, and `has_end_of_segment`
//! is simply "inline data is present" (possibly empty).
//!
//! Block numbers are stored relative to the previous extent's end
//! whenever the delta fits ("near" form, bit 10 set); otherwise the
//! absolute block number follows in a full extra word ("far" form). A
//! plain extent whose `blk_cnt` falls in `1..=15` packs the count into 4
//! header bits ("smallcnt") instead of spending a whole extra word on it.

use alloc::vec::Vec;

use xoz_io::ByteIOExt;
use xoz_io::prelude::ByteIO;

use crate::error::{SegmentError, SegmentResult};
use crate::extent::{Extent, MAX_BLK_NR};

const TAG_SHIFT: u16 = 14;

const TAG_PLAIN: u16 = 0b00 << TAG_SHIFT;
const TAG_SUBALLOC: u16 = 0b10 << TAG_SHIFT;
const TAG_INLINE: u16 = 0b11 << TAG_SHIFT;

// Bit 15 alone discriminates plain extents (0) from suballoc/inline (1):
// for plain extents bit 14 is part of the smallcnt nibble, not the tag, so
// it must never be consulted when deciding "is this word plain".
const EXTENDED_TAG_BIT: u16 = 1 << 15;
// Meaningful only when `EXTENDED_TAG_BIT` is set: 0 = suballoc, 1 = inline.
const INLINE_TAG_BIT: u16 = 1 << 14;

// --- plain extent header bits ---
// bits 14-11: smallcnt nibble. 0 means "not used, an explicit count word
// follows"; 1..=15 is the block count directly.
const PLAIN_SMALLCNT_SHIFT: u16 = 11;
const PLAIN_SMALLCNT_MASK: u16 = 0b1111 << PLAIN_SMALLCNT_SHIFT;

// bit 10, shared with the suballoc form: 1 = near (delta-encoded), 0 = far
// (absolute block number, low 16 bits in the next word).
const NEAR_BIT: u16 = 1 << 10;

// bits 9-0, shared by both extent forms. When far: the high 10 bits of the
// absolute block number. When near: a sign bit (9) plus a 9-bit magnitude
// (8-0) — forward offsets are encoded directly, backward offsets as
// `gap - 1` so that "adjacent, immediately before" and "adjacent,
// immediately after" both round-trip without overlapping encodings.
const HI_MASK: u16 = 0b11_1111_1111;
const NEAR_SIGN_BIT: u16 = 1 << 9;
const NEAR_MAGNITUDE_MASK: u16 = 0b1_1111_1111;

// --- inline header bits ---
const INLINE_LEN_MASK: u16 = 0b11_1111 << 8;
const INLINE_LAST_BYTE_MASK: u16 = 0x00FF;

/// Largest inline data length a single segment can carry.
pub const MAX_INLINE_SIZE: u8 = (1 << 6) - 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    extents: Vec<Extent>,
    inline_data: Option<Vec<u8>>,
}

impl Segment {
    pub fn new() -> Self {
        Self::default()
    }

    /// A segment with zero extents and an empty (but present) inline tail.
    pub fn create_empty_zero_inline() -> Self {
        Segment {
            extents: Vec::new(),
            inline_data: Some(Vec::new()),
        }
    }

    pub fn exts(&self) -> &[Extent] {
        &self.extents
    }

    pub fn add_extent(&mut self, ext: Extent) {
        self.extents.push(ext);
    }

    pub fn clear_extents(&mut self) {
        self.extents.clear();
    }

    pub fn ext_cnt(&self) -> usize {
        self.extents.len()
    }

    /// Whether this segment carries an inline data tail, even an empty one.
    /// A real, possibly-empty inline tail also acts as the segment's
    /// terminator on the wire.
    pub fn has_end_of_segment(&self) -> bool {
        self.inline_data.is_some()
    }

    /// Marks the segment as ended by giving it an empty inline tail, if it
    /// doesn't already carry one. A no-op if inline data is already present.
    pub fn add_end_of_segment(&mut self) {
        if self.inline_data.is_none() {
            self.inline_data = Some(Vec::new());
        }
    }

    pub fn inline_data(&self) -> Option<&[u8]> {
        self.inline_data.as_deref()
    }

    /// Mutable access to the existing inline tail, for in-place writes
    /// through a segment cursor. Does not let the tail grow or shrink.
    pub fn inline_data_mut(&mut self) -> Option<&mut [u8]> {
        self.inline_data.as_deref_mut()
    }

    pub fn inline_data_sz(&self) -> u8 {
        self.inline_data.as_ref().map_or(0, |d| d.len() as u8)
    }

    pub fn set_inline_data(&mut self, data: Vec<u8>) -> SegmentResult {
        if data.len() > MAX_INLINE_SIZE as usize {
            return Err(SegmentError::WouldEndUpInconsistentXoz("inline data larger than 63 bytes"));
        }
        self.inline_data = Some(data);
        Ok(())
    }

    pub fn reserve_inline_data(&mut self, len: u8) -> SegmentResult {
        if len > MAX_INLINE_SIZE {
            return Err(SegmentError::WouldEndUpInconsistentXoz("inline data larger than 63 bytes"));
        }
        self.inline_data = Some(alloc::vec![0u8; len as usize]);
        Ok(())
    }

    /// Appends another segment's extents to this one, advancing the
    /// near-encoding anchor as if they had been added one by one. Used when
    /// a segment-backed array grows and absorbs a freshly allocated segment
    /// from its parent.
    pub fn extend(&mut self, other: Segment) {
        self.extents.extend(other.extents);
    }

    /// Drops the last extent and returns it. `None` if the segment has no
    /// extents.
    pub fn remove_last_extent(&mut self) -> Option<Extent> {
        self.extents.pop()
    }

    pub fn remove_inline_data(&mut self) {
        self.inline_data = None;
    }

    /// Number of entries: extents plus one if inline data is present.
    pub fn length(&self) -> usize {
        self.extents.len() + if self.inline_data.is_some() { 1 } else { 0 }
    }

    /// Sum of `blk_cnt` across all non-suballoc extents.
    pub fn full_blk_cnt(&self) -> u64 {
        self.extents
            .iter()
            .filter(|e| !e.is_suballoc())
            .map(|e| e.blk_cnt() as u64)
            .sum()
    }

    /// Sum of allocated sub-blocks across all suballoc extents.
    pub fn subblk_cnt(&self) -> u64 {
        self.extents
            .iter()
            .filter(|e| e.is_suballoc())
            .map(|e| e.subblk_cnt() as u64)
            .sum()
    }

    /// Writes this segment's wire encoding into `io` at its current write
    /// cursor.
    pub fn write_struct_into<IO: ByteIO + ?Sized>(&self, io: &mut IO) -> SegmentResult {
        let mut last_blk_nr: u32 = 0;

        for ext in &self.extents {
            if ext.is_suballoc() {
                write_suballoc_extent(io, ext, &mut last_blk_nr)?;
            } else {
                write_plain_extent(io, ext, &mut last_blk_nr)?;
            }
        }

        if let Some(data) = &self.inline_data {
            write_inline(io, data)?;
        }

        Ok(())
    }

    /// Reads a segment's wire encoding from `io`, stopping either at an
    /// inline data header or after `segm_len` words have been consumed
    /// (pass `None` to read until an inline header, i.e. until end of
    /// segment, is found).
    pub fn load_struct_from<IO: ByteIO + ?Sized>(
        io: &mut IO,
        segm_len: Option<u32>,
    ) -> SegmentResult<Segment> {
        let mut segment = Segment::new();
        let mut last_blk_nr: u32 = 0;
        let mut words_read: u32 = 0;

        loop {
            if let Some(limit) = segm_len {
                if words_read >= limit {
                    break;
                }
            }

            let header = io.read_u16()?;
            words_read += 1;

            if header & EXTENDED_TAG_BIT == 0 {
                let (ext, consumed) = read_plain_extent(io, header, &mut last_blk_nr)?;
                words_read += consumed;
                segment.add_extent(ext);
            } else if header & INLINE_TAG_BIT == 0 {
                let (ext, consumed) = read_suballoc_extent(io, header, &mut last_blk_nr)?;
                words_read += consumed;
                segment.add_extent(ext);
            } else {
                let (data, consumed) = read_inline(io, header)?;
                words_read += consumed;
                if let Some(limit) = segm_len {
                    if words_read != limit {
                        return Err(SegmentError::InconsistentXoz(
                            "inline data header arrived before segm_len was reached",
                        ));
                    }
                }
                segment.inline_data = Some(data);
                break;
            }
        }

        Ok(segment)
    }

    /// Size in bytes this segment would occupy on disk.
    pub fn calc_struct_footprint_size(&self) -> u32 {
        let mut words = 0u32;
        let mut last_blk_nr = 0u32;

        for ext in &self.extents {
            if ext.is_suballoc() {
                words += suballoc_footprint_words(ext, last_blk_nr);
            } else {
                words += plain_footprint_words(ext, last_blk_nr);
            }
            last_blk_nr = ext.end_blk_nr();
        }

        if let Some(data) = &self.inline_data {
            words += inline_footprint_words(data.len() as u8);
        }

        words * 2
    }

    /// Total addressable byte space this segment's extents cover, given the
    /// array's block size order.
    pub fn calc_data_space_size(&self, blk_sz_order: u8) -> u64 {
        self.extents.iter().map(|e| e.data_space_size(blk_sz_order)).sum::<u64>()
            + self.inline_data_sz() as u64
    }

    /// Average expected internal fragmentation (half a sub-block per
    /// suballoc extent, none for whole-block runs).
    pub fn estimate_on_avg_internal_frag_sz(&self, blk_sz_order: u8) -> u64 {
        let subblk_sz = (1u64 << blk_sz_order) >> crate::extent::SUBBLK_SIZE_ORDER;
        let suballoc_exts = self.extents.iter().filter(|e| e.is_suballoc()).count() as u64;
        suballoc_exts * subblk_sz / 2
    }
}

/// Delta from `last_blk_nr` to `blk_nr`, encoded as (sign, magnitude) within
/// a field `bits` wide (including the sign bit). Returns `None` if it
/// doesn't fit and the far form must be used instead.
fn near_encoding(blk_nr: u32, last_blk_nr: u32) -> Option<u16> {
    if blk_nr >= last_blk_nr {
        let magnitude = (blk_nr - last_blk_nr) as u32;
        if magnitude <= NEAR_MAGNITUDE_MASK as u32 {
            Some(magnitude as u16)
        } else {
            None
        }
    } else {
        let gap = (last_blk_nr - blk_nr) as u32 - 1;
        if gap <= NEAR_MAGNITUDE_MASK as u32 {
            Some(NEAR_SIGN_BIT | gap as u16)
        } else {
            None
        }
    }
}

fn near_decode(field: u16, last_blk_nr: u32) -> u32 {
    let magnitude = (field & NEAR_MAGNITUDE_MASK) as u32;
    if field & NEAR_SIGN_BIT != 0 {
        last_blk_nr - magnitude - 1
    } else {
        last_blk_nr + magnitude
    }
}

fn write_plain_extent<IO: ByteIO + ?Sized>(
    io: &mut IO,
    ext: &Extent,
    last_blk_nr: &mut u32,
) -> SegmentResult {
    let blk_cnt = ext.blk_cnt();
    let smallcnt_present = blk_cnt >= 1 && blk_cnt <= 15;
    let near = near_encoding(ext.blk_nr(), *last_blk_nr);

    let mut header = TAG_PLAIN;
    if smallcnt_present {
        header |= (blk_cnt << PLAIN_SMALLCNT_SHIFT) & PLAIN_SMALLCNT_MASK;
    }

    if let Some(field) = near {
        header |= NEAR_BIT;
        header |= field;
        io.write_u16(header)?;
    } else {
        let blk_nr = ext.blk_nr();
        let hi = (blk_nr >> 16) as u16;
        if hi > HI_MASK {
            return Err(SegmentError::ExtentOutOfBounds);
        }
        header |= hi;
        io.write_u16(header)?;
        io.write_u16((blk_nr & 0xFFFF) as u16)?;
    }

    if !smallcnt_present {
        io.write_u16(blk_cnt)?;
    }

    *last_blk_nr = ext.end_blk_nr();
    Ok(())
}

fn plain_footprint_words(ext: &Extent, last_blk_nr: u32) -> u32 {
    let blk_cnt = ext.blk_cnt();
    let smallcnt_present = blk_cnt >= 1 && blk_cnt <= 15;
    let near = near_encoding(ext.blk_nr(), last_blk_nr).is_some();

    let mut words = 1;
    if !near {
        words += 1;
    }
    if !smallcnt_present {
        words += 1;
    }
    words
}

fn read_plain_extent<IO: ByteIO + ?Sized>(
    io: &mut IO,
    header: u16,
    last_blk_nr: &mut u32,
) -> SegmentResult<(Extent, u32)> {
    let near = header & NEAR_BIT != 0;
    let smallcnt = (header & PLAIN_SMALLCNT_MASK) >> PLAIN_SMALLCNT_SHIFT;
    let smallcnt_present = smallcnt != 0;
    let mut consumed = 0u32;

    let blk_nr = if near {
        near_decode(header & HI_MASK, *last_blk_nr)
    } else {
        let hi = (header & HI_MASK) as u32;
        let lo = io.read_u16()? as u32;
        consumed += 1;
        (hi << 16) | lo
    };

    if blk_nr == 0 {
        return Err(SegmentError::InconsistentXoz("extent block number is 0"));
    }
    if blk_nr > MAX_BLK_NR {
        return Err(SegmentError::ExtentOutOfBounds);
    }

    let blk_cnt = if smallcnt_present {
        smallcnt
    } else {
        let c = io.read_u16()?;
        consumed += 1;
        c
    };

    let ext = Extent::new_blocks(blk_nr, blk_cnt);
    *last_blk_nr = ext.end_blk_nr();
    Ok((ext, consumed))
}

fn write_suballoc_extent<IO: ByteIO + ?Sized>(
    io: &mut IO,
    ext: &Extent,
    last_blk_nr: &mut u32,
) -> SegmentResult {
    let mut header = TAG_SUBALLOC;

    if let Some(field) = near_encoding(ext.blk_nr(), *last_blk_nr) {
        header |= NEAR_BIT;
        header |= field;
        io.write_u16(header)?;
    } else {
        let blk_nr = ext.blk_nr();
        let hi = (blk_nr >> 16) as u16;
        if hi > HI_MASK {
            return Err(SegmentError::ExtentOutOfBounds);
        }
        header |= hi;
        io.write_u16(header)?;
        io.write_u16((blk_nr & 0xFFFF) as u16)?;
    }

    io.write_u16(ext.bitmap())?;
    *last_blk_nr = ext.end_blk_nr();
    Ok(())
}

fn suballoc_footprint_words(ext: &Extent, last_blk_nr: u32) -> u32 {
    let near = near_encoding(ext.blk_nr(), last_blk_nr).is_some();
    if near { 2 } else { 3 }
}

fn read_suballoc_extent<IO: ByteIO + ?Sized>(
    io: &mut IO,
    header: u16,
    last_blk_nr: &mut u32,
) -> SegmentResult<(Extent, u32)> {
    let near = header & NEAR_BIT != 0;
    let mut consumed = 0u32;

    let blk_nr = if near {
        near_decode(header & HI_MASK, *last_blk_nr)
    } else {
        let hi = (header & HI_MASK) as u32;
        let lo = io.read_u16()? as u32;
        consumed += 1;
        (hi << 16) | lo
    };

    if blk_nr == 0 {
        return Err(SegmentError::InconsistentXoz("extent block number is 0"));
    }
    if blk_nr > MAX_BLK_NR {
        return Err(SegmentError::ExtentOutOfBounds);
    }

    let bitmap = io.read_u16()?;
    consumed += 1;

    let ext = Extent::new_suballoc(blk_nr, bitmap);
    *last_blk_nr = ext.end_blk_nr();
    Ok((ext, consumed))
}

fn write_inline<IO: ByteIO + ?Sized>(io: &mut IO, data: &[u8]) -> SegmentResult {
    let len = data.len() as u8;
    assert!(len <= MAX_INLINE_SIZE);

    let mut header = TAG_INLINE | (((len as u16) << 8) & INLINE_LEN_MASK);

    if len % 2 == 1 {
        let last = data[data.len() - 1];
        header |= last as u16 & INLINE_LAST_BYTE_MASK;
        io.write_u16(header)?;
        io.write_exact(&data[..data.len() - 1]).map_err(xoz_io::error::IoError::from)?;
    } else {
        io.write_u16(header)?;
        io.write_exact(data).map_err(xoz_io::error::IoError::from)?;
    }

    Ok(())
}

fn inline_footprint_words(len: u8) -> u32 {
    // header word + ceil(payload_bytes_following / 2) words
    let following = if len % 2 == 1 { len as u32 - 1 } else { len as u32 };
    1 + following.div_ceil(2)
}

fn read_inline<IO: ByteIO + ?Sized>(io: &mut IO, header: u16) -> SegmentResult<(Vec<u8>, u32)> {
    let len = ((header & INLINE_LEN_MASK) >> 8) as u8;
    let mut data = alloc::vec![0u8; len as usize];
    let mut consumed = 0u32;

    if len % 2 == 1 {
        data[len as usize - 1] = (header & INLINE_LAST_BYTE_MASK) as u8;
        if len > 1 {
            io.read_exact(&mut data[..len as usize - 1])?;
            consumed += (len as u32 - 1).div_ceil(2);
        }
    } else if len > 0 {
        io.read_exact(&mut data)?;
        consumed += (len as u32).div_ceil(2);
    }

    Ok((data, consumed))
}
