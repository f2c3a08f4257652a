//! Big-endian codecs for the fixed-width fields of the on-disk formats, plus
//! the bounds-checked slicing used when carving records out of raw buffers.

use byteorder::{BigEndian, ByteOrder};

use crate::errbounds;
use crate::error::Result;

/// Reads a big-endian u16 at `offset` within `data`.
pub fn u16_from(data: &[u8], offset: usize) -> Result<u16> {
    let bytes = safe_slice(data, offset, offset + 2)?;
    Ok(BigEndian::read_u16(bytes))
}

/// Reads a big-endian u32 at `offset` within `data`.
pub fn u32_from(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = safe_slice(data, offset, offset + 4)?;
    Ok(BigEndian::read_u32(bytes))
}

/// Reads a big-endian u64 at `offset` within `data`.
pub fn u64_from(data: &[u8], offset: usize) -> Result<u64> {
    let bytes = safe_slice(data, offset, offset + 8)?;
    Ok(BigEndian::read_u64(bytes))
}

/// Reads a single-byte boolean at `offset` within `data`. Any non-zero byte
/// is treated as true.
pub fn bool_from(data: &[u8], offset: usize) -> Result<bool> {
    let bytes = safe_slice(data, offset, offset + 1)?;
    Ok(bytes[0] != 0)
}

/// Slices `data[start..end]`, surfacing OutOfBounds instead of panicking.
pub fn safe_slice(data: &[u8], start: usize, end: usize) -> Result<&[u8]> {
    if start > end || end > data.len() {
        return errbounds!("slice {start}..{end} out of bounds for length {}", data.len());
    }
    Ok(&data[start..end])
}

/// Checks that the span `lower..upper` lies within `min..max`.
pub fn validate_bounds(lower: u64, upper: u64, min: u64, max: u64, msg: &str) -> Result<()> {
    if lower < min || upper > max {
        return errbounds!("{msg}: span {lower}-{upper} is out of bounds for {min}-{max}");
    }
    Ok(())
}
