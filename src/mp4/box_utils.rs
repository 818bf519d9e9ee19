//! ISO-BMFF box utilities (§4.A): locate, size, and rewrite boxes directly
//! in an owned byte buffer. Only 32-bit box sizes are supported; the 64-bit
//! `largesize` extension is out of scope, matching the spec's stated limit.
//!
//! These operate on raw buffers rather than a marshal tree: the init
//! segments patched here were produced by an external encoder and already
//! exist on disk, so there is nothing to build from scratch — only to
//! locate and rewrite in place.

use thiserror::Error;

/// Mpeg box type.
pub type BoxType = [u8; 4];

const HEADER_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoxScanError {
    #[error("truncated box header at {0}")]
    TruncatedHeader(usize),

    #[error("box at {0} claims size {1}, which is smaller than the 8-byte header")]
    SizeTooSmall(usize, u32),

    #[error("box at {0} claims size {1}, which extends past the buffer end {2}")]
    SizeOutOfBounds(usize, u32, usize),
}

/// Reads the big-endian `u32` size field of the box at `pos`.
///
/// # Errors
/// Returns an error if `pos..pos+4` is out of bounds.
pub fn get_box_size(buf: &[u8], pos: usize) -> Result<u32, BoxScanError> {
    let bytes = buf
        .get(pos..pos + 4)
        .ok_or(BoxScanError::TruncatedHeader(pos))?;
    #[allow(clippy::unwrap_used)]
    Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
}

/// Overwrites the big-endian `u32` size field of the box at `pos`.
///
/// # Errors
/// Returns an error if `pos..pos+4` is out of bounds.
pub fn set_box_size(buf: &mut [u8], pos: usize, new_size: u32) -> Result<(), BoxScanError> {
    let bytes = buf
        .get_mut(pos..pos + 4)
        .ok_or(BoxScanError::TruncatedHeader(pos))?;
    bytes.copy_from_slice(&new_size.to_be_bytes());
    Ok(())
}

/// Reads the 4-byte type tag at `pos+4`.
///
/// # Errors
/// Returns an error if the header is truncated.
pub fn get_box_type(buf: &[u8], pos: usize) -> Result<BoxType, BoxScanError> {
    let bytes = buf
        .get(pos + 4..pos + 8)
        .ok_or(BoxScanError::TruncatedHeader(pos))?;
    #[allow(clippy::unwrap_used)]
    Ok(bytes.try_into().unwrap())
}

/// Validates that the box starting at `pos` has a well-formed header and
/// fits within `end`, returning `(size, type, payload_end)`.
fn validate_box_at(buf: &[u8], pos: usize, end: usize) -> Result<(u32, BoxType, usize), BoxScanError> {
    let size = get_box_size(buf, pos)?;
    if (size as usize) < HEADER_LEN {
        return Err(BoxScanError::SizeTooSmall(pos, size));
    }
    let box_end = pos
        .checked_add(size as usize)
        .filter(|&e| e <= end)
        .ok_or(BoxScanError::SizeOutOfBounds(pos, size, end))?;
    let typ = get_box_type(buf, pos)?;
    Ok((size, typ, box_end))
}

/// Walks direct children from `start` to `end`, advancing by each child's
/// size, and returns the position of the first child whose type matches.
///
/// # Errors
/// Returns an error as soon as a malformed child header is encountered.
pub fn find_box(
    buf: &[u8],
    start: usize,
    end: usize,
    want: BoxType,
) -> Result<Option<usize>, BoxScanError> {
    let mut pos = start;
    while pos < end {
        let (_size, typ, box_end) = validate_box_at(buf, pos, end)?;
        if typ == want {
            return Ok(Some(pos));
        }
        pos = box_end;
    }
    Ok(None)
}

/// Scans every byte offset in `buf` for a box whose type matches `want`,
/// validating that the size field at each candidate offset keeps the box in
/// bounds. Used when the caller doesn't know the buffer starts on a box
/// boundary (e.g. searching inside an unparsed payload).
#[must_use]
pub fn scan_box(buf: &[u8], want: BoxType) -> Option<usize> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    for pos in 0..=(buf.len() - HEADER_LEN) {
        let Ok(typ) = get_box_type(buf, pos) else {
            continue;
        };
        if typ != want {
            continue;
        }
        let Ok(size) = get_box_size(buf, pos) else {
            continue;
        };
        if (size as usize) >= HEADER_LEN && pos + size as usize <= buf.len() {
            return Some(pos);
        }
    }
    None
}

/// Removes the box at `pos` (of on-disk size `size`) from `buf`, returning a
/// new buffer with the bytes spliced out. Caller is responsible for fixing
/// up ancestor sizes with [`set_box_size`] afterward.
#[must_use]
pub fn strip_box(buf: &[u8], pos: usize, size: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len() - size as usize);
    out.extend_from_slice(&buf[..pos]);
    out.extend_from_slice(&buf[pos + size as usize..]);
    out
}

/// Inserts `new_box` at `pos` in `buf`, returning a new buffer. Caller is
/// responsible for fixing up ancestor sizes afterward.
#[must_use]
pub fn insert_box(buf: &[u8], pos: usize, new_box: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len() + new_box.len());
    out.extend_from_slice(&buf[..pos]);
    out.extend_from_slice(new_box);
    out.extend_from_slice(&buf[pos..]);
    out
}

/// Renames the 4-byte type tag of the box at `pos` in place. Used for the
/// `dvwC` → `dvcC` rewrite in §4.C.
///
/// # Errors
/// Returns an error if the header is truncated.
pub fn rename_box(buf: &mut [u8], pos: usize, new_type: BoxType) -> Result<(), BoxScanError> {
    let bytes = buf
        .get_mut(pos + 4..pos + 8)
        .ok_or(BoxScanError::TruncatedHeader(pos))?;
    bytes.copy_from_slice(&new_type);
    Ok(())
}
