//! fMP4 init-segment patcher (§4.C): injects a `vexu` spatial-metadata box
//! into the HEVC sample entry of an initialization segment produced by the
//! external media encoder, stripping any conflicting `sv3d`/`st3d` boxes and
//! renaming Dolby Vision's `dvwC` to `dvcC` along the way.

use crate::box_utils::{self, find_box, get_box_size, rename_box, scan_box, set_box_size};
use crate::vexu::build_vexu;
use common::SpatialFormat;
use thiserror::Error;

/// 78-byte `VisualSampleEntry` header, minus the 8-byte box header already
/// consumed by the caller (§4.C step 5).
const VISUAL_SAMPLE_ENTRY_HEADER: usize = 70;

/// `stsd` FullBox prefix: 4 bytes version+flags, 4 bytes entry_count (§4.C
/// step 4 names it as a combined 16-byte header together with `stsd`'s own
/// 8-byte box header already consumed).
const STSD_PREFIX: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchInitError {
    #[error("malformed init segment: {0}")]
    MalformedBox(&'static str),

    #[error("{0}")]
    Scan(#[from] box_utils::BoxScanError),
}

/// Patches `buf` in place with the spatial metadata for `format`. Returns the
/// unchanged buffer (wrapped `Ok`) whenever there is nothing to inject: no
/// HEVC sample entry present, or `format` needs no `vexu`. A genuine
/// structural problem — an HEVC entry present but `moov`/`trak`/.../`stsd`
/// not fully resolvable — is `MalformedBox`; per §7 this is non-fatal to the
/// caller, who is expected to fall back to the original buffer on error.
pub fn patch_init(buf: &[u8], format: SpatialFormat) -> Result<Vec<u8>, PatchInitError> {
    if scan_box(buf, *b"hvc1").is_none() && scan_box(buf, *b"dvh1").is_none() {
        return Ok(buf.to_vec());
    }

    let vexu = build_vexu(format);
    if vexu.is_empty() {
        return Ok(buf.to_vec());
    }

    let mut out = buf.to_vec();

    let moov = find_box(&out, 0, out.len(), *b"moov")?
        .or_else(|| scan_box(&out, *b"moov"))
        .ok_or(PatchInitError::MalformedBox("moov"))?;
    let moov_end = moov + get_box_size(&out, moov)? as usize;

    let trak = find_box(&out, moov + 8, moov_end, *b"trak")?
        .ok_or(PatchInitError::MalformedBox("trak"))?;
    let trak_end = trak + get_box_size(&out, trak)? as usize;

    let mdia = find_box(&out, trak + 8, trak_end, *b"mdia")?
        .ok_or(PatchInitError::MalformedBox("mdia"))?;
    let mdia_end = mdia + get_box_size(&out, mdia)? as usize;

    let minf = find_box(&out, mdia + 8, mdia_end, *b"minf")?
        .ok_or(PatchInitError::MalformedBox("minf"))?;
    let minf_end = minf + get_box_size(&out, minf)? as usize;

    let stbl = find_box(&out, minf + 8, minf_end, *b"stbl")?
        .ok_or(PatchInitError::MalformedBox("stbl"))?;
    let stbl_end = stbl + get_box_size(&out, stbl)? as usize;

    let stsd = find_box(&out, stbl + 8, stbl_end, *b"stsd")?
        .ok_or(PatchInitError::MalformedBox("stsd"))?;
    let stsd_end = stsd + get_box_size(&out, stsd)? as usize;

    let entries_start = stsd + 8 + STSD_PREFIX;
    let sample_entry = find_box(&out, entries_start, stsd_end, *b"hvc1")?
        .or(find_box(&out, entries_start, stsd_end, *b"dvh1")?)
        .ok_or(PatchInitError::MalformedBox("hevc sample entry"))?;
    let sample_entry_end = sample_entry + get_box_size(&out, sample_entry)? as usize;

    let children_start = sample_entry + 8 + VISUAL_SAMPLE_ENTRY_HEADER;

    let mut removed: usize = 0;
    for conflicting in [*b"sv3d", *b"st3d", *b"vexu"] {
        while let Some(pos) = find_box(
            &out,
            children_start,
            sample_entry_end - removed,
            conflicting,
        )? {
            let size = get_box_size(&out, pos)? as usize;
            out = box_utils::strip_box(&out, pos, size as u32);
            removed += size;
        }
    }

    let insert_at = sample_entry_end - removed;
    out = box_utils::insert_box(&out, insert_at, &vexu);
    let delta = vexu.len() as i64 - removed as i64;

    if let Some(pos) = scan_box(&out, *b"dvwC") {
        rename_box(&mut out, pos, *b"dvcC")?;
    }

    for pos in [
        sample_entry,
        stsd,
        stbl,
        minf,
        mdia,
        trak,
        moov,
    ] {
        let size = get_box_size(&out, pos)?;
        #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
        let new_size = (size as i64 + delta) as u32;
        set_box_size(&mut out, pos, new_size)?;
    }

    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn wrap(typ: &[u8; 4], payload: Vec<u8>) -> Vec<u8> {
        let size = 8 + payload.len();
        #[allow(clippy::cast_possible_truncation)]
        let mut out = (size as u32).to_be_bytes().to_vec();
        out.extend_from_slice(typ);
        out.extend(payload);
        out
    }

    /// Minimal synthetic `hvc1` sample entry: 70-byte VisualSampleEntry
    /// header (all zero) with no children.
    fn hvc1_entry() -> Vec<u8> {
        wrap(b"hvc1", vec![0u8; VISUAL_SAMPLE_ENTRY_HEADER])
    }

    fn stsd(entries: Vec<u8>) -> Vec<u8> {
        let mut payload = vec![0, 0, 0, 0]; // version+flags
        payload.extend_from_slice(&1u32.to_be_bytes()); // entry_count
        payload.extend(entries);
        wrap(b"stsd", payload)
    }

    fn synthetic_init() -> Vec<u8> {
        let stbl = wrap(b"stbl", stsd(hvc1_entry()));
        let minf = wrap(b"minf", stbl);
        let mdia = wrap(b"mdia", minf);
        let trak = wrap(b"trak", mdia);
        wrap(b"moov", trak)
    }

    #[test]
    fn test_patch_init_inserts_vexu() {
        let buf = synthetic_init();
        let original_len = buf.len();

        let patched = patch_init(&buf, SpatialFormat::FullSbs).unwrap();

        assert!(patched.len() > original_len);
        assert!(scan_box(&patched, *b"vexu").is_some());

        let moov_size = get_box_size(&patched, 0).unwrap() as usize;
        assert_eq!(patched.len(), moov_size);
    }

    #[test]
    fn test_patch_init_no_hevc_entry_is_noop() {
        let buf = wrap(b"moov", vec![]);
        let patched = patch_init(&buf, SpatialFormat::FullSbs).unwrap();
        assert_eq!(buf, patched);
    }

    #[test]
    fn test_patch_init_none_format_is_noop() {
        let buf = synthetic_init();
        let patched = patch_init(&buf, SpatialFormat::None).unwrap();
        assert_eq!(buf, patched);
    }

    #[test]
    fn test_patch_init_missing_trak_is_malformed() {
        let buf = wrap(b"moov", hvc1_entry());
        assert_eq!(
            Err(PatchInitError::MalformedBox("trak")),
            patch_init(&buf, SpatialFormat::FullSbs)
        );
    }

    #[test]
    fn test_patch_init_renames_dvwc() {
        let stbl = wrap(b"stbl", stsd(hvc1_entry()));
        let minf = wrap(b"minf", stbl);
        let mut mdia_payload = minf;
        mdia_payload.extend(wrap(b"dvwC", vec![1, 2, 3]));
        let mdia = wrap(b"mdia", mdia_payload);
        let trak = wrap(b"trak", mdia);
        let buf = wrap(b"moov", trak);

        let patched = patch_init(&buf, SpatialFormat::FullSbs).unwrap();
        assert!(scan_box(&patched, *b"dvwC").is_none());
        assert!(scan_box(&patched, *b"dvcC").is_some());
    }

    #[test]
    fn test_patch_init_idempotent_on_box_tree() {
        let buf = synthetic_init();
        let once = patch_init(&buf, SpatialFormat::FullSbs).unwrap();
        let twice = patch_init(&once, SpatialFormat::FullSbs).unwrap();
        // Re-patching strips the previously-inserted vexu before inserting a
        // fresh one, so the byte tree converges rather than growing.
        assert_eq!(once, twice);
    }
}
