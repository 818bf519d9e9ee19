//! Apple `vexu` (Video Extended Usage) spatial-video metadata box builder
//! (§4.B). Boxes are assembled as plain big-endian byte buffers rather than
//! through a typed marshal tree: `vexu` never appears standalone, only
//! spliced into an existing sample entry by the init-segment patcher, so
//! there is no benefit to a typed tree here.

use common::SpatialFormat;

const STRI_BOTH_EYES: u8 = 0x03;
const HERO_RIGHT_EYE: u8 = 0x01;
/// Baseline in micrometres, approximating the human interpupillary distance.
const CAMS_BASELINE_UM: u32 = 65_000;

fn write_box(out: &mut Vec<u8>, typ: &[u8; 4], payload: impl FnOnce(&mut Vec<u8>)) {
    let start = out.len();
    out.extend_from_slice(&[0, 0, 0, 0]); // size placeholder
    out.extend_from_slice(typ);
    payload(out);
    #[allow(clippy::cast_possible_truncation)]
    let size = (out.len() - start) as u32;
    out[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn write_fullbox(out: &mut Vec<u8>, typ: &[u8; 4], payload: impl FnOnce(&mut Vec<u8>)) {
    write_box(out, typ, |out| {
        out.extend_from_slice(&[0, 0, 0, 0]); // version + flags
        payload(out);
    });
}

fn write_eyes(out: &mut Vec<u8>) {
    write_box(out, b"eyes", |out| {
        write_fullbox(out, b"stri", |out| out.push(STRI_BOTH_EYES));
        write_fullbox(out, b"hero", |out| out.push(HERO_RIGHT_EYE));
        write_box(out, b"cams", |out| {
            write_fullbox(out, b"blin", |out| {
                out.extend_from_slice(&CAMS_BASELINE_UM.to_be_bytes());
            });
        });
    });
}

fn write_proj(out: &mut Vec<u8>, code: &[u8; 4]) {
    write_box(out, b"proj", |out| {
        write_fullbox(out, b"prji", |out| out.extend_from_slice(code));
    });
}

fn write_pack(out: &mut Vec<u8>, code: &[u8; 4]) {
    write_box(out, b"pack", |out| {
        write_fullbox(out, b"pkin", |out| out.extend_from_slice(code));
    });
}

/// Builds the `vexu` box bytes for `format`, or an empty `Vec` if the format
/// requires no injection (§3 `SpatialFormat::None` and non-spatial formats).
#[must_use]
pub fn build_vexu(format: SpatialFormat) -> Vec<u8> {
    use SpatialFormat::{
        FullOu, FullSbs, HalfOu, HalfSbs, Mono360, Mvc, None as NoneFormat, Stereo180Ou,
        Stereo180Sbs, Stereo360Ou, Stereo360Sbs,
    };

    let mut body = Vec::new();
    match format {
        Stereo180Sbs | Stereo180Ou => {
            write_eyes(&mut body);
            write_proj(&mut body, b"hequ");
            write_pack(
                &mut body,
                if matches!(format, Stereo180Sbs) {
                    b"side"
                } else {
                    b"over"
                },
            );
        }
        Stereo360Sbs | Stereo360Ou => {
            write_eyes(&mut body);
            write_proj(&mut body, b"equi");
            write_pack(
                &mut body,
                if matches!(format, Stereo360Sbs) {
                    b"side"
                } else {
                    b"over"
                },
            );
        }
        Mono360 => {
            write_proj(&mut body, b"equi");
        }
        HalfSbs | FullSbs | Mvc => {
            write_eyes(&mut body);
            write_pack(&mut body, b"side");
        }
        HalfOu | FullOu => {
            write_eyes(&mut body);
            write_pack(&mut body, b"over");
        }
        NoneFormat => return Vec::new(),
    }

    let mut out = Vec::with_capacity(8 + body.len());
    write_box(&mut out, b"vexu", |out| out.extend_from_slice(&body));
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::box_utils::{find_box, get_box_size};
    use pretty_assertions::assert_eq;

    fn top_level_size(buf: &[u8]) -> u32 {
        get_box_size(buf, 0).unwrap()
    }

    #[test]
    fn test_vexu_stereo180_sbs() {
        let buf = build_vexu(SpatialFormat::Stereo180Sbs);
        assert_eq!(*b"vexu", &buf[4..8]);
        assert_eq!(buf.len() as u32, top_level_size(&buf));

        assert!(find_box(&buf, 8, buf.len(), *b"eyes").unwrap().is_some());
        let proj_pos = find_box(&buf, 8, buf.len(), *b"proj").unwrap().unwrap();
        let proj_end = proj_pos + get_box_size(&buf, proj_pos).unwrap() as usize;
        let prji_pos = find_box(&buf, proj_pos + 8, proj_end, *b"prji")
            .unwrap()
            .unwrap();
        assert_eq!(b"hequ", &buf[prji_pos + 8 + 4..prji_pos + 8 + 8]);

        let pack_pos = find_box(&buf, 8, buf.len(), *b"pack").unwrap().unwrap();
        let pack_end = pack_pos + get_box_size(&buf, pack_pos).unwrap() as usize;
        let pkin_pos = find_box(&buf, pack_pos + 8, pack_end, *b"pkin")
            .unwrap()
            .unwrap();
        assert_eq!(b"side", &buf[pkin_pos + 8 + 4..pkin_pos + 8 + 8]);
    }

    #[test]
    fn test_vexu_mono360_has_no_eyes_or_pack() {
        let buf = build_vexu(SpatialFormat::Mono360);
        assert!(find_box(&buf, 8, buf.len(), *b"eyes").unwrap().is_none());
        assert!(find_box(&buf, 8, buf.len(), *b"pack").unwrap().is_none());
        let proj_pos = find_box(&buf, 8, buf.len(), *b"proj").unwrap().unwrap();
        let proj_end = proj_pos + get_box_size(&buf, proj_pos).unwrap() as usize;
        let prji_pos = find_box(&buf, proj_pos + 8, proj_end, *b"prji")
            .unwrap()
            .unwrap();
        assert_eq!(b"equi", &buf[prji_pos + 8 + 4..prji_pos + 8 + 8]);
    }

    #[test]
    fn test_vexu_none_is_empty() {
        assert!(build_vexu(SpatialFormat::None).is_empty());
    }

    #[test]
    fn test_vexu_half_sbs_no_proj() {
        let buf = build_vexu(SpatialFormat::HalfSbs);
        assert!(find_box(&buf, 8, buf.len(), *b"proj").unwrap().is_none());
        assert!(find_box(&buf, 8, buf.len(), *b"eyes").unwrap().is_some());
        assert!(find_box(&buf, 8, buf.len(), *b"pack").unwrap().is_some());
    }
}
