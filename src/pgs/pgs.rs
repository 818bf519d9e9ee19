// SPDX-License-Identifier: GPL-2.0-or-later

//! PGS (Presentation Graphics Stream) decoder (§4.D): parses a `.sup` byte
//! stream into a lazy sequence of [`PgsDisplaySet`]s, each one RGBA bitmap
//! cue. Structured the way the originating codebase's box-parsing modules
//! read binary formats — explicit byte-offset reads, one `thiserror` enum
//! per failure mode — even though PGS itself is unrelated to ISO-BMFF.

pub mod rle;
pub mod ycbcr;

use common::time::{PgsDuration, PgsTick};
use std::collections::HashMap;
use std::io::Read;
use thiserror::Error;

const MAGIC: [u8; 2] = *b"PG";

const SEGMENT_PALETTE: u8 = 0x14;
const SEGMENT_OBJECT: u8 = 0x15;
const SEGMENT_PRESENTATION_COMPOSITION: u8 = 0x16;
const SEGMENT_WINDOW: u8 = 0x17;
const SEGMENT_END: u8 = 0x80;

/// Seconds given to the final display set in a stream, which has no
/// following set to derive an end time from (§4.D).
const FINAL_SET_DURATION_SECS: u32 = 5;

/// One decoded subtitle cue (§3). In-memory only; never shared concurrently.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PgsDisplaySet {
    pub start: PgsTick,
    pub end: PgsTick,
    pub width: u16,
    pub height: u16,
    pub rgba: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum PgsDecodeError {
    #[error("read stream: {0}")]
    Io(std::io::Error),
}

/// One RGBA palette entry, converted from the wire format's `(Y, Cr, Cb, A)`.
type PaletteEntry = [u8; 4];

struct ObjectBuilder {
    width: u16,
    height: u16,
    rle: Vec<u8>,
}

/// Decodes a `.sup` byte source into a non-restartable sequence of display
/// sets. `window` filters by start time only: a set whose start falls
/// outside `[window.0, window.1)` is dropped (§4.D).
pub struct PgsDecoder<R> {
    reader: R,
    window: Option<(PgsTick, PgsTick)>,
    pending: Option<(PgsTick, u16, u16, Vec<u8>)>,
    done: bool,
}

impl<R: Read> PgsDecoder<R> {
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            window: None,
            pending: None,
            done: false,
        }
    }

    #[must_use]
    pub fn with_window(mut self, start: PgsTick, end: PgsTick) -> Self {
        self.window = Some((start, end));
        self
    }

    /// Reads exactly `buf.len()` bytes, returning `Ok(false)` on a clean EOF
    /// or mid-record truncation (§4.D "Partial streams"), not an error.
    fn fill(&mut self, buf: &mut [u8]) -> Result<bool, PgsDecodeError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => return Ok(false),
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PgsDecodeError::Io(e)),
            }
        }
        Ok(true)
    }

    /// Decodes the next fully-formed display set body (start time, width,
    /// height, palette-index-resolved RGBA), stopping silently at EOF or
    /// truncation.
    fn decode_one_set(&mut self) -> Result<Option<(PgsTick, u16, u16, Vec<u8>)>, PgsDecodeError> {
        let mut palette: HashMap<u8, PaletteEntry> = HashMap::new();
        let mut canvas_w: u16 = 0;
        let mut canvas_h: u16 = 0;
        let mut set_start: Option<PgsTick> = None;
        let mut object: Option<ObjectBuilder> = None;

        loop {
            let mut header = [0u8; 2 + 4 + 4 + 1 + 2];
            if !self.fill(&mut header)? {
                return Ok(None);
            }
            if header[0..2] != MAGIC {
                return Ok(None);
            }
            let pts = u32::from_be_bytes([header[2], header[3], header[4], header[5]]);
            let _dts = u32::from_be_bytes([header[6], header[7], header[8], header[9]]);
            let seg_type = header[10];
            let size = u16::from_be_bytes([header[11], header[12]]) as usize;

            let mut payload = vec![0u8; size];
            if !self.fill(&mut payload)? {
                return Ok(None);
            }

            if set_start.is_none() {
                set_start = Some(PgsTick::from(pts));
            }

            match seg_type {
                SEGMENT_PRESENTATION_COMPOSITION => {
                    if payload.len() >= 4 {
                        canvas_w = u16::from_be_bytes([payload[0], payload[1]]);
                        canvas_h = u16::from_be_bytes([payload[2], payload[3]]);
                    }
                }
                SEGMENT_PALETTE => {
                    // Palette segment body: [id u8][version u8] then repeated
                    // [entry_id u8][Y u8][Cr u8][Cb u8][alpha u8].
                    let mut i = 2;
                    while i + 5 <= payload.len() {
                        let entry_id = payload[i];
                        let (y, cr, cb, a) = (payload[i + 1], payload[i + 2], payload[i + 3], payload[i + 4]);
                        palette.insert(entry_id, ycbcr::to_rgba(y, cb, cr, a));
                        i += 5;
                    }
                }
                SEGMENT_OBJECT => {
                    // Object segment body: [object_id u16][version u8][flags u8]
                    // then, only when flags & 0x80, [object_w u16][object_h u16],
                    // followed by RLE data.
                    if payload.len() < 4 {
                        continue;
                    }
                    let flags = payload[3];
                    let first_in_sequence = flags & 0x80 != 0;
                    let mut offset = 4;
                    if first_in_sequence {
                        if payload.len() < offset + 4 {
                            continue;
                        }
                        let w = u16::from_be_bytes([payload[offset], payload[offset + 1]]);
                        let h = u16::from_be_bytes([payload[offset + 2], payload[offset + 3]]);
                        offset += 4;
                        object = Some(ObjectBuilder {
                            width: w,
                            height: h,
                            rle: payload[offset..].to_vec(),
                        });
                    } else if let Some(obj) = object.as_mut() {
                        obj.rle.extend_from_slice(&payload[offset..]);
                    }
                }
                SEGMENT_WINDOW => {}
                SEGMENT_END => {
                    let Some(start) = set_start else {
                        return Ok(None);
                    };
                    let rgba = render(canvas_w, canvas_h, object.as_ref(), &palette);
                    return Ok(Some((start, canvas_w, canvas_h, rgba)));
                }
                _ => {}
            }
        }
    }
}

fn render(
    canvas_w: u16,
    canvas_h: u16,
    object: Option<&ObjectBuilder>,
    palette: &HashMap<u8, PaletteEntry>,
) -> Vec<u8> {
    let mut rgba = vec![0u8; 4 * usize::from(canvas_w) * usize::from(canvas_h)];
    let Some(object) = object else {
        return rgba;
    };

    let indices = rle::decode(&object.rle, object.width);
    let rows = indices.len() / usize::from(object.width).max(1);
    for row in 0..rows.min(usize::from(canvas_h)) {
        for col in 0..usize::from(object.width).min(usize::from(canvas_w)) {
            let idx = indices[row * usize::from(object.width) + col];
            let color = palette.get(&idx).copied().unwrap_or([0, 0, 0, 0]);
            let px = (row * usize::from(canvas_w) + col) * 4;
            rgba[px..px + 4].copy_from_slice(&color);
        }
    }
    rgba
}

impl<R: Read> Iterator for PgsDecoder<R> {
    type Item = Result<PgsDisplaySet, PgsDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            let current = match self.pending.take() {
                Some(p) => p,
                None => match self.decode_one_set() {
                    Ok(Some(p)) => p,
                    Ok(None) => {
                        self.done = true;
                        return None;
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
            };

            let next = match self.decode_one_set() {
                Ok(Some(n)) => Some(n),
                Ok(None) => {
                    self.done = true;
                    None
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            let (start, width, height, rgba) = current;
            let end = match &next {
                Some((next_start, ..)) => *next_start,
                None => start
                    .checked_add(PgsDuration::from_secs(FINAL_SET_DURATION_SECS))
                    .unwrap_or(start),
            };
            self.pending = next;

            if let Some((win_start, win_end)) = self.window {
                if start < win_start || start >= win_end {
                    continue;
                }
            }

            return Some(Ok(PgsDisplaySet {
                start,
                end,
                width,
                height,
                rgba,
            }));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn segment(pts: u32, seg_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&pts.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // dts
        out.push(seg_type);
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn pcs(w: u16, h: u16) -> Vec<u8> {
        let mut p = w.to_be_bytes().to_vec();
        p.extend_from_slice(&h.to_be_bytes());
        p.extend_from_slice(&[0, 0, 0, 0]);
        p
    }

    fn palette_entry(id: u8, y: u8, cr: u8, cb: u8, a: u8) -> Vec<u8> {
        vec![0, 0, id, y, cr, cb, a]
    }

    fn object_single(width: u16, height: u16, rle: &[u8]) -> Vec<u8> {
        let mut p = vec![0, 1, 0, 0x80];
        p.extend_from_slice(&width.to_be_bytes());
        p.extend_from_slice(&height.to_be_bytes());
        p.extend_from_slice(rle);
        p
    }

    fn one_display_set(pts_secs: u32, w: u16, h: u16) -> Vec<u8> {
        let pts = pts_secs * common::time::PGS_TIMESCALE;
        let mut buf = Vec::new();
        buf.extend(segment(pts, SEGMENT_PRESENTATION_COMPOSITION, &pcs(w, h)));
        buf.extend(segment(
            pts,
            SEGMENT_PALETTE,
            &palette_entry(1, 200, 128, 128, 255),
        ));
        // single row: w pixels of color 1
        let mut rle = vec![1u8; usize::from(w)];
        // pad remaining rows (h-1) as transparent via end-of-line markers
        for _ in 1..h {
            rle.extend_from_slice(&[0, 0]);
        }
        buf.extend(segment(pts, SEGMENT_OBJECT, &object_single(w, 1, &rle)));
        buf.extend(segment(pts, SEGMENT_END, &[]));
        buf
    }

    #[test]
    fn test_decode_single_display_set_dimensions() {
        let buf = one_display_set(1, 4, 2);
        let mut decoder = PgsDecoder::new(Cursor::new(buf));
        let set = decoder.next().unwrap().unwrap();
        assert_eq!(4, set.width);
        assert_eq!(2, set.height);
        assert_eq!(4 * 4 * 2, set.rgba.len());
        assert!(decoder.next().is_none());
    }

    #[test]
    fn test_decode_end_time_from_next_start() {
        let mut buf = one_display_set(1, 2, 1);
        buf.extend(one_display_set(2, 2, 1));
        buf.extend(one_display_set(3, 2, 1));

        let sets: Vec<_> = PgsDecoder::new(Cursor::new(buf))
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(3, sets.len());
        assert_eq!(sets[1].start, sets[0].end);
        assert_eq!(sets[2].start, sets[1].end);
    }

    #[test]
    fn test_decode_final_set_gets_five_second_duration() {
        let buf = one_display_set(1, 2, 1);
        let sets: Vec<_> = PgsDecoder::new(Cursor::new(buf))
            .map(|r| r.unwrap())
            .collect();
        let want_end = sets[0].start.checked_add(PgsDuration::from_secs(5)).unwrap();
        assert_eq!(want_end, sets[0].end);
    }

    #[test]
    fn test_time_window_filters_by_start_only() {
        let mut buf = one_display_set(1, 2, 1);
        buf.extend(one_display_set(2, 2, 1));
        buf.extend(one_display_set(3, 2, 1));
        buf.extend(one_display_set(4, 2, 1));

        let decoder = PgsDecoder::new(Cursor::new(buf)).with_window(
            PgsTick::from_secs_f64(1.5),
            PgsTick::from_secs_f64(3.0),
        );
        let sets: Vec<_> = decoder.map(|r| r.unwrap()).collect();
        assert_eq!(1, sets.len());
        assert_eq!(PgsTick::from_secs_f64(2.0), sets[0].start);
        assert_eq!(PgsTick::from_secs_f64(3.0), sets[0].end);
    }

    #[test]
    fn test_truncated_stream_returns_nothing() {
        let mut buf = segment(0, SEGMENT_PRESENTATION_COMPOSITION, &pcs(2, 2));
        buf.truncate(buf.len() - 2); // cut into the payload
        let sets: Vec<_> = PgsDecoder::new(Cursor::new(buf)).collect();
        assert!(sets.is_empty());
    }

    #[test]
    fn test_unknown_segment_type_is_skipped() {
        let mut buf = segment(0, 0x99, &[1, 2, 3]);
        buf.extend(one_display_set(1, 2, 1));
        let sets: Vec<_> = PgsDecoder::new(Cursor::new(buf))
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(1, sets.len());
    }
}
