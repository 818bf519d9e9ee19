//! `ImageEncoder` contract (§6): composes up to `tile_w·tile_h` individual
//! thumbnail JPEGs into one tiled JPEG, and measures the pixel size of an
//! existing JPEG for the §4.H import path.

use jpeg_decoder::PixelFormat;
use jpeg_encoder::{ColorType, Encoder};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct ComposeTileOptions {
    pub output_path: PathBuf,
    pub input_paths: Vec<PathBuf>,
    pub tile_width: u32,
    pub tile_height: u32,
    pub jpeg_quality: u8,
    /// Thumbnail pixel height to conform to; `None` on the first tile of a
    /// width, `Some(height)` (the first tile's return value) on later ones.
    pub fixed_thumb_height: Option<u32>,
}

#[derive(Debug, Error)]
pub enum ComposeTileError {
    #[error("no input images")]
    Empty,

    #[error("read {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("decode {0}: {1}")]
    Decode(PathBuf, jpeg_decoder::Error),

    #[error("unsupported pixel format in {0}")]
    UnsupportedFormat(PathBuf),

    #[error("encode: {0}")]
    Encode(jpeg_encoder::EncodingError),

    #[error("write {0}: {1}")]
    Write(PathBuf, std::io::Error),
}

pub trait ImageEncoder {
    fn compose_tile(&self, opts: &ComposeTileOptions) -> Result<u32, ComposeTileError>;
    fn get_size(&self, path: &Path) -> Result<(u32, u32), ComposeTileError>;
}

/// `compose_tile`/`get_size` backed by `jpeg-decoder`/`jpeg-encoder`.
pub struct JpegImageEncoder;

impl ImageEncoder for JpegImageEncoder {
    fn get_size(&self, path: &Path) -> Result<(u32, u32), ComposeTileError> {
        let file = std::fs::File::open(path).map_err(|e| ComposeTileError::Read(path.to_owned(), e))?;
        let mut decoder = jpeg_decoder::Decoder::new(std::io::BufReader::new(file));
        decoder
            .read_info()
            .map_err(|e| ComposeTileError::Decode(path.to_owned(), e))?;
        let info = decoder
            .info()
            .expect("info available after read_info succeeds");
        Ok((u32::from(info.width), u32::from(info.height)))
    }

    fn compose_tile(&self, opts: &ComposeTileOptions) -> Result<u32, ComposeTileError> {
        use ComposeTileError::*;
        if opts.input_paths.is_empty() {
            return Err(Empty);
        }

        let mut thumbs = Vec::with_capacity(opts.input_paths.len());
        let mut thumb_w = 0u32;
        let mut thumb_h = opts.fixed_thumb_height.unwrap_or(0);
        for path in &opts.input_paths {
            let (rgb, w, h) = decode_rgb(path)?;
            if thumb_w == 0 {
                thumb_w = w;
            }
            if thumb_h == 0 {
                thumb_h = h;
            }
            thumbs.push(rgb);
        }

        let rows = common::div_ceil_u32(
            u32::try_from(thumbs.len()).expect("thumbnail count fits u32"),
            opts.tile_width,
        );
        let canvas_w = thumb_w * opts.tile_width;
        let canvas_h = thumb_h * rows;
        let canvas_len = usize::try_from(canvas_w * canvas_h * 3).expect("canvas size fits usize");
        let mut canvas = vec![255u8; canvas_len];

        for (i, rgb) in thumbs.iter().enumerate() {
            let i = u32::try_from(i).expect("thumbnail index fits u32");
            let col = i % opts.tile_width;
            let row = i / opts.tile_width;
            blit(&mut canvas, canvas_w, rgb, thumb_w, thumb_h, col * thumb_w, row * thumb_h);
        }

        let encoder = Encoder::new_file(&opts.output_path, opts.jpeg_quality)
            .map_err(|e| Write(opts.output_path.clone(), e))?;
        encoder
            .encode(&canvas, u16_from(canvas_w), u16_from(canvas_h), ColorType::Rgb)
            .map_err(Encode)?;

        Ok(canvas_h)
    }
}

fn u16_from(v: u32) -> u16 {
    u16::try_from(v).unwrap_or(u16::MAX)
}

fn decode_rgb(path: &Path) -> Result<(Vec<u8>, u32, u32), ComposeTileError> {
    let file = std::fs::File::open(path).map_err(|e| ComposeTileError::Read(path.to_owned(), e))?;
    let mut decoder = jpeg_decoder::Decoder::new(std::io::BufReader::new(file));
    let pixels = decoder
        .decode()
        .map_err(|e| ComposeTileError::Decode(path.to_owned(), e))?;
    let info = decoder
        .info()
        .expect("info available after a successful decode");
    let (w, h) = (u32::from(info.width), u32::from(info.height));
    let rgb = match info.pixel_format {
        PixelFormat::RGB24 => pixels,
        PixelFormat::L8 => pixels.into_iter().flat_map(|g| [g, g, g]).collect(),
        PixelFormat::CMYK32 => return Err(ComposeTileError::UnsupportedFormat(path.to_owned())),
        PixelFormat::L16 => return Err(ComposeTileError::UnsupportedFormat(path.to_owned())),
    };
    Ok((rgb, w, h))
}

#[allow(clippy::too_many_arguments)]
fn blit(
    canvas: &mut [u8],
    canvas_w: u32,
    src: &[u8],
    src_w: u32,
    src_h: u32,
    dst_x: u32,
    dst_y: u32,
) {
    let row_bytes = usize_from(src_w * 3);
    for y in 0..src_h {
        let src_start = usize_from((y * src_w) * 3);
        let src_row = &src[src_start..src_start + row_bytes];
        let dst_start = usize_from(((dst_y + y) * canvas_w + dst_x) * 3);
        canvas[dst_start..dst_start + row_bytes].copy_from_slice(src_row);
    }
}

fn usize_from(v: u32) -> usize {
    usize::try_from(v).expect("pixel offset fits usize")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_solid_jpeg(path: &Path, w: u16, h: u16, rgb: [u8; 3]) {
        let pixels: Vec<u8> = (0..usize::from(w) * usize::from(h))
            .flat_map(|_| rgb)
            .collect();
        let encoder = Encoder::new_file(path, 90).unwrap();
        encoder.encode(&pixels, w, h, ColorType::Rgb).unwrap();
    }

    #[test]
    fn test_get_size_matches_encoded_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        write_solid_jpeg(&path, 16, 8, [10, 20, 30]);

        let enc = JpegImageEncoder;
        assert_eq!((16, 8), enc.get_size(&path).unwrap());
    }

    #[test]
    fn test_compose_tile_lays_out_grid_and_reports_height() {
        let dir = tempfile::tempdir().unwrap();
        let mut inputs = Vec::new();
        for i in 0..3u8 {
            let p = dir.path().join(format!("{i}.jpg"));
            write_solid_jpeg(&p, 4, 4, [i * 10, 0, 0]);
            inputs.push(p);
        }

        let out = dir.path().join("0.jpg");
        let enc = JpegImageEncoder;
        let height = enc
            .compose_tile(&ComposeTileOptions {
                output_path: out.clone(),
                input_paths: inputs,
                tile_width: 2,
                tile_height: 2,
                jpeg_quality: 90,
                fixed_thumb_height: None,
            })
            .unwrap();

        // 3 thumbnails at 2 columns -> 2 rows of 4px each.
        assert_eq!(8, height);
        assert_eq!((8, 8), enc.get_size(&out).unwrap());
    }

    #[test]
    fn test_compose_tile_empty_input_errors() {
        let dir = tempfile::tempdir().unwrap();
        let enc = JpegImageEncoder;
        let err = enc
            .compose_tile(&ComposeTileOptions {
                output_path: dir.path().join("0.jpg"),
                input_paths: Vec::new(),
                tile_width: 2,
                tile_height: 2,
                jpeg_quality: 90,
                fixed_thumb_height: None,
            })
            .unwrap_err();
        assert!(matches!(err, ComposeTileError::Empty));
    }
}
