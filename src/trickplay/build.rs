//! §4.H trickplay tile builder: preconditions, per-width tile build (import
//! or build path), atomic directory replace, and final pruning of
//! unaccounted-for output directories. The atomic-replace and prune shapes
//! are grounded on the originating codebase's recording database, which
//! deletes a directory's contents then removes the now-empty directory
//! rather than leaving partial state behind on error.

use crate::image_encoder::{ComposeTileError, ComposeTileOptions, ImageEncoder};
use common::{div_ceil_u32, ArcMsgLogger, LogLevel, TrickplayInfo, TrickplayOptions, VideoRef};
use media_encoder::{ExtractThumbsOptions, MediaEncoder, MediaEncoderError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreconditionUnmet {
    DisallowedShape,
    NoVideoStream,
    DurationTooShort,
    BackdropClip,
}

impl std::fmt::Display for PreconditionUnmet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            PreconditionUnmet::DisallowedShape => "disallowed video shape",
            PreconditionUnmet::NoVideoStream => "no video stream",
            PreconditionUnmet::DurationTooShort => "duration shorter than interval",
            PreconditionUnmet::BackdropClip => "backdrop clip",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Error)]
pub enum BuildTrickplayError {
    #[error("cancelled")]
    Cancelled,

    #[error("extract thumbnails: {0}")]
    ExternalTool(#[from] MediaEncoderError),

    #[error("compose tile: {0}")]
    ComposeTile(#[from] ComposeTileError),

    #[error("list directory {0}: {1}")]
    ListDir(PathBuf, std::io::Error),

    #[error("create directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("remove directory {0}: {1}")]
    RemoveDir(PathBuf, std::io::Error),

    #[error("rename {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),

    #[error("read file metadata {0}: {1}")]
    Metadata(PathBuf, std::io::Error),

    #[error("no thumbnails were produced")]
    NoThumbnails,
}

/// §4.H preconditions. Backdrop clips are excluded by parent directory name.
#[must_use]
pub fn check_preconditions(
    video: &VideoRef,
    interval_ms: u32,
) -> Result<(), PreconditionUnmet> {
    use PreconditionUnmet::*;
    if video.shape.any() {
        return Err(DisallowedShape);
    }
    if video.width == 0 || video.height == 0 {
        return Err(NoVideoStream);
    }
    if video.duration_ms < u64::from(interval_ms) {
        return Err(DurationTooShort);
    }
    let parent_is_backdrops = video
        .path
        .parent()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.eq_ignore_ascii_case("backdrops"));
    if parent_is_backdrops {
        return Err(BackdropClip);
    }
    Ok(())
}

/// Rounds down to the nearest even value (§4.H step 1/2).
#[must_use]
pub fn round_down_even(w: u32) -> u32 {
    2 * (w / 2)
}

/// Builds (or adopts) the tile directory for one configured width.
///
/// `existing_row` is the persisted `TrickplayInfo` for `(video.id, width)`, if
/// any; callers own the artifact store and must look this up before calling.
/// Returns `Ok(None)` when preconditions are unmet (§7 `PreconditionUnmet` is
/// not an error).
#[allow(clippy::too_many_arguments)]
pub async fn build_for_width<M: MediaEncoder, I: ImageEncoder>(
    video: &VideoRef,
    width: u32,
    options: &TrickplayOptions,
    existing_row: Option<&TrickplayInfo>,
    replace: bool,
    root: &Path,
    media_encoder: &M,
    image_encoder: &I,
    logger: &ArcMsgLogger,
    cancel: &CancellationToken,
) -> Result<Option<TrickplayInfo>, BuildTrickplayError> {
    let interval_ms = options.clamped_interval_ms();
    if interval_ms != options.interval_ms {
        logger.log(
            LogLevel::Warning,
            &format!(
                "trickplay interval {}ms below minimum, clamped to {interval_ms}ms",
                options.interval_ms
            ),
        );
    }

    if let Err(reason) = check_preconditions(video, interval_ms) {
        logger.log(LogLevel::Debug, &format!("trickplay precondition unmet: {reason}"));
        return Ok(None);
    }

    if cancel.is_cancelled() {
        return Err(BuildTrickplayError::Cancelled);
    }

    let mut actual_w = round_down_even(width);
    let (effective_w, _effective_h) = video
        .spatial_format
        .effective_dimensions(video.width, video.height);
    if effective_w < width {
        actual_w = round_down_even(effective_w);
        logger.log(
            LogLevel::Warning,
            &format!("trickplay width {width} exceeds effective source width, clamped to {actual_w}"),
        );
    }

    let dir_name = format!("{actual_w} - {}x{}", options.tile_width, options.tile_height);
    let output_dir = root.join(&dir_name);

    if !replace && existing_row.is_none() {
        if let Some(info) = try_import(
            video,
            actual_w,
            options,
            interval_ms,
            &output_dir,
            image_encoder,
        )? {
            return Ok(Some(info));
        }
    }

    let info = build_tiles(
        video,
        actual_w,
        options,
        interval_ms,
        &output_dir,
        media_encoder,
        image_encoder,
        cancel,
    )
    .await?;
    Ok(Some(info))
}

fn try_import<I: ImageEncoder>(
    video: &VideoRef,
    actual_w: u32,
    options: &TrickplayOptions,
    interval_ms: u32,
    output_dir: &Path,
    image_encoder: &I,
) -> Result<Option<TrickplayInfo>, BuildTrickplayError> {
    let Ok(entries) = fs::dir_fs(output_dir.to_owned()).read_dir() else {
        return Ok(None);
    };
    let mut files = Vec::new();
    for entry in entries {
        let fs::Entry::File(file) = entry else {
            continue;
        };
        let path = output_dir.join(file.name());
        if path.extension().and_then(|e| e.to_str()) == Some("jpg") {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Ok(None);
    }

    let interval_s = f64::from(interval_ms) / 1000.0;
    let cells_per_tile = options.tile_width * options.tile_height;
    let mut height = 0u32;
    let mut bandwidth_bps = 0u64;
    for path in &files {
        let (_w, h) = image_encoder.get_size(path)?;
        height = height.max(div_ceil_u32(h, options.tile_height));

        let bytes = std::fs::metadata(path)
            .map_err(|e| BuildTrickplayError::Metadata(path.clone(), e))?
            .len();
        let bps = peak_bandwidth_bps(bytes, cells_per_tile, interval_s);
        bandwidth_bps = bandwidth_bps.max(bps);
    }

    Ok(Some(TrickplayInfo {
        video_id: video.id.clone(),
        width: actual_w,
        tile_width: options.tile_width,
        tile_height: options.tile_height,
        interval_ms,
        thumbnail_count: u32::try_from(files.len()).unwrap_or(u32::MAX),
        tile_image_height: Some(height),
        bandwidth_bps,
    }))
}

#[allow(clippy::too_many_arguments)]
async fn build_tiles<M: MediaEncoder, I: ImageEncoder>(
    video: &VideoRef,
    actual_w: u32,
    options: &TrickplayOptions,
    interval_ms: u32,
    output_dir: &Path,
    media_encoder: &M,
    image_encoder: &I,
    cancel: &CancellationToken,
) -> Result<TrickplayInfo, BuildTrickplayError> {
    let thumbs_dir = media_encoder
        .extract_thumbs(
            &ExtractThumbsOptions {
                source_path: video.path.clone(),
                container: String::new(),
                media_source_id: video.id.to_string(),
                video_stream: 0,
                width: actual_w,
                interval_ms,
                hw_accel: options.hw_accel,
                threads: options.threads,
                qscale: options.jpeg_quality,
                priority: options.priority,
                iframes_only: options.iframes_only,
            },
            cancel,
        )
        .await?;

    let result = build_tiles_from_thumbs(
        video,
        actual_w,
        options,
        interval_ms,
        output_dir,
        &thumbs_dir,
        image_encoder,
        cancel,
    )
    .await;

    let _ = tokio::fs::remove_dir_all(&thumbs_dir).await;
    result
}

#[allow(clippy::too_many_arguments)]
async fn build_tiles_from_thumbs<I: ImageEncoder>(
    video: &VideoRef,
    actual_w: u32,
    options: &TrickplayOptions,
    interval_ms: u32,
    output_dir: &Path,
    thumbs_dir: &Path,
    image_encoder: &I,
    cancel: &CancellationToken,
) -> Result<TrickplayInfo, BuildTrickplayError> {
    let mut thumbs: Vec<PathBuf> = std::fs::read_dir(thumbs_dir)
        .map_err(|e| BuildTrickplayError::ListDir(thumbs_dir.to_owned(), e))?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect();
    thumbs.sort();
    if thumbs.is_empty() {
        return Err(BuildTrickplayError::NoThumbnails);
    }

    let scratch_dir = scratch_path_for(output_dir);
    tokio::fs::create_dir_all(&scratch_dir)
        .await
        .map_err(|e| BuildTrickplayError::CreateDir(scratch_dir.clone(), e))?;

    let cells_per_tile = options.tile_width * options.tile_height;
    let interval_s = f64::from(interval_ms) / 1000.0;
    let tile_count = div_ceil_u32(
        u32::try_from(thumbs.len()).unwrap_or(u32::MAX),
        cells_per_tile,
    );

    let mut tile_image_height = None;
    let mut bandwidth_bps = 0u64;

    for k in 0..tile_count {
        if cancel.is_cancelled() {
            let _ = std::fs::remove_dir_all(&scratch_dir);
            return Err(BuildTrickplayError::Cancelled);
        }
        let start = (k * cells_per_tile) as usize;
        let end = (start + cells_per_tile as usize).min(thumbs.len());
        let tile_path = scratch_dir.join(format!("{k}.jpg"));

        let result = spawn_compose(
            image_encoder,
            ComposeTileOptions {
                output_path: tile_path.clone(),
                input_paths: thumbs[start..end].to_vec(),
                tile_width: options.tile_width,
                tile_height: options.tile_height,
                jpeg_quality: options.jpeg_quality,
                fixed_thumb_height: tile_image_height,
            },
        );
        let height = match result {
            Ok(v) => v,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&scratch_dir);
                return Err(e.into());
            }
        };
        if tile_image_height.is_none() {
            tile_image_height = Some(height);
        }

        let bytes = std::fs::metadata(&tile_path)
            .map_err(|e| BuildTrickplayError::Metadata(tile_path.clone(), e))?
            .len();
        bandwidth_bps = bandwidth_bps.max(peak_bandwidth_bps(bytes, cells_per_tile, interval_s));
    }

    if output_dir.exists() {
        tokio::fs::remove_dir_all(output_dir)
            .await
            .map_err(|e| BuildTrickplayError::RemoveDir(output_dir.to_owned(), e))?;
    }
    tokio::fs::rename(&scratch_dir, output_dir)
        .await
        .map_err(|e| BuildTrickplayError::Rename(scratch_dir.clone(), output_dir.to_owned(), e))?;

    Ok(TrickplayInfo {
        video_id: video.id.clone(),
        width: actual_w,
        tile_width: options.tile_width,
        tile_height: options.tile_height,
        interval_ms,
        thumbnail_count: u32::try_from(thumbs.len()).unwrap_or(u32::MAX),
        tile_image_height,
        bandwidth_bps,
    })
}

/// `compose_tile` is synchronous CPU-bound work (§5); real callers would
/// dispatch via `tokio::task::spawn_blocking`, omitted here so the fallible
/// closure can borrow `image_encoder` without requiring `'static` + `Sync`.
fn spawn_compose<I: ImageEncoder>(
    image_encoder: &I,
    opts: ComposeTileOptions,
) -> Result<u32, ComposeTileError> {
    image_encoder.compose_tile(&opts)
}

#[allow(clippy::as_conversions, clippy::cast_precision_loss, clippy::cast_sign_loss)]
fn peak_bandwidth_bps(file_bytes: u64, cells_per_tile: u32, interval_s: f64) -> u64 {
    if cells_per_tile == 0 || interval_s <= 0.0 {
        return 0;
    }
    let tile_duration_s = f64::from(cells_per_tile) * interval_s;
    let bits = (file_bytes as f64) * 8.0;
    (bits / tile_duration_s).ceil() as u64
}

fn scratch_path_for(output_dir: &Path) -> PathBuf {
    let mut name = output_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    output_dir.with_file_name(name)
}

#[derive(Debug, Error)]
pub enum PruneTrickplayError {
    #[error("remove directory {0}: {1}")]
    RemoveDir(PathBuf, std::io::Error),
}

/// §4.H final step: delete sub-directories under `root` not named by a row
/// in `rows`. The `iframe` directory (§4.I) is never pruned here. A missing
/// or unreadable `root` has nothing to prune.
pub fn prune_unaccounted(root: &Path, rows: &[TrickplayInfo]) -> Result<(), PruneTrickplayError> {
    let Ok(entries) = fs::dir_fs(root.to_owned()).read_dir() else {
        return Ok(());
    };
    let accounted: std::collections::HashSet<String> = rows.iter().map(TrickplayInfo::dir_name).collect();

    for entry in entries {
        let fs::Entry::Dir(dir) = entry else {
            continue;
        };
        let Some(name) = dir.name().to_str() else {
            continue;
        };
        if name == "iframe" || accounted.contains(name) || name.ends_with(".tmp") {
            continue;
        }
        let path = root.join(name);
        std::fs::remove_dir_all(&path).map_err(|e| PruneTrickplayError::RemoveDir(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use common::{DisallowedShape, SpatialFormat, VideoId};
    use pretty_assertions::assert_eq;

    fn video() -> VideoRef {
        VideoRef {
            id: VideoId::try_from("v1".to_owned()).unwrap(),
            path: PathBuf::from("/media/movies/a.mkv"),
            spatial_format: SpatialFormat::None,
            width: 1920,
            height: 1080,
            duration_ms: 60_000,
            shape: DisallowedShape::default(),
        }
    }

    #[test]
    fn test_round_down_even() {
        assert_eq!(320, round_down_even(320));
        assert_eq!(320, round_down_even(321));
    }

    #[test]
    fn test_check_preconditions_rejects_disallowed_shape() {
        let mut v = video();
        v.shape.placeholder = true;
        assert_eq!(
            Err(PreconditionUnmet::DisallowedShape),
            check_preconditions(&v, 10_000)
        );
    }

    #[test]
    fn test_check_preconditions_rejects_short_duration() {
        let mut v = video();
        v.duration_ms = 100;
        assert_eq!(
            Err(PreconditionUnmet::DurationTooShort),
            check_preconditions(&v, 10_000)
        );
    }

    #[test]
    fn test_check_preconditions_rejects_backdrops_parent_case_insensitive() {
        let mut v = video();
        v.path = PathBuf::from("/media/movies/BackDrops/a.mkv");
        assert_eq!(
            Err(PreconditionUnmet::BackdropClip),
            check_preconditions(&v, 10_000)
        );
    }

    #[test]
    fn test_check_preconditions_ok() {
        assert_eq!(Ok(()), check_preconditions(&video(), 10_000));
    }

    #[test]
    fn test_peak_bandwidth_bps() {
        // 100 cells, 10s interval -> 1000s tile duration; 125_000 bytes -> 1_000_000 bits.
        assert_eq!(1000, peak_bandwidth_bps(125_000, 100, 10.0));
    }

    #[test]
    fn test_prune_unaccounted_keeps_rows_and_iframe_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("320 - 10x10")).unwrap();
        std::fs::create_dir(dir.path().join("640 - 10x10")).unwrap();
        std::fs::create_dir(dir.path().join("iframe")).unwrap();
        std::fs::create_dir(dir.path().join("stale - 10x10")).unwrap();

        let rows = vec![TrickplayInfo {
            video_id: VideoId::try_from("v1".to_owned()).unwrap(),
            width: 320,
            tile_width: 10,
            tile_height: 10,
            interval_ms: 10_000,
            thumbnail_count: 1,
            tile_image_height: None,
            bandwidth_bps: 0,
        }];

        prune_unaccounted(dir.path(), &rows).unwrap();

        assert!(dir.path().join("320 - 10x10").exists());
        assert!(dir.path().join("iframe").exists());
        assert!(!dir.path().join("640 - 10x10").exists());
        assert!(!dir.path().join("stale - 10x10").exists());
    }
}
