//! §4.I algorithm: precondition check (shared with trickplay), skip-if-fresh
//! check, external encoder call, atomic directory replace, and the segment
//! count / peak bandwidth computation persisted into `IFramePlaylistInfo`.

use common::{ArcMsgLogger, IFramePlaylistInfo, LogLevel, VideoRef};
use media_encoder::{GenerateIframeHlsOptions, MediaEncoder, MediaEncoderError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const TARGET_HEIGHT: u32 = 160;

#[derive(Debug, Error)]
pub enum BuildIframeError {
    #[error("cancelled")]
    Cancelled,

    #[error("generate iframe hls: {0}")]
    ExternalTool(#[from] MediaEncoderError),

    #[error("list directory {0}: {1}")]
    ListDir(PathBuf, std::io::Error),

    #[error("remove directory {0}: {1}")]
    RemoveDir(PathBuf, std::io::Error),

    #[error("rename {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),

    #[error("read file metadata {0}: {1}")]
    Metadata(PathBuf, std::io::Error),

    #[error("no segments were produced")]
    NoSegments,
}

/// Builds (or skips) the I-frame playlist directory for one video.
///
/// `output_dir` is `<root>/iframe` (§4.H step final preserves this name from
/// pruning). `existing_row` is the persisted `IFramePlaylistInfo`, if any;
/// callers own the artifact store and must look this up before calling.
/// Returns `Ok(None)` when preconditions are unmet.
#[allow(clippy::too_many_arguments)]
pub async fn build<M: MediaEncoder>(
    video: &VideoRef,
    output_dir: &Path,
    existing_row: Option<&IFramePlaylistInfo>,
    replace: bool,
    hw_accel: bool,
    threads: u32,
    priority: bool,
    media_encoder: &M,
    logger: &ArcMsgLogger,
    cancel: &CancellationToken,
) -> Result<Option<IFramePlaylistInfo>, BuildIframeError> {
    if let Err(reason) = trickplay::check_preconditions(video, 0) {
        logger.log(
            LogLevel::Debug,
            &format!("iframe playlist precondition unmet: {reason}"),
        );
        return Ok(None);
    }

    if !replace && existing_row.is_some() && output_dir.join("iframe.m3u8").is_file() {
        return Ok(existing_row.cloned());
    }

    if cancel.is_cancelled() {
        return Err(BuildIframeError::Cancelled);
    }

    let scratch_dir = media_encoder
        .generate_iframe_hls(
            &GenerateIframeHlsOptions {
                source_path: video.path.clone(),
                container: String::new(),
                media_source_id: video.id.to_string(),
                video_stream: 0,
                target_height: TARGET_HEIGHT,
                hw_accel,
                threads,
                priority,
            },
            cancel,
        )
        .await?;

    let result = finish(video, output_dir, &scratch_dir).await;
    if result.is_err() {
        let _ = tokio::fs::remove_dir_all(&scratch_dir).await;
    }
    result
}

async fn finish(
    video: &VideoRef,
    output_dir: &Path,
    scratch_dir: &Path,
) -> Result<Option<IFramePlaylistInfo>, BuildIframeError> {
    let mut segment_count = 0u32;
    let mut bandwidth_bps = 0u64;
    let mut entries = tokio::fs::read_dir(scratch_dir)
        .await
        .map_err(|e| BuildIframeError::ListDir(scratch_dir.to_owned(), e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| BuildIframeError::ListDir(scratch_dir.to_owned(), e))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("m4s") {
            continue;
        }
        segment_count += 1;
        let bytes = entry
            .metadata()
            .await
            .map_err(|e| BuildIframeError::Metadata(path.clone(), e))?
            .len();
        bandwidth_bps = bandwidth_bps.max(bytes.saturating_mul(8));
    }
    if segment_count == 0 {
        return Err(BuildIframeError::NoSegments);
    }

    if output_dir.exists() {
        tokio::fs::remove_dir_all(output_dir)
            .await
            .map_err(|e| BuildIframeError::RemoveDir(output_dir.to_owned(), e))?;
    }
    tokio::fs::rename(scratch_dir, output_dir)
        .await
        .map_err(|e| BuildIframeError::Rename(scratch_dir.to_owned(), output_dir.to_owned(), e))?;

    let (effective_w, effective_h) = video
        .spatial_format
        .effective_dimensions(video.width, video.height);
    let width = effective_width(effective_w, effective_h);

    Ok(Some(IFramePlaylistInfo {
        video_id: video.id.clone(),
        width,
        height: TARGET_HEIGHT,
        segment_count,
        bandwidth_bps,
    }))
}

/// `width = 2·⌊160·eff_w/eff_h / 2⌋` (§4.I step 5).
#[allow(clippy::as_conversions, clippy::cast_precision_loss, clippy::cast_sign_loss)]
fn effective_width(effective_w: u32, effective_h: u32) -> u32 {
    if effective_h == 0 {
        return 0;
    }
    let scaled = (f64::from(TARGET_HEIGHT) * f64::from(effective_w) / f64::from(effective_h)) as u32;
    2 * (scaled / 2)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_effective_width_matches_target_height_aspect() {
        // 1920x1080 -> 160 * 1920/1080 = 284.44 -> 284 -> rounds down to 284 (even).
        assert_eq!(284, effective_width(1920, 1080));
    }

    #[test]
    fn test_effective_width_zero_height_is_zero() {
        assert_eq!(0, effective_width(1920, 0));
    }
}
