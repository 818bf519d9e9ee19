// SPDX-License-Identifier: GPL-2.0-or-later

//! `MediaEncoder` contract (§6): the external media-decoding tool invoked to
//! extract interval-spaced thumbnails (§4.H) and to produce fMP4 I-frame-only
//! HLS segments (§4.I). The trait is the boundary `trickplay` and
//! `iframe_playlist` build against; `FfmpegMediaEncoder` is the concrete
//! subprocess-backed implementation, shaped the way the originating
//! codebase's `tflite` plugin wraps an external dependency behind a trait so
//! tests can supply a fake.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Parameters for §6 `extract_thumbs`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractThumbsOptions {
    pub source_path: PathBuf,
    pub container: String,
    pub media_source_id: String,
    pub video_stream: u32,
    pub width: u32,
    pub interval_ms: u32,
    pub hw_accel: bool,
    pub threads: u32,
    pub qscale: u8,
    pub priority: bool,
    pub iframes_only: bool,
}

/// Parameters for §6 `generate_iframe_hls`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateIframeHlsOptions {
    pub source_path: PathBuf,
    pub container: String,
    pub media_source_id: String,
    pub video_stream: u32,
    pub target_height: u32,
    pub hw_accel: bool,
    pub threads: u32,
    pub priority: bool,
}

#[derive(Debug, Error)]
pub enum MediaEncoderError {
    #[error("cancelled")]
    Cancelled,

    #[error("create scratch dir: {0}")]
    CreateScratchDir(std::io::Error),

    #[error("spawn encoder process: {0}")]
    Spawn(std::io::Error),

    #[error("wait for encoder process: {0}")]
    Wait(std::io::Error),

    #[error("encoder exited with status {0}")]
    ExitStatus(std::process::ExitStatus),

    #[error("encoder produced no output")]
    NoOutput,
}

#[async_trait]
pub trait MediaEncoder {
    async fn extract_thumbs(
        &self,
        opts: &ExtractThumbsOptions,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, MediaEncoderError>;

    async fn generate_iframe_hls(
        &self,
        opts: &GenerateIframeHlsOptions,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, MediaEncoderError>;
}

/// Shells out to an `ffmpeg` binary on `PATH` (or a configured path).
pub struct FfmpegMediaEncoder {
    binary: PathBuf,
    scratch_root: PathBuf,
    scratch_seq: AtomicU64,
}

impl FfmpegMediaEncoder {
    #[must_use]
    pub fn new(scratch_root: PathBuf) -> Self {
        Self::with_binary(scratch_root, PathBuf::from("ffmpeg"))
    }

    #[must_use]
    pub fn with_binary(scratch_root: PathBuf, binary: PathBuf) -> Self {
        Self {
            binary,
            scratch_root,
            scratch_seq: AtomicU64::new(0),
        }
    }

    fn next_scratch_dir(&self, prefix: &str) -> PathBuf {
        let seq = self.scratch_seq.fetch_add(1, Ordering::Relaxed);
        self.scratch_root
            .join(format!("{prefix}-{}-{seq}", std::process::id()))
    }

    async fn run(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), MediaEncoderError> {
        use MediaEncoderError::*;
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(Spawn)?;

        let status = tokio::select! {
            status = child.wait() => status.map_err(Wait)?,
            () = cancel.cancelled() => {
                let _ = child.start_kill();
                return Err(Cancelled);
            }
        };
        if !status.success() {
            return Err(ExitStatus(status));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaEncoder for FfmpegMediaEncoder {
    async fn extract_thumbs(
        &self,
        opts: &ExtractThumbsOptions,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, MediaEncoderError> {
        let scratch = self.next_scratch_dir("thumbs");
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(MediaEncoderError::CreateScratchDir)?;

        let args = extract_thumbs_args(opts, &scratch);
        if let Err(e) = self.run(&args, cancel).await {
            let _ = tokio::fs::remove_dir_all(&scratch).await;
            return Err(e);
        }
        if has_any_entry(&scratch).await {
            Ok(scratch)
        } else {
            let _ = tokio::fs::remove_dir_all(&scratch).await;
            Err(MediaEncoderError::NoOutput)
        }
    }

    async fn generate_iframe_hls(
        &self,
        opts: &GenerateIframeHlsOptions,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, MediaEncoderError> {
        let scratch = self.next_scratch_dir("iframe");
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(MediaEncoderError::CreateScratchDir)?;

        let args = generate_iframe_hls_args(opts, &scratch);
        if let Err(e) = self.run(&args, cancel).await {
            let _ = tokio::fs::remove_dir_all(&scratch).await;
            return Err(e);
        }
        if scratch.join("iframe.m3u8").is_file() {
            Ok(scratch)
        } else {
            let _ = tokio::fs::remove_dir_all(&scratch).await;
            Err(MediaEncoderError::NoOutput)
        }
    }
}

async fn has_any_entry(dir: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return false;
    };
    matches!(entries.next_entry().await, Ok(Some(_)))
}

fn extract_thumbs_args(opts: &ExtractThumbsOptions, scratch: &Path) -> Vec<String> {
    let interval_s = f64::from(opts.interval_ms) / 1000.0;
    let mut args = vec!["-nostdin".to_owned(), "-hide_banner".to_owned()];
    if opts.hw_accel {
        args.push("-hwaccel".to_owned());
        args.push("auto".to_owned());
    }
    args.extend([
        "-i".to_owned(),
        opts.source_path.to_string_lossy().into_owned(),
        "-map".to_owned(),
        format!("0:{}", opts.video_stream),
        "-threads".to_owned(),
        opts.threads.to_string(),
        "-vf".to_owned(),
        format!("fps=1/{interval_s},scale={}:-2", opts.width),
        "-qscale:v".to_owned(),
        opts.qscale.to_string(),
    ]);
    if opts.priority {
        args.push("-vsync".to_owned());
        args.push("0".to_owned());
    }
    if opts.iframes_only {
        args.push("-skip_frame".to_owned());
        args.push("nokey".to_owned());
    }
    args.push(scratch.join("%05d.jpg").to_string_lossy().into_owned());
    args
}

fn generate_iframe_hls_args(opts: &GenerateIframeHlsOptions, scratch: &Path) -> Vec<String> {
    let mut args = vec!["-nostdin".to_owned(), "-hide_banner".to_owned()];
    if opts.hw_accel {
        args.push("-hwaccel".to_owned());
        args.push("auto".to_owned());
    }
    args.extend([
        "-i".to_owned(),
        opts.source_path.to_string_lossy().into_owned(),
        "-map".to_owned(),
        format!("0:{}", opts.video_stream),
        "-threads".to_owned(),
        opts.threads.to_string(),
        "-an".to_owned(),
        "-vf".to_owned(),
        format!("select='eq(pict_type,I)',scale=-2:{}", opts.target_height),
        "-vsync".to_owned(),
        "vfr".to_owned(),
        "-f".to_owned(),
        "hls".to_owned(),
        "-hls_segment_type".to_owned(),
        "fmp4".to_owned(),
        "-hls_playlist_type".to_owned(),
        "vod".to_owned(),
        "-hls_fmp4_init_filename".to_owned(),
        "init.mp4".to_owned(),
        "-hls_segment_filename".to_owned(),
        scratch.join("%05d.m4s").to_string_lossy().into_owned(),
    ]);
    args.push(scratch.join("iframe.m3u8").to_string_lossy().into_owned());
    args
}
