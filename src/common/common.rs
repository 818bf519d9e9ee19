// SPDX-License-Identifier: GPL-2.0-or-later

//! Cross-cutting data model and ambient traits shared by every crate in this
//! workspace: the logging interface, the video/script-family identifiers,
//! and the small set of persisted record shapes (`TrickplayInfo`,
//! `IFramePlaylistInfo`) that `artifact_store` persists and `trickplay` /
//! `iframe_playlist` / `coordinator` produce and consume.

pub mod time;

use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt, ops::Deref, path::PathBuf, sync::Arc};
use thiserror::Error;

pub type ArcLogger = Arc<dyn ILogger + Send + Sync>;

pub trait ILogger {
    /// Send log.
    fn log(&self, _: LogEntry) {}
}

/// Log entry. See `LogEntryWithTime` in the `log` crate.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub level: LogLevel,
    pub source: LogSource,
    pub video_id: Option<VideoId>,
    pub message: LogMessage,
}

impl LogEntry {
    #[allow(clippy::needless_pass_by_value)]
    #[must_use]
    pub fn new(
        level: LogLevel,
        source: &'static str,
        video_id: Option<&VideoId>,
        message: impl Into<String>,
    ) -> Self {
        let source: LogSource = source
            .try_into()
            .expect("source should be a valid log source");
        let message = match LogMessage::try_from(message.into()) {
            Ok(v) => v,
            Err(e) => LogMessage::try_from(format!("bad message: {e}"))
                .expect("error message should be a valid log message"),
        };
        Self {
            level,
            source,
            video_id: video_id.cloned(),
            message,
        }
    }
}

/// Severity of the log message.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Something requires attention.
    Error,
    /// Something may require attention.
    Warning,
    /// Standard information.
    Info,
    /// Verbose debugging information.
    Debug,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseLogSourceError {
    #[error("empty string")]
    Empty,
    #[error("invalid characters: '{0}'")]
    InvalidChars(String),
    #[error("too long")]
    TooLong,
}

pub const LOG_SOURCE_MAX_LENGTH: usize = 16;

#[repr(transparent)]
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, PartialOrd, Ord)]
pub struct LogSource(String);

impl TryFrom<&str> for LogSource {
    type Error = ParseLogSourceError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        use ParseLogSourceError::*;
        if s.is_empty() {
            return Err(Empty);
        }
        if !s.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(InvalidChars(s.to_owned()));
        }
        if s.len() > LOG_SOURCE_MAX_LENGTH {
            return Err(TooLong);
        }
        Ok(Self(s.to_owned()))
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Deref for LogSource {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[repr(transparent)]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LogMessage(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseLogMessageError {
    #[error("empty string")]
    Empty,
    #[error("too long")]
    TooLong,
}

const LOG_MESSAGE_MAX_LENGTH: usize = 1024 * 4;

impl TryFrom<String> for LogMessage {
    type Error = ParseLogMessageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.is_empty() {
            return Err(ParseLogMessageError::Empty);
        }
        if s.len() > LOG_MESSAGE_MAX_LENGTH {
            return Err(ParseLogMessageError::TooLong);
        }
        Ok(Self(s))
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Deref for LogMessage {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct DummyLogger;

impl DummyLogger {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(DummyLogger {})
    }
}

impl ILogger for DummyLogger {
    fn log(&self, _: LogEntry) {}
}

impl MsgLogger for DummyLogger {
    fn log(&self, _level: LogLevel, _msg: &str) {}
}

pub type ArcMsgLogger = Arc<dyn MsgLogger + Send + Sync>;

/// A logger scoped to a single operation, with level+message only; the
/// caller already knows the source and correlating id. Mirrors how the
/// originating codebase's plugins log without re-stating their own name on
/// every call.
pub trait MsgLogger {
    fn log(&self, level: LogLevel, msg: &str);
}

pub struct DummyMsgLogger;

impl MsgLogger for DummyMsgLogger {
    fn log(&self, _: LogLevel, _: &str) {}
}

#[must_use]
pub fn new_dummy_msg_logger() -> Arc<impl MsgLogger> {
    Arc::new(DummyMsgLogger {})
}

/// Marker error for a suspending operation that observed cancellation.
/// Every per-operation error enum carries a `Cancelled` variant built from
/// this rather than re-deriving cancellation handling per crate.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("cancelled")]
pub struct Cancelled;

pub const VIDEO_ID_MAX_LENGTH: usize = 64;

/// Opaque identifier for a video (§3 `VideoRef`). Deliberately permissive:
/// the core treats it as an opaque key, not a validated slug, since ids
/// originate from an external library database outside this core's scope.
#[repr(transparent)]
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize, PartialOrd, Ord)]
pub struct VideoId(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseVideoIdError {
    #[error("empty string")]
    Empty,
    #[error("too long")]
    TooLong,
}

impl TryFrom<String> for VideoId {
    type Error = ParseVideoIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        use ParseVideoIdError::*;
        if s.is_empty() {
            return Err(Empty);
        }
        if s.len() > VIDEO_ID_MAX_LENGTH {
            return Err(TooLong);
        }
        Ok(Self(s))
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Deref for VideoId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl VideoId {
    /// `MediaSourceId=<id_no_dashes>` form used in public artifact URLs (§6).
    #[must_use]
    pub fn without_dashes(&self) -> String {
        self.0.chars().filter(|c| *c != '-').collect()
    }
}

/// §3 `SpatialFormat`. Drives VEXU shape (mp4 crate) and effective
/// post-transform dimensions (trickplay / iframe_playlist).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpatialFormat {
    HalfSbs,
    FullSbs,
    HalfOu,
    FullOu,
    Mvc,
    Stereo180Sbs,
    Stereo180Ou,
    Stereo360Sbs,
    Stereo360Ou,
    Mono360,
    None,
}

impl SpatialFormat {
    /// Effective (width, height) scale factor applied to the source frame by
    /// this layout, used by 4.H/4.I step 2 to derive `effective_w`/`effective_h`.
    #[must_use]
    pub fn effective_dimensions(&self, src_w: u32, src_h: u32) -> (u32, u32) {
        use SpatialFormat::*;
        match self {
            HalfSbs | FullSbs | Stereo180Sbs | Stereo360Sbs => (src_w / 2, src_h),
            HalfOu | FullOu | Stereo180Ou | Stereo360Ou => (src_w, src_h / 2),
            Mvc | Mono360 | None => (src_w, src_h),
        }
    }
}

/// §3 `VideoRef`. Immutable within a refresh.
#[derive(Clone, Debug)]
pub struct VideoRef {
    pub id: VideoId,
    pub path: PathBuf,
    pub spatial_format: SpatialFormat,
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
    pub shape: DisallowedShape,
}

/// Flags describing shapes that make a video ineligible for artifact
/// generation (§4.H precondition #1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisallowedShape {
    pub iso_dvd_bluray: bool,
    pub placeholder: bool,
    pub shortcut: bool,
    pub incomplete: bool,
}

impl DisallowedShape {
    #[must_use]
    pub fn any(&self) -> bool {
        self.iso_dvd_bluray || self.placeholder || self.shortcut || self.incomplete
    }
}

/// §3 `TrickplayInfo`, keyed by `(VideoId, Width)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrickplayInfo {
    pub video_id: VideoId,
    pub width: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub interval_ms: u32,
    pub thumbnail_count: u32,
    pub tile_image_height: Option<u32>,
    pub bandwidth_bps: u64,
}

impl TrickplayInfo {
    /// Directory name `<W> - <tile_w>x<tile_h>` (§6 persisted layout).
    #[must_use]
    pub fn dir_name(&self) -> String {
        format!("{} - {}x{}", self.width, self.tile_width, self.tile_height)
    }

    #[must_use]
    pub fn tile_count(&self) -> u32 {
        div_ceil_u32(self.thumbnail_count, self.tile_width * self.tile_height)
    }
}

#[must_use]
pub fn div_ceil_u32(a: u32, b: u32) -> u32 {
    if b == 0 {
        return 0;
    }
    a.div_ceil(b)
}

/// §6 configuration surface (§1.1 "Configuration"). Call sites depend on this
/// trait, not the `env` crate's concrete `EnvConf`, so tests can supply a
/// fixed in-memory config.
pub trait ArtifactEnvConfig {
    fn data_dir(&self) -> &std::path::Path;
    fn config_dir(&self) -> &std::path::Path;
    fn model_base_url(&self) -> &url::Url;
    fn trickplay(&self) -> &TrickplayOptions;
    fn save_with_media(&self, library: &str) -> bool;
    fn enable_trickplay_image_extraction(&self) -> bool;
    fn disable_iframe_playlist_generation(&self) -> bool;
    fn raw(&self) -> &str;
}

/// §4.H configured per-refresh trickplay parameters, sourced from the `env`
/// crate's `ArtifactEnvConfig::trickplay()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrickplayOptions {
    pub interval_ms: u32,
    pub widths: Vec<u32>,
    pub tile_width: u32,
    pub tile_height: u32,
    pub jpeg_quality: u8,
    pub hw_accel: bool,
    pub threads: u32,
    pub priority: bool,
    pub iframes_only: bool,
}

impl TrickplayOptions {
    /// §4.H: "If `interval_ms < 1000`, it is clamped to 1000 with a warning."
    #[must_use]
    pub fn clamped_interval_ms(&self) -> u32 {
        self.interval_ms.max(1000)
    }
}

/// §3 `IFramePlaylistInfo`, keyed by `VideoId`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IFramePlaylistInfo {
    pub video_id: VideoId,
    pub width: u32,
    pub height: u32,
    pub segment_count: u32,
    pub bandwidth_bps: u64,
}

/// §3 `ScriptFamily`.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptFamily {
    Latin,
    Cjk,
    Korean,
    Cyrillic,
    Arabic,
    Devanagari,
    Thai,
    Tamil,
    Telugu,
}

impl ScriptFamily {
    #[must_use]
    pub fn all() -> [ScriptFamily; 9] {
        use ScriptFamily::*;
        [
            Latin, Cjk, Korean, Cyrillic, Arabic, Devanagari, Thai, Tamil, Telugu,
        ]
    }

    /// Directory segment under `data/ocr-models/<f>/...` (§4.E).
    #[must_use]
    pub fn dir_name(&self) -> &'static str {
        use ScriptFamily::*;
        match self {
            Latin => "latin",
            Cjk => "cjk",
            Korean => "korean",
            Cyrillic => "cyrillic",
            Arabic => "arabic",
            Devanagari => "devanagari",
            Thai => "thai",
            Tamil => "tamil",
            Telugu => "telugu",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_log_message() {
        LogMessage::try_from("abc".to_owned()).unwrap();
        LogMessage::try_from(String::new()).unwrap_err();
    }

    #[test]
    fn test_video_id_without_dashes() {
        let id = VideoId::try_from("a1b2-c3d4-e5f6".to_owned()).unwrap();
        assert_eq!("a1b2c3d4e5f6", id.without_dashes());
    }

    #[test]
    fn test_trickplay_info_dir_name_and_tile_count() {
        let info = TrickplayInfo {
            video_id: VideoId::try_from("v1".to_owned()).unwrap(),
            width: 320,
            tile_width: 10,
            tile_height: 10,
            interval_ms: 10_000,
            thumbnail_count: 250,
            tile_image_height: Some(90),
            bandwidth_bps: 1000,
        };
        assert_eq!("320 - 10x10", info.dir_name());
        assert_eq!(3, info.tile_count());
    }

    #[test]
    fn test_spatial_format_effective_dimensions() {
        assert_eq!(
            (960, 1080),
            SpatialFormat::FullSbs.effective_dimensions(1920, 1080)
        );
        assert_eq!(
            (1920, 540),
            SpatialFormat::FullOu.effective_dimensions(1920, 1080)
        );
        assert_eq!(
            (1920, 1080),
            SpatialFormat::None.effective_dimensions(1920, 1080)
        );
    }
}
