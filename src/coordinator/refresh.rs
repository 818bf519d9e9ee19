//! §4.K Coordinator: orchestrates a full artifact refresh for one video.
//! Grounded on `src/recdb/recdb.rs`'s `prune` for the "swallow per-item
//! errors, keep the rest of the sweep going" shape, and on the process-wide
//! single-flight lock described for heavy media-encoder work.

use crate::path_manager::PathManager;
use artifact_store::ArtifactStore;
use common::{ArcMsgLogger, ArtifactEnvConfig, LogLevel, VideoRef};
use media_encoder::MediaEncoder;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use trickplay::ImageEncoder;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("relocate artifacts: {0}")]
    Relocate(#[from] crate::path_manager::RelocateError),

    #[error("remove directory {0}: {1}")]
    RemoveDir(std::path::PathBuf, std::io::Error),

    #[error("delete trickplay rows: {0}")]
    DeleteTrickplayRows(#[from] artifact_store::ArtifactStoreError),

    #[error("prune trickplay directories: {0}")]
    Prune(#[from] trickplay::PruneTrickplayError),

    #[error("cancelled")]
    Cancelled,
}

/// One process-wide lock serialising heavy media-encoder work across every
/// concurrent refresh (§5 "single-flight for trickplay generation").
pub type TrickplayLock = AsyncMutex<()>;

/// Runs the full §4.K refresh algorithm for one video.
#[allow(clippy::too_many_arguments)]
pub async fn refresh_video<M: MediaEncoder, I: ImageEncoder>(
    video: &VideoRef,
    library: &str,
    replace: bool,
    config: &dyn ArtifactEnvConfig,
    path_manager: &PathManager,
    store: &ArtifactStore,
    media_encoder: &M,
    image_encoder: &I,
    trickplay_lock: &TrickplayLock,
    logger: &ArcMsgLogger,
    cancel: &CancellationToken,
) -> Result<(), RefreshError> {
    let save_with_media = config.save_with_media(library);
    let root = path_manager.relocate(video, save_with_media)?;

    let trickplay_enabled = config.enable_trickplay_image_extraction();
    if !trickplay_enabled || replace {
        if root.exists() {
            std::fs::remove_dir_all(&root)
                .map_err(|e| RefreshError::RemoveDir(root.clone(), e))?;
        }
        store.delete_trickplay_by_item(&video.id)?;
        if !trickplay_enabled {
            logger.log(
                LogLevel::Debug,
                &format!("trickplay disabled for video {}, skipping refresh", video.id),
            );
            return Ok(());
        }
    }

    if cancel.is_cancelled() {
        return Err(RefreshError::Cancelled);
    }

    for &width in &config.trickplay().widths {
        let existing_row = store.get_trickplay(&video.id, width);
        let built = {
            let _guard = trickplay_lock.lock().await;
            trickplay::build_for_width(
                video,
                width,
                config.trickplay(),
                existing_row.as_ref(),
                replace,
                &root,
                media_encoder,
                image_encoder,
                logger,
                cancel,
            )
            .await
        };
        match built {
            Ok(Some(info)) => {
                if let Err(e) = store.upsert_trickplay(info) {
                    logger.log(
                        LogLevel::Error,
                        &format!("persist trickplay row for video {}: {e}", video.id),
                    );
                }
            }
            Ok(None) => {}
            Err(e) => {
                logger.log(
                    LogLevel::Error,
                    &format!("build trickplay width {width} for video {}: {e}", video.id),
                );
            }
        }
    }

    let rows = store.list_trickplay_by_item(&video.id);
    trickplay::prune_unaccounted(&root, &rows)?;

    if !config.disable_iframe_playlist_generation() {
        let iframe_dir = root.join("iframe");
        let existing = store.get_iframe(&video.id);
        match iframe_playlist::build(
            video,
            &iframe_dir,
            existing.as_ref(),
            replace,
            config.trickplay().hw_accel,
            config.trickplay().threads,
            config.trickplay().priority,
            media_encoder,
            logger,
            cancel,
        )
        .await
        {
            Ok(Some(info)) => {
                if let Err(e) = store.upsert_iframe(info) {
                    logger.log(
                        LogLevel::Error,
                        &format!("persist iframe playlist row for video {}: {e}", video.id),
                    );
                }
            }
            Ok(None) => {}
            Err(e) => {
                logger.log(
                    LogLevel::Error,
                    &format!("build iframe playlist for video {}: {e}", video.id),
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{
        new_dummy_msg_logger, DisallowedShape, SpatialFormat, TrickplayOptions, VideoId,
    };
    use media_encoder::{ExtractThumbsOptions, GenerateIframeHlsOptions, MediaEncoderError};
    use std::path::{Path, PathBuf};
    use trickplay::{ComposeTileError, ComposeTileOptions};
    use url::Url;

    struct FakeConfig {
        trickplay: TrickplayOptions,
        enable_trickplay: bool,
        disable_iframe: bool,
    }

    impl ArtifactEnvConfig for FakeConfig {
        fn data_dir(&self) -> &Path {
            Path::new("/data")
        }
        fn config_dir(&self) -> &Path {
            Path::new("/config")
        }
        fn model_base_url(&self) -> &Url {
            static URL: std::sync::OnceLock<Url> = std::sync::OnceLock::new();
            URL.get_or_init(|| Url::parse("https://example.test").unwrap())
        }
        fn trickplay(&self) -> &TrickplayOptions {
            &self.trickplay
        }
        fn save_with_media(&self, _library: &str) -> bool {
            false
        }
        fn enable_trickplay_image_extraction(&self) -> bool {
            self.enable_trickplay
        }
        fn disable_iframe_playlist_generation(&self) -> bool {
            self.disable_iframe
        }
        fn raw(&self) -> &str {
            ""
        }
    }

    struct NoopEncoder;

    #[async_trait]
    impl MediaEncoder for NoopEncoder {
        async fn extract_thumbs(
            &self,
            _opts: &ExtractThumbsOptions,
            _cancel: &CancellationToken,
        ) -> Result<PathBuf, MediaEncoderError> {
            Err(MediaEncoderError::NoOutput)
        }
        async fn generate_iframe_hls(
            &self,
            _opts: &GenerateIframeHlsOptions,
            _cancel: &CancellationToken,
        ) -> Result<PathBuf, MediaEncoderError> {
            Err(MediaEncoderError::NoOutput)
        }
    }

    struct NoopImageEncoder;
    impl ImageEncoder for NoopImageEncoder {
        fn compose_tile(&self, _opts: &ComposeTileOptions) -> Result<u32, ComposeTileError> {
            Err(ComposeTileError::Empty)
        }
        fn get_size(&self, _path: &Path) -> Result<(u32, u32), ComposeTileError> {
            Err(ComposeTileError::Empty)
        }
    }

    fn video(media_dir: &Path) -> VideoRef {
        VideoRef {
            id: VideoId::try_from("v1".to_owned()).unwrap(),
            path: media_dir.join("movie.mkv"),
            spatial_format: SpatialFormat::None,
            width: 1920,
            height: 1080,
            duration_ms: 60_000,
            shape: DisallowedShape::default(),
        }
    }

    #[tokio::test]
    async fn test_refresh_skips_entirely_when_trickplay_disabled() {
        let media_dir = tempfile::tempdir().unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(data_dir.path()).unwrap();
        let path_manager = PathManager::new(data_dir.path().to_owned());
        let config = FakeConfig {
            trickplay: TrickplayOptions {
                interval_ms: 10_000,
                widths: vec![320],
                tile_width: 10,
                tile_height: 10,
                jpeg_quality: 90,
                hw_accel: false,
                threads: 1,
                priority: false,
                iframes_only: false,
            },
            enable_trickplay: false,
            disable_iframe: true,
        };
        let lock = AsyncMutex::new(());
        let logger = new_dummy_msg_logger();
        let cancel = CancellationToken::new();

        refresh_video(
            &video(media_dir.path()),
            "movies",
            false,
            &config,
            &path_manager,
            &store,
            &NoopEncoder,
            &NoopImageEncoder,
            &lock,
            &logger,
            &cancel,
        )
        .await
        .unwrap();

        assert!(store.list_trickplay_by_item(&VideoId::try_from("v1".to_owned()).unwrap()).is_empty());
    }
}
