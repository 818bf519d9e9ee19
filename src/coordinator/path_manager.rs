//! §6 `PathManager` contract: `get_trickplay_dir(video, save_with_media) →
//! dir`. Two roots per video — one beside the media file, one under the
//! server's own data directory — selected by the `save_with_media` toggle.
//! `relocate` implements 4.K step 2: if the resolved root differs from
//! wherever artifacts currently live on disk, the existing directory is
//! moved (renamed) into the new root rather than regenerated, leaving the
//! artifact store untouched.

use common::VideoRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MEDIA_ROOT_DIR_NAME: &str = ".trickplay";

/// Resolves the two candidate artifact roots for a video and relocates
/// existing artifacts between them when the `save_with_media` toggle flips.
pub struct PathManager {
    data_dir: PathBuf,
}

impl PathManager {
    #[must_use]
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Root under the video's own directory tree.
    #[must_use]
    pub fn media_root(&self, video: &VideoRef) -> PathBuf {
        video
            .path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(MEDIA_ROOT_DIR_NAME)
            .join(video.id.without_dashes())
    }

    /// Root under this server's own data directory.
    #[must_use]
    pub fn data_root(&self, video: &VideoRef) -> PathBuf {
        self.data_dir.join("trickplay").join(video.id.without_dashes())
    }

    /// §6 `get_trickplay_dir`.
    #[must_use]
    pub fn get_trickplay_dir(&self, video: &VideoRef, save_with_media: bool) -> PathBuf {
        if save_with_media {
            self.media_root(video)
        } else {
            self.data_root(video)
        }
    }

    /// Moves existing artifacts from the non-preferred root to the
    /// preferred one if `save_with_media` changed since the last build.
    /// Returns the resolved (preferred) root; the database is untouched.
    pub fn relocate(
        &self,
        video: &VideoRef,
        save_with_media: bool,
    ) -> Result<PathBuf, RelocateError> {
        let preferred = self.get_trickplay_dir(video, save_with_media);
        let other = self.get_trickplay_dir(video, !save_with_media);

        if !preferred.exists() && other.exists() {
            if let Some(parent) = preferred.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RelocateError::CreateDir(parent.to_owned(), e))?;
            }
            std::fs::rename(&other, &preferred)
                .map_err(|e| RelocateError::Rename(other, preferred.clone(), e))?;
        }
        Ok(preferred)
    }
}

#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("create directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("rename {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use common::{DisallowedShape, SpatialFormat, VideoId};
    use pretty_assertions::assert_eq;

    fn video(path: PathBuf) -> VideoRef {
        VideoRef {
            id: VideoId::try_from("v1".to_owned()).unwrap(),
            path,
            spatial_format: SpatialFormat::None,
            width: 1920,
            height: 1080,
            duration_ms: 60_000,
            shape: DisallowedShape::default(),
        }
    }

    #[test]
    fn test_get_trickplay_dir_selects_root_by_toggle() {
        let media_dir = tempfile::tempdir().unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        let pm = PathManager::new(data_dir.path().to_owned());
        let v = video(media_dir.path().join("movie.mkv"));

        assert_eq!(
            media_dir.path().join(".trickplay/v1"),
            pm.get_trickplay_dir(&v, true)
        );
        assert_eq!(
            data_dir.path().join("trickplay/v1"),
            pm.get_trickplay_dir(&v, false)
        );
    }

    #[test]
    fn test_relocate_moves_existing_artifacts_to_preferred_root() {
        let media_dir = tempfile::tempdir().unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        let pm = PathManager::new(data_dir.path().to_owned());
        let v = video(media_dir.path().join("movie.mkv"));

        let old_root = pm.get_trickplay_dir(&v, false);
        std::fs::create_dir_all(old_root.join("320 - 10x10")).unwrap();

        let resolved = pm.relocate(&v, true).unwrap();
        assert_eq!(pm.get_trickplay_dir(&v, true), resolved);
        assert!(resolved.join("320 - 10x10").exists());
        assert!(!old_root.exists());
    }

    #[test]
    fn test_relocate_is_noop_when_nothing_to_move() {
        let media_dir = tempfile::tempdir().unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        let pm = PathManager::new(data_dir.path().to_owned());
        let v = video(media_dir.path().join("movie.mkv"));

        let resolved = pm.relocate(&v, false).unwrap();
        assert_eq!(pm.get_trickplay_dir(&v, false), resolved);
    }
}
