// SPDX-License-Identifier: GPL-2.0-or-later

//! §4.J Artifact store: a durable record store for `TrickplayInfo` (keyed
//! `(item_id, width)`) and `IFramePlaylistInfo` (keyed `item_id`). Records
//! are persisted as one JSON file per key, written via the originating
//! codebase's write-temp-then-rename convention (`plugins/tflite/label.rs`'s
//! `save_to_disk`) and mirrored in an in-memory index guarded by a single
//! `std::sync::Mutex`, the same in-memory-map-backed-by-durable-fs-state
//! shape as `src/recdb/recdb.rs`'s `RecDb`: the map is mutated only after
//! the filesystem write that makes a change durable has completed.

use common::{IFramePlaylistInfo, TrickplayInfo, VideoId};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadArtifactStoreError {
    #[error("create directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("list directory {0}: {1}")]
    ListDir(PathBuf, fs::FsError),

    #[error("read file {0}: {1}")]
    ReadFile(PathBuf, fs::FsError),

    #[error("deserialize {0}: {1}")]
    Deserialize(PathBuf, serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ArtifactStoreError {
    #[error("serialize record: {0}")]
    Serialize(serde_json::Error),

    #[error("write file {0}: {1}")]
    WriteFile(PathBuf, std::io::Error),

    #[error("rename {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),

    #[error("remove file {0}: {1}")]
    RemoveFile(PathBuf, std::io::Error),
}

struct Index {
    trickplay: HashMap<(VideoId, u32), TrickplayInfo>,
    iframe: HashMap<VideoId, IFramePlaylistInfo>,
}

/// Durable store for §4.J's two tables, rooted at `<data_dir>/artifacts`.
pub struct ArtifactStore {
    root: PathBuf,
    index: Mutex<Index>,
}

impl ArtifactStore {
    /// Opens (creating if absent) the store at `data_dir/artifacts`, loading
    /// every persisted record into the in-memory index.
    pub fn new(data_dir: &Path) -> Result<Self, LoadArtifactStoreError> {
        let root = data_dir.join("artifacts");
        let trickplay_dir = root.join("trickplay");
        let iframe_dir = root.join("iframe");
        std::fs::create_dir_all(&trickplay_dir)
            .map_err(|e| LoadArtifactStoreError::CreateDir(trickplay_dir.clone(), e))?;
        std::fs::create_dir_all(&iframe_dir)
            .map_err(|e| LoadArtifactStoreError::CreateDir(iframe_dir.clone(), e))?;

        let mut trickplay = HashMap::new();
        for info in load_json_dir::<TrickplayInfo>(&trickplay_dir)? {
            trickplay.insert((info.video_id.clone(), info.width), info);
        }
        let mut iframe = HashMap::new();
        for info in load_json_dir::<IFramePlaylistInfo>(&iframe_dir)? {
            iframe.insert(info.video_id.clone(), info);
        }

        Ok(Self {
            root,
            index: Mutex::new(Index { trickplay, iframe }),
        })
    }

    fn trickplay_dir(&self) -> PathBuf {
        self.root.join("trickplay")
    }

    fn iframe_dir(&self) -> PathBuf {
        self.root.join("iframe")
    }

    fn trickplay_path(&self, video_id: &VideoId, width: u32) -> PathBuf {
        self.trickplay_dir()
            .join(format!("{}-{width}.json", video_id.without_dashes()))
    }

    fn iframe_path(&self, video_id: &VideoId) -> PathBuf {
        self.iframe_dir()
            .join(format!("{}.json", video_id.without_dashes()))
    }

    #[must_use]
    pub fn get_trickplay(&self, video_id: &VideoId, width: u32) -> Option<TrickplayInfo> {
        let index = self.index.lock().expect("index mutex poisoned");
        index.trickplay.get(&(video_id.clone(), width)).cloned()
    }

    #[must_use]
    pub fn list_trickplay_by_item(&self, video_id: &VideoId) -> Vec<TrickplayInfo> {
        let index = self.index.lock().expect("index mutex poisoned");
        let mut rows: Vec<TrickplayInfo> = index
            .trickplay
            .values()
            .filter(|v| &v.video_id == video_id)
            .cloned()
            .collect();
        rows.sort_by_key(|v| v.width);
        rows
    }

    #[must_use]
    pub fn list_trickplay(&self, limit: usize, offset: usize) -> Vec<TrickplayInfo> {
        let index = self.index.lock().expect("index mutex poisoned");
        let mut rows: Vec<TrickplayInfo> = index.trickplay.values().cloned().collect();
        rows.sort_by(|a, b| a.video_id.cmp(&b.video_id).then(a.width.cmp(&b.width)));
        rows.into_iter().skip(offset).take(limit).collect()
    }

    pub fn upsert_trickplay(&self, info: TrickplayInfo) -> Result<(), ArtifactStoreError> {
        let path = self.trickplay_path(&info.video_id, info.width);
        write_json(&path, &info)?;
        let mut index = self.index.lock().expect("index mutex poisoned");
        index.trickplay.insert((info.video_id.clone(), info.width), info);
        Ok(())
    }

    pub fn delete_trickplay_by_item(&self, video_id: &VideoId) -> Result<(), ArtifactStoreError> {
        let mut index = self.index.lock().expect("index mutex poisoned");
        let widths: Vec<u32> = index
            .trickplay
            .keys()
            .filter(|(id, _)| id == video_id)
            .map(|(_, w)| *w)
            .collect();
        for width in widths {
            let path = self.trickplay_path(video_id, width);
            remove_if_exists(&path)?;
            index.trickplay.remove(&(video_id.clone(), width));
        }
        Ok(())
    }

    #[must_use]
    pub fn get_iframe(&self, video_id: &VideoId) -> Option<IFramePlaylistInfo> {
        let index = self.index.lock().expect("index mutex poisoned");
        index.iframe.get(video_id).cloned()
    }

    #[must_use]
    pub fn list_iframe(&self, limit: usize, offset: usize) -> Vec<IFramePlaylistInfo> {
        let index = self.index.lock().expect("index mutex poisoned");
        let mut rows: Vec<IFramePlaylistInfo> = index.iframe.values().cloned().collect();
        rows.sort_by(|a, b| a.video_id.cmp(&b.video_id));
        rows.into_iter().skip(offset).take(limit).collect()
    }

    pub fn upsert_iframe(&self, info: IFramePlaylistInfo) -> Result<(), ArtifactStoreError> {
        let path = self.iframe_path(&info.video_id);
        write_json(&path, &info)?;
        let mut index = self.index.lock().expect("index mutex poisoned");
        index.iframe.insert(info.video_id.clone(), info);
        Ok(())
    }

    pub fn delete_iframe_by_item(&self, video_id: &VideoId) -> Result<(), ArtifactStoreError> {
        let path = self.iframe_path(video_id);
        remove_if_exists(&path)?;
        let mut index = self.index.lock().expect("index mutex poisoned");
        index.iframe.remove(video_id);
        Ok(())
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), ArtifactStoreError> {
    let raw = serde_json::to_vec_pretty(value).map_err(ArtifactStoreError::Serialize)?;
    let mut temp_path = path.to_owned();
    temp_path.set_extension("json.tmp");
    std::fs::write(&temp_path, raw).map_err(|e| ArtifactStoreError::WriteFile(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ArtifactStoreError::Rename(temp_path, path.to_owned(), e))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), ArtifactStoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ArtifactStoreError::RemoveFile(path.to_owned(), e)),
    }
}

fn load_json_dir<T: serde::de::DeserializeOwned>(
    dir: &Path,
) -> Result<Vec<T>, LoadArtifactStoreError> {
    let entries = fs::dir_fs(dir.to_owned())
        .read_dir()
        .map_err(|e| LoadArtifactStoreError::ListDir(dir.to_owned(), e))?;
    let mut out = Vec::new();
    for entry in entries {
        let fs::Entry::File(mut file) = entry else {
            continue;
        };
        let path = dir.join(file.name());
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = file
            .read()
            .map_err(|e| LoadArtifactStoreError::ReadFile(path.clone(), e))?;
        let value = serde_json::from_slice(&raw)
            .map_err(|e| LoadArtifactStoreError::Deserialize(path.clone(), e))?;
        out.push(value);
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn video_id(s: &str) -> VideoId {
        VideoId::try_from(s.to_owned()).unwrap()
    }

    fn trickplay_info(video_id: VideoId, width: u32) -> TrickplayInfo {
        TrickplayInfo {
            video_id,
            width,
            tile_width: 10,
            tile_height: 10,
            interval_ms: 10_000,
            thumbnail_count: 1,
            tile_image_height: Some(100),
            bandwidth_bps: 1000,
        }
    }

    fn iframe_info(video_id: VideoId) -> IFramePlaylistInfo {
        IFramePlaylistInfo {
            video_id,
            width: 284,
            height: 160,
            segment_count: 5,
            bandwidth_bps: 2000,
        }
    }

    #[test]
    fn test_upsert_and_get_trickplay_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let info = trickplay_info(video_id("v1"), 320);
        store.upsert_trickplay(info.clone()).unwrap();

        assert_eq!(Some(info), store.get_trickplay(&video_id("v1"), 320));
        assert!(dir
            .path()
            .join("artifacts/trickplay/v1-320.json")
            .is_file());
    }

    #[test]
    fn test_reopening_store_loads_persisted_records() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ArtifactStore::new(dir.path()).unwrap();
            store
                .upsert_trickplay(trickplay_info(video_id("v1"), 320))
                .unwrap();
            store.upsert_iframe(iframe_info(video_id("v1"))).unwrap();
        }

        let store = ArtifactStore::new(dir.path()).unwrap();
        assert!(store.get_trickplay(&video_id("v1"), 320).is_some());
        assert!(store.get_iframe(&video_id("v1")).is_some());
    }

    #[test]
    fn test_delete_trickplay_by_item_removes_all_widths() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        store
            .upsert_trickplay(trickplay_info(video_id("v1"), 320))
            .unwrap();
        store
            .upsert_trickplay(trickplay_info(video_id("v1"), 640))
            .unwrap();
        store
            .upsert_trickplay(trickplay_info(video_id("v2"), 320))
            .unwrap();

        store.delete_trickplay_by_item(&video_id("v1")).unwrap();

        assert!(store.list_trickplay_by_item(&video_id("v1")).is_empty());
        assert_eq!(1, store.list_trickplay_by_item(&video_id("v2")).len());
        assert!(!dir
            .path()
            .join("artifacts/trickplay/v1-320.json")
            .exists());
    }

    #[test]
    fn test_list_trickplay_orders_by_item_id_then_width() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        store
            .upsert_trickplay(trickplay_info(video_id("b"), 640))
            .unwrap();
        store
            .upsert_trickplay(trickplay_info(video_id("a"), 320))
            .unwrap();
        store
            .upsert_trickplay(trickplay_info(video_id("a"), 640))
            .unwrap();

        let rows = store.list_trickplay(10, 0);
        let keys: Vec<(String, u32)> = rows
            .iter()
            .map(|r| (r.video_id.to_string(), r.width))
            .collect();
        assert_eq!(
            vec![
                ("a".to_owned(), 320),
                ("a".to_owned(), 640),
                ("b".to_owned(), 640),
            ],
            keys
        );
    }

    #[test]
    fn test_delete_iframe_by_item_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        store.delete_iframe_by_item(&video_id("missing")).unwrap();
    }
}
