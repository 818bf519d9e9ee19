// SPDX-License-Identifier: GPL-2.0-or-later

//! §4.K Coordinator: per-video refresh orchestration tying together the
//! trickplay tile builder (4.H), I-frame playlist builder (4.I), and
//! artifact store (4.J) behind the `PathManager` contract and a
//! process-wide single-flight lock for heavy media-encoder work.

pub mod path_manager;
pub mod refresh;

pub use path_manager::{PathManager, RelocateError};
pub use refresh::{refresh_video, RefreshError, TrickplayLock};
