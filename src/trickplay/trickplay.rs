// SPDX-License-Identifier: GPL-2.0-or-later

//! Trickplay tile builder (§4.H): per-width thumbnail extraction, tiling
//! into composite JPEGs, atomic directory replace, pruning of stale output
//! directories, and the HLS tiles manifest served alongside them. Grounded
//! on the originating codebase's recording database (`src/recdb/recdb.rs`)
//! for the atomic-replace/prune shape; the thumbnail-scaling plugin
//! (`plugins/thumb_scale/thumb.rs`) for the idea of a pluggable image-scale
//! step, generalised here to a full tile compositor.

pub mod build;
pub mod image_encoder;
pub mod playlist;

pub use build::{
    build_for_width, check_preconditions, prune_unaccounted, round_down_even,
    BuildTrickplayError, PreconditionUnmet, PruneTrickplayError,
};
pub use image_encoder::{ComposeTileError, ComposeTileOptions, ImageEncoder, JpegImageEncoder};
pub use playlist::hls_playlist;
