//! §4.H / §6 HLS trickplay manifest: a pure textual generator over a
//! persisted `TrickplayInfo`, mirroring the originating codebase's
//! line-based HLS playlist construction (`src/hls/playlist.rs`).

use common::TrickplayInfo;
use std::fmt::Write as _;

/// `hls_playlist(video, W)`: the trick-play tiles manifest for one width.
/// `media_source_id` and `api_key` are appended verbatim as query parameters
/// on every tile URL.
#[must_use]
pub fn hls_playlist(info: &TrickplayInfo, media_source_id: &str, api_key: &str) -> String {
    let cells_per_tile = info.tile_width * info.tile_height;
    let tile_count = info.tile_count();
    let interval_s = f64::from(info.interval_ms) / 1000.0;
    let tile_h = info.tile_image_height.unwrap_or(0);
    let resolution_w = info.width * info.tile_width;

    let mut out = String::new();
    let _ = writeln!(out, "#EXTM3U");
    let _ = writeln!(out, "#EXT-X-TARGETDURATION:{tile_count}");
    let _ = writeln!(out, "#EXT-X-VERSION:7");
    let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:1");
    let _ = writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD");
    let _ = writeln!(out, "#EXT-X-IMAGES-ONLY");

    for k in 0..tile_count {
        let thumbs_in_tile = if k + 1 < tile_count {
            cells_per_tile
        } else {
            info.thumbnail_count - k * cells_per_tile
        };
        let extinf = f64::from(thumbs_in_tile) * interval_s;
        let _ = writeln!(out, "#EXTINF:{extinf},");
        let _ = writeln!(
            out,
            "#EXT-X-TILES:RESOLUTION={resolution_w}x{tile_h},LAYOUT={}x{},DURATION={interval_s}",
            info.tile_width, info.tile_height
        );
        let _ = writeln!(out, "{k}.jpg?MediaSourceId={media_source_id}&ApiKey={api_key}");
    }
    let _ = writeln!(out, "#EXT-X-ENDLIST");
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use common::VideoId;
    use pretty_assertions::assert_eq;

    fn info() -> TrickplayInfo {
        TrickplayInfo {
            video_id: VideoId::try_from("v1".to_owned()).unwrap(),
            width: 320,
            tile_width: 10,
            tile_height: 10,
            interval_ms: 10_000,
            thumbnail_count: 250,
            tile_image_height: Some(480),
            bandwidth_bps: 100_000,
        }
    }

    #[test]
    fn test_hls_playlist_matches_scenario() {
        let playlist = hls_playlist(&info(), "abcdef0123456789abcdef0123456789", "tok");

        assert!(playlist.contains("#EXT-X-TARGETDURATION:3"));
        assert_eq!(3, playlist.matches("#EXTINF").count());
        assert!(playlist.contains("#EXTINF:500,"));
        assert!(playlist
            .contains("2.jpg?MediaSourceId=abcdef0123456789abcdef0123456789&ApiKey=tok"));
        assert!(playlist.trim_end().ends_with("#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_hls_playlist_full_tile_extinf() {
        let playlist = hls_playlist(&info(), "id", "tok");
        assert!(playlist.contains("#EXTINF:1000,"));
    }
}
