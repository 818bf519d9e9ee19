//! Serving-time rewrite of a stored `iframe.m3u8` (§4.I "Serving"): textual,
//! line-based, appends `?MediaSourceId=<id>&ApiKey=<token>` to segment URLs
//! and to the `URI` attribute inside `#EXT-X-MAP`. Unknown directives pass
//! through verbatim, mirroring `src/hls/playlist.rs`'s line-rewrite style.

/// Rewrites `manifest` for serving. `media_source_id`/`api_key` are the query
/// parameters appended to every segment reference.
#[must_use]
pub fn rewrite_manifest(manifest: &str, media_source_id: &str, api_key: &str) -> String {
    let query = format!("?MediaSourceId={media_source_id}&ApiKey={api_key}");
    let mut out = String::with_capacity(manifest.len() + query.len() * 4);
    for line in manifest.lines() {
        if let Some(rewritten) = rewrite_map_line(line, &query) {
            out.push_str(&rewritten);
        } else if !line.is_empty() && !line.starts_with('#') {
            out.push_str(line);
            out.push_str(&query);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

/// Rewrites the `URI="..."` attribute of an `#EXT-X-MAP` line, if `line` is
/// one; returns `None` for every other line.
fn rewrite_map_line(line: &str, query: &str) -> Option<String> {
    if !line.starts_with("#EXT-X-MAP:") {
        return None;
    }
    let uri_start = line.find("URI=\"")? + "URI=\"".len();
    let uri_end = uri_start + line[uri_start..].find('"')?;
    let mut rewritten = String::with_capacity(line.len() + query.len());
    rewritten.push_str(&line[..uri_end]);
    rewritten.push_str(query);
    rewritten.push_str(&line[uri_end..]);
    Some(rewritten)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-MAP:URI=\"init.mp4\"\n#EXTINF:2.0,\n00001.m4s\n#EXTINF:2.0,\n00002.m4s\n#EXT-X-ENDLIST\n";

    #[test]
    fn test_rewrite_manifest_appends_query_to_segments_and_map() {
        let got = rewrite_manifest(MANIFEST, "abc123", "tok");
        assert!(got.contains("#EXT-X-MAP:URI=\"init.mp4?MediaSourceId=abc123&ApiKey=tok\"\n"));
        assert!(got.contains("00001.m4s?MediaSourceId=abc123&ApiKey=tok\n"));
        assert!(got.contains("00002.m4s?MediaSourceId=abc123&ApiKey=tok\n"));
        assert!(got.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_rewrite_manifest_preserves_unknown_directives() {
        let manifest = "#EXTM3U\n#EXT-X-CUSTOM:foo\n00001.m4s\n";
        let got = rewrite_manifest(manifest, "id", "tok");
        assert!(got.contains("#EXT-X-CUSTOM:foo\n"));
    }
}
