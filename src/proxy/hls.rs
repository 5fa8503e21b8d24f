// HLS manifest rewriting
//
// An m3u8 playlist lists segment, sub-playlist, and key URLs. When the
// player fetches a playlist through the gateway, every URL inside it must
// also point back at the gateway, otherwise the player's follow-up segment
// requests would go to the origin directly and lose header tunneling.
//
// Rewrite rule: comment (#) and blank lines pass through unchanged; every
// other line is resolved to an absolute URL (relative references resolve
// against the playlist's own directory) and replaced with
// `<gateway>?url=<percent-encoded absolute URL>`.

use url::Url;

/// True if the response should be treated as an HLS manifest: the target
/// names an .m3u8 resource, or the content type is an HLS MIME type.
pub fn is_hls_manifest(target_url: &str, content_type: Option<&str>) -> bool {
    if target_url.contains(".m3u8") {
        return true;
    }
    content_type.map_or(false, |value| value.to_ascii_lowercase().contains("mpegurl"))
}

/// Resolve a possibly-relative playlist reference against the manifest URL.
fn make_absolute(reference: &str, base: &Url) -> String {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return reference.to_string();
    }
    match base.join(reference) {
        Ok(joined) => joined.to_string(),
        Err(_) => reference.to_string(),
    }
}

/// Rewrite every URL line of a manifest to route through the gateway path.
pub fn rewrite_manifest(manifest: &str, target_url: &Url, gateway_path: &str) -> String {
    manifest
        .split('\n')
        .map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() || line.starts_with('#') {
                return line.to_string();
            }
            let absolute = make_absolute(trimmed, target_url);
            format!("{}?url={}", gateway_path, urlencoding::encode(&absolute))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
