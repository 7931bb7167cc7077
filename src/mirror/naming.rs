use std::path::Path;

use crate::model::{Sha1Hex, UserId};

const FALLBACK_NAME: &str = "file";
const FALLBACK_EXTENSION: &str = "jpg";

/// Replace runs of characters outside `[A-Za-z0-9_.-]` with `_`, collapse
/// repeated `_`, and trim `_` from both ends.
pub fn sanitize_basename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let keep = ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-');
        let next = if keep { ch } else { '_' };
        if next == '_' && out.ends_with('_') {
            continue;
        }
        out.push(next);
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Media-store path of an asset: `user_<id>/<digest12>_<basename>`.
pub fn dest_path_for(owner: UserId, digest: &Sha1Hex, basename: &str) -> String {
    format!(
        "user_{owner}/{}_{}",
        digest.short(),
        sanitize_basename(basename)
    )
}

/// Extension implied by a `Content-Type` header value.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if mime.contains("jpeg") || mime.contains("jpg") {
        Some("jpg")
    } else if mime.contains("png") {
        Some("png")
    } else if mime.contains("gif") {
        Some("gif")
    } else if mime.contains("webp") {
        Some("webp")
    } else if mime.contains("bmp") {
        Some("bmp")
    } else if mime.contains("avif") {
        Some("avif")
    } else {
        None
    }
}

/// Extension recognized from the leading bytes of an image.
pub fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
}

/// Basename for bytes fetched from `url`, with an extension added from the
/// content type, then the bytes, then `jpg` when the URL had none.
pub fn remote_basename(url: &str, content_type: Option<&str>, bytes: &[u8]) -> String {
    let path = url::Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let last = path.rsplit('/').next().unwrap_or_default();
    let has_extension = Path::new(last).extension().is_some_and(|ext| !ext.is_empty());
    if has_extension {
        return sanitize_basename(last);
    }
    let extension = content_type
        .and_then(extension_for_content_type)
        .or_else(|| sniff_extension(bytes))
        .unwrap_or(FALLBACK_EXTENSION);
    let stem = if last.is_empty() { "img" } else { last };
    sanitize_basename(&format!("{stem}.{extension}"))
}
