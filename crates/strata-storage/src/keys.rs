//! Shared key generation for storage backends.
//!
//! Key format: `{content prefix}/{creator_id}/{digest}.{ext}`, e.g.
//! `stories/12345/9f86d081884c7d65.mp4`.

use sha2::{Digest, Sha256};
use strata_core::MediaReference;
use url::Url;

/// Hex characters of the source digest kept in the key.
const DIGEST_KEY_LEN: usize = 32;

/// SHA-256 of the source URL, hex encoded.
pub fn source_digest(source_url: &str) -> String {
    hex::encode(Sha256::digest(source_url.as_bytes()))
}

/// MIME type for a media URL, derived from its path extension.
///
/// Images are recognised by extension; anything else is treated as video.
pub fn detect_mime_type(source_url: &str) -> &'static str {
    match extension(source_url).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "video/mp4",
    }
}

/// File extension used in object keys for a MIME type.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "mp4",
    }
}

/// Deterministic destination key for a media reference.
///
/// The same creator, content type and source URL always produce the same key.
pub fn object_key(media: &MediaReference) -> String {
    let digest = source_digest(&media.source_url);
    let ext = extension_for_mime(detect_mime_type(&media.source_url));
    format!(
        "{}/{}/{}.{}",
        media.content_type.key_prefix(),
        sanitize_segment(&media.creator_id),
        &digest[..DIGEST_KEY_LEN],
        ext
    )
}

fn extension(source_url: &str) -> Option<String> {
    let url = Url::parse(source_url).ok()?;
    let file_name = url.path_segments()?.next_back()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Creator ids are used as a path segment; strip anything that would break it.
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::ContentType;

    #[test]
    fn detects_images_by_extension() {
        assert_eq!(detect_mime_type("https://cdn.example/a/b.JPG?x=1"), "image/jpeg");
        assert_eq!(detect_mime_type("https://cdn.example/a/b.webp"), "image/webp");
        assert_eq!(detect_mime_type("https://cdn.example/play?video_id=9"), "video/mp4");
        assert_eq!(detect_mime_type("https://cdn.example.com"), "video/mp4");
    }

    #[test]
    fn extension_ignores_query_fragment_and_host() {
        assert_eq!(
            detect_mime_type("https://img.example.com/v/cover.png?sig=a.jpg#frag.webp"),
            "image/png"
        );
        assert_eq!(detect_mime_type("https://cdn.example.jpg/watch"), "video/mp4");
        assert_eq!(detect_mime_type("https://cdn.example/a/b.tar.JPEG"), "image/jpeg");
        assert_eq!(detect_mime_type("not a url.png"), "video/mp4");
    }

    #[test]
    fn key_is_deterministic_and_prefixed() {
        let media = MediaReference::new("12345", ContentType::Story, "https://cdn/v/1.mp4");
        let first = object_key(&media);
        let second = object_key(&media.clone());
        assert_eq!(first, second);
        assert!(first.starts_with("stories/12345/"));
        assert!(first.ends_with(".mp4"));

        let other = MediaReference::new("12345", ContentType::Story, "https://cdn/v/2.mp4");
        assert_ne!(object_key(&other), first);
    }

    #[test]
    fn creator_segment_cannot_escape() {
        let media = MediaReference::new("../evil", ContentType::Post, "https://cdn/p.png");
        let key = object_key(&media);
        assert!(!key.contains(".."));
        assert!(key.starts_with("posts/___evil/"));
        assert!(key.ends_with(".png"));
    }
}
