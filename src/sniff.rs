/// Type Sniffer
///
/// Declared media types on old inscriptions are unreliable: many carry
/// `application/octet-stream` or no extension at all. This module
/// normalizes declared types and, for weak declarations, sniffs a byte
/// prefix so the content store can rename the artifact.

use crate::types::PayloadKind;

/// Lowercase, strip parameters (`; charset=utf-8`), default empty input
/// to `application/octet-stream`.
pub fn normalize(mime: &str) -> String {
    let base = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if base.is_empty() {
        "application/octet-stream".to_string()
    } else {
        base
    }
}

/// A declared classification too vague to trust for display.
pub fn is_weak(mime: &str, ext: &str) -> bool {
    ext.is_empty() || ext == "bin" || normalize(mime) == "application/octet-stream"
}

/// Inspect at most the first 256 bytes and identify known formats.
/// Returns `(mime, ext)` or None when nothing matches.
pub fn sniff(bytes: &[u8]) -> Option<(&'static str, &'static str)> {
    let head = &bytes[..bytes.len().min(256)];

    if head.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(("image/png", "png"));
    }
    if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(("image/jpeg", "jpg"));
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return Some(("image/gif", "gif"));
    }
    if head.len() >= 12 && head.starts_with(b"RIFF") && &head[8..12] == b"WEBP" {
        return Some(("image/webp", "webp"));
    }
    if head.starts_with(b"glTF") {
        return Some(("model/gltf-binary", "glb"));
    }
    if let Some((mime, ext)) = sniff_gltf_json(bytes) {
        return Some((mime, ext));
    }

    None
}

/// GLTF-JSON carries no magic: it is detected as a JSON document whose
/// root object holds `"asset": { "version": ... }`.
fn sniff_gltf_json(bytes: &[u8]) -> Option<(&'static str, &'static str)> {
    let text = std::str::from_utf8(bytes).ok()?;
    let doc: serde_json::Value = serde_json::from_str(text).ok()?;
    let version = doc.as_object()?.get("asset")?.as_object()?.get("version")?;
    if version.is_string() {
        Some(("model/gltf+json", "gltf"))
    } else {
        None
    }
}

/// Sniff-or-fallback used by the content store: returns the final
/// `(mime, ext, kind)` triple for a payload with a weak declaration.
/// When sniffing fails the weak classification is kept.
pub fn resolve_weak(bytes: &[u8], declared_mime: &str) -> (String, String, PayloadKind) {
    match sniff(bytes) {
        Some((mime, ext)) => (mime.to_string(), ext.to_string(), PayloadKind::from_mime(mime)),
        None => {
            let mime = normalize(declared_mime);
            let kind = PayloadKind::from_mime(&mime);
            (mime, kind.ext().to_string(), kind)
        }
    }
}
