/// Dependency Resolver - reference scanning
///
/// Text-like payloads may reference sibling inscriptions either as
/// `/content/<64-hex>(iN)?` paths or as bare `<64-hex>iN` tokens. GLTF
/// JSON documents get a strict scanner that only inspects
/// `buffers[].uri` and `images[].uri` - regex over the whole document
/// would pick up hex-looking asset names as false positives.
///
/// Scanning operates on a UTF-8 view of the payload and is only invoked
/// for text-like kinds; binary payloads never reach these functions.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{InscriptionId, PayloadKind};

static CONTENT_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/content/([0-9a-fA-F]{64})(i[0-9]+)?\b").unwrap());

static BARE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([0-9a-fA-F]{64})i([0-9]+)\b").unwrap());

static MODEL_VIEWER_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<model-viewer[^>]*\ssrc\s*=\s*["']([^"']+)["']"#).unwrap()
});

/// Parse a single reference string (`/content/<id>`, `<txid>iN` or a bare
/// txid) into an inscription id. `/content/<txid>` without a suffix
/// normalizes to `i0`.
pub fn parse_ref(s: &str) -> Option<InscriptionId> {
    if let Some(caps) = CONTENT_REF.captures(s) {
        let txid = caps.get(1).unwrap().as_str();
        let index = caps
            .get(2)
            .map(|m| m.as_str()[1..].parse::<u32>().ok())
            .flatten()
            .unwrap_or(0);
        return InscriptionId::parse(&format!("{}i{}", txid, index)).ok();
    }
    InscriptionId::parse(s).ok()
}

/// Scan a text-like payload for sibling references, in document order,
/// de-duplicated.
pub fn scan(kind: PayloadKind, text: &str) -> Vec<InscriptionId> {
    match kind {
        PayloadKind::GltfJson => scan_gltf_json(text),
        _ => scan_generic(text),
    }
}

fn push_unique(out: &mut Vec<InscriptionId>, id: InscriptionId) {
    if !out.contains(&id) {
        out.push(id);
    }
}

fn scan_generic(text: &str) -> Vec<InscriptionId> {
    let mut out = Vec::new();
    for caps in CONTENT_REF.captures_iter(text) {
        let txid = caps.get(1).unwrap().as_str();
        let index = caps
            .get(2)
            .map(|m| m.as_str()[1..].parse::<u32>().ok())
            .flatten()
            .unwrap_or(0);
        if let Ok(id) = InscriptionId::parse(&format!("{}i{}", txid, index)) {
            push_unique(&mut out, id);
        }
    }
    for caps in BARE_ID.captures_iter(text) {
        let txid = caps.get(1).unwrap().as_str();
        let index: u32 = caps.get(2).unwrap().as_str().parse().unwrap_or(0);
        if let Ok(id) = InscriptionId::parse(&format!("{}i{}", txid, index)) {
            push_unique(&mut out, id);
        }
    }
    out
}

/// Strict scanner for GLTF JSON: only `buffers[].uri` and `images[].uri`
/// are dependency positions.
fn scan_gltf_json(text: &str) -> Vec<InscriptionId> {
    let doc: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let mut out = Vec::new();
    for section in ["buffers", "images"] {
        if let Some(items) = doc.get(section).and_then(|v| v.as_array()) {
            for item in items {
                if let Some(uri) = item.get("uri").and_then(|u| u.as_str()) {
                    if let Some(id) = parse_ref(uri) {
                        push_unique(&mut out, id);
                    }
                }
            }
        }
    }
    out
}

/// Extract `<model-viewer src="...">` references from HTML/SVG. These ids
/// get special GLB handling when they materialize with a weak type.
pub fn scan_model_viewer_sources(text: &str) -> Vec<InscriptionId> {
    let mut out = Vec::new();
    for caps in MODEL_VIEWER_SRC.captures_iter(text) {
        if let Some(id) = parse_ref(caps.get(1).unwrap().as_str()) {
            push_unique(&mut out, id);
        }
    }
    out
}
