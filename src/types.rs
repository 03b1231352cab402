use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// An inscription identity: `<txid>i<index>`. Index 0 is implied when the
/// suffix is omitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InscriptionId {
    pub txid: String,
    pub index: u32,
}

impl InscriptionId {
    /// Parse `<txid>` or `<txid>i<N>`. The txid must be 64 lowercase-able
    /// hex characters.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (txid, index) = match s.find('i') {
            Some(pos) => {
                let idx = s[pos + 1..]
                    .parse::<u32>()
                    .map_err(|_| Error::InvalidInput(format!("bad inscription index in {}", s)))?;
                (&s[..pos], idx)
            }
            None => (s, 0),
        };
        if txid.len() != 64 || !txid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidInput(format!("bad txid in inscription id {}", s)));
        }
        Ok(Self {
            txid: txid.to_ascii_lowercase(),
            index,
        })
    }

    /// The identifier without the `iN` suffix.
    pub fn base_txid(&self) -> &str {
        &self.txid
    }
}

impl fmt::Display for InscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}i{}", self.txid, self.index)
    }
}

/// Closed classification of decoded payloads. Decisions (text scanning,
/// renames, dependency handling) key off this; the original declared mime
/// travels separately as `display_mime` for round-tripping to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Text,
    Html,
    Svg,
    Javascript,
    Json,
    GltfJson,
    Png,
    Jpeg,
    Gif,
    Webp,
    Glb,
    OctetStream,
}

impl PayloadKind {
    /// Classify a normalized (lowercased, parameter-free) media type.
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            "text/html" => PayloadKind::Html,
            "image/svg+xml" => PayloadKind::Svg,
            "application/javascript" | "application/x-javascript" | "text/javascript" => {
                PayloadKind::Javascript
            }
            "application/json" => PayloadKind::Json,
            "model/gltf+json" => PayloadKind::GltfJson,
            "model/gltf-binary" => PayloadKind::Glb,
            "image/png" => PayloadKind::Png,
            "image/jpeg" => PayloadKind::Jpeg,
            "image/gif" => PayloadKind::Gif,
            "image/webp" => PayloadKind::Webp,
            "application/octet-stream" => PayloadKind::OctetStream,
            m if m.starts_with("text/") => PayloadKind::Text,
            "application/xml" => PayloadKind::Text,
            _ => PayloadKind::OctetStream,
        }
    }

    /// Payloads the dependency resolver is allowed to scan as UTF-8 text.
    /// Binary kinds (GLB, images) must never be decoded as text.
    pub fn is_text_like(&self) -> bool {
        matches!(
            self,
            PayloadKind::Text
                | PayloadKind::Html
                | PayloadKind::Svg
                | PayloadKind::Javascript
                | PayloadKind::Json
                | PayloadKind::GltfJson
        )
    }

    /// File extension for stored artifacts of this kind.
    pub fn ext(&self) -> &'static str {
        match self {
            PayloadKind::Text => "txt",
            PayloadKind::Html => "html",
            PayloadKind::Svg => "svg",
            PayloadKind::Javascript => "js",
            PayloadKind::Json => "json",
            PayloadKind::GltfJson => "gltf",
            PayloadKind::Png => "png",
            PayloadKind::Jpeg => "jpg",
            PayloadKind::Gif => "gif",
            PayloadKind::Webp => "webp",
            PayloadKind::Glb => "glb",
            PayloadKind::OctetStream => "bin",
        }
    }
}

/// One row of the master index: everything known about a materialized
/// inscription. `created_at` is set on first insert and preserved across
/// updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterEntry {
    pub txid: String,
    pub filename: String,
    pub mime_type: String,
    pub ext: String,
    pub size: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Summary statistics from a completed chain walk.
#[derive(Debug, Clone, Default)]
pub struct WalkStats {
    pub chunks_found: u64,
    pub estimated_total: Option<u64>,
    pub hops: u64,
}
