/// Content Store
///
/// Content-addressed on-disk cache of decoded payloads plus the master
/// index. One file per inscription under `content/`, named
/// `<inscriptionId>.<ext>`; the index at `content/master/master.json` is
/// the sole source of truth about what has been decoded and the
/// filesystem must agree - an entry whose file is gone is stale and gets
/// dropped so the decode runs again.
///
/// All writes go through write-to-temp + rename in the target directory.

use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::Result;
use crate::sniff;
use crate::types::{InscriptionId, MasterEntry, PayloadKind};

/// A materialized inscription as callers see it.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub id: String,
    pub path: PathBuf,
    pub filename: String,
    pub mime: String,
    pub ext: String,
    pub size: u64,
    pub kind: PayloadKind,
}

pub struct ContentStore {
    content_dir: PathBuf,
    master_path: PathBuf,
    master: RwLock<HashMap<String, MasterEntry>>,
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

impl ContentStore {
    pub fn new(content_dir: impl Into<PathBuf>) -> Result<Self> {
        let content_dir = content_dir.into();
        let master_dir = content_dir.join("master");
        fs::create_dir_all(&master_dir)?;
        let master_path = master_dir.join("master.json");

        let master = if master_path.exists() {
            let raw = fs::read_to_string(&master_path)?;
            serde_json::from_str(&raw)?
        } else {
            HashMap::new()
        };

        Ok(Self {
            content_dir,
            master_path,
            master: RwLock::new(master),
        })
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    fn persist_master(&self, master: &HashMap<String, MasterEntry>) -> Result<()> {
        let body = serde_json::to_vec_pretty(master)?;
        atomic_write(&self.master_path, &body)?;
        Ok(())
    }

    /// Master lookup tolerating both `<txid>` and `<txid>iN` inputs.
    pub async fn find(&self, raw: &str) -> Option<MasterEntry> {
        let master = self.master.read().await;
        if let Some(entry) = master.get(raw) {
            return Some(entry.clone());
        }
        if !raw.contains('i') {
            return master.get(&format!("{}i0", raw)).cloned();
        }
        None
    }

    /// Cache probe. Returns the artifact when the recorded file is still
    /// readable; weak classifications get re-sniffed (and the file
    /// renamed) on the way out. A missing file marks the entry stale.
    pub async fn cached(&self, id: &InscriptionId) -> Result<Option<StoredArtifact>> {
        let key = id.to_string();
        let entry = match self.master.read().await.get(&key).cloned() {
            Some(e) => e,
            None => return Ok(None),
        };

        let path = self.content_dir.join(&entry.filename);
        if !path.is_file() {
            warn!(id = %key, file = %entry.filename, "master entry is stale, dropping");
            let mut master = self.master.write().await;
            master.remove(&key);
            self.persist_master(&master)?;
            return Ok(None);
        }

        let mut entry = entry;
        if sniff::is_weak(&entry.mime_type, &entry.ext) {
            let bytes = fs::read(&path)?;
            if let Some((mime, ext)) = sniff::sniff(&bytes) {
                let filename = format!("{}.{}", key, ext);
                let new_path = self.content_dir.join(&filename);
                fs::rename(&path, &new_path)?;
                entry.mime_type = mime.to_string();
                entry.ext = ext.to_string();
                entry.filename = filename;
                let mut master = self.master.write().await;
                master.insert(key.clone(), entry.clone());
                self.persist_master(&master)?;
            }
        }

        let path = self.content_dir.join(&entry.filename);
        let kind = PayloadKind::from_mime(&entry.mime_type);
        Ok(Some(StoredArtifact {
            id: key,
            path,
            filename: entry.filename,
            mime: entry.mime_type,
            ext: entry.ext,
            size: entry.size,
            kind,
        }))
    }

    /// First materialization: write raw bytes under the declared
    /// extension, rename to the sniffed one when the declaration is weak,
    /// and upsert the master preserving `created_at`.
    ///
    /// `model_viewer` marks a `<model-viewer src>` dependency: a weak one
    /// is written under a no-extension name and renamed straight to
    /// `.glb` regardless of sniffing.
    pub async fn put(
        &self,
        id: &InscriptionId,
        bytes: &[u8],
        declared_mime: &str,
        model_viewer: bool,
    ) -> Result<StoredArtifact> {
        let key = id.to_string();
        let mime = sniff::normalize(declared_mime);
        let kind = PayloadKind::from_mime(&mime);
        let declared_ext = kind.ext();

        let (filename, mime, ext, kind) = if model_viewer && sniff::is_weak(&mime, declared_ext) {
            let bare = self.content_dir.join(&key);
            atomic_write(&bare, bytes)?;
            let filename = format!("{}.glb", key);
            fs::rename(&bare, self.content_dir.join(&filename))?;
            (filename, "model/gltf-binary".to_string(), "glb".to_string(), PayloadKind::Glb)
        } else {
            let filename = format!("{}.{}", key, declared_ext);
            let path = self.content_dir.join(&filename);
            atomic_write(&path, bytes)?;

            if sniff::is_weak(&mime, declared_ext) {
                let (mime, ext, kind) = sniff::resolve_weak(bytes, &mime);
                if ext != declared_ext {
                    let renamed = format!("{}.{}", key, ext);
                    fs::rename(&path, self.content_dir.join(&renamed))?;
                    (renamed, mime, ext, kind)
                } else {
                    (filename, mime, ext, kind)
                }
            } else {
                (filename, mime, declared_ext.to_string(), kind)
            }
        };

        let size = bytes.len() as u64;
        let mut master = self.master.write().await;
        let created_at = master
            .get(&key)
            .map(|existing| existing.created_at)
            .unwrap_or_else(Utc::now);
        master.insert(
            key.clone(),
            MasterEntry {
                txid: id.base_txid().to_string(),
                filename: filename.clone(),
                mime_type: mime.clone(),
                ext: ext.clone(),
                size,
                created_at,
            },
        );
        self.persist_master(&master)?;
        drop(master);

        info!(id = %key, file = %filename, mime = %mime, size, "materialized inscription");

        Ok(StoredArtifact {
            id: key.clone(),
            path: self.content_dir.join(&filename),
            filename,
            mime,
            ext,
            size,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TXID: &str = "a0b1c2d3e4f5a0b1c2d3e4f5a0b1c2d3e4f5a0b1c2d3e4f5a0b1c2d3e4f5a0b1";

    fn id() -> InscriptionId {
        InscriptionId::parse(TXID).unwrap()
    }

    #[tokio::test]
    async fn test_put_and_cached_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();

        let stored = store.put(&id(), b"hello", "text/plain", false).await.unwrap();
        assert_eq!(stored.ext, "txt");
        assert_eq!(stored.filename, format!("{}i0.txt", TXID));
        assert_eq!(fs::read(&stored.path).unwrap(), b"hello");

        let hit = store.cached(&id()).await.unwrap().unwrap();
        assert_eq!(hit.mime, "text/plain");
        assert_eq!(hit.size, 5);
    }

    #[tokio::test]
    async fn test_weak_png_gets_sniffed_and_renamed() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();

        let mut png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        png.extend_from_slice(&[0u8; 8]);
        let stored = store
            .put(&id(), &png, "application/octet-stream", false)
            .await
            .unwrap();
        assert_eq!(stored.mime, "image/png");
        assert_eq!(stored.filename, format!("{}i0.png", TXID));
        assert!(stored.path.is_file());
        assert!(!dir.path().join(format!("{}i0.bin", TXID)).exists());
    }

    #[tokio::test]
    async fn test_unsniffable_weak_payload_keeps_bin() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();

        let stored = store
            .put(&id(), &[0x00, 0x01, 0x02], "application/octet-stream", false)
            .await
            .unwrap();
        assert_eq!(stored.ext, "bin");
        assert_eq!(stored.mime, "application/octet-stream");
    }

    #[tokio::test]
    async fn test_model_viewer_weak_becomes_glb() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();

        // Not even GLB magic: the rename happens regardless of sniffing.
        let stored = store
            .put(&id(), &[0xde, 0xad], "application/octet-stream", true)
            .await
            .unwrap();
        assert_eq!(stored.ext, "glb");
        assert_eq!(stored.mime, "model/gltf-binary");
        assert!(stored.path.is_file());
    }

    #[tokio::test]
    async fn test_created_at_preserved_across_updates() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();

        store.put(&id(), b"v1", "text/plain", false).await.unwrap();
        let first = store.find(TXID).await.unwrap();

        store.put(&id(), b"v2 longer", "text/plain", false).await.unwrap();
        let second = store.find(TXID).await.unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.size, 9);
    }

    #[tokio::test]
    async fn test_missing_file_is_stale() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();

        let stored = store.put(&id(), b"gone", "text/plain", false).await.unwrap();
        fs::remove_file(&stored.path).unwrap();

        assert!(store.cached(&id()).await.unwrap().is_none());
        assert!(store.find(TXID).await.is_none());
    }

    #[tokio::test]
    async fn test_master_survives_reload() {
        let dir = TempDir::new().unwrap();
        {
            let store = ContentStore::new(dir.path()).unwrap();
            store.put(&id(), b"persist me", "text/html", false).await.unwrap();
        }
        let store = ContentStore::new(dir.path()).unwrap();
        let hit = store.cached(&id()).await.unwrap().unwrap();
        assert_eq!(hit.mime, "text/html");
        assert_eq!(hit.kind, PayloadKind::Html);
    }

    #[tokio::test]
    async fn test_find_tolerates_both_id_forms() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        store.put(&id(), b"x", "text/plain", false).await.unwrap();

        assert!(store.find(TXID).await.is_some());
        assert!(store.find(&format!("{}i0", TXID)).await.is_some());
        assert!(store.find(&format!("{}i1", TXID)).await.is_none());
    }
}
