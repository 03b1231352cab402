/// Decode pipeline
///
/// One reconstruct call materializes an inscription and, for text-like
/// payloads, every sibling inscription it references, so a self-contained
/// local mirror exists for display. Flow per id: cache probe, chain walk,
/// store write (sniff/rename), dependency recursion, progress complete.
///
/// The visited set (keyed by base txid) and the model-viewer source set
/// are scoped to one top-level reconstruct and travel down the recursion
/// explicitly; cyclic reference graphs terminate and self-references do
/// not recurse.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::progress::ProgressTracker;
use crate::resolver;
use crate::rpc::ChainRpc;
use crate::store::{ContentStore, StoredArtifact};
use crate::types::{InscriptionId, PayloadKind};
use crate::walker::{ChainWalker, DEFAULT_DEPTH_BLOCKS, DEFAULT_MAX_HOPS};

pub struct Materializer<'a, R: ChainRpc> {
    rpc: &'a R,
    store: &'a ContentStore,
    progress: &'a ProgressTracker,
    depth_blocks: u64,
    max_hops: u64,
}

impl<'a, R: ChainRpc> Materializer<'a, R> {
    pub fn new(rpc: &'a R, store: &'a ContentStore, progress: &'a ProgressTracker) -> Self {
        Self {
            rpc,
            store,
            progress,
            depth_blocks: DEFAULT_DEPTH_BLOCKS,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    pub fn with_limits(mut self, depth_blocks: u64, max_hops: u64) -> Self {
        self.depth_blocks = depth_blocks;
        self.max_hops = max_hops;
        self
    }

    /// Materialize `raw_id` (`<txid>` or `<txid>iN`) and its reference
    /// closure. Returns the top-level artifact.
    pub async fn reconstruct(&self, raw_id: &str) -> Result<StoredArtifact> {
        let id = InscriptionId::parse(raw_id)?;
        // Both sets are fresh per top-level call.
        let mut visited: HashSet<String> = HashSet::new();
        let mut model_viewer_srcs: HashSet<String> = HashSet::new();
        visited.insert(id.base_txid().to_string());
        self.materialize(id, &mut visited, &mut model_viewer_srcs).await
    }

    fn materialize<'b>(
        &'b self,
        id: InscriptionId,
        visited: &'b mut HashSet<String>,
        model_viewer_srcs: &'b mut HashSet<String>,
    ) -> Pin<Box<dyn Future<Output = Result<StoredArtifact>> + 'b>> {
        Box::pin(async move {
            let key = id.base_txid().to_string();
            self.progress.start(&key, &id.to_string()).await;

            if let Some(hit) = self.store.cached(&id).await? {
                self.progress.complete(&key).await;
                return Ok(hit);
            }

            let result = self.decode_one(&id, &key, visited, model_viewer_srcs).await;
            self.progress.complete(&key).await;
            result
        })
    }

    async fn decode_one(
        &self,
        id: &InscriptionId,
        key: &str,
        visited: &mut HashSet<String>,
        model_viewer_srcs: &mut HashSet<String>,
    ) -> Result<StoredArtifact> {
        let walker = ChainWalker::with_limits(self.rpc, self.depth_blocks, self.max_hops);
        let outcome = walker.walk(id.base_txid(), self.progress, key).await?;

        let is_model_viewer_src = model_viewer_srcs.contains(id.base_txid());
        let bytes = decode_payload_hex(&outcome.hex, is_model_viewer_src)?;
        let declared_mime = outcome
            .mime
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let artifact = self
            .store
            .put(id, &bytes, &declared_mime, is_model_viewer_src)
            .await?;

        if artifact.kind.is_text_like() {
            self.resolve_dependencies(&artifact, &bytes, key, visited, model_viewer_srcs)
                .await?;
        }

        Ok(artifact)
    }

    async fn resolve_dependencies(
        &self,
        artifact: &StoredArtifact,
        bytes: &[u8],
        key: &str,
        visited: &mut HashSet<String>,
        model_viewer_srcs: &mut HashSet<String>,
    ) -> Result<()> {
        let text = String::from_utf8_lossy(bytes);

        if matches!(artifact.kind, PayloadKind::Html | PayloadKind::Svg) {
            for src in resolver::scan_model_viewer_sources(&text) {
                model_viewer_srcs.insert(src.base_txid().to_string());
            }
        }

        let deps = resolver::scan(artifact.kind, &text);
        if deps.is_empty() {
            return Ok(());
        }

        info!(id = %artifact.id, deps = deps.len(), "resolving dependencies");
        self.progress.set_dependency_plan(key, deps.len() as u64).await;

        for dep in deps {
            if visited.insert(dep.base_txid().to_string()) {
                match self.materialize(dep.clone(), visited, model_viewer_srcs).await {
                    Ok(_) => {}
                    Err(e) => {
                        // A broken reference must not sink the parent.
                        warn!(id = %artifact.id, dep = %dep, error = %e, "dependency failed, continuing");
                    }
                }
            }
            self.progress.increment_dependency_done(key).await;
        }

        Ok(())
    }
}

/// Decode accumulated envelope hex into payload bytes.
///
/// Historical quirk, kept for byte-exact compatibility with prior cached
/// artifacts: an odd-length hex string gets five `"0"` characters
/// appended before decoding. Model-viewer source dependencies are GLB
/// models whose length fields cannot tolerate the extension, so for them
/// the stray trailing nibble is dropped instead.
pub fn decode_payload_hex(hex: &str, suppress_padding: bool) -> Result<Vec<u8>> {
    let mut hex = hex.to_string();
    if hex.len() % 2 == 1 {
        if suppress_padding {
            hex.pop();
        } else {
            hex.push_str("00000");
        }
    }
    hex::decode(&hex).map_err(Error::from)
}
