use std::path::PathBuf;
use tracing::{error, info};

use doginalsd::broadcast::Broadcaster;
use doginalsd::config;
use doginalsd::materialize::Materializer;
use doginalsd::progress::ProgressTracker;
use doginalsd::rpc::RpcClient;
use doginalsd::store::ContentStore;
use doginalsd::telemetry::{init_tracing, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::init_global_config()?;
    let cfg = config::get_global_config();
    // keep the file writer alive for the process lifetime
    let _log_guard = init_tracing(TelemetryConfig::from_config(cfg))?;

    let (url, user, pass) = config::get_rpc_settings(cfg)?;
    let rpc = RpcClient::new(url, user, pass);

    // A pending journal left by an interrupted broadcast takes precedence
    // over everything else: rebroadcast it and exit.
    let wallet_dir = PathBuf::from(config::get_wallet_dir(cfg)?);
    let broadcaster = Broadcaster::new(&rpc, &wallet_dir);
    if let Some(resent) = broadcaster.resume_pending().await? {
        info!(resent, "pending journal drained, exiting");
        return Ok(());
    }

    let store = ContentStore::new(config::get_content_dir(cfg)?)?;
    let progress = ProgressTracker::new();
    let materializer = Materializer::new(&rpc, &store, &progress);

    for raw_id in std::env::args().skip(1) {
        match materializer.reconstruct(&raw_id).await {
            Ok(artifact) => {
                info!(
                    id = %artifact.id,
                    file = %artifact.filename,
                    mime = %artifact.mime,
                    size = artifact.size,
                    "materialized"
                );
            }
            Err(e) => error!(id = %raw_id, error = %e, "decode failed"),
        }
    }

    Ok(())
}
