/// Telemetry: logging setup and log-field helpers
///
/// Logging is configured from the same `config.toml` as everything else
/// in the daemon: the `[log]` table picks the level, json vs pretty
/// output and an optional daily-rotated log file. `RUST_LOG` still wins
/// for filter directives when set.
///
/// Decode and mint paths log txids and script hex constantly; the field
/// helpers below shorten them so a multi-hop walk does not fill the log
/// with 64-char hashes.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub level: String,
    pub format: LogFormat,
    /// Daily-rotated log file; console only when unset.
    pub file: Option<PathBuf>,
}

impl TelemetryConfig {
    /// Read the `[log]` table; anything missing falls back to pretty
    /// console output at info.
    pub fn from_config(config: &Config) -> Self {
        let level = config
            .get_string("log.level")
            .unwrap_or_else(|_| "info".to_string());
        let format = match config.get_string("log.format").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        let file = config.get_string("log.file").ok().map(PathBuf::from);
        Self { level, format, file }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Install the tracing subscriber. Returns the file writer's guard when
/// a log file is configured; the caller holds it for the process
/// lifetime or buffered lines are lost on exit.
pub fn init_tracing(config: TelemetryConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    if let Some(file) = config.file {
        let directory = match file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = file
            .file_name()
            .ok_or("log.file has no file name")?
            .to_os_string();
        let (writer, guard) = tracing_appender::non_blocking(rolling::daily(directory, prefix));
        match config.format {
            LogFormat::Json => registry.with(fmt::layer().json().with_writer(writer)).init(),
            LogFormat::Pretty => registry
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init(),
        }
        Ok(Some(guard))
    } else {
        match config.format {
            LogFormat::Json => registry.with(fmt::layer().json()).init(),
            LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).init(),
        }
        Ok(None)
    }
}

/// Enough of a txid to grep for.
const TXID_KEEP: usize = 16;
/// Script and payload hex can be huge; keep a prefix worth reading.
const SCRIPT_KEEP: usize = 64;

/// Txid shortened for a structured log field.
pub fn txid_field(txid: &str) -> String {
    shorten(txid, TXID_KEEP)
}

/// Script or payload hex shortened for a structured log field.
pub fn script_field(hex: &str) -> String {
    shorten(hex, SCRIPT_KEEP)
}

fn shorten(s: &str, keep: usize) -> String {
    if s.len() <= keep {
        s.to_string()
    } else {
        format!("{}..", &s[..keep])
    }
}
