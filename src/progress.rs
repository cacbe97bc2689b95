//! Ingest progress reporting.
//!
//! The ingest pipeline emits [`IngestEvent`]s as it walks the device mapping.
//! The background job turns them into its pollable progress log; the CLI
//! prints them on **stderr** so stdout stays parseable for scripts.

use std::io::Write;
use std::path::PathBuf;

/// A single progress event for ingest.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestEvent {
    /// The embedding provider is being initialized.
    WarmingUp,
    /// The embedding provider is ready.
    WarmedUp,
    /// Work on a device has started.
    Device { device_id: String },
    /// The mapped manual does not exist.
    Missing { device_id: String, path: PathBuf },
    /// An index already exists; nothing to do.
    Cached { device_id: String },
    /// Text was chunked and is being embedded.
    Embedding { device_id: String, chunks: usize },
    /// The index was written.
    Done { device_id: String, chunks: usize },
}

impl IngestEvent {
    /// Human-readable progress line.
    pub fn message(&self) -> String {
        match self {
            IngestEvent::WarmingUp => "Warming up embedder…".to_string(),
            IngestEvent::WarmedUp => "Embedder ready.".to_string(),
            IngestEvent::Device { device_id } => format!("Processing {}…", device_id),
            IngestEvent::Missing { path, .. } => format!("  → missing: {}", path.display()),
            IngestEvent::Cached { .. } => "  → cached".to_string(),
            IngestEvent::Embedding { chunks, .. } => format!("  → {} chunks, embedding…", chunks),
            IngestEvent::Done { .. } => "  → done".to_string(),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            IngestEvent::WarmingUp => serde_json::json!({ "event": "warming_up" }),
            IngestEvent::WarmedUp => serde_json::json!({ "event": "warmed_up" }),
            IngestEvent::Device { device_id } => {
                serde_json::json!({ "event": "device", "device": device_id })
            }
            IngestEvent::Missing { device_id, path } => serde_json::json!({
                "event": "missing",
                "device": device_id,
                "path": path.display().to_string()
            }),
            IngestEvent::Cached { device_id } => {
                serde_json::json!({ "event": "cached", "device": device_id })
            }
            IngestEvent::Embedding { device_id, chunks } => serde_json::json!({
                "event": "embedding",
                "device": device_id,
                "chunks": chunks
            }),
            IngestEvent::Done { device_id, chunks } => serde_json::json!({
                "event": "done",
                "device": device_id,
                "chunks": chunks
            }),
        }
    }
}

/// Receives ingest progress. Called from the ingest pipeline.
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestEvent);
}

/// Human-friendly progress on stderr.
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestEvent) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", event.message());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestEvent) {
        if let Ok(line) = serde_json::to_string(&event.to_json()) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
