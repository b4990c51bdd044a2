//! Synchronization progress reporting.
//!
//! Reports observable progress during `scenesync sync` so users see how many
//! scenes are dirty, how far embedding and upserting have got, and how the
//! pass ended. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

/// A single progress event for a synchronization pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// Dirty rows fetched from the record store.
    Fetched { dirty: u64 },
    /// n of total digests embedded.
    Embedding { n: u64, total: u64 },
    /// n of total vectors acknowledged by the index.
    Upserting { n: u64, total: u64 },
    /// The pass finished.
    Done { synchronized: u64, failed: u64 },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the synchronizer.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync  embedding  120 / 1,500 scenes".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Fetched { dirty } => {
                format!("sync  fetched  {} dirty scenes\n", format_number(*dirty))
            }
            SyncProgressEvent::Embedding { n, total } => format!(
                "sync  embedding  {} / {} scenes\n",
                format_number(*n),
                format_number(*total)
            ),
            SyncProgressEvent::Upserting { n, total } => format!(
                "sync  upserting  {} / {} vectors\n",
                format_number(*n),
                format_number(*total)
            ),
            SyncProgressEvent::Done {
                synchronized,
                failed,
            } => format!(
                "sync  done  {} synchronized, {} failed\n",
                format_number(*synchronized),
                format_number(*failed)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Fetched { dirty } => serde_json::json!({
                "event": "progress",
                "phase": "fetched",
                "dirty": dirty
            }),
            SyncProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            SyncProgressEvent::Upserting { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "upserting",
                "n": n,
                "total": total
            }),
            SyncProgressEvent::Done {
                synchronized,
                failed,
            } => serde_json::json!({
                "event": "done",
                "synchronized": synchronized,
                "failed": failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
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

    /// Parse `off`, `human`, or `json`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" | "none" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
