//! Indexing progress reporting.
//!
//! Reports observable progress during `pctx index` so users see what is
//! being scanned and how much is left. Progress is emitted on **stderr**
//! so stdout remains parseable for scripts.

use std::io::Write;
use std::str::FromStr;

/// A single progress event for an indexing run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexProgressEvent {
    /// Walking the project tree. Total unknown.
    Discovering { project: String },
    /// Discovery finished.
    Discovered { files: u64, skipped: u64 },
    /// `n` of `total` files read and chunked.
    Chunking { n: u64, total: u64 },
    /// `n` of `total` chunks sent to the embedding backend.
    Embedding { n: u64, total: u64 },
    /// `n` of `total` embedded chunks written.
    Storing { n: u64, total: u64 },
    Done { stored: u64, errors: u64 },
}

/// Reports indexing progress. Implementations write to stderr (human or JSON).
pub trait IndexProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the indexing pipeline.
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index  embedding  1,200 / 5,000 chunks".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Discovering { project } => {
                format!("index {}  discovering...\n", project)
            }
            IndexProgressEvent::Discovered { files, skipped } => format!(
                "index  discovered  {} files ({} skipped)\n",
                format_number(*files),
                format_number(*skipped)
            ),
            IndexProgressEvent::Chunking { n, total } => format!(
                "index  chunking  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Embedding { n, total } => format!(
                "index  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Storing { n, total } => format!(
                "index  storing  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Done { stored, errors } => format!(
                "index  done  {} stored, {} errors\n",
                format_number(*stored),
                format_number(*errors)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &IndexProgressEvent) -> serde_json::Value {
        match event {
            IndexProgressEvent::Discovering { project } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "project": project
            }),
            IndexProgressEvent::Discovered { files, skipped } => serde_json::json!({
                "event": "progress",
                "phase": "discovered",
                "files": files,
                "skipped": skipped
            }),
            IndexProgressEvent::Chunking { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "chunking",
                "n": n,
                "total": total
            }),
            IndexProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            IndexProgressEvent::Storing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "storing",
                "n": n,
                "total": total
            }),
            IndexProgressEvent::Done { stored, errors } => serde_json::json!({
                "event": "done",
                "stored": stored,
                "errors": errors
            }),
        }
    }
}

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
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

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}': expected human, json, or off",
                other
            )),
        }
    }
}
