//! Index and query progress reporting.
//!
//! Reports observable progress during `chx index` and while a question is
//! being answered, so users see what is being scanned and how much is left.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use code_harness_core::retrieve::{QueryObserver, QueryStatus};

/// A single progress event for indexing.
#[derive(Clone, Debug)]
pub enum IndexProgressEvent {
    /// Walking the source tree. Total unknown.
    Scanning { root: String },
    /// Structural files parsed so far.
    Parsing { n: u64, total: u64 },
    /// Units produced by the chunker.
    Chunked { units: u64, files: u64 },
    /// Units embedded so far.
    Embedding { n: u64, total: u64 },
    /// Units written to the store.
    Stored { units: u64 },
}

/// Reports index progress and query status. Implementations write to
/// stderr (human or JSON).
pub trait ProgressReporter: QueryObserver {
    fn report(&self, event: IndexProgressEvent);
}

fn status_label(status: QueryStatus) -> &'static str {
    match status {
        QueryStatus::Analyzing => "analyzing",
        QueryStatus::Searching => "searching",
        QueryStatus::Embedding => "embedding",
        QueryStatus::Generating => "generating",
        QueryStatus::Done => "done",
    }
}

/// Human-friendly progress on stderr: "index  parsing  1,234 / 5,000 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Scanning { root } => format!("index {}  scanning...\n", root),
            IndexProgressEvent::Parsing { n, total } => format!(
                "index  parsing  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Chunked { units, files } => format!(
                "index  chunked  {} units from {} files\n",
                format_number(*units),
                format_number(*files)
            ),
            IndexProgressEvent::Embedding { n, total } => format!(
                "index  embedding  {} / {} units\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Stored { units } => {
                format!("index  stored  {} units\n", format_number(*units))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

impl QueryObserver for StderrProgress {
    fn on_status(&self, status: QueryStatus) {
        if status == QueryStatus::Done {
            return;
        }
        let _ = writeln!(std::io::stderr().lock(), "{}...", status_label(status));
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Scanning { root } => serde_json::json!({
                "event": "progress",
                "phase": "scanning",
                "root": root
            }),
            IndexProgressEvent::Parsing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "parsing",
                "n": n,
                "total": total
            }),
            IndexProgressEvent::Chunked { units, files } => serde_json::json!({
                "event": "progress",
                "phase": "chunked",
                "units": units,
                "files": files
            }),
            IndexProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            IndexProgressEvent::Stored { units } => serde_json::json!({
                "event": "progress",
                "phase": "stored",
                "units": units
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

impl QueryObserver for JsonProgress {
    fn on_status(&self, status: QueryStatus) {
        let obj = serde_json::json!({"event": "status", "status": status_label(status)});
        let _ = writeln!(std::io::stderr().lock(), "{}", obj);
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

impl QueryObserver for NoProgress {
    fn on_status(&self, _status: QueryStatus) {}
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
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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

    pub fn reporter(&self) -> std::sync::Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => std::sync::Arc::new(NoProgress),
            ProgressMode::Human => std::sync::Arc::new(StderrProgress),
            ProgressMode::Json => std::sync::Arc::new(JsonProgress),
        }
    }

    /// Query status sink for [`code_harness_core::retrieve::Retriever`].
    pub fn observer(&self) -> std::sync::Arc<dyn QueryObserver> {
        match self {
            ProgressMode::Off => std::sync::Arc::new(NoProgress),
            ProgressMode::Human => std::sync::Arc::new(StderrProgress),
            ProgressMode::Json => std::sync::Arc::new(JsonProgress),
        }
    }
}
