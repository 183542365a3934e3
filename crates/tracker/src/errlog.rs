use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Local;
use tracing::warn;

/// Append-only failure log, one line per recoverable failure:
/// `<context>: <timestamp>: <message>`. Write problems degrade to a tracing
/// warning; the loop never dies over its own diagnostics.
pub(crate) struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn append(&self, context: &str, message: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("{context}: {stamp}: {message}\n");
        if let Err(err) = self.append_line(&line) {
            warn!(path = %self.path.display(), %err, "could not append to error log");
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
