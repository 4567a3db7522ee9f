//! Audit sinks: where security events end up.

use super::{SecurityEvent, Severity};
use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Destination for masked security events
///
/// Sinks are only ever called with the audit log's lock held, so
/// implementations see writes one at a time.
pub trait AuditSink: Send {
    /// Emit one event
    fn write(&mut self, event: &SecurityEvent) -> Result<()>;

    /// Make everything written so far durable
    fn flush(&mut self) -> Result<()>;
}

/// In-memory sink; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<SecurityEvent>>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events in a given category
    pub fn in_category(&self, category: &str) -> Vec<SecurityEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.category == category)
            .collect()
    }
}

impl AuditSink for MemorySink {
    fn write(&mut self, event: &SecurityEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| Error::Internal("memory sink poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Emits events through `tracing` under the `sigmerge::audit` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn write(&mut self, event: &SecurityEvent) -> Result<()> {
        match event.severity {
            Severity::Info => info!(
                target: "sigmerge::audit",
                category = %event.category,
                "{}",
                event.detail
            ),
            Severity::Warning => warn!(
                target: "sigmerge::audit",
                category = %event.category,
                "{}",
                event.detail
            ),
            Severity::High => error!(
                target: "sigmerge::audit",
                category = %event.category,
                "{}",
                event.detail
            ),
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Appends one JSON object per line to a file
pub struct JsonLinesSink {
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::Config(format!("cannot open audit log {}: {e}", path.display())))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl AuditSink for JsonLinesSink {
    fn write(&mut self, event: &SecurityEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event)
            .map_err(|e| Error::Internal(format!("failed to serialize audit event: {e}")))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn event(detail: &str) -> SecurityEvent {
        SecurityEvent {
            timestamp: Utc::now(),
            severity: Severity::Warning,
            category: "test".to_string(),
            detail: detail.to_string(),
        }
    }

    #[test]
    fn json_lines_sink_writes_one_object_per_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("audit.jsonl");

        let mut sink = JsonLinesSink::open(&path).unwrap();
        sink.write(&event("first")).unwrap();
        sink.write(&event("second")).unwrap();
        sink.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["detail"], "second");
        assert_eq!(parsed["severity"], "warning");
    }

    #[test]
    fn memory_sink_clones_share_buffer() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.write(&event("shared")).unwrap();
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.in_category("test")[0].detail, "shared");
    }
}
