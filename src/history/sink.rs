// src/history/sink.rs

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context as _;

use super::record::TransitionRecord;

/// Destination for transition records.
///
/// The engine logs and otherwise ignores sink errors: losing history must
/// never change how a DAG runs.
pub trait HistorySink: Send + fmt::Debug {
    fn record(&mut self, record: &TransitionRecord) -> anyhow::Result<()>;

    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHistory;

impl HistorySink for NoopHistory {
    fn record(&mut self, _record: &TransitionRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps records in memory. Clones share the same buffer, so a test can
/// hand one clone to the engine and inspect the other.
#[derive(Debug, Default, Clone)]
pub struct MemoryHistory {
    records: Arc<Mutex<Vec<TransitionRecord>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TransitionRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistorySink for MemoryHistory {
    fn record(&mut self, record: &TransitionRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("history buffer poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
pub struct JsonLinesHistory {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl fmt::Debug for JsonLinesHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesHistory")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl JsonLinesHistory {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening history file {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistorySink for JsonLinesHistory {
    fn record(&mut self, record: &TransitionRecord) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        // Each record is durable on its own so a crash loses at most the
        // transition in flight.
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
