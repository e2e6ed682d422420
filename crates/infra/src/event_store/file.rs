//! Durable JSON-lines event log.
//!
//! One record per line:
//!
//! ```text
//! {"position":1,"event_id":"…","recorded_at":"…","event_type":"Deposited","stream":"acc-1","payload":{…}}
//! ```
//!
//! Lines are written and flushed one append at a time; a failed append truncates the file back to
//! its last complete line. Reading decodes every payload through an
//! [`EventTypeRegistry`], so each stored type name must be registered before `read_all`.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use encore_core::EventId;
use encore_events::{EventStore, EventTypeRegistry, SharedEvent, StoreError, StoredRecord};

#[derive(Debug, Serialize, Deserialize)]
struct LogLine {
    position: u64,
    event_id: EventId,
    recorded_at: DateTime<Utc>,
    event_type: String,
    stream: String,
    payload: JsonValue,
}

#[derive(Debug)]
struct Writer {
    file: File,
    last_position: u64,
    /// File length after the last complete line.
    committed_len: u64,
}

impl Writer {
    /// Write one full line, or leave the file exactly as it was.
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        let written = self
            .file
            .write_all(line)
            .and_then(|()| self.file.flush());
        if let Err(err) = written {
            warn!(error = %err, "event log write failed; discarding partial line");
            self.rollback()?;
            return Err(err);
        }
        self.committed_len += line.len() as u64;
        Ok(())
    }

    fn rollback(&mut self) -> io::Result<()> {
        self.file.set_len(self.committed_len)
    }
}

/// Append-only event log backed by a single file.
#[derive(Debug)]
pub struct FileEventStore {
    path: PathBuf,
    registry: EventTypeRegistry,
    writer: Mutex<Writer>,
}

impl FileEventStore {
    /// Open (or create) the log at `path`, continuing after its last recorded position.
    pub fn open(path: impl AsRef<Path>, registry: EventTypeRegistry) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let committed_len = file.metadata()?.len();

        let mut last_position = 0;
        for (line, entry) in read_lines(&path)? {
            if entry.position != last_position + 1 {
                return Err(StoreError::Corrupt {
                    line,
                    reason: format!(
                        "expected position {}, found {}",
                        last_position + 1,
                        entry.position
                    ),
                });
            }
            last_position = entry.position;
        }

        debug!(path = %path.display(), last_position, "file event log opened");

        Ok(Self {
            path,
            registry,
            writer: Mutex::new(Writer {
                file,
                last_position,
                committed_len,
            }),
        })
    }
}

impl EventStore for FileEventStore {
    fn append(&self, event: SharedEvent) -> Result<StoredRecord, StoreError> {
        let event_type = event.event_type().name();
        let payload = event.to_json().map_err(|e| StoreError::Serialization {
            event_type: event_type.to_string(),
            reason: e.to_string(),
        })?;

        let mut writer = self.writer.lock().map_err(|_| StoreError::LockPoisoned)?;

        let entry = LogLine {
            position: writer.last_position + 1,
            event_id: EventId::new(),
            recorded_at: Utc::now(),
            event_type: event_type.to_string(),
            stream: event.stream_id().to_string(),
            payload,
        };
        let mut line = serde_json::to_vec(&entry).map_err(|e| StoreError::Serialization {
            event_type: event_type.to_string(),
            reason: e.to_string(),
        })?;
        line.push(b'\n');

        writer.write_line(&line)?;
        writer.last_position = entry.position;

        Ok(StoredRecord {
            position: entry.position,
            event_id: entry.event_id,
            recorded_at: entry.recorded_at,
            event,
        })
    }

    fn read_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        // Hold the writer so the snapshot never sees a half-written line.
        let _writer = self.writer.lock().map_err(|_| StoreError::LockPoisoned)?;

        read_lines(&self.path)?
            .into_iter()
            .map(|(_, entry)| {
                let event = self.registry.decode(&entry.event_type, entry.payload)?;
                Ok(StoredRecord {
                    position: entry.position,
                    event_id: entry.event_id,
                    recorded_at: entry.recorded_at,
                    event,
                })
            })
            .collect()
    }

    fn len(&self) -> Result<u64, StoreError> {
        let writer = self.writer.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(writer.last_position)
    }
}

/// Parse every non-blank line, tagged with its 1-based line number.
fn read_lines(path: &Path) -> Result<Vec<(usize, LogLine)>, StoreError> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: LogLine = serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
            line: idx + 1,
            reason: e.to_string(),
        })?;
        entries.push((idx + 1, entry));
    }

    Ok(entries)
}
