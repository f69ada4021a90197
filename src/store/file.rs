// src/store/file.rs

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::{DagflowError, Result};
use crate::store::ResultStore;
use crate::store::memory::MemoryResultStore;
use crate::types::{RunId, TaskId};

/// Relative path (from the store root) to the result log.
///
/// The effective path on disk is `<root>/.dagflow/results.log`.
pub const RESULT_LOG_PATH: &str = ".dagflow/results.log";

/// One line of the result log.
///
/// `value` holds the JSON text of the result exactly as it was hashed, so a
/// replay checks the same bytes that were written.
#[derive(Debug, Serialize, Deserialize)]
struct LogRecord {
    run_id: RunId,
    task: TaskId,
    value: String,
    /// blake3 over `run_id`, `task` and `value`.
    checksum: String,
}

fn record_checksum(run_id: RunId, task: &str, encoded: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&run_id.to_le_bytes());
    hasher.update(task.as_bytes());
    hasher.update(&[0]);
    hasher.update(encoded.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// What a replay found in an existing log.
struct Replay {
    recovered: usize,
    /// Length of the log up to the last newline-terminated line.
    complete_len: u64,
    /// The log ends in a partial line.
    torn_tail: bool,
}

/// Append-only, checksummed result log with an in-memory index.
///
/// Every `put` is appended and synced before it becomes visible to `get`.
/// On open, the log is replayed; records that fail to parse or whose
/// checksum does not match are skipped. A partial last line (a write torn
/// by a crash) is cut off before the log is reopened for appending.
#[derive(Debug)]
pub struct FileResultStore {
    path: PathBuf,
    index: MemoryResultStore,
    writer: Mutex<File>,
}

impl FileResultStore {
    /// Open (or create) the log under `<root>/.dagflow/results.log`.
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_path(root.join(RESULT_LOG_PATH))
    }

    /// Open (or create) a log at an explicit path.
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating result log directory at {:?}", parent))?;
            }
        }

        let index = MemoryResultStore::new();
        let replay = replay(&path, &index)?;

        if replay.torn_tail {
            // Drop the partial line so the next append starts a fresh record.
            warn!(path = ?path, len = replay.complete_len, "truncating torn result log tail");
            let file = OpenOptions::new()
                .write(true)
                .open(&path)
                .with_context(|| format!("opening result log at {:?}", path))?;
            file.set_len(replay.complete_len)?;
            file.sync_data()?;
        }

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening result log at {:?}", path))?;

        info!(path = ?path, replayed = replay.recovered, "opened result log");

        Ok(Self {
            path,
            index,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Load every valid record from `path` into `index`.
///
/// Lines are read as raw bytes so garbage in the log never aborts the open.
fn replay(path: &Path, index: &MemoryResultStore) -> Result<Replay> {
    let mut replay = Replay {
        recovered: 0,
        complete_len: 0,
        torn_tail: false,
    };
    if !path.exists() {
        return Ok(replay);
    }

    let file = File::open(path).with_context(|| format!("opening result log at {:?}", path))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut lineno = 0;

    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        lineno += 1;

        if buf.last() != Some(&b'\n') {
            warn!(line = lineno, "skipping torn result log record");
            replay.torn_tail = true;
            break;
        }
        replay.complete_len += read as u64;

        let line = String::from_utf8_lossy(&buf);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: LogRecord = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                warn!(line = lineno, error = %e, "skipping unreadable result log record");
                continue;
            }
        };

        if record_checksum(record.run_id, &record.task, &record.value) != record.checksum {
            warn!(
                line = lineno,
                task = %record.task,
                run_id = record.run_id,
                "skipping result log record with bad checksum"
            );
            continue;
        }

        let value: Value = match serde_json::from_str(&record.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(line = lineno, error = %e, "skipping result log record with bad value");
                continue;
            }
        };

        index.insert_recovered(record.run_id, record.task, value)?;
        replay.recovered += 1;
    }

    Ok(replay)
}

impl ResultStore for FileResultStore {
    fn put(&self, run_id: RunId, task: &str, value: Value) -> Result<()> {
        // Holding the writer lock serialises the duplicate check, the append
        // and the index update.
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| DagflowError::Other(anyhow::anyhow!("result log lock poisoned")))?;

        if self.index.get(run_id, task).is_ok() {
            return Err(DagflowError::DuplicateResult {
                run_id,
                task: task.to_string(),
            });
        }

        let encoded = serde_json::to_string(&value)?;
        let record = LogRecord {
            run_id,
            task: task.to_string(),
            checksum: record_checksum(run_id, task, &encoded),
            value: encoded,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        writer.sync_data()?;

        self.index.put(run_id, task, value)?;
        debug!(task = %task, run_id, "stored task result (file)");
        Ok(())
    }

    fn get(&self, run_id: RunId, task: &str) -> Result<Value> {
        self.index.get(run_id, task)
    }

    fn run_results(&self, run_id: RunId) -> Result<BTreeMap<TaskId, Value>> {
        self.index.run_results(run_id)
    }

    fn max_run_id(&self) -> Result<Option<RunId>> {
        self.index.max_run_id()
    }
}
