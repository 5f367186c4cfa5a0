//! Replayable per-domain action log.
//!
//! Every domain owns one logger writing under
//! `<base>/<data_base_id>/<domain_id>/`: a `header.json` with the domain's
//! identity, a `source.json` snapshot of the data at creation, and two
//! JSON-lines files. `posted.jsonl` records actions as they are accepted,
//! `completed.jsonl` records their ids once applied; an id posted but never
//! completed marks an action interrupted by a crash. Writes go through the
//! logger's own dispatcher so the files see one writer.

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::domain::source::SourceSnapshot;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tabularium_model::{DomainAction, DomainInfo};

const HEADER_FILE: &str = "header.json";
const SOURCE_FILE: &str = "source.json";
const POSTED_FILE: &str = "posted.jsonl";
const COMPLETED_FILE: &str = "completed.jsonl";

/// One accepted action with its completion id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostedEntry {
    /// Monotonic completion id.
    pub id: u64,
    /// The action.
    pub action: DomainAction,
}

#[derive(Debug, Serialize, Deserialize)]
struct CompletedEntry {
    id: u64,
}

struct LogFiles {
    posted: File,
    completed: File,
}

/// Append-only writer for one domain's action log.
pub struct DomainLogger {
    dispatcher: Arc<Dispatcher>,
    dir: PathBuf,
    next_id: AtomicU64,
    files: Arc<Mutex<LogFiles>>,
}

fn append_line<T: Serialize>(file: &mut File, entry: &T) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');
    file.write_all(&line)
}

impl DomainLogger {
    /// Create the log directory for a fresh domain and write its header and
    /// source snapshot.
    pub fn new(base_path: &Path, info: &DomainInfo, snapshot: &SourceSnapshot) -> Result<Self> {
        let dir = base_path
            .join(info.data_base_id.to_string())
            .join(info.domain_id.to_string());
        std::fs::create_dir_all(&dir)?;
        serde_json::to_writer_pretty(File::create(dir.join(HEADER_FILE))?, info)?;
        serde_json::to_writer_pretty(File::create(dir.join(SOURCE_FILE))?, snapshot)?;
        Self::open(dir, 0)
    }

    /// Reopen the log of a restored domain, continuing after its last
    /// posted id.
    pub fn resume(base_path: &Path, info: &DomainInfo) -> Result<(Self, LoggerRecovery)> {
        let dir = base_path
            .join(info.data_base_id.to_string())
            .join(info.domain_id.to_string());
        let recovery = LoggerRecovery::load(&dir)?;
        let next_id = recovery.posted.iter().map(|e| e.id + 1).max().unwrap_or(0);
        let logger = Self::open(dir, next_id)?;
        Ok((logger, recovery))
    }

    fn open(dir: PathBuf, next_id: u64) -> Result<Self> {
        let open = |name: &str| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(name))
        };
        let files = LogFiles {
            posted: open(POSTED_FILE)?,
            completed: open(COMPLETED_FILE)?,
        };
        Ok(Self {
            dispatcher: Dispatcher::new(format!("domain-log:{}", dir.display())),
            dir,
            next_id: AtomicU64::new(next_id),
            files: Arc::new(Mutex::new(files)),
        })
    }

    /// Directory the log lives in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record an accepted action, returning its completion id.
    ///
    /// Ids are strictly increasing in post order. The write itself is
    /// queued; a failed append is logged and does not fail the mutation.
    pub fn post(&self, action: DomainAction) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let files = Arc::clone(&self.files);
        let entry = PostedEntry { id, action };
        self.dispatcher.post(move || {
            if let Err(e) = append_line(&mut files.lock().posted, &entry) {
                tracing::error!(id = entry.id, error = %e, "failed to append posted entry");
            }
        })?;
        Ok(id)
    }

    /// Mark a posted action as applied.
    pub fn complete(&self, id: u64) -> Result<()> {
        let files = Arc::clone(&self.files);
        self.dispatcher.post(move || {
            if let Err(e) = append_line(&mut files.lock().completed, &CompletedEntry { id }) {
                tracing::error!(id, error = %e, "failed to append completed entry");
            }
        })
    }

    /// Wait for all queued appends to reach the files.
    pub async fn flush(&self) -> Result<()> {
        let files = Arc::clone(&self.files);
        self.dispatcher
            .invoke(move || {
                let mut files = files.lock();
                files.posted.flush()?;
                files.completed.flush()
            })
            .await??;
        Ok(())
    }

    /// Stop the logger; with `delete` the log directory is removed (a
    /// canceled edit session leaves no trace).
    pub async fn dispose(&self, delete: bool) -> Result<()> {
        self.flush().await?;
        self.dispatcher.dispose();
        if delete {
            std::fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DomainLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainLogger")
            .field("dir", &self.dir)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

/// Everything read back from one domain's log directory.
#[derive(Debug, Clone)]
pub struct LoggerRecovery {
    /// The domain's identity.
    pub domain_info: DomainInfo,
    /// Data snapshot at domain creation.
    pub snapshot: SourceSnapshot,
    /// All posted actions in id order.
    pub posted: Vec<PostedEntry>,
    /// Ids recorded as applied.
    pub completed: Vec<u64>,
}

fn read_lines<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            // A torn trailing line from a crash mid-append.
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping malformed log line");
            }
        }
    }
    Ok(entries)
}

impl LoggerRecovery {
    /// Read one domain's log directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let domain_info = serde_json::from_reader(File::open(dir.join(HEADER_FILE))?)?;
        let snapshot = serde_json::from_reader(File::open(dir.join(SOURCE_FILE))?)?;
        let mut posted: Vec<PostedEntry> = read_lines(&dir.join(POSTED_FILE))?;
        posted.sort_by_key(|e| e.id);
        let completed = read_lines::<CompletedEntry>(&dir.join(COMPLETED_FILE))?
            .into_iter()
            .map(|e| e.id)
            .collect();
        Ok(Self {
            domain_info,
            snapshot,
            posted,
            completed,
        })
    }

    /// Scan a log root for every domain directory it holds.
    pub fn scan(base_path: &Path) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        if !base_path.exists() {
            return Ok(dirs);
        }
        for data_base in std::fs::read_dir(base_path)? {
            let data_base = data_base?.path();
            if !data_base.is_dir() {
                continue;
            }
            for domain in std::fs::read_dir(&data_base)? {
                let domain = domain?.path();
                if domain.is_dir() && domain.join(HEADER_FILE).exists() {
                    dirs.push(domain);
                }
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Actions posted but never completed (interrupted by a crash).
    pub fn unfinished(&self) -> Vec<&PostedEntry> {
        self.posted
            .iter()
            .filter(|e| !self.completed.contains(&e.id))
            .collect()
    }
}
