//! Journaled file store
//!
//! One JSON object per line, appended and synced before the in-memory view
//! changes. Opening a store replays the journal; purging rewrites it with
//! only the surviving records. A failed append is cut back off the file, so
//! a later append never lands behind a torn fragment.
//!
//! ```text
//! {"op":"put","record":{"request_id":"r1","status":"PENDING",...}}
//! {"op":"put","record":{"request_id":"r1","status":"COMMITTED",...}}
//! ```

use crate::error::{Result, StoreError};
use crate::record::{IdempotencyRecord, RecordStatus};
use crate::{chrono_duration, IdempotencyStore, DEFAULT_RETENTION};
use chrono::Utc;
use mutgate_request::{Fingerprint, Outcome, RequestId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    Put { record: IdempotencyRecord },
}

#[derive(Debug)]
struct Journal {
    records: HashMap<RequestId, IdempotencyRecord>,
    file: File,
    /// Set when a failed append could not be cut back off the file
    poisoned: bool,
    #[cfg(test)]
    torn_write: Option<usize>,
}

impl Journal {
    fn new(records: HashMap<RequestId, IdempotencyRecord>, file: File) -> Self {
        Self {
            records,
            file,
            poisoned: false,
            #[cfg(test)]
            torn_write: None,
        }
    }

    fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        if self.poisoned {
            return Err(StoreError::Unavailable(
                "journal left inconsistent by an earlier failed write".into(),
            ));
        }
        let mut line = serde_json::to_vec(entry)
            .map_err(|e| StoreError::Unavailable(format!("encode journal entry: {e}")))?;
        line.push(b'\n');

        let start = self.file.metadata()?.len();
        if let Err(e) = self.write_line(&line) {
            match self.file.set_len(start).and_then(|()| self.file.sync_data()) {
                Ok(()) => tracing::warn!(error = %e, "journal append failed; partial line removed"),
                Err(cut) => {
                    self.poisoned = true;
                    tracing::error!(
                        error = %e,
                        truncate_error = %cut,
                        "journal append failed and could not be undone"
                    );
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        {
            if let Some(written) = self.torn_write.take() {
                self.file.write_all(&line[..written.min(line.len())])?;
                return Err(io::Error::other("injected torn write"));
            }
        }
        self.file.write_all(line)?;
        self.file.sync_data()
    }

    fn put(&mut self, record: IdempotencyRecord) -> Result<()> {
        let entry = JournalEntry::Put { record };
        self.append(&entry)?;
        let JournalEntry::Put { record } = entry;
        self.records.insert(record.request_id.clone(), record);
        Ok(())
    }
}

/// Idempotency store persisted to an append-only journal file
///
/// Exactly-once holds across process restarts: a `Pending` record written
/// before a crash is still `Pending` when the journal is reopened.
#[derive(Debug)]
pub struct FileIdempotencyStore {
    path: PathBuf,
    retention: chrono::Duration,
    journal: Mutex<Journal>,
}

impl FileIdempotencyStore {
    /// Open (or create) the journal at `path` with [`DEFAULT_RETENTION`]
    ///
    /// # Errors
    /// See [`open_with_retention`](Self::open_with_retention)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_retention(path, DEFAULT_RETENTION)
    }

    /// Open (or create) the journal at `path`, replaying existing entries
    ///
    /// A torn final line (crash mid-append) is discarded and the journal
    /// rewritten.
    ///
    /// # Errors
    /// - `StoreError::Unavailable` if the file cannot be opened or read
    /// - `StoreError::Corrupt` if a line other than the last fails to parse
    pub fn open_with_retention(path: impl AsRef<Path>, retention: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let (records, torn) = if path.exists() {
            replay(&path)?
        } else {
            (HashMap::new(), false)
        };

        if torn {
            tracing::warn!(path = %path.display(), "discarding torn journal tail");
            rewrite(&path, records.values())?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), records = records.len(), "opened idempotency journal");

        Ok(Self {
            path,
            retention: chrono_duration(retention),
            journal: Mutex::new(Journal::new(records, file)),
        })
    }

    /// Journal location
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn close(
        &self,
        request_id: &RequestId,
        status: RecordStatus,
        outcome: Outcome,
    ) -> Result<IdempotencyRecord> {
        let mut journal = self.journal.lock();
        let mut record = journal
            .records
            .get(request_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(request_id.clone()))?;

        if record.status != RecordStatus::Pending {
            return Err(StoreError::NotPending {
                request_id: request_id.clone(),
                status: record.status,
            });
        }

        record.close(status, outcome, Utc::now(), self.retention);
        journal.put(record.clone())?;
        Ok(record)
    }
}

impl IdempotencyStore for FileIdempotencyStore {
    fn lookup(&self, request_id: &RequestId) -> Result<Option<IdempotencyRecord>> {
        Ok(self.journal.lock().records.get(request_id).cloned())
    }

    fn begin_pending(&self, request_id: &RequestId, fingerprint: Fingerprint) -> Result<bool> {
        let now = Utc::now();
        let mut journal = self.journal.lock();

        if let Some(existing) = journal.records.get(request_id) {
            if !existing.is_expired(now) {
                return Ok(false);
            }
        }

        let record = IdempotencyRecord::pending(request_id.clone(), fingerprint, now, self.retention);
        journal.put(record)?;
        Ok(true)
    }

    fn complete(&self, request_id: &RequestId, outcome: Outcome) -> Result<IdempotencyRecord> {
        let status = RecordStatus::for_outcome(&outcome);
        self.close(request_id, status, outcome)
    }

    fn roll_back(&self, request_id: &RequestId, outcome: Outcome) -> Result<IdempotencyRecord> {
        self.close(request_id, RecordStatus::RolledBack, outcome)
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut journal = self.journal.lock();

        let survivors: HashMap<RequestId, IdempotencyRecord> = journal
            .records
            .iter()
            .filter(|(_, r)| !r.is_expired(now))
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        let purged = journal.records.len() - survivors.len();
        if purged == 0 {
            return Ok(0);
        }

        rewrite(&self.path, survivors.values())?;
        journal.file = OpenOptions::new().append(true).open(&self.path)?;
        journal.records = survivors;
        Ok(purged)
    }

    fn stale_pending(&self, older_than: Duration) -> Result<Vec<IdempotencyRecord>> {
        let cutoff = Utc::now() - chrono_duration(older_than);
        Ok(self
            .journal
            .lock()
            .records
            .values()
            .filter(|r| r.is_stale_pending(cutoff))
            .cloned()
            .collect())
    }

    fn records(&self) -> Result<Vec<IdempotencyRecord>> {
        Ok(self.journal.lock().records.values().cloned().collect())
    }
}

/// Replay the journal; the flag reports a discarded torn tail
fn replay(path: &Path) -> Result<(HashMap<RequestId, IdempotencyRecord>, bool)> {
    let reader = BufReader::new(File::open(path)?);
    let lines: Vec<String> = reader.lines().collect::<std::io::Result<_>>()?;
    let last = lines.iter().rposition(|l| !l.trim().is_empty());

    let mut records = HashMap::new();
    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(line) {
            Ok(JournalEntry::Put { record }) => {
                records.insert(record.request_id.clone(), record);
            }
            Err(_) if Some(idx) == last => return Ok((records, true)),
            Err(e) => {
                return Err(StoreError::Corrupt {
                    line: idx + 1,
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok((records, false))
}

/// Atomically replace the journal with one `put` per record
fn rewrite<'a>(path: &Path, records: impl Iterator<Item = &'a IdempotencyRecord>) -> Result<()> {
    let tmp = path.with_extension("compact");
    {
        let mut file = File::create(&tmp)?;
        for record in records {
            let entry = JournalEntry::Put {
                record: record.clone(),
            };
            let mut line = serde_json::to_vec(&entry)
                .map_err(|e| StoreError::Unavailable(format!("encode journal entry: {e}")))?;
            line.push(b'\n');
            file.write_all(&line)?;
        }
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
