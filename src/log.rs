use crate::error::StorageError;
use crate::event::{DraftEvent, Event};
use ::log::warn;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Lines, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOG_FILE: &str = "events.jsonl";
const STATE_DIR: &str = "state";

/// Compute xxh64 hash of raw line bytes (without trailing newline), hex-encoded.
pub fn line_hash(line: &[u8]) -> String {
    let hash = xxhash_rust::xxh64::xxh64(line, 0);
    format!("{hash:016x}")
}

/// The append-only durable event log. Holds the single-writer lock.
///
/// Events are committed as JSON lines to `events.jsonl`, one fsync per
/// append. `append` is the durability boundary of the whole system: a caller
/// observing `Ok` may assume the event survives a crash immediately after the
/// call returns. Sequence numbers are assigned here and nowhere else —
/// gapless, starting at 1, never reused.
///
/// Concurrent readers use [`LogReader`] handles, which open their own file
/// descriptors and never contend with the writer.
pub struct EventLog {
    dir: PathBuf,
    log_path: PathBuf,
    state_dir: PathBuf,
    file: File,
    next_sequence: u64,
}

impl EventLog {
    /// Open or create an event log in the given directory.
    ///
    /// Creates the directory and its `state/` subdirectory if they don't
    /// exist, opens `events.jsonl` in append mode, and takes an exclusive
    /// advisory lock on it. A second writer on the same directory fails with
    /// [`io::ErrorKind::AlreadyExists`]; the lock is released on drop.
    ///
    /// On reopen, the highest committed sequence is recovered by scanning the
    /// log, so numbering continues where the previous process stopped. A
    /// trailing partial line (crash mid-write) is ignored.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        let state_dir = dir.join(STATE_DIR);
        let log_path = dir.join(LOG_FILE);

        fs::create_dir_all(&state_dir)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(StorageError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!(
                        "another writer holds the lock on {}",
                        log_path.display()
                    ),
                )));
            }
            return Err(e.into());
        }

        let mut latest = 0u64;
        let mut scan = Replay::open(&log_path, 1)?;
        for result in scan.by_ref() {
            latest = result?.sequence;
        }

        // A crash mid-append can leave a partial line at EOF. We hold the
        // writer lock, so truncate it away rather than letting the next
        // append glue new bytes onto garbage.
        let valid_len = scan.consumed();
        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            warn!(
                "discarding {} bytes of partial trailing record in {}",
                file_len - valid_len,
                log_path.display()
            );
            file.set_len(valid_len)?;
        }

        Ok(EventLog {
            dir,
            log_path,
            state_dir,
            file,
            next_sequence: latest + 1,
        })
    }

    /// Commit a draft event, assigning the next sequence number.
    ///
    /// Serializes the event as a single JSON line, appends it, and syncs to
    /// disk before returning. On failure the file is truncated back to its
    /// pre-append length and the sequence counter is not advanced, so a
    /// failed append is invisible to replay and to `latest_sequence`.
    pub fn append(&mut self, draft: DraftEvent) -> Result<Event, StorageError> {
        let event = draft.into_event(self.next_sequence);
        let json = serde_json::to_string(&event)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let offset = self.file.seek(SeekFrom::End(0))?;
        if let Err(e) = self.write_line(&json) {
            // Roll back any half-written bytes so the next append starts clean.
            let _ = self.file.set_len(offset);
            return Err(e.into());
        }

        self.next_sequence += 1;
        Ok(event)
    }

    fn write_line(&mut self, json: &str) -> io::Result<()> {
        writeln!(self.file, "{json}")?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Highest committed sequence, 0 when the log is empty.
    pub fn latest_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Lazy ordered replay of committed events with `sequence >= from`.
    ///
    /// Safe to run while appends continue: the session is bounded by the file
    /// length observed at open, yields no duplicates and no gaps, and a
    /// `from` beyond [`latest_sequence`](Self::latest_sequence) yields an
    /// empty sequence rather than an error.
    pub fn replay(&self, from: u64) -> Result<Replay, StorageError> {
        Replay::open(&self.log_path, from)
    }

    /// A cheap, cloneable read handle usable from other threads.
    pub fn reader(&self) -> LogReader {
        LogReader {
            log_path: self.log_path.clone(),
        }
    }

    /// Returns the path to the data directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path to the active log file.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Returns the directory reserved for projected-state snapshots.
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}

/// Read-only handle onto an event log directory.
///
/// Does not take the writer lock; any number of readers may replay
/// concurrently with a live writer.
#[derive(Clone)]
pub struct LogReader {
    log_path: PathBuf,
}

impl LogReader {
    /// Open a reader for a log directory without acquiring the writer lock.
    pub fn open(dir: impl AsRef<Path>) -> Self {
        LogReader {
            log_path: dir.as_ref().join(LOG_FILE),
        }
    }

    /// See [`EventLog::replay`].
    pub fn replay(&self, from: u64) -> Result<Replay, StorageError> {
        Replay::open(&self.log_path, from)
    }
}

/// One replay session over the log.
///
/// Iteration stops at the file length observed when the session began, so a
/// session is finite even while appends continue. A trailing line without a
/// newline is a crash artifact and is skipped. Sequence continuity is checked
/// as lines are consumed; a hole surfaces as [`StorageError::SequenceGap`].
pub struct Replay {
    lines: Option<Lines<BufReader<File>>>,
    pos: u64,
    file_len: u64,
    from: u64,
    prev: Option<u64>,
    done: bool,
}

impl Replay {
    fn open(log_path: &Path, from: u64) -> Result<Self, StorageError> {
        let file = match File::open(log_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Replay {
                    lines: None,
                    pos: 0,
                    file_len: 0,
                    from,
                    prev: None,
                    done: true,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let file_len = file.metadata()?.len();
        Ok(Replay {
            lines: Some(BufReader::new(file).lines()),
            pos: 0,
            file_len,
            from,
            prev: None,
            done: false,
        })
    }

    /// Bytes of complete lines consumed so far, including newlines.
    pub(crate) fn consumed(&self) -> u64 {
        self.pos
    }
}

impl Iterator for Replay {
    type Item = Result<Event, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let lines = self.lines.as_mut()?;

        loop {
            let line = match lines.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };

            let line_bytes = line.len() as u64;

            // A complete line occupies its bytes plus a newline. A line whose
            // content reaches EOF has no newline: crash mid-write, skip it.
            if self.pos + line_bytes >= self.file_len {
                self.done = true;
                return None;
            }

            let line_offset = self.pos;
            self.pos += line_bytes + 1;

            if line.is_empty() {
                continue;
            }

            let event: Event = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(e) => {
                    self.done = true;
                    return Some(Err(StorageError::Corrupt {
                        offset: line_offset,
                        source: e,
                    }));
                }
            };

            if let Some(prev) = self.prev {
                if event.sequence != prev + 1 {
                    self.done = true;
                    return Some(Err(StorageError::SequenceGap {
                        expected: prev + 1,
                        found: event.sequence,
                    }));
                }
            }
            self.prev = Some(event.sequence);

            if event.sequence < self.from {
                continue;
            }
            return Some(Ok(event));
        }
    }
}
