use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ebb_types::{EventId, MutationEvent};

use crate::error::{StoreError, StoreResult};

/// A single state transition persisted to the journal.
///
/// The journal is a log of transitions rather than snapshots: replaying
/// the records front-to-back reconstructs the live queue. `Appended`
/// carries the full event (including status, so compaction can write
/// current snapshots); the other records reference events by id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// A new event entered the queue.
    Appended(MutationEvent),
    /// The event was claimed for delivery (`Pending → InFlight`).
    Claimed(EventId),
    /// Transient delivery failure (`InFlight → Pending`, attempts + 1).
    Retried(EventId),
    /// Delivery confirmed; the event leaves the queue.
    Synced(EventId),
    /// Permanent rejection or retry exhaustion; the event is retained.
    Failed { id: EventId, reason: String },
    /// Direct removal of a still-pending event by explicit user action.
    Removed(EventId),
}

/// Flush/sync strategy for the journal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// `fsync` after every write (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Append-only journal of framed records.
///
/// On-disk format per entry:
/// ```text
/// [4 bytes: entry length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized JournalRecord)]
/// ```
///
/// Recovery reads front-to-back; a torn or CRC-failing tail entry ends the
/// scan, so a crash mid-write loses at most the entry being written.
/// Callers serialize access; the journal itself holds no lock.
pub struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    sync_mode: SyncMode,
}

impl Journal {
    /// Open (or create) the journal file at the given path.
    pub fn open(path: &Path, sync_mode: SyncMode) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let offset = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            offset,
            sync_mode,
        })
    }

    /// Append a record. Returns the byte offset the entry was written at.
    pub fn append(&mut self, record: &JournalRecord) -> StoreResult<u64> {
        let payload =
            bincode::serialize(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let length = payload.len() as u32;
        let crc = crc32fast::hash(&payload);

        let entry_offset = self.offset;
        self.writer.write_all(&length.to_le_bytes())?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        if self.sync_mode == SyncMode::EveryWrite {
            self.writer.get_ref().sync_all()?;
        }

        self.offset += (HEADER_SIZE + payload.len()) as u64;
        debug!(offset = entry_offset, len = payload.len(), "journal append");
        Ok(entry_offset)
    }

    /// Read back all valid records from the journal file.
    ///
    /// Entries failing the CRC or length check mark the end of the usable
    /// log (torn write from a crash); everything before them is returned.
    pub fn recover(&self) -> StoreResult<Vec<JournalRecord>> {
        let mut file = BufReader::new(File::open(&self.path)?);
        let file_len = file.get_ref().metadata()?.len();
        let mut records = Vec::new();
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE as u64 <= file_len {
            file.seek(SeekFrom::Start(offset))?;

            let mut header = [0u8; HEADER_SIZE];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if length == 0 || offset + (HEADER_SIZE as u64) + length as u64 > file_len {
                warn!(offset, length, file_len, "invalid journal entry length; stopping recovery");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            match file.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(offset, "truncated journal entry; stopping recovery");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            if crc32fast::hash(&payload) != expected_crc {
                warn!(offset, "CRC mismatch; stopping recovery");
                break;
            }

            match bincode::deserialize::<JournalRecord>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(offset, error = %e, "undecodable journal entry; stopping recovery");
                    break;
                }
            }

            offset += (HEADER_SIZE as u64) + length as u64;
        }

        debug!(recovered = records.len(), "journal recovery complete");
        Ok(records)
    }

    /// Replace the journal contents with the given records.
    ///
    /// Writes a sibling temp file, syncs it, then renames it over the
    /// journal, so a crash mid-compaction leaves either the old or the new
    /// file intact.
    pub fn rewrite(&mut self, records: &[JournalRecord]) -> StoreResult<()> {
        let tmp_path = self.path.with_extension("journal.tmp");
        {
            let tmp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut w = BufWriter::new(tmp);
            for record in records {
                let payload = bincode::serialize(record)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                w.write_all(&(payload.len() as u32).to_le_bytes())?;
                w.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
                w.write_all(&payload)?;
            }
            w.flush()?;
            w.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        self.offset = file.metadata()?.len();
        self.writer = BufWriter::new(file);

        debug!(records = records.len(), "journal rewritten");
        Ok(())
    }

    /// Current write offset (bytes).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Path to the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
