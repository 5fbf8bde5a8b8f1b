//! The crash-safe append-only journal (`# 4.2`): persists `(id,
//! status)` pairs as they settle, and replays them back into a fresh
//! `InternTable`/status map at startup.
//!
//! Framing is length-delimited `rmp-serde` records, the same append-
//! only-log shape `submerge-coldb`'s `ioutil.rs` builds its
//! `Reader`/`Writer` abstractions around (this crate pulls in `serde` +
//! `rmp-serde` specifically because of that file, see `DESIGN.md`),
//! simplified here to a single `BufWriter`-backed file rather than a
//! pluggable `Reader`/`Writer` pair, since the journal only ever has one
//! reader (at startup) and one writer (the live process).

use crate::intern::Id;
use crate::key::Key;
use crate::result::Record;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// The persisted form of a [`crate::status::Status`]: only the two
/// variants `# 4.2` says are worth surviving a restart. `Waiting` never
/// reaches the journal (nothing is written until a key settles);
/// `Error` is deliberately not persisted either, so a key that failed
/// last run starts this run as whatever its last *successful* record
/// said, not wedged in a remembered failure (`# 4.2`).
#[derive(Serialize, Deserialize)]
enum PersistedStatus {
    Missing,
    Loaded(Record),
}

#[derive(Serialize, Deserialize)]
struct RecordPayload {
    id: u32,
    status: PersistedStatus,
}

/// One entry recovered from the journal, handed back to the scheduler
/// at startup to seed its intern table and status map. `key` is
/// re-interned through the normal [`crate::intern::InternTable`] path
/// (in file order) to obtain this process's own id for it; `persisted_id`
/// is the id the *writing* process assigned, kept so the scheduler can
/// build a persisted-id -> new-id map and remap any `Record.depends`
/// entries written under the old numbering (`# 3`'s "Id ... remapped on
/// load").
pub struct Recovered {
    pub key: Key,
    pub persisted_id: Id,
    pub record: Option<Record>,
}

/// Append-only writer for the live journal file.
pub struct Journal {
    file: BufWriter<File>,
}

impl Journal {
    /// Opens (creating if absent) the journal at `path` for appending.
    pub fn open_append(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Journal {
            file: BufWriter::new(file),
        })
    }

    /// Appends a `Missing -> terminal` transition for `id`/`key`. Called
    /// the first time a key is interned, before anything else is known
    /// about it, so a crash before the first successful build still
    /// recovers the key's existence and its assigned id.
    pub fn record_missing(&mut self, id: Id, key: &Key) -> io::Result<()> {
        self.write_record(id, key, PersistedStatus::Missing)
    }

    /// Appends a settled record for `id`/`key`.
    pub fn record_loaded(&mut self, id: Id, key: &Key, record: &Record) -> io::Result<()> {
        self.write_record(id, key, PersistedStatus::Loaded(record.clone()))
    }

    fn write_record(&mut self, id: Id, key: &Key, status: PersistedStatus) -> io::Result<()> {
        let payload = RecordPayload {
            id: id.index() as u32,
            status,
        };
        let keyed = KeyedPayload {
            key: key.clone(),
            payload,
        };
        let bytes = rmp_serde::to_vec(&keyed)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let len = bytes.len() as u32;
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct KeyedPayload {
    key: Key,
    payload: RecordPayload,
}

/// Replays `path`, returning every record recovered up to (but not
/// including) a torn tail (`# 4.2`, `SPEC_FULL.md` C): a length prefix
/// with fewer than its declared bytes following, or a length prefix cut
/// off mid-read, is treated as "the process crashed mid-write" and
/// discarded rather than erroring the whole replay. Missing the file
/// entirely is not an error -- a brand-new database has no journal yet.
pub fn replay(path: impl AsRef<Path>) -> io::Result<Vec<Recovered>> {
    let path: PathBuf = path.as_ref().to_path_buf();
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("no journal at {path:?}, starting empty");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut out = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        match read_exact_or_eof(&mut reader, &mut len_buf)? {
            ReadOutcome::Eof => break,
            ReadOutcome::Torn => {
                warn!("journal {path:?}: torn length prefix at tail, discarding");
                break;
            }
            ReadOutcome::Full => {}
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload_buf = vec![0u8; len];
        match read_exact_or_eof(&mut reader, &mut payload_buf)? {
            ReadOutcome::Full => {}
            ReadOutcome::Eof | ReadOutcome::Torn => {
                warn!("journal {path:?}: torn record at tail, discarding");
                break;
            }
        }
        let keyed: KeyedPayload = match rmp_serde::from_slice(&payload_buf) {
            Ok(v) => v,
            Err(e) => {
                warn!("journal {path:?}: corrupt record, discarding rest: {e}");
                break;
            }
        };
        let record = match keyed.payload.status {
            PersistedStatus::Missing => None,
            PersistedStatus::Loaded(r) => Some(r),
        };
        out.push(Recovered {
            key: keyed.key,
            persisted_id: Id::from_index(keyed.payload.id),
            record,
        });
    }
    debug!("journal {path:?}: recovered {} records", out.len());
    Ok(out)
}

enum ReadOutcome {
    Full,
    Eof,
    Torn,
}

fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Torn
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(ReadOutcome::Full)
}
