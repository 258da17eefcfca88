//! Write-ahead log.
//!
//! Every mutation is appended to the WAL after validation and before being
//! applied in memory. The file starts with an 8-byte header (`EVWL` + `u32` LE
//! format version); each entry after it is framed as
//! `[u32 length BE][u32 CRC32 BE][bincode payload]`.
//!
//! Replay applies entries with upsert semantics, so replaying an entry that was
//! already applied before a crash is harmless.

use crate::error::{DatabaseError, Result};
use crate::quantization::QuantizationMode;
use crate::storage::vector_store::Record;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

const WAL_MAGIC: &[u8; 4] = b"EVWL";
pub const WAL_FORMAT_VERSION: u32 = 1;
const HEADER_LEN: u64 = 8;
const FRAME_PREFIX_LEN: usize = 8;

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEntry {
    Insert(Record),
    /// Insert or replace.
    Upsert(Record),
    Delete { id: String },
    /// The valid records of one batch chunk.
    InsertBatch { records: Vec<Record> },
    UpsertBatch { records: Vec<Record> },
    DeleteBatch { ids: Vec<String> },
    Clear,
    SetQuantization { mode: QuantizationMode },
}

impl WalEntry {
    /// The records carried by an insert or upsert entry, in log order.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            WalEntry::Insert(r) | WalEntry::Upsert(r) => vec![r],
            WalEntry::InsertBatch { records } | WalEntry::UpsertBatch { records } => records,
            _ => Vec::new(),
        }
    }
}

/// What a replay found, beyond the entries themselves.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    /// Entries decoded and returned.
    pub success: usize,
    /// Frames with a valid checksum whose payload did not decode.
    pub skipped: usize,
    /// Frames whose checksum did not match. Replay stops at the first one.
    pub crc_errors: usize,
    /// The log ended inside a frame.
    pub truncated: bool,
}

/// Append-only mutation log next to a collection snapshot.
///
/// Appends are serialized by an internal mutex; with `sync` set each one is
/// `fdatasync`ed before [`append`](WriteAheadLog::append) returns. A failed
/// append leaves no bytes behind; if they cannot be cut off, the log refuses
/// appends until the next [`truncate`](WriteAheadLog::truncate).
pub struct WriteAheadLog {
    log: Mutex<LogFile>,
    /// Shared by appends, exclusive while a checkpoint truncates the log.
    write_gate: RwLock<()>,
    path: PathBuf,
    sync: bool,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("sync", &self.sync)
            .finish()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

struct LogFile {
    file: File,
    /// A failed append left a partial frame that could not be removed.
    poisoned: bool,
}

/// An append that did not complete.
struct AppendError {
    source: io::Error,
    rolled_back: bool,
}

/// Writes `frame` through `out` at the end of `file`. On failure `file` is cut
/// back to its previous length.
fn write_frame<W: Write>(
    out: &mut W,
    file: &File,
    frame: &[u8],
    sync: bool,
) -> std::result::Result<(), AppendError> {
    let start = file
        .metadata()
        .map_err(|source| AppendError {
            source,
            rolled_back: true,
        })?
        .len();
    let written = out
        .write_all(frame)
        .and_then(|()| out.flush())
        .and_then(|()| if sync { file.sync_data() } else { Ok(()) });
    written.map_err(|source| AppendError {
        source,
        rolled_back: file.set_len(start).is_ok(),
    })
}

fn header() -> [u8; HEADER_LEN as usize] {
    let mut h = [0u8; HEADER_LEN as usize];
    h[..4].copy_from_slice(WAL_MAGIC);
    h[4..].copy_from_slice(&WAL_FORMAT_VERSION.to_le_bytes());
    h
}

/// Outcome of reading one frame.
enum Frame {
    Payload(Vec<u8>),
    BadChecksum,
    Torn,
    End,
}

fn read_frame<R: Read>(reader: &mut R) -> io::Result<Frame> {
    let mut prefix = [0u8; FRAME_PREFIX_LEN];
    let mut filled = 0;
    while filled < FRAME_PREFIX_LEN {
        match reader.read(&mut prefix[filled..])? {
            0 if filled == 0 => return Ok(Frame::End),
            0 => return Ok(Frame::Torn),
            n => filled += n,
        }
    }
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as u64;
    let crc = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);

    let mut payload = Vec::new();
    if reader.by_ref().take(len).read_to_end(&mut payload)? as u64 != len {
        return Ok(Frame::Torn);
    }
    if crc32fast::hash(&payload) != crc {
        return Ok(Frame::BadChecksum);
    }
    Ok(Frame::Payload(payload))
}

impl WriteAheadLog {
    /// Opens `path` for appending, creating it (with the format header) if needed.
    pub fn open(path: impl Into<PathBuf>, sync: bool) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = open_append(&path)?;
        if file.metadata()?.len() == 0 {
            file.write_all(&header())?;
            file.sync_all()?;
        }
        Ok(Self {
            log: Mutex::new(LogFile {
                file,
                poisoned: false,
            }),
            write_gate: RwLock::new(()),
            path,
            sync,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one framed entry and returns its size on disk.
    pub fn append(&self, entry: &WalEntry) -> Result<usize> {
        let frame = encode_frame(entry)?;

        let _shared = self.write_gate.read();
        let mut log = self.log.lock();
        if log.poisoned {
            return Err(DatabaseError::Corrupted(format!(
                "{} holds a partial frame from a failed append; checkpoint to reset it",
                self.path.display()
            ))
            .into());
        }
        let mut out = &log.file;
        match write_frame(&mut out, &log.file, &frame, self.sync) {
            Ok(()) => Ok(frame.len()),
            Err(AppendError {
                source,
                rolled_back,
            }) => {
                if rolled_back {
                    tracing::warn!(path = %self.path.display(), error = %source, "WAL append failed, partial frame removed");
                } else {
                    tracing::error!(path = %self.path.display(), error = %source, "WAL append failed and could not be rolled back, refusing further appends");
                    log.poisoned = true;
                }
                Err(source.into())
            }
        }
    }

    /// File size in bytes, header included.
    pub fn size_bytes(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.size_bytes() <= HEADER_LEN
    }

    /// Decodes every entry up to the first torn or corrupt frame.
    ///
    /// A foreign header is [`DatabaseError::Corrupted`]; an unknown version is
    /// [`DatabaseError::UnsupportedVersion`]. An empty file replays nothing.
    pub fn replay(&self) -> Result<(Vec<WalEntry>, ReplayStats)> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        let mut stats = ReplayStats::default();

        let mut head = [0u8; HEADER_LEN as usize];
        match reader.read_exact(&mut head) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok((entries, stats)),
            Err(e) => return Err(e.into()),
        }
        if &head[..4] != WAL_MAGIC {
            return Err(DatabaseError::Corrupted(format!(
                "{} is not a write-ahead log",
                self.path.display()
            ))
            .into());
        }
        let version = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
        if version != WAL_FORMAT_VERSION {
            return Err(DatabaseError::UnsupportedVersion {
                found: version,
                supported: WAL_FORMAT_VERSION,
            }
            .into());
        }

        loop {
            match read_frame(&mut reader)? {
                Frame::End => break,
                Frame::Torn => {
                    tracing::warn!(path = %self.path.display(), replayed = stats.success, "WAL ends mid-frame, ignoring the tail");
                    stats.truncated = true;
                    break;
                }
                Frame::BadChecksum => {
                    tracing::warn!(path = %self.path.display(), replayed = stats.success, "WAL frame checksum mismatch, stopping replay");
                    stats.crc_errors += 1;
                    break;
                }
                Frame::Payload(bytes) => match bincode::deserialize::<WalEntry>(&bytes) {
                    Ok(entry) => {
                        entries.push(entry);
                        stats.success += 1;
                    }
                    Err(e) => {
                        tracing::warn!(path = %self.path.display(), error = %e, "undecodable WAL entry skipped");
                        stats.skipped += 1;
                    }
                },
            }
        }

        Ok((entries, stats))
    }

    /// Blocks appends until the guard is dropped. Checkpoints hold it across
    /// snapshot write and [`truncate`](WriteAheadLog::truncate).
    pub fn freeze(&self) -> RwLockWriteGuard<'_, ()> {
        self.write_gate.write()
    }

    /// Cuts the log back to its header.
    pub fn truncate(&self) -> Result<()> {
        let mut log = self.log.lock();
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(&header())?;
        file.sync_all()?;
        *log = LogFile {
            file: open_append(&self.path)?,
            poisoned: false,
        };
        Ok(())
    }
}

/// `[u32 len BE][u32 crc32 BE][bincode payload]`
fn encode_frame(entry: &WalEntry) -> Result<Vec<u8>> {
    let payload = bincode::serialize(entry)?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        DatabaseError::Serialization(format!("WAL entry of {} bytes is too large", payload.len()))
    })?;

    let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::vector_store::Metadata;
    use tempfile::TempDir;

    fn record(id: &str, vector: &[f32]) -> Record {
        let mut metadata = Metadata::new();
        metadata.insert("src".into(), id.to_uppercase());
        Record {
            id: id.into(),
            vector: vector.to_vec(),
            metadata,
        }
    }

    fn wal_in(dir: &TempDir) -> WriteAheadLog {
        WriteAheadLog::open(dir.path().join("c.wal"), true).unwrap()
    }

    #[test]
    fn test_entries_replay_in_order() {
        let dir = TempDir::new().unwrap();
        let wal = wal_in(&dir);
        assert!(wal.is_empty());
        wal.append(&WalEntry::Insert(record("a", &[1.0, 2.0, 3.0])))
            .unwrap();
        wal.append(&WalEntry::Delete { id: "a".into() }).unwrap();
        wal.append(&WalEntry::SetQuantization {
            mode: QuantizationMode::Scalar,
        })
        .unwrap();
        assert!(!wal.is_empty());

        let (entries, stats) = wal.replay().unwrap();
        assert_eq!(stats.success, 3);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.crc_errors, 0);
        assert_eq!(entries[0], WalEntry::Insert(record("a", &[1.0, 2.0, 3.0])));
        assert_eq!(entries[1], WalEntry::Delete { id: "a".into() });
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let wal = wal_in(&dir);
            wal.append(&WalEntry::InsertBatch {
                records: vec![record("x", &[0.5]), record("y", &[1.5])],
            })
            .unwrap();
        }
        let wal = wal_in(&dir);
        wal.append(&WalEntry::Clear).unwrap();
        let (entries, _) = wal.replay().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], WalEntry::Clear);
    }

    #[test]
    fn test_truncate_keeps_header() {
        let dir = TempDir::new().unwrap();
        let wal = wal_in(&dir);
        wal.append(&WalEntry::Delete { id: "x".into() }).unwrap();
        wal.truncate().unwrap();
        let (entries, _) = wal.replay().unwrap();
        assert!(entries.is_empty());
        assert_eq!(wal.size_bytes(), HEADER_LEN);
    }

    #[test]
    fn test_flipped_byte_stops_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.wal");
        {
            let wal = wal_in(&dir);
            wal.append(&WalEntry::Delete { id: "a".into() }).unwrap();
        }
        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        std::fs::write(&path, &data).unwrap();

        let (entries, stats) = wal_in(&dir).replay().unwrap();
        assert!(entries.is_empty());
        assert_eq!(stats.crc_errors, 1);
    }

    #[test]
    fn test_torn_tail_keeps_earlier_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.wal");
        {
            let wal = wal_in(&dir);
            wal.append(&WalEntry::Delete { id: "a".into() }).unwrap();
            wal.append(&WalEntry::Delete { id: "b".into() }).unwrap();
        }
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 3]).unwrap();

        let (entries, stats) = wal_in(&dir).replay().unwrap();
        assert_eq!(entries, vec![WalEntry::Delete { id: "a".into() }]);
        assert!(stats.truncated);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.wal");
        let mut bytes = WAL_MAGIC.to_vec();
        bytes.extend_from_slice(&99u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        match wal_in(&dir).replay() {
            Err(Error::Database(DatabaseError::UnsupportedVersion { found: 99, .. })) => {}
            other => panic!("expected UnsupportedVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_append_after_frozen_truncate() {
        let dir = TempDir::new().unwrap();
        {
            let wal = wal_in(&dir);
            wal.append(&WalEntry::Delete { id: "b".into() }).unwrap();
            let _gate = wal.freeze();
            wal.truncate().unwrap();
        }
        let wal = wal_in(&dir);
        wal.append(&WalEntry::Delete { id: "c".into() }).unwrap();
        let (entries, _) = wal.replay().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(&WalEntry::Delete { id: "test".into() }).unwrap();
        let (prefix, payload) = frame.split_at(FRAME_PREFIX_LEN);
        let len = u32::from_be_bytes(prefix[..4].try_into().unwrap()) as usize;
        let crc = u32::from_be_bytes(prefix[4..].try_into().unwrap());
        assert_eq!(len, payload.len());
        assert_eq!(crc, crc32fast::hash(payload));
        assert_eq!(
            bincode::deserialize::<WalEntry>(payload).unwrap(),
            WalEntry::Delete { id: "test".into() }
        );
    }

    /// Accepts `budget` bytes, then fails like a full disk.
    struct FailAfter<'a> {
        file: &'a File,
        budget: usize,
    }

    impl Write for FailAfter<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.budget);
            let mut file = self.file;
            let n = file.write(&buf[..n])?;
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_append_leaves_no_partial_frame() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.wal");
        let wal = wal_in(&dir);
        wal.append(&WalEntry::Delete { id: "a".into() }).unwrap();
        let before = wal.size_bytes();

        let file = open_append(&path).unwrap();
        let frame = encode_frame(&WalEntry::Delete { id: "b".into() }).unwrap();
        let mut out = FailAfter {
            file: &file,
            budget: 5,
        };
        let err = write_frame(&mut out, &file, &frame, false).unwrap_err();
        assert!(err.rolled_back);
        assert_eq!(wal.size_bytes(), before);

        wal.append(&WalEntry::Delete { id: "c".into() }).unwrap();
        let (entries, stats) = wal.replay().unwrap();
        assert_eq!(
            entries,
            vec![
                WalEntry::Delete { id: "a".into() },
                WalEntry::Delete { id: "c".into() }
            ]
        );
        assert_eq!(stats.crc_errors, 0);
        assert!(!stats.truncated);
    }
}
