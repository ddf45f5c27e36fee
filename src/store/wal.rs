use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::limits::MAX_RECORD_LEN;
use crate::model::Event;

/// Leading bytes of every log file; the last byte is the format version.
const MAGIC: [u8; 8] = *b"RMLKWAL\x01";

/// Length word plus CRC around each payload.
const FRAME_OVERHEAD: u64 = 8;

/// Encode one record as `[u32 len][bincode payload][u32 crc32]` and return
/// its framed size. Nothing is written if the event cannot be encoded.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record of {} bytes exceeds {MAX_RECORD_LEN}", payload.len()),
        ));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(payload.len() as u64 + FRAME_OVERHEAD)
}

/// Read one record and its framed size. `Ok(None)` means a clean end, a torn
/// tail, an implausible length or a bad checksum; all of them end the replay.
/// `remaining` is the number of unread bytes in the file.
fn decode_record(reader: &mut impl Read, remaining: u64) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    let framed = len as u64 + FRAME_OVERHEAD;
    if len > MAX_RECORD_LEN || framed > remaining {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload).ok().map(|event| (event, framed)))
}

/// `read_exact` that reports EOF as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn open_for_append(path: &Path) -> io::Result<BufWriter<File>> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if file.metadata()?.len() == 0 {
        file.write_all(&MAGIC)?;
        file.sync_all()?;
    }
    Ok(BufWriter::new(file))
}

/// Intact records of a log and the byte length they occupy, header included.
/// `valid_len` is zero when even the header is incomplete.
struct Scan {
    events: Vec<Event>,
    valid_len: u64,
    file_len: u64,
}

fn scan(path: &Path) -> io::Result<Scan> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Scan {
                events: Vec::new(),
                valid_len: 0,
                file_len: 0,
            });
        }
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; MAGIC.len()];
    if !read_full(&mut reader, &mut magic)? {
        return Ok(Scan {
            events: Vec::new(),
            valid_len: 0,
            file_len,
        });
    }
    if magic != MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is not a roomlock WAL", path.display()),
        ));
    }

    let mut events = Vec::new();
    let mut valid_len = MAGIC.len() as u64;
    while let Some((event, framed)) = decode_record(&mut reader, file_len - valid_len)? {
        valid_len += framed;
        events.push(event);
    }
    if valid_len < file_len {
        warn!(
            "WAL {}: discarded {} trailing bytes after {} records",
            path.display(),
            file_len - valid_len,
            events.len()
        );
    }
    Ok(Scan {
        events,
        valid_len,
        file_len,
    })
}

/// Append-only write-ahead log of reservation events.
///
/// File layout: `MAGIC` followed by records of `[u32 len][bincode Event][u32 crc32]`.
/// A torn last record (crash mid-write) is cut off by `recover`.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length covered by fsynced, acknowledged batches.
    committed_len: u64,
    /// Set when a failed batch could not be rolled back; refuses further appends.
    poisoned: bool,
}

impl Wal {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let writer = open_for_append(path)?;
        let committed_len = writer.get_ref().metadata()?.len();
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            appends_since_compact: 0,
            committed_len,
            poisoned: false,
        })
    }

    /// Replay the log, cut any torn or corrupt tail off the file, and open it
    /// for appending after the last intact record.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let scan = scan(path)?;
        if scan.valid_len < scan.file_len {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }
        Ok((Self::open(path)?, scan.events))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write and fsync `events` as one group commit. On error the file is cut
    /// back to its length before the batch, so none of the batch survives a
    /// restart.
    pub fn append_batch(&mut self, events: &[Event]) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL refused appends after a failed rollback"));
        }
        match self.write_batch(events) {
            Ok(written) => {
                self.appends_since_compact += events.len() as u64;
                self.committed_len += written;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    error!(
                        "WAL {}: rollback to {} bytes failed: {rollback}",
                        self.path.display(),
                        self.committed_len
                    );
                    self.poisoned = true;
                }
                Err(e)
            }
        }
    }

    fn write_batch(&mut self, events: &[Event]) -> io::Result<u64> {
        let mut written = 0;
        for event in events {
            written += encode_record(&mut self.writer, event)?;
        }
        self.flush_sync()?;
        Ok(written)
    }

    /// Drop buffered bytes unwritten and truncate to the last committed length.
    fn rollback(&mut self) -> io::Result<()> {
        let placeholder = BufWriter::new(File::open(&self.path)?);
        let (file, _unwritten) = std::mem::replace(&mut self.writer, placeholder).into_parts();
        file.set_len(self.committed_len)?;
        file.sync_all()?;
        self.writer = BufWriter::new(file);
        Ok(())
    }

    fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_batch(std::slice::from_ref(event))
    }

    /// Rewrite the log to exactly `events`: write a temp file, fsync, rename over.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let compacted_len;
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writer.write_all(&MAGIC)?;
            let mut len = MAGIC.len() as u64;
            for event in events {
                len += encode_record(&mut writer, event)?;
            }
            compacted_len = len;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        self.writer = open_for_append(&self.path)?;
        self.committed_len = compacted_len;
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Read every intact record without touching the file. A missing file
    /// replays as empty.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.events)
    }
}
