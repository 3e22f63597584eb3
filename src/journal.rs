use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

const MAGIC: &[u8; 4] = b"SDJL";
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 8;

/// Upper bound on a single encoded event; anything larger is treated as corruption.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

fn write_header(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())
}

/// Encode one event as `[u32 len][bincode payload][u32 crc32(payload)]`.
/// Returns the encoded length.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(8 + payload.len() as u64)
}

/// Write handle positioned at `offset`. Anything past it is overwritten.
fn writer_at(path: &Path, offset: u64) -> io::Result<BufWriter<File>> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    Ok(BufWriter::new(file))
}

/// Read one record. `Ok(None)` means the log ends here, cleanly or at a torn/corrupt record.
fn decode_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
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
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, 8 + len as u64))),
        Err(_) => Ok(None),
    }
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Result of scanning a journal file.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the intact prefix (header included).
    pub valid_len: u64,
    /// Bytes after the intact prefix: a torn write or corruption.
    pub discarded: u64,
}

/// Append-only journal of [`Event`]s.
///
/// Layout: an 8-byte header (`SDJL` + u32 version) followed by records.
/// A torn or corrupt tail ends replay and is cut off when the journal is reopened.
///
/// Writes start at the end of the last synced record, not at the end of the
/// file, so stray bytes from a failed write are overwritten or cut off by
/// [`Journal::rollback`] instead of hiding later records from replay.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// End of the last record known to be on disk.
    synced_len: u64,
    /// Bytes and records handed to the writer since the last sync.
    unsynced_len: u64,
    unsynced_appends: u64,
    appends_since_compact: u64,
}

impl Journal {
    /// Scan the journal at `path`. A missing file replays as empty.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let total = file.metadata()?.len();
        if total == 0 {
            return Ok(Replay::default());
        }
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER_LEN as usize];
        if !read_full(&mut reader, &mut header)? {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "journal header truncated"));
        }
        if &header[..4] != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not a sessiondesk journal"));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported journal version {version}"),
            ));
        }

        let mut replay = Replay {
            valid_len: HEADER_LEN,
            ..Replay::default()
        };
        while let Some((event, consumed)) = decode_record(&mut reader)? {
            replay.events.push(event);
            replay.valid_len += consumed;
        }
        replay.discarded = total - replay.valid_len;
        Ok(replay)
    }

    /// Open (or create) the journal for appending, cutting it back to `valid_len`
    /// as reported by [`Journal::replay`].
    pub fn open(path: &Path, valid_len: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).read(true).write(true).truncate(false).open(path)?;
        let current = file.metadata()?.len();
        if valid_len < HEADER_LEN {
            file.set_len(0)?;
            let mut w = BufWriter::new(&file);
            write_header(&mut w)?;
            w.flush()?;
        } else if current > valid_len {
            file.set_len(valid_len)?;
        }
        file.sync_all()?;
        drop(file);

        let synced_len = valid_len.max(HEADER_LEN);
        Ok(Self {
            writer: writer_at(path, synced_len)?,
            path: path.to_path_buf(),
            synced_len,
            unsynced_len: 0,
            unsynced_appends: 0,
            appends_since_compact: 0,
        })
    }

    /// Append and fsync one event. Tests only; the engine batches through
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.unsynced_len += encode_record(&mut self.writer, event)?;
        self.unsynced_appends += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len += self.unsynced_len;
        self.appends_since_compact += self.unsynced_appends;
        self.unsynced_len = 0;
        self.unsynced_appends = 0;
        Ok(())
    }

    /// Discard everything written since the last successful sync: drop the
    /// buffer unwritten, cut the file back to the last synced record and
    /// continue from there.
    ///
    /// An error means the file may still hold unacknowledged bytes; the
    /// journal must not take further appends.
    pub fn rollback(&mut self) -> io::Result<()> {
        let fresh = writer_at(&self.path, self.synced_len)?;
        // `into_parts` hands back the buffer instead of flushing it on drop.
        drop(std::mem::replace(&mut self.writer, fresh).into_parts());
        self.unsynced_len = 0;
        self.unsynced_appends = 0;

        let file = self.writer.get_ref();
        file.set_len(self.synced_len)?;
        file.sync_all()
    }

    /// Byte length of the synced prefix.
    pub fn synced_len(&self) -> u64 {
        self.synced_len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("journal.tmp")
    }

    /// Write `events` as a complete journal next to `path` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        write_header(&mut writer)?;
        for event in events {
            encode_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the journal and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.flush_sync()?;
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let len = fs::metadata(&self.path)?.len();
        self.writer = writer_at(&self.path, len)?;
        self.synced_len = len;
        self.appends_since_compact = 0;
        Ok(())
    }
}
