use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Frame: `[u32 LE: len][bincode: Event][u32 LE: crc32 of payload]`.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Fill `buf`, or report `false` if the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only log of one tenant's appointment events.
///
/// A torn trailing frame (crash mid-write) or a CRC mismatch ends replay;
/// everything before it is kept.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length as of the last successful `flush_sync`.
    committed_len: u64,
    appends_since_compact: u64,
    committed_appends: u64,
    /// Set when a rollback itself failed; the file tail is then unknown.
    poisoned: bool,
}

impl Wal {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed_len,
            appends_since_compact: 0,
            committed_appends: 0,
            poisoned: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_poisoned(&self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(format!(
                "{}: log poisoned by a failed rollback",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.check_poisoned()?;
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush buffered frames and fsync.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len = self.writer.get_ref().metadata()?.len();
        self.committed_appends = self.appends_since_compact;
        Ok(())
    }

    /// Throw away everything since the last successful `flush_sync`: the
    /// buffered frames and any bytes a failed flush got onto disk. If this
    /// fails the log refuses further appends.
    pub fn discard_uncommitted(&mut self) -> io::Result<()> {
        let result = self.truncate_to_committed();
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn truncate_to_committed(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(self.committed_len)?;
        file.sync_all()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the buffer instead of flushing it on drop.
        let _ = stale.into_parts();
        self.appends_since_compact = self.committed_appends;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: write a temp file, fsync, rename over
    /// the log and reopen it.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        self.flush_sync()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                write_frame(&mut tmp, event)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.committed_appends = 0;
        Ok(())
    }

    /// All intact events in the log at `path`; a missing file is empty.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_full(&mut reader, &mut len_buf)? {
                break;
            }
            let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
            if !read_full(&mut reader, &mut payload)? {
                warn!("{}: truncated frame after {} events", path.display(), events.len());
                break;
            }
            let mut crc_buf = [0u8; 4];
            if !read_full(&mut reader, &mut crc_buf)? {
                warn!("{}: truncated frame after {} events", path.display(), events.len());
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                warn!("{}: checksum mismatch after {} events", path.display(), events.len());
                break;
            }
            match bincode::deserialize(&payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!("{}: undecodable frame after {} events: {e}", path.display(), events.len());
                    break;
                }
            }
        }

        Ok(events)
    }
}
