use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::write::{
    open_unique_tmp_file, parent_dir, remove_file_best_effort, rename_overwrite,
    sync_dir_best_effort,
};
use crate::StorageError;

/// Size of the fixed file header: magic, framing version, schema version.
pub const LOG_HEADER_LEN: usize = 16;

/// Version of the record framing itself (independent of what callers store in it).
pub const LOG_FORMAT_VERSION: u32 = 1;

/// Upper bound for a single record payload.
///
/// A corrupted length prefix must surface as corruption, not as a huge allocation.
pub const MAX_RECORD_PAYLOAD: usize = 64 * 1024 * 1024;

const RECORD_PREFIX_LEN: u64 = 5;
const RECORD_CHECKSUM_LEN: u64 = 8;

/// Pending bytes are handed to the OS once the in-memory buffer reaches this size.
const WRITE_BUFFER_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordTag {
    Put = 1,
    Append = 2,
    Remove = 3,
    Name = 4,
}

impl RecordTag {
    fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Put),
            2 => Some(Self::Append),
            3 => Some(Self::Remove),
            4 => Some(Self::Name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadWrite,
    ReadOnly,
}

impl OpenMode {
    pub fn is_read_only(self) -> bool {
        matches!(self, OpenMode::ReadOnly)
    }
}

/// Identifies what kind of data a log holds and which encoding version it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFormat {
    pub magic: [u8; 8],
    pub schema_version: u32,
}

/// A record observed while replaying a log on open.
#[derive(Debug)]
pub struct RecordView<'a> {
    pub tag: RecordTag,
    /// Logical offset of the first payload byte.
    pub payload_offset: u64,
    pub payload: &'a [u8],
}

/// Total on-disk size of a record carrying `payload_len` bytes.
pub fn record_len(payload_len: usize) -> u64 {
    RECORD_PREFIX_LEN + payload_len as u64 + RECORD_CHECKSUM_LEN
}

/// An append-only file of checksummed, tagged records.
///
/// Records are framed as `tag: u8`, `len: u32 LE`, payload, `checksum: u64 LE`
/// where the checksum is the first 8 bytes of `blake3(tag || payload)`.
///
/// Appends are buffered in memory until [`RecordLog::force_flush`] (or until the
/// buffer grows past an internal limit). Reads transparently cover both the
/// file and the pending buffer, so offsets returned by [`RecordLog::append`]
/// are valid immediately.
#[derive(Debug)]
pub struct RecordLog {
    path: PathBuf,
    file: File,
    format: LogFormat,
    mode: OpenMode,
    /// Bytes already handed to the OS.
    written_len: u64,
    pending: Vec<u8>,
    unsynced: bool,
}

impl RecordLog {
    /// Opens (or, in read-write mode, creates) the log at `path` and replays every
    /// record through `visit`.
    ///
    /// A torn trailing record (the file ends mid-record) is the expected result of a
    /// crash during a write; it is dropped. Checksum mismatches or malformed
    /// framing inside complete records are reported as errors.
    pub fn open(
        path: &Path,
        format: LogFormat,
        mode: OpenMode,
        mut visit: impl FnMut(RecordView<'_>) -> Result<(), StorageError>,
    ) -> Result<Self, StorageError> {
        let file = match mode {
            OpenMode::ReadWrite => {
                std::fs::create_dir_all(parent_dir(path)?)?;
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(path)?
            }
            OpenMode::ReadOnly => OpenOptions::new().read(true).open(path)?,
        };

        let file_len = file.metadata()?.len();
        if file_len == 0 && mode == OpenMode::ReadWrite {
            let mut header = [0u8; LOG_HEADER_LEN];
            encode_header(&format, &mut header);
            (&file).write_all(&header)?;
            file.sync_all()?;
            return Ok(Self {
                path: path.to_path_buf(),
                file,
                format,
                mode,
                written_len: LOG_HEADER_LEN as u64,
                pending: Vec::new(),
                unsynced: false,
            });
        }

        if file_len < LOG_HEADER_LEN as u64 {
            return Err(StorageError::Truncated {
                expected: LOG_HEADER_LEN,
                found: file_len as usize,
            });
        }

        let mut reader = BufReader::new(&file);
        let mut header = [0u8; LOG_HEADER_LEN];
        reader.read_exact(&mut header)?;
        check_header(&format, &header)?;

        let valid_len = replay(&mut reader, &mut visit)?;
        drop(reader);

        if valid_len < file_len {
            tracing::warn!(
                target = "nova.storage",
                path = %path.display(),
                valid_len,
                file_len,
                read_only = mode.is_read_only(),
                "dropping torn trailing record"
            );
            if mode == OpenMode::ReadWrite {
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            format,
            mode,
            written_len: valid_len,
            pending: Vec::new(),
            unsynced: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Logical length including records that are still buffered.
    pub fn len(&self) -> u64 {
        self.written_len + self.pending.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == LOG_HEADER_LEN as u64
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty() || self.unsynced
    }

    /// Appends a record whose payload is produced by `write_payload`.
    ///
    /// Returns the logical offset of the first payload byte.
    pub fn append(
        &mut self,
        tag: RecordTag,
        write_payload: impl FnOnce(&mut Vec<u8>),
    ) -> Result<u64, StorageError> {
        if self.mode.is_read_only() {
            return Err(StorageError::ReadOnly);
        }

        let payload_start = encode_record(&mut self.pending, tag, write_payload)?;
        let payload_offset = self.written_len + payload_start as u64;

        if self.pending.len() >= WRITE_BUFFER_LIMIT {
            self.write_pending()?;
        }

        Ok(payload_offset)
    }

    /// Reads `len` bytes at logical offset `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, StorageError> {
        let mut out = Vec::with_capacity(len);
        self.read_append(offset, len, &mut out)?;
        Ok(out)
    }

    /// Reads `len` bytes at logical offset `offset`, appending them to `out`.
    pub fn read_append(
        &self,
        offset: u64,
        len: usize,
        out: &mut Vec<u8>,
    ) -> Result<(), StorageError> {
        let in_bounds = offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= self.len());
        if !in_bounds {
            return Err(StorageError::CorruptRecord {
                offset,
                reason: "extent past end of log",
            });
        }

        let start = out.len();
        out.resize(start + len, 0);
        let result = self.read_into(offset, &mut out[start..]);
        if result.is_err() {
            out.truncate(start);
        }
        result
    }

    fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        if offset >= self.written_len {
            let start = (offset - self.written_len) as usize;
            buf.copy_from_slice(&self.pending[start..start + buf.len()]);
            return Ok(());
        }

        // Records never straddle the written/pending boundary.
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Writes buffered records and fsyncs the file.
    pub fn force_flush(&mut self) -> Result<(), StorageError> {
        if self.mode.is_read_only() {
            return Ok(());
        }
        self.write_pending()?;
        if self.unsynced {
            self.file.sync_data()?;
            self.unsynced = false;
        }
        Ok(())
    }

    fn write_pending(&mut self) -> Result<(), StorageError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut file = &self.file;
        file.seek(SeekFrom::Start(self.written_len))?;
        file.write_all(&self.pending)?;
        self.written_len += self.pending.len() as u64;
        self.pending.clear();
        self.unsynced = true;
        Ok(())
    }

    /// Starts writing a replacement for this log next to it.
    ///
    /// Pending records are flushed first so the caller can keep reading the current
    /// log while filling the rewrite.
    pub fn begin_rewrite(&mut self) -> Result<LogRewrite, StorageError> {
        if self.mode.is_read_only() {
            return Err(StorageError::ReadOnly);
        }
        self.force_flush()?;

        let parent = parent_dir(&self.path)?;
        let (tmp_path, file) = open_unique_tmp_file(&self.path, parent)?;
        let mut rewrite = LogRewrite {
            tmp_path,
            out: Some(BufWriter::new(file)),
            len: 0,
            scratch: Vec::new(),
        };
        let mut header = [0u8; LOG_HEADER_LEN];
        encode_header(&self.format, &mut header);
        rewrite.write_raw(&header)?;
        Ok(rewrite)
    }

    /// Atomically replaces this log with the finished rewrite.
    pub fn commit_rewrite(&mut self, mut rewrite: LogRewrite) -> Result<(), StorageError> {
        let Some(out) = rewrite.out.take() else {
            return Err(StorageError::InvalidHeader("rewrite already finished"));
        };
        // The temp file handle stays valid across the rename and becomes the live log.
        let published = (|| -> Result<File, StorageError> {
            let file = out.into_inner().map_err(|err| err.into_error())?;
            file.sync_all()?;
            rename_overwrite(&rewrite.tmp_path, &self.path)?;
            Ok(file)
        })();
        let file = match published {
            Ok(file) => file,
            Err(err) => {
                remove_file_best_effort(&rewrite.tmp_path, "record_log.failed_rewrite");
                return Err(err);
            }
        };
        self.file = file;
        self.written_len = rewrite.len;
        self.pending.clear();
        self.unsynced = false;

        if let Ok(parent) = parent_dir(&self.path) {
            sync_dir_best_effort(parent, "record_log.commit_rewrite");
        }
        Ok(())
    }

    /// Flushes and releases the file.
    pub fn close(mut self) -> Result<(), StorageError> {
        self.force_flush()
    }
}

/// A replacement log being written next to the live one; see [`RecordLog::begin_rewrite`].
///
/// Dropping an uncommitted rewrite deletes its temp file.
#[derive(Debug)]
pub struct LogRewrite {
    tmp_path: PathBuf,
    out: Option<BufWriter<File>>,
    len: u64,
    scratch: Vec<u8>,
}

impl LogRewrite {
    /// Appends a record; returns the payload offset it will have once committed.
    pub fn append(
        &mut self,
        tag: RecordTag,
        write_payload: impl FnOnce(&mut Vec<u8>),
    ) -> Result<u64, StorageError> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        let payload_start = encode_record(&mut scratch, tag, write_payload)?;
        let payload_offset = self.len + payload_start as u64;
        let result = self.write_raw(&scratch);
        self.scratch = scratch;
        result?;
        Ok(payload_offset)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len <= LOG_HEADER_LEN as u64
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        let out = self
            .out
            .as_mut()
            .ok_or(StorageError::InvalidHeader("rewrite already finished"))?;
        out.write_all(bytes)?;
        self.len += bytes.len() as u64;
        Ok(())
    }
}

impl Drop for LogRewrite {
    fn drop(&mut self) {
        if self.out.take().is_some() {
            remove_file_best_effort(&self.tmp_path, "record_log.abandoned_rewrite");
        }
    }
}

fn encode_header(format: &LogFormat, out: &mut [u8; LOG_HEADER_LEN]) {
    out[..8].copy_from_slice(&format.magic);
    LittleEndian::write_u32(&mut out[8..12], LOG_FORMAT_VERSION);
    LittleEndian::write_u32(&mut out[12..16], format.schema_version);
}

fn check_header(format: &LogFormat, header: &[u8; LOG_HEADER_LEN]) -> Result<(), StorageError> {
    let mut magic = [0u8; 8];
    magic.copy_from_slice(&header[..8]);
    if magic != format.magic {
        return Err(StorageError::WrongMagic {
            expected: format.magic,
            found: magic,
        });
    }

    let log_version = LittleEndian::read_u32(&header[8..12]);
    if log_version != LOG_FORMAT_VERSION {
        return Err(StorageError::WrongFormat {
            expected: LOG_FORMAT_VERSION,
            found: log_version,
        });
    }

    let schema_version = LittleEndian::read_u32(&header[12..16]);
    if schema_version != format.schema_version {
        return Err(StorageError::WrongSchema {
            expected: format.schema_version,
            found: schema_version,
        });
    }
    Ok(())
}

/// Appends a framed record to `buf`; returns the index of the first payload byte.
fn encode_record(
    buf: &mut Vec<u8>,
    tag: RecordTag,
    write_payload: impl FnOnce(&mut Vec<u8>),
) -> Result<usize, StorageError> {
    let record_start = buf.len();
    buf.push(tag as u8);
    buf.extend_from_slice(&[0u8; 4]);
    let payload_start = buf.len();
    write_payload(buf);

    let payload_len = buf.len() - payload_start;
    if payload_len > MAX_RECORD_PAYLOAD {
        buf.truncate(record_start);
        return Err(StorageError::OversizedRecord { len: payload_len });
    }

    LittleEndian::write_u32(
        &mut buf[record_start + 1..payload_start],
        payload_len as u32,
    );
    let checksum = record_checksum(tag as u8, &buf[payload_start..]);
    buf.write_u64::<LittleEndian>(checksum)?;
    Ok(payload_start)
}

fn record_checksum(tag: u8, payload: &[u8]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[tag]);
    hasher.update(payload);
    let hash = hasher.finalize();
    LittleEndian::read_u64(&hash.as_bytes()[..8])
}

/// 64-bit content hash used for in-memory hash indexes.
pub(crate) fn hash64(bytes: &[u8]) -> u64 {
    let hash = blake3::hash(bytes);
    LittleEndian::read_u64(&hash.as_bytes()[..8])
}

/// Replays records after the header; returns the length of the valid prefix.
fn replay(
    reader: &mut impl Read,
    visit: &mut impl FnMut(RecordView<'_>) -> Result<(), StorageError>,
) -> Result<u64, StorageError> {
    let mut offset = LOG_HEADER_LEN as u64;
    let mut payload = Vec::new();

    loop {
        let mut tag = [0u8; 1];
        if !read_exact_or_eof(reader, &mut tag)? {
            return Ok(offset);
        }
        let len = match reader.read_u32::<LittleEndian>() {
            Ok(len) => len as usize,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(offset),
            Err(err) => return Err(err.into()),
        };

        let Some(tag) = RecordTag::from_u8(tag[0]) else {
            return Err(StorageError::CorruptRecord {
                offset,
                reason: "unknown record tag",
            });
        };
        if len > MAX_RECORD_PAYLOAD {
            return Err(StorageError::CorruptRecord {
                offset,
                reason: "record length exceeds maximum",
            });
        }

        payload.resize(len, 0);
        if !read_exact_or_eof(reader, &mut payload)? {
            return Ok(offset);
        }
        let expected = match reader.read_u64::<LittleEndian>() {
            Ok(checksum) => checksum,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(offset),
            Err(err) => return Err(err.into()),
        };
        let found = record_checksum(tag as u8, &payload);
        if found != expected {
            return Err(StorageError::HashMismatch {
                offset,
                expected,
                found,
            });
        }

        visit(RecordView {
            tag,
            payload_offset: offset + RECORD_PREFIX_LEN,
            payload: &payload,
        })?;
        offset += record_len(len);
    }
}

/// Like `read_exact`, but reports a short read as `Ok(false)` instead of an error.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool, StorageError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err.into()),
    }
}
