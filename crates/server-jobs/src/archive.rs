// crates/server-jobs/src/archive.rs
//! Stored (uncompressed) ZIP writer.
//!
//! Layout: for each entry a local header followed by the raw bytes, then one
//! central directory record per written entry, then the end-of-central-
//! directory record. Each source file is read exactly once: the local
//! header goes out with a zero checksum, the bytes are streamed through a
//! CRC-32 hasher, and the checksum and size fields are patched in place.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Utc};
use tempfile::TempPath;
use tracing::{debug, warn};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;
const VERSION: u16 = 20;
const METHOD_STORED: u16 = 0;
const FLAG_UTF8: u16 = 0x0800;
const LOCAL_HEADER_LEN: u64 = 30;
const CENTRAL_HEADER_LEN: u64 = 46;
/// Offset of the CRC field inside a local header.
const LOCAL_CRC_OFFSET: u64 = 14;
const COPY_BUF: usize = 64 * 1024;

/// One file to place in the archive.
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    /// Entry name inside the archive.
    pub name: String,
    pub path: PathBuf,
    /// Logical creation time (unix seconds); becomes the entry timestamp.
    pub timestamp: i64,
}

impl ArchiveSource {
    /// Name the entry after the file's base name.
    pub fn from_path(path: impl Into<PathBuf>, timestamp: i64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            name,
            path,
            timestamp,
        }
    }
}

/// What happened to one input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Written,
    Skipped,
}

/// Totals after a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArchiveSummary {
    pub written: u64,
    pub skipped: u64,
    /// Final archive length. Anything past it in the output is garbage from
    /// an abandoned entry and should be truncated.
    pub len: u64,
}

struct CentralEntry {
    name: Vec<u8>,
    flags: u16,
    time: u16,
    date: u16,
    crc: u32,
    size: u32,
    offset: u32,
}

/// Build an archive into `out`, which must be positioned at its start.
///
/// `sources` holds one slot per requested item; `None` marks an item that
/// could not be resolved and is counted as skipped. Unreadable or oversized
/// files are skipped with a warning rather than failing the build.
/// `on_entry` runs after every slot with the slot index and its outcome.
///
/// Only I/O errors on `out` abort the build.
pub fn build_archive<W: Write + Seek>(
    out: &mut W,
    sources: &[Option<ArchiveSource>],
    mut on_entry: impl FnMut(usize, EntryOutcome),
) -> io::Result<ArchiveSummary> {
    let mut entries: Vec<CentralEntry> = Vec::with_capacity(sources.len());
    let mut offset: u64 = 0;
    let mut summary = ArchiveSummary::default();

    for (index, source) in sources.iter().enumerate() {
        let outcome = match source {
            None => EntryOutcome::Skipped,
            Some(source) => match write_entry(out, offset, source)? {
                Some((entry, next_offset)) => {
                    entries.push(entry);
                    offset = next_offset;
                    EntryOutcome::Written
                }
                None => EntryOutcome::Skipped,
            },
        };
        match outcome {
            EntryOutcome::Written => summary.written += 1,
            EntryOutcome::Skipped => summary.skipped += 1,
        }
        on_entry(index, outcome);
    }

    out.seek(SeekFrom::Start(offset))?;
    let cd_offset = offset;
    let mut cd_size: u64 = 0;
    for entry in &entries {
        let mut rec = Vec::with_capacity(CENTRAL_HEADER_LEN as usize + entry.name.len());
        put_u32(&mut rec, CENTRAL_HEADER_SIG);
        put_u16(&mut rec, VERSION); // made by
        put_u16(&mut rec, VERSION); // needed
        put_u16(&mut rec, entry.flags);
        put_u16(&mut rec, METHOD_STORED);
        put_u16(&mut rec, entry.time);
        put_u16(&mut rec, entry.date);
        put_u32(&mut rec, entry.crc);
        put_u32(&mut rec, entry.size);
        put_u32(&mut rec, entry.size);
        put_u16(&mut rec, entry.name.len() as u16);
        put_u16(&mut rec, 0); // extra
        put_u16(&mut rec, 0); // comment
        put_u16(&mut rec, 0); // disk start
        put_u16(&mut rec, 0); // internal attrs
        put_u32(&mut rec, 0); // external attrs
        put_u32(&mut rec, entry.offset);
        rec.extend_from_slice(&entry.name);
        out.write_all(&rec)?;
        cd_size += rec.len() as u64;
    }

    let (Ok(cd_offset32), Ok(cd_size32)) = (u32::try_from(cd_offset), u32::try_from(cd_size)) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "archive exceeds 4 GiB without ZIP64 support",
        ));
    };
    let count = entries.len() as u16;
    let mut eocd = Vec::with_capacity(22);
    put_u32(&mut eocd, END_OF_CENTRAL_DIR_SIG);
    put_u16(&mut eocd, 0); // this disk
    put_u16(&mut eocd, 0); // central directory disk
    put_u16(&mut eocd, count);
    put_u16(&mut eocd, count);
    put_u32(&mut eocd, cd_size32);
    put_u32(&mut eocd, cd_offset32);
    put_u16(&mut eocd, 0); // comment length
    out.write_all(&eocd)?;
    out.flush()?;

    summary.len = cd_offset + cd_size + eocd.len() as u64;
    Ok(summary)
}

/// Write one entry at `offset`. Returns the central record and the offset
/// just past the entry, or `None` if the source had to be skipped (the
/// output is rewound so the next entry overwrites any partial bytes).
fn write_entry<W: Write + Seek>(
    out: &mut W,
    offset: u64,
    source: &ArchiveSource,
) -> io::Result<Option<(CentralEntry, u64)>> {
    let mut file = match File::open(&source.path) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %source.path.display(), "skipping archive entry, cannot open: {e}");
            return Ok(None);
        }
    };
    let size = match file.metadata() {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => {
            warn!(path = %source.path.display(), "skipping archive entry, not a regular file");
            return Ok(None);
        }
        Err(e) => {
            warn!(path = %source.path.display(), "skipping archive entry, cannot stat: {e}");
            return Ok(None);
        }
    };
    let name = source.name.as_bytes();
    let (Ok(offset32), Ok(size32), Ok(name_len)) = (
        u32::try_from(offset),
        u32::try_from(size),
        u16::try_from(name.len()),
    ) else {
        warn!(path = %source.path.display(), size, "skipping archive entry, exceeds ZIP limits");
        return Ok(None);
    };
    let header_end = offset + LOCAL_HEADER_LEN + u64::from(name_len);
    if u32::try_from(header_end + size).is_err() {
        warn!(path = %source.path.display(), size, "skipping archive entry, archive would exceed 4 GiB");
        return Ok(None);
    }

    let flags = if source.name.is_ascii() { 0 } else { FLAG_UTF8 };
    let (time, date) = dos_date_time(source.timestamp);

    let mut header = Vec::with_capacity(LOCAL_HEADER_LEN as usize + name.len());
    put_u32(&mut header, LOCAL_HEADER_SIG);
    put_u16(&mut header, VERSION);
    put_u16(&mut header, flags);
    put_u16(&mut header, METHOD_STORED);
    put_u16(&mut header, time);
    put_u16(&mut header, date);
    put_u32(&mut header, 0); // crc, patched below
    put_u32(&mut header, size32);
    put_u32(&mut header, size32);
    put_u16(&mut header, name_len);
    put_u16(&mut header, 0); // extra
    header.extend_from_slice(name);

    out.seek(SeekFrom::Start(offset))?;
    out.write_all(&header)?;

    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; COPY_BUF];
    let mut copied: u64 = 0;
    let mut limited = (&mut file).take(size);
    loop {
        let n = match limited.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(path = %source.path.display(), "skipping archive entry, read failed: {e}");
                out.seek(SeekFrom::Start(offset))?;
                return Ok(None);
            }
        };
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n])?;
        copied += n as u64;
    }
    let crc = hasher.finalize();

    // The file may have shrunk since it was stat'ed; record what was copied.
    let size32 = copied as u32;
    let end = header_end + copied;
    out.seek(SeekFrom::Start(offset + LOCAL_CRC_OFFSET))?;
    let mut patch = Vec::with_capacity(12);
    put_u32(&mut patch, crc);
    put_u32(&mut patch, size32);
    put_u32(&mut patch, size32);
    out.write_all(&patch)?;
    out.seek(SeekFrom::Start(end))?;

    debug!(name = %source.name, bytes = copied, crc, "archive entry written");
    Ok(Some((
        CentralEntry {
            name: name.to_vec(),
            flags,
            time,
            date,
            crc,
            size: size32,
            offset: offset32,
        },
        end,
    )))
}

/// MS-DOS `(time, date)` for a unix timestamp, in local time.
///
/// The format covers 1980-01-01 to 2107-12-31 with 2-second resolution;
/// out-of-range instants are clamped to the nearest end.
pub fn dos_date_time(timestamp: i64) -> (u16, u16) {
    let local = Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.naive_local())
        .or_else(|| DateTime::<Utc>::from_timestamp(timestamp, 0).map(|dt| dt.naive_utc()));
    let Some(dt) = local else {
        return (0, (1 << 5) | 1);
    };
    if dt.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    if dt.year() > 2107 {
        return ((23 << 11) | (59 << 5) | 29, (127 << 9) | (12 << 5) | 31);
    }
    let time = ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
    let date = (((dt.year() - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
    (time, date)
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// A finished archive on local disk. The file is removed when the last
/// reference is dropped.
#[derive(Debug)]
pub struct ArchiveArtifact {
    path: TempPath,
    len: u64,
}

impl ArchiveArtifact {
    pub fn new(path: TempPath, len: u64) -> Arc<Self> {
        Arc::new(Self { path, len })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for ArchiveArtifact {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "removing archive artifact");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn build(sources: &[Option<ArchiveSource>]) -> (Vec<u8>, ArchiveSummary) {
        let mut cursor = Cursor::new(Vec::new());
        let summary = build_archive(&mut cursor, sources, |_, _| {}).unwrap();
        let mut bytes = cursor.into_inner();
        bytes.truncate(summary.len as usize);
        (bytes, summary)
    }

    #[test]
    fn test_archive_readable_with_matching_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "front_0001.mp4", b"first recording bytes");
        let b = write_file(dir.path(), "back_0002.mp4", &vec![7u8; 200_000]);
        let sources = vec![
            Some(ArchiveSource::from_path(&a, 1_700_000_000)),
            Some(ArchiveSource::from_path(&b, 1_700_000_100)),
        ];

        let (bytes, summary) = build(&sources);
        assert_eq!((summary.written, summary.skipped), (2, 0));

        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(zip.len(), 2);
        for (i, path) in [&a, &b].iter().enumerate() {
            let original = std::fs::read(path).unwrap();
            let mut entry = zip.by_index(i).unwrap();
            assert_eq!(
                entry.name(),
                path.file_name().unwrap().to_str().unwrap()
            );
            assert_eq!(entry.crc32(), crc32fast::hash(&original));
            assert_eq!(entry.size(), original.len() as u64);
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            assert_eq!(content, original);
        }
    }

    #[test]
    fn test_missing_sources_are_skipped_and_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.mp4", b"aaaa");
        let sources = vec![
            None,
            Some(ArchiveSource::from_path(dir.path().join("gone.mp4"), 0)),
            Some(ArchiveSource::from_path(&a, 1_600_000_000)),
        ];

        let mut seen = Vec::new();
        let mut cursor = Cursor::new(Vec::new());
        let summary = build_archive(&mut cursor, &sources, |i, outcome| seen.push((i, outcome))).unwrap();
        assert_eq!(
            seen,
            vec![
                (0, EntryOutcome::Skipped),
                (1, EntryOutcome::Skipped),
                (2, EntryOutcome::Written)
            ]
        );
        assert_eq!((summary.written, summary.skipped), (1, 2));

        let mut bytes = cursor.into_inner();
        bytes.truncate(summary.len as usize);
        let eocd = &bytes[bytes.len() - 22..];
        assert_eq!(&eocd[0..4], &END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        assert_eq!(u16::from_le_bytes([eocd[10], eocd[11]]), 1);

        let zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(zip.len(), 1);
    }

    #[test]
    fn test_empty_archive_is_valid() {
        let (bytes, summary) = build(&[]);
        assert_eq!(bytes.len(), 22);
        assert_eq!(summary.len, 22);
        let zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(zip.len(), 0);
    }

    #[test]
    fn test_offsets_and_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.mp4", b"12345");
        let b = write_file(dir.path(), "bb.mp4", b"678");
        let (bytes, summary) = build(&[
            Some(ArchiveSource::from_path(&a, 0)),
            Some(ArchiveSource::from_path(&b, 0)),
        ]);

        // Second local header starts right after the first entry's data.
        let second = (LOCAL_HEADER_LEN + 5 + 5) as usize;
        assert_eq!(&bytes[second..second + 4], &LOCAL_HEADER_SIG.to_le_bytes());

        let cd_start = second + LOCAL_HEADER_LEN as usize + 6 + 3;
        assert_eq!(&bytes[cd_start..cd_start + 4], &CENTRAL_HEADER_SIG.to_le_bytes());
        let eocd = &bytes[bytes.len() - 22..];
        let cd_size = u32::from_le_bytes([eocd[12], eocd[13], eocd[14], eocd[15]]);
        let cd_offset = u32::from_le_bytes([eocd[16], eocd[17], eocd[18], eocd[19]]);
        assert_eq!(cd_offset as usize, cd_start);
        assert_eq!(cd_size as u64, 2 * CENTRAL_HEADER_LEN + 5 + 6);
        assert_eq!(summary.len as usize, bytes.len());
    }

    #[test]
    fn test_non_ascii_name_sets_utf8_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "entrée.mp4", b"x");
        let (bytes, _) = build(&[Some(ArchiveSource::from_path(&path, 0))]);
        let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
        assert_eq!(flags & FLAG_UTF8, FLAG_UTF8);

        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(zip.by_index(0).unwrap().name(), "entrée.mp4");
    }

    #[test]
    fn test_dos_date_time_encoding() {
        let ts = Local
            .with_ymd_and_hms(2024, 3, 15, 13, 45, 31)
            .single()
            .unwrap()
            .timestamp();
        let (time, date) = dos_date_time(ts);
        assert_eq!(time, (13 << 11) | (45 << 5) | 15);
        assert_eq!(date, (44 << 9) | (3 << 5) | 15);
    }

    #[test]
    fn test_dos_date_time_clamps_before_1980() {
        assert_eq!(dos_date_time(0), (0, (1 << 5) | 1));
    }

    #[test]
    fn test_artifact_file_removed_on_last_drop() {
        let dir = tempfile::tempdir().unwrap();
        let temp = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        let path = temp.path().to_path_buf();
        let artifact = ArchiveArtifact::new(temp.into_temp_path(), 0);
        let held = Arc::clone(&artifact);
        drop(artifact);
        assert!(path.exists());
        drop(held);
        assert!(!path.exists());
    }
}
