// LogTrawl - core/archive.rs
//
// Byte blobs, content handles, and tar/zip container probing.
//
// A blob is a shared view over a memory-mapped file or an owned buffer, so
// tar members are plain sub-slices of their archive and nested archives can
// be opened without touching the disk. Zip members are compressed, so their
// handle keeps the archive blob plus the entry index and inflates on open.

use crate::core::model::SourceKind;
use crate::platform::fs::epoch_to_local;
use crate::util::constants;
use chrono::{NaiveDate, NaiveDateTime};
use flate2::read::GzDecoder;
use memmap2::Mmap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::ZipArchive;

// =============================================================================
// Blob
// =============================================================================

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Mapped(m) => &m[..],
            Self::Owned(v) => v.as_slice(),
        }
    }
}

/// Cheaply clonable, read-only byte range.
#[derive(Clone)]
pub struct Blob {
    backing: Arc<Backing>,
    range: Range<usize>,
}

impl Blob {
    /// Memory-map a file. Empty files are backed by an empty buffer since
    /// zero-length mappings are rejected on some platforms.
    pub fn map_file(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Self::from_vec(Vec::new()));
        }
        // SAFETY: the mapping is read-only. Log bundles are not expected to be
        // modified while a scan runs; if one is, the worst outcome is garbled
        // lines, which lossy decoding already tolerates.
        let map = unsafe { Mmap::map(&file)? };
        let len = map.len();
        Ok(Self {
            backing: Arc::new(Backing::Mapped(map)),
            range: 0..len,
        })
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            backing: Arc::new(Backing::Owned(data)),
            range: 0..len,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.backing.bytes()[self.range.clone()]
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Sub-range `offset..offset + len` of this blob, sharing its backing.
    pub fn slice(&self, offset: usize, len: usize) -> Option<Self> {
        let start = self.range.start.checked_add(offset)?;
        let end = start.checked_add(len)?;
        if end > self.range.end {
            return None;
        }
        Some(Self {
            backing: Arc::clone(&self.backing),
            range: start..end,
        })
    }
}

impl AsRef<[u8]> for Blob {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blob({} bytes)", self.len())
    }
}

// =============================================================================
// Content handles
// =============================================================================

/// Where a discovered file's bytes live.
#[derive(Debug, Clone)]
pub enum ContentHandle {
    /// A plain file on disk.
    Disk(PathBuf),
    /// Bytes already available in memory (tar members, tests).
    Memory(Blob),
    /// A member of a zip archive, inflated on open.
    ZipEntry { archive: Blob, index: usize },
}

impl ContentHandle {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::Memory(Blob::from_vec(data))
    }

    /// Open the content for line reading.
    pub fn open(&self) -> io::Result<Box<dyn BufRead + Send>> {
        match self {
            Self::Disk(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
            Self::Memory(blob) => Ok(Box::new(Cursor::new(blob.clone()))),
            Self::ZipEntry { archive, index } => {
                Ok(Box::new(Cursor::new(read_zip_entry(archive, *index)?)))
            }
        }
    }

    /// Whole content as a blob, for opening nested archives.
    pub fn to_blob(&self) -> io::Result<Blob> {
        match self {
            Self::Disk(path) => Blob::map_file(path),
            Self::Memory(blob) => Ok(blob.clone()),
            Self::ZipEntry { archive, index } => {
                read_zip_entry(archive, *index).map(Blob::from_vec)
            }
        }
    }
}

fn read_zip_entry(archive: &Blob, index: usize) -> io::Result<Vec<u8>> {
    let mut zip = ZipArchive::new(Cursor::new(archive.clone())).map_err(io::Error::other)?;
    let mut entry = zip.by_index(index).map_err(io::Error::other)?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

// =============================================================================
// Archive probing
// =============================================================================

/// A regular file found inside an archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Entry name with `/` separators.
    pub name: String,
    pub modified: NaiveDateTime,
    pub size: u64,
    pub content: ContentHandle,
}

/// Result of a successful probe.
#[derive(Debug)]
pub struct OpenedArchive {
    pub kind: SourceKind,
    pub entries: Vec<ArchiveEntry>,
}

/// Try `blob` as a (possibly gzip-compressed) tar, then as a zip.
///
/// Returns `None` when it is neither. That is expected for arbitrary binaries
/// in a bundle and only logged at debug level.
pub fn open_archive(blob: &Blob) -> Option<OpenedArchive> {
    if let Some(entries) = probe_tar(blob) {
        return Some(OpenedArchive {
            kind: SourceKind::Tar,
            entries,
        });
    }
    probe_zip(blob).map(|entries| OpenedArchive {
        kind: SourceKind::Zip,
        entries,
    })
}

fn probe_tar(blob: &Blob) -> Option<Vec<ArchiveEntry>> {
    let data = if blob.as_bytes().starts_with(&constants::GZIP_MAGIC) {
        let mut decoded = Vec::new();
        if let Err(e) = GzDecoder::new(blob.as_bytes()).read_to_end(&mut decoded) {
            tracing::debug!(error = %e, "Gzip stream could not be decompressed");
            return None;
        }
        Blob::from_vec(decoded)
    } else {
        blob.clone()
    };

    if !has_tar_header(data.as_bytes()) {
        return None;
    }

    let mut archive = tar::Archive::new(data.as_bytes());
    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(error = %e, "Tar entries could not be read");
            return None;
        }
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "Stopping at unreadable tar entry");
                break;
            }
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = match entry.path() {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping tar entry with unreadable name");
                continue;
            }
        };
        let size = entry.size();
        let content = usize::try_from(entry.raw_file_position())
            .ok()
            .zip(usize::try_from(size).ok())
            .and_then(|(offset, len)| data.slice(offset, len));
        let Some(content) = content else {
            tracing::debug!(entry = %name, "Tar entry extends past end of archive");
            continue;
        };
        let modified = entry
            .header()
            .mtime()
            .ok()
            .and_then(epoch_to_local)
            .unwrap_or(NaiveDateTime::MIN);
        found.push(ArchiveEntry {
            name,
            modified,
            size,
            content: ContentHandle::Memory(content),
        });
    }
    Some(found)
}

/// Validate the checksum of the first tar header block. The checksum field
/// itself counts as eight spaces.
fn has_tar_header(bytes: &[u8]) -> bool {
    const CHECKSUM: Range<usize> = 148..156;
    let Some(header) = bytes.get(..constants::TAR_BLOCK_SIZE) else {
        return false;
    };
    let digits: String = header[CHECKSUM]
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| char::from(*b))
        .collect();
    let Ok(stored) = u32::from_str_radix(digits.trim(), 8) else {
        return false;
    };
    let computed: u32 = header
        .iter()
        .enumerate()
        .map(|(i, b)| {
            if CHECKSUM.contains(&i) {
                u32::from(b' ')
            } else {
                u32::from(*b)
            }
        })
        .sum();
    stored == computed
}

fn probe_zip(blob: &Blob) -> Option<Vec<ArchiveEntry>> {
    let mut zip = match ZipArchive::new(Cursor::new(blob.clone())) {
        Ok(zip) => zip,
        Err(e) => {
            tracing::debug!(error = %e, "Not a zip archive");
            return None;
        }
    };

    let mut found = Vec::new();
    for index in 0..zip.len() {
        let file = match zip.by_index_raw(index) {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(index, error = %e, "Skipping unreadable zip entry");
                continue;
            }
        };
        if file.is_dir() {
            continue;
        }
        let modified = file
            .last_modified()
            .and_then(zip_datetime)
            .unwrap_or(NaiveDateTime::MIN);
        found.push(ArchiveEntry {
            name: file.name().replace('\\', "/"),
            modified,
            size: file.size(),
            content: ContentHandle::ZipEntry {
                archive: blob.clone(),
                index,
            },
        });
    }
    Some(found)
}

/// Zip stores a local date-time tuple without timezone; keep it as is.
fn zip_datetime(dt: zip::DateTime) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(
        i32::from(dt.year()),
        u32::from(dt.month()),
        u32::from(dt.day()),
    )?
    .and_hms_opt(
        u32::from(dt.hour()),
        u32::from(dt.minute()),
        u32::from(dt.second()),
    )
}

// =============================================================================
// Tests
// =============================================================================
