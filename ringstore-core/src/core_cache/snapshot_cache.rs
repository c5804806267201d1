/*
    snapshot_cache.rs - Count-prefixed record cache on disk

    File layout:
    [Magic: 8 bytes "RSCACHE1"][Version: 1 byte][Count: u32 LE]
    then Count frames of [len: u32 LE][bincode payload: len][crc32: u32 LE]

    Writes go to a temp sibling and are renamed into place, so a cache
    either holds a complete previous generation or a complete new one.
*/

use super::{CacheError, CacheResult};
use crate::metrics::{record_counter, CACHE_ENTRIES_WRITTEN};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Borrow;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MAGIC: &[u8; 8] = b"RSCACHE1";
const FORMAT_VERSION: u8 = 1;

/// Upper bound on one frame. The writer refuses larger entries, the reader
/// treats larger lengths as a corrupted header.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Named cache file holding records of type `T`
#[derive(Debug, Clone)]
pub struct SnapshotCache<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SnapshotCache<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(cache_dir: impl AsRef<Path>, name: &str) -> Self {
        Self {
            path: cache_dir.as_ref().join(name),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Drain `items` into the cache, replacing any previous content.
    ///
    /// Fails with [`CacheError::CountMismatch`] if `items` does not yield
    /// exactly `expected_count` records; the previous file is kept then.
    pub fn write_cache<I, B>(&self, expected_count: usize, items: I) -> CacheResult<usize>
    where
        I: IntoIterator<Item = B>,
        B: Borrow<T>,
    {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let count = u32::try_from(expected_count).map_err(|_| {
            CacheError::Serialization(format!("{} entries exceed the cache limit", expected_count))
        })?;

        let temp_path = self.path.with_extension("tmp");
        let written = match write_frames::<T, _, _>(&temp_path, count, items) {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(e);
            }
        };

        if written != expected_count {
            let _ = fs::remove_file(&temp_path);
            return Err(CacheError::CountMismatch {
                expected: expected_count,
                actual: written,
            });
        }

        fs::rename(&temp_path, &self.path)?;
        debug!(path = %self.path.display(), entries = written, "Wrote snapshot cache");
        record_counter(CACHE_ENTRIES_WRITTEN, written as u64);
        Ok(written)
    }

    /// Open the cache for a single forward pass.
    ///
    /// With `allow_missing`, a missing file reads as an empty cache.
    pub fn read_cache(&self, allow_missing: bool) -> CacheResult<CacheReader<T>> {
        match File::open(&self.path) {
            Ok(file) => CacheReader::from_reader(BufReader::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if allow_missing {
                    Ok(CacheReader::empty())
                } else {
                    Err(CacheError::NotFound(self.path.clone()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the cache file. A missing file is not an error.
    pub fn delete(&self) -> CacheResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Cache already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn write_frames<T, I, B>(path: &Path, count: u32, items: I) -> CacheResult<usize>
where
    T: Serialize,
    I: IntoIterator<Item = B>,
    B: Borrow<T>,
{
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(MAGIC)?;
    writer.write_all(&[FORMAT_VERSION])?;
    writer.write_all(&count.to_le_bytes())?;

    let mut written = 0usize;
    for item in items {
        let payload = bincode::serialize(item.borrow())?;
        let too_large = || CacheError::EntryTooLarge {
            index: written,
            len: payload.len(),
            max: MAX_FRAME_LEN,
        };
        if payload.len() > MAX_FRAME_LEN {
            return Err(too_large());
        }
        let len = u32::try_from(payload.len()).map_err(|_| too_large())?;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&payload)?;
        writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
        written += 1;
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(written)
}

/// Forward-only reader over a cache; knows its declared size up front
pub struct CacheReader<T, R = BufReader<File>> {
    reader: Option<R>,
    size: usize,
    consumed: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T, R> CacheReader<T, R>
where
    T: DeserializeOwned,
    R: Read,
{
    /// Parse the header from `reader`; entries are decoded lazily
    pub fn from_reader(mut reader: R) -> CacheResult<Self> {
        let mut header = [0u8; 13];
        reader.read_exact(&mut header).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => CacheError::Corrupted("truncated header".to_string()),
            _ => CacheError::Io(e),
        })?;

        if &header[0..8] != MAGIC {
            return Err(CacheError::Corrupted("invalid magic header".to_string()));
        }
        if header[8] != FORMAT_VERSION {
            return Err(CacheError::Corrupted(format!(
                "unsupported version {}",
                header[8]
            )));
        }
        let size = u32::from_le_bytes([header[9], header[10], header[11], header[12]]) as usize;

        Ok(Self {
            reader: Some(reader),
            size,
            consumed: 0,
            _marker: PhantomData,
        })
    }

    fn empty() -> Self {
        Self {
            reader: None,
            size: 0,
            consumed: 0,
            _marker: PhantomData,
        }
    }

    /// Declared number of entries
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn remaining(&self) -> usize {
        self.size - self.consumed
    }

    pub fn read_next(&mut self) -> CacheResult<T> {
        let index = self.consumed;
        let reader = match self.reader.as_mut() {
            Some(reader) if index < self.size => reader,
            _ => return Err(CacheError::Exhausted { size: self.size }),
        };

        let truncated = |e: io::Error| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                CacheError::Corrupted(format!("truncated entry {}", index))
            }
            _ => CacheError::Io(e),
        };

        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).map_err(truncated)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(CacheError::Corrupted(format!(
                "entry {} claims {} bytes",
                index, len
            )));
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).map_err(truncated)?;

        let mut crc_buf = [0u8; 4];
        reader.read_exact(&mut crc_buf).map_err(truncated)?;
        if crc32fast::hash(&payload) != u32::from_le_bytes(crc_buf) {
            return Err(CacheError::Corrupted(format!(
                "invalid checksum at entry {}",
                index
            )));
        }

        self.consumed += 1;
        Ok(bincode::deserialize(&payload)?)
    }
}

impl<T, R> Iterator for CacheReader<T, R>
where
    T: DeserializeOwned,
    R: Read,
{
    type Item = CacheResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.consumed >= self.size {
            return None;
        }
        let item = self.read_next();
        if item.is_err() {
            // Frames after a bad one cannot be located
            self.reader = None;
            self.consumed = self.size;
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}
