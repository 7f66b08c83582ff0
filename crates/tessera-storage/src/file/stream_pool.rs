//! Pooled read handles for one file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use tessera_common::constants::PAGE_SIZE;
use tessera_common::error::TesseraResult;

/// Rentable read handles over one file.
///
/// Each handle owns its own cursor, so concurrent readers never share a
/// seek position.
#[derive(Debug)]
pub struct StreamPool {
    path: PathBuf,
    idle: Mutex<Vec<File>>,
}

impl StreamPool {
    /// Creates a pool for `path`. Handles are opened lazily.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Path of the pooled file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrows a read handle, opening a new one if none is idle.
    pub fn rent(&self) -> TesseraResult<PooledStream<'_>> {
        let file = match self.idle.lock().pop() {
            Some(file) => file,
            None => OpenOptions::new().read(true).open(&self.path)?,
        };
        Ok(PooledStream {
            pool: self,
            file: Some(file),
        })
    }

    /// Reads the page at `position` into `buf`. Bytes past the end of the
    /// file read as zero. Returns false if the page lies wholly past it.
    pub fn read_page(&self, position: u32, buf: &mut [u8]) -> TesseraResult<bool> {
        let mut stream = self.rent()?;
        let offset = u64::from(position) * PAGE_SIZE as u64;
        let len = stream.metadata()?.len();
        if offset >= len {
            buf.fill(0);
            return Ok(false);
        }
        stream.seek(SeekFrom::Start(offset))?;
        let available = ((len - offset) as usize).min(buf.len());
        stream.read_exact(&mut buf[..available])?;
        buf[available..].fill(0);
        Ok(true)
    }

    /// Closes every idle handle.
    pub fn clear(&self) {
        self.idle.lock().clear();
    }
}

/// A rented handle; returned to the pool on drop.
#[derive(Debug)]
pub struct PooledStream<'a> {
    pool: &'a StreamPool,
    file: Option<File>,
}

impl Deref for PooledStream<'_> {
    type Target = File;

    fn deref(&self) -> &File {
        self.file.as_ref().expect("stream present until drop")
    }
}

impl DerefMut for PooledStream<'_> {
    fn deref_mut(&mut self) -> &mut File {
        self.file.as_mut().expect("stream present until drop")
    }
}

impl Drop for PooledStream<'_> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            self.pool.idle.lock().push(file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_page_zero_fills_past_eof() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![7u8; PAGE_SIZE + 100]).unwrap();
        file.flush().unwrap();
        let pool = StreamPool::new(file.path());

        let mut buf = vec![0xAAu8; PAGE_SIZE];
        assert!(pool.read_page(0, &mut buf).unwrap());
        assert!(buf.iter().all(|&b| b == 7));

        assert!(pool.read_page(1, &mut buf).unwrap());
        assert!(buf[..100].iter().all(|&b| b == 7));
        assert!(buf[100..].iter().all(|&b| b == 0));

        assert!(!pool.read_page(5, &mut buf).unwrap());
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_handles_are_reused() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let pool = StreamPool::new(file.path());
        drop(pool.rent().unwrap());
        drop(pool.rent().unwrap());
        assert_eq!(pool.idle.lock().len(), 1);
        let a = pool.rent().unwrap();
        let b = pool.rent().unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.idle.lock().len(), 2);
    }
}
