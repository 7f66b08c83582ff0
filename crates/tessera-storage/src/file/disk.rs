//! Disk service: the data file, the log file, the memory cache and the
//! writer thread behind one interface.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, info};

use tessera_common::config::EngineConfig;
use tessera_common::constants::PAGE_SIZE;
use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::FileOrigin;

use crate::buffer::{CacheConfig, CacheStats, MemoryCache, SharedPage, WritablePage};
use crate::page::{
    initialize_file_header, map_page_id, validate_file_header, AllocationMapPage, PageHeader,
};

use super::stream_pool::StreamPool;
use super::writer::DiskWriterQueue;

/// Page I/O for one database.
#[derive(Debug)]
pub struct DiskService {
    cache: MemoryCache,
    data: StreamPool,
    log: StreamPool,
    writer: DiskWriterQueue,
    log_end: AtomicU32,
    created: bool,
}

impl DiskService {
    /// Opens (or creates) the data and log files named by `config`.
    ///
    /// A new data file is formatted with a header page and the first
    /// allocation map page before the writer starts.
    pub fn open(config: &EngineConfig) -> TesseraResult<Self> {
        let cache_config = CacheConfig::from(config);
        cache_config
            .validate()
            .map_err(TesseraError::invalid_config)?;

        let data_path = config.filename.clone();
        let log_path = config.log_path();

        let mut data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&data_path)?;
        let created = data_file.metadata()?.len() == 0;
        if created {
            Self::format(&mut data_file)?;
            info!(path = %data_path.display(), "created data file");
        }

        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&log_path)?;
        let log_pages = (log_file.metadata()?.len() / PAGE_SIZE as u64) as u32;

        let service = Self {
            cache: MemoryCache::new(cache_config),
            data: StreamPool::new(&data_path),
            log: StreamPool::new(&log_path),
            writer: DiskWriterQueue::start(data_file, log_file)?,
            log_end: AtomicU32::new(log_pages),
            created,
        };

        if !created {
            let header = service.read_page(FileOrigin::Data, 0)?;
            validate_file_header(&header)?;
        }
        debug!(log_pages, created, "disk service opened");
        Ok(service)
    }

    fn format(file: &mut File) -> TesseraResult<()> {
        let mut pages = vec![0u8; 2 * PAGE_SIZE];
        let (header, map) = pages.split_at_mut(PAGE_SIZE);
        initialize_file_header(header);

        let mut map_page = AllocationMapPage::new(&mut map[..]);
        map_page.initialize(map_page_id(0));
        PageHeader::new(&mut map[..]).update_checksum();

        file.write_all(&pages)?;
        file.sync_all()?;
        Ok(())
    }

    /// True if `open` created a new data file.
    pub fn created(&self) -> bool {
        self.created
    }

    /// The memory cache.
    pub fn cache(&self) -> &MemoryCache {
        &self.cache
    }

    /// Cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn pool(&self, origin: FileOrigin) -> &StreamPool {
        match origin {
            FileOrigin::Data => &self.data,
            FileOrigin::Log => &self.log,
        }
    }

    /// Reads `position` from disk into `buf` and verifies its checksum.
    /// All-zero pages (never written) are accepted as is.
    pub fn read_raw(&self, origin: FileOrigin, position: u32, buf: &mut [u8]) -> TesseraResult<()> {
        self.pool(origin).read_page(position, buf)?;
        if buf.iter().all(|&b| b == 0) {
            return Ok(());
        }
        let header = PageHeader::new(&buf[..]);
        if !header.verify_checksum() {
            return Err(TesseraError::ChecksumMismatch {
                position,
                expected: header.checksum(),
                actual: crate::page::compute_page_checksum(buf, crate::page::CHECKSUM_OFFSET),
            });
        }
        Ok(())
    }

    /// Returns a shared page, reading it on a cache miss.
    pub fn read_page(&self, origin: FileOrigin, position: u32) -> TesseraResult<SharedPage> {
        self.cache
            .get_readable_page(origin, position, |buf| self.read_raw(origin, position, buf))
    }

    /// Returns a private writable copy of a page.
    pub fn read_writable_page(&self, origin: FileOrigin, position: u32) -> TesseraResult<WritablePage> {
        self.cache
            .get_writable_page(origin, position, |buf| self.read_raw(origin, position, buf))
    }

    /// Returns a zeroed writable page.
    pub fn new_page(&self) -> WritablePage {
        self.cache.new_page()
    }

    /// Number of pages in the log.
    pub fn log_length(&self) -> u32 {
        self.log_end.load(Ordering::Acquire)
    }

    /// Appends pages to the log and returns their positions.
    ///
    /// Each page gets its recovery position marker and checksum stamped,
    /// is published to the cache at its log position and queued for
    /// writing. Durability requires a following [`flush`](Self::flush).
    pub fn write_log_pages(&self, pages: Vec<WritablePage>) -> TesseraResult<Vec<u32>> {
        self.writer.check()?;
        let mut positions = Vec::with_capacity(pages.len());
        for mut page in pages {
            let position = self.log_end.fetch_add(1, Ordering::AcqRel);
            let mut header = PageHeader::new(&mut page[..]);
            header.set_position_id(position);
            header.update_checksum();
            let shared = self.cache.mark_as_read_only(page, FileOrigin::Log, position);
            self.writer.enqueue(shared)?;
            positions.push(position);
        }
        Ok(positions)
    }

    /// Writes pages into the data file at their own page id.
    pub fn write_data_pages(&self, pages: Vec<WritablePage>) -> TesseraResult<()> {
        self.writer.check()?;
        for mut page in pages {
            let mut header = PageHeader::new(&mut page[..]);
            let position = header.page_id().as_u32();
            header.set_position_id(position);
            header.update_checksum();
            let shared = self.cache.mark_as_read_only(page, FileOrigin::Data, position);
            self.writer.enqueue(shared)?;
        }
        Ok(())
    }

    /// Blocks until every queued write is durable.
    pub fn flush(&self) -> TesseraResult<()> {
        self.writer.wait()
    }

    /// Cuts the log file down to `pages` pages. Call only while no reader
    /// can reach the removed positions.
    pub fn truncate_log(&self, pages: u32) -> TesseraResult<()> {
        self.writer
            .set_length(FileOrigin::Log, u64::from(pages) * PAGE_SIZE as u64)?;
        self.writer.wait()?;
        self.cache.discard_unused(FileOrigin::Log);
        self.log_end.store(pages, Ordering::Release);
        Ok(())
    }

    /// Pages written by the writer thread since open.
    pub fn pages_written(&self) -> u64 {
        self.writer.pages_written()
    }

    /// Returns the writer's sticky I/O failure, if any.
    pub fn check(&self) -> TesseraResult<()> {
        self.writer.check()
    }

    /// Flushes and stops the writer thread.
    pub fn close(&self) -> TesseraResult<()> {
        let flushed = self.writer.wait();
        let stopped = self.writer.shutdown();
        self.data.clear();
        self.log.clear();
        flushed.and(stopped)
    }
}
