//! Background disk writer.
//!
//! A single dedicated thread performs every physical write. Producers send
//! commands over a bounded channel; the thread writes pages at their target
//! position and, once the queue is drained, syncs the touched files, drops
//! the page handles it was holding and acknowledges pending flushes.
//!
//! ```text
//!   commit / safepoint / checkpoint
//!            │  WriterCommand::Write(SharedPage)
//!            ▼
//!   ┌──────────────────┐   drained?   ┌──────────────┐
//!   │  mpsc channel    │ ───────────► │  sync files  │──► ack Flush waiters
//!   └──────────────────┘              └──────────────┘
//! ```
//!
//! Holding the `SharedPage` until after the sync keeps the cached copy
//! pinned, so readers can never reload a position the file does not yet
//! contain.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use tessera_common::constants::PAGE_SIZE;
use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::FileOrigin;

use crate::buffer::SharedPage;

/// Maximum commands buffered before producers block.
const QUEUE_CAPACITY: usize = 1024;

/// Commands accepted by the writer thread.
#[derive(Debug)]
pub(crate) enum WriterCommand {
    /// Write a page at its own origin and position.
    Write(SharedPage),
    /// Resize a file to the given number of bytes.
    SetLength(FileOrigin, u64),
    /// Acknowledge once everything queued before it is durable.
    Flush(SyncSender<TesseraResult<()>>),
    /// Drain the queue, sync, and stop.
    Shutdown,
}

/// First I/O failure seen by the writer. Every later acknowledgment
/// reports it.
#[derive(Debug, Clone)]
struct Failure {
    kind: io::ErrorKind,
    message: String,
}

impl Failure {
    fn to_error(&self) -> TesseraError {
        io::Error::new(self.kind, self.message.clone()).into()
    }
}

/// Handle to the writer thread.
#[derive(Debug)]
pub struct DiskWriterQueue {
    sender: Mutex<Option<SyncSender<WriterCommand>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    failure: Arc<Mutex<Option<Failure>>>,
    pages_written: Arc<AtomicU64>,
}

impl DiskWriterQueue {
    /// Starts the writer thread over the two write handles.
    pub fn start(data: File, log: File) -> TesseraResult<Self> {
        let (sender, receiver) = mpsc::sync_channel(QUEUE_CAPACITY);
        let failure = Arc::new(Mutex::new(None));
        let pages_written = Arc::new(AtomicU64::new(0));

        let mut worker = Worker {
            data,
            log,
            receiver,
            failure: Arc::clone(&failure),
            pages_written: Arc::clone(&pages_written),
        };
        let handle = thread::Builder::new()
            .name("tessera-writer".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            failure,
            pages_written,
        })
    }

    fn send(&self, command: WriterCommand) -> TesseraResult<()> {
        self.check()?;
        let sender = self.sender.lock().clone().ok_or(TesseraError::EngineClosed)?;
        sender
            .send(command)
            .map_err(|_| TesseraError::internal("disk writer thread has stopped"))
    }

    /// Returns the sticky I/O failure, if any.
    pub fn check(&self) -> TesseraResult<()> {
        match &*self.failure.lock() {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    /// Queues a page write. The handle keeps the page pinned until durable.
    pub(crate) fn enqueue(&self, page: SharedPage) -> TesseraResult<()> {
        self.send(WriterCommand::Write(page))
    }

    /// Queues a file resize.
    pub(crate) fn set_length(&self, origin: FileOrigin, bytes: u64) -> TesseraResult<()> {
        self.send(WriterCommand::SetLength(origin, bytes))
    }

    /// Blocks until everything queued so far is on stable storage.
    pub fn wait(&self) -> TesseraResult<()> {
        let (ack, done) = mpsc::sync_channel(1);
        self.send(WriterCommand::Flush(ack))?;
        done.recv()
            .map_err(|_| TesseraError::internal("disk writer thread has stopped"))?
    }

    /// Pages written since start.
    pub fn pages_written(&self) -> u64 {
        self.pages_written.load(Ordering::Relaxed)
    }

    /// Drains the queue and stops the thread.
    pub fn shutdown(&self) -> TesseraResult<()> {
        let Some(sender) = self.sender.lock().take() else {
            return Ok(());
        };
        let _ = sender.send(WriterCommand::Shutdown);
        drop(sender);
        if let Some(handle) = self.handle.lock().take() {
            handle
                .join()
                .map_err(|_| TesseraError::internal("disk writer thread panicked"))?;
        }
        self.check()
    }
}

impl Drop for DiskWriterQueue {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "disk writer shutdown failed");
        }
    }
}

struct Worker {
    data: File,
    log: File,
    receiver: Receiver<WriterCommand>,
    failure: Arc<Mutex<Option<Failure>>>,
    pages_written: Arc<AtomicU64>,
}

#[derive(Default)]
struct Batch {
    pinned: Vec<SharedPage>,
    waiters: Vec<SyncSender<TesseraResult<()>>>,
    data_dirty: bool,
    log_dirty: bool,
    shutdown: bool,
}

impl Worker {
    fn run(&mut self) {
        debug!("disk writer started");
        loop {
            let Ok(first) = self.receiver.recv() else {
                break;
            };
            let mut batch = Batch::default();
            let mut next = Some(first);
            while let Some(command) = next.take() {
                self.process(command, &mut batch);
                next = match self.receiver.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => {
                        batch.shutdown = true;
                        None
                    }
                };
            }
            self.complete(batch.data_dirty, batch.log_dirty);

            let result = match &*self.failure.lock() {
                Some(failure) => Err(failure.clone()),
                None => Ok(()),
            };
            trace!(pages = batch.pinned.len(), "write batch durable");
            drop(batch.pinned);
            for waiter in batch.waiters {
                let _ = waiter.send(result.clone().map_err(|f| f.to_error()));
            }
            if batch.shutdown {
                break;
            }
        }
        debug!("disk writer stopped");
    }

    fn file(&mut self, origin: FileOrigin) -> &mut File {
        match origin {
            FileOrigin::Data => &mut self.data,
            FileOrigin::Log => &mut self.log,
        }
    }

    fn process(&mut self, command: WriterCommand, batch: &mut Batch) {
        let failed = self.failure.lock().is_some();
        match command {
            WriterCommand::Write(page) => {
                if !failed {
                    let origin = page.origin();
                    let offset = u64::from(page.position()) * PAGE_SIZE as u64;
                    let result = {
                        let file = self.file(origin);
                        file.seek(SeekFrom::Start(offset))
                            .and_then(|_| file.write_all(&page))
                    };
                    match result {
                        Ok(()) => {
                            self.pages_written.fetch_add(1, Ordering::Relaxed);
                            match origin {
                                FileOrigin::Data => batch.data_dirty = true,
                                FileOrigin::Log => batch.log_dirty = true,
                            }
                        }
                        Err(e) => self.fail(&e),
                    }
                }
                batch.pinned.push(page);
            }
            WriterCommand::SetLength(origin, bytes) => {
                if !failed {
                    match self.file(origin).set_len(bytes) {
                        Ok(()) => match origin {
                            FileOrigin::Data => batch.data_dirty = true,
                            FileOrigin::Log => batch.log_dirty = true,
                        },
                        Err(e) => self.fail(&e),
                    }
                }
            }
            WriterCommand::Flush(ack) => batch.waiters.push(ack),
            WriterCommand::Shutdown => batch.shutdown = true,
        }
    }

    fn complete(&mut self, data_dirty: bool, log_dirty: bool) {
        if self.failure.lock().is_some() {
            return;
        }
        let result = (if log_dirty { self.log.sync_data() } else { Ok(()) })
            .and_then(|()| if data_dirty { self.data.sync_data() } else { Ok(()) });
        if let Err(e) = result {
            self.fail(&e);
        }
    }

    fn fail(&self, e: &io::Error) {
        error!(error = %e, "disk writer failed");
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(Failure {
                kind: e.kind(),
                message: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{CacheConfig, MemoryCache};
    use std::fs::OpenOptions;
    use std::path::Path;

    fn open_rw(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .unwrap()
    }

    fn page(cache: &MemoryCache, origin: FileOrigin, position: u32, fill: u8) -> SharedPage {
        let mut page = cache.new_page();
        page.fill(fill);
        cache.mark_as_read_only(page, origin, position)
    }

    fn assert_pages(path: &Path, fills: &[u8]) {
        let bytes = std::fs::read(path).unwrap();
        assert_eq!(bytes.len(), fills.len() * PAGE_SIZE);
        for (chunk, &fill) in bytes.chunks(PAGE_SIZE).zip(fills) {
            assert!(chunk.iter().all(|&b| b == fill));
        }
    }

    #[test]
    fn test_flush_waits_for_queued_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (data, log) = (dir.path().join("w.db"), dir.path().join("w.db-log"));
        let writer = DiskWriterQueue::start(open_rw(&data), open_rw(&log)).unwrap();
        let cache = MemoryCache::new(CacheConfig::new());

        for position in 0..3u32 {
            writer
                .enqueue(page(&cache, FileOrigin::Log, position, position as u8 + 1))
                .unwrap();
        }
        writer.wait().unwrap();

        assert_pages(&log, &[1, 2, 3]);
        assert_eq!(writer.pages_written(), 3);
        assert_eq!(std::fs::metadata(&data).unwrap().len(), 0);
    }

    #[test]
    fn test_page_pinned_until_written() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DiskWriterQueue::start(
            open_rw(&dir.path().join("p.db")),
            open_rw(&dir.path().join("p.db-log")),
        )
        .unwrap();
        let cache = MemoryCache::new(CacheConfig::new());

        let shared = page(&cache, FileOrigin::Data, 0, 9);
        writer.enqueue(shared.clone()).unwrap();
        writer.wait().unwrap();

        // Only this handle is left once the batch is durable.
        assert_eq!(shared.share_counter(), 1);
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("s.db");
        let writer = DiskWriterQueue::start(open_rw(&data), open_rw(&dir.path().join("s.db-log")))
            .unwrap();
        let cache = MemoryCache::new(CacheConfig::new());

        let fills: Vec<u8> = (10..18).collect();
        for (position, &fill) in fills.iter().enumerate() {
            writer
                .enqueue(page(&cache, FileOrigin::Data, position as u32, fill))
                .unwrap();
        }
        writer.shutdown().unwrap();

        assert_pages(&data, &fills);
        assert_eq!(writer.pages_written(), 8);
        assert!(matches!(
            writer.enqueue(page(&cache, FileOrigin::Data, 8, 0)),
            Err(TesseraError::EngineClosed)
        ));
        assert!(matches!(writer.wait(), Err(TesseraError::EngineClosed)));
        writer.shutdown().unwrap();
    }

    #[test]
    fn test_failure_is_sticky() {
        let dir = tempfile::tempdir().unwrap();
        let (data, log) = (dir.path().join("f.db"), dir.path().join("f.db-log"));
        File::create(&data).unwrap();
        File::create(&log).unwrap();
        let writer =
            DiskWriterQueue::start(File::open(&data).unwrap(), File::open(&log).unwrap()).unwrap();
        let cache = MemoryCache::new(CacheConfig::new());

        writer.enqueue(page(&cache, FileOrigin::Log, 0, 1)).unwrap();
        let first = writer.wait().unwrap_err();
        assert!(matches!(first, TesseraError::Io { .. }));
        assert!(first.is_fatal());
        assert!(matches!(writer.check(), Err(TesseraError::Io { .. })));
        assert!(matches!(writer.wait(), Err(TesseraError::Io { .. })));

        assert!(writer.enqueue(page(&cache, FileOrigin::Log, 1, 2)).is_err());
        assert!(writer.set_length(FileOrigin::Log, PAGE_SIZE as u64).is_err());
        assert!(matches!(writer.shutdown(), Err(TesseraError::Io { .. })));
        assert_eq!(writer.pages_written(), 0);
        assert_eq!(std::fs::metadata(&log).unwrap().len(), 0);
    }

    #[test]
    fn test_failed_resize_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (data, log) = (dir.path().join("r.db"), dir.path().join("r.db-log"));
        File::create(&data).unwrap();
        File::create(&log).unwrap();
        let writer =
            DiskWriterQueue::start(File::open(&data).unwrap(), File::open(&log).unwrap()).unwrap();

        writer.set_length(FileOrigin::Log, PAGE_SIZE as u64).unwrap();
        assert!(matches!(writer.wait(), Err(TesseraError::Io { .. })));
        assert!(matches!(writer.check(), Err(TesseraError::Io { .. })));
        assert!(writer.set_length(FileOrigin::Log, 0).is_err());
    }
}
