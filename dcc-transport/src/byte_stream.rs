//! Single-reader byte stream over an asynchronous link
//!
//! A background task drains the underlying reader into an in-memory queue.
//! Callers then take exact-size chunks out of that queue with
//! [`ByteStream::read`]:
//!
//! ```text
//! device --> reader task --> queue --> read(size) --> caller
//! caller --> write(data) --> writer (flush) --> device
//! ```
//!
//! # Invariants
//! - Queue order is arrival order (FIFO), regardless of how reads split it
//! - At most one read is outstanding; a second one fails immediately
//! - A timed out read leaves the queue untouched
//! - `close()` (or a link failure) fails the pending read instead of leaving it hanging

use crate::stream::StreamAccessor;
use crate::trace::{DebugTrace, TraceDirection};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dcc_core::{DccError, DccResult};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Size of the chunk buffer used by the reader task
const READ_CHUNK_SIZE: usize = 256;

/// Options for a [`ByteStream`]
#[derive(Debug, Clone)]
pub struct ByteStreamOptions {
    /// Name used in log messages, usually the port path
    pub label: String,
    /// Keep a debug trace with this many entries
    pub trace_capacity: Option<usize>,
}

impl Default for ByteStreamOptions {
    fn default() -> Self {
        Self {
            label: "stream".to_string(),
            trace_capacity: None,
        }
    }
}

/// The one outstanding read
#[derive(Debug)]
struct PendingRead {
    id: u64,
    size: usize,
    deadline: Option<Instant>,
    tx: oneshot::Sender<DccResult<Bytes>>,
}

#[derive(Debug, Default)]
struct Inner {
    queue: BytesMut,
    pending: Option<PendingRead>,
    /// Set once the link failed or was closed
    closed: Option<DccError>,
    next_read_id: u64,
    close_requested: bool,
    trace: Option<DebugTrace>,
}

impl Inner {
    /// Hand buffered bytes to the pending read if it can now be satisfied
    fn settle_pending(&mut self) {
        let ready = self
            .pending
            .as_ref()
            .is_some_and(|p| self.queue.len() >= p.size);
        if !ready {
            return;
        }
        if let Some(pending) = self.pending.take() {
            let chunk = self.queue.split_to(pending.size).freeze();
            if let Err(Ok(chunk)) = pending.tx.send(Ok(chunk)) {
                // Reader went away between registering and now; keep its bytes.
                self.unread(&chunk);
            }
        }
    }

    /// Put bytes back at the front of the queue
    fn unread(&mut self, chunk: &[u8]) {
        let mut queue = BytesMut::with_capacity(chunk.len() + self.queue.len());
        queue.extend_from_slice(chunk);
        queue.extend_from_slice(&self.queue);
        self.queue = queue;
    }

    fn fail(&mut self, err: DccError) {
        if self.closed.is_none() {
            self.closed = Some(err.clone());
        }
        if let Some(pending) = self.pending.take() {
            let _ = pending.tx.send(Err(err));
        }
    }

    fn record(&mut self, direction: TraceDirection, data: &[u8]) {
        if let Some(trace) = self.trace.as_mut() {
            trace.record(direction, data);
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Poisoning is ignored: every critical section leaves the queue consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, data: &[u8]) {
        let mut inner = self.lock();
        inner.queue.extend_from_slice(data);
        inner.record(TraceDirection::Received, data);
        inner.settle_pending();
    }
}

/// Removes the pending read registration if the read future is dropped early
struct PendingReadGuard {
    shared: Arc<Shared>,
    id: u64,
    rx: oneshot::Receiver<DccResult<Bytes>>,
    armed: bool,
}

impl PendingReadGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingReadGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.shared.lock();
        if inner.pending.as_ref().is_some_and(|p| p.id == self.id) {
            inner.pending = None;
        } else if let Ok(Ok(chunk)) = self.rx.try_recv() {
            // Settled but never observed by the caller.
            inner.unread(&chunk);
        }
    }
}

/// Single-reader, size-bounded byte stream
pub struct ByteStream {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    label: String,
}

impl ByteStream {
    /// Wrap an open link and start draining it
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S>(stream: S, options: ByteStreamOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);

        let shared = Arc::new(Shared::default());
        {
            let mut inner = shared.lock();
            inner.trace = options.trace_capacity.map(DebugTrace::new);
            inner.record(TraceDirection::Opened, &[]);
        }

        let task = tokio::spawn(pump(shared.clone(), reader, options.label.clone()));
        log::info!("{}: stream opened", options.label);

        Self {
            shared,
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            reader_task: Mutex::new(Some(task)),
            label: options.label,
        }
    }

    /// Number of bytes received but not yet read
    pub fn buffered(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Whether a read is currently outstanding
    pub fn has_pending_read(&self) -> bool {
        self.shared.lock().pending.is_some()
    }

    /// Size and deadline of the outstanding read, if any
    pub fn pending_read(&self) -> Option<(usize, Option<Instant>)> {
        self.shared
            .lock()
            .pending
            .as_ref()
            .map(|p| (p.size, p.deadline))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether a debug trace is being kept
    pub fn trace_enabled(&self) -> bool {
        self.shared.lock().trace.is_some()
    }

    /// Rendered copy of the debug trace, if enabled
    pub fn trace_text(&self) -> Option<String> {
        self.shared.lock().trace.as_ref().map(DebugTrace::render)
    }

    /// Persist the debug trace to `path`
    ///
    /// # Returns
    /// `Ok(false)` when tracing is disabled, `Ok(true)` once written
    pub async fn debug_snapshot(&self, path: impl AsRef<Path>) -> DccResult<bool> {
        let Some(text) = self.trace_text() else {
            return Ok(false);
        };
        tokio::fs::write(path.as_ref(), text).await?;
        log::debug!(
            "{}: debug trace written to {}",
            self.label,
            path.as_ref().display()
        );
        Ok(true)
    }

    fn closed_error(&self) -> Option<DccError> {
        self.shared.lock().closed.clone()
    }
}

/// Reader task: the source of "data" events
async fn pump<R>(shared: Arc<Shared>, mut reader: ReadHalf<R>, label: String)
where
    R: AsyncRead + Send,
{
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                log::warn!("{}: link closed by remote end", label);
                shared.lock().fail(DccError::from(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "link closed by remote end",
                )));
                break;
            }
            Ok(n) => {
                log::trace!("{}: <- {:02X?}", label, &buf[..n]);
                shared.push(&buf[..n]);
            }
            Err(e) => {
                log::error!("{}: read failed: {}", label, e);
                shared.lock().fail(e.into());
                break;
            }
        }
    }
}

#[async_trait]
impl StreamAccessor for ByteStream {
    async fn read(&self, size: usize, timeout: Option<Duration>) -> DccResult<Option<Bytes>> {
        let (id, rx) = {
            let mut inner = self.shared.lock();
            // A lost or closed link fails reads even with bytes still queued.
            if let Some(err) = &inner.closed {
                return Err(err.clone());
            }
            if inner.pending.is_some() {
                return Err(DccError::ReadInProgress);
            }
            if inner.queue.len() >= size {
                return Ok(Some(inner.queue.split_to(size).freeze()));
            }
            let (tx, rx) = oneshot::channel();
            let id = inner.next_read_id;
            inner.next_read_id += 1;
            inner.pending = Some(PendingRead {
                id,
                size,
                deadline: timeout.map(|t| Instant::now() + t),
                tx,
            });
            (id, rx)
        };

        let mut guard = PendingReadGuard {
            shared: self.shared.clone(),
            id,
            rx,
            armed: true,
        };

        let settled = match timeout {
            Some(t) => tokio::time::timeout(t, &mut guard.rx).await.ok(),
            None => Some((&mut guard.rx).await),
        };

        match settled {
            Some(Ok(result)) => {
                guard.disarm();
                result.map(Some)
            }
            Some(Err(_)) => {
                guard.disarm();
                Err(self.closed_error().unwrap_or(DccError::PortClosed))
            }
            None => {
                let mut inner = self.shared.lock();
                guard.disarm();
                if inner.pending.as_ref().is_some_and(|p| p.id == id) {
                    inner.pending = None;
                    return Ok(None);
                }
                drop(inner);
                // Settled at the same moment the timer fired.
                match guard.rx.try_recv() {
                    Ok(result) => result.map(Some),
                    Err(_) => Err(self.closed_error().unwrap_or(DccError::PortClosed)),
                }
            }
        }
    }

    async fn write(&self, data: &[u8]) -> DccResult<()> {
        if let Some(err) = self.closed_error() {
            return Err(err);
        }
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(DccError::PortClosed)?;

        log::trace!("{}: -> {:02X?}", self.label, data);
        self.shared.lock().record(TraceDirection::Sent, data);
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.shared.lock().closed.is_some()
    }

    async fn close(&self) -> DccResult<()> {
        let first_close = {
            let mut inner = self.shared.lock();
            let first = !inner.close_requested;
            inner.close_requested = true;
            inner.fail(DccError::PortClosed);
            if first {
                inner.record(TraceDirection::Closed, &[]);
            }
            first
        };

        let task = self
            .reader_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
            log::info!("{}: stream closed", self.label);
        } else if first_close {
            log::debug!("{}: stream already closed", self.label);
        }
        Ok(())
    }
}

impl Drop for ByteStream {
    fn drop(&mut self) {
        if let Ok(mut task) = self.reader_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}
