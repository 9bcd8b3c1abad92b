//! Byte pipes built from semaphores.
//!
//! A [`Pipe`] is a fixed ring of [`PIPE_BUFFER_SIZE`] bytes and four
//! semaphores:
//!
//! - `lock` (one unit, inside [`SemLock`]) guards the ring indices.
//! - `free` counts empty bytes; writers take units from it.
//! - `data` counts buffered bytes; readers take units from it.
//! - `hangup` gets a single unit when the last writer closes.
//!
//! Outside the ring lock, `free + data == PIPE_BUFFER_SIZE` until one side
//! closes. Closing the last reader terminates `free`, so writers fail with
//! [`IpcError::BrokenPipe`] and get [`Signal::PIPE`]; closing the last writer
//! terminates `data`, so readers drain what is left and then see end of file.
//!
//! Two more semaphores latch once the first read or write end is opened.
//! Named-pipe opens sleep on the opposite latch until the peer arrives.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use halcyon_core::config::PIPE_BUFFER_SIZE;
use halcyon_core::sched::Dispatcher;
use halcyon_core::signal::Signal;
use halcyon_core::sync::{CountingSemaphore, SemLock, WaitFlags, WaitQueueSemaphore};

use crate::error::IpcError;
use crate::file::{FileObject, OpenFlags, PollEvents, PollSources};

#[expect(clippy::cast_possible_truncation, reason = "PIPE_BUFFER_SIZE fits in u32")]
const CAPACITY_UNITS: u32 = PIPE_BUFFER_SIZE as u32;

/// Creates an anonymous pipe and returns its two ends.
pub fn pipe(dispatcher: &'static Dispatcher) -> (PipeReader, PipeWriter) {
    let pipe = Pipe::new(dispatcher);
    (pipe.reader(), pipe.writer())
}

/// The ring. Only its indices need the lock; occupancy lives in the
/// semaphores.
struct Ring {
    bytes: Box<[u8]>,
    head: usize,
    tail: usize,
    len: usize,
}

impl Ring {
    fn new() -> Self {
        Self {
            bytes: alloc::vec![0u8; PIPE_BUFFER_SIZE].into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Appends all of `src`. The caller holds `src.len()` units of `free`.
    fn push(&mut self, src: &[u8]) {
        let cap = self.bytes.len();
        debug_assert!(self.len + src.len() <= cap, "pipe ring overrun");
        let first = src.len().min(cap - self.tail);
        let (front, back) = src.split_at(first);
        self.bytes[self.tail..self.tail + first].copy_from_slice(front);
        self.bytes[..back.len()].copy_from_slice(back);
        self.tail = (self.tail + src.len()) % cap;
        self.len += src.len();
    }

    /// Fills all of `dst`. The caller holds `dst.len()` units of `data`.
    fn pop(&mut self, dst: &mut [u8]) {
        let cap = self.bytes.len();
        debug_assert!(dst.len() <= self.len, "pipe ring underrun");
        let first = dst.len().min(cap - self.head);
        let (front, back) = dst.split_at_mut(first);
        front.copy_from_slice(&self.bytes[self.head..self.head + first]);
        back.copy_from_slice(&self.bytes[..back.len()]);
        self.head = (self.head + dst.len()) % cap;
        self.len -= dst.len();
    }
}

/// Shared state of both ends.
pub struct Pipe {
    dispatcher: &'static Dispatcher,
    ring: SemLock<Ring>,
    free: WaitQueueSemaphore,
    data: WaitQueueSemaphore,
    hangup: WaitQueueSemaphore,
    read_open: WaitQueueSemaphore,
    write_open: WaitQueueSemaphore,
    readers: AtomicUsize,
    writers: AtomicUsize,
}

impl Pipe {
    /// Creates an empty pipe with no ends open.
    pub fn new(dispatcher: &'static Dispatcher) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            ring: SemLock::new(dispatcher, Ring::new()),
            free: WaitQueueSemaphore::new(dispatcher, CAPACITY_UNITS),
            data: WaitQueueSemaphore::new(dispatcher, 0),
            hangup: WaitQueueSemaphore::new(dispatcher, 0),
            read_open: WaitQueueSemaphore::new(dispatcher, 0),
            write_open: WaitQueueSemaphore::new(dispatcher, 0),
            readers: AtomicUsize::new(0),
            writers: AtomicUsize::new(0),
        })
    }

    /// Opens a read end and latches `read_open`.
    pub fn reader(self: &Arc<Self>) -> PipeReader {
        self.readers.fetch_add(1, Ordering::AcqRel);
        latch(&self.read_open);
        PipeReader(Arc::clone(self))
    }

    /// Opens a write end and latches `write_open`.
    pub fn writer(self: &Arc<Self>) -> PipeWriter {
        self.writers.fetch_add(1, Ordering::AcqRel);
        latch(&self.write_open);
        PipeWriter(Arc::clone(self))
    }

    /// Sleeps until a read end has been opened at least once.
    ///
    /// # Errors
    ///
    /// [`IpcError::NoReader`] if none has and `flags` has
    /// [`WaitFlags::NONBLOCK`]; [`IpcError::Interrupted`] on a signal with
    /// [`WaitFlags::INTERRUPTIBLE`].
    pub fn wait_for_reader(&self, flags: WaitFlags) -> Result<(), IpcError> {
        if wait_latch(&self.read_open, flags)? {
            Ok(())
        } else {
            Err(IpcError::NoReader)
        }
    }

    /// Sleeps until a write end has been opened at least once.
    ///
    /// # Errors
    ///
    /// [`IpcError::WouldBlock`] if none has and `flags` has
    /// [`WaitFlags::NONBLOCK`]; [`IpcError::Interrupted`] on a signal with
    /// [`WaitFlags::INTERRUPTIBLE`].
    pub fn wait_for_writer(&self, flags: WaitFlags) -> Result<(), IpcError> {
        if wait_latch(&self.write_open, flags)? {
            Ok(())
        } else {
            Err(IpcError::WouldBlock)
        }
    }

    /// Reads up to `buf.len()` bytes, sleeping until at least one is
    /// buffered. `Ok(0)` means every writer has closed and the ring is empty.
    ///
    /// # Errors
    ///
    /// [`IpcError::WouldBlock`] with [`WaitFlags::NONBLOCK`] and nothing
    /// buffered, [`IpcError::Interrupted`] with
    /// [`WaitFlags::INTERRUPTIBLE`] and a signal pending.
    pub fn read(&self, buf: &mut [u8], flags: WaitFlags) -> Result<usize, IpcError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.data.acquire_many(buf.len(), flags, None)?;
        if n == 0 {
            return Ok(0);
        }
        self.ring.lock().pop(&mut buf[..n]);
        self.free.release(units(n));
        Ok(n)
    }

    /// Writes all of `buf`, sleeping whenever the ring is full.
    ///
    /// If the wait is cut short after some bytes went in, the count so far
    /// is returned instead of the error.
    ///
    /// # Errors
    ///
    /// [`IpcError::BrokenPipe`] once every reader has closed, after sending
    /// [`Signal::PIPE`] to the caller. [`IpcError::WouldBlock`] or
    /// [`IpcError::Interrupted`] as for [`read`](Self::read).
    pub fn write(&self, buf: &[u8], flags: WaitFlags) -> Result<usize, IpcError> {
        let mut done = 0;
        while done < buf.len() {
            if self.readers() == 0 {
                return self.broken(done);
            }
            let n = match self.free.acquire_many(buf.len() - done, flags, None) {
                Ok(0) => return self.broken(done),
                Ok(n) => n,
                Err(err) => return partial(done, err.into()),
            };

            let mut ring = self.ring.lock();
            // The last reader may have left while we slept.
            if self.readers() == 0 || self.free.is_terminated() {
                drop(ring);
                self.free.release(units(n));
                return self.broken(done);
            }
            ring.push(&buf[done..done + n]);
            drop(ring);
            self.data.release(units(n));
            done += n;
        }
        Ok(done)
    }

    fn broken(&self, done: usize) -> Result<usize, IpcError> {
        if done > 0 {
            return Ok(done);
        }
        let scheduler = self.dispatcher.scheduler();
        scheduler.send_signal(scheduler.current(), Signal::PIPE);
        Err(IpcError::BrokenPipe)
    }

    /// Sleeps until the last writer has closed.
    ///
    /// # Errors
    ///
    /// [`IpcError::TimedOut`] once `timeout` (nanoseconds) has elapsed, or
    /// [`IpcError::Interrupted`] on a signal.
    pub fn wait_hangup(&self, timeout: Option<u64>) -> Result<(), IpcError> {
        self.hangup.acquire_many(1, WaitFlags::INTERRUPTIBLE, timeout)?;
        // Put the unit back so every watcher sees it.
        self.hangup.release(1);
        Ok(())
    }

    /// Bytes buffered right now.
    pub fn buffered(&self) -> usize {
        self.data.available() as usize
    }

    /// Bytes that could be written right now.
    pub fn space(&self) -> usize {
        self.free.available() as usize
    }

    /// Readiness as seen from either end.
    pub fn poll(&self) -> PollEvents {
        let mut events = PollEvents::empty();
        if self.data.available() > 0 || self.data.is_terminated() {
            events |= PollEvents::READABLE;
        }
        if self.free.available() > 0 && !self.free.is_terminated() {
            events |= PollEvents::WRITABLE;
        }
        if self.hangup.available() > 0 || self.free.is_terminated() {
            events |= PollEvents::HANGUP;
        }
        events
    }

    /// Semaphores behind [`poll`](Self::poll), for sleeping until it changes.
    pub fn poll_sources(&self) -> PollSources<'_> {
        PollSources {
            readable: Some(&self.data),
            writable: Some(&self.free),
            hangup: Some(&self.hangup),
        }
    }

    /// Open read ends.
    pub fn readers(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    /// Open write ends.
    pub fn writers(&self) -> usize {
        self.writers.load(Ordering::Acquire)
    }

    /// Returns `true` once the last reader has closed.
    pub fn read_side_closed(&self) -> bool {
        self.free.is_terminated()
    }

    /// Returns `true` once the last writer has closed.
    pub fn write_side_closed(&self) -> bool {
        self.data.is_terminated()
    }

    fn close_reader(&self) {
        if self.readers.fetch_sub(1, Ordering::AcqRel) == 1 && !self.free.is_terminated() {
            halcyon_core::kdebug!("pipe", "last reader closed");
            self.free.terminate();
        }
    }

    fn close_writer(&self) {
        if self.writers.fetch_sub(1, Ordering::AcqRel) == 1 && !self.data.is_terminated() {
            halcyon_core::kdebug!("pipe", "last writer closed");
            self.data.terminate();
            self.hangup.release(1);
        }
    }
}

fn units(n: usize) -> u32 {
    // Transfers never exceed the ring capacity.
    u32::try_from(n).unwrap_or(CAPACITY_UNITS)
}

fn latch(open: &WaitQueueSemaphore) {
    if open.available() == 0 {
        open.release(1);
    }
}

/// `Ok(false)` only when `flags` has [`WaitFlags::NONBLOCK`].
fn wait_latch(open: &WaitQueueSemaphore, flags: WaitFlags) -> Result<bool, IpcError> {
    let mut ready = [false];
    let found = WaitQueueSemaphore::poll(&[open], &mut ready, flags, None)?;
    Ok(found > 0)
}

fn partial(done: usize, err: IpcError) -> Result<usize, IpcError> {
    if done > 0 { Ok(done) } else { Err(err) }
}

fn wait_flags(flags: OpenFlags) -> WaitFlags {
    if flags.contains(OpenFlags::NONBLOCK) {
        WaitFlags::INTERRUPTIBLE | WaitFlags::NONBLOCK
    } else {
        WaitFlags::INTERRUPTIBLE
    }
}

/// Read end of a pipe.
pub struct PipeReader(Arc<Pipe>);

/// Write end of a pipe.
pub struct PipeWriter(Arc<Pipe>);

impl PipeReader {
    /// The pipe this end belongs to.
    pub fn pipe(&self) -> &Arc<Pipe> {
        &self.0
    }
}

impl PipeWriter {
    /// The pipe this end belongs to.
    pub fn pipe(&self) -> &Arc<Pipe> {
        &self.0
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.0.close_reader();
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.0.close_writer();
    }
}

impl FileObject for PipeReader {
    fn read(&self, buf: &mut [u8], flags: OpenFlags) -> Result<usize, IpcError> {
        self.0.read(buf, wait_flags(flags))
    }

    fn poll(&self) -> PollEvents {
        self.0.poll()
    }

    fn poll_sources(&self) -> PollSources<'_> {
        self.0.poll_sources()
    }
}

impl FileObject for PipeWriter {
    fn write(&self, buf: &[u8], flags: OpenFlags) -> Result<usize, IpcError> {
        self.0.write(buf, wait_flags(flags))
    }

    fn poll(&self) -> PollEvents {
        self.0.poll()
    }

    fn poll_sources(&self) -> PollSources<'_> {
        self.0.poll_sources()
    }
}
