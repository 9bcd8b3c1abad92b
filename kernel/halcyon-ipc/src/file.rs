//! Open file descriptions and the per-process descriptor table.
//!
//! An open object is wrapped in a [`FileDescription`] behind an [`Arc`]. The
//! [`FileTable`] maps small integers to those descriptions; duplicating a
//! descriptor takes another reference, closing one drops it, and the object
//! is released when the last reference goes away.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use bitflags::bitflags;
use halcyon_core::id::Fd;
use halcyon_core::sync::WaitQueueSemaphore;

use crate::error::IpcError;
use crate::sync_object::SyncOp;

/// Descriptor limit per table.
pub const MAX_FDS: usize = 256;

bitflags! {
    /// Flags recorded on an open file description.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Open for reading.
        const READ = 1 << 0;
        /// Open for writing.
        const WRITE = 1 << 1;
        /// Fail with `EAGAIN` instead of sleeping.
        const NONBLOCK = 1 << 2;
        /// Close the descriptor on exec.
        const CLOEXEC = 1 << 3;
    }
}

bitflags! {
    /// Readiness reported by [`FileObject::poll`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollEvents: u32 {
        /// A read would not sleep.
        const READABLE = 1 << 0;
        /// A write would not sleep.
        const WRITABLE = 1 << 1;
        /// The other side has gone.
        const HANGUP = 1 << 2;
        /// The descriptor is not open. Only `sys_poll` reports this.
        const INVALID = 1 << 3;
    }
}

/// Semaphores whose availability moves an object's [`PollEvents`].
///
/// A poller sleeps on these and re-reads [`FileObject::poll`] when one
/// becomes ready. `None` means that event never changes for the object.
#[derive(Clone, Copy, Default)]
pub struct PollSources<'a> {
    /// Drives [`PollEvents::READABLE`].
    pub readable: Option<&'a WaitQueueSemaphore>,
    /// Drives [`PollEvents::WRITABLE`].
    pub writable: Option<&'a WaitQueueSemaphore>,
    /// Drives [`PollEvents::HANGUP`].
    pub hangup: Option<&'a WaitQueueSemaphore>,
}

impl<'a> PollSources<'a> {
    /// The sources relevant to `events`. Hang-up is always included.
    pub fn select(self, events: PollEvents) -> impl Iterator<Item = &'a WaitQueueSemaphore> {
        let readable = self.readable.filter(|_| events.contains(PollEvents::READABLE));
        let writable = self.writable.filter(|_| events.contains(PollEvents::WRITABLE));
        readable.into_iter().chain(writable).chain(self.hangup)
    }
}

/// Something a descriptor can refer to.
///
/// Every operation defaults to [`IpcError::NotSupported`].
pub trait FileObject: Send + Sync {
    /// Reads into `buf`; `Ok(0)` is end of file.
    fn read(&self, buf: &mut [u8], flags: OpenFlags) -> Result<usize, IpcError> {
        let _ = (buf, flags);
        Err(IpcError::NotSupported)
    }

    /// Writes from `buf`, returning the bytes accepted.
    fn write(&self, buf: &[u8], flags: OpenFlags) -> Result<usize, IpcError> {
        let _ = (buf, flags);
        Err(IpcError::NotSupported)
    }

    /// Performs a lock or unlock operation on a synchronization object.
    fn control(&self, op: SyncOp) -> Result<(), IpcError> {
        let _ = op;
        Err(IpcError::NotSupported)
    }

    /// Current readiness.
    fn poll(&self) -> PollEvents {
        PollEvents::empty()
    }

    /// What to sleep on while waiting for [`poll`](Self::poll) to change.
    fn poll_sources(&self) -> PollSources<'_> {
        PollSources::default()
    }
}

/// An open object plus the flags it was opened with.
pub struct FileDescription {
    object: Box<dyn FileObject>,
    flags: OpenFlags,
}

impl FileDescription {
    /// Wraps `object`. `CLOEXEC` belongs to the descriptor, not the
    /// description, and is stripped.
    pub fn new(object: impl FileObject + 'static, flags: OpenFlags) -> Arc<Self> {
        Arc::new(Self {
            object: Box::new(object),
            flags: flags - OpenFlags::CLOEXEC,
        })
    }

    /// Flags the description was opened with.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Reads through the object.
    ///
    /// # Errors
    ///
    /// [`IpcError::BadFd`] if not opened for reading, otherwise whatever the
    /// object reports.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, IpcError> {
        if !self.flags.contains(OpenFlags::READ) {
            return Err(IpcError::BadFd);
        }
        self.object.read(buf, self.flags)
    }

    /// Writes through the object.
    ///
    /// # Errors
    ///
    /// [`IpcError::BadFd`] if not opened for writing, otherwise whatever the
    /// object reports.
    pub fn write(&self, buf: &[u8]) -> Result<usize, IpcError> {
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(IpcError::BadFd);
        }
        self.object.write(buf, self.flags)
    }

    /// Forwards a synchronization operation to the object.
    ///
    /// # Errors
    ///
    /// Whatever the object reports.
    pub fn control(&self, op: SyncOp) -> Result<(), IpcError> {
        self.object.control(op)
    }

    /// Current readiness of the object.
    pub fn poll(&self) -> PollEvents {
        self.object.poll()
    }

    /// See [`FileObject::poll_sources`].
    pub fn poll_sources(&self) -> PollSources<'_> {
        self.object.poll_sources()
    }
}

struct FileEntry {
    description: Arc<FileDescription>,
    cloexec: bool,
}

/// Per-process descriptor table.
pub struct FileTable {
    entries: BTreeMap<Fd, FileEntry>,
    limit: usize,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    /// Creates an empty table holding up to [`MAX_FDS`] descriptors.
    pub const fn new() -> Self {
        Self::with_limit(MAX_FDS)
    }

    /// Creates an empty table holding up to `limit` descriptors.
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            limit,
        }
    }

    /// Lowest descriptor number not in use.
    fn lowest_free(&self) -> Result<Fd, IpcError> {
        if self.entries.len() >= self.limit {
            return Err(IpcError::TooManyFiles);
        }
        let mut candidate = 0u32;
        for fd in self.entries.keys() {
            if fd.as_u32() != candidate {
                break;
            }
            candidate += 1;
        }
        Ok(Fd::new(candidate))
    }

    /// Installs `description` at the lowest free descriptor.
    ///
    /// # Errors
    ///
    /// [`IpcError::TooManyFiles`] when the table is full.
    pub fn open(&mut self, description: Arc<FileDescription>, cloexec: bool) -> Result<Fd, IpcError> {
        let fd = self.lowest_free()?;
        self.entries.insert(
            fd,
            FileEntry {
                description,
                cloexec,
            },
        );
        Ok(fd)
    }

    /// Takes a reference to the description behind `fd`.
    ///
    /// # Errors
    ///
    /// [`IpcError::BadFd`] if `fd` is not open.
    pub fn get(&self, fd: Fd) -> Result<Arc<FileDescription>, IpcError> {
        self.entries
            .get(&fd)
            .map(|entry| Arc::clone(&entry.description))
            .ok_or(IpcError::BadFd)
    }

    /// Opens a second descriptor for the same description. The new one does
    /// not inherit close-on-exec.
    ///
    /// # Errors
    ///
    /// [`IpcError::BadFd`] or [`IpcError::TooManyFiles`].
    pub fn dup(&mut self, fd: Fd) -> Result<Fd, IpcError> {
        let description = self.get(fd)?;
        self.open(description, false)
    }

    /// Closes `fd`, dropping its reference to the description.
    ///
    /// # Errors
    ///
    /// [`IpcError::BadFd`] if `fd` is not open.
    pub fn close(&mut self, fd: Fd) -> Result<(), IpcError> {
        self.entries.remove(&fd).map(drop).ok_or(IpcError::BadFd)
    }

    /// Closes every descriptor marked close-on-exec.
    pub fn close_on_exec(&mut self) {
        self.entries.retain(|_, entry| !entry.cloexec);
    }

    /// Returns `true` if `fd` is marked close-on-exec.
    ///
    /// # Errors
    ///
    /// [`IpcError::BadFd`] if `fd` is not open.
    pub fn is_cloexec(&self, fd: Fd) -> Result<bool, IpcError> {
        self.entries
            .get(&fd)
            .map(|entry| entry.cloexec)
            .ok_or(IpcError::BadFd)
    }

    /// Number of open descriptors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no descriptor is open.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
