//! Named pipes.
//!
//! [`FifoNamespace`] maps paths to [`Pipe`]s. Every open of a path gets its
//! own description onto the shared pipe, read-only or write-only.
//!
//! Opens rendezvous: a blocking open for reading sleeps until a writer has
//! opened the same pipe, and a blocking open for writing sleeps until a
//! reader has.
//!
//! A side that has fully closed cannot come back: its semaphore is
//! terminated. Once either side is gone, or nothing is attached at all, the
//! next open starts a fresh pipe under the same name. Ends still attached to
//! the old pipe finish it out (readers see end of file, writers a broken
//! pipe).

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;

use halcyon_core::sched::Dispatcher;
use halcyon_core::sync::{SpinLock, WaitFlags};

use crate::error::IpcError;
use crate::file::{FileDescription, OpenFlags};
use crate::pipe::Pipe;

/// Registry of named pipes.
pub struct FifoNamespace {
    dispatcher: &'static Dispatcher,
    entries: SpinLock<BTreeMap<String, Arc<Pipe>>>,
}

impl FifoNamespace {
    /// Creates an empty namespace.
    pub fn new(dispatcher: &'static Dispatcher) -> Self {
        Self {
            dispatcher,
            entries: SpinLock::new(BTreeMap::new()),
        }
    }

    /// Creates a named pipe at `path`.
    ///
    /// # Errors
    ///
    /// [`IpcError::InvalidArgument`] for an empty path, [`IpcError::Exists`]
    /// if the name is taken.
    pub fn mkfifo(&self, path: &str) -> Result<(), IpcError> {
        if path.is_empty() {
            return Err(IpcError::InvalidArgument);
        }
        let mut entries = self.entries.lock();
        if entries.contains_key(path) {
            return Err(IpcError::Exists);
        }
        entries.insert(path.to_string(), Pipe::new(self.dispatcher));
        halcyon_core::kdebug!("fifo", "created {}", path);
        Ok(())
    }

    /// Opens one end of the named pipe at `path`.
    ///
    /// `flags` must contain exactly one of [`OpenFlags::READ`] and
    /// [`OpenFlags::WRITE`]. A reader sleeps until some writer has opened
    /// the pipe, a writer until some reader has. With
    /// [`OpenFlags::NONBLOCK`] a reader returns at once, and a writer fails
    /// while nobody has the pipe open for reading.
    ///
    /// # Errors
    ///
    /// [`IpcError::InvalidArgument`], [`IpcError::NotFound`],
    /// [`IpcError::NoReader`], or [`IpcError::Interrupted`] if a signal
    /// arrives while waiting for the other side.
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<Arc<FileDescription>, IpcError> {
        let read = flags.contains(OpenFlags::READ);
        let write = flags.contains(OpenFlags::WRITE);
        if read == write {
            return Err(IpcError::InvalidArgument);
        }
        let nonblock = flags.contains(OpenFlags::NONBLOCK);

        // Ends attach under the namespace lock so two opens always agree on
        // which pipe is current. Waiting for the peer happens outside it.
        let mut entries = self.entries.lock();
        let pipe = entries.get_mut(path).ok_or(IpcError::NotFound)?;
        let idle = pipe.readers() == 0 && pipe.writers() == 0;
        if idle || pipe.read_side_closed() || pipe.write_side_closed() {
            *pipe = Pipe::new(self.dispatcher);
        }

        if read {
            let end = pipe.reader();
            drop(entries);
            if !nonblock {
                // On failure `end` drops and closes the read side again.
                end.pipe().wait_for_writer(WaitFlags::INTERRUPTIBLE)?;
            }
            Ok(FileDescription::new(end, flags))
        } else {
            if nonblock && pipe.readers() == 0 {
                return Err(IpcError::NoReader);
            }
            let end = pipe.writer();
            drop(entries);
            end.pipe().wait_for_reader(WaitFlags::INTERRUPTIBLE)?;
            Ok(FileDescription::new(end, flags))
        }
    }

    /// Removes the name. Ends already open keep working.
    ///
    /// # Errors
    ///
    /// [`IpcError::NotFound`] if nothing is registered at `path`.
    pub fn unlink(&self, path: &str) -> Result<(), IpcError> {
        self.entries
            .lock()
            .remove(path)
            .map(drop)
            .ok_or(IpcError::NotFound)
    }

    /// Returns `true` if a named pipe exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.lock().contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halcyon_core::host::{self, HostEnv};

    const READ_NOW: OpenFlags = OpenFlags::READ.union(OpenFlags::NONBLOCK);

    fn namespace() -> FifoNamespace {
        FifoNamespace::new(host::boot().dispatcher)
    }

    fn shared() -> (HostEnv, Arc<FifoNamespace>) {
        let env = host::boot();
        let ns = Arc::new(FifoNamespace::new(env.dispatcher));
        ns.mkfifo("f").unwrap();
        (env, ns)
    }

    #[test]
    fn mkfifo_rejects_duplicates() {
        let ns = namespace();
        assert_eq!(ns.mkfifo("/tmp/log"), Ok(()));
        assert_eq!(ns.mkfifo("/tmp/log"), Err(IpcError::Exists));
        assert_eq!(ns.mkfifo(""), Err(IpcError::InvalidArgument));
        assert!(ns.contains("/tmp/log"));
    }

    #[test]
    fn open_checks_mode_and_name() {
        let ns = namespace();
        ns.mkfifo("f").unwrap();
        let both = OpenFlags::READ | OpenFlags::WRITE;
        assert_eq!(ns.open("f", both).err(), Some(IpcError::InvalidArgument));
        assert_eq!(ns.open("f", OpenFlags::empty()).err(), Some(IpcError::InvalidArgument));
        assert_eq!(ns.open("g", OpenFlags::READ).err(), Some(IpcError::NotFound));
    }

    #[test]
    fn reader_open_sleeps_until_a_writer_arrives() {
        let (env, ns) = shared();
        let ns2 = Arc::clone(&ns);
        let (id, handle) = env.spawn(move || ns2.open("f", OpenFlags::READ));
        assert!(env.wait_blocked(id));

        let w = ns.open("f", OpenFlags::WRITE).unwrap();
        let r = handle.join().unwrap().unwrap();
        assert_eq!(w.write(b"hi"), Ok(2));
        let mut buf = [0u8; 2];
        assert_eq!(r.read(&mut buf), Ok(2));
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn writer_open_sleeps_until_a_reader_arrives() {
        let (env, ns) = shared();
        let ns2 = Arc::clone(&ns);
        let (id, handle) = env.spawn(move || ns2.open("f", OpenFlags::WRITE));
        assert!(env.wait_blocked(id));

        let r = ns.open("f", OpenFlags::READ).unwrap();
        let w = handle.join().unwrap().unwrap();
        assert_eq!(w.write(b"yo"), Ok(2));
        let mut buf = [0u8; 2];
        assert_eq!(r.read(&mut buf), Ok(2));
    }

    #[test]
    fn interrupted_open_leaves_no_reader_behind() {
        let (env, ns) = shared();
        let ns2 = Arc::clone(&ns);
        let (id, handle) = env.spawn(move || ns2.open("f", OpenFlags::READ).map(drop));
        assert!(env.wait_blocked(id));
        env.scheduler.raise_signal(id);
        assert_eq!(handle.join().unwrap(), Err(IpcError::Interrupted));

        let flags = OpenFlags::WRITE | OpenFlags::NONBLOCK;
        assert_eq!(ns.open("f", flags).err(), Some(IpcError::NoReader));
    }

    #[test]
    fn ends_opened_by_name_share_a_pipe() {
        let ns = namespace();
        ns.mkfifo("f").unwrap();
        let r = ns.open("f", READ_NOW).unwrap();
        let w = ns.open("f", OpenFlags::WRITE).unwrap();
        assert_eq!(w.write(b"over"), Ok(4));
        drop(w);

        let mut buf = [0u8; 8];
        assert_eq!(r.read(&mut buf), Ok(4));
        assert_eq!(&buf[..4], b"over");
        assert_eq!(r.read(&mut buf), Ok(0));
    }

    #[test]
    fn nonblocking_writer_needs_a_reader() {
        let ns = namespace();
        ns.mkfifo("f").unwrap();
        let flags = OpenFlags::WRITE | OpenFlags::NONBLOCK;
        assert_eq!(ns.open("f", flags).err(), Some(IpcError::NoReader));
        let _r = ns.open("f", READ_NOW).unwrap();
        assert!(ns.open("f", flags).is_ok());
    }

    #[test]
    fn name_is_reusable_after_both_sides_close() {
        let ns = namespace();
        ns.mkfifo("f").unwrap();
        {
            let r = ns.open("f", READ_NOW).unwrap();
            let w = ns.open("f", OpenFlags::WRITE).unwrap();
            w.write(b"one").unwrap();
            drop(w);
            let mut buf = [0u8; 3];
            r.read(&mut buf).unwrap();
        }

        let r = ns.open("f", READ_NOW).unwrap();
        let w = ns.open("f", OpenFlags::WRITE).unwrap();
        assert_eq!(w.write(b"two"), Ok(3));
        let mut buf = [0u8; 3];
        assert_eq!(r.read(&mut buf), Ok(3));
        assert_eq!(&buf, b"two");
    }

    #[test]
    fn reopen_after_hangup_starts_a_new_pipe() {
        let ns = namespace();
        ns.mkfifo("f").unwrap();
        let old_reader = ns.open("f", READ_NOW).unwrap();
        drop(ns.open("f", OpenFlags::WRITE).unwrap());
        let mut buf = [0u8; 4];
        assert_eq!(old_reader.read(&mut buf), Ok(0));

        let r = ns.open("f", READ_NOW).unwrap();
        let w = ns.open("f", OpenFlags::WRITE).unwrap();
        assert_eq!(w.write(b"new"), Ok(3));
        assert_eq!(r.read(&mut buf), Ok(3));
        assert_eq!(old_reader.read(&mut buf), Ok(0));
    }

    #[test]
    fn unlink_keeps_open_ends_alive() {
        let ns = namespace();
        ns.mkfifo("f").unwrap();
        let r = ns.open("f", READ_NOW).unwrap();
        let w = ns.open("f", OpenFlags::WRITE).unwrap();
        assert_eq!(ns.unlink("f"), Ok(()));
        assert_eq!(ns.unlink("f"), Err(IpcError::NotFound));
        assert_eq!(ns.open("f", OpenFlags::READ).err(), Some(IpcError::NotFound));

        w.write(b"!").unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(r.read(&mut buf), Ok(1));
    }
}
