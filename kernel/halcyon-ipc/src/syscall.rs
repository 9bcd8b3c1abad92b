//! IPC syscall handlers.
//!
//! Each handler takes raw register-sized arguments, validates them, and
//! returns a non-negative result or a negated errno. User memory has already
//! been copied in by the dispatcher: paths arrive as `&str`, buffers as
//! slices.

use alloc::sync::Arc;
use alloc::vec::Vec;

use halcyon_core::id::Fd;
use halcyon_core::sched::Dispatcher;
use halcyon_core::sync::{SpinLock, WaitFlags, WaitQueueSemaphore};

use crate::error::{EINVAL, IpcError};
use crate::fifo::FifoNamespace;
use crate::file::{FileDescription, FileTable, MAX_FDS, OpenFlags, PollEvents};
use crate::pipe::pipe;
use crate::sync_object::{SyncKind, SyncObject, SyncOp};

/// `sys_sync_create` kind: recursive mutex.
pub const SYNC_KIND_MUTEX: usize = 0;
/// `sys_sync_create` kind: counting semaphore.
pub const SYNC_KIND_SEMAPHORE: usize = 1;

/// `sys_sync_control` op: lock / wait.
pub const SYNC_OP_LOCK: usize = 0;
/// `sys_sync_control` op: unlock / signal.
pub const SYNC_OP_UNLOCK: usize = 1;

/// Kernel-wide IPC state shared by every process.
pub struct Ipc {
    dispatcher: &'static Dispatcher,
    fifos: FifoNamespace,
}

impl Ipc {
    /// Creates the IPC state on top of `dispatcher`.
    pub fn new(dispatcher: &'static Dispatcher) -> Self {
        Self {
            dispatcher,
            fifos: FifoNamespace::new(dispatcher),
        }
    }

    /// The named-pipe namespace.
    pub fn fifos(&self) -> &FifoNamespace {
        &self.fifos
    }
}

#[expect(clippy::cast_possible_wrap, reason = "results are bounded by buffer and table sizes")]
fn to_ret(result: Result<usize, IpcError>) -> isize {
    match result {
        Ok(n) => n as isize,
        Err(err) => -err.to_errno(),
    }
}

fn fd_arg(fd: usize) -> Result<Fd, IpcError> {
    u32::try_from(fd).map(Fd::new).map_err(|_| IpcError::BadFd)
}

fn flags_arg(flags: usize, allowed: OpenFlags) -> Result<OpenFlags, IpcError> {
    u32::try_from(flags)
        .ok()
        .and_then(OpenFlags::from_bits)
        .filter(|f| allowed.contains(*f))
        .ok_or(IpcError::InvalidArgument)
}

/// Looks up `fd` and releases the table lock before the caller blocks on it.
fn description(files: &SpinLock<FileTable>, fd: usize) -> Result<Arc<FileDescription>, IpcError> {
    let fd = fd_arg(fd)?;
    files.lock().get(fd)
}

/// Installs `desc` at the lowest free descriptor.
///
/// The table only ever holds a second reference, so a rejected description
/// (which may close a pipe end) is released after the table lock.
fn install(
    files: &SpinLock<FileTable>,
    desc: Arc<FileDescription>,
    cloexec: bool,
) -> Result<Fd, IpcError> {
    let result = files.lock().open(Arc::clone(&desc), cloexec);
    drop(desc);
    result
}

/// Removes `fd` from the table and drops its description after the lock.
fn uninstall(files: &SpinLock<FileTable>, fd: Fd) -> Result<(), IpcError> {
    let desc = {
        let mut table = files.lock();
        let desc = table.get(fd)?;
        table.close(fd)?;
        desc
    };
    drop(desc);
    Ok(())
}

/// `sys_pipe2`: create an anonymous pipe.
///
/// Arguments:
/// - `flags`: `OpenFlags::NONBLOCK` and/or `OpenFlags::CLOEXEC`
/// - `fds`: receives the read end in `[0]` and the write end in `[1]`
///
/// Returns 0 on success, or a negative errno on failure.
pub fn sys_pipe2(ipc: &Ipc, files: &SpinLock<FileTable>, flags: usize, fds: &mut [u32; 2]) -> isize {
    let Ok(flags) = flags_arg(flags, OpenFlags::NONBLOCK | OpenFlags::CLOEXEC) else {
        return -EINVAL;
    };
    let cloexec = flags.contains(OpenFlags::CLOEXEC);
    let (reader, writer) = pipe(ipc.dispatcher);
    let reader = FileDescription::new(reader, flags | OpenFlags::READ);
    let writer = FileDescription::new(writer, flags | OpenFlags::WRITE);

    let read_fd = match install(files, reader, cloexec) {
        Ok(fd) => fd,
        Err(err) => return -err.to_errno(),
    };
    let write_fd = match install(files, writer, cloexec) {
        Ok(fd) => fd,
        Err(err) => {
            let _ = uninstall(files, read_fd);
            return -err.to_errno();
        }
    };
    *fds = [read_fd.as_u32(), write_fd.as_u32()];
    0
}

/// `sys_mkfifo`: create a named pipe.
///
/// Returns 0 on success, or a negative errno on failure.
pub fn sys_mkfifo(ipc: &Ipc, path: &str) -> isize {
    to_ret(ipc.fifos.mkfifo(path).map(|()| 0))
}

/// `sys_open_fifo`: open one end of a named pipe.
///
/// Arguments:
/// - `path`: name passed to `sys_mkfifo`
/// - `flags`: exactly one of `READ`/`WRITE`, optionally `NONBLOCK` and
///   `CLOEXEC`
///
/// A blocking open sleeps until the other side has been opened too.
///
/// Returns the new fd on success, `-ENXIO` for a non-blocking writer with no
/// reader, `-EINTR` if a signal cut the wait short, or another negative
/// errno.
pub fn sys_open_fifo(ipc: &Ipc, files: &SpinLock<FileTable>, path: &str, flags: usize) -> isize {
    let Ok(flags) = flags_arg(flags, OpenFlags::all()) else {
        return -EINVAL;
    };
    let result = ipc
        .fifos
        .open(path, flags)
        .and_then(|desc| install(files, desc, flags.contains(OpenFlags::CLOEXEC)))
        .map(Fd::as_usize);
    to_ret(result)
}

/// `sys_read`: read from a descriptor.
///
/// Returns the number of bytes read (0 at end of file), or a negative errno.
pub fn sys_read(files: &SpinLock<FileTable>, fd: usize, buf: &mut [u8]) -> isize {
    to_ret(description(files, fd).and_then(|desc| desc.read(buf)))
}

/// `sys_write`: write to a descriptor.
///
/// Returns the number of bytes written, or a negative errno.
pub fn sys_write(files: &SpinLock<FileTable>, fd: usize, buf: &[u8]) -> isize {
    to_ret(description(files, fd).and_then(|desc| desc.write(buf)))
}

/// `sys_close`: close a descriptor.
///
/// Returns 0 on success, or a negative errno on failure.
pub fn sys_close(files: &SpinLock<FileTable>, fd: usize) -> isize {
    to_ret(fd_arg(fd).and_then(|fd| uninstall(files, fd)).map(|()| 0))
}

/// `sys_dup`: duplicate a descriptor onto the lowest free number.
///
/// Returns the new fd on success, or a negative errno on failure.
pub fn sys_dup(files: &SpinLock<FileTable>, fd: usize) -> isize {
    to_ret(fd_arg(fd).and_then(|fd| files.lock().dup(fd)).map(Fd::as_usize))
}

/// `sys_sync_create`: create a mutex or semaphore descriptor.
///
/// Arguments:
/// - `kind`: [`SYNC_KIND_MUTEX`] or [`SYNC_KIND_SEMAPHORE`]
/// - `count`: initial semaphore count (ignored for mutexes)
/// - `flags`: optionally `OpenFlags::CLOEXEC`
///
/// Returns the new fd on success, or a negative errno on failure.
pub fn sys_sync_create(
    ipc: &Ipc,
    files: &SpinLock<FileTable>,
    kind: usize,
    count: usize,
    flags: usize,
) -> isize {
    let Ok(flags) = flags_arg(flags, OpenFlags::CLOEXEC) else {
        return -EINVAL;
    };
    let kind = match kind {
        SYNC_KIND_MUTEX => SyncKind::Mutex,
        SYNC_KIND_SEMAPHORE => match u32::try_from(count) {
            Ok(count) => SyncKind::Semaphore(count),
            Err(_) => return -EINVAL,
        },
        _ => return -EINVAL,
    };
    let desc = FileDescription::new(SyncObject::new(ipc.dispatcher, kind), OpenFlags::empty());
    to_ret(install(files, desc, flags.contains(OpenFlags::CLOEXEC)).map(Fd::as_usize))
}

/// `sys_sync_control`: lock/wait or unlock/signal a sync descriptor.
///
/// Arguments:
/// - `fd`: descriptor from `sys_sync_create`
/// - `op`: [`SYNC_OP_LOCK`] or [`SYNC_OP_UNLOCK`]
/// - `timeout_ns`: relative timeout for a semaphore wait; 0 waits forever
///
/// Returns 0 once acquired or released, `-EINTR` if a signal cut the wait
/// short, `-ETIMEDOUT` if the timeout passed, or another negative errno.
pub fn sys_sync_control(files: &SpinLock<FileTable>, fd: usize, op: usize, timeout_ns: u64) -> isize {
    let op = match op {
        SYNC_OP_LOCK => SyncOp::Lock {
            timeout: (timeout_ns != 0).then_some(timeout_ns),
        },
        SYNC_OP_UNLOCK => SyncOp::Unlock,
        _ => return -EINVAL,
    };
    to_ret(
        description(files, fd)
            .and_then(|desc| desc.control(op))
            .map(|()| 0),
    )
}

/// One entry of the `sys_poll` array.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollFd {
    /// Descriptor to watch. Negative entries are skipped.
    pub fd: i32,
    /// [`PollEvents`] bits of interest. Hang-up is always reported.
    pub events: u32,
    /// [`PollEvents`] bits that are ready, filled in on return.
    pub revents: u32,
}

impl PollFd {
    /// Watches `fd` for `events`.
    pub const fn new(fd: i32, events: PollEvents) -> Self {
        Self {
            fd,
            events: events.bits(),
            revents: 0,
        }
    }
}

/// A `sys_poll` entry after lookup: skipped, not open, or open.
type Watched = Option<Result<Arc<FileDescription>, IpcError>>;

/// `sys_poll`: wait until one of several descriptors is ready.
///
/// Arguments:
/// - `fds`: entries to watch; `revents` is overwritten in each
/// - `timeout_ns`: relative timeout; negative waits forever, 0 only looks
///
/// Descriptors that are not open report [`PollEvents::INVALID`]. The wait
/// sleeps on the semaphores behind each object and re-reads readiness
/// whenever one of them moves.
///
/// Returns the number of entries with non-empty `revents` (0 on timeout),
/// `-EINTR` if a signal arrived first, or `-EINVAL` for more than
/// [`MAX_FDS`] entries or a wait with nothing that could ever wake it.
pub fn sys_poll(ipc: &Ipc, files: &SpinLock<FileTable>, fds: &mut [PollFd], timeout_ns: i64) -> isize {
    if fds.len() > MAX_FDS {
        return -EINVAL;
    }
    let watched: Vec<Watched> = fds
        .iter()
        .map(|entry| {
            usize::try_from(entry.fd)
                .ok()
                .map(|fd| description(files, fd))
        })
        .collect();
    let deadline = u64::try_from(timeout_ns)
        .ok()
        .map(|t| ipc.dispatcher.deadline_after(t));

    loop {
        let ready = poll_snapshot(fds, &watched);
        if ready > 0 {
            return to_ret(Ok(ready));
        }
        let remaining = match deadline {
            None => None,
            Some(deadline) => match deadline.checked_sub(ipc.dispatcher.now()) {
                Some(left) if left > 0 => Some(left),
                _ => return 0,
            },
        };

        let sources: Vec<&WaitQueueSemaphore> = fds
            .iter()
            .zip(&watched)
            .filter_map(|(entry, desc)| match desc {
                Some(Ok(desc)) => Some((entry, desc)),
                _ => None,
            })
            .flat_map(|(entry, desc)| {
                desc.poll_sources()
                    .select(PollEvents::from_bits_truncate(entry.events))
            })
            .collect();
        if sources.is_empty() {
            match remaining {
                Some(left) => {
                    ipc.dispatcher.sleep(left);
                    continue;
                }
                None => return -EINVAL,
            }
        }

        let mut hit = alloc::vec![false; sources.len()];
        if let Err(err) =
            WaitQueueSemaphore::poll(&sources, &mut hit, WaitFlags::INTERRUPTIBLE, remaining)
        {
            return -IpcError::from(err).to_errno();
        }
    }
}

/// Fills in `revents` for every entry and counts the ready ones.
fn poll_snapshot(fds: &mut [PollFd], watched: &[Watched]) -> usize {
    let mut ready = 0;
    for (entry, desc) in fds.iter_mut().zip(watched) {
        let revents = match desc {
            None => PollEvents::empty(),
            Some(Err(_)) => PollEvents::INVALID,
            Some(Ok(desc)) => {
                desc.poll() & (PollEvents::from_bits_truncate(entry.events) | PollEvents::HANGUP)
            }
        };
        entry.revents = revents.bits();
        ready += usize::from(!revents.is_empty());
    }
    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{
        EAGAIN, EBADF, EEXIST, EINTR, EMFILE, ENOENT, ENOSYS, ENXIO, EPIPE, ETIMEDOUT,
    };
    use crate::file::FileObject;
    use core::sync::atomic::{AtomicBool, Ordering};
    use halcyon_core::host::{self, HostEnv};
    use halcyon_core::signal::Signal;

    fn setup() -> (HostEnv, Ipc, SpinLock<FileTable>) {
        let env = host::boot();
        (env, Ipc::new(env.dispatcher), SpinLock::new(FileTable::new()))
    }

    fn bits(flags: OpenFlags) -> usize {
        flags.bits() as usize
    }

    #[test]
    fn pipe_round_trip_through_descriptors() {
        let (_env, ipc, files) = setup();
        let mut fds = [0u32; 2];
        assert_eq!(sys_pipe2(&ipc, &files, 0, &mut fds), 0);
        assert_eq!(fds, [0, 1]);
        let [r, w] = fds.map(|fd| fd as usize);

        assert_eq!(sys_write(&files, w, b"hello world"), 11);
        assert_eq!(sys_close(&files, w), 0);
        let mut buf = [0u8; 32];
        assert_eq!(sys_read(&files, r, &mut buf), 11);
        assert_eq!(&buf[..11], b"hello world");
        assert_eq!(sys_read(&files, r, &mut buf), 0);
    }

    #[test]
    fn wrong_direction_is_ebadf() {
        let (_env, ipc, files) = setup();
        let mut fds = [0u32; 2];
        sys_pipe2(&ipc, &files, 0, &mut fds);
        let mut buf = [0u8; 1];
        assert_eq!(sys_write(&files, fds[0] as usize, b"x"), -EBADF);
        assert_eq!(sys_read(&files, fds[1] as usize, &mut buf), -EBADF);
        assert_eq!(sys_read(&files, 99, &mut buf), -EBADF);
        assert_eq!(sys_read(&files, usize::MAX, &mut buf), -EBADF);
        assert_eq!(sys_close(&files, 99), -EBADF);
    }

    #[test]
    fn closed_reader_breaks_the_pipe() {
        let (env, ipc, files) = setup();
        let mut fds = [0u32; 2];
        sys_pipe2(&ipc, &files, 0, &mut fds);
        assert_eq!(sys_close(&files, fds[0] as usize), 0);
        let me = host::current_thread();
        assert!(!env.scheduler.is_pending(me, Signal::PIPE));
        assert_eq!(sys_write(&files, fds[1] as usize, b"x"), -EPIPE);
        assert!(env.scheduler.is_pending(me, Signal::PIPE));
        env.scheduler.clear_signals(me);
    }

    #[test]
    fn blocking_fifo_open_waits_for_the_peer() {
        let env = host::boot();
        let ipc = Arc::new(Ipc::new(env.dispatcher));
        let files = Arc::new(SpinLock::new(FileTable::new()));
        assert_eq!(sys_mkfifo(&ipc, "/run/q"), 0);

        let (ipc2, files2) = (Arc::clone(&ipc), Arc::clone(&files));
        let (id, handle) = env.spawn(move || {
            let w = sys_open_fifo(&ipc2, &files2, "/run/q", bits(OpenFlags::WRITE));
            (w, sys_write(&files2, w as usize, b"late"))
        });
        assert!(env.wait_blocked(id));
        assert!(files.lock().is_empty());

        let r = sys_open_fifo(&ipc, &files, "/run/q", bits(OpenFlags::READ));
        let (w, written) = handle.join().unwrap();
        assert!(r >= 0 && w >= 0 && r != w);
        assert_eq!(written, 4);
        let mut buf = [0u8; 4];
        assert_eq!(sys_read(&files, r as usize, &mut buf), 4);
        assert_eq!(&buf, b"late");
    }

    struct DropWitness {
        files: Arc<SpinLock<FileTable>>,
        locked_on_drop: Arc<AtomicBool>,
    }

    impl FileObject for DropWitness {}

    impl Drop for DropWitness {
        fn drop(&mut self) {
            self.locked_on_drop.store(self.files.is_locked(), Ordering::SeqCst);
        }
    }

    #[test]
    fn rejected_description_is_dropped_outside_the_table_lock() {
        let files = Arc::new(SpinLock::new(FileTable::with_limit(0)));
        let locked_on_drop = Arc::new(AtomicBool::new(true));
        let desc = FileDescription::new(
            DropWitness {
                files: Arc::clone(&files),
                locked_on_drop: Arc::clone(&locked_on_drop),
            },
            OpenFlags::READ,
        );
        assert_eq!(install(&files, desc, false), Err(IpcError::TooManyFiles));
        assert!(!locked_on_drop.load(Ordering::SeqCst));
    }

    #[test]
    fn closed_descriptor_is_dropped_outside_the_table_lock() {
        let files = Arc::new(SpinLock::new(FileTable::new()));
        let locked_on_drop = Arc::new(AtomicBool::new(true));
        let desc = FileDescription::new(
            DropWitness {
                files: Arc::clone(&files),
                locked_on_drop: Arc::clone(&locked_on_drop),
            },
            OpenFlags::READ,
        );
        let fd = install(&files, desc, false).unwrap();
        assert_eq!(sys_close(&files, fd.as_usize()), 0);
        assert!(!locked_on_drop.load(Ordering::SeqCst));
    }

    #[test]
    fn poll_reports_ready_descriptors_at_once() {
        let (_env, ipc, files) = setup();
        let mut fds = [0u32; 2];
        sys_pipe2(&ipc, &files, 0, &mut fds);
        let [r, w] = fds.map(|fd| i32::try_from(fd).unwrap());

        let mut entries = [
            PollFd::new(r, PollEvents::READABLE),
            PollFd::new(w, PollEvents::WRITABLE),
            PollFd::new(-1, PollEvents::READABLE),
            PollFd::new(42, PollEvents::READABLE),
        ];
        assert_eq!(sys_poll(&ipc, &files, &mut entries, 0), 2);
        assert_eq!(entries[0].revents, 0);
        assert_eq!(entries[1].revents, PollEvents::WRITABLE.bits());
        assert_eq!(entries[2].revents, 0);
        assert_eq!(entries[3].revents, PollEvents::INVALID.bits());

        assert_eq!(sys_write(&files, w as usize, b"x"), 1);
        assert_eq!(sys_close(&files, w as usize), 0);
        let mut entries = [PollFd::new(r, PollEvents::READABLE)];
        assert_eq!(sys_poll(&ipc, &files, &mut entries, 0), 1);
        assert_eq!(
            entries[0].revents,
            (PollEvents::READABLE | PollEvents::HANGUP).bits()
        );
    }

    #[test]
    fn poll_sleeps_until_a_pipe_has_data() {
        let env = host::boot();
        let ipc = Arc::new(Ipc::new(env.dispatcher));
        let files = Arc::new(SpinLock::new(FileTable::new()));
        let mut fds = [0u32; 2];
        sys_pipe2(&ipc, &files, 0, &mut fds);
        let r = i32::try_from(fds[0]).unwrap();

        let (ipc2, files2) = (Arc::clone(&ipc), Arc::clone(&files));
        let (id, handle) = env.spawn(move || {
            let mut entries = [PollFd::new(r, PollEvents::READABLE)];
            let ready = sys_poll(&ipc2, &files2, &mut entries, -1);
            (ready, entries[0].revents)
        });
        assert!(env.wait_blocked(id));
        assert_eq!(sys_write(&files, fds[1] as usize, b"go"), 2);
        assert_eq!(handle.join().unwrap(), (1, PollEvents::READABLE.bits()));
    }

    #[test]
    fn poll_wakes_on_a_semaphore_descriptor() {
        let env = host::boot();
        let ipc = Arc::new(Ipc::new(env.dispatcher));
        let files = Arc::new(SpinLock::new(FileTable::new()));
        let sem = sys_sync_create(&ipc, &files, SYNC_KIND_SEMAPHORE, 0, 0);
        let mut fds = [0u32; 2];
        sys_pipe2(&ipc, &files, 0, &mut fds);
        let watched = [i32::try_from(fds[0]).unwrap(), i32::try_from(sem).unwrap()];

        let (ipc2, files2) = (Arc::clone(&ipc), Arc::clone(&files));
        let (id, handle) = env.spawn(move || {
            let mut entries = watched.map(|fd| PollFd::new(fd, PollEvents::READABLE));
            let ready = sys_poll(&ipc2, &files2, &mut entries, -1);
            (ready, entries.map(|e| e.revents))
        });
        assert!(env.wait_blocked(id));
        assert_eq!(sys_sync_control(&files, sem as usize, SYNC_OP_UNLOCK, 0), 0);
        assert_eq!(
            handle.join().unwrap(),
            (1, [0, PollEvents::READABLE.bits()])
        );
    }

    #[test]
    fn poll_times_out_with_nothing_ready() {
        let (env, ipc, files) = setup();
        let _ticker = env.ticker();
        let mut fds = [0u32; 2];
        sys_pipe2(&ipc, &files, 0, &mut fds);
        let mut entries = [PollFd::new(i32::try_from(fds[0]).unwrap(), PollEvents::READABLE)];
        assert_eq!(sys_poll(&ipc, &files, &mut entries, 2_000_000), 0);
        assert_eq!(entries[0].revents, 0);
        assert_eq!(env.dispatcher.pending_timers(), 0);
    }

    #[test]
    fn poll_is_interrupted_by_signal() {
        let env = host::boot();
        let ipc = Arc::new(Ipc::new(env.dispatcher));
        let files = Arc::new(SpinLock::new(FileTable::new()));
        let mut fds = [0u32; 2];
        sys_pipe2(&ipc, &files, 0, &mut fds);
        let r = i32::try_from(fds[0]).unwrap();

        let (ipc2, files2) = (Arc::clone(&ipc), Arc::clone(&files));
        let (id, handle) = env.spawn(move || {
            let mut entries = [PollFd::new(r, PollEvents::READABLE)];
            sys_poll(&ipc2, &files2, &mut entries, -1)
        });
        assert!(env.wait_blocked(id));
        env.scheduler.raise_signal(id);
        assert_eq!(handle.join().unwrap(), -EINTR);
    }

    #[test]
    fn poll_rejects_a_wait_that_cannot_end() {
        let (_env, ipc, files) = setup();
        let m = sys_sync_create(&ipc, &files, SYNC_KIND_MUTEX, 0, 0);
        let mut entries = [PollFd::new(i32::try_from(m).unwrap(), PollEvents::WRITABLE)];
        assert_eq!(sys_poll(&ipc, &files, &mut entries, -1), -EINVAL);
        assert_eq!(sys_poll(&ipc, &files, &mut [], -1), -EINVAL);
    }

    #[test]
    fn dup_keeps_the_end_open() {
        let (_env, ipc, files) = setup();
        let mut fds = [0u32; 2];
        sys_pipe2(&ipc, &files, 0, &mut fds);
        let w2 = sys_dup(&files, fds[1] as usize);
        assert_eq!(w2, 2);
        assert_eq!(sys_close(&files, fds[1] as usize), 0);

        assert_eq!(sys_write(&files, 2, b"still"), 5);
        assert_eq!(sys_close(&files, 2), 0);
        let mut buf = [0u8; 8];
        assert_eq!(sys_read(&files, fds[0] as usize, &mut buf), 5);
        assert_eq!(sys_read(&files, fds[0] as usize, &mut buf), 0);
    }

    #[test]
    fn pipe_flags_are_validated_and_applied() {
        let (_env, ipc, files) = setup();
        let mut fds = [0u32; 2];
        assert_eq!(sys_pipe2(&ipc, &files, bits(OpenFlags::READ), &mut fds), -EINVAL);
        assert_eq!(sys_pipe2(&ipc, &files, 1 << 20, &mut fds), -EINVAL);
        assert!(files.lock().is_empty());

        let flags = bits(OpenFlags::NONBLOCK | OpenFlags::CLOEXEC);
        assert_eq!(sys_pipe2(&ipc, &files, flags, &mut fds), 0);
        let mut buf = [0u8; 1];
        assert_eq!(sys_read(&files, fds[0] as usize, &mut buf), -EAGAIN);

        files.lock().close_on_exec();
        assert!(files.lock().is_empty());
    }

    #[test]
    fn full_table_leaves_no_half_pipe() {
        let env = host::boot();
        let ipc = Ipc::new(env.dispatcher);
        let files = SpinLock::new(FileTable::with_limit(1));
        let mut fds = [7u32; 2];
        assert_eq!(sys_pipe2(&ipc, &files, 0, &mut fds), -EMFILE);
        assert!(files.lock().is_empty());
        assert_eq!(fds, [7, 7]);
    }

    #[test]
    fn named_pipe_syscalls() {
        let (_env, ipc, files) = setup();
        assert_eq!(sys_mkfifo(&ipc, "/run/ctl"), 0);
        assert_eq!(sys_mkfifo(&ipc, "/run/ctl"), -EEXIST);
        assert_eq!(sys_open_fifo(&ipc, &files, "/run/none", bits(OpenFlags::READ)), -ENOENT);
        let rw = bits(OpenFlags::READ | OpenFlags::WRITE);
        assert_eq!(sys_open_fifo(&ipc, &files, "/run/ctl", rw), -EINVAL);
        assert_eq!(sys_open_fifo(&ipc, &files, "/run/ctl", 1 << 30), -EINVAL);

        let nb_write = bits(OpenFlags::WRITE | OpenFlags::NONBLOCK);
        assert_eq!(sys_open_fifo(&ipc, &files, "/run/ctl", nb_write), -ENXIO);

        let nb_read = bits(OpenFlags::READ | OpenFlags::NONBLOCK);
        let r = sys_open_fifo(&ipc, &files, "/run/ctl", nb_read);
        let w = sys_open_fifo(&ipc, &files, "/run/ctl", bits(OpenFlags::WRITE));
        assert_eq!((r, w), (0, 1));
        assert_eq!(sys_write(&files, 1, b"cmd"), 3);
        let mut buf = [0u8; 3];
        assert_eq!(sys_read(&files, 0, &mut buf), 3);
        assert_eq!(&buf, b"cmd");
    }

    #[test]
    fn sync_semaphore_descriptor() {
        let (env, ipc, files) = setup();
        let _ticker = env.ticker();
        let fd = sys_sync_create(&ipc, &files, SYNC_KIND_SEMAPHORE, 1, 0);
        assert_eq!(fd, 0);
        let fd = fd as usize;

        assert_eq!(sys_sync_control(&files, fd, SYNC_OP_LOCK, 0), 0);
        assert_eq!(sys_sync_control(&files, fd, SYNC_OP_LOCK, 1_000_000), -ETIMEDOUT);
        assert_eq!(sys_sync_control(&files, fd, SYNC_OP_UNLOCK, 0), 0);
        assert_eq!(sys_sync_control(&files, fd, SYNC_OP_LOCK, 1_000_000), 0);
        assert_eq!(sys_sync_control(&files, fd, 9, 0), -EINVAL);
    }

    #[test]
    fn sync_wait_is_interrupted_by_signal() {
        let env = host::boot();
        let ipc = Ipc::new(env.dispatcher);
        let files = Arc::new(SpinLock::new(FileTable::new()));
        let fd = sys_sync_create(&ipc, &files, SYNC_KIND_SEMAPHORE, 0, 0) as usize;

        let files2 = Arc::clone(&files);
        let (id, handle) = env.spawn(move || sys_sync_control(&files2, fd, SYNC_OP_LOCK, 0));
        assert!(env.wait_blocked(id));
        env.scheduler.raise_signal(id);
        assert_eq!(handle.join().unwrap(), -EINTR);
    }

    #[test]
    fn sync_create_validates_arguments() {
        let (_env, ipc, files) = setup();
        assert_eq!(sys_sync_create(&ipc, &files, 5, 0, 0), -EINVAL);
        assert_eq!(sys_sync_create(&ipc, &files, SYNC_KIND_SEMAPHORE, usize::MAX, 0), -EINVAL);
        assert_eq!(
            sys_sync_create(&ipc, &files, SYNC_KIND_MUTEX, 0, bits(OpenFlags::NONBLOCK)),
            -EINVAL
        );

        let m = sys_sync_create(&ipc, &files, SYNC_KIND_MUTEX, 0, 0) as usize;
        assert_eq!(sys_sync_control(&files, m, SYNC_OP_LOCK, 0), 0);
        assert_eq!(sys_sync_control(&files, m, SYNC_OP_UNLOCK, 0), 0);
        assert_eq!(sys_read(&files, m, &mut [0u8; 1]), -EBADF);

        let mut fds = [0u32; 2];
        sys_pipe2(&ipc, &files, 0, &mut fds);
        assert_eq!(sys_sync_control(&files, fds[0] as usize, SYNC_OP_LOCK, 0), -ENOSYS);
    }
}
