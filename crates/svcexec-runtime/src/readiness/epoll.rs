//! # Reactor - the epoll readiness poller
//!
//! The reactor runs on a dedicated OS thread. It:
//! 1. Pops `Watch` commands from a lock-free queue
//! 2. Registers each descriptor one-shot with epoll
//! 3. Blocks in `epoll_wait()` (the eventfd wakes it for new commands)
//! 4. Classifies each event and hands the registration back to the
//!    dispatcher, which submits the callback to the pool
//!
//! Descriptors are never read here; a one-byte `MSG_PEEK` only tells EOF
//! apart from pending data when the peer hung up.

use super::notifier::EventFdNotifier;
use super::{DispatchShared, Registration};
use crate::launcher::{ThreadLauncher, WorkerHandle};
use crate::locks::lock;
use svcexec_core::error::{LaunchError, RejectedError};
use svcexec_core::session::{Readiness, SessionOutcome};
use svcexec_core::{kdebug, kerror, ktrace, kwarn};

use crossbeam_queue::SegQueue;
use nix::errno::Errno;

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Token reserved for the wakeup eventfd
const WAKE_TOKEN: u64 = 0;

const WATCH_EVENTS: u32 =
    (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLONESHOT) as u32;

struct Watch {
    reg: Registration,
    fd: RawFd,
}

pub(super) struct Reactor {
    epfd: RawFd,
    notifier: EventFdNotifier,
    commands: SegQueue<Watch>,
    launcher: ThreadLauncher,
    max_events: usize,
    running: AtomicBool,
    stop: AtomicBool,
    aborted: AtomicUsize,
    handle: Mutex<Option<WorkerHandle>>,
}

impl Reactor {
    /// Create the epoll instance and wakeup eventfd. No thread yet.
    pub(super) fn new(launcher: ThreadLauncher, max_events: usize) -> io::Result<Self> {
        // SAFETY: plain syscall.
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(Errno::last().into());
        }
        let notifier = match EventFdNotifier::create() {
            Ok(n) => n,
            Err(e) => {
                // SAFETY: we own epfd.
                unsafe { libc::close(epfd) };
                return Err(e);
            }
        };
        let reactor = Self {
            epfd,
            notifier,
            commands: SegQueue::new(),
            launcher,
            max_events: max_events.max(1),
            running: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            aborted: AtomicUsize::new(0),
            handle: Mutex::new(None),
        };
        reactor.ctl(libc::EPOLL_CTL_ADD, reactor.notifier.fd(), libc::EPOLLIN as u32, WAKE_TOKEN)?;
        Ok(reactor)
    }

    pub(super) fn start(&self, shared: &Arc<DispatchShared>) -> Result<(), LaunchError> {
        let mut handle = lock(&self.handle);
        if handle.is_some() {
            return Ok(());
        }
        let worker = Arc::clone(shared);
        *handle = Some(self.launcher.launch(move || reactor_loop(worker))?);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    #[inline]
    pub(super) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Hand `reg` to the reactor thread
    pub(super) fn watch(&self, shared: &Arc<DispatchShared>, reg: Registration, fd: RawFd) {
        self.commands.push(Watch { reg, fd });
        if self.stop.load(Ordering::SeqCst) || !self.running.load(Ordering::SeqCst) {
            // The reactor may already be gone; nobody else will pop this.
            self.flush_commands(shared);
            return;
        }
        if let Err(e) = self.notifier.notify() {
            kerror!("reactor wakeup failed: {}", e);
        }
    }

    /// Stop the reactor thread and join it.
    ///
    /// Returns how many registrations it failed with `Rejected`.
    pub(super) fn shutdown(&self) -> usize {
        self.stop.store(true, Ordering::SeqCst);
        if let Err(e) = self.notifier.notify() {
            kerror!("reactor wakeup failed: {}", e);
        }
        if let Some(handle) = lock(&self.handle).take() {
            handle.join();
        }
        self.running.store(false, Ordering::SeqCst);
        self.aborted.load(Ordering::SeqCst)
    }

    /// Hand every queued watch to `give_up`
    fn flush_commands(&self, shared: &Arc<DispatchShared>) {
        while let Some(cmd) = self.commands.pop() {
            self.give_up(shared, cmd.reg);
        }
    }

    /// The reactor will not watch `reg`: fail it while stopping, otherwise
    /// move it to a waiter thread.
    fn give_up(&self, shared: &Arc<DispatchShared>, reg: Registration) {
        if self.stop.load(Ordering::SeqCst) {
            self.aborted.fetch_add(1, Ordering::SeqCst);
            shared.abort(reg, RejectedError::ShuttingDown);
        } else {
            shared.wait_on_thread(reg);
        }
    }

    /// Make the next `epoll_wait` fail by swapping the epoll descriptor
    /// for a pipe.
    #[cfg(test)]
    pub(super) fn fail(&self) {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: `fds` has room for two descriptors; `epfd` stays owned by
        // this reactor and now refers to the pipe's read end.
        unsafe {
            assert_eq!(libc::pipe(fds.as_mut_ptr()), 0);
            assert!(libc::dup2(fds[0], self.epfd) >= 0);
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
        let _ = self.notifier.notify();
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
        let mut ev = libc::epoll_event { events, u64: token };
        // SAFETY: `ev` is a valid epoll_event for the duration of the call.
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc < 0 {
            return Err(Errno::last().into());
        }
        Ok(())
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        if self.epfd >= 0 {
            // SAFETY: we own the descriptor.
            unsafe {
                libc::close(self.epfd);
            }
            self.epfd = -1;
        }
    }
}

/// The reactor loop - runs on a dedicated OS thread.
fn reactor_loop(shared: Arc<DispatchShared>) {
    let reactor = match &shared.reactor {
        Some(r) => r,
        None => return,
    };
    let mut watched: HashMap<u64, Watch> = HashMap::new();
    let mut next_token: u64 = WAKE_TOKEN + 1;
    let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; reactor.max_events];

    kdebug!("{}: reactor started", shared.name);

    loop {
        // ── Step 1: register new watches ──
        while let Some(cmd) = reactor.commands.pop() {
            let token = next_token;
            next_token += 1;
            match reactor.ctl(libc::EPOLL_CTL_ADD, cmd.fd, WATCH_EVENTS, token) {
                Ok(()) => {
                    ktrace!("{}: watching fd {} as {}", shared.name, cmd.fd, cmd.reg.id());
                    watched.insert(token, cmd);
                }
                Err(e) => {
                    kwarn!("{}: epoll add fd {} failed, using waiter: {}", shared.name, cmd.fd, e);
                    shared.wait_on_thread(cmd.reg);
                }
            }
        }

        if reactor.stop.load(Ordering::SeqCst) {
            break;
        }

        // ── Step 2: wait ──
        // SAFETY: `events` has room for `max_events` entries.
        let n = unsafe {
            libc::epoll_wait(
                reactor.epfd,
                events.as_mut_ptr(),
                reactor.max_events as libc::c_int,
                -1,
            )
        };
        if n < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                continue;
            }
            kerror!(
                "{}: epoll_wait failed, moving waits to waiter threads: {}",
                shared.name,
                errno
            );
            break;
        }

        // ── Step 3: dispatch ──
        for ev in &events[..n as usize] {
            let token = ev.u64;
            let flags = ev.events;
            if token == WAKE_TOKEN {
                reactor.notifier.drain();
                continue;
            }
            let cmd = match watched.remove(&token) {
                Some(cmd) => cmd,
                None => continue,
            };
            // One-shot already disarmed it; drop it from the set so the
            // next registration for this fd can ADD again.
            let _ = reactor.ctl(libc::EPOLL_CTL_DEL, cmd.fd, 0, token);
            let outcome = if cmd.reg.session.is_connected() {
                SessionOutcome::from(classify(cmd.fd, flags))
            } else {
                SessionOutcome::Closed
            };
            ktrace!("{}: {} ready: {:?}", shared.name, cmd.reg.id(), outcome);
            shared.complete(cmd.reg, outcome);
        }
    }

    // New watches go to waiter threads from here on. Whatever is still
    // watched or queued is failed on shutdown, or moved to a waiter after
    // a fatal error.
    reactor.running.store(false, Ordering::SeqCst);
    for (token, cmd) in watched.drain() {
        let _ = reactor.ctl(libc::EPOLL_CTL_DEL, cmd.fd, 0, token);
        reactor.give_up(&shared, cmd.reg);
    }
    reactor.flush_commands(&shared);
    kdebug!("{}: reactor stopped", shared.name);
}

/// Map epoll flags for `fd` to a readiness result
fn classify(fd: RawFd, flags: u32) -> Readiness {
    if flags & libc::EPOLLERR as u32 != 0 {
        return Readiness::Errored(socket_error(fd));
    }
    if flags & (libc::EPOLLHUP | libc::EPOLLRDHUP) as u32 != 0 {
        return if has_pending_data(fd) {
            Readiness::Readable
        } else {
            Readiness::Closed
        };
    }
    Readiness::Readable
}

fn has_pending_data(fd: RawFd) -> bool {
    let mut byte = 0u8;
    // SAFETY: peeks at most one byte into a live buffer.
    let n = unsafe {
        libc::recv(
            fd,
            &mut byte as *mut u8 as *mut libc::c_void,
            1,
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };
    n > 0
}

fn socket_error(fd: RawFd) -> io::ErrorKind {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `err`/`len` are valid out-parameters for SO_ERROR.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if rc < 0 || err == 0 {
        return io::ErrorKind::Other;
    }
    io::Error::from_raw_os_error(err).kind()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_classify_readable_and_closed() {
        let (mut client, server) = pair();
        client.write_all(b"x").unwrap();
        client.flush().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(
            classify(server.as_raw_fd(), libc::EPOLLIN as u32),
            Readiness::Readable
        );
        // Hangup with a byte still pending is reported readable.
        drop(client);
        std::thread::sleep(std::time::Duration::from_millis(20));
        let hup = (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
        assert_eq!(classify(server.as_raw_fd(), hup), Readiness::Readable);

        let (client, server) = pair();
        drop(client);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(classify(server.as_raw_fd(), hup), Readiness::Closed);
    }
}
