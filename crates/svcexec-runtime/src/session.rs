//! `TcpSession` - a ready-made `Session` over a TCP stream.
//!
//! The blocking wait is a `poll(2)` on the socket followed by a one-byte
//! `MSG_PEEK` to tell pending data from EOF. The descriptor is exposed to
//! the pool executors' epoll reactor.

use svcexec_core::session::{Readiness, Session, SessionId};
use svcexec_core::ktrace;

use nix::errno::Errno;

use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

pub struct TcpSession {
    id: SessionId,
    stream: TcpStream,
    ended: AtomicBool,
}

impl TcpSession {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            id: SessionId::next(),
            stream,
            ended: AtomicBool::new(false),
        }
    }

    /// The underlying stream; `&TcpStream` implements `Read` and `Write`.
    #[inline]
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    fn peek(&self) -> PeekResult {
        let mut byte = 0u8;
        // SAFETY: peeks at most one byte into a live buffer.
        let n = unsafe {
            libc::recv(
                self.stream.as_raw_fd(),
                &mut byte as *mut u8 as *mut libc::c_void,
                1,
                libc::MSG_PEEK | libc::MSG_DONTWAIT,
            )
        };
        match n {
            n if n > 0 => PeekResult::Data,
            0 => PeekResult::Eof,
            _ => match Errno::last() {
                Errno::EAGAIN | Errno::EINTR => PeekResult::Empty,
                errno => PeekResult::Error(io::Error::from(errno).kind()),
            },
        }
    }
}

enum PeekResult {
    Data,
    Eof,
    Empty,
    Error(io::ErrorKind),
}

impl Session for TcpSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn wait_readable(&self) -> Readiness {
        loop {
            if self.ended.load(Ordering::Acquire) {
                return Readiness::Closed;
            }
            let mut pfd = libc::pollfd {
                fd: self.stream.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: one valid pollfd.
            let n = unsafe { libc::poll(&mut pfd, 1, -1) };
            if n < 0 {
                let errno = Errno::last();
                if errno == Errno::EINTR {
                    continue;
                }
                return Readiness::Errored(io::Error::from(errno).kind());
            }
            if pfd.revents & libc::POLLNVAL != 0 {
                return Readiness::Closed;
            }
            if pfd.revents & libc::POLLERR != 0 {
                let kind = match self.stream.take_error() {
                    Ok(Some(e)) => e.kind(),
                    _ => io::ErrorKind::Other,
                };
                return Readiness::Errored(kind);
            }
            match self.peek() {
                PeekResult::Data => return Readiness::Readable,
                PeekResult::Eof => return Readiness::Closed,
                PeekResult::Error(kind) => return Readiness::Errored(kind),
                PeekResult::Empty => ktrace!("{}: spurious wakeup", self.id),
            }
        }
    }

    fn is_connected(&self) -> bool {
        !self.ended.load(Ordering::Acquire)
    }

    fn end(&self) {
        if !self.ended.swap(true, Ordering::AcqRel) {
            // Wakes a wait in progress with POLLHUP.
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    fn readiness_fd(&self) -> Option<RawFd> {
        Some(self.stream.as_raw_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::fixed::FixedExecutor;
    use crate::launcher::ThreadAccounting;
    use svcexec_core::executor::Executor;
    use svcexec_core::session::SessionOutcome;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    fn pair() -> (TcpStream, TcpSession) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, TcpSession::new(server))
    }

    #[test]
    fn test_readable_then_closed() {
        let (mut client, session) = pair();
        client.write_all(b"ping").unwrap();
        assert_eq!(session.wait_readable(), Readiness::Readable);

        let mut buf = [0u8; 4];
        session.stream().read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        drop(client);
        assert_eq!(session.wait_readable(), Readiness::Closed);
        assert!(session.is_connected());
    }

    #[test]
    fn test_end_wakes_blocked_wait() {
        let (_client, session) = pair();
        let session = Arc::new(session);
        let s2 = session.clone();
        let waiter = thread::spawn(move || s2.wait_readable());
        thread::sleep(Duration::from_millis(30));
        session.end();
        assert_eq!(waiter.join().unwrap(), Readiness::Closed);
        assert!(!session.is_connected());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_fixed_pool_dispatch_over_loopback() {
        let config = ExecutorConfig::new()
            .pool_threads(2)
            .max_waiters(1)
            .thread_name_prefix("svx-test");
        let exec = FixedExecutor::new(&config, Arc::new(ThreadAccounting::new()));
        exec.start().unwrap();

        let mut clients = Vec::new();
        let (tx, rx) = mpsc::channel();
        for _ in 0..8 {
            let (client, session) = pair();
            clients.push(client);
            let tx = tx.clone();
            exec.run_when_data_available(Arc::new(session), Box::new(move |o| tx.send(o).unwrap()))
                .unwrap();
        }
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        // 2 workers + reactor; the waiter is never needed for sockets
        assert!(exec.stats().threads <= 3, "{}", exec.stats().threads);

        clients[3].write_all(b"x").unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            SessionOutcome::Readable
        );
        // Hang up on sessions 2..8; session 3 has no wait left.
        clients.truncate(2);
        for _ in 0..5 {
            let o = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(o, SessionOutcome::Closed);
        }

        let report = exec.shutdown(Duration::from_secs(1));
        assert!(report.drained);
        for _ in 0..2 {
            assert_eq!(
                rx.recv_timeout(Duration::from_secs(2)).unwrap(),
                SessionOutcome::Rejected(svcexec_core::error::RejectedError::ShuttingDown)
            );
        }
    }
}
