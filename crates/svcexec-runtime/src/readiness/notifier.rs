//! `EventFdNotifier` - wakes the reactor out of `epoll_wait`.
//!
//! Coalescing: multiple calls to `notify()` before the reactor reads the
//! eventfd result in a single wakeup (eventfd counter semantics).

use nix::errno::Errno;

use std::io;
use std::os::unix::io::RawFd;

pub(super) struct EventFdNotifier {
    fd: RawFd,
}

impl EventFdNotifier {
    /// Create a new non-blocking eventfd. The notifier owns it.
    pub(super) fn create() -> io::Result<Self> {
        // SAFETY: plain syscall, no pointers.
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(Errno::last().into());
        }
        Ok(Self { fd })
    }

    #[inline]
    pub(super) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(super) fn notify(&self) -> io::Result<()> {
        let val: u64 = 1;
        // SAFETY: writes 8 bytes from a live u64.
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = Errno::last();
            // Counter saturated: a wakeup is already pending.
            if errno == Errno::EAGAIN {
                return Ok(());
            }
            return Err(errno.into());
        }
        Ok(())
    }

    /// Reset the counter after a wakeup
    pub(super) fn drain(&self) {
        let mut val: u64 = 0;
        // SAFETY: reads at most 8 bytes into a live u64.
        unsafe {
            libc::read(
                self.fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }
}

impl Drop for EventFdNotifier {
    fn drop(&mut self) {
        if self.fd >= 0 {
            // SAFETY: we own the descriptor.
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(fd: RawFd) -> bool {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: one valid pollfd.
        let n = unsafe { libc::poll(&mut pfd, 1, 0) };
        n == 1 && pfd.revents & libc::POLLIN != 0
    }

    #[test]
    fn test_notify_coalesces_and_drains() {
        let n = EventFdNotifier::create().unwrap();
        assert!(!pending(n.fd()));
        n.notify().unwrap();
        n.notify().unwrap();
        assert!(pending(n.fd()));
        n.drain();
        assert!(!pending(n.fd()));
    }
}
