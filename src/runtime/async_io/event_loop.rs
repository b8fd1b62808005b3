//! Platform-specific readiness multiplexers
//!
//! Provides a unified interface over:
//! - Linux: epoll
//! - macOS/BSD: kqueue
//!
//! Registrations are edge-triggered, so owners must drain reads, accepts and
//! writes until `WouldBlock` every time they are notified.

use std::io;
use std::time::Duration;

/// Unique token identifying a registered resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

/// Interest flags for I/O events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(pub u8);

impl Interest {
    pub const READABLE: Interest = Interest(0b0001);
    pub const WRITABLE: Interest = Interest(0b0010);
    pub const ERROR: Interest = Interest(0b0100);
    pub const HUP: Interest = Interest(0b1000);

    pub fn is_readable(&self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    pub fn is_error(&self) -> bool {
        self.0 & Self::ERROR.0 != 0
    }

    pub fn is_hup(&self) -> bool {
        self.0 & Self::HUP.0 != 0
    }
}

impl std::ops::BitOr for Interest {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Interest(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for Interest {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Interest(self.0 & rhs.0)
    }
}

impl std::ops::BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// An I/O event from the event loop
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub token: Token,
    pub interest: Interest,
}

/// Converts a poll timeout to whole milliseconds, rounding up so a timer
/// deadline is never reported before it has actually passed.
fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => {
            let mut ms = d.as_millis();
            if Duration::from_millis(ms as u64) < d {
                ms += 1;
            }
            ms.min(i32::MAX as u128) as i32
        }
    }
}

/// Platform-specific event loop
pub struct EventLoop {
    #[cfg(target_os = "linux")]
    inner: LinuxEventLoop,

    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    ))]
    inner: KqueueEventLoop,
}

impl EventLoop {
    /// Create a new event loop that reports at most `max_events` per poll
    pub fn new(max_events: usize) -> io::Result<Self> {
        let max_events = max_events.max(1);
        Ok(Self {
            #[cfg(target_os = "linux")]
            inner: LinuxEventLoop::new(max_events)?,

            #[cfg(any(
                target_os = "macos",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd"
            ))]
            inner: KqueueEventLoop::new(max_events)?,
        })
    }

    /// Register a file descriptor for events
    pub fn register(&mut self, fd: i32, token: Token, interest: Interest) -> io::Result<()> {
        self.inner.register(fd, token, interest)
    }

    /// Deregister a file descriptor
    pub fn deregister(&mut self, fd: i32) -> io::Result<()> {
        self.inner.deregister(fd)
    }

    /// Poll for events, appending them to `events`
    pub fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        self.inner.poll(events, timeout)
    }
}

// =============================================================================
// Linux: epoll implementation
// =============================================================================

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use std::os::unix::io::RawFd;

    pub struct LinuxEventLoop {
        epoll_fd: RawFd,
        events: Vec<libc::epoll_event>,
    }

    impl LinuxEventLoop {
        pub fn new(max_events: usize) -> io::Result<Self> {
            let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
            if epoll_fd < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self {
                epoll_fd,
                events: vec![libc::epoll_event { events: 0, u64: 0 }; max_events],
            })
        }

        pub fn register(&mut self, fd: i32, token: Token, interest: Interest) -> io::Result<()> {
            let mut event = libc::epoll_event {
                events: interest_to_epoll(interest),
                u64: token.0,
            };

            let result =
                unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut event) };

            if result < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }

        pub fn deregister(&mut self, fd: i32) -> io::Result<()> {
            let result = unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
            };

            if result < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }

        pub fn poll(
            &mut self,
            events: &mut Vec<Event>,
            timeout: Option<Duration>,
        ) -> io::Result<usize> {
            let count = unsafe {
                libc::epoll_wait(
                    self.epoll_fd,
                    self.events.as_mut_ptr(),
                    self.events.len() as i32,
                    timeout_millis(timeout),
                )
            };

            if count < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(0);
                }
                return Err(err);
            }

            for epoll_event in &self.events[..count as usize] {
                let token = epoll_event.u64;
                let flags = epoll_event.events;
                events.push(Event {
                    token: Token(token),
                    interest: epoll_to_interest(flags),
                });
            }

            Ok(count as usize)
        }
    }

    impl Drop for LinuxEventLoop {
        fn drop(&mut self) {
            unsafe { libc::close(self.epoll_fd) };
        }
    }

    fn interest_to_epoll(interest: Interest) -> u32 {
        let mut events = libc::EPOLLET as u32;
        if interest.is_readable() {
            events |= libc::EPOLLIN as u32 | libc::EPOLLRDHUP as u32;
        }
        if interest.is_writable() {
            events |= libc::EPOLLOUT as u32;
        }
        events |= libc::EPOLLERR as u32;
        events |= libc::EPOLLHUP as u32;
        events
    }

    fn epoll_to_interest(events: u32) -> Interest {
        let mut interest = Interest(0);
        if events & libc::EPOLLIN as u32 != 0 {
            interest |= Interest::READABLE;
        }
        if events & libc::EPOLLOUT as u32 != 0 {
            interest |= Interest::WRITABLE;
        }
        if events & libc::EPOLLERR as u32 != 0 {
            interest |= Interest::ERROR;
        }
        if events & (libc::EPOLLHUP as u32 | libc::EPOLLRDHUP as u32) != 0 {
            interest |= Interest::HUP;
        }
        interest
    }
}

#[cfg(target_os = "linux")]
use linux::LinuxEventLoop;

// =============================================================================
// macOS/BSD: kqueue implementation
// =============================================================================

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd"
))]
mod kqueue {
    use super::*;
    use std::os::unix::io::RawFd;

    pub struct KqueueEventLoop {
        kqueue_fd: RawFd,
        events: Vec<libc::kevent>,
    }

    fn change(fd: i32, filter: i16, flags: u16, token: Token) -> libc::kevent {
        let mut kev: libc::kevent = unsafe { std::mem::zeroed() };
        kev.ident = fd as usize;
        kev.filter = filter as _;
        kev.flags = flags as _;
        kev.udata = token.0 as _;
        kev
    }

    impl KqueueEventLoop {
        pub fn new(max_events: usize) -> io::Result<Self> {
            let kqueue_fd = unsafe { libc::kqueue() };
            if kqueue_fd < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self {
                kqueue_fd,
                events: vec![unsafe { std::mem::zeroed() }; max_events],
            })
        }

        pub fn register(&mut self, fd: i32, token: Token, interest: Interest) -> io::Result<()> {
            let mut changes = Vec::with_capacity(2);
            let flags = (libc::EV_ADD | libc::EV_CLEAR) as u16;

            if interest.is_readable() {
                changes.push(change(fd, libc::EVFILT_READ as i16, flags, token));
            }
            if interest.is_writable() {
                changes.push(change(fd, libc::EVFILT_WRITE as i16, flags, token));
            }
            if changes.is_empty() {
                return Ok(());
            }

            let result = unsafe {
                libc::kevent(
                    self.kqueue_fd,
                    changes.as_ptr(),
                    changes.len() as _,
                    std::ptr::null_mut(),
                    0,
                    std::ptr::null(),
                )
            };

            if result < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }

        pub fn deregister(&mut self, fd: i32) -> io::Result<()> {
            let delete = libc::EV_DELETE as u16;
            let changes = [
                change(fd, libc::EVFILT_READ as i16, delete, Token(0)),
                change(fd, libc::EVFILT_WRITE as i16, delete, Token(0)),
            ];

            // A filter that was never added reports ENOENT; nothing to undo.
            unsafe {
                libc::kevent(
                    self.kqueue_fd,
                    changes.as_ptr(),
                    changes.len() as _,
                    std::ptr::null_mut(),
                    0,
                    std::ptr::null(),
                );
            }

            Ok(())
        }

        pub fn poll(
            &mut self,
            events: &mut Vec<Event>,
            timeout: Option<Duration>,
        ) -> io::Result<usize> {
            let timeout_spec = timeout.map(|d| libc::timespec {
                tv_sec: d.as_secs() as libc::time_t,
                tv_nsec: d.subsec_nanos() as libc::c_long,
            });

            let timeout_ptr = match &timeout_spec {
                Some(ts) => ts as *const libc::timespec,
                None => std::ptr::null(),
            };

            let count = unsafe {
                libc::kevent(
                    self.kqueue_fd,
                    std::ptr::null(),
                    0,
                    self.events.as_mut_ptr(),
                    self.events.len() as _,
                    timeout_ptr,
                )
            };

            if count < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(0);
                }
                return Err(err);
            }

            for kevent in &self.events[..count as usize] {
                let token = Token(kevent.udata as u64);

                let mut interest = Interest(0);
                if kevent.filter == libc::EVFILT_READ {
                    interest |= Interest::READABLE;
                }
                if kevent.filter == libc::EVFILT_WRITE {
                    interest |= Interest::WRITABLE;
                }
                if kevent.flags & libc::EV_ERROR != 0 {
                    interest |= Interest::ERROR;
                }
                if kevent.flags & libc::EV_EOF != 0 {
                    interest |= Interest::HUP;
                }

                events.push(Event { token, interest });
            }

            Ok(count as usize)
        }
    }

    impl Drop for KqueueEventLoop {
        fn drop(&mut self) {
            unsafe { libc::close(self.kqueue_fd) };
        }
    }
}

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd"
))]
use kqueue::KqueueEventLoop;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interest_flags() {
        let interest = Interest::READABLE | Interest::WRITABLE;
        assert!(interest.is_readable());
        assert!(interest.is_writable());
        assert!(!interest.is_error());
        assert!(!interest.is_hup());
    }

    #[test]
    fn test_event_loop_creation() {
        let loop_result = EventLoop::new(64);
        assert!(loop_result.is_ok());
    }

    #[test]
    fn test_timeout_rounds_up() {
        assert_eq!(timeout_millis(None), -1);
        assert_eq!(timeout_millis(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_millis(Some(Duration::from_micros(1))), 1);
        assert_eq!(timeout_millis(Some(Duration::from_millis(5))), 5);
        assert_eq!(timeout_millis(Some(Duration::from_micros(5_100))), 6);
    }

    #[test]
    fn test_poll_times_out_without_registrations() {
        let mut event_loop = EventLoop::new(8).unwrap();
        let mut events = Vec::new();
        let count = event_loop
            .poll(&mut events, Some(Duration::from_millis(1)))
            .unwrap();
        assert_eq!(count, 0);
        assert!(events.is_empty());
    }
}
