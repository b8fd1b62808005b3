//! Non-blocking TCP sockets
//!
//! Thin state-tracking wrapper over `socket2::Socket` for listeners,
//! accepted connections and outbound connects.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};

/// Socket state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Outbound connect is in flight
    Connecting,
    /// Socket is connected and ready
    Connected,
    /// Socket is listening for connections
    Listening,
    /// Socket encountered an error
    Error,
    /// Write side has been shut down
    Closed,
}

/// Async socket wrapper
pub struct AsyncSocket {
    inner: Socket,
    state: SocketState,
    remote_addr: Option<SocketAddr>,
}

impl AsyncSocket {
    fn tcp(addr: &SocketAddr) -> io::Result<Socket> {
        let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }

    /// Bind a listening socket with `SO_REUSEADDR`
    pub fn listen(addr: SocketAddr, backlog: i32) -> io::Result<Self> {
        let socket = Self::tcp(&addr)?;
        socket.set_reuse_address(true)?;
        socket.bind(&SockAddr::from(addr))?;
        socket.listen(backlog)?;
        Ok(Self {
            inner: socket,
            state: SocketState::Listening,
            remote_addr: None,
        })
    }

    /// Start a non-blocking connect. The returned socket is usually still
    /// [`SocketState::Connecting`]; call [`check_connect`](Self::check_connect)
    /// once it reports writable.
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let socket = Self::tcp(&addr)?;
        let state = match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => SocketState::Connected,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.raw_os_error() == Some(libc::EINPROGRESS) =>
            {
                SocketState::Connecting
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            inner: socket,
            state,
            remote_addr: Some(addr),
        })
    }

    /// Check if connect completed (call after socket becomes writable)
    pub fn check_connect(&mut self) -> io::Result<()> {
        if self.state != SocketState::Connecting {
            return Ok(());
        }
        if let Some(err) = self.inner.take_error()? {
            self.state = SocketState::Error;
            return Err(err);
        }
        // Writable without a pending error can still mean "not yet" on some
        // platforms; a peer address confirms the handshake finished.
        match self.inner.peer_addr() {
            Ok(_) => {
                self.state = SocketState::Connected;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "connection in progress"))
            }
            Err(e) => {
                self.state = SocketState::Error;
                Err(e)
            }
        }
    }

    /// Accept one pending connection (TCP only)
    pub fn accept(&self) -> io::Result<(AsyncSocket, SocketAddr)> {
        let (socket, addr) = self.inner.accept()?;
        socket.set_nonblocking(true)?;
        let addr = addr.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "accepted non-inet peer")
        })?;
        Ok((
            AsyncSocket {
                inner: socket,
                state: SocketState::Connected,
                remote_addr: Some(addr),
            },
            addr,
        ))
    }

    /// Non-blocking read
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.inner).read(buf)
    }

    /// Non-blocking write
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (&self.inner).write(buf)
    }

    /// Shut down the write half
    pub fn shutdown_write(&mut self) -> io::Result<()> {
        if self.state == SocketState::Closed {
            return Ok(());
        }
        self.state = SocketState::Closed;
        self.inner.shutdown(Shutdown::Write)
    }

    /// Get the file descriptor
    pub fn fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    /// Get the current state
    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()?.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "socket has no inet address")
        })
    }

    /// Get the remote address
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

impl AsRawFd for AsyncSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn retry<T>(mut f: impl FnMut() -> io::Result<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match f() {
                Ok(v) => return v,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => panic!("socket error: {}", e),
            }
        }
    }

    #[test]
    fn test_listen_binds_ephemeral_port() {
        let listener = AsyncSocket::listen(loopback(), 10).unwrap();
        assert_eq!(listener.state(), SocketState::Listening);
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_accept_without_pending_would_block() {
        let listener = AsyncSocket::listen(loopback(), 10).unwrap();
        let err = listener.accept().err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_connect_accept_exchange() {
        let listener = AsyncSocket::listen(loopback(), 10).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = AsyncSocket::connect(addr).unwrap();
        let (server, peer) = retry(|| listener.accept());
        retry(|| client.check_connect());
        assert_eq!(client.state(), SocketState::Connected);
        assert_eq!(server.remote_addr(), Some(peer));

        let written = retry(|| client.write(b"ping"));
        assert_eq!(written, 4);

        let mut buf = [0u8; 16];
        let n = retry(|| server.read(&mut buf));
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn test_connect_refused_reports_error() {
        let addr = {
            let listener = AsyncSocket::listen(loopback(), 1).unwrap();
            listener.local_addr().unwrap()
        };
        match AsyncSocket::connect(addr) {
            Err(_) => {}
            Ok(mut socket) => {
                let deadline = Instant::now() + Duration::from_secs(2);
                loop {
                    match socket.check_connect() {
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            assert!(Instant::now() < deadline);
                            std::thread::sleep(Duration::from_millis(1));
                        }
                        Err(_) => break,
                        Ok(()) => panic!("connect to closed port succeeded"),
                    }
                }
                assert_eq!(socket.state(), SocketState::Error);
            }
        }
    }
}
